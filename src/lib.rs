//! unitd - service supervisor with dependency-ordered startup
//!
//! Units are services (long-running processes) or packages (install/remove
//! hooks). Starting or installing a unit first brings up everything it
//! requires; bulk startup walks enabled units in priority order.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              unitd         unitctl            │
//! ├───────────────────────────────────────────────┤
//! │  Protocol (peercred-ipc, MessagePack)         │
//! ├───────────────────────────────────────────────┤
//! │  Manager: registry │ resolver │ supervisor    │
//! ├───────────────────────────────────────────────┤
//! │  Unit files        │  PID 1 environment       │
//! └───────────────────────────────────────────────┘
//! ```

pub mod manager;
pub mod pid1;
pub mod protocol;
pub mod units;
