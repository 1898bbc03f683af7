//! INI-style unit file parser
//!
//! Turns a unit file into sections of ordered, possibly repeated keys.
//! Typed conversion happens in the parent module.

use std::collections::HashMap;
use std::path::Path;

/// A section maps each (upper-cased) key to its values.
/// The u32 is the order the value appeared (for stable ordering)
pub type ParsedSection = HashMap<String, Vec<(u32, String)>>;

/// A parsed unit file is a map of section names to their contents
pub type ParsedFile = HashMap<String, ParsedSection>;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Section '{0}' appears more than once")]
    DuplicateSection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("Unknown unit type: {0}")]
    UnknownUnitType(String),

    #[error("Parse error: {0}")]
    Generic(String),
}

/// Keys whose values are whitespace-separated unit lists
const LIST_KEYS: &[&str] = &["REQUIRES", "WANTS"];

/// Parse a unit file from a string
///
/// Blank lines and `#`/`;` comments are skipped anywhere, and so is
/// anything before the first `[Section]` header. Inside a section every
/// other line must be `Key=Value`.
pub fn parse_file(content: &str) -> Result<ParsedFile, ParseError> {
    let mut sections = ParsedFile::new();
    let mut current: Option<String> = None;
    let mut order = 0u32;

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') {
            if !line.ends_with(']') {
                return Err(syntax(index, format!("unterminated section header {}", line)));
            }
            if sections.contains_key(line) {
                return Err(ParseError::DuplicateSection(line.to_string()));
            }
            sections.insert(line.to_string(), ParsedSection::new());
            current = Some(line.to_string());
            continue;
        }

        let Some(section) = current.as_ref().and_then(|name| sections.get_mut(name)) else {
            continue;
        };

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| syntax(index, format!("expected Key=Value, got {:?}", line)))?;
        let key = key.trim().to_uppercase();
        if key.is_empty() {
            return Err(syntax(index, "missing key before '='".to_string()));
        }

        let values = split_value(&key, value.trim());
        let entries = section.entry(key).or_default();
        for value in values {
            entries.push((order, value.to_string()));
            order += 1;
        }
    }

    Ok(sections)
}

/// Dependency lists become one value per name; anything else stays whole
fn split_value<'a>(key: &str, value: &'a str) -> Vec<&'a str> {
    if LIST_KEYS.contains(&key) {
        value.split_whitespace().collect()
    } else if value.is_empty() {
        Vec::new()
    } else {
        vec![value]
    }
}

fn syntax(index: usize, reason: String) -> ParseError {
    ParseError::Syntax {
        line: index + 1,
        reason,
    }
}

/// Read and parse a unit file from disk
pub async fn parse_unit_file(path: &Path) -> Result<ParsedFile, ParseError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_file(&content)
}

/// Split a command line into program and arguments using shell quoting rules
pub fn parse_command(raw: &str) -> Result<(String, Vec<String>), ParseError> {
    let mut parts = shlex::split(raw)
        .ok_or_else(|| ParseError::Generic(format!("Invalid shell quoting in: {}", raw)))?;

    if parts.is_empty() {
        return Err(ParseError::Generic("Empty command line".to_string()));
    }

    let program = parts.remove(0);
    Ok((program, parts))
}

/// Parse a boolean setting (yes/true/1/on)
pub fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "yes" | "true" | "1" | "on")
}
