//! Default environment for processes started by init

const DEFAULTS: &[(&str, &str)] = &[
    ("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"),
    ("HOME", "/root"),
    ("SHELL", "/bin/sh"),
    ("TERM", "linux"),
];

/// Variables from `DEFAULTS` that `lookup` does not already provide
pub fn missing_defaults<F>(lookup: F) -> Vec<(&'static str, &'static str)>
where
    F: Fn(&str) -> Option<String>,
{
    DEFAULTS
        .iter()
        .filter(|(key, _)| lookup(key).map_or(true, |v| v.is_empty()))
        .copied()
        .collect()
}
