use anyhow::{bail, Result};
use glob::Pattern;

pub const TASK_EXTENSION: &str = "task";
pub const WORK_EXTENSION: &str = "work";
pub const PUBLISH_EXTENSION: &str = "pub";

/// Entity names become folder and file names on shared storage, so only a
/// conservative character set is accepted.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name cannot be empty");
    }
    if let Some(bad) = name
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-'))
    {
        bail!("name '{name}' contains unsupported character '{bad}'");
    }
    Ok(())
}

#[must_use]
pub fn version_tag(version: u32) -> String {
    format!("v{version:03}")
}

/// `test`, 3, `.ma` -> `test_v003.ma`
#[must_use]
pub fn version_name(name: &str, version: u32, extension: &str) -> String {
    format!("{name}_{}{extension}", version_tag(version))
}

#[must_use]
pub fn publish_file_name(name: &str, version: u32) -> String {
    version_name(name, version, &format!(".{PUBLISH_EXTENSION}"))
}

/// Recovers the version number from a versioned file name produced by
/// [`version_name`] for the given base name.
#[must_use]
pub fn parse_version_number(file_name: &str, name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(name)?.strip_prefix("_v")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let tail = &rest[digits.len()..];
    if !(tail.is_empty() || tail.starts_with('.')) {
        return None;
    }
    digits.parse().ok()
}

/// Posix join for relative entity paths where the root is the empty string.
#[must_use]
pub fn join_relative(base: &str, part: &str) -> String {
    let base = base.trim_matches('/');
    let part = part.trim_matches('/');
    match (base.is_empty(), part.is_empty()) {
        (true, _) => part.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}/{part}"),
    }
}

#[must_use]
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    Pattern::new(pattern).is_ok_and(|compiled| compiled.matches(candidate))
}
