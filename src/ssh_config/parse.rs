//! Line-oriented parsing and rendering of `Host` records.

use super::{ConfigEntries, ConfigEntry, FieldName, SshConfigError};

const HOST_KEYWORD: &str = "Host";

/// Parses SSH client configuration text into records keyed by host pattern.
///
/// A record starts at a `Host` line and collects recognised options until a
/// blank line, the next `Host` line, or end of input. Comment lines are
/// skipped, unknown options are dropped, and options appearing before the
/// first `Host` line are ignored. When a host pattern repeats, the later
/// record wins.
///
/// # Errors
///
/// Returns [`SshConfigError::Malformed`] for the first line that has a
/// keyword but no value.
///
/// # Examples
///
/// ```
/// use devstead::ssh_config::{FieldName, parse};
///
/// let entries = parse("Host dev\n  hostname dev.example.com\n").expect("valid config");
/// let dev = entries.get("dev").expect("dev record");
/// assert_eq!(dev.get(FieldName::HostName), Some("dev.example.com"));
/// ```
pub fn parse(source: &str) -> Result<ConfigEntries, SshConfigError> {
    let mut entries = ConfigEntries::new();
    let mut current: Option<ConfigEntry> = None;

    for (index, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            finish_record(&mut entries, current.take());
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let (keyword, value) = split_line(line).ok_or_else(|| SshConfigError::Malformed {
            line: index + 1,
            text: raw.to_owned(),
        })?;

        if keyword.eq_ignore_ascii_case(HOST_KEYWORD) {
            finish_record(&mut entries, current.take());
            current = Some(ConfigEntry::new(value));
            continue;
        }

        if let Some(field) = FieldName::from_keyword(keyword)
            && let Some(entry) = current.as_mut()
        {
            entry.fields.insert(field, value.to_owned());
        }
    }

    finish_record(&mut entries, current);
    Ok(entries)
}

fn split_line(line: &str) -> Option<(&str, &str)> {
    let (keyword, rest) = line.split_once(char::is_whitespace)?;
    let value = rest.trim();
    if value.is_empty() {
        return None;
    }
    Some((keyword, value))
}

fn finish_record(entries: &mut ConfigEntries, record: Option<ConfigEntry>) {
    if let Some(entry) = record
        && !entry.host.trim().is_empty()
    {
        entries.insert(entry.host.clone(), entry);
    }
}

/// Renders records in ascending host order, one blank-line-terminated
/// block per host with options indented by two spaces.
#[must_use]
pub fn render(entries: &ConfigEntries) -> String {
    let mut out = String::new();
    for entry in entries.values().filter(|entry| !entry.host.trim().is_empty()) {
        out.push_str(&format!("{HOST_KEYWORD} {}\n", entry.host));
        for (field, value) in &entry.fields {
            out.push_str(&format!("  {field} {value}\n"));
        }
        out.push('\n');
    }
    out
}
