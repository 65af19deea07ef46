//! Shared helpers for backend output parsers
//!
//! Every list-style parser maps a fixed positional schema onto named fields.
//! A record with the wrong field count is an error, never a partial record.

use crate::error::{Error, Result};

/// Build a parse error for the given command and 1-based line number
pub fn parse_error(command: &str, line: usize, reason: impl Into<String>) -> Error {
    Error::Parse {
        command: command.to_string(),
        line,
        reason: reason.into(),
    }
}

/// Split a delimited record, enforcing the exact field count
pub fn split_fields<'a>(
    command: &str,
    line_no: usize,
    line: &'a str,
    delimiter: char,
    expected: usize,
) -> Result<Vec<&'a str>> {
    let fields: Vec<&str> = line.split(delimiter).collect();
    if fields.len() != expected {
        return Err(parse_error(
            command,
            line_no,
            format!("expected {} fields, found {}", expected, fields.len()),
        ));
    }
    Ok(fields)
}

/// Non-empty lines with their 1-based line numbers
pub fn records(stdout: &str) -> impl Iterator<Item = (usize, &str)> {
    stdout
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| (i + 1, line))
}

/// Byte count: exact integers (`-p` output) or suffixed sizes (`1.5G`, `512KiB`).
/// `-` means "not applicable" and reads as zero.
pub fn parse_bytes(command: &str, line_no: usize, field: &str, value: &str) -> Result<u64> {
    let value = value.trim();
    if value == "-" {
        return Ok(0);
    }
    if let Ok(n) = value.parse::<u64>() {
        return Ok(n);
    }

    let unit_start = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(unit_start);
    let multiplier: u64 = match unit.trim_end_matches("iB").trim_end_matches('B') {
        "" => 1,
        "K" | "k" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        "P" => 1 << 50,
        "E" => 1 << 60,
        _ => {
            return Err(parse_error(
                command,
                line_no,
                format!("{}: unknown size unit in '{}'", field, value),
            ))
        }
    };
    let number: f64 = number.parse().map_err(|_| {
        parse_error(command, line_no, format!("{}: invalid size '{}'", field, value))
    })?;
    Ok((number * multiplier as f64).round() as u64)
}

/// Optional byte count: `-`, `none` and `0` mean unset
pub fn parse_optional_bytes(
    command: &str,
    line_no: usize,
    field: &str,
    value: &str,
) -> Result<Option<u64>> {
    match value.trim() {
        "-" | "none" | "0" | "" => Ok(None),
        other => parse_bytes(command, line_no, field, other).map(Some),
    }
}

/// Percentage with an optional `%` suffix
pub fn parse_percent(command: &str, line_no: usize, field: &str, value: &str) -> Result<u32> {
    let trimmed = value.trim().trim_end_matches('%');
    if trimmed == "-" {
        return Ok(0);
    }
    trimmed.parse::<u32>().map_err(|_| {
        parse_error(command, line_no, format!("{}: invalid percentage '{}'", field, value))
    })
}

/// Optional percentage; `-` means the backend does not report it
pub fn parse_optional_percent(
    command: &str,
    line_no: usize,
    field: &str,
    value: &str,
) -> Result<Option<u32>> {
    match value.trim() {
        "-" | "" => Ok(None),
        other => parse_percent(command, line_no, field, other).map(Some),
    }
}

/// Ratio such as `1.00` or `1.00x`
pub fn parse_ratio(command: &str, line_no: usize, field: &str, value: &str) -> Result<Option<f64>> {
    match value.trim() {
        "-" | "" => Ok(None),
        other => other
            .trim_end_matches('x')
            .parse::<f64>()
            .map(Some)
            .map_err(|_| parse_error(command, line_no, format!("{}: invalid ratio '{}'", field, value))),
    }
}

/// The number immediately before `suffix` in `text` (`"4.88% done"` -> 4.88)
pub fn number_before(text: &str, suffix: &str) -> Option<f64> {
    let end = text.find(suffix)?;
    let head = text[..end].trim_end();
    let start = head
        .rfind(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map_or(0, |i| i + 1);
    head[start..].parse().ok()
}

/// The integer immediately after `prefix` in `text` (`"with 3 errors"` -> 3)
pub fn integer_after(text: &str, prefix: &str) -> Option<u64> {
    let start = text.find(prefix)? + prefix.len();
    let tail = text[start..].trim_start();
    let end = tail
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(tail.len());
    tail[..end].parse().ok()
}

/// Capacity as an integer percentage of `size`
pub fn capacity_percent(allocated: u64, size: u64) -> u32 {
    if size == 0 {
        return 0;
    }
    ((allocated as u128 * 100) / size as u128).min(100) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_split_fields_enforces_count() {
        assert_eq!(
            split_fields("zfs list", 1, "a\tb\tc", '\t', 3).unwrap(),
            vec!["a", "b", "c"]
        );
        assert_matches!(
            split_fields("zfs list", 4, "a\tb", '\t', 3),
            Err(Error::Parse { line: 4, .. })
        );
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("c", 1, "size", "10737418240").unwrap(), 10 << 30);
        assert_eq!(parse_bytes("c", 1, "size", "1.5G").unwrap(), 3 << 29);
        assert_eq!(parse_bytes("c", 1, "size", "512KiB").unwrap(), 512 << 10);
        assert_eq!(parse_bytes("c", 1, "size", "-").unwrap(), 0);
        assert!(parse_bytes("c", 1, "size", "lots").is_err());
        assert!(parse_bytes("c", 1, "size", "10Q").is_err());
    }

    #[test]
    fn test_parse_optional_fields() {
        assert_eq!(parse_optional_bytes("c", 1, "quota", "none").unwrap(), None);
        assert_eq!(parse_optional_bytes("c", 1, "quota", "0").unwrap(), None);
        assert_eq!(parse_optional_bytes("c", 1, "quota", "1024").unwrap(), Some(1024));
        assert_eq!(parse_optional_percent("c", 1, "frag", "-").unwrap(), None);
        assert_eq!(parse_optional_percent("c", 1, "frag", "12%").unwrap(), Some(12));
        assert_eq!(parse_ratio("c", 1, "dedup", "1.25x").unwrap(), Some(1.25));
    }

    #[test]
    fn test_number_helpers() {
        assert_eq!(number_before("0B repaired, 4.88% done, 00:03:10 to go", "% done"), Some(4.88));
        assert_eq!(number_before("nothing here", "% done"), None);
        assert_eq!(integer_after("repaired 0B in 00:00:03 with 3 errors", "with"), Some(3));
        assert_eq!(capacity_percent(50, 200), 25);
        assert_eq!(capacity_percent(1, 0), 0);
    }
}
