//! Output terminal sentinels
//!
//! Every execution's output ends with exactly one of two reserved lines. Readers
//! use the same stream for content and completion, so detection is an exact
//! line match.
//!
//! Content lines that would read as a sentinel are stored with one extra
//! leading backslash; [`escape_line`] and [`unescape_line`] are exact inverses.

use std::borrow::Cow;

use crate::domain::execution::ExecutionStatus;

/// Line appended when every step succeeded
pub const FINISHED_SENTINEL: &str = "-----Finished-----";

/// Line appended when the execution ended in error
pub const ERROR_SENTINEL: &str = "-----Error-----";

/// Terminal marker of an output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Finished,
    Error,
}

impl Sentinel {
    /// The reserved line text, without line terminator
    pub fn as_line(&self) -> &'static str {
        match self {
            Sentinel::Finished => FINISHED_SENTINEL,
            Sentinel::Error => ERROR_SENTINEL,
        }
    }

    /// Recognizes a sentinel line; the line terminator is ignored
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim_end_matches(['\n', '\r']) {
            FINISHED_SENTINEL => Some(Sentinel::Finished),
            ERROR_SENTINEL => Some(Sentinel::Error),
            _ => None,
        }
    }

    /// Sentinel matching a terminal status
    pub fn for_status(status: ExecutionStatus) -> Option<Self> {
        match status {
            ExecutionStatus::Finished => Some(Sentinel::Finished),
            ExecutionStatus::Error => Some(Sentinel::Error),
            ExecutionStatus::New | ExecutionStatus::Started => None,
        }
    }

    /// Terminal status this sentinel stands for
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Sentinel::Finished => ExecutionStatus::Finished,
            Sentinel::Error => ExecutionStatus::Error,
        }
    }
}

/// Whether `line` is a sentinel preceded by zero or more backslashes
fn is_escaped_form(line: &str) -> bool {
    Sentinel::parse(line.trim_start_matches('\\')).is_some()
}

/// Prepares a content line for storage so it can never end a stream
pub fn escape_line(line: &str) -> Cow<'_, str> {
    if is_escaped_form(line) {
        Cow::Owned(format!("\\{}", line))
    } else {
        Cow::Borrowed(line)
    }
}

/// Restores a stored content line; sentinels must be filtered out beforehand
pub fn unescape_line(line: &str) -> Cow<'_, str> {
    match line.strip_prefix('\\') {
        Some(rest) if is_escaped_form(rest) => Cow::Owned(rest.to_string()),
        _ => Cow::Borrowed(line),
    }
}

impl std::fmt::Display for Sentinel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exact_lines() {
        assert_eq!(Sentinel::parse("-----Finished-----"), Some(Sentinel::Finished));
        assert_eq!(Sentinel::parse("-----Error-----\n"), Some(Sentinel::Error));
        assert_eq!(Sentinel::parse("-----Error-----\r\n"), Some(Sentinel::Error));
    }

    #[test]
    fn test_parse_rejects_near_matches() {
        assert_eq!(Sentinel::parse(" -----Finished-----"), None);
        assert_eq!(Sentinel::parse("-----Finished----- done"), None);
        assert_eq!(Sentinel::parse("echo -----Error-----"), None);
        assert_eq!(Sentinel::parse(""), None);
    }

    #[test]
    fn test_escape_content_lines() {
        assert_eq!(escape_line("compiling"), "compiling");
        assert_eq!(escape_line("-----Finished-----"), "\\-----Finished-----");
        assert_eq!(escape_line("\\-----Error-----"), "\\\\-----Error-----");
        assert_eq!(escape_line("\\n"), "\\n");

        for line in ["-----Finished-----", "\\-----Error-----", "\\\\x", "plain"] {
            let stored = escape_line(line);
            assert_eq!(Sentinel::parse(&stored), None);
            assert_eq!(unescape_line(&stored), line);
        }
    }

    #[test]
    fn test_status_round_trip() {
        for sentinel in [Sentinel::Finished, Sentinel::Error] {
            assert_eq!(Sentinel::for_status(sentinel.status()), Some(sentinel));
        }
        assert_eq!(Sentinel::for_status(ExecutionStatus::Started), None);
    }
}
