//! Structured JSON logger.
//!
//! Contract:
//! - one log line = one event, flushed synchronously
//! - keys are emitted in deterministic order (event, severity, then fields
//!   sorted alphabetically)
//! - ERROR and FATAL go to stderr, everything else to stdout
//! - the minimum severity is read once from `CORVUS_LOG_LEVEL`

use std::fmt;
use std::io::{self, Write};
use std::sync::OnceLock;

/// Log severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Fatal = 4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    fn from_env() -> Severity {
        match std::env::var("CORVUS_LOG_LEVEL").as_deref() {
            Ok("trace") | Ok("TRACE") => Severity::Trace,
            Ok("warn") | Ok("WARN") => Severity::Warn,
            Ok("error") | Ok("ERROR") => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static MIN_SEVERITY: OnceLock<Severity> = OnceLock::new();

/// Synchronous structured logger.
pub struct Logger;

impl Logger {
    /// Log an event with the given severity and string fields.
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let min = *MIN_SEVERITY.get_or_init(Severity::from_env);
        if severity < min {
            return;
        }
        if severity >= Severity::Error {
            Self::log_to_writer(severity, event, fields, &mut io::stderr());
        } else {
            Self::log_to_writer(severity, event, fields, &mut io::stdout());
        }
    }

    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }

    pub fn fatal(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Fatal, event, fields);
    }

    fn log_to_writer<W: Write>(
        severity: Severity,
        event: &str,
        fields: &[(&str, &str)],
        writer: &mut W,
    ) {
        let mut output = String::with_capacity(256);
        output.push_str("{\"event\":\"");
        Self::escape(&mut output, event);
        output.push_str("\",\"severity\":\"");
        output.push_str(severity.as_str());
        output.push('"');

        let mut sorted: Vec<_> = fields.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);
        for (key, value) in sorted {
            output.push_str(",\"");
            Self::escape(&mut output, key);
            output.push_str("\":\"");
            Self::escape(&mut output, value);
            output.push('"');
        }

        output.push_str("}\n");
        let _ = writer.write_all(output.as_bytes());
        let _ = writer.flush();
    }

    fn escape(output: &mut String, s: &str) {
        for c in s.chars() {
            match c {
                '"' => output.push_str("\\\""),
                '\\' => output.push_str("\\\\"),
                '\n' => output.push_str("\\n"),
                '\r' => output.push_str("\\r"),
                '\t' => output.push_str("\\t"),
                c if c.is_control() => {
                    output.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => output.push(c),
            }
        }
    }
}

#[cfg(test)]
fn capture(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let mut buffer = Vec::new();
    Logger::log_to_writer(severity, event, fields, &mut buffer);
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Info);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn test_log_line_is_json() {
        let line = capture(Severity::Info, "query.executed", &[("rows", "10")]);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], "query.executed");
        assert_eq!(parsed["severity"], "INFO");
        assert_eq!(parsed["rows"], "10");
    }

    #[test]
    fn test_field_ordering_is_deterministic() {
        let a = capture(Severity::Info, "e", &[("z", "1"), ("a", "2")]);
        let b = capture(Severity::Info, "e", &[("a", "2"), ("z", "1")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_escaping() {
        let line = capture(Severity::Warn, "bad\"event", &[("k", "v\nw")]);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], "bad\"event");
        assert_eq!(parsed["k"], "v\nw");
    }
}
