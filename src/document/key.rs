//! Document key validation and server-side key assignment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use regex::Regex;

use super::{DocumentError, DocumentResult};

/// Characters permitted in a user-supplied document key.
const KEY_PATTERN: &str = r"^[A-Za-z0-9_\-:.@()+,=;$!*'%]+$";

/// Keys longer than this are rejected outright.
const MAX_KEY_LENGTH: usize = 254;

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(KEY_PATTERN).expect("key pattern is valid"))
}

/// Validates a user-supplied document key.
pub fn validate_key(key: &str) -> DocumentResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(DocumentError::IllegalKey(key.to_string()));
    }
    if !key_regex().is_match(key) {
        return Err(DocumentError::IllegalKey(key.to_string()));
    }
    Ok(())
}

/// Assigns numeric string keys when the client supplied none.
///
/// Keys are strictly increasing within one process, so insertion order is
/// recoverable from server-assigned keys.
pub struct KeyGenerator {
    next: AtomicU64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        // Seed from the wall clock so restarts do not reissue old keys.
        let seed = chrono::Utc::now().timestamp_millis() as u64;
        Self {
            next: AtomicU64::new(seed << 8),
        }
    }

    pub fn next_key(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        for key in ["abc", "a-b_c", "user:42", "x.y@z", "(1)", "a+b=c;d", "100%", "it's*fine!"] {
            assert!(validate_key(key).is_ok(), "expected {key:?} to validate");
        }
    }

    #[test]
    fn test_invalid_keys() {
        for key in ["", "a/b", "a b", "ümlaut", "tab\tkey", "slash\\"] {
            assert!(validate_key(key).is_err(), "expected {key:?} to be rejected");
        }
    }

    #[test]
    fn test_overlong_key_rejected() {
        let key = "k".repeat(255);
        assert!(validate_key(&key).is_err());
    }

    #[test]
    fn test_generated_keys_increase() {
        let gen = KeyGenerator::new();
        let a: u64 = gen.next_key().parse().unwrap();
        let b: u64 = gen.next_key().parse().unwrap();
        assert!(b > a);
    }
}
