//! Deterministic path generator (§4.A "Path generator"): template
//! substitution for `{{year}}`/`{{month}}`/`{{day}}`/`{{md5}}`/`{{md5:N}}`,
//! retried against a caller-supplied checker until a free path is found.

use chrono::Utc;
use rand::Rng;

use crate::{errors::StoreError, hash::ContentHash};

const MAX_ATTEMPTS_DEFAULT: u32 = 30;

/// Tells the generator whether a candidate path is free to use.
pub trait PathChecker: Send + Sync {
    fn is_free(&self, candidate: &str) -> bool;
}

/// A `PathChecker` that always accepts — useful for drivers where the
/// create call itself detects collisions (e.g. `CustomIdInUse`).
pub struct AlwaysFree;

impl PathChecker for AlwaysFree {
    fn is_free(&self, _candidate: &str) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct PathGenerator {
    pattern: String,
    max_attempts: u32,
}

impl PathGenerator {
    pub fn new(pattern: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            pattern: pattern.into(),
            max_attempts: if max_attempts == 0 { MAX_ATTEMPTS_DEFAULT } else { max_attempts },
        }
    }

    /// Produce a path satisfying `checker`, retrying up to
    /// `max_attempts` times with fresh random mixing before failing with
    /// `PathExhausted`.
    pub fn generate(&self, checker: &dyn PathChecker) -> Result<String, StoreError> {
        let mut last = self.pattern.clone();
        for _ in 0..self.max_attempts {
            last = self.render();
            if checker.is_free(&last) {
                return Ok(last);
            }
        }
        Err(StoreError::PathExhausted(last))
    }

    fn render(&self) -> String {
        let mut out = self.pattern.clone();
        if out.contains("{{year}}") || out.contains("{{month}}") || out.contains("{{day}}") {
            let now = Utc::now();
            out = out
                .replace("{{year}}", &format!("{:04}", now.format("%Y")))
                .replace("{{month}}", &format!("{:02}", now.format("%m")))
                .replace("{{day}}", &format!("{:02}", now.format("%d")));
        }
        if out.contains("{{md5") {
            out = self.replace_md5(&out);
        }
        out
    }

    fn replace_md5(&self, path: &str) -> String {
        let salt: String = {
            let mut rng = rand::rng();
            (0..32)
                .map(|_| {
                    let c = rng.random_range(0u8..62);
                    match c {
                        0..=9 => (b'0' + c) as char,
                        10..=35 => (b'a' + (c - 10)) as char,
                        _ => (b'A' + (c - 36)) as char,
                    }
                })
                .collect()
        };
        let hash = ContentHash::of(format!("{path}{salt}").as_bytes());
        let hex = hash.to_hex();
        let mut out = path.replace("{{md5}}", &hex);
        for n in 1..=hex.len() {
            let marker = format!("{{{{md5:{n}}}}}");
            if out.contains(&marker) {
                if let Some(ch) = hash.hex_char_at(n) {
                    out = out.replace(&marker, &ch.to_string());
                }
            }
        }
        out
    }
}

impl Default for PathGenerator {
    fn default() -> Self {
        Self::new("{{year}}/{{month}}/{{md5:1}}/{{md5:2}}/{{md5}}", MAX_ATTEMPTS_DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectFirstN {
        n: std::sync::atomic::AtomicU32,
        reject: u32,
    }

    impl PathChecker for RejectFirstN {
        fn is_free(&self, _candidate: &str) -> bool {
            self.n.fetch_add(1, std::sync::atomic::Ordering::SeqCst) >= self.reject
        }
    }

    #[test]
    fn renders_date_and_md5_placeholders() {
        let gen = PathGenerator::new("{{year}}/{{month}}/{{day}}/{{md5}}", 5);
        let path = gen.generate(&AlwaysFree).unwrap();
        let parts: Vec<&str> = path.split('/').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[3].len(), 32);
    }

    #[test]
    fn retries_until_checker_accepts() {
        let gen = PathGenerator::new("{{md5}}", 10);
        let checker = RejectFirstN {
            n: std::sync::atomic::AtomicU32::new(0),
            reject: 3,
        };
        let path = gen.generate(&checker).unwrap();
        assert_eq!(path.len(), 32);
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let gen = PathGenerator::new("{{md5}}", 3);
        struct NeverFree;
        impl PathChecker for NeverFree {
            fn is_free(&self, _candidate: &str) -> bool {
                false
            }
        }
        let err = gen.generate(&NeverFree).unwrap_err();
        assert!(matches!(err, StoreError::PathExhausted(_)));
    }

    #[test]
    fn plain_pattern_without_placeholders_is_stable() {
        let gen = PathGenerator::new("fixed/path", 5);
        assert_eq!(gen.generate(&AlwaysFree).unwrap(), "fixed/path");
    }
}
