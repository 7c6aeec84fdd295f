//! Utility functions and helpers

use regex::Regex;

/// App ids are container name prefixes: letters, digits, `_`, `.` and `-`.
pub static APP_ID_REGEX: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+$").expect("BUG: APP_ID_REGEX pattern is invalid")
});

/// Dot separated labels of letters, digits, `_` and `-`.
pub static HOSTNAME_REGEX: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$").expect("BUG: HOSTNAME_REGEX pattern is invalid")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_id_pattern() {
        assert!(APP_ID_REGEX.is_match("web"));
        assert!(APP_ID_REGEX.is_match("my_app.v2-beta"));
        assert!(!APP_ID_REGEX.is_match(""));
        assert!(!APP_ID_REGEX.is_match("has space"));
        assert!(!APP_ID_REGEX.is_match("slash/y"));
    }

    #[test]
    fn hostname_pattern() {
        assert!(HOSTNAME_REGEX.is_match("web.local"));
        assert!(HOSTNAME_REGEX.is_match("web"));
        assert!(!HOSTNAME_REGEX.is_match(".web"));
        assert!(!HOSTNAME_REGEX.is_match("web..local"));
        assert!(!HOSTNAME_REGEX.is_match("bad host"));
    }
}
