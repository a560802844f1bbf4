//! Validation of user-entered fields.
//!
//! Bad input is never an error: the field falls back to its last good value
//! and the correction is logged and returned so the front end can show it.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

#[allow(clippy::expect_used)]
static IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)$")
        .expect("IPv4 pattern is valid")
});

/// True for a dotted-quad IPv4 address.
pub fn is_valid_ip(ip: &str) -> bool {
    IPV4.is_match(ip)
}

/// Outcome of checking one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Checked<T> {
    /// Value to use (the input, or the fallback)
    pub value: T,
    /// Set when the input was rejected
    pub correction: Option<String>,
}

impl<T> Checked<T> {
    fn accepted(value: T) -> Self {
        Self {
            value,
            correction: None,
        }
    }

    fn corrected(value: T, message: String) -> Self {
        warn!("{}", message);
        Self {
            value,
            correction: Some(message),
        }
    }

    /// True if the input was rejected.
    pub fn was_corrected(&self) -> bool {
        self.correction.is_some()
    }
}

/// Checks fields against their last known good values.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldGuard;

impl FieldGuard {
    /// Accept `input` if it is an IPv4 address, else keep `last_good`.
    pub fn check_ip(field: &str, input: &str, last_good: &str) -> Checked<String> {
        let input = input.trim();
        if is_valid_ip(input) {
            Checked::accepted(input.to_string())
        } else {
            Checked::corrected(
                last_good.to_string(),
                format!(
                    "Invalid IP address '{}' for {}, reset to {}",
                    input, field, last_good
                ),
            )
        }
    }

    /// Accept `input` if it parses as a finite number within `range`, else
    /// keep `last_good`.
    pub fn check_f64(
        field: &str,
        input: &str,
        last_good: f64,
        range: std::ops::RangeInclusive<f64>,
    ) -> Checked<f64> {
        match input.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && range.contains(&v) => Checked::accepted(v),
            Ok(v) if v.is_finite() => Checked::corrected(
                last_good,
                format!(
                    "{} = {} is outside {} .. {}, reset to {}",
                    field,
                    v,
                    range.start(),
                    range.end(),
                    last_good
                ),
            ),
            _ => Checked::corrected(
                last_good,
                format!(
                    "Invalid number '{}' for {}, reset to {}",
                    input.trim(),
                    field,
                    last_good
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_is_valid_ip() {
        assert!(is_valid_ip("192.168.1.105"));
        assert!(is_valid_ip("10.0.0.1"));
        assert!(!is_valid_ip("256.1.1.1"));
        assert!(!is_valid_ip("192.168.1"));
        assert!(!is_valid_ip("my-analyzer.local"));
    }

    #[traced_test]
    #[test]
    fn test_bad_ip_resets_to_last_good() {
        let checked = FieldGuard::check_ip("sa_ip", "192.168.1.300", "192.168.1.105");
        assert_eq!(checked.value, "192.168.1.105");
        assert!(checked.was_corrected());
        assert!(logs_contain("Invalid IP address '192.168.1.300' for sa_ip"));

        let ok = FieldGuard::check_ip("sa_ip", " 10.0.0.7 ", "192.168.1.105");
        assert_eq!(ok.value, "10.0.0.7");
        assert!(!ok.was_corrected());
    }

    #[test]
    fn test_numbers() {
        let range = 9e3..=6e9;
        assert_eq!(FieldGuard::check_f64("f", "1e9", 1.0e6, range.clone()).value, 1e9);

        let bad = FieldGuard::check_f64("f", "lots", 1.0e6, range.clone());
        assert_eq!(bad.value, 1.0e6);
        assert!(bad.correction.unwrap().contains("Invalid number 'lots'"));

        let out_of_range = FieldGuard::check_f64("f", "7e9", 1.0e6, range);
        assert_eq!(out_of_range.value, 1.0e6);
        assert!(out_of_range.was_corrected());
    }
}
