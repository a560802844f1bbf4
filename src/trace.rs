//! Parsing of measurement data returned by the analyzer.
//!
//! ASCII trace data arrives as one comma-separated line. Every field is
//! accounted for: it either becomes a value or a [`SkippedValue`] saying why it
//! was dropped, so callers can report how much of a trace was unusable.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Why one field of a trace was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Field was empty (e.g. `"1.0,,2.0"`).
    Empty,
    /// Field was not a number.
    NotANumber,
    /// Field parsed to NaN or infinity.
    NonFinite,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Empty => write!(f, "empty field"),
            SkipReason::NotANumber => write!(f, "not a number"),
            SkipReason::NonFinite => write!(f, "non-finite value"),
        }
    }
}

/// A dropped trace field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedValue {
    /// Zero-based position of the field in the response.
    pub index: usize,
    /// Raw field text.
    pub raw: String,
    /// Why it was dropped.
    pub reason: SkipReason,
}

/// Result of parsing one trace response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceParse {
    /// Values that parsed, in order.
    pub values: Vec<f64>,
    /// Fields that did not.
    pub skipped: Vec<SkippedValue>,
}

impl TraceParse {
    /// True if every field parsed.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

fn parse_field(field: &str) -> Result<f64, SkipReason> {
    let field = field.trim();
    if field.is_empty() {
        return Err(SkipReason::Empty);
    }
    let value: f64 = field.parse().map_err(|_| SkipReason::NotANumber)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SkipReason::NonFinite)
    }
}

/// Parse a comma-separated list of numbers.
///
/// An empty (or all-whitespace) response is an empty trace, not one empty
/// field.
pub fn parse_trace(text: &str) -> TraceParse {
    let mut parsed = TraceParse::default();
    if text.trim().is_empty() {
        return parsed;
    }
    for (index, field) in text.split(',').enumerate() {
        match parse_field(field) {
            Ok(value) => parsed.values.push(value),
            Err(reason) => parsed.skipped.push(SkippedValue {
                index,
                raw: field.trim().to_string(),
                reason,
            }),
        }
    }
    parsed
}

/// `points` frequencies linearly spaced from `start` to `stop` inclusive.
pub fn frequency_axis(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Lowest power level considered a plausible reading (dBm).
pub const MIN_PLAUSIBLE_DBM: f64 = -200.0;
/// Highest power level considered a plausible reading (dBm).
pub const MAX_PLAUSIBLE_DBM: f64 = 50.0;

/// Why a marker reading was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerError {
    /// Marker frequency was zero or negative.
    NonPositiveFrequency(f64),
}

impl fmt::Display for MarkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerError::NonPositiveFrequency(hz) => {
                write!(f, "invalid marker frequency {} Hz", hz)
            }
        }
    }
}

/// Position and level of an analyzer marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerReading {
    /// Marker frequency (Hz)
    pub freq_hz: f64,
    /// Marker level (dBm)
    pub power_dbm: f64,
}

impl MarkerReading {
    /// Sanity-check a reading.
    ///
    /// A non-positive frequency means the marker is not on a signal and is
    /// rejected. A level outside `MIN_PLAUSIBLE_DBM..=MAX_PLAUSIBLE_DBM` is
    /// suspicious but kept, with a warning.
    pub fn validate(freq_hz: f64, power_dbm: f64) -> Result<Self, MarkerError> {
        if freq_hz <= 0.0 {
            return Err(MarkerError::NonPositiveFrequency(freq_hz));
        }
        if !(MIN_PLAUSIBLE_DBM..=MAX_PLAUSIBLE_DBM).contains(&power_dbm) {
            warn!("Unusual peak power reading: {:.2} dBm", power_dbm);
        }
        Ok(Self { freq_hz, power_dbm })
    }

    /// Marker frequency in MHz.
    pub fn freq_mhz(&self) -> f64 {
        self.freq_hz / 1e6
    }
}
