//! Ordered scan values.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// Ordered sequence of independent-variable values (frequencies, spans or
/// power levels). Fixed once built; a running procedure only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPlan {
    values: Vec<f64>,
}

impl ScanPlan {
    /// Plan visiting `values` in the given order.
    pub fn from_values(values: Vec<f64>) -> AppResult<Self> {
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(DaqError::Configuration(format!(
                "scan value {} is not finite",
                bad
            )));
        }
        Ok(Self { values })
    }

    /// `start, start + step, ...` up to and including `stop`.
    ///
    /// `stop` is included when it falls within a millionth of a step of the
    /// grid, so `stepped(1e9, 2e9, 1e8)` has eleven points despite rounding.
    pub fn stepped(start: f64, stop: f64, step: f64) -> AppResult<Self> {
        if step <= 0.0 || !step.is_finite() {
            return Err(DaqError::Configuration(format!(
                "scan step must be positive, got {}",
                step
            )));
        }
        if !start.is_finite() || !stop.is_finite() || stop < start {
            return Err(DaqError::Configuration(format!(
                "invalid scan range {} .. {}",
                start, stop
            )));
        }
        let count = ((stop - start) / step + 1e-6).floor() as usize + 1;
        let values = (0..count).map(|i| start + step * i as f64).collect();
        Ok(Self { values })
    }

    /// The values in scan order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for a plan with nothing to visit.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
