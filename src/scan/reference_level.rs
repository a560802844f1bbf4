//! Analyzer reference level tracking.
//!
//! After each peak reading the reference level is moved to the smallest
//! multiple of `step` that leaves at least one step of headroom above the
//! peak. The instrument is only reconfigured when that differs from what it is
//! already set to.

use super::ScanContext;
use crate::error::{AppResult, DaqError};
use crate::scpi::ScpiSession;
use tracing::debug;

/// Query/command for the display reference level.
pub const REFERENCE_LEVEL: &str = "DISP:WIND:TRAC:Y:RLEV";

/// `ceil(peak / step + 1) * step`
pub fn desired_reference_level(peak_dbm: f64, step_db: f64) -> f64 {
    (peak_dbm / step_db + 1.0).ceil() * step_db
}

/// Move the analyzer reference level above `peak_dbm` if needed.
///
/// Returns the new level when a change was written, `None` when the
/// instrument was already there.
pub async fn adapt_reference_level(
    sa: &mut ScpiSession,
    peak_dbm: f64,
    step_db: f64,
) -> AppResult<Option<f64>> {
    if step_db <= 0.0 || !step_db.is_finite() {
        return Err(DaqError::Configuration(format!(
            "reference level step must be positive, got {}",
            step_db
        )));
    }
    let desired = desired_reference_level(peak_dbm, step_db);
    let current = sa.query_f64(&format!("{}?", REFERENCE_LEVEL)).await?;
    if (current - desired).abs() < 1e-9 {
        debug!("{}: reference level already {} dBm", sa.name(), current);
        return Ok(None);
    }
    sa.write(&format!("{} {}", REFERENCE_LEVEL, desired)).await?;
    Ok(Some(desired))
}

/// [`adapt_reference_level`] inside a scan: a change goes to the scan log and
/// a malformed reply leaves the level alone.
pub async fn track_reference_level(
    sa: &mut ScpiSession,
    ctx: &ScanContext,
    peak_dbm: f64,
    step_db: f64,
) -> AppResult<()> {
    let result = adapt_reference_level(sa, peak_dbm, step_db).await;
    if let Some(Some(level)) = ctx.recover(result, || "Reference level not adapted".to_string())? {
        ctx.log(format!("Setting reference level to {}", level));
    }
    Ok(())
}
