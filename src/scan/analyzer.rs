//! Spectrum analyzer building blocks shared by the scan procedures.

use super::ScanContext;
use crate::error::{AppResult, DaqError};
use crate::scpi::ScpiSession;
use crate::trace::MarkerReading;
use std::time::Duration;

/// Marker frequency query.
pub const MARKER_X: &str = "CALCulate:MARKer:X?";
/// Marker level query.
pub const MARKER_Y: &str = "CALCulate:MARKer:Y?";

/// Start one sweep and wait for it to finish.
///
/// Returns `false` if the analyzer did not acknowledge within `opc_timeout`.
pub async fn single_sweep(sa: &mut ScpiSession, opc_timeout: Duration) -> AppResult<bool> {
    sa.write("INITiate:IMMediate").await?;
    sa.wait_opc(opc_timeout).await
}

/// Current marker position and level.
///
/// A non-positive marker frequency is reported as [`DaqError::Parse`].
pub async fn read_marker(sa: &mut ScpiSession) -> AppResult<MarkerReading> {
    let freq_hz = sa.query_f64(MARKER_X).await?;
    let power_dbm = sa.query_f64(MARKER_Y).await?;
    MarkerReading::validate(freq_hz, power_dbm)
        .map_err(|e| DaqError::parse(MARKER_X, &freq_hz.to_string(), e))
}

/// Put the marker on the highest peak and read it.
pub async fn read_max_peak(sa: &mut ScpiSession) -> AppResult<MarkerReading> {
    sa.write("CALCulate:MARKer:MAXimum").await?;
    read_marker(sa).await
}

/// Single averaged sweep, then the marker peak level in dBm.
///
/// Sweep time is stretched tenfold for the average detector and put back to
/// auto afterwards. A sweep that never completes is reported to the scan log
/// and the peak is read from whatever the analyzer shows.
pub async fn sweep_marker_max(
    sa: &mut ScpiSession,
    ctx: &ScanContext,
    opc_timeout: Duration,
) -> AppResult<f64> {
    sa.write("SENSE:DETECTOR AVERage").await?;
    let sweep_time = sa.query_f64("SENSE:SWEEP:TIME?").await?;
    sa.wait_opc(opc_timeout).await?;
    sa.write(&format!("SENSE:SWEEP:TIME {}", sweep_time * 10.0))
        .await?;
    if !single_sweep(sa, opc_timeout).await? {
        ctx.log(format!("{}: averaged sweep did not complete", sa.name()));
    }
    sa.write("CALCulate:MARKer:MAXimum").await?;
    let peak = sa.query_f64(MARKER_Y).await?;
    sa.write("SWEEP:TIME:AUTO ON").await?;
    sa.wait_opc(opc_timeout).await?;
    Ok(peak)
}
