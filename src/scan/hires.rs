//! High-resolution spectrum snapshot.
//!
//! Covers a wide band with many narrow-RBW sweeps and stitches the traces
//! together. A coarse max-hold pass over the whole band sets the reference
//! level first. The analyzer's own setup is saved to a state register before
//! the scan and recalled afterwards.

use super::analyzer::single_sweep;
use super::reference_level::track_reference_level;
use super::{ScanContext, ScanPlan, ScanProcedure, Series};
use crate::error::AppResult;
use crate::scpi::ScpiSession;
use crate::trace::frequency_axis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TRACE_QUERY: &str = ":TRAC? TRACE1";

/// Tuning for [`HiResSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiResSettings {
    /// Covered band is the current center +- this (MHz)
    pub half_width_mhz: f64,
    /// Span of each segment (MHz)
    pub segment_span_mhz: f64,
    /// RBW for the segments (MHz)
    pub rbw_mhz: f64,
    /// RBW for the coarse reference-level pass (MHz)
    pub coarse_rbw_mhz: f64,
    /// Reference level grid (dB)
    pub ref_level_step_db: f64,
    /// Instrument state register used to save/restore the setup
    pub state_register: u32,
    /// Operation-complete timeout per sweep (e.g. `"10s"`)
    #[serde(with = "humantime_serde")]
    pub opc_timeout: Duration,
}

impl Default for HiResSettings {
    fn default() -> Self {
        Self {
            half_width_mhz: 100.0,
            segment_span_mhz: 5.0,
            rbw_mhz: 0.01,
            coarse_rbw_mhz: 8.0,
            ref_level_step_db: 5.0,
            state_register: 1,
            opc_timeout: Duration::from_secs(30),
        }
    }
}

/// Stitched wide-band trace. Results are level (dBm) against frequency (MHz).
pub struct HiResSnapshot {
    sa: ScpiSession,
    settings: HiResSettings,
    freq_mhz: Vec<f64>,
    level_dbm: Vec<f64>,
}

impl HiResSnapshot {
    /// New snapshot owning the analyzer session.
    pub fn new(sa: ScpiSession, settings: HiResSettings) -> Self {
        Self {
            sa,
            settings,
            freq_mhz: Vec::new(),
            level_dbm: Vec::new(),
        }
    }

    /// Give back the analyzer session.
    pub fn into_session(self) -> ScpiSession {
        self.sa
    }

    /// Segment centers for a band around `fc_mhz`: start inclusive, end
    /// exclusive.
    pub fn segment_plan(&self, fc_mhz: f64) -> AppResult<ScanPlan> {
        let s = &self.settings;
        let start = fc_mhz - s.half_width_mhz;
        let last = fc_mhz + s.half_width_mhz - s.segment_span_mhz;
        ScanPlan::stepped(start, last, s.segment_span_mhz)
    }

    async fn coarse_reference_level(&mut self, ctx: &ScanContext) -> AppResult<()> {
        let s = self.settings.clone();
        self.sa
            .write(&format!("sense:BANDwidth:RESolution {} MHz", s.coarse_rbw_mhz))
            .await?;
        self.sa
            .write(&format!("sense:FREQuency:SPAN {} MHz", 2.0 * s.half_width_mhz))
            .await?;
        self.sa.write(":TRACe1:TYPE MAXHold").await?;
        self.sa.write("sense:DETector POS").await?;
        self.sa.write("INITiate:CONTinuous OFF").await?;
        if !single_sweep(&mut self.sa, s.opc_timeout).await? {
            ctx.log("Coarse sweep did not complete");
        }
        let trace = self.sa.query_values(TRACE_QUERY).await?;
        match trace.values.iter().copied().reduce(f64::max) {
            Some(max) => {
                track_reference_level(&mut self.sa, ctx, max, s.ref_level_step_db).await?
            }
            None => ctx.log("Coarse trace was empty, keeping reference level"),
        }
        Ok(())
    }

    /// Sweep one segment and append it. Returns false if it was skipped.
    async fn segment(&mut self, ctx: &ScanContext, center_mhz: f64) -> AppResult<bool> {
        self.sa
            .write(&format!("sense:FREQuency:CENTer {} MHz", center_mhz))
            .await?;
        if !single_sweep(&mut self.sa, self.settings.opc_timeout).await? {
            ctx.log(format!("OPC failed at {} MHz, segment skipped", center_mhz));
            return Ok(false);
        }
        let trace = self.sa.query_values(TRACE_QUERY).await?;
        let start = self.sa.query_f64(":SENS:FREQ:START?").await?;
        let stop = self.sa.query_f64(":SENS:FREQ:STOP?").await?;
        let points = self.sa.query_i64(":SENS:SWE:POIN?").await?;
        let axis = frequency_axis(start * 1e-6, stop * 1e-6, points.max(0) as usize);

        if !trace.is_clean() || trace.values.len() != axis.len() {
            ctx.log(format!(
                "Segment at {} MHz: {} values for {} points ({} unusable), segment skipped",
                center_mhz,
                trace.values.len(),
                axis.len(),
                trace.skipped.len()
            ));
            return Ok(false);
        }
        self.freq_mhz.extend(axis);
        self.level_dbm.extend(trace.values);
        Ok(true)
    }
}

#[async_trait]
impl ScanProcedure for HiResSnapshot {
    fn name(&self) -> &str {
        "hi-res snapshot"
    }

    async fn run(&mut self, ctx: &mut ScanContext) -> AppResult<()> {
        self.sa
            .write(&format!("*SAV {}", self.settings.state_register))
            .await?;
        let fc_mhz = self.sa.query_f64(":sens:FREQ:CENT?").await? * 1e-6;
        let plan = self.segment_plan(fc_mhz)?;
        ctx.log(format!(
            "Hi-res scan of {} segments around {} MHz",
            plan.len(),
            fc_mhz
        ));

        self.coarse_reference_level(ctx).await?;

        let s = self.settings.clone();
        self.sa
            .write(&format!("sense:BANDwidth:RESolution {} MHz", s.rbw_mhz))
            .await?;
        self.sa
            .write(&format!("sense:FREQuency:SPAN {} MHz", s.segment_span_mhz))
            .await?;
        self.sa.write(":TRACe1:TYPE WRITe").await?;
        self.sa.write("sense:DETector AVERage").await?;
        self.sa.write("INITiate:CONTinuous OFF").await?;

        let total = plan.len();
        for (i, &center) in plan.values().iter().enumerate() {
            let swept = self.segment(ctx, center).await;
            ctx.recover(swept, || format!("Segment at {} MHz skipped", center))?;
            ctx.progress(i + 1, total);
            if ctx.should_stop() {
                break;
            }
        }
        Ok(())
    }

    fn results(&self) -> Vec<Series> {
        vec![Series::new(self.freq_mhz.clone(), self.level_dbm.clone())]
    }

    async fn cleanup(&mut self, _ctx: &mut ScanContext) -> AppResult<()> {
        self.sa
            .write(&format!("*RCL {}", self.settings.state_register))
            .await?;
        self.sa.write("INITiate:CONTinuous ON").await
    }
}
