//! Find a CW signal and zoom in on it.
//!
//! Full-span sweep, marker to peak, then re-centre on the peak while the span
//! is narrowed step by step. Ends with a readout of the resolution bandwidth
//! the analyzer settled on.

use super::analyzer::{read_max_peak, single_sweep};
use super::reference_level::track_reference_level;
use super::{ScanContext, ScanPlan, ScanProcedure, Series};
use crate::error::AppResult;
use crate::scpi::ScpiSession;
use crate::trace::MarkerReading;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for [`PeakSearch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakSearchSettings {
    /// Spans to step through, widest first (MHz)
    pub spans_mhz: Vec<f64>,
    /// Reference level grid (dB)
    pub ref_level_step_db: f64,
    /// Operation-complete timeout per sweep (e.g. `"10s"`)
    #[serde(with = "humantime_serde")]
    pub opc_timeout: Duration,
}

impl Default for PeakSearchSettings {
    fn default() -> Self {
        Self {
            spans_mhz: vec![100.0, 10.0, 1.0, 0.1, 0.01],
            ref_level_step_db: 10.0,
            opc_timeout: Duration::from_secs(10),
        }
    }
}

/// Zoom onto the strongest CW signal.
///
/// Results are the peak frequency (MHz) found at each span (MHz).
pub struct PeakSearch {
    sa: ScpiSession,
    plan: ScanPlan,
    settings: PeakSearchSettings,
    peak: Option<MarkerReading>,
    spans: Vec<f64>,
    centers_mhz: Vec<f64>,
    final_rbw_hz: Option<f64>,
}

impl PeakSearch {
    /// New search owning the analyzer session.
    pub fn new(sa: ScpiSession, settings: PeakSearchSettings) -> AppResult<Self> {
        let plan = ScanPlan::from_values(settings.spans_mhz.clone())?;
        Ok(Self {
            sa,
            plan,
            settings,
            peak: None,
            spans: Vec::new(),
            centers_mhz: Vec::new(),
            final_rbw_hz: None,
        })
    }

    /// Most recent peak.
    pub fn peak(&self) -> Option<MarkerReading> {
        self.peak
    }

    /// RBW read back after the last span (Hz).
    pub fn final_rbw_hz(&self) -> Option<f64> {
        self.final_rbw_hz
    }

    /// Give back the analyzer session.
    pub fn into_session(self) -> ScpiSession {
        self.sa
    }

    async fn find_initial_peak(&mut self, ctx: &ScanContext) -> AppResult<Option<MarkerReading>> {
        self.sa.write("*RST").await?;
        self.sa.write("*CLS").await?;
        self.sa.write("sense:FREQuency:SPAN:FULL").await?;
        self.sa.write("sense:BANDwidth:RESolution:AUTO ON").await?;
        self.sa.write(":TRACe1:TYPE WRITe").await?;
        self.sa.write("sense:DETector POSitive").await?;
        self.sa.write("INITiate:CONTinuous OFF").await?;
        if !single_sweep(&mut self.sa, self.settings.opc_timeout).await? {
            ctx.log("Full span sweep did not complete");
        }
        match read_max_peak(&mut self.sa).await {
            Ok(peak) => Ok(Some(peak)),
            Err(e) if !e.is_transport() => {
                ctx.log(format!("Failed to find initial peak: {}", e));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn zoom(&mut self, ctx: &ScanContext, center_mhz: f64, span_mhz: f64) -> AppResult<Option<MarkerReading>> {
        self.sa
            .write(&format!("sense:FREQuency:CENTer {} MHz", center_mhz))
            .await?;
        self.sa
            .write(&format!("sense:FREQuency:SPAN {} MHz", span_mhz))
            .await?;
        if !single_sweep(&mut self.sa, self.settings.opc_timeout).await? {
            ctx.log(format!("OPC failed at span {} MHz, skipping", span_mhz));
            return Ok(None);
        }
        match read_max_peak(&mut self.sa).await {
            Ok(peak) => Ok(Some(peak)),
            Err(e) if !e.is_transport() => {
                ctx.log(format!(
                    "Failed to find peak at span {} MHz, skipping: {}",
                    span_mhz, e
                ));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn read_final_rbw(&mut self, ctx: &ScanContext) -> AppResult<()> {
        match self.sa.query_f64("sense:BANDwidth:RESolution?").await {
            Ok(rbw) => {
                self.final_rbw_hz = Some(rbw);
                ctx.log(format!("Last RBW: {:.2} Hz", rbw));
                Ok(())
            }
            Err(e) if !e.is_transport() => {
                ctx.log(format!("Failed to read final RBW: {}", e));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ScanProcedure for PeakSearch {
    fn name(&self) -> &str {
        "peak search"
    }

    async fn run(&mut self, ctx: &mut ScanContext) -> AppResult<()> {
        let Some(initial) = self.find_initial_peak(ctx).await? else {
            return Ok(());
        };
        self.peak = Some(initial);
        let step = self.settings.ref_level_step_db;
        track_reference_level(&mut self.sa, ctx, initial.power_dbm, step).await?;

        let mut center_mhz = initial.freq_mhz();
        let total = self.plan.len();
        let spans = self.plan.values().to_vec();
        for (i, span_mhz) in spans.into_iter().enumerate() {
            let zoomed = self.zoom(ctx, center_mhz, span_mhz).await;
            let peak = ctx
                .recover(zoomed, || format!("Span {} MHz skipped", span_mhz))?
                .flatten();
            if let Some(peak) = peak {
                center_mhz = peak.freq_mhz();
                self.peak = Some(peak);
                self.spans.push(span_mhz);
                self.centers_mhz.push(center_mhz);
                ctx.log(format!(
                    "Center Frequency: {:.6} MHz, Span: {:.2e} MHz, Peak: {:.2} dBm",
                    center_mhz, span_mhz, peak.power_dbm
                ));
            }
            ctx.progress(i + 1, total);
            if ctx.should_stop() {
                break;
            }
        }

        self.read_final_rbw(ctx).await
    }

    fn results(&self) -> Vec<Series> {
        vec![Series::new(self.spans.clone(), self.centers_mhz.clone())]
    }
}
