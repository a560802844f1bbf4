//! Frequency sweep: step the generator across a list of frequencies and
//! record the analyzer peak at each one.

use super::analyzer::{read_max_peak, single_sweep};
use super::reference_level::track_reference_level;
use super::{ScanContext, ScanPlan, ScanProcedure, Series};
use crate::error::AppResult;
use crate::scpi::ScpiSession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for [`SpectrumSweep`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    /// Analyzer span around each point (MHz)
    pub span_mhz: f64,
    /// Resolution bandwidth (MHz)
    pub rbw_mhz: f64,
    /// Reference level grid (dB)
    pub ref_level_step_db: f64,
    /// Emit partial results every this many points
    pub emit_every: usize,
    /// Operation-complete timeout per sweep (e.g. `"10s"`)
    #[serde(with = "humantime_serde")]
    pub opc_timeout: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            span_mhz: 5.0,
            rbw_mhz: 0.1,
            ref_level_step_db: 10.0,
            emit_every: 20,
            opc_timeout: Duration::from_secs(10),
        }
    }
}

/// Generator + analyzer frequency sweep.
///
/// Plan values are frequencies in MHz. Results are one series of peak level
/// (dBm) against frequency (MHz).
pub struct SpectrumSweep {
    sa: ScpiSession,
    sg: ScpiSession,
    plan: ScanPlan,
    settings: SweepSettings,
    freq_mhz: Vec<f64>,
    power_dbm: Vec<f64>,
}

impl SpectrumSweep {
    /// New sweep owning both sessions.
    pub fn new(sa: ScpiSession, sg: ScpiSession, plan: ScanPlan, settings: SweepSettings) -> Self {
        Self {
            sa,
            sg,
            plan,
            settings,
            freq_mhz: Vec::new(),
            power_dbm: Vec::new(),
        }
    }

    /// Measured (frequency MHz, level dBm) pairs so far.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.freq_mhz.iter().copied().zip(self.power_dbm.iter().copied())
    }

    /// Give back the analyzer and generator sessions.
    pub fn into_sessions(self) -> (ScpiSession, ScpiSession) {
        (self.sa, self.sg)
    }

    fn series(&self) -> Series {
        Series::new(self.freq_mhz.clone(), self.power_dbm.clone())
    }

    /// Tune both instruments to `f_mhz` and read the peak. `None` if the
    /// point had to be skipped.
    async fn measure(&mut self, ctx: &ScanContext, f_mhz: f64) -> AppResult<Option<f64>> {
        self.sg.write(&format!("freq {} MHz", f_mhz)).await?;
        self.sa
            .write(&format!("sense:FREQuency:CENTer {} MHz", f_mhz))
            .await?;
        self.sa
            .write(&format!("sense:FREQuency:SPAN {} MHz", self.settings.span_mhz))
            .await?;

        if !single_sweep(&mut self.sa, self.settings.opc_timeout).await? {
            ctx.log(format!("OPC failed at {} MHz", f_mhz));
            return Ok(None);
        }

        let peak = match read_max_peak(&mut self.sa).await {
            Ok(peak) => peak,
            Err(e) if !e.is_transport() => {
                ctx.log(format!("No usable peak at {} MHz: {}", f_mhz, e));
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let step = self.settings.ref_level_step_db;
        track_reference_level(&mut self.sa, ctx, peak.power_dbm, step).await?;
        Ok(Some(peak.power_dbm))
    }
}

#[async_trait]
impl ScanProcedure for SpectrumSweep {
    fn name(&self) -> &str {
        "spectrum sweep"
    }

    async fn run(&mut self, ctx: &mut ScanContext) -> AppResult<()> {
        ctx.log("Starting scan");

        self.sg.write(":OUTPUT:STATE ON").await?;
        self.sg.write(":OUTPUT:MOD:STATE OFF").await?;
        self.sa
            .write(&format!(
                "sense:BANDwidth:RESolution {} MHz",
                self.settings.rbw_mhz
            ))
            .await?;
        self.sa.write("sense:DETector AVERage").await?;
        self.sa.write("TRACe:MODE WRITe").await?;
        self.sa.write("INITiate:CONTinuous OFF").await?;

        let total = self.plan.len();
        let emit_every = self.settings.emit_every.max(1);
        let values = self.plan.values().to_vec();
        for (i, f_mhz) in values.into_iter().enumerate() {
            let measured = self.measure(ctx, f_mhz).await;
            let power = ctx
                .recover(measured, || format!("Point {} MHz skipped", f_mhz))?
                .flatten();
            if let Some(power) = power {
                self.freq_mhz.push(f_mhz);
                self.power_dbm.push(power);
                if i % emit_every == 0 {
                    ctx.data(self.series());
                }
            }
            ctx.progress(i + 1, total);
            if ctx.should_stop() {
                break;
            }
        }
        Ok(())
    }

    fn results(&self) -> Vec<Series> {
        vec![self.series()]
    }

    async fn cleanup(&mut self, _ctx: &mut ScanContext) -> AppResult<()> {
        self.sa.write("INITiate:CONTinuous ON").await
    }
}
