//! Power amplifier characterization.
//!
//! At each frequency: small-signal gain at a backed-off drive level, output
//! 1 dB compression point by bisection, then third- and fifth-order output
//! intercepts from a two-tone measurement.
//!
//! All analyzer readings are corrected by `loss_db`, the attenuation between
//! the amplifier output and the analyzer input.

use super::analyzer::{sweep_marker_max, MARKER_X, MARKER_Y};
use super::compression::{find_op1db, CompressionSearch, OutputPowerProbe};
use super::reference_level::track_reference_level;
use super::{ScanContext, ScanPlan, ScanProcedure, Series};
use crate::error::AppResult;
use crate::scpi::ScpiSession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for [`PaCharacterization`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaSettings {
    /// Attenuation between DUT output and analyzer (dB)
    pub loss_db: f64,
    /// Analyzer span around each frequency (MHz)
    pub span_mhz: f64,
    /// Small-signal gain is measured this far below nominal drive (dB)
    pub small_signal_backoff_db: f64,
    /// Compression search starts this far below nominal drive (dB)
    pub search_below_db: f64,
    /// Compression search ends this far above nominal drive (dB)
    pub search_above_db: f64,
    /// Bisection tuning
    pub compression: CompressionSearch,
    /// Reference level grid (dB)
    pub ref_level_step_db: f64,
    /// Operation-complete timeout per sweep (e.g. `"10s"`)
    #[serde(with = "humantime_serde")]
    pub opc_timeout: Duration,
}

impl Default for PaSettings {
    fn default() -> Self {
        Self {
            loss_db: 0.0,
            span_mhz: 10.0,
            small_signal_backoff_db: 10.0,
            search_below_db: 6.0,
            search_above_db: 5.0,
            compression: CompressionSearch::default(),
            ref_level_step_db: 10.0,
            opc_timeout: Duration::from_secs(10),
        }
    }
}

/// One row of PA results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaRecord {
    /// Frequency (MHz)
    pub freq_mhz: f64,
    /// Small-signal gain (dB)
    pub gain_db: f64,
    /// Output 1 dB compression point (dBm)
    pub op1db_dbm: f64,
    /// Output third-order intercept (dBm)
    pub oip3_dbm: f64,
    /// Output fifth-order intercept (dBm)
    pub oip5_dbm: f64,
}

/// Intercept point of order `n` from the fundamental and the order-`n`
/// intermodulation product levels: `p + (p - p_n) / (n - 1)`.
pub fn intercept_point(fundamental_dbm: f64, product_dbm: f64, order: u32) -> f64 {
    fundamental_dbm + (fundamental_dbm - product_dbm) / f64::from(order.saturating_sub(1).max(1))
}

/// Drives the generator and reads the analyzer for the compression search.
struct BenchProbe<'a> {
    sa: &'a mut ScpiSession,
    sg: &'a mut ScpiSession,
    ctx: &'a ScanContext,
    loss_db: f64,
    opc_timeout: Duration,
}

#[async_trait]
impl OutputPowerProbe for BenchProbe<'_> {
    async fn measure_output(&mut self, input_dbm: f64) -> AppResult<f64> {
        self.sg.write(&format!("POW:LEV {}", input_dbm)).await?;
        let peak = sweep_marker_max(self.sa, self.ctx, self.opc_timeout).await?;
        let output = peak + self.loss_db;
        self.ctx.metric("Pout", output);
        Ok(output)
    }
}

/// Gain / OP1dB / OIP3 / OIP5 against frequency. Plan values are MHz.
pub struct PaCharacterization {
    sa: ScpiSession,
    sg: ScpiSession,
    plan: ScanPlan,
    settings: PaSettings,
    records: Vec<PaRecord>,
}

impl PaCharacterization {
    /// New characterization owning both sessions.
    pub fn new(sa: ScpiSession, sg: ScpiSession, plan: ScanPlan, settings: PaSettings) -> Self {
        Self {
            sa,
            sg,
            plan,
            settings,
            records: Vec::new(),
        }
    }

    /// Rows measured so far.
    pub fn records(&self) -> &[PaRecord] {
        &self.records
    }

    /// Give back the analyzer and generator sessions.
    pub fn into_sessions(self) -> (ScpiSession, ScpiSession) {
        (self.sa, self.sg)
    }

    fn column(&self, pick: impl Fn(&PaRecord) -> f64) -> Vec<f64> {
        self.records.iter().map(pick).collect()
    }

    async fn small_signal_gain(&mut self, ctx: &ScanContext, f_mhz: f64, nominal: f64) -> AppResult<f64> {
        let s = &self.settings;
        let p_tx = nominal - s.small_signal_backoff_db;
        self.sg.write(&format!("POW:LEV {}", p_tx)).await?;
        self.sg.write(&format!("freq {} MHz", f_mhz)).await?;
        self.sa
            .write(&format!("sense:FREQuency:CENTer {} MHz", f_mhz))
            .await?;
        self.sa
            .write(&format!("sense:FREQuency:SPAN {} MHz", s.span_mhz))
            .await?;
        self.sg.write(":OUTPUT:MOD:STATE OFF").await?;
        self.sg.wait_opc(s.opc_timeout).await?;

        let peak = sweep_marker_max(&mut self.sa, ctx, s.opc_timeout).await?;
        track_reference_level(&mut self.sa, ctx, peak, s.ref_level_step_db).await?;
        let gain = peak + s.loss_db - p_tx;
        ctx.metric("Gain", gain);
        ctx.metric("Pout", peak + s.loss_db);
        Ok(gain)
    }

    async fn intermodulation(&mut self, ctx: &ScanContext, nominal: f64) -> AppResult<(f64, f64)> {
        let s = self.settings.clone();
        self.sg.write(":OUTPUT:MOD:STATE ON").await?;
        self.sg.write(&format!("POW:LEV {}", nominal)).await?;

        let tone = sweep_marker_max(&mut self.sa, ctx, s.opc_timeout).await? + s.loss_db;
        let f1 = self.sa.query_f64(MARKER_X).await?;
        self.sa.write("CALCulate:MARKer:MAXimum:NEXT").await?;
        let f2 = self.sa.query_f64(MARKER_X).await?;
        let (f_low, f_high) = (f1.min(f2), f1.max(f2));
        let spacing = f_high - f_low;

        self.sa
            .write(&format!("CALCulate:MARKer:X {} Hz", f_high + spacing))
            .await?;
        let im3 = self.sa.query_f64(MARKER_Y).await? + s.loss_db;
        self.sa
            .write(&format!("CALCulate:MARKer:X {} Hz", f_high + 2.0 * spacing))
            .await?;
        let im5 = self.sa.query_f64(MARKER_Y).await? + s.loss_db;

        Ok((intercept_point(tone, im3, 3), intercept_point(tone, im5, 5)))
    }

    /// Full measurement at one frequency.
    async fn characterize(&mut self, ctx: &ScanContext, f_mhz: f64, nominal: f64) -> AppResult<PaRecord> {
        let gain_db = self.small_signal_gain(ctx, f_mhz, nominal).await?;

        let s = self.settings.clone();
        let mut probe = BenchProbe {
            sa: &mut self.sa,
            sg: &mut self.sg,
            ctx,
            loss_db: s.loss_db,
            opc_timeout: s.opc_timeout,
        };
        let op1db = find_op1db(
            &mut probe,
            nominal - s.search_below_db,
            nominal + s.search_above_db,
            gain_db,
            s.compression,
        )
        .await?;
        if !op1db.compressed {
            ctx.log(format!(
                "No {} dB compression up to {} dBm at {} MHz",
                s.compression.threshold_db, op1db.input_dbm, f_mhz
            ));
        }
        ctx.metric("OP1dB", op1db.output_dbm);

        let (oip3_dbm, oip5_dbm) = self.intermodulation(ctx, nominal).await?;
        ctx.metric("OIP3", oip3_dbm);
        ctx.metric("OIP5", oip5_dbm);

        Ok(PaRecord {
            freq_mhz: f_mhz,
            gain_db,
            op1db_dbm: op1db.output_dbm,
            oip3_dbm,
            oip5_dbm,
        })
    }
}

#[async_trait]
impl ScanProcedure for PaCharacterization {
    fn name(&self) -> &str {
        "PA characterization"
    }

    async fn run(&mut self, ctx: &mut ScanContext) -> AppResult<()> {
        ctx.log("Starting scan");

        self.sg.write(":OUTPUT:STATE ON").await?;
        self.sa.write("sense:DETector AVERage").await?;
        self.sa.write("TRACe:MODE WRITe").await?;
        self.sa.write("INITiate:CONTinuous OFF").await?;
        let nominal = self.sg.query_f64("POW:LEV?").await?;

        let total = self.plan.len();
        let values = self.plan.values().to_vec();
        for (i, f_mhz) in values.into_iter().enumerate() {
            let measured = self.characterize(ctx, f_mhz, nominal).await;
            if let Some(record) = ctx.recover(measured, || format!("{} MHz skipped", f_mhz))? {
                self.records.push(record);
                for series in self.results() {
                    ctx.data(series);
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
        let freq = self.column(|r| r.freq_mhz);
        vec![
            Series::new(freq.clone(), self.column(|r| r.gain_db)).labelled("Gain", "k"),
            Series::new(freq.clone(), self.column(|r| r.op1db_dbm))
                .labelled("OP1dB", "b")
                .overlay(),
            Series::new(freq.clone(), self.column(|r| r.oip3_dbm))
                .labelled("OIP3", "g")
                .overlay(),
            Series::new(freq, self.column(|r| r.oip5_dbm))
                .labelled("OIP5", "r")
                .overlay(),
        ]
    }

    async fn cleanup(&mut self, _ctx: &mut ScanContext) -> AppResult<()> {
        self.sg.write(":OUTPUT:MOD:STATE OFF").await?;
        self.sa.write("INITiate:CONTinuous ON").await
    }
}
