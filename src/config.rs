//! Configuration using Figment
//!
//! Settings are layered:
//! 1. built-in defaults,
//! 2. a TOML or YAML file (picked by extension),
//! 3. environment variables prefixed with `RFDAQ_`, nested keys separated by
//!    a double underscore.
//!
//! ```text
//! RFDAQ_APPLICATION__LOG_LEVEL=debug
//! RFDAQ_ANALYZER__ADDRESS=192.168.1.105
//! RFDAQ_SWEEP__EMIT_EVERY=10
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rf_daq::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load_from("config/rf_daq.toml")?;
//!     println!("Analyzer at {}", settings.analyzer.address);
//!     Ok(())
//! }
//! ```

use crate::adapters::parse_address;
use crate::error::{AppResult, DaqError};
use crate::error_recovery::RetryPolicy;
use crate::scan::hires::HiResSettings;
use crate::scan::pa::PaSettings;
use crate::scan::peak_search::PeakSearchSettings;
use crate::scan::spectrum::SweepSettings;
use crate::scan::ScanPlan;
use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RFDAQ_";

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Connection retry and timeouts
    pub connection: ConnectionConfig,
    /// Spectrum analyzer
    pub analyzer: InstrumentConfig,
    /// Signal generator
    pub generator: InstrumentConfig,
    /// Frequency sweep tuning
    pub sweep: SweepSettings,
    /// Frequency sweep range
    pub sweep_range: ScanRange,
    /// CW peak search tuning
    pub peak_search: PeakSearchSettings,
    /// Hi-res snapshot tuning
    pub hires: HiResSettings,
    /// PA characterization tuning
    pub pa: PaSettings,
    /// PA characterization frequency range
    pub pa_range: ScanRange,
    /// Instrument limits that every range must respect
    pub limits: Limits,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Directory for CSV results
    pub output_dir: PathBuf,
    /// Parameter document holding the last used field values
    pub params_file: PathBuf,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            output_dir: PathBuf::from("data"),
            params_file: PathBuf::from("params/last.yaml"),
        }
    }
}

/// Connection settings shared by both instruments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Retry policy for the initial connection
    pub retry: RetryPolicy,
    /// Connect and I/O timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// One instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Name used in log lines
    pub name: String,
    /// Address (`host`, `host:port` or a `TCPIP...` resource string)
    pub address: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            name: "SA".to_string(),
            address: "192.168.1.105".to_string(),
        }
    }
}

/// Stepped frequency range (MHz).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRange {
    /// First frequency (MHz)
    pub start_mhz: f64,
    /// Last frequency (MHz)
    pub stop_mhz: f64,
    /// Step (MHz)
    pub step_mhz: f64,
}

impl Default for ScanRange {
    fn default() -> Self {
        Self {
            start_mhz: 1000.0,
            stop_mhz: 2000.0,
            step_mhz: 10.0,
        }
    }
}

impl ScanRange {
    /// The range as a scan plan.
    pub fn plan(&self) -> AppResult<ScanPlan> {
        ScanPlan::stepped(self.start_mhz, self.stop_mhz, self.step_mhz)
    }
}

/// Instrument limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Lowest usable frequency (MHz)
    pub freq_min_mhz: f64,
    /// Highest usable frequency (MHz)
    pub freq_max_mhz: f64,
    /// Lowest generator level (dBm)
    pub power_min_dbm: f64,
    /// Highest generator level (dBm)
    pub power_max_dbm: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            freq_min_mhz: 0.009,
            freq_max_mhz: 3000.0,
            power_min_dbm: -130.0,
            power_max_dbm: 20.0,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            connection: ConnectionConfig::default(),
            analyzer: InstrumentConfig::default(),
            generator: InstrumentConfig {
                name: "SG".to_string(),
                address: "192.168.1.101".to_string(),
            },
            sweep: SweepSettings::default(),
            sweep_range: ScanRange::default(),
            peak_search: PeakSearchSettings::default(),
            hires: HiResSettings::default(),
            pa: PaSettings::default(),
            pa_range: ScanRange::default(),
            limits: Limits::default(),
        }
    }
}

impl Settings {
    fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        let figment = match path {
            Some(p) if is_yaml(p) => figment.merge(Yaml::file(p)),
            Some(p) => figment.merge(Toml::file(p)),
            None => figment,
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate settings from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Self::figment(Some(path.as_ref())).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Like [`Settings::load_from`], but a missing file only logs a warning
    /// and falls back to defaults (plus environment overrides).
    pub fn load_or_default(path: Option<&Path>) -> AppResult<Self> {
        match path {
            Some(p) if p.exists() => Self::load_from(p),
            other => {
                if let Some(p) = other {
                    warn!("Settings file {} not found, using defaults", p.display());
                }
                let settings: Self = Self::figment(None).extract()?;
                settings.validate()?;
                Ok(settings)
            }
        }
    }

    /// Write these settings to `path` (YAML for `.yaml`/`.yml`, TOML otherwise).
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let text = if is_yaml(path) {
            serde_yaml::to_string(self).map_err(|e| DaqError::Configuration(e.to_string()))?
        } else {
            toml::to_string_pretty(self).map_err(|e| DaqError::Configuration(e.to_string()))?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Instrument addresses parse
    /// - Scan ranges are ordered, have positive steps and stay within limits
    /// - Scan tuning values are positive
    ///
    /// # Errors
    ///
    /// Returns `DaqError::Configuration` describing the first problem found.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(DaqError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        for instrument in [&self.analyzer, &self.generator] {
            if instrument.name.trim().is_empty() {
                return invalid("Instrument name must not be empty".to_string());
            }
            if parse_address(&instrument.address).is_err() {
                return invalid(format!(
                    "Invalid address '{}' for instrument '{}'",
                    instrument.address, instrument.name
                ));
            }
        }

        if self.connection.retry.max_attempts == 0 {
            return invalid("connection.retry.max_attempts must be at least 1".to_string());
        }
        if self.connection.timeout.is_zero() {
            return invalid("connection.timeout must be positive".to_string());
        }

        let limits = &self.limits;
        if limits.freq_min_mhz >= limits.freq_max_mhz {
            return invalid(format!(
                "limits.freq_min_mhz {} must be below freq_max_mhz {}",
                limits.freq_min_mhz, limits.freq_max_mhz
            ));
        }
        for (name, range) in [("sweep_range", &self.sweep_range), ("pa_range", &self.pa_range)] {
            if range.step_mhz <= 0.0 || !range.step_mhz.is_finite() {
                return invalid(format!("{}.step_mhz must be positive", name));
            }
            if range.start_mhz > range.stop_mhz {
                return invalid(format!(
                    "{}: start_mhz {} is above stop_mhz {}",
                    name, range.start_mhz, range.stop_mhz
                ));
            }
            if range.start_mhz < limits.freq_min_mhz || range.stop_mhz > limits.freq_max_mhz {
                return invalid(format!(
                    "{}: {} .. {} MHz is outside the instrument limits {} .. {} MHz",
                    name, range.start_mhz, range.stop_mhz, limits.freq_min_mhz, limits.freq_max_mhz
                ));
            }
        }

        if self.sweep.emit_every == 0 {
            return invalid("sweep.emit_every must be at least 1".to_string());
        }
        let positive = [
            ("sweep.span_mhz", self.sweep.span_mhz),
            ("sweep.rbw_mhz", self.sweep.rbw_mhz),
            ("sweep.ref_level_step_db", self.sweep.ref_level_step_db),
            ("peak_search.ref_level_step_db", self.peak_search.ref_level_step_db),
            ("hires.half_width_mhz", self.hires.half_width_mhz),
            ("hires.segment_span_mhz", self.hires.segment_span_mhz),
            ("hires.rbw_mhz", self.hires.rbw_mhz),
            ("hires.coarse_rbw_mhz", self.hires.coarse_rbw_mhz),
            ("hires.ref_level_step_db", self.hires.ref_level_step_db),
            ("pa.span_mhz", self.pa.span_mhz),
            ("pa.ref_level_step_db", self.pa.ref_level_step_db),
            ("pa.compression.resolution_db", self.pa.compression.resolution_db),
            ("pa.compression.threshold_db", self.pa.compression.threshold_db),
        ];
        if let Some((name, value)) = positive.iter().find(|(_, v)| !(v.is_finite() && *v > 0.0)) {
            return invalid(format!("{} must be positive, got {}", name, value));
        }
        if self.peak_search.spans_mhz.is_empty()
            || self.peak_search.spans_mhz.iter().any(|s| !(s.is_finite() && *s > 0.0))
        {
            return invalid("peak_search.spans_mhz must be a non-empty list of positive spans".to_string());
        }
        if self.hires.segment_span_mhz > 2.0 * self.hires.half_width_mhz {
            return invalid("hires.segment_span_mhz is wider than the covered band".to_string());
        }

        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert_ok!(settings.validate());
        assert_eq!(settings.generator.name, "SG");
        assert_eq!(settings.peak_search.spans_mhz, vec![100.0, 10.0, 1.0, 0.1, 0.01]);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        let err = assert_err!(settings.validate());
        assert!(err.to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_range_outside_limits() {
        let mut settings = Settings::default();
        settings.sweep_range.stop_mhz = 6000.0;
        let err = assert_err!(settings.validate());
        assert!(err.to_string().contains("outside the instrument limits"));
    }

    #[test]
    fn test_zero_step_is_rejected() {
        let mut settings = Settings::default();
        settings.pa_range.step_mhz = 0.0;
        assert_err!(settings.validate());
    }

    #[test]
    fn test_load_toml_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rf_daq.toml");
        std::fs::write(
            &path,
            r#"
[analyzer]
name = "N9010A"
address = "TCPIP0::10.0.0.5::inst0::INSTR"

[sweep]
emit_every = 5
opc_timeout = "2s 500ms"

[pa]
loss_db = 1.5
"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.analyzer.name, "N9010A");
        assert_eq!(settings.sweep.emit_every, 5);
        assert_eq!(settings.sweep.opc_timeout, Duration::from_millis(2500));
        assert_eq!(settings.pa.loss_db, 1.5);
        // untouched sections keep their defaults
        assert_eq!(settings.generator.address, "192.168.1.101");
        assert_eq!(settings.sweep.span_mhz, 5.0);
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rf_daq.yaml");
        std::fs::write(&path, "sweep_range:\n  start_mhz: 100\n  stop_mhz: 200\n  step_mhz: 1\n")
            .unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.sweep_range.plan().unwrap().len(), 101);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_or_default(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(settings.analyzer.address, Settings::default().analyzer.address);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut settings = Settings::default();
        settings.pa.loss_db = 3.0;
        settings.save(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }
}
