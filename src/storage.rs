//! CSV result files, compiled in with the `storage_csv` feature.
//!
//! Without the feature every writer call returns
//! [`DaqError::FeatureNotEnabled`].

use crate::error::{AppResult, DaqError};
use crate::scan::{PaRecord, Series};
use std::path::{Path, PathBuf};

/// `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.csv`
pub fn default_output_path(dir: &Path, prefix: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("{}_{}.csv", prefix, stamp))
}

#[cfg_attr(not(feature = "storage_csv"), allow(dead_code))]
fn ensure_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use tracing::info;

    fn storage_err(e: csv::Error) -> DaqError {
        DaqError::Storage(e.to_string())
    }

    /// Writes scan results as CSV.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CsvWriter;

    impl CsvWriter {
        /// One row per point: `series,x,y`. Unlabelled series are named
        /// by their index.
        pub fn write_series(path: &Path, series: &[Series]) -> AppResult<usize> {
            ensure_parent(path)?;
            let mut writer = csv::Writer::from_path(path).map_err(storage_err)?;
            writer.write_record(["series", "x", "y"]).map_err(storage_err)?;
            let mut rows = 0;
            for (i, s) in series.iter().enumerate() {
                let label = s.label.clone().unwrap_or_else(|| i.to_string());
                for (x, y) in s.x.iter().zip(&s.y) {
                    writer
                        .write_record([label.as_str(), &x.to_string(), &y.to_string()])
                        .map_err(storage_err)?;
                    rows += 1;
                }
            }
            writer.flush()?;
            info!("Wrote {} rows to {}", rows, path.display());
            Ok(rows)
        }

        /// One row per frequency with a header taken from [`PaRecord`].
        pub fn write_pa(path: &Path, records: &[PaRecord]) -> AppResult<usize> {
            ensure_parent(path)?;
            let mut writer = csv::Writer::from_path(path).map_err(storage_err)?;
            for record in records {
                writer.serialize(record).map_err(storage_err)?;
            }
            writer.flush()?;
            info!("Wrote {} PA records to {}", records.len(), path.display());
            Ok(records.len())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    /// Stand-in when CSV support is compiled out.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CsvWriter;

    impl CsvWriter {
        /// Always fails: CSV support is compiled out.
        pub fn write_series(_path: &Path, _series: &[Series]) -> AppResult<usize> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        /// Always fails: CSV support is compiled out.
        pub fn write_pa(_path: &Path, _records: &[PaRecord]) -> AppResult<usize> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvWriter;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvWriter;
