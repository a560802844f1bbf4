//! Core library for the rf_daq application.
//!
//! SCPI sessions to a spectrum analyzer and a signal generator, background
//! measurement scans that stream progress and data to a front end, and the
//! glue around them: layered configuration, persisted field values, input
//! validation and CSV result files.
//!
//! The command-line front end lives in `main.rs`; everything it does goes
//! through this library.

pub mod adapters;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod input;
pub mod logging;
pub mod params;
pub mod scan;
pub mod scpi;
pub mod storage;
pub mod trace;
pub mod widgets;
