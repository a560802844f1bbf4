//! Instrument transport adapters
//!
//! This module contains the byte-level side of instrument communication:
//! the [`Transport`] trait every SCPI session talks through, the
//! [`Connector`] trait used to open transports, and their implementations.
//!
//! - [`TcpAdapter`]: raw-socket SCPI over TCP/IP (LAN instruments, port 5025)
//! - [`MockTransport`]: scripted responder for tests and offline runs
//! - [`sim`]: a simulated signal generator / spectrum analyzer bench

pub mod mock;
pub mod sim;
pub mod tcp_adapter;

pub use mock::{CommandJournal, MockConnector, MockReply, MockResponder, MockTransport};
pub use sim::{AmplifierModel, BenchState, SimConnector, SimRole, SimulatedBench};
pub use tcp_adapter::{parse_address, TcpAdapter, TcpConnector, DEFAULT_SCPI_PORT};

use crate::error::AppResult;
use async_trait::async_trait;
use std::time::Duration;

/// A line-oriented, bidirectional text channel to one instrument.
///
/// Implementations own the underlying handle. Dropping a transport releases
/// it, but callers should prefer [`Transport::close`] so shutdown errors are
/// observed and logged.
#[async_trait]
pub trait Transport: Send {
    /// Address this transport was opened against.
    fn address(&self) -> &str;

    /// Default per-operation timeout.
    fn timeout(&self) -> Duration;

    /// Send one command line; no response is read.
    async fn send(&mut self, command: &str) -> AppResult<()>;

    /// Send one command line and read one response line (trimmed).
    async fn query(&mut self, command: &str) -> AppResult<String> {
        let timeout = self.timeout();
        self.query_with_timeout(command, timeout).await
    }

    /// Like [`Transport::query`] with an explicit response timeout.
    async fn query_with_timeout(&mut self, command: &str, timeout: Duration) -> AppResult<String>;

    /// Release the underlying handle.
    async fn close(&mut self) -> AppResult<()>;
}

/// Opens transports against instrument addresses.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `address`; `timeout` bounds both the connect and
    /// every later read/write on the returned transport.
    async fn open(&self, address: &str, timeout: Duration) -> AppResult<Box<dyn Transport>>;
}
