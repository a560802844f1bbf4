//! SCPI session wrapper.
//!
//! [`ScpiSession`] owns one instrument transport and centralizes error
//! checking: every `write` and `query` is followed by a `SYST:ERR?` probe.
//! A non-zero code is logged at error level and counted, but never returned
//! as an error. The session stays usable. Transport failures (including a
//! failing probe) propagate unchanged.
//!
//! A session can also be *absent* ([`ScpiSession::disconnected`]), standing in
//! for an instrument that could not be reached. Writes to it do nothing and
//! queries return `None`, so callers can degrade instead of crashing.
//!
//! ```no_run
//! # use rf_daq::scpi::ScpiSession;
//! # use rf_daq::adapters::{Connector, TcpConnector};
//! # use std::time::Duration;
//! # async fn example() -> rf_daq::error::AppResult<()> {
//! let transport = TcpConnector.open("192.168.1.105", Duration::from_secs(10)).await?;
//! let mut sa = ScpiSession::new("SA", transport);
//! sa.write("FREQ:CENT 1 GHz").await?;
//! let rbw = sa.query_f64("BAND?").await?;
//! # Ok(())
//! # }
//! ```

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use crate::trace::{parse_trace, TraceParse};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Standard error-queue query.
pub const ERROR_QUERY: &str = "SYST:ERR?";

/// Operation-complete query.
pub const OPC_QUERY: &str = "*OPC?";

/// Split a `SYST:ERR?` reply (`-113,"Undefined header"`) into code and message.
///
/// Returns `None` if the first field is not an integer.
pub fn parse_error_reply(reply: &str) -> Option<(i32, String)> {
    let reply = reply.trim();
    let (code, message) = reply.split_once(',').unwrap_or((reply, ""));
    let code = code.trim().parse::<i32>().ok()?;
    Some((code, message.trim().trim_matches('"').to_string()))
}

/// Parsed `*IDN?` response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    /// Manufacturer
    pub manufacturer: String,
    /// Model
    pub model: String,
    /// Serial number
    pub serial: String,
    /// Firmware revision
    pub firmware: String,
}

impl Identity {
    /// Parse `manufacturer,model,serial,firmware`; missing fields stay empty.
    pub fn parse(response: &str) -> Self {
        let mut fields = response.splitn(4, ',').map(|f| f.trim().to_string());
        Self {
            manufacturer: fields.next().unwrap_or_default(),
            model: fields.next().unwrap_or_default(),
            serial: fields.next().unwrap_or_default(),
            firmware: fields.next().unwrap_or_default(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (S/N {}, FW {})",
            self.manufacturer, self.model, self.serial, self.firmware
        )
    }
}

/// One instrument connection with automatic error-queue checking.
pub struct ScpiSession {
    name: String,
    transport: Option<Box<dyn Transport>>,
    instrument_errors: u64,
}

impl fmt::Debug for ScpiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScpiSession")
            .field("name", &self.name)
            .field("address", &self.address())
            .field("instrument_errors", &self.instrument_errors)
            .finish()
    }
}

impl ScpiSession {
    /// Wrap an open transport. `name` prefixes every log line.
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport: Some(transport),
            instrument_errors: 0,
        }
    }

    /// A session with no instrument behind it.
    pub fn disconnected(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: None,
            instrument_errors: 0,
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport address, if connected.
    pub fn address(&self) -> Option<&str> {
        self.transport.as_ref().map(|t| t.address())
    }

    /// True while a transport is attached.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Number of non-zero codes the error probe has reported so far.
    pub fn instrument_error_count(&self) -> u64 {
        self.instrument_errors
    }

    /// Send a command, then probe the error queue.
    pub async fn write(&mut self, command: &str) -> AppResult<()> {
        let Some(transport) = self.transport.as_mut() else {
            debug!("{}: not connected, dropping write '{}'", self.name, command);
            return Ok(());
        };
        debug!("{}: write {}", self.name, command);
        transport.send(command).await?;
        self.check_error().await
    }

    /// Send a query and return the trimmed response, then probe the error
    /// queue. `Ok(None)` means the session is absent.
    pub async fn query(&mut self, command: &str) -> AppResult<Option<String>> {
        let Some(transport) = self.transport.as_mut() else {
            debug!("{}: not connected, dropping query '{}'", self.name, command);
            return Ok(None);
        };
        let response = transport.query(command).await?;
        debug!("{}: query {} -> {}", self.name, command, response);
        self.check_error().await?;
        Ok(Some(response))
    }

    async fn require(&mut self, command: &str) -> AppResult<String> {
        self.query(command)
            .await?
            .ok_or_else(|| DaqError::NotConnected(self.name.clone()))
    }

    /// Query a floating point value.
    ///
    /// Unlike [`ScpiSession::query`], an absent session is an error here
    /// because there is no sensible value to return.
    pub async fn query_f64(&mut self, command: &str) -> AppResult<f64> {
        let response = self.require(command).await?;
        response
            .parse::<f64>()
            .map_err(|e| DaqError::parse(command, &response, e))
    }

    /// Query an integer value. Accepts `"+1"` and `"1.0"` style replies.
    pub async fn query_i64(&mut self, command: &str) -> AppResult<i64> {
        let response = self.require(command).await?;
        if let Ok(value) = response.parse::<i64>() {
            return Ok(value);
        }
        match response.parse::<f64>() {
            Ok(value) if value.fract() == 0.0 && value.is_finite() => Ok(value as i64),
            Ok(_) => Err(DaqError::parse(command, &response, "not an integer")),
            Err(e) => Err(DaqError::parse(command, &response, e)),
        }
    }

    /// Query comma-separated ASCII data (e.g. `TRAC? TRACE1`).
    ///
    /// Malformed fields are reported in [`TraceParse::skipped`] and logged.
    pub async fn query_values(&mut self, command: &str) -> AppResult<TraceParse> {
        let response = self.require(command).await?;
        let parsed = parse_trace(&response);
        if !parsed.is_clean() {
            warn!(
                "{}: {} of {} fields in response to '{}' were unusable",
                self.name,
                parsed.skipped.len(),
                parsed.skipped.len() + parsed.values.len(),
                command
            );
        }
        Ok(parsed)
    }

    /// Wait for operation complete.
    ///
    /// Returns `Ok(false)` if the instrument did not acknowledge within
    /// `timeout`; that case is logged and left to the caller. Any other
    /// failure propagates.
    pub async fn wait_opc(&mut self, timeout: Duration) -> AppResult<bool> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(false);
        };
        let acknowledged = transport.query_with_timeout(OPC_QUERY, timeout).await;
        match acknowledged {
            Ok(reply) => {
                debug!("{}: {} -> {}", self.name, OPC_QUERY, reply);
                self.check_error().await?;
                Ok(reply.trim_start_matches('+') == "1")
            }
            Err(e) if e.is_timeout() => {
                warn!(
                    "{}: operation not complete after {:?}",
                    self.name, timeout
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Query and parse `*IDN?`.
    pub async fn identify(&mut self) -> AppResult<Identity> {
        let response = self.require("*IDN?").await?;
        Ok(Identity::parse(&response))
    }

    /// Release the transport. The session is absent afterwards.
    pub async fn close(&mut self) -> AppResult<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
            info!("{}: connection closed", self.name);
        }
        Ok(())
    }

    async fn check_error(&mut self) -> AppResult<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };
        let reply = transport.query(ERROR_QUERY).await?;
        let (code, message) = parse_error_reply(&reply)
            .ok_or_else(|| DaqError::parse(ERROR_QUERY, &reply, "expected '<code>,<message>'"))?;
        if code != 0 {
            self.instrument_errors += 1;
            error!("{}: Error: {},\"{}\"", self.name, code, message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockReply, MockTransport};
    use tracing_test::traced_test;

    fn session_with_error_codes(codes: Vec<i32>) -> (ScpiSession, crate::adapters::CommandJournal) {
        let mut codes = codes.into_iter();
        let transport = MockTransport::new("mock://sa", move |cmd: &str| match cmd {
            ERROR_QUERY => {
                let code = codes.next().unwrap_or(0);
                if code == 0 {
                    MockReply::line("+0,\"No error\"")
                } else {
                    MockReply::line(format!("{},\"Undefined header\"", code))
                }
            }
            "CALC:MARK:Y?" => MockReply::line(" -12.5\n"),
            "SWE:POIN?" => MockReply::line("+1001"),
            "*IDN?" => MockReply::line("Keysight Technologies,N9010A,MY1234,A.25.05"),
            "*OPC?" => MockReply::line("1"),
            _ => MockReply::Silent,
        });
        let journal = transport.journal();
        (ScpiSession::new("SA", Box::new(transport)), journal)
    }

    #[test]
    fn test_parse_error_reply() {
        assert_eq!(
            parse_error_reply("-113,\"Undefined header\""),
            Some((-113, "Undefined header".to_string()))
        );
        assert_eq!(parse_error_reply("+0,\"No error\""), Some((0, "No error".into())));
        assert_eq!(parse_error_reply("0"), Some((0, String::new())));
        assert_eq!(parse_error_reply("garbage"), None);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_nonzero_error_code_is_logged_not_raised() {
        let (mut sa, journal) = session_with_error_codes(vec![-113]);
        sa.write("FREQ:CENTE 1 GHz").await.unwrap();

        assert!(logs_contain("SA: Error: -113"));
        assert_eq!(sa.instrument_error_count(), 1);
        assert_eq!(journal.commands(), vec!["FREQ:CENTE 1 GHz", ERROR_QUERY]);
        // Session still usable.
        assert_eq!(sa.query_f64("CALC:MARK:Y?").await.unwrap(), -12.5);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_zero_error_code_logs_nothing() {
        let (mut sa, _journal) = session_with_error_codes(vec![0, 0]);
        sa.write("FREQ:CENT 1 GHz").await.unwrap();
        let y = sa.query("CALC:MARK:Y?").await.unwrap();
        assert_eq!(y.as_deref(), Some("-12.5"));
        assert!(!logs_contain("Error:"));
        assert_eq!(sa.instrument_error_count(), 0);
    }

    #[tokio::test]
    async fn test_absent_session_does_no_io() {
        let mut sa = ScpiSession::disconnected("SA");
        assert!(!sa.is_connected());
        sa.write("FREQ:CENT 1 GHz").await.unwrap();
        assert_eq!(sa.query("*IDN?").await.unwrap(), None);
        assert!(matches!(
            sa.query_f64("CALC:MARK:Y?").await,
            Err(DaqError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_transport_timeout_propagates() {
        let (mut sa, _journal) = session_with_error_codes(vec![]);
        let err = sa.query("FREQ:CENT?").await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_unparseable_probe_reply_is_an_error() {
        let transport = MockTransport::new("mock://sg", |cmd: &str| match cmd {
            ERROR_QUERY => MockReply::line("what?"),
            _ => MockReply::Silent,
        });
        let mut sg = ScpiSession::new("SG", Box::new(transport));
        assert!(matches!(
            sg.write("OUTP ON").await,
            Err(DaqError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_typed_queries_and_identity() {
        let (mut sa, _journal) = session_with_error_codes(vec![]);
        assert_eq!(sa.query_i64("SWE:POIN?").await.unwrap(), 1001);
        let idn = sa.identify().await.unwrap();
        assert_eq!(idn.model, "N9010A");
        assert_eq!(idn.firmware, "A.25.05");
        assert!(sa.wait_opc(Duration::from_millis(50)).await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_opc_timeout_is_recoverable() {
        let transport = MockTransport::new("mock://sa", |_: &str| MockReply::Silent);
        let journal = transport.journal();
        let mut sa = ScpiSession::new("SA", Box::new(transport));
        assert!(!sa.wait_opc(Duration::from_millis(10)).await.unwrap());
        // No error probe after a missed acknowledgement.
        assert_eq!(journal.commands(), vec![OPC_QUERY]);
    }

    #[tokio::test]
    async fn test_close_makes_session_absent() {
        let (mut sa, journal) = session_with_error_codes(vec![]);
        sa.close().await.unwrap();
        assert!(!sa.is_connected());
        sa.write("*RST").await.unwrap();
        assert!(journal.is_empty());
    }
}
