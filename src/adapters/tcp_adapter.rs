//! TCP/IP Hardware Adapter for LAN instruments
//!
//! Raw-socket SCPI: commands and responses are newline-terminated ASCII lines
//! on a plain TCP connection (port 5025 on most spectrum analyzers and signal
//! generators).
//!
//! Accepted address forms:
//! - `"192.168.1.105"` (default port)
//! - `"192.168.1.105:5025"`
//! - `"TCPIP0::192.168.1.105::INSTR"` / `"TCPIP0::192.168.1.105::inst0::INSTR"`
//! - `"TCPIP0::192.168.1.105::5025::SOCKET"`

use super::{Connector, Transport};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Standard SCPI raw-socket port.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Split an instrument address into host and port.
pub fn parse_address(address: &str) -> AppResult<(String, u16)> {
    let address = address.trim();
    let invalid = || DaqError::InvalidAddress(address.to_string());

    if address
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("TCPIP"))
    {
        let parts: Vec<&str> = address.split("::").collect();
        if parts.len() < 3 || parts[1].is_empty() {
            return Err(invalid());
        }
        let host = parts[1].to_string();
        let last = parts[parts.len() - 1];
        if last.eq_ignore_ascii_case("SOCKET") {
            if parts.len() != 4 {
                return Err(invalid());
            }
            let port = parts[2].parse::<u16>().map_err(|_| invalid())?;
            return Ok((host, port));
        }
        if last.eq_ignore_ascii_case("INSTR") {
            return Ok((host, DEFAULT_SCPI_PORT));
        }
        return Err(invalid());
    }

    if address.is_empty() || address.contains(char::is_whitespace) {
        return Err(invalid());
    }

    match address.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(invalid());
            }
            let port = port.parse::<u16>().map_err(|_| invalid())?;
            Ok((host.to_string(), port))
        }
        None => Ok((address.to_string(), DEFAULT_SCPI_PORT)),
    }
}

/// TCP adapter for SCPI instrument communication.
///
/// A query that times out leaves the instrument owing us a response line.
/// `owed_responses` counts those; the next read discards them before
/// returning, so late answers never get paired with the wrong command.
pub struct TcpAdapter {
    address: String,
    reader: BufReader<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
    timeout: Duration,
    line_terminator: String,
    pending: Vec<u8>,
    owed_responses: usize,
}

impl TcpAdapter {
    /// Connect to `address` with `timeout` applied to the connect and to every
    /// subsequent operation.
    pub async fn connect(address: &str, timeout: Duration) -> AppResult<Self> {
        let (host, port) = parse_address(address)?;
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| DaqError::Timeout {
                command: format!("connect {}:{}", host, port),
                timeout,
            })??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        debug!("TCP connection to {}:{} established", host, port);

        Ok(Self {
            address: address.to_string(),
            reader: BufReader::new(read_half),
            writer: Some(write_half),
            timeout,
            line_terminator: "\n".to_string(),
            pending: Vec::new(),
            owed_responses: 0,
        })
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Number of late responses still expected from the instrument.
    pub fn owed_responses(&self) -> usize {
        self.owed_responses
    }

    async fn read_line(&mut self, command: &str, timeout: Duration) -> AppResult<String> {
        // `pending` survives a timed-out read, so a partially received line
        // is completed by the next call instead of being lost.
        let read = tokio::time::timeout(timeout, self.reader.read_until(b'\n', &mut self.pending))
            .await;
        match read {
            Err(_) => Err(DaqError::Timeout {
                command: command.to_string(),
                timeout,
            }),
            Ok(Err(e)) => Err(DaqError::Io(e)),
            Ok(Ok(0)) => Err(DaqError::ConnectionClosed(self.address.clone())),
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                Ok(line)
            }
        }
    }

    async fn read_response(&mut self, command: &str, timeout: Duration) -> AppResult<String> {
        loop {
            let line = match self.read_line(command, timeout).await {
                Ok(line) => line,
                Err(e) => {
                    if e.is_timeout() {
                        self.owed_responses += 1;
                    }
                    return Err(e);
                }
            };
            if self.owed_responses > 0 {
                self.owed_responses -= 1;
                debug!("[{}] discarding late response '{}'", self.address, line);
                continue;
            }
            return Ok(line);
        }
    }
}

#[async_trait]
impl Transport for TcpAdapter {
    fn address(&self) -> &str {
        &self.address
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| DaqError::NotConnected(self.address.clone()))?;
        let line = format!("{}{}", command, self.line_terminator);
        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        tokio::time::timeout(self.timeout, write)
            .await
            .map_err(|_| DaqError::Timeout {
                command: command.to_string(),
                timeout: self.timeout,
            })??;
        trace!("[{}] -> {}", self.address, command);
        Ok(())
    }

    async fn query_with_timeout(&mut self, command: &str, timeout: Duration) -> AppResult<String> {
        self.send(command).await?;
        let response = self.read_response(command, timeout).await?;
        trace!("[{}] <- {}", self.address, response);
        Ok(response)
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
            debug!("TCP connection to {} closed", self.address);
        }
        Ok(())
    }
}

/// Opens [`TcpAdapter`] transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, address: &str, timeout: Duration) -> AppResult<Box<dyn Transport>> {
        let adapter = TcpAdapter::connect(address, timeout).await?;
        Ok(Box::new(adapter))
    }
}
