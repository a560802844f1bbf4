//! Scripted transport for tests and offline runs.
//!
//! A [`MockTransport`] hands every command to a [`MockResponder`] and records
//! it in a shared [`CommandJournal`]. No I/O happens and no time passes: a
//! query the responder leaves unanswered fails immediately with
//! [`DaqError::Timeout`].

use super::{Connector, Transport};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// What the scripted instrument does with one command.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// No response line (normal for writes; a timeout for queries).
    Silent,
    /// One response line.
    Line(String),
    /// The connection drops.
    Disconnect,
}

impl MockReply {
    /// Convenience constructor for a response line.
    pub fn line(text: impl Into<String>) -> Self {
        MockReply::Line(text.into())
    }
}

/// Decides how the scripted instrument reacts to each command.
pub trait MockResponder: Send {
    /// React to one command line.
    fn respond(&mut self, command: &str) -> MockReply;
}

impl<F> MockResponder for F
where
    F: FnMut(&str) -> MockReply + Send,
{
    fn respond(&mut self, command: &str) -> MockReply {
        self(command)
    }
}

/// Shared, cloneable record of every command a mock transport received.
#[derive(Clone, Default)]
pub struct CommandJournal {
    commands: Arc<Mutex<Vec<String>>>,
}

impl CommandJournal {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.commands.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, command: &str) {
        self.lock().push(command.to_string());
    }

    /// Snapshot of all commands in the order they were sent.
    pub fn commands(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Number of commands starting with `prefix` (ASCII case-insensitive).
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.lock()
            .iter()
            .filter(|c| {
                c.get(..prefix.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            })
            .count()
    }

    /// Total number of commands recorded.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing was sent.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Transport backed by a [`MockResponder`].
pub struct MockTransport {
    address: String,
    responder: Box<dyn MockResponder>,
    journal: CommandJournal,
    timeout: Duration,
    open: bool,
}

impl MockTransport {
    /// Create a mock transport for `address`.
    pub fn new(address: impl Into<String>, responder: impl MockResponder + 'static) -> Self {
        Self {
            address: address.into(),
            responder: Box::new(responder),
            journal: CommandJournal::default(),
            timeout: Duration::from_secs(1),
            open: true,
        }
    }

    /// Record into an existing journal (e.g. one shared by several transports).
    pub fn with_journal(mut self, journal: CommandJournal) -> Self {
        self.journal = journal;
        self
    }

    /// Handle to this transport's command journal.
    pub fn journal(&self) -> CommandJournal {
        self.journal.clone()
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DaqError::ConnectionClosed(self.address.clone()))
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn address(&self) -> &str {
        &self.address
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        self.ensure_open()?;
        self.journal.record(command);
        match self.responder.respond(command) {
            MockReply::Disconnect => {
                self.open = false;
                Err(DaqError::ConnectionClosed(self.address.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn query_with_timeout(&mut self, command: &str, timeout: Duration) -> AppResult<String> {
        self.ensure_open()?;
        self.journal.record(command);
        match self.responder.respond(command) {
            MockReply::Line(line) => Ok(line.trim().to_string()),
            MockReply::Silent => Err(DaqError::Timeout {
                command: command.to_string(),
                timeout,
            }),
            MockReply::Disconnect => {
                self.open = false;
                Err(DaqError::ConnectionClosed(self.address.clone()))
            }
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        self.open = false;
        Ok(())
    }
}

/// Connector that refuses a fixed number of attempts before succeeding.
///
/// Every successful open yields a [`MockTransport`] answering `0,"No error"`
/// to error probes and `1` to everything else.
pub struct MockConnector {
    failures_before_success: Option<u32>,
    attempts: AtomicU32,
}

impl MockConnector {
    /// Fail the first `failures` attempts, then succeed.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures_before_success: Some(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Never succeed.
    pub fn unreachable() -> Self {
        Self {
            failures_before_success: None,
            attempts: AtomicU32::new(0),
        }
    }

    /// Number of `open` calls so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, address: &str, _timeout: Duration) -> AppResult<Box<dyn Transport>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match self.failures_before_success {
            Some(failures) if attempt > failures => Ok(Box::new(MockTransport::new(
                address,
                |command: &str| {
                    if command.eq_ignore_ascii_case("SYST:ERR?") {
                        MockReply::line("0,\"No error\"")
                    } else {
                        MockReply::line("1")
                    }
                },
            ))),
            _ => Err(DaqError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection to {} refused (attempt {})", address, attempt),
            ))),
        }
    }
}
