//! Connection retry.
//!
//! Instruments are opened once at startup with a bounded number of attempts.
//! Running out of attempts is not an error: [`connect_with_retry`] returns
//! `None` so callers can carry on without the instrument (disable the
//! dependent commands, exit cleanly) instead of failing hard.

use crate::adapters::Connector;
use crate::scpi::ScpiSession;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Defines a policy for retrying a connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// The maximum number of connection attempts (at least one is always made).
    pub max_attempts: u32,
    /// The delay between attempts.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Open `address` through `connector`, retrying per `policy`.
///
/// `timeout` bounds each attempt and becomes the session's I/O timeout.
/// Returns the connected session, or `None` once attempts are exhausted.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    address: &str,
    name: &str,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Option<ScpiSession> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        info!(
            "{}: connecting to {} (attempt {}/{})",
            name, address, attempt, attempts
        );
        match connector.open(address, timeout).await {
            Ok(transport) => {
                info!("{}: connected to {}", name, address);
                return Some(ScpiSession::new(name, transport));
            }
            Err(e) => {
                warn!("{}: connection attempt {} failed: {}", name, attempt, e);
                if attempt < attempts {
                    sleep(policy.retry_delay).await;
                }
            }
        }
    }
    error!(
        "{}: failed to connect to {} after {} attempts",
        name, address, attempts
    );
    None
}
