//! Bounded upstream connection pool.
//!
//! Wraps a single `reqwest::Client` (which owns the keep-alive transport
//! connections) with a semaphore that caps how many upstream connections may
//! be in use at once. A request holds a [`PooledConnection`] for as long as
//! it talks to upstream, including while a streamed body is being relayed.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::UpstreamConfig;
use crate::error::Error;

/// How long an idle keep-alive connection is retained before being closed.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

/// Pool limits and timeouts.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub max_keepalive: usize,
    pub connect_timeout: Duration,
}

impl From<&UpstreamConfig> for PoolSettings {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            max_keepalive: config.max_keepalive,
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Shared pool of upstream connections for the single configured host.
#[derive(Debug)]
pub struct UpstreamPool {
    client: Client,
    slots: Arc<Semaphore>,
    settings: PoolSettings,
}

impl UpstreamPool {
    pub fn new(settings: PoolSettings) -> Result<Self, Error> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .pool_max_idle_per_host(settings.max_keepalive)
            .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build upstream client: {}", e)))?;

        Ok(Self {
            client,
            slots: Arc::new(Semaphore::new(settings.max_connections)),
            settings,
        })
    }

    /// Wait for a free connection slot.
    ///
    /// Callers beyond `max_connections` wait up to the connect timeout, then
    /// fail with [`Error::PoolExhausted`].
    pub async fn acquire(&self) -> Result<PooledConnection, Error> {
        let wait = self.settings.connect_timeout;
        let permit = match tokio::time::timeout(wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return Err(Error::Internal("upstream pool is closed".to_string()));
            }
            Err(_elapsed) => {
                tracing::warn!(
                    max_connections = self.settings.max_connections,
                    "Timed out waiting for a free upstream connection"
                );
                return Err(Error::PoolExhausted {
                    waited_secs: wait.as_secs_f64(),
                });
            }
        };

        Ok(PooledConnection {
            client: self.client.clone(),
            _permit: permit,
        })
    }

    /// Number of connection slots currently held.
    pub fn in_use(&self) -> usize {
        self.settings.max_connections - self.slots.available_permits()
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }
}

/// A borrowed upstream connection slot; released on drop.
#[derive(Debug)]
pub struct PooledConnection {
    client: Client,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }
}
