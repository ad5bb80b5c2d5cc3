use crate::error::{Error::ArgumentError, Result};

use serde_derive::Deserialize;
use slog::Logger;

pub const DEFAULT_MAX_POOL_SIZE: usize = 100;

/// Connection pool configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionPoolOptions {
    /// The maximum number of connections, checked out or idle. Zero means unbounded.
    pub max_pool_size: usize,
    /// The number of connections the pool keeps open in the background.
    pub min_pool_size: usize,
    /// How long a checkout may wait for a connection. Zero means no limit.
    #[serde(alias = "waitQueueTimeoutMS")]
    pub wait_queue_timeout_ms: u64,
    /// How long a connection may sit idle before it is closed. Zero means forever.
    #[serde(alias = "maxIdleTimeMS")]
    pub max_idle_time_ms: u64,
    /// Falls back to the `log` crate through `slog-stdlog` when unset.
    #[serde(skip)]
    pub logger: Option<Logger>,
}

impl Default for ConnectionPoolOptions {
    fn default() -> Self {
        ConnectionPoolOptions {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            min_pool_size: 0,
            wait_queue_timeout_ms: 0,
            max_idle_time_ms: 0,
            logger: None,
        }
    }
}

impl ConnectionPoolOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size != 0 && self.min_pool_size > self.max_pool_size {
            return Err(ArgumentError(format!(
                "minPoolSize ({}) cannot exceed maxPoolSize ({}).",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }
}
