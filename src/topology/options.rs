use crate::error::{Error::ArgumentError, Result};
use crate::host::Host;
use crate::pool::ConnectionPoolOptions;

use serde_derive::Deserialize;
use slog::Logger;

use super::description::{DEFAULT_HEARTBEAT_FREQUENCY_MS, DEFAULT_LOCAL_THRESHOLD_MS};

pub const DEFAULT_SERVER_SELECTION_TIMEOUT_MS: u64 = 30000;

/// Configuration supplied when a topology is created.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopologyOptions {
    /// The seed list.
    pub hosts: Vec<Host>,
    /// The expected replica set name, if any.
    #[serde(alias = "replicaSet")]
    pub set_name: Option<String>,
    #[serde(alias = "heartbeatFrequencyMS")]
    pub heartbeat_frequency_ms: u64,
    #[serde(alias = "localThresholdMS")]
    pub local_threshold_ms: u64,
    #[serde(alias = "serverSelectionTimeoutMS")]
    pub server_selection_timeout_ms: u64,
    /// Talk only to the single seed, whatever its type.
    pub direct_connection: bool,
    /// Options for every server's connection pool.
    #[serde(flatten)]
    pub pool: ConnectionPoolOptions,
    #[serde(skip)]
    pub logger: Option<Logger>,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        TopologyOptions {
            hosts: Vec::new(),
            set_name: None,
            heartbeat_frequency_ms: DEFAULT_HEARTBEAT_FREQUENCY_MS,
            local_threshold_ms: DEFAULT_LOCAL_THRESHOLD_MS,
            server_selection_timeout_ms: DEFAULT_SERVER_SELECTION_TIMEOUT_MS,
            direct_connection: false,
            pool: ConnectionPoolOptions::default(),
            logger: None,
        }
    }
}

impl TopologyOptions {
    pub fn new<I>(hosts: I) -> TopologyOptions
    where
        I: IntoIterator<Item = Host>,
    {
        TopologyOptions {
            hosts: hosts.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Parses options from a JSON object such as
    /// `{ "hosts": ["a:27017"], "setName": "rs", "maxPoolSize": 10 }`.
    pub fn from_json(json: &str) -> Result<TopologyOptions> {
        let options: TopologyOptions = serde_json::from_str(json)
            .map_err(|err| ArgumentError(format!("invalid topology options: {}", err)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(ArgumentError("At least one seed host is required.".to_owned()));
        }

        if self.direct_connection && self.hosts.len() > 1 {
            return Err(ArgumentError(
                "A direct connection requires exactly one host.".to_owned(),
            ));
        }

        if self.heartbeat_frequency_ms == 0 {
            return Err(ArgumentError(
                "heartbeatFrequencyMS must be greater than zero.".to_owned(),
            ));
        }

        self.pool.validate()
    }
}
