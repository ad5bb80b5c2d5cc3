use mongodb_cluster::{Host, ReadPreference, TagSet};

use serde_derive::Deserialize;

/// A selection scenario over a fixed topology description.
#[derive(Deserialize)]
pub struct Suite {
    pub topology_description: TopologyFixture,
    #[serde(default = "default_operation")]
    pub operation: String,
    #[serde(default)]
    pub read_preference: ReadPreference,
    #[serde(default)]
    pub suitable_servers: Vec<Host>,
    #[serde(default)]
    pub in_latency_window: Vec<Host>,
    /// Selection fails with a configuration or compatibility error.
    #[serde(default)]
    pub error: bool,
}

fn default_operation() -> String {
    "read".to_owned()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyFixture {
    #[serde(rename = "type")]
    pub topology_type: String,
    #[serde(default, rename = "heartbeatFrequencyMS")]
    pub heartbeat_frequency_ms: Option<u64>,
    #[serde(default, rename = "localThresholdMS")]
    pub local_threshold_ms: Option<u64>,
    pub servers: Vec<ServerFixture>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFixture {
    pub address: Host,
    #[serde(rename = "type")]
    pub server_type: String,
    #[serde(default, rename = "avg_rtt_ms")]
    pub avg_rtt_ms: Option<f64>,
    #[serde(default)]
    pub tags: TagSet,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub last_update_time: Option<i64>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub last_write_date: Option<i64>,
    #[serde(default)]
    pub max_wire_version: Option<i64>,
}
