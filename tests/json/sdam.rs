use mongodb_cluster::{Host, TopologyOptions};

use serde_derive::Deserialize;
use serde_json::Value;

use std::collections::HashMap;

use super::ExtendedOid;

/// A discovery scenario: the topology starts from `options` and each phase
/// feeds handshake replies, then checks the resulting description.
#[derive(Deserialize)]
pub struct Suite {
    pub description: String,
    pub options: TopologyOptions,
    pub phases: Vec<Phase>,
}

#[derive(Deserialize)]
pub struct Phase {
    /// Pairs of address and isMaster reply. An empty reply stands for a
    /// network error.
    pub responses: Vec<(Host, Value)>,
    pub outcome: Outcome,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub servers: HashMap<Host, ServerOutcome>,
    pub topology_type: String,
    #[serde(default)]
    pub set_name: Option<String>,
    #[serde(default)]
    pub max_set_version: Option<i64>,
    #[serde(default)]
    pub max_election_id: Option<ExtendedOid>,
    #[serde(default)]
    pub logical_session_timeout_minutes: Option<i64>,
    #[serde(default)]
    pub compatible: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOutcome {
    #[serde(rename = "type")]
    pub server_type: String,
    #[serde(default)]
    pub set_name: Option<String>,
    #[serde(default)]
    pub set_version: Option<i64>,
    #[serde(default)]
    pub election_id: Option<ExtendedOid>,
}
