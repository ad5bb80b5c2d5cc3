use mongodb_cluster::ConnectionPoolOptions;

use serde_derive::Deserialize;

/// A pool scenario: a script of operations run on the main thread or on
/// named worker threads, followed by the events the pool should have emitted.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    pub description: String,
    #[serde(default)]
    pub pool_options: ConnectionPoolOptions,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub error: Option<ExpectedError>,
    pub events: Vec<ExpectedEvent>,
    /// Event types left out of the comparison.
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Operation {
    pub name: String,
    /// Runs the operation on this worker thread instead of the main one.
    #[serde(default)]
    pub thread: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub ms: Option<u64>,
}

#[derive(Deserialize)]
pub struct ExpectedError {
    #[serde(rename = "type")]
    pub error_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub connection_id: Option<u32>,
    #[serde(default)]
    pub reason: Option<String>,
}
