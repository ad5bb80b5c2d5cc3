use crate::error::{Error, Result};
use crate::host::Host;

use bson::oid;

use std::collections::HashMap;
use std::str::FromStr;

use super::server::{ServerDescription, ServerType};

pub const DEFAULT_HEARTBEAT_FREQUENCY_MS: u64 = 10000;
pub const DEFAULT_LOCAL_THRESHOLD_MS: u64 = 15;

/// The oldest wire version this crate can talk to.
pub const MIN_SUPPORTED_WIRE_VERSION: i64 = 6;
/// The newest wire version this crate can talk to.
pub const MAX_SUPPORTED_WIRE_VERSION: i64 = 13;

/// Describes the type of topology for a server set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopologyType {
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    Sharded,
    Unknown,
}

impl TopologyType {
    pub fn as_str(&self) -> &'static str {
        match *self {
            TopologyType::Single => "Single",
            TopologyType::ReplicaSetNoPrimary => "ReplicaSetNoPrimary",
            TopologyType::ReplicaSetWithPrimary => "ReplicaSetWithPrimary",
            TopologyType::Sharded => "Sharded",
            TopologyType::Unknown => "Unknown",
        }
    }

    pub fn is_replica_set(&self) -> bool {
        match *self {
            TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary => true,
            _ => false,
        }
    }
}

impl FromStr for TopologyType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "Single" => TopologyType::Single,
            "ReplicaSetNoPrimary" => TopologyType::ReplicaSetNoPrimary,
            "ReplicaSetWithPrimary" => TopologyType::ReplicaSetWithPrimary,
            "Sharded" => TopologyType::Sharded,
            _ => TopologyType::Unknown,
        })
    }
}

/// An immutable snapshot of the deployment, built from server monitoring.
///
/// Snapshots are never modified once published: `update` returns a new
/// description and leaves the receiver untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct TopologyDescription {
    pub topology_type: TopologyType,
    /// The replica set name, fixed once the first member is observed.
    pub set_name: Option<String>,
    /// The server connection health check frequency.
    /// The default is 10 seconds.
    pub heartbeat_frequency_ms: u64,
    /// The width of the latency window used by server selection.
    pub local_threshold_ms: u64,
    /// Known servers within the topology.
    pub servers: HashMap<Host, ServerDescription>,
    // The largest set version seen from a primary.
    max_set_version: Option<i64>,
    // The largest election id seen from a primary.
    max_election_id: Option<oid::ObjectId>,
    logical_session_timeout_minutes: Option<i64>,
    common_wire_version: Option<i64>,
    compatibility_error: Option<String>,
}

fn election_id_bytes(id: &Option<oid::ObjectId>) -> Option<[u8; 12]> {
    id.as_ref().map(|id| id.bytes())
}

impl TopologyDescription {
    /// Returns a topology seeded with `hosts`, all of them Unknown.
    pub fn new<I>(topology_type: TopologyType, set_name: Option<String>, hosts: I) -> TopologyDescription
    where
        I: IntoIterator<Item = Host>,
    {
        let servers = hosts
            .into_iter()
            .map(|host| (host.clone(), ServerDescription::new(host)))
            .collect();

        TopologyDescription {
            topology_type,
            set_name,
            heartbeat_frequency_ms: DEFAULT_HEARTBEAT_FREQUENCY_MS,
            local_threshold_ms: DEFAULT_LOCAL_THRESHOLD_MS,
            servers,
            max_set_version: None,
            max_election_id: None,
            logical_session_timeout_minutes: None,
            common_wire_version: None,
            compatibility_error: None,
        }
    }

    /// Builds a description from already-known server descriptions. Derived
    /// fields are computed as if every server had just been observed.
    pub fn with_servers<I>(
        topology_type: TopologyType,
        set_name: Option<String>,
        servers: I,
    ) -> TopologyDescription
    where
        I: IntoIterator<Item = ServerDescription>,
    {
        let mut description = TopologyDescription::new(topology_type, set_name, Vec::new());
        for server in servers {
            description.servers.insert(server.address.clone(), server);
        }
        description.recompute_derived();
        description
    }

    pub fn with_heartbeat_frequency_ms(mut self, ms: u64) -> TopologyDescription {
        self.heartbeat_frequency_ms = ms;
        self
    }

    pub fn with_local_threshold_ms(mut self, ms: u64) -> TopologyDescription {
        self.local_threshold_ms = ms;
        self
    }

    pub fn max_set_version(&self) -> Option<i64> {
        self.max_set_version
    }

    pub fn max_election_id(&self) -> Option<&oid::ObjectId> {
        self.max_election_id.as_ref()
    }

    /// The smallest session timeout among data-bearing servers, or `None` if
    /// any of them does not support sessions.
    pub fn logical_session_timeout_minutes(&self) -> Option<i64> {
        self.logical_session_timeout_minutes
    }

    pub fn common_wire_version(&self) -> Option<i64> {
        self.common_wire_version
    }

    pub fn is_compatible(&self) -> bool {
        self.compatibility_error.is_none()
    }

    pub fn compatibility_error(&self) -> Option<&str> {
        self.compatibility_error.as_ref().map(|s| &s[..])
    }

    pub fn server(&self, host: &Host) -> Option<&ServerDescription> {
        self.servers.get(host)
    }

    /// Returns the current primary, if any.
    pub fn primary(&self) -> Option<&ServerDescription> {
        self.servers.values().find(|s| s.server_type == ServerType::RSPrimary)
    }

    pub fn has_readable_server(&self) -> bool {
        self.servers.values().any(|s| s.is_readable())
    }

    pub fn has_writable_server(&self) -> bool {
        self.servers.values().any(|s| s.is_writable())
    }

    /// Returns a copy of this description updated with a new server description.
    pub fn update(&self, description: ServerDescription) -> TopologyDescription {
        let mut next = self.clone();
        next.apply(description);
        next.recompute_derived();
        next
    }

    // Applies the state transition for one server description.
    fn apply(&mut self, description: ServerDescription) {
        let host = description.address.clone();

        // Late responses from servers that have since been removed are ignored.
        if !self.servers.contains_key(&host) {
            return;
        }

        if description.max_wire_version != 0 {
            self.common_wire_version = Some(match self.common_wire_version {
                Some(v) => v.min(description.max_wire_version),
                None => description.max_wire_version,
            });
        }

        let stype = description.server_type;

        if self.topology_type == TopologyType::Single {
            self.update_single(description);
            return;
        }

        self.servers.insert(host.clone(), description.clone());

        match self.topology_type {
            TopologyType::Unknown => match stype {
                ServerType::Standalone => self.update_unknown_with_standalone(&host),
                ServerType::Mongos => self.topology_type = TopologyType::Sharded,
                ServerType::RSPrimary => self.update_rs_from_primary(description),
                ServerType::RSSecondary | ServerType::RSArbiter | ServerType::RSOther => {
                    self.update_rs_without_primary(description)
                }
                _ => (),
            },
            TopologyType::Sharded => match stype {
                ServerType::Unknown | ServerType::Mongos => (),
                _ => {
                    self.servers.remove(&host);
                }
            },
            TopologyType::ReplicaSetNoPrimary => match stype {
                ServerType::Standalone | ServerType::Mongos => {
                    self.servers.remove(&host);
                }
                ServerType::RSPrimary => self.update_rs_from_primary(description),
                ServerType::RSSecondary
                | ServerType::RSArbiter
                | ServerType::RSOther
                | ServerType::RSGhost => self.update_rs_without_primary(description),
                _ => (),
            },
            TopologyType::ReplicaSetWithPrimary => match stype {
                ServerType::Standalone | ServerType::Mongos => {
                    self.servers.remove(&host);
                    self.check_if_has_primary();
                }
                ServerType::RSPrimary => self.update_rs_from_primary(description),
                ServerType::RSSecondary
                | ServerType::RSArbiter
                | ServerType::RSOther
                | ServerType::RSGhost => self.update_rs_with_primary_from_member(description),
                _ => self.check_if_has_primary(),
            },
            TopologyType::Single => (),
        }
    }

    // A Single topology never changes type or membership. A server whose
    // replica set name differs from the configured one is recorded as Unknown.
    fn update_single(&mut self, mut description: ServerDescription) {
        let mismatched = match (&self.set_name, &description.set_name) {
            (Some(expected), Some(actual)) => expected != actual,
            (Some(_), None) => description.is_known(),
            _ => false,
        };

        if mismatched {
            let error = format!(
                "replica set name mismatch: expected {:?}, got {:?}",
                self.set_name, description.set_name
            );
            let last_update_time = description.last_update_time;
            description = ServerDescription::new(description.address);
            description.last_update_time = last_update_time;
            description.error = Some(error);
        }

        self.servers.insert(description.address.clone(), description);
    }

    // Sets the correct replica set topology type.
    fn check_if_has_primary(&mut self) {
        self.topology_type = if self.primary().is_some() {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    // Updates an unknown topology with a new standalone server description.
    fn update_unknown_with_standalone(&mut self, host: &Host) {
        if self.servers.len() == 1 {
            self.topology_type = TopologyType::Single;
        } else {
            self.servers.remove(host);
        }
    }

    // Returns true if the member reports a set name other than the topology's.
    fn set_name_mismatch(&self, description: &ServerDescription) -> bool {
        match (&self.set_name, &description.set_name) {
            (Some(expected), Some(actual)) => expected != actual,
            _ => false,
        }
    }

    // Adds Unknown entries for every member the server reports that is not yet tracked.
    fn add_missing_hosts(&mut self, description: &ServerDescription) {
        for host in description.all_hosts() {
            if !self.servers.contains_key(host) {
                self.servers.insert(host.clone(), ServerDescription::new(host.clone()));
            }
        }
    }

    // Marks the server Unknown, keeping it in the topology. The replacement
    // takes the timestamp of the report that caused it.
    fn mark_unknown(&mut self, host: &Host, reason: &str, cause: &ServerDescription) {
        let mut unknown = ServerDescription::new(host.clone());
        unknown.last_update_time = cause.last_update_time;
        unknown.error = Some(reason.to_owned());
        self.servers.insert(host.clone(), unknown);
    }

    // Returns true if a primary report is older than the newest one seen.
    fn is_stale_primary(&self, description: &ServerDescription) -> bool {
        // Primaries that do not report both markers predate elections with
        // ids and are always accepted.
        let incoming = match (description.set_version, election_id_bytes(&description.election_id)) {
            (Some(version), Some(id)) => (version, id),
            _ => return false,
        };

        match (self.max_set_version, election_id_bytes(&self.max_election_id)) {
            (Some(max_version), Some(max_id)) => incoming < (max_version, max_id),
            _ => false,
        }
    }

    // Updates a replica set topology with a new primary server description.
    fn update_rs_from_primary(&mut self, description: ServerDescription) {
        let host = description.address.clone();

        if self.set_name.is_none() {
            self.set_name = description.set_name.clone();
        } else if self.set_name != description.set_name {
            // Primary found, but it doesn't have the setName
            // provided by the user or previously discovered.
            self.mark_unknown(&host, "primary reported a different replica set name", &description);
            self.check_if_has_primary();
            return;
        }

        if self.is_stale_primary(&description) {
            self.mark_unknown(&host, "primary reported a stale electionId/setVersion", &description);
            self.check_if_has_primary();
            return;
        }

        if description.set_version.is_some() && description.election_id.is_some() {
            self.max_election_id = description.election_id.clone();
        }

        if let Some(version) = description.set_version {
            if self.max_set_version.map_or(true, |max| version > max) {
                self.max_set_version = Some(version);
            }
        }

        // Invalidate any old primaries
        let old_primaries: Vec<Host> = self
            .servers
            .iter()
            .filter(|&(h, s)| *h != host && s.server_type == ServerType::RSPrimary)
            .map(|(h, _)| h.clone())
            .collect();

        for old in old_primaries {
            self.mark_unknown(&old, "a newer primary was discovered", &description);
        }

        self.add_missing_hosts(&description);

        // Remove hosts that are not reported by the primary.
        let reported: Vec<&Host> = description.all_hosts().collect();
        self.servers.retain(|h, _| reported.contains(&h));

        self.check_if_has_primary();
    }

    // Updates a replica set topology that has no primary with a member description.
    fn update_rs_without_primary(&mut self, description: ServerDescription) {
        let host = description.address.clone();
        self.topology_type = TopologyType::ReplicaSetNoPrimary;

        if self.set_name.is_none() {
            self.set_name = description.set_name.clone();
        } else if self.set_name_mismatch(&description) {
            self.servers.remove(&host);
            return;
        }

        self.add_missing_hosts(&description);

        if let Some(ref me) = description.me {
            if *me != host {
                self.servers.remove(&host);
            }
        }
    }

    // Updates a replica set topology with an updated member description.
    fn update_rs_with_primary_from_member(&mut self, description: ServerDescription) {
        let host = description.address.clone();

        if self.set_name_mismatch(&description) {
            self.servers.remove(&host);
            self.check_if_has_primary();
            return;
        }

        self.add_missing_hosts(&description);

        if let Some(ref me) = description.me {
            if *me != host {
                self.servers.remove(&host);
            }
        }

        self.check_if_has_primary();
    }

    // Recomputes the session timeout and wire compatibility.
    fn recompute_derived(&mut self) {
        let mut timeout: Option<i64> = None;
        let mut any_missing = false;

        for server in self.servers.values().filter(|s| s.is_data_bearing()) {
            match server.logical_session_timeout_minutes {
                Some(minutes) => {
                    timeout = Some(timeout.map_or(minutes, |t| t.min(minutes)));
                }
                None => any_missing = true,
            }
        }

        self.logical_session_timeout_minutes = if any_missing { None } else { timeout };

        // Reports the first incompatible server by address.
        let mut known: Vec<&ServerDescription> = self.servers.values().filter(|s| s.is_known()).collect();
        known.sort_by(|a, b| a.address.cmp(&b.address));

        self.compatibility_error = None;
        for server in known {
            if server.min_wire_version > MAX_SUPPORTED_WIRE_VERSION {
                self.compatibility_error = Some(format!(
                    "Server at {} requires wire version {}, but this driver only supports up to {}",
                    server.address, server.min_wire_version, MAX_SUPPORTED_WIRE_VERSION
                ));
                break;
            } else if server.max_wire_version < MIN_SUPPORTED_WIRE_VERSION {
                self.compatibility_error = Some(format!(
                    "Server at {} reports wire version {}, but this driver requires at least {}",
                    server.address, server.max_wire_version, MIN_SUPPORTED_WIRE_VERSION
                ));
                break;
            }
        }
    }

    /// Estimates how far `secondary` lags behind, in milliseconds.
    ///
    /// With a primary, lag is measured against the primary's last write as
    /// observed at each server's last update. Without one, it is measured
    /// against the secondary with the newest write.
    pub fn secondary_staleness_ms(&self, secondary: &ServerDescription) -> i64 {
        let heartbeat = self.heartbeat_frequency_ms as i64;

        match self.primary() {
            Some(primary) => {
                let secondary_lag =
                    secondary.last_update_time.timestamp_millis() - secondary.last_write_millis();
                let primary_lag =
                    primary.last_update_time.timestamp_millis() - primary.last_write_millis();
                secondary_lag - primary_lag + heartbeat
            }
            None => {
                let reference = self
                    .servers
                    .values()
                    .filter(|s| s.server_type == ServerType::RSSecondary)
                    .map(|s| s.last_write_millis())
                    .max()
                    .unwrap_or_else(|| secondary.last_write_millis());
                reference - secondary.last_write_millis() + heartbeat
            }
        }
    }
}
