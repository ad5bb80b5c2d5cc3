use crate::common::TagSet;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::pool::ConnectionPool;

use bson::oid;
use chrono::{DateTime, Utc};

use std::str::FromStr;

use super::monitor::{IsMasterResult, MonitorHandle};

// Weight given to the newest round-trip time sample.
const RTT_ALPHA: f64 = 0.2;

/// Describes the server role within a server set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServerType {
    /// Standalone server.
    Standalone,
    /// Shard router.
    Mongos,
    /// Replica set member that was reported as primary by another member,
    /// but has not yet been contacted.
    PossiblePrimary,
    /// Replica set primary.
    RSPrimary,
    /// Replica set secondary.
    RSSecondary,
    /// Replica set arbiter.
    RSArbiter,
    /// Replica set member of some other type.
    RSOther,
    /// Replica set ghost member.
    RSGhost,
    /// Server type is currently unknown.
    Unknown,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match *self {
            ServerType::Standalone => "Standalone",
            ServerType::Mongos => "Mongos",
            ServerType::PossiblePrimary => "PossiblePrimary",
            ServerType::RSPrimary => "RSPrimary",
            ServerType::RSSecondary => "RSSecondary",
            ServerType::RSArbiter => "RSArbiter",
            ServerType::RSOther => "RSOther",
            ServerType::RSGhost => "RSGhost",
            ServerType::Unknown => "Unknown",
        }
    }

    /// Returns true for replica set members that are not the primary.
    pub fn is_rs_member(&self) -> bool {
        match *self {
            ServerType::RSSecondary | ServerType::RSArbiter | ServerType::RSOther => true,
            _ => false,
        }
    }
}

impl FromStr for ServerType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "Standalone" => ServerType::Standalone,
            "Mongos" => ServerType::Mongos,
            "PossiblePrimary" => ServerType::PossiblePrimary,
            "RSPrimary" => ServerType::RSPrimary,
            "RSSecondary" => ServerType::RSSecondary,
            "RSArbiter" => ServerType::RSArbiter,
            "RSOther" => ServerType::RSOther,
            "RSGhost" => ServerType::RSGhost,
            _ => ServerType::Unknown,
        })
    }
}

/// Server information gathered from server monitoring.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerDescription {
    /// The address the server was contacted on.
    pub address: Host,
    /// The server type.
    pub server_type: ServerType,
    /// The error that caused the server to be marked Unknown, if any.
    pub error: Option<String>,
    /// Exponentially weighted moving average of the handshake round-trip time, in milliseconds.
    pub round_trip_time: Option<f64>,
    /// The minimum wire version supported by this server.
    pub min_wire_version: i64,
    /// The maximum wire version supported by this server.
    pub max_wire_version: i64,
    /// The server's host information, if it is part of a replica set.
    pub me: Option<Host>,
    /// All hosts in the replica set known by this server.
    pub hosts: Vec<Host>,
    /// All passive members of the replica set known by this server.
    pub passives: Vec<Host>,
    /// All arbiters in the replica set known by this server.
    pub arbiters: Vec<Host>,
    /// Server tags for targeted read operations on specific replica set members.
    pub tags: TagSet,
    /// The replica set name.
    pub set_name: Option<String>,
    /// The replica set configuration version.
    pub set_version: Option<i64>,
    /// The server's current election id, if it believes it is a primary.
    pub election_id: Option<oid::ObjectId>,
    /// The server's opinion of who the primary is.
    pub primary: Option<Host>,
    /// When the server last applied a write.
    pub last_write_date: Option<DateTime<Utc>>,
    /// When this description was produced.
    pub last_update_time: DateTime<Utc>,
    pub logical_session_timeout_minutes: Option<i64>,
}

impl ServerDescription {
    /// Returns a default, unknown server description.
    pub fn new(address: Host) -> ServerDescription {
        ServerDescription {
            address,
            server_type: ServerType::Unknown,
            error: None,
            round_trip_time: None,
            min_wire_version: 0,
            max_wire_version: 0,
            me: None,
            hosts: Vec::new(),
            passives: Vec::new(),
            arbiters: Vec::new(),
            tags: TagSet::new(),
            set_name: None,
            set_version: None,
            election_id: None,
            primary: None,
            last_write_date: None,
            last_update_time: Utc::now(),
            logical_session_timeout_minutes: None,
        }
    }

    /// Builds the "no response" description for a failed handshake or a
    /// server that reported a state-change error.
    pub fn with_error(address: Host, err: &Error) -> ServerDescription {
        let mut description = ServerDescription::new(address);
        description.error = Some(err.to_string());
        description
    }

    /// Builds a description from a handshake response. `previous_rtt` is the
    /// moving average carried by the server's last description.
    pub fn from_handshake(
        address: Host,
        ismaster: IsMasterResult,
        round_trip_time: f64,
        previous_rtt: Option<f64>,
    ) -> ServerDescription {
        let mut description = ServerDescription::new(address);

        if !ismaster.ok {
            description.error = Some("ismaster returned a not-ok response.".to_owned());
            return description;
        }

        description.round_trip_time = Some(match previous_rtt {
            Some(old) => RTT_ALPHA * round_trip_time + (1.0 - RTT_ALPHA) * old,
            None => round_trip_time,
        });

        description.server_type = ismaster.server_type();
        description.min_wire_version = ismaster.min_wire_version;
        description.max_wire_version = ismaster.max_wire_version;
        description.me = ismaster.me;
        description.hosts = ismaster.hosts;
        description.passives = ismaster.passives;
        description.arbiters = ismaster.arbiters;
        description.tags = ismaster.tags;
        description.set_name = ismaster.set_name;
        description.set_version = ismaster.set_version;
        description.election_id = ismaster.election_id;
        description.primary = ismaster.primary;
        description.last_write_date = ismaster.last_write_date;
        description.logical_session_timeout_minutes = ismaster.logical_session_timeout_minutes;

        if description.server_type == ServerType::Unknown {
            description.clear_member_data();
        }

        description
    }

    // Unknown servers carry no election, version or tag information.
    fn clear_member_data(&mut self) {
        self.set_name = None;
        self.set_version = None;
        self.election_id = None;
        self.tags.clear();
    }

    /// Every member this server reports: hosts, passives and arbiters.
    pub fn all_hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter().chain(self.passives.iter()).chain(self.arbiters.iter())
    }

    pub fn is_known(&self) -> bool {
        self.server_type != ServerType::Unknown
    }

    pub fn is_data_bearing(&self) -> bool {
        match self.server_type {
            ServerType::Standalone
            | ServerType::Mongos
            | ServerType::RSPrimary
            | ServerType::RSSecondary => true,
            _ => false,
        }
    }

    pub fn is_writable(&self) -> bool {
        match self.server_type {
            ServerType::Standalone | ServerType::Mongos | ServerType::RSPrimary => true,
            _ => false,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.is_data_bearing()
    }

    /// The round-trip time used for latency windowing. Servers without a
    /// measurement are treated as the fastest.
    pub fn latency(&self) -> f64 {
        self.round_trip_time.unwrap_or(0.0)
    }

    // Milliseconds since the epoch of the last write, or 0 when unknown.
    pub(crate) fn last_write_millis(&self) -> i64 {
        self.last_write_date.map(|d| d.timestamp_millis()).unwrap_or(0)
    }
}

/// Holds the connection pool and monitor for a single server in the topology.
pub(crate) struct Server {
    /// Host connection details.
    pub host: Host,
    /// The connection pool for this server.
    pub pool: ConnectionPool,
    // When this server is dropped, the monitor will be stopped.
    monitor: Option<MonitorHandle>,
}

impl Server {
    pub fn new(host: Host, pool: ConnectionPool) -> Server {
        Server {
            host,
            pool,
            monitor: None,
        }
    }

    pub fn set_monitor(&mut self, monitor: MonitorHandle) {
        if let Some(old) = self.monitor.replace(monitor) {
            old.stop();
        }
    }

    pub fn monitor(&self) -> Option<&MonitorHandle> {
        self.monitor.as_ref()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(ref monitor) = self.monitor {
            monitor.stop();
        }
    }
}
