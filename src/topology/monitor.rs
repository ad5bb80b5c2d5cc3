//! Server monitoring: parses handshake replies and feeds them into the topology.
use crate::common::TagSet;
use crate::error::{Error::ResponseError, Result};
use crate::event::sdam::{
    SdamEvent, ServerHeartbeatFailedEvent, ServerHeartbeatStartedEvent,
    ServerHeartbeatSucceededEvent,
};
use crate::host::{self, Host};

use bson::{oid, Bson, Document};
use chrono::{DateTime, Utc};
use slog::{debug, warn, Logger};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::server::{ServerDescription, ServerType};
use super::{Topology, WeakTopology};

/// The result of an isMaster operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsMasterResult {
    pub ok: bool,
    pub is_master: bool,
    pub min_wire_version: i64,
    pub max_wire_version: i64,

    /// Shard-specific. mongos instances will add this field to the
    /// isMaster reply, and it will contain the value "isdbgrid".
    pub msg: String,

    // Replica Set specific
    pub is_replica_set: bool,
    pub is_secondary: bool,
    pub me: Option<Host>,
    pub hosts: Vec<Host>,
    pub passives: Vec<Host>,
    pub arbiters: Vec<Host>,
    pub arbiter_only: bool,
    pub tags: TagSet,
    pub set_name: Option<String>,
    pub set_version: Option<i64>,
    pub election_id: Option<oid::ObjectId>,
    pub primary: Option<Host>,
    pub hidden: bool,
    pub last_write_date: Option<DateTime<Utc>>,
    pub logical_session_timeout_minutes: Option<i64>,
}

fn get_i64(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key) {
        Some(&Bson::I32(v)) => Some(i64::from(v)),
        Some(&Bson::I64(v)) => Some(v),
        Some(&Bson::FloatingPoint(v)) => Some(v as i64),
        _ => None,
    }
}

fn get_bool(doc: &Document, key: &str) -> bool {
    match doc.get(key) {
        Some(&Bson::Boolean(b)) => b,
        _ => false,
    }
}

fn get_hosts(doc: &Document, key: &str) -> Vec<Host> {
    match doc.get(key) {
        Some(&Bson::Array(ref arr)) => arr
            .iter()
            .filter_map(|bson| match *bson {
                Bson::String(ref s) => host::parse_host(s).ok(),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl IsMasterResult {
    /// Parses an isMaster response document from the server.
    pub fn new(doc: Document) -> Result<IsMasterResult> {
        let ok = match doc.get("ok") {
            Some(&Bson::I32(v)) => v != 0,
            Some(&Bson::I64(v)) => v != 0,
            Some(&Bson::FloatingPoint(v)) => v != 0.0,
            Some(&Bson::Boolean(b)) => b,
            _ => return Err(ResponseError("result does not contain `ok`.".to_owned())),
        };

        let mut result = IsMasterResult {
            ok,
            is_master: get_bool(&doc, "ismaster") || get_bool(&doc, "isWritablePrimary"),
            min_wire_version: get_i64(&doc, "minWireVersion").unwrap_or(0),
            max_wire_version: get_i64(&doc, "maxWireVersion").unwrap_or(0),
            msg: String::new(),
            is_replica_set: get_bool(&doc, "isreplicaset"),
            is_secondary: get_bool(&doc, "secondary"),
            me: None,
            hosts: get_hosts(&doc, "hosts"),
            passives: get_hosts(&doc, "passives"),
            arbiters: get_hosts(&doc, "arbiters"),
            arbiter_only: get_bool(&doc, "arbiterOnly"),
            tags: TagSet::new(),
            set_name: None,
            set_version: get_i64(&doc, "setVersion"),
            election_id: None,
            primary: None,
            hidden: get_bool(&doc, "hidden"),
            last_write_date: None,
            logical_session_timeout_minutes: get_i64(&doc, "logicalSessionTimeoutMinutes"),
        };

        if let Some(&Bson::String(ref s)) = doc.get("msg") {
            result.msg = s.to_owned();
        }

        if let Some(&Bson::String(ref s)) = doc.get("setName") {
            result.set_name = Some(s.to_owned());
        }

        if let Some(&Bson::String(ref s)) = doc.get("me") {
            result.me = Some(host::parse_host(s)?);
        }

        if let Some(&Bson::String(ref s)) = doc.get("primary") {
            result.primary = Some(host::parse_host(s)?);
        }

        if let Some(&Bson::Document(ref tags)) = doc.get("tags") {
            for (k, v) in tags.iter() {
                if let Bson::String(ref tag) = *v {
                    result.tags.insert(k.to_owned(), tag.to_owned());
                }
            }
        }

        match doc.get("electionId") {
            Some(&Bson::ObjectId(ref id)) => result.election_id = Some(id.clone()),
            Some(&Bson::Document(ref id_doc)) => {
                if let Some(&Bson::String(ref s)) = id_doc.get("$oid") {
                    result.election_id = Some(oid::ObjectId::with_string(s)?);
                }
            }
            _ => (),
        }

        if let Some(&Bson::Document(ref last_write)) = doc.get("lastWrite") {
            if let Some(&Bson::UtcDatetime(ref date)) = last_write.get("lastWriteDate") {
                result.last_write_date = Some(*date);
            }
        }

        Ok(result)
    }

    /// Derives the server type reported by this response.
    pub fn server_type(&self) -> ServerType {
        if !self.ok {
            ServerType::Unknown
        } else if self.msg == "isdbgrid" {
            ServerType::Mongos
        } else if self.set_name.is_some() {
            if self.hidden {
                ServerType::RSOther
            } else if self.is_master {
                ServerType::RSPrimary
            } else if self.is_secondary {
                ServerType::RSSecondary
            } else if self.arbiter_only {
                ServerType::RSArbiter
            } else {
                ServerType::RSOther
            }
        } else if self.is_replica_set {
            ServerType::RSGhost
        } else {
            ServerType::Standalone
        }
    }
}

/// Runs the handshake against a server. The wire protocol lives outside
/// this crate; implementations send `isMaster` and return the reply.
pub trait Heartbeat: Send + Sync {
    fn check(&self, host: &Host) -> Result<Document>;
}

/// Controls a running monitor thread.
#[derive(Clone, Debug)]
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
    // Set to true to wake the monitor before its heartbeat interval elapses.
    wakeup: Arc<(Mutex<bool>, Condvar)>,
}

impl MonitorHandle {
    fn new() -> MonitorHandle {
        MonitorHandle {
            running: Arc::new(AtomicBool::new(true)),
            wakeup: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Asks the monitor to check its server immediately.
    pub fn request_check(&self) {
        let (ref lock, ref condvar) = *self.wakeup;
        if let Ok(mut requested) = lock.lock() {
            *requested = true;
            condvar.notify_one();
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.request_check();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Monitors and updates server and topology information.
pub(crate) struct Monitor {
    host: Host,
    topology: WeakTopology,
    heartbeat: Arc<dyn Heartbeat>,
    handle: MonitorHandle,
    log: Logger,
}

impl Monitor {
    /// Spawns a monitor thread for `host`.
    pub fn start(
        host: Host,
        topology: WeakTopology,
        heartbeat: Arc<dyn Heartbeat>,
        log: Logger,
    ) -> MonitorHandle {
        let handle = MonitorHandle::new();
        let spawn_log = log.clone();
        let monitor = Monitor {
            host: host.clone(),
            topology,
            heartbeat,
            handle: handle.clone(),
            log,
        };

        let spawned = thread::Builder::new()
            .name(format!("monitor-{}", host))
            .spawn(move || monitor.run());

        if let Err(err) = spawned {
            handle.running.store(false, Ordering::SeqCst);
            warn!(spawn_log, "failed to spawn monitor thread"; "error" => %err);
        }

        handle
    }

    // Returns the isMaster reply along with the round-trip time in milliseconds.
    fn is_master(&self) -> Result<(Document, f64)> {
        let start = Instant::now();
        let reply = self.heartbeat.check(&self.host)?;
        let elapsed = start.elapsed();
        let round_trip_time =
            elapsed.as_secs() as f64 * 1000.0 + f64::from(elapsed.subsec_nanos()) / 1_000_000.0;
        Ok((reply, round_trip_time))
    }

    fn describe(&self, reply: Document, rtt: f64, previous_rtt: Option<f64>) -> ServerDescription {
        match IsMasterResult::new(reply) {
            Ok(ismaster) => {
                ServerDescription::from_handshake(self.host.clone(), ismaster, rtt, previous_rtt)
            }
            Err(err) => ServerDescription::with_error(self.host.clone(), &err),
        }
    }

    /// Execute isMaster and update the server and topology.
    fn execute_update(&self, topology: &Topology) {
        let previous = topology.description().servers.get(&self.host).cloned();
        let previous_rtt = previous.as_ref().and_then(|d| d.round_trip_time);

        topology.emit_event(|| {
            SdamEvent::ServerHeartbeatStarted(ServerHeartbeatStartedEvent {
                address: self.host.clone(),
            })
        });

        let result = match self.is_master() {
            Ok(reply) => Ok(reply),
            Err(err) => {
                // Refresh all connections
                if let Err(err) = topology.clear(&self.host) {
                    warn!(self.log, "failed to clear pool"; "error" => %err);
                }

                let known = previous.as_ref().map_or(false, |d| d.is_known());
                if known {
                    debug!(self.log, "retrying failed heartbeat"; "error" => %err);
                    self.is_master()
                } else {
                    Err(err)
                }
            }
        };

        let description = match result {
            Ok((reply, rtt)) => {
                topology.emit_event(|| {
                    SdamEvent::ServerHeartbeatSucceeded(ServerHeartbeatSucceededEvent {
                        address: self.host.clone(),
                        duration_ms: rtt,
                        reply: reply.clone(),
                    })
                });
                self.describe(reply, rtt, previous_rtt)
            }
            Err(err) => {
                warn!(self.log, "heartbeat failed"; "error" => %err);
                topology.emit_event(|| {
                    SdamEvent::ServerHeartbeatFailed(ServerHeartbeatFailedEvent {
                        address: self.host.clone(),
                        failure: err.to_string(),
                    })
                });
                ServerDescription::with_error(self.host.clone(), &err)
            }
        };

        let data_bearing = description.is_data_bearing();

        if let Err(err) = topology.update(description) {
            warn!(self.log, "failed to apply server description"; "error" => %err);
            return;
        }

        if data_bearing {
            if let Err(err) = topology.ensure_min_pool_size(&self.host) {
                debug!(self.log, "failed to populate pool"; "error" => %err);
            }
        }
    }

    /// Checks the server at the topology's heartbeat frequency until stopped.
    fn run(self) {
        debug!(self.log, "monitor started");

        while self.handle.is_running() {
            let frequency = match self.topology.upgrade() {
                Some(topology) => {
                    self.execute_update(&topology);
                    Duration::from_millis(topology.heartbeat_frequency_ms())
                }
                None => break,
            };

            let (ref lock, ref condvar) = *self.handle.wakeup;
            let mut requested = match lock.lock() {
                Ok(guard) => guard,
                Err(_) => break,
            };

            let deadline = Instant::now() + frequency;
            while !*requested && self.handle.is_running() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                requested = match condvar.wait_timeout(requested, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(_) => return,
                };
            }
            *requested = false;
        }

        debug!(self.log, "monitor stopped");
    }
}
