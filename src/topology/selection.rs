//! Server selection over a topology snapshot.
//!
//! Selection is a pure function of a `TopologyDescription` and a read
//! preference: candidates are narrowed by server type, staleness and tags,
//! then by the latency window, and one of the survivors is picked at random.
use crate::common::{tag_set_matches, ReadMode, ReadPreference};
use crate::error::{Error, Result};
use crate::host::Host;

use rand::seq::SliceRandom;
use rand::thread_rng;

use super::description::{TopologyDescription, TopologyType};
use super::server::{ServerDescription, ServerType};

// Maximum time a secondary may go without a write before the primary
// performs a no-op write.
const IDLE_WRITE_PERIOD_MS: i64 = 10000;

/// The smallest `maxStalenessSeconds` a read preference may carry.
pub const SMALLEST_MAX_STALENESS_SECONDS: i64 = 90;

impl TopologyDescription {
    /// Selects a server for a read with the given preference.
    ///
    /// Returns `NoPrimaryAvailable` or `NoServerAvailable` when nothing is
    /// currently eligible; callers retry those against a newer snapshot.
    pub fn select_server(&self, read_pref: &ReadPreference) -> Result<Host> {
        let suitable = self.suitable_servers(read_pref)?;
        let window = self.in_latency_window(suitable);

        match window.choose(&mut thread_rng()) {
            Some(server) => Ok(server.address.clone()),
            None if self.topology_type.is_replica_set() && read_pref.mode == ReadMode::Primary => {
                Err(Error::NoPrimaryAvailable)
            }
            None => Err(Error::NoServerAvailable(format!(
                "no server in a {} topology matches read preference {}",
                self.topology_type.as_str(),
                read_pref.mode
            ))),
        }
    }

    /// Selects a writable server: the primary, a standalone or a mongos.
    pub fn select_server_for_write(&self) -> Result<Host> {
        let window = self.in_latency_window(self.writable_servers()?);

        match window.choose(&mut thread_rng()) {
            Some(server) => Ok(server.address.clone()),
            None if self.topology_type.is_replica_set() => Err(Error::NoPrimaryAvailable),
            None => Err(Error::NoServerAvailable(format!(
                "no writable server in a {} topology",
                self.topology_type.as_str()
            ))),
        }
    }

    /// Returns the servers that accept writes, before latency windowing.
    pub fn writable_servers(&self) -> Result<Vec<&ServerDescription>> {
        self.check_compatible()?;
        Ok(self.servers.values().filter(|s| s.is_writable()).collect())
    }

    /// Returns the servers eligible for `read_pref` before latency windowing.
    pub fn suitable_servers(&self, read_pref: &ReadPreference) -> Result<Vec<&ServerDescription>> {
        read_pref.validate()?;
        self.check_compatible()?;

        match self.topology_type {
            TopologyType::Unknown => Ok(Vec::new()),
            TopologyType::Single => Ok(self.servers.values().filter(|s| s.is_known()).collect()),
            TopologyType::Sharded => Ok(self
                .servers
                .values()
                .filter(|s| s.server_type == ServerType::Mongos)
                .collect()),
            TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary => {
                self.validate_max_staleness(read_pref)?;
                Ok(self.replica_set_servers(read_pref))
            }
        }
    }

    /// Keeps the servers whose round-trip time is within `local_threshold_ms`
    /// of the fastest one.
    pub fn in_latency_window<'a>(
        &self,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        let fastest = servers
            .iter()
            .map(|s| s.latency())
            .fold(None, |min: Option<f64>, rtt| Some(min.map_or(rtt, |m| m.min(rtt))));

        let fastest = match fastest {
            Some(fastest) => fastest,
            None => return servers,
        };

        let limit = fastest + self.local_threshold_ms as f64;
        servers.into_iter().filter(|s| s.latency() <= limit).collect()
    }

    /// Rejects a `maxStalenessSeconds` too small to be meaningful for this topology.
    pub fn validate_max_staleness(&self, read_pref: &ReadPreference) -> Result<()> {
        let max_staleness = match read_pref.max_staleness_seconds {
            Some(seconds) => seconds,
            None => return Ok(()),
        };

        let variance_ms = self.heartbeat_frequency_ms as i64 + IDLE_WRITE_PERIOD_MS;
        if max_staleness.saturating_mul(1000) < variance_ms {
            return Err(Error::ArgumentError(format!(
                "maxStalenessSeconds must be at least {} seconds with a heartbeat frequency of {}ms.",
                variance_ms as f64 / 1000.0,
                self.heartbeat_frequency_ms
            )));
        }

        if max_staleness < SMALLEST_MAX_STALENESS_SECONDS {
            return Err(Error::ArgumentError(format!(
                "maxStalenessSeconds must be at least {} seconds.",
                SMALLEST_MAX_STALENESS_SECONDS
            )));
        }

        Ok(())
    }

    fn check_compatible(&self) -> Result<()> {
        match self.compatibility_error() {
            Some(err) => Err(Error::IncompatibleServer(err.to_owned())),
            None => Ok(()),
        }
    }

    fn servers_of_type(&self, stype: ServerType) -> Vec<&ServerDescription> {
        self.servers.values().filter(|s| s.server_type == stype).collect()
    }

    // Secondaries that pass the staleness and tag filters.
    fn eligible_secondaries(&self, read_pref: &ReadPreference) -> Vec<&ServerDescription> {
        let secondaries = self.servers_of_type(ServerType::RSSecondary);
        self.filter_by_tags(read_pref, self.filter_by_staleness(read_pref, secondaries))
    }

    fn replica_set_servers(&self, read_pref: &ReadPreference) -> Vec<&ServerDescription> {
        match read_pref.mode {
            ReadMode::Primary => self.servers_of_type(ServerType::RSPrimary),
            ReadMode::PrimaryPreferred => {
                let primary = self.servers_of_type(ServerType::RSPrimary);
                if primary.is_empty() {
                    self.eligible_secondaries(read_pref)
                } else {
                    primary
                }
            }
            ReadMode::Secondary => self.eligible_secondaries(read_pref),
            ReadMode::SecondaryPreferred => {
                let secondaries = self.eligible_secondaries(read_pref);
                if secondaries.is_empty() {
                    self.servers_of_type(ServerType::RSPrimary)
                } else {
                    secondaries
                }
            }
            ReadMode::Nearest => {
                let members = self
                    .servers
                    .values()
                    .filter(|s| {
                        s.server_type == ServerType::RSPrimary
                            || s.server_type == ServerType::RSSecondary
                    })
                    .collect();
                self.filter_by_tags(read_pref, self.filter_by_staleness(read_pref, members))
            }
        }
    }

    // Drops servers estimated to lag more than maxStalenessSeconds.
    fn filter_by_staleness<'a>(
        &self,
        read_pref: &ReadPreference,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        let max_staleness_ms = match read_pref.max_staleness_seconds {
            Some(seconds) => seconds.saturating_mul(1000),
            None => return servers,
        };

        servers
            .into_iter()
            .filter(|s| {
                s.server_type == ServerType::RSPrimary
                    || self.secondary_staleness_ms(s) <= max_staleness_ms
            })
            .collect()
    }

    // Uses the first tag set that matches at least one server.
    fn filter_by_tags<'a>(
        &self,
        read_pref: &ReadPreference,
        servers: Vec<&'a ServerDescription>,
    ) -> Vec<&'a ServerDescription> {
        if read_pref.tag_sets.is_empty() {
            return servers;
        }

        for tag_set in &read_pref.tag_sets {
            let matching: Vec<&ServerDescription> = servers
                .iter()
                .cloned()
                .filter(|s| tag_set_matches(tag_set, &s.tags))
                .collect();
            if !matching.is_empty() {
                return matching;
            }
        }

        Vec::new()
    }
}
