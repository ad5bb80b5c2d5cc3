//! MongoDB server set topology and selection.
//!
//! A `Topology` owns the current `TopologyDescription` snapshot, one
//! connection pool per tracked server and, once monitoring is started, one
//! monitor thread per server. Snapshots are immutable; `update` builds a new
//! one and publishes it atomically.
pub mod description;
pub mod monitor;
pub mod options;
pub mod selection;
pub mod server;

pub use self::description::{
    TopologyDescription, TopologyType, DEFAULT_HEARTBEAT_FREQUENCY_MS, DEFAULT_LOCAL_THRESHOLD_MS,
    MAX_SUPPORTED_WIRE_VERSION, MIN_SUPPORTED_WIRE_VERSION,
};
pub use self::monitor::{Heartbeat, IsMasterResult, MonitorHandle};
pub use self::options::{TopologyOptions, DEFAULT_SERVER_SELECTION_TIMEOUT_MS};
pub use self::selection::SMALLEST_MAX_STALENESS_SECONDS;
pub use self::server::{ServerDescription, ServerType};

use crate::common::ReadPreference;
use crate::error::{Error, Result};
use crate::event::cmap::CmapEvent;
use crate::event::sdam::*;
use crate::event::EventListener;
use crate::host::Host;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::stream::{StreamConnector, TcpConnector};

use slog::{debug, info, o, warn, Drain, Logger};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use self::monitor::Monitor;
use self::server::Server;

static NEXT_TOPOLOGY_ID: AtomicU64 = AtomicU64::new(1);

/// Holds status and connection information about a server set.
#[derive(Clone)]
pub struct Topology {
    inner: Arc<TopologyInner>,
}

/// A non-owning reference to a topology, held by its monitors.
#[derive(Clone)]
pub struct WeakTopology {
    inner: Weak<TopologyInner>,
}

impl WeakTopology {
    pub fn upgrade(&self) -> Option<Topology> {
        self.inner.upgrade().map(|inner| Topology { inner })
    }
}

struct TopologyInner {
    id: u64,
    options: TopologyOptions,
    description: RwLock<Arc<TopologyDescription>>,
    // Held for the whole of an update so that updates apply in a total order.
    update_lock: Mutex<()>,
    // Counts published snapshots; selection waiters sleep on the condvar.
    changed: Mutex<u64>,
    changed_cond: Condvar,
    servers: RwLock<HashMap<Host, Server>>,
    sdam_events: EventListener<SdamEvent>,
    cmap_events: Arc<EventListener<CmapEvent>>,
    connector: Arc<dyn StreamConnector>,
    heartbeat: Mutex<Option<Arc<dyn Heartbeat>>>,
    closed: AtomicBool,
    log: Logger,
}

impl Topology {
    /// Creates a topology that opens plain TCP connections.
    pub fn new(options: TopologyOptions) -> Result<Topology> {
        Topology::with_connector(options, Arc::new(TcpConnector::new()))
    }

    /// Creates a topology whose pools open streams through `connector`.
    ///
    /// Every seed starts out Unknown. The topology type is Single for a
    /// direct connection, ReplicaSetNoPrimary when a set name is configured
    /// and Unknown otherwise.
    pub fn with_connector(
        options: TopologyOptions,
        connector: Arc<dyn StreamConnector>,
    ) -> Result<Topology> {
        options.validate()?;

        let id = NEXT_TOPOLOGY_ID.fetch_add(1, Ordering::SeqCst);
        let log = options
            .logger
            .clone()
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()))
            .new(o!("topology_id" => id));

        let topology_type = if options.direct_connection {
            TopologyType::Single
        } else if options.set_name.is_some() {
            TopologyType::ReplicaSetNoPrimary
        } else {
            TopologyType::Unknown
        };

        let description = TopologyDescription::new(
            topology_type,
            options.set_name.clone(),
            options.hosts.iter().cloned(),
        )
        .with_heartbeat_frequency_ms(options.heartbeat_frequency_ms)
        .with_local_threshold_ms(options.local_threshold_ms);

        let topology = Topology {
            inner: Arc::new(TopologyInner {
                id,
                description: RwLock::new(Arc::new(description)),
                update_lock: Mutex::new(()),
                changed: Mutex::new(0),
                changed_cond: Condvar::new(),
                servers: RwLock::new(HashMap::new()),
                sdam_events: EventListener::new(),
                cmap_events: Arc::new(EventListener::new()),
                connector,
                heartbeat: Mutex::new(None),
                closed: AtomicBool::new(false),
                log,
                options,
            }),
        };

        info!(topology.inner.log, "topology opening"; "type" => topology_type.as_str());
        topology.emit_event(|| SdamEvent::TopologyOpening(TopologyOpeningEvent { topology_id: id }));

        {
            let mut servers = topology.inner.servers.write()?;
            for host in &topology.inner.options.hosts {
                if !servers.contains_key(host) {
                    let server = topology.open_server(host);
                    servers.insert(host.clone(), server);
                }
            }
        }

        Ok(topology)
    }

    pub fn downgrade(&self) -> WeakTopology {
        WeakTopology {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn options(&self) -> &TopologyOptions {
        &self.inner.options
    }

    /// Returns the current snapshot.
    pub fn description(&self) -> Arc<TopologyDescription> {
        match self.inner.description.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn heartbeat_frequency_ms(&self) -> u64 {
        self.inner.options.heartbeat_frequency_ms
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns a receiver for topology and heartbeat events.
    pub fn subscribe_sdam(&self) -> Receiver<SdamEvent> {
        self.inner.sdam_events.subscribe()
    }

    /// Returns a receiver for the events of every server's connection pool.
    pub fn subscribe_cmap(&self) -> Receiver<CmapEvent> {
        self.inner.cmap_events.subscribe()
    }

    pub(crate) fn emit_event<F>(&self, make: F)
    where
        F: FnOnce() -> SdamEvent,
    {
        self.inner.sdam_events.emit_event(make)
    }

    // Creates the pool for a newly tracked server, starting its monitor if
    // monitoring is running.
    fn open_server(&self, host: &Host) -> Server {
        let mut pool_options = self.inner.options.pool.clone();
        if pool_options.logger.is_none() {
            pool_options.logger = Some(self.inner.log.clone());
        }

        let pool = ConnectionPool::with_listener(
            host.clone(),
            pool_options,
            self.inner.connector.clone(),
            self.inner.cmap_events.clone(),
        );

        debug!(self.inner.log, "server opening"; "address" => %host);
        self.emit_event(|| SdamEvent::ServerOpening(ServerOpeningEvent { address: host.clone() }));

        let mut server = Server::new(host.clone(), pool);
        let heartbeat = self.inner.heartbeat.lock().ok().and_then(|hb| hb.clone());
        if let Some(heartbeat) = heartbeat {
            server.set_monitor(self.spawn_monitor(host, heartbeat));
        }
        server
    }

    fn spawn_monitor(&self, host: &Host, heartbeat: Arc<dyn Heartbeat>) -> MonitorHandle {
        let log = self.inner.log.new(o!("address" => host.to_string()));
        Monitor::start(host.clone(), self.downgrade(), heartbeat, log)
    }

    /// Starts one monitor thread per tracked server. Servers discovered later
    /// are monitored as soon as they are added.
    pub fn start_monitoring(&self, heartbeat: Arc<dyn Heartbeat>) -> Result<()> {
        *self.inner.heartbeat.lock()? = Some(heartbeat.clone());

        let mut servers = self.inner.servers.write()?;
        for (host, server) in servers.iter_mut() {
            if server.monitor().map_or(true, |m| !m.is_running()) {
                server.set_monitor(self.spawn_monitor(host, heartbeat.clone()));
            }
        }
        Ok(())
    }

    /// Wakes every monitor so that servers are checked immediately.
    pub fn request_immediate_check(&self) {
        if let Ok(servers) = self.inner.servers.read() {
            for server in servers.values() {
                if let Some(monitor) = server.monitor() {
                    monitor.request_check();
                }
            }
        }
    }

    /// Applies a server description and publishes the resulting snapshot.
    ///
    /// Pools are opened for servers the topology starts tracking and closed
    /// for servers it drops. Waiting selections are woken.
    pub fn update(&self, server_description: ServerDescription) -> Result<Arc<TopologyDescription>> {
        let _guard = self.inner.update_lock.lock()?;

        let previous = self.description();
        if self.is_closed() {
            return Ok(previous);
        }

        let address = server_description.address.clone();
        let next = Arc::new(previous.update(server_description));
        if *next == *previous {
            return Ok(previous);
        }

        *self.inner.description.write()? = next.clone();
        self.sync_servers(&next)?;

        if let (Some(old), Some(new)) = (previous.server(&address), next.server(&address)) {
            if old != new {
                self.emit_event(|| {
                    SdamEvent::ServerDescriptionChanged(ServerDescriptionChangedEvent {
                        address: address.clone(),
                        previous_description: old.clone(),
                        new_description: new.clone(),
                    })
                });
            }
        }

        if previous.topology_type != next.topology_type {
            info!(self.inner.log, "topology type changed";
                  "from" => previous.topology_type.as_str(),
                  "to" => next.topology_type.as_str());
        }

        self.emit_event(|| {
            SdamEvent::TopologyDescriptionChanged(TopologyDescriptionChangedEvent {
                topology_id: self.inner.id,
                previous_description: previous.clone(),
                new_description: next.clone(),
            })
        });

        self.notify_changed();
        Ok(next)
    }

    // Opens servers new to the snapshot and closes the ones it dropped.
    fn sync_servers(&self, description: &TopologyDescription) -> Result<()> {
        let mut servers = self.inner.servers.write()?;

        for host in description.servers.keys() {
            if !servers.contains_key(host) {
                let server = self.open_server(host);
                servers.insert(host.clone(), server);
            }
        }

        let removed: Vec<Host> = servers
            .keys()
            .filter(|host| !description.servers.contains_key(host))
            .cloned()
            .collect();

        for host in removed {
            if let Some(server) = servers.remove(&host) {
                self.close_server(server);
            }
        }

        Ok(())
    }

    fn close_server(&self, server: Server) {
        if let Some(monitor) = server.monitor() {
            monitor.stop();
        }
        if let Err(err) = server.pool.close() {
            warn!(self.inner.log, "failed to close pool"; "address" => %server.host, "error" => %err);
        }
        debug!(self.inner.log, "server closed"; "address" => %server.host);
        self.emit_event(|| {
            SdamEvent::ServerClosed(ServerClosedEvent {
                address: server.host.clone(),
            })
        });
    }

    fn notify_changed(&self) {
        if let Ok(mut version) = self.inner.changed.lock() {
            *version += 1;
        }
        self.inner.changed_cond.notify_all();
    }

    /// Selects a server for a read, retrying against newer snapshots until
    /// `server_selection_timeout_ms` elapses.
    pub fn select_server(&self, read_pref: &ReadPreference) -> Result<Host> {
        let timeout = Duration::from_millis(self.inner.options.server_selection_timeout_ms);
        self.select_server_with_deadline(read_pref, Instant::now() + timeout)
    }

    /// Like `select_server`, but gives up at the caller's own deadline.
    pub fn select_server_with_deadline(
        &self,
        read_pref: &ReadPreference,
        deadline: Instant,
    ) -> Result<Host> {
        self.select_until(deadline, |description| description.select_server(read_pref))
    }

    /// Selects a writable server, retrying until `server_selection_timeout_ms` elapses.
    pub fn select_server_for_write(&self) -> Result<Host> {
        let timeout = Duration::from_millis(self.inner.options.server_selection_timeout_ms);
        self.select_until(Instant::now() + timeout, |description| {
            description.select_server_for_write()
        })
    }

    // Runs `select` against each new snapshot until it succeeds, fails with a
    // non-retryable error, or the deadline passes.
    fn select_until<F>(&self, deadline: Instant, select: F) -> Result<Host>
    where
        F: Fn(&TopologyDescription) -> Result<Host>,
    {
        loop {
            let seen = *self.inner.changed.lock()?;

            let err = match select(&*self.description()) {
                Ok(host) => return Ok(host),
                Err(err) => err,
            };

            if !err.is_retryable_selection() {
                return Err(err);
            }

            if self.is_closed() {
                return Err(Error::ServerSelectionTimeout(format!("topology closed: {}", err)));
            }

            self.request_immediate_check();

            let mut version = self.inner.changed.lock()?;
            while *version == seen {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::ServerSelectionTimeout(err.to_string()));
                }
                version = self.inner.changed_cond.wait_timeout(version, deadline - now)?.0;
            }
        }
    }

    fn pool(&self, host: &Host) -> Result<ConnectionPool> {
        match self.inner.servers.read()?.get(host) {
            Some(server) => Ok(server.pool.clone()),
            None => Err(Error::NoServerAvailable(format!(
                "{} is not part of the topology",
                host
            ))),
        }
    }

    /// Checks out a connection to `host`, waiting in its pool's queue if needed.
    pub fn check_out(&self, host: &Host) -> Result<PooledConnection> {
        self.pool(host)?.check_out()
    }

    /// Returns a connection to its pool.
    pub fn check_in(&self, conn: PooledConnection) {
        conn.check_in();
    }

    /// Invalidates every pooled connection to `host`.
    pub fn clear(&self, host: &Host) -> Result<()> {
        self.pool(host)?.clear()
    }

    /// Closes the pool for `host`. The server stays in the topology.
    pub fn close(&self, host: &Host) -> Result<()> {
        self.pool(host)?.close()
    }

    /// Opens connections to `host` up to the pool's minimum size.
    pub fn ensure_min_pool_size(&self, host: &Host) -> Result<()> {
        self.pool(host)?.ensure_min_size()
    }

    /// Stops every monitor, closes every pool and fails pending selections.
    pub fn close_all(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let servers: Vec<Server> = {
            let _guard = self.inner.update_lock.lock()?;
            let mut servers = self.inner.servers.write()?;
            servers.drain().map(|(_, server)| server).collect()
        };

        for server in servers {
            self.close_server(server);
        }

        info!(self.inner.log, "topology closed");
        self.emit_event(|| {
            SdamEvent::TopologyClosed(TopologyClosedEvent {
                topology_id: self.inner.id,
            })
        });

        self.notify_changed();
        Ok(())
    }

    /// Reacts to an error observed while running an operation on a
    /// connection from `host` created in pool generation `generation`.
    ///
    /// Errors from connections older than the pool's generation are ignored.
    /// Network errors other than timeouts mark the server Unknown and clear
    /// its pool. "Not primary" and "node is recovering" errors mark the
    /// server Unknown and request an immediate check; the pool is also cleared
    /// when the server is shutting down or predates wire version 8.
    pub fn handle_application_error(&self, host: &Host, generation: u32, err: &Error) -> Result<()> {
        let (pool, monitor) = {
            let servers = self.inner.servers.read()?;
            match servers.get(host) {
                Some(server) => (server.pool.clone(), server.monitor().cloned()),
                None => return Ok(()),
            }
        };

        if generation < pool.generation()? {
            debug!(self.inner.log, "ignoring error from stale connection";
                   "address" => %host, "error" => %err);
            return Ok(());
        }

        if err.is_network_error() {
            if !err.is_network_timeout() {
                warn!(self.inner.log, "network error"; "address" => %host, "error" => %err);
                self.update(ServerDescription::with_error(host.clone(), err))?;
                pool.clear()?;
            }
        } else if err.is_state_change_error() {
            let max_wire_version = self
                .description()
                .server(host)
                .map_or(0, |s| s.max_wire_version);

            if max_wire_version <= 7 || err.is_shutting_down() {
                pool.clear()?;
            }

            warn!(self.inner.log, "server state changed"; "address" => %host, "error" => %err);
            self.update(ServerDescription::with_error(host.clone(), err))?;

            if let Some(monitor) = monitor {
                monitor.request_check();
            }
        }

        Ok(())
    }
}
