//! Connection pooling for a single MongoDB server.
//!
//! Checkouts are admitted in FIFO order: every caller takes a ticket in the
//! wait queue and only the caller at the front of the queue may take an idle
//! connection or open a new one. Clearing the pool bumps its generation;
//! connections from older generations are closed the next time the pool
//! touches them.
pub mod conn;
pub mod options;

pub use self::conn::{Connection, PooledConnection};
pub use self::options::{ConnectionPoolOptions, DEFAULT_MAX_POOL_SIZE};

use crate::error::{Error, Result};
use crate::event::cmap::*;
use crate::event::EventListener;
use crate::host::Host;
use crate::stream::StreamConnector;

use slog::{debug, info, o, Drain, Logger};

use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

// Waiters re-check for admission at least this often.
const WAIT_QUEUE_INTERVAL: Duration = Duration::from_millis(10);

/// Handles threaded connections to a MongoDB server.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    address: Host,
    options: ConnectionPoolOptions,
    state: Mutex<PoolState>,
    // Signalled whenever a connection is returned, a slot frees up, the
    // front of the wait queue changes or the pool closes.
    wait_lock: Condvar,
    connector: Arc<dyn StreamConnector>,
    events: Arc<EventListener<CmapEvent>>,
    log: Logger,
}

struct PoolState {
    // Bumped by every clear.
    generation: u32,
    idle: VecDeque<Connection>,
    // Open connections, idle or checked out, plus those being established.
    total: usize,
    wait_queue: VecDeque<u64>,
    next_ticket: u64,
    next_connection_id: u32,
    closed: bool,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.address)
            .finish()
    }
}

impl ConnectionPool {
    /// Creates a pool with its own event listener.
    pub fn new(
        address: Host,
        options: ConnectionPoolOptions,
        connector: Arc<dyn StreamConnector>,
    ) -> ConnectionPool {
        ConnectionPool::with_listener(address, options, connector, Arc::new(EventListener::new()))
    }

    /// Creates a pool that publishes to a shared event listener.
    pub fn with_listener(
        address: Host,
        options: ConnectionPoolOptions,
        connector: Arc<dyn StreamConnector>,
        events: Arc<EventListener<CmapEvent>>,
    ) -> ConnectionPool {
        let log = options
            .logger
            .clone()
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()))
            .new(o!("address" => address.to_string()));

        let pool = ConnectionPool {
            inner: Arc::new(PoolInner {
                address: address.clone(),
                state: Mutex::new(PoolState {
                    generation: 0,
                    idle: VecDeque::new(),
                    total: 0,
                    wait_queue: VecDeque::new(),
                    next_ticket: 0,
                    next_connection_id: 1,
                    closed: false,
                }),
                wait_lock: Condvar::new(),
                connector,
                events,
                log,
                options,
            }),
        };

        debug!(pool.inner.log, "connection pool created");
        pool.emit_event(|| {
            CmapEvent::PoolCreated(PoolCreatedEvent {
                address,
                max_pool_size: pool.inner.options.max_pool_size,
                min_pool_size: pool.inner.options.min_pool_size,
            })
        });

        pool
    }

    pub fn address(&self) -> &Host {
        &self.inner.address
    }

    pub fn options(&self) -> &ConnectionPoolOptions {
        &self.inner.options
    }

    /// Returns a receiver for the events of this pool.
    pub fn subscribe(&self) -> Receiver<CmapEvent> {
        self.inner.events.subscribe()
    }

    fn emit_event<F>(&self, make: F)
    where
        F: FnOnce() -> CmapEvent,
    {
        self.inner.events.emit_event(make)
    }

    /// The current generation.
    pub fn generation(&self) -> Result<u32> {
        Ok(self.inner.state.lock()?.generation)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    /// Open connections, checked out or idle.
    pub fn total_connection_count(&self) -> Result<usize> {
        Ok(self.inner.state.lock()?.total)
    }

    /// Idle connections ready for checkout.
    pub fn available_connection_count(&self) -> Result<usize> {
        Ok(self.inner.state.lock()?.idle.len())
    }

    /// Callers currently waiting in `check_out`.
    pub fn wait_queue_len(&self) -> Result<usize> {
        Ok(self.inner.state.lock()?.wait_queue.len())
    }

    /// Attempts to check out a connection. If none are idle and the pool has
    /// not reached its maximum size, a new connection is opened. Otherwise,
    /// the caller waits in line until a connection is returned, the wait
    /// queue timeout elapses, or the pool is closed.
    pub fn check_out(&self) -> Result<PooledConnection> {
        self.emit_event(|| {
            CmapEvent::ConnectionCheckOutStarted(ConnectionCheckOutStartedEvent {
                address: self.inner.address.clone(),
            })
        });

        let deadline = match self.inner.options.wait_queue_timeout_ms {
            0 => None,
            ms => Some(Instant::now() + Duration::from_millis(ms)),
        };

        let mut state = self.inner.state.lock()?;
        let mut ticket = state.next_ticket;
        state.next_ticket += 1;
        state.wait_queue.push_back(ticket);

        loop {
            if state.closed {
                leave_queue(&mut state, ticket);
                drop(state);
                self.inner.wait_lock.notify_all();
                return Err(self.checkout_failed(ConnectionCheckoutFailedReason::PoolClosed));
            }

            if state.wait_queue.front() == Some(&ticket) {
                while let Some(mut conn) = state.idle.pop_back() {
                    if let Some(reason) = self.perished(&state, &conn) {
                        state.total -= 1;
                        self.close_connection(conn, reason);
                        continue;
                    }

                    state.wait_queue.pop_front();
                    drop(state);
                    self.inner.wait_lock.notify_all();

                    conn.last_used = Instant::now();
                    return Ok(self.checked_out(conn));
                }

                let max = self.inner.options.max_pool_size;
                if max == 0 || state.total < max {
                    let (id, generation) = reserve_slot(&mut state);
                    state.wait_queue.pop_front();
                    drop(state);
                    self.inner.wait_lock.notify_all();

                    let conn = match self.establish(id, generation) {
                        Ok(conn) => conn,
                        Err(err) => {
                            self.release_slot();
                            self.emit_event(|| {
                                CmapEvent::ConnectionCheckOutFailed(ConnectionCheckOutFailedEvent {
                                    address: self.inner.address.clone(),
                                    reason: ConnectionCheckoutFailedReason::ConnectionError,
                                })
                            });
                            return Err(err);
                        }
                    };

                    // The pool may have been cleared or closed while connecting.
                    state = self.inner.state.lock()?;
                    if !state.closed && conn.generation == state.generation {
                        drop(state);
                        return Ok(self.checked_out(conn));
                    }

                    let reason = if state.closed {
                        ConnectionClosedReason::PoolClosed
                    } else {
                        ConnectionClosedReason::Stale
                    };
                    state.total -= 1;
                    self.close_connection(conn, reason);

                    ticket = state.next_ticket;
                    state.next_ticket += 1;
                    state.wait_queue.push_front(ticket);
                    continue;
                }
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        leave_queue(&mut state, ticket);
                        drop(state);
                        self.inner.wait_lock.notify_all();
                        return Err(self.checkout_failed(ConnectionCheckoutFailedReason::Timeout));
                    }
                    (deadline - now).min(WAIT_QUEUE_INTERVAL)
                }
                None => WAIT_QUEUE_INTERVAL,
            };

            state = self.inner.wait_lock.wait_timeout(state, wait)?.0;
        }
    }

    /// Returns a connection to the pool. Connections from an older
    /// generation, errored connections and connections returned to a closed
    /// pool are closed instead.
    pub fn check_in(&self, mut conn: Connection) {
        self.emit_event(|| {
            CmapEvent::ConnectionCheckedIn(ConnectionCheckedInEvent {
                address: self.inner.address.clone(),
                connection_id: conn.id,
            })
        });

        let mut state = match self.inner.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };

        let reason = if state.closed {
            Some(ConnectionClosedReason::PoolClosed)
        } else if conn.generation != state.generation {
            Some(ConnectionClosedReason::Stale)
        } else if conn.errored {
            Some(ConnectionClosedReason::Error)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                state.total -= 1;
                self.close_connection(conn, reason);
            }
            None => {
                conn.last_used = Instant::now();
                state.idle.push_back(conn);
            }
        }

        drop(state);
        self.inner.wait_lock.notify_all();
    }

    /// Invalidates every connection created so far. Idle connections are
    /// closed on their next checkout, checked-out ones on check-in. Waiting
    /// callers stay queued.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.inner.state.lock()?;
        if state.closed {
            return Ok(());
        }
        state.generation += 1;

        let generation = state.generation;
        info!(self.inner.log, "connection pool cleared"; "generation" => generation);
        self.emit_event(|| {
            CmapEvent::PoolCleared(PoolClearedEvent {
                address: self.inner.address.clone(),
                generation,
            })
        });
        Ok(())
    }

    /// Closes the pool. Idle connections are closed, waiting callers fail
    /// with `PoolClosed` and checked-out connections are closed on check-in.
    pub fn close(&self) -> Result<()> {
        let mut state = self.inner.state.lock()?;
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let idle: Vec<Connection> = state.idle.drain(..).collect();
        state.total -= idle.len();
        for conn in idle {
            self.close_connection(conn, ConnectionClosedReason::PoolClosed);
        }

        info!(self.inner.log, "connection pool closed");
        self.emit_event(|| {
            CmapEvent::PoolClosed(PoolClosedEvent {
                address: self.inner.address.clone(),
            })
        });

        drop(state);
        self.inner.wait_lock.notify_all();
        Ok(())
    }

    /// Opens connections until the pool holds `min_pool_size` of them.
    pub fn ensure_min_size(&self) -> Result<()> {
        let min = self.inner.options.min_pool_size;

        loop {
            let (id, generation) = {
                let mut state = self.inner.state.lock()?;
                self.prune_idle(&mut state);
                if state.closed || state.total >= min {
                    return Ok(());
                }
                reserve_slot(&mut state)
            };

            match self.establish(id, generation) {
                Ok(conn) => self.return_idle(conn),
                Err(err) => {
                    self.release_slot();
                    return Err(err);
                }
            }
        }
    }

    // Returns the reason an idle connection can no longer be handed out.
    fn perished(&self, state: &PoolState, conn: &Connection) -> Option<ConnectionClosedReason> {
        let max_idle = self.inner.options.max_idle_time_ms;
        if conn.generation != state.generation {
            Some(ConnectionClosedReason::Stale)
        } else if max_idle > 0 && conn.last_used.elapsed() > Duration::from_millis(max_idle) {
            Some(ConnectionClosedReason::Idle)
        } else {
            None
        }
    }

    // Closes stale and expired idle connections.
    fn prune_idle(&self, state: &mut PoolState) {
        let mut kept = VecDeque::with_capacity(state.idle.len());
        while let Some(conn) = state.idle.pop_front() {
            match self.perished(state, &conn) {
                Some(reason) => {
                    state.total -= 1;
                    self.close_connection(conn, reason);
                }
                None => kept.push_back(conn),
            }
        }
        state.idle = kept;
    }

    // Opens a new connection in a slot reserved by the caller.
    fn establish(&self, id: u32, generation: u32) -> Result<Connection> {
        let address = &self.inner.address;

        self.emit_event(|| {
            CmapEvent::ConnectionCreated(ConnectionCreatedEvent {
                address: address.clone(),
                connection_id: id,
            })
        });

        let stream = match self.inner.connector.connect(address) {
            Ok(stream) => stream,
            Err(err) => {
                debug!(self.inner.log, "failed to open connection"; "id" => id, "error" => %err);
                self.emit_event(|| {
                    CmapEvent::ConnectionClosed(ConnectionClosedEvent {
                        address: address.clone(),
                        connection_id: id,
                        reason: ConnectionClosedReason::Error,
                    })
                });
                return Err(Error::ConnectionError(address.clone(), err));
            }
        };

        debug!(self.inner.log, "connection ready"; "id" => id, "generation" => generation);
        self.emit_event(|| {
            CmapEvent::ConnectionReady(ConnectionReadyEvent {
                address: address.clone(),
                connection_id: id,
            })
        });

        Ok(Connection::new(id, address.clone(), generation, stream))
    }

    // Gives back a slot whose connection could not be opened.
    fn release_slot(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.total -= 1;
        }
        self.inner.wait_lock.notify_all();
    }

    // Adds a freshly opened background connection to the idle set.
    fn return_idle(&self, conn: Connection) {
        let mut state = match self.inner.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };

        if state.closed || conn.generation != state.generation {
            let reason = if state.closed {
                ConnectionClosedReason::PoolClosed
            } else {
                ConnectionClosedReason::Stale
            };
            state.total -= 1;
            self.close_connection(conn, reason);
        } else {
            state.idle.push_front(conn);
        }

        drop(state);
        self.inner.wait_lock.notify_all();
    }

    fn checked_out(&self, conn: Connection) -> PooledConnection {
        self.emit_event(|| {
            CmapEvent::ConnectionCheckedOut(ConnectionCheckedOutEvent {
                address: self.inner.address.clone(),
                connection_id: conn.id,
            })
        });
        PooledConnection::new(conn, self.clone())
    }

    fn checkout_failed(&self, reason: ConnectionCheckoutFailedReason) -> Error {
        debug!(self.inner.log, "checkout failed"; "reason" => reason.as_str());
        self.emit_event(|| {
            CmapEvent::ConnectionCheckOutFailed(ConnectionCheckOutFailedEvent {
                address: self.inner.address.clone(),
                reason,
            })
        });

        match reason {
            ConnectionCheckoutFailedReason::Timeout => {
                Error::WaitQueueTimeout(self.inner.address.clone())
            }
            _ => Error::PoolClosed(self.inner.address.clone()),
        }
    }

    fn close_connection(&self, conn: Connection, reason: ConnectionClosedReason) {
        debug!(self.inner.log, "closing connection"; "id" => conn.id, "reason" => reason.as_str());
        self.emit_event(|| {
            CmapEvent::ConnectionClosed(ConnectionClosedEvent {
                address: self.inner.address.clone(),
                connection_id: conn.id,
                reason,
            })
        });
    }
}

// Removes a waiter's ticket without disturbing the order of the others.
fn leave_queue(state: &mut PoolState, ticket: u64) {
    if let Some(pos) = state.wait_queue.iter().position(|t| *t == ticket) {
        state.wait_queue.remove(pos);
    }
}

// Counts a connection that is about to be opened against the pool size.
fn reserve_slot(state: &mut PoolState) -> (u32, u32) {
    let id = state.next_connection_id;
    state.next_connection_id += 1;
    state.total += 1;
    (id, state.generation)
}
