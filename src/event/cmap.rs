//! Connection pool events.
use crate::host::Host;

use std::fmt::{self, Display, Formatter};

/// Why a connection was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionClosedReason {
    /// The connection sat idle longer than `max_idle_time_ms`.
    Idle,
    /// The connection was marked errored while checked out.
    Error,
    /// The connection belongs to a generation the pool has since cleared.
    Stale,
    /// The pool was closed.
    PoolClosed,
}

/// Why a checkout failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionCheckoutFailedReason {
    Timeout,
    PoolClosed,
    ConnectionError,
}

impl ConnectionClosedReason {
    pub fn as_str(&self) -> &'static str {
        match *self {
            ConnectionClosedReason::Idle => "idle",
            ConnectionClosedReason::Error => "error",
            ConnectionClosedReason::Stale => "stale",
            ConnectionClosedReason::PoolClosed => "poolClosed",
        }
    }
}

impl ConnectionCheckoutFailedReason {
    pub fn as_str(&self) -> &'static str {
        match *self {
            ConnectionCheckoutFailedReason::Timeout => "timeout",
            ConnectionCheckoutFailedReason::PoolClosed => "poolClosed",
            ConnectionCheckoutFailedReason::ConnectionError => "connectionError",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoolCreatedEvent {
    pub address: Host,
    pub max_pool_size: usize,
    pub min_pool_size: usize,
}

#[derive(Clone, Debug)]
pub struct PoolClearedEvent {
    pub address: Host,
    /// The generation in effect after the clear.
    pub generation: u32,
}

#[derive(Clone, Debug)]
pub struct PoolClosedEvent {
    pub address: Host,
}

#[derive(Clone, Debug)]
pub struct ConnectionCreatedEvent {
    pub address: Host,
    pub connection_id: u32,
}

#[derive(Clone, Debug)]
pub struct ConnectionReadyEvent {
    pub address: Host,
    pub connection_id: u32,
}

#[derive(Clone, Debug)]
pub struct ConnectionClosedEvent {
    pub address: Host,
    pub connection_id: u32,
    pub reason: ConnectionClosedReason,
}

#[derive(Clone, Debug)]
pub struct ConnectionCheckOutStartedEvent {
    pub address: Host,
}

#[derive(Clone, Debug)]
pub struct ConnectionCheckOutFailedEvent {
    pub address: Host,
    pub reason: ConnectionCheckoutFailedReason,
}

#[derive(Clone, Debug)]
pub struct ConnectionCheckedOutEvent {
    pub address: Host,
    pub connection_id: u32,
}

#[derive(Clone, Debug)]
pub struct ConnectionCheckedInEvent {
    pub address: Host,
    pub connection_id: u32,
}

#[derive(Clone, Debug)]
pub enum CmapEvent {
    PoolCreated(PoolCreatedEvent),
    PoolCleared(PoolClearedEvent),
    PoolClosed(PoolClosedEvent),
    ConnectionCreated(ConnectionCreatedEvent),
    ConnectionReady(ConnectionReadyEvent),
    ConnectionClosed(ConnectionClosedEvent),
    ConnectionCheckOutStarted(ConnectionCheckOutStartedEvent),
    ConnectionCheckOutFailed(ConnectionCheckOutFailedEvent),
    ConnectionCheckedOut(ConnectionCheckedOutEvent),
    ConnectionCheckedIn(ConnectionCheckedInEvent),
}

impl CmapEvent {
    /// The server whose pool emitted the event.
    pub fn address(&self) -> &Host {
        match *self {
            CmapEvent::PoolCreated(ref e) => &e.address,
            CmapEvent::PoolCleared(ref e) => &e.address,
            CmapEvent::PoolClosed(ref e) => &e.address,
            CmapEvent::ConnectionCreated(ref e) => &e.address,
            CmapEvent::ConnectionReady(ref e) => &e.address,
            CmapEvent::ConnectionClosed(ref e) => &e.address,
            CmapEvent::ConnectionCheckOutStarted(ref e) => &e.address,
            CmapEvent::ConnectionCheckOutFailed(ref e) => &e.address,
            CmapEvent::ConnectionCheckedOut(ref e) => &e.address,
            CmapEvent::ConnectionCheckedIn(ref e) => &e.address,
        }
    }
}

impl Display for CmapEvent {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        match *self {
            CmapEvent::PoolCreated(ref e) => write!(
                fmt,
                "POOL {} CREATED (min {}, max {})",
                e.address, e.min_pool_size, e.max_pool_size
            ),
            CmapEvent::PoolCleared(ref e) => {
                write!(fmt, "POOL {} CLEARED (generation {})", e.address, e.generation)
            }
            CmapEvent::PoolClosed(ref e) => write!(fmt, "POOL {} CLOSED", e.address),
            CmapEvent::ConnectionCreated(ref e) => {
                write!(fmt, "CONNECTION {}#{} CREATED", e.address, e.connection_id)
            }
            CmapEvent::ConnectionReady(ref e) => {
                write!(fmt, "CONNECTION {}#{} READY", e.address, e.connection_id)
            }
            CmapEvent::ConnectionClosed(ref e) => write!(
                fmt,
                "CONNECTION {}#{} CLOSED: {}",
                e.address,
                e.connection_id,
                e.reason.as_str()
            ),
            CmapEvent::ConnectionCheckOutStarted(ref e) => {
                write!(fmt, "CHECKOUT {} STARTED", e.address)
            }
            CmapEvent::ConnectionCheckOutFailed(ref e) => {
                write!(fmt, "CHECKOUT {} FAILED: {}", e.address, e.reason.as_str())
            }
            CmapEvent::ConnectionCheckedOut(ref e) => {
                write!(fmt, "CONNECTION {}#{} CHECKED OUT", e.address, e.connection_id)
            }
            CmapEvent::ConnectionCheckedIn(ref e) => {
                write!(fmt, "CONNECTION {}#{} CHECKED IN", e.address, e.connection_id)
            }
        }
    }
}
