//! Server discovery and monitoring events.
use crate::host::Host;
use crate::topology::{ServerDescription, TopologyDescription};

use bson::Document;

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct TopologyOpeningEvent {
    pub topology_id: u64,
}

#[derive(Clone, Debug)]
pub struct TopologyClosedEvent {
    pub topology_id: u64,
}

/// Published after every update that changed the topology snapshot.
#[derive(Clone, Debug)]
pub struct TopologyDescriptionChangedEvent {
    pub topology_id: u64,
    pub previous_description: Arc<TopologyDescription>,
    pub new_description: Arc<TopologyDescription>,
}

#[derive(Clone, Debug)]
pub struct ServerOpeningEvent {
    pub address: Host,
}

#[derive(Clone, Debug)]
pub struct ServerClosedEvent {
    pub address: Host,
}

#[derive(Clone, Debug)]
pub struct ServerDescriptionChangedEvent {
    pub address: Host,
    pub previous_description: ServerDescription,
    pub new_description: ServerDescription,
}

#[derive(Clone, Debug)]
pub struct ServerHeartbeatStartedEvent {
    pub address: Host,
}

#[derive(Clone, Debug)]
pub struct ServerHeartbeatSucceededEvent {
    pub address: Host,
    pub duration_ms: f64,
    pub reply: Document,
}

#[derive(Clone, Debug)]
pub struct ServerHeartbeatFailedEvent {
    pub address: Host,
    pub failure: String,
}

#[derive(Clone, Debug)]
pub enum SdamEvent {
    TopologyOpening(TopologyOpeningEvent),
    TopologyClosed(TopologyClosedEvent),
    TopologyDescriptionChanged(TopologyDescriptionChangedEvent),
    ServerOpening(ServerOpeningEvent),
    ServerClosed(ServerClosedEvent),
    ServerDescriptionChanged(ServerDescriptionChangedEvent),
    ServerHeartbeatStarted(ServerHeartbeatStartedEvent),
    ServerHeartbeatSucceeded(ServerHeartbeatSucceededEvent),
    ServerHeartbeatFailed(ServerHeartbeatFailedEvent),
}

impl Display for SdamEvent {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        match *self {
            SdamEvent::TopologyOpening(ref e) => write!(fmt, "TOPOLOGY.{} OPENING", e.topology_id),
            SdamEvent::TopologyClosed(ref e) => write!(fmt, "TOPOLOGY.{} CLOSED", e.topology_id),
            SdamEvent::TopologyDescriptionChanged(ref e) => write!(
                fmt,
                "TOPOLOGY.{} CHANGED: {} -> {}",
                e.topology_id,
                e.previous_description.topology_type.as_str(),
                e.new_description.topology_type.as_str()
            ),
            SdamEvent::ServerOpening(ref e) => write!(fmt, "SERVER {} OPENING", e.address),
            SdamEvent::ServerClosed(ref e) => write!(fmt, "SERVER {} CLOSED", e.address),
            SdamEvent::ServerDescriptionChanged(ref e) => write!(
                fmt,
                "SERVER {} CHANGED: {} -> {}",
                e.address,
                e.previous_description.server_type.as_str(),
                e.new_description.server_type.as_str()
            ),
            SdamEvent::ServerHeartbeatStarted(ref e) => {
                write!(fmt, "HEARTBEAT {} STARTED", e.address)
            }
            SdamEvent::ServerHeartbeatSucceeded(ref e) => write!(
                fmt,
                "HEARTBEAT {} SUCCEEDED ({:.3} ms)",
                e.address, e.duration_ms
            ),
            SdamEvent::ServerHeartbeatFailed(ref e) => {
                write!(fmt, "HEARTBEAT {} FAILED: {}", e.address, e.failure)
            }
        }
    }
}
