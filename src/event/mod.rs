//! Monitoring events for topology changes and connection pool activity.
//!
//! Events are delivered over channels: call `subscribe_sdam` or
//! `subscribe_cmap` on a `Topology` (or `subscribe` on a `ConnectionPool`)
//! and read from the returned receiver.
pub mod cmap;
pub mod listener;
pub mod sdam;

pub use self::listener::EventListener;
