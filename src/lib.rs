//! Cluster awareness for MongoDB drivers: topology discovery and
//! monitoring, server selection, and per-server connection pooling.
//!
//! ## Tracking a deployment
//!
//! A `Topology` is created from a seed list. Server descriptions, usually
//! produced by the monitor threads started with `start_monitoring`, are fed
//! into `Topology::update`, which publishes a new immutable
//! `TopologyDescription` snapshot each time.
//!
//! ```no_run
//! use mongodb_cluster::{ReadMode, ReadPreference, Topology, TopologyOptions};
//! use mongodb_cluster::host::parse_host;
//!
//! let mut options = TopologyOptions::new(vec![
//!     parse_host("db1.example.com:27017").unwrap(),
//!     parse_host("db2.example.com:27017").unwrap(),
//! ]);
//! options.set_name = Some("rs0".to_owned());
//!
//! let topology = Topology::new(options).unwrap();
//!
//! // ... start monitoring with a `Heartbeat` implementation ...
//!
//! let read_pref = ReadPreference::new(ReadMode::SecondaryPreferred, None);
//! let host = topology.select_server(&read_pref).unwrap();
//! let conn = topology.check_out(&host).unwrap();
//! // Dropping the connection returns it to the pool.
//! drop(conn);
//! ```
//!
//! ## Monitoring
//!
//! Topology and pool activity is published as `SdamEvent` and `CmapEvent`
//! values over channels returned by `subscribe_sdam` and `subscribe_cmap`.
//! Diagnostics are logged through `slog`; without a configured logger they
//! are forwarded to the `log` crate.
pub mod common;
pub mod error;
pub mod event;
pub mod host;
pub mod pool;
pub mod stream;
pub mod topology;

pub use crate::common::{ReadMode, ReadPreference, TagSet};
pub use crate::error::{Error, Result};
pub use crate::host::Host;
pub use crate::pool::{Connection, ConnectionPool, ConnectionPoolOptions, PooledConnection};
pub use crate::stream::{Stream, StreamConnector, TcpConnector};
pub use crate::topology::{
    Heartbeat, ServerDescription, ServerType, Topology, TopologyDescription, TopologyOptions,
    TopologyType, WeakTopology,
};
