use mongodb_cluster::host::parse_host;
use mongodb_cluster::topology::IsMasterResult;
use mongodb_cluster::{Error, ServerDescription, Topology, TopologyOptions};

use crate::mock::MockConnector;

use approx::assert_relative_eq;
use bson::{bson, doc};

use std::io;
use std::sync::Arc;

// Mirrors what a monitor does with each heartbeat.
fn heartbeat(topology: &Topology, rtt: f64) -> Option<f64> {
    let address = parse_host("a:27017").unwrap();
    let previous = topology
        .description()
        .server(&address)
        .and_then(|server| server.round_trip_time);
    let reply = doc! { "ok": 1, "ismaster": true, "minWireVersion": 0, "maxWireVersion": 8 };
    let ismaster = IsMasterResult::new(reply).unwrap();
    let description = ServerDescription::from_handshake(address.clone(), ismaster, rtt, previous);

    let updated = topology.update(description).unwrap();
    updated.server(&address).and_then(|server| server.round_trip_time)
}

#[test]
fn round_trip_time_is_a_moving_average() {
    let options = TopologyOptions::new(vec![parse_host("a:27017").unwrap()]);
    let topology = Topology::with_connector(options, Arc::new(MockConnector::new())).unwrap();

    assert_relative_eq!(heartbeat(&topology, 10.0).unwrap(), 10.0);
    assert_relative_eq!(heartbeat(&topology, 20.0).unwrap(), 12.0);
    assert_relative_eq!(heartbeat(&topology, 20.0).unwrap(), 13.6);

    // A failed check forgets the average.
    let err = Error::NetworkError(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
    let address = parse_host("a:27017").unwrap();
    topology.update(ServerDescription::with_error(address, &err)).unwrap();
    assert_relative_eq!(heartbeat(&topology, 30.0).unwrap(), 30.0);

    topology.close_all().unwrap();
}
