use mongodb_cluster::topology::IsMasterResult;
use mongodb_cluster::{Error, ServerDescription, ServerType, Topology, TopologyDescription, TopologyType};

use crate::json::sdam::{Outcome, Suite};
use crate::json::{self, suites};
use crate::mock::MockConnector;

use serde_json::Value;

use std::io;
use std::path::Path;
use std::sync::Arc;

/// Runs every suite in `dir`.
pub fn run_dir(dir: &str) {
    for path in suites(dir) {
        run_suite(&path);
    }
}

pub fn run_suite(path: &Path) {
    let suite: Suite = json::from_file(path);
    let name = format!("{} ({})", suite.description, path.display());

    let topology = Topology::with_connector(suite.options, Arc::new(MockConnector::new())).unwrap();

    for (i, phase) in suite.phases.into_iter().enumerate() {
        for (host, response) in phase.responses {
            let description = response_description(&topology, host, &response);
            topology.update(description).unwrap();
        }

        check_outcome(&name, i, &topology.description(), &phase.outcome);
    }

    topology.close_all().unwrap();
}

// Builds the description a monitor would produce for `response`.
fn response_description(
    topology: &Topology,
    host: mongodb_cluster::Host,
    response: &Value,
) -> ServerDescription {
    if response.as_object().map_or(true, |obj| obj.is_empty()) {
        let err = Error::NetworkError(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "simulated network error",
        ));
        return ServerDescription::with_error(host, &err);
    }

    let previous_rtt = topology
        .description()
        .server(&host)
        .and_then(|server| server.round_trip_time);
    let ismaster = IsMasterResult::new(json::to_document(response)).unwrap();
    ServerDescription::from_handshake(host, ismaster, 1.0, previous_rtt)
}

fn check_outcome(name: &str, phase: usize, description: &TopologyDescription, outcome: &Outcome) {
    let context = format!("{}, phase {}", name, phase);

    let expected_type: TopologyType = outcome.topology_type.parse().unwrap();
    assert_eq!(expected_type, description.topology_type, "{}: topology type", context);
    assert_eq!(outcome.set_name, description.set_name, "{}: set name", context);

    assert_eq!(
        outcome.servers.len(),
        description.servers.len(),
        "{}: servers {:?}",
        context,
        description.servers.keys().collect::<Vec<_>>()
    );

    for (host, expected) in &outcome.servers {
        let server = match description.server(host) {
            Some(server) => server,
            None => panic!("{}: {} missing from the topology", context, host),
        };

        let expected_type: ServerType = expected.server_type.parse().unwrap();
        assert_eq!(expected_type, server.server_type, "{}: type of {}", context, host);
        assert_eq!(expected.set_name, server.set_name, "{}: set name of {}", context, host);

        if expected.set_version.is_some() {
            assert_eq!(expected.set_version, server.set_version, "{}: set version of {}", context, host);
        }
        if let Some(ref id) = expected.election_id {
            assert_eq!(Some(id.to_oid()), server.election_id, "{}: election id of {}", context, host);
        }
    }

    if outcome.max_set_version.is_some() {
        assert_eq!(outcome.max_set_version, description.max_set_version(), "{}: max set version", context);
    }

    if let Some(ref id) = outcome.max_election_id {
        assert_eq!(Some(&id.to_oid()), description.max_election_id(), "{}: max election id", context);
    }

    assert_eq!(
        outcome.logical_session_timeout_minutes,
        description.logical_session_timeout_minutes(),
        "{}: logical session timeout",
        context
    );

    if let Some(compatible) = outcome.compatible {
        assert_eq!(compatible, description.is_compatible(), "{}: compatibility", context);
    }
}
