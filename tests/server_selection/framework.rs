use mongodb_cluster::{Host, Result, ServerDescription, TopologyDescription, TopologyType};

use crate::json::server_selection::{ServerFixture, Suite};
use crate::json::{self, suites};

use chrono::{TimeZone, Utc};

use std::path::Path;

/// Runs every suite in `dir`.
pub fn run_dir(dir: &str) {
    for path in suites(dir) {
        run_suite(&path);
    }
}

fn server_description(fixture: &ServerFixture) -> ServerDescription {
    let mut description = ServerDescription::new(fixture.address.clone());
    description.server_type = fixture.server_type.parse().unwrap();
    description.round_trip_time = fixture.avg_rtt_ms;
    description.tags = fixture.tags.clone();
    description.max_wire_version = fixture.max_wire_version.unwrap_or(8);
    if let Some(millis) = fixture.last_update_time {
        description.last_update_time = Utc.timestamp_millis(millis);
    }
    description.last_write_date = fixture.last_write_date.map(|millis| Utc.timestamp_millis(millis));
    description
}

fn sorted(mut hosts: Vec<Host>) -> Vec<Host> {
    hosts.sort();
    hosts
}

fn addresses(servers: &[&ServerDescription]) -> Vec<Host> {
    sorted(servers.iter().map(|s| s.address.clone()).collect())
}

pub fn run_suite(path: &Path) {
    let suite: Suite = json::from_file(path);
    let name = path.display();
    let write = suite.operation == "write";

    let topology_type: TopologyType = suite.topology_description.topology_type.parse().unwrap();
    let mut description = TopologyDescription::with_servers(
        topology_type,
        None,
        suite.topology_description.servers.iter().map(server_description),
    );
    if let Some(ms) = suite.topology_description.heartbeat_frequency_ms {
        description = description.with_heartbeat_frequency_ms(ms);
    }
    if let Some(ms) = suite.topology_description.local_threshold_ms {
        description = description.with_local_threshold_ms(ms);
    }

    let suitable: Result<Vec<&ServerDescription>> = if write {
        description.writable_servers()
    } else {
        description.suitable_servers(&suite.read_preference)
    };

    let suitable = match suitable {
        Ok(suitable) => {
            assert!(!suite.error, "{}: expected an error", name);
            suitable
        }
        Err(err) => {
            assert!(suite.error, "{}: unexpected error: {}", name, err);
            return;
        }
    };

    assert_eq!(sorted(suite.suitable_servers.clone()), addresses(&suitable), "{}: suitable servers", name);

    let window = description.in_latency_window(suitable);
    assert_eq!(sorted(suite.in_latency_window.clone()), addresses(&window), "{}: latency window", name);

    for _ in 0..20 {
        let selected = if write {
            description.select_server_for_write()
        } else {
            description.select_server(&suite.read_preference)
        };

        match selected {
            Ok(host) => assert!(
                suite.in_latency_window.contains(&host),
                "{}: selected {} outside the latency window",
                name,
                host
            ),
            Err(err) => {
                assert!(suite.in_latency_window.is_empty(), "{}: {}", name, err);
                assert!(err.is_retryable_selection(), "{}: {}", name, err);
            }
        }
    }
}
