use mongodb_cluster::host::parse_host;
use mongodb_cluster::{Host, ServerDescription, ServerType, TopologyDescription, TopologyType};

use bson::oid::ObjectId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const ADDRESSES: [&str; 4] = ["a:27017", "b:27017", "c:27017", "d:27017"];

fn host(s: &str) -> Host {
    parse_host(s).unwrap()
}

fn election_id(n: u8) -> ObjectId {
    let mut bytes = [0u8; 12];
    bytes[11] = n;
    ObjectId::with_bytes(bytes)
}

fn random_description(rng: &mut StdRng) -> ServerDescription {
    let address = host(ADDRESSES.choose(rng).unwrap());
    let mut description = ServerDescription::new(address);

    description.server_type = *[
        ServerType::RSPrimary,
        ServerType::RSPrimary,
        ServerType::RSSecondary,
        ServerType::RSArbiter,
        ServerType::Standalone,
        ServerType::Mongos,
        ServerType::Unknown,
    ]
    .choose(rng)
    .unwrap();

    if description.server_type == ServerType::Unknown {
        description.error = Some("simulated network error".to_owned());
        return description;
    }

    description.round_trip_time = Some(rng.gen_range(1.0, 50.0));
    description.max_wire_version = 8;

    if description.server_type != ServerType::Standalone
        && description.server_type != ServerType::Mongos
    {
        let set_name = if rng.gen_bool(0.1) { "other" } else { "rs" };
        description.set_name = Some(set_name.to_owned());
        description.hosts = ADDRESSES
            .iter()
            .filter(|_| rng.gen_bool(0.7))
            .map(|a| host(a))
            .collect();

        if description.server_type == ServerType::RSPrimary {
            if rng.gen_bool(0.9) {
                description.set_version = Some(rng.gen_range(1, 4));
            }
            if rng.gen_bool(0.8) {
                description.election_id = Some(election_id(rng.gen_range(1, 5)));
            }
        }
    }

    description
}

fn election_pair(description: &TopologyDescription) -> Option<(i64, [u8; 12])> {
    match (description.max_set_version(), description.max_election_id()) {
        (Some(version), Some(id)) => Some((version, id.bytes())),
        _ => None,
    }
}

fn primaries(description: &TopologyDescription) -> usize {
    description
        .servers
        .values()
        .filter(|s| s.server_type == ServerType::RSPrimary)
        .count()
}

fn seeds(set_name: Option<&str>) -> TopologyDescription {
    let topology_type = if set_name.is_some() {
        TopologyType::ReplicaSetNoPrimary
    } else {
        TopologyType::Unknown
    };
    TopologyDescription::new(
        topology_type,
        set_name.map(|s| s.to_owned()),
        ADDRESSES[..3].iter().map(|a| host(a)),
    )
}

#[test]
fn random_updates_keep_invariants() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for round in 0..200 {
        let set_name = if round % 2 == 0 { Some("rs") } else { None };
        let mut current = seeds(set_name);

        for _ in 0..40 {
            let incoming = random_description(&mut rng);
            let next = current.update(incoming.clone());

            assert!(primaries(&next) <= 1, "more than one primary: {:?}", next);

            assert!(
                next.max_set_version() >= current.max_set_version(),
                "maxSetVersion went backwards"
            );
            if let (Some(before), Some(after)) = (election_pair(&current), election_pair(&next)) {
                assert!(after >= before, "election id pair went backwards");
            }

            // A primary reporting an older election never takes over.
            if incoming.server_type == ServerType::RSPrimary {
                if let (Some(version), Some(id), Some(max)) =
                    (incoming.set_version, &incoming.election_id, election_pair(&current))
                {
                    if (version, id.bytes()) < max {
                        let recorded = next.server(&incoming.address).map(|s| s.server_type);
                        assert_ne!(recorded, Some(ServerType::RSPrimary));
                    }
                }
            }

            current = next;
        }
    }
}

#[test]
fn applying_a_description_twice_changes_nothing() {
    let mut rng = StdRng::seed_from_u64(42);

    for round in 0..200 {
        let set_name = if round % 2 == 0 { Some("rs") } else { None };
        let mut current = seeds(set_name);

        for _ in 0..20 {
            let incoming = random_description(&mut rng);
            let once = current.update(incoming.clone());
            let twice = once.update(incoming);
            assert_eq!(once, twice);
            current = once;
        }
    }
}

#[test]
fn update_leaves_the_snapshot_untouched() {
    let before = seeds(Some("rs"));
    let snapshot = before.clone();

    let mut primary = ServerDescription::new(host("a:27017"));
    primary.server_type = ServerType::RSPrimary;
    primary.set_name = Some("rs".to_owned());
    primary.hosts = vec![host("a:27017")];
    primary.max_wire_version = 8;

    let after = before.update(primary);
    assert_eq!(before, snapshot);
    assert_eq!(after.topology_type, TopologyType::ReplicaSetWithPrimary);
    assert_eq!(after.servers.len(), 1);
}
