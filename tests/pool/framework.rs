use mongodb_cluster::event::cmap::CmapEvent;
use mongodb_cluster::{ConnectionPool, Error, Host, PooledConnection};

use crate::json::pool::{ExpectedEvent, Operation, Suite};
use crate::json;
use crate::mock::MockConnector;

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

// State shared by the main thread and the workers.
struct Context {
    pool: ConnectionPool,
    connections: Mutex<HashMap<String, PooledConnection>>,
    errors: Mutex<Vec<Error>>,
}

impl Context {
    fn run(&self, op: &Operation) {
        match &op.name[..] {
            "checkOut" => match self.pool.check_out() {
                Ok(conn) => {
                    if let Some(ref label) = op.label {
                        self.connections.lock().unwrap().insert(label.clone(), conn);
                    }
                }
                Err(err) => self.errors.lock().unwrap().push(err),
            },
            "checkIn" => {
                let label = op.connection.as_ref().expect("checkIn needs a connection");
                self.take(label).check_in();
            }
            "clear" => self.pool.clear().unwrap(),
            "close" => self.pool.close().unwrap(),
            "wait" => thread::sleep(Duration::from_millis(op.ms.unwrap_or(0))),
            other => panic!("unknown operation {}", other),
        }
    }
}

impl Context {
    // Waits for a worker to store the connection labelled `label`.
    fn take(&self, label: &str) -> PooledConnection {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            if let Some(conn) = self.connections.lock().unwrap().remove(label) {
                return conn;
            }
            assert!(Instant::now() < deadline, "no connection labelled {}", label);
            thread::sleep(Duration::from_millis(1));
        }
    }
}

struct Worker {
    ops: Sender<Operation>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn start(context: Arc<Context>) -> Worker {
        let (ops, rx) = channel::<Operation>();
        let handle = thread::spawn(move || {
            for op in rx {
                context.run(&op);
            }
        });
        Worker { ops, handle }
    }

    fn join(self) {
        drop(self.ops);
        self.handle.join().unwrap();
    }
}

pub fn event_type(event: &CmapEvent) -> &'static str {
    match *event {
        CmapEvent::PoolCreated(_) => "PoolCreated",
        CmapEvent::PoolCleared(_) => "PoolCleared",
        CmapEvent::PoolClosed(_) => "PoolClosed",
        CmapEvent::ConnectionCreated(_) => "ConnectionCreated",
        CmapEvent::ConnectionReady(_) => "ConnectionReady",
        CmapEvent::ConnectionClosed(_) => "ConnectionClosed",
        CmapEvent::ConnectionCheckOutStarted(_) => "ConnectionCheckOutStarted",
        CmapEvent::ConnectionCheckOutFailed(_) => "ConnectionCheckOutFailed",
        CmapEvent::ConnectionCheckedOut(_) => "ConnectionCheckedOut",
        CmapEvent::ConnectionCheckedIn(_) => "ConnectionCheckedIn",
    }
}

fn connection_id(event: &CmapEvent) -> Option<u32> {
    match *event {
        CmapEvent::ConnectionCreated(ref e) => Some(e.connection_id),
        CmapEvent::ConnectionReady(ref e) => Some(e.connection_id),
        CmapEvent::ConnectionClosed(ref e) => Some(e.connection_id),
        CmapEvent::ConnectionCheckedOut(ref e) => Some(e.connection_id),
        CmapEvent::ConnectionCheckedIn(ref e) => Some(e.connection_id),
        _ => None,
    }
}

fn reason(event: &CmapEvent) -> Option<&'static str> {
    match *event {
        CmapEvent::ConnectionClosed(ref e) => Some(e.reason.as_str()),
        CmapEvent::ConnectionCheckOutFailed(ref e) => Some(e.reason.as_str()),
        _ => None,
    }
}

fn error_type(err: &Error) -> &'static str {
    match *err {
        Error::WaitQueueTimeout(_) => "WaitQueueTimeout",
        Error::PoolClosed(_) => "PoolClosed",
        Error::ConnectionError(..) => "ConnectionError",
        _ => "Other",
    }
}

// Collects events until `count` of `name` have been seen.
fn wait_for_event(events: &Receiver<CmapEvent>, seen: &mut Vec<CmapEvent>, name: &str, count: usize) {
    let deadline = Instant::now() + WAIT_LIMIT;
    while seen.iter().filter(|e| event_type(e) == name).count() < count {
        let now = Instant::now();
        assert!(now < deadline, "timed out waiting for {} x{}", name, count);
        if let Ok(event) = events.recv_timeout(deadline - now) {
            seen.push(event);
        }
    }
}

fn wait_for_queue(pool: &ConnectionPool, count: usize) {
    let deadline = Instant::now() + WAIT_LIMIT;
    while pool.wait_queue_len().unwrap() != count {
        assert!(Instant::now() < deadline, "timed out waiting for {} queued callers", count);
        thread::sleep(Duration::from_millis(1));
    }
}

fn matches(expected: &ExpectedEvent, actual: &CmapEvent) -> bool {
    expected.event_type == event_type(actual)
        && expected.connection_id.map_or(true, |id| Some(id) == connection_id(actual))
        && expected.reason.as_ref().map_or(true, |r| Some(&r[..]) == reason(actual))
}

pub fn run_suite(path: &Path) {
    let suite: Suite = json::from_file(path);
    let name = format!("{} ({})", suite.description, path.display());

    let pool = ConnectionPool::new(
        Host::new("localhost", 27017),
        suite.pool_options,
        Arc::new(MockConnector::new()),
    );
    let events = pool.subscribe();
    let context = Arc::new(Context {
        pool: pool.clone(),
        connections: Mutex::new(HashMap::new()),
        errors: Mutex::new(Vec::new()),
    });

    let mut workers: HashMap<String, Worker> = HashMap::new();
    let mut seen = Vec::new();

    for op in &suite.operations {
        if let Some(ref thread) = op.thread {
            let worker = workers
                .get(thread)
                .unwrap_or_else(|| panic!("{}: thread {} not started", name, thread));
            worker.ops.send(op.clone()).unwrap();
            continue;
        }

        match &op.name[..] {
            "start" => {
                let target = op.target.clone().expect("start needs a target");
                workers.insert(target, Worker::start(context.clone()));
            }
            "waitForThread" => {
                let target = op.target.as_ref().expect("waitForThread needs a target");
                workers.remove(target).expect("unknown thread").join();
            }
            "waitForEvent" => {
                let event = op.event.as_ref().expect("waitForEvent needs an event");
                wait_for_event(&events, &mut seen, event, op.count.unwrap_or(1));
            }
            "waitForQueue" => wait_for_queue(&pool, op.count.unwrap_or(1)),
            _ => context.run(op),
        }
    }

    for (_, worker) in workers.drain() {
        worker.join();
    }

    seen.extend(events.try_iter());

    let errors = context.errors.lock().unwrap();
    match suite.error {
        Some(ref expected) => assert!(
            errors.iter().any(|err| error_type(err) == expected.error_type),
            "{}: expected a {} error, got {:?}",
            name,
            expected.error_type,
            *errors
        ),
        None => assert!(errors.is_empty(), "{}: unexpected errors {:?}", name, *errors),
    }

    let ignore = &suite.ignore;
    let actual: Vec<&CmapEvent> = seen
        .iter()
        .filter(|e| !ignore.iter().any(|ignored| ignored == event_type(e)))
        .collect();

    let describe = |events: &[&CmapEvent]| events.iter().map(|e| e.to_string()).collect::<Vec<_>>();
    assert_eq!(
        suite.events.len(),
        actual.len(),
        "{}: events {:?}",
        name,
        describe(&actual)
    );
    for (expected, actual) in suite.events.iter().zip(actual.iter()) {
        assert!(matches(expected, actual), "{}: expected {:?}, got {}", name, expected, actual);
    }
}
