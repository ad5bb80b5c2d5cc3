use super::framework::run_suite;

use crate::json::suites;

#[test]
fn pool_scenarios() {
    for path in suites("tests/data/pool/") {
        run_suite(&path);
    }
}
