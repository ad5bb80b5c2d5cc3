use super::framework::run_dir;

#[test]
fn sdam_single() {
    run_dir("tests/data/sdam/single/");
}
