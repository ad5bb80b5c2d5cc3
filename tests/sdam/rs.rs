use super::framework::run_dir;

#[test]
fn sdam_rs() {
    run_dir("tests/data/sdam/rs/");
}
