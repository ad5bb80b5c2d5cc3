use super::framework::run_dir;

#[test]
fn server_selection_rs() {
    run_dir("tests/data/server_selection/rs/");
}
