use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;

#[test]
fn help_lists_the_subcommands() {
    let mut cmd = cargo_bin_cmd!("bb-dev");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(contains("start").and(contains("config")));
}

#[test]
fn start_help_documents_the_orchestrator_flags() {
    let mut cmd = cargo_bin_cmd!("bb-dev");
    cmd.args(["start", "--help"]);
    cmd.assert()
        .success()
        .stdout(contains("--single-instance").and(contains("--pm2")).and(contains("--env")));
}

#[test]
fn start_outside_a_workspace_names_the_missing_config() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("bb-dev");
    cmd.arg("start").current_dir(temp.path());
    cmd.assert()
        .failure()
        .stderr(contains("bb.config.json"));
}

#[test]
fn config_set_round_trips_through_the_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let file = temp.path().join("config.toml");
    let mut cmd = cargo_bin_cmd!("bb-dev");
    cmd.args([
        "config",
        "set",
        "defaults.installer",
        "pnpm install",
        "--file",
    ])
    .arg(&file);
    cmd.assert().success();
    let written = std::fs::read_to_string(&file).unwrap();
    assert!(written.contains("installer = \"pnpm install\""));
}
