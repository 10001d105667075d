use std::fs;

use rust_realm_sim::simulation::config::{CommandLineArgs, PartitionMethod};
use rust_realm_sim::simulation::controller::local_controller;
use rust_realm_sim::simulation::error::SimError;
use rust_realm_sim::simulation::io::state_dump;
use rust_realm_sim::test_utils;

const CONFIG: &str = r#"
modules:
  simulation:
    type: Simulation
    start_time: 0
    end_time: 100
  partitioning:
    type: Partitioning
    num_parts: 2
    method: Modulo
  output:
    type: Output
    output_dir: output
    logging: Info
    write_events: Text
    dump_state: true
  world:
    type: WorldFile
    path: world.json.gz
"#;

#[test]
fn run_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    // the snapshot is stored as a single partition and split when it is loaded
    test_utils::pt_world(1, PartitionMethod::None)
        .to_file(&dir.path().join("world.json.gz"))
        .unwrap();
    let config_path = dir.path().join("config.yml");
    fs::write(&config_path, CONFIG).unwrap();

    let args = CommandLineArgs {
        config_path: config_path.to_str().unwrap().to_string(),
        num_parts: None,
    };
    let results = local_controller::run_channel_from_config(&args).unwrap();
    assert_eq!(2, results.len());
    let finished: usize = results.iter().map(|r| r.summary.finished).sum();
    assert_eq!(3, finished);

    let output = dir.path().join("output");
    for rank in 0..2 {
        assert!(output.join(format!("events.{rank}.txt")).exists());
        assert!(output.join(format!("log_process_{rank}.txt")).exists());
        assert!(state_dump::state_path(&output, rank).exists());
    }
}

#[test]
fn num_parts_from_command_line() {
    let dir = tempfile::tempdir().unwrap();
    test_utils::pt_world(1, PartitionMethod::None)
        .to_file(&dir.path().join("world.json.gz"))
        .unwrap();
    let config_path = dir.path().join("config.yml");
    fs::write(&config_path, CONFIG).unwrap();

    let args = CommandLineArgs {
        config_path: config_path.to_str().unwrap().to_string(),
        num_parts: Some(3),
    };
    let results = local_controller::run_channel_from_config(&args).unwrap();
    assert_eq!(3, results.len());
    assert!(dir.path().join("output-3/events.2.txt").exists());
}

#[test]
fn missing_world_module() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yml");
    fs::write(&config_path, "modules: {}").unwrap();
    let args = CommandLineArgs {
        config_path: config_path.to_str().unwrap().to_string(),
        num_parts: None,
    };
    assert!(matches!(
        local_controller::run_channel_from_config(&args),
        Err(SimError::Config(_))
    ));
}
