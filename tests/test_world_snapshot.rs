use std::fs;

use rust_realm_sim::simulation::config::PartitionMethod;
use rust_realm_sim::simulation::error::WorldError;
use rust_realm_sim::simulation::instruction::MAX_PLAN_LENGTH;
use rust_realm_sim::simulation::world::World;
use rust_realm_sim::test_utils;
use serde_json::{json, Value};

fn round_trip(file_name: &str) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(file_name);
    let world = test_utils::pt_world(2, PartitionMethod::Modulo);

    world.to_file(&path).unwrap();
    let read = World::from_file(&path).unwrap();
    assert_eq!(world, read);
}

#[test]
fn bincode_snapshot() {
    round_trip("world.bin");
}

#[test]
fn json_snapshot() {
    round_trip("world.json");
}

#[test]
fn gzipped_snapshots() {
    round_trip("world.bin.gz");
    round_trip("world.json.gz");
}

#[test]
fn gzipped_file_is_compressed() {
    let dir = tempfile::tempdir().unwrap();
    let world = test_utils::pt_world(1, PartitionMethod::None);
    let plain = dir.path().join("world.json");
    let zipped = dir.path().join("nested/world.json.gz");
    world.to_file(&plain).unwrap();
    world.to_file(&zipped).unwrap();

    let magic = fs::read(&zipped).unwrap();
    assert_eq!([0x1f, 0x8b], magic[..2]);
    assert_ne!(fs::read(&plain).unwrap(), magic);
}

/// Writes the transit world as json, applies `edit` to the json and reads it again.
fn read_edited(edit: impl FnOnce(&mut Value)) -> Result<World, WorldError> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("world.json");
    test_utils::pt_world(1, PartitionMethod::None)
        .to_file(&path)
        .unwrap();

    let mut json: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    edit(&mut json);
    fs::write(&path, json.to_string()).unwrap();
    World::from_file(&path)
}

#[test]
fn unedited_snapshot_is_accepted() {
    assert!(read_edited(|_| {}).is_ok());
}

#[test]
fn overfull_vehicle_is_rejected() {
    // agent 0 is the vehicle with a single seat
    let err = read_edited(|w| w["agents"][0]["occupancy"] = json!(7)).unwrap_err();
    match err {
        WorldError::InvalidAgent { id: 0, reason } => {
            assert!(reason.contains("exceeds capacity"), "{reason}")
        }
        e => panic!("unexpected error {e:?}"),
    }
}

#[test]
fn passengers_without_occupancy_are_rejected() {
    let err = read_edited(|w| w["agents"][0]["passengers"] = json!({"1": [1]})).unwrap_err();
    assert!(matches!(err, WorldError::InvalidAgent { id: 0, .. }));
}

#[test]
fn cursor_beyond_plan_is_rejected() {
    let err = read_edited(|w| w["agents"][1]["cursor"] = json!(9)).unwrap_err();
    assert!(matches!(err, WorldError::InvalidAgent { id: 1, .. }));
}

#[test]
fn overlong_plan_is_rejected() {
    let err = read_edited(|w| {
        w["agents"][1]["plan"] = json!(vec![2u64 << 56; MAX_PLAN_LENGTH + 10]);
    })
    .unwrap_err();
    match err {
        WorldError::Snapshot(msg) => assert!(msg.contains("at most 65535"), "{msg}"),
        e => panic!("unexpected error {e:?}"),
    }
}
