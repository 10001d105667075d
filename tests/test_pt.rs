use rust_realm_sim::simulation::config::PartitionMethod;
use rust_realm_sim::simulation::messaging::events::EventsCollector;
use rust_realm_sim::test_utils;

#[test]
fn passengers_ride_across_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_utils::simulation_config(0, 100, 0);

    let mut single = test_utils::run_local(
        test_utils::pt_world(1, PartitionMethod::None),
        config.clone(),
        dir.path(),
    );
    let mut split = test_utils::run_local(
        test_utils::pt_world(2, PartitionMethod::Modulo),
        config,
        dir.path(),
    );

    let expected = test_utils::finish_times(&mut single);
    assert_eq!(3, expected.len());
    assert_eq!(expected, test_utils::finish_times(&mut split));

    // passenger 1 leaves the vehicle at stop 1, which is located in partition 1
    assert_eq!(2, split[0].summary.finished);
    assert_eq!(1, split[1].summary.finished);
    let collector = split[1]
        .events
        .get_subscriber::<EventsCollector>()
        .unwrap();
    assert_eq!(Some(14), collector.time_of(1, 3));
    assert_eq!(Some(14), collector.time_of(2, 2));
}

#[test]
fn waiting_passengers_stay_unfinished() {
    let dir = tempfile::tempdir().unwrap();
    let mut agents = test_utils::pt_agents();
    // nobody serves route 0 in the opposite direction
    agents.push(test_utils::passenger(3, 2, 0));
    let world = test_utils::pt_world_from(2, PartitionMethod::Modulo, agents);

    let results = test_utils::run_local(world, test_utils::simulation_config(0, 100, 0), dir.path());
    let finished: usize = results.iter().map(|r| r.summary.finished).sum();
    let unfinished: usize = results.iter().map(|r| r.summary.unfinished).sum();
    assert_eq!(3, finished);
    assert_eq!(1, unfinished);
}
