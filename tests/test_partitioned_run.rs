use rust_realm_sim::simulation::agents::Agent;
use rust_realm_sim::simulation::config::PartitionMethod;
use rust_realm_sim::simulation::instruction::{Instruction, Plan};
use rust_realm_sim::simulation::world::{LinkDef, World};
use rust_realm_sim::test_utils;

#[test]
fn scenario_across_two_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new(
        2,
        PartitionMethod::Modulo,
        test_utils::chain(2, 1),
        vec![],
        vec![test_utils::scenario_agent(0)],
    )
    .unwrap();

    let mut results = test_utils::run_local(world, test_utils::simulation_config(0, 200, 1), dir.path());
    assert_eq!(2, results.len());
    // the agent leaves partition 0 when it enters link 1 and finishes in partition 1
    assert_eq!(0, results[0].summary.finished);
    assert_eq!(1, results[1].summary.finished);

    let finish_times = test_utils::finish_times(&mut results);
    assert_eq!(Some(&82), finish_times.get(&0));
}

#[test]
fn direct_handoff_costs_one_second() {
    let dir = tempfile::tempdir().unwrap();
    // link 2 isn't adjacent to partition 0, so the agent is handed over to partition 2 directly
    let agent = Agent::new(
        0,
        Plan::new(vec![
            Instruction::link_traversal(1, 0, 0).unwrap(),
            Instruction::link_traversal(2, 2, 0).unwrap(),
        ])
        .unwrap(),
    );
    let world = World::new(
        3,
        PartitionMethod::Modulo,
        test_utils::chain(3, 1),
        vec![],
        vec![agent.clone()],
    )
    .unwrap();
    let mut results = test_utils::run_local(world, test_utils::simulation_config(0, 100, 0), dir.path());
    let split = test_utils::finish_times(&mut results);
    assert_eq!(1, results[2].summary.finished);

    let single = World::new(1, PartitionMethod::None, test_utils::chain(3, 1), vec![], vec![agent]).unwrap();
    let mut results = test_utils::run_local(single, test_utils::simulation_config(0, 100, 0), dir.path());
    let joined = test_utils::finish_times(&mut results);

    assert_eq!(Some(&20), joined.get(&0));
    assert_eq!(Some(&21), split.get(&0));
}

/// Agents drive along a ring, which is cut into partitions. Agents are handed from partition to
/// partition until they finish.
fn ring_world(num_parts: u32, num_agents: u32, capacity: u32, laps: u32) -> World {
    let num_links = 8;
    let links = (0..num_links)
        .map(|id| LinkDef::new(id, id, (id + 1) % num_links, 50., 10., capacity))
        .collect();
    let agents = (0..num_agents)
        .map(|id| {
            let instructions = (0..num_links * laps)
                .map(|i| {
                    let link = (id + i) % num_links;
                    Instruction::link_traversal(i % 100 + 1, link, 0).unwrap()
                })
                .collect();
            Agent::new(id, Plan::new(instructions).unwrap())
        })
        .collect();
    World::new(num_parts, PartitionMethod::Modulo, links, vec![], agents).unwrap()
}

#[test]
fn free_flow_ring_is_independent_of_partitioning() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_utils::simulation_config(0, 1000, 0);

    let mut single = test_utils::run_local(ring_world(1, 4, 100, 2), config.clone(), dir.path());
    let mut split = test_utils::run_local(ring_world(4, 4, 100, 2), config, dir.path());

    let expected = test_utils::finish_times(&mut single);
    assert_eq!(4, expected.len());
    assert_eq!(expected, test_utils::finish_times(&mut split));
}

#[test]
fn congested_ring_loses_no_agent() {
    let dir = tempfile::tempdir().unwrap();
    let num_agents = 30;
    // the run ends while most agents are still queued somewhere on the ring
    let mut results = test_utils::run_local(
        ring_world(4, num_agents, 2, 2),
        test_utils::simulation_config(0, 120, 1),
        dir.path(),
    );

    let finished: usize = results.iter().map(|r| r.summary.finished).sum();
    let unfinished: usize = results.iter().map(|r| r.summary.unfinished).sum();
    assert_eq!(num_agents as usize, finished + unfinished);
    assert!(unfinished > 0);
    assert_eq!(finished, test_utils::finish_times(&mut results).len());
}

/// Links 0 and 1 merge into link 2. Each link is owned by its own partition, so link 2 is fed by
/// two upstream partitions.
fn merge_world(num_parts: u32) -> World {
    let mut links = vec![
        LinkDef::new(0, 0, 2, 100., 10., 1),
        LinkDef::new(1, 1, 2, 100., 10., 1),
        LinkDef::new(2, 2, 3, 100., 10., 1),
    ];
    for link in &mut links {
        link.partition = link.id % num_parts;
    }
    let agents = (0..2)
        .map(|id| {
            Agent::new(
                id,
                Plan::new(vec![
                    Instruction::link_traversal(1, id, 0).unwrap(),
                    Instruction::link_traversal(2, 2, 0).unwrap(),
                ])
                .unwrap(),
            )
        })
        .collect();
    World::new(num_parts, PartitionMethod::Precomputed, links, vec![], agents).unwrap()
}

#[test]
fn merging_neighbors_are_served_in_rank_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_utils::simulation_config(0, 100, 0);

    let world = merge_world(3);
    assert_eq!(vec![2], world.neighbors(0).collect::<Vec<_>>());
    assert_eq!(vec![2], world.neighbors(1).collect::<Vec<_>>());
    assert_eq!(vec![0, 1], world.neighbors(2).collect::<Vec<_>>());

    let mut single = test_utils::run_local(merge_world(1), config.clone(), dir.path());
    let expected = test_utils::finish_times(&mut single);
    // both agents reach link 2 at 10. Agent 0 gets the only slot, agent 1 follows once it's free
    assert_eq!(Some(&20), expected.get(&0));
    assert_eq!(Some(&30), expected.get(&1));

    for _ in 0..10 {
        let mut split = test_utils::run_local(merge_world(3), config.clone(), dir.path());
        assert_eq!(expected, test_utils::finish_times(&mut split));
        assert_eq!(2, split[2].summary.finished);
    }
}
