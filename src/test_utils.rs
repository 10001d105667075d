use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::simulation::agents::Agent;
use crate::simulation::config::{Config, Logging, Output, PartitionMethod, Simulation, WriteEvents};
use crate::simulation::controller::{self, local_controller, PartitionResult};
use crate::simulation::instruction::{Instruction, Plan};
use crate::simulation::messaging::events::{EventsCollector, EventsSubscriber, StampKind};
use crate::simulation::world::{LinkDef, StopDef, World};

pub fn simulation_config(start_time: u32, end_time: u32, link_advance_delay: u32) -> Simulation {
    Simulation {
        start_time,
        end_time,
        link_advance_delay,
        tick_duration_ms: 0,
    }
}

/// A chain of links `i: node i -> node i + 1`, each 100m long with a velocity of 10m/s.
pub fn chain(num_links: u32, capacity: u32) -> Vec<LinkDef> {
    (0..num_links)
        .map(|id| LinkDef::new(id, id, id + 1, 100., 10., capacity))
        .collect()
}

/// Two consecutive links with capacity 1 in a single partition.
pub fn two_link_world(agents: Vec<Agent>) -> World {
    World::new(1, PartitionMethod::None, chain(2, 1), vec![], agents).unwrap()
}

/// Drives link 0, sleeps for 60 seconds and drives link 1.
pub fn scenario_agent(id: u32) -> Agent {
    Agent::new(
        id,
        Plan::new(vec![
            Instruction::link_traversal(1, 0, 10).unwrap(),
            Instruction::sleep_for(2, 60).unwrap(),
            Instruction::link_traversal(3, 1, 10).unwrap(),
        ])
        .unwrap(),
    )
    .with_finish_event(4)
}

/// A vehicle with one seat on route 0, serving stop `i` on link `i` of a chain of three links.
pub fn pt_vehicle(id: u32) -> Agent {
    let mut instructions = Vec::new();
    for stop in 0..3 {
        if stop > 0 {
            instructions.push(Instruction::link_traversal(10 * (stop + 1), stop, 0).unwrap());
        }
        let event = 10 * (stop + 1);
        instructions.push(Instruction::stop_arrive(event + 1, 0, stop, stop).unwrap());
        instructions.push(Instruction::stop_delay(event + 2, 0, stop, stop).unwrap());
        instructions.push(Instruction::stop_depart(event + 3, 0, stop, stop).unwrap());
    }
    Agent::new_vehicle(id, Plan::new(instructions).unwrap(), 1).with_finish_event(40)
}

/// Waits for route 0 at `board` and rides to `alight`.
pub fn passenger(id: u32, board: u32, alight: u32) -> Agent {
    Agent::new(
        id,
        Plan::new(vec![
            Instruction::wait(1, 0, board).unwrap(),
            Instruction::access(2, 0, board, board).unwrap(),
            Instruction::egress(3, 0, alight, alight).unwrap(),
        ])
        .unwrap(),
    )
    .with_finish_event(4)
}

/// The vehicle 0 and two passengers. Passenger 1 rides from stop 0 to 1, passenger 2 from stop 1
/// to 2.
pub fn pt_agents() -> Vec<Agent> {
    vec![pt_vehicle(0), passenger(1, 0, 1), passenger(2, 1, 2)]
}

pub fn pt_world_from(num_parts: u32, method: PartitionMethod, agents: Vec<Agent>) -> World {
    let stops = (0..3).map(|id| StopDef { id, link: id }).collect();
    World::new(num_parts, method, chain(3, 10), stops, agents).unwrap()
}

pub fn pt_world(num_parts: u32, method: PartitionMethod) -> World {
    pt_world_from(num_parts, method, pt_agents())
}

/// Runs the world with one thread per partition and an [EventsCollector] in every partition.
pub fn run_local(world: World, simulation: Simulation, output_dir: &Path) -> Vec<PartitionResult> {
    let mut config = Config::default();
    config.set_simulation(simulation);
    config.set_output(Output {
        output_dir: output_dir.to_str().unwrap().to_string(),
        logging: Logging::None,
        write_events: WriteEvents::None,
        dump_state: false,
    });

    let subscribers: HashMap<u32, Vec<Box<dyn EventsSubscriber + Send>>> = (0..world.num_parts())
        .map(|rank| {
            let collector: Box<dyn EventsSubscriber + Send> = Box::new(EventsCollector::new());
            (rank, vec![collector])
        })
        .collect();

    let handles =
        local_controller::run_channel(Arc::new(world), &config, output_dir, subscribers).unwrap();
    controller::try_join(handles).unwrap()
}

/// Finish second of every agent which finished in any partition.
pub fn finish_times(results: &mut [PartitionResult]) -> BTreeMap<u32, u32> {
    let mut times = BTreeMap::new();
    for result in results.iter_mut() {
        let collector = result
            .events
            .get_subscriber::<EventsCollector>()
            .expect("Partitions are run with an events collector");
        for (time, event) in collector.events() {
            if event.kind == StampKind::Finish {
                let previous = times.insert(event.agent, *time);
                assert!(previous.is_none(), "Agent {} finished twice", event.agent);
            }
        }
    }
    times
}
