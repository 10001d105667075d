pub mod local_controller;
#[cfg(feature = "mpi")]
pub mod mpi_controller;

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{sleep, JoinHandle};
use std::time::Duration;

use derive_builder::Builder;
use nohash_hasher::IntMap;
use tracing::info;

use crate::simulation::config::{self, Logging, WriteEvents};
use crate::simulation::error::SimError;
use crate::simulation::io::state_dump;
use crate::simulation::logging;
use crate::simulation::messaging::events::{
    EventsLogger, EventsPublisher, EventsSubscriber, EventsWriter,
};
use crate::simulation::messaging::message_broker::NetMessageBroker;
use crate::simulation::messaging::sim_communication::SimCommunicator;
use crate::simulation::realm::{Realm, RunSummary};
use crate::simulation::world::World;

/// Everything a partition needs to run. The world is shared between all partitions of a process,
/// each partition builds its own realm from it.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct PartitionArguments<C: SimCommunicator> {
    communicator: C,
    world: Arc<World>,
    simulation: config::Simulation,
    output: config::Output,
    output_dir: PathBuf,
    #[builder(default)]
    events_subscriber: Vec<Box<dyn EventsSubscriber + Send>>,
}

pub struct PartitionResult {
    pub summary: RunSummary,
    pub events: EventsPublisher,
}

pub type PartitionHandles = IntMap<u32, JoinHandle<Result<PartitionResult, SimError>>>;

pub fn execute_partition<C: SimCommunicator>(
    args: PartitionArguments<C>,
) -> Result<PartitionResult, SimError> {
    let rank = args.communicator.rank();
    let size = args.communicator.size();

    fs::create_dir_all(&args.output_dir)?;
    let _guards = logging::init_logging(&args.output.logging, &args.output_dir, rank);
    info!("Process #{rank} of {size} has started.");

    let mut events = create_events(&args.output, rank, &args.output_dir)?;
    for subscriber in args.events_subscriber {
        events.add_subscriber(subscriber);
    }

    let neighbors: Vec<u32> = args.world.neighbors(rank).collect();
    let message_broker = NetMessageBroker::new(Rc::new(args.communicator), neighbors);
    let mut realm = Realm::new(&args.world, &args.simulation, message_broker, events)?;
    let summary = realm.run()?;

    if args.output.dump_state {
        let path = state_dump::write_state(&realm, &args.output_dir, rank)?;
        info!("#{rank} wrote state to {path:?}");
    }

    Ok(PartitionResult {
        summary,
        events: realm.into_events(),
    })
}

fn create_events(
    output: &config::Output,
    rank: u32,
    output_dir: &Path,
) -> Result<EventsPublisher, SimError> {
    let mut events = EventsPublisher::new();

    let events_file = match output.write_events {
        WriteEvents::None => None,
        WriteEvents::Text => Some(format!("events.{rank}.txt")),
        WriteEvents::Gzip => Some(format!("events.{rank}.txt.gz")),
    };
    if let Some(events_file) = events_file {
        let events_path = output_dir.join(events_file);
        info!("adding events writer with path: {events_path:?}");
        events.add_subscriber(Box::new(EventsWriter::new(&events_path)?));
    }

    if output.logging == Logging::Debug {
        events.add_subscriber(Box::new(EventsLogger {}));
    }
    Ok(events)
}

/// Have this more complicated join logic, so that threads in the back of the handle map can also
/// fail the run. The first failing partition ends the wait. Partitions still blocked in a barrier
/// with the failed one are left behind.
pub fn try_join(mut handles: PartitionHandles) -> Result<Vec<PartitionResult>, SimError> {
    let mut results = Vec::with_capacity(handles.len());
    while !handles.is_empty() {
        sleep(Duration::from_millis(20));
        let finished: Vec<u32> = handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(rank, _)| *rank)
            .collect();
        for rank in finished {
            let handle = handles.remove(&rank).expect("Handle was found before");
            let result = handle
                .join()
                .map_err(|_| SimError::PartitionPanicked(rank))??;
            results.push(result);
        }
    }
    results.sort_by_key(|r| r.summary.rank);
    Ok(results)
}

/// Logs the totals over all partitions of a run.
pub fn log_summary<'a>(summaries: impl IntoIterator<Item = &'a RunSummary>) {
    let (finished, unfinished) = summaries
        .into_iter()
        .fold((0, 0), |(f, u), s| (f + s.finished, u + s.unfinished));
    info!("Simulation finished. {finished} agents finished, {unfinished} agents unfinished.");
}
