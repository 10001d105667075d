use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use tracing::info;

use crate::simulation::config::{CommandLineArgs, Config};
use crate::simulation::controller::{
    self, PartitionArgumentsBuilder, PartitionHandles, PartitionResult,
};
use crate::simulation::error::SimError;
use crate::simulation::io;
use crate::simulation::messaging::events::EventsSubscriber;
use crate::simulation::messaging::sim_communication::local_communicator::ChannelSimCommunicator;
use crate::simulation::messaging::sim_communication::SimCommunicator;
use crate::simulation::world::World;

/// Runs one thread per partition of the world. Partitions communicate through channels.
pub fn run_channel(
    world: Arc<World>,
    config: &Config,
    output_dir: &Path,
    mut events_subscriber_per_partition: HashMap<u32, Vec<Box<dyn EventsSubscriber + Send>>>,
) -> Result<PartitionHandles, SimError> {
    info!(
        "Starting multithreaded Simulation with {} partitions.",
        world.num_parts()
    );
    let comms = ChannelSimCommunicator::create_n_2_n(world.num_parts());

    let mut handles = PartitionHandles::default();
    for comm in comms {
        let rank = comm.rank();
        let args = PartitionArgumentsBuilder::default()
            .communicator(comm)
            .world(world.clone())
            .simulation(config.simulation())
            .output(config.output())
            .output_dir(output_dir.to_path_buf())
            .events_subscriber(
                events_subscriber_per_partition
                    .remove(&rank)
                    .unwrap_or_default(),
            )
            .build()
            .map_err(|e| SimError::Config(e.to_string()))?;

        let handle = thread::Builder::new()
            .name(format!("qsim-{rank}"))
            .spawn(move || controller::execute_partition(args))?;
        handles.insert(rank, handle);
    }
    Ok(handles)
}

/// Loads the world referenced by the config, splits it as configured and runs it with one thread
/// per partition.
pub fn run_channel_from_config(
    args: &CommandLineArgs,
) -> Result<Vec<PartitionResult>, SimError> {
    let config = Config::from_file(args)?;
    let world_file = config
        .world()
        .ok_or_else(|| SimError::Config("config has no 'world' module".to_string()))?;
    let world_path = io::resolve_path(&args.config_path, &world_file.path);
    let output_dir = io::resolve_path(&args.config_path, &config.output().output_dir);

    let partitioning = config.partitioning();
    let world = World::from_file(&world_path)?
        .repartition(partitioning.num_parts, partitioning.method)?;

    let handles = run_channel(Arc::new(world), &config, &output_dir, HashMap::new())?;
    let results = controller::try_join(handles)?;
    controller::log_summary(results.iter().map(|r| &r.summary));
    Ok(results)
}

pub fn run_channel_from_args() -> Result<Vec<PartitionResult>, SimError> {
    let args = CommandLineArgs::parse();
    run_channel_from_config(&args)
}
