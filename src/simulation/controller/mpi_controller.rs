use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mpi::collective::CommunicatorCollectives;
use mpi::topology::Communicator;
use tracing::info;

use crate::simulation::config::{Logging, Output, PartitionMethod, Simulation};
use crate::simulation::controller::{self, PartitionArgumentsBuilder, PartitionResult};
use crate::simulation::error::SimError;
use crate::simulation::messaging::sim_communication::mpi_communicator::MpiSimCommunicator;
use crate::simulation::world::World;

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs one partition per MPI process", long_about = None)]
pub struct MpiArgs {
    /// World snapshot (.bin or .json, optionally gzipped)
    pub world: PathBuf,
    /// Minimum wall clock duration of one simulated second. 0 runs unpaced.
    pub tick_ms: u64,
    /// Number of simulated seconds, starting at 0.
    pub ticks: u32,
}

pub fn run_mpi() -> Result<PartitionResult, SimError> {
    let args = MpiArgs::parse();
    if args.ticks == 0 {
        return Err(SimError::Config("ticks must be at least 1".to_string()));
    }

    let universe = mpi::initialize()
        .ok_or_else(|| SimError::Config("MPI was initialized already".to_string()))?;
    let world = universe.world();
    let size = world.size() as u32;
    let rank = world.rank();

    let sim_world = World::from_file(&args.world)?;
    // a snapshot split for a different number of processes is split again
    let sim_world = if sim_world.num_parts() == size {
        sim_world
    } else {
        info!(
            "World has {} partitions, but {size} processes were started. Partitioning by link id.",
            sim_world.num_parts()
        );
        sim_world.repartition(size, PartitionMethod::Modulo)?
    };

    let partition_args = PartitionArgumentsBuilder::default()
        .communicator(MpiSimCommunicator::new(world))
        .world(Arc::new(sim_world))
        .simulation(Simulation {
            start_time: 0,
            end_time: args.ticks - 1,
            link_advance_delay: 0,
            tick_duration_ms: args.tick_ms,
        })
        .output(Output {
            output_dir: "./".to_string(),
            logging: Logging::Info,
            ..Output::default()
        })
        .output_dir(PathBuf::from("./"))
        .build()
        .map_err(|e| SimError::Config(e.to_string()))?;
    let result = controller::execute_partition(partition_args)?;

    info!("#{rank} at barrier.");
    universe.world().barrier();
    info!("Process #{rank} finishing.");
    Ok(result)
}
