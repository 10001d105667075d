use std::process::ExitCode;

use rust_realm_sim::simulation::controller::mpi_controller;
use rust_realm_sim::simulation::logging;
use tracing::error;

fn main() -> ExitCode {
    let _guard = logging::init_std_out_logging_thread_local();
    match mpi_controller::run_mpi() {
        Ok(result) => {
            if result.summary.unfinished > 0 {
                tracing::info!(
                    "#{} ended with {} unfinished agents",
                    result.summary.rank,
                    result.summary.unfinished
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Simulation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
