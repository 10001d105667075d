use std::process::ExitCode;

use rust_realm_sim::simulation::controller::local_controller;
use rust_realm_sim::simulation::logging;
use tracing::error;

fn main() -> ExitCode {
    let _guard = logging::init_std_out_logging_thread_local();
    match local_controller::run_channel_from_args() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Simulation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
