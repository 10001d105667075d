use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::simulation::io::create_writer;

/// Something which can describe its state in a human readable way after a run.
pub trait DumpState {
    fn dump_state(&self, writer: &mut dyn Write) -> std::io::Result<()>;
}

pub fn state_path(output_dir: &Path, rank: u32) -> PathBuf {
    output_dir.join(format!("state.{rank}.txt"))
}

/// Writes the state of partition `rank` into `state.<rank>.txt` in `output_dir`.
pub fn write_state<D: DumpState>(state: &D, output_dir: &Path, rank: u32) -> std::io::Result<PathBuf> {
    let path = state_path(output_dir, rank);
    info!("#{rank} writing state to {path:?}");
    let mut writer = create_writer(&path)?;
    state.dump_state(&mut writer)?;
    writer.flush()?;
    Ok(path)
}
