use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use tracing::trace;

use crate::simulation::error::CommunicationError;

pub mod local_communicator;

#[cfg(feature = "mpi")]
pub mod mpi_communicator;

/// The two exchanges of one simulated second. Each phase has its own transport lane, so that
/// messages of different phases never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Agents,
    Counters,
}

impl Phase {
    pub fn tag(&self) -> i32 {
        match self {
            Phase::Agents => 1,
            Phase::Counters => 2,
        }
    }
}

pub trait SimCommunicator {
    /// Sends every buffer in `out_messages` to the partition it is keyed with and calls `on_msg`
    /// with the sender and the buffer of every received message, until a message from each
    /// partition in `expected_messages` has arrived.
    fn send_receive<F>(
        &self,
        phase: Phase,
        out_messages: HashMap<u32, Bytes>,
        expected_messages: &mut HashSet<u32>,
        now: u32,
        on_msg: F,
    ) -> Result<(), CommunicationError>
    where
        F: FnMut(u32, Bytes) -> Result<(), CommunicationError>;

    /// Waits for all partitions to finish second `now`. Returns the next second.
    fn barrier(&self, now: u32) -> u32;

    fn rank(&self) -> u32;

    fn size(&self) -> u32;
}

/// Communicator of a simulation with a single partition. There is nobody to talk to.
pub struct DummySimCommunicator();

impl SimCommunicator for DummySimCommunicator {
    fn send_receive<F>(
        &self,
        _phase: Phase,
        _out_messages: HashMap<u32, Bytes>,
        _expected_messages: &mut HashSet<u32>,
        _now: u32,
        _on_msg: F,
    ) -> Result<(), CommunicationError>
    where
        F: FnMut(u32, Bytes) -> Result<(), CommunicationError>,
    {
        Ok(())
    }

    fn barrier(&self, now: u32) -> u32 {
        trace!("Barrier was called on DummySimCommunicator, which doesn't wait for anybody.");
        now + 1
    }

    fn rank(&self) -> u32 {
        0
    }

    fn size(&self) -> u32 {
        1
    }
}
