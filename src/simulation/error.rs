use std::path::PathBuf;

use thiserror::Error;

use crate::simulation::instruction::Kind;

/// Raised while building instructions and plans. These happen before a simulation starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{field} of {kind:?} instruction is {value}, but must not exceed {max}")]
    FieldOverflow {
        kind: Kind,
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("plan has {len} instructions, but at most {max} are allowed")]
    PlanTooLong { len: usize, max: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown instruction kind {0}")]
    UnknownKind(u8),
}

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world must have at least one partition")]
    NoPartitions,

    #[error("{entity} ids must be dense: found id {found} at position {expected}")]
    SparseIds {
        entity: &'static str,
        expected: usize,
        found: u32,
    },

    #[error("agent {agent} references unknown {entity} {id} at plan index {index}")]
    DanglingReference {
        agent: u32,
        entity: &'static str,
        id: u32,
        index: usize,
    },

    #[error("stop {stop} is located on unknown link {link}")]
    DanglingStopLink { stop: u32, link: u32 },

    #[error("link {id} is invalid: {reason}")]
    InvalidLink { id: u32, reason: &'static str },

    #[error("agent {agent} has a corrupted instruction at plan index {index}: {source}")]
    CorruptedPlan {
        agent: u32,
        index: usize,
        #[source]
        source: DecodeError,
    },

    #[error("{entity} {id} is assigned to partition {part}, but there are only {num_parts}")]
    PartitionOutOfRange {
        entity: &'static str,
        id: u32,
        part: u32,
        num_parts: u32,
    },

    #[error("agent {id} has an invalid state: {reason}")]
    InvalidAgent { id: u32, reason: String },

    #[error("unsupported world file {0:?}. Supported endings are '.bin', '.json' with an optional '.gz'")]
    UnsupportedFormat(PathBuf),

    #[error("failed to decode world snapshot: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the boundary exchange. The kernel has no partial-failure mode, so all of them abort
/// the run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommunicationError {
    #[error("message buffer ended after {offset} bytes while reading {reading}")]
    Truncated { offset: usize, reading: &'static str },

    #[error("received message for second {received} from #{from}, but expected second {expected}")]
    UnexpectedTime { from: u32, received: u32, expected: u32 },

    #[error("received message for unknown agent {0}")]
    UnknownAgent(u32),

    #[error("received message for link {0} which is not a boundary link of this partition")]
    UnknownLink(u32),

    #[error("partition #{0} is not a neighbor of this partition")]
    NotANeighbor(u32),

    #[error("channel to partition #{0} is closed")]
    Disconnected(u32),
}

/// Top level error returned from runs and binaries.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    World(#[from] WorldError),

    #[error(transparent)]
    Communication(#[from] CommunicationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("partition thread #{0} panicked")]
    PartitionPanicked(u32),
}
