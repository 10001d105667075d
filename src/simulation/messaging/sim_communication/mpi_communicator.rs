use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use mpi::collective::CommunicatorCollectives;
use mpi::point_to_point::{Destination, Source};
use mpi::topology::{Communicator, SimpleCommunicator};
use mpi::Rank;
use tracing::{instrument, span, Level};

use crate::simulation::error::CommunicationError;
use crate::simulation::messaging::sim_communication::{Phase, SimCommunicator};

pub struct MpiSimCommunicator {
    pub mpi_communicator: SimpleCommunicator,
}

impl MpiSimCommunicator {
    pub fn new(mpi_communicator: SimpleCommunicator) -> Self {
        MpiSimCommunicator { mpi_communicator }
    }
}

impl SimCommunicator for MpiSimCommunicator {
    #[instrument(level = "trace", skip(self, out_messages, expected_messages, on_msg), fields(rank = self.rank()))]
    fn send_receive<F>(
        &self,
        phase: Phase,
        out_messages: HashMap<u32, Bytes>,
        expected_messages: &mut HashSet<u32>,
        now: u32,
        mut on_msg: F,
    ) -> Result<(), CommunicationError>
    where
        F: FnMut(u32, Bytes) -> Result<(), CommunicationError>,
    {
        let tag = phase.tag();
        let buf_msg: Vec<_> = out_messages
            .into_iter()
            .map(|(to, m)| (to, m.to_vec()))
            .collect();

        // Immediate sends, so that two partitions sending to each other don't block on send while
        // both wait for the other one to post a receive.
        mpi::request::multiple_scope(buf_msg.len(), |scope, reqs| {
            for (to, buf) in buf_msg.iter() {
                let req = self
                    .mpi_communicator
                    .process_at_rank(*to as Rank)
                    .immediate_send_with_tag(scope, &buf[..], tag);
                reqs.add(req);
            }

            let receive_span = span!(Level::TRACE, "receive_msgs", rank = self.rank(), now = now);
            let mut result = Ok(());
            while !expected_messages.is_empty() {
                let receive_time = receive_span.enter();
                let (encoded_msg, status): (Vec<u8>, _) = self
                    .mpi_communicator
                    .any_process()
                    .receive_vec_with_tag(tag);
                drop(receive_time);

                let from = status.source_rank() as u32;
                expected_messages.remove(&from);
                if let Err(e) = on_msg(from, Bytes::from(encoded_msg)) {
                    result = Err(e);
                    break;
                }
            }

            // all sends must complete before the buffers go out of scope
            reqs.wait_all(&mut Vec::new());
            result
        })
    }

    fn barrier(&self, now: u32) -> u32 {
        self.mpi_communicator.barrier();
        now + 1
    }

    fn rank(&self) -> u32 {
        self.mpi_communicator.rank() as u32
    }

    fn size(&self) -> u32 {
        self.mpi_communicator.size() as u32
    }
}
