use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use bytes::Bytes;
use tracing::instrument;

use crate::simulation::error::CommunicationError;
use crate::simulation::messaging::barrier::PhasedBarrier;
use crate::simulation::messaging::sim_communication::{Phase, SimCommunicator};

type Envelope = (u32, Bytes);

/// Connects partitions running as threads of the same process. Every partition has one receiver
/// per phase and a sender to every other partition's receiver.
pub struct ChannelSimCommunicator {
    receiver: Receiver<Envelope>,
    senders: Vec<Sender<Envelope>>,
    counter_receiver: Receiver<Envelope>,
    counter_senders: Vec<Sender<Envelope>>,
    rank: u32,
    barrier: Arc<PhasedBarrier>,
    clock: Arc<AtomicU32>,
}

impl ChannelSimCommunicator {
    pub fn create_n_2_n(num_parts: u32) -> Vec<ChannelSimCommunicator> {
        let mut senders: Vec<_> = Vec::new();
        let mut counter_senders: Vec<_> = Vec::new();
        let mut comms: Vec<_> = Vec::new();
        let barrier = Arc::new(PhasedBarrier::new(num_parts as usize));
        let clock = Arc::new(AtomicU32::new(0));

        for rank in 0..num_parts {
            let (sender, receiver) = channel();
            let (counter_sender, counter_receiver) = channel();
            let comm = ChannelSimCommunicator {
                receiver,
                senders: vec![],
                counter_receiver,
                counter_senders: vec![],
                rank,
                barrier: barrier.clone(),
                clock: clock.clone(),
            };
            senders.push(sender);
            counter_senders.push(counter_sender);
            comms.push(comm);
        }

        for comm in &mut comms {
            comm.senders = senders.clone();
            comm.counter_senders = counter_senders.clone();
        }

        comms
    }

    fn lane(&self, phase: Phase) -> (&Receiver<Envelope>, &[Sender<Envelope>]) {
        match phase {
            Phase::Agents => (&self.receiver, &self.senders),
            Phase::Counters => (&self.counter_receiver, &self.counter_senders),
        }
    }
}

impl SimCommunicator for ChannelSimCommunicator {
    #[instrument(level = "trace", skip(self, out_messages, expected_messages, on_msg), fields(rank = self.rank))]
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
        let (receiver, senders) = self.lane(phase);

        // send messages to everyone
        for (target, msg) in out_messages {
            let sender = senders
                .get(target as usize)
                .ok_or(CommunicationError::Disconnected(target))?;
            sender
                .send((self.rank, msg))
                .map_err(|_| CommunicationError::Disconnected(target))?;
        }

        // receive messages from everyone
        while !expected_messages.is_empty() {
            let (from, msg) = receiver
                .recv()
                .map_err(|_| CommunicationError::Disconnected(self.rank))?;
            expected_messages.remove(&from);
            on_msg(from, msg)?;
        }
        Ok(())
    }

    fn barrier(&self, now: u32) -> u32 {
        self.barrier
            .wait(|| self.clock.store(now + 1, Ordering::SeqCst));
        self.clock.load(Ordering::SeqCst)
    }

    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.senders.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn exchange_per_phase() {
        let comms = ChannelSimCommunicator::create_n_2_n(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank();
                    let others: HashSet<u32> = (0..comm.size()).filter(|r| *r != rank).collect();

                    let out = others
                        .iter()
                        .map(|to| (*to, Bytes::from(vec![rank as u8, 1])))
                        .collect();
                    let mut expected = others.clone();
                    let mut received = Vec::new();
                    comm.send_receive(Phase::Agents, out, &mut expected, 0, |from, msg| {
                        assert_eq!(vec![from as u8, 1], msg.to_vec());
                        received.push(from);
                        Ok(())
                    })
                    .unwrap();

                    let out = others
                        .iter()
                        .map(|to| (*to, Bytes::from(vec![rank as u8, 2])))
                        .collect();
                    let mut expected = others.clone();
                    comm.send_receive(Phase::Counters, out, &mut expected, 0, |from, msg| {
                        assert_eq!(vec![from as u8, 2], msg.to_vec());
                        Ok(())
                    })
                    .unwrap();

                    let next = comm.barrier(0);
                    received.sort();
                    (next, received)
                })
            })
            .collect();

        for (rank, handle) in handles.into_iter().enumerate() {
            let (next, received) = handle.join().unwrap();
            assert_eq!(1, next);
            let expected: Vec<u32> = (0..3).filter(|r| *r != rank as u32).collect();
            assert_eq!(expected, received);
        }
    }

    #[test]
    fn error_in_handler_is_returned() {
        let mut comms = ChannelSimCommunicator::create_n_2_n(2);
        let comm_1 = comms.pop().unwrap();
        let comm_0 = comms.pop().unwrap();
        comm_1
            .send_receive(
                Phase::Agents,
                HashMap::from([(0, Bytes::from_static(&[0]))]),
                &mut HashSet::new(),
                0,
                |_, _| Ok(()),
            )
            .unwrap();

        let result = comm_0.send_receive(
            Phase::Agents,
            HashMap::new(),
            &mut HashSet::from([1]),
            0,
            |_, _| Err(CommunicationError::UnknownLink(3)),
        );
        assert_eq!(Err(CommunicationError::UnknownLink(3)), result);
    }
}
