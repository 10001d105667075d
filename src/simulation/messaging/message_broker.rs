use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use bytes::Bytes;
use tracing::trace;

use crate::simulation::error::CommunicationError;
use crate::simulation::messaging::messages::{AgentRecord, CounterMessage, SyncMessage};
use crate::simulation::messaging::sim_communication::{Phase, SimCommunicator};

/// Collects the boundary traffic of one partition during a second and exchanges it with the
/// neighbors of the partition at the end of the second. Every partition sends a (possibly empty)
/// message to each neighbor in both phases, so receivers always know how many messages to wait
/// for. Neighbors are fixed before the run.
pub struct NetMessageBroker<C>
where
    C: SimCommunicator,
{
    communicator: Rc<C>,
    out_messages: HashMap<u32, SyncMessage>,
    out_counters: HashMap<u32, CounterMessage>,
    neighbors: HashSet<u32>,
}

impl<C> NetMessageBroker<C>
where
    C: SimCommunicator,
{
    pub fn new(communicator: Rc<C>, neighbors: impl IntoIterator<Item = u32>) -> Self {
        let neighbors = neighbors.into_iter().collect();
        Self {
            communicator,
            out_messages: Default::default(),
            out_counters: Default::default(),
            neighbors,
        }
    }

    pub fn rank(&self) -> u32 {
        self.communicator.rank()
    }

    pub fn neighbors(&self) -> &HashSet<u32> {
        &self.neighbors
    }

    pub fn communicator(&self) -> &C {
        &self.communicator
    }

    /// Queues `agent` for partition `to`. `link` is the boundary link the agent enters there, or
    /// None if the agent is handed over directly.
    pub fn add_agent(&mut self, to: u32, link: Option<u32>, agent: AgentRecord, now: u32) {
        let rank = self.rank();
        self.out_messages
            .entry(to)
            .or_insert_with(|| SyncMessage::new(now, rank, to))
            .add_agent(link, agent);
    }

    pub fn add_counter(&mut self, to: u32, link: u32, processed: u32, now: u32) {
        let rank = self.rank();
        self.out_counters
            .entry(to)
            .or_insert_with(|| CounterMessage::new(now, rank, to))
            .add_counter(link, processed);
    }

    /// Exchanges the queued agents. `is_vehicle` tells the decoder which agent records carry
    /// passengers.
    pub fn send_recv_agents<F>(
        &mut self,
        now: u32,
        is_vehicle: F,
    ) -> Result<Vec<SyncMessage>, CommunicationError>
    where
        F: Fn(u32) -> Option<bool>,
    {
        let rank = self.rank();
        let mut messages = std::mem::take(&mut self.out_messages);
        self.check_targets(messages.keys())?;
        for neighbor in &self.neighbors {
            messages
                .entry(*neighbor)
                .or_insert_with(|| SyncMessage::new(now, rank, *neighbor));
        }
        let buffers = messages
            .into_iter()
            .map(|(to, msg)| (to, msg.serialize()))
            .collect();

        let mut result = Vec::with_capacity(self.neighbors.len());
        let mut expected = self.neighbors.clone();
        self.communicator
            .send_receive(Phase::Agents, buffers, &mut expected, now, |from, data| {
                let msg = SyncMessage::deserialize(data, rank, &is_vehicle)?;
                Self::check_time(from, msg.time, now)?;
                trace!(from, records = msg.records.len(), "Received agents");
                result.push(msg);
                Ok(())
            })?;
        Ok(result)
    }

    pub fn send_recv_counters(&mut self, now: u32) -> Result<Vec<CounterMessage>, CommunicationError> {
        let rank = self.rank();
        let mut messages = std::mem::take(&mut self.out_counters);
        self.check_targets(messages.keys())?;
        for neighbor in &self.neighbors {
            messages
                .entry(*neighbor)
                .or_insert_with(|| CounterMessage::new(now, rank, *neighbor));
        }
        let buffers: HashMap<u32, Bytes> = messages
            .into_iter()
            .map(|(to, msg)| (to, msg.serialize()))
            .collect();

        let mut result = Vec::with_capacity(self.neighbors.len());
        let mut expected = self.neighbors.clone();
        self.communicator
            .send_receive(Phase::Counters, buffers, &mut expected, now, |from, data| {
                let msg = CounterMessage::deserialize(data, rank)?;
                Self::check_time(from, msg.time, now)?;
                result.push(msg);
                Ok(())
            })?;
        Ok(result)
    }

    /// A message to a partition which doesn't expect it would be read in a later exchange.
    fn check_targets<'a>(
        &self,
        mut targets: impl Iterator<Item = &'a u32>,
    ) -> Result<(), CommunicationError> {
        match targets.find(|to| !self.neighbors.contains(*to)) {
            Some(to) => Err(CommunicationError::NotANeighbor(*to)),
            None => Ok(()),
        }
    }

    fn check_time(from: u32, received: u32, expected: u32) -> Result<(), CommunicationError> {
        if received != expected {
            return Err(CommunicationError::UnexpectedTime {
                from,
                received,
                expected,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::thread;

    use super::*;
    use crate::simulation::messaging::sim_communication::local_communicator::ChannelSimCommunicator;
    use crate::simulation::messaging::sim_communication::DummySimCommunicator;

    /// Runs `test` with a broker per partition, where every partition is a neighbor of every
    /// other.
    fn execute_test<F>(num_parts: u32, test: F)
    where
        F: Fn(NetMessageBroker<ChannelSimCommunicator>) + Send + Sync + Copy + 'static,
    {
        let handles: Vec<_> = ChannelSimCommunicator::create_n_2_n(num_parts)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank();
                    let others = (0..num_parts).filter(move |r| *r != rank);
                    test(NetMessageBroker::new(Rc::new(comm), others))
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    fn agent(id: u32, cursor: u32) -> AgentRecord {
        AgentRecord {
            id,
            cursor,
            passengers: None,
        }
    }

    #[test]
    fn send_recv_empty_msgs() {
        execute_test(4, |mut broker| {
            let result = broker.send_recv_agents(0, |_| Some(false)).unwrap();
            assert_eq!(3, result.len());
            assert!(result.iter().all(|m| m.is_empty() && m.time == 0));

            let counters = broker.send_recv_counters(0).unwrap();
            assert_eq!(3, counters.len());
        });
    }

    #[test]
    fn send_recv_agent_across_two_steps() {
        execute_test(3, |mut broker| {

            if broker.rank() == 0 {
                broker.add_agent(1, Some(4), agent(7, 1), 0);
            }
            let result_0 = broker.send_recv_agents(0, |_| Some(false)).unwrap();
            if broker.rank() == 1 {
                let msg = result_0.iter().find(|m| m.from == 0).unwrap();
                assert_eq!(Some(4), msg.records[0].link);
                assert_eq!(agent(7, 1), msg.records[0].agents[0]);
                broker.add_agent(2, None, agent(7, 2), 1);
                broker.add_counter(0, 4, 1, 0);
            } else {
                assert!(result_0.iter().all(|m| m.is_empty()));
            }

            let counters = broker.send_recv_counters(0).unwrap();
            if broker.rank() == 0 {
                let msg = counters.iter().find(|m| m.from == 1).unwrap();
                assert_eq!(vec![(4, 1)], msg.counters);
            }

            let result_1 = broker.send_recv_agents(1, |_| Some(false)).unwrap();
            if broker.rank() == 2 {
                let msg = result_1.iter().find(|m| m.from == 1).unwrap();
                assert_eq!(None, msg.records[0].link);
                assert_eq!(2, msg.records[0].agents[0].cursor);
            }
        });
    }

    #[test]
    fn partitions_out_of_step() {
        execute_test(2, |mut broker| {
            let now = broker.rank();
            let result = broker.send_recv_agents(now, |_| Some(false));
            let expected_err = CommunicationError::UnexpectedTime {
                from: 1 - now,
                received: 1 - now,
                expected: now,
            };
            assert_eq!(Err(expected_err), result);
        });
    }

    #[test]
    fn only_neighbors_are_messaged() {
        // 0 - 1 - 2, partitions 0 and 2 never talk to each other
        let comms = ChannelSimCommunicator::create_n_2_n(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let neighbors = if comm.rank() == 1 { vec![0, 2] } else { vec![1] };
                    let mut broker = NetMessageBroker::new(Rc::new(comm), neighbors);
                    if broker.rank() == 0 {
                        broker.add_agent(1, Some(3), agent(5, 2), 0);
                    }
                    let result = broker.send_recv_agents(0, |_| Some(false)).unwrap();
                    let mut from: Vec<u32> = result.iter().map(|m| m.from).collect();
                    from.sort();
                    (broker.rank(), from, result.iter().map(|m| m.records.len()).sum::<usize>())
                })
            })
            .collect();

        let mut results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort();
        assert_eq!(
            vec![(0, vec![1], 0), (1, vec![0, 2], 1), (2, vec![1], 0)],
            results
        );
    }

    #[test]
    fn message_to_non_neighbor_is_an_error() {
        let mut broker = NetMessageBroker::new(Rc::new(DummySimCommunicator()), []);
        broker.add_agent(1, None, agent(0, 0), 0);
        assert_eq!(
            Err(CommunicationError::NotANeighbor(1)),
            broker.send_recv_agents(0, |_| Some(false))
        );

        broker.add_counter(2, 0, 1, 0);
        assert_eq!(
            Err(CommunicationError::NotANeighbor(2)),
            broker.send_recv_counters(0)
        );
    }

    #[test]
    fn single_partition_has_no_neighbors() {
        let mut broker = NetMessageBroker::new(Rc::new(DummySimCommunicator()), []);
        assert!(broker.neighbors().is_empty());
        assert!(broker.send_recv_agents(0, |_| None).unwrap().is_empty());
        assert!(broker.send_recv_counters(0).unwrap().is_empty());
    }
}
