use std::collections::{BTreeMap, VecDeque};

/// A network edge. Agents traverse it in FIFO order and at most `capacity` agents can be on the
/// link at the same time.
#[derive(Debug, Clone)]
pub struct Link {
    id: u32,
    length: f32,
    velocity: f32,
    capacity: u32,
    q: VecDeque<AgentQEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentQEntry {
    pub agent: u32,
    pub finish_time: u32,
    /// Partition the agent was sent from, if it entered the link across a partition boundary.
    pub from_part: Option<u32>,
}

impl Link {
    pub fn new(id: u32, length: f32, velocity: f32, capacity: u32) -> Self {
        Link {
            id,
            length,
            velocity,
            // a capacity of 0 would block every agent forever
            capacity: capacity.max(1),
            q: VecDeque::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    /// Seconds an agent needs to traverse this link. A requested velocity of 0 means the agent
    /// travels with free flow velocity. Every traversal takes at least one second plus the advance
    /// delay. Travel times of very long links are capped at `u32::MAX`.
    pub fn travel_time(&self, requested_velocity: u8, advance_delay: u32) -> u32 {
        let velocity = if requested_velocity == 0 {
            self.velocity
        } else {
            self.velocity.min(requested_velocity as f32)
        };
        advance_delay.saturating_add(1.max((self.length / velocity) as u32))
    }

    /// Enqueues the agent if there is space left on the link.
    pub fn push(&mut self, agent: u32, finish_time: u32) -> bool {
        self.push_entry(AgentQEntry {
            agent,
            finish_time,
            from_part: None,
        })
    }

    pub fn push_entry(&mut self, entry: AgentQEntry) -> bool {
        if self.is_full() {
            return false;
        }
        self.q.push_back(entry);
        true
    }

    /// Removes the head of the queue. Callers must make sure there is a head which is due.
    pub fn pop(&mut self) -> AgentQEntry {
        self.q.pop_front().unwrap_or_else(|| {
            panic!(
                "There was no agent on link {}. Use 'front' to test if an agent is present first.",
                self.id
            )
        })
    }

    pub fn front(&self) -> Option<&AgentQEntry> {
        self.q.front()
    }

    /// Finish time of the head of the queue, or 0 if the link is empty.
    pub fn peek_finish_time(&self) -> u32 {
        self.q.front().map(|e| e.finish_time).unwrap_or(0)
    }

    pub fn is_full(&self) -> bool {
        self.q.len() >= self.capacity as usize
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentQEntry> {
        self.q.iter()
    }
}

/// Local part of a link whose upstream neighbors belong to other partitions. Agents arriving
/// from a neighbor are queued in `inbound` while the link is full. Inbound agents take
/// precedence over local agents. Every agent from a neighbor leaving the link is counted, so
/// that the neighbor can release the capacity it reserved for the agents it sent.
#[derive(Debug, Clone)]
pub struct SplitInLink {
    pub from_parts: Vec<u32>,
    pub local_link: Link,
    inbound: VecDeque<(u32, u32)>,
    processed: BTreeMap<u32, u32>,
}

impl SplitInLink {
    pub fn new(from_parts: Vec<u32>, local_link: Link) -> Self {
        SplitInLink {
            from_parts,
            local_link,
            inbound: VecDeque::new(),
            processed: BTreeMap::new(),
        }
    }

    pub fn push_inbound(&mut self, agent: u32, from_part: u32) {
        self.inbound.push_back((agent, from_part));
    }

    /// The next waiting inbound agent and the partition it was sent from.
    pub fn inbound_front(&self) -> Option<(u32, u32)> {
        self.inbound.front().copied()
    }

    pub fn pop_inbound(&mut self) -> (u32, u32) {
        self.inbound
            .pop_front()
            .expect("No inbound agent left. Use 'inbound_front' first.")
    }

    pub fn inbound(&self) -> impl Iterator<Item = u32> + '_ {
        self.inbound.iter().map(|(agent, _)| *agent)
    }

    /// Returns the number of agents per sending partition, which left the link since the last
    /// call.
    pub fn take_processed(&mut self) -> BTreeMap<u32, u32> {
        std::mem::take(&mut self.processed)
    }
}

/// Proxy of a link owned by a neighbor partition. Agents pushed here are sent to the neighbor at
/// the end of the second. The proxy only knows how many agents it has sent and how many of them
/// the neighbor reported as processed, which is enough to keep the neighbor's link within its
/// capacity.
#[derive(Debug, Clone)]
pub struct SplitOutLink {
    pub id: u32,
    pub to_part: u32,
    capacity: u32,
    occupancy: u32,
    outbox: Vec<u32>,
}

impl SplitOutLink {
    pub fn new(id: u32, to_part: u32, capacity: u32) -> Self {
        SplitOutLink {
            id,
            to_part,
            capacity: capacity.max(1),
            occupancy: 0,
            outbox: Vec::new(),
        }
    }

    pub fn push(&mut self, agent: u32) -> bool {
        if self.occupancy >= self.capacity {
            return false;
        }
        self.occupancy += 1;
        self.outbox.push(agent);
        true
    }

    pub fn take_agents(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.outbox)
    }

    pub fn apply_processed(&mut self, processed: u32) {
        assert!(
            processed <= self.occupancy,
            "Neighbor #{} reported {processed} processed agents on link {}, but only {} were sent.",
            self.to_part,
            self.id,
            self.occupancy
        );
        self.occupancy -= processed;
    }

    pub fn occupancy(&self) -> u32 {
        self.occupancy
    }
}

#[derive(Debug, Clone)]
pub enum SimLink {
    Local(Link),
    In(SplitInLink),
    Out(SplitOutLink),
    /// A link of another partition, which isn't adjacent to this one.
    Remote { id: u32, owner: u32 },
}

impl SimLink {
    pub fn id(&self) -> u32 {
        match self {
            SimLink::Local(l) => l.id,
            SimLink::In(il) => il.local_link.id,
            SimLink::Out(ol) => ol.id,
            SimLink::Remote { id, .. } => *id,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, SimLink::Local(_) | SimLink::In(_))
    }

    /// The link agents are queued on, if this partition owns the link.
    pub fn local(&self) -> Option<&Link> {
        match self {
            SimLink::Local(l) => Some(l),
            SimLink::In(il) => Some(&il.local_link),
            _ => None,
        }
    }

    pub fn local_mut(&mut self) -> Option<&mut Link> {
        match self {
            SimLink::Local(l) => Some(l),
            SimLink::In(il) => Some(&mut il.local_link),
            _ => None,
        }
    }

    /// Pushes an agent of this partition onto the link. In links only accept local agents once
    /// all inbound agents have entered.
    pub fn push(&mut self, agent: u32, finish_time: u32) -> bool {
        match self {
            SimLink::Local(l) => l.push(agent, finish_time),
            SimLink::In(il) => il.inbound.is_empty() && il.local_link.push(agent, finish_time),
            SimLink::Out(ol) => ol.push(agent),
            SimLink::Remote { id, owner } => {
                panic!("Can't push agent {agent} onto link {id} of partition #{owner}.")
            }
        }
    }

    pub fn pop(&mut self) -> AgentQEntry {
        match self {
            SimLink::Local(l) => l.pop(),
            SimLink::In(il) => {
                let entry = il.local_link.pop();
                if let Some(from_part) = entry.from_part {
                    *il.processed.entry(from_part).or_default() += 1;
                }
                entry
            }
            SimLink::Out(_) | SimLink::Remote { .. } => {
                panic!("Can't pop agent from link {} of another partition", self.id())
            }
        }
    }

    pub fn front(&self) -> Option<&AgentQEntry> {
        self.local().and_then(|l| l.front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn travel_time_with_free_flow_velocity() {
        let link = Link::new(0, 100., 10., 1);
        assert_eq!(11, link.travel_time(0, 1));
    }

    #[test]
    fn travel_time_with_slower_agent() {
        let link = Link::new(0, 100., 10., 1);
        assert_eq!(20, link.travel_time(5, 0));
        // faster agents travel at most with free flow velocity
        assert_eq!(10, link.travel_time(50, 0));
    }

    #[test]
    fn travel_time_at_least_one_second() {
        let link = Link::new(0, 1., 100., 1);
        assert_eq!(1, link.travel_time(0, 0));
        assert_eq!(3, link.travel_time(0, 2));
    }

    #[test]
    fn travel_time_of_very_long_link_is_capped() {
        let link = Link::new(0, 1e12, 0.001, 1);
        assert_eq!(u32::MAX, link.travel_time(0, 5));
    }

    #[test]
    fn push_until_full() {
        let mut link = Link::new(0, 100., 10., 2);
        assert!(link.push(1, 10));
        assert!(link.push(2, 11));
        assert!(!link.push(3, 12));
        assert_eq!(2, link.len());
        assert_eq!(vec![1, 2], link.iter().map(|e| e.agent).collect::<Vec<_>>());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut link = Link::new(0, 100., 10., 0);
        assert_eq!(1, link.capacity());
        assert!(link.push(1, 10));
        assert!(!link.push(2, 10));
    }

    #[test]
    fn fifo_order() {
        let mut link = Link::new(0, 100., 10., 10);
        for agent in 0..5 {
            link.push(agent, 20 - agent);
        }
        let popped: Vec<_> = (0..5).map(|_| link.pop().agent).collect();
        assert_eq!(vec![0, 1, 2, 3, 4], popped);
    }

    #[test]
    fn peek_finish_time() {
        let mut link = Link::new(0, 100., 10., 10);
        assert_eq!(0, link.peek_finish_time());
        link.push(1, 17);
        link.push(2, 12);
        assert_eq!(17, link.peek_finish_time());
    }

    #[test]
    #[should_panic]
    fn pop_empty() {
        Link::new(0, 100., 10., 10).pop();
    }

    #[test]
    fn capacity_never_exceeded() {
        let mut link = Link::new(0, 10., 10., 3);
        // deterministic pseudo random sequence of pushes and pops
        let mut seed: u32 = 17;
        for i in 0..1000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            if seed % 3 == 0 && !link.is_empty() {
                link.pop();
            } else {
                link.push(i, i);
            }
            assert!(link.len() <= 3);
        }
    }

    #[test]
    fn in_link_counts_processed_and_blocks_local_pushes() {
        let mut link = SimLink::In(SplitInLink::new(vec![1], Link::new(0, 100., 10., 1)));
        if let SimLink::In(il) = &mut link {
            assert!(il.local_link.push_entry(AgentQEntry {
                agent: 1,
                finish_time: 10,
                from_part: Some(1),
            }));
            il.push_inbound(2, 1);
        }
        link.pop();
        // inbound agent 2 is waiting, local agent 3 must not overtake
        assert!(!link.push(3, 11));

        if let SimLink::In(il) = &mut link {
            assert_eq!(BTreeMap::from([(1, 1)]), il.take_processed());
            assert!(il.take_processed().is_empty());
            assert_eq!((2, 1), il.pop_inbound());
        }
        assert!(link.push(3, 11));
        // local agents are not reported to neighbors
        link.pop();
        if let SimLink::In(il) = &mut link {
            assert!(il.take_processed().is_empty());
        }
    }

    #[test]
    fn out_link_reserves_capacity() {
        let mut link = SplitOutLink::new(0, 1, 2);
        assert!(link.push(1));
        assert!(link.push(2));
        assert!(!link.push(3));
        assert_eq!(vec![1, 2], link.take_agents());
        assert_eq!(2, link.occupancy());

        link.apply_processed(1);
        assert!(link.push(3));
        assert_eq!(vec![3], link.take_agents());
    }

    #[test]
    #[should_panic]
    fn out_link_processed_more_than_sent() {
        let mut link = SplitOutLink::new(0, 1, 2);
        link.push(1);
        link.apply_processed(2);
    }
}
