use std::collections::{BTreeMap, VecDeque};

use nohash_hasher::IntMap;

/// Passengers waiting at transit stops. Queues are kept per stop and route, and within those per
/// local index of the stop where the passengers want to leave the vehicle. This way a vehicle can
/// pick up passengers in order of their destination along the route.
#[derive(Debug, Default)]
pub struct StopQueues {
    queues: IntMap<u32, BTreeMap<u8, VecDeque<u32>>>,
    len: usize,
}

impl StopQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stop: u16, route: u16, egress_index: u8, agent: u32) {
        self.queues
            .entry(Self::key(stop, route))
            .or_default()
            .entry(egress_index)
            .or_default()
            .push_back(agent);
        self.len += 1;
    }

    /// Boards waiting passengers with an egress index of at least `from_index` as long as `admit`
    /// returns true. Passengers with a lower egress index are boarded first, passengers within one
    /// queue in the order they arrived. Returns the boarded passengers with their egress index.
    pub fn board<F>(&mut self, stop: u16, route: u16, from_index: u8, mut admit: F) -> Vec<(u8, u32)>
    where
        F: FnMut(u8, u32) -> bool,
    {
        let mut boarded = Vec::new();
        let Some(by_index) = self.queues.get_mut(&Self::key(stop, route)) else {
            return boarded;
        };

        'outer: for (index, queue) in by_index.range_mut(from_index..) {
            while let Some(passenger) = queue.front().copied() {
                if !admit(*index, passenger) {
                    break 'outer;
                }
                queue.pop_front();
                boarded.push((*index, passenger));
            }
        }

        by_index.retain(|_, q| !q.is_empty());
        self.len -= boarded.len();
        boarded
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates `(stop, route, waiting agents)` for diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16, Vec<u32>)> + '_ {
        self.queues.iter().map(|(key, by_index)| {
            let waiting = by_index.values().flatten().copied().collect();
            ((key >> 16) as u16, *key as u16, waiting)
        })
    }

    fn key(stop: u16, route: u16) -> u32 {
        ((stop as u32) << 16) | route as u32
    }
}
