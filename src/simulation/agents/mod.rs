use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::simulation::instruction::{Instruction, Plan};
use crate::simulation::messaging::events::{Event, EventsPublisher};

/// An actor executing a fixed plan. Agents with a capacity > 0 are vehicles and may carry other
/// agents as passengers.
///
/// The plan is shared between all clones of an agent. Only cursor, link times and passengers are
/// state of the clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    id: u32,
    plan: Arc<Plan>,
    cursor: u32,
    link_finish_time: u32,
    link_start_time: u32,
    capacity: u32,
    finish_event: u16,
    // keyed by the local index of the stop where the passengers leave the vehicle
    passengers: BTreeMap<u8, Vec<u32>>,
    occupancy: u32,
}

impl Agent {
    pub fn new(id: u32, plan: Plan) -> Self {
        Self::new_vehicle(id, plan, 0)
    }

    pub fn new_vehicle(id: u32, plan: Plan, capacity: u32) -> Self {
        Agent {
            id,
            plan: Arc::new(plan),
            cursor: 0,
            link_finish_time: 0,
            link_start_time: 0,
            capacity,
            finish_event: 0,
            passengers: BTreeMap::new(),
            occupancy: 0,
        }
    }

    pub fn with_finish_event(mut self, finish_event: u16) -> Self {
        self.finish_event = finish_event;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_vehicle(&self) -> bool {
        self.capacity > 0
    }

    pub fn finish_event(&self) -> u16 {
        self.finish_event
    }

    pub fn occupancy(&self) -> u32 {
        self.occupancy
    }

    pub fn link_finish_time(&self) -> u32 {
        self.link_finish_time
    }

    pub fn link_start_time(&self) -> u32 {
        self.link_start_time
    }

    pub fn set_link_times(&mut self, start: u32, finish: u32) {
        self.link_start_time = start;
        self.link_finish_time = finish;
    }

    /// The instruction the agent executes next, or None if the agent is finished.
    pub fn curr_instruction(&self) -> Option<Instruction> {
        self.plan.get(self.cursor as usize)
    }

    pub fn instruction_at(&self, index: u32) -> Option<Instruction> {
        self.plan.get(index as usize)
    }

    /// An agent is finished once every instruction of its plan was consumed.
    pub fn finished(&self) -> bool {
        self.cursor as usize >= self.plan.len()
    }

    /// Consumes the current instruction and stamps its event with `now`.
    pub fn advance(&mut self, now: u32, events: &mut EventsPublisher) {
        let correlation = self.consume();
        if correlation != 0 {
            events.publish_event(now, &Event::new_advance(self.id, correlation));
        }
    }

    /// Consumes the current Access instruction of a passenger boarding `vehicle`.
    pub fn advance_access(&mut self, vehicle: u32, now: u32, events: &mut EventsPublisher) {
        let correlation = self.consume();
        if correlation != 0 {
            events.publish_event(now, &Event::new_access(self.id, correlation, vehicle));
        }
    }

    /// Consumes the current Egress instruction of a passenger leaving `vehicle`.
    pub fn advance_egress(&mut self, vehicle: u32, now: u32, events: &mut EventsPublisher) {
        let correlation = self.consume();
        if correlation != 0 {
            events.publish_event(now, &Event::new_egress(self.id, correlation, vehicle));
        }
    }

    fn consume(&mut self) -> u16 {
        let instruction = self.curr_instruction().unwrap_or_else(|| {
            panic!(
                "Agent {} can't advance beyond the end of its plan of length {}",
                self.id,
                self.plan.len()
            )
        });
        self.cursor += 1;
        instruction.event()
    }

    /// Overwrites the cursor with a value received from another partition. Cursors only ever
    /// grow, so a smaller value means the partitions went out of sync.
    pub fn set_cursor(&mut self, cursor: u32) {
        assert!(
            cursor >= self.cursor,
            "Cursor of agent {} must not decrease from {} to {cursor}",
            self.id,
            self.cursor
        );
        self.cursor = cursor;
    }

    /// Detaches all passengers which leave the vehicle at `stop_index`.
    pub fn egress(&mut self, stop_index: u8) -> Vec<u32> {
        let passengers = self.passengers.remove(&stop_index).unwrap_or_default();
        self.occupancy -= passengers.len() as u32;
        passengers
    }

    /// Admits `passenger`, who leaves the vehicle at `stop_index`, if there is a free seat.
    pub fn access(&mut self, stop_index: u8, passenger: u32) -> bool {
        if self.occupancy >= self.capacity {
            return false;
        }
        self.passengers.entry(stop_index).or_default().push(passenger);
        self.occupancy += 1;
        true
    }

    /// Passengers by the stop index they leave the vehicle at.
    pub fn passengers(&self) -> impl Iterator<Item = (u8, &[u32])> {
        self.passengers.iter().map(|(i, p)| (*i, p.as_slice()))
    }

    /// Number of passengers over all egress stops.
    pub fn num_passengers(&self) -> usize {
        self.passengers.values().map(|p| p.len()).sum()
    }

    /// Checks state which is read from a snapshot rather than built through the methods above.
    pub fn check_state(&self) -> Result<(), String> {
        if self.cursor as usize > self.plan.len() {
            return Err(format!(
                "cursor {} is beyond the end of its plan of length {}",
                self.cursor,
                self.plan.len()
            ));
        }
        if self.occupancy > self.capacity {
            return Err(format!(
                "occupancy {} exceeds capacity {}",
                self.occupancy, self.capacity
            ));
        }
        if self.occupancy as usize != self.num_passengers() {
            return Err(format!(
                "occupancy {} doesn't match {} carried passengers",
                self.occupancy,
                self.num_passengers()
            ));
        }
        Ok(())
    }

    /// Replaces all carried passengers. Used when a vehicle is received from another partition.
    pub fn replace_passengers(&mut self, passengers: Vec<(u8, u32)>) {
        assert!(
            passengers.len() as u32 <= self.capacity,
            "Vehicle {} can't carry {} passengers with a capacity of {}",
            self.id,
            passengers.len(),
            self.capacity
        );
        self.passengers.clear();
        self.occupancy = passengers.len() as u32;
        for (index, passenger) in passengers {
            self.passengers.entry(index).or_default().push(passenger);
        }
    }
}
