use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use itertools::Itertools;
use tracing::{debug, info, instrument};

use crate::simulation::agents::Agent;
use crate::simulation::config;
use crate::simulation::error::{CommunicationError, SimError};
use crate::simulation::instruction::{Instruction, StopRef};
use crate::simulation::io::state_dump::DumpState;
use crate::simulation::messaging::events::{Event, EventsPublisher};
use crate::simulation::messaging::message_broker::NetMessageBroker;
use crate::simulation::messaging::messages::{AgentRecord, PassengerRecord};
use crate::simulation::messaging::sim_communication::SimCommunicator;
use crate::simulation::network::link::{AgentQEntry, SimLink};
use crate::simulation::pt::StopQueues;
use crate::simulation::time_wheel::TimeWheel;
use crate::simulation::world::World;

/// Outcome of a run of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub rank: u32,
    /// Agents which consumed their whole plan in this partition.
    pub finished: usize,
    /// Agents still present in this partition when the run ended, including agents scheduled
    /// after the end of the run.
    pub unfinished: usize,
    pub end_time: u32,
}

/// The tick engine of one partition. Agents and links which have something to do at a given
/// second are kept in time wheels, so that idle entities are never looked at.
///
/// Each realm keeps the state of every agent of the world, while plans are shared with the world.
/// Only the agents currently located in the partition are active, the state of all others is
/// overwritten when they arrive from a neighbor.
pub struct Realm<C: SimCommunicator> {
    rank: u32,
    start_time: u32,
    end_time: u32,
    advance_delay: u32,
    tick_duration: Duration,
    links: Vec<SimLink>,
    in_links: Vec<u32>,
    out_links: Vec<u32>,
    stop_links: Vec<u32>,
    agents: Vec<Agent>,
    delayed_agents: TimeWheel<u32>,
    delayed_links: TimeWheel<u32>,
    stop_queues: StopQueues,
    message_broker: NetMessageBroker<C>,
    events: EventsPublisher,
    finished: usize,
}

impl<C: SimCommunicator> Realm<C> {
    pub fn new(
        world: &World,
        config: &config::Simulation,
        message_broker: NetMessageBroker<C>,
        events: EventsPublisher,
    ) -> Result<Self, SimError> {
        let rank = message_broker.rank();
        let size = message_broker.communicator().size();
        if world.num_parts() != size {
            return Err(SimError::Config(format!(
                "World is split into {} partitions, but the simulation runs with {size}",
                world.num_parts()
            )));
        }
        if config.start_time > config.end_time {
            return Err(SimError::Config(format!(
                "Start time {} is after end time {}",
                config.start_time, config.end_time
            )));
        }

        let links = world.sim_links(rank);
        let in_links = links
            .iter()
            .filter(|l| matches!(l, SimLink::In(_)))
            .map(|l| l.id())
            .collect();
        let out_links = links
            .iter()
            .filter(|l| matches!(l, SimLink::Out(_)))
            .map(|l| l.id())
            .collect();

        let mut delayed_agents = TimeWheel::new(config.start_time, config.end_time);
        for id in world.agents_of(rank) {
            delayed_agents.add(id, config.start_time);
        }

        Ok(Realm {
            rank,
            start_time: config.start_time,
            end_time: config.end_time,
            advance_delay: config.link_advance_delay,
            tick_duration: Duration::from_millis(config.tick_duration_ms),
            links,
            in_links,
            out_links,
            stop_links: world.stops().iter().map(|s| s.link).collect(),
            agents: world.agents().to_vec(),
            delayed_agents,
            delayed_links: TimeWheel::new(config.start_time, config.end_time),
            stop_queues: StopQueues::new(),
            message_broker,
            events,
            finished: 0,
        })
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn agent(&self, id: u32) -> &Agent {
        &self.agents[id as usize]
    }

    pub fn link(&self, id: u32) -> &SimLink {
        &self.links[id as usize]
    }

    pub fn stop_queues(&self) -> &StopQueues {
        &self.stop_queues
    }

    pub fn events_mut(&mut self) -> &mut EventsPublisher {
        &mut self.events
    }

    pub fn into_events(self) -> EventsPublisher {
        self.events
    }

    pub fn run(&mut self) -> Result<RunSummary, SimError> {
        info!(
            "Starting #{}. Neighbors: [{}], Start time {}, End time {}",
            self.rank,
            self.message_broker.neighbors().iter().sorted().join(", "),
            self.start_time,
            self.end_time
        );

        let mut now = self.start_time;
        while now <= self.end_time {
            let tick_start = Instant::now();
            if self.rank == 0 && now % 600 == 0 {
                let hour = now / 3600;
                let min = (now % 3600) / 60;
                info!(
                    "#{} of realm simulation at {hour}:{min:02}. {} agents finished.",
                    self.rank, self.finished
                );
            }

            self.process_agents(now);
            self.process_links(now);
            self.send_receive(now)?;
            self.pace(tick_start);

            now = self.message_broker.communicator().barrier(now);
        }

        self.events.finish();
        let summary = self.summary();
        info!(
            "#{} finished simulation. {} agents finished, {} unfinished.",
            self.rank, summary.finished, summary.unfinished
        );
        Ok(summary)
    }

    #[instrument(level = "trace", skip(self), fields(rank = self.rank))]
    fn process_agents(&mut self, now: u32) {
        for id in self.delayed_agents.pop(now) {
            if !self.dispatch(id, now) {
                self.delayed_agents.add(id, now + 1);
            }
        }
    }

    #[instrument(level = "trace", skip(self), fields(rank = self.rank))]
    fn process_links(&mut self, now: u32) {
        for link_id in self.delayed_links.pop(now) {
            self.process_link(link_id, now);
        }
    }

    /// Processes heads of the link as long as they are due. A link is re-scheduled when its head
    /// is due, or at the next second if its head couldn't leave. Empty links are dropped from the
    /// wheel. They are re-scheduled once an agent enters them.
    fn process_link(&mut self, link_id: u32, now: u32) {
        loop {
            let Some(head) = self.links[link_id as usize].front().copied() else {
                return;
            };
            if head.finish_time > now {
                self.delayed_links.add(link_id, head.finish_time);
                return;
            }
            if !self.dispatch(head.agent, now) {
                self.delayed_links.add(link_id, now + 1);
                return;
            }
            self.links[link_id as usize].pop();
            self.drain_inbound(link_id, now);
        }
    }

    /// Executes the current instruction of an agent. Returns false if the agent can't proceed
    /// in this second and has to be retried in the next one.
    fn dispatch(&mut self, id: u32, now: u32) -> bool {
        let agent = &self.agents[id as usize];
        let Some(instruction) = agent.curr_instruction() else {
            self.finish(id, now);
            return true;
        };

        match instruction {
            Instruction::LinkTraversal { link, velocity, .. } => {
                self.traverse(id, link, velocity, now)
            }
            Instruction::SleepFor { duration, .. } => {
                self.sleep(id, now.saturating_add(duration.max(1)), now);
                true
            }
            Instruction::SleepUntil { time, .. } => {
                self.sleep(id, time.max(now + 1), now);
                true
            }
            Instruction::Wait { route, stop, .. } => self.wait(id, route, stop, now),
            Instruction::StopArrive { at, .. } => self.stop_arrive(id, at, now),
            Instruction::StopDelay { at, .. } => {
                self.stop_delay(id, at, now);
                false
            }
            Instruction::StopDepart { .. } => {
                self.agents[id as usize].advance(now, &mut self.events);
                false
            }
            Instruction::Access { .. } | Instruction::Egress { .. } => panic!(
                "Agent {id} reached {instruction:?} at plan index {}. Access and Egress are only executed by vehicles.",
                agent.cursor()
            ),
        }
    }

    fn traverse(&mut self, id: u32, link_id: u32, velocity: u8, now: u32) -> bool {
        let link = &mut self.links[link_id as usize];
        match link {
            SimLink::Remote { owner, .. } => {
                let owner = *owner;
                self.hand_over(id, owner, now);
                true
            }
            SimLink::Out(out) => {
                if !out.push(id) {
                    return false;
                }
                let agent = &mut self.agents[id as usize];
                agent.set_link_times(now, now);
                agent.advance(now, &mut self.events);
                true
            }
            SimLink::Local(_) | SimLink::In(_) => {
                let finish_time = match link.local() {
                    Some(local) => {
                        now.saturating_add(local.travel_time(velocity, self.advance_delay))
                    }
                    None => unreachable!(),
                };
                if !link.push(id, finish_time) {
                    return false;
                }
                let is_head = link.local().is_some_and(|l| l.len() == 1);

                let agent = &mut self.agents[id as usize];
                agent.set_link_times(now, finish_time);
                agent.advance(now, &mut self.events);
                if is_head {
                    self.delayed_links.add(link_id, finish_time.max(now + 1));
                }
                true
            }
        }
    }

    fn sleep(&mut self, id: u32, wake_up: u32, now: u32) {
        self.agents[id as usize].advance(now, &mut self.events);
        self.delayed_agents.add(id, wake_up);
    }

    fn wait(&mut self, id: u32, route: u16, stop: u16, now: u32) -> bool {
        let owner = self.stop_owner(stop);
        if owner != self.rank {
            self.hand_over(id, owner, now);
            return true;
        }

        let agent = &mut self.agents[id as usize];
        agent.advance(now, &mut self.events);
        // the plan continues with Access and Egress. Passengers are queued by where they leave
        let egress_index = match agent.instruction_at(agent.cursor() + 1) {
            Some(Instruction::Egress { at, .. }) => at.index,
            other => panic!(
                "Agent {id} waits at stop {stop}, but its plan doesn't continue with Access and Egress. Found {other:?} instead of Egress."
            ),
        };
        self.stop_queues.add(stop, route, egress_index, id);
        true
    }

    fn stop_arrive(&mut self, id: u32, at: StopRef, now: u32) -> bool {
        let owner = self.stop_owner(at.stop);
        if owner != self.rank {
            self.hand_over(id, owner, now);
            return true;
        }
        self.agents[id as usize].advance(now, &mut self.events);
        self.delayed_agents.add(id, now + 1);
        true
    }

    /// Passengers for this stop leave the vehicle first. Then waiting passengers board in order of
    /// their destination as long as there are free seats.
    fn stop_delay(&mut self, id: u32, at: StopRef, now: u32) {
        self.agents[id as usize].advance(now, &mut self.events);

        for passenger in self.agents[id as usize].egress(at.index) {
            self.agents[passenger as usize].advance_egress(id, now, &mut self.events);
            self.delayed_agents.add(passenger, now + 1);
        }

        let vehicle = &mut self.agents[id as usize];
        let boarded = self
            .stop_queues
            .board(at.stop, at.route, at.index, |egress_index, passenger| {
                vehicle.access(egress_index, passenger)
            });
        for (_, passenger) in boarded {
            self.agents[passenger as usize].advance_access(id, now, &mut self.events);
        }
    }

    fn finish(&mut self, id: u32, now: u32) {
        let correlation = self.agents[id as usize].finish_event();
        self.events
            .publish_event(now, &Event::new_finish(id, correlation));
        self.finished += 1;
    }

    /// Sends the agent to partition `to` without entering a link. The agent's cursor is left
    /// unchanged, so the receiver executes the current instruction again.
    fn hand_over(&mut self, id: u32, to: u32, now: u32) {
        debug!("#{} hands agent {id} over to #{to} at {now}", self.rank);
        let record = self.agent_record(id);
        self.message_broker.add_agent(to, None, record, now);
    }

    fn agent_record(&self, id: u32) -> AgentRecord {
        let agents = &self.agents;
        let agent = &agents[id as usize];
        let passengers = agent.is_vehicle().then(|| {
            agent
                .passengers()
                .flat_map(|(egress_index, passengers)| {
                    passengers.iter().map(move |p| PassengerRecord {
                        egress_index,
                        id: *p,
                        cursor: agents[*p as usize].cursor(),
                    })
                })
                .collect()
        });
        AgentRecord {
            id,
            cursor: agent.cursor(),
            passengers,
        }
    }

    fn stop_owner(&self, stop: u16) -> u32 {
        let link = self.stop_links[stop as usize];
        self.link_owner(link)
    }

    fn link_owner(&self, link: u32) -> u32 {
        match &self.links[link as usize] {
            SimLink::Local(_) | SimLink::In(_) => self.rank,
            SimLink::Out(out) => out.to_part,
            SimLink::Remote { owner, .. } => *owner,
        }
    }

    /// Velocity the agent requested for the link it is entering. The traversal was consumed
    /// already, so it is the instruction before the cursor.
    fn entered_velocity(agent: &Agent) -> u8 {
        match agent.cursor().checked_sub(1).and_then(|i| agent.instruction_at(i)) {
            Some(Instruction::LinkTraversal { velocity, .. }) => velocity,
            other => panic!(
                "Agent {} enters a link, but its last instruction was {other:?}",
                agent.id()
            ),
        }
    }

    /// Moves agents waiting in front of an in link onto the link while there is space.
    fn drain_inbound(&mut self, link_id: u32, now: u32) {
        let SimLink::In(il) = &mut self.links[link_id as usize] else {
            return;
        };
        while !il.local_link.is_full() {
            let Some((agent, from_part)) = il.inbound_front() else {
                break;
            };
            il.pop_inbound();
            let velocity = Self::entered_velocity(&self.agents[agent as usize]);
            let finish_time =
                now.saturating_add(il.local_link.travel_time(velocity, self.advance_delay));
            il.local_link.push_entry(AgentQEntry {
                agent,
                finish_time,
                from_part: Some(from_part),
            });
            self.agents[agent as usize].set_link_times(now, finish_time);
        }
    }

    #[instrument(level = "trace", skip(self), fields(rank = self.rank))]
    fn send_receive(&mut self, now: u32) -> Result<(), CommunicationError> {
        for i in 0..self.out_links.len() {
            let link_id = self.out_links[i];
            let SimLink::Out(out) = &mut self.links[link_id as usize] else {
                unreachable!("Link {link_id} is registered as out link")
            };
            let to = out.to_part;
            for agent in out.take_agents() {
                let record = self.agent_record(agent);
                self.message_broker.add_agent(to, Some(link_id), record, now);
            }
        }

        for link_id in self.in_links.iter().copied() {
            let SimLink::In(il) = &mut self.links[link_id as usize] else {
                unreachable!("Link {link_id} is registered as in link")
            };
            for (from_part, processed) in il.take_processed() {
                self.message_broker
                    .add_counter(from_part, link_id, processed, now);
            }
        }

        let agents = &self.agents;
        let mut messages = self
            .message_broker
            .send_recv_agents(now, |id| agents.get(id as usize).map(|a| a.is_vehicle()))?;
        // arrival order depends on the transport. Agents entering the same in link from different
        // neighbors are queued by the rank they come from.
        messages.sort_by_key(|m| m.from);
        for msg in messages {
            for record in msg.records {
                for agent in record.agents {
                    self.receive_agent(agent, record.link, msg.from, now)?;
                }
            }
        }

        for msg in self.message_broker.send_recv_counters(now)? {
            for (link_id, processed) in msg.counters {
                match self.links.get_mut(link_id as usize) {
                    Some(SimLink::Out(out)) if out.to_part == msg.from => {
                        out.apply_processed(processed)
                    }
                    _ => return Err(CommunicationError::UnknownLink(link_id)),
                }
            }
        }
        Ok(())
    }

    fn receive_agent(
        &mut self,
        record: AgentRecord,
        link: Option<u32>,
        from: u32,
        now: u32,
    ) -> Result<(), CommunicationError> {
        let id = record.id;
        if let Some(passengers) = record.passengers {
            let mut seated = Vec::with_capacity(passengers.len());
            for p in passengers {
                let passenger = self
                    .agents
                    .get_mut(p.id as usize)
                    .ok_or(CommunicationError::UnknownAgent(p.id))?;
                passenger.set_cursor(p.cursor);
                seated.push((p.egress_index, p.id));
            }
            self.agents[id as usize].replace_passengers(seated);
        }
        self.agents[id as usize].set_cursor(record.cursor);

        match link {
            None => self.delayed_agents.add(id, now + 1),
            Some(link_id) => self.enter_in_link(id, link_id, from, now)?,
        }
        Ok(())
    }

    /// Appends an agent sent by a neighbor to an in link. If the link is full, or other agents are
    /// waiting already, the agent waits in front of the link.
    fn enter_in_link(
        &mut self,
        id: u32,
        link_id: u32,
        from: u32,
        now: u32,
    ) -> Result<(), CommunicationError> {
        let velocity = Self::entered_velocity(&self.agents[id as usize]);
        let il = match self.links.get_mut(link_id as usize) {
            Some(SimLink::In(il)) if il.from_parts.contains(&from) => il,
            _ => return Err(CommunicationError::UnknownLink(link_id)),
        };

        if il.inbound_front().is_some() || il.local_link.is_full() {
            il.push_inbound(id, from);
            return Ok(());
        }

        let finish_time =
            now.saturating_add(il.local_link.travel_time(velocity, self.advance_delay));
        il.local_link.push_entry(AgentQEntry {
            agent: id,
            finish_time,
            from_part: Some(from),
        });
        if il.local_link.len() == 1 {
            self.delayed_links.add(link_id, finish_time.max(now + 1));
        }
        self.agents[id as usize].set_link_times(now, finish_time);
        Ok(())
    }

    fn pace(&self, tick_start: Instant) {
        if let Some(remaining) = self.tick_duration.checked_sub(tick_start.elapsed()) {
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        }
    }

    fn summary(&self) -> RunSummary {
        let mut present: Vec<u32> = self
            .delayed_agents
            .iter()
            .map(|(_, id)| *id)
            .chain(self.delayed_agents.beyond_horizon().iter().copied())
            .collect();
        for link in &self.links {
            if let Some(local) = link.local() {
                present.extend(local.iter().map(|e| e.agent));
            }
            if let SimLink::In(il) = link {
                present.extend(il.inbound());
            }
        }
        let passengers: usize = present
            .iter()
            .map(|id| self.agents[*id as usize].occupancy() as usize)
            .sum();

        RunSummary {
            rank: self.rank,
            finished: self.finished,
            unfinished: present.len() + passengers + self.stop_queues.len(),
            end_time: self.end_time,
        }
    }
}

impl<C: SimCommunicator> DumpState for Realm<C> {
    fn dump_state(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writeln!(writer, "# partition {}", self.rank)?;
        for link in &self.links {
            match link {
                SimLink::Local(l) => {
                    let queue: Vec<_> = l.iter().map(|e| (e.agent, e.finish_time)).collect();
                    writeln!(writer, "link {} local queue={queue:?}", l.id())?;
                }
                SimLink::In(il) => {
                    let queue: Vec<_> = il
                        .local_link
                        .iter()
                        .map(|e| (e.agent, e.finish_time))
                        .collect();
                    let inbound: Vec<_> = il.inbound().collect();
                    writeln!(
                        writer,
                        "link {} in from={:?} queue={queue:?} inbound={inbound:?}",
                        il.local_link.id(),
                        il.from_parts
                    )?;
                }
                SimLink::Out(out) => {
                    writeln!(
                        writer,
                        "link {} out to={} occupancy={}",
                        out.id,
                        out.to_part,
                        out.occupancy()
                    )?;
                }
                SimLink::Remote { .. } => {}
            }
        }
        for (time, id) in self.delayed_agents.iter() {
            let agent = &self.agents[*id as usize];
            writeln!(
                writer,
                "agent {id} due={time} cursor={}/{} occupancy={}",
                agent.cursor(),
                agent.plan().len(),
                agent.occupancy()
            )?;
        }
        for id in self.delayed_agents.beyond_horizon() {
            writeln!(writer, "agent {id} due=beyond_horizon")?;
        }
        for (stop, route, waiting) in self.stop_queues.iter() {
            writeln!(writer, "stop {stop} route {route} waiting={waiting:?}")?;
        }
        Ok(())
    }
}
