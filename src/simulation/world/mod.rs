use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::simulation::agents::Agent;
use crate::simulation::config::PartitionMethod;
use crate::simulation::error::WorldError;
use crate::simulation::instruction::Instruction;
use crate::simulation::io;
use crate::simulation::network::link::{Link, SimLink, SplitInLink, SplitOutLink};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDef {
    pub id: u32,
    pub from: u32,
    pub to: u32,
    pub length: f32,
    pub velocity: f32,
    pub capacity: u32,
    #[serde(default)]
    pub partition: u32,
}

impl LinkDef {
    pub fn new(id: u32, from: u32, to: u32, length: f32, velocity: f32, capacity: u32) -> Self {
        LinkDef {
            id,
            from,
            to,
            length,
            velocity,
            capacity,
            partition: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopDef {
    pub id: u32,
    pub link: u32,
}

/// A link whose upstream neighbor link is owned by another partition. Agents cross from
/// `from_part` into `to_part` when they enter `link`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoundaryLink {
    pub link: u32,
    pub from_part: u32,
    pub to_part: u32,
}

/// The complete static input of a simulation: links, stops and agents, and which partition owns
/// each of them. Ids of all entities are dense, i.e. the entity with id `i` is stored at index
/// `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    num_parts: u32,
    links: Vec<LinkDef>,
    stops: Vec<StopDef>,
    agents: Vec<Agent>,
    agent_partitions: Vec<u32>,
    boundary_links: Vec<BoundaryLink>,
    #[serde(skip)]
    neighbors: Vec<BTreeSet<u32>>,
}

impl World {
    pub fn new(
        num_parts: u32,
        method: PartitionMethod,
        links: Vec<LinkDef>,
        stops: Vec<StopDef>,
        agents: Vec<Agent>,
    ) -> Result<Self, WorldError> {
        let mut world = World {
            num_parts,
            links,
            stops,
            agents,
            agent_partitions: Vec::new(),
            boundary_links: Vec::new(),
            neighbors: Vec::new(),
        };
        world.partition(method)?;
        Ok(world)
    }

    /// Assigns all entities to `num_parts` partitions, replacing the previous assignment.
    pub fn repartition(mut self, num_parts: u32, method: PartitionMethod) -> Result<Self, WorldError> {
        self.num_parts = num_parts;
        self.partition(method)?;
        Ok(self)
    }

    fn partition(&mut self, method: PartitionMethod) -> Result<(), WorldError> {
        if self.num_parts == 0 {
            return Err(WorldError::NoPartitions);
        }
        self.validate_entities()?;

        let num_parts = self.num_parts;
        for link in &mut self.links {
            match method {
                PartitionMethod::None => link.partition = 0,
                PartitionMethod::Modulo => link.partition = link.id % num_parts,
                PartitionMethod::Precomputed => {}
            }
        }
        self.assign_agents();
        self.validate_partitions()?;
        self.boundary_links = self.find_boundary_links();
        self.neighbors = self.find_neighbors();

        info!(
            "Partitioned world with {} links, {} stops and {} agents into {} partitions. Found {} boundary links.",
            self.links.len(),
            self.stops.len(),
            self.agents.len(),
            self.num_parts,
            self.boundary_links.len()
        );
        Ok(())
    }

    fn validate_entities(&self) -> Result<(), WorldError> {
        check_dense("link", self.links.iter().map(|l| l.id))?;
        check_dense("stop", self.stops.iter().map(|s| s.id))?;
        check_dense("agent", self.agents.iter().map(|a| a.id()))?;

        for link in &self.links {
            if !(link.velocity.is_finite() && link.velocity > 0.) {
                return Err(WorldError::InvalidLink {
                    id: link.id,
                    reason: "velocity must be positive",
                });
            }
            if !(link.length.is_finite() && link.length >= 0.) {
                return Err(WorldError::InvalidLink {
                    id: link.id,
                    reason: "length must not be negative",
                });
            }
        }

        for stop in &self.stops {
            if stop.link as usize >= self.links.len() {
                return Err(WorldError::DanglingStopLink {
                    stop: stop.id,
                    link: stop.link,
                });
            }
        }

        for agent in &self.agents {
            agent
                .check_state()
                .map_err(|reason| WorldError::InvalidAgent {
                    id: agent.id(),
                    reason,
                })?;
            for (index, word) in agent.plan().words().iter().enumerate() {
                let instruction = word.decode().map_err(|source| WorldError::CorruptedPlan {
                    agent: agent.id(),
                    index,
                    source,
                })?;
                let (entity, id, count) = match instruction {
                    Instruction::LinkTraversal { link, .. } => ("link", link, self.links.len()),
                    Instruction::Wait { stop, .. } => ("stop", stop as u32, self.stops.len()),
                    Instruction::Access { at, .. }
                    | Instruction::Egress { at, .. }
                    | Instruction::StopArrive { at, .. }
                    | Instruction::StopDelay { at, .. }
                    | Instruction::StopDepart { at, .. } => {
                        ("stop", at.stop as u32, self.stops.len())
                    }
                    Instruction::SleepFor { .. } | Instruction::SleepUntil { .. } => continue,
                };
                if id as usize >= count {
                    return Err(WorldError::DanglingReference {
                        agent: agent.id(),
                        entity,
                        id,
                        index,
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_partitions(&self) -> Result<(), WorldError> {
        for link in &self.links {
            if link.partition >= self.num_parts {
                return Err(WorldError::PartitionOutOfRange {
                    entity: "link",
                    id: link.id,
                    part: link.partition,
                    num_parts: self.num_parts,
                });
            }
        }
        Ok(())
    }

    /// Agents start in the partition which owns the link of their first link traversal, or the
    /// first stop they wait or arrive at. Agents which never touch the network are spread by id.
    fn assign_agents(&mut self) {
        let partitions: Vec<u32> = self
            .agents
            .iter()
            .map(|agent| {
                agent
                    .plan()
                    .iter()
                    .filter_map(|i| i.ok())
                    .find_map(|instruction| match instruction {
                        Instruction::LinkTraversal { link, .. } => Some(self.link_partition(link)),
                        Instruction::Wait { stop, .. } => Some(self.stop_partition(stop as u32)),
                        Instruction::StopArrive { at, .. } => {
                            Some(self.stop_partition(at.stop as u32))
                        }
                        _ => None,
                    })
                    .unwrap_or(agent.id() % self.num_parts)
            })
            .collect();
        self.agent_partitions = partitions;
    }

    fn find_boundary_links(&self) -> Vec<BoundaryLink> {
        let mut owners_by_to_node: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        for link in &self.links {
            owners_by_to_node
                .entry(link.to)
                .or_default()
                .insert(link.partition);
        }

        let mut result = Vec::new();
        for link in &self.links {
            let Some(upstream_owners) = owners_by_to_node.get(&link.from) else {
                continue;
            };
            for from_part in upstream_owners {
                if *from_part != link.partition {
                    result.push(BoundaryLink {
                        link: link.id,
                        from_part: *from_part,
                        to_part: link.partition,
                    });
                }
            }
        }
        result
    }

    /// Two partitions are neighbors if a boundary link connects them, or if some agent moves
    /// directly from one to the other. The relation is symmetric, as both sides of a pair
    /// exchange messages every second.
    fn find_neighbors(&self) -> Vec<BTreeSet<u32>> {
        let mut neighbors = vec![BTreeSet::new(); self.num_parts as usize];
        let mut connect = |a: u32, b: u32| {
            if a != b {
                neighbors[a as usize].insert(b);
                neighbors[b as usize].insert(a);
            }
        };

        for boundary in &self.boundary_links {
            connect(boundary.from_part, boundary.to_part);
        }
        for (agent, home) in self.agents.iter().zip(&self.agent_partitions) {
            let mut current = *home;
            for instruction in agent.plan().iter().filter_map(|i| i.ok()) {
                if let Some(part) = self.instruction_partition(&instruction) {
                    connect(current, part);
                    current = part;
                }
            }
        }
        neighbors
    }

    /// Partition an agent has to be in to execute `instruction`, if it is bound to a location.
    fn instruction_partition(&self, instruction: &Instruction) -> Option<u32> {
        match instruction {
            Instruction::LinkTraversal { link, .. } => Some(self.link_partition(*link)),
            Instruction::Wait { stop, .. } => Some(self.stop_partition(*stop as u32)),
            Instruction::Access { at, .. }
            | Instruction::Egress { at, .. }
            | Instruction::StopArrive { at, .. }
            | Instruction::StopDelay { at, .. }
            | Instruction::StopDepart { at, .. } => Some(self.stop_partition(at.stop as u32)),
            Instruction::SleepFor { .. } | Instruction::SleepUntil { .. } => None,
        }
    }

    pub fn num_parts(&self) -> u32 {
        self.num_parts
    }

    pub fn links(&self) -> &[LinkDef] {
        &self.links
    }

    pub fn stops(&self) -> &[StopDef] {
        &self.stops
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn boundary_links(&self) -> &[BoundaryLink] {
        &self.boundary_links
    }

    /// Partitions `rank` exchanges messages with. Empty for ranks outside of the world.
    pub fn neighbors(&self, rank: u32) -> impl Iterator<Item = u32> + '_ {
        self.neighbors
            .get(rank as usize)
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn link_partition(&self, link: u32) -> u32 {
        self.links[link as usize].partition
    }

    pub fn stop_partition(&self, stop: u32) -> u32 {
        self.link_partition(self.stops[stop as usize].link)
    }

    pub fn agent_partition(&self, agent: u32) -> u32 {
        self.agent_partitions[agent as usize]
    }

    /// Ids of the agents which start in `rank`.
    pub fn agents_of(&self, rank: u32) -> impl Iterator<Item = u32> + '_ {
        self.agent_partitions
            .iter()
            .enumerate()
            .filter(move |(_, p)| **p == rank)
            .map(|(id, _)| id as u32)
    }

    /// The view of the network from partition `rank`. The result is indexed by link id.
    pub fn sim_links(&self, rank: u32) -> Vec<SimLink> {
        let mut in_links: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        let mut out_links: BTreeSet<u32> = BTreeSet::new();
        for boundary in &self.boundary_links {
            if boundary.to_part == rank {
                in_links
                    .entry(boundary.link)
                    .or_default()
                    .push(boundary.from_part);
            }
            if boundary.from_part == rank {
                out_links.insert(boundary.link);
            }
        }

        self.links
            .iter()
            .map(|def| {
                if def.partition == rank {
                    let link = Link::new(def.id, def.length, def.velocity, def.capacity);
                    match in_links.remove(&def.id) {
                        Some(from_parts) => SimLink::In(SplitInLink::new(from_parts, link)),
                        None => SimLink::Local(link),
                    }
                } else if out_links.contains(&def.id) {
                    SimLink::Out(SplitOutLink::new(def.id, def.partition, def.capacity))
                } else {
                    SimLink::Remote {
                        id: def.id,
                        owner: def.partition,
                    }
                }
            })
            .collect()
    }

    /// Writes a snapshot. The format is chosen by the file ending: `.bin` or `.json`, each with
    /// an optional `.gz`.
    pub fn to_file(&self, path: &Path) -> Result<(), WorldError> {
        info!("Writing world snapshot to {path:?}");
        let mut writer = io::create_writer(path)?;
        match io::inner_extension(path) {
            Some("bin") => {
                bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
                    .map_err(|e| WorldError::Snapshot(e.to_string()))?;
            }
            Some("json") => {
                serde_json::to_writer(&mut writer, self)
                    .map_err(|e| WorldError::Snapshot(e.to_string()))?;
            }
            _ => return Err(WorldError::UnsupportedFormat(path.to_path_buf())),
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a snapshot written by [World::to_file] and validates it.
    pub fn from_file(path: &Path) -> Result<Self, WorldError> {
        info!("Reading world snapshot from {path:?}");
        let format = io::inner_extension(path);
        if !matches!(format, Some("bin") | Some("json")) {
            return Err(WorldError::UnsupportedFormat(path.to_path_buf()));
        }

        let mut reader = io::open_reader(path)?;
        let world: World = if format == Some("bin") {
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| WorldError::Snapshot(e.to_string()))?
        } else {
            let mut deserializer = serde_json::Deserializer::from_reader(reader);
            serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
                WorldError::Snapshot(format!("{} at path '{}'", e.inner(), e.path()))
            })?
        };

        // re-derive everything which isn't plain input, so that a snapshot can't smuggle in
        // inconsistent partitions
        let num_parts = world.num_parts;
        world.repartition(num_parts, PartitionMethod::Precomputed)
    }
}

fn check_dense(entity: &'static str, ids: impl Iterator<Item = u32>) -> Result<(), WorldError> {
    for (expected, found) in ids.enumerate() {
        if expected != found as usize {
            return Err(WorldError::SparseIds {
                entity,
                expected,
                found,
            });
        }
    }
    Ok(())
}
