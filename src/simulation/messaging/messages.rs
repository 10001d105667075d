use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::simulation::error::CommunicationError;

/// Link id of a record whose agents are handed to another partition without entering a link.
pub const DIRECT_HANDOFF: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassengerRecord {
    pub egress_index: u8,
    pub id: u32,
    pub cursor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub id: u32,
    pub cursor: u32,
    /// Carried passengers. Only present for vehicles.
    pub passengers: Option<Vec<PassengerRecord>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    /// The boundary link the agents enter, or None for a direct handoff.
    pub link: Option<u32>,
    pub agents: Vec<AgentRecord>,
}

/// Agents crossing from partition `from` into partition `to` at second `time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    pub time: u32,
    pub from: u32,
    pub to: u32,
    pub records: Vec<LinkRecord>,
}

/// Number of agents per in link, which left the link at `time`. Sent back to the partition which
/// sent those agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterMessage {
    pub time: u32,
    pub from: u32,
    pub to: u32,
    pub counters: Vec<(u32, u32)>,
}

impl SyncMessage {
    pub fn new(time: u32, from: u32, to: u32) -> Self {
        SyncMessage {
            time,
            from,
            to,
            records: Vec::new(),
        }
    }

    pub fn add_agent(&mut self, link: Option<u32>, agent: AgentRecord) {
        match self.records.iter_mut().find(|r| r.link == link) {
            Some(record) => record.agents.push(agent),
            None => self.records.push(LinkRecord {
                link,
                agents: vec![agent],
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.records.len() * 16);
        put_header(&mut buf, self.time, self.from, self.records.len());
        for record in &self.records {
            buf.put_i32_le(record.link.map(|l| l as i32).unwrap_or(DIRECT_HANDOFF));
            buf.put_i32_le(record.agents.len() as i32);
            for agent in &record.agents {
                buf.put_i32_le(agent.id as i32);
                buf.put_i32_le(agent.cursor as i32);
                if let Some(passengers) = &agent.passengers {
                    buf.put_i32_le(passengers.len() as i32);
                    for p in passengers {
                        buf.put_i32_le(p.egress_index as i32);
                        buf.put_i32_le(p.id as i32);
                        buf.put_i32_le(p.cursor as i32);
                    }
                }
            }
        }
        buf.freeze()
    }

    /// Reads a message sent to `to`. Whether an agent record carries a passenger trailer is not
    /// part of the wire format, so `is_vehicle` is asked for every agent id. It returns None for
    /// agents unknown to the receiver.
    pub fn deserialize<F>(data: Bytes, to: u32, is_vehicle: F) -> Result<Self, CommunicationError>
    where
        F: Fn(u32) -> Option<bool>,
    {
        let mut reader = Reader::new(data);
        let (time, from, record_count) = reader.header()?;
        let mut records = Vec::with_capacity(record_count);
        for _ in 0..record_count {
            let link = match reader.i32("link id")? {
                DIRECT_HANDOFF => None,
                id => Some(id as u32),
            };
            let agent_count = reader.count("agent count")?;
            let mut agents = Vec::with_capacity(agent_count);
            for _ in 0..agent_count {
                let id = reader.u32("agent id")?;
                let cursor = reader.u32("cursor")?;
                let vehicle = is_vehicle(id).ok_or(CommunicationError::UnknownAgent(id))?;
                let passengers = if vehicle {
                    let count = reader.count("passenger count")?;
                    let mut passengers = Vec::with_capacity(count);
                    for _ in 0..count {
                        passengers.push(PassengerRecord {
                            egress_index: reader.u32("egress index")? as u8,
                            id: reader.u32("passenger id")?,
                            cursor: reader.u32("passenger cursor")?,
                        });
                    }
                    Some(passengers)
                } else {
                    None
                };
                agents.push(AgentRecord {
                    id,
                    cursor,
                    passengers,
                });
            }
            records.push(LinkRecord { link, agents });
        }
        Ok(SyncMessage {
            time,
            from,
            to,
            records,
        })
    }
}

impl CounterMessage {
    pub fn new(time: u32, from: u32, to: u32) -> Self {
        CounterMessage {
            time,
            from,
            to,
            counters: Vec::new(),
        }
    }

    pub fn add_counter(&mut self, link: u32, processed: u32) {
        self.counters.push((link, processed));
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.counters.len() * 8);
        put_header(&mut buf, self.time, self.from, self.counters.len());
        for (link, processed) in &self.counters {
            buf.put_i32_le(*link as i32);
            buf.put_i32_le(*processed as i32);
        }
        buf.freeze()
    }

    pub fn deserialize(data: Bytes, to: u32) -> Result<Self, CommunicationError> {
        let mut reader = Reader::new(data);
        let (time, from, count) = reader.header()?;
        let mut counters = Vec::with_capacity(count);
        for _ in 0..count {
            counters.push((reader.u32("link id")?, reader.u32("processed")?));
        }
        Ok(CounterMessage {
            time,
            from,
            to,
            counters,
        })
    }
}

fn put_header(buf: &mut BytesMut, time: u32, from: u32, count: usize) {
    buf.put_i32_le(time as i32);
    buf.put_i32_le(from as i32);
    buf.put_i32_le(count as i32);
}

/// Reads little endian i32 fields and reports where a buffer ended prematurely.
struct Reader {
    data: Bytes,
    len: usize,
}

impl Reader {
    fn new(data: Bytes) -> Self {
        let len = data.len();
        Reader { data, len }
    }

    fn header(&mut self) -> Result<(u32, u32, usize), CommunicationError> {
        Ok((
            self.u32("time")?,
            self.u32("sender")?,
            self.count("record count")?,
        ))
    }

    fn i32(&mut self, reading: &'static str) -> Result<i32, CommunicationError> {
        if self.data.remaining() < 4 {
            return Err(CommunicationError::Truncated {
                offset: self.len - self.data.remaining(),
                reading,
            });
        }
        Ok(self.data.get_i32_le())
    }

    fn u32(&mut self, reading: &'static str) -> Result<u32, CommunicationError> {
        self.i32(reading).map(|v| v as u32)
    }

    fn count(&mut self, reading: &'static str) -> Result<usize, CommunicationError> {
        let count = self.u32(reading)? as usize;
        // every counted element takes at least 4 bytes
        if count > self.data.remaining() / 4 {
            return Err(CommunicationError::Truncated {
                offset: self.len - self.data.remaining(),
                reading,
            });
        }
        Ok(count)
    }
}
