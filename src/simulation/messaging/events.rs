use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use nohash_hasher::IntMap;
use tracing::{info, instrument};

/// What happened to the agent when the event was stamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StampKind {
    /// The agent consumed an instruction.
    Advance,
    /// A passenger boarded a vehicle.
    Access,
    /// A passenger left a vehicle.
    Egress,
    /// The agent consumed its whole plan.
    Finish,
}

/// The kernel doesn't construct domain events. It only tells the outside world at which second
/// the placeholder event with the given correlation id happened. Correlation ids are local to the
/// agent's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub agent: u32,
    pub correlation: u16,
    pub vehicle: Option<u32>,
    pub kind: StampKind,
}

impl Event {
    pub fn new_advance(agent: u32, correlation: u16) -> Self {
        Event {
            agent,
            correlation,
            vehicle: None,
            kind: StampKind::Advance,
        }
    }

    pub fn new_access(agent: u32, correlation: u16, vehicle: u32) -> Self {
        Event {
            agent,
            correlation,
            vehicle: Some(vehicle),
            kind: StampKind::Access,
        }
    }

    pub fn new_egress(agent: u32, correlation: u16, vehicle: u32) -> Self {
        Event {
            agent,
            correlation,
            vehicle: Some(vehicle),
            kind: StampKind::Egress,
        }
    }

    pub fn new_finish(agent: u32, correlation: u16) -> Self {
        Event {
            agent,
            correlation,
            vehicle: None,
            kind: StampKind::Finish,
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let vehicle = self
            .vehicle
            .map(|v| v.to_string())
            .unwrap_or_else(|| String::from("-"));
        write!(
            f,
            "{:?},{},{},{}",
            self.kind, self.agent, self.correlation, vehicle
        )
    }
}

pub trait EventsSubscriber {
    fn receive_event(&mut self, time: u32, event: &Event);

    fn finish(&mut self) {}

    fn as_any(&mut self) -> &mut dyn Any;
}

impl Debug for dyn EventsSubscriber + Send {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventsSubscriber")
    }
}

pub struct EventsLogger {}

impl EventsSubscriber for EventsLogger {
    fn receive_event(&mut self, time: u32, event: &Event) {
        info!("{time}: {event}");
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

/// Keeps every stamped event in memory. This is the table of placeholder timestamps, which can be
/// queried by agent and correlation id after a run.
#[derive(Debug, Default)]
pub struct EventsCollector {
    events: Vec<(u32, Event)>,
    by_correlation: IntMap<u64, u32>,
}

impl EventsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[(u32, Event)] {
        &self.events
    }

    /// The second at which the event `correlation` of `agent` was stamped last.
    pub fn time_of(&self, agent: u32, correlation: u16) -> Option<u32> {
        self.by_correlation
            .get(&Self::key(agent, correlation))
            .copied()
    }

    pub fn finish_time(&self, agent: u32) -> Option<u32> {
        self.events
            .iter()
            .find(|(_, e)| e.agent == agent && e.kind == StampKind::Finish)
            .map(|(time, _)| *time)
    }

    fn key(agent: u32, correlation: u16) -> u64 {
        ((agent as u64) << 16) | correlation as u64
    }
}

impl EventsSubscriber for EventsCollector {
    fn receive_event(&mut self, time: u32, event: &Event) {
        if event.correlation != 0 {
            self.by_correlation
                .insert(Self::key(event.agent, event.correlation), time);
        }
        self.events.push((time, *event));
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

/// Writes one line per event: `time,kind,agent,correlation,vehicle`. Files ending with `.gz` are
/// compressed.
pub struct EventsWriter {
    writer: Box<dyn Write + Send>,
}

impl EventsWriter {
    pub fn new(path: &Path) -> std::io::Result<Self> {
        info!("Creating events writer at {path:?}");
        let file = BufWriter::new(File::create(path)?);
        let mut writer: Box<dyn Write + Send> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(GzEncoder::new(file, Compression::fast()))
        } else {
            Box::new(file)
        };
        writeln!(writer, "time,kind,agent,correlation,vehicle")?;
        Ok(EventsWriter { writer })
    }
}

impl EventsSubscriber for EventsWriter {
    fn receive_event(&mut self, time: u32, event: &Event) {
        writeln!(self.writer, "{time},{event}").expect("Failed to write event");
    }

    fn finish(&mut self) {
        self.writer.flush().expect("Failed to flush events file");
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

/// EventsPublisher owns event subscribers. Subscribers are trait objects, hence they have to be
/// passed in a Box. On publish_event all subscribers' receive_event methods are called.
#[derive(Default, Debug)]
pub struct EventsPublisher {
    handlers: Vec<Box<dyn EventsSubscriber + Send>>,
}

impl EventsPublisher {
    pub fn new() -> Self {
        EventsPublisher {
            handlers: Vec::new(),
        }
    }

    pub fn add_subscriber(&mut self, handler: Box<dyn EventsSubscriber + Send>) {
        self.handlers.push(handler);
    }

    pub fn publish_event(&mut self, time: u32, event: &Event) {
        for handler in self.handlers.iter_mut() {
            handler.receive_event(time, event);
        }
    }

    #[instrument(skip_all, level = "trace")]
    pub fn finish(&mut self) {
        for handler in self.handlers.iter_mut() {
            handler.finish();
        }
    }

    pub fn get_subscriber<T: EventsSubscriber + 'static>(&mut self) -> Option<&mut T> {
        let mut result = None;
        for handler in self.handlers.iter_mut() {
            if let Some(collector) = handler.as_any().downcast_mut::<T>() {
                result = Some(collector)
            };
        }
        result
    }
}
