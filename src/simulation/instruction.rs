//! Fixed width plan instructions.
//!
//! Agents execute their itinerary one [`Instruction`] at a time. In memory, a plan is stored as a
//! sequence of [`PackedInstruction`]s, each of which is a single `u64` with the layout
//!
//! ```text
//! [kind:8][event:16][payload:40]
//! ```
//!
//! The payload depends on the kind:
//!
//! | kind | payload |
//! |---|---|
//! | LinkTraversal | `[link:24][velocity:8]` |
//! | SleepFor / SleepUntil | `[seconds:32]` |
//! | Wait | `[route:16][stop:16][0:8]` |
//! | Access / Egress / StopArrive / StopDelay / StopDepart | `[route:16][stop:16][index:8]` |
//!
//! All constructors validate the field widths, and fail instead of truncating.

use serde::{Deserialize, Serialize};

use crate::simulation::error::{DecodeError, EncodeError};

pub const MAX_EVENT_ID: u32 = u16::MAX as u32;
pub const MAX_LINK_ID: u32 = (1 << 24) - 1;
pub const MAX_ROUTE_ID: u32 = u16::MAX as u32;
pub const MAX_STOP_ID: u32 = u16::MAX as u32;
pub const MAX_STOP_INDEX: u32 = u8::MAX as u32;
pub const MAX_VELOCITY: u32 = u8::MAX as u32;
pub const MAX_PLAN_LENGTH: usize = u16::MAX as usize;

const KIND_SHIFT: u32 = 56;
const EVENT_SHIFT: u32 = 40;
const PAYLOAD_MASK: u64 = (1 << 40) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Kind {
    LinkTraversal = 1,
    SleepFor = 2,
    SleepUntil = 3,
    Access = 4,
    Egress = 5,
    StopArrive = 6,
    StopDelay = 7,
    StopDepart = 8,
    Wait = 9,
}

impl TryFrom<u8> for Kind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let kind = match value {
            1 => Kind::LinkTraversal,
            2 => Kind::SleepFor,
            3 => Kind::SleepUntil,
            4 => Kind::Access,
            5 => Kind::Egress,
            6 => Kind::StopArrive,
            7 => Kind::StopDelay,
            8 => Kind::StopDepart,
            9 => Kind::Wait,
            _ => return Err(DecodeError::UnknownKind(value)),
        };
        Ok(kind)
    }
}

/// Position of a stop on a transit route. `index` is the local index of the stop along the route,
/// which is what vehicles use to sort their passengers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StopRef {
    pub route: u16,
    pub stop: u16,
    pub index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    LinkTraversal { event: u16, link: u32, velocity: u8 },
    SleepFor { event: u16, duration: u32 },
    SleepUntil { event: u16, time: u32 },
    Access { event: u16, at: StopRef },
    Egress { event: u16, at: StopRef },
    StopArrive { event: u16, at: StopRef },
    StopDelay { event: u16, at: StopRef },
    StopDepart { event: u16, at: StopRef },
    Wait { event: u16, route: u16, stop: u16 },
}

fn check(kind: Kind, field: &'static str, value: u32, max: u32) -> Result<u32, EncodeError> {
    if value > max {
        Err(EncodeError::FieldOverflow {
            kind,
            field,
            value: value as u64,
            max: max as u64,
        })
    } else {
        Ok(value)
    }
}

fn stop_ref(kind: Kind, route: u32, stop: u32, index: u32) -> Result<StopRef, EncodeError> {
    Ok(StopRef {
        route: check(kind, "route id", route, MAX_ROUTE_ID)? as u16,
        stop: check(kind, "stop id", stop, MAX_STOP_ID)? as u16,
        index: check(kind, "stop index", index, MAX_STOP_INDEX)? as u8,
    })
}

fn event(kind: Kind, event: u32) -> Result<u16, EncodeError> {
    check(kind, "event id", event, MAX_EVENT_ID).map(|e| e as u16)
}

impl Instruction {
    pub fn link_traversal(event_id: u32, link: u32, velocity: u32) -> Result<Self, EncodeError> {
        let kind = Kind::LinkTraversal;
        Ok(Instruction::LinkTraversal {
            event: event(kind, event_id)?,
            link: check(kind, "link id", link, MAX_LINK_ID)?,
            velocity: check(kind, "velocity", velocity, MAX_VELOCITY)? as u8,
        })
    }

    pub fn sleep_for(event_id: u32, duration: u32) -> Result<Self, EncodeError> {
        Ok(Instruction::SleepFor {
            event: event(Kind::SleepFor, event_id)?,
            duration,
        })
    }

    pub fn sleep_until(event_id: u32, time: u32) -> Result<Self, EncodeError> {
        Ok(Instruction::SleepUntil {
            event: event(Kind::SleepUntil, event_id)?,
            time,
        })
    }

    pub fn wait(event_id: u32, route: u32, stop: u32) -> Result<Self, EncodeError> {
        let kind = Kind::Wait;
        Ok(Instruction::Wait {
            event: event(kind, event_id)?,
            route: check(kind, "route id", route, MAX_ROUTE_ID)? as u16,
            stop: check(kind, "stop id", stop, MAX_STOP_ID)? as u16,
        })
    }

    pub fn access(event_id: u32, route: u32, stop: u32, index: u32) -> Result<Self, EncodeError> {
        let kind = Kind::Access;
        Ok(Instruction::Access {
            event: event(kind, event_id)?,
            at: stop_ref(kind, route, stop, index)?,
        })
    }

    pub fn egress(event_id: u32, route: u32, stop: u32, index: u32) -> Result<Self, EncodeError> {
        let kind = Kind::Egress;
        Ok(Instruction::Egress {
            event: event(kind, event_id)?,
            at: stop_ref(kind, route, stop, index)?,
        })
    }

    pub fn stop_arrive(event_id: u32, route: u32, stop: u32, index: u32) -> Result<Self, EncodeError> {
        let kind = Kind::StopArrive;
        Ok(Instruction::StopArrive {
            event: event(kind, event_id)?,
            at: stop_ref(kind, route, stop, index)?,
        })
    }

    pub fn stop_delay(event_id: u32, route: u32, stop: u32, index: u32) -> Result<Self, EncodeError> {
        let kind = Kind::StopDelay;
        Ok(Instruction::StopDelay {
            event: event(kind, event_id)?,
            at: stop_ref(kind, route, stop, index)?,
        })
    }

    pub fn stop_depart(event_id: u32, route: u32, stop: u32, index: u32) -> Result<Self, EncodeError> {
        let kind = Kind::StopDepart;
        Ok(Instruction::StopDepart {
            event: event(kind, event_id)?,
            at: stop_ref(kind, route, stop, index)?,
        })
    }

    pub fn kind(&self) -> Kind {
        match self {
            Instruction::LinkTraversal { .. } => Kind::LinkTraversal,
            Instruction::SleepFor { .. } => Kind::SleepFor,
            Instruction::SleepUntil { .. } => Kind::SleepUntil,
            Instruction::Access { .. } => Kind::Access,
            Instruction::Egress { .. } => Kind::Egress,
            Instruction::StopArrive { .. } => Kind::StopArrive,
            Instruction::StopDelay { .. } => Kind::StopDelay,
            Instruction::StopDepart { .. } => Kind::StopDepart,
            Instruction::Wait { .. } => Kind::Wait,
        }
    }

    /// Correlation id of the event which is stamped when this instruction is consumed. 0 means
    /// there is no event attached.
    pub fn event(&self) -> u16 {
        match *self {
            Instruction::LinkTraversal { event, .. }
            | Instruction::SleepFor { event, .. }
            | Instruction::SleepUntil { event, .. }
            | Instruction::Access { event, .. }
            | Instruction::Egress { event, .. }
            | Instruction::StopArrive { event, .. }
            | Instruction::StopDelay { event, .. }
            | Instruction::StopDepart { event, .. }
            | Instruction::Wait { event, .. } => event,
        }
    }

    fn payload(&self) -> u64 {
        match *self {
            Instruction::LinkTraversal { link, velocity, .. } => {
                ((link as u64) << 8) | velocity as u64
            }
            Instruction::SleepFor { duration, .. } => duration as u64,
            Instruction::SleepUntil { time, .. } => time as u64,
            Instruction::Wait { route, stop, .. } => ((route as u64) << 24) | ((stop as u64) << 8),
            Instruction::Access { at, .. }
            | Instruction::Egress { at, .. }
            | Instruction::StopArrive { at, .. }
            | Instruction::StopDelay { at, .. }
            | Instruction::StopDepart { at, .. } => {
                ((at.route as u64) << 24) | ((at.stop as u64) << 8) | at.index as u64
            }
        }
    }
}

/// The in-memory representation of an [`Instruction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackedInstruction(u64);

impl PackedInstruction {
    pub fn encode(instruction: &Instruction) -> Self {
        let kind = instruction.kind() as u64;
        let event = instruction.event() as u64;
        PackedInstruction((kind << KIND_SHIFT) | (event << EVENT_SHIFT) | instruction.payload())
    }

    pub fn decode(&self) -> Result<Instruction, DecodeError> {
        let kind = Kind::try_from((self.0 >> KIND_SHIFT) as u8)?;
        let event = (self.0 >> EVENT_SHIFT) as u16;
        let payload = self.0 & PAYLOAD_MASK;

        let at = StopRef {
            route: (payload >> 24) as u16,
            stop: (payload >> 8) as u16,
            index: payload as u8,
        };

        let instruction = match kind {
            Kind::LinkTraversal => Instruction::LinkTraversal {
                event,
                link: ((payload >> 8) as u32) & MAX_LINK_ID,
                velocity: payload as u8,
            },
            Kind::SleepFor => Instruction::SleepFor {
                event,
                duration: payload as u32,
            },
            Kind::SleepUntil => Instruction::SleepUntil {
                event,
                time: payload as u32,
            },
            Kind::Wait => Instruction::Wait {
                event,
                route: at.route,
                stop: at.stop,
            },
            Kind::Access => Instruction::Access { event, at },
            Kind::Egress => Instruction::Egress { event, at },
            Kind::StopArrive => Instruction::StopArrive { event, at },
            Kind::StopDelay => Instruction::StopDelay { event, at },
            Kind::StopDepart => Instruction::StopDepart { event, at },
        };
        Ok(instruction)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        PackedInstruction(raw)
    }
}

impl From<Instruction> for PackedInstruction {
    fn from(value: Instruction) -> Self {
        PackedInstruction::encode(&value)
    }
}

/// An immutable sequence of packed instructions. Deserialized plans go through the same length
/// check as plans built in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "Vec<PackedInstruction>",
    into = "Vec<PackedInstruction>"
)]
pub struct Plan {
    words: Vec<PackedInstruction>,
}

impl Plan {
    pub fn new(instructions: Vec<Instruction>) -> Result<Self, EncodeError> {
        Self::from_words(instructions.into_iter().map(PackedInstruction::from).collect())
    }

    pub fn from_words(words: Vec<PackedInstruction>) -> Result<Self, EncodeError> {
        if words.len() > MAX_PLAN_LENGTH {
            return Err(EncodeError::PlanTooLong {
                len: words.len(),
                max: MAX_PLAN_LENGTH,
            });
        }
        Ok(Plan { words })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Decodes the instruction at `index`. A word which can't be decoded means the plan was
    /// corrupted after validation, which the kernel can't recover from.
    pub fn get(&self, index: usize) -> Option<Instruction> {
        self.words.get(index).map(|w| {
            w.decode().unwrap_or_else(|e| {
                panic!("Plan contains a corrupted instruction {w:?} at index {index}: {e}")
            })
        })
    }

    pub fn words(&self) -> &[PackedInstruction] {
        &self.words
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Instruction, DecodeError>> + '_ {
        self.words.iter().map(|w| w.decode())
    }
}

impl TryFrom<Vec<PackedInstruction>> for Plan {
    type Error = EncodeError;

    fn try_from(words: Vec<PackedInstruction>) -> Result<Self, Self::Error> {
        Plan::from_words(words)
    }
}

impl From<Plan> for Vec<PackedInstruction> {
    fn from(plan: Plan) -> Self {
        plan.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(instruction: Instruction) {
        let packed = PackedInstruction::encode(&instruction);
        assert_eq!(instruction, packed.decode().unwrap());
    }

    #[test]
    fn round_trip_all_kinds_at_field_limits() {
        round_trip(Instruction::link_traversal(MAX_EVENT_ID, MAX_LINK_ID, MAX_VELOCITY).unwrap());
        round_trip(Instruction::link_traversal(0, 0, 0).unwrap());
        round_trip(Instruction::sleep_for(7, u32::MAX).unwrap());
        round_trip(Instruction::sleep_until(MAX_EVENT_ID, 86_400).unwrap());
        round_trip(Instruction::wait(3, MAX_ROUTE_ID, MAX_STOP_ID).unwrap());
        round_trip(Instruction::access(1, 2, 3, MAX_STOP_INDEX).unwrap());
        round_trip(Instruction::egress(1, MAX_ROUTE_ID, 0, 4).unwrap());
        round_trip(Instruction::stop_arrive(0, 12, MAX_STOP_ID, 0).unwrap());
        round_trip(Instruction::stop_delay(9, 12, 40, 1).unwrap());
        round_trip(Instruction::stop_depart(MAX_EVENT_ID, 12, 40, 1).unwrap());
    }

    #[test]
    fn layout_matches_documentation() {
        let packed = PackedInstruction::encode(&Instruction::link_traversal(2, 5, 10).unwrap());
        assert_eq!(1, packed.raw() >> 56);
        assert_eq!(2, (packed.raw() >> 40) & 0xFFFF);
        assert_eq!((5 << 8) | 10, packed.raw() & PAYLOAD_MASK);
    }

    #[test]
    fn link_id_overflow_is_rejected() {
        let err = Instruction::link_traversal(0, MAX_LINK_ID + 1, 10).unwrap_err();
        assert_eq!(
            EncodeError::FieldOverflow {
                kind: Kind::LinkTraversal,
                field: "link id",
                value: (MAX_LINK_ID + 1) as u64,
                max: MAX_LINK_ID as u64,
            },
            err
        );
    }

    #[test]
    fn other_overflows_are_rejected() {
        assert!(Instruction::link_traversal(0, 1, 256).is_err());
        assert!(Instruction::sleep_for(MAX_EVENT_ID + 1, 10).is_err());
        assert!(Instruction::wait(0, MAX_ROUTE_ID + 1, 0).is_err());
        assert!(Instruction::access(0, 0, MAX_STOP_ID + 1, 0).is_err());
        assert!(Instruction::stop_delay(0, 0, 0, MAX_STOP_INDEX + 1).is_err());
    }

    #[test]
    fn unknown_kind_is_not_decoded() {
        let word = PackedInstruction::from_raw(42 << 56);
        assert_eq!(Err(DecodeError::UnknownKind(42)), word.decode());
    }

    #[test]
    fn plan_too_long() {
        let words = vec![PackedInstruction::from_raw(2 << 56); MAX_PLAN_LENGTH + 1];
        assert!(matches!(
            Plan::from_words(words),
            Err(EncodeError::PlanTooLong { .. })
        ));
    }

    #[test]
    fn deserialized_plan_is_length_checked() {
        let words = vec![2u64 << 56; MAX_PLAN_LENGTH + 1];
        let json = serde_json::to_string(&words).unwrap();
        let err = serde_json::from_str::<Plan>(&json).unwrap_err();
        assert!(err.to_string().contains("at most 65535"), "{err}");

        let plan: Plan = serde_json::from_str(&serde_json::to_string(&words[..3]).unwrap()).unwrap();
        assert_eq!(3, plan.len());
    }

    #[test]
    fn plan_get_decodes() {
        let plan = Plan::new(vec![
            Instruction::link_traversal(0, 1, 10).unwrap(),
            Instruction::sleep_for(1, 60).unwrap(),
        ])
        .unwrap();
        assert_eq!(2, plan.len());
        assert_eq!(Some(Instruction::sleep_for(1, 60).unwrap()), plan.get(1));
        assert_eq!(None, plan.get(2));
    }
}
