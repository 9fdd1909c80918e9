//! Wire format of occupancy changes.
//!
//! Topic `parking/{floor}/slot{slot}`, payload exactly `occupied` or `free`.

use std::fmt;

use parking_broker::Message;

use crate::catalog::{FloorId, SlotId};
use crate::error::EventDecodeError;

/// Filter matching every occupancy topic.
pub const TOPIC_FILTER: &str = "parking/#";

const TOPIC_ROOT: &str = "parking";
const SLOT_PREFIX: &str = "slot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Occupancy {
    Occupied,
    Free,
}

impl Occupancy {
    pub fn as_str(self) -> &'static str {
        match self {
            Occupancy::Occupied => "occupied",
            Occupancy::Free => "free",
        }
    }

    pub fn parse(payload: &str) -> Result<Self, EventDecodeError> {
        match payload {
            "occupied" => Ok(Occupancy::Occupied),
            "free" => Ok(Occupancy::Free),
            other => Err(EventDecodeError::UnknownPayload(other.to_string())),
        }
    }
}

impl fmt::Display for Occupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One slot changing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyChangeEvent {
    pub slot: SlotId,
    pub floor: FloorId,
    pub state: Occupancy,
}

impl OccupancyChangeEvent {
    pub fn new(slot: SlotId, floor: FloorId, state: Occupancy) -> Self {
        Self { slot, floor, state }
    }

    pub fn topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/{SLOT_PREFIX}{}", self.floor, self.slot)
    }

    pub fn payload(&self) -> &'static str {
        self.state.as_str()
    }

    /// Decode a received message. Payloads are matched exactly.
    pub fn from_message(message: &Message) -> Result<Self, EventDecodeError> {
        let (floor, slot) = parse_topic(&message.topic)?;
        let payload = message
            .payload_str()
            .ok_or(EventDecodeError::NonUtf8Payload)?;
        Ok(Self {
            slot,
            floor,
            state: Occupancy::parse(payload)?,
        })
    }
}

fn parse_topic(topic: &str) -> Result<(FloorId, SlotId), EventDecodeError> {
    let malformed = || EventDecodeError::MalformedTopic(topic.to_string());
    let mut levels = topic.split('/');
    let (Some(TOPIC_ROOT), Some(floor), Some(slot_level), None) =
        (levels.next(), levels.next(), levels.next(), levels.next())
    else {
        return Err(malformed());
    };
    let slot = slot_level.strip_prefix(SLOT_PREFIX).ok_or_else(malformed)?;
    if floor.is_empty() || slot.is_empty() {
        return Err(malformed());
    }
    Ok((FloorId::from(floor), SlotId::from(slot)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn topic_and_payload_shape() {
        let event = OccupancyChangeEvent::new(
            SlotId::from("16"),
            FloorId::from("floor1"),
            Occupancy::Occupied,
        );
        assert_eq!(event.topic(), "parking/floor1/slot16");
        assert_eq!(event.payload(), "occupied");
    }

    #[test]
    fn decodes_received_message() {
        let message = Message::new("parking/floor2/slot25", "free");
        assert_eq!(
            OccupancyChangeEvent::from_message(&message),
            Ok(OccupancyChangeEvent::new(
                SlotId::from("25"),
                FloorId::from("floor2"),
                Occupancy::Free,
            ))
        );
    }

    #[test]
    fn rejects_malformed_topics() {
        for topic in [
            "parking/floor1",
            "parking/floor1/16",
            "parking/floor1/slot",
            "parking//slot16",
            "garage/floor1/slot16",
            "parking/floor1/slot16/extra",
        ] {
            let message = Message::new(topic, "occupied");
            assert_eq!(
                OccupancyChangeEvent::from_message(&message),
                Err(EventDecodeError::MalformedTopic(topic.to_string())),
                "{topic}"
            );
        }
    }

    #[test]
    fn rejects_unknown_payloads() {
        let message = Message::new("parking/floor1/slot16", "Occupied");
        assert_eq!(
            OccupancyChangeEvent::from_message(&message),
            Err(EventDecodeError::UnknownPayload("Occupied".to_string()))
        );

        let binary = Message::new("parking/floor1/slot16", vec![0xff_u8, 0xfe]);
        assert_eq!(
            OccupancyChangeEvent::from_message(&binary),
            Err(EventDecodeError::NonUtf8Payload)
        );
    }
}
