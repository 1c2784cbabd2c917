//! Core type definitions and protocol constants for HBP and OpenBridge.

use serde::{Deserialize, Serialize};

/// A DMR radio, repeater or talkgroup id. Subscriber and talkgroup ids use
/// 24 bits on the wire, repeater and network ids use 32.
pub type DmrId = u32;

/// A 4-byte call stream identifier chosen by the call originator.
pub type StreamId = u32;

/// Lowest id accepted in an ACL range.
pub const ID_MIN: u32 = 0;
/// Highest subscriber / talkgroup id accepted in an ACL range.
pub const ID_MAX: u32 = 16_776_415;
/// Highest peer (repeater) id accepted in a registration ACL range.
pub const PEER_MAX: u32 = u32::MAX;

/// Peer id a repeater uses to probe master status without logging in.
pub const STATUS_PROBE_ID: DmrId = 0xFFFF_FFFF;

/// Reflector talkgroup carried on slot 2 by convention.
pub const REFLECTOR_TG: DmrId = 9;
/// Private call that unlinks the active reflector.
pub const UNLINK_TG: DmrId = 4000;
/// Private call that asks for the reflector status.
pub const STATUS_TG: DmrId = 5000;
/// Parrot / echo talkgroup.
pub const ECHO_TG: DmrId = 9990;
/// DMR all-call destination.
pub const ALL_CALL: DmrId = 16_777_215;
/// APRS gateway destination for unit data.
pub const APRS_TG: DmrId = 900_999;

/// Voice header data type (data-sync frame).
pub const DT_VOICE_HEAD: u8 = 1;
/// Voice terminator data type (data-sync frame).
pub const DT_VOICE_TERM: u8 = 2;
/// Control signalling block.
pub const DT_CSBK: u8 = 3;
/// Data header.
pub const DT_DATA_HEADER: u8 = 6;
/// Rate 1/2 data continuation.
pub const DT_RATE_12: u8 = 7;
/// Rate 3/4 data continuation.
pub const DT_RATE_34: u8 = 8;

/// One of the two TDMA channels on a repeater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Slot {
    /// Timeslot 1.
    One,
    /// Timeslot 2.
    Two,
}

impl Slot {
    /// Both slots in wire order.
    pub const ALL: [Slot; 2] = [Slot::One, Slot::Two];

    /// Slot number as written in configuration and reports (1 or 2).
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    /// Zero-based index for per-slot arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }

    /// The opposite timeslot.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    /// Parses a slot number.
    #[must_use]
    pub const fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Slot {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_number(value).ok_or_else(|| format!("invalid timeslot {value}, expected 1 or 2"))
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> Self {
        slot.number()
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Call addressing mode carried in the flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    /// Talkgroup call.
    Group,
    /// Private (unit-to-unit) call.
    Unit,
    /// Voice-channel CSBK signalling on a group channel.
    Vcsbk,
}

/// Burst role carried in bits 5-4 of the flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Voice burst B-F.
    Voice,
    /// Voice burst A (carries voice sync).
    VoiceSync,
    /// Data-sync burst: voice header, terminator or data.
    DataSync,
    /// Unassigned value 3.
    Reserved,
}

impl FrameType {
    /// Decodes the two-bit frame type field.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Voice,
            1 => Self::VoiceSync,
            2 => Self::DataSync,
            _ => Self::Reserved,
        }
    }

    /// Two-bit wire value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Voice => 0,
            Self::VoiceSync => 1,
            Self::DataSync => 2,
            Self::Reserved => 3,
        }
    }
}

/// Reads a big-endian 24-bit id.
#[must_use]
pub fn id24(bytes: &[u8]) -> DmrId {
    bytes
        .iter()
        .take(3)
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}

/// Writes a 24-bit id big-endian, dropping the top byte.
#[must_use]
pub fn id24_bytes(id: DmrId) -> [u8; 3] {
    let b = id.to_be_bytes();
    [b[1], b[2], b[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_number_and_index_agree() {
        assert_eq!(Slot::One.number(), 1);
        assert_eq!(Slot::Two.index(), 1);
        assert_eq!(Slot::One.other(), Slot::Two);
        assert_eq!(Slot::from_number(3), None);
    }

    #[test]
    fn id24_reads_three_bytes() {
        assert_eq!(id24(&[0x31, 0x32, 0x33]), 0x0031_3233);
        assert_eq!(id24_bytes(3_120_101), [0x2F, 0x9B, 0xE5]);
        assert_eq!(id24(&id24_bytes(ALL_CALL)), ALL_CALL);
    }

    #[test]
    fn slot_deserializes_from_number() {
        let slot: Slot = serde_json::from_str("2").unwrap();
        assert_eq!(slot, Slot::Two);
        assert!(serde_json::from_str::<Slot>("0").is_err());
    }
}
