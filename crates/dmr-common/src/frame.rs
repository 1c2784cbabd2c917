//! HomeBrew Repeater Protocol (HBP) frame parsing and serialization.
//!
//! Every HBP datagram starts with an ASCII command. Data frames (`DMRD`)
//! have a fixed 53-byte layout with an optional BER/RSSI trailer; the
//! control commands carry a 4-byte peer id at a command-specific offset.

use crate::types::{id24, id24_bytes, CallType, DmrId, FrameType, Slot, StreamId};
use crate::types::{DT_CSBK, DT_VOICE_HEAD, DT_VOICE_TERM};
use thiserror::Error;

/// Encapsulated DMR burst.
pub const DMRD: &[u8; 4] = b"DMRD";
/// Talker alias from a repeater.
pub const DMRA: &[u8; 4] = b"DMRA";
/// Repeater login request.
pub const RPTL: &[u8; 4] = b"RPTL";
/// Repeater challenge response.
pub const RPTK: &[u8; 4] = b"RPTK";
/// Repeater configuration.
pub const RPTC: &[u8; 4] = b"RPTC";
/// Repeater disconnect.
pub const RPTCL: &[u8; 5] = b"RPTCL";
/// Repeater options.
pub const RPTO: &[u8; 4] = b"RPTO";
/// Repeater keepalive.
pub const RPTPING: &[u8; 7] = b"RPTPING";
/// Positive acknowledgement (both directions of the login).
pub const RPTACK: &[u8; 6] = b"RPTACK";
/// Negative acknowledgement from a master.
pub const MSTNAK: &[u8; 6] = b"MSTNAK";
/// Keepalive reply from a master.
pub const MSTPONG: &[u8; 7] = b"MSTPONG";
/// Master disconnect.
pub const MSTCL: &[u8; 5] = b"MSTCL";
/// Proxy quarantine notice.
pub const PRBL: &[u8; 4] = b"PRBL";
/// Proxy information.
pub const PRIN: &[u8; 4] = b"PRIN";

/// Length of the core `DMRD` layout.
pub const DMRD_LEN: usize = 53;
/// Length of a `DMRD` frame with the BER/RSSI trailer.
pub const DMRD_EXT_LEN: usize = 55;
/// Length of the DMR burst payload inside a `DMRD` frame.
pub const PAYLOAD_LEN: usize = 33;
/// Length of the repeater metadata block in `RPTC`.
pub const METADATA_LEN: usize = 294;

/// Errors that can occur during frame parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The input byte slice was empty.
    #[error("frame is empty")]
    Empty,
    /// The frame is too short for the declared command.
    #[error("frame too short: expected {expected}, got {actual}")]
    TooShort {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The leading bytes do not match any known command.
    #[error("unknown command {0:?}")]
    UnknownCommand([u8; 4]),
    /// A `DMRD` frame carried the reserved all-zero stream id.
    #[error("null stream id")]
    NullStream,
}

fn need(data: &[u8], expected: usize) -> Result<(), FrameError> {
    if data.len() < expected {
        return Err(FrameError::TooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Safely convert a byte slice to a fixed-size array.
/// Returns `FrameError::TooShort` if the slice is the wrong length.
pub(crate) fn try_into_array<const N: usize>(data: &[u8]) -> Result<[u8; N], FrameError> {
    data.try_into().map_err(|_| FrameError::TooShort {
        expected: N,
        actual: data.len(),
    })
}

fn be32(data: &[u8]) -> Result<u32, FrameError> {
    Ok(u32::from_be_bytes(try_into_array(data)?))
}

/// Decoded flag byte (offset 15) of a `DMRD` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameBits {
    /// Timeslot, bit 7.
    pub slot: Slot,
    /// Group, unit or voice CSBK.
    pub call_type: CallType,
    /// Burst role, bits 5-4.
    pub frame_type: FrameType,
    /// Voice sequence (0-5) or data type, bits 3-0.
    pub dtype_vseq: u8,
}

impl FrameBits {
    /// Decodes a flag byte.
    ///
    /// # Examples
    ///
    /// ```
    /// use dmr_common::frame::FrameBits;
    /// use dmr_common::types::{CallType, Slot};
    /// let bits = FrameBits::decode(0xA1);
    /// assert_eq!(bits.slot, Slot::Two);
    /// assert_eq!(bits.call_type, CallType::Group);
    /// assert!(bits.is_voice_header());
    /// ```
    #[must_use]
    pub const fn decode(byte: u8) -> Self {
        let slot = if byte & 0x80 != 0 { Slot::Two } else { Slot::One };
        let call_type = if byte & 0x40 != 0 {
            CallType::Unit
        } else if byte & 0x23 == 0x23 {
            CallType::Vcsbk
        } else {
            CallType::Group
        };
        Self {
            slot,
            call_type,
            frame_type: FrameType::from_bits((byte & 0x30) >> 4),
            dtype_vseq: byte & 0x0F,
        }
    }

    /// Encodes back to the wire byte.
    #[must_use]
    pub const fn encode(self) -> u8 {
        let mut byte = (self.frame_type.bits() << 4) | (self.dtype_vseq & 0x0F);
        if let Slot::Two = self.slot {
            byte |= 0x80;
        }
        if let CallType::Unit = self.call_type {
            byte |= 0x40;
        }
        byte
    }

    /// Same bits on another timeslot.
    #[must_use]
    pub const fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = slot;
        self
    }

    /// Group voice header burst.
    #[must_use]
    pub const fn voice_header(slot: Slot) -> Self {
        Self {
            slot,
            call_type: CallType::Group,
            frame_type: FrameType::DataSync,
            dtype_vseq: DT_VOICE_HEAD,
        }
    }

    /// Data-sync burst carrying a voice header LC.
    #[must_use]
    pub const fn is_voice_header(&self) -> bool {
        matches!(self.frame_type, FrameType::DataSync) && self.dtype_vseq == DT_VOICE_HEAD
    }

    /// Data-sync burst carrying a terminator LC.
    #[must_use]
    pub const fn is_voice_terminator(&self) -> bool {
        matches!(self.frame_type, FrameType::DataSync) && self.dtype_vseq == DT_VOICE_TERM
    }

    /// Voice burst B-E, which carries an embedded LC fragment.
    #[must_use]
    pub const fn embedded_lc_index(&self) -> Option<usize> {
        match (self.frame_type, self.dtype_vseq) {
            (FrameType::Voice, n @ 1..=4) => Some(n as usize),
            _ => None,
        }
    }

    /// Whether this is a CSBK on a data-sync burst.
    #[must_use]
    pub const fn is_csbk(&self) -> bool {
        matches!(self.frame_type, FrameType::DataSync) && self.dtype_vseq == DT_CSBK
    }
}

/// One `DMRD` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dmrd {
    /// Per-stream sequence number.
    pub seq: u8,
    /// Originating radio id.
    pub rf_src: DmrId,
    /// Destination talkgroup or radio id.
    pub dst: DmrId,
    /// Repeater or network id of the sending hop.
    pub peer: DmrId,
    /// Decoded flag byte.
    pub bits: FrameBits,
    /// Call stream id.
    pub stream_id: StreamId,
    /// Raw DMR burst.
    pub payload: [u8; PAYLOAD_LEN],
    /// Bit error rate trailer (0 when absent).
    pub ber: u8,
    /// RSSI trailer (0 when absent).
    pub rssi: u8,
}

impl Dmrd {
    /// Parses a `DMRD` datagram. The command bytes are not checked, so
    /// this also reads the `DMRF` and `DMRE` OpenBridge variants.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooShort`] below 53 bytes and
    /// [`FrameError::NullStream`] for a zero stream id.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        need(data, DMRD_LEN)?;
        let stream_id = be32(&data[16..20])?;
        if stream_id == 0 {
            return Err(FrameError::NullStream);
        }
        let (ber, rssi) = if data.len() >= DMRD_EXT_LEN {
            (data[53], data[54])
        } else {
            (0, 0)
        };
        Ok(Self {
            seq: data[4],
            rf_src: id24(&data[5..8]),
            dst: id24(&data[8..11]),
            peer: be32(&data[11..15])?,
            bits: FrameBits::decode(data[15]),
            stream_id,
            payload: try_into_array(&data[20..53])?,
            ber,
            rssi,
        })
    }

    /// Writes the 53-byte core layout with the given command.
    #[must_use]
    pub fn encode_core(&self, command: &[u8; 4]) -> [u8; DMRD_LEN] {
        let mut out = [0u8; DMRD_LEN];
        out[..4].copy_from_slice(command);
        out[4] = self.seq;
        out[5..8].copy_from_slice(&id24_bytes(self.rf_src));
        out[8..11].copy_from_slice(&id24_bytes(self.dst));
        out[11..15].copy_from_slice(&self.peer.to_be_bytes());
        out[15] = self.bits.encode();
        out[16..20].copy_from_slice(&self.stream_id.to_be_bytes());
        out[20..].copy_from_slice(&self.payload);
        out
    }

    /// Serializes as an HBP `DMRD` frame with the BER/RSSI trailer.
    ///
    /// # Examples
    ///
    /// ```
    /// use dmr_common::frame::{Dmrd, FrameBits, DMRD_EXT_LEN};
    /// use dmr_common::types::Slot;
    /// let frame = Dmrd {
    ///     seq: 0, rf_src: 3_120_101, dst: 91, peer: 312_010_101,
    ///     bits: FrameBits::voice_header(Slot::One), stream_id: 7,
    ///     payload: [0; 33], ber: 0, rssi: 0,
    /// };
    /// let bytes = frame.serialize();
    /// assert_eq!(bytes.len(), DMRD_EXT_LEN);
    /// assert_eq!(Dmrd::parse(&bytes).unwrap(), frame);
    /// ```
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(DMRD_EXT_LEN);
        v.extend_from_slice(&self.encode_core(DMRD));
        v.push(self.ber);
        v.push(self.rssi);
        v
    }
}

fn fixed_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn ljust(out: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(width);
    out.extend_from_slice(&bytes[..n]);
    out.extend(std::iter::repeat(b' ').take(width - n));
}

fn rjust(out: &mut Vec<u8>, value: &str, width: usize, fill: u8) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(width);
    out.extend(std::iter::repeat(fill).take(width - n));
    out.extend_from_slice(&bytes[bytes.len() - n..]);
}

/// Static repeater metadata carried by `RPTC`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[allow(missing_docs)]
pub struct PeerMetadata {
    pub callsign: String,
    pub rx_freq: String,
    pub tx_freq: String,
    pub tx_power: String,
    pub colorcode: String,
    pub latitude: String,
    pub longitude: String,
    pub height: String,
    pub location: String,
    pub description: String,
    pub slots: String,
    pub url: String,
    pub software_id: String,
    pub package_id: String,
}

impl PeerMetadata {
    /// Reads the 294-byte block that follows the peer id.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooShort`] if the block is truncated.
    pub fn parse(block: &[u8]) -> Result<Self, FrameError> {
        need(block, METADATA_LEN)?;
        let f = |a: usize, b: usize| fixed_text(&block[a..b]);
        Ok(Self {
            callsign: f(0, 8),
            rx_freq: f(8, 17),
            tx_freq: f(17, 26),
            tx_power: f(26, 28),
            colorcode: f(28, 30),
            latitude: f(30, 38),
            longitude: f(38, 47),
            height: f(47, 50),
            location: f(50, 70),
            description: f(70, 89),
            slots: f(89, 90),
            url: f(90, 214),
            software_id: f(214, 254),
            package_id: f(254, 294),
        })
    }

    /// Writes the padded wire block.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(METADATA_LEN);
        ljust(&mut v, &self.callsign, 8);
        ljust(&mut v, &self.rx_freq, 9);
        ljust(&mut v, &self.tx_freq, 9);
        rjust(&mut v, &self.tx_power, 2, b'0');
        rjust(&mut v, &self.colorcode, 2, b'0');
        ljust(&mut v, &self.latitude, 8);
        ljust(&mut v, &self.longitude, 9);
        rjust(&mut v, &self.height, 3, b'0');
        ljust(&mut v, &self.location, 20);
        ljust(&mut v, &self.description, 19);
        ljust(&mut v, &self.slots, 1);
        ljust(&mut v, &self.url, 124);
        ljust(&mut v, &self.software_id, 40);
        ljust(&mut v, &self.package_id, 40);
        v
    }
}

/// A parsed HBP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HbpFrame {
    /// `DMRD` burst.
    Data(Dmrd),
    /// `RPTL` login request.
    Login {
        /// Repeater id.
        peer_id: DmrId,
    },
    /// `RPTK` salted hash response.
    AuthResponse {
        /// Repeater id.
        peer_id: DmrId,
        /// SHA-256 of salt and passphrase.
        hash: [u8; 32],
    },
    /// `RPTC` repeater configuration.
    Config {
        /// Repeater id.
        peer_id: DmrId,
        /// Static metadata.
        meta: Box<PeerMetadata>,
    },
    /// `RPTCL` repeater disconnect.
    Close {
        /// Repeater id.
        peer_id: DmrId,
    },
    /// `RPTO` options string.
    Options {
        /// Repeater id.
        peer_id: DmrId,
        /// `KEY=VALUE;...` text.
        options: String,
    },
    /// `RPTPING` keepalive.
    Ping {
        /// Repeater id.
        peer_id: DmrId,
    },
    /// `RPTACK`, carrying either the login salt or the peer id.
    Ack {
        /// Four bytes following the command.
        value: u32,
    },
    /// `MSTNAK` rejection.
    Nak {
        /// Repeater id.
        peer_id: DmrId,
    },
    /// `MSTPONG` keepalive reply.
    Pong {
        /// Repeater id.
        peer_id: DmrId,
    },
    /// `MSTCL` master disconnect.
    MasterClose {
        /// Repeater id.
        peer_id: DmrId,
    },
    /// `DMRA` talker alias.
    TalkerAlias {
        /// Raw bytes after the command.
        payload: Vec<u8>,
    },
    /// `PRBL` quarantine notice for a proxy.
    Quarantine {
        /// Repeater id.
        peer_id: DmrId,
        /// Unix time the quarantine expires.
        until: u64,
    },
    /// `PRIN` proxy information.
    ProxyInfo {
        /// Raw bytes after the command.
        payload: Vec<u8>,
    },
}

impl HbpFrame {
    /// Parses an HBP datagram by its command prefix.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the data is empty, too short for the
    /// matched command, or starts with an unknown command.
    #[allow(clippy::too_many_lines)]
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.is_empty() {
            return Err(FrameError::Empty);
        }
        need(data, 4)?;
        let cmd = &data[..4];
        if cmd == DMRD {
            return Ok(Self::Data(Dmrd::parse(data)?));
        }
        if cmd == DMRA {
            return Ok(Self::TalkerAlias {
                payload: data[4..].to_vec(),
            });
        }
        if cmd == RPTL {
            need(data, 8)?;
            return Ok(Self::Login {
                peer_id: be32(&data[4..8])?,
            });
        }
        if cmd == RPTK {
            need(data, 40)?;
            return Ok(Self::AuthResponse {
                peer_id: be32(&data[4..8])?,
                hash: try_into_array(&data[8..40])?,
            });
        }
        if data.starts_with(RPTCL) {
            need(data, 9)?;
            return Ok(Self::Close {
                peer_id: be32(&data[5..9])?,
            });
        }
        if cmd == RPTC {
            need(data, 8 + METADATA_LEN)?;
            return Ok(Self::Config {
                peer_id: be32(&data[4..8])?,
                meta: Box::new(PeerMetadata::parse(&data[8..])?),
            });
        }
        if cmd == RPTO {
            need(data, 8)?;
            return Ok(Self::Options {
                peer_id: be32(&data[4..8])?,
                options: fixed_text(&data[8..]),
            });
        }
        if data.starts_with(b"RPTP") {
            need(data, 11)?;
            return Ok(Self::Ping {
                peer_id: be32(&data[7..11])?,
            });
        }
        if data.starts_with(b"RPTA") {
            need(data, 10)?;
            return Ok(Self::Ack {
                value: be32(&data[6..10])?,
            });
        }
        if data.starts_with(b"MSTN") {
            need(data, 10)?;
            return Ok(Self::Nak {
                peer_id: be32(&data[6..10])?,
            });
        }
        if data.starts_with(b"MSTP") {
            need(data, 11)?;
            return Ok(Self::Pong {
                peer_id: be32(&data[7..11])?,
            });
        }
        if data.starts_with(b"MSTC") {
            need(data, 9)?;
            return Ok(Self::MasterClose {
                peer_id: be32(&data[5..9])?,
            });
        }
        if cmd == PRBL {
            need(data, 8)?;
            let until = fixed_text(&data[8..])
                .split('.')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            return Ok(Self::Quarantine {
                peer_id: be32(&data[4..8])?,
                until,
            });
        }
        if cmd == PRIN {
            return Ok(Self::ProxyInfo {
                payload: data[4..].to_vec(),
            });
        }
        Err(FrameError::UnknownCommand(try_into_array(cmd)?))
    }

    /// Serializes this frame for transmission.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        fn with_id(cmd: &[u8], id: u32) -> Vec<u8> {
            let mut v = Vec::with_capacity(cmd.len() + 4);
            v.extend_from_slice(cmd);
            v.extend_from_slice(&id.to_be_bytes());
            v
        }
        match self {
            Self::Data(d) => d.serialize(),
            Self::Login { peer_id } => with_id(RPTL, *peer_id),
            Self::AuthResponse { peer_id, hash } => {
                let mut v = with_id(RPTK, *peer_id);
                v.extend_from_slice(hash);
                v
            }
            Self::Config { peer_id, meta } => {
                let mut v = with_id(RPTC, *peer_id);
                v.extend_from_slice(&meta.encode());
                v
            }
            Self::Close { peer_id } => with_id(RPTCL, *peer_id),
            Self::Options { peer_id, options } => {
                let mut v = with_id(RPTO, *peer_id);
                v.extend_from_slice(options.as_bytes());
                v
            }
            Self::Ping { peer_id } => with_id(RPTPING, *peer_id),
            Self::Ack { value } => with_id(RPTACK, *value),
            Self::Nak { peer_id } => with_id(MSTNAK, *peer_id),
            Self::Pong { peer_id } => with_id(MSTPONG, *peer_id),
            Self::MasterClose { peer_id } => with_id(MSTCL, *peer_id),
            Self::TalkerAlias { payload } => [DMRA.as_slice(), payload.as_slice()].concat(),
            Self::Quarantine { peer_id, until } => {
                let mut v = with_id(PRBL, *peer_id);
                v.extend_from_slice(until.to_string().as_bytes());
                v
            }
            Self::ProxyInfo { payload } => [PRIN.as_slice(), payload.as_slice()].concat(),
        }
    }
}

/// Overwrites the peer id field (bytes 11-14) of a serialized `DMRD`.
pub fn rewrite_peer(frame: &mut [u8], peer: DmrId) {
    if frame.len() >= 15 {
        frame[11..15].copy_from_slice(&peer.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dmrd {
        let mut payload = [0u8; PAYLOAD_LEN];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = i as u8;
        }
        Dmrd {
            seq: 4,
            rf_src: 3_120_101,
            dst: 91,
            peer: 312_010_101,
            bits: FrameBits::decode(0x81),
            stream_id: 0xDEAD_BEEF,
            payload,
            ber: 3,
            rssi: 70,
        }
    }

    #[test]
    fn dmrd_offsets_match_wire_layout() {
        let bytes = sample().serialize();
        assert_eq!(&bytes[..4], b"DMRD");
        assert_eq!(bytes[4], 4);
        assert_eq!(&bytes[5..8], &[0x2F, 0x9B, 0xE5]);
        assert_eq!(&bytes[8..11], &[0, 0, 91]);
        assert_eq!(&bytes[11..15], &312_010_101u32.to_be_bytes());
        assert_eq!(bytes[15], 0x81);
        assert_eq!(&bytes[16..20], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(bytes[20], 0);
        assert_eq!(bytes[52], 32);
        assert_eq!(&bytes[53..], &[3, 70]);
    }

    #[test]
    fn dmrd_without_trailer_defaults_ber_rssi() {
        let bytes = sample().encode_core(DMRD);
        let parsed = Dmrd::parse(&bytes).unwrap();
        assert_eq!(parsed.ber, 0);
        assert_eq!(parsed.rssi, 0);
    }

    #[test]
    fn dmrd_short_is_rejected() {
        let bytes = sample().serialize();
        assert_eq!(
            Dmrd::parse(&bytes[..52]),
            Err(FrameError::TooShort {
                expected: 53,
                actual: 52
            })
        );
    }

    #[test]
    fn dmrd_null_stream_is_rejected() {
        let mut frame = sample();
        frame.stream_id = 0;
        let mut bytes = frame.serialize();
        bytes[16..20].copy_from_slice(&[0; 4]);
        assert_eq!(Dmrd::parse(&bytes), Err(FrameError::NullStream));
    }

    #[test]
    fn flag_byte_decodes_fields() {
        let unit = FrameBits::decode(0x40 | 0x20 | 6);
        assert_eq!(unit.call_type, CallType::Unit);
        assert_eq!(unit.frame_type, FrameType::DataSync);
        assert_eq!(unit.dtype_vseq, 6);

        let vcsbk = FrameBits::decode(0x23);
        assert_eq!(vcsbk.call_type, CallType::Vcsbk);
        assert!(vcsbk.is_csbk());

        let term = FrameBits::decode(0x22);
        assert!(term.is_voice_terminator());
        assert_eq!(term.slot, Slot::One);

        let burst_c = FrameBits::decode(0x82);
        assert_eq!(burst_c.frame_type, FrameType::Voice);
        assert_eq!(burst_c.embedded_lc_index(), Some(2));
        assert_eq!(FrameBits::decode(0x95).embedded_lc_index(), None);
    }

    #[test]
    fn slot_flip_toggles_bit7_only() {
        let bits = FrameBits::decode(0x21);
        assert_eq!(bits.with_slot(Slot::Two).encode(), 0xA1);
        assert_eq!(bits.with_slot(Slot::Two).with_slot(Slot::One).encode(), 0x21);
    }

    #[test]
    fn control_frames_use_command_offsets() {
        assert_eq!(
            HbpFrame::parse(b"RPTL\x12\x34\x56\x78").unwrap(),
            HbpFrame::Login {
                peer_id: 0x1234_5678
            }
        );
        assert_eq!(
            HbpFrame::parse(b"RPTCL\x00\x00\x00\x07").unwrap(),
            HbpFrame::Close { peer_id: 7 }
        );
        assert_eq!(
            HbpFrame::parse(b"RPTPING\x00\x00\x00\x07").unwrap(),
            HbpFrame::Ping { peer_id: 7 }
        );
        assert_eq!(
            HbpFrame::parse(b"RPTACK\x00\x00\x01\x00").unwrap(),
            HbpFrame::Ack { value: 256 }
        );
        assert_eq!(
            HbpFrame::parse(b"MSTNAK\x00\x00\x00\x07").unwrap(),
            HbpFrame::Nak { peer_id: 7 }
        );
        assert_eq!(
            HbpFrame::parse(b"MSTPONG\x00\x00\x00\x07").unwrap(),
            HbpFrame::Pong { peer_id: 7 }
        );
        assert_eq!(
            HbpFrame::parse(b"MSTCL\x00\x00\x00\x07").unwrap(),
            HbpFrame::MasterClose { peer_id: 7 }
        );
        assert_eq!(
            HbpFrame::parse(b"RPTO\x00\x00\x00\x07TS1=91;TS2=9").unwrap(),
            HbpFrame::Options {
                peer_id: 7,
                options: "TS1=91;TS2=9".to_string()
            }
        );
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(
            HbpFrame::parse(b"XXXX\x00\x00"),
            Err(FrameError::UnknownCommand(*b"XXXX"))
        );
        assert_eq!(HbpFrame::parse(b""), Err(FrameError::Empty));
    }

    #[test]
    fn config_frame_pads_metadata() {
        let meta = PeerMetadata {
            callsign: "M0ABC".into(),
            rx_freq: "430000000".into(),
            tx_freq: "439000000".into(),
            tx_power: "1".into(),
            colorcode: "1".into(),
            latitude: "51.5000".into(),
            longitude: "-0.1200".into(),
            height: "10".into(),
            location: "London".into(),
            description: "hotspot".into(),
            slots: "3".into(),
            url: "https://example.org".into(),
            software_id: "dmrlink".into(),
            package_id: "dmrlink".into(),
        };
        let bytes = HbpFrame::Config {
            peer_id: 2_345_001,
            meta: Box::new(meta.clone()),
        }
        .serialize();
        assert_eq!(bytes.len(), 8 + METADATA_LEN);
        assert_eq!(&bytes[8..16], b"M0ABC   ");
        assert_eq!(&bytes[34..36], b"01");
        assert_eq!(&bytes[55..58], b"010");
        match HbpFrame::parse(&bytes).unwrap() {
            HbpFrame::Config { peer_id, meta: got } => {
                assert_eq!(peer_id, 2_345_001);
                assert_eq!(*got, PeerMetadata {
                    tx_power: "01".into(),
                    colorcode: "01".into(),
                    height: "010".into(),
                    ..meta
                });
            }
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn quarantine_carries_expiry() {
        let bytes = HbpFrame::Quarantine {
            peer_id: 9,
            until: 1_700_000_300,
        }
        .serialize();
        assert_eq!(&bytes[8..], b"1700000300");
        assert!(matches!(
            HbpFrame::parse(&bytes).unwrap(),
            HbpFrame::Quarantine {
                peer_id: 9,
                until: 1_700_000_300
            }
        ));
    }

    #[test]
    fn rewrite_peer_touches_only_peer_field() {
        let mut bytes = sample().serialize();
        let before = bytes.clone();
        rewrite_peer(&mut bytes, 1);
        assert_eq!(&bytes[11..15], &[0, 0, 0, 1]);
        assert_eq!(&bytes[..11], &before[..11]);
        assert_eq!(&bytes[15..], &before[15..]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn flag_byte_decode_is_lossless(byte in any::<u8>()) {
            prop_assert_eq!(FrameBits::decode(byte).encode(), byte);
        }

        #[test]
        fn parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..400)) {
            let _ = HbpFrame::parse(&data);
        }

        #[test]
        fn dmrd_fields_survive_serialization(
            seq in any::<u8>(),
            src in 0u32..0x0100_0000,
            dst in 0u32..0x0100_0000,
            peer in any::<u32>(),
            bits in any::<u8>(),
            stream in 1u32..,
        ) {
            let frame = Dmrd {
                seq, rf_src: src, dst, peer,
                bits: FrameBits::decode(bits),
                stream_id: stream,
                payload: [0x5A; PAYLOAD_LEN],
                ber: 0, rssi: 0,
            };
            prop_assert_eq!(Dmrd::parse(&frame.serialize()).unwrap(), frame);
        }
    }
}
