//! OpenBridge / FreeBridge server-to-server framing.
//!
//! Data frames reuse the 53-byte `DMRD` layout and append version-specific
//! fields and a keyed digest:
//!
//! | ver | command | after byte 53                                        | digest            |
//! |-----|---------|------------------------------------------------------|-------------------|
//! | 1   | `DMRD`  | -                                                    | HMAC-SHA1 [0:53]  |
//! | 2   | `DMRF`  | ts(8) hops(1)                                        | HMAC-SHA1 [0:61]  |
//! | 3   | `DMRF`  | ts(8) hops(1)                                        | HMAC-SHA1 [0:53]  |
//! | 4   | `DMRE`  | ber rssi ver ts(8) server(4) hops                    | BLAKE2b-16 [0:69] |
//! | 5   | `DMRE`  | ber rssi ver ts(8) server(4) repeater(4) hops        | BLAKE2b-16 [0:73] |
//!
//! Control frames start with `BC`: keepalive (`BCKA`), source quench
//! (`BCSQ`), stun (`BCST`) and version announce (`BCVE`).

use crate::crypto::{
    blake2b_mac, hmac_sha1, verify_blake2b, verify_hmac_sha1, BLAKE_LEN, HMAC_LEN,
};
use crate::frame::{try_into_array, Dmrd, FrameError, DMRD, DMRD_LEN};
use crate::types::{id24, id24_bytes, DmrId, StreamId};
use thiserror::Error;

/// Version 2/3 data frame.
pub const DMRF: &[u8; 4] = b"DMRF";
/// Version 4/5 extended data frame.
pub const DMRE: &[u8; 4] = b"DMRE";
/// Unsupported third-party extension.
pub const EOBP: &[u8; 4] = b"EOBP";
/// Bridge-control keepalive.
pub const BCKA: &[u8; 4] = b"BCKA";
/// Bridge-control source quench.
pub const BCSQ: &[u8; 4] = b"BCSQ";
/// Bridge-control stun.
pub const BCST: &[u8; 4] = b"BCST";
/// Bridge-control version announce.
pub const BCVE: &[u8; 4] = b"BCVE";

/// Highest protocol version this implementation speaks.
pub const MAX_VERSION: u8 = 5;
/// Frames with more hops than this are dropped.
pub const MAX_HOPS: u8 = 10;

/// Errors from decoding or authenticating an OpenBridge datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObpError {
    /// Datagram shorter than its layout.
    #[error("frame too short: expected {expected}, got {actual}")]
    TooShort {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// Keyed digest mismatch.
    #[error("digest mismatch")]
    BadDigest,
    /// Known command from a dialect this relay does not speak.
    #[error("unsupported dialect {0:?}")]
    Unsupported([u8; 4]),
    /// Unrecognised command.
    #[error("unknown command {0:?}")]
    UnknownCommand([u8; 4]),
    /// Inner `DMRD` layout error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

fn need(data: &[u8], expected: usize) -> Result<(), ObpError> {
    if data.len() < expected {
        return Err(ObpError::TooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn be32(data: &[u8]) -> Result<u32, ObpError> {
    Ok(u32::from_be_bytes(try_into_array(data)?))
}

fn be64(data: &[u8]) -> Result<u64, ObpError> {
    Ok(u64::from_be_bytes(try_into_array(data)?))
}

/// An authenticated OpenBridge data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObpData {
    /// The burst; `peer` holds the sender's network id.
    pub dmrd: Dmrd,
    /// Layout version the frame arrived in.
    pub version: u8,
    /// Sender timestamp in Unix nanoseconds (version 2 and later).
    pub timestamp_ns: Option<u64>,
    /// Hop count as received (0 for version 1).
    pub hops: u8,
    /// Originating server id (version 4 and later, else 0).
    pub source_server: DmrId,
    /// Originating repeater id (version 5, else 0).
    pub source_repeater: DmrId,
}

/// Fields added to an outbound data frame beyond the burst itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObpEnvelope {
    /// Local server id written at bytes 11-14.
    pub server_id: DmrId,
    /// Send timestamp in Unix nanoseconds.
    pub timestamp_ns: u64,
    /// Hop count to transmit.
    pub hops: u8,
    /// Originating server id.
    pub source_server: DmrId,
    /// Originating repeater id.
    pub source_repeater: DmrId,
}

/// Encodes `dmrd` in the layout for `version` and signs it with `key`.
///
/// # Examples
///
/// ```
/// use dmr_common::crypto::obp_key;
/// use dmr_common::frame::{Dmrd, FrameBits};
/// use dmr_common::openbridge::{decode, encode_data, ObpEnvelope, ObpFrame};
/// use dmr_common::types::Slot;
///
/// let key = obp_key(b"linkpass");
/// let dmrd = Dmrd {
///     seq: 1, rf_src: 3_120_101, dst: 91, peer: 0,
///     bits: FrameBits::voice_header(Slot::One), stream_id: 77,
///     payload: [0; 33], ber: 0, rssi: 0,
/// };
/// let env = ObpEnvelope {
///     server_id: 2341, timestamp_ns: 1, hops: 1, source_server: 2341, source_repeater: 0,
/// };
/// let wire = encode_data(&dmrd, 5, &key, &env);
/// assert_eq!(wire.len(), 89);
/// let ObpFrame::Data(got) = decode(&wire, &key, 5).unwrap() else { panic!() };
/// assert_eq!(got.dmrd.peer, 2341);
/// assert_eq!(got.hops, 1);
/// ```
#[must_use]
pub fn encode_data(dmrd: &Dmrd, version: u8, key: &[u8], env: &ObpEnvelope) -> Vec<u8> {
    let mut burst = dmrd.clone();
    burst.peer = env.server_id;
    let ts = env.timestamp_ns.to_be_bytes();
    match version {
        0 | 1 => {
            let core = burst.encode_core(DMRD);
            let mut v = Vec::with_capacity(DMRD_LEN + HMAC_LEN);
            v.extend_from_slice(&core);
            v.extend_from_slice(&hmac_sha1(key, &core));
            v
        }
        2 | 3 => {
            let core = burst.encode_core(DMRF);
            let mut v = Vec::with_capacity(DMRD_LEN + 9 + HMAC_LEN);
            v.extend_from_slice(&core);
            v.extend_from_slice(&ts);
            let digest = if version == 2 {
                hmac_sha1(key, &v)
            } else {
                hmac_sha1(key, &core)
            };
            v.push(env.hops);
            v.extend_from_slice(&digest);
            v
        }
        _ => {
            let core = burst.encode_core(DMRE);
            let mut v = Vec::with_capacity(DMRD_LEN + 20 + BLAKE_LEN);
            v.extend_from_slice(&core);
            v.push(burst.ber);
            v.push(burst.rssi);
            v.push(version.min(MAX_VERSION));
            v.extend_from_slice(&ts);
            v.extend_from_slice(&env.source_server.to_be_bytes());
            if version > 4 {
                v.extend_from_slice(&env.source_repeater.to_be_bytes());
            }
            v.push(env.hops);
            let digest = blake2b_mac(key, &v);
            v.extend_from_slice(&digest);
            v
        }
    }
}

/// A decoded, authenticated OpenBridge datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObpFrame {
    /// Data frame of any version.
    Data(Box<ObpData>),
    /// Bridge-control frame.
    Control(ObpControl),
}

/// Bridge-control messages exchanged on enhanced links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObpControl {
    /// `BCKA` link keepalive.
    Keepalive,
    /// `BCSQ`: stop sending this stream on this talkgroup.
    SourceQuench {
        /// Talkgroup of the unwanted stream.
        tgid: DmrId,
        /// Stream to stop.
        stream_id: StreamId,
    },
    /// `BCST`: stop sending anything.
    Stun,
    /// `BCVE`: sender's protocol version.
    VersionAnnounce(u8),
}

impl ObpControl {
    /// Serializes and signs a control frame.
    #[must_use]
    pub fn encode(&self, key: &[u8]) -> Vec<u8> {
        match *self {
            Self::Keepalive => [BCKA.as_slice(), &hmac_sha1(key, BCKA)].concat(),
            Self::Stun => [BCST.as_slice(), &hmac_sha1(key, BCST)].concat(),
            Self::SourceQuench { tgid, stream_id } => {
                let mut v = Vec::with_capacity(11 + HMAC_LEN);
                v.extend_from_slice(BCSQ);
                v.extend_from_slice(&id24_bytes(tgid));
                v.extend_from_slice(&stream_id.to_be_bytes());
                let digest = hmac_sha1(key, &v);
                v.extend_from_slice(&digest);
                v
            }
            Self::VersionAnnounce(ver) => {
                let mut v = Vec::with_capacity(5 + HMAC_LEN);
                v.extend_from_slice(BCVE);
                v.push(ver);
                v.extend_from_slice(&hmac_sha1(key, &[ver]));
                v
            }
        }
    }
}

fn check(ok: bool) -> Result<(), ObpError> {
    if ok {
        Ok(())
    } else {
        Err(ObpError::BadDigest)
    }
}

/// Decodes and authenticates a datagram. `configured_version` selects
/// between the two `DMRF` digest regions.
///
/// # Errors
///
/// Returns [`ObpError::BadDigest`] if the digest does not match, and a
/// layout error for truncated or unknown frames.
pub fn decode(data: &[u8], key: &[u8], configured_version: u8) -> Result<ObpFrame, ObpError> {
    need(data, 4)?;
    let cmd: [u8; 4] = try_into_array(&data[..4])?;
    match &cmd {
        DMRD => {
            need(data, DMRD_LEN + HMAC_LEN)?;
            check(verify_hmac_sha1(key, &data[..DMRD_LEN], &data[DMRD_LEN..]))?;
            let mut dmrd = Dmrd::parse(&data[..DMRD_LEN])?;
            dmrd.ber = 0;
            dmrd.rssi = 0;
            Ok(ObpFrame::Data(Box::new(ObpData {
                dmrd,
                version: 1,
                timestamp_ns: None,
                hops: 0,
                source_server: 0,
                source_repeater: 0,
            })))
        }
        DMRF => {
            need(data, 62 + HMAC_LEN)?;
            let region = if configured_version == 2 {
                &data[..61]
            } else {
                &data[..DMRD_LEN]
            };
            check(verify_hmac_sha1(key, region, &data[62..]))?;
            Ok(ObpFrame::Data(Box::new(ObpData {
                dmrd: Dmrd::parse(&data[..DMRD_LEN])?,
                version: if configured_version == 2 { 2 } else { 3 },
                timestamp_ns: Some(be64(&data[53..61])?),
                hops: data[61],
                source_server: 0,
                source_repeater: 0,
            })))
        }
        DMRE => {
            need(data, 56)?;
            let version = data[55];
            let (hops_at, repeater) = if version > 4 {
                need(data, 73 + BLAKE_LEN)?;
                (72, be32(&data[68..72])?)
            } else {
                need(data, 69 + BLAKE_LEN)?;
                (68, 0)
            };
            let signed = hops_at + 1;
            check(verify_blake2b(key, &data[..signed], &data[signed..]))?;
            let mut dmrd = Dmrd::parse(&data[..DMRD_LEN])?;
            dmrd.ber = data[53];
            dmrd.rssi = data[54];
            Ok(ObpFrame::Data(Box::new(ObpData {
                dmrd,
                version,
                timestamp_ns: Some(be64(&data[56..64])?),
                hops: data[hops_at],
                source_server: be32(&data[64..68])?,
                source_repeater: repeater,
            })))
        }
        EOBP => Err(ObpError::Unsupported(cmd)),
        BCKA => {
            check(verify_hmac_sha1(key, BCKA, &data[4..]))?;
            Ok(ObpFrame::Control(ObpControl::Keepalive))
        }
        BCST => {
            check(verify_hmac_sha1(key, BCST, &data[4..]))?;
            Ok(ObpFrame::Control(ObpControl::Stun))
        }
        BCSQ => {
            need(data, 11)?;
            check(verify_hmac_sha1(key, &data[..11], &data[11..]))?;
            Ok(ObpFrame::Control(ObpControl::SourceQuench {
                tgid: id24(&data[4..7]),
                stream_id: be32(&data[7..11])?,
            }))
        }
        BCVE => {
            need(data, 5)?;
            check(verify_hmac_sha1(key, &data[4..5], &data[5..]))?;
            Ok(ObpFrame::Control(ObpControl::VersionAnnounce(data[4])))
        }
        _ => Err(ObpError::UnknownCommand(cmd)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::obp_key;
    use crate::frame::FrameBits;
    use crate::types::Slot;

    fn burst() -> Dmrd {
        Dmrd {
            seq: 3,
            rf_src: 3_120_101,
            dst: 235,
            peer: 999,
            bits: FrameBits::voice_header(Slot::One),
            stream_id: 0x0102_0304,
            payload: [0xA5; 33],
            ber: 2,
            rssi: 60,
        }
    }

    fn env() -> ObpEnvelope {
        ObpEnvelope {
            server_id: 2341,
            timestamp_ns: 1_700_000_000_000_000_000,
            hops: 2,
            source_server: 23_411,
            source_repeater: 234_100_101,
        }
    }

    fn data(frame: ObpFrame) -> ObpData {
        match frame {
            ObpFrame::Data(d) => *d,
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[test]
    fn version_layouts_have_expected_lengths() {
        let key = obp_key(b"pass");
        let lens: Vec<usize> = (1..=5)
            .map(|v| encode_data(&burst(), v, &key, &env()).len())
            .collect();
        assert_eq!(lens, vec![73, 82, 82, 85, 89]);
    }

    #[test]
    fn v1_carries_server_id_and_no_extras() {
        let key = obp_key(b"pass");
        let wire = encode_data(&burst(), 1, &key, &env());
        assert_eq!(&wire[..4], b"DMRD");
        let got = data(decode(&wire, &key, 1).unwrap());
        assert_eq!(got.version, 1);
        assert_eq!(got.dmrd.peer, 2341);
        assert_eq!(got.hops, 0);
        assert_eq!(got.timestamp_ns, None);
    }

    #[test]
    fn v2_and_v3_sign_different_regions() {
        let key = obp_key(b"pass");
        let v2 = encode_data(&burst(), 2, &key, &env());
        let v3 = encode_data(&burst(), 3, &key, &env());
        assert_eq!(v2[..62], v3[..62]);
        assert_ne!(v2[62..], v3[62..]);
        assert_eq!(data(decode(&v2, &key, 2).unwrap()).version, 2);
        assert_eq!(data(decode(&v3, &key, 3).unwrap()).version, 3);
        assert_eq!(decode(&v2, &key, 3), Err(ObpError::BadDigest));
    }

    #[test]
    fn v4_omits_source_repeater() {
        let key = obp_key(b"pass");
        let wire = encode_data(&burst(), 4, &key, &env());
        assert_eq!(wire[55], 4);
        let got = data(decode(&wire, &key, 4).unwrap());
        assert_eq!(got.source_server, 23_411);
        assert_eq!(got.source_repeater, 0);
        assert_eq!(got.hops, 2);
        assert_eq!(got.dmrd.ber, 2);
        assert_eq!(got.dmrd.rssi, 60);
    }

    #[test]
    fn v5_carries_source_repeater_and_timestamp() {
        let key = obp_key(b"pass");
        let got = data(decode(&encode_data(&burst(), 5, &key, &env()), &key, 5).unwrap());
        assert_eq!(got.version, 5);
        assert_eq!(got.source_repeater, 234_100_101);
        assert_eq!(got.timestamp_ns, Some(1_700_000_000_000_000_000));
        assert_eq!(got.dmrd.payload, [0xA5; 33]);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let wire = encode_data(&burst(), 5, &obp_key(b"pass"), &env());
        assert_eq!(decode(&wire, &obp_key(b"other"), 5), Err(ObpError::BadDigest));
    }

    #[test]
    fn control_frames_authenticate() {
        let key = obp_key(b"pass");
        for ctl in [
            ObpControl::Keepalive,
            ObpControl::Stun,
            ObpControl::SourceQuench {
                tgid: 235,
                stream_id: 42,
            },
            ObpControl::VersionAnnounce(5),
        ] {
            let wire = ctl.encode(&key);
            assert_eq!(decode(&wire, &key, 5).unwrap(), ObpFrame::Control(ctl));
            assert_eq!(
                decode(&wire, &obp_key(b"nope"), 5),
                Err(ObpError::BadDigest)
            );
        }
    }

    #[test]
    fn version_announce_signs_only_the_version_byte() {
        let key = obp_key(b"pass");
        let wire = ObpControl::VersionAnnounce(4).encode(&key);
        assert_eq!(&wire[5..], &hmac_sha1(&key, &[4]));
    }

    #[test]
    fn eobp_is_unsupported() {
        assert_eq!(
            decode(b"EOBP\x00\x00", &[], 5),
            Err(ObpError::Unsupported(*b"EOBP"))
        );
    }
}
