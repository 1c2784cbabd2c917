//! Per-call state: HBP timeslots, OpenBridge sessions, duplicate
//! suppression, cross-system loop arbitration and target contention.
//!
//! Everything here is mutated only from the core task, so lookups across
//! systems always see a consistent view.

use crate::endpoint::SystemId;
use dmr_common::crypto;
use dmr_common::frame::{Dmrd, DMRD};
use dmr_common::lc::{apply_embedded_lc, apply_full_lc, EmbeddedLcBits, FullLcBits, Lc, LcCodec};
use dmr_common::types::{DmrId, Slot, StreamId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

/// Silence after which a call is considered lost.
pub const STREAM_IDLE: Duration = Duration::from_secs(5);
/// An HBP slot forgets its last stream id after this long.
pub const STREAM_FORGET: Duration = Duration::from_secs(60);
/// Calls longer than this are ignored; OpenBridge sessions are evicted after
/// this much silence.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(180);

const RATE_MIN_PACKETS: u32 = 18;
const RATE_MAX_PPS: f64 = 25.0;

/// Whether a stream has sent more than 25 frames per second once past its
/// first 18 frames.
#[must_use]
pub fn rate_exceeded(packets: u32, start: Instant, now: Instant) -> bool {
    if packets <= RATE_MIN_PACKETS {
        return false;
    }
    let secs = now.saturating_duration_since(start).as_secs_f64();
    secs <= 0.0 || f64::from(packets) / secs > RATE_MAX_PPS
}

/// Loss as a percentage of packets.
#[must_use]
pub fn loss_percent(loss: u32, packets: u32) -> f64 {
    if packets == 0 {
        0.0
    } else {
        f64::from(loss) / f64::from(packets) * 100.0
    }
}

/// Header, terminator and embedded LC bits for one outgoing stream.
#[derive(Debug, Clone)]
pub struct LcSet {
    /// The LC these bits encode.
    pub lc: Lc,
    header: FullLcBits,
    terminator: FullLcBits,
    embedded: EmbeddedLcBits,
}

impl LcSet {
    /// Encodes `lc` once for the whole stream.
    #[must_use]
    pub fn new(codec: &dyn LcCodec, lc: Lc) -> Self {
        Self {
            lc,
            header: codec.encode_header_lc(&lc),
            terminator: codec.encode_terminator_lc(&lc),
            embedded: codec.encode_embedded_lc(&lc),
        }
    }

    /// Replaces the LC carried by a header, terminator or burst B-E.
    pub fn rewrite(&self, dmrd: &mut Dmrd) {
        if dmrd.bits.is_voice_header() {
            apply_full_lc(&mut dmrd.payload, &self.header);
        } else if dmrd.bits.is_voice_terminator() {
            apply_full_lc(&mut dmrd.payload, &self.terminator);
        } else if let Some(n) = dmrd.bits.embedded_lc_index() {
            apply_embedded_lc(&mut dmrd.payload, &self.embedded[n - 1]);
        }
    }
}

/// Why a frame was discarded as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplicate {
    /// Byte-identical to the previous frame.
    Repeat,
    /// Same sequence number as the previous frame.
    SameSeq,
    /// Sequence number went backwards.
    OutOfOrder,
    /// Whole frame already seen earlier in the stream.
    SeenPayload,
}

impl Duplicate {
    /// Metrics label.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Repeat => "dup_frame",
            Self::SameSeq => "dup_seq",
            Self::OutOfOrder => "out_of_order",
            Self::SeenPayload => "dup_payload",
        }
    }
}

impl fmt::Display for Duplicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Repeat => "complete duplicate of the previous packet",
            Self::SameSeq => "duplicate sequence number",
            Self::OutOfOrder => "out of order packet",
            Self::SeenPayload => "packet seen before in this stream",
        })
    }
}

/// Sequence and payload history of one stream.
#[derive(Debug, Clone, Default)]
pub struct Dedup {
    last_seq: Option<u8>,
    last_frame: Option<Dmrd>,
    digests: HashSet<[u8; 16]>,
}

impl Dedup {
    /// Checks `dmrd` against the history and records it when accepted.
    ///
    /// Returns the number of frames skipped over, which is logged but not
    /// a reason to drop.
    ///
    /// # Errors
    ///
    /// Returns the [`Duplicate`] kind if the frame must be discarded.
    pub fn check(&mut self, dmrd: &Dmrd) -> Result<Option<u8>, Duplicate> {
        let seq = dmrd.seq;
        let last = self.last_seq.filter(|&s| s != 0);
        if seq > 1 && self.last_frame.as_ref() == Some(dmrd) {
            return Err(Duplicate::Repeat);
        }
        if seq != 0 && self.last_seq == Some(seq) {
            return Err(Duplicate::SameSeq);
        }
        if let Some(last) = last {
            if seq != 0 && seq != 1 && seq < last {
                return Err(Duplicate::OutOfOrder);
            }
        }
        let digest = crypto::payload_digest(&dmrd.encode_core(DMRD));
        if seq > 0 && self.digests.contains(&digest) {
            return Err(Duplicate::SeenPayload);
        }
        let gap = match last {
            Some(last) if seq != 0 && seq > last.saturating_add(1) => Some(seq - last - 1),
            _ => None,
        };
        self.last_seq = Some(seq);
        self.last_frame = Some(dmrd.clone());
        self.digests.insert(digest);
        Ok(gap)
    }

    /// Forgets the sequence position after a terminator.
    pub fn end_of_call(&mut self) {
        self.last_seq = None;
        self.last_frame = None;
    }
}

/// Why a routed frame may not be sent to an HBP slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contention {
    /// The slot received another talkgroup within hang time.
    RxHangtime(DmrId),
    /// The slot transmitted another talkgroup within hang time.
    TxHangtime(DmrId),
    /// The slot is receiving this talkgroup right now.
    RxActive(DmrId),
    /// The slot is transmitting this talkgroup for another subscriber.
    TxActive {
        /// Talkgroup in progress.
        tgid: DmrId,
        /// Subscriber being relayed.
        rf_src: DmrId,
    },
}

impl fmt::Display for Contention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RxHangtime(tg) => write!(f, "target active or in group hangtime, TGID {tg}"),
            Self::TxHangtime(tg) => write!(f, "target in group hangtime, TGID {tg}"),
            Self::RxActive(tg) => write!(f, "matching call already active on target, TGID {tg}"),
            Self::TxActive { tgid, rf_src } => {
                write!(f, "call route in progress on target, TGID {tgid}, SUB {rf_src}")
            }
        }
    }
}

fn within(t: Option<Instant>, window: Duration, now: Instant) -> bool {
    t.is_some_and(|t| now.saturating_duration_since(t) < window)
}

/// Receive and transmit state of one HBP timeslot.
#[derive(Debug, Clone)]
pub struct SlotState {
    /// First frame of the current receive stream.
    pub rx_start: Instant,
    /// Last received frame.
    pub rx_time: Option<Instant>,
    /// Whether the last received frame was a terminator.
    pub rx_ended: bool,
    /// Stream being received, remembered for a minute after it ends.
    pub rx_stream: Option<StreamId>,
    /// Subscriber of the receive stream.
    pub rx_rfs: DmrId,
    /// Destination of the receive stream.
    pub rx_tgid: DmrId,
    /// Repeater of the receive stream.
    pub rx_peer: DmrId,
    /// LC of the receive stream.
    pub rx_lc: Lc,
    /// Stream heard here but dropped as a loop or over a limit.
    pub held_stream: Option<StreamId>,
    /// Last frame of the held stream.
    pub held_time: Option<Instant>,
    /// First frame of the current transmit stream.
    pub tx_start: Instant,
    /// Last transmitted frame.
    pub tx_time: Option<Instant>,
    /// Whether the last transmitted frame was a terminator.
    pub tx_ended: bool,
    /// Stream being transmitted.
    pub tx_stream: Option<StreamId>,
    /// Subscriber of the transmit stream.
    pub tx_rfs: DmrId,
    /// Destination of the transmit stream.
    pub tx_tgid: DmrId,
    /// Repeater the transmit stream came from.
    pub tx_peer: DmrId,
    /// LC bits written into the transmit stream.
    pub tx_lc: Option<LcSet>,
    /// Frames received in the current stream.
    pub packets: u32,
    /// Frames dropped as duplicates in the current stream.
    pub loss: u32,
    /// Duplicate history of the current stream.
    pub dedup: Dedup,
    /// A loop or timeout has been logged for the current stream.
    pub loop_logged: bool,
    /// A source quench has been sent for the current stream.
    pub quench_sent: bool,
    /// A contention refusal has been logged for the current stream.
    pub contention_logged: bool,
    /// The next unit-call prompt is suppressed.
    pub stop_announce: bool,
}

impl SlotState {
    /// An idle slot.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            rx_start: now,
            rx_time: None,
            rx_ended: true,
            rx_stream: None,
            rx_rfs: 0,
            rx_tgid: 0,
            rx_peer: 0,
            rx_lc: Lc::group(0, 0),
            held_stream: None,
            held_time: None,
            tx_start: now,
            tx_time: None,
            tx_ended: true,
            tx_stream: None,
            tx_rfs: 0,
            tx_tgid: 0,
            tx_peer: 0,
            tx_lc: None,
            packets: 0,
            loss: 0,
            dedup: Dedup::default(),
            loop_logged: false,
            quench_sent: false,
            contention_logged: false,
            stop_announce: false,
        }
    }

    /// Clears the per-stream counters when a new stream starts.
    pub fn begin_rx(&mut self, now: Instant) {
        self.rx_start = now;
        self.packets = 0;
        self.loss = 0;
        self.dedup = Dedup::default();
        self.loop_logged = false;
        self.quench_sent = false;
        self.contention_logged = false;
        self.held_stream = None;
    }

    /// Whether `stream` is the one this slot is receiving or holding.
    #[must_use]
    pub fn hears(&self, stream: StreamId) -> bool {
        self.rx_stream == Some(stream) || self.held_stream == Some(stream)
    }

    /// Remembers a dropped frame of `stream` so later frames of it are not
    /// taken for a new call. Only refreshes the receive stream if it is the
    /// same one.
    pub fn hold(&mut self, stream: StreamId, now: Instant) {
        self.held_stream = Some(stream);
        self.held_time = Some(now);
        if self.rx_stream == Some(stream) {
            self.rx_time = Some(now);
        }
    }

    /// Records a received frame.
    pub fn record_rx(&mut self, dmrd: &Dmrd, now: Instant) {
        self.held_stream = None;
        self.rx_time = Some(now);
        self.rx_ended = dmrd.bits.is_voice_terminator();
        self.rx_stream = Some(dmrd.stream_id);
        self.rx_rfs = dmrd.rf_src;
        self.rx_tgid = dmrd.dst;
        self.rx_peer = dmrd.peer;
    }

    /// Whether another subscriber holds the slot: a receive stream that
    /// has not ended and was heard within `stream_timeout`.
    #[must_use]
    pub fn busy_for(&self, rf_src: DmrId, now: Instant, stream_timeout: Duration) -> bool {
        !self.rx_ended && within(self.rx_time, stream_timeout, now) && rf_src != self.rx_rfs
    }

    /// Whether the slot carries nothing and has been quiet for `hangtime`.
    #[must_use]
    pub fn idle(&self, now: Instant, hangtime: Duration) -> bool {
        self.rx_ended && self.tx_ended && !within(self.tx_time, hangtime, now)
    }

    /// Applies the four contention rules for sending `tgid`/`rf_src` here.
    #[must_use]
    pub fn contention(
        &self,
        tgid: DmrId,
        rf_src: DmrId,
        now: Instant,
        hangtime: Duration,
        stream_timeout: Duration,
    ) -> Option<Contention> {
        if tgid != self.rx_tgid && within(self.rx_time, hangtime, now) {
            return Some(Contention::RxHangtime(self.rx_tgid));
        }
        if tgid != self.tx_tgid && within(self.tx_time, hangtime, now) {
            return Some(Contention::TxHangtime(self.tx_tgid));
        }
        if tgid == self.rx_tgid && within(self.rx_time, stream_timeout, now) {
            return Some(Contention::RxActive(self.rx_tgid));
        }
        if tgid == self.tx_tgid && rf_src != self.tx_rfs && within(self.tx_time, stream_timeout, now) {
            return Some(Contention::TxActive {
                tgid: self.tx_tgid,
                rf_src: self.tx_rfs,
            });
        }
        None
    }

    /// Starts a transmit stream if `stream` is not already the current
    /// one. Returns true when a new stream began.
    pub fn begin_tx(
        &mut self,
        stream: StreamId,
        tgid: DmrId,
        rf_src: DmrId,
        peer: DmrId,
        lc: impl FnOnce() -> LcSet,
        now: Instant,
    ) -> bool {
        if self.tx_stream == Some(stream) {
            return false;
        }
        self.tx_start = now;
        self.tx_stream = Some(stream);
        self.tx_tgid = tgid;
        self.tx_rfs = rf_src;
        self.tx_peer = peer;
        self.tx_lc = Some(lc());
        true
    }

    /// Records a transmitted frame.
    pub fn record_tx(&mut self, dmrd: &Dmrd, now: Instant) {
        self.tx_time = Some(now);
        self.tx_ended = dmrd.bits.is_voice_terminator();
    }
}

/// One call received over OpenBridge.
#[derive(Debug, Clone)]
pub struct StreamSession {
    /// First frame.
    pub start: Instant,
    /// Last frame, including ignored ones.
    pub last: Instant,
    /// Arbitration key; the earliest session for a stream wins.
    pub first_seen: Instant,
    /// Subscriber.
    pub rf_src: DmrId,
    /// Destination.
    pub tgid: DmrId,
    /// Sending network's repeater field.
    pub peer: DmrId,
    /// LC from the header or synthesised from the ids.
    pub lc: Lc,
    /// Frames received.
    pub packets: u32,
    /// Frames dropped as duplicates.
    pub loss: u32,
    /// Duplicate history.
    pub dedup: Dedup,
    /// A terminator was seen.
    pub finished: bool,
    /// Frames after the terminator have been logged.
    pub finish_logged: bool,
    /// Marked lost by the trimmer.
    pub timed_out: bool,
    /// A loop or timeout has been logged.
    pub loop_logged: bool,
    /// A source quench has been sent.
    pub quench_sent: bool,
    /// A contention refusal has been logged.
    pub contention_logged: bool,
}

impl StreamSession {
    /// A session opened by its first frame.
    #[must_use]
    pub fn new(dmrd: &Dmrd, lc: Lc, now: Instant) -> Self {
        Self {
            start: now,
            last: now,
            first_seen: now,
            rf_src: dmrd.rf_src,
            tgid: dmrd.dst,
            peer: dmrd.peer,
            lc,
            packets: 0,
            loss: 0,
            dedup: Dedup::default(),
            finished: false,
            finish_logged: false,
            timed_out: false,
            loop_logged: false,
            quench_sent: false,
            contention_logged: false,
        }
    }
}

/// One call being relayed to an OpenBridge link.
#[derive(Debug, Clone)]
pub struct TxSession {
    /// First frame sent.
    pub start: Instant,
    /// Last frame sent.
    pub last: Instant,
    /// Destination on the link.
    pub tgid: DmrId,
    /// LC bits written into the stream.
    pub lcs: LcSet,
}

/// Something the trimmer timed out, for the router to log and report.
#[derive(Debug, Clone, PartialEq)]
pub enum Expired {
    /// An HBP receive stream stopped without a terminator.
    Rx {
        /// System.
        system: SystemId,
        /// Timeslot.
        slot: Slot,
        /// Stream.
        stream: StreamId,
        /// Subscriber.
        rf_src: DmrId,
        /// Destination.
        tgid: DmrId,
        /// Repeater.
        peer: DmrId,
        /// Seconds from first to last frame.
        duration: f64,
        /// Loss percentage.
        loss: f64,
    },
    /// An HBP transmit stream stopped without a terminator.
    Tx {
        /// System.
        system: SystemId,
        /// Timeslot.
        slot: Slot,
        /// Stream.
        stream: StreamId,
        /// Subscriber.
        rf_src: DmrId,
        /// Destination.
        tgid: DmrId,
        /// Repeater.
        peer: DmrId,
        /// Seconds from first to last frame.
        duration: f64,
    },
    /// An OpenBridge session went quiet.
    Lost {
        /// System.
        system: SystemId,
        /// Stream.
        stream: StreamId,
        /// Subscriber.
        rf_src: DmrId,
        /// Destination.
        tgid: DmrId,
        /// Sender's repeater field.
        peer: DmrId,
        /// Seconds from first to last frame.
        duration: f64,
        /// Loss percentage.
        loss: f64,
        /// The session was being suppressed with a quench.
        quenched: bool,
    },
    /// An OpenBridge session was evicted.
    Removed {
        /// System.
        system: SystemId,
        /// Stream.
        stream: StreamId,
    },
}

/// All call state, keyed by system.
#[derive(Debug, Default)]
pub struct StreamTracker {
    slots: HashMap<SystemId, [SlotState; 2]>,
    rx: HashMap<SystemId, HashMap<StreamId, StreamSession>>,
    tx: HashMap<SystemId, HashMap<StreamId, TxSession>>,
}

impl StreamTracker {
    /// An empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an HBP system's two timeslots.
    pub fn add_hbp(&mut self, system: SystemId, now: Instant) {
        self.slots
            .insert(system, [SlotState::new(now), SlotState::new(now)]);
    }

    /// Registers an OpenBridge system.
    pub fn add_obp(&mut self, system: SystemId) {
        self.rx.entry(system).or_default();
        self.tx.entry(system).or_default();
    }

    /// A timeslot of an HBP system.
    #[must_use]
    pub fn slot(&self, system: SystemId, slot: Slot) -> Option<&SlotState> {
        self.slots.get(&system).map(|s| &s[slot.index()])
    }

    /// Mutable timeslot of an HBP system.
    pub fn slot_mut(&mut self, system: SystemId, slot: Slot) -> Option<&mut SlotState> {
        self.slots.get_mut(&system).map(|s| &mut s[slot.index()])
    }

    /// A session received on an OpenBridge system.
    #[must_use]
    pub fn session(&self, system: SystemId, stream: StreamId) -> Option<&StreamSession> {
        self.rx.get(&system)?.get(&stream)
    }

    /// Mutable received session.
    pub fn session_mut(&mut self, system: SystemId, stream: StreamId) -> Option<&mut StreamSession> {
        self.rx.get_mut(&system)?.get_mut(&stream)
    }

    /// Stores a newly opened received session.
    pub fn open_session(&mut self, system: SystemId, stream: StreamId, session: StreamSession) {
        self.rx.entry(system).or_default().insert(stream, session);
    }

    /// A session being sent to an OpenBridge system.
    pub fn tx_session_mut(&mut self, system: SystemId, stream: StreamId) -> Option<&mut TxSession> {
        self.tx.get_mut(&system)?.get_mut(&stream)
    }

    /// Stores a newly opened transmit session.
    pub fn open_tx_session(&mut self, system: SystemId, stream: StreamId, session: TxSession) {
        self.tx.entry(system).or_default().insert(stream, session);
    }

    /// An HBP slot other than those of `except` currently receiving `stream`.
    #[must_use]
    pub fn hbp_receiving(&self, except: SystemId, stream: StreamId) -> Option<(SystemId, Slot)> {
        self.slots
            .iter()
            .filter(|(id, _)| **id != except)
            .find_map(|(id, slots)| {
                Slot::ALL
                    .into_iter()
                    .find(|s| slots[s.index()].rx_stream == Some(stream))
                    .map(|s| (*id, s))
            })
    }

    /// An OpenBridge system other than `except` that received `stream`
    /// for `tgid`.
    #[must_use]
    pub fn obp_holding(&self, except: SystemId, stream: StreamId, tgid: DmrId) -> Option<SystemId> {
        let mut holders: Vec<SystemId> = self
            .rx
            .iter()
            .filter(|(id, sessions)| {
                **id != except && sessions.get(&stream).is_some_and(|s| s.tgid == tgid)
            })
            .map(|(id, _)| *id)
            .collect();
        holders.sort();
        holders.into_iter().next()
    }

    /// The OpenBridge system that saw `stream` for `tgid` first. Ties on
    /// the instant go to the lexicographically smallest system name.
    #[must_use]
    pub fn first_seen<'a>(
        &self,
        stream: StreamId,
        tgid: DmrId,
        name: impl Fn(SystemId) -> &'a str,
    ) -> Option<SystemId> {
        self.rx
            .iter()
            .filter_map(|(id, sessions)| {
                sessions
                    .get(&stream)
                    .filter(|s| s.tgid == tgid)
                    .map(|s| (s.first_seen, name(*id), *id))
            })
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
            .map(|(_, _, id)| id)
    }

    /// Calls in progress across every system.
    #[must_use]
    pub fn active(&self) -> usize {
        let slots = self
            .slots
            .values()
            .flat_map(|s| s.iter())
            .filter(|s| !s.rx_ended || !s.tx_ended)
            .count();
        let sessions = self
            .rx
            .values()
            .flat_map(HashMap::values)
            .filter(|s| !s.finished && !s.timed_out)
            .count();
        slots + sessions
    }

    /// Times out quiet streams and evicts stale sessions.
    pub fn trim(&mut self, now: Instant) -> Vec<Expired> {
        let mut out = Vec::new();
        let old = |t: Option<Instant>, d: Duration| t.map_or(true, |t| now.saturating_duration_since(t) > d);

        for (system, slots) in &mut self.slots {
            for slot in Slot::ALL {
                let s = &mut slots[slot.index()];
                if !s.rx_ended && old(s.rx_time, STREAM_IDLE) {
                    s.rx_ended = true;
                    let last = s.rx_time.unwrap_or(now);
                    out.push(Expired::Rx {
                        system: *system,
                        slot,
                        stream: s.rx_stream.unwrap_or(0),
                        rf_src: s.rx_rfs,
                        tgid: s.rx_tgid,
                        peer: s.rx_peer,
                        duration: last.saturating_duration_since(s.rx_start).as_secs_f64(),
                        loss: loss_percent(s.loss, s.packets),
                    });
                }
                if s.rx_stream.is_some() && old(s.rx_time, STREAM_FORGET) {
                    s.rx_stream = None;
                }
                if s.held_stream.is_some() && old(s.held_time, STREAM_FORGET) {
                    s.held_stream = None;
                }
                if !s.tx_ended && old(s.tx_time, STREAM_IDLE) {
                    s.tx_ended = true;
                    let last = s.tx_time.unwrap_or(now);
                    out.push(Expired::Tx {
                        system: *system,
                        slot,
                        stream: s.tx_stream.unwrap_or(0),
                        rf_src: s.tx_rfs,
                        tgid: s.tx_tgid,
                        peer: s.tx_peer,
                        duration: last.saturating_duration_since(s.tx_start).as_secs_f64(),
                    });
                }
            }
        }

        for (system, sessions) in &mut self.rx {
            sessions.retain(|stream, s| {
                let silent = now.saturating_duration_since(s.last);
                if silent > SESSION_MAX_AGE {
                    out.push(Expired::Removed {
                        system: *system,
                        stream: *stream,
                    });
                    return false;
                }
                if !s.finished && !s.timed_out && silent > STREAM_IDLE {
                    s.timed_out = true;
                    out.push(Expired::Lost {
                        system: *system,
                        stream: *stream,
                        rf_src: s.rf_src,
                        tgid: s.tgid,
                        peer: s.peer,
                        duration: s.last.saturating_duration_since(s.start).as_secs_f64(),
                        loss: loss_percent(s.loss, s.packets),
                        quenched: s.quench_sent,
                    });
                }
                true
            });
        }
        for sessions in self.tx.values_mut() {
            sessions.retain(|_, s| now.saturating_duration_since(s.last) <= SESSION_MAX_AGE);
        }
        out
    }

    /// Drops all state of a system.
    pub fn remove(&mut self, system: SystemId) {
        self.slots.remove(&system);
        self.rx.remove(&system);
        self.tx.remove(&system);
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use dmr_common::frame::FrameBits;
    use dmr_common::frame::PAYLOAD_LEN;
    use dmr_common::types::{CallType, FrameType};
    use proptest::prelude::*;

    fn burst(seq: u8, payload: [u8; 33]) -> Dmrd {
        Dmrd {
            seq,
            rf_src: 3_120_001,
            dst: 91,
            peer: 312_000,
            bits: FrameBits {
                slot: Slot::Two,
                call_type: CallType::Group,
                frame_type: FrameType::Voice,
                dtype_vseq: 1,
            },
            stream_id: 0x77,
            payload,
            ber: 0,
            rssi: 0,
        }
    }

    proptest! {
        #[test]
        fn resent_burst_is_always_a_duplicate(
            seq in 1u8..,
            payload in prop::collection::vec(any::<u8>(), PAYLOAD_LEN),
        ) {
            let mut d = Dedup::default();
            let frame = burst(seq, payload.try_into().unwrap());
            prop_assert!(d.check(&frame).is_ok());
            prop_assert!(d.check(&frame).is_err());
        }

        #[test]
        fn sequence_regression_is_rejected(hi in 3u8.., back in 1u8..250, fill in any::<u8>()) {
            let lo = hi.saturating_sub(back).max(2);
            prop_assume!(lo < hi);
            let mut d = Dedup::default();
            prop_assert!(d.check(&burst(hi, [fill; 33])).is_ok());
            prop_assert_eq!(d.check(&burst(lo, [!fill; 33])), Err(Duplicate::OutOfOrder));
        }

        #[test]
        fn repeated_payload_with_rising_seq_is_accepted(start in 1u8..200, fill in any::<u8>()) {
            let mut d = Dedup::default();
            for seq in start..start + 50 {
                prop_assert!(d.check(&burst(seq, [fill; 33])).is_ok());
            }
        }
    }
}
