//! OpenBridge / FreeBridge link: digest-authenticated server-to-server
//! traffic with no login, plus the enhanced bridge-control channel.

use crate::auth::{self, LogOnce};
use crate::config::SystemConfig;
use crate::endpoint::{Inbound, Link, LinkContext, OutFrame, Outbox};
use crate::metrics::counters;
use dmr_common::crypto;
use dmr_common::openbridge::{self as obp, ObpControl, ObpEnvelope, ObpError, ObpFrame, MAX_VERSION};
use dmr_common::types::{CallType, DmrId, Slot, StreamId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// An enhanced target that has not sent a keepalive for this long is
/// skipped by fan-out.
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenBridge role state.
#[derive(Debug)]
pub struct ObpLink {
    target: Option<SocketAddr>,
    key: Vec<u8>,
    version: u8,
    stunned: bool,
    last_keepalive: Option<Instant>,
    quench: HashMap<DmrId, StreamId>,
    log_once: LogOnce,
}

impl ObpLink {
    /// A link towards `target`, speaking the configured protocol version.
    #[must_use]
    pub fn new(cfg: &SystemConfig, target: Option<SocketAddr>) -> Self {
        Self {
            target,
            key: crypto::obp_key(cfg.passphrase.as_bytes()),
            version: cfg.proto_ver.clamp(1, MAX_VERSION),
            stunned: false,
            last_keepalive: None,
            quench: HashMap::new(),
            log_once: LogOnce::new(),
        }
    }

    /// Protocol version currently spoken.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Remote address, if known.
    #[must_use]
    pub fn target(&self) -> Option<SocketAddr> {
        self.target
    }

    /// Records a fresh resolution of the target host.
    pub fn set_target(&mut self, ctx: &LinkContext<'_>, addr: SocketAddr) {
        if self.target != Some(addr) {
            info!("({}) hostname resolution performed: {}", ctx.name(), addr);
        }
        self.target = Some(addr);
    }

    /// Whether the remote side stunned this link.
    #[must_use]
    pub fn is_stunned(&self) -> bool {
        self.stunned
    }

    /// Whether fan-out may use this link at `now`. Plain links are always
    /// usable; enhanced links need a recent keepalive.
    #[must_use]
    pub fn alive(&self, ctx: &LinkContext<'_>) -> bool {
        if !ctx.config.enhanced_obp {
            return true;
        }
        self.last_keepalive
            .is_some_and(|t| ctx.clock.mono.saturating_duration_since(t) <= KEEPALIVE_TIMEOUT)
    }

    /// Whether the remote side asked us to stop `stream` on `tgid`.
    #[must_use]
    pub fn quenched(&self, tgid: DmrId, stream: StreamId) -> bool {
        self.quench.get(&tgid) == Some(&stream)
    }

    /// Forgets quench entries for a stream that has been trimmed.
    pub fn clear_quench(&mut self, stream: StreamId) {
        self.quench.retain(|_, s| *s != stream);
    }

    /// Number of active quench entries.
    #[must_use]
    pub fn quench_len(&self) -> usize {
        self.quench.len()
    }

    fn control_to_target(&self, ctx: &LinkContext<'_>, out: &mut Outbox, control: ObpControl) {
        match self.target {
            Some(addr) => out.send(ctx.id, addr, control.encode(&self.key)),
            None => trace!("({}) *BridgeControl* target not known, {:?} not sent", ctx.name(), control),
        }
    }

    /// Sends `BCKA` on enhanced links.
    pub fn keepalive(&self, ctx: &LinkContext<'_>, out: &mut Outbox) {
        if ctx.config.enhanced_obp {
            self.control_to_target(ctx, out, ObpControl::Keepalive);
            trace!("({}) *BridgeControl* sent keepalive", ctx.name());
        }
    }

    /// Sends `BCVE` with our highest version on enhanced links.
    pub fn announce_version(&self, ctx: &LinkContext<'_>, out: &mut Outbox) {
        if ctx.config.enhanced_obp {
            self.control_to_target(ctx, out, ObpControl::VersionAnnounce(MAX_VERSION));
            trace!("({}) *BridgeControl* sent BCVE, ver {}", ctx.name(), MAX_VERSION);
        }
    }

    /// Asks the remote side to stop sending `stream` on `tgid`.
    pub fn source_quench(&self, ctx: &LinkContext<'_>, out: &mut Outbox, tgid: DmrId, stream_id: StreamId) {
        self.control_to_target(ctx, out, ObpControl::SourceQuench { tgid, stream_id });
        trace!(
            "({}) *BridgeControl* sent BCSQ, tg {}, stream {}",
            ctx.name(),
            tgid,
            stream_id
        );
    }

    /// Logs once per stream, quenches the sender and counts the drop.
    fn refuse(
        &mut self,
        ctx: &LinkContext<'_>,
        out: &mut Outbox,
        dst: DmrId,
        stream: StreamId,
        reason: &'static str,
        why: &dyn std::fmt::Display,
    ) {
        if self.log_once.first(stream) {
            info!("({}) CALL DROPPED WITH STREAM ID {} ON TGID {}: {}", ctx.name(), stream, dst, why);
            self.source_quench(ctx, out, dst, stream);
        }
        counters::frames_dropped_total(reason);
    }

    fn control(&mut self, ctx: &LinkContext<'_>, control: ObpControl, from: SocketAddr) {
        match control {
            ObpControl::Keepalive => {
                trace!("({}) *BridgeControl* keepalive received", ctx.name());
                self.last_keepalive = Some(ctx.clock.mono);
                if self.target != Some(from) {
                    info!(
                        "({}) *BridgeControl* source for OBP has changed from {:?} to {}, updating",
                        ctx.name(),
                        self.target,
                        from
                    );
                    self.target = Some(from);
                }
            }
            ObpControl::SourceQuench { tgid, stream_id } => {
                trace!(
                    "({}) *BridgeControl* source quench for tg {}, stream {}",
                    ctx.name(),
                    tgid,
                    stream_id
                );
                self.quench.insert(tgid, stream_id);
            }
            ObpControl::Stun => {
                warn!("({}) *BridgeControl* STUN received, link stopped", ctx.name());
                self.stunned = true;
            }
            ObpControl::VersionAnnounce(ver) => {
                if ver > self.version {
                    let ver = ver.min(MAX_VERSION);
                    info!("({}) *ProtoControl* BCVE version upgrade, ver {}", ctx.name(), ver);
                    self.version = ver;
                } else if ver < self.version {
                    warn!("({}) *ProtoControl* BCVE version downgrade not allowed, ver {}", ctx.name(), ver);
                }
            }
        }
    }
}

impl Link for ObpLink {
    #[allow(clippy::too_many_lines)]
    fn receive(
        &mut self,
        ctx: &LinkContext<'_>,
        data: &[u8],
        from: SocketAddr,
        out: &mut Outbox,
    ) -> Option<Inbound> {
        let frame = match obp::decode(data, &self.key, self.version) {
            Ok(ObpFrame::Data(d)) => *d,
            Ok(ObpFrame::Control(control)) => {
                if ctx.config.enhanced_obp {
                    self.control(ctx, control, from);
                }
                return None;
            }
            Err(ObpError::BadDigest) => {
                warn!("({}) OpenBridge HMAC failed, packet discarded from {}", ctx.name(), from);
                counters::frames_dropped_total("bad_digest");
                return None;
            }
            Err(ObpError::Unsupported(cmd)) => {
                warn!(
                    "({}) *ProtoControl* {} protocol not supported",
                    ctx.name(),
                    String::from_utf8_lossy(&cmd)
                );
                counters::frames_dropped_total("unsupported");
                return None;
            }
            Err(e) => {
                debug!("({}) malformed OpenBridge packet from {}: {}", ctx.name(), from, e);
                counters::frames_dropped_total("malformed");
                return None;
            }
        };

        let dmrd = &frame.dmrd;
        let stream = dmrd.stream_id;
        let dst = dmrd.dst;

        if !ctx.config.relax_checks && self.target != Some(from) {
            if self.log_once.first(stream) {
                warn!("({}) OpenBridge packet from unexpected address {}", ctx.name(), from);
            }
            counters::frames_dropped_total("bad_source");
            return None;
        }
        if dmrd.peer != ctx.config.network_id {
            if self.log_once.first(stream) {
                error!(
                    "({}) OpenBridge packet discarded because NETWORK_ID {} does not match sent peer id {}",
                    ctx.name(),
                    ctx.config.network_id,
                    dmrd.peer
                );
            }
            counters::frames_dropped_total("network_id");
            return None;
        }
        if self.stunned {
            if self.log_once.first(stream) {
                warn!("({}) bridge STUNned, discarding", ctx.name());
            }
            counters::frames_dropped_total("stunned");
            return None;
        }
        if frame.version == 1 {
            if self.version > 1 {
                if self.log_once.first(stream) {
                    warn!(
                        "({}) *ProtoControl* version 1 protocol prohibited by PROTO_VER, ver {}",
                        ctx.name(),
                        self.version
                    );
                }
                self.control_to_target(ctx, out, ObpControl::VersionAnnounce(self.version));
                counters::frames_dropped_total("version");
                return None;
            }
            if dmrd.bits.slot != Slot::One {
                error!(
                    "({}) OpenBridge packet discarded because it was not received on slot 1, sid {}, tg {}",
                    ctx.name(),
                    dmrd.rf_src,
                    dst
                );
                counters::frames_dropped_total("slot");
                return None;
            }
        }
        if frame.version >= 4 && frame.version != self.version {
            debug!("({}) link version now {}", ctx.name(), frame.version);
            self.version = frame.version;
        }

        let (source_server, source_repeater) = if frame.version >= 4 {
            (frame.source_server, frame.source_repeater)
        } else {
            (ctx.global.server_id, 0)
        };
        if frame.version >= 4 {
            if let Some(ts) = frame.timestamp_ns {
                if auth::too_old(ts, ctx.clock.unix_ns) {
                    let why = format!("packet from server {source_server} more than 5s old");
                    self.refuse(ctx, out, dst, stream, "too_old", &why);
                    return None;
                }
            }
            if let Err(fault) =
                auth::check_source_server(source_server, ctx.global.validate_server_ids, ctx.directory)
            {
                let why = format!("{fault}: {source_server}");
                self.refuse(ctx, out, dst, stream, "source_server", &why);
                return None;
            }
        }
        let hops = if frame.version >= 2 {
            let Some(next) = auth::next_hop(frame.hops) else {
                warn!(
                    "({}) MAX HOPS exceeded, dropping. hops {}, dst {}, src {}",
                    ctx.name(),
                    frame.hops,
                    dst,
                    source_server
                );
                self.source_quench(ctx, out, dst, stream);
                counters::frames_dropped_total("max_hops");
                return None;
            };
            Some(next)
        } else {
            None
        };
        if dmrd.bits.call_type != CallType::Unit && auth::reserved_talkgroup(dst, frame.version) {
            self.refuse(ctx, out, dst, stream, "reserved_tg", &"GLOBAL TG FILTER");
            return None;
        }
        if let Err(denial) = auth::check_obp(ctx.global_acls, ctx.acls, dmrd.rf_src, dst) {
            self.refuse(ctx, out, dst, stream, denial.reason(), &denial);
            return None;
        }

        self.last_keepalive = Some(ctx.clock.mono);
        Some(Inbound {
            dmrd: frame.dmrd,
            hops,
            source_server,
            source_repeater,
        })
    }

    fn send(&mut self, ctx: &LinkContext<'_>, frame: &OutFrame<'_>, out: &mut Outbox) -> bool {
        if self.stunned {
            return false;
        }
        let Some(addr) = self.target else {
            debug!("({}) not sent, target not currently known", ctx.name());
            return false;
        };
        let env = ObpEnvelope {
            server_id: ctx.global.server_id,
            timestamp_ns: ctx.clock.unix_ns,
            hops: frame.hops.unwrap_or(1),
            source_server: frame.source_server,
            source_repeater: frame.source_repeater,
        };
        out.send(ctx.id, addr, obp::encode_data(frame.dmrd, self.version, &self.key, &env));
        counters::frames_forwarded_total("obp");
        true
    }

    fn maintain(&mut self, ctx: &LinkContext<'_>, _out: &mut Outbox) {
        if ctx.config.enhanced_obp && self.last_keepalive.is_some() && !self.alive(ctx) {
            debug!("({}) *BridgeControl* no keepalive for {:?}", ctx.name(), KEEPALIVE_TIMEOUT);
        }
    }

    fn deregister(&mut self, ctx: &LinkContext<'_>, _out: &mut Outbox) {
        info!("({}) is mode OPENBRIDGE, no de-registration required", ctx.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Acls;
    use crate::clock::Clock;
    use crate::config::Mode;
    use crate::directory::Directory;
    use crate::endpoint::testing::context;
    use dmr_common::frame::{Dmrd, FrameBits};
    use dmr_common::openbridge::{BCSQ, BCVE};

    const NET: DmrId = 2341;

    fn remote() -> SocketAddr {
        "127.0.0.1:62044".parse().unwrap()
    }

    fn config(version: u8) -> SystemConfig {
        let mut cfg = SystemConfig::new("OBP-1", Mode::OpenBridge);
        cfg.passphrase = "linkpass".to_string();
        cfg.network_id = NET;
        cfg.proto_ver = version;
        cfg.enhanced_obp = true;
        cfg
    }

    fn burst(dst: DmrId) -> Dmrd {
        Dmrd {
            seq: 3,
            rf_src: 3_120_101,
            dst,
            peer: 0,
            bits: FrameBits::voice_header(Slot::One),
            stream_id: 0xCAFE_0001,
            payload: [7; 33],
            ber: 0,
            rssi: 0,
        }
    }

    struct Harness {
        cfg: SystemConfig,
        acls: Acls,
        dir: Directory,
        clock: Clock,
        link: ObpLink,
    }

    impl Harness {
        fn new(cfg: SystemConfig) -> Self {
            Self {
                acls: Acls::system(&cfg).unwrap(),
                link: ObpLink::new(&cfg, Some(remote())),
                cfg,
                dir: Directory::default(),
                clock: Clock::system(),
            }
        }

        fn key(&self) -> Vec<u8> {
            crypto::obp_key(self.cfg.passphrase.as_bytes())
        }

        fn wire(&self, dmrd: &Dmrd, version: u8, ts_ns: u64, hops: u8) -> Vec<u8> {
            let env = ObpEnvelope {
                server_id: NET,
                timestamp_ns: ts_ns,
                hops,
                source_server: NET,
                source_repeater: 312_010_101,
            };
            obp::encode_data(dmrd, version, &self.key(), &env)
        }

        fn recv_from(&mut self, bytes: &[u8], from: SocketAddr) -> (Option<Inbound>, Outbox) {
            let ctx = context(&self.cfg, &self.acls, &self.dir, self.clock);
            let mut out = Outbox::new();
            let got = self.link.receive(&ctx, bytes, from, &mut out);
            (got, out)
        }

        fn recv(&mut self, bytes: &[u8]) -> (Option<Inbound>, Outbox) {
            self.recv_from(bytes, remote())
        }
    }

    #[test]
    fn fresh_v5_frame_is_accepted() {
        let mut h = Harness::new(config(5));
        let wire = h.wire(&burst(91), 5, h.clock.unix_ns, 2);
        let (got, out) = h.recv(&wire);
        let got = got.unwrap();
        assert_eq!(got.hops, Some(3));
        assert_eq!(got.source_server, NET);
        assert_eq!(got.source_repeater, 312_010_101);
        assert_eq!(got.dmrd.dst, 91);
        assert!(out.datagrams().is_empty());
    }

    #[test]
    fn six_second_old_frame_is_quenched() {
        let mut h = Harness::new(config(5));
        let stale = h.clock.unix_ns - 6_000_000_000;
        let wire = h.wire(&burst(91), 5, stale, 0);
        let (got, out) = h.recv(&wire);
        assert!(got.is_none());
        assert_eq!(&out.datagrams()[0].bytes[..4], BCSQ);
    }

    #[test]
    fn altered_frame_is_rejected() {
        let mut h = Harness::new(config(5));
        let mut wire = h.wire(&burst(91), 5, h.clock.unix_ns, 0);
        wire[30] ^= 0x01;
        assert!(h.recv(&wire).0.is_none());
    }

    #[test]
    fn wrong_network_id_is_dropped() {
        let mut cfg = config(5);
        cfg.network_id = 9999;
        let mut h = Harness::new(cfg);
        let wire = h.wire(&burst(91), 5, h.clock.unix_ns, 0);
        assert!(h.recv(&wire).0.is_none());
    }

    #[test]
    fn unexpected_source_needs_relax_checks() {
        let mut h = Harness::new(config(5));
        let other: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let wire = h.wire(&burst(91), 5, h.clock.unix_ns, 0);
        assert!(h.recv_from(&wire, other).0.is_none());
        h.cfg.relax_checks = true;
        assert!(h.recv_from(&wire, other).0.is_some());
    }

    #[test]
    fn hop_limit_is_enforced() {
        let mut h = Harness::new(config(5));
        let wire = h.wire(&burst(91), 5, h.clock.unix_ns, 10);
        let (got, out) = h.recv(&wire);
        assert!(got.is_none());
        assert_eq!(&out.datagrams()[0].bytes[..4], BCSQ);
    }

    #[test]
    fn reserved_group_talkgroup_is_dropped() {
        let mut h = Harness::new(config(5));
        let wire = h.wire(&burst(9), 5, h.clock.unix_ns, 0);
        assert!(h.recv(&wire).0.is_none());
    }

    #[test]
    fn v1_refused_when_newer_configured() {
        let mut h = Harness::new(config(5));
        let wire = h.wire(&burst(91), 1, 0, 0);
        let (got, out) = h.recv(&wire);
        assert!(got.is_none());
        assert_eq!(&out.datagrams()[0].bytes[..4], BCVE);
    }

    #[test]
    fn v1_uses_local_server_id_and_slot_one() {
        let mut h = Harness::new(config(1));
        let wire = h.wire(&burst(91), 1, 0, 0);
        let got = h.recv(&wire).0.unwrap();
        assert_eq!(got.hops, None);
        assert_eq!(got.source_server, 0);
        let mut two = burst(91);
        two.bits = two.bits.with_slot(Slot::Two);
        let wire = h.wire(&two, 1, 0, 0);
        assert!(h.recv(&wire).0.is_none());
    }

    #[test]
    fn embedded_version_updates_link() {
        let mut h = Harness::new(config(5));
        let wire = h.wire(&burst(91), 4, h.clock.unix_ns, 0);
        assert!(h.recv(&wire).0.is_some());
        assert_eq!(h.link.version(), 4);
    }

    #[test]
    fn control_frames() {
        let mut h = Harness::new(config(4));
        let key = h.key();
        let moved: SocketAddr = "127.0.0.1:62099".parse().unwrap();
        let ctx = context(&h.cfg, &h.acls, &h.dir, h.clock);
        assert!(!h.link.alive(&ctx));

        h.recv_from(&ObpControl::Keepalive.encode(&key), moved);
        assert_eq!(h.link.target(), Some(moved));
        let ctx = context(&h.cfg, &h.acls, &h.dir, h.clock);
        assert!(h.link.alive(&ctx));

        h.recv(&ObpControl::SourceQuench { tgid: 91, stream_id: 5 }.encode(&key));
        assert!(h.link.quenched(91, 5));
        h.link.clear_quench(5);
        assert!(!h.link.quenched(91, 5));

        h.recv(&ObpControl::VersionAnnounce(3).encode(&key));
        assert_eq!(h.link.version(), 4);
        h.recv(&ObpControl::VersionAnnounce(5).encode(&key));
        assert_eq!(h.link.version(), 5);

        h.recv(&ObpControl::Stun.encode(&key));
        assert!(h.link.is_stunned());
        let dmrd = burst(91);
        let frame = OutFrame {
            dmrd: &dmrd,
            hops: None,
            source_server: 0,
            source_repeater: 0,
        };
        let mut out = Outbox::new();
        assert!(!h.link.send(&ctx, &frame, &mut out));
    }

    #[test]
    fn keepalive_goes_stale() {
        let mut h = Harness::new(config(5));
        let key = h.key();
        h.recv(&ObpControl::Keepalive.encode(&key));
        h.clock = h.clock.advance(KEEPALIVE_TIMEOUT + Duration::from_secs(1));
        let ctx = context(&h.cfg, &h.acls, &h.dir, h.clock);
        assert!(!h.link.alive(&ctx));
    }

    #[test]
    fn send_uses_link_version() {
        let mut h = Harness::new(config(5));
        let ctx = context(&h.cfg, &h.acls, &h.dir, h.clock);
        let dmrd = burst(91);
        let frame = OutFrame {
            dmrd: &dmrd,
            hops: Some(4),
            source_server: 2342,
            source_repeater: 7,
        };
        let mut out = Outbox::new();
        assert!(h.link.send(&ctx, &frame, &mut out));
        let ObpFrame::Data(d) = obp::decode(&out.datagrams()[0].bytes, &h.key(), 5).unwrap() else {
            panic!("expected data");
        };
        assert_eq!(d.version, 5);
        assert_eq!(d.hops, 4);
        assert_eq!(d.source_server, 2342);
        assert_eq!(d.source_repeater, 7);
    }
}
