//! HBP peer and XLX peer: logs in to an upstream master and keeps the
//! session alive with pings.

use crate::auth::{self, LogOnce};
use crate::config::{Mode, SystemConfig};
use crate::endpoint::{Inbound, Link, LinkContext, OutFrame, Outbox};
use crate::metrics::counters;
use dmr_common::crypto;
use dmr_common::frame::{Dmrd, FrameBits, FrameError, HbpFrame, PeerMetadata, PAYLOAD_LEN};
use dmr_common::types::{DmrId, UNLINK_TG};
use rand::Rng;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const DNS_REFRESH: Duration = Duration::from_secs(600);

const XLX_START: [u8; 35] = [
    0x4f, 0x2e, 0x00, 0xb5, 0x01, 0xae, 0x3a, 0x00, 0x1c, 0x40, 0xa0, 0xc1, 0xcc, 0x7d, 0xff, 0x57, 0xd7, 0x5d,
    0xf5, 0xd5, 0x06, 0x50, 0x26, 0xf8, 0x28, 0x80, 0xbd, 0x61, 0x6f, 0x13, 0xf1, 0x85, 0x89, 0x00, 0x00,
];
const XLX_END: [u8; 35] = [
    0x4f, 0x41, 0x00, 0x61, 0x01, 0x1e, 0x3a, 0x78, 0x1c, 0x30, 0xa0, 0x61, 0xcc, 0xbd, 0xff, 0x57, 0xd7, 0x5d,
    0xf5, 0xd2, 0x53, 0x44, 0x25, 0xc0, 0x2f, 0xe0, 0xb1, 0x21, 0x67, 0x13, 0xe8, 0x85, 0xba, 0x00, 0x00,
];

/// Login progress towards the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkState {
    /// Idle; the next tick sends a login.
    No,
    /// `RPTL` sent.
    RptlSent,
    /// Challenge answered.
    Authenticated,
    /// Configuration sent.
    ConfigSent,
    /// Options sent.
    OptionsSent,
    /// Connected.
    Yes,
}

impl fmt::Display for PeerLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::No => "NO",
            Self::RptlSent => "RPTL_SENT",
            Self::Authenticated => "AUTHENTICATED",
            Self::ConfigSent => "CONFIG_SENT",
            Self::OptionsSent => "OPTIONS_SENT",
            Self::Yes => "YES",
        })
    }
}

/// Keepalive counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    /// Unix seconds of the last state change to or from connected.
    pub connected: u64,
    /// Pings sent since login.
    pub pings_sent: u64,
    /// Pongs received since login.
    pub pings_ackd: u64,
    /// Consecutive ticks with a ping unanswered.
    pub num_outstanding: u32,
    /// Whether the last ping is unanswered.
    pub ping_outstanding: bool,
}

/// Peer role state.
#[derive(Debug)]
pub struct Peer {
    master: Option<SocketAddr>,
    radio_id: DmrId,
    xlx: bool,
    state: PeerLinkState,
    stats: PeerStats,
    last_resolve: Option<Instant>,
    log_once: LogOnce,
}

impl Peer {
    /// A disconnected peer. `master` is `None` until the host resolves.
    #[must_use]
    pub fn new(cfg: &SystemConfig, master: Option<SocketAddr>) -> Self {
        Self {
            master,
            radio_id: cfg.radio_id,
            xlx: cfg.mode == Mode::XlxPeer,
            state: PeerLinkState::No,
            stats: PeerStats::default(),
            last_resolve: None,
            log_once: LogOnce::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PeerLinkState {
        self.state
    }

    /// Keepalive counters.
    #[must_use]
    pub fn stats(&self) -> PeerStats {
        self.stats
    }

    /// Master address, if resolved.
    #[must_use]
    pub fn master(&self) -> Option<SocketAddr> {
        self.master
    }

    /// Records a fresh resolution of the master host.
    pub fn set_master(&mut self, ctx: &LinkContext<'_>, addr: SocketAddr) {
        if self.master != Some(addr) {
            info!("({}) hostname resolution performed: {}", ctx.name(), addr);
        }
        self.master = Some(addr);
    }

    fn id_ok(&self, ctx: &LinkContext<'_>, id: DmrId) -> bool {
        ctx.config.loose || id == self.radio_id
    }

    fn to_master(&self, ctx: &LinkContext<'_>, out: &mut Outbox, bytes: Vec<u8>) {
        if let Some(addr) = self.master {
            out.send(ctx.id, addr, bytes);
        }
    }

    fn reset(&mut self, ctx: &LinkContext<'_>) {
        self.state = PeerLinkState::No;
        self.stats.connected = ctx.clock.unix_secs();
    }

    fn connected(&mut self, ctx: &LinkContext<'_>, out: &mut Outbox) {
        self.state = PeerLinkState::Yes;
        self.stats.connected = ctx.clock.unix_secs();
        info!("({}) connection to master completed", ctx.name());
        if self.xlx {
            info!("({}) sending XLX module request for {}", ctx.name(), ctx.config.xlx_module);
            for bytes in module_change(self.radio_id, UNLINK_TG)
                .into_iter()
                .chain(module_change(self.radio_id, ctx.config.xlx_module))
            {
                self.to_master(ctx, out, bytes);
            }
        }
    }

    fn ack(&mut self, ctx: &LinkContext<'_>, value: u32, out: &mut Outbox) {
        match self.state {
            PeerLinkState::RptlSent => {
                info!("({}) repeater login ACK received with 32bit id: {}", ctx.name(), value);
                let hash = crypto::challenge_response(value, ctx.config.passphrase.as_bytes());
                let bytes = HbpFrame::AuthResponse {
                    peer_id: self.radio_id,
                    hash,
                }
                .serialize();
                self.to_master(ctx, out, bytes);
                self.state = PeerLinkState::Authenticated;
            }
            PeerLinkState::Authenticated if self.id_ok(ctx, value) => {
                info!("({}) repeater authentication accepted", ctx.name());
                let bytes = HbpFrame::Config {
                    peer_id: self.radio_id,
                    meta: Box::new(metadata(ctx.config)),
                }
                .serialize();
                self.to_master(ctx, out, bytes);
                self.state = PeerLinkState::ConfigSent;
                info!("({}) repeater configuration sent", ctx.name());
            }
            PeerLinkState::ConfigSent if self.id_ok(ctx, value) => {
                info!("({}) repeater configuration accepted", ctx.name());
                if ctx.config.options.is_empty() {
                    self.connected(ctx, out);
                } else {
                    let bytes = HbpFrame::Options {
                        peer_id: self.radio_id,
                        options: ctx.config.options.clone(),
                    }
                    .serialize();
                    self.to_master(ctx, out, bytes);
                    self.state = PeerLinkState::OptionsSent;
                    info!("({}) sent options: ({})", ctx.name(), ctx.config.options);
                }
            }
            PeerLinkState::OptionsSent if self.id_ok(ctx, value) => {
                info!("({}) repeater options accepted", ctx.name());
                self.connected(ctx, out);
            }
            PeerLinkState::Authenticated | PeerLinkState::ConfigSent | PeerLinkState::OptionsSent => {
                error!("({}) master ACK contained wrong id {}, connection reset", ctx.name(), value);
                self.reset(ctx);
            }
            PeerLinkState::No | PeerLinkState::Yes => {
                debug!("({}) unexpected RPTACK in state {}", ctx.name(), self.state);
            }
        }
    }
}

/// Configuration block sent with `RPTC`.
#[must_use]
pub fn metadata(cfg: &SystemConfig) -> PeerMetadata {
    PeerMetadata {
        callsign: cfg.callsign.clone(),
        rx_freq: cfg.rx_freq.clone(),
        tx_freq: cfg.tx_freq.clone(),
        tx_power: cfg.tx_power.clone(),
        colorcode: cfg.colorcode.clone(),
        latitude: cfg.latitude.clone(),
        longitude: cfg.longitude.clone(),
        height: cfg.height.clone(),
        location: cfg.location.clone(),
        description: cfg.description.clone(),
        slots: cfg.slots.clone(),
        url: cfg.url.clone(),
        software_id: cfg.software_id.clone(),
        package_id: cfg.package_id.clone(),
    }
}

/// The five-frame private call an XLX reflector reads as a module change.
#[must_use]
pub fn module_change(radio_id: DmrId, module: DmrId) -> Vec<Vec<u8>> {
    let stream_id = rand::thread_rng().gen_range(1..=u32::MAX);
    (0u8..5)
        .map(|n| {
            let (flags, body) = if n < 3 { (0xE1, &XLX_START) } else { (0xE2, &XLX_END) };
            let mut payload = [0u8; PAYLOAD_LEN];
            payload.copy_from_slice(&body[..PAYLOAD_LEN]);
            Dmrd {
                seq: n,
                rf_src: radio_id & 0x00FF_FFFF,
                dst: module,
                peer: radio_id,
                bits: FrameBits::decode(flags),
                stream_id,
                payload,
                ber: body[PAYLOAD_LEN],
                rssi: body[PAYLOAD_LEN + 1],
            }
            .serialize()
        })
        .collect()
}

impl Link for Peer {
    fn receive(
        &mut self,
        ctx: &LinkContext<'_>,
        data: &[u8],
        from: SocketAddr,
        out: &mut Outbox,
    ) -> Option<Inbound> {
        if self.master != Some(from) {
            trace!("({}) ignoring packet from {}, not our master", ctx.name(), from);
            return None;
        }
        let frame = match HbpFrame::parse(data) {
            Ok(f) => f,
            Err(FrameError::NullStream) => {
                warn!("({}) CALL DROPPED AS STREAM ID IS NULL FROM {}", ctx.name(), from);
                counters::frames_dropped_total("null_stream");
                return None;
            }
            Err(e) => {
                debug!("({}) malformed packet from master: {}", ctx.name(), e);
                counters::frames_dropped_total("malformed");
                return None;
            }
        };
        match frame {
            HbpFrame::Data(dmrd) => {
                if !self.id_ok(ctx, dmrd.peer) {
                    return None;
                }
                if let Err(denial) =
                    auth::check_hbp(ctx.global_acls, ctx.acls, dmrd.rf_src, dmrd.dst, dmrd.bits.slot)
                {
                    if self.log_once.first(dmrd.stream_id) {
                        info!(
                            "({}) CALL DROPPED WITH STREAM ID {} FROM SUBSCRIBER {} BY {}",
                            ctx.name(),
                            dmrd.stream_id,
                            dmrd.rf_src,
                            denial
                        );
                    }
                    counters::frames_dropped_total(denial.reason());
                    return None;
                }
                let source_repeater = dmrd.peer;
                return Some(Inbound {
                    dmrd,
                    hops: None,
                    source_server: ctx.global.server_id,
                    source_repeater,
                });
            }
            HbpFrame::Nak { peer_id } if self.id_ok(ctx, peer_id) => {
                warn!("({}) MSTNAK received, resetting connection to the master", ctx.name());
                self.reset(ctx);
            }
            HbpFrame::Ack { value } => self.ack(ctx, value, out),
            HbpFrame::Pong { peer_id } if self.id_ok(ctx, peer_id) => {
                self.stats.ping_outstanding = false;
                self.stats.num_outstanding = 0;
                self.stats.pings_ackd += 1;
                trace!("({}) MSTPONG received, pongs since connected: {}", ctx.name(), self.stats.pings_ackd);
            }
            HbpFrame::MasterClose { peer_id } if self.id_ok(ctx, peer_id) => {
                info!("({}) MSTCL received", ctx.name());
                self.reset(ctx);
            }
            HbpFrame::Nak { .. } | HbpFrame::Pong { .. } | HbpFrame::MasterClose { .. } => {
                debug!("({}) control frame for another radio id ignored", ctx.name());
            }
            other => {
                error!("({}) unexpected command from master: {:?}", ctx.name(), other);
            }
        }
        None
    }

    fn send(&mut self, ctx: &LinkContext<'_>, frame: &OutFrame<'_>, out: &mut Outbox) -> bool {
        if self.state != PeerLinkState::Yes || self.master.is_none() {
            return false;
        }
        let mut dmrd = frame.dmrd.clone();
        dmrd.peer = self.radio_id;
        self.to_master(ctx, out, dmrd.serialize());
        counters::frames_forwarded_total("hbp");
        true
    }

    fn maintain(&mut self, ctx: &LinkContext<'_>, out: &mut Outbox) {
        let now = ctx.clock.mono;
        if self.stats.ping_outstanding {
            self.stats.num_outstanding += 1;
        }
        if self.state != PeerLinkState::Yes || self.stats.num_outstanding >= ctx.global.max_missed {
            if self.state == PeerLinkState::Yes {
                warn!("({}) {} pings unanswered, logging in again", ctx.name(), self.stats.num_outstanding);
            }
            self.stats.pings_sent = 0;
            self.stats.pings_ackd = 0;
            self.stats.num_outstanding = 0;
            self.stats.ping_outstanding = false;
            self.state = PeerLinkState::RptlSent;
            let due = self.last_resolve.map_or(true, |t| now.saturating_duration_since(t) >= DNS_REFRESH);
            if due || self.master.is_none() {
                self.last_resolve = Some(now);
                out.resolve(ctx.id);
            }
            self.to_master(ctx, out, HbpFrame::Login { peer_id: self.radio_id }.serialize());
            info!(
                "({}) sending login request to master {}:{}",
                ctx.name(),
                ctx.config.master_ip,
                ctx.config.master_port
            );
        }
        if self.state == PeerLinkState::Yes {
            self.to_master(ctx, out, HbpFrame::Ping { peer_id: self.radio_id }.serialize());
            self.stats.pings_sent += 1;
            self.stats.ping_outstanding = true;
            trace!(
                "({}) RPTPING sent, total sent {}, missed {}, outstanding {}",
                ctx.name(),
                self.stats.pings_sent,
                self.stats.pings_sent - self.stats.pings_ackd,
                self.stats.num_outstanding
            );
        }
    }

    fn deregister(&mut self, ctx: &LinkContext<'_>, out: &mut Outbox) {
        if self.master.is_some() {
            self.to_master(ctx, out, HbpFrame::Close { peer_id: self.radio_id }.serialize());
            info!("({}) de-registration sent to master", ctx.name());
        }
        self.reset(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Acls;
    use crate::clock::Clock;
    use crate::directory::Directory;
    use crate::endpoint::testing::context;
    use dmr_common::frame::{RPTC, RPTCL, RPTK, RPTL, RPTO, RPTPING};
    use dmr_common::types::{CallType, Slot};

    const ID: DmrId = 312_010_101;

    fn master() -> SocketAddr {
        "127.0.0.1:62031".parse().unwrap()
    }

    fn config(mode: Mode) -> SystemConfig {
        let mut cfg = SystemConfig::new("PEER-1", mode);
        cfg.radio_id = ID;
        cfg.passphrase = "passw0rd".to_string();
        cfg.callsign = "N0CALL".to_string();
        cfg.xlx_module = 4004;
        cfg
    }

    struct Harness {
        cfg: SystemConfig,
        acls: Acls,
        dir: Directory,
        clock: Clock,
        peer: Peer,
    }

    impl Harness {
        fn new(cfg: SystemConfig) -> Self {
            Self {
                acls: Acls::system(&cfg).unwrap(),
                peer: Peer::new(&cfg, Some(master())),
                cfg,
                dir: Directory::default(),
                clock: Clock::system(),
            }
        }

        fn tick(&mut self) -> Outbox {
            let ctx = context(&self.cfg, &self.acls, &self.dir, self.clock);
            let mut out = Outbox::new();
            self.peer.maintain(&ctx, &mut out);
            out
        }

        fn recv(&mut self, frame: &HbpFrame) -> (Option<Inbound>, Outbox) {
            let ctx = context(&self.cfg, &self.acls, &self.dir, self.clock);
            let mut out = Outbox::new();
            let got = self.peer.receive(&ctx, &frame.serialize(), master(), &mut out);
            (got, out)
        }

        fn connect(&mut self) -> Outbox {
            self.tick();
            self.recv(&HbpFrame::Ack { value: 0x0102_0304 });
            self.recv(&HbpFrame::Ack { value: ID });
            self.recv(&HbpFrame::Ack { value: ID }).1
        }
    }

    #[test]
    fn full_login_sequence() {
        let mut h = Harness::new(config(Mode::Peer));
        let out = h.tick();
        assert_eq!(&out.datagrams()[0].bytes[..4], RPTL);
        assert_eq!(h.peer.state(), PeerLinkState::RptlSent);

        let (_, out) = h.recv(&HbpFrame::Ack { value: 0x0102_0304 });
        let rptk = &out.datagrams()[0].bytes;
        assert_eq!(&rptk[..4], RPTK);
        assert_eq!(&rptk[8..40], &crypto::challenge_response(0x0102_0304, b"passw0rd"));

        let (_, out) = h.recv(&HbpFrame::Ack { value: ID });
        assert_eq!(&out.datagrams()[0].bytes[..4], RPTC);
        assert_eq!(h.peer.state(), PeerLinkState::ConfigSent);

        h.recv(&HbpFrame::Ack { value: ID });
        assert_eq!(h.peer.state(), PeerLinkState::Yes);

        let out = h.tick();
        assert_eq!(&out.datagrams()[0].bytes[..7], RPTPING);
    }

    #[test]
    fn options_are_sent_before_yes() {
        let mut cfg = config(Mode::Peer);
        cfg.options = "TS2=235".to_string();
        let mut h = Harness::new(cfg);
        let out = h.connect();
        assert_eq!(&out.datagrams()[0].bytes[..4], RPTO);
        assert_eq!(h.peer.state(), PeerLinkState::OptionsSent);
        h.recv(&HbpFrame::Ack { value: ID });
        assert_eq!(h.peer.state(), PeerLinkState::Yes);
    }

    #[test]
    fn wrong_ack_id_resets() {
        let mut h = Harness::new(config(Mode::Peer));
        h.tick();
        h.recv(&HbpFrame::Ack { value: 1 });
        h.recv(&HbpFrame::Ack { value: 999 });
        assert_eq!(h.peer.state(), PeerLinkState::No);
    }

    #[test]
    fn loose_accepts_any_ack_id() {
        let mut cfg = config(Mode::Peer);
        cfg.loose = true;
        let mut h = Harness::new(cfg);
        h.tick();
        h.recv(&HbpFrame::Ack { value: 1 });
        h.recv(&HbpFrame::Ack { value: 999 });
        assert_eq!(h.peer.state(), PeerLinkState::ConfigSent);
    }

    #[test]
    fn nak_resets() {
        let mut h = Harness::new(config(Mode::Peer));
        h.connect();
        h.recv(&HbpFrame::Nak { peer_id: ID });
        assert_eq!(h.peer.state(), PeerLinkState::No);
    }

    #[test]
    fn missed_pings_force_login() {
        let mut h = Harness::new(config(Mode::Peer));
        h.connect();
        for _ in 0..3 {
            let out = h.tick();
            assert_eq!(&out.datagrams()[0].bytes[..7], RPTPING);
        }
        let out = h.tick();
        assert_eq!(&out.datagrams()[0].bytes[..4], RPTL);
        assert_eq!(h.peer.state(), PeerLinkState::RptlSent);
    }

    #[test]
    fn pong_clears_outstanding() {
        let mut h = Harness::new(config(Mode::Peer));
        h.connect();
        h.tick();
        h.recv(&HbpFrame::Pong { peer_id: ID });
        assert_eq!(h.peer.stats().num_outstanding, 0);
        assert!(!h.peer.stats().ping_outstanding);
        assert_eq!(h.peer.stats().pings_ackd, 1);
    }

    #[test]
    fn packets_from_elsewhere_are_ignored() {
        let mut h = Harness::new(config(Mode::Peer));
        h.tick();
        let ctx = context(&h.cfg, &h.acls, &h.dir, h.clock);
        let mut out = Outbox::new();
        let bytes = HbpFrame::Ack { value: 1 }.serialize();
        h.peer.receive(&ctx, &bytes, "10.9.9.9:62031".parse().unwrap(), &mut out);
        assert_eq!(h.peer.state(), PeerLinkState::RptlSent);
    }

    #[test]
    fn xlx_sends_module_change_on_connect() {
        let mut h = Harness::new(config(Mode::XlxPeer));
        let out = h.connect();
        let frames: Vec<Dmrd> = out
            .datagrams()
            .iter()
            .map(|d| Dmrd::parse(&d.bytes).unwrap())
            .collect();
        assert_eq!(frames.len(), 10);
        assert_eq!(frames[0].dst, UNLINK_TG);
        assert_eq!(frames[5].dst, 4004);
        assert_eq!(frames[0].bits.encode(), 0xE1);
        assert_eq!(frames[4].bits.encode(), 0xE2);
        assert_eq!(frames[0].bits.call_type, CallType::Unit);
        assert_eq!(frames[0].bits.slot, Slot::Two);
    }

    #[test]
    fn first_tick_requests_resolution() {
        let mut h = Harness::new(config(Mode::Peer));
        let mut out = h.tick();
        assert_eq!(out.take_resolve().len(), 1);
        h.recv(&HbpFrame::Nak { peer_id: ID });
        let mut out = h.tick();
        assert!(out.take_resolve().is_empty());
    }

    #[test]
    fn deregister_sends_close() {
        let mut h = Harness::new(config(Mode::Peer));
        h.connect();
        let ctx = context(&h.cfg, &h.acls, &h.dir, h.clock);
        let mut out = Outbox::new();
        h.peer.deregister(&ctx, &mut out);
        assert_eq!(&out.datagrams()[0].bytes[..5], RPTCL);
    }
}
