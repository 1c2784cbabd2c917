//! HBP master: accepts repeater logins, answers pings and reaps peers that
//! stop pinging.

use crate::auth::{self, LogOnce};
use crate::config::SystemConfig;
use crate::endpoint::{Inbound, Link, LinkContext, OutFrame, Outbox};
use crate::metrics::{counters, gauges};
use crate::options::MasterSettings;
use crate::ratelimit::LoginLimiter;
use crate::report::ReportEvent;
use dmr_common::crypto;
use dmr_common::frame::{rewrite_peer, Dmrd, FrameError, HbpFrame, PeerMetadata};
use dmr_common::types::{DmrId, STATUS_PROBE_ID};
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// How long a proxy is told to refuse a rejected repeater.
const QUARANTINE_SECS: u64 = 300;

/// Login progress of one repeater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Login seen, challenge not yet issued.
    RptlReceived,
    /// Salt sent, waiting for the hash.
    ChallengeSent,
    /// Hash accepted, waiting for the configuration block.
    WaitingConfig,
    /// Fully connected.
    Yes,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RptlReceived => "RPTL_RECEIVED",
            Self::ChallengeSent => "CHALLENGE_SENT",
            Self::WaitingConfig => "WAITING_CONFIG",
            Self::Yes => "YES",
        })
    }
}

/// One repeater attached to a master.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    /// Repeater id.
    pub radio_id: DmrId,
    /// Address all of its packets must come from.
    pub addr: SocketAddr,
    /// Login progress.
    pub state: PeerState,
    /// Challenge salt.
    pub salt: u32,
    /// Unix seconds when it reached [`PeerState::Yes`].
    pub connected: u64,
    /// Last login step or ping.
    pub last_ping: Instant,
    /// Pings answered.
    pub pings_received: u64,
    /// Configuration block.
    pub meta: PeerMetadata,
    /// Last `RPTO` text.
    pub options: Option<String>,
}

/// Master role state.
#[derive(Debug)]
pub struct Master {
    peers: BTreeMap<DmrId, PeerConnection>,
    log_once: LogOnce,
    logins: LoginLimiter,
    defaults: MasterSettings,
    settings: MasterSettings,
    options: Option<String>,
    reset: bool,
}

impl Master {
    /// A master with no peers.
    #[must_use]
    pub fn new(cfg: &SystemConfig) -> Self {
        let defaults = MasterSettings::from_config(cfg);
        Self {
            peers: BTreeMap::new(),
            log_once: LogOnce::new(),
            logins: LoginLimiter::default(),
            settings: defaults.clone(),
            defaults,
            options: None,
            reset: false,
        }
    }

    /// Known peers in id order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerConnection> {
        self.peers.values()
    }

    /// One peer.
    #[must_use]
    pub fn peer(&self, id: DmrId) -> Option<&PeerConnection> {
        self.peers.get(&id)
    }

    /// Number of peers in [`PeerState::Yes`].
    #[must_use]
    pub fn connected(&self) -> usize {
        self.peers.values().filter(|p| p.state == PeerState::Yes).count()
    }

    /// Settings currently in force.
    #[must_use]
    pub fn settings(&self) -> &MasterSettings {
        &self.settings
    }

    /// Settings from the configuration file.
    #[must_use]
    pub fn defaults(&self) -> &MasterSettings {
        &self.defaults
    }

    /// Records settings after they were applied to the bridge table.
    pub fn set_settings(&mut self, settings: MasterSettings) {
        self.settings = settings;
    }

    /// Options text a repeater sent, if any is pending application.
    #[must_use]
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// Whether the last peer left since the previous call.
    pub fn take_reset(&mut self) -> bool {
        std::mem::take(&mut self.reset)
    }

    fn pinned(&self, id: DmrId, from: SocketAddr, state: Option<PeerState>) -> bool {
        self.peers
            .get(&id)
            .is_some_and(|p| p.addr == from && state.map_or(true, |s| p.state == s))
    }

    fn remove_peer(&mut self, id: DmrId) -> Option<PeerConnection> {
        let peer = self.peers.remove(&id)?;
        if peer.state == PeerState::Yes {
            gauges::dec_peers_connected();
        }
        Some(peer)
    }

    fn peer_left(&mut self, ctx: &LinkContext<'_>) {
        if self.peers.is_empty() && (self.options.is_some() || self.settings != self.defaults) {
            info!("({}) last peer gone, setting default options", ctx.name());
            self.options = None;
            self.reset = true;
        }
    }

    fn nak(ctx: &LinkContext<'_>, out: &mut Outbox, peer_id: DmrId, to: SocketAddr) {
        out.send(ctx.id, to, HbpFrame::Nak { peer_id }.serialize());
    }

    fn quarantine(ctx: &LinkContext<'_>, out: &mut Outbox, peer_id: DmrId, to: SocketAddr) {
        if !ctx.config.proxy_control {
            return;
        }
        let until = ctx.clock.unix_secs() + QUARANTINE_SECS;
        info!("({}) quarantining {} at {} until {}", ctx.name(), peer_id, to, until);
        out.send(ctx.id, to, HbpFrame::Quarantine { peer_id, until }.serialize());
    }

    fn login(&mut self, ctx: &LinkContext<'_>, peer_id: DmrId, from: SocketAddr, out: &mut Outbox) {
        if let Some(reason) = self.logins.check_and_record(from.ip(), ctx.clock.mono) {
            warn!("({}) login from {} for {} rate limited", ctx.name(), from, peer_id);
            counters::logins_total(reason);
            return;
        }
        let known = self.peers.contains_key(&peer_id);
        if self.peers.len() >= ctx.config.max_peers && !known {
            Self::nak(ctx, out, peer_id, from);
            warn!(
                "({}) registration denied from radio id {}: maximum number of peers exceeded",
                ctx.name(),
                peer_id
            );
            counters::logins_total("max_peers");
            return;
        }
        let admitted = peer_id == STATUS_PROBE_ID
            || (auth::registration_allowed(ctx.global_acls, ctx.acls, peer_id)
                && (ctx.config.allow_unreg_id || ctx.directory.validate_id(peer_id)));
        if !admitted {
            Self::nak(ctx, out, peer_id, from);
            Self::quarantine(ctx, out, peer_id, from);
            warn!(
                "({}) invalid login from {} radio id {}: denied by registration ACL or not registered",
                ctx.name(),
                from.ip(),
                peer_id
            );
            counters::logins_total("denied");
            return;
        }

        self.remove_peer(peer_id);
        let salt: u32 = rand::thread_rng().gen();
        self.peers.insert(
            peer_id,
            PeerConnection {
                radio_id: peer_id,
                addr: from,
                state: PeerState::ChallengeSent,
                salt,
                connected: 0,
                last_ping: ctx.clock.mono,
                pings_received: 0,
                meta: PeerMetadata::default(),
                options: None,
            },
        );
        out.send(ctx.id, from, HbpFrame::Ack { value: salt }.serialize());
        if peer_id == STATUS_PROBE_ID {
            info!("({}) server status probe from {}", ctx.name(), from);
        } else {
            info!("({}) repeater logging in with radio id {}, {}", ctx.name(), peer_id, from);
        }
        counters::logins_total("challenged");
    }

    fn auth_response(
        &mut self,
        ctx: &LinkContext<'_>,
        peer_id: DmrId,
        hash: &[u8; 32],
        from: SocketAddr,
        out: &mut Outbox,
    ) {
        if !self.pinned(peer_id, from, Some(PeerState::ChallengeSent)) {
            Self::nak(ctx, out, peer_id, from);
            info!("({}) login challenge from radio id that has not logged in: {}", ctx.name(), peer_id);
            return;
        }
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return;
        };
        peer.last_ping = ctx.clock.mono;
        let pass = ctx.config.passphrase.as_bytes();
        let accepted = (ctx.global.allow_null_passphrase && pass.is_empty())
            || crypto::verify_challenge(peer.salt, pass, hash);
        if accepted {
            peer.state = PeerState::WaitingConfig;
            out.send(ctx.id, from, HbpFrame::Ack { value: peer_id }.serialize());
            info!("({}) peer {} has completed the login exchange", ctx.name(), peer_id);
            counters::logins_total("authenticated");
        } else {
            info!("({}) peer {} has failed the login exchange", ctx.name(), peer_id);
            Self::nak(ctx, out, peer_id, from);
            self.remove_peer(peer_id);
            counters::logins_total("bad_hash");
        }
    }

    fn configure(
        &mut self,
        ctx: &LinkContext<'_>,
        peer_id: DmrId,
        meta: PeerMetadata,
        from: SocketAddr,
        out: &mut Outbox,
    ) {
        if !self.pinned(peer_id, from, Some(PeerState::WaitingConfig)) {
            Self::nak(ctx, out, peer_id, from);
            info!("({}) peer info from radio id that has not logged in: {}", ctx.name(), peer_id);
            return;
        }
        if !ctx.config.allow_unreg_id {
            let listed = ctx.directory.lookup(peer_id);
            if listed != Some(meta.callsign.as_str()) {
                self.remove_peer(peer_id);
                Self::quarantine(ctx, out, peer_id, from);
                Self::nak(ctx, out, peer_id, from);
                info!(
                    "({}) callsign does not match subscriber database: id {}, sent {}, listed {}",
                    ctx.name(),
                    peer_id,
                    meta.callsign,
                    listed.unwrap_or("-")
                );
                counters::logins_total("callsign_mismatch");
                return;
            }
        }
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return;
        };
        peer.state = PeerState::Yes;
        peer.connected = ctx.clock.unix_secs();
        peer.last_ping = ctx.clock.mono;
        info!(
            "({}) peer {} ({}) has sent repeater configuration, package: {}, software: {}, desc: {}",
            ctx.name(),
            meta.callsign,
            peer_id,
            meta.package_id,
            meta.software_id,
            meta.description
        );
        peer.meta = meta;
        gauges::inc_peers_connected();
        counters::logins_total("connected");
        out.send(ctx.id, from, HbpFrame::Ack { value: peer_id }.serialize());
        out.report(ReportEvent::ConfigChanged);
    }

    fn data(&mut self, ctx: &LinkContext<'_>, dmrd: Dmrd, raw: &[u8], from: SocketAddr, out: &mut Outbox) -> Option<Inbound> {
        let peer_id = dmrd.peer;
        if !self.pinned(peer_id, from, Some(PeerState::Yes)) {
            counters::frames_dropped_total("not_connected");
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
        if ctx.config.repeat {
            for (id, peer) in &self.peers {
                if *id == peer_id || peer.state != PeerState::Yes {
                    continue;
                }
                let mut pkt = raw.to_vec();
                rewrite_peer(&mut pkt, *id);
                out.send(ctx.id, peer.addr, pkt);
                counters::frames_forwarded_total("hbp");
            }
        }
        Some(Inbound {
            dmrd,
            hops: None,
            source_server: ctx.global.server_id,
            source_repeater: peer_id,
        })
    }
}

impl Link for Master {
    fn receive(
        &mut self,
        ctx: &LinkContext<'_>,
        data: &[u8],
        from: SocketAddr,
        out: &mut Outbox,
    ) -> Option<Inbound> {
        let frame = match HbpFrame::parse(data) {
            Ok(f) => f,
            Err(FrameError::NullStream) => {
                warn!("({}) CALL DROPPED AS STREAM ID IS NULL FROM {}", ctx.name(), from);
                counters::frames_dropped_total("null_stream");
                return None;
            }
            Err(FrameError::UnknownCommand(cmd)) => {
                error!(
                    "({}) unrecognized command from {}: {}",
                    ctx.name(),
                    from,
                    hex::encode(cmd)
                );
                counters::frames_dropped_total("unknown_command");
                return None;
            }
            Err(e) => {
                debug!("({}) malformed packet from {}: {}", ctx.name(), from, e);
                counters::frames_dropped_total("malformed");
                return None;
            }
        };

        match frame {
            HbpFrame::Data(dmrd) => return self.data(ctx, dmrd, data, from, out),
            HbpFrame::Login { peer_id } => self.login(ctx, peer_id, from, out),
            HbpFrame::AuthResponse { peer_id, hash } => self.auth_response(ctx, peer_id, &hash, from, out),
            HbpFrame::Config { peer_id, meta } => self.configure(ctx, peer_id, *meta, from, out),
            HbpFrame::Close { peer_id } => {
                if self.pinned(peer_id, from, Some(PeerState::Yes)) {
                    info!("({}) peer is closing down: {}", ctx.name(), peer_id);
                    Self::nak(ctx, out, peer_id, from);
                    self.remove_peer(peer_id);
                    self.peer_left(ctx);
                    out.report(ReportEvent::ConfigChanged);
                }
            }
            HbpFrame::Options { peer_id, options } => {
                if let Some(peer) = self.peers.get_mut(&peer_id).filter(|p| p.addr == from) {
                    info!("({}) peer {} has sent options {}", ctx.name(), peer_id, options);
                    peer.options = Some(options.clone());
                    self.options = Some(options);
                    out.send(ctx.id, from, HbpFrame::Ack { value: peer_id }.serialize());
                } else {
                    Self::nak(ctx, out, peer_id, from);
                    info!("({}) options from radio id that is not logged in: {}", ctx.name(), peer_id);
                }
            }
            HbpFrame::Ping { peer_id } => {
                match self.peers.get_mut(&peer_id) {
                    Some(peer) if peer.addr == from && peer.state == PeerState::Yes => {
                        peer.pings_received += 1;
                        peer.last_ping = ctx.clock.mono;
                        out.send(ctx.id, from, HbpFrame::Pong { peer_id }.serialize());
                        trace!("({}) answered RPTPING from peer {}", ctx.name(), peer_id);
                    }
                    _ => {
                        Self::nak(ctx, out, peer_id, from);
                        info!("({}) ping from radio id that is not logged in: {}", ctx.name(), peer_id);
                    }
                }
            }
            HbpFrame::TalkerAlias { payload } => {
                debug!("({}) talker alias packet {}", ctx.name(), hex::encode(payload));
            }
            HbpFrame::ProxyInfo { payload } => {
                info!(
                    "({}) proxy connection from {}",
                    ctx.name(),
                    String::from_utf8_lossy(&payload)
                );
            }
            other => {
                error!("({}) unexpected command from {}: {:?}", ctx.name(), from, other);
            }
        }
        None
    }

    fn send(&mut self, ctx: &LinkContext<'_>, frame: &OutFrame<'_>, out: &mut Outbox) -> bool {
        let mut bytes = frame.dmrd.serialize();
        let mut sent = false;
        for (id, peer) in &self.peers {
            if peer.state != PeerState::Yes {
                continue;
            }
            rewrite_peer(&mut bytes, *id);
            out.send(ctx.id, peer.addr, bytes.clone());
            counters::frames_forwarded_total("hbp");
            sent = true;
        }
        sent
    }

    fn maintain(&mut self, ctx: &LinkContext<'_>, out: &mut Outbox) {
        let limit = Duration::from_secs(ctx.global.ping_time * u64::from(ctx.global.max_missed));
        let now = ctx.clock.mono;
        let expired: Vec<(DmrId, SocketAddr)> = self
            .peers
            .values()
            .filter(|p| p.last_ping + limit < now)
            .map(|p| (p.radio_id, p.addr))
            .collect();
        for (peer_id, addr) in &expired {
            info!("({}) peer {} has timed out and is being removed", ctx.name(), peer_id);
            out.send(ctx.id, *addr, HbpFrame::MasterClose { peer_id: *peer_id }.serialize());
            self.remove_peer(*peer_id);
            counters::logins_total("timeout");
        }
        if !expired.is_empty() {
            self.peer_left(ctx);
            out.report(ReportEvent::ConfigChanged);
        }
        self.logins.prune(now);
    }

    fn deregister(&mut self, ctx: &LinkContext<'_>, out: &mut Outbox) {
        let ids: Vec<DmrId> = self.peers.keys().copied().collect();
        for peer_id in ids {
            if let Some(peer) = self.remove_peer(peer_id) {
                out.send(ctx.id, peer.addr, HbpFrame::MasterClose { peer_id }.serialize());
                info!("({}) sent MSTCL to peer {}", ctx.name(), peer_id);
            }
        }
    }
}
