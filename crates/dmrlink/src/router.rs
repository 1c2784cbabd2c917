//! The routing core: every configured system, the bridge table, call state
//! and the subscriber map, owned together and mutated only from the core
//! task.
//!
//! A datagram enters through [`Router::receive`], is handed to the owning
//! role, and an accepted data frame is routed to every active member of
//! the bridges its source belongs to. All side effects land in the
//! caller's [`Outbox`].

use crate::announce::{self, SpeechFrame, SpeechRequest};
use crate::auth::Acls;
use crate::bridge::{self, BridgeTable, SystemEntry, Target};
use crate::clock::Clock;
use crate::config::{GlobalConfig, Mode, NetworkConfig};
use crate::directory::{first_digits, Directory};
use crate::endpoint::{Endpoint, Inbound, LinkContext, OutFrame, Outbox, Role, SystemId};
use crate::error::DmrlinkError;
use crate::master::{Master, PeerState};
use crate::metrics::{counters, gauges, histograms};
use crate::openbridge::ObpLink;
use crate::options::MasterSettings;
use crate::report::ReportEvent;
use crate::stream::{self, Expired, LcSet, StreamSession, StreamTracker, TxSession, SESSION_MAX_AGE};
use crate::subscriber::SubscriberMap;
use dmr_common::frame::Dmrd;
use dmr_common::lc::{BptcLcCodec, Lc, LcCodec, LC_OPT_GROUP, LC_OPT_UNIT};
use dmr_common::types::{
    CallType, DmrId, FrameType, Slot, ALL_CALL, APRS_TG, DT_DATA_HEADER, DT_RATE_12, DT_RATE_34,
    REFLECTOR_TG, STATUS_TG, UNLINK_TG,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Name of the OpenBridge system unit data is sent to when
/// `data_gateway` is set.
pub const DATA_GATEWAY: &str = "DATA-GATEWAY";
/// Name of the master APRS data goes to.
pub const APRS_GATEWAY: &str = "D-APRS";

/// A slot must have been quiet this long before a voice ident.
const IDENT_IDLE: Duration = Duration::from_secs(30);
/// Radio ids start here; lower private-call destinations are services.
const SUBSCRIBER_MIN: DmrId = 1_000_000;
const SUBSCRIBER_PREFIX_DIGITS: usize = 7;

fn in_ondemand_range(id: DmrId) -> bool {
    (9991..=9999).contains(&id)
}

fn is_unit_data(dmrd: &Dmrd) -> bool {
    dmrd.bits.frame_type == FrameType::DataSync
        && matches!(dmrd.bits.dtype_vseq, DT_DATA_HEADER | DT_RATE_12 | DT_RATE_34)
}

fn call_kind(dmrd: &Dmrd) -> &'static str {
    match (dmrd.bits.call_type, is_unit_data(dmrd)) {
        (CallType::Vcsbk, _) => "VCSBK",
        (CallType::Unit, true) => "UNIT DATA",
        (CallType::Unit, false) => "UNIT VOICE",
        (CallType::Group, true) => "GROUP DATA",
        (CallType::Group, false) => "GROUP VOICE",
    }
}

/// The routing core.
#[derive(Debug)]
pub struct Router {
    endpoints: Vec<Endpoint>,
    bridges: BridgeTable,
    streams: StreamTracker,
    subscribers: SubscriberMap,
    directory: Directory,
    global: GlobalConfig,
    global_acls: Acls,
    languages: Vec<String>,
    codec: BptcLcCodec,
    unit_log: crate::auth::LogOnce,
}

impl Router {
    /// Builds every enabled system and the configured bridges, then links
    /// each master's default reflector and static talkgroups.
    ///
    /// # Errors
    ///
    /// Returns an error if an ACL does not parse or a bridge seed names an
    /// unknown system.
    pub fn new(
        config: &NetworkConfig,
        directory: Directory,
        subscribers: SubscriberMap,
        now: Instant,
    ) -> Result<Self, DmrlinkError> {
        let global_acls = Acls::global(&config.global)?;
        let mut endpoints = Vec::new();
        let mut streams = StreamTracker::new();
        let mut entries = Vec::new();
        for cfg in config.system.iter().filter(|s| s.enabled) {
            let id = SystemId(endpoints.len());
            let ep = Endpoint::new(id, cfg.clone(), None)?;
            if ep.is_openbridge() {
                streams.add_obp(id);
            } else {
                streams.add_hbp(id, now);
            }
            entries.push(SystemEntry {
                id,
                name: cfg.name.clone(),
                mode: cfg.mode,
                ua_timer: cfg.default_ua_timer,
            });
            endpoints.push(ep);
        }
        let mut bridges = BridgeTable::new(entries);
        let seeds: Vec<_> = config
            .bridge
            .iter()
            .map(|b| {
                let mut b = b.clone();
                b.members.retain(|m| endpoints.iter().any(|e| e.name() == m.system));
                b
            })
            .collect();
        bridges.load(&seeds, now)?;

        let languages = config
            .global
            .announcement_languages
            .split(',')
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let mut router = Self {
            endpoints,
            bridges,
            streams,
            subscribers,
            directory,
            global: config.global.clone(),
            global_acls,
            languages,
            codec: BptcLcCodec,
            unit_log: crate::auth::LogOnce::new(),
        };
        for id in router.master_ids() {
            if let Some(settings) = router.master(id).map(|m| m.settings().clone()) {
                router.apply_settings(id, None, &settings, now);
            }
        }
        gauges::set_bridges_active(router.bridges.len());
        Ok(router)
    }

    /// Configured systems in index order.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// One system.
    #[must_use]
    pub fn endpoint(&self, id: SystemId) -> Option<&Endpoint> {
        self.endpoints.get(id.0)
    }

    /// Index of the system called `name`.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<SystemId> {
        self.endpoints.iter().find(|e| e.name() == name).map(|e| e.id)
    }

    /// The bridge table.
    #[must_use]
    pub fn bridges(&self) -> &BridgeTable {
        &self.bridges
    }

    /// Call state.
    #[must_use]
    pub fn streams(&self) -> &StreamTracker {
        &self.streams
    }

    /// Last-heard locations.
    #[must_use]
    pub fn subscribers(&self) -> &SubscriberMap {
        &self.subscribers
    }

    /// Process-wide settings.
    #[must_use]
    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    /// Configured prompt languages.
    #[must_use]
    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    fn name(&self, id: SystemId) -> &str {
        self.endpoint(id).map_or("?", Endpoint::name)
    }

    fn is_obp(&self, id: SystemId) -> bool {
        self.endpoint(id).is_some_and(Endpoint::is_openbridge)
    }

    fn master(&self, id: SystemId) -> Option<&Master> {
        match &self.endpoint(id)?.role {
            Role::Master(m) => Some(m),
            _ => None,
        }
    }

    fn master_mut(&mut self, id: SystemId) -> Option<&mut Master> {
        match &mut self.endpoints.get_mut(id.0)?.role {
            Role::Master(m) => Some(m),
            _ => None,
        }
    }

    fn master_ids(&self) -> Vec<SystemId> {
        self.endpoints.iter().filter(|e| e.is_master()).map(|e| e.id).collect()
    }

    fn ua_timer(&self, id: SystemId) -> u64 {
        match self.master(id) {
            Some(m) => m.settings().default_ua_timer,
            None => self.endpoint(id).map_or(0, |e| e.config.default_ua_timer),
        }
    }

    fn single_mode(&self, id: SystemId) -> bool {
        match self.master(id) {
            Some(m) => m.settings().single_mode,
            None => self.endpoint(id).is_some_and(|e| e.config.single_mode),
        }
    }

    fn language(&self, id: SystemId) -> String {
        let lang = match self.master(id) {
            Some(m) => m.settings().language.clone(),
            None => self
                .endpoint(id)
                .map(|e| e.config.announcement_language.clone())
                .unwrap_or_default(),
        };
        if self.languages.contains(&lang) {
            lang
        } else {
            self.languages.first().cloned().unwrap_or(lang)
        }
    }

    fn hangtime(&self, id: SystemId) -> Duration {
        Duration::from_secs(self.endpoint(id).map_or(0, |e| e.config.group_hangtime))
    }

    fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.global.stream_timeout_ms)
    }

    fn slot_idle(&self, id: SystemId, slot: Slot, now: Instant) -> bool {
        let hang = self.hangtime(id);
        self.streams.slot(id, slot).is_some_and(|s| s.idle(now, hang))
    }

    fn send_to(&mut self, target: SystemId, frame: &OutFrame<'_>, clock: Clock, out: &mut Outbox) -> bool {
        let Self {
            endpoints,
            global,
            global_acls,
            directory,
            ..
        } = self;
        let Some(ep) = endpoints.get_mut(target.0) else {
            return false;
        };
        let (link, ctx) = ep.split(global, global_acls, directory, clock);
        link.send(&ctx, frame, out)
    }

    fn with_obp<R>(
        &mut self,
        id: SystemId,
        clock: Clock,
        f: impl FnOnce(&mut ObpLink, &LinkContext<'_>) -> R,
    ) -> Option<R> {
        let Self {
            endpoints,
            global,
            global_acls,
            directory,
            ..
        } = self;
        let ep = endpoints.get_mut(id.0)?;
        let ctx = LinkContext {
            id: ep.id,
            config: &ep.config,
            acls: &ep.acls,
            global,
            global_acls,
            directory,
            clock,
        };
        match &mut ep.role {
            Role::OpenBridge(o) => Some(f(o, &ctx)),
            _ => None,
        }
    }

    /// Hands a datagram received on `id`'s socket to its role and routes
    /// any accepted data frame.
    pub fn receive(&mut self, id: SystemId, data: &[u8], from: SocketAddr, clock: Clock, out: &mut Outbox) {
        let inbound = {
            let Self {
                endpoints,
                global,
                global_acls,
                directory,
                ..
            } = self;
            let Some(ep) = endpoints.get_mut(id.0) else {
                return;
            };
            let (link, ctx) = ep.split(global, global_acls, directory, clock);
            link.receive(&ctx, data, from, out)
        };
        if let Some(inbound) = inbound {
            counters::frames_received_total(self.name(id));
            self.route(id, &inbound, clock, out);
        }
    }

    /// Routes one accepted frame from `src`.
    pub fn route(&mut self, src: SystemId, inbound: &Inbound, clock: Clock, out: &mut Outbox) {
        let dmrd = &inbound.dmrd;
        if self.is_obp(src) {
            match dmrd.bits.call_type {
                CallType::Unit => self.unit_direct(src, inbound, clock, out),
                CallType::Group | CallType::Vcsbk => self.obp_group(src, inbound, clock, out),
            }
            return;
        }
        let name = self.name(src).to_string();
        self.subscribers
            .update(dmrd.rf_src, &name, dmrd.bits.slot, clock.unix_secs());
        match dmrd.bits.call_type {
            CallType::Group | CallType::Vcsbk => self.hbp_group(src, inbound, clock, out),
            CallType::Unit => {
                let new_stream = self
                    .streams
                    .slot(src, dmrd.bits.slot)
                    .map_or(true, |s| s.rx_stream != Some(dmrd.stream_id));
                let data = is_unit_data(dmrd) || (new_stream && dmrd.bits.is_csbk());
                if data || dmrd.dst >= SUBSCRIBER_MIN || !self.endpoint(src).is_some_and(Endpoint::is_master) {
                    self.unit_direct(src, inbound, clock, out);
                    if let Some(slot) = self.streams.slot_mut(src, dmrd.bits.slot) {
                        slot.record_rx(dmrd, clock.mono);
                    }
                } else {
                    self.unit_voice(src, inbound, clock, out);
                }
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn hbp_group(&mut self, src: SystemId, inbound: &Inbound, clock: Clock, out: &mut Outbox) {
        let dmrd = &inbound.dmrd;
        let now = clock.mono;
        let slot = dmrd.bits.slot;
        let stream = dmrd.stream_id;
        let name = self.name(src).to_string();
        let stream_timeout = self.stream_timeout();
        let ua_timer = self.ua_timer(src);
        let Some(state) = self.streams.slot(src, slot) else {
            return;
        };

        if !state.hears(stream) {
            if state.busy_for(dmrd.rf_src, now, stream_timeout) {
                warn!(
                    "({}) packet received with STREAM ID {} <FROM> SUB {} PEER {} <TO> TGID {}, SLOT {} collided with existing call",
                    name,
                    stream,
                    dmrd.rf_src,
                    dmrd.peer,
                    dmrd.dst,
                    slot.number()
                );
                counters::frames_dropped_total("collision");
                return;
            }
            let lc = if dmrd.bits.is_voice_header() {
                self.codec.decode_voice_header_or_terminator(&dmrd.payload)
            } else {
                Lc::group(dmrd.dst, dmrd.rf_src)
            };
            if let Some(state) = self.streams.slot_mut(src, slot) {
                state.begin_rx(now);
                state.rx_lc = lc;
            }
            info!(
                "({}) *CALL START* STREAM ID: {} SUB: {} ({}) PEER: {} ({}) TGID {} ({}), TS {}",
                name,
                stream,
                self.directory.subscriber_alias(dmrd.rf_src),
                dmrd.rf_src,
                self.directory.lookup(dmrd.peer).unwrap_or("-"),
                dmrd.peer,
                self.directory.talkgroup_alias(dmrd.dst),
                dmrd.dst,
                slot.number()
            );
            out.report(ReportEvent::call(
                call_kind(dmrd),
                "START",
                "RX",
                &name,
                stream,
                dmrd.peer,
                dmrd.rf_src,
                slot.number(),
                dmrd.dst,
                None,
            ));
            let auto = dmrd.dst >= 5 && ![REFLECTOR_TG, UNLINK_TG, STATUS_TG].contains(&dmrd.dst);
            if auto && !self.bridges.contains(&dmrd.dst.to_string()) {
                self.bridges.make_single(dmrd.dst, src, slot, ua_timer, now);
                out.report(ReportEvent::BridgesChanged);
            }
        }

        let looped = self.streams.hbp_receiving(src, stream).map(|(id, s)| (self.name(id).to_string(), s));
        let held = self
            .streams
            .obp_holding(src, stream, dmrd.dst)
            .map(|id| self.name(id).to_string());
        let Some(state) = self.streams.slot_mut(src, slot) else {
            return;
        };
        state.packets += 1;
        if stream::rate_exceeded(state.packets, state.rx_start, now) {
            if !state.loop_logged {
                warn!("({}) stream {} exceeds the packet rate, ignoring", name, stream);
                state.loop_logged = true;
            }
            state.hold(stream, now);
            counters::frames_dropped_total("rate");
            return;
        }
        if now.saturating_duration_since(state.rx_start) > SESSION_MAX_AGE {
            if !state.loop_logged {
                warn!(
                    "({}) packet received with STREAM ID {} <FROM> SUB {} <TO> TGID {} exceeds source timeout, ignoring",
                    name, stream, dmrd.rf_src, dmrd.dst
                );
                state.loop_logged = true;
            }
            state.hold(stream, now);
            counters::frames_dropped_total("source_timeout");
            return;
        }
        if let Some((other, other_slot)) = looped {
            if !state.loop_logged {
                warn!(
                    "({}) packet received with STREAM ID {} <FROM> SUB {} <TO> TGID {}, SLOT {} looped from HBP system {} slot {}, ignoring",
                    name,
                    stream,
                    dmrd.rf_src,
                    dmrd.dst,
                    slot.number(),
                    other,
                    other_slot.number()
                );
                state.loop_logged = true;
            }
            state.hold(stream, now);
            counters::frames_dropped_total("loop");
            return;
        }
        if let Some(other) = held {
            if !state.loop_logged {
                warn!(
                    "({}) packet received with STREAM ID {} <FROM> SUB {} <TO> TGID {} already arrived via OBP system {}, ignoring",
                    name, stream, dmrd.rf_src, dmrd.dst, other
                );
                state.loop_logged = true;
            }
            state.hold(stream, now);
            counters::frames_dropped_total("loop");
            return;
        }
        match state.dedup.check(dmrd) {
            Err(dup) => {
                state.loss += 1;
                debug!("({}) stream {}: {}, dropped", name, stream, dup);
                counters::frames_dropped_total(dup.reason());
                return;
            }
            Ok(Some(gap)) => debug!("({}) stream {}: {} packets missing", name, stream, gap),
            Ok(None) => {}
        }
        let options = state.rx_lc.options;
        let source = (src, slot);

        let targets = self.bridges.targets(src, slot, dmrd.dst, true);
        for target in targets {
            self.to_target(source, options, target, inbound, clock, out);
        }

        let Some(state) = self.streams.slot_mut(src, slot) else {
            return;
        };
        if dmrd.bits.is_voice_terminator() && !state.rx_ended {
            let duration = now.saturating_duration_since(state.rx_start).as_secs_f64();
            let packets = state.packets;
            let loss = stream::loss_percent(state.loss, state.packets);
            state.dedup.end_of_call();
            info!(
                "({}) *CALL END* STREAM ID: {} SUB: {} ({}) PEER: {} TGID {} ({}), TS {}, duration: {:.2}, packets: {}, loss: {:.2}%",
                name,
                stream,
                self.directory.subscriber_alias(dmrd.rf_src),
                dmrd.rf_src,
                dmrd.peer,
                self.directory.talkgroup_alias(dmrd.dst),
                dmrd.dst,
                slot.number(),
                duration,
                packets,
                loss
            );
            histograms::call_duration_seconds(duration);
            out.report(ReportEvent::call(
                call_kind(dmrd),
                "END",
                "RX",
                &name,
                stream,
                dmrd.peer,
                dmrd.rf_src,
                slot.number(),
                dmrd.dst,
                Some(duration),
            ));
            let single = self.single_mode(src);
            self.bridges.group_signal(src, slot, dmrd.dst, single, now);
            out.report(ReportEvent::BridgesChanged);
        }
        if let Some(state) = self.streams.slot_mut(src, slot) {
            state.record_rx(dmrd, now);
        }
    }

    #[allow(clippy::too_many_lines)]
    fn obp_group(&mut self, src: SystemId, inbound: &Inbound, clock: Clock, out: &mut Outbox) {
        let dmrd = &inbound.dmrd;
        let now = clock.mono;
        let stream = dmrd.stream_id;
        let name = self.name(src).to_string();

        if self.streams.session(src, stream).is_none() {
            let lc = if dmrd.bits.is_voice_header() {
                self.codec.decode_voice_header_or_terminator(&dmrd.payload)
            } else {
                Lc::group(dmrd.dst, dmrd.rf_src)
            };
            self.streams.open_session(src, stream, StreamSession::new(dmrd, lc, now));
            info!(
                "({}) *CALL START* STREAM ID: {} SUB: {} ({}) PEER: {} TGID {} ({}), TS {}",
                name,
                stream,
                self.directory.subscriber_alias(dmrd.rf_src),
                dmrd.rf_src,
                dmrd.peer,
                self.directory.talkgroup_alias(dmrd.dst),
                dmrd.dst,
                dmrd.bits.slot.number()
            );
            out.report(ReportEvent::call(
                call_kind(dmrd),
                "START",
                "RX",
                &name,
                stream,
                dmrd.peer,
                dmrd.rf_src,
                dmrd.bits.slot.number(),
                dmrd.dst,
                None,
            ));
        }

        let looped_hbp = self.streams.hbp_receiving(src, stream).is_some();
        let winner = {
            let names: Vec<&str> = self.endpoints.iter().map(Endpoint::name).collect();
            self.streams
                .first_seen(stream, dmrd.dst, |id| names.get(id.0).copied().unwrap_or(""))
        };
        let enhanced = self.endpoint(src).is_some_and(|e| e.config.enhanced_obp);
        let Some(session) = self.streams.session_mut(src, stream) else {
            return;
        };
        session.packets += 1;
        session.last = now;
        if session.finished {
            if !session.finish_logged {
                debug!("({}) stream {} already finished, ignoring late packets", name, stream);
                session.finish_logged = true;
            }
            counters::frames_dropped_total("finished");
            return;
        }
        if now.saturating_duration_since(session.start) > SESSION_MAX_AGE {
            if !session.loop_logged {
                warn!("({}) stream {} exceeds source timeout, ignoring", name, stream);
                session.loop_logged = true;
            }
            counters::frames_dropped_total("source_timeout");
            return;
        }
        if looped_hbp || winner != Some(src) {
            if !session.loop_logged {
                warn!(
                    "({}) packet received with STREAM ID {} <FROM> SUB {} <TO> TGID {} is a loop, ignoring",
                    name, stream, dmrd.rf_src, dmrd.dst
                );
                session.loop_logged = true;
            }
            let quench = enhanced && !session.quench_sent;
            session.quench_sent |= quench;
            if quench {
                self.with_obp(src, clock, |link, ctx| link.source_quench(ctx, out, dmrd.dst, stream));
            }
            counters::frames_dropped_total("loop");
            return;
        }
        if stream::rate_exceeded(session.packets, session.start, now) {
            counters::frames_dropped_total("rate");
            return;
        }
        match session.dedup.check(dmrd) {
            Err(dup) => {
                session.loss += 1;
                debug!("({}) stream {}: {}, dropped", name, stream, dup);
                counters::frames_dropped_total(dup.reason());
                return;
            }
            Ok(Some(gap)) => debug!("({}) stream {}: {} packets missing", name, stream, gap),
            Ok(None) => {}
        }
        let options = session.lc.options;

        let stat = self.global.gen_stat_bridges && dmrd.dst >= 5 && dmrd.dst != REFLECTOR_TG;
        if stat && !self.bridges.contains(&dmrd.dst.to_string()) {
            self.bridges.make_stat(dmrd.dst, now);
            out.report(ReportEvent::BridgesChanged);
        }
        let slot = dmrd.bits.slot;
        let targets = self.bridges.targets(src, slot, dmrd.dst, false);
        for target in targets {
            self.to_target((src, slot), options, target, inbound, clock, out);
        }

        if dmrd.bits.is_voice_terminator() {
            let Some(session) = self.streams.session_mut(src, stream) else {
                return;
            };
            session.finished = true;
            session.dedup.end_of_call();
            let duration = now.saturating_duration_since(session.start).as_secs_f64();
            let loss = stream::loss_percent(session.loss, session.packets);
            info!(
                "({}) *CALL END* STREAM ID: {} SUB: {} PEER: {} TGID {}, TS {}, duration: {:.2}, loss: {:.2}%",
                name,
                stream,
                dmrd.rf_src,
                dmrd.peer,
                dmrd.dst,
                slot.number(),
                duration,
                loss
            );
            histograms::call_duration_seconds(duration);
            out.report(ReportEvent::call(
                call_kind(dmrd),
                "END",
                "RX",
                &name,
                stream,
                dmrd.peer,
                dmrd.rf_src,
                slot.number(),
                dmrd.dst,
                Some(duration),
            ));
        }
    }

    /// Marks a contention refusal as logged for the source call; true the
    /// first time.
    fn first_contention(&mut self, src: (SystemId, Slot), stream: u32) -> bool {
        if let Some(session) = self.streams.session_mut(src.0, stream) {
            return !std::mem::replace(&mut session.contention_logged, true);
        }
        self.streams
            .slot_mut(src.0, src.1)
            .is_some_and(|s| !std::mem::replace(&mut s.contention_logged, true))
    }

    #[allow(clippy::too_many_lines)]
    fn to_target(
        &mut self,
        src: (SystemId, Slot),
        options: [u8; 3],
        target: Target,
        inbound: &Inbound,
        clock: Clock,
        out: &mut Outbox,
    ) {
        let dmrd = &inbound.dmrd;
        let now = clock.mono;
        let stream = dmrd.stream_id;
        let tname = self.name(target.system).to_string();
        let lc = Lc {
            options,
            dst: target.tgid,
            src: dmrd.rf_src,
        };

        if self.is_obp(target.system) {
            let usable = self
                .with_obp(target.system, clock, |link, ctx| {
                    !link.quenched(target.tgid, stream) && link.alive(ctx)
                })
                .unwrap_or(false);
            if !usable {
                trace!("({}) stream {} quenched or link down, not sent", tname, stream);
                return;
            }
            let acls = self.endpoint(target.system).map(|e| &e.acls);
            let global_ok = !self.global_acls.enabled || self.global_acls.tg1.check(target.tgid);
            let system_ok = acls.map_or(true, |a| !a.enabled || a.tgid.check(target.tgid));
            if !global_ok || !system_ok {
                debug!("({}) TGID {} refused by ACL, not sent", tname, target.tgid);
                counters::frames_dropped_total("acl_out");
                return;
            }
            if self.streams.tx_session_mut(target.system, stream).is_none() {
                let lcs = LcSet::new(&self.codec, lc);
                self.streams.open_tx_session(
                    target.system,
                    stream,
                    TxSession {
                        start: now,
                        last: now,
                        tgid: target.tgid,
                        lcs,
                    },
                );
                info!(
                    "({}) conference bridge call start, STREAM ID {} SUB {} TGID {}",
                    tname, stream, dmrd.rf_src, target.tgid
                );
                out.report(ReportEvent::call(
                    call_kind(dmrd),
                    "START",
                    "TX",
                    &tname,
                    stream,
                    dmrd.peer,
                    dmrd.rf_src,
                    1,
                    target.tgid,
                    None,
                ));
            }
            let Some(session) = self.streams.tx_session_mut(target.system, stream) else {
                return;
            };
            session.last = now;
            let mut frame = dmrd.clone();
            frame.dst = target.tgid;
            frame.bits = frame.bits.with_slot(Slot::One);
            session.lcs.rewrite(&mut frame);
            let duration = now.saturating_duration_since(session.start).as_secs_f64();
            let out_frame = OutFrame {
                dmrd: &frame,
                hops: inbound.hops,
                source_server: inbound.source_server,
                source_repeater: inbound.source_repeater,
            };
            self.send_to(target.system, &out_frame, clock, out);
            if frame.bits.is_voice_terminator() {
                info!(
                    "({}) conference bridge call end, STREAM ID {} TGID {}, duration {:.2}",
                    tname, stream, target.tgid, duration
                );
                out.report(ReportEvent::call(
                    call_kind(dmrd),
                    "END",
                    "TX",
                    &tname,
                    stream,
                    dmrd.peer,
                    dmrd.rf_src,
                    1,
                    target.tgid,
                    Some(duration),
                ));
            }
            return;
        }

        let hang = self.hangtime(target.system);
        let stream_timeout = self.stream_timeout();
        let Some(state) = self.streams.slot(target.system, target.slot) else {
            return;
        };
        if state.tx_stream != Some(stream) {
            if let Some(c) = state.contention(target.tgid, dmrd.rf_src, now, hang, stream_timeout) {
                if self.first_contention(src, stream) {
                    info!(
                        "({}) call not routed to TGID {}, TS {}: {}",
                        tname,
                        target.tgid,
                        target.slot.number(),
                        c
                    );
                }
                counters::frames_dropped_total("contention");
                return;
            }
        }
        let codec = self.codec;
        let Some(state) = self.streams.slot_mut(target.system, target.slot) else {
            return;
        };
        let started = state.begin_tx(stream, target.tgid, dmrd.rf_src, dmrd.peer, || LcSet::new(&codec, lc), now);
        state.record_tx(dmrd, now);
        let mut frame = dmrd.clone();
        frame.dst = target.tgid;
        if frame.bits.slot != target.slot {
            frame.bits = frame.bits.with_slot(target.slot);
        }
        if let Some(lcs) = &state.tx_lc {
            lcs.rewrite(&mut frame);
        }
        let duration = now.saturating_duration_since(state.tx_start).as_secs_f64();
        if started {
            info!(
                "({}) conference bridge call start, STREAM ID {} SUB {} TGID {}, TS {}",
                tname,
                stream,
                dmrd.rf_src,
                target.tgid,
                target.slot.number()
            );
            out.report(ReportEvent::call(
                call_kind(dmrd),
                "START",
                "TX",
                &tname,
                stream,
                dmrd.peer,
                dmrd.rf_src,
                target.slot.number(),
                target.tgid,
                None,
            ));
        }
        let out_frame = OutFrame {
            dmrd: &frame,
            hops: inbound.hops,
            source_server: inbound.source_server,
            source_repeater: inbound.source_repeater,
        };
        self.send_to(target.system, &out_frame, clock, out);
        if frame.bits.is_voice_terminator() {
            out.report(ReportEvent::call(
                call_kind(dmrd),
                "END",
                "TX",
                &tname,
                stream,
                dmrd.peer,
                dmrd.rf_src,
                target.slot.number(),
                target.tgid,
                Some(duration),
            ));
        }
    }

    /// Private voice call to a service number on a master: reflector
    /// selection, status query or an on-demand prompt.
    fn unit_voice(&mut self, src: SystemId, inbound: &Inbound, clock: Clock, out: &mut Outbox) {
        let dmrd = &inbound.dmrd;
        let now = clock.mono;
        let slot = dmrd.bits.slot;
        let dst = dmrd.dst;
        let name = self.name(src).to_string();
        let ua_timer = self.ua_timer(src);
        let Some(state) = self.streams.slot_mut(src, slot) else {
            return;
        };

        if state.rx_stream != Some(dmrd.stream_id) {
            state.begin_rx(now);
            state.stop_announce = false;
            info!(
                "({}) *UNIT CALL START* STREAM ID: {} SUB: {} PEER: {} UNIT {}, TS {}",
                name,
                dmrd.stream_id,
                dmrd.rf_src,
                dmrd.peer,
                dst,
                slot.number()
            );
            out.report(ReportEvent::call(
                "UNIT VOICE",
                "START",
                "RX",
                &name,
                dmrd.stream_id,
                dmrd.peer,
                dmrd.rf_src,
                slot.number(),
                dst,
                None,
            ));
            if (5..=999_999).contains(&dst) && dst != 8 && dst != REFLECTOR_TG {
                let reserved = (UNLINK_TG..=STATUS_TG).contains(&dst) || in_ondemand_range(dst);
                if !reserved && !self.bridges.contains(&bridge::reflector_name(dst)) {
                    self.bridges.make_reflector(dst, ua_timer, src, now);
                    out.report(ReportEvent::BridgesChanged);
                }
            }
            if dst > 5 && dst != REFLECTOR_TG && dst != STATUS_TG && !in_ondemand_range(dst) {
                self.bridges.dial_reflector(src, slot, dst, now);
                out.report(ReportEvent::BridgesChanged);
            }
        }

        let Some(state) = self.streams.slot_mut(src, slot) else {
            return;
        };
        if dmrd.bits.is_voice_terminator() && !state.rx_ended {
            let duration = now.saturating_duration_since(state.rx_start).as_secs_f64();
            let mut stop = state.stop_announce;
            info!(
                "({}) *UNIT CALL END* STREAM ID: {} SUB: {} UNIT {}, TS {}, duration: {:.2}",
                name,
                dmrd.stream_id,
                dmrd.rf_src,
                dst,
                slot.number(),
                duration
            );
            out.report(ReportEvent::call(
                "UNIT VOICE",
                "END",
                "RX",
                &name,
                dmrd.stream_id,
                dmrd.peer,
                dmrd.rf_src,
                slot.number(),
                dst,
                Some(duration),
            ));

            let mut words = announce::words(["silence"]);
            match dst {
                d if d <= 5 || d == REFLECTOR_TG => {
                    words.extend(announce::words(["busy", "silence"]));
                    stop = true;
                }
                8 => words.extend(announce::words(["busy", "silence"])),
                UNLINK_TG => words.extend(announce::words(["notlinked", "silence"])),
                STATUS_TG => match self.bridges.linked_reflector(src, slot) {
                    Some(r) => {
                        words.extend(announce::words(["silence", "linkedto", "silence", "to", "silence", "silence"]));
                        announce::push_digits(&mut words, r);
                    }
                    None => words.extend(announce::words(["notlinked", "silence"])),
                },
                d if in_ondemand_range(d) => {
                    words.push(format!("ondemand/{d}"));
                    stop = true;
                }
                d if !stop => {
                    words.extend(announce::words(["linkedto", "silence", "to", "silence", "silence"]));
                    announce::push_digits(&mut words, d);
                }
                _ => {}
            }
            if let Some(state) = self.streams.slot_mut(src, slot) {
                state.stop_announce = stop;
            }
            let lang = self.language(src);
            out.announce(SpeechRequest::prompt(src, &lang, words));
        }
        if let Some(state) = self.streams.slot_mut(src, slot) {
            state.record_rx(dmrd, now);
            state.packets += 1;
        }
    }

    /// Unit data and private calls to radio ids: at most one direct HBP
    /// target plus the data gateway and OpenBridge links.
    fn unit_direct(&mut self, src: SystemId, inbound: &Inbound, clock: Clock, out: &mut Outbox) {
        let dmrd = &inbound.dmrd;
        let now = clock.mono;
        let dst = dmrd.dst;
        let data = is_unit_data(dmrd) || dmrd.bits.is_csbk();
        let first = self.unit_log.first(dmrd.stream_id);
        let mut obp: Vec<SystemId> = Vec::new();

        if data && self.global.data_gateway {
            if let Some(gw) = self.id_of(DATA_GATEWAY).filter(|id| *id != src && self.is_obp(*id)) {
                obp.push(gw);
            }
        }
        if dst >= SUBSCRIBER_MIN {
            for ep in self.endpoints.iter().filter(|e| e.id != src) {
                if let Role::OpenBridge(link) = &ep.role {
                    if link.version() > 1 && !obp.contains(&ep.id) {
                        obp.push(ep.id);
                    }
                }
            }
        }

        let direct = self.direct_target(src, dmrd, now);

        for id in obp {
            let mut frame = dmrd.clone();
            frame.bits = frame.bits.with_slot(Slot::One);
            let out_frame = OutFrame {
                dmrd: &frame,
                hops: inbound.hops,
                source_server: inbound.source_server,
                source_repeater: inbound.source_repeater,
            };
            if self.send_to(id, &out_frame, clock, out) && first {
                out.report(self.unit_event(id, dmrd, 1));
            }
        }
        if let Some((id, slot)) = direct {
            let mut frame = dmrd.clone();
            frame.bits = frame.bits.with_slot(slot);
            let codec = self.codec;
            if let Some(state) = self.streams.slot_mut(id, slot) {
                let opts = if data { LC_OPT_GROUP } else { LC_OPT_UNIT };
                let lc = Lc {
                    options: opts,
                    dst,
                    src: dmrd.rf_src,
                };
                state.begin_tx(dmrd.stream_id, dst, dmrd.rf_src, dmrd.peer, || LcSet::new(&codec, lc), now);
                state.record_tx(&frame, now);
            }
            let out_frame = OutFrame {
                dmrd: &frame,
                hops: inbound.hops,
                source_server: inbound.source_server,
                source_repeater: inbound.source_repeater,
            };
            if self.send_to(id, &out_frame, clock, out) && first {
                out.report(self.unit_event(id, dmrd, slot.number()));
            }
        }
    }

    fn unit_event(&self, target: SystemId, dmrd: &Dmrd, slot: u8) -> ReportEvent {
        let kind = call_kind(dmrd);
        let phase = if is_unit_data(dmrd) { "DATA" } else { "START" };
        ReportEvent::call(
            kind,
            phase,
            "TX",
            self.name(target),
            dmrd.stream_id,
            dmrd.peer,
            dmrd.rf_src,
            slot,
            dmrd.dst,
            None,
        )
    }

    fn direct_target(&self, src: SystemId, dmrd: &Dmrd, now: Instant) -> Option<(SystemId, Slot)> {
        let dst = dmrd.dst;
        if let Some(loc) = self.subscribers.get(dst) {
            let id = self.id_of(&loc.system)?;
            if id == src || self.is_obp(id) {
                return None;
            }
            return self.slot_idle(id, loc.slot, now).then_some((id, loc.slot));
        }
        if dst == APRS_TG {
            let id = self.id_of(APRS_GATEWAY).filter(|id| *id != src && self.master(*id).is_some())?;
            let slot = dmrd.bits.slot;
            return self.slot_idle(id, slot, now).then_some((id, slot));
        }
        if dst < SUBSCRIBER_MIN || dst > 9_999_999 {
            return None;
        }
        self.master_ids().into_iter().filter(|id| *id != src).find_map(|id| {
            let m = self.master(id)?;
            let hit = m.peers().any(|p| {
                p.state == PeerState::Yes && first_digits(p.radio_id, SUBSCRIBER_PREFIX_DIGITS) == dst
            });
            (hit && self.slot_idle(id, Slot::Two, now)).then_some((id, Slot::Two))
        })
    }

    /// Sends one paced announcement frame, registering it as the slot's
    /// transmit stream.
    pub fn speech_frame(&mut self, frame: &SpeechFrame, clock: Clock, out: &mut Outbox) {
        let dmrd = &frame.dmrd;
        let now = clock.mono;
        let codec = self.codec;
        if let Some(state) = self.streams.slot_mut(frame.system, dmrd.bits.slot) {
            let lc = Lc::group(dmrd.dst, dmrd.rf_src);
            state.begin_tx(dmrd.stream_id, dmrd.dst, dmrd.rf_src, dmrd.peer, || LcSet::new(&codec, lc), now);
            state.record_tx(dmrd, now);
        }
        let out_frame = OutFrame {
            dmrd,
            hops: None,
            source_server: self.global.server_id,
            source_repeater: 0,
        };
        self.send_to(frame.system, &out_frame, clock, out);
    }

    /// Keepalive and timeout handling for every system.
    pub fn maintain(&mut self, clock: Clock, out: &mut Outbox) {
        let Self {
            endpoints,
            global,
            global_acls,
            directory,
            ..
        } = self;
        for ep in endpoints.iter_mut() {
            let (link, ctx) = ep.split(global, global_acls, directory, clock);
            link.maintain(&ctx, out);
        }
    }

    /// Sends `BCKA` on every enhanced OpenBridge link.
    pub fn obp_keepalive(&mut self, clock: Clock, out: &mut Outbox) {
        for id in (0..self.endpoints.len()).map(SystemId) {
            self.with_obp(id, clock, |link, ctx| link.keepalive(ctx, out));
        }
    }

    /// Sends `BCVE` on every enhanced OpenBridge link.
    pub fn announce_versions(&mut self, clock: Clock, out: &mut Outbox) {
        for id in (0..self.endpoints.len()).map(SystemId) {
            self.with_obp(id, clock, |link, ctx| link.announce_version(ctx, out));
        }
    }

    /// Runs the bridge timers and removes unused bridges. Masters whose
    /// reflector link timed out hear where they are now.
    pub fn rule_timer(&mut self, clock: Clock, out: &mut Outbox) {
        let unlinked = self.bridges.rule_timer(clock.mono);
        for id in unlinked {
            let Some(m) = self.master(id) else {
                continue;
            };
            let reflector = m.settings().default_reflector;
            let mut words = announce::words(["silence", "silence"]);
            if reflector > 0 {
                words.extend(announce::words(["silence", "linkedto", "silence", "to", "silence", "silence"]));
                announce::push_digits(&mut words, reflector);
            } else {
                words.push("notlinked".to_string());
            }
            words.push("silence".to_string());
            debug!("({}) sending disconnected voice", self.name(id));
            out.announce(SpeechRequest::prompt(id, &self.language(id), words));
        }
        gauges::set_bridges_active(self.bridges.len());
        out.report(ReportEvent::BridgesChanged);
    }

    /// Removes OpenBridge-created bridges nothing uses.
    pub fn stat_trim(&mut self, out: &mut Outbox) {
        if !self.global.gen_stat_bridges {
            return;
        }
        let removed = self.bridges.stat_trim();
        if removed > 0 {
            info!("(ROUTER) trimmed {} STAT bridges", removed);
            gauges::set_bridges_active(self.bridges.len());
            out.report(ReportEvent::BridgesChanged);
        }
    }

    /// Times out quiet calls.
    pub fn trim_streams(&mut self, clock: Clock, out: &mut Outbox) {
        for expired in self.streams.trim(clock.mono) {
            match expired {
                Expired::Rx {
                    system,
                    slot,
                    stream,
                    rf_src,
                    tgid,
                    peer,
                    duration,
                    loss,
                } => {
                    info!(
                        "({}) *TIME OUT* STREAM ID: {} SUB: {} PEER: {} TGID: {} TS {}, duration: {:.2}, loss: {:.2}%",
                        self.name(system),
                        stream,
                        rf_src,
                        peer,
                        tgid,
                        slot.number(),
                        duration,
                        loss
                    );
                    out.report(ReportEvent::call(
                        "GROUP VOICE",
                        "END",
                        "RX",
                        self.name(system),
                        stream,
                        peer,
                        rf_src,
                        slot.number(),
                        tgid,
                        Some(duration),
                    ));
                }
                Expired::Tx {
                    system,
                    slot,
                    stream,
                    rf_src,
                    tgid,
                    peer,
                    duration,
                } => {
                    debug!("({}) *TIME OUT* TX STREAM ID: {} TGID: {}", self.name(system), stream, tgid);
                    out.report(ReportEvent::call(
                        "GROUP VOICE",
                        "END",
                        "TX",
                        self.name(system),
                        stream,
                        peer,
                        rf_src,
                        slot.number(),
                        tgid,
                        Some(duration),
                    ));
                }
                Expired::Lost {
                    system,
                    stream,
                    rf_src,
                    tgid,
                    peer,
                    duration,
                    loss,
                    quenched,
                } => {
                    info!(
                        "({}) *LOST* STREAM ID: {} SUB: {} PEER: {} TGID: {}, duration: {:.2}, loss: {:.2}%{}",
                        self.name(system),
                        stream,
                        rf_src,
                        peer,
                        tgid,
                        duration,
                        loss,
                        if quenched { ", quenched" } else { "" }
                    );
                    out.report(ReportEvent::call(
                        "GROUP VOICE",
                        "END",
                        "RX",
                        self.name(system),
                        stream,
                        peer,
                        rf_src,
                        1,
                        tgid,
                        Some(duration),
                    ));
                }
                Expired::Removed { system, stream } => {
                    trace!("({}) stream {} removed", self.name(system), stream);
                    self.with_obp(system, clock, |link, _| link.clear_quench(stream));
                }
            }
        }
        gauges::set_streams_active(self.streams.active());
    }

    /// Links the default reflector and static talkgroups of `settings`,
    /// releasing those of `previous` that are no longer wanted.
    fn apply_settings(&mut self, id: SystemId, previous: Option<&MasterSettings>, settings: &MasterSettings, now: Instant) {
        let timer = settings.default_ua_timer;
        self.bridges.set_ua_timer(id, timer);
        if let Some(prev) = previous {
            if prev.default_reflector != settings.default_reflector && prev.default_reflector > 0 {
                self.bridges.reset_default_reflector(id, prev.default_reflector, timer, now);
            }
            for (slot, old, new) in [
                (Slot::One, &prev.ts1_static, &settings.ts1_static),
                (Slot::Two, &prev.ts2_static, &settings.ts2_static),
            ] {
                for tg in old.iter().filter(|tg| !new.contains(tg)) {
                    self.bridges.reset_static(id, *tg, slot, timer, now);
                }
            }
        }
        if settings.default_reflector > 0 {
            self.bridges.set_default_reflector(id, settings.default_reflector, timer, now);
        }
        for (slot, list) in [(Slot::One, &settings.ts1_static), (Slot::Two, &settings.ts2_static)] {
            for tg in list {
                self.bridges.set_static(id, *tg, slot, timer, now);
            }
        }
    }

    /// Applies repeater `OPTIONS` to each master, or restores its defaults
    /// once its last peer has gone.
    pub fn apply_options(&mut self, clock: Clock, out: &mut Outbox) {
        let now = clock.mono;
        let languages: Vec<String> = self.languages.clone();
        let langs: Vec<&str> = languages.iter().map(String::as_str).collect();
        for id in self.master_ids() {
            let name = self.name(id).to_string();
            let Some(m) = self.master_mut(id) else {
                continue;
            };
            if m.take_reset() {
                let defaults = m.defaults().clone();
                m.set_settings(defaults.clone());
                info!("({}) resetting options to defaults", name);
                self.bridges.remove_system(id);
                self.bridges.fill_all(now);
                self.apply_settings(id, None, &defaults, now);
                out.report(ReportEvent::BridgesChanged);
                out.report(ReportEvent::ConfigChanged);
                continue;
            }
            let Some(text) = m.options() else {
                continue;
            };
            let current = m.settings().clone();
            let next = match current.with_options(text, &langs) {
                Ok(next) => next,
                Err(e) => {
                    warn!("({}) bad options {:?}: {}", name, text, e);
                    continue;
                }
            };
            if next == current {
                continue;
            }
            m.set_settings(next.clone());
            info!("({}) applying options {}", name, next.to_options());
            if next.default_ua_timer != current.default_ua_timer {
                self.bridges.set_ua_timer(id, next.default_ua_timer);
                self.bridges.remove_system(id);
                self.bridges.fill_all(now);
                self.apply_settings(id, None, &next, now);
            } else {
                self.apply_settings(id, Some(&current), &next, now);
            }
            out.report(ReportEvent::BridgesChanged);
            out.report(ReportEvent::ConfigChanged);
        }
    }

    /// Periodic voice ident on single-peer masters whose slot 2 is quiet.
    pub fn ident(&mut self, clock: Clock, out: &mut Outbox) {
        let now = clock.mono;
        let quiet = |t: Option<Instant>| t.map_or(true, |t| now.saturating_duration_since(t) > IDENT_IDLE);
        for id in self.master_ids() {
            let Some(ep) = self.endpoint(id) else {
                continue;
            };
            let Some(m) = self.master(id) else {
                continue;
            };
            let settings = m.settings();
            if !settings.voice_ident || ep.config.max_peers > 1 {
                continue;
            }
            let Some(callsign) = m
                .peers()
                .find(|p| p.state == PeerState::Yes && !p.meta.callsign.trim().is_empty())
                .map(|p| p.meta.callsign.trim().to_lowercase())
            else {
                continue;
            };
            let idle = self
                .streams
                .slot(id, Slot::Two)
                .is_some_and(|s| s.rx_ended && s.tx_ended && quiet(s.rx_time) && quiet(s.tx_time));
            if !idle {
                continue;
            }
            let mut words = announce::words(["silence", "silence", "silence", "this-is", "silence"]);
            for c in callsign.chars().filter(char::is_ascii_alphanumeric) {
                words.push(c.to_string());
                words.push("silence".to_string());
            }
            let mut req = SpeechRequest::prompt(id, &self.language(id), words);
            req.dst = if settings.override_ident_tg > 0 {
                settings.override_ident_tg
            } else {
                ALL_CALL
            };
            req.peer = self.global.server_id;
            info!("({}) sending voice ident for {}", self.name(id), callsign);
            out.announce(req);
        }
    }

    /// Drops subscriber locations older than a day.
    pub fn trim_subscribers(&mut self, clock: Clock) -> usize {
        self.subscribers.trim(clock.unix_secs())
    }

    /// Writes the subscriber map.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_subscribers(&self, path: &Path) -> Result<(), DmrlinkError> {
        self.subscribers.save(path)
    }

    /// Records a fresh resolution of `id`'s remote host.
    pub fn set_target(&mut self, id: SystemId, addr: SocketAddr, clock: Clock) {
        let Self {
            endpoints,
            global,
            global_acls,
            directory,
            ..
        } = self;
        let Some(ep) = endpoints.get_mut(id.0) else {
            return;
        };
        let ctx = LinkContext {
            id: ep.id,
            config: &ep.config,
            acls: &ep.acls,
            global,
            global_acls,
            directory,
            clock,
        };
        match &mut ep.role {
            Role::Peer(p) => p.set_master(&ctx, addr),
            Role::OpenBridge(o) => o.set_target(&ctx, addr),
            Role::Master(_) => {}
        }
    }

    /// Sends every system's disconnect frames.
    pub fn deregister_all(&mut self, clock: Clock, out: &mut Outbox) {
        let Self {
            endpoints,
            global,
            global_acls,
            directory,
            ..
        } = self;
        for ep in endpoints.iter_mut() {
            let (link, ctx) = ep.split(global, global_acls, directory, clock);
            link.deregister(&ctx, out);
        }
    }

    /// Systems and their peers as served to report clients.
    #[must_use]
    pub fn config_snapshot(&self) -> Value {
        let mut systems = BTreeMap::new();
        for ep in &self.endpoints {
            let body = match &ep.role {
                Role::Master(m) => {
                    let peers: BTreeMap<String, Value> = m
                        .peers()
                        .map(|p| {
                            (
                                p.radio_id.to_string(),
                                json!({
                                    "callsign": p.meta.callsign.trim(),
                                    "ip": p.addr.ip().to_string(),
                                    "port": p.addr.port(),
                                    "state": p.state.to_string(),
                                    "connected": p.connected,
                                    "pings_received": p.pings_received,
                                    "location": p.meta.location.trim(),
                                    "software_id": p.meta.software_id.trim(),
                                    "package_id": p.meta.package_id.trim(),
                                }),
                            )
                        })
                        .collect();
                    json!({ "mode": "MASTER", "peers": peers, "settings": m.settings() })
                }
                Role::Peer(p) => {
                    let stats = p.stats();
                    json!({
                        "mode": if ep.config.mode == Mode::XlxPeer { "XLXPEER" } else { "PEER" },
                        "state": p.state().to_string(),
                        "master": p.master().map(|a| a.to_string()),
                        "connected": stats.connected,
                        "pings_sent": stats.pings_sent,
                        "pings_ackd": stats.pings_ackd,
                    })
                }
                Role::OpenBridge(o) => json!({
                    "mode": "OPENBRIDGE",
                    "version": o.version(),
                    "target": o.target().map(|a| a.to_string()),
                    "stunned": o.is_stunned(),
                    "quenched": o.quench_len(),
                }),
            };
            systems.insert(ep.name().to_string(), body);
        }
        json!(systems)
    }

    /// The bridge table as served to report clients.
    #[must_use]
    pub fn bridge_snapshot(&self, now: Instant) -> Value {
        json!(self.bridges.snapshot(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SystemConfig, TimeoutType};
    use dmr_common::crypto;
    use dmr_common::frame::{FrameBits, HbpFrame, PeerMetadata};
    use dmr_common::lc::HEADER_TEMPLATE;
    use dmr_common::openbridge::{self as obp, ObpEnvelope};
    use dmr_common::types::DT_VOICE_TERM;

    const PEER_A: DmrId = 312_000_101;
    const PEER_B: DmrId = 312_000_202;
    const SUB: DmrId = 3_120_001;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn master(name: &str) -> SystemConfig {
        let mut cfg = SystemConfig::new(name, Mode::Master);
        cfg.passphrase = "passw0rd".to_string();
        cfg.allow_unreg_id = true;
        cfg.max_peers = 1;
        cfg
    }

    fn openbridge(name: &str, network_id: DmrId, port: u16) -> SystemConfig {
        let mut cfg = SystemConfig::new(name, Mode::OpenBridge);
        cfg.passphrase = "obp-secret".to_string();
        cfg.network_id = network_id;
        cfg.target_ip = "127.0.0.1".to_string();
        cfg.target_port = port;
        cfg.proto_ver = 5;
        cfg
    }

    fn network(systems: Vec<SystemConfig>) -> NetworkConfig {
        let mut cfg = NetworkConfig {
            global: GlobalConfig::default(),
            reports: Default::default(),
            logger: Default::default(),
            aliases: Default::default(),
            system: systems,
            bridge: Vec::new(),
        };
        cfg.global.server_id = 2341;
        cfg
    }

    struct Harness {
        router: Router,
        clock: Clock,
    }

    impl Harness {
        fn new(cfg: &NetworkConfig) -> Self {
            let clock = Clock::system();
            let router = Router::new(cfg, Directory::default(), SubscriberMap::new(), clock.mono).unwrap();
            Self { router, clock }
        }

        fn advance(&mut self, d: Duration) {
            self.clock = self.clock.advance(d);
        }

        fn recv(&mut self, id: SystemId, data: &[u8], from: SocketAddr) -> Outbox {
            let mut out = Outbox::new();
            self.router.receive(id, data, from, self.clock, &mut out);
            out
        }

        /// Logs a repeater in to master `id`.
        fn login(&mut self, id: SystemId, peer_id: DmrId, from: SocketAddr) {
            let out = self.recv(id, &HbpFrame::Login { peer_id }.serialize(), from);
            let salt = u32::from_be_bytes(out.datagrams()[0].bytes[6..10].try_into().unwrap());
            let hash = crypto::challenge_response(salt, b"passw0rd");
            self.recv(id, &HbpFrame::AuthResponse { peer_id, hash }.serialize(), from);
            let meta = PeerMetadata {
                callsign: "G0ABC".to_string(),
                ..PeerMetadata::default()
            };
            let out = self.recv(
                id,
                &HbpFrame::Config {
                    peer_id,
                    meta: Box::new(meta),
                }
                .serialize(),
                from,
            );
            assert_eq!(&out.datagrams()[0].bytes[..6], b"RPTACK");
        }
    }

    fn voice(seq: u8, dst: DmrId, peer: DmrId, stream: u32, slot: Slot, vseq: u8) -> Dmrd {
        Dmrd {
            seq,
            rf_src: SUB,
            dst,
            peer,
            bits: FrameBits {
                slot,
                call_type: CallType::Group,
                frame_type: if vseq == 0 { FrameType::VoiceSync } else { FrameType::Voice },
                dtype_vseq: vseq,
            },
            stream_id: stream,
            payload: [seq; 33],
            ber: 0,
            rssi: 0,
        }
    }

    fn header(dst: DmrId, peer: DmrId, stream: u32, slot: Slot) -> Dmrd {
        let mut d = voice(0, dst, peer, stream, slot, 0);
        d.bits = FrameBits::voice_header(slot);
        d.payload = HEADER_TEMPLATE;
        d
    }

    fn terminator(seq: u8, dst: DmrId, peer: DmrId, stream: u32, slot: Slot) -> Dmrd {
        let mut d = voice(seq, dst, peer, stream, slot, 0);
        d.bits = FrameBits {
            slot,
            call_type: CallType::Group,
            frame_type: FrameType::DataSync,
            dtype_vseq: DT_VOICE_TERM,
        };
        d.payload = dmr_common::lc::TERMINATOR_TEMPLATE;
        d
    }

    fn sent_to(out: &Outbox, to: SocketAddr) -> Vec<Dmrd> {
        out.datagrams()
            .iter()
            .filter(|d| d.addr == to && d.bytes.starts_with(b"DMRD"))
            .filter_map(|d| Dmrd::parse(&d.bytes).ok())
            .collect()
    }

    fn two_masters() -> (Harness, SystemId, SystemId) {
        let cfg = network(vec![master("MASTER-A"), master("MASTER-B")]);
        let mut h = Harness::new(&cfg);
        let (a, b) = (SystemId(0), SystemId(1));
        h.login(a, PEER_A, addr(50001));
        h.login(b, PEER_B, addr(50002));
        (h, a, b)
    }

    fn activate(h: &mut Harness, sys: SystemId, tg: DmrId, slot: Slot) {
        let now = h.clock.mono;
        h.router.bridges.set_static(sys, tg, slot, 10, now);
    }

    #[test]
    fn group_call_fans_out_to_active_member() {
        let (mut h, a, b) = two_masters();
        activate(&mut h, a, 91, Slot::One);
        activate(&mut h, b, 91, Slot::One);
        let out = h.recv(a, &header(91, PEER_A, 0x1001, Slot::One).serialize(), addr(50001));
        assert!(h.router.bridges().contains("91"));
        let frames = sent_to(&out, addr(50002));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dst, 91);
        assert_eq!(frames[0].peer, PEER_B);
        let lc = BptcLcCodec.decode_voice_header_or_terminator(&frames[0].payload);
        assert_eq!(lc.dst, 91);
        assert_eq!(lc.src, SUB);
        assert!(out
            .events()
            .contains(&ReportEvent::Bridge(format!("GROUP VOICE,START,RX,MASTER-A,{},{},{},1,91", 0x1001, PEER_A, SUB))));
    }

    #[test]
    fn duplicate_frame_forwards_once() {
        let (mut h, a, b) = two_masters();
        activate(&mut h, a, 91, Slot::One);
        activate(&mut h, b, 91, Slot::One);
        h.recv(a, &header(91, PEER_A, 0x1002, Slot::One).serialize(), addr(50001));
        h.advance(Duration::from_millis(60));
        let burst = voice(1, 91, PEER_A, 0x1002, Slot::One, 1).serialize();
        let first = h.recv(a, &burst, addr(50001));
        h.advance(Duration::from_millis(60));
        let second = h.recv(a, &burst, addr(50001));
        assert_eq!(sent_to(&first, addr(50002)).len(), 1);
        assert!(sent_to(&second, addr(50002)).is_empty());
        assert_eq!(h.router.streams().slot(a, Slot::One).unwrap().loss, 1);
    }

    #[test]
    fn target_slot_is_rewritten() {
        let (mut h, a, b) = two_masters();
        activate(&mut h, a, 91, Slot::One);
        activate(&mut h, b, 91, Slot::Two);
        let out = h.recv(a, &header(91, PEER_A, 0x1003, Slot::One).serialize(), addr(50001));
        let frames = sent_to(&out, addr(50002));
        assert_eq!(frames[0].bits.slot, Slot::Two);
    }

    #[test]
    fn busy_target_slot_is_not_used() {
        let (mut h, a, b) = two_masters();
        activate(&mut h, a, 91, Slot::One);
        activate(&mut h, b, 91, Slot::One);
        activate(&mut h, a, 92, Slot::One);
        h.recv(b, &header(92, PEER_B, 0x2000, Slot::One).serialize(), addr(50002));
        h.advance(Duration::from_millis(30));
        let out = h.recv(a, &header(91, PEER_A, 0x2001, Slot::One).serialize(), addr(50001));
        assert!(sent_to(&out, addr(50002)).is_empty());
    }

    #[test]
    fn first_call_activates_source_member() {
        let (mut h, a, b) = two_masters();
        activate(&mut h, b, 91, Slot::One);
        let out = h.recv(a, &header(91, PEER_A, 0x1004, Slot::One).serialize(), addr(50001));
        assert!(sent_to(&out, addr(50002)).is_empty());
        h.advance(Duration::from_secs(2));
        let out = h.recv(a, &terminator(1, 91, PEER_A, 0x1004, Slot::One).serialize(), addr(50001));
        assert!(out
            .events()
            .iter()
            .any(|e| matches!(e, ReportEvent::Bridge(s) if s.starts_with("GROUP VOICE,END,RX,MASTER-A"))));
        assert!(h.router.streams().slot(a, Slot::One).unwrap().rx_ended);
        let m = h.router.bridges().member("91", a, Slot::One).unwrap();
        assert!(m.active);
        assert_eq!(m.timer, h.clock.mono + Duration::from_secs(600));

        h.advance(Duration::from_secs(15));
        let out = h.recv(a, &header(91, PEER_A, 0x1005, Slot::One).serialize(), addr(50001));
        assert_eq!(sent_to(&out, addr(50002)).len(), 1);
    }

    #[test]
    fn looped_hbp_stream_is_ignored() {
        let (mut h, a, b) = two_masters();
        activate(&mut h, a, 91, Slot::One);
        activate(&mut h, b, 91, Slot::One);
        h.recv(a, &header(91, PEER_A, 0x3000, Slot::One).serialize(), addr(50001));
        let mut starts = 0;
        for seq in 1..=3 {
            h.advance(Duration::from_millis(60));
            let out = h.recv(b, &voice(seq, 91, PEER_B, 0x3000, Slot::One, seq).serialize(), addr(50002));
            assert!(sent_to(&out, addr(50001)).is_empty());
            starts += out
                .events()
                .iter()
                .filter(|e| matches!(e, ReportEvent::Bridge(s) if s.starts_with("GROUP VOICE,START,RX,MASTER-B")))
                .count();
        }
        assert_eq!(starts, 1);
        let looped = h.router.streams.slot(b, Slot::One).unwrap();
        assert!(looped.loop_logged);
        assert_eq!(looped.packets, 3);
        assert_eq!(looped.held_time, Some(h.clock.mono));

        // The original source keeps flowing.
        h.advance(Duration::from_millis(60));
        let out = h.recv(a, &voice(1, 91, PEER_A, 0x3000, Slot::One, 1).serialize(), addr(50001));
        assert_eq!(sent_to(&out, addr(50002)).len(), 1);
    }

    #[test]
    fn repeated_silence_bursts_are_forwarded() {
        let (mut h, a, b) = two_masters();
        activate(&mut h, a, 91, Slot::One);
        activate(&mut h, b, 91, Slot::One);
        h.recv(a, &header(91, PEER_A, 0x3100, Slot::One).serialize(), addr(50001));
        let mut forwarded = 0;
        for seq in 1..=12u8 {
            h.advance(Duration::from_millis(60));
            let vseq = (seq - 1) % 6;
            let mut burst = voice(seq, 91, PEER_A, 0x3100, Slot::One, vseq);
            burst.payload = [vseq; 33];
            let out = h.recv(a, &burst.serialize(), addr(50001));
            forwarded += sent_to(&out, addr(50002)).len();
        }
        assert_eq!(forwarded, 12);
    }

    #[test]
    fn unit_call_dials_reflector_and_announces() {
        let (mut h, a, b) = two_masters();
        let mut d = header(3010, PEER_A, 0x4000, Slot::Two);
        d.bits.call_type = CallType::Unit;
        h.recv(a, &d.serialize(), addr(50001));
        assert_eq!(h.router.bridges().linked_reflector(a, Slot::Two), Some(3010));
        assert_eq!(h.router.bridges().linked_reflector(b, Slot::Two), None);
        let mut t = terminator(1, 3010, PEER_A, 0x4000, Slot::Two);
        t.bits.call_type = CallType::Unit;
        let out = h.recv(a, &t.serialize(), addr(50001));
        let speech = out.speech();
        assert_eq!(speech.len(), 1);
        assert_eq!(speech[0].system, a);
        assert!(speech[0].words.contains(&"linkedto".to_string()));
        assert!(speech[0].words.contains(&"3".to_string()));
    }

    #[test]
    fn unlink_and_status_queries() {
        let (mut h, a, _) = two_masters();
        let mut d = header(3010, PEER_A, 0x4100, Slot::Two);
        d.bits.call_type = CallType::Unit;
        h.recv(a, &d.serialize(), addr(50001));

        let mut d = header(UNLINK_TG, PEER_A, 0x4101, Slot::Two);
        d.bits.call_type = CallType::Unit;
        h.recv(a, &d.serialize(), addr(50001));
        assert_eq!(h.router.bridges().linked_reflector(a, Slot::Two), None);

        let mut t = terminator(1, STATUS_TG, PEER_A, 0x4102, Slot::Two);
        t.bits.call_type = CallType::Unit;
        let out = h.recv(a, &t.serialize(), addr(50001));
        assert!(out.speech()[0].words.contains(&"notlinked".to_string()));
    }

    #[test]
    fn speech_frames_occupy_the_slot() {
        let (mut h, a, _) = two_masters();
        let frame = SpeechFrame {
            system: a,
            dmrd: header(9, 9, 0x5000, Slot::Two),
        };
        let mut out = Outbox::new();
        h.router.speech_frame(&frame, h.clock, &mut out);
        assert_eq!(sent_to(&out, addr(50001)).len(), 1);
        let slot = h.router.streams().slot(a, Slot::Two).unwrap();
        assert_eq!(slot.tx_stream, Some(0x5000));
        assert!(!slot.tx_ended);
    }

    #[test]
    fn stream_trim_reports_timeout() {
        let (mut h, a, _) = two_masters();
        h.recv(a, &header(91, PEER_A, 0x6000, Slot::One).serialize(), addr(50001));
        h.advance(Duration::from_secs(6));
        let mut out = Outbox::new();
        h.router.trim_streams(h.clock, &mut out);
        assert!(h.router.streams().slot(a, Slot::One).unwrap().rx_ended);
        assert!(out.events().iter().any(|e| matches!(e, ReportEvent::Bridge(s) if s.contains(",END,RX,MASTER-A"))));
    }

    #[test]
    fn options_set_statics_and_revert_when_peer_leaves() {
        let (mut h, a, _) = two_masters();
        let opts = HbpFrame::Options {
            peer_id: PEER_A,
            options: "TS1=235;DIAL=4400".to_string(),
        };
        h.recv(a, &opts.serialize(), addr(50001));
        let mut out = Outbox::new();
        h.router.apply_options(h.clock, &mut out);
        let m = h.router.bridges().member("235", a, Slot::One).unwrap();
        assert!(m.active);
        assert_eq!(m.to_type, TimeoutType::Off);
        assert_eq!(h.router.bridges().linked_reflector(a, Slot::Two), Some(4400));

        h.advance(Duration::from_secs(31));
        let mut out = Outbox::new();
        h.router.maintain(h.clock, &mut out);
        assert!(out.datagrams().iter().any(|d| d.bytes.starts_with(b"MSTCL")));
        h.router.apply_options(h.clock, &mut out);
        assert!(!h.router.bridges().member("235", a, Slot::One).unwrap().active);
        assert_eq!(h.router.bridges().linked_reflector(a, Slot::Two), None);
    }

    #[test]
    fn ident_on_idle_single_peer_master() {
        let cfg = {
            let mut m = master("MASTER-A");
            m.voice_ident = true;
            network(vec![m])
        };
        let mut h = Harness::new(&cfg);
        h.login(SystemId(0), PEER_A, addr(50001));
        let mut out = Outbox::new();
        h.router.ident(h.clock, &mut out);
        let req = &out.speech()[0];
        assert_eq!(req.dst, ALL_CALL);
        assert!(req.words.contains(&"g".to_string()));
    }

    fn obp_frame(link: &SystemConfig, dmrd: &Dmrd, clock: Clock) -> Vec<u8> {
        let key = crypto::obp_key(link.passphrase.as_bytes());
        let mut d = dmrd.clone();
        d.peer = link.network_id;
        let env = ObpEnvelope {
            server_id: link.network_id,
            timestamp_ns: clock.unix_ns,
            hops: 1,
            source_server: 3100,
            source_repeater: 0,
        };
        obp::encode_data(&d, 5, &key, &env)
    }

    #[test]
    fn first_seen_openbridge_wins() {
        let l1 = openbridge("OBP-1", 1001, 62101);
        let l2 = openbridge("OBP-2", 1002, 62102);
        let mut cfg = network(vec![master("MASTER-A"), l1.clone(), l2.clone()]);
        cfg.global.gen_stat_bridges = true;
        let mut h = Harness::new(&cfg);
        let (a, o1, o2) = (SystemId(0), SystemId(1), SystemId(2));
        h.login(a, PEER_A, addr(50001));
        for id in [o1, o2] {
            h.router.set_target(id, addr(if id == o1 { 62101 } else { 62102 }), h.clock);
        }
        activate(&mut h, a, 3100, Slot::One);

        let hdr = header(3100, 0, 0x7000, Slot::One);
        let out1 = h.recv(o1, &obp_frame(&l1, &hdr, h.clock), addr(62101));
        assert_eq!(sent_to(&out1, addr(50001)).len(), 1);
        h.advance(Duration::from_millis(20));
        let out2 = h.recv(o2, &obp_frame(&l2, &hdr, h.clock), addr(62102));
        assert!(sent_to(&out2, addr(50001)).is_empty());
        assert!(out2.datagrams().iter().all(|d| d.addr != addr(62101)));

        h.advance(Duration::from_millis(40));
        let burst = voice(1, 3100, 0, 0x7000, Slot::One, 1);
        let out = h.recv(o2, &obp_frame(&l2, &burst, h.clock), addr(62102));
        assert!(sent_to(&out, addr(50001)).is_empty());
        let out = h.recv(o1, &obp_frame(&l1, &burst, h.clock), addr(62101));
        assert_eq!(sent_to(&out, addr(50001)).len(), 1);
    }

    #[test]
    fn hbp_call_reaches_openbridge_with_new_lc() {
        let l1 = openbridge("OBP-1", 1001, 62101);
        let cfg = network(vec![master("MASTER-A"), l1.clone()]);
        let mut h = Harness::new(&cfg);
        let (a, o1) = (SystemId(0), SystemId(1));
        h.login(a, PEER_A, addr(50001));
        h.router.set_target(o1, addr(62101), h.clock);
        let out = h.recv(a, &header(3100, PEER_A, 0x8000, Slot::Two).serialize(), addr(50001));
        let pkt = out.datagrams().iter().find(|d| d.addr == addr(62101)).unwrap();
        let key = crypto::obp_key(l1.passphrase.as_bytes());
        let obp::ObpFrame::Data(data) = obp::decode(&pkt.bytes, &key, 5).unwrap() else {
            panic!("expected data");
        };
        assert_eq!(data.dmrd.bits.slot, Slot::One);
        assert_eq!(data.dmrd.dst, 3100);
        assert!(h.router.bridges().contains("3100"));
    }

    #[test]
    fn unit_data_follows_subscriber_map() {
        let (mut h, a, b) = two_masters();
        h.recv(b, &header(91, PEER_B, 0x9000, Slot::Two).serialize(), addr(50002));
        h.advance(Duration::from_millis(60));
        h.recv(b, &terminator(1, 91, PEER_B, 0x9000, Slot::Two).serialize(), addr(50002));
        h.advance(Duration::from_secs(10));
        let mut d = header(SUB, PEER_A, 0x9001, Slot::One);
        d.rf_src = 3_120_999;
        d.bits = FrameBits {
            slot: Slot::One,
            call_type: CallType::Unit,
            frame_type: FrameType::DataSync,
            dtype_vseq: DT_DATA_HEADER,
        };
        let out = h.recv(a, &d.serialize(), addr(50001));
        let frames = sent_to(&out, addr(50002));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bits.slot, Slot::Two);
        assert!(out.events().iter().any(|e| matches!(e, ReportEvent::Bridge(s) if s.starts_with("UNIT DATA,DATA,TX,MASTER-B"))));
    }

    #[test]
    fn rule_timer_drops_expired_single_bridge() {
        let (mut h, a, _) = two_masters();
        h.recv(a, &header(91, PEER_A, 0xA000, Slot::One).serialize(), addr(50001));
        assert!(h.router.bridges().contains("91"));
        let mut out = Outbox::new();
        h.advance(Duration::from_secs(601));
        h.router.rule_timer(h.clock, &mut out);
        h.advance(Duration::from_secs(52));
        h.router.rule_timer(h.clock, &mut out);
        assert!(!h.router.bridges().contains("91"));
    }

    #[test]
    fn snapshots_name_systems_and_peers() {
        let (h, _, _) = two_masters();
        let cfg = h.router.config_snapshot();
        assert_eq!(cfg["MASTER-A"]["mode"], "MASTER");
        assert_eq!(cfg["MASTER-A"]["peers"][PEER_A.to_string()]["callsign"], "G0ABC");
        let bridges = h.router.bridge_snapshot(h.clock.mono);
        assert!(bridges.is_object());
    }
}
