//! Dynamic talkgroup and reflector membership.
//!
//! A bridge is a named list of (system, slot) members that repeat one
//! logical talkgroup to each other. Names starting with `#` are
//! reflectors: every master carries them on slot 2 as talkgroup 9, so
//! one slot can hold a reflector selection independent of ordinary
//! group traffic.

use crate::config::{BridgeSeed, Mode, TimeoutType};
use crate::endpoint::SystemId;
use crate::error::DmrlinkError;
use dmr_common::types::{DmrId, Slot, ECHO_TG, REFLECTOR_TG, UNLINK_TG};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Prefix of reflector bridge names.
pub const REFLECTOR_PREFIX: char = '#';

/// Echo bridges always expire after one minute.
const ECHO_MINUTES: u64 = 1;

/// Reflector bridge name for `tg`.
#[must_use]
pub fn reflector_name(tg: DmrId) -> String {
    format!("{REFLECTOR_PREFIX}{tg}")
}

/// Whether a bridge name denotes a reflector.
#[must_use]
pub fn is_reflector(name: &str) -> bool {
    name.starts_with(REFLECTOR_PREFIX)
}

/// The talkgroup a bridge name stands for, with or without `#`.
#[must_use]
pub fn bridge_number(name: &str) -> Option<DmrId> {
    name.trim_start_matches(REFLECTOR_PREFIX).parse().ok()
}

/// The other name of a bridge: `#91` for `91` and the reverse.
#[must_use]
pub fn paired_name(name: &str) -> String {
    match name.strip_prefix(REFLECTOR_PREFIX) {
        Some(plain) => plain.to_string(),
        None => format!("{REFLECTOR_PREFIX}{name}"),
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

/// What the table needs to know about a configured system.
#[derive(Debug, Clone)]
pub struct SystemEntry {
    /// Router index.
    pub id: SystemId,
    /// Name used in logs and snapshots.
    pub name: String,
    /// Role.
    pub mode: Mode,
    /// Current user-activated timeout in minutes.
    pub ua_timer: u64,
}

/// One (system, slot) membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// System.
    pub system: SystemId,
    /// Timeslot.
    pub slot: Slot,
    /// Talkgroup on that system.
    pub tgid: DmrId,
    /// Repeating now.
    pub active: bool,
    /// Timer length.
    pub timeout: Duration,
    /// Timer policy.
    pub to_type: TimeoutType,
    /// Ids that activate the member when keyed.
    pub on: Vec<DmrId>,
    /// Ids that deactivate the member when keyed.
    pub off: Vec<DmrId>,
    /// Ids that reset the member's timer when keyed.
    pub reset: Vec<DmrId>,
    /// When the timer fires.
    pub timer: Instant,
}

impl Member {
    /// A user-activated member: toggles on `tgid` and expires after `timeout`.
    #[must_use]
    pub fn user_activated(system: SystemId, slot: Slot, tgid: DmrId, timeout: Duration, now: Instant) -> Self {
        Self {
            system,
            slot,
            tgid,
            active: false,
            timeout,
            to_type: TimeoutType::On,
            on: vec![tgid],
            off: Vec::new(),
            reset: Vec::new(),
            timer: now,
        }
    }

    /// A permanently active member with no timer, used for OpenBridge links.
    #[must_use]
    pub fn fixed(system: SystemId, tgid: DmrId, to_type: TimeoutType, now: Instant) -> Self {
        Self {
            system,
            slot: Slot::One,
            tgid,
            active: true,
            timeout: Duration::ZERO,
            to_type,
            on: Vec::new(),
            off: Vec::new(),
            reset: Vec::new(),
            timer: now,
        }
    }

    fn activated(mut self, now: Instant) -> Self {
        self.active = true;
        self.timer = now + self.timeout;
        self
    }

    /// Keeps the bridge alive: a running ON timer, a pending OFF timer, or
    /// a member the timers never touch.
    fn in_use(&self, openbridge: bool) -> bool {
        match self.to_type {
            TimeoutType::On => self.active,
            TimeoutType::Off => true,
            TimeoutType::None => !openbridge,
            TimeoutType::Static => true,
        }
    }

    fn refreshable(&self) -> bool {
        (self.to_type == TimeoutType::On && self.active) || (self.to_type == TimeoutType::Off && !self.active)
    }
}

/// A system and slot a routed frame should be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    /// Bridge member system.
    pub system: SystemId,
    /// Member timeslot.
    pub slot: Slot,
    /// Talkgroup to rewrite the frame to.
    pub tgid: DmrId,
}

/// Member as it appears in a bridge snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    /// System name.
    pub system: String,
    /// Timeslot number.
    pub ts: u8,
    /// Talkgroup.
    pub tgid: DmrId,
    /// Repeating now.
    pub active: bool,
    /// Timer length in seconds.
    pub timeout: u64,
    /// Timer policy.
    pub to_type: TimeoutType,
    /// Seconds until the timer fires, zero if it already has.
    pub timer: u64,
    /// Activation ids.
    pub on: Vec<DmrId>,
    /// Deactivation ids.
    pub off: Vec<DmrId>,
    /// Reset ids.
    pub reset: Vec<DmrId>,
}

/// All bridges by name.
#[derive(Debug, Clone)]
pub struct BridgeTable {
    systems: Vec<SystemEntry>,
    bridges: BTreeMap<String, Vec<Member>>,
}

impl BridgeTable {
    /// An empty table over the configured systems.
    #[must_use]
    pub fn new(systems: Vec<SystemEntry>) -> Self {
        Self {
            systems,
            bridges: BTreeMap::new(),
        }
    }

    /// Builds the configured bridges and gives every master an inactive
    /// user-activated member on each slot it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`DmrlinkError::Config`] if a member names an unknown system
    /// or slot.
    pub fn load(&mut self, seeds: &[BridgeSeed], now: Instant) -> Result<(), DmrlinkError> {
        for seed in seeds {
            let mut members = Vec::with_capacity(seed.members.len());
            for m in &seed.members {
                let system = self
                    .id_of(&m.system)
                    .ok_or_else(|| DmrlinkError::Config(format!("bridge {}: unknown system {}", seed.name, m.system)))?;
                let slot = Slot::from_number(m.ts)
                    .ok_or_else(|| DmrlinkError::Config(format!("bridge {}: bad slot {}", seed.name, m.ts)))?;
                let timeout = minutes(m.timeout);
                members.push(Member {
                    system,
                    slot,
                    tgid: m.tgid,
                    active: m.active,
                    timeout,
                    to_type: m.to_type,
                    on: m.on.clone(),
                    off: m.off.clone(),
                    reset: m.reset.clone(),
                    timer: if m.active { now + timeout } else { now },
                });
            }
            self.bridges.insert(seed.name.clone(), members);
        }
        self.fill_all(now);
        Ok(())
    }

    /// Adds the default members of every master to `name`: both slots of
    /// the talkgroup for a plain bridge, slot 2 talkgroup 9 for a reflector.
    pub fn fill_masters(&mut self, name: &str, now: Instant) {
        let reflector = is_reflector(name);
        let Some(number) = bridge_number(name) else {
            return;
        };
        let masters: Vec<(SystemId, u64)> = self
            .systems
            .iter()
            .filter(|s| s.mode == Mode::Master)
            .map(|s| (s.id, s.ua_timer))
            .collect();
        let Some(members) = self.bridges.get_mut(name) else {
            return;
        };
        for (id, ua) in masters {
            let has = |members: &[Member], slot: Slot| {
                members.iter().any(|m| m.system == id && m.slot == slot)
            };
            if reflector {
                if !has(members.as_slice(), Slot::Two) {
                    let mut m = Member::user_activated(id, Slot::Two, REFLECTOR_TG, minutes(ua), now);
                    m.on.clear();
                    m.off = vec![UNLINK_TG];
                    members.push(m);
                }
            } else {
                for slot in Slot::ALL {
                    if !has(members.as_slice(), slot) {
                        members.push(Member::user_activated(id, slot, number, minutes(ua), now));
                    }
                }
            }
        }
    }

    /// [`fill_masters`](Self::fill_masters) for every bridge.
    pub fn fill_all(&mut self, now: Instant) {
        let names: Vec<String> = self.bridges.keys().cloned().collect();
        for name in names {
            self.fill_masters(&name, now);
        }
    }

    fn id_of(&self, name: &str) -> Option<SystemId> {
        self.systems.iter().find(|s| s.name == name).map(|s| s.id)
    }

    fn entry(&self, id: SystemId) -> Option<&SystemEntry> {
        self.systems.iter().find(|s| s.id == id)
    }

    fn name(&self, id: SystemId) -> &str {
        self.entry(id).map_or("?", |s| s.name.as_str())
    }

    fn is_openbridge(&self, id: SystemId) -> bool {
        self.entry(id).is_some_and(|s| s.mode == Mode::OpenBridge)
    }

    /// Updates a system's user-activated timeout.
    pub fn set_ua_timer(&mut self, id: SystemId, minutes: u64) {
        if let Some(s) = self.systems.iter_mut().find(|s| s.id == id) {
            s.ua_timer = minutes;
        }
    }

    /// Whether `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bridges.contains_key(name)
    }

    /// Members of a bridge.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[Member]> {
        self.bridges.get(name).map(Vec::as_slice)
    }

    /// Number of bridges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    /// Whether there are no bridges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    /// Bridge names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bridges.keys().map(String::as_str)
    }

    /// Creates a user-activated bridge for `tg` keyed by `source`/`slot`.
    /// OpenBridge links join permanently outside the reserved ranges.
    pub fn make_single(&mut self, tg: DmrId, source: SystemId, slot: Slot, timeout_min: u64, now: Instant) {
        let timeout = minutes(if tg == ECHO_TG { ECHO_MINUTES } else { timeout_min });
        let mut members = Vec::new();
        for s in &self.systems {
            if s.mode == Mode::OpenBridge {
                if obp_joins(tg) {
                    members.push(Member::fixed(s.id, tg, TimeoutType::None, now));
                }
                continue;
            }
            for ts in Slot::ALL {
                let m = Member::user_activated(s.id, ts, tg, timeout, now);
                members.push(if s.id == source && ts == slot { m.activated(now) } else { m });
            }
        }
        info!(
            "({}) bridge for TG {} created as user activated, timeout {}s",
            self.name(source),
            tg,
            timeout.as_secs()
        );
        self.bridges.insert(tg.to_string(), members);
    }

    /// Creates a bridge for traffic first heard over OpenBridge.
    pub fn make_stat(&mut self, tg: DmrId, now: Instant) {
        let mut members = Vec::new();
        for s in &self.systems {
            match s.mode {
                Mode::Master => {
                    for ts in Slot::ALL {
                        members.push(Member::user_activated(s.id, ts, tg, minutes(s.ua_timer), now));
                    }
                }
                Mode::OpenBridge => members.push(Member::fixed(s.id, tg, TimeoutType::Static, now)),
                Mode::Peer | Mode::XlxPeer => {}
            }
        }
        debug!("(ROUTER) STAT bridge for TG {} created", tg);
        self.bridges.insert(tg.to_string(), members);
    }

    /// Creates reflector `#tg`, linking `source`'s slot 2.
    pub fn make_reflector(&mut self, tg: DmrId, timeout_min: u64, source: SystemId, now: Instant) {
        let timeout = minutes(if tg == ECHO_TG { ECHO_MINUTES } else { timeout_min });
        let mut members = Vec::new();
        for s in &self.systems {
            match s.mode {
                Mode::Master => {
                    let own = if s.id == source { timeout } else { minutes(s.ua_timer) };
                    let mut m = Member::user_activated(s.id, Slot::Two, REFLECTOR_TG, own, now);
                    m.on = vec![tg];
                    members.push(if s.id == source { m.activated(now) } else { m });
                }
                Mode::OpenBridge if obp_joins(tg) => {
                    members.push(Member::fixed(s.id, tg, TimeoutType::None, now));
                }
                _ => {}
            }
        }
        info!(
            "({}) reflector for TG {} created as user activated, timeout {}s",
            self.name(source),
            tg,
            timeout.as_secs()
        );
        self.bridges.insert(reflector_name(tg), members);
    }

    fn replace(&mut self, name: &str, member: Member) {
        if let Some(members) = self.bridges.get_mut(name) {
            for m in members.iter_mut() {
                if m.system == member.system && m.slot == member.slot {
                    *m = member.clone();
                }
            }
        }
    }

    /// Links `system` to reflector `tg` until keyed away.
    pub fn set_default_reflector(&mut self, system: SystemId, tg: DmrId, timeout_min: u64, now: Instant) {
        let name = reflector_name(tg);
        if !self.contains(&name) {
            self.make_reflector(tg, timeout_min, system, now);
        }
        let mut m = Member::user_activated(system, Slot::Two, REFLECTOR_TG, minutes(timeout_min), now).activated(now);
        m.to_type = TimeoutType::Off;
        m.on = vec![tg];
        self.replace(&name, m);
    }

    /// Returns `system`'s slot 2 member of reflector `tg` to user activation.
    pub fn reset_default_reflector(&mut self, system: SystemId, tg: DmrId, timeout_min: u64, now: Instant) {
        let name = reflector_name(tg);
        if !self.contains(&name) {
            self.make_reflector(tg, timeout_min, system, now);
        }
        let mut m = Member::user_activated(system, Slot::Two, REFLECTOR_TG, minutes(timeout_min), now);
        m.on = vec![tg];
        m.timer = now + m.timeout;
        self.replace(&name, m);
    }

    /// Makes `tg` static on `system`/`slot`.
    pub fn set_static(&mut self, system: SystemId, tg: DmrId, slot: Slot, timeout_min: u64, now: Instant) {
        let name = tg.to_string();
        if !self.contains(&name) {
            self.make_single(tg, system, slot, timeout_min, now);
        }
        let mut m = Member::user_activated(system, slot, tg, minutes(timeout_min), now).activated(now);
        m.to_type = TimeoutType::Off;
        self.replace(&name, m);
    }

    /// Returns a static talkgroup to user activation.
    pub fn reset_static(&mut self, system: SystemId, tg: DmrId, slot: Slot, timeout_min: u64, now: Instant) {
        let mut m = Member::user_activated(system, slot, tg, minutes(timeout_min), now);
        m.timer = now + m.timeout;
        self.replace(&tg.to_string(), m);
    }

    /// Removes every membership of `system`.
    pub fn remove_system(&mut self, system: SystemId) {
        for members in self.bridges.values_mut() {
            members.retain(|m| m.system != system);
        }
    }

    /// Runs the bridge timers and deletes bridges nothing uses any more.
    /// Returns the systems whose reflector link just timed out.
    pub fn rule_timer(&mut self, now: Instant) -> Vec<SystemId> {
        let mut unlinked = Vec::new();
        let mut unused = Vec::new();
        let obp: Vec<SystemId> = self
            .systems
            .iter()
            .filter(|s| s.mode == Mode::OpenBridge)
            .map(|s| s.id)
            .collect();
        for (name, members) in &mut self.bridges {
            let mut used = false;
            for m in members.iter_mut() {
                used |= m.in_use(obp.contains(&m.system));
                let sys = self
                    .systems
                    .iter()
                    .find(|s| s.id == m.system)
                    .map_or("?", |s| s.name.as_str());
                match (m.to_type, m.active) {
                    (TimeoutType::On, true) if m.timer < now => {
                        m.active = false;
                        info!(
                            "(ROUTER) conference bridge TIMEOUT: DEACTIVATE system: {}, bridge: {}, TS: {}, TGID: {}",
                            sys,
                            name,
                            m.slot.number(),
                            m.tgid
                        );
                        if is_reflector(name) {
                            unlinked.push(m.system);
                        }
                    }
                    (TimeoutType::Off, false) if m.timer < now => {
                        m.active = true;
                        info!(
                            "(ROUTER) conference bridge TIMEOUT: ACTIVATE system: {}, bridge: {}, TS: {}, TGID: {}",
                            sys,
                            name,
                            m.slot.number(),
                            m.tgid
                        );
                    }
                    _ => trace!("(ROUTER) conference bridge no change: system {}, bridge {}", sys, name),
                }
            }
            if !used {
                unused.push(name.clone());
            }
        }
        for name in unused {
            self.bridges.remove(&name);
            debug!("(ROUTER) unused conference bridge {} removed", name);
        }
        unlinked
    }

    /// Deletes OpenBridge-created bridges no HBP slot is using.
    pub fn stat_trim(&mut self) -> usize {
        let before = self.bridges.len();
        self.bridges.retain(|name, members| {
            let stat = members.iter().any(|m| m.to_type == TimeoutType::Static);
            let in_use = members.iter().any(|m| {
                (m.to_type == TimeoutType::On && m.active) || (m.to_type == TimeoutType::Off && !m.active)
            });
            let keep = !stat || in_use;
            if !keep {
                debug!("(ROUTER) STAT bridge {} removed", name);
            }
            keep
        });
        before - self.bridges.len()
    }

    /// In-band signalling at the end of a group call from `system`/`slot`
    /// to `dst`. Reflectors only react to talkgroup 9.
    pub fn group_signal(&mut self, system: SystemId, slot: Slot, dst: DmrId, single_mode: bool, now: Instant) {
        let sys = self.name(system).to_string();
        for (name, members) in &mut self.bridges {
            if is_reflector(name) && dst != REFLECTOR_TG {
                continue;
            }
            for m in members.iter_mut().filter(|m| m.system == system) {
                if m.slot == slot && m.tgid == dst && m.refreshable() {
                    m.timer = now + m.timeout;
                    info!("({}) [1] transmission match for bridge: {}, timeout reset", sys, name);
                }
                if m.slot != slot {
                    continue;
                }
                if m.on.contains(&dst) || m.reset.contains(&dst) {
                    if m.on.contains(&dst) && !m.active {
                        m.active = true;
                        m.timer = now + m.timeout;
                        info!("({}) [2] bridge: {}, connection changed to state: true", sys, name);
                        if m.to_type == TimeoutType::Off {
                            m.timer = now;
                            info!("({}) [3] bridge: {} set to OFF with an on timer rule: timer cancelled", sys, name);
                        }
                    }
                    if m.active && m.to_type == TimeoutType::On {
                        m.timer = now + m.timeout;
                        info!("({}) [4] bridge: {}, timeout timer reset", sys, name);
                    }
                }
                let off = m.off.contains(&dst);
                let deactivates = off || (single_mode && dst != m.tgid);
                if deactivates || m.reset.contains(&dst) {
                    if deactivates && m.active {
                        m.active = false;
                        info!("({}) [5] bridge: {}, connection changed to state: false", sys, name);
                        if m.to_type == TimeoutType::On {
                            m.timer = now;
                            info!("({}) [6] bridge: {} set to ON with an OFF timer rule: timer cancelled", sys, name);
                        }
                    }
                    if !m.active && m.to_type == TimeoutType::Off {
                        m.timer = now + m.timeout;
                        info!("({}) [7] bridge: {}, timeout timer reset", sys, name);
                    }
                    if m.active && m.to_type == TimeoutType::On && off {
                        m.timer = now;
                        info!("({}) [8] bridge: {} on timer cancelled", sys, name);
                    }
                }
            }
        }
    }

    /// Reflector selection by a private call from `system`/`slot` to `dst`:
    /// links `#dst` and unlinks every other reflector on that slot.
    pub fn dial_reflector(&mut self, system: SystemId, slot: Slot, dst: DmrId, now: Instant) {
        let sys = self.name(system).to_string();
        for (name, members) in &mut self.bridges {
            if !is_reflector(name) {
                continue;
            }
            let Some(number) = bridge_number(name) else {
                continue;
            };
            for m in members.iter_mut().filter(|m| m.system == system && m.slot == slot) {
                if m.tgid == dst && m.refreshable() {
                    m.timer = now + m.timeout;
                    info!("({}) [B] transmission match for reflector: {}, timeout reset", sys, name);
                }
                if dst == number && !m.active {
                    m.active = true;
                    m.timer = now + m.timeout;
                    info!("({}) [C] reflector: {}, connection changed to state: true", sys, name);
                    if m.to_type == TimeoutType::Off {
                        m.timer = now;
                        info!("({}) [D] reflector: {} has an OFF timer and set to ON: timer cancelled", sys, name);
                    }
                }
                if m.active && m.to_type == TimeoutType::On && dst == number {
                    m.timer = now + m.timeout;
                    info!("({}) [E] reflector: {}, timeout timer reset", sys, name);
                }
                let off = m.off.contains(&dst);
                if off || dst != number || m.reset.contains(&dst) {
                    if (off || dst != number) && m.active {
                        m.active = false;
                        info!("({}) [F] reflector: {}, connection changed to state: false", sys, name);
                        if m.to_type == TimeoutType::On {
                            m.timer = now;
                            info!("({}) [G] reflector: {} has ON timer and set to OFF: timer cancelled", sys, name);
                        }
                    }
                    if !m.active && m.to_type == TimeoutType::Off {
                        m.timer = now + m.timeout;
                        info!("({}) [H] reflector: {}, timeout timer reset", sys, name);
                    }
                    if m.active && m.to_type == TimeoutType::On && off {
                        m.timer = now;
                        info!("({}) [I] reflector: {} has ON timer and set to OFF: timer cancelled", sys, name);
                    }
                }
            }
        }
    }

    /// The reflector `system`/`slot` is linked to.
    #[must_use]
    pub fn linked_reflector(&self, system: SystemId, slot: Slot) -> Option<DmrId> {
        self.bridges
            .iter()
            .filter(|(name, _)| is_reflector(name))
            .find(|(_, members)| members.iter().any(|m| m.system == system && m.slot == slot && m.active))
            .and_then(|(name, _)| bridge_number(name))
    }

    fn fan_out(&self, name: &str, system: SystemId, out: &mut Vec<Target>) {
        let Some(members) = self.bridges.get(name) else {
            return;
        };
        for m in members.iter().filter(|m| m.active && m.system != system) {
            if out.iter().any(|t| t.system == m.system && t.slot == m.slot) {
                continue;
            }
            out.push(Target {
                system: m.system,
                slot: m.slot,
                tgid: m.tgid,
            });
        }
    }

    /// Every member a frame from `system`/`slot` to `dst` must reach: the
    /// active members of each bridge in which the source is an active
    /// member for `dst`. With `paired`, the reflector or talkgroup twin of
    /// each such bridge is included.
    #[must_use]
    pub fn targets(&self, system: SystemId, slot: Slot, dst: DmrId, paired: bool) -> Vec<Target> {
        let mut out = Vec::new();
        for (name, members) in &self.bridges {
            let source = members
                .iter()
                .any(|m| m.system == system && m.tgid == dst && m.slot == slot && m.active);
            if !source {
                continue;
            }
            self.fan_out(name, system, &mut out);
            if paired {
                self.fan_out(&paired_name(name), system, &mut out);
            }
        }
        out
    }

    /// The table as served to report clients.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> BTreeMap<String, Vec<MemberView>> {
        self.bridges
            .iter()
            .map(|(name, members)| {
                let views = members
                    .iter()
                    .map(|m| MemberView {
                        system: self.name(m.system).to_string(),
                        ts: m.slot.number(),
                        tgid: m.tgid,
                        active: m.active,
                        timeout: m.timeout.as_secs(),
                        to_type: m.to_type,
                        timer: m.timer.saturating_duration_since(now).as_secs(),
                        on: m.on.clone(),
                        off: m.off.clone(),
                        reset: m.reset.clone(),
                    })
                    .collect();
                (name.clone(), views)
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, name: &str, members: Vec<Member>) {
        self.bridges.insert(name.to_string(), members);
    }

    #[cfg(test)]
    pub(crate) fn member(&self, name: &str, system: SystemId, slot: Slot) -> Option<&Member> {
        self.get(name)?.iter().find(|m| m.system == system && m.slot == slot)
    }
}

/// OpenBridge links join auto-created bridges from talkgroup 79 up,
/// except the 9990-9999 service range.
fn obp_joins(tg: DmrId) -> bool {
    tg >= 79 && !(9990..=9999).contains(&tg)
}
