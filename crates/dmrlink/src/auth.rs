//! Admission policy: ACL evaluation, OpenBridge envelope checks and
//! log-once bookkeeping for per-stream drops.

use crate::config::{GlobalConfig, SystemConfig};
use crate::directory::Directory;
use dmr_common::acl::{Acl, AclError};
use dmr_common::openbridge::MAX_HOPS;
use dmr_common::types::{DmrId, Slot, StreamId, APRS_TG, ID_MAX, PEER_MAX};
use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;

/// Frames older than this are discarded.
pub const MAX_FRAME_AGE_NS: u64 = 5_000_000_000;

const LOG_ONCE_ENTRIES: usize = 20;

/// One parsed ACL set, either global or per system.
#[derive(Debug, Clone)]
pub struct Acls {
    /// Whether these lists are evaluated at all.
    pub enabled: bool,
    /// Peer registration list.
    pub reg: Acl,
    /// Subscriber list.
    pub sub: Acl,
    /// Timeslot 1 talkgroups.
    pub tg1: Acl,
    /// Timeslot 2 talkgroups.
    pub tg2: Acl,
    /// OpenBridge talkgroups.
    pub tgid: Acl,
}

impl Acls {
    /// Parses the global lists.
    ///
    /// # Errors
    ///
    /// Returns the first [`AclError`].
    pub fn global(cfg: &GlobalConfig) -> Result<Self, AclError> {
        Ok(Self {
            enabled: cfg.use_acl,
            reg: Acl::parse(&cfg.reg_acl, PEER_MAX)?,
            sub: Acl::parse(&cfg.sub_acl, ID_MAX)?,
            tg1: Acl::parse(&cfg.tg1_acl, ID_MAX)?,
            tg2: Acl::parse(&cfg.tg2_acl, ID_MAX)?,
            tgid: Acl::permit_all(ID_MAX),
        })
    }

    /// Parses one system's lists.
    ///
    /// # Errors
    ///
    /// Returns the first [`AclError`].
    pub fn system(cfg: &SystemConfig) -> Result<Self, AclError> {
        Ok(Self {
            enabled: cfg.use_acl,
            reg: Acl::parse(&cfg.reg_acl, PEER_MAX)?,
            sub: Acl::parse(&cfg.sub_acl, ID_MAX)?,
            tg1: Acl::parse(&cfg.tg1_acl, ID_MAX)?,
            tg2: Acl::parse(&cfg.tg2_acl, ID_MAX)?,
            tgid: Acl::parse(&cfg.tgid_acl, ID_MAX)?,
        })
    }

    /// Lists that admit everything.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            enabled: false,
            reg: Acl::permit_all(PEER_MAX),
            sub: Acl::permit_all(ID_MAX),
            tg1: Acl::permit_all(ID_MAX),
            tg2: Acl::permit_all(ID_MAX),
            tgid: Acl::permit_all(ID_MAX),
        }
    }

    fn slot_tg(&self, slot: Slot) -> &Acl {
        match slot {
            Slot::One => &self.tg1,
            Slot::Two => &self.tg2,
        }
    }
}

/// Which check refused a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Global subscriber ACL.
    GlobalSubscriber,
    /// Global talkgroup ACL for the slot.
    GlobalTalkgroup(Slot),
    /// System subscriber ACL.
    SystemSubscriber,
    /// System talkgroup ACL for the slot (slot 1 for OpenBridge).
    SystemTalkgroup(Slot),
}

impl Denial {
    /// Metrics label.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::GlobalSubscriber | Self::SystemSubscriber => "acl_subscriber",
            Self::GlobalTalkgroup(_) | Self::SystemTalkgroup(_) => "acl_talkgroup",
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GlobalSubscriber => write!(f, "GLOBAL SUBSCRIBER ACL"),
            Self::GlobalTalkgroup(s) => write!(f, "GLOBAL TS{s} ACL"),
            Self::SystemSubscriber => write!(f, "SYSTEM SUBSCRIBER ACL"),
            Self::SystemTalkgroup(s) => write!(f, "SYSTEM TS{s} ACL"),
        }
    }
}

/// HBP data ACLs: global subscriber, global slot talkgroup, system
/// subscriber, system slot talkgroup. The first failure wins.
///
/// # Errors
///
/// Returns the failing [`Denial`].
pub fn check_hbp(
    global: &Acls,
    system: &Acls,
    rf_src: DmrId,
    dst: DmrId,
    slot: Slot,
) -> Result<(), Denial> {
    if global.enabled {
        if !global.sub.check(rf_src) {
            return Err(Denial::GlobalSubscriber);
        }
        if !global.slot_tg(slot).check(dst) {
            return Err(Denial::GlobalTalkgroup(slot));
        }
    }
    if system.enabled {
        if !system.sub.check(rf_src) {
            return Err(Denial::SystemSubscriber);
        }
        if !system.slot_tg(slot).check(dst) {
            return Err(Denial::SystemTalkgroup(slot));
        }
    }
    Ok(())
}

/// OpenBridge data ACLs: global subscriber, global TS1, system
/// subscriber, system talkgroup.
///
/// # Errors
///
/// Returns the failing [`Denial`].
pub fn check_obp(global: &Acls, system: &Acls, rf_src: DmrId, dst: DmrId) -> Result<(), Denial> {
    if global.enabled {
        if !global.sub.check(rf_src) {
            return Err(Denial::GlobalSubscriber);
        }
        if !global.tg1.check(dst) {
            return Err(Denial::GlobalTalkgroup(Slot::One));
        }
    }
    if system.enabled {
        if !system.sub.check(rf_src) {
            return Err(Denial::SystemSubscriber);
        }
        if !system.tgid.check(dst) {
            return Err(Denial::SystemTalkgroup(Slot::One));
        }
    }
    Ok(())
}

/// Master login admission by registration ACLs. The directory check is
/// applied separately since it depends on `allow_unreg_id`.
#[must_use]
pub fn registration_allowed(global: &Acls, system: &Acls, peer_id: DmrId) -> bool {
    global.reg.check(peer_id) && system.reg.check(peer_id)
}

/// Talkgroups that never cross an OpenBridge link as group calls.
#[must_use]
pub fn reserved_talkgroup(dst: DmrId, version: u8) -> bool {
    dst <= 79
        || (9990..=9999).contains(&dst)
        || dst == APRS_TG
        || (version <= 1 && (92..=199).contains(&dst))
}

/// Whether a frame stamped at `ts_ns` is too old at `now_ns`.
#[must_use]
pub fn too_old(ts_ns: u64, now_ns: u64) -> bool {
    ts_ns.saturating_add(MAX_FRAME_AGE_NS) < now_ns
}

/// Hop count to forward with, or `None` when the limit is exceeded.
#[must_use]
pub fn next_hop(hops: u8) -> Option<u8> {
    let next = hops.saturating_add(1);
    (next <= MAX_HOPS).then_some(next)
}

/// Why a source server id was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerIdFault {
    /// Not 4 to 7 decimal digits.
    Length,
    /// 4 or 5 digits but not on the server list.
    NotListed,
    /// 6 or 7 digits but not a known DMR id.
    NotRegistered,
}

impl fmt::Display for ServerIdFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length => write!(f, "source server should be between 4 and 7 digits"),
            Self::NotListed => write!(f, "source server is 4 or 5 digits but not in list"),
            Self::NotRegistered => write!(f, "source server is 6 or 7 digits but not a valid DMR id"),
        }
    }
}

/// Source server id plausibility.
///
/// # Errors
///
/// Returns the [`ServerIdFault`].
pub fn check_source_server(
    id: DmrId,
    validate: bool,
    directory: &Directory,
) -> Result<(), ServerIdFault> {
    let digits = id.to_string().len();
    if !(4..=7).contains(&digits) {
        return Err(ServerIdFault::Length);
    }
    if !validate {
        return Ok(());
    }
    if digits <= 5 {
        if directory.listed_server(id) {
            Ok(())
        } else {
            Err(ServerIdFault::NotListed)
        }
    } else if directory.validate_id(id) {
        Ok(())
    } else {
        Err(ServerIdFault::NotRegistered)
    }
}

/// Remembers the last few stream ids a warning was logged for, so a
/// rejected call logs once rather than once per burst.
#[derive(Debug)]
pub struct LogOnce {
    seen: LruCache<StreamId, ()>,
}

impl LogOnce {
    /// Creates the set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: LruCache::new(NonZeroUsize::new(LOG_ONCE_ENTRIES).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Returns true the first time `stream` is offered.
    pub fn first(&mut self, stream: StreamId) -> bool {
        self.seen.put(stream, ()).is_none()
    }
}

impl Default for LogOnce {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acls(sub: &str, tg1: &str, tg2: &str) -> Acls {
        Acls {
            enabled: true,
            reg: Acl::permit_all(PEER_MAX),
            sub: Acl::parse(sub, ID_MAX).unwrap(),
            tg1: Acl::parse(tg1, ID_MAX).unwrap(),
            tg2: Acl::parse(tg2, ID_MAX).unwrap(),
            tgid: Acl::parse(tg1, ID_MAX).unwrap(),
        }
    }

    #[test]
    fn hbp_order_is_global_first() {
        let global = acls("DENY:1", "PERMIT:ALL", "DENY:235");
        let system = acls("DENY:1,2", "PERMIT:ALL", "PERMIT:ALL");
        assert_eq!(check_hbp(&global, &system, 1, 91, Slot::One), Err(Denial::GlobalSubscriber));
        assert_eq!(check_hbp(&global, &system, 2, 91, Slot::One), Err(Denial::SystemSubscriber));
        assert_eq!(
            check_hbp(&global, &system, 3, 235, Slot::Two),
            Err(Denial::GlobalTalkgroup(Slot::Two))
        );
        assert!(check_hbp(&global, &system, 3, 235, Slot::One).is_ok());
    }

    #[test]
    fn disabled_lists_are_skipped() {
        let mut global = acls("DENY:ALL", "DENY:ALL", "DENY:ALL");
        global.enabled = false;
        let system = Acls::permissive();
        assert!(check_hbp(&global, &system, 5, 5, Slot::Two).is_ok());
    }

    #[test]
    fn obp_uses_ts1_and_tgid_lists() {
        let global = acls("PERMIT:ALL", "DENY:9", "DENY:ALL");
        let system = acls("PERMIT:ALL", "DENY:235", "DENY:ALL");
        assert_eq!(
            check_obp(&global, &system, 3_120_101, 9),
            Err(Denial::GlobalTalkgroup(Slot::One))
        );
        assert_eq!(
            check_obp(&global, &system, 3_120_101, 235),
            Err(Denial::SystemTalkgroup(Slot::One))
        );
        assert!(check_obp(&global, &system, 3_120_101, 91).is_ok());
    }

    #[test]
    fn reserved_talkgroups() {
        assert!(reserved_talkgroup(79, 5));
        assert!(!reserved_talkgroup(80, 5));
        assert!(reserved_talkgroup(9995, 5));
        assert!(reserved_talkgroup(APRS_TG, 5));
        assert!(reserved_talkgroup(150, 1));
        assert!(!reserved_talkgroup(150, 2));
    }

    #[test]
    fn frame_age_boundary() {
        let now = 100 * 1_000_000_000;
        assert!(!too_old(now - MAX_FRAME_AGE_NS, now));
        assert!(too_old(now - MAX_FRAME_AGE_NS - 1, now));
        assert!(too_old(now - 6 * 1_000_000_000, now));
    }

    #[test]
    fn hop_limit() {
        assert_eq!(next_hop(0), Some(1));
        assert_eq!(next_hop(9), Some(10));
        assert_eq!(next_hop(10), None);
    }

    #[test]
    fn source_server_checks() {
        let mut dir = Directory::default();
        assert_eq!(check_source_server(234, false, &dir), Err(ServerIdFault::Length));
        assert_eq!(check_source_server(23_410_001, false, &dir), Err(ServerIdFault::Length));
        assert!(check_source_server(2341, false, &dir).is_ok());
        assert_eq!(check_source_server(2341, true, &dir), Err(ServerIdFault::NotListed));
        dir.insert_server_id("2341");
        assert!(check_source_server(23_415, true, &dir).is_ok());
        assert_eq!(
            check_source_server(3_120_101, true, &dir),
            Err(ServerIdFault::NotRegistered)
        );
        dir.insert_subscriber(3_120_101, "N0CALL");
        assert!(check_source_server(3_120_101, true, &dir).is_ok());
    }

    #[test]
    fn log_once_per_stream() {
        let mut once = LogOnce::new();
        assert!(once.first(7));
        assert!(!once.first(7));
        for s in 100..120 {
            once.first(s);
        }
        assert!(once.first(7));
    }
}
