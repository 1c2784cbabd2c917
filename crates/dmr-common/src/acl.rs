//! Permit/deny access lists over id ranges.
//!
//! Text syntax: `PERMIT:ALL`, `DENY:1,2-5,3120101`. An empty string
//! permits everything. A list whose action is `PERMIT` admits exactly the
//! listed ids; a `DENY` list admits everything else.

use crate::types::ID_MIN;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing ACL text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AclError {
    /// Action was neither `PERMIT` nor `DENY`.
    #[error("invalid ACL action {0:?}")]
    BadAction(String),
    /// An entry was not a number or `a-b` range.
    #[error("invalid ACL entry {0:?}")]
    BadEntry(String),
    /// An entry falls outside the id space of this list.
    #[error("ACL entry {entry:?} outside {min}-{max}")]
    OutOfRange {
        /// Offending entry text.
        entry: String,
        /// Lowest permitted id.
        min: u32,
        /// Highest permitted id.
        max: u32,
    },
}

/// A parsed access list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    permit: bool,
    ranges: Vec<(u32, u32)>,
}

impl Acl {
    /// An ACL that admits every id.
    #[must_use]
    pub fn permit_all(max: u32) -> Self {
        Self {
            permit: true,
            ranges: vec![(ID_MIN, max)],
        }
    }

    /// Parses ACL text with ids bounded by `max`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError`] for an unknown action, a malformed entry or an
    /// id outside `ID_MIN..=max`.
    ///
    /// # Examples
    ///
    /// ```
    /// use dmr_common::acl::Acl;
    /// let acl = Acl::parse("DENY:1,1000-2000", 16_776_415).unwrap();
    /// assert!(!acl.check(1500));
    /// assert!(acl.check(91));
    /// ```
    pub fn parse(text: &str, max: u32) -> Result<Self, AclError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::permit_all(max));
        }
        let (action, list) = text.split_once(':').unwrap_or((text, ""));
        let permit = match action.trim().to_ascii_uppercase().as_str() {
            "PERMIT" => true,
            "DENY" => false,
            other => return Err(AclError::BadAction(other.to_string())),
        };
        let mut ranges = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if entry.eq_ignore_ascii_case("ALL") {
                ranges.push((ID_MIN, max));
                continue;
            }
            let range = match entry.split_once('-') {
                Some((a, b)) => (parse_id(a, entry)?, parse_id(b, entry)?),
                None => {
                    let id = parse_id(entry, entry)?;
                    (id, id)
                }
            };
            let in_range = |v: u32| (ID_MIN..=max).contains(&v);
            if !in_range(range.0) && !in_range(range.1) {
                return Err(AclError::OutOfRange {
                    entry: entry.to_string(),
                    min: ID_MIN,
                    max,
                });
            }
            ranges.push((range.0.min(range.1), range.0.max(range.1)));
        }
        Ok(Self { permit, ranges })
    }

    /// Evaluates `id`: the list's action when any range matches, the
    /// opposite otherwise.
    #[must_use]
    pub fn check(&self, id: u32) -> bool {
        let hit = self.ranges.iter().any(|&(lo, hi)| (lo..=hi).contains(&id));
        if hit {
            self.permit
        } else {
            !self.permit
        }
    }
}

fn parse_id(text: &str, entry: &str) -> Result<u32, AclError> {
    text.trim()
        .parse()
        .map_err(|_| AclError::BadEntry(entry.to_string()))
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", if self.permit { "PERMIT" } else { "DENY" })?;
        for (i, (lo, hi)) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}-{hi}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Acl {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, crate::types::ID_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ID_MAX, PEER_MAX};

    #[test]
    fn empty_text_permits_everything() {
        let acl = Acl::parse("", ID_MAX).unwrap();
        assert!(acl.check(0));
        assert!(acl.check(ID_MAX));
    }

    #[test]
    fn permit_list_admits_only_listed() {
        let acl = Acl::parse("PERMIT:91,3100-3199", ID_MAX).unwrap();
        assert!(acl.check(91));
        assert!(acl.check(3150));
        assert!(!acl.check(92));
    }

    #[test]
    fn deny_all_rejects_everything() {
        let acl = Acl::parse("DENY:ALL", PEER_MAX).unwrap();
        assert!(!acl.check(1));
        assert!(!acl.check(u32::MAX));
    }

    #[test]
    fn reversed_range_is_normalised() {
        let acl = Acl::parse("DENY:20-10", ID_MAX).unwrap();
        assert!(!acl.check(15));
        assert_eq!(acl.to_string(), "DENY:10-20");
    }

    #[test]
    fn bad_action_is_reported() {
        assert_eq!(
            Acl::parse("ALLOW:1", ID_MAX),
            Err(AclError::BadAction("ALLOW".to_string()))
        );
    }

    #[test]
    fn bad_entry_is_reported() {
        assert!(matches!(
            Acl::parse("DENY:abc", ID_MAX),
            Err(AclError::BadEntry(_))
        ));
    }

    #[test]
    fn out_of_range_entry_is_reported() {
        assert!(matches!(
            Acl::parse("DENY:20000000", ID_MAX),
            Err(AclError::OutOfRange { .. })
        ));
    }
}
