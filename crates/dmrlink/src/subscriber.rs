use crate::error::DmrlinkError;
use dmr_common::types::{DmrId, Slot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Entries older than this are trimmed.
pub const MAX_AGE_SECS: u64 = 86_400;

/// Where a radio was last heard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// System name.
    pub system: String,
    /// Timeslot.
    pub slot: Slot,
    /// Unix seconds.
    pub time: u64,
}

/// Last-heard location per radio id, used to route unit calls and data.
#[derive(Debug, Clone, Default)]
pub struct SubscriberMap {
    entries: HashMap<DmrId, Location>,
}

impl SubscriberMap {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a persisted map; a missing or corrupt file yields an empty map.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                info!("(SUBSCRIBER) no subscriber map at {}: {}", path.display(), e);
                return Self::new();
            }
        };
        match serde_json::from_str(&text) {
            Ok(entries) => Self { entries },
            Err(e) => {
                warn!("(SUBSCRIBER) {} unreadable, starting empty: {}", path.display(), e);
                Self::new()
            }
        }
    }

    /// Writes the map as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), DmrlinkError> {
        let body = serde_json::to_vec(&self.entries)?;
        std::fs::write(path, body)?;
        Ok(())
    }

    /// Records that `id` was heard on `system`/`slot`.
    pub fn update(&mut self, id: DmrId, system: &str, slot: Slot, now: u64) {
        match self.entries.get_mut(&id) {
            Some(loc) if loc.system == system => {
                loc.slot = slot;
                loc.time = now;
            }
            _ => {
                self.entries.insert(
                    id,
                    Location {
                        system: system.to_string(),
                        slot,
                        time: now,
                    },
                );
            }
        }
    }

    /// Last location of `id`.
    #[must_use]
    pub fn get(&self, id: DmrId) -> Option<&Location> {
        self.entries.get(&id)
    }

    /// Drops entries older than [`MAX_AGE_SECS`], returning how many.
    pub fn trim(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, loc| loc.time.saturating_add(MAX_AGE_SECS) >= now);
        before - self.entries.len()
    }

    /// Number of tracked radios.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_replaces_location() {
        let mut map = SubscriberMap::new();
        map.update(3_120_101, "MASTER-1", Slot::One, 100);
        map.update(3_120_101, "MASTER-2", Slot::Two, 200);
        let loc = map.get(3_120_101).unwrap();
        assert_eq!(loc.system, "MASTER-2");
        assert_eq!(loc.slot, Slot::Two);
        assert_eq!(loc.time, 200);
    }

    #[test]
    fn trim_drops_day_old_entries() {
        let mut map = SubscriberMap::new();
        map.update(1, "A", Slot::One, 0);
        map.update(2, "A", Slot::One, 10_000);
        assert_eq!(map.trim(MAX_AGE_SECS + 1), 1);
        assert!(map.get(1).is_none());
        assert!(map.get(2).is_some());
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sub_map.json");
        let mut map = SubscriberMap::new();
        map.update(3_120_101, "MASTER-1", Slot::Two, 1_700_000_000);
        map.save(&path).unwrap();
        let loaded = SubscriberMap::load(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(3_120_101), map.get(3_120_101));
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sub_map.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(SubscriberMap::load(&path).is_empty());
        assert!(SubscriberMap::load(&tmp.path().join("missing.json")).is_empty());
    }
}
