//! Id directories read from the alias files: subscribers, repeaters,
//! talkgroups and the OpenBridge server list.
//!
//! JSON directories may be either a flat `{"id": "name"}` object or any
//! document containing arrays of records with an `id` and a `callsign`
//! (or `name`) field, which covers the common radio id database dumps.

use crate::config::AliasConfig;
use dmr_common::types::DmrId;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Loaded id directories.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    subscribers: HashMap<DmrId, String>,
    local_subscribers: HashMap<DmrId, String>,
    peers: HashMap<DmrId, String>,
    talkgroups: HashMap<DmrId, String>,
    server_ids: HashSet<String>,
}

impl Directory {
    /// Loads every configured file. Missing or unreadable files leave that
    /// directory empty and log a warning.
    #[must_use]
    pub fn load(cfg: &AliasConfig) -> Self {
        let stale = Duration::from_secs(cfg.stale_days.saturating_mul(86_400));
        let json = |name: &str| {
            let path = cfg.file(name);
            warn_if_stale(&path, stale);
            load_json_ids(&path)
        };
        let dir = Self {
            subscribers: json(&cfg.subscriber_file),
            local_subscribers: json(&cfg.local_subscriber_file),
            peers: json(&cfg.peer_file),
            talkgroups: json(&cfg.talkgroup_file),
            server_ids: load_server_ids(&cfg.file(&cfg.server_id_file)),
        };
        info!(
            "(ALIAS) loaded {} subscribers, {} local subscribers, {} peers, {} talkgroups, {} server ids",
            dir.subscribers.len(),
            dir.local_subscribers.len(),
            dir.peers.len(),
            dir.talkgroups.len(),
            dir.server_ids.len()
        );
        dir
    }

    /// Adds a subscriber entry.
    pub fn insert_subscriber(&mut self, id: DmrId, callsign: &str) {
        self.subscribers.insert(id, callsign.to_string());
    }

    /// Adds a repeater entry.
    pub fn insert_peer(&mut self, id: DmrId, callsign: &str) {
        self.peers.insert(id, callsign.to_string());
    }

    /// Adds a server-list prefix.
    pub fn insert_server_id(&mut self, prefix: &str) {
        self.server_ids.insert(prefix.to_string());
    }

    /// Looks an id up by its first seven digits in the local subscriber,
    /// subscriber and repeater directories, in that order. Hotspots append
    /// two digits to the owner's radio id, hence the truncation.
    #[must_use]
    pub fn lookup(&self, id: DmrId) -> Option<&str> {
        let id = first_digits(id, 7);
        self.local_subscribers
            .get(&id)
            .or_else(|| self.subscribers.get(&id))
            .or_else(|| self.peers.get(&id))
            .map(String::as_str)
    }

    /// Whether `id` is a registered subscriber or repeater.
    #[must_use]
    pub fn validate_id(&self, id: DmrId) -> bool {
        self.lookup(id).is_some()
    }

    /// Whether the first four digits of `id` are on the server list.
    #[must_use]
    pub fn listed_server(&self, id: DmrId) -> bool {
        let text = id.to_string();
        text.get(..4).is_some_and(|p| self.server_ids.contains(p))
    }

    /// Display alias for a subscriber, falling back to the number.
    #[must_use]
    pub fn subscriber_alias(&self, id: DmrId) -> String {
        self.local_subscribers
            .get(&id)
            .or_else(|| self.subscribers.get(&id))
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    /// Display alias for a talkgroup, falling back to the number.
    #[must_use]
    pub fn talkgroup_alias(&self, id: DmrId) -> String {
        self.talkgroups
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

/// Keeps the leading `n` decimal digits of `id`.
#[must_use]
pub fn first_digits(id: DmrId, n: usize) -> DmrId {
    let text = id.to_string();
    if text.len() <= n {
        return id;
    }
    text[..n].parse().unwrap_or(id)
}

fn warn_if_stale(path: &Path, stale: Duration) {
    let age = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok());
    if let Some(age) = age {
        if !stale.is_zero() && age > stale {
            warn!("(ALIAS) {} is {} days old", path.display(), age.as_secs() / 86_400);
        }
    }
}

fn load_json_ids(path: &Path) -> HashMap<DmrId, String> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            warn!("(ALIAS) {} could not be read: {}", path.display(), e);
            return HashMap::new();
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(v) => {
            let mut out = HashMap::new();
            collect_ids(&v, &mut out);
            out
        }
        Err(e) => {
            warn!("(ALIAS) {} is not valid JSON: {}", path.display(), e);
            HashMap::new()
        }
    }
}

fn as_id(v: &Value) -> Option<DmrId> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| DmrId::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn collect_ids(v: &Value, out: &mut HashMap<DmrId, String>) {
    match v {
        Value::Array(items) => {
            for item in items {
                collect_ids(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(id) = map.get("id").and_then(as_id) {
                let name = map
                    .get("callsign")
                    .or_else(|| map.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                out.insert(id, name.to_string());
                return;
            }
            for (key, value) in map {
                match (key.parse::<DmrId>(), value) {
                    (Ok(id), Value::String(name)) => {
                        out.insert(id, name.clone());
                    }
                    _ => collect_ids(value, out),
                }
            }
        }
        _ => {}
    }
}

fn load_server_ids(path: &Path) -> HashSet<String> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            warn!("(ALIAS) {} could not be read: {}", path.display(), e);
            return HashSet::new();
        }
    };
    let mut lines = text.lines();
    let column = lines
        .next()
        .and_then(|header| header.split('\t').position(|h| h.trim() == "OPB Net ID"))
        .unwrap_or(0);
    lines
        .filter_map(|line| line.split('\t').nth(column))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, body: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    fn aliases(dir: &Path) -> AliasConfig {
        AliasConfig {
            path: dir.to_string_lossy().into_owned(),
            ..AliasConfig::default()
        }
    }

    #[test]
    fn loads_record_arrays_and_flat_maps() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "subscriber_ids.json",
            r#"{"count":2,"results":[{"id":3120101,"callsign":"N0CALL"},{"id":"3120102","callsign":"N1CALL"}]}"#,
        );
        write(tmp.path(), "talkgroup_ids.json", r#"{"91":"Worldwide","235":"UK"}"#);
        write(
            tmp.path(),
            "peer_ids.json",
            r#"{"rptrs":[{"id":312000,"callsign":"W1RPT"}]}"#,
        );
        let dir = Directory::load(&aliases(tmp.path()));
        assert_eq!(dir.lookup(3_120_101), Some("N0CALL"));
        assert_eq!(dir.lookup(3_120_102), Some("N1CALL"));
        assert_eq!(dir.lookup(312_000), Some("W1RPT"));
        assert_eq!(dir.talkgroup_alias(235), "UK");
        assert_eq!(dir.talkgroup_alias(9), "9");
    }

    #[test]
    fn hotspot_suffix_matches_owner() {
        let mut dir = Directory::default();
        dir.insert_subscriber(3_120_101, "N0CALL");
        assert!(dir.validate_id(312_010_101));
        assert!(!dir.validate_id(312_010_201 + 10_000_000));
    }

    #[test]
    fn local_subscribers_take_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "subscriber_ids.json", r#"{"3120101":"GLOBAL"}"#);
        write(tmp.path(), "local_subscriber_ids.json", r#"{"3120101":"LOCAL"}"#);
        let dir = Directory::load(&aliases(tmp.path()));
        assert_eq!(dir.lookup(3_120_101), Some("LOCAL"));
        assert_eq!(dir.subscriber_alias(3_120_101), "LOCAL");
    }

    #[test]
    fn server_list_matches_first_four_digits() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "server_ids.tsv",
            "Country\tOPB Net ID\nUK\t2341\nUS\t3102\n",
        );
        let dir = Directory::load(&aliases(tmp.path()));
        assert!(dir.listed_server(2341));
        assert!(dir.listed_server(23_415));
        assert!(!dir.listed_server(2342));
        assert!(!dir.listed_server(234));
    }

    #[test]
    fn missing_files_are_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Directory::load(&aliases(tmp.path()));
        assert!(!dir.validate_id(3_120_101));
        assert!(!dir.listed_server(2341));
    }

    #[test]
    fn first_digits_truncates() {
        assert_eq!(first_digits(312_010_101, 7), 3_120_101);
        assert_eq!(first_digits(91, 7), 91);
    }
}
