//! Repeater-supplied master options (`RPTO`), in both the native
//! `TS1_STATIC=...;DIAL=...` form and the DMR+ `StartRef=...;TS1_1=...` form.

use crate::config::SystemConfig;
use dmr_common::types::{DmrId, ALL_CALL};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Rejected options text. The whole set is ignored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    /// A static talkgroup list contains something other than digits and commas.
    #[error("{0} contains characters other than numbers and comma")]
    BadList(&'static str),
    /// A numeric field is not an integer.
    #[error("{0} is not an integer")]
    NotInteger(&'static str),
}

/// The per-master knobs a connected repeater may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterSettings {
    /// Static talkgroups on timeslot 1.
    pub ts1_static: Vec<DmrId>,
    /// Static talkgroups on timeslot 2.
    pub ts2_static: Vec<DmrId>,
    /// Reflector linked on slot 2 at startup, 0 for none.
    pub default_reflector: DmrId,
    /// User-activated timeout in minutes.
    pub default_ua_timer: u64,
    /// Periodic voice ident.
    pub voice_ident: bool,
    /// Keying a new talkgroup drops the others on that slot.
    pub single_mode: bool,
    /// Announcement language.
    pub language: String,
    /// Talkgroup for voice ident, 0 for all-call.
    pub override_ident_tg: DmrId,
}

impl MasterSettings {
    /// Settings as configured for `cfg`.
    #[must_use]
    pub fn from_config(cfg: &SystemConfig) -> Self {
        Self {
            ts1_static: static_list(&cfg.ts1_static).unwrap_or_default(),
            ts2_static: static_list(&cfg.ts2_static).unwrap_or_default(),
            default_reflector: cfg.default_reflector,
            default_ua_timer: cfg.default_ua_timer,
            voice_ident: cfg.voice_ident,
            single_mode: cfg.single_mode,
            language: cfg.announcement_language.clone(),
            override_ident_tg: cfg.override_ident_tg,
        }
    }

    /// Applies an options string on top of these settings.
    ///
    /// Static lists and the default reflector are replaced outright (absent
    /// means none); the timer, ident, single mode and language keep their
    /// current value when absent. `languages` lists the accepted `LANG`
    /// values.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] when a list or number is malformed.
    pub fn with_options(&self, text: &str, languages: &[&str]) -> Result<Self, OptionsError> {
        let opts = parse_options(text);
        let mut next = self.clone();

        next.ts1_static = match opts.get("TS1_STATIC") {
            Some(v) => static_list(v).map_err(|()| OptionsError::BadList("TS1_STATIC"))?,
            None => Vec::new(),
        };
        next.ts2_static = match opts.get("TS2_STATIC") {
            Some(v) => static_list(v).map_err(|()| OptionsError::BadList("TS2_STATIC"))?,
            None => Vec::new(),
        };
        next.default_reflector = match opts.get("DEFAULT_REFLECTOR") {
            Some(v) => integer(v, "DEFAULT_REFLECTOR")?,
            None => 0,
        };
        if let Some(v) = opts.get("DEFAULT_UA_TIMER") {
            next.default_ua_timer = u64::from(integer(v, "DEFAULT_UA_TIMER")?);
        }
        if let Some(v) = opts.get("OVERRIDE_IDENT_TG") {
            let tg = integer(v, "OVERRIDE_IDENT_TG")?;
            if tg != 0 {
                next.override_ident_tg = tg;
            }
        }
        if let Some(v) = opts.get("VOICE") {
            if let Ok(n) = v.trim().parse::<u8>() {
                next.voice_ident = n != 0;
            }
        }
        if let Some(v) = opts.get("SINGLE") {
            if let Ok(n) = v.trim().parse::<u8>() {
                next.single_mode = n != 0;
            }
        }
        if let Some(lang) = opts.get("LANG") {
            if languages.contains(&lang.as_str()) {
                next.language.clone_from(lang);
            }
        }
        Ok(next)
    }

    /// Renders these settings as an options string.
    #[must_use]
    pub fn to_options(&self) -> String {
        let join = |tgs: &[DmrId]| tgs.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        format!(
            "TS1_STATIC={};TS2_STATIC={};SINGLE={};DEFAULT_UA_TIMER={};DEFAULT_REFLECTOR={};VOICE={};LANG={}",
            join(&self.ts1_static),
            join(&self.ts2_static),
            u8::from(self.single_mode),
            self.default_ua_timer,
            self.default_reflector,
            u8::from(self.voice_ident),
            self.language
        )
    }
}

/// Splits `K=V;K=V` text into canonical keys. NULs, non-ASCII and quotes
/// are stripped; items without exactly one `=` are skipped.
#[must_use]
pub fn parse_options(text: &str) -> BTreeMap<String, String> {
    let clean: String = text
        .chars()
        .filter(|c| c.is_ascii() && *c != '\0' && *c != '\'' && *c != '"')
        .collect();
    let mut raw: BTreeMap<String, String> = BTreeMap::new();
    for item in clean.split(';') {
        let mut parts = item.split('=');
        let (Some(k), Some(v), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        raw.insert(k.trim().to_string(), v.trim().to_string());
    }

    let mut out = BTreeMap::new();
    for (alias, key) in [
        ("DIAL", "DEFAULT_REFLECTOR"),
        ("StartRef", "DEFAULT_REFLECTOR"),
        ("TIMER", "DEFAULT_UA_TIMER"),
        ("RelinkTime", "DEFAULT_UA_TIMER"),
        ("TS1", "TS1_STATIC"),
        ("TS2", "TS2_STATIC"),
        ("IDENT", "VOICE"),
        ("VOICETG", "OVERRIDE_IDENT_TG"),
        ("IDENTTG", "OVERRIDE_IDENT_TG"),
    ] {
        if let Some(v) = raw.remove(alias) {
            out.insert(key.to_string(), v);
        }
    }
    for slot in ["TS1", "TS2"] {
        let parts: Vec<String> = (1..=9)
            .map_while(|n| raw.remove(&format!("{slot}_{n}")))
            .collect();
        if !parts.is_empty() {
            out.insert(format!("{slot}_STATIC"), parts.join(","));
        }
    }
    raw.remove("UserLink");
    for (k, v) in raw {
        out.entry(k).or_insert(v);
    }
    out
}

fn integer(v: &str, field: &'static str) -> Result<DmrId, OptionsError> {
    let v = v.trim();
    if v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()) {
        return Err(OptionsError::NotInteger(field));
    }
    v.parse().map_err(|_| OptionsError::NotInteger(field))
}

/// Parses a static talkgroup list; zero and all-call entries are skipped.
fn static_list(v: &str) -> Result<Vec<DmrId>, ()> {
    let v: String = v.chars().filter(|c| !c.is_whitespace()).collect();
    if !v.bytes().all(|b| b.is_ascii_digit() || b == b',') {
        return Err(());
    }
    let mut out = Vec::new();
    for tg in v.split(',').filter(|s| !s.is_empty()) {
        let tg: DmrId = tg.parse().map_err(|_| ())?;
        if tg != 0 && tg < ALL_CALL && !out.contains(&tg) {
            out.push(tg);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn base() -> MasterSettings {
        let mut cfg = SystemConfig::new("M", Mode::Master);
        cfg.ts2_static = "235".to_string();
        cfg.default_reflector = 91;
        MasterSettings::from_config(&cfg)
    }

    #[test]
    fn native_options_replace_statics() {
        let next = base()
            .with_options("TS1_STATIC=1,2;TS2_STATIC=;DIAL=4400;TIMER=15", &["en_GB"])
            .unwrap();
        assert_eq!(next.ts1_static, vec![1, 2]);
        assert!(next.ts2_static.is_empty());
        assert_eq!(next.default_reflector, 4400);
        assert_eq!(next.default_ua_timer, 15);
    }

    #[test]
    fn missing_keys_clear_lists_and_keep_scalars() {
        let start = base();
        let next = start.with_options("SINGLE=0", &["en_GB"]).unwrap();
        assert!(next.ts2_static.is_empty());
        assert_eq!(next.default_reflector, 0);
        assert_eq!(next.default_ua_timer, start.default_ua_timer);
        assert!(!next.single_mode);
    }

    #[test]
    fn dmr_plus_style() {
        let opts = parse_options("StartRef=4012;RelinkTime=60;UserLink=1;TS1_1=235;TS1_2=9;TS2_1=3100;");
        assert_eq!(opts.get("DEFAULT_REFLECTOR").map(String::as_str), Some("4012"));
        assert_eq!(opts.get("DEFAULT_UA_TIMER").map(String::as_str), Some("60"));
        assert_eq!(opts.get("TS1_STATIC").map(String::as_str), Some("235,9"));
        assert_eq!(opts.get("TS2_STATIC").map(String::as_str), Some("3100"));
        assert!(!opts.contains_key("UserLink"));
    }

    #[test]
    fn quotes_and_nuls_are_stripped() {
        let opts = parse_options("'TS1=91';\"VOICE=0\"\0\0");
        assert_eq!(opts.get("TS1_STATIC").map(String::as_str), Some("91"));
        assert_eq!(opts.get("VOICE").map(String::as_str), Some("0"));
    }

    #[test]
    fn malformed_values_reject_the_set() {
        assert_eq!(
            base().with_options("TS1=9a", &[]),
            Err(OptionsError::BadList("TS1_STATIC"))
        );
        assert_eq!(
            base().with_options("DIAL=x", &[]),
            Err(OptionsError::NotInteger("DEFAULT_REFLECTOR"))
        );
    }

    #[test]
    fn unknown_language_is_ignored() {
        let next = base().with_options("LANG=xx_XX", &["en_GB", "de_DE"]).unwrap();
        assert_eq!(next.language, "en_GB");
        let next = base().with_options("LANG=de_DE", &["en_GB", "de_DE"]).unwrap();
        assert_eq!(next.language, "de_DE");
    }

    #[test]
    fn render_round_trips_through_parser() {
        let s = base();
        assert_eq!(s.with_options(&s.to_options(), &["en_GB"]).unwrap(), s);
    }
}
