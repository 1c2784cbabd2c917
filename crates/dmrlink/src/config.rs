use clap::Parser;
use dmr_common::acl::Acl;
use dmr_common::types::{DmrId, ID_MAX, PEER_MAX};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// CLI arguments for the relay.
#[derive(Parser, Debug, Clone)]
#[command(name = "dmrlink")]
#[command(about = "DMR network relay")]
#[command(version)]
pub struct Args {
    /// Path to the network configuration file.
    #[arg(short = 'c', long, env = "DMRLINK_CONFIG")]
    pub config: Option<PathBuf>,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "DMRLINK_METRICS_ADDR")]
    pub metrics_addr: SocketAddr,
    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Write logs to a file instead of stderr.
    #[arg(long, env = "DMRLINK_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Role a configured system plays on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Mode {
    /// Accepts HBP logins from repeaters and hotspots.
    #[serde(rename = "master", alias = "MASTER")]
    Master,
    /// Logs in to an upstream HBP master.
    #[serde(rename = "peer", alias = "PEER")]
    Peer,
    /// Logs in to an XLX reflector and selects a module.
    #[serde(rename = "xlxpeer", alias = "XLXPEER")]
    XlxPeer,
    /// Server-to-server OpenBridge / FreeBridge link.
    #[serde(rename = "openbridge", alias = "OPENBRIDGE")]
    OpenBridge,
}

impl Mode {
    /// Upper-case name used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Master => "MASTER",
            Self::Peer => "PEER",
            Self::XlxPeer => "XLXPEER",
            Self::OpenBridge => "OPENBRIDGE",
        }
    }
}

/// Expiry policy of a bridge member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
pub enum TimeoutType {
    /// Active until the timer runs out.
    #[serde(rename = "ON")]
    On,
    /// Inactive until the timer runs out.
    #[serde(rename = "OFF")]
    Off,
    /// Never changes by timer.
    #[serde(rename = "NONE")]
    None,
    /// Created for static OpenBridge traffic.
    #[serde(rename = "STATIC")]
    Static,
}

/// Process-wide settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Base directory for voice prompt files.
    pub path: String,
    /// Seconds between maintenance ticks and peer pings.
    pub ping_time: u64,
    /// Pings a peer may miss before it is dropped.
    pub max_missed: u32,
    /// Whether the global ACLs are applied.
    pub use_acl: bool,
    /// Global registration ACL (peer ids).
    pub reg_acl: String,
    /// Global subscriber ACL.
    pub sub_acl: String,
    /// Global timeslot 1 talkgroup ACL.
    pub tg1_acl: String,
    /// Global timeslot 2 talkgroup ACL.
    pub tg2_acl: String,
    /// Create static bridges for unknown OpenBridge talkgroups.
    pub gen_stat_bridges: bool,
    /// Accept any challenge response when a master has no passphrase.
    pub allow_null_passphrase: bool,
    /// Comma separated prompt languages to load.
    pub announcement_languages: String,
    /// Local network id written to outbound OpenBridge frames.
    pub server_id: DmrId,
    /// Forward unit data to the `DATA-GATEWAY` OpenBridge system.
    pub data_gateway: bool,
    /// Check OpenBridge source server ids against the server list.
    pub validate_server_ids: bool,
    /// Milliseconds a slot stays reserved for a stream after its last frame.
    pub stream_timeout_ms: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            path: "./".to_string(),
            ping_time: 10,
            max_missed: 3,
            use_acl: true,
            reg_acl: "PERMIT:ALL".to_string(),
            sub_acl: "DENY:1".to_string(),
            tg1_acl: "PERMIT:ALL".to_string(),
            tg2_acl: "PERMIT:ALL".to_string(),
            gen_stat_bridges: true,
            allow_null_passphrase: true,
            announcement_languages: "en_GB".to_string(),
            server_id: 0,
            data_gateway: false,
            validate_server_ids: false,
            stream_timeout_ms: 360,
        }
    }
}

/// Reporting server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportsConfig {
    /// Whether the reporting server runs.
    pub enabled: bool,
    /// Seconds between snapshot pushes.
    pub interval: u64,
    /// TCP port to listen on.
    pub port: u16,
    /// Client IP allowlist; `*` admits anyone.
    pub clients: Vec<String>,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 60,
            port: 4321,
            clients: vec!["127.0.0.1".to_string()],
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggerConfig {
    /// Log file, stderr when unset.
    pub file: Option<PathBuf>,
    /// Filter directive used when neither `RUST_LOG` nor `-v` is given.
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: "info".to_string(),
        }
    }
}

/// Alias and persistence file locations.
#[derive(Debug, Clone, Deserialize)]
pub struct AliasConfig {
    /// Directory holding the files below.
    pub path: String,
    /// Subscriber id directory (JSON).
    pub subscriber_file: String,
    /// Repeater id directory (JSON).
    pub peer_file: String,
    /// Talkgroup name directory (JSON).
    pub talkgroup_file: String,
    /// OpenBridge server id list (TSV).
    pub server_id_file: String,
    /// Locally maintained subscriber ids (JSON).
    pub local_subscriber_file: String,
    /// Persisted subscriber location map (JSON).
    pub sub_map_file: String,
    /// Age in days after which a directory file is reported stale.
    pub stale_days: u64,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            path: "./json/".to_string(),
            subscriber_file: "subscriber_ids.json".to_string(),
            peer_file: "peer_ids.json".to_string(),
            talkgroup_file: "talkgroup_ids.json".to_string(),
            server_id_file: "server_ids.tsv".to_string(),
            local_subscriber_file: "local_subscriber_ids.json".to_string(),
            sub_map_file: "sub_map.json".to_string(),
            stale_days: 1,
        }
    }
}

impl AliasConfig {
    /// Full path of one of the configured files.
    #[must_use]
    pub fn file(&self, name: &str) -> PathBuf {
        Path::new(&self.path).join(name)
    }
}

fn default_true() -> bool {
    true
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_hangtime() -> u64 {
    10
}

fn default_acl() -> String {
    "PERMIT:ALL".to_string()
}

fn default_max_peers() -> usize {
    1
}

fn default_ua_timer() -> u64 {
    10
}

fn default_language() -> String {
    "en_GB".to_string()
}

fn default_proto_ver() -> u8 {
    5
}

/// One `[[system]]` entry.
///
/// Fields that only apply to some modes are ignored by the others.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// Unique system name.
    pub name: String,
    /// Role of this system.
    pub mode: Mode,
    /// Disabled systems are not started.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Local bind address.
    #[serde(default = "default_ip")]
    pub ip: String,
    /// Local UDP port (0 picks one).
    #[serde(default)]
    pub port: u16,
    /// Shared secret.
    #[serde(default)]
    pub passphrase: String,
    /// Seconds a slot keeps priority for its last talkgroup.
    #[serde(default = "default_hangtime")]
    pub group_hangtime: u64,
    /// Whether the per-system ACLs are applied.
    #[serde(default = "default_true")]
    pub use_acl: bool,
    /// Registration ACL (master).
    #[serde(default = "default_acl")]
    pub reg_acl: String,
    /// Subscriber ACL.
    #[serde(default = "default_acl")]
    pub sub_acl: String,
    /// Timeslot 1 talkgroup ACL.
    #[serde(default = "default_acl")]
    pub tg1_acl: String,
    /// Timeslot 2 talkgroup ACL.
    #[serde(default = "default_acl")]
    pub tg2_acl: String,

    /// Repeat traffic from one peer to the master's other peers.
    #[serde(default = "default_true")]
    pub repeat: bool,
    /// Maximum concurrent peers on a master.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Minutes a user-activated talkgroup stays linked.
    #[serde(default = "default_ua_timer")]
    pub default_ua_timer: u64,
    /// Sticky single-talkgroup mode: keying a new talkgroup drops the old.
    #[serde(default = "default_true")]
    pub single_mode: bool,
    /// Periodic voice identification.
    #[serde(default = "default_true")]
    pub voice_ident: bool,
    /// Comma separated static talkgroups on timeslot 1.
    #[serde(default)]
    pub ts1_static: String,
    /// Comma separated static talkgroups on timeslot 2.
    #[serde(default)]
    pub ts2_static: String,
    /// Reflector linked on timeslot 2 at startup (0 for none).
    #[serde(default)]
    pub default_reflector: DmrId,
    /// Prompt language.
    #[serde(default = "default_language")]
    pub announcement_language: String,
    /// Allow peer ids that are not in the directory.
    #[serde(default = "default_true")]
    pub allow_unreg_id: bool,
    /// Send `PRBL` quarantine notices to a hotspot proxy on rejection.
    #[serde(default = "default_true")]
    pub proxy_control: bool,
    /// Talkgroup used for voice ident (0 sends to the all-call id).
    #[serde(default)]
    pub override_ident_tg: DmrId,
    /// Announce reflector unlinks on the affected slot.
    #[serde(default)]
    pub reflector_announce: bool,

    /// Skip peer id checks on acknowledgements and data.
    #[serde(default)]
    pub loose: bool,
    /// Upstream master host.
    #[serde(default)]
    pub master_ip: String,
    /// Upstream master port.
    #[serde(default)]
    pub master_port: u16,
    /// Our repeater id towards the master.
    #[serde(default)]
    pub radio_id: DmrId,
    /// Callsign sent in `RPTC`.
    #[serde(default)]
    pub callsign: String,
    /// Receive frequency in Hz.
    #[serde(default)]
    pub rx_freq: String,
    /// Transmit frequency in Hz.
    #[serde(default)]
    pub tx_freq: String,
    /// Transmit power.
    #[serde(default)]
    pub tx_power: String,
    /// Colour code.
    #[serde(default)]
    pub colorcode: String,
    /// Latitude.
    #[serde(default)]
    pub latitude: String,
    /// Longitude.
    #[serde(default)]
    pub longitude: String,
    /// Antenna height.
    #[serde(default)]
    pub height: String,
    /// Location text.
    #[serde(default)]
    pub location: String,
    /// Description text.
    #[serde(default)]
    pub description: String,
    /// Slot activity flags.
    #[serde(default)]
    pub slots: String,
    /// URL.
    #[serde(default)]
    pub url: String,
    /// Software id.
    #[serde(default)]
    pub software_id: String,
    /// Package id.
    #[serde(default)]
    pub package_id: String,
    /// `RPTO` options string; empty sends none.
    #[serde(default)]
    pub options: String,
    /// XLX module to select (1 = A ... 26 = Z, sent as 4000 + n).
    #[serde(default)]
    pub xlx_module: DmrId,

    /// Network id expected in inbound frames.
    #[serde(default)]
    pub network_id: DmrId,
    /// Remote host.
    #[serde(default)]
    pub target_ip: String,
    /// Remote port.
    #[serde(default)]
    pub target_port: u16,
    /// Accept frames from any source address.
    #[serde(default)]
    pub relax_checks: bool,
    /// Exchange bridge-control frames.
    #[serde(default)]
    pub enhanced_obp: bool,
    /// Protocol version (1..=5).
    #[serde(default = "default_proto_ver")]
    pub proto_ver: u8,
    /// Talkgroup ACL.
    #[serde(default = "default_acl")]
    pub tgid_acl: String,
}

impl SystemConfig {
    /// A system with every optional field at its default.
    #[must_use]
    pub fn new(name: &str, mode: Mode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            enabled: true,
            ip: default_ip(),
            port: 0,
            passphrase: String::new(),
            group_hangtime: default_hangtime(),
            use_acl: true,
            reg_acl: default_acl(),
            sub_acl: default_acl(),
            tg1_acl: default_acl(),
            tg2_acl: default_acl(),
            repeat: true,
            max_peers: default_max_peers(),
            default_ua_timer: default_ua_timer(),
            single_mode: true,
            voice_ident: true,
            ts1_static: String::new(),
            ts2_static: String::new(),
            default_reflector: 0,
            announcement_language: default_language(),
            allow_unreg_id: true,
            proxy_control: true,
            override_ident_tg: 0,
            reflector_announce: false,
            loose: false,
            master_ip: String::new(),
            master_port: 0,
            radio_id: 0,
            callsign: String::new(),
            rx_freq: String::new(),
            tx_freq: String::new(),
            tx_power: String::new(),
            colorcode: String::new(),
            latitude: String::new(),
            longitude: String::new(),
            height: String::new(),
            location: String::new(),
            description: String::new(),
            slots: String::new(),
            url: String::new(),
            software_id: String::new(),
            package_id: String::new(),
            options: String::new(),
            xlx_module: 0,
            network_id: 0,
            target_ip: String::new(),
            target_port: 0,
            relax_checks: false,
            enhanced_obp: false,
            proto_ver: default_proto_ver(),
            tgid_acl: default_acl(),
        }
    }

    /// Whether this system speaks HBP (master, peer or XLX peer).
    #[must_use]
    pub fn is_hbp(&self) -> bool {
        !matches!(self.mode, Mode::OpenBridge)
    }
}

/// Parses a comma separated talkgroup list, ignoring empty entries.
///
/// # Errors
///
/// Returns the offending entry when it is not a number.
pub fn parse_tg_list(text: &str) -> Result<Vec<DmrId>, String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| format!("invalid talkgroup {s:?}")))
        .collect()
}

/// One member of a configured bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberSeed {
    /// System name.
    pub system: String,
    /// Timeslot (1 or 2).
    pub ts: u8,
    /// Talkgroup on that system.
    pub tgid: DmrId,
    /// Initial state.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Timer in minutes.
    #[serde(default)]
    pub timeout: u64,
    /// Timer policy.
    #[serde(default = "default_to_type")]
    pub to_type: TimeoutType,
    /// Ids that activate the member when keyed.
    #[serde(default)]
    pub on: Vec<DmrId>,
    /// Ids that deactivate the member when keyed.
    #[serde(default)]
    pub off: Vec<DmrId>,
    /// Ids that reset the member's timer when keyed.
    #[serde(default)]
    pub reset: Vec<DmrId>,
}

fn default_to_type() -> TimeoutType {
    TimeoutType::None
}

/// One `[[bridge]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSeed {
    /// Bridge name; a leading `#` marks a reflector.
    pub name: String,
    /// Members.
    #[serde(default)]
    pub members: Vec<MemberSeed>,
}

/// The whole network file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub global: GlobalConfig,
    /// Reporting server.
    #[serde(default)]
    pub reports: ReportsConfig,
    /// Logging.
    #[serde(default)]
    pub logger: LoggerConfig,
    /// Alias directories.
    #[serde(default)]
    pub aliases: AliasConfig,
    /// Configured systems.
    #[serde(default)]
    pub system: Vec<SystemConfig>,
    /// Bridge seeds.
    #[serde(default)]
    pub bridge: Vec<BridgeSeed>,
}

impl NetworkConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        let g = &self.global;
        if g.ping_time == 0 {
            return Err("global.ping_time must be greater than 0".to_string());
        }
        if g.ping_time > 3600 {
            return Err("global.ping_time exceeds reasonable limit (3600 seconds)".to_string());
        }
        if g.max_missed == 0 {
            return Err("global.max_missed must be greater than 0".to_string());
        }
        if g.stream_timeout_ms == 0 {
            return Err("global.stream_timeout_ms must be greater than 0".to_string());
        }
        if g.server_id > PEER_MAX {
            return Err("global.server_id out of range".to_string());
        }
        for (field, text, max) in [
            ("global.reg_acl", &g.reg_acl, PEER_MAX),
            ("global.sub_acl", &g.sub_acl, ID_MAX),
            ("global.tg1_acl", &g.tg1_acl, ID_MAX),
            ("global.tg2_acl", &g.tg2_acl, ID_MAX),
        ] {
            Acl::parse(text, max).map_err(|e| format!("{field}: {e}"))?;
        }

        if self.reports.enabled && self.reports.interval == 0 {
            return Err("reports.interval must be greater than 0".to_string());
        }

        let mut names = HashSet::new();
        for s in &self.system {
            if s.name.is_empty() {
                return Err("system.name must not be empty".to_string());
            }
            if !names.insert(s.name.as_str()) {
                return Err(format!("system.name {:?} is not unique", s.name));
            }
            validate_system(s)?;
        }

        for b in &self.bridge {
            if b.name.is_empty() {
                return Err("bridge.name must not be empty".to_string());
            }
            let mut slots = HashSet::new();
            for m in &b.members {
                if !names.contains(m.system.as_str()) {
                    return Err(format!(
                        "bridge {:?}: member system {:?} is not configured",
                        b.name, m.system
                    ));
                }
                if m.ts != 1 && m.ts != 2 {
                    return Err(format!("bridge {:?}: ts must be 1 or 2", b.name));
                }
                if m.tgid > ID_MAX {
                    return Err(format!("bridge {:?}: tgid out of range", b.name));
                }
                if !slots.insert((m.system.as_str(), m.ts)) {
                    return Err(format!(
                        "bridge {:?}: duplicate member {} ts {}",
                        b.name, m.system, m.ts
                    ));
                }
            }
        }
        Ok(())
    }
}

fn validate_system(s: &SystemConfig) -> Result<(), String> {
    let name = &s.name;
    for (field, text, max) in [
        ("reg_acl", &s.reg_acl, PEER_MAX),
        ("sub_acl", &s.sub_acl, ID_MAX),
        ("tg1_acl", &s.tg1_acl, ID_MAX),
        ("tg2_acl", &s.tg2_acl, ID_MAX),
        ("tgid_acl", &s.tgid_acl, ID_MAX),
    ] {
        Acl::parse(text, max).map_err(|e| format!("system {name:?} {field}: {e}"))?;
    }
    match s.mode {
        Mode::Master => {
            if s.max_peers == 0 {
                return Err(format!("system {name:?}: max_peers must be greater than 0"));
            }
            parse_tg_list(&s.ts1_static).map_err(|e| format!("system {name:?} ts1_static: {e}"))?;
            parse_tg_list(&s.ts2_static).map_err(|e| format!("system {name:?} ts2_static: {e}"))?;
            if s.default_reflector > ID_MAX {
                return Err(format!("system {name:?}: default_reflector out of range"));
            }
        }
        Mode::Peer | Mode::XlxPeer => {
            if s.master_ip.is_empty() {
                return Err(format!("system {name:?}: master_ip must not be empty"));
            }
            if s.master_port == 0 {
                return Err(format!("system {name:?}: master_port must be greater than 0"));
            }
            if s.radio_id == 0 {
                return Err(format!("system {name:?}: radio_id must be greater than 0"));
            }
            if s.mode == Mode::XlxPeer && !(1..=26).contains(&s.xlx_module) {
                return Err(format!("system {name:?}: xlx_module must be 1..=26"));
            }
        }
        Mode::OpenBridge => {
            if s.target_ip.is_empty() {
                return Err(format!("system {name:?}: target_ip must not be empty"));
            }
            if s.target_port == 0 {
                return Err(format!("system {name:?}: target_port must be greater than 0"));
            }
            if s.passphrase.is_empty() || s.passphrase.len() > dmr_common::crypto::OBP_KEY_LEN {
                return Err(format!(
                    "system {name:?}: passphrase must be 1-{} bytes",
                    dmr_common::crypto::OBP_KEY_LEN
                ));
            }
            if !(1..=dmr_common::openbridge::MAX_VERSION).contains(&s.proto_ver) {
                return Err(format!("system {name:?}: proto_ver must be 1..=5"));
            }
            if s.network_id == 0 {
                return Err(format!("system {name:?}: network_id must be greater than 0"));
            }
        }
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<NetworkConfig> {
    let g = GlobalConfig::default();
    let r = ReportsConfig::default();
    let l = LoggerConfig::default();
    let a = AliasConfig::default();
    let mut builder = config::Config::builder()
        .set_default("global.path", g.path.as_str())?
        .set_default("global.ping_time", g.ping_time as i64)?
        .set_default("global.max_missed", i64::from(g.max_missed))?
        .set_default("global.use_acl", g.use_acl)?
        .set_default("global.reg_acl", g.reg_acl.as_str())?
        .set_default("global.sub_acl", g.sub_acl.as_str())?
        .set_default("global.tg1_acl", g.tg1_acl.as_str())?
        .set_default("global.tg2_acl", g.tg2_acl.as_str())?
        .set_default("global.gen_stat_bridges", g.gen_stat_bridges)?
        .set_default("global.allow_null_passphrase", g.allow_null_passphrase)?
        .set_default(
            "global.announcement_languages",
            g.announcement_languages.as_str(),
        )?
        .set_default("global.server_id", i64::from(g.server_id))?
        .set_default("global.data_gateway", g.data_gateway)?
        .set_default("global.validate_server_ids", g.validate_server_ids)?
        .set_default("global.stream_timeout_ms", g.stream_timeout_ms as i64)?
        .set_default("reports.enabled", r.enabled)?
        .set_default("reports.interval", r.interval as i64)?
        .set_default("reports.port", i64::from(r.port))?
        .set_default("reports.clients", r.clients)?
        .set_default("logger.level", l.level.as_str())?
        .set_default("aliases.path", a.path.as_str())?
        .set_default("aliases.subscriber_file", a.subscriber_file.as_str())?
        .set_default("aliases.peer_file", a.peer_file.as_str())?
        .set_default("aliases.talkgroup_file", a.talkgroup_file.as_str())?
        .set_default("aliases.server_id_file", a.server_id_file.as_str())?
        .set_default(
            "aliases.local_subscriber_file",
            a.local_subscriber_file.as_str(),
        )?
        .set_default("aliases.sub_map_file", a.sub_map_file.as_str())?
        .set_default("aliases.stale_days", a.stale_days as i64)?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    } else {
        let native_path = dirs::config_dir().map(|d| d.join("dmrlink").join("dmrlink.toml"));
        let xdg_path = dirs::home_dir().map(|d| {
            d.join(".config")
                .join("dmrlink")
                .join("dmrlink.toml")
        });

        let resolved = native_path
            .filter(|p| p.exists())
            .or_else(|| xdg_path.filter(|p| p.exists()));

        if let Some(config_path) = resolved {
            builder = builder.add_source(config::File::from(config_path));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DMRLINK")
            .prefix_separator("_")
            .separator("__"),
    );

    let settings = builder.build()?;
    let config: NetworkConfig = settings.try_deserialize()?;

    Ok(config)
}
