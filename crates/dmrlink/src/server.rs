use crate::announce::{Announcer, Prompts, SpeechFrame};
use crate::clock::Clock;
use crate::config::{Mode, NetworkConfig, SystemConfig};
use crate::directory::Directory;
use crate::endpoint::{Outbox, SystemId};
use crate::error::DmrlinkError;
use crate::metrics::counters;
use crate::report::{ReportEvent, ReportHub, BRIDGE_UPD, CONFIG_UPD};
use crate::router::Router;
use crate::scheduler::{self, Scheduler, TaskEnv};
use crate::subscriber::SubscriberMap;
use dmr_common::lc::BptcLcCodec;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Largest datagram read from a socket.
const MAX_DATAGRAM: usize = 1500;
/// Queue depth between the socket readers and the core.
const INBOUND_DEPTH: usize = 1024;
/// Queue depth for paced announcement frames.
const SPEECH_DEPTH: usize = 256;

/// A datagram read by one of the socket tasks.
#[derive(Debug)]
struct Received {
    system: SystemId,
    data: Vec<u8>,
    from: SocketAddr,
}

/// A bound relay: the router plus one UDP socket per system.
#[derive(Debug)]
pub struct Relay {
    config: NetworkConfig,
    router: Router,
    sockets: Vec<Arc<UdpSocket>>,
    hub: ReportHub,
}

impl Relay {
    /// Builds the router and binds every enabled system's socket.
    /// Peer masters and OpenBridge targets are resolved once here.
    ///
    /// # Errors
    ///
    /// Returns an error if the bridge seeds are inconsistent or a socket
    /// cannot be bound.
    pub async fn bind(config: NetworkConfig, hub: ReportHub) -> Result<Self, DmrlinkError> {
        let directory = Directory::load(&config.aliases);
        let subscribers = match sub_map_path(&config) {
            Some(path) => SubscriberMap::load(&path),
            None => SubscriberMap::new(),
        };
        let mut router = Router::new(&config, directory, subscribers, Instant::now())?;

        let mut sockets = Vec::with_capacity(router.endpoints().len());
        for ep in router.endpoints() {
            let bind = format!("{}:{}", ep.config.ip, ep.config.port);
            let socket = UdpSocket::bind(&bind).await.map_err(|e| {
                DmrlinkError::Config(format!("({}) cannot bind {}: {}", ep.name(), bind, e))
            })?;
            info!(
                "({}) {} listening on {}",
                ep.name(),
                mode_name(ep.config.mode),
                socket.local_addr().map_err(DmrlinkError::Io)?
            );
            sockets.push(Arc::new(socket));
        }

        let targets: Vec<(SystemId, SystemConfig)> = router
            .endpoints()
            .iter()
            .filter(|e| e.config.mode != Mode::Master)
            .map(|e| (e.id, e.config.clone()))
            .collect();
        for (id, cfg) in targets {
            match resolve(&cfg).await {
                Some(addr) => router.set_target(id, addr, Clock::system()),
                None => warn!("({}) cannot resolve remote host {}", cfg.name, remote(&cfg).0),
            }
        }

        Ok(Self {
            config,
            router,
            sockets,
            hub,
        })
    }

    /// Local address of the socket for system `name`.
    #[must_use]
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        let id = self.router.id_of(name)?;
        self.sockets.get(id.0)?.local_addr().ok()
    }

    /// The routing core.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }
}

fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Master => "master",
        Mode::Peer => "peer",
        Mode::XlxPeer => "xlx peer",
        Mode::OpenBridge => "openbridge",
    }
}

fn sub_map_path(config: &NetworkConfig) -> Option<std::path::PathBuf> {
    (!config.aliases.sub_map_file.is_empty()).then(|| config.aliases.file(&config.aliases.sub_map_file))
}

fn remote(cfg: &SystemConfig) -> (&str, u16) {
    match cfg.mode {
        Mode::OpenBridge => (cfg.target_ip.as_str(), cfg.target_port),
        _ => (cfg.master_ip.as_str(), cfg.master_port),
    }
}

async fn resolve(cfg: &SystemConfig) -> Option<SocketAddr> {
    let (host, port) = remote(cfg);
    if host.is_empty() {
        return None;
    }
    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            debug!("({}) lookup of {} failed: {}", cfg.name, host, e);
            None
        }
    }
}

/// Runs the relay until it fails.
///
/// # Errors
///
/// Returns an error if a maintenance task fails.
pub async fn run(relay: Relay) -> Result<(), DmrlinkError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    run_with_shutdown(relay, shutdown_rx).await
}

/// Runs the relay until `shutdown_rx` changes or its sender is dropped. On
/// the way out every system sends its disconnect frames and the subscriber
/// map is saved.
///
/// # Errors
///
/// Returns [`DmrlinkError::Fatal`] if a maintenance task fails.
pub async fn run_with_shutdown(relay: Relay, mut shutdown_rx: watch::Receiver<()>) -> Result<(), DmrlinkError> {
    let Relay {
        config,
        router,
        sockets,
        hub,
    } = relay;

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Received>(INBOUND_DEPTH);
    let readers: Vec<JoinHandle<()>> = sockets
        .iter()
        .enumerate()
        .map(|(i, socket)| spawn_reader(SystemId(i), Arc::clone(socket), inbound_tx.clone()))
        .collect();
    drop(inbound_tx);

    let (speech_tx, mut speech_rx) = mpsc::channel::<SpeechFrame>(SPEECH_DEPTH);
    let languages: Vec<&str> = router.languages().iter().map(String::as_str).collect();
    let prompts = Prompts::load(std::path::Path::new(&config.global.path), &languages);
    let announcer = Announcer::new(prompts, BptcLcCodec, speech_tx);
    let (resolved_tx, mut resolved_rx) = mpsc::channel::<(SystemId, SocketAddr)>(16);

    let env = TaskEnv {
        sub_map: sub_map_path(&config),
        reports: hub.clone(),
    };
    let mut core = Core {
        router,
        sockets,
        hub,
        announcer,
        resolved_tx,
    };
    let mut schedule = Scheduler::new(&config);
    let mut out = Outbox::new();
    core.push_snapshots(Clock::system());
    info!("(CORE) relay running with {} systems", core.sockets.len());

    let result = loop {
        tokio::select! {
            Some(rx) = inbound_rx.recv() => {
                let clock = Clock::system();
                core.router.receive(rx.system, &rx.data, rx.from, clock, &mut out);
                core.flush(&mut out, clock);
            }
            Some(frame) = speech_rx.recv() => {
                let clock = Clock::system();
                core.router.speech_frame(&frame, clock, &mut out);
                core.flush(&mut out, clock);
            }
            Some((id, addr)) = resolved_rx.recv() => {
                core.router.set_target(id, addr, Clock::system());
            }
            task = schedule.tick() => {
                let clock = Clock::system();
                if let Err(e) = scheduler::run_task(task, &mut core.router, &env, clock, &mut out) {
                    error!("(CORE) STOPPING: {} task failed: {}", task.name(), e);
                    break Err(e);
                }
                core.flush(&mut out, clock);
            }
            _ = shutdown_rx.changed() => {
                info!("(CORE) shutdown signal received, deregistering systems");
                break Ok(());
            }
        }
    };

    let clock = Clock::system();
    core.router.deregister_all(clock, &mut out);
    core.flush(&mut out, clock);
    if let Some(path) = &env.sub_map {
        if let Err(e) = core.router.save_subscribers(path) {
            warn!("(CORE) could not save subscriber map to {}: {}", path.display(), e);
        }
    }
    for reader in readers {
        reader.abort();
    }
    if result.is_ok() {
        info!("server shut down gracefully");
    }
    result
}

fn spawn_reader(system: SystemId, socket: Arc<UdpSocket>, tx: mpsc::Sender<Received>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, from)) => {
                    let rx = Received {
                        system,
                        data: buf[..n].to_vec(),
                        from,
                    };
                    if tx.send(rx).await.is_err() {
                        return;
                    }
                }
                Err(e) => debug!("(CORE) receive error on system {}: {}", system, e),
            }
        }
    })
}

/// State of the core task that is not the router.
struct Core {
    router: Router,
    sockets: Vec<Arc<UdpSocket>>,
    hub: ReportHub,
    announcer: Announcer<BptcLcCodec>,
    resolved_tx: mpsc::Sender<(SystemId, SocketAddr)>,
}

impl Core {
    /// Carries out everything the router queued.
    fn flush(&mut self, out: &mut Outbox, clock: Clock) {
        for d in out.take_datagrams() {
            let Some(socket) = self.sockets.get(d.system.0) else {
                continue;
            };
            match socket.try_send_to(&d.bytes, d.addr) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => counters::frames_dropped_total("send_queue"),
                Err(e) => debug!("({}) send to {} failed: {}", self.name(d.system), d.addr, e),
            }
        }

        let (mut config, mut bridges) = (false, false);
        for event in out.take_events() {
            match event {
                ReportEvent::Bridge(text) => self.hub.bridge_event(&text),
                ReportEvent::Link(text) => self.hub.link_event(&text),
                ReportEvent::ConfigChanged => config = true,
                ReportEvent::BridgesChanged => bridges = true,
            }
        }
        if self.hub.clients() > 0 {
            if config {
                if let Err(e) = scheduler::push_config(&self.router, &self.hub, CONFIG_UPD) {
                    warn!("(REPORT) configuration snapshot failed: {}", e);
                }
            }
            if bridges {
                if let Err(e) = scheduler::push_bridges(&self.router, &self.hub, clock, BRIDGE_UPD) {
                    warn!("(REPORT) bridge snapshot failed: {}", e);
                }
            }
        }

        for req in out.take_speech() {
            self.announcer.spawn(req);
        }

        for id in out.take_resolve() {
            let Some(cfg) = self.router.endpoint(id).map(|e| e.config.clone()) else {
                continue;
            };
            let tx = self.resolved_tx.clone();
            tokio::spawn(async move {
                if let Some(addr) = resolve(&cfg).await {
                    let _ = tx.send((id, addr)).await;
                }
            });
        }
    }

    /// Seeds the report hub so clients connecting early see the tables.
    fn push_snapshots(&self, clock: Clock) {
        if let Err(e) = scheduler::push_config(&self.router, &self.hub, CONFIG_UPD) {
            warn!("(REPORT) configuration snapshot failed: {}", e);
        }
        if let Err(e) = scheduler::push_bridges(&self.router, &self.hub, clock, BRIDGE_UPD) {
            warn!("(REPORT) bridge snapshot failed: {}", e);
        }
    }

    fn name(&self, id: SystemId) -> &str {
        self.router.endpoint(id).map_or("?", |e| e.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;

    fn network(systems: Vec<SystemConfig>) -> NetworkConfig {
        let mut global = GlobalConfig::default();
        global.server_id = 2341;
        NetworkConfig {
            global,
            reports: Default::default(),
            logger: Default::default(),
            aliases: crate::config::AliasConfig {
                sub_map_file: String::new(),
                ..Default::default()
            },
            system: systems,
            bridge: Vec::new(),
        }
    }

    fn local(name: &str, mode: Mode) -> SystemConfig {
        let mut cfg = SystemConfig::new(name, mode);
        cfg.ip = "127.0.0.1".to_string();
        cfg
    }

    #[tokio::test]
    async fn test_bind_reports_local_addresses() {
        let relay = Relay::bind(network(vec![local("MASTER-A", Mode::Master)]), ReportHub::new())
            .await
            .unwrap();
        let addr = relay.local_addr("MASTER-A").unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert!(relay.local_addr("NOPE").is_none());
    }

    #[tokio::test]
    async fn test_openbridge_target_resolved_at_bind() {
        let mut obp = local("OBP-1", Mode::OpenBridge);
        obp.passphrase = "secret".to_string();
        obp.network_id = 1001;
        obp.target_ip = "127.0.0.1".to_string();
        obp.target_port = 62044;
        let relay = Relay::bind(network(vec![obp]), ReportHub::new()).await.unwrap();
        let snapshot = relay.router().config_snapshot();
        assert_eq!(snapshot["OBP-1"]["target"], "127.0.0.1:62044");
    }

    #[tokio::test]
    async fn test_shutdown_returns_ok() {
        let relay = Relay::bind(network(vec![local("MASTER-A", Mode::Master)]), ReportHub::new())
            .await
            .unwrap();
        let (shutdown, rx) = watch::channel(());
        let handle = tokio::spawn(run_with_shutdown(relay, rx));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown.send(()).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await.unwrap();
        assert!(result.unwrap().is_ok());
    }
}
