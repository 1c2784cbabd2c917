#![allow(dead_code)]

use dmr_common::crypto;
use dmr_common::frame::{Dmrd, FrameBits, HbpFrame, PeerMetadata};
use dmr_common::lc::{HEADER_TEMPLATE, TERMINATOR_TEMPLATE};
use dmr_common::openbridge::{encode_data, ObpEnvelope};
use dmr_common::types::{CallType, DmrId, FrameType, Slot, DT_VOICE_TERM};
use dmrlink::config::{
    AliasConfig, BridgeSeed, GlobalConfig, MemberSeed, Mode, NetworkConfig, SystemConfig, TimeoutType,
};
use dmrlink::error::DmrlinkError;
use dmrlink::report::ReportHub;
use dmrlink::{run_with_shutdown, Relay};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const PASSPHRASE: &str = "passw0rd";
pub const OBP_PASSPHRASE: &str = "obp-secret";
pub const SERVER_ID: DmrId = 2341;
pub const SUB: DmrId = 3_120_001;
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub fn test_network(system: Vec<SystemConfig>, bridge: Vec<BridgeSeed>) -> NetworkConfig {
    let mut global = GlobalConfig::default();
    global.server_id = SERVER_ID;
    NetworkConfig {
        global,
        reports: Default::default(),
        logger: Default::default(),
        aliases: AliasConfig {
            sub_map_file: String::new(),
            ..Default::default()
        },
        system,
        bridge,
    }
}

pub fn master_system(name: &str) -> SystemConfig {
    let mut cfg = SystemConfig::new(name, Mode::Master);
    cfg.ip = "127.0.0.1".to_string();
    cfg.passphrase = PASSPHRASE.to_string();
    cfg
}

pub fn obp_system(name: &str, network_id: DmrId, target: SocketAddr) -> SystemConfig {
    let mut cfg = SystemConfig::new(name, Mode::OpenBridge);
    cfg.ip = "127.0.0.1".to_string();
    cfg.passphrase = OBP_PASSPHRASE.to_string();
    cfg.network_id = network_id;
    cfg.target_ip = target.ip().to_string();
    cfg.target_port = target.port();
    cfg.proto_ver = 5;
    cfg
}

/// A static bridge with every member active on TS1.
pub fn static_bridge(name: &str, tg: DmrId, systems: &[&str]) -> BridgeSeed {
    BridgeSeed {
        name: name.to_string(),
        members: systems
            .iter()
            .map(|s| MemberSeed {
                system: (*s).to_string(),
                ts: 1,
                tgid: tg,
                active: true,
                timeout: 0,
                to_type: TimeoutType::None,
                on: Vec::new(),
                off: Vec::new(),
                reset: Vec::new(),
            })
            .collect(),
    }
}

pub struct TestRelay {
    pub addrs: Vec<(String, SocketAddr)>,
    shutdown: watch::Sender<()>,
    handle: JoinHandle<Result<(), DmrlinkError>>,
}

impl TestRelay {
    pub fn addr(&self, name: &str) -> SocketAddr {
        self.addrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| *a)
            .unwrap()
    }

    pub async fn stop(self) -> Result<(), DmrlinkError> {
        self.shutdown.send(()).unwrap();
        timeout(Duration::from_secs(5), self.handle).await.unwrap().unwrap()
    }
}

pub async fn start_relay(cfg: NetworkConfig) -> TestRelay {
    let names: Vec<String> = cfg.system.iter().map(|s| s.name.clone()).collect();
    let relay = Relay::bind(cfg, ReportHub::new()).await.unwrap();
    let addrs = names
        .into_iter()
        .map(|n| {
            let a = relay.local_addr(&n).unwrap();
            (n, a)
        })
        .collect();
    let (shutdown, rx) = watch::channel(());
    let handle = tokio::spawn(run_with_shutdown(relay, rx));
    TestRelay {
        addrs,
        shutdown,
        handle,
    }
}

/// A repeater speaking HBP to one master.
pub struct TestRepeater {
    pub socket: UdpSocket,
    pub master: SocketAddr,
    pub peer_id: DmrId,
}

impl TestRepeater {
    pub async fn new(master: SocketAddr, peer_id: DmrId) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self {
            socket,
            master,
            peer_id,
        }
    }

    pub async fn send(&self, data: &[u8]) {
        self.socket.send_to(data, self.master).await.unwrap();
    }

    pub async fn recv(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 1500];
        let (n, _) = timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for the master")
            .unwrap();
        buf.truncate(n);
        buf
    }

    /// Next datagram starting with `prefix`, skipping others.
    pub async fn recv_prefixed(&self, prefix: &[u8]) -> Vec<u8> {
        loop {
            let data = self.recv().await;
            if data.starts_with(prefix) {
                return data;
            }
        }
    }

    /// Next burst, if one arrives within `wait`.
    pub async fn try_recv_dmrd(&self, wait: Duration) -> Option<Dmrd> {
        let mut buf = vec![0u8; 1500];
        loop {
            let (n, _) = timeout(wait, self.socket.recv_from(&mut buf)).await.ok()?.ok()?;
            if buf[..n].starts_with(b"DMRD") {
                return Dmrd::parse(&buf[..n]).ok();
            }
        }
    }

    pub async fn salt(&self) -> u32 {
        self.send(&HbpFrame::Login { peer_id: self.peer_id }.serialize()).await;
        let ack = self.recv_prefixed(b"RPTACK").await;
        u32::from_be_bytes(ack[6..10].try_into().unwrap())
    }

    pub async fn login(&self) {
        let salt = self.salt().await;
        let hash = crypto::challenge_response(salt, PASSPHRASE.as_bytes());
        self.send(
            &HbpFrame::AuthResponse {
                peer_id: self.peer_id,
                hash,
            }
            .serialize(),
        )
        .await;
        self.recv_prefixed(b"RPTACK").await;
        let meta = PeerMetadata {
            callsign: "G0ABC".to_string(),
            ..PeerMetadata::default()
        };
        self.send(
            &HbpFrame::Config {
                peer_id: self.peer_id,
                meta: Box::new(meta),
            }
            .serialize(),
        )
        .await;
        self.recv_prefixed(b"RPTACK").await;
    }
}

pub fn voice(seq: u8, dst: DmrId, peer: DmrId, stream: u32, vseq: u8) -> Dmrd {
    Dmrd {
        seq,
        rf_src: SUB,
        dst,
        peer,
        bits: FrameBits {
            slot: Slot::One,
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

pub fn header(dst: DmrId, peer: DmrId, stream: u32) -> Dmrd {
    let mut d = voice(0, dst, peer, stream, 0);
    d.bits = FrameBits::voice_header(Slot::One);
    d.payload = HEADER_TEMPLATE;
    d
}

pub fn terminator(seq: u8, dst: DmrId, peer: DmrId, stream: u32) -> Dmrd {
    let mut d = voice(seq, dst, peer, stream, 0);
    d.bits.frame_type = FrameType::DataSync;
    d.bits.dtype_vseq = DT_VOICE_TERM;
    d.payload = TERMINATOR_TEMPLATE;
    d
}

/// A v5 OpenBridge data frame stamped `age` in the past.
pub fn obp_frame(dmrd: &Dmrd, network_id: DmrId, age: Duration) -> Vec<u8> {
    let sent = crypto::unix_now_ns().saturating_sub(u64::try_from(age.as_nanos()).unwrap());
    let env = ObpEnvelope {
        server_id: network_id,
        timestamp_ns: sent,
        hops: 1,
        source_server: network_id,
        source_repeater: 0,
    };
    encode_data(dmrd, 5, &crypto::obp_key(OBP_PASSPHRASE.as_bytes()), &env)
}
