//! The seam between the router and the per-role protocol state machines.
//!
//! Every configured system is an [`Endpoint`] holding one [`Role`]. The
//! router talks to a role only through the [`Link`] capabilities, and a
//! role only talks to the network through an [`Outbox`].

use crate::announce::SpeechRequest;
use crate::auth::Acls;
use crate::clock::Clock;
use crate::config::{GlobalConfig, Mode, SystemConfig};
use crate::directory::Directory;
use crate::master::Master;
use crate::openbridge::ObpLink;
use crate::peer::Peer;
use crate::report::ReportEvent;
use dmr_common::acl::AclError;
use dmr_common::frame::Dmrd;
use dmr_common::types::DmrId;
use std::fmt;
use std::net::SocketAddr;

/// Index of a system in the router's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(pub usize);

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One datagram to write from a system's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sending system.
    pub system: SystemId,
    /// Destination.
    pub addr: SocketAddr,
    /// Wire bytes.
    pub bytes: Vec<u8>,
}

/// Side effects produced while handling one event on the core task.
#[derive(Debug, Default)]
pub struct Outbox {
    datagrams: Vec<Datagram>,
    events: Vec<ReportEvent>,
    speech: Vec<SpeechRequest>,
    resolve: Vec<SystemId>,
}

impl Outbox {
    /// An empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a datagram.
    pub fn send(&mut self, system: SystemId, addr: SocketAddr, bytes: Vec<u8>) {
        self.datagrams.push(Datagram {
            system,
            addr,
            bytes,
        });
    }

    /// Queues a report event.
    pub fn report(&mut self, event: ReportEvent) {
        self.events.push(event);
    }

    /// Queues an announcement.
    pub fn announce(&mut self, request: SpeechRequest) {
        self.speech.push(request);
    }

    /// Asks for the system's remote host name to be looked up again.
    pub fn resolve(&mut self, system: SystemId) {
        if !self.resolve.contains(&system) {
            self.resolve.push(system);
        }
    }

    /// Queued datagrams.
    #[must_use]
    pub fn datagrams(&self) -> &[Datagram] {
        &self.datagrams
    }

    /// Queued report events.
    #[must_use]
    pub fn events(&self) -> &[ReportEvent] {
        &self.events
    }

    /// Queued announcements.
    #[must_use]
    pub fn speech(&self) -> &[SpeechRequest] {
        &self.speech
    }

    /// Removes and returns the queued datagrams.
    pub fn take_datagrams(&mut self) -> Vec<Datagram> {
        std::mem::take(&mut self.datagrams)
    }

    /// Removes and returns the queued report events.
    pub fn take_events(&mut self) -> Vec<ReportEvent> {
        std::mem::take(&mut self.events)
    }

    /// Removes and returns the queued announcements.
    pub fn take_speech(&mut self) -> Vec<SpeechRequest> {
        std::mem::take(&mut self.speech)
    }

    /// Removes and returns the pending host name lookups.
    pub fn take_resolve(&mut self) -> Vec<SystemId> {
        std::mem::take(&mut self.resolve)
    }

    /// Drops everything queued.
    pub fn clear(&mut self) {
        self.datagrams.clear();
        self.events.clear();
        self.speech.clear();
        self.resolve.clear();
    }
}

/// Read-only state a link needs while handling an event.
#[derive(Debug, Clone, Copy)]
pub struct LinkContext<'a> {
    /// This system.
    pub id: SystemId,
    /// This system's configuration.
    pub config: &'a SystemConfig,
    /// This system's ACLs.
    pub acls: &'a Acls,
    /// Process-wide settings.
    pub global: &'a GlobalConfig,
    /// Global ACLs.
    pub global_acls: &'a Acls,
    /// Id directories.
    pub directory: &'a Directory,
    /// Current time.
    pub clock: Clock,
}

impl LinkContext<'_> {
    /// This system's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// An accepted data frame handed from a link to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// The burst, normalised to the HBP layout.
    pub dmrd: Dmrd,
    /// Hop count to forward with (OpenBridge only, already incremented).
    pub hops: Option<u8>,
    /// Originating server id.
    pub source_server: DmrId,
    /// Originating repeater id.
    pub source_repeater: DmrId,
}

/// A rewritten frame handed from the router to a target link.
#[derive(Debug, Clone, Copy)]
pub struct OutFrame<'a> {
    /// The burst with destination, slot and LC already rewritten.
    pub dmrd: &'a Dmrd,
    /// Hop count to transmit; `None` starts at 1.
    pub hops: Option<u8>,
    /// Originating server id.
    pub source_server: DmrId,
    /// Originating repeater id.
    pub source_repeater: DmrId,
}

/// Capabilities every role provides to the router.
pub trait Link {
    /// Handles one datagram; returns a data frame to route, if any.
    fn receive(
        &mut self,
        ctx: &LinkContext<'_>,
        data: &[u8],
        from: SocketAddr,
        out: &mut Outbox,
    ) -> Option<Inbound>;

    /// Transmits a routed frame; returns false if nothing was sent.
    fn send(&mut self, ctx: &LinkContext<'_>, frame: &OutFrame<'_>, out: &mut Outbox) -> bool;

    /// Periodic keepalive and timeout handling.
    fn maintain(&mut self, ctx: &LinkContext<'_>, out: &mut Outbox);

    /// Sends the dialect's disconnect frames before shutdown.
    fn deregister(&mut self, ctx: &LinkContext<'_>, out: &mut Outbox);
}

/// Role-specific state of a system.
#[derive(Debug)]
pub enum Role {
    /// HBP master.
    Master(Master),
    /// HBP peer or XLX peer.
    Peer(Peer),
    /// OpenBridge link.
    OpenBridge(ObpLink),
}

/// One configured system.
#[derive(Debug)]
pub struct Endpoint {
    /// Index in the router's table.
    pub id: SystemId,
    /// Configuration.
    pub config: SystemConfig,
    /// Parsed ACLs.
    pub acls: Acls,
    /// Protocol state.
    pub role: Role,
}

impl Endpoint {
    /// Builds the endpoint for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AclError`] if one of the system's ACL strings is invalid.
    pub fn new(id: SystemId, config: SystemConfig, target: Option<SocketAddr>) -> Result<Self, AclError> {
        let acls = Acls::system(&config)?;
        let role = match config.mode {
            Mode::Master => Role::Master(Master::new(&config)),
            Mode::Peer | Mode::XlxPeer => Role::Peer(Peer::new(&config, target)),
            Mode::OpenBridge => Role::OpenBridge(ObpLink::new(&config, target)),
        };
        Ok(Self {
            id,
            config,
            acls,
            role,
        })
    }

    /// System name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Whether this is an OpenBridge link.
    #[must_use]
    pub fn is_openbridge(&self) -> bool {
        matches!(self.role, Role::OpenBridge(_))
    }

    /// Whether this is an HBP master.
    #[must_use]
    pub fn is_master(&self) -> bool {
        matches!(self.role, Role::Master(_))
    }

    /// Splits the endpoint into a link and a context for one event.
    pub fn split<'a>(
        &'a mut self,
        global: &'a GlobalConfig,
        global_acls: &'a Acls,
        directory: &'a Directory,
        clock: Clock,
    ) -> (&'a mut dyn Link, LinkContext<'a>) {
        let Self {
            id,
            config,
            acls,
            role,
        } = self;
        let ctx = LinkContext {
            id: *id,
            config,
            acls,
            global,
            global_acls,
            directory,
            clock,
        };
        let link: &mut dyn Link = match role {
            Role::Master(m) => m,
            Role::Peer(p) => p,
            Role::OpenBridge(o) => o,
        };
        (link, ctx)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A context over leaked defaults, for link unit tests.
    pub fn context(config: &SystemConfig, acls: &Acls, directory: &Directory, clock: Clock) -> LinkContext<'static> {
        let config: &'static SystemConfig = Box::leak(Box::new(config.clone()));
        let acls: &'static Acls = Box::leak(Box::new(acls.clone()));
        let directory: &'static Directory = Box::leak(Box::new(directory.clone()));
        let global: &'static GlobalConfig = Box::leak(Box::new(GlobalConfig::default()));
        let global_acls: &'static Acls = Box::leak(Box::new(Acls::permissive()));
        LinkContext {
            id: SystemId(0),
            config,
            acls,
            global,
            global_acls,
            directory,
            clock,
        }
    }
}
