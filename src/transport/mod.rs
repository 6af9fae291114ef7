//! Media transport seam.
//!
//! Codecs, ICE and congestion control live behind [`TransportFactory`] and
//! [`Transport`]. A connection owns one transport and talks to it
//! synchronously; the transport reports back through [`TransportEvents`],
//! which are consumed on the connection's ingest task.
//!
//! A transport must never call back into the connection from inside one of
//! its methods. Everything it has to say goes through [`TransportEvents`].
//!
//! [`LoopbackHub`] is an in-process implementation that links a server and a
//! client living in the same process.

mod candidate;
mod loopback;
mod packet;

pub use candidate::{CandidateLine, IceCandidate};
pub use loopback::LoopbackHub;
pub use packet::{MediaFrame, Packet};

use tokio::sync::mpsc;

use crate::config::{IceServerConfig, PortRange};
use crate::stats::Stats;
use crate::{CodecType, Result, Role, TrackKind};

/// What a transport needs to know about its connection.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub role: Role,
    pub ice_servers: Vec<IceServerConfig>,
    pub port_range: PortRange,
}

/// Builds transports. One factory serves every connection of a context.
pub trait TransportFactory: Send + Sync + 'static {
    /// Sets up shared state for a new connection (threads, codec factories).
    fn prepare(&self, config: &TransportConfig) -> Result<()>;

    /// Creates the transport for one connection.
    fn create(&self, config: &TransportConfig, events: TransportEvents) -> Result<Box<dyn Transport>>;

    /// Codecs this side can encode (server) or decode (client), most
    /// preferred first.
    fn supported_codecs(&self, role: Role) -> Vec<CodecType>;
}

/// One peer connection's media path.
pub trait Transport: Send + Sync {
    fn add_track(&self, track: TrackKind) -> Result<()>;

    /// Candidates to hand to the signaling provider.
    fn local_candidates(&self) -> Vec<IceCandidate>;

    fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Queues a packet for the remote peer.
    fn send(&self, packet: Packet) -> Result<()>;

    fn set_bitrate(&self, _kbps: i32) -> Result<()> {
        Ok(())
    }

    /// Transport level statistics.
    fn stats(&self) -> Vec<Stats> {
        Vec::new()
    }

    /// Tears the media path down. The transport may be linked again through
    /// new candidates afterwards.
    fn disconnect(&self);
}

/// Notifications from a transport to its connection.
#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Failed(String),
    Packet(Packet),
}

/// Sender half handed to [`TransportFactory::create`].
#[derive(Debug, Clone)]
pub struct TransportEvents {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEvents {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn connected(&self) {
        let _ = self.tx.send(TransportEvent::Connected);
    }

    pub fn disconnected(&self) {
        let _ = self.tx.send(TransportEvent::Disconnected);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        let _ = self.tx.send(TransportEvent::Failed(reason.into()));
    }

    /// Delivers a packet; returns false once the connection is gone.
    pub fn deliver(&self, packet: Packet) -> bool {
        self.tx.send(TransportEvent::Packet(packet)).is_ok()
    }
}
