//! In-process transport.
//!
//! Every transport created by a [`LoopbackHub`] registers an endpoint keyed
//! by a port taken from the connection's port range. Its only candidate
//! names that port; applying the remote side's candidate links the two
//! endpoints and both report connectivity. Packets then move between the two
//! connections' event channels without serialization.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

use super::{
    CandidateLine, IceCandidate, Packet, Transport, TransportConfig, TransportEvents, TransportFactory,
};
use crate::stats::{Stats, StatsType, StatsValue, now_us};
use crate::{CodecType, IsarError, Result, Role, TrackKind};

const LOOPBACK_ADDRESS: &str = "127.0.0.1";
const LOOPBACK_TRANSPORT: &str = "loopback";
const HOST_PRIORITY: u32 = 2_130_706_431;

const SUPPORTED_CODECS: [CodecType; 7] = [
    CodecType::H265,
    CodecType::H264,
    CodecType::Vp9,
    CodecType::Vp8,
    CodecType::Av1,
    CodecType::H265_10Bit,
    CodecType::Av1_10Bit,
];

#[derive(Debug)]
struct Endpoint {
    events: TransportEvents,
    peer: Option<u32>,
    tracks: HashSet<TrackKind>,
}

#[derive(Debug, Default)]
struct Hub {
    endpoints: HashMap<u32, Endpoint>,
}

/// Links transports created in the same process.
///
/// Cloning yields another handle to the same hub.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<Hub>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.inner.lock().endpoints.len()
    }

    /// Reports a network failure to every endpoint and unlinks them.
    pub fn fail_all(&self, reason: &str) {
        let mut hub = self.inner.lock();
        for endpoint in hub.endpoints.values_mut() {
            endpoint.peer = None;
            endpoint.events.failed(reason);
        }
    }
}

impl TransportFactory for LoopbackHub {
    fn prepare(&self, config: &TransportConfig) -> Result<()> {
        debug!(role = ?config.role, ice_servers = config.ice_servers.len(), "Preparing loopback transport");
        Ok(())
    }

    fn create(&self, config: &TransportConfig, events: TransportEvents) -> Result<Box<dyn Transport>> {
        let mut hub = self.inner.lock();
        let port = config
            .port_range
            .ports()
            .find(|port| !hub.endpoints.contains_key(port))
            .ok_or_else(|| IsarError::PeerConnection {
                reason: format!(
                    "no free port in {}..={}",
                    config.port_range.min_port, config.port_range.max_port
                ),
            })?;
        hub.endpoints.insert(port, Endpoint { events, peer: None, tracks: HashSet::new() });
        debug!(port, role = ?config.role, "Loopback endpoint registered");

        Ok(Box::new(LoopbackTransport {
            hub: self.clone(),
            port,
            bytes_sent: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
        }))
    }

    fn supported_codecs(&self, _role: Role) -> Vec<CodecType> {
        SUPPORTED_CODECS.to_vec()
    }
}

struct LoopbackTransport {
    hub: LoopbackHub,
    port: u32,
    bytes_sent: AtomicU64,
    packets_sent: AtomicU64,
}

impl LoopbackTransport {
    fn candidate_line(&self) -> CandidateLine {
        CandidateLine {
            foundation: "1".to_string(),
            component: 1,
            transport: LOOPBACK_TRANSPORT.to_string(),
            priority: HOST_PRIORITY,
            address: LOOPBACK_ADDRESS.to_string(),
            port: self.port,
            kind: "host".to_string(),
        }
    }
}

impl Transport for LoopbackTransport {
    fn add_track(&self, track: TrackKind) -> Result<()> {
        let mut hub = self.hub.inner.lock();
        let endpoint = hub
            .endpoints
            .get_mut(&self.port)
            .ok_or_else(|| IsarError::PeerConnection { reason: "endpoint released".into() })?;
        endpoint.tracks.insert(track);
        Ok(())
    }

    fn local_candidates(&self) -> Vec<IceCandidate> {
        vec![IceCandidate::new("0", 0, self.candidate_line().to_string())]
    }

    fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let line = candidate.parse()?;
        if line.transport != LOOPBACK_TRANSPORT || line.address != LOOPBACK_ADDRESS {
            trace!(candidate = %candidate.candidate, "Ignoring non-loopback candidate");
            return Ok(());
        }
        let remote = line.port;
        if remote == self.port {
            return Err(IsarError::sdp_parse("candidate points at the local endpoint"));
        }

        let mut hub = self.hub.inner.lock();
        if !hub.endpoints.contains_key(&remote) {
            warn!(port = remote, "Remote loopback endpoint not found");
            return Ok(());
        }
        let already_linked = hub.endpoints.get(&self.port).and_then(|endpoint| endpoint.peer) == Some(remote);
        if already_linked {
            return Ok(());
        }

        for (port, peer) in [(self.port, remote), (remote, self.port)] {
            if let Some(endpoint) = hub.endpoints.get_mut(&port) {
                endpoint.peer = Some(peer);
                endpoint.events.connected();
            }
        }
        debug!(local = self.port, remote, "Loopback endpoints linked");
        Ok(())
    }

    fn send(&self, packet: Packet) -> Result<()> {
        let events = {
            let hub = self.hub.inner.lock();
            let peer = hub.endpoints.get(&self.port).and_then(|endpoint| endpoint.peer);
            peer.and_then(|peer| hub.endpoints.get(&peer)).map(|endpoint| endpoint.events.clone())
        };
        let Some(events) = events else {
            return Err(IsarError::not_connected("send"));
        };

        let size = packet.payload_len() as u64;
        trace!(kind = packet.kind(), size, "Loopback send");
        if !events.deliver(packet) {
            return Err(IsarError::PeerConnection { reason: "remote connection is gone".into() });
        }
        self.bytes_sent.fetch_add(size, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> Vec<Stats> {
        let (linked, tracks) = {
            let hub = self.hub.inner.lock();
            hub.endpoints
                .get(&self.port)
                .map(|endpoint| {
                    let mut tracks: Vec<String> =
                        endpoint.tracks.iter().map(|track| track.as_str().to_string()).collect();
                    tracks.sort();
                    (endpoint.peer.is_some(), tracks)
                })
                .unwrap_or_default()
        };
        vec![
            Stats::new(format!("T{}", self.port), StatsType::Transport, now_us())
                .with("bytesSent", StatsValue::Ulong(self.bytes_sent.load(Ordering::Relaxed)))
                .with("packetsSent", StatsValue::Ulong(self.packets_sent.load(Ordering::Relaxed)))
                .with("dtlsState", StatsValue::String(if linked { "connected" } else { "new" }.into()))
                .with("tracks", StatsValue::StringArray(tracks)),
        ]
    }

    fn disconnect(&self) {
        let mut hub = self.hub.inner.lock();
        let Some(peer) = hub.endpoints.get_mut(&self.port).and_then(|endpoint| endpoint.peer.take()) else {
            return;
        };
        if let Some(remote) = hub.endpoints.get_mut(&peer) {
            if remote.peer == Some(self.port) {
                remote.peer = None;
                remote.events.disconnected();
            }
        }
        debug!(local = self.port, remote = peer, "Loopback endpoints unlinked");
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.disconnect();
        self.hub.inner.lock().endpoints.remove(&self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortRange;
    use crate::transport::TransportEvent;

    fn config(role: Role, min_port: u32, max_port: u32) -> TransportConfig {
        TransportConfig { role, ice_servers: Vec::new(), port_range: PortRange { min_port, max_port } }
    }

    #[test]
    fn candidates_link_both_endpoints() {
        let hub = LoopbackHub::new();
        let (server_events, mut server_rx) = TransportEvents::channel();
        let (client_events, mut client_rx) = TransportEvents::channel();
        let server = hub.create(&config(Role::Server, 50100, 50101), server_events).unwrap();
        let client = hub.create(&config(Role::Client, 50100, 50101), client_events).unwrap();

        assert!(matches!(server.send(Packet::Passthrough(true)), Err(IsarError::NotConnected { .. })));

        let offer = server.local_candidates();
        assert!(offer[0].candidate.contains("50100"));
        client.add_remote_candidate(&offer[0]).unwrap();
        server.add_remote_candidate(&client.local_candidates()[0]).unwrap();

        assert!(matches!(server_rx.try_recv(), Ok(TransportEvent::Connected)));
        assert!(matches!(client_rx.try_recv(), Ok(TransportEvent::Connected)));
        assert!(client_rx.try_recv().is_err(), "second candidate must not reconnect");

        server.send(Packet::Passthrough(true)).unwrap();
        assert!(matches!(client_rx.try_recv(), Ok(TransportEvent::Packet(Packet::Passthrough(true)))));

        client.disconnect();
        assert!(matches!(server_rx.try_recv(), Ok(TransportEvent::Disconnected)));
        assert!(server.send(Packet::Passthrough(false)).is_err());
    }

    #[test]
    fn ports_are_released_on_drop() {
        let hub = LoopbackHub::new();
        let first = hub.create(&config(Role::Server, 50100, 50100), TransportEvents::channel().0).unwrap();
        let err = hub.create(&config(Role::Client, 50100, 50100), TransportEvents::channel().0).err().unwrap();
        assert_eq!(err.code(), crate::ErrorCode::PeerConnection);

        drop(first);
        assert_eq!(hub.endpoint_count(), 0);
        assert!(hub.create(&config(Role::Client, 50100, 50100), TransportEvents::channel().0).is_ok());
    }

    #[test]
    fn foreign_candidates_are_ignored() {
        let hub = LoopbackHub::new();
        let (events, mut rx) = TransportEvents::channel();
        let transport = hub.create(&config(Role::Client, 50100, 50110), events).unwrap();
        let srflx = IceCandidate::new("0", 0, "candidate:9 1 udp 1677729535 203.0.113.7 50100 typ srflx");
        transport.add_remote_candidate(&srflx).unwrap();
        assert!(rx.try_recv().is_err());

        let garbage = IceCandidate::new("0", 0, "not a candidate");
        assert_eq!(transport.add_remote_candidate(&garbage).unwrap_err().code(), crate::ErrorCode::SdpParse);
    }

    #[test]
    fn fail_all_reports_failure() {
        let hub = LoopbackHub::new();
        let (events, mut rx) = TransportEvents::channel();
        let _transport = hub.create(&config(Role::Server, 50100, 50100), events).unwrap();
        hub.fail_all("cable pulled");
        assert!(matches!(rx.try_recv(), Ok(TransportEvent::Failed(reason)) if reason == "cable pulled"));
    }
}
