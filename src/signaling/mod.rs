//! Signaling seam.
//!
//! The core never touches the network for signaling. It hands outgoing
//! session descriptions and ICE candidates to a host supplied
//! [`SignalingProvider`] and is fed the remote side's through
//! [`SignalingApi`].

mod negotiation;
mod sdp;

pub use negotiation::{check_version, negotiate_codec, negotiate_render};
pub use sdp::{SdpType, SessionDescription};

use std::fmt;
use std::net::Ipv4Addr;
use std::num::NonZeroU64;
use std::sync::Arc;

use crate::{ConnectionHandle, ConnectionState, Result, Version};

/// Host side of signaling (`IsarSignalingProvider`).
///
/// Called from a runtime worker, in the order the core produced the calls.
pub trait SignalingProvider: Send + Sync + 'static {
    /// Start listening or connecting at the suggested address.
    fn start(&self, suggested_ipv4: Ipv4Addr, suggested_port: u32);

    fn stop(&self);

    fn connection_changed(&self, state: ConnectionState);

    /// `sdp` is the JSON envelope produced by [`SessionDescription::to_json`].
    fn send_sdp(&self, sdp: &str);

    fn send_ice_candidate(&self, id: &str, line_index: i32, candidate: &str);
}

/// Registration of a provider on a connection. Never reused within a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalingHandle(pub(crate) NonZeroU64);

impl SignalingHandle {
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for SignalingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signaling#{}", self.0)
    }
}

/// The signaling table (`IsarSignalingApi`).
pub trait SignalingApi {
    fn version(&self) -> Version;

    /// Attaches `provider` to `connection`, replacing any earlier one.
    fn register_provider(
        &self,
        connection: ConnectionHandle,
        provider: Arc<dyn SignalingProvider>,
    ) -> Result<SignalingHandle>;

    /// Applies the remote session description (JSON envelope or bare SDP).
    fn set_remote_sdp(&self, signaling: SignalingHandle, sdp: &str) -> Result<()>;

    fn set_remote_ice_candidate(
        &self,
        signaling: SignalingHandle,
        id: &str,
        line_index: i32,
        candidate: &str,
    ) -> Result<()>;

    /// Reports whether the signaling channel to the remote is up.
    fn set_connection_state(&self, signaling: SignalingHandle, connected: bool) -> Result<()>;
}
