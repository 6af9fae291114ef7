//! Native streaming core for holographic remote rendering.
//!
//! ISAR links a **server**, which renders frames and pushes them, with a
//! **client** (a headset), which pulls decoded frames and sends back its
//! head pose and controller input. The core owns the connection state
//! machine, session negotiation, pose prediction, data channels and stats.
//! Signaling and the media transport are seams the host fills in.
//!
//! # Features
//!
//! - **Explicit context**: every connection belongs to an [`Isar`] value
//!   that owns its runtime and handle registry
//! - **Typed API**: [`ServerApi`], [`ClientApi`], [`DataChannelApi`] and
//!   [`SignalingApi`] mirror the C function tables one to one
//! - **C ABI** (`capi` feature): `Isar_Server_CreateApi` and friends fill
//!   `#[repr(C)]` function tables for native hosts
//! - **Loopback transport**: [`LoopbackHub`] links a server and a client in
//!   one process
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use isar::{Config, ConnectionApi, GpuHandle, GraphicsApiConfig, Isar, LoopbackHub};
//!
//! # fn main() -> isar::Result<()> {
//! # let device = GpuHandle::new(std::ptr::NonNull::<u8>::dangling().as_ptr().cast()).unwrap();
//! let isar = Isar::loopback(&LoopbackHub::new())?;
//! let server = isar.server();
//! let connection = server.create_connection(&Config::default(), GraphicsApiConfig::D3D11 { device })?;
//! println!("{connection} is {}", server.connection_state(connection)?);
//! # Ok(())
//! # }
//! ```

// Core types and error handling
#[macro_use]
pub mod types;
mod error;
mod version;

// Configuration
pub mod config;
pub mod settings;

// Media and session building blocks
pub mod data_channel;
pub mod image;
pub mod prediction;
pub mod signaling;
pub mod stats;
pub mod transport;

// Connections and the context that owns them
pub mod api;
mod connection;
pub mod diagnostics;
mod engine;

#[cfg(feature = "capi")]
pub mod ffi;

#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Core exports
pub use error::*;
pub use types::*;
pub use version::Version;

pub use config::{Config, IceServerConfig, PortRange, RenderConfig, SignalingConfig};
pub use settings::RemotingSettings;

pub use api::{ClientApi, ConnectionApi, IsarClient, IsarDataChannels, IsarServer, IsarSignaling, ServerApi};
pub use connection::{
    AudioHandler, CameraCaptureHandler, CameraFrame, ConnectionHandle, ConnectionInfo, HandlerId, HapticHandler,
    SPATIAL_INPUT_CAPACITY, SpatialInputHandler, StateHandler, StatsHandler, TrackEnabledHandler, ViewPoseHandler,
};
pub use engine::Isar;

pub use data_channel::{ChannelDescription, DataChannelApi, DataChannelHandle, DataChannelProvider};
pub use prediction::PosePredictionConfig;
pub use signaling::{SignalingApi, SignalingHandle, SignalingProvider};
pub use stats::{Stats, StatsMember, StatsMemberType, StatsReport, StatsType, StatsValue};
pub use transport::LoopbackHub;
