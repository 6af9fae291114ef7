//! Error types for the streaming core.
//!
//! Two layers live here:
//!
//! - [`ErrorCode`] is the flat, 32-bit error enum that crosses the C ABI. Its
//!   discriminants are part of the binary contract and never change.
//! - [`IsarError`] is what the Rust API returns. Each variant carries context
//!   for logging and maps to exactly one [`ErrorCode`] through [`IsarError::code`].
//!
//! `ErrorCode::None` is success and only ever appears at the ABI boundary.
//! "Nothing new yet" is reported as [`IsarError::NoFrame`] / [`IsarError::NoInput`],
//! never as success.
//!
//! ```rust
//! use isar::{ErrorCode, IsarError};
//!
//! let error = IsarError::not_connected("push_frame");
//! assert_eq!(error.code(), ErrorCode::NotConnected);
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T, E = IsarError> = std::result::Result<T, E>;

/// Error codes as seen through the C ABI.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    None = 0,
    AlreadyInitialized,
    InvalidHandle,
    PeerConnectionFactory,
    PeerConnection,
    DataChannelCreation,
    DataChannelAlreadyExists,
    DataChannelUnsupported,
    DataChannelOpen,
    DataChannelSend,
    DataChannelMessageTooLong,
    DataChannelInvalidConnection,
    AddTrack,
    VideoSource,
    VideoTrack,
    StartRtcEventLog,
    ConfigUnsupportedOrMissingRole,
    ConfigUnsupportedOrMissingEncoder,
    ConfigUnsupportedOrMissingDecoder,
    ConfigUnsupportedOrMissingVideoSource,
    ConfigSignalingInvalidOrMissing,
    ConfigSignalingIpInvalidOrMissing,
    ConfigSignalingPortInvalidOrMissing,
    NotConnected,
    FileOpen,
    ConfigParse,
    SdpParse,
    NoFrame,
    UnsupportedVersion,
    InvalidArgument,
    AudioTrack,
    AudioTrackNotInitialized,
    AlreadyConnected,
    NoInput,
    Unknown = 0xFFFF_FFFF,
}

const _: () = assert!(std::mem::size_of::<ErrorCode>() == 4);

impl ErrorCode {
    /// Returns true for [`ErrorCode::None`].
    pub fn is_ok(self) -> bool {
        self == ErrorCode::None
    }
}

impl From<Result<()>> for ErrorCode {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => ErrorCode::None,
            Err(err) => err.code(),
        }
    }
}

/// Which part of the configuration was unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigIssue {
    Role,
    Encoder,
    Decoder,
    VideoSource,
    Signaling,
    SignalingIp,
    SignalingPort,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConfigIssue::Role => "connection role",
            ConfigIssue::Encoder => "encoder",
            ConfigIssue::Decoder => "decoder",
            ConfigIssue::VideoSource => "video source",
            ConfigIssue::Signaling => "signaling provider",
            ConfigIssue::SignalingIp => "signaling ip",
            ConfigIssue::SignalingPort => "signaling port",
        };
        f.write_str(text)
    }
}

/// Data channel failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFailure {
    Creation,
    AlreadyExists,
    Unsupported,
    Open,
    Send,
    InvalidConnection,
}

/// Media track kinds that can fail to set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFailure {
    Add,
    VideoSource,
    Video,
    Audio,
    AudioNotInitialized,
}

/// Main error type for core operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IsarError {
    #[error("Engine already initialized")]
    AlreadyInitialized,

    #[error("Invalid {kind} handle {handle:#x}")]
    InvalidHandle { kind: &'static str, handle: u64 },

    #[error("Failed to create peer connection factory: {reason}")]
    PeerConnectionFactory { reason: String },

    #[error("Failed to create peer connection: {reason}")]
    PeerConnection { reason: String },

    #[error("Data channel '{name}' error ({failure:?}): {details}")]
    DataChannel { name: String, failure: ChannelFailure, details: String },

    #[error("Message of {size} bytes exceeds the {limit} byte limit of channel '{name}'")]
    MessageTooLong { name: String, size: usize, limit: usize },

    #[error("Track setup failed ({failure:?}): {details}")]
    Track { failure: TrackFailure, details: String },

    #[error("Failed to start RTC event log: {reason}")]
    EventLog { reason: String },

    #[error("Unsupported or missing {issue}: {details}")]
    Config { issue: ConfigIssue, details: String },

    #[error("Not connected: {operation} requires an established connection")]
    NotConnected { operation: &'static str },

    #[error("Failed to open {path}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {context}")]
    ConfigParse {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Malformed session description: {details}")]
    SdpParse { details: String },

    #[error("No new frame available")]
    NoFrame,

    #[error("Remote version {found} is incompatible with {expected}")]
    UnsupportedVersion { expected: String, found: String },

    #[error("Invalid argument '{argument}': {details}")]
    InvalidArgument { argument: &'static str, details: String },

    #[error("Connection is already open ({state})")]
    AlreadyConnected { state: String },

    #[error("No new input available")]
    NoInput,

    #[error("Unexpected failure: {details}")]
    Unknown { details: String },
}

impl IsarError {
    /// The ABI code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            IsarError::AlreadyInitialized => ErrorCode::AlreadyInitialized,
            IsarError::InvalidHandle { .. } => ErrorCode::InvalidHandle,
            IsarError::PeerConnectionFactory { .. } => ErrorCode::PeerConnectionFactory,
            IsarError::PeerConnection { .. } => ErrorCode::PeerConnection,
            IsarError::DataChannel { failure, .. } => match failure {
                ChannelFailure::Creation => ErrorCode::DataChannelCreation,
                ChannelFailure::AlreadyExists => ErrorCode::DataChannelAlreadyExists,
                ChannelFailure::Unsupported => ErrorCode::DataChannelUnsupported,
                ChannelFailure::Open => ErrorCode::DataChannelOpen,
                ChannelFailure::Send => ErrorCode::DataChannelSend,
                ChannelFailure::InvalidConnection => ErrorCode::DataChannelInvalidConnection,
            },
            IsarError::MessageTooLong { .. } => ErrorCode::DataChannelMessageTooLong,
            IsarError::Track { failure, .. } => match failure {
                TrackFailure::Add => ErrorCode::AddTrack,
                TrackFailure::VideoSource => ErrorCode::VideoSource,
                TrackFailure::Video => ErrorCode::VideoTrack,
                TrackFailure::Audio => ErrorCode::AudioTrack,
                TrackFailure::AudioNotInitialized => ErrorCode::AudioTrackNotInitialized,
            },
            IsarError::EventLog { .. } => ErrorCode::StartRtcEventLog,
            IsarError::Config { issue, .. } => match issue {
                ConfigIssue::Role => ErrorCode::ConfigUnsupportedOrMissingRole,
                ConfigIssue::Encoder => ErrorCode::ConfigUnsupportedOrMissingEncoder,
                ConfigIssue::Decoder => ErrorCode::ConfigUnsupportedOrMissingDecoder,
                ConfigIssue::VideoSource => ErrorCode::ConfigUnsupportedOrMissingVideoSource,
                ConfigIssue::Signaling => ErrorCode::ConfigSignalingInvalidOrMissing,
                ConfigIssue::SignalingIp => ErrorCode::ConfigSignalingIpInvalidOrMissing,
                ConfigIssue::SignalingPort => ErrorCode::ConfigSignalingPortInvalidOrMissing,
            },
            IsarError::NotConnected { .. } => ErrorCode::NotConnected,
            IsarError::FileOpen { .. } => ErrorCode::FileOpen,
            IsarError::ConfigParse { .. } => ErrorCode::ConfigParse,
            IsarError::SdpParse { .. } => ErrorCode::SdpParse,
            IsarError::NoFrame => ErrorCode::NoFrame,
            IsarError::UnsupportedVersion { .. } => ErrorCode::UnsupportedVersion,
            IsarError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            IsarError::AlreadyConnected { .. } => ErrorCode::AlreadyConnected,
            IsarError::NoInput => ErrorCode::NoInput,
            IsarError::Unknown { .. } => ErrorCode::Unknown,
        }
    }

    /// Returns whether the host may reasonably try the same call again later.
    ///
    /// The core never retries on the caller's behalf.
    pub fn is_retryable(&self) -> bool {
        match self {
            IsarError::NotConnected { .. } => true,
            IsarError::NoFrame => true,
            IsarError::NoInput => true,
            IsarError::PeerConnection { .. } => true,
            IsarError::DataChannel { failure: ChannelFailure::Send | ChannelFailure::Open, .. } => {
                true
            }
            IsarError::AlreadyInitialized => false,
            IsarError::InvalidHandle { .. } => false,
            IsarError::PeerConnectionFactory { .. } => false,
            IsarError::DataChannel { .. } => false,
            IsarError::MessageTooLong { .. } => false,
            IsarError::Track { .. } => false,
            IsarError::EventLog { .. } => false,
            IsarError::Config { .. } => false,
            IsarError::FileOpen { .. } => false,
            IsarError::ConfigParse { .. } => false,
            IsarError::SdpParse { .. } => false,
            IsarError::UnsupportedVersion { .. } => false,
            IsarError::InvalidArgument { .. } => false,
            IsarError::AlreadyConnected { .. } => false,
            IsarError::Unknown { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            IsarError::NotConnected { .. } => vec![
                "Wait for the CONNECTED state before pushing media",
                "Check that the signaling provider relays SDP and ICE candidates",
            ],
            IsarError::NoFrame | IsarError::NoInput => {
                vec!["Poll again on the next frame"]
            }
            IsarError::InvalidHandle { .. } => vec![
                "Do not reuse handles after destroy",
                "Use handles only with the context that created them",
            ],
            IsarError::PeerConnection { .. } | IsarError::PeerConnectionFactory { .. } => vec![
                "Check the port range and ICE server configuration",
                "Restart the connection with close then open",
            ],
            IsarError::Config { .. } => vec![
                "Register a signaling provider before opening",
                "Check the signaling ip and port",
                "Pick a codec supported by both peers or use AUTO",
            ],
            IsarError::FileOpen { .. } | IsarError::ConfigParse { .. } => vec![
                "Check that remoting-config.cfg exists and is readable",
                "Validate the file as JSON",
            ],
            IsarError::SdpParse { .. } | IsarError::UnsupportedVersion { .. } => vec![
                "Update both peers to the same major version",
                "Relay session descriptions unmodified",
            ],
            IsarError::MessageTooLong { .. } => vec![
                "Split the payload",
                "Create the channel with requires_large_messages",
            ],
            IsarError::DataChannel { .. } => vec![
                "Create data channels before opening the connection",
                "Open channels from the server once the remote supports them",
            ],
            IsarError::Track { .. } => vec![
                "Initialize tracks before opening the connection",
                "Enable the audio track before pushing audio",
            ],
            IsarError::AlreadyConnected { .. } => vec!["Close the connection before opening it again"],
            IsarError::InvalidArgument { .. } => vec!["Check the argument against the documented ranges"],
            IsarError::AlreadyInitialized | IsarError::EventLog { .. } | IsarError::Unknown { .. } => {
                vec!["Enable tracing diagnostics and inspect the log"]
            }
        }
    }

    /// Helper constructor for invalid argument errors.
    pub fn invalid_argument(argument: &'static str, details: impl Into<String>) -> Self {
        IsarError::InvalidArgument { argument, details: details.into() }
    }

    /// Helper constructor for operations attempted before CONNECTED.
    pub fn not_connected(operation: &'static str) -> Self {
        IsarError::NotConnected { operation }
    }

    /// Helper constructor for configuration errors.
    pub fn config(issue: ConfigIssue, details: impl Into<String>) -> Self {
        IsarError::Config { issue, details: details.into() }
    }

    /// Helper constructor for data channel errors.
    pub fn data_channel(
        name: impl Into<String>,
        failure: ChannelFailure,
        details: impl Into<String>,
    ) -> Self {
        IsarError::DataChannel { name: name.into(), failure, details: details.into() }
    }

    /// Helper constructor for track errors.
    pub fn track(failure: TrackFailure, details: impl Into<String>) -> Self {
        IsarError::Track { failure, details: details.into() }
    }

    /// Helper constructor for session description parse errors.
    pub fn sdp_parse(details: impl Into<String>) -> Self {
        IsarError::SdpParse { details: details.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IsarError::FileOpen { path: path.into(), source }
    }
}

impl From<serde_json::Error> for IsarError {
    fn from(err: serde_json::Error) -> Self {
        IsarError::ConfigParse { context: "json".to_string(), source: Some(Box::new(err)) }
    }
}
