//! Named byte channels layered over a connection.
//!
//! Channels are created on either side before the connection opens and are
//! matched by name when the session is negotiated. The server opens a
//! matched channel once connected; the client side follows automatically.
//!
//! ```text
//! create ─► (negotiation) supported / unsupported
//!        ─► open (server) ─► connected ─► close ─► closed ─► destroy
//! ```
//!
//! Every lifecycle notification goes to the [`DataChannelProvider`] given at
//! creation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use crate::{ChannelFailure, ChannelPriority, IsarError, Result, Version};

/// Largest payload of a channel without `requires_large_messages`.
pub const SMALL_MESSAGE_LIMIT: usize = 8192;

/// Identity and delivery options of a channel (`IsarChannelDescription`).
///
/// Names follow `<company>.<project>.<plugin>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescription {
    pub name: String,
    pub version: Version,
    pub priority: ChannelPriority,
    pub reliable: bool,
    /// Lifts the 8 KiB limit and forces reliable delivery.
    pub requires_large_messages: bool,
}

impl ChannelDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Version::LATEST,
            priority: ChannelPriority::Low,
            reliable: true,
            requires_large_messages: false,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable || self.requires_large_messages
    }

    /// Payload limit in bytes, if any.
    pub fn message_limit(&self) -> Option<usize> {
        (!self.requires_large_messages).then_some(SMALL_MESSAGE_LIMIT)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(IsarError::invalid_argument("name", format!("'{}' is not a channel name", self.name)));
        }
        if !self.version.is_valid() {
            return Err(IsarError::invalid_argument("version", "channel version must be set"));
        }
        Ok(())
    }

    pub(crate) fn check_message(&self, size: usize) -> Result<()> {
        match self.message_limit() {
            Some(limit) if size > limit => {
                Err(IsarError::MessageTooLong { name: self.name.clone(), size, limit })
            }
            _ => Ok(()),
        }
    }
}

/// Callbacks of one channel (`IsarDataChannelProvider`).
///
/// Called from a runtime worker, except [`is_remote_supported`] which runs
/// while the remote session description is applied.
///
/// [`is_remote_supported`]: DataChannelProvider::is_remote_supported
pub trait DataChannelProvider: Send + Sync + 'static {
    /// Decides whether the remote channel of the same name is compatible.
    fn is_remote_supported(&self, remote: &ChannelDescription) -> bool;

    fn on_supported_changed(&self, supported: bool);

    fn on_connected_changed(&self, connected: bool);

    fn on_data_received(&self, data: &[u8]);
}

/// Data channel handle. Never reused within a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataChannelHandle(pub(crate) NonZeroU64);

impl DataChannelHandle {
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for DataChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// The data channel table (`IsarDataChannelApi`).
pub trait DataChannelApi {
    fn version(&self) -> Version;

    fn create(
        &self,
        connection: crate::ConnectionHandle,
        description: ChannelDescription,
        provider: Arc<dyn DataChannelProvider>,
    ) -> Result<DataChannelHandle>;

    /// Server only.
    fn open(&self, channel: DataChannelHandle) -> Result<()>;

    fn push_data(&self, channel: DataChannelHandle, data: &[u8]) -> Result<()>;

    fn close(&self, channel: DataChannelHandle) -> Result<()>;

    fn destroy(&self, channel: &mut Option<DataChannelHandle>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelState {
    Created,
    Opening,
    Open,
    Closed,
}

/// A channel as tracked by its connection.
pub(crate) struct Channel {
    pub description: ChannelDescription,
    pub provider: Arc<dyn DataChannelProvider>,
    pub state: ChannelState,
    /// Outcome of the last negotiation, `None` before the first one.
    pub supported: Option<bool>,
}

impl Channel {
    pub(crate) fn new(description: ChannelDescription, provider: Arc<dyn DataChannelProvider>) -> Self {
        Self { description, provider, state: ChannelState::Created, supported: None }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub(crate) fn ensure_openable(&self) -> Result<()> {
        if self.supported != Some(true) {
            return Err(IsarError::data_channel(
                &self.description.name,
                ChannelFailure::Open,
                "remote does not support this channel",
            ));
        }
        Ok(())
    }

    /// Applies a negotiation result; returns true if it changed.
    pub(crate) fn set_supported(&mut self, supported: bool) -> bool {
        let changed = self.supported != Some(supported);
        self.supported = Some(supported);
        changed
    }

    /// Drops back to the created state; returns true if the channel was
    /// connected.
    pub(crate) fn reset(&mut self) -> bool {
        let was_open = self.is_connected();
        if matches!(self.state, ChannelState::Opening | ChannelState::Open) {
            self.state = ChannelState::Created;
        }
        was_open
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("description", &self.description)
            .field("state", &self.state)
            .field("supported", &self.supported)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl DataChannelProvider for Silent {
        fn is_remote_supported(&self, _remote: &ChannelDescription) -> bool {
            true
        }
        fn on_supported_changed(&self, _supported: bool) {}
        fn on_connected_changed(&self, _connected: bool) {}
        fn on_data_received(&self, _data: &[u8]) {}
    }

    #[test]
    fn small_message_limit_is_inclusive() {
        let description = ChannelDescription::new("holo.demo.chat");
        assert!(description.check_message(SMALL_MESSAGE_LIMIT).is_ok());
        let err = description.check_message(SMALL_MESSAGE_LIMIT + 1).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::DataChannelMessageTooLong);

        let large = ChannelDescription { requires_large_messages: true, reliable: false, ..description };
        assert!(large.check_message(1 << 20).is_ok());
        assert!(large.is_reliable());
    }

    #[test]
    fn names_without_whitespace_only() {
        assert!(ChannelDescription::new("a.b.c").validate().is_ok());
        assert!(ChannelDescription::new("").validate().is_err());
        assert!(ChannelDescription::new("a b").validate().is_err());
        let unversioned = ChannelDescription { version: Version::INVALID, ..ChannelDescription::new("a.b.c") };
        assert!(unversioned.validate().is_err());
    }

    #[test]
    fn opening_requires_support() {
        let mut channel = Channel::new(ChannelDescription::new("a.b.c"), Arc::new(Silent));
        assert_eq!(channel.ensure_openable().unwrap_err().code(), crate::ErrorCode::DataChannelOpen);
        assert!(channel.set_supported(true));
        assert!(!channel.set_supported(true));
        assert!(channel.ensure_openable().is_ok());

        channel.state = ChannelState::Open;
        assert!(channel.reset());
        assert_eq!(channel.state, ChannelState::Created);
        assert!(!channel.reset());
    }
}
