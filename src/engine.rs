//! The [`Isar`] context.
//!
//! A context owns the async runtime every connection runs its background
//! tasks on, the transport factory, and the registry that maps the opaque
//! handles handed to the host onto live objects. Several contexts may exist
//! in one process; nothing is shared between them.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

use crate::api::{IsarClient, IsarDataChannels, IsarServer, IsarSignaling};
use crate::config::Config;
use crate::connection::{Connection, ConnectionHandle};
use crate::data_channel::{ChannelDescription, DataChannelHandle, DataChannelProvider};
use crate::signaling::{SignalingHandle, SignalingProvider};
use crate::transport::{LoopbackHub, TransportFactory};
use crate::{ChannelFailure, GraphicsApiConfig, IsarError, Result, Role};

/// Runtime workers per context. Callbacks and collection are light work.
const WORKER_THREADS: usize = 2;

/// An explicitly owned ISAR core instance.
///
/// Dropping the context closes every connection still alive and stops the
/// runtime without waiting for in-flight callbacks.
///
/// ```rust,no_run
/// use isar::{ConnectionApi, Isar, LoopbackHub};
///
/// # fn main() -> isar::Result<()> {
/// let isar = Isar::loopback(&LoopbackHub::new())?;
/// let server = isar.server();
/// println!("server api {}", server.version());
/// # Ok(())
/// # }
/// ```
pub struct Isar {
    engine: Engine,
    runtime: Option<Runtime>,
}

impl Isar {
    pub fn new(factory: impl TransportFactory) -> Result<Self> {
        Self::with_factory(Arc::new(factory))
    }

    pub fn with_factory(factory: Arc<dyn TransportFactory>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("isar-worker")
            .enable_time()
            .build()
            .map_err(|err| IsarError::PeerConnectionFactory { reason: format!("runtime: {err}") })?;
        let engine = Engine::new(runtime.handle().clone(), factory);
        info!(workers = WORKER_THREADS, "Context created");
        Ok(Self { engine, runtime: Some(runtime) })
    }

    /// A context whose connections talk through `hub`.
    pub fn loopback(hub: &LoopbackHub) -> Result<Self> {
        Self::new(hub.clone())
    }

    pub fn server(&self) -> IsarServer<'_> {
        IsarServer::new(&self.engine)
    }

    pub fn client(&self) -> IsarClient<'_> {
        IsarClient::new(&self.engine)
    }

    pub fn data_channels(&self) -> IsarDataChannels<'_> {
        IsarDataChannels::new(&self.engine)
    }

    pub fn signaling(&self) -> IsarSignaling<'_> {
        IsarSignaling::new(&self.engine)
    }

    /// Connections created and not yet destroyed.
    pub fn connection_count(&self) -> usize {
        self.engine.connections.read().len()
    }
}

impl Drop for Isar {
    fn drop(&mut self) {
        self.engine.shutdown_all();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        debug!("Context dropped");
    }
}

struct ChannelEntry {
    connection: ConnectionHandle,
    name: String,
}

/// Handle registry of one context.
pub(crate) struct Engine {
    runtime: Handle,
    factory: Arc<dyn TransportFactory>,
    next_handle: AtomicU64,
    connections: RwLock<HashMap<ConnectionHandle, Arc<Connection>>>,
    channels: RwLock<HashMap<DataChannelHandle, ChannelEntry>>,
    signaling: RwLock<HashMap<SignalingHandle, ConnectionHandle>>,
}

impl Engine {
    fn new(runtime: Handle, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            runtime,
            factory,
            next_handle: AtomicU64::new(0),
            connections: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            signaling: RwLock::new(HashMap::new()),
        }
    }

    /// Handles of all kinds share one counter, so no two objects of a
    /// context ever carry the same value.
    fn next_id(&self) -> NonZeroU64 {
        NonZeroU64::MIN.saturating_add(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    // Connections
    // ---------------------------------------------------------------------

    pub(crate) fn create_connection(
        &self,
        role: Role,
        config: &Config,
        graphics: GraphicsApiConfig,
    ) -> Result<ConnectionHandle> {
        let handle = ConnectionHandle(self.next_id());
        let connection = Connection::create(handle, role, config, graphics, self.factory.as_ref(), &self.runtime)?;
        self.connections.write().insert(handle, connection);
        Ok(handle)
    }

    /// Resolves `handle`, rejecting handles of the other role.
    pub(crate) fn connection(&self, handle: ConnectionHandle, role: Role) -> Result<Arc<Connection>> {
        self.connections
            .read()
            .get(&handle)
            .filter(|connection| connection.role() == role)
            .cloned()
            .ok_or(IsarError::InvalidHandle { kind: "connection", handle: handle.as_u64() })
    }

    pub(crate) fn destroy_connection(&self, handle: &mut Option<ConnectionHandle>, role: Role) -> Result<()> {
        let Some(target) = *handle else {
            return Err(IsarError::invalid_argument("connection", "no connection handle"));
        };
        self.connection(target, role)?;
        let Some(connection) = self.connections.write().remove(&target) else {
            return Err(IsarError::InvalidHandle { kind: "connection", handle: target.as_u64() });
        };
        connection.shutdown();
        self.signaling.write().retain(|_, owner| *owner != target);
        *handle = None;
        info!(connection = target.as_u64(), "Connection destroyed");
        Ok(())
    }

    fn shutdown_all(&self) {
        let connections: Vec<_> = self.connections.write().drain().collect();
        for (handle, connection) in connections {
            debug!(connection = handle.as_u64(), "Shutting down with context");
            connection.shutdown();
        }
        self.signaling.write().clear();
        self.channels.write().clear();
    }

    /// Resolves a connection of either role.
    fn any_connection(&self, handle: ConnectionHandle) -> Option<Arc<Connection>> {
        self.connections.read().get(&handle).cloned()
    }

    // Data channels
    // ---------------------------------------------------------------------

    pub(crate) fn create_channel(
        &self,
        connection: ConnectionHandle,
        description: ChannelDescription,
        provider: Arc<dyn DataChannelProvider>,
    ) -> Result<DataChannelHandle> {
        let Some(owner) = self.any_connection(connection) else {
            return Err(IsarError::data_channel(
                description.name,
                ChannelFailure::InvalidConnection,
                format!("{connection} does not exist"),
            ));
        };
        let name = description.name.clone();
        owner.create_channel(description, provider)?;
        let handle = DataChannelHandle(self.next_id());
        self.channels.write().insert(handle, ChannelEntry { connection, name });
        Ok(handle)
    }

    /// Resolves a channel handle to its connection and channel name.
    pub(crate) fn channel(&self, handle: DataChannelHandle) -> Result<(Arc<Connection>, String)> {
        let (connection, name) = {
            let channels = self.channels.read();
            let entry = channels
                .get(&handle)
                .ok_or(IsarError::InvalidHandle { kind: "data channel", handle: handle.as_u64() })?;
            (entry.connection, entry.name.clone())
        };
        match self.any_connection(connection) {
            Some(owner) => Ok((owner, name)),
            None => Err(IsarError::data_channel(
                name,
                ChannelFailure::InvalidConnection,
                format!("{connection} was destroyed"),
            )),
        }
    }

    pub(crate) fn destroy_channel(&self, handle: &mut Option<DataChannelHandle>) -> Result<()> {
        let Some(target) = *handle else {
            return Err(IsarError::invalid_argument("channel", "no data channel handle"));
        };
        let Some(entry) = self.channels.write().remove(&target) else {
            return Err(IsarError::InvalidHandle { kind: "data channel", handle: target.as_u64() });
        };
        match self.any_connection(entry.connection) {
            Some(owner) => owner.remove_channel(&entry.name)?,
            None => debug!(channel = %entry.name, "Destroyed channel outlived its connection"),
        }
        *handle = None;
        Ok(())
    }

    // Signaling
    // ---------------------------------------------------------------------

    pub(crate) fn register_signaling(
        &self,
        connection: ConnectionHandle,
        provider: Arc<dyn SignalingProvider>,
    ) -> Result<SignalingHandle> {
        let owner = self
            .any_connection(connection)
            .ok_or(IsarError::InvalidHandle { kind: "connection", handle: connection.as_u64() })?;
        let handle = SignalingHandle(self.next_id());
        let mut registry = self.signaling.write();
        if let Some(previous) = owner.attach_signaling(handle, provider) {
            warn!(connection = connection.as_u64(), %previous, "Signaling provider replaced");
            registry.remove(&previous);
        }
        registry.insert(handle, connection);
        Ok(handle)
    }

    pub(crate) fn signaling_target(&self, handle: SignalingHandle) -> Result<Arc<Connection>> {
        let invalid = IsarError::InvalidHandle { kind: "signaling", handle: handle.as_u64() };
        let connection = *self.signaling.read().get(&handle).ok_or(invalid)?;
        self.any_connection(connection)
            .ok_or(IsarError::InvalidHandle { kind: "signaling", handle: handle.as_u64() })
    }
}
