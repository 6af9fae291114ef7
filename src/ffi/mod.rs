//! C ABI.
//!
//! `Isar_Server_CreateApi`, `Isar_Client_CreateApi`, `Isar_DataChannel_CreateApi`
//! and `Isar_Signaling_CreateApi` fill function tables that all act on one
//! process-wide [`Isar`] context, created on first use, whose connections
//! talk through the in-process loopback transport. Handles crossing the
//! boundary are the non-zero handle ids cast to pointers.
//!
//! No entry point unwinds into the caller: panics are reported as
//! `eUnknown` (or logged, for entry points without an error return).

mod client;
mod data_channel;
mod server;
mod signaling;
mod stats;
mod types;

pub use client::{IsarClientApi, Isar_Client_CreateApi};
pub use data_channel::{IsarDataChannelApi, IsarDataChannelProvider, Isar_DataChannel_CreateApi};
pub use server::{IsarServerApi, Isar_Server_CreateApi};
pub use signaling::{IsarSignalingApi, IsarSignalingProvider, Isar_Signaling_CreateApi};
pub use stats::*;
pub use types::*;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{CString, c_void};
use std::num::NonZeroU64;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{LazyLock, OnceLock};
use tracing::{debug, error, warn};

use crate::connection::{ConnectionHandle, HandlerId};
use crate::data_channel::DataChannelHandle;
use crate::signaling::SignalingHandle;
use crate::transport::LoopbackHub;
use crate::{ErrorCode, Isar, IsarError, Result};

/// Opaque connection handle (`IsarConnection`).
pub type IsarConnection = *mut c_void;
/// Opaque data channel handle (`IsarDataChannel`).
pub type IsarDataChannel = *mut c_void;
/// Opaque signaling registration (`IsarSignaling`).
pub type IsarSignaling = *mut c_void;

static CONTEXT: OnceLock<Option<Isar>> = OnceLock::new();

/// The process-wide context behind every table.
pub(crate) fn context() -> Result<&'static Isar> {
    CONTEXT
        .get_or_init(|| match Isar::loopback(&LoopbackHub::new()) {
            Ok(isar) => Some(isar),
            Err(err) => {
                error!(error = %err, "Failed to create the C ABI context");
                None
            }
        })
        .as_ref()
        .ok_or_else(|| IsarError::PeerConnectionFactory { reason: "context unavailable".to_string() })
}

/// Runs `body` and maps its outcome onto the ABI code.
pub(crate) fn guard(operation: &'static str, body: impl FnOnce() -> Result<()>) -> ErrorCode {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => ErrorCode::None,
        Ok(Err(err)) => {
            debug!(operation, error = %err, "Call failed");
            err.code()
        }
        Err(_) => {
            error!(operation, "Panic at the C boundary");
            ErrorCode::Unknown
        }
    }
}

/// [`guard`] for entry points that cannot report an error.
pub(crate) fn guard_void(operation: &'static str, body: impl FnOnce() -> Result<()>) {
    let code = guard(operation, body);
    if !code.is_ok() {
        warn!(operation, ?code, "Call failed without an error return");
    }
}

/// [`guard`] for boolean queries; failures read as false.
pub(crate) fn guard_bool(operation: &'static str, body: impl FnOnce() -> Result<bool>) -> bool {
    let mut answer = false;
    guard_void(operation, || {
        answer = body()?;
        Ok(())
    });
    answer
}

pub(crate) fn handle_ptr(id: NonZeroU64) -> *mut c_void {
    id.get() as usize as *mut c_void
}

fn handle_id(ptr: *mut c_void, argument: &'static str) -> Result<NonZeroU64> {
    NonZeroU64::new(ptr as usize as u64).ok_or_else(|| IsarError::invalid_argument(argument, "null handle"))
}

pub(crate) fn connection_handle(ptr: IsarConnection) -> Result<ConnectionHandle> {
    handle_id(ptr, "connection").map(ConnectionHandle)
}

pub(crate) fn channel_handle(ptr: IsarDataChannel) -> Result<DataChannelHandle> {
    handle_id(ptr, "channel").map(DataChannelHandle)
}

pub(crate) fn signaling_handle(ptr: IsarSignaling) -> Result<SignalingHandle> {
    handle_id(ptr, "signaling").map(SignalingHandle)
}

/// Dereferences an input pointer.
pub(crate) unsafe fn input<'a, T>(ptr: *const T, argument: &'static str) -> Result<&'a T> {
    unsafe { ptr.as_ref() }.ok_or_else(|| IsarError::invalid_argument(argument, "null pointer"))
}

/// Writes through an output pointer.
pub(crate) unsafe fn output<T>(ptr: *mut T, argument: &'static str, value: T) -> Result<()> {
    if ptr.is_null() {
        return Err(IsarError::invalid_argument(argument, "null output pointer"));
    }
    unsafe { ptr.write(value) };
    Ok(())
}

/// Caller supplied context pointer handed back to every callback.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UserData(*mut c_void);

// The caller guarantees the pointer may be used from the core's threads.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    pub(crate) fn new(ptr: *mut c_void) -> Self {
        UserData(ptr)
    }

    pub(crate) fn get(self) -> *mut c_void {
        self.0
    }
}

/// Identifies one `(callback, userData)` registration of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CallbackKey {
    connection: u64,
    slot: &'static str,
    callback: usize,
    user_data: usize,
}

impl CallbackKey {
    pub(crate) fn new(connection: ConnectionHandle, slot: &'static str, callback: usize, user_data: *mut c_void) -> Self {
        CallbackKey { connection: connection.as_u64(), slot, callback, user_data: user_data as usize }
    }
}

static CALLBACKS: LazyLock<Mutex<HashMap<CallbackKey, HandlerId>>> = LazyLock::new(Default::default);

/// Records a registration; returns the one it replaces.
pub(crate) fn remember_callback(key: CallbackKey, id: HandlerId) -> Option<HandlerId> {
    CALLBACKS.lock().insert(key, id)
}

pub(crate) fn forget_callback(key: CallbackKey) -> Option<HandlerId> {
    CALLBACKS.lock().remove(&key)
}

/// Registers a C callback under `slot`. A `(callback, userData)` pair that
/// is already registered stays registered once and is not called again with
/// the current state.
pub(crate) fn register_callback<A: Copy>(
    (handle, api): (ConnectionHandle, A),
    slot: &'static str,
    address: usize,
    user_data: *mut c_void,
    register: impl FnOnce(ConnectionHandle, A) -> Result<HandlerId>,
    unregister: impl FnOnce(ConnectionHandle, A, HandlerId) -> Result<()>,
) -> Result<()> {
    let key = CallbackKey::new(handle, slot, address, user_data);
    if CALLBACKS.lock().contains_key(&key) {
        debug!(slot, "Callback pair already registered");
        return Ok(());
    }
    let id = register(handle, api)?;
    // A concurrent registration of the same pair may have won the race.
    match remember_callback(key, id) {
        Some(previous) => unregister(handle, api, previous),
        None => Ok(()),
    }
}

/// Removes the registration of a `(callback, userData)` pair; unknown pairs
/// are ignored.
pub(crate) fn unregister_callback<A: Copy>(
    (handle, api): (ConnectionHandle, A),
    slot: &'static str,
    address: usize,
    user_data: *mut c_void,
    unregister: impl FnOnce(ConnectionHandle, A, HandlerId) -> Result<()>,
) -> Result<()> {
    match forget_callback(CallbackKey::new(handle, slot, address, user_data)) {
        Some(id) => unregister(handle, api, id),
        None => Ok(()),
    }
}

static REMOTE_NAMES: LazyLock<Mutex<HashMap<u64, CString>>> = LazyLock::new(Default::default);

/// Pointer to a cached copy of `name` that lives until the name changes or
/// the connection is destroyed.
pub(crate) fn remote_name_ptr(connection: ConnectionHandle, name: &str) -> Result<*const std::ffi::c_char> {
    let mut names = REMOTE_NAMES.lock();
    let cached = names.get(&connection.as_u64()).is_some_and(|cached| cached.as_bytes() == name.as_bytes());
    if !cached {
        let owned = CString::new(name).map_err(|err| IsarError::Unknown { details: err.to_string() })?;
        names.insert(connection.as_u64(), owned);
    }
    Ok(names.get(&connection.as_u64()).map_or(std::ptr::null(), |name| name.as_ptr()))
}

/// Drops every piece of per-connection C state.
pub(crate) fn forget_connection(connection: ConnectionHandle) {
    let id = connection.as_u64();
    CALLBACKS.lock().retain(|key, _| key.connection != id);
    REMOTE_NAMES.lock().remove(&id);
}

/// Functions both connection tables share, instantiated per role.
macro_rules! lifecycle_functions {
    ($api:ident) => {
        unsafe extern "C" fn create_connection(
            config: *const $crate::ffi::IsarConfig,
            graphics: $crate::ffi::IsarGraphicsApiConfig,
            connection: *mut $crate::ffi::IsarConnection,
        ) -> $crate::ErrorCode {
            $crate::ffi::guard("createConnection", || {
                let config = unsafe { $crate::ffi::input(config, "config") }?;
                let config = unsafe { config.to_config() }?;
                let graphics = graphics.to_config()?;
                if connection.is_null() {
                    return Err($crate::IsarError::invalid_argument("connection", "null output pointer"));
                }
                let handle = $crate::ffi::context()?.$api().create_connection(&config, graphics)?;
                unsafe { $crate::ffi::output(connection, "connection", $crate::ffi::handle_ptr(handle.0)) }
            })
        }

        extern "C" fn open_connection(connection: $crate::ffi::IsarConnection) -> $crate::ErrorCode {
            $crate::ffi::guard("openConnection", || {
                let handle = $crate::ffi::connection_handle(connection)?;
                $crate::ffi::context()?.$api().open_connection(handle)
            })
        }

        extern "C" fn close_connection(connection: $crate::ffi::IsarConnection) -> $crate::ErrorCode {
            $crate::ffi::guard("closeConnection", || {
                let handle = $crate::ffi::connection_handle(connection)?;
                $crate::ffi::context()?.$api().close_connection(handle)
            })
        }

        unsafe extern "C" fn destroy_connection(connection: *mut $crate::ffi::IsarConnection) -> $crate::ErrorCode {
            $crate::ffi::guard("destroyConnection", || {
                let slot = unsafe { connection.as_mut() }
                    .ok_or_else(|| $crate::IsarError::invalid_argument("connection", "null pointer"))?;
                let handle = $crate::ffi::connection_handle(*slot)?;
                let mut owned = Some(handle);
                $crate::ffi::context()?.$api().destroy_connection(&mut owned)?;
                $crate::ffi::forget_connection(handle);
                *slot = std::ptr::null_mut();
                Ok(())
            })
        }

        unsafe extern "C" fn register_connection_state_handler(
            connection: $crate::ffi::IsarConnection,
            callback: Option<$crate::ffi::IsarConnectionStateCallback>,
            user_data: *mut std::ffi::c_void,
        ) {
            $crate::ffi::guard_void("registerConnectionStateHandler", || {
                let callback = $crate::ffi::callback(callback)?;
                let user = $crate::ffi::UserData::new(user_data);
                let target = ($crate::ffi::connection_handle(connection)?, $crate::ffi::context()?.$api());
                $crate::ffi::register_callback(
                    target,
                    "state",
                    callback as usize,
                    user_data,
                    |handle, api| {
                        api.register_connection_state_handler(
                            handle,
                            std::sync::Arc::new(move |state: $crate::ConnectionState| unsafe {
                                callback(state.as_raw(), user.get())
                            }),
                        )
                    },
                    |handle, api, id| api.unregister_connection_state_handler(handle, id),
                )
            })
        }

        unsafe extern "C" fn unregister_connection_state_handler(
            connection: $crate::ffi::IsarConnection,
            callback: Option<$crate::ffi::IsarConnectionStateCallback>,
            user_data: *mut std::ffi::c_void,
        ) {
            $crate::ffi::guard_void("unregisterConnectionStateHandler", || {
                let callback = $crate::ffi::callback(callback)?;
                let target = ($crate::ffi::connection_handle(connection)?, $crate::ffi::context()?.$api());
                $crate::ffi::unregister_callback(target, "state", callback as usize, user_data, |handle, api, id| {
                    api.unregister_connection_state_handler(handle, id)
                })
            })
        }

        unsafe extern "C" fn get_connection_info(
            connection: $crate::ffi::IsarConnection,
            info: *mut $crate::ffi::IsarConnectionInfo,
        ) -> $crate::ErrorCode {
            $crate::ffi::guard("getConnectionInfo", || {
                let handle = $crate::ffi::connection_handle(connection)?;
                if info.is_null() {
                    return Err($crate::IsarError::invalid_argument("info", "null output pointer"));
                }
                let current = $crate::ffi::context()?.$api().get_connection_info(handle)?;
                let name = $crate::ffi::remote_name_ptr(handle, &current.remote_name)?;
                unsafe { $crate::ffi::output(info, "info", $crate::ffi::IsarConnectionInfo::new(&current, name)) }
            })
        }
    };
}

pub(crate) use lifecycle_functions;

/// Unwraps a callback pointer. Null is an invalid argument.
pub(crate) fn callback<F>(callback: Option<F>) -> Result<F> {
    callback.ok_or_else(|| IsarError::invalid_argument("callback", "null callback"))
}

/// `void (*)(uint32_t state, void* userData)`
pub type IsarConnectionStateCallback = unsafe extern "C" fn(state: u32, user_data: *mut c_void);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_maps_errors_and_panics() {
        assert_eq!(guard("ok", || Ok(())), ErrorCode::None);
        assert_eq!(guard("no input", || Err(IsarError::NoInput)), ErrorCode::NoInput);
        assert_eq!(guard("panic", || panic!("boom")), ErrorCode::Unknown);
        assert!(!guard_bool("failing query", || Err(IsarError::NoFrame)));
        assert!(guard_bool("query", || Ok(true)));
    }

    #[test]
    fn null_handles_are_invalid_arguments() {
        let err = connection_handle(std::ptr::null_mut()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        let id = NonZeroU64::new(17).unwrap();
        assert_eq!(connection_handle(handle_ptr(id)).unwrap().as_u64(), 17);
    }

    #[test]
    fn remote_name_cache_is_stable_until_the_name_changes() {
        let handle = ConnectionHandle(NonZeroU64::new(u64::MAX - 3).unwrap());
        let first = remote_name_ptr(handle, "client").unwrap();
        assert_eq!(remote_name_ptr(handle, "client").unwrap(), first);
        let renamed = remote_name_ptr(handle, "headset").unwrap();
        assert_eq!(unsafe { std::ffi::CStr::from_ptr(renamed) }.to_str().unwrap(), "headset");
        forget_connection(handle);
    }
}
