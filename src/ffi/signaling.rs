//! `IsarSignalingApi` and foreign signaling providers.

use std::ffi::{CString, c_char, c_void};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::warn;

use super::types::c_str;
use super::{IsarConnection, IsarSignaling, UserData, connection_handle, context, guard, handle_ptr, input, output, signaling_handle};
use crate::signaling::{SignalingApi, SignalingProvider};
use crate::{ConnectionState, ErrorCode, IsarError, Result};

/// Signaling transport supplied by the host. Missing callbacks are skipped.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarSignalingProvider {
    pub user_data: *mut c_void,
    pub start: Option<unsafe extern "C" fn(*const c_char, u32, *mut c_void)>,
    pub stop: Option<unsafe extern "C" fn(*mut c_void)>,
    pub connection_changed: Option<unsafe extern "C" fn(u32, *mut c_void)>,
    pub send_sdp: Option<unsafe extern "C" fn(*const c_char, *mut c_void)>,
    pub send_ice_candidate: Option<unsafe extern "C" fn(*const c_char, i32, *const c_char, *mut c_void)>,
}

/// Adapts an [`IsarSignalingProvider`] to [`SignalingProvider`]. Strings
/// handed to the host live for the duration of the call.
struct ForeignSignalingProvider {
    user_data: UserData,
    start: Option<unsafe extern "C" fn(*const c_char, u32, *mut c_void)>,
    stop: Option<unsafe extern "C" fn(*mut c_void)>,
    connection_changed: Option<unsafe extern "C" fn(u32, *mut c_void)>,
    send_sdp: Option<unsafe extern "C" fn(*const c_char, *mut c_void)>,
    send_ice_candidate: Option<unsafe extern "C" fn(*const c_char, i32, *const c_char, *mut c_void)>,
}

impl From<&IsarSignalingProvider> for ForeignSignalingProvider {
    fn from(raw: &IsarSignalingProvider) -> Self {
        ForeignSignalingProvider {
            user_data: UserData::new(raw.user_data),
            start: raw.start,
            stop: raw.stop,
            connection_changed: raw.connection_changed,
            send_sdp: raw.send_sdp,
            send_ice_candidate: raw.send_ice_candidate,
        }
    }
}

fn c_string(text: &str, what: &'static str) -> Option<CString> {
    CString::new(text).inspect_err(|_| warn!(what, "String for the signaling provider contains NUL")).ok()
}

impl SignalingProvider for ForeignSignalingProvider {
    fn start(&self, suggested_ipv4: Ipv4Addr, suggested_port: u32) {
        let (Some(callback), Some(ip)) = (self.start, c_string(&suggested_ipv4.to_string(), "ip")) else {
            return;
        };
        unsafe { callback(ip.as_ptr(), suggested_port, self.user_data.get()) }
    }

    fn stop(&self) {
        if let Some(callback) = self.stop {
            unsafe { callback(self.user_data.get()) }
        }
    }

    fn connection_changed(&self, state: ConnectionState) {
        if let Some(callback) = self.connection_changed {
            unsafe { callback(state.as_raw(), self.user_data.get()) }
        }
    }

    fn send_sdp(&self, sdp: &str) {
        let (Some(callback), Some(sdp)) = (self.send_sdp, c_string(sdp, "sdp")) else {
            return;
        };
        unsafe { callback(sdp.as_ptr(), self.user_data.get()) }
    }

    fn send_ice_candidate(&self, id: &str, line_index: i32, candidate: &str) {
        let Some(callback) = self.send_ice_candidate else {
            return;
        };
        let (Some(id), Some(candidate)) = (c_string(id, "id"), c_string(candidate, "candidate")) else {
            return;
        };
        unsafe { callback(id.as_ptr(), line_index, candidate.as_ptr(), self.user_data.get()) }
    }
}

/// The signaling function table.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IsarSignalingApi {
    pub version: u32,
    pub register_provider:
        unsafe extern "C" fn(IsarConnection, *const IsarSignalingProvider, *mut IsarSignaling) -> ErrorCode,
    pub set_remote_sdp: unsafe extern "C" fn(IsarSignaling, *const c_char) -> ErrorCode,
    pub set_remote_ice_candidate: unsafe extern "C" fn(IsarSignaling, *const c_char, i32, *const c_char) -> ErrorCode,
    pub set_connection_state: extern "C" fn(IsarSignaling, bool) -> ErrorCode,
}

/// Fills `api` with the signaling functions.
///
/// # Safety
///
/// `api` must be null or point to writable memory for an `IsarSignalingApi`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Signaling_CreateApi(api: *mut IsarSignalingApi) -> ErrorCode {
    guard("Isar_Signaling_CreateApi", || {
        let table = IsarSignalingApi {
            version: context()?.signaling().version().packed(),
            register_provider,
            set_remote_sdp,
            set_remote_ice_candidate,
            set_connection_state,
        };
        unsafe { output(api, "api", table) }
    })
}

fn signaling() -> Result<crate::IsarSignaling<'static>> {
    Ok(context()?.signaling())
}

/// The provider is copied; the host may release its struct afterwards.
unsafe extern "C" fn register_provider(
    connection: IsarConnection,
    provider: *const IsarSignalingProvider,
    registration: *mut IsarSignaling,
) -> ErrorCode {
    guard("registerProvider", || {
        let handle = connection_handle(connection)?;
        let provider = unsafe { input(provider, "provider") }?;
        if registration.is_null() {
            return Err(IsarError::invalid_argument("signaling", "null output pointer"));
        }
        let provider: Arc<dyn SignalingProvider> = Arc::new(ForeignSignalingProvider::from(provider));
        let registered = signaling()?.register_provider(handle, provider)?;
        unsafe { output(registration, "signaling", handle_ptr(registered.0)) }
    })
}

unsafe extern "C" fn set_remote_sdp(registration: IsarSignaling, sdp: *const c_char) -> ErrorCode {
    guard("setRemoteSdp", || {
        let handle = signaling_handle(registration)?;
        let sdp = unsafe { c_str(sdp, "sdp") }?;
        signaling()?.set_remote_sdp(handle, sdp)
    })
}

unsafe extern "C" fn set_remote_ice_candidate(
    registration: IsarSignaling,
    id: *const c_char,
    line_index: i32,
    candidate: *const c_char,
) -> ErrorCode {
    guard("setRemoteIceCandidate", || {
        let handle = signaling_handle(registration)?;
        let id = unsafe { c_str(id, "id") }?;
        let candidate = unsafe { c_str(candidate, "candidate") }?;
        signaling()?.set_remote_ice_candidate(handle, id, line_index, candidate)
    })
}

extern "C" fn set_connection_state(registration: IsarSignaling, connected: bool) -> ErrorCode {
    guard("setConnectionState", || signaling()?.set_connection_state(signaling_handle(registration)?, connected))
}
