//! `IsarDataChannelApi` and foreign channel providers.

use std::ffi::{CString, c_void};
use std::sync::Arc;
use tracing::warn;

use super::{
    IsarChannelDescription, IsarConnection, IsarDataChannel, UserData, channel_handle, connection_handle, context,
    guard, handle_ptr, output,
};
use super::types::c_slice;
use crate::data_channel::{ChannelDescription, DataChannelApi, DataChannelProvider};
use crate::{ErrorCode, IsarError, Result};

/// Channel callbacks supplied by the host. Missing callbacks are skipped; a
/// missing `IsRemoteSupported` accepts every remote channel.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsarDataChannelProvider {
    pub user_data: *mut c_void,
    pub is_remote_supported: Option<unsafe extern "C" fn(*mut c_void, IsarChannelDescription) -> bool>,
    pub on_supported_changed: Option<unsafe extern "C" fn(*mut c_void, bool)>,
    pub on_connected_changed: Option<unsafe extern "C" fn(*mut c_void, bool)>,
    pub on_data_received: Option<unsafe extern "C" fn(*mut c_void, *const u8, u32)>,
}

/// Adapts an [`IsarDataChannelProvider`] to [`DataChannelProvider`].
struct ForeignChannelProvider {
    user_data: UserData,
    is_remote_supported: Option<unsafe extern "C" fn(*mut c_void, IsarChannelDescription) -> bool>,
    on_supported_changed: Option<unsafe extern "C" fn(*mut c_void, bool)>,
    on_connected_changed: Option<unsafe extern "C" fn(*mut c_void, bool)>,
    on_data_received: Option<unsafe extern "C" fn(*mut c_void, *const u8, u32)>,
}

impl From<IsarDataChannelProvider> for ForeignChannelProvider {
    fn from(raw: IsarDataChannelProvider) -> Self {
        ForeignChannelProvider {
            user_data: UserData::new(raw.user_data),
            is_remote_supported: raw.is_remote_supported,
            on_supported_changed: raw.on_supported_changed,
            on_connected_changed: raw.on_connected_changed,
            on_data_received: raw.on_data_received,
        }
    }
}

impl DataChannelProvider for ForeignChannelProvider {
    fn is_remote_supported(&self, remote: &ChannelDescription) -> bool {
        let Some(callback) = self.is_remote_supported else {
            return true;
        };
        let Ok(name) = CString::new(remote.name.as_str()) else {
            warn!(channel = %remote.name, "Remote channel name contains NUL");
            return false;
        };
        unsafe { callback(self.user_data.get(), IsarChannelDescription::borrowed(remote, &name)) }
    }

    fn on_supported_changed(&self, supported: bool) {
        if let Some(callback) = self.on_supported_changed {
            unsafe { callback(self.user_data.get(), supported) }
        }
    }

    fn on_connected_changed(&self, connected: bool) {
        if let Some(callback) = self.on_connected_changed {
            unsafe { callback(self.user_data.get(), connected) }
        }
    }

    fn on_data_received(&self, data: &[u8]) {
        if let Some(callback) = self.on_data_received {
            unsafe { callback(self.user_data.get(), data.as_ptr(), data.len() as u32) }
        }
    }
}

/// The data channel function table.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IsarDataChannelApi {
    pub version: u32,
    pub create: unsafe extern "C" fn(
        IsarConnection,
        IsarChannelDescription,
        IsarDataChannelProvider,
        *mut IsarDataChannel,
    ) -> ErrorCode,
    pub open: extern "C" fn(IsarDataChannel) -> ErrorCode,
    pub push_data: unsafe extern "C" fn(IsarDataChannel, *const u8, u32) -> ErrorCode,
    pub close: extern "C" fn(IsarDataChannel) -> ErrorCode,
    pub destroy: unsafe extern "C" fn(*mut IsarDataChannel) -> ErrorCode,
}

/// Fills `api` with the data channel functions.
///
/// # Safety
///
/// `api` must be null or point to writable memory for an `IsarDataChannelApi`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_DataChannel_CreateApi(api: *mut IsarDataChannelApi) -> ErrorCode {
    guard("Isar_DataChannel_CreateApi", || {
        let table = IsarDataChannelApi {
            version: context()?.data_channels().version().packed(),
            create,
            open,
            push_data,
            close,
            destroy,
        };
        unsafe { output(api, "api", table) }
    })
}

fn channels() -> Result<crate::IsarDataChannels<'static>> {
    Ok(context()?.data_channels())
}

unsafe extern "C" fn create(
    connection: IsarConnection,
    description: IsarChannelDescription,
    provider: IsarDataChannelProvider,
    channel: *mut IsarDataChannel,
) -> ErrorCode {
    guard("createDataChannel", || {
        let handle = connection_handle(connection)?;
        if channel.is_null() {
            return Err(IsarError::invalid_argument("channel", "null output pointer"));
        }
        let description = unsafe { description.to_description() }?;
        let provider: Arc<dyn DataChannelProvider> = Arc::new(ForeignChannelProvider::from(provider));
        let created = channels()?.create(handle, description, provider)?;
        unsafe { output(channel, "channel", handle_ptr(created.0)) }
    })
}

extern "C" fn open(channel: IsarDataChannel) -> ErrorCode {
    guard("openDataChannel", || channels()?.open(channel_handle(channel)?))
}

unsafe extern "C" fn push_data(channel: IsarDataChannel, buffer: *const u8, size: u32) -> ErrorCode {
    guard("pushData", || {
        let handle = channel_handle(channel)?;
        let data = unsafe { c_slice(buffer, size as usize, "buffer") }?;
        channels()?.push_data(handle, data)
    })
}

extern "C" fn close(channel: IsarDataChannel) -> ErrorCode {
    guard("closeDataChannel", || channels()?.close(channel_handle(channel)?))
}

unsafe extern "C" fn destroy(channel: *mut IsarDataChannel) -> ErrorCode {
    guard("destroyDataChannel", || {
        let slot = unsafe { channel.as_mut() }.ok_or_else(|| IsarError::invalid_argument("channel", "null pointer"))?;
        let mut owned = Some(channel_handle(*slot)?);
        channels()?.destroy(&mut owned)?;
        *slot = std::ptr::null_mut();
        Ok(())
    })
}
