//! Drives the C function tables the way a native host does.

#![cfg(feature = "capi")]

use isar::ffi::{
    IsarChannelDescription, IsarClientApi, IsarConfig, IsarConnection, IsarConnectionInfo, IsarD3D11Config,
    IsarD3D11Frame, IsarDataChannel, IsarDataChannelApi, IsarDataChannelProvider, IsarFrameInfo, IsarFramePayload,
    IsarGraphicsApiBinding, IsarGraphicsApiConfig, IsarGraphicsApiFrame, IsarHaptic, IsarHapticPayload,
    IsarHapticVibration, IsarPortRange, IsarServerApi, IsarSignaling, IsarSignalingApi, IsarSignalingConfig,
    IsarSignalingProvider, IsarSpatialInput, Isar_Client_CreateApi, Isar_DataChannel_CreateApi,
    Isar_Server_CreateApi, Isar_Signaling_CreateApi,
};
use isar::{
    Button, ChannelPriority, CodecType, ConnectionState, DeviceType, ErrorCode, FocusPlane, GraphicsApiType,
    HapticChannel, HapticType, Handedness, InputType, RenderConfig, TextureFormat, Version, XrPose,
};
use parking_lot::Mutex;
use std::ffi::{CStr, CString, c_char, c_void};
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

fn server_api() -> IsarServerApi {
    let mut api = MaybeUninit::uninit();
    assert_eq!(unsafe { Isar_Server_CreateApi(api.as_mut_ptr()) }, ErrorCode::None);
    unsafe { api.assume_init() }
}

fn client_api() -> IsarClientApi {
    let mut api = MaybeUninit::uninit();
    assert_eq!(unsafe { Isar_Client_CreateApi(api.as_mut_ptr()) }, ErrorCode::None);
    unsafe { api.assume_init() }
}

fn channel_api() -> IsarDataChannelApi {
    let mut api = MaybeUninit::uninit();
    assert_eq!(unsafe { Isar_DataChannel_CreateApi(api.as_mut_ptr()) }, ErrorCode::None);
    unsafe { api.assume_init() }
}

fn signaling_api() -> IsarSignalingApi {
    let mut api = MaybeUninit::uninit();
    assert_eq!(unsafe { Isar_Signaling_CreateApi(api.as_mut_ptr()) }, ErrorCode::None);
    unsafe { api.assume_init() }
}

fn d3d11() -> IsarGraphicsApiConfig {
    IsarGraphicsApiConfig {
        graphics_api_type: GraphicsApiType::D3D11.as_raw(),
        binding: IsarGraphicsApiBinding {
            d3d11: IsarD3D11Config { device: NonNull::<u8>::dangling().as_ptr().cast() },
        },
    }
}

/// Owns the strings an [`IsarConfig`] points into.
struct HostConfig {
    name: CString,
    ip: CString,
    device_type: DeviceType,
    ports: (u32, u32),
}

impl HostConfig {
    fn new(name: &str, device_type: DeviceType) -> Self {
        HostConfig {
            name: CString::new(name).unwrap(),
            ip: CString::new("0.0.0.0").unwrap(),
            device_type,
            ports: (51000, 51999),
        }
    }

    fn raw(&self) -> IsarConfig {
        IsarConfig {
            friendly_name: self.name.as_ptr(),
            codec_preference: CodecType::H264.as_raw(),
            diagnostic_options: 0,
            num_ice_servers: 0,
            ice_servers: ptr::null(),
            render_config: RenderConfig::default().into(),
            signaling_config: IsarSignalingConfig { suggested_ipv4: self.ip.as_ptr(), port: 9999 },
            device_type: self.device_type.as_raw(),
            port_range: IsarPortRange { min_port: self.ports.0, max_port: self.ports.1 },
        }
    }
}

enum Message {
    Sdp(CString),
    Candidate(CString, i32, CString),
}

/// Host-side signaling that queues outgoing messages for the test to relay.
#[derive(Default)]
struct Outbox {
    messages: Mutex<Vec<Message>>,
    starts: AtomicU32,
}

unsafe fn owned(text: *const c_char) -> CString {
    unsafe { CStr::from_ptr(text) }.to_owned()
}

unsafe extern "C" fn on_start(_ip: *const c_char, _port: u32, user_data: *mut c_void) {
    let outbox = unsafe { &*user_data.cast::<Outbox>() };
    outbox.starts.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn on_sdp(sdp: *const c_char, user_data: *mut c_void) {
    let outbox = unsafe { &*user_data.cast::<Outbox>() };
    outbox.messages.lock().push(Message::Sdp(unsafe { owned(sdp) }));
}

unsafe extern "C" fn on_candidate(id: *const c_char, line_index: i32, candidate: *const c_char, user_data: *mut c_void) {
    let outbox = unsafe { &*user_data.cast::<Outbox>() };
    outbox.messages.lock().push(Message::Candidate(unsafe { owned(id) }, line_index, unsafe { owned(candidate) }));
}

fn provider(outbox: &'static Outbox) -> IsarSignalingProvider {
    IsarSignalingProvider {
        user_data: ptr::from_ref(outbox).cast_mut().cast(),
        start: Some(on_start),
        stop: None,
        connection_changed: None,
        send_sdp: Some(on_sdp),
        send_ice_candidate: Some(on_candidate),
    }
}

fn relay(signaling: &IsarSignalingApi, from: &Outbox, to: IsarSignaling) {
    let messages = std::mem::take(&mut *from.messages.lock());
    for message in messages {
        let code = match message {
            Message::Sdp(sdp) => unsafe { (signaling.set_remote_sdp)(to, sdp.as_ptr()) },
            Message::Candidate(id, line_index, candidate) => unsafe {
                (signaling.set_remote_ice_candidate)(to, id.as_ptr(), line_index, candidate.as_ptr())
            },
        };
        assert_eq!(code, ErrorCode::None);
    }
}

unsafe extern "C" fn record_state(state: u32, user_data: *mut c_void) {
    unsafe { &*user_data.cast::<AtomicU32>() }.store(state, Ordering::SeqCst);
}

unsafe extern "C" fn count_states(_state: u32, user_data: *mut c_void) {
    unsafe { &*user_data.cast::<AtomicU32>() }.fetch_add(1, Ordering::SeqCst);
}

#[derive(Default)]
struct ChannelLog {
    connected: AtomicU32,
    received: Mutex<Vec<Vec<u8>>>,
}

unsafe extern "C" fn channel_connected(user_data: *mut c_void, connected: bool) {
    unsafe { &*user_data.cast::<ChannelLog>() }.connected.store(connected.into(), Ordering::SeqCst);
}

unsafe extern "C" fn channel_data(user_data: *mut c_void, data: *const u8, size: u32) {
    let bytes = unsafe { std::slice::from_raw_parts(data, size as usize) }.to_vec();
    unsafe { &*user_data.cast::<ChannelLog>() }.received.lock().push(bytes);
}

fn channel_provider(log: &'static ChannelLog) -> IsarDataChannelProvider {
    IsarDataChannelProvider {
        user_data: ptr::from_ref(log).cast_mut().cast(),
        is_remote_supported: None,
        on_supported_changed: None,
        on_connected_changed: Some(channel_connected),
        on_data_received: Some(channel_data),
    }
}

#[test]
fn tables_carry_the_library_version() {
    let version = Version::LATEST.packed();
    assert_eq!(server_api().version, version);
    assert_eq!(client_api().version, version);
    assert_eq!(channel_api().version, version);
    assert_eq!(signaling_api().version, version);
}

#[test]
fn create_api_rejects_null_tables() {
    unsafe {
        assert_eq!(Isar_Server_CreateApi(ptr::null_mut()), ErrorCode::InvalidArgument);
        assert_eq!(Isar_Client_CreateApi(ptr::null_mut()), ErrorCode::InvalidArgument);
        assert_eq!(Isar_DataChannel_CreateApi(ptr::null_mut()), ErrorCode::InvalidArgument);
        assert_eq!(Isar_Signaling_CreateApi(ptr::null_mut()), ErrorCode::InvalidArgument);
    }
}

#[test]
fn destroy_clears_the_callers_handle() {
    let api = server_api();
    let host = HostConfig::new("abi-server", DeviceType::Pc);
    let mut connection: IsarConnection = ptr::null_mut();
    assert_eq!(unsafe { (api.create_connection)(&host.raw(), d3d11(), &mut connection) }, ErrorCode::None);
    assert!(!connection.is_null());

    let state = Box::leak(Box::new(AtomicU32::new(u32::MAX)));
    unsafe { (api.register_connection_state_handler)(connection, Some(record_state), ptr::from_mut(state).cast()) };
    assert!(wait_until(|| state.load(Ordering::SeqCst) == ConnectionState::Disconnected.as_raw()));

    assert_eq!(unsafe { (api.destroy_connection)(&mut connection) }, ErrorCode::None);
    assert!(connection.is_null());
    assert_eq!(unsafe { (api.destroy_connection)(&mut connection) }, ErrorCode::InvalidArgument);
    assert_eq!(unsafe { (api.destroy_connection)(ptr::null_mut()) }, ErrorCode::InvalidArgument);
}

#[test]
fn null_arguments_are_rejected() {
    let server = server_api();
    let client = client_api();
    let host = HostConfig::new("abi-null", DeviceType::Vr);
    let mut connection: IsarConnection = ptr::null_mut();
    unsafe {
        assert_eq!((server.create_connection)(ptr::null(), d3d11(), &mut connection), ErrorCode::InvalidArgument);
        assert_eq!((client.create_connection)(&host.raw(), d3d11(), ptr::null_mut()), ErrorCode::InvalidArgument);
    }
    assert_eq!((server.open_connection)(ptr::null_mut()), ErrorCode::InvalidArgument);
    assert!(!(server.camera_supported)(ptr::null_mut()));

    let mut info = MaybeUninit::<IsarConnectionInfo>::uninit();
    assert_eq!(unsafe { (client.get_connection_info)(ptr::null_mut(), info.as_mut_ptr()) }, ErrorCode::InvalidArgument);
}

#[test]
fn bad_signaling_address_is_a_config_error() {
    let api = client_api();
    let mut host = HostConfig::new("abi-bad-ip", DeviceType::Mr);
    host.ip = CString::new("not-an-address").unwrap();
    let mut connection: IsarConnection = ptr::null_mut();
    let code = unsafe { (api.create_connection)(&host.raw(), d3d11(), &mut connection) };
    assert_eq!(code, ErrorCode::ConfigSignalingIpInvalidOrMissing);
    assert!(connection.is_null());

    host.ip = CString::new("0.0.0.0").unwrap();
    host.ports = (80, 90);
    let code = unsafe { (api.create_connection)(&host.raw(), d3d11(), &mut connection) };
    assert_eq!(code, ErrorCode::InvalidArgument);
}

#[test]
fn host_connects_and_exchanges_channel_messages() {
    let server = server_api();
    let client = client_api();
    let signaling = signaling_api();
    let channels = channel_api();

    let server_host = HostConfig::new("abi-host", DeviceType::Pc);
    let client_host = HostConfig::new("abi-headset", DeviceType::Mr);
    let mut on_server: IsarConnection = ptr::null_mut();
    let mut on_client: IsarConnection = ptr::null_mut();
    unsafe {
        assert_eq!((server.create_connection)(&server_host.raw(), d3d11(), &mut on_server), ErrorCode::None);
        assert_eq!((client.create_connection)(&client_host.raw(), d3d11(), &mut on_client), ErrorCode::None);
    }

    let server_log: &'static ChannelLog = Box::leak(Box::default());
    let client_log: &'static ChannelLog = Box::leak(Box::default());
    let name = CString::new("acme.abi.control").unwrap();
    let description = IsarChannelDescription {
        name: name.as_ptr(),
        version: Version::LATEST.packed(),
        priority: ChannelPriority::High.as_raw(),
        reliable: 1,
        requires_large_messages: 0,
    };
    let mut server_channel: IsarDataChannel = ptr::null_mut();
    let mut client_channel: IsarDataChannel = ptr::null_mut();
    unsafe {
        let code = (channels.create)(on_server, description, channel_provider(server_log), &mut server_channel);
        assert_eq!(code, ErrorCode::None);
        let code = (channels.create)(on_client, description, channel_provider(client_log), &mut client_channel);
        assert_eq!(code, ErrorCode::None);
    }

    let server_outbox: &'static Outbox = Box::leak(Box::default());
    let client_outbox: &'static Outbox = Box::leak(Box::default());
    let mut server_registration: IsarSignaling = ptr::null_mut();
    let mut client_registration: IsarSignaling = ptr::null_mut();
    unsafe {
        let code = (signaling.register_provider)(on_server, &provider(server_outbox), &mut server_registration);
        assert_eq!(code, ErrorCode::None);
        let code = (signaling.register_provider)(on_client, &provider(client_outbox), &mut client_registration);
        assert_eq!(code, ErrorCode::None);
    }

    assert_eq!((server.open_connection)(on_server), ErrorCode::None);
    assert_eq!((client.open_connection)(on_client), ErrorCode::None);
    assert_eq!((signaling.set_connection_state)(server_registration, true), ErrorCode::None);
    assert_eq!((signaling.set_connection_state)(client_registration, true), ErrorCode::None);
    assert!(wait_until(|| server_outbox.starts.load(Ordering::SeqCst) == 1));

    let mut info = MaybeUninit::<IsarConnectionInfo>::uninit();
    let connected = wait_until(|| {
        relay(&signaling, server_outbox, client_registration);
        relay(&signaling, client_outbox, server_registration);
        unsafe { (server.get_connection_info)(on_server, info.as_mut_ptr()) }.is_ok()
            && unsafe { (client.get_connection_info)(on_client, info.as_mut_ptr()) }.is_ok()
    });
    assert!(connected, "C hosts did not connect");

    let info = unsafe { info.assume_init() };
    assert_eq!(unsafe { CStr::from_ptr(info.remote_name) }.to_str().unwrap(), "abi-host");
    assert_eq!(info.remote_device_type, DeviceType::Pc.as_raw());
    assert_eq!(info.codec_in_use, CodecType::H264.as_raw());

    assert_eq!((channels.open)(client_channel), ErrorCode::DataChannelUnsupported);
    assert_eq!((channels.open)(server_channel), ErrorCode::None);
    assert!(wait_until(|| {
        server_log.connected.load(Ordering::SeqCst) == 1 && client_log.connected.load(Ordering::SeqCst) == 1
    }));

    let message = b"hello from the host";
    let code = unsafe { (channels.push_data)(server_channel, message.as_ptr(), message.len() as u32) };
    assert_eq!(code, ErrorCode::None);
    assert!(wait_until(|| client_log.received.lock().first().is_some_and(|bytes| bytes == message)));
    assert!(server_log.received.lock().is_empty());

    assert_eq!((server.close_connection)(on_server), ErrorCode::None);
    unsafe {
        assert_eq!((channels.destroy)(&mut server_channel), ErrorCode::None);
        assert_eq!((channels.destroy)(&mut client_channel), ErrorCode::None);
        assert_eq!((server.destroy_connection)(&mut on_server), ErrorCode::None);
        assert_eq!((client.destroy_connection)(&mut on_client), ErrorCode::None);
    }
    assert!(server_channel.is_null() && client_channel.is_null());
    assert!(on_server.is_null() && on_client.is_null());
}

/// A server and a client created through the C tables and linked by
/// relaying their signaling messages.
struct HostPair {
    server: IsarServerApi,
    client: IsarClientApi,
    signaling: IsarSignalingApi,
    on_server: IsarConnection,
    on_client: IsarConnection,
    server_outbox: &'static Outbox,
    client_outbox: &'static Outbox,
    server_registration: IsarSignaling,
    client_registration: IsarSignaling,
}

impl HostPair {
    fn new(server_name: &str, client_name: &str) -> Self {
        let server = server_api();
        let client = client_api();
        let signaling = signaling_api();
        let server_host = HostConfig::new(server_name, DeviceType::Pc);
        let client_host = HostConfig::new(client_name, DeviceType::Vr);
        let mut on_server: IsarConnection = ptr::null_mut();
        let mut on_client: IsarConnection = ptr::null_mut();
        unsafe {
            assert_eq!((server.create_connection)(&server_host.raw(), d3d11(), &mut on_server), ErrorCode::None);
            assert_eq!((client.create_connection)(&client_host.raw(), d3d11(), &mut on_client), ErrorCode::None);
        }

        let server_outbox: &'static Outbox = Box::leak(Box::default());
        let client_outbox: &'static Outbox = Box::leak(Box::default());
        let mut server_registration: IsarSignaling = ptr::null_mut();
        let mut client_registration: IsarSignaling = ptr::null_mut();
        unsafe {
            let code = (signaling.register_provider)(on_server, &provider(server_outbox), &mut server_registration);
            assert_eq!(code, ErrorCode::None);
            let code = (signaling.register_provider)(on_client, &provider(client_outbox), &mut client_registration);
            assert_eq!(code, ErrorCode::None);
        }
        HostPair {
            server,
            client,
            signaling,
            on_server,
            on_client,
            server_outbox,
            client_outbox,
            server_registration,
            client_registration,
        }
    }

    fn connect(&self) {
        assert_eq!((self.server.open_connection)(self.on_server), ErrorCode::None);
        assert_eq!((self.client.open_connection)(self.on_client), ErrorCode::None);
        assert_eq!((self.signaling.set_connection_state)(self.server_registration, true), ErrorCode::None);
        assert_eq!((self.signaling.set_connection_state)(self.client_registration, true), ErrorCode::None);

        let mut info = MaybeUninit::<IsarConnectionInfo>::uninit();
        let connected = wait_until(|| {
            relay(&self.signaling, self.server_outbox, self.client_registration);
            relay(&self.signaling, self.client_outbox, self.server_registration);
            unsafe { (self.server.get_connection_info)(self.on_server, info.as_mut_ptr()) }.is_ok()
                && unsafe { (self.client.get_connection_info)(self.on_client, info.as_mut_ptr()) }.is_ok()
        });
        assert!(connected, "C hosts did not connect");
    }

    /// Phase one of the spatial input pull.
    fn pending_inputs(&self) -> u32 {
        let mut count = u32::MAX;
        let code = unsafe { (self.server.pull_spatial_input)(self.on_server, ptr::null_mut(), 0, &mut count) };
        assert_eq!(code, ErrorCode::None);
        count
    }
}

impl Drop for HostPair {
    fn drop(&mut self) {
        unsafe {
            let _ = (self.server.destroy_connection)(&mut self.on_server);
            let _ = (self.client.destroy_connection)(&mut self.on_client);
        }
    }
}

fn pressed(controller_identifier: u32, buttons: &mut [Button]) -> IsarSpatialInput {
    // Hosts memset the struct and fill in what they track.
    let mut raw: IsarSpatialInput = unsafe { std::mem::zeroed() };
    raw.input_type = InputType::SourcePressed.as_raw();
    raw.controller_data.controller_identifier = controller_identifier;
    raw.controller_data.handedness = Handedness::Left.as_raw();
    raw.controller_data.buttons = buttons.as_mut_ptr();
    raw.controller_data.buttons_length = buttons.len() as u32;
    raw
}

fn d3d11_frame(frame_timestamp: i64) -> IsarGraphicsApiFrame {
    IsarGraphicsApiFrame {
        info: IsarFrameInfo {
            pose: XrPose { frame_timestamp, pose_timestamp: frame_timestamp, ..XrPose::default() },
            texture_format: TextureFormat::Rgba32.as_raw(),
            z_near: 0.1,
            z_far: 100.0,
            has_focus_plane: 0,
            focus_plane: FocusPlane::default(),
            passthrough_enabled: false,
        },
        graphics_api_type: GraphicsApiType::D3D11.as_raw(),
        payload: IsarFramePayload {
            d3d11: IsarD3D11Frame {
                frame: NonNull::<u8>::dangling().as_ptr().cast(),
                depth_frame: ptr::null_mut(),
                subresource_index: 0,
            },
        },
    }
}

fn vibration(amplitude: f32) -> IsarHaptic {
    IsarHaptic {
        haptic_type: HapticType::Vibration.as_raw(),
        payload: IsarHapticPayload {
            vibration: IsarHapticVibration {
                controller_identifier: 7,
                handedness: Handedness::Left.as_raw(),
                channel: HapticChannel::Body.as_raw(),
                duration: 20_000,
                frequency: 160.0,
                amplitude,
            },
        },
    }
}

#[test]
fn spatial_input_drains_in_two_phases() {
    let pair = HostPair::new("abi-input-host", "abi-input-headset");
    pair.connect();

    for id in 1..=3u32 {
        let mut buttons = [Button { identifier: id, value: true }, Button { identifier: 10 + id, value: false }];
        let raw = pressed(id, &mut buttons);
        assert_eq!(unsafe { (pair.client.push_spatial_input)(pair.on_client, &raw) }, ErrorCode::None);
    }
    assert!(wait_until(|| pair.pending_inputs() == 3));

    let count = pair.pending_inputs();
    let mut buffer: Vec<MaybeUninit<IsarSpatialInput>> = (0..count).map(|_| MaybeUninit::uninit()).collect();
    let code =
        unsafe { (pair.server.pull_spatial_input)(pair.on_server, buffer.as_mut_ptr().cast(), count, ptr::null_mut()) };
    assert_eq!(code, ErrorCode::None);

    for (expected_id, slot) in (1..=3u32).zip(&buffer) {
        let event = unsafe { slot.assume_init_ref() };
        let data = &event.controller_data;
        assert_eq!(event.input_type, InputType::SourcePressed.as_raw());
        assert_eq!(data.controller_identifier, expected_id);
        assert_eq!(data.handedness, Handedness::Left.as_raw());
        let buttons = unsafe { std::slice::from_raw_parts(data.buttons, data.buttons_length as usize) };
        assert_eq!(buttons, &[Button { identifier: expected_id, value: true }, Button {
            identifier: 10 + expected_id,
            value: false
        }]);
        assert_eq!(data.axis_1d_length, 0);
        assert_eq!(data.axis_2d_length, 0);
        unsafe {
            libc::free(data.buttons.cast());
            libc::free(data.axis_1d.cast());
            libc::free(data.axis_2d.cast());
        }
    }

    assert_eq!(pair.pending_inputs(), 0);
    let mut count = 0u32;
    let mut empty = MaybeUninit::<IsarSpatialInput>::uninit();
    let code = unsafe { (pair.server.pull_spatial_input)(pair.on_server, empty.as_mut_ptr(), 1, &mut count) };
    assert_eq!(code, ErrorCode::NoInput);
    let code = unsafe { (pair.server.pull_spatial_input)(pair.on_server, empty.as_mut_ptr(), 1, ptr::null_mut()) };
    assert_eq!(code, ErrorCode::NoInput);
    let code = unsafe { (pair.server.pull_spatial_input)(pair.on_server, ptr::null_mut(), 0, ptr::null_mut()) };
    assert_eq!(code, ErrorCode::InvalidArgument);
}

#[test]
fn frames_poses_and_haptics_cross_the_tables() {
    let pair = HostPair::new("abi-media-host", "abi-media-headset");
    assert_eq!((pair.server.init_video_track)(pair.on_server, d3d11()), ErrorCode::None);
    pair.connect();

    assert_eq!((pair.server.push_frame)(pair.on_server, d3d11_frame(4_200)), ErrorCode::None);
    let mut pulled = MaybeUninit::<IsarGraphicsApiFrame>::uninit();
    assert!(wait_until(|| unsafe { (pair.client.pull_frame)(pair.on_client, pulled.as_mut_ptr()) }.is_ok()));
    let pulled = unsafe { pulled.assume_init() };
    assert_eq!(pulled.info.pose.frame_timestamp, 4_200);
    assert_eq!(pulled.graphics_api_type, GraphicsApiType::D3D11.as_raw());
    let mut again = MaybeUninit::<IsarGraphicsApiFrame>::uninit();
    assert_eq!(unsafe { (pair.client.pull_frame)(pair.on_client, again.as_mut_ptr()) }, ErrorCode::NoFrame);

    let pose = XrPose { frame_timestamp: 9_900, pose_timestamp: 9_850, ..XrPose::default() };
    assert_eq!(unsafe { (pair.client.push_view_pose)(pair.on_client, &pose) }, ErrorCode::None);
    let mut received = XrPose::default();
    assert!(wait_until(|| unsafe { (pair.server.pull_view_pose)(pair.on_server, &mut received) }.is_ok()));
    assert_eq!((received.frame_timestamp, received.pose_timestamp), (9_900, 9_850));
    assert_eq!(unsafe { (pair.server.pull_view_pose)(pair.on_server, &mut received) }, ErrorCode::NoInput);

    assert_eq!(unsafe { (pair.server.push_haptic)(pair.on_server, &vibration(0.5)) }, ErrorCode::None);
    assert_eq!(unsafe { (pair.server.push_haptic)(pair.on_server, &vibration(1.5)) }, ErrorCode::InvalidArgument);
    assert_eq!(unsafe { (pair.server.push_haptic)(pair.on_server, ptr::null()) }, ErrorCode::InvalidArgument);
}

#[test]
fn repeated_registration_reports_the_state_once() {
    let api = server_api();
    let host = HostConfig::new("abi-repeat", DeviceType::Pc);
    let mut connection: IsarConnection = ptr::null_mut();
    assert_eq!(unsafe { (api.create_connection)(&host.raw(), d3d11(), &mut connection) }, ErrorCode::None);

    let calls = Box::leak(Box::new(AtomicU32::new(0)));
    let user_data: *mut c_void = ptr::from_mut(calls).cast();
    unsafe {
        (api.register_connection_state_handler)(connection, Some(count_states), user_data);
        (api.register_connection_state_handler)(connection, Some(count_states), user_data);
    }
    assert!(wait_until(|| calls.load(Ordering::SeqCst) >= 1));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Unregistering forgets the pair, so registering again reports the state anew.
    unsafe {
        (api.unregister_connection_state_handler)(connection, Some(count_states), user_data);
        (api.register_connection_state_handler)(connection, Some(count_states), user_data);
    }
    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2));

    assert_eq!(unsafe { (api.destroy_connection)(&mut connection) }, ErrorCode::None);
}
