//! Scenario tests for the connection layer.
//!
//! Every test links a server and a client of one context through the
//! loopback transport and drives them through the public table traits.

use super::*;
use crate::api::{ClientApi, ConnectionApi, ServerApi};
use crate::data_channel::DataChannelApi;
use crate::image::image_size;
use crate::signaling::SignalingApi;
use crate::test_utils::{
    CALLBACK_TIMEOUT, LinkedPair, RecordingChannel, SignalingEvent, client_config, d3d11, d3d12, frame,
    gradient_image, pose_at, server_config, wait_until,
};
use crate::{ControllerData, ErrorCode, HapticChannel, HapticTarget, Handedness, InputType, StatsType};
use futures::StreamExt;
use std::borrow::Cow;
use std::net::Ipv4Addr;

fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |value| sink.lock().push(value))
}

fn input(kind: InputType, id: u32) -> SpatialInput {
    SpatialInput::new(kind, ControllerData { controller_identifier: id, handedness: Handedness::Right, ..Default::default() })
}

fn audio_block(samples: &[u8]) -> AudioData<'_> {
    AudioData {
        data: Cow::Borrowed(samples),
        bits_per_sample: 16,
        sample_rate: 48_000,
        number_of_channels: 2,
        samples_per_channel: (samples.len() / 4) as u32,
    }
}

#[test]
fn connect_negotiates_session() {
    let pair = LinkedPair::new();
    pair.connect();

    let server_info = pair.isar.server().get_connection_info(pair.server).unwrap();
    assert_eq!(server_info.remote_name, "test-client");
    assert_eq!(server_info.remote_device_type, DeviceType::Mr);
    assert_eq!(server_info.remote_version, Version::LATEST);
    assert_eq!(server_info.codec_in_use, CodecType::H265);
    assert_eq!((server_info.render_config.width, server_info.render_config.height), (1440, 1584));
    assert_eq!(server_info.render_config.framerate, 72);

    let client_info = pair.isar.client().get_connection_info(pair.client).unwrap();
    assert_eq!(client_info.remote_name, "test-server");
    assert_eq!(client_info.remote_device_type, DeviceType::Pc);
    assert_eq!(client_info.codec_in_use, server_info.codec_in_use);
    assert_eq!(client_info.render_config, server_info.render_config);

    assert_eq!(pair.server_signaling.sdp_count(), 1, "server sends exactly one offer");
    assert_eq!(pair.client_signaling.sdp_count(), 1, "client sends exactly one answer");
    let events = pair.server_signaling.events();
    assert_eq!(events[0], SignalingEvent::Start(Ipv4Addr::UNSPECIFIED, 9999));
    assert!(events.contains(&SignalingEvent::ConnectionChanged(ConnectionState::Connecting)));
    assert!(wait_until(CALLBACK_TIMEOUT, || {
        pair.server_signaling.events().contains(&SignalingEvent::ConnectionChanged(ConnectionState::Connected))
    }));
}

#[test]
fn codec_preference_of_the_offer_wins() {
    let server = Config { codec_preference: CodecType::Vp9, ..server_config() };
    let client = Config { codec_preference: CodecType::H264, ..client_config() };
    let pair = LinkedPair::with_configs(server, client);
    pair.connect();
    assert_eq!(pair.isar.client().get_connection_info(pair.client).unwrap().codec_in_use, CodecType::Vp9);
}

#[test]
fn open_requires_signaling_provider() {
    let isar = crate::Isar::loopback(&crate::LoopbackHub::new()).unwrap();
    let server = isar.server();
    let connection = server.create_connection(&server_config(), d3d11()).unwrap();
    let err = server.open_connection(connection).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigSignalingInvalidOrMissing);
    assert_eq!(server.connection_state(connection).unwrap(), ConnectionState::Disconnected);
}

#[test]
fn open_waits_for_signaling_connection() {
    let pair = LinkedPair::new();
    pair.isar.server().open_connection(pair.server).unwrap();
    assert_eq!(pair.server_state(), ConnectionState::Disconnected);

    pair.isar.signaling().set_connection_state(pair.server_registration, true).unwrap();
    assert_eq!(pair.server_state(), ConnectionState::Connecting);

    let err = pair.isar.server().open_connection(pair.server).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyConnected);

    pair.isar.signaling().set_connection_state(pair.server_registration, false).unwrap();
    assert_eq!(pair.server_state(), ConnectionState::Disconnected);
}

#[test]
fn connection_info_requires_connected() {
    let pair = LinkedPair::new();
    let err = pair.isar.server().get_connection_info(pair.server).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotConnected);
    pair.open().unwrap();
    assert!(pair.isar.client().get_connection_info(pair.client).is_err());
}

#[test]
fn state_handler_sees_current_state_first() {
    let pair = LinkedPair::new();
    let (seen, sink) = recorder();
    pair.isar.server().register_connection_state_handler(pair.server, Arc::new(sink)).unwrap();
    pair.connect();

    assert!(wait_until(CALLBACK_TIMEOUT, || seen.lock().len() == 3));
    assert_eq!(
        *seen.lock(),
        vec![ConnectionState::Disconnected, ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[test]
fn unregistered_state_handler_stays_silent() {
    let pair = LinkedPair::new();
    let (seen, sink) = recorder();
    let server = pair.isar.server();
    let (kept, kept_sink) = recorder();
    let id = server.register_connection_state_handler(pair.server, Arc::new(sink)).unwrap();
    server.register_connection_state_handler(pair.server, Arc::new(kept_sink)).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || seen.lock().len() == 1 && kept.lock().len() == 1));
    server.unregister_connection_state_handler(pair.server, id).unwrap();
    pair.connect();

    // The remaining handler proves the transitions were dispatched.
    assert!(wait_until(CALLBACK_TIMEOUT, || kept.lock().len() == 3));
    assert_eq!(
        *kept.lock(),
        vec![ConnectionState::Disconnected, ConnectionState::Connecting, ConnectionState::Connected]
    );
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(*seen.lock(), vec![ConnectionState::Disconnected]);
}

#[test]
fn frames_carry_their_pose_timestamps() {
    let pair = LinkedPair::new();
    pair.isar.server().init_video_track(pair.server, d3d11()).unwrap();
    pair.connect();

    let pulled = pair.stream_frame(4_200);
    assert_eq!(pulled.info.pose.frame_timestamp, 4_200);
    assert_eq!(pulled.info.pose.pose_timestamp, 4_200);
    assert!(matches!(pair.isar.client().pull_frame(pair.client), Err(IsarError::NoFrame)));
}

#[test]
fn unpulled_frames_are_replaced_by_newer_ones() {
    let pair = LinkedPair::new();
    let server = pair.isar.server();
    server.init_video_track(pair.server, d3d11()).unwrap();
    pair.connect();

    for timestamp in 1..=5 {
        server.push_frame(pair.server, frame(timestamp)).unwrap();
    }
    let mut pulled = Vec::new();
    assert!(wait_until(CALLBACK_TIMEOUT, || {
        if let Ok(frame) = pair.isar.client().pull_frame(pair.client) {
            pulled.push(frame.info.pose.frame_timestamp);
        }
        pulled.last() == Some(&5)
    }));
    assert!(pulled.windows(2).all(|step| step[0] < step[1]), "frames pulled out of order: {pulled:?}");
}

#[test]
fn push_frame_checks_track_and_state() {
    let pair = LinkedPair::new();
    let server = pair.isar.server();
    let err = server.push_frame(pair.server, frame(1)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::VideoTrack);

    server.init_video_track(pair.server, d3d11()).unwrap();
    let err = server.push_frame(pair.server, frame(1)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotConnected);

    let err = server.init_video_track(pair.server, d3d12()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn tracks_cannot_change_once_open() {
    let pair = LinkedPair::new();
    pair.connect();
    let err = pair.isar.server().init_video_track(pair.server, d3d11()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyConnected);
    let err = pair.isar.client().init_camera_track(pair.client, d3d11()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyConnected);
}

#[test]
fn view_poses_reach_pull_and_handlers() {
    let pair = LinkedPair::new();
    let (seen, sink) = recorder();
    let server = pair.isar.server();
    server.register_view_pose_handler(pair.server, Arc::new(move |pose: &XrPose| sink(pose.frame_timestamp))).unwrap();
    pair.connect();

    assert!(matches!(server.pull_view_pose(pair.server), Err(IsarError::NoInput)));
    pair.isar.client().push_view_pose(pair.client, &pose_at(100, 0.0)).unwrap();

    let mut pulled = None;
    assert!(wait_until(CALLBACK_TIMEOUT, || {
        pulled = server.pull_view_pose(pair.server).ok();
        pulled.is_some()
    }));
    assert_eq!(pulled.unwrap().frame_timestamp, 100);
    assert!(wait_until(CALLBACK_TIMEOUT, || *seen.lock() == vec![100]));
}

#[test]
fn legacy_view_pose_keeps_its_timestamp() {
    let pair = LinkedPair::new();
    pair.connect();
    let legacy = crate::LegacyXrPose { timestamp: 77, ..Default::default() };
    pair.isar.client().push_legacy_view_pose(pair.client, &legacy).unwrap();

    let mut pulled = None;
    assert!(wait_until(CALLBACK_TIMEOUT, || {
        pulled = pair.isar.server().pull_view_pose(pair.server).ok();
        pulled.is_some()
    }));
    let pose = pulled.unwrap();
    assert_eq!((pose.frame_timestamp, pose.pose_timestamp), (77, 77));
}

#[test]
fn non_finite_pose_is_rejected() {
    let pair = LinkedPair::new();
    pair.connect();
    let mut pose = pose_at(1, 0.0);
    pose.pose_left.position.y = f32::NAN;
    let err = pair.isar.client().push_view_pose(pair.client, &pose).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn spatial_input_is_pulled_in_order() {
    let pair = LinkedPair::new();
    let (seen, sink) = recorder();
    let server = pair.isar.server();
    server
        .register_spatial_input_handler(pair.server, Arc::new(move |input: &SpatialInput| sink(input.kind())))
        .unwrap();
    pair.connect();

    let client = pair.isar.client();
    for (kind, id) in [(InputType::SourceDetected, 1), (InputType::SourcePressed, 2), (InputType::SourceReleased, 3)] {
        client.push_spatial_input(pair.client, &input(kind, id)).unwrap();
    }
    assert!(wait_until(CALLBACK_TIMEOUT, || server.spatial_input_count(pair.server).unwrap() == 3));

    let first = server.pull_spatial_input(pair.server, 2).unwrap();
    let ids: Vec<u32> = first.iter().map(|event| event.source().controller_identifier).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(server.pull_spatial_input(pair.server, 8).unwrap()[0].kind(), InputType::SourceReleased);
    assert!(matches!(server.pull_spatial_input(pair.server, 8), Err(IsarError::NoInput)));
    assert!(wait_until(CALLBACK_TIMEOUT, || seen.lock().len() == 3));
}

#[test]
fn audio_requires_enabled_track() {
    let pair = LinkedPair::new();
    let (seen, sink) = recorder();
    pair.isar
        .client()
        .register_audio_handler(pair.client, Arc::new(move |audio: &AudioData<'_>| sink(audio.data.len())))
        .unwrap();
    pair.connect();

    let samples = vec![7u8; 480 * 4];
    let server = pair.isar.server();
    let err = server.push_audio_data(pair.server, audio_block(&samples)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AudioTrackNotInitialized);

    server.set_audio_track_enabled(pair.server, true).unwrap();
    server.push_audio_data(pair.server, audio_block(&samples)).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || *seen.lock() == vec![samples.len()]));

    let err = server.push_audio_data(pair.server, audio_block(&samples[..3])).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn microphone_follows_server_request() {
    let pair = LinkedPair::new();
    let (enabled, enabled_sink) = recorder();
    let (captured, captured_sink) = recorder();
    pair.isar.client().register_microphone_enabled_handler(pair.client, Arc::new(enabled_sink)).unwrap();
    pair.isar
        .server()
        .register_microphone_capture_handler(
            pair.server,
            Arc::new(move |audio: &AudioData<'_>| captured_sink(audio.sample_rate)),
        )
        .unwrap();
    pair.connect();

    let samples = vec![1u8; 480 * 4];
    let client = pair.isar.client();
    let err = client.push_microphone_audio(pair.client, audio_block(&samples)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AudioTrackNotInitialized);

    pair.isar.server().set_microphone_capture_enabled(pair.server, true).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || *enabled.lock() == vec![true]));
    client.push_microphone_audio(pair.client, audio_block(&samples)).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || *captured.lock() == vec![48_000]));
}

#[test]
fn haptics_reach_the_client() {
    let pair = LinkedPair::new();
    let (seen, sink) = recorder();
    pair.isar
        .client()
        .register_haptic_handler(pair.client, Arc::new(move |haptic: &Haptic<'_>| sink(haptic.clone().into_owned())))
        .unwrap();
    pair.connect();

    let target = HapticTarget { controller_identifier: 3, handedness: Handedness::Left, channel: HapticChannel::Trigger };
    let amplitudes = [0.0f32, 0.5, 1.0];
    let envelope =
        Haptic::AmplitudeEnvelopeVibration { target, duration: 20_000_000, amplitudes: Cow::Borrowed(&amplitudes) };
    pair.isar.server().push_haptic(pair.server, envelope).unwrap();

    assert!(wait_until(CALLBACK_TIMEOUT, || seen.lock().len() == 1));
    match &seen.lock()[0] {
        Haptic::AmplitudeEnvelopeVibration { target: received, amplitudes, .. } => {
            assert_eq!(*received, target);
            assert_eq!(amplitudes.to_vec(), vec![0.0, 0.5, 1.0]);
        }
        other => panic!("unexpected haptic {other:?}"),
    }

    let loud = Haptic::Vibration { target, duration: 1, frequency: 160.0, amplitude: 1.5 };
    assert_eq!(pair.isar.server().push_haptic(pair.server, loud).unwrap_err().code(), ErrorCode::InvalidArgument);
}

#[test]
fn camera_capture_round_trip() {
    let pair = LinkedPair::with_images(gradient_image(TextureFormat::Nv12, 64, 32));
    let (requests, sink) = recorder();
    let client = pair.isar.client();
    client.init_camera_track(pair.client, d3d11()).unwrap();
    client
        .register_camera_capture_enabled_handler(
            pair.client,
            Arc::new(move |enabled: bool, configuration: &CameraConfiguration, _: &CameraProperties| {
                sink((enabled, configuration.width))
            }),
        )
        .unwrap();
    pair.connect();

    let server = pair.isar.server();
    assert!(server.camera_supported(pair.server).unwrap());
    let configuration = CameraConfiguration { width: 64, height: 32, framerate: 30.0 };
    server.set_camera_capture_enabled(pair.server, true, configuration, CameraProperties::default()).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || *requests.lock() == vec![(true, 64)]));

    let metadata = CameraMetadata { properties: CameraProperties { white_balance: 5600, ..Default::default() }, ..Default::default() };
    assert!(wait_until(CALLBACK_TIMEOUT, || client.push_camera_frame(pair.client, frame(9), metadata).is_ok()));

    let mut pulled = None;
    assert!(wait_until(CALLBACK_TIMEOUT, || {
        pulled = server.pull_camera_capture_frame(pair.server).ok();
        pulled.is_some()
    }));
    let pulled = pulled.unwrap();
    assert_eq!((pulled.width, pulled.height), (64, 32));
    assert_eq!(pulled.metadata.properties.white_balance, 5600);

    let mut rgba = vec![0u8; image_size(TextureFormat::Rgba32, 64, 32)];
    assert_eq!(server.acquire_camera_cpu_image(pair.server, TextureFormat::Rgba32, &mut rgba).unwrap(), rgba.len());
}

#[test]
fn camera_capture_needs_client_camera() {
    let pair = LinkedPair::new();
    pair.connect();
    let server = pair.isar.server();
    assert!(!server.camera_supported(pair.server).unwrap());
    let err = server
        .set_camera_capture_enabled(pair.server, true, CameraConfiguration::default(), CameraProperties::default())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::VideoSource);
}

#[test]
fn cpu_image_follows_the_pulled_frame() {
    let pair = LinkedPair::with_images(gradient_image(TextureFormat::Rgba32, 16, 8));
    pair.isar.server().init_video_track(pair.server, d3d11()).unwrap();
    pair.connect();

    let client = pair.isar.client();
    let mut out = vec![0u8; image_size(TextureFormat::Nv12, 16, 8)];
    assert!(matches!(client.acquire_cpu_image(pair.client, TextureFormat::Nv12, &mut out), Err(IsarError::NoFrame)));

    pair.stream_frame(1);
    assert_eq!(client.acquire_cpu_image(pair.client, TextureFormat::Nv12, &mut out).unwrap(), out.len());
    let err = client.acquire_cpu_image(pair.client, TextureFormat::Rgba32, &mut out[..10]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn passthrough_needs_capable_client() {
    let pair = LinkedPair::new();
    pair.connect();
    assert!(pair.isar.server().try_set_passthrough_mode(pair.server, true).unwrap());
    assert!(pair.isar.server().get_passthrough_mode(pair.server).unwrap());
    assert!(wait_until(CALLBACK_TIMEOUT, || pair.isar.client().get_passthrough_mode(pair.client).unwrap()));

    let pc_client = Config { device_type: DeviceType::Pc, ..client_config() };
    let flat = LinkedPair::with_configs(server_config(), pc_client);
    assert!(!flat.isar.server().try_set_passthrough_mode(flat.server, true).unwrap());
    flat.connect();
    assert!(!flat.isar.server().try_set_passthrough_mode(flat.server, true).unwrap());
}

#[test]
fn bitrate_updates_connection_info() {
    let pair = LinkedPair::new();
    pair.connect();
    let server = pair.isar.server();
    assert_eq!(server.set_bitrate(pair.server, 0).unwrap_err().code(), ErrorCode::InvalidArgument);
    server.set_bitrate(pair.server, 25_000).unwrap();
    assert_eq!(server.get_connection_info(pair.server).unwrap().render_config.encoder_bitrate_kbps, 25_000);
}

#[test]
fn stats_are_delivered_to_handlers() {
    let pair = LinkedPair::new();
    pair.isar.server().init_video_track(pair.server, d3d11()).unwrap();
    let (reports, sink) = recorder();
    let server = pair.isar.server();
    server.register_stats_handler(pair.server, Arc::new(move |report: &StatsReport| sink(report.clone()))).unwrap();
    pair.connect();
    pair.stream_frame(1);

    server.get_stats(pair.server).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || !reports.lock().is_empty()));
    let report = reports.lock()[0].clone();
    let outbound = report.of_type(StatsType::OutboundRtp).next().unwrap();
    assert_eq!(outbound.member("framesSent").and_then(|member| member.as_u64()), Some(1));
    assert!(report.of_type(StatsType::Transport).next().is_some());
    assert!(report.of_type(StatsType::Codec).next().is_some());
}

#[test]
fn data_channels_exchange_messages() {
    let pair = LinkedPair::new();
    let channels = pair.isar.data_channels();
    let server_channel = RecordingChannel::new(true);
    let client_channel = RecordingChannel::new(true);
    let on_server = channels.create(pair.server, ChannelDescription::new("acme.viewer.control"), server_channel.clone()).unwrap();
    let on_client = channels.create(pair.client, ChannelDescription::new("acme.viewer.control"), client_channel.clone()).unwrap();
    pair.connect();

    assert!(wait_until(CALLBACK_TIMEOUT, || server_channel.supported_changes() == vec![true]));
    assert!(wait_until(CALLBACK_TIMEOUT, || client_channel.supported_changes() == vec![true]));
    assert_eq!(client_channel.remote_descriptions()[0].name, "acme.viewer.control");

    let err = channels.open(on_client).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DataChannelUnsupported);
    let err = channels.push_data(on_server, b"early").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotConnected);

    channels.open(on_server).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || server_channel.is_connected() && client_channel.is_connected()));

    channels.push_data(on_server, b"ping").unwrap();
    channels.push_data(on_client, b"pong").unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || client_channel.received() == vec![b"ping".to_vec()]));
    assert!(wait_until(CALLBACK_TIMEOUT, || server_channel.received() == vec![b"pong".to_vec()]));

    let err = channels.push_data(on_server, &vec![0u8; 8193]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DataChannelMessageTooLong);

    channels.close(on_server).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || client_channel.connected_changes() == vec![true, false]));
    assert_eq!(server_channel.connected_changes(), vec![true, false]);
}

#[test]
fn rejected_channel_cannot_open() {
    let pair = LinkedPair::new();
    let channels = pair.isar.data_channels();
    let server_channel = RecordingChannel::new(true);
    let client_channel = RecordingChannel::new(false);
    let on_server = channels.create(pair.server, ChannelDescription::new("acme.viewer.blob"), server_channel.clone()).unwrap();
    channels.create(pair.client, ChannelDescription::new("acme.viewer.blob"), client_channel.clone()).unwrap();
    pair.connect();

    assert!(wait_until(CALLBACK_TIMEOUT, || server_channel.supported_changes() == vec![false]));
    assert_eq!(channels.open(on_server).unwrap_err().code(), ErrorCode::DataChannelOpen);
}

#[test]
fn channel_rules_before_connect() {
    let pair = LinkedPair::new();
    let channels = pair.isar.data_channels();
    let provider = RecordingChannel::new(true);
    channels.create(pair.server, ChannelDescription::new("acme.a"), provider.clone()).unwrap();
    let err = channels.create(pair.server, ChannelDescription::new("acme.a"), provider.clone()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DataChannelAlreadyExists);
    let err = channels.create(pair.server, ChannelDescription::new("has space"), provider.clone()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    pair.open().unwrap();
    let err = channels.create(pair.server, ChannelDescription::new("acme.late"), provider).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DataChannelCreation);
}

#[test]
fn destroyed_connection_invalidates_its_channels() {
    let pair = LinkedPair::new();
    let channels = pair.isar.data_channels();
    let channel = channels.create(pair.client, ChannelDescription::new("acme.c"), RecordingChannel::new(true)).unwrap();
    let mut client = Some(pair.client);
    pair.isar.client().destroy_connection(&mut client).unwrap();

    assert_eq!(channels.push_data(channel, b"x").unwrap_err().code(), ErrorCode::DataChannelInvalidConnection);
    let mut channel = Some(channel);
    channels.destroy(&mut channel).unwrap();
    assert!(channel.is_none());
}

#[test]
fn close_disconnects_both_sides() {
    let pair = LinkedPair::new();
    pair.connect();
    pair.isar.server().close_connection(pair.server).unwrap();

    assert_eq!(pair.server_state(), ConnectionState::Disconnected);
    assert!(wait_until(CALLBACK_TIMEOUT, || pair.client_state() == ConnectionState::Disconnected));
    assert!(wait_until(CALLBACK_TIMEOUT, || pair.server_signaling.events().contains(&SignalingEvent::Stop)));
    assert!(
        pair.server_signaling.events().contains(&SignalingEvent::ConnectionChanged(ConnectionState::Closing)),
        "closing is reported before disconnected"
    );
}

#[test]
fn server_reopens_after_close() {
    let pair = LinkedPair::new();
    pair.connect();
    let server = pair.isar.server();
    server.close_connection(pair.server).unwrap();
    assert!(wait_until(CALLBACK_TIMEOUT, || pair.client_state() == ConnectionState::Disconnected));

    server.open_connection(pair.server).unwrap();
    assert!(pair.wait_for(ConnectionState::Connected, crate::test_utils::CONNECT_TIMEOUT));
    assert_eq!(pair.server_signaling.sdp_count(), 2);
}

#[test]
fn close_of_unopened_connection_is_noop() {
    let pair = LinkedPair::new();
    pair.isar.client().close_connection(pair.client).unwrap();
    assert_eq!(pair.client_state(), ConnectionState::Disconnected);
    assert!(!pair.client_signaling.events().contains(&SignalingEvent::Stop));
}

#[test]
fn transport_failure_fails_both_sides() {
    let pair = LinkedPair::new();
    pair.isar.server().init_video_track(pair.server, d3d11()).unwrap();
    pair.connect();
    pair.hub.fail_all("link lost");
    assert!(pair.wait_for(ConnectionState::Failed, CALLBACK_TIMEOUT));
    let err = pair.isar.server().push_frame(pair.server, frame(1)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotConnected);
}

#[test]
fn remote_sdp_of_wrong_kind_is_rejected() {
    let pair = LinkedPair::new();
    pair.connect();
    let offer = pair
        .server_signaling
        .events()
        .into_iter()
        .find_map(|event| match event {
            SignalingEvent::Sdp(sdp) => Some(sdp),
            _ => None,
        })
        .unwrap();
    let err = pair.isar.signaling().set_remote_sdp(pair.server_registration, &offer).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SdpParse);
    let err = pair.isar.signaling().set_remote_sdp(pair.client_registration, "{ not json").unwrap_err();
    assert_eq!(err.code(), ErrorCode::SdpParse);
}

#[test]
fn handles_of_other_role_are_rejected() {
    let pair = LinkedPair::new();
    let err = pair.isar.client().open_connection(pair.server).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidHandle);
    let mut server = Some(pair.server);
    assert!(pair.isar.client().destroy_connection(&mut server).is_err());
    assert_eq!(server, Some(pair.server));
}

#[tokio::test]
async fn state_updates_stream_reaches_connected() {
    let pair = LinkedPair::new();
    let mut updates = pair.isar.server().state_updates(pair.server).unwrap();
    assert_eq!(updates.next().await, Some(ConnectionState::Disconnected));

    pair.connect();
    let reached = tokio::time::timeout(CALLBACK_TIMEOUT, async {
        while let Some(state) = updates.next().await {
            if state == ConnectionState::Connected {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(reached, Ok(true));
}
