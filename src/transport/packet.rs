//! Messages a transport carries between the two peers.

use std::sync::Arc;

use crate::image::CpuImage;
use crate::{
    AudioData, CameraConfiguration, CameraMetadata, CameraProperties, GraphicsApiFrame, Haptic,
    SpatialInput, TrackKind, XrPose,
};

/// A frame as it leaves the encoder or arrives from the decoder.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub frame: GraphicsApiFrame,
    pub width: u32,
    pub height: u32,
    /// Decoded system memory copy, when the decoder produced one.
    pub image: Option<Arc<CpuImage>>,
}

#[derive(Debug, Clone)]
pub enum Packet {
    VideoFrame(MediaFrame),
    CameraFrame { frame: MediaFrame, metadata: CameraMetadata },
    ViewPose(XrPose),
    SpatialInput(SpatialInput),
    Haptic(Haptic<'static>),
    /// Server audio track.
    Audio(AudioData<'static>),
    /// Client microphone.
    Microphone(AudioData<'static>),
    TrackEnabled { track: TrackKind, enabled: bool },
    CameraCapture { enabled: bool, configuration: CameraConfiguration, properties: CameraProperties },
    Passthrough(bool),
    ChannelOpen { name: String },
    ChannelOpenAck { name: String },
    ChannelClose { name: String },
    ChannelData { name: String, payload: Vec<u8> },
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::VideoFrame(_) => "video-frame",
            Packet::CameraFrame { .. } => "camera-frame",
            Packet::ViewPose(_) => "view-pose",
            Packet::SpatialInput(_) => "spatial-input",
            Packet::Haptic(_) => "haptic",
            Packet::Audio(_) => "audio",
            Packet::Microphone(_) => "microphone",
            Packet::TrackEnabled { .. } => "track-enabled",
            Packet::CameraCapture { .. } => "camera-capture",
            Packet::Passthrough(_) => "passthrough",
            Packet::ChannelOpen { .. } => "channel-open",
            Packet::ChannelOpenAck { .. } => "channel-open-ack",
            Packet::ChannelClose { .. } => "channel-close",
            Packet::ChannelData { .. } => "channel-data",
        }
    }

    /// Approximate payload size for byte counters.
    pub fn payload_len(&self) -> usize {
        match self {
            Packet::VideoFrame(frame) | Packet::CameraFrame { frame, .. } => {
                frame.image.as_ref().map_or(0, |image| image.data().len())
            }
            Packet::ViewPose(_) => std::mem::size_of::<XrPose>(),
            Packet::SpatialInput(input) => {
                let source = input.source();
                std::mem::size_of_val(source)
                    + source.buttons.len() * std::mem::size_of::<crate::Button>()
                    + source.axis_1d.len() * std::mem::size_of::<crate::Axis1D>()
                    + source.axis_2d.len() * std::mem::size_of::<crate::Axis2D>()
            }
            Packet::Audio(audio) | Packet::Microphone(audio) => audio.data.len(),
            Packet::ChannelData { payload, .. } => payload.len(),
            _ => 0,
        }
    }
}
