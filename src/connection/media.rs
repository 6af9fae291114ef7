//! Receive side buffers of a connection.
//!
//! Frames and poses are latest-wins: a newer arrival replaces whatever the
//! host has not pulled yet. Spatial input is a bounded FIFO since every
//! press and release matters.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::warn;

use crate::prediction::PosePredictor;
use crate::transport::MediaFrame;
use crate::{CameraMetadata, IsarError, Result, SpatialInput, XrPose};

/// Pending spatial input events kept before the oldest is dropped.
pub const SPATIAL_INPUT_CAPACITY: usize = 4096;

/// A single latest-wins slot.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    value: Mutex<Option<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self { value: Mutex::new(None) }
    }
}

impl<T> Slot<T> {
    /// Stores `value`; returns true if an unpulled value was replaced.
    pub(crate) fn put(&self, value: T) -> bool {
        self.value.lock().replace(value).is_some()
    }

    pub(crate) fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    pub(crate) fn clear(&self) {
        self.value.lock().take();
    }
}

impl<T: Clone> Slot<T> {
    pub(crate) fn peek(&self) -> Option<T> {
        self.value.lock().clone()
    }
}

/// Bounded FIFO of spatial input events.
#[derive(Debug, Default)]
pub(crate) struct InputQueue {
    events: Mutex<VecDeque<SpatialInput>>,
}

impl InputQueue {
    /// Appends `input`; returns true if the oldest event had to be dropped.
    pub(crate) fn push(&self, input: SpatialInput) -> bool {
        let mut events = self.events.lock();
        let dropped = events.len() == SPATIAL_INPUT_CAPACITY;
        if dropped {
            events.pop_front();
            warn!(capacity = SPATIAL_INPUT_CAPACITY, "Spatial input queue full, dropping oldest event");
        }
        events.push_back(input);
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Removes up to `capacity` events, oldest first.
    pub(crate) fn drain(&self, capacity: usize) -> Result<Vec<SpatialInput>> {
        if capacity == 0 {
            return Err(IsarError::invalid_argument("capacity", "zero capacity"));
        }
        let mut events = self.events.lock();
        if events.is_empty() {
            return Err(IsarError::NoInput);
        }
        let count = capacity.min(events.len());
        Ok(events.drain(..count).collect())
    }

    pub(crate) fn clear(&self) {
        self.events.lock().clear();
    }
}

/// A camera frame as received by the server.
#[derive(Debug, Clone)]
pub(crate) struct CameraArrival {
    pub frame: MediaFrame,
    pub metadata: CameraMetadata,
}

/// Everything the remote side pushed that waits for the host to pull it.
#[derive(Debug, Default)]
pub(crate) struct Media {
    /// Client: decoded video frames.
    pub frames: Slot<MediaFrame>,
    /// Client: the frame returned by the last pull, for CPU image access.
    pub pulled_frame: Slot<MediaFrame>,
    /// Server: camera frames from the client.
    pub camera_frames: Slot<CameraArrival>,
    pub pulled_camera_frame: Slot<MediaFrame>,
    /// Server: latest client view pose.
    pub view_pose: Slot<XrPose>,
    pub inputs: InputQueue,
    pub predictor: Mutex<PosePredictor>,
}

impl Media {
    /// Server side pose pull, applying prediction when enabled.
    pub(crate) fn pull_view_pose(&self, prediction_allowed: bool) -> Result<XrPose> {
        let pose = self.view_pose.take().ok_or(IsarError::NoInput)?;
        let mut predictor = self.predictor.lock();
        predictor.on_pull(&pose, Instant::now());
        Ok(if prediction_allowed { predictor.predict(pose) } else { pose })
    }

    pub(crate) fn clear(&self) {
        self.frames.clear();
        self.pulled_frame.clear();
        self.camera_frames.clear();
        self.pulled_camera_frame.clear();
        self.view_pose.clear();
        self.inputs.clear();
    }
}
