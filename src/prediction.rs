//! Server-side view pose prediction.
//!
//! The server renders with a pose that is already stale by the time the
//! frame reaches the headset. When enabled, [`PosePredictor`] extrapolates
//! the latest client pose forward by the measured render latency, scaled by
//! `prediction_tuner` and capped at `prediction_cap_ms`.
//!
//! Latency is measured by matching the `frame_timestamp` of a pulled pose
//! against the frame pushed with the same timestamp. Timestamps themselves are
//! never modified, so the client can still pair frames with its own samples.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::{IsarError, Pose, Quaternion, Result, XrPose};

/// Outstanding pose pulls remembered for latency matching.
const MAX_PENDING_PULLS: usize = 128;

/// Weight of a new latency sample in the running average.
const LATENCY_SMOOTHING: f64 = 0.1;

/// Prediction tuning (`IsarPosePredictionConfig`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PosePredictionConfig {
    pub enabled: bool,
    /// Scales the horizon: above 1 predicts further ahead, below 1 slows down.
    pub prediction_tuner: f32,
    /// Upper bound of the horizon in milliseconds.
    pub prediction_cap_ms: u16,
}

impl Default for PosePredictionConfig {
    fn default() -> Self {
        Self { enabled: false, prediction_tuner: 1.0, prediction_cap_ms: 100 }
    }
}

impl PosePredictionConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.prediction_tuner.is_finite() || self.prediction_tuner < 0.0 {
            return Err(IsarError::invalid_argument("prediction_tuner", self.prediction_tuner.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct PosePredictor {
    config: PosePredictionConfig,
    previous: Option<XrPose>,
    latest: Option<XrPose>,
    pulls: VecDeque<(i64, Instant)>,
    render_latency: Option<Duration>,
}

impl PosePredictor {
    pub(crate) fn configure(&mut self, config: PosePredictionConfig) {
        self.config = config;
    }

    pub(crate) fn config(&self) -> PosePredictionConfig {
        self.config
    }

    /// Records a freshly received client pose. Out-of-order samples are
    /// ignored for velocity estimation.
    pub(crate) fn observe(&mut self, pose: XrPose) {
        if let Some(latest) = self.latest {
            if pose.pose_timestamp <= latest.pose_timestamp {
                return;
            }
        }
        self.previous = self.latest.replace(pose);
    }

    pub(crate) fn on_pull(&mut self, pose: &XrPose, now: Instant) {
        if self.pulls.len() == MAX_PENDING_PULLS {
            self.pulls.pop_front();
        }
        self.pulls.push_back((pose.frame_timestamp, now));
    }

    pub(crate) fn on_frame_pushed(&mut self, frame_timestamp: i64, now: Instant) {
        let Some(position) = self.pulls.iter().position(|(ts, _)| *ts == frame_timestamp) else {
            return;
        };
        let (_, pulled_at) = self.pulls[position];
        self.pulls.drain(..=position);
        let sample = now.saturating_duration_since(pulled_at);
        self.render_latency = Some(match self.render_latency {
            None => sample,
            Some(current) => current.mul_f64(1.0 - LATENCY_SMOOTHING) + sample.mul_f64(LATENCY_SMOOTHING),
        });
    }

    pub(crate) fn render_latency(&self) -> Option<Duration> {
        self.render_latency
    }

    /// How far ahead the next prediction reaches.
    pub(crate) fn horizon(&self) -> Duration {
        let Some(latency) = self.render_latency else {
            return Duration::ZERO;
        };
        let cap = Duration::from_millis(self.config.prediction_cap_ms as u64);
        let scaled = (latency.as_nanos() as f64 * self.config.prediction_tuner as f64).round();
        Duration::from_nanos(scaled as u64).min(cap)
    }

    /// The pose to render with. Returns `pose` unchanged when prediction is
    /// off or there is no motion history.
    pub(crate) fn predict(&self, pose: XrPose) -> XrPose {
        if !self.config.enabled {
            return pose;
        }
        let (Some(previous), Some(latest)) = (self.previous, self.latest) else {
            return pose;
        };
        let Some(elapsed_us) = latest.pose_timestamp.checked_sub(previous.pose_timestamp) else {
            return pose;
        };
        let horizon_us = self.horizon().as_micros() as f32;
        if elapsed_us <= 0 || horizon_us == 0.0 {
            return pose;
        }
        let factor = horizon_us / elapsed_us as f32;
        trace!(horizon_us, factor, "Predicting view pose");

        XrPose {
            pose_left: extrapolate(previous.pose_left, pose.pose_left, factor),
            pose_right: extrapolate(previous.pose_right, pose.pose_right, factor),
            ..pose
        }
    }
}

fn extrapolate(previous: Pose, latest: Pose, factor: f32) -> Pose {
    let velocity = latest.position - previous.position;
    let delta = latest.orientation * previous.orientation.conjugate();
    let (axis, angle) = delta.to_axis_angle();
    let step = Quaternion::from_axis_angle(axis, angle * factor);
    Pose {
        position: latest.position + velocity.scale(factor),
        orientation: (step * latest.orientation).normalize(),
    }
}
