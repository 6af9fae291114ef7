//! Haptic commands sent from the server to a client controller.

use std::borrow::Cow;

use super::Handedness;
use crate::{IsarError, Result};

abi_enum! {
    pub enum HapticType: u32 {
        Stop = 0,
        Vibration = 1,
        PcmVibration = 2,
        AmplitudeEnvelopeVibration = 3,
    }
}

abi_enum! {
    /// Actuator on the controller.
    pub enum HapticChannel: u32 {
        Body = 0,
        Trigger = 1,
        ThumbRest = 2,
    }
}

/// Which actuator a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HapticTarget {
    pub controller_identifier: u32,
    pub handedness: Handedness,
    pub channel: HapticChannel,
}

/// A haptic command.
///
/// PCM and envelope buffers are borrowed for the duration of the push;
/// [`Haptic::into_owned`] detaches a command for delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Haptic<'a> {
    Stop(HapticTarget),
    Vibration {
        target: HapticTarget,
        /// Nanoseconds.
        duration: i64,
        frequency: f32,
        amplitude: f32,
    },
    PcmVibration {
        target: HapticTarget,
        buffer: Cow<'a, [u8]>,
        sample_rate: f32,
        append: bool,
    },
    AmplitudeEnvelopeVibration {
        target: HapticTarget,
        /// Nanoseconds.
        duration: i64,
        amplitudes: Cow<'a, [f32]>,
    },
}

impl Haptic<'_> {
    pub fn kind(&self) -> HapticType {
        match self {
            Haptic::Stop(_) => HapticType::Stop,
            Haptic::Vibration { .. } => HapticType::Vibration,
            Haptic::PcmVibration { .. } => HapticType::PcmVibration,
            Haptic::AmplitudeEnvelopeVibration { .. } => HapticType::AmplitudeEnvelopeVibration,
        }
    }

    pub fn target(&self) -> &HapticTarget {
        match self {
            Haptic::Stop(target)
            | Haptic::Vibration { target, .. }
            | Haptic::PcmVibration { target, .. }
            | Haptic::AmplitudeEnvelopeVibration { target, .. } => target,
        }
    }

    pub fn into_owned(self) -> Haptic<'static> {
        match self {
            Haptic::Stop(target) => Haptic::Stop(target),
            Haptic::Vibration { target, duration, frequency, amplitude } => {
                Haptic::Vibration { target, duration, frequency, amplitude }
            }
            Haptic::PcmVibration { target, buffer, sample_rate, append } => Haptic::PcmVibration {
                target,
                buffer: Cow::Owned(buffer.into_owned()),
                sample_rate,
                append,
            },
            Haptic::AmplitudeEnvelopeVibration { target, duration, amplitudes } => {
                Haptic::AmplitudeEnvelopeVibration {
                    target,
                    duration,
                    amplitudes: Cow::Owned(amplitudes.into_owned()),
                }
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let amplitude_ok = |value: f32| (0.0..=1.0).contains(&value);
        match self {
            Haptic::Stop(_) => Ok(()),
            Haptic::Vibration { duration, frequency, amplitude, .. } => {
                if *duration < 0 {
                    return Err(IsarError::invalid_argument("duration", "negative duration"));
                }
                if !(frequency.is_finite() && *frequency >= 0.0) {
                    return Err(IsarError::invalid_argument("frequency", format!("{frequency}")));
                }
                if !amplitude_ok(*amplitude) {
                    return Err(IsarError::invalid_argument("amplitude", format!("{amplitude} outside [0, 1]")));
                }
                Ok(())
            }
            Haptic::PcmVibration { buffer, sample_rate, .. } => {
                if buffer.is_empty() {
                    return Err(IsarError::invalid_argument("buffer", "empty PCM buffer"));
                }
                if !(sample_rate.is_finite() && *sample_rate > 0.0) {
                    return Err(IsarError::invalid_argument("sample_rate", format!("{sample_rate}")));
                }
                Ok(())
            }
            Haptic::AmplitudeEnvelopeVibration { duration, amplitudes, .. } => {
                if *duration < 0 {
                    return Err(IsarError::invalid_argument("duration", "negative duration"));
                }
                if amplitudes.is_empty() {
                    return Err(IsarError::invalid_argument("amplitudes", "empty envelope"));
                }
                if let Some(bad) = amplitudes.iter().find(|value| !amplitude_ok(**value)) {
                    return Err(IsarError::invalid_argument("amplitudes", format!("{bad} outside [0, 1]")));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: HapticTarget =
        HapticTarget { controller_identifier: 6, handedness: Handedness::Right, channel: HapticChannel::Trigger };

    #[test]
    fn owned_copy_detaches_from_caller_buffer() {
        let samples = vec![1u8, 2, 3];
        let owned = {
            let borrowed = Haptic::PcmVibration {
                target: TARGET,
                buffer: Cow::Borrowed(&samples),
                sample_rate: 2000.0,
                append: false,
            };
            borrowed.into_owned()
        };
        drop(samples);
        assert!(matches!(owned, Haptic::PcmVibration { ref buffer, .. } if buffer[..] == [1, 2, 3]));
        assert_eq!(owned.kind(), HapticType::PcmVibration);
    }

    #[test]
    fn validation_bounds() {
        let vibration = |amplitude| Haptic::Vibration { target: TARGET, duration: 1_000_000, frequency: 160.0, amplitude };
        assert!(vibration(1.0).validate().is_ok());
        assert!(vibration(1.01).validate().is_err());
        let envelope = Haptic::AmplitudeEnvelopeVibration { target: TARGET, duration: 5, amplitudes: Cow::Borrowed(&[]) };
        assert!(envelope.validate().is_err());
        assert!(Haptic::Stop(TARGET).validate().is_ok());
    }
}
