//! Interleaved PCM audio blocks.

use std::borrow::Cow;

use crate::{IsarError, Result};

/// A block of interleaved PCM samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData<'a> {
    pub data: Cow<'a, [u8]>,
    pub bits_per_sample: u32,
    pub sample_rate: u32,
    pub number_of_channels: u32,
    pub samples_per_channel: u32,
}

impl AudioData<'_> {
    /// Bytes the sample layout implies.
    pub fn expected_len(&self) -> usize {
        (self.bits_per_sample as usize / 8)
            * self.number_of_channels as usize
            * self.samples_per_channel as usize
    }

    pub fn into_owned(self) -> AudioData<'static> {
        AudioData {
            data: Cow::Owned(self.data.into_owned()),
            bits_per_sample: self.bits_per_sample,
            sample_rate: self.sample_rate,
            number_of_channels: self.number_of_channels,
            samples_per_channel: self.samples_per_channel,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !matches!(self.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(IsarError::invalid_argument("bits_per_sample", self.bits_per_sample.to_string()));
        }
        if self.sample_rate == 0 || self.number_of_channels == 0 {
            return Err(IsarError::invalid_argument("audio", "zero sample rate or channel count"));
        }
        if self.data.len() != self.expected_len() {
            return Err(IsarError::invalid_argument(
                "data",
                format!("{} bytes for a layout of {}", self.data.len(), self.expected_len()),
            ));
        }
        Ok(())
    }
}
