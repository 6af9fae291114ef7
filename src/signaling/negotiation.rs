//! Codec, render config and version agreement between the two peers.

use tracing::debug;

use crate::config::RenderConfig;
use crate::{CodecType, ConfigIssue, IsarError, Result, Version};

/// Picks the codec for the session.
///
/// The offerer's preference wins if the answerer supports it, then the
/// answerer's preference if the offerer supports it, then the first codec of
/// the offerer's list both support. `Auto` expresses no preference.
pub fn negotiate_codec(
    offered: &[CodecType],
    offer_preference: CodecType,
    supported: &[CodecType],
    local_preference: CodecType,
) -> Result<CodecType> {
    let common = |codec: CodecType| offered.contains(&codec) && supported.contains(&codec);

    let chosen = [offer_preference, local_preference]
        .into_iter()
        .filter(|codec| *codec != CodecType::Auto)
        .find(|codec| common(*codec))
        .or_else(|| offered.iter().copied().find(|codec| *codec != CodecType::Auto && common(*codec)));

    match chosen {
        Some(codec) => {
            debug!(%codec, %offer_preference, %local_preference, "Codec negotiated");
            Ok(codec)
        }
        None => Err(IsarError::config(
            ConfigIssue::Decoder,
            format!("no common codec between {offered:?} and {supported:?}"),
        )),
    }
}

/// Merges the server's and the client's render configs.
///
/// The client's display decides dimensions, view count and framerate. A
/// positive server bitrate overrides the client's. Depth and pose prediction
/// need both sides.
pub fn negotiate_render(server: &RenderConfig, client: &RenderConfig) -> RenderConfig {
    RenderConfig {
        width: client.width,
        height: client.height,
        num_views: client.num_views,
        encoder_bitrate_kbps: if server.encoder_bitrate_kbps > 0 {
            server.encoder_bitrate_kbps
        } else {
            client.encoder_bitrate_kbps
        },
        framerate: client.framerate,
        depth_enabled: server.depth_enabled && client.depth_enabled,
        pose_prediction_enabled: server.pose_prediction_enabled && client.pose_prediction_enabled,
    }
}

pub fn check_version(local: Version, remote: Version) -> Result<()> {
    if local.is_compatible_with(remote) {
        Ok(())
    } else {
        Err(IsarError::UnsupportedVersion { expected: local.to_string(), found: remote.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CodecType::*;

    #[test]
    fn offerer_preference_wins_when_supported() {
        assert_eq!(negotiate_codec(&[H265, H264, Vp9], Vp9, &[H264, Vp9], H264).unwrap(), Vp9);
    }

    #[test]
    fn answerer_preference_is_second() {
        assert_eq!(negotiate_codec(&[H265, H264], Av1, &[H264, H265], H264).unwrap(), H264);
    }

    #[test]
    fn auto_falls_back_to_offer_order() {
        assert_eq!(negotiate_codec(&[H265, H264], Auto, &[H264, H265], Auto).unwrap(), H265);
    }

    #[test]
    fn no_common_codec_is_a_decoder_error() {
        let err = negotiate_codec(&[H265], Auto, &[Vp8], Vp8).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::ConfigUnsupportedOrMissingDecoder);
    }

    #[test]
    fn render_config_merges_by_owner() {
        let server = RenderConfig {
            width: 1920,
            height: 1080,
            encoder_bitrate_kbps: 40_000,
            depth_enabled: true,
            pose_prediction_enabled: false,
            ..Default::default()
        };
        let client = RenderConfig { width: 2064, height: 2208, framerate: 72, depth_enabled: true, ..Default::default() };
        let merged = negotiate_render(&server, &client);
        assert_eq!((merged.width, merged.height, merged.framerate), (2064, 2208, 72));
        assert_eq!(merged.encoder_bitrate_kbps, 40_000);
        assert!(merged.depth_enabled);
        assert!(!merged.pose_prediction_enabled);

        let client_decides = negotiate_render(&RenderConfig::default(), &RenderConfig { encoder_bitrate_kbps: 8000, ..client });
        assert_eq!(client_decides.encoder_bitrate_kbps, 8000);
    }

    #[test]
    fn major_version_must_match() {
        assert!(check_version(Version::LATEST, Version::new(2025, 4, 2)).is_ok());
        let err = check_version(Version::LATEST, Version::new(2024, 0, 0)).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::UnsupportedVersion);
    }
}
