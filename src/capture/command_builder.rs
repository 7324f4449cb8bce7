//! Builds the ffmpeg command line for one stream.
//!
//! Validation happens here, before anything is spawned, so a stream with a
//! broken definition fails fast instead of entering the retry loop.

use std::path::{Path, PathBuf};

use crate::error_handling::types::ConfigError;
use crate::storage::types::StreamConfig;

/// Segment files are named `chunk_<UTC timestamp>.<ext>`.
pub const SEGMENT_FILE_PREFIX: &str = "chunk_";

/// strftime pattern embedded in the segment filename, second resolution.
pub const SEGMENT_TIMESTAMP_PATTERN: &str = "%Y%m%d%H%M%S";

/// Output formats the engine knows how to encode and later recognize on disk.
pub const SUPPORTED_FORMATS: &[&str] = &["mp3", "wav"];

const ENCODER_PROGRAM: &str = "ffmpeg";

/// A fully-resolved encoder command, ready to spawn.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Directory the encoder writes segments into; created before spawning.
    pub output_dir: PathBuf,
    /// Carried along so process log lines can name the stream.
    pub stream_name: String,
}

/// Resolves a stream definition into an ffmpeg invocation.
pub fn build_invocation(
    stream: &StreamConfig,
    recordings_root: &Path,
) -> Result<EncoderInvocation, ConfigError> {
    if stream.url.trim().is_empty() {
        return Err(ConfigError::MissingUrl(stream.name.clone()));
    }
    let codec = match stream.format.as_str() {
        "mp3" => "libmp3lame",
        "wav" => "pcm_s16le",
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };
    if stream.segment_time == 0 {
        return Err(ConfigError::BadSegmentTime(stream.segment_time));
    }
    if !(stream.channels == 1 || stream.channels == 2) {
        return Err(ConfigError::BadChannelCount(stream.channels));
    }
    if let Some(bitrate) = &stream.bitrate {
        validate_bitrate(bitrate)?;
    }

    let output_dir = recordings_root.join(&stream.name);
    let output_pattern = output_dir.join(format!(
        "{}{}.{}",
        SEGMENT_FILE_PREFIX, SEGMENT_TIMESTAMP_PATTERN, stream.format
    ));

    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-i".to_string(),
        stream.url.clone(),
        "-vn".to_string(),
        "-acodec".to_string(),
        codec.to_string(),
        "-ac".to_string(),
        stream.channels.to_string(),
    ];
    if let Some(bitrate) = &stream.bitrate {
        args.push("-b:a".to_string());
        args.push(bitrate.clone());
    }
    args.extend([
        "-f".to_string(),
        "segment".to_string(),
        "-segment_time".to_string(),
        stream.segment_time.to_string(),
        "-strftime".to_string(),
        "1".to_string(),
        "-reset_timestamps".to_string(),
        "1".to_string(),
        output_pattern.to_string_lossy().to_string(),
    ]);

    Ok(EncoderInvocation {
        program: ENCODER_PROGRAM.to_string(),
        args,
        output_dir,
        stream_name: stream.name.clone(),
    })
}

// Accepts ffmpeg's "<digits>k" notation only, e.g. "128k".
fn validate_bitrate(bitrate: &str) -> Result<(), ConfigError> {
    let digits = match bitrate.strip_suffix('k') {
        Some(d) if !d.is_empty() => d,
        _ => return Err(ConfigError::BadBitrate(bitrate.to_string())),
    };
    if digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ConfigError::BadBitrate(bitrate.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(format: &str) -> StreamConfig {
        StreamConfig {
            id: 7,
            name: "kexp".to_string(),
            url: "https://kexp.example/stream".to_string(),
            enabled: true,
            format: format.to_string(),
            segment_time: 3600,
            channels: 2,
            bitrate: None,
            retention_days: None,
            retry_delay_secs: None,
            current_status: "stopped".to_string(),
            last_up: None,
            last_error: None,
        }
    }

    #[test]
    fn test_mp3_invocation_argv() {
        let mut config = stream("mp3");
        config.bitrate = Some("128k".to_string());
        let invocation = build_invocation(&config, Path::new("/data/recordings")).unwrap();
        assert_eq!(invocation.program, "ffmpeg");
        assert_eq!(invocation.output_dir, Path::new("/data/recordings/kexp"));
        assert_eq!(invocation.stream_name, "kexp");
        assert_eq!(
            invocation.args,
            vec![
                "-hide_banner",
                "-loglevel",
                "error",
                "-nostats",
                "-i",
                "https://kexp.example/stream",
                "-vn",
                "-acodec",
                "libmp3lame",
                "-ac",
                "2",
                "-b:a",
                "128k",
                "-f",
                "segment",
                "-segment_time",
                "3600",
                "-strftime",
                "1",
                "-reset_timestamps",
                "1",
                "/data/recordings/kexp/chunk_%Y%m%d%H%M%S.mp3",
            ]
        );
    }

    #[test]
    fn test_wav_invocation_uses_pcm_without_bitrate() {
        let mut config = stream("wav");
        config.channels = 1;
        let invocation = build_invocation(&config, Path::new("/data/recordings")).unwrap();
        assert!(invocation.args.contains(&"pcm_s16le".to_string()));
        assert!(!invocation.args.contains(&"-b:a".to_string()));
        assert!(invocation
            .args
            .last()
            .unwrap()
            .ends_with("chunk_%Y%m%d%H%M%S.wav"));
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let config = stream("flac");
        assert!(matches!(
            build_invocation(&config, Path::new("/tmp")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_zero_segment_time_rejected() {
        let mut config = stream("mp3");
        config.segment_time = 0;
        assert!(matches!(
            build_invocation(&config, Path::new("/tmp")),
            Err(ConfigError::BadSegmentTime(0))
        ));
    }

    #[test]
    fn test_channel_count_limited_to_mono_or_stereo() {
        let mut config = stream("mp3");
        config.channels = 6;
        assert!(matches!(
            build_invocation(&config, Path::new("/tmp")),
            Err(ConfigError::BadChannelCount(6))
        ));
    }

    #[test]
    fn test_bitrate_must_be_digits_with_k_suffix() {
        for bad in ["128", "k", "12m", "12.5k", ""] {
            let mut config = stream("mp3");
            config.bitrate = Some(bad.to_string());
            assert!(
                matches!(
                    build_invocation(&config, Path::new("/tmp")),
                    Err(ConfigError::BadBitrate(_))
                ),
                "bitrate {:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_empty_url_rejected() {
        let mut config = stream("mp3");
        config.url = "  ".to_string();
        assert!(matches!(
            build_invocation(&config, Path::new("/tmp")),
            Err(ConfigError::MissingUrl(_))
        ));
    }
}
