use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::types::StreamSeed;
use crate::error_handling::types::ConfigError;

fn default_scan_interval() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_liveness_poll() -> u64 {
    5
}

fn default_max_failures() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    5
}

fn default_retention_days() -> i64 {
    3
}

fn default_stable_run() -> u64 {
    60
}

fn default_terminate_grace() -> u64 {
    10
}

fn default_min_quiet_period() -> u64 {
    10
}

/// Application configuration loaded from a TOML file.
///
/// # Fields Overview
///
/// - `recordings_root`: directory under which each stream gets its own
///   output subdirectory
/// - `database_path`: SQLite file location; defaults to
///   `aircheck.sqlite3` in the working directory when absent
/// - `scan_interval_secs`: segment watcher poll cadence
/// - `sweep_interval_secs`: retention sweeper cadence
/// - `liveness_poll_secs`: encoder liveness check cadence
/// - `max_consecutive_failures`: restart attempts before a stream is forced
///   to stopped and a persistent failure is surfaced
/// - `default_retry_delay_secs`: fixed restart backoff for streams without
///   their own `retry_delay_secs`
/// - `default_retention_days`: retention window for streams without their
///   own `retention_days`
/// - `stable_run_secs`: how long an encoder must stay up before its
///   consecutive-failure count resets
/// - `terminate_grace_secs`: how long a stopping encoder may flush before
///   it is killed
/// - `min_quiet_period_secs`: how long a segment file must be unmodified
///   before it counts as finalized
/// - `streams`: stream seeds upserted into the database at startup
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub recordings_root: PathBuf,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_liveness_poll")]
    pub liveness_poll_secs: u64,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_retry_delay")]
    pub default_retry_delay_secs: u64,
    #[serde(default = "default_retention_days")]
    pub default_retention_days: i64,
    #[serde(default = "default_stable_run")]
    pub stable_run_secs: u64,
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_secs: u64,
    #[serde(default = "default_min_quiet_period")]
    pub min_quiet_period_secs: u64,
    #[serde(default)]
    pub streams: Vec<StreamSeed>,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.recordings_root.as_os_str().is_empty() {
            return Err(ConfigError::NotInRange(
                "recordings_root must not be empty".to_string(),
            ));
        }
        for (field, value) in [
            ("scan_interval_secs", self.scan_interval_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("liveness_poll_secs", self.liveness_poll_secs),
            ("default_retry_delay_secs", self.default_retry_delay_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::NotInRange(format!(
                    "{} must be greater than zero",
                    field
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config("recordings_root = \"/data/recordings\"\n");
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.recordings_root, PathBuf::from("/data/recordings"));
        assert!(config.database_path.is_none());
        assert_eq!(config.scan_interval_secs, 60);
        assert_eq!(config.sweep_interval_secs, 3600);
        assert_eq!(config.liveness_poll_secs, 5);
        assert_eq!(config.max_consecutive_failures, 5);
        assert_eq!(config.default_retry_delay_secs, 5);
        assert_eq!(config.default_retention_days, 3);
        assert_eq!(config.min_quiet_period_secs, 10);
        assert!(config.streams.is_empty());
    }

    #[test]
    fn test_full_config_with_stream_seeds() {
        let file = write_config(
            r#"
recordings_root = "/data/recordings"
database_path = "/data/aircheck.sqlite3"
scan_interval_secs = 30
sweep_interval_secs = 1800
default_retention_days = 7

[[streams]]
name = "kexp"
url = "https://kexp.example/stream"
format = "mp3"
segment_time = 3600
channels = 2
bitrate = "128k"
retention_days = 30
retry_delay_secs = 10

[[streams]]
name = "scanner"
url = "https://scanner.example/feed"
enabled = false
format = "wav"
segment_time = 60
channels = 1
"#,
        );
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.scan_interval_secs, 30);
        assert_eq!(config.default_retention_days, 7);
        assert_eq!(config.streams.len(), 2);

        let kexp = &config.streams[0];
        assert_eq!(kexp.name, "kexp");
        assert!(kexp.enabled);
        assert_eq!(kexp.bitrate.as_deref(), Some("128k"));
        assert_eq!(kexp.retention_days, Some(30));
        assert_eq!(kexp.retry_delay_secs, Some(10));

        let scanner = &config.streams[1];
        assert!(!scanner.enabled);
        assert_eq!(scanner.format, "wav");
        assert!(scanner.bitrate.is_none());
        assert!(scanner.retention_days.is_none());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let file = write_config(
            "recordings_root = \"/data/recordings\"\nscan_interval_secs = 0\n",
        );
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::NotInRange(_))
        ));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let file = write_config("recordings_root = [broken\n");
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/aircheck.toml")),
            Err(ConfigError::IoError(_))
        ));
    }
}
