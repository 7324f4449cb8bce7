use serde::Deserialize;

fn default_true() -> bool {
    true
}

/// Stream definition as written in the `[[streams]]` blocks of the config
/// file. Seeds are upserted into the database at startup, keyed by name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamSeed {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub format: String,
    pub segment_time: u32,
    pub channels: u8,
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default)]
    pub retention_days: Option<i64>,
    #[serde(default)]
    pub retry_delay_secs: Option<u64>,
}
