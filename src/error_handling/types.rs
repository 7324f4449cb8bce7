use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    MissingUrl(String),
    UnsupportedFormat(String),
    BadSegmentTime(u32),
    BadChannelCount(u8),
    BadBitrate(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::MissingUrl(e) => write!(f, "Missing source URL: {}", e),
            ConfigError::UnsupportedFormat(e) => write!(f, "Unsupported format: {}", e),
            ConfigError::BadSegmentTime(v) => {
                write!(f, "Segment time must be greater than zero, got {}", v)
            }
            ConfigError::BadChannelCount(v) => {
                write!(f, "Channel count must be 1 or 2, got {}", v)
            }
            ConfigError::BadBitrate(e) => write!(f, "Bitrate error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ProcessError {
    SpawnFailed(String),
    Crashed(String),
    TerminateFailed(String),
    IoError(std::io::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::SpawnFailed(e) => write!(f, "Encoder spawn failed: {}", e),
            ProcessError::Crashed(e) => write!(f, "Encoder process crashed: {}", e),
            ProcessError::TerminateFailed(e) => write!(f, "Encoder termination failed: {}", e),
            ProcessError::IoError(e) => write!(f, "Encoder IO error: {}", e),
        }
    }
}

impl std::error::Error for ProcessError {}

impl From<std::io::Error> for ProcessError {
    fn from(err: std::io::Error) -> Self {
        ProcessError::IoError(err)
    }
}

#[derive(Debug)]
pub enum WatchError {
    IoError(std::io::Error),
    InvalidSegment(String),
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::IoError(e) => write!(f, "Watcher IO error: {}", e),
            WatchError::InvalidSegment(e) => write!(f, "Invalid segment file: {}", e),
        }
    }
}

impl std::error::Error for WatchError {}

impl From<std::io::Error> for WatchError {
    fn from(err: std::io::Error) -> Self {
        WatchError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
    Duplicate,
    NotFound,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
            StorageError::Duplicate => write!(f, "Entry already exists"),
            StorageError::NotFound => write!(f, "Entry not found"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    Process(ProcessError),
    Watch(WatchError),
    Storage(StorageError),
    StreamNotFound(i64),
    InitializationFailed(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "Configuration error: {}", e),
            EngineError::Process(e) => write!(f, "Process error: {}", e),
            EngineError::Watch(e) => write!(f, "Watcher error: {}", e),
            EngineError::Storage(e) => write!(f, "Storage error: {}", e),
            EngineError::StreamNotFound(id) => write!(f, "Stream {} not found", id),
            EngineError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl From<ProcessError> for EngineError {
    fn from(err: ProcessError) -> Self {
        EngineError::Process(err)
    }
}

impl From<WatchError> for EngineError {
    fn from(err: WatchError) -> Self {
        EngineError::Watch(err)
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        EngineError::Storage(err)
    }
}
