//! Configuration for messaging-client

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{system_clock, Clock};

/// Default queue capacity for both outbound requests and the inbox
pub const DEFAULT_BUFFER_SIZE: usize = 128;

/// Default wait for a correlated response
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read deadline
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Default number of reconnect attempts
pub const DEFAULT_RETRIES: u32 = 30;

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("messaging-client")
        .join("config.toml")
}

/// Client options, applied before the first connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Capacity of the outbound request queue
    #[serde(default = "default_buffer")]
    pub send_buffer: usize,

    /// Capacity of the unsolicited message inbox
    #[serde(default = "default_buffer")]
    pub receive_buffer: usize,

    /// Rebuild the session after a read timeout or abnormal closure
    #[serde(default)]
    pub auto_reconnect: bool,

    /// Read deadline; keep-alive pings go out at half this interval
    #[serde(default = "default_deadline", rename = "read_deadline_ms", with = "duration_ms")]
    pub read_deadline: Duration,

    /// How long a direct request waits for its response
    #[serde(default = "default_timeout", rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,

    /// Reconnect attempts before giving up
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    /// Fixed delay between reconnect attempts
    #[serde(default = "default_timeout", rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,

    /// Time source for token expiry
    #[serde(skip, default = "system_clock")]
    pub clock: Arc<dyn Clock>,
}

fn default_buffer() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_deadline() -> Duration {
    DEFAULT_DEADLINE
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            send_buffer: DEFAULT_BUFFER_SIZE,
            receive_buffer: DEFAULT_BUFFER_SIZE,
            auto_reconnect: false,
            read_deadline: DEFAULT_DEADLINE,
            request_timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_TIMEOUT,
            clock: system_clock(),
        }
    }
}

impl ClientConfig {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Interval between keep-alive pings
    pub fn ping_interval(&self) -> Duration {
        self.read_deadline / 2
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
