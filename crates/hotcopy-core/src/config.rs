use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level daemon configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HotcopyConfig {
    pub daemon: DaemonConfig,
    pub mirror: MirrorConfig,
    pub ownership: OwnershipConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Plaintext tree (default: /data)
    pub plain_root: PathBuf,
    /// Ciphertext tree (default: /enc-data)
    pub cipher_root: PathBuf,
    /// How mirrored writes are kept from echoing back
    pub echo: EchoStrategy,
    /// Suppression window for the ttl strategy, in milliseconds
    pub echo_ttl_ms: u64,
    /// What to do when mirroring a single event fails
    pub on_error: ErrorPolicy,
}

impl MirrorConfig {
    pub fn echo_ttl(&self) -> Duration {
        Duration::from_millis(self.echo_ttl_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoStrategy {
    /// Drop events on paths the mirror itself wrote within the ttl window
    Ttl,
    /// Unwatch the opposite root while a mirrored write is in flight
    Suspend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop mirroring on the first failure and exit non-zero
    Abort,
    /// Log the failed event and continue with the next one
    Skip,
}

/// Owner applied to every file and directory the mirror creates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnershipConfig {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            plain_root: PathBuf::from("/data"),
            cipher_root: PathBuf::from("/enc-data"),
            echo: EchoStrategy::Ttl,
            echo_ttl_ms: 2000,
            on_error: ErrorPolicy::Abort,
        }
    }
}
