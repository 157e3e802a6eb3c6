//! The YAML configuration file and the durable last-seen id.
//!
//! The config file is both the program's settings and its only persistent
//! state.  It is read once at startup by [`ConfigStore::load`], and rewritten
//! in full by [`ConfigStore::persist_last_seen_id`] every time a new item is
//! detected.
//!
//! ```yaml
//! servers:
//!   home:
//!     token: "secret"
//!     ntfy_server: "https://ntfy.example.com/forum"
//! last_seen_id: "42"
//! feed_url: "https://forum.example.com/recent.xml"
//! refresh_interval: "15m"
//! ```

mod duration;

pub use duration::{parse_duration, DurationError};

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::notify::Destination;

/// Location of the config file, relative to the working directory.
pub const CONFIG_FILE: &str = "config.yml";

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while loading the config at startup.  All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid refresh_interval: {0}")]
    Duration(#[from] DurationError),
}

/// Errors raised while writing the last-seen id back to disk.
///
/// The durable state may no longer match what was notified, so callers treat
/// every variant as unrecoverable.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to re-read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config file {} no longer parses: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("failed to write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// File schema
// ============================================================================

/// The on-disk document.
///
/// Keys this program does not know about are kept in `extra` so that the
/// read-modify-write in [`ConfigStore::persist_last_seen_id`] never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Named destination groups.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,

    #[serde(default, deserialize_with = "scalar_string")]
    pub last_seen_id: String,

    pub feed_url: String,

    /// Interval between polls, e.g. `"15m"` or `"1h30m"`.
    pub refresh_interval: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// One destination group under `servers`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bearer token; empty means the endpoint takes no authentication.
    #[serde(default, deserialize_with = "scalar_string")]
    pub token: String,

    pub ntfy_server: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("token", &(!self.token.is_empty()).then_some("[REDACTED]"))
            .field("ntfy_server", &self.ntfy_server)
            .finish()
    }
}

/// Accept a string, or an unquoted integer such as `last_seen_id: 42`.
///
/// Integers are re-rendered in decimal, so only plain decimal ones keep their
/// text (`42` reads as `"42"`, `0x2A` also as `"42"`).  The parser does not
/// expose the raw scalar, so floats, booleans and integers too large for 64
/// bits are rejected and must be quoted.
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::Null => Ok(String::new()),
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string, found {other:?}; quote the value"
        ))),
    }
}

impl Config {
    /// Flatten the named server groups into one destination per endpoint.
    ///
    /// When two groups share an endpoint the one visited last wins.  Callers
    /// must not depend on the resulting order.
    pub fn destinations(&self) -> Vec<Destination> {
        let mut by_endpoint: HashMap<&str, &str> = HashMap::new();
        for server in self.servers.values() {
            by_endpoint.insert(&server.ntfy_server, &server.token);
        }
        by_endpoint
            .into_iter()
            .map(|(endpoint, token)| Destination::new(endpoint, token))
            .collect()
    }
}

// ============================================================================
// Store
// ============================================================================

/// Everything the poll loop needs, derived from the config at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub destinations: Vec<Destination>,
    pub last_seen_id: String,
    pub feed_url: String,
    pub refresh_interval: Duration,
}

/// Persistence seam for the last-seen id.
pub trait LastSeenStore {
    /// Durably record `id` as the most recently notified item.
    fn persist_last_seen_id(&self, id: &str) -> Result<(), PersistError>;
}

/// Reads and rewrites the config file at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the config file into [`Settings`].
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let content = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        let config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;

        for key in config.extra.keys() {
            tracing::warn!(key = %key, "Unknown key in config file, preserving as-is");
        }

        let refresh_interval = parse_duration(&config.refresh_interval)?;
        let destinations = config.destinations();

        tracing::info!(
            path = %self.path.display(),
            destinations = destinations.len(),
            feed_url = %config.feed_url,
            refresh_interval = %config.refresh_interval,
            "Loaded configuration"
        );

        Ok(Settings {
            destinations,
            last_seen_id: config.last_seen_id,
            feed_url: config.feed_url,
            refresh_interval,
        })
    }

    fn read_config(&self) -> Result<Config, PersistError> {
        let content = fs::read_to_string(&self.path).map_err(|source| PersistError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| PersistError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the file contents by writing a sibling file and renaming it
    /// over the original, keeping the original permissions.
    fn write_atomically(&self, contents: &str) -> Result<(), PersistError> {
        let write_err = |source: io::Error| PersistError::Write {
            path: self.path.clone(),
            source,
        };

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        // Restrict the empty file before any token is written into it.
        let mut file = File::create(&tmp_path).map_err(write_err)?;
        if let Ok(meta) = fs::metadata(&self.path) {
            file.set_permissions(meta.permissions()).map_err(write_err)?;
        }
        file.write_all(contents.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(write_err)
    }
}

impl LastSeenStore for ConfigStore {
    fn persist_last_seen_id(&self, id: &str) -> Result<(), PersistError> {
        let mut config = self.read_config()?;
        config.last_seen_id = id.to_string();
        let contents = serde_yaml::to_string(&config).map_err(PersistError::Serialize)?;
        self.write_atomically(&contents)?;
        tracing::debug!(path = %self.path.display(), id = %id, "Persisted last seen id");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
