//! Server configuration read from the process environment.

use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_DB_FILE_NAME: &str = "chartdb.sqlite";
pub const DEFAULT_MAX_VERSIONS_PER_DIAGRAM: i64 = 100;

/// Settings for the diagram server.
///
/// `max_versions <= 0` keeps unlimited history per diagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_versions: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_versions: DEFAULT_MAX_VERSIONS_PER_DIAGRAM,
        }
    }
}

impl ServerConfig {
    /// Read `PORT`, `DATA_DIR` and `MAX_VERSIONS_PER_DIAGRAM`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Blank or unparsable
    /// values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = read("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let data_dir = read("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let max_versions = read("MAX_VERSIONS_PER_DIAGRAM")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_VERSIONS_PER_DIAGRAM);

        Self {
            port,
            data_dir,
            max_versions,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Location of the SQLite database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DEFAULT_DB_FILE_NAME)
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}
