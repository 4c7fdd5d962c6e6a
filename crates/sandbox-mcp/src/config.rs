//! Configuration for the MCP server.
//!
//! Configuration is loaded from environment variables with sensible defaults.
//! The sandboxes path may also come from `config.json` in the config
//! directory, which is where `--pull` installs sandboxes by default.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Default HTTP/SSE port.
pub const DEFAULT_HTTP_PORT: u16 = 10061;

const APP_DIR: &str = "sandbox-mcp";

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no home directory; set SANDBOX_MCP_CONFIG_DIR or SANDBOX_MCP_SANDBOXES_PATH")]
    NoHome,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk settings file (`<config dir>/config.json`).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    sandboxes_path: Option<PathBuf>,
}

/// Configuration for the sandbox MCP server.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding one subdirectory per sandbox.
    pub sandboxes_path: PathBuf,

    /// HTTP/SSE bind address.
    pub http_addr: SocketAddr,

    /// Archive fetched by `--pull`.
    pub pull_url: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SANDBOX_MCP_CONFIG_DIR` | `$XDG_CONFIG_HOME/sandbox-mcp` or `~/.config/sandbox-mcp` |
    /// | `SANDBOX_MCP_SANDBOXES_PATH` | `sandboxesPath` from `config.json`, else `<config dir>/sandboxes` |
    /// | `SANDBOX_MCP_HTTP_HOST` | `0.0.0.0` |
    /// | `SANDBOX_MCP_HTTP_PORT` | `10061` |
    /// | `SANDBOX_MCP_PULL_URL` | release archive of the default sandboxes |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config_dir = match var("SANDBOX_MCP_CONFIG_DIR") {
            Some(dir) => Some(PathBuf::from(dir)),
            None => default_config_dir(&var),
        };

        let sandboxes_path = match var("SANDBOX_MCP_SANDBOXES_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let dir = config_dir.ok_or(ConfigError::NoHome)?;
                read_file_config(&dir.join("config.json"))?
                    .sandboxes_path
                    .unwrap_or_else(|| dir.join("sandboxes"))
            }
        };

        let http_host: IpAddr = var("SANDBOX_MCP_HTTP_HOST")
            .and_then(|v| v.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let http_port: u16 = var("SANDBOX_MCP_HTTP_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HTTP_PORT);

        Ok(Self {
            sandboxes_path,
            http_addr: SocketAddr::new(http_host, http_port),
            pull_url: var("SANDBOX_MCP_PULL_URL")
                .unwrap_or_else(|| sandbox_core::DEFAULT_PULL_URL.to_string()),
        })
    }

    /// Log a warning when the sandboxes directory is missing.
    pub fn validate_warn(&self) {
        if !self.sandboxes_path.is_dir() {
            tracing::warn!(
                "Sandboxes directory not found: {:?} (run with --pull to fetch the defaults)",
                self.sandboxes_path
            );
        }
    }
}

fn default_config_dir(var: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| home::home_dir().map(|home| home.join(".config")))
        .map(|base| base.join(APP_DIR))
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}
