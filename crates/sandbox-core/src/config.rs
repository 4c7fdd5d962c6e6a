//! Sandbox definition types.
//!
//! A sandbox is described by a `config.json` file in its own directory
//! under the sandboxes root:
//!
//! ```json
//! {
//!   "id": "python",
//!   "description": "Run a Python 3 script",
//!   "command": ["python3", "main.py"],
//!   "timeout": 30,
//!   "parameters": [
//!     { "name": "code", "type": "string", "description": "Script source", "file": "main.py" }
//!   ]
//! }
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Repository prefix for every sandbox image.
pub const IMAGE_REPOSITORY: &str = "sandbox-mcp";

/// Default invocation timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const MAX_ID_LEN: usize = 64;

/// Upper bound for `resources.memoryMb` (1 TiB).
pub const MAX_MEMORY_MB: u64 = 1024 * 1024;

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// Free-form text.
    String,
    /// Whole number.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` / `false`.
    Boolean,
}

impl ParameterType {
    /// JSON Schema type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// One named argument a sandbox tool accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    /// Argument name, also the `{{name}}` placeholder in the command.
    pub name: String,

    /// Declared type.
    #[serde(rename = "type")]
    pub kind: ParameterType,

    /// Whether callers must supply it (default: true).
    #[serde(default = "default_true")]
    pub required: bool,

    /// Shown to the agent in the tool schema.
    #[serde(default)]
    pub description: String,

    /// Write the value to this file inside the sandbox working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Container resource limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceLimits {
    /// CPU share in cores (default: 1.0).
    pub cpus: f64,
    /// Memory limit in MiB (default: 512).
    pub memory_mb: u64,
    /// Maximum number of processes (default: 128).
    pub pids: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpus: 1.0,
            memory_mb: 512,
            pids: 128,
        }
    }
}

/// Container hardening options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityOptions {
    /// Mount the image root filesystem read-only.
    pub read_only_rootfs: bool,
    /// Drop all Linux capabilities.
    pub drop_capabilities: bool,
    /// Set `no-new-privileges`.
    pub no_new_privileges: bool,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            read_only_rootfs: true,
            drop_capabilities: true,
            no_new_privileges: true,
        }
    }
}

/// Network access for the sandbox container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkOptions {
    /// Attach to the default bridge network (default: false).
    pub enabled: bool,
}

/// Identity and build/run recipe for one sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    /// Unique id; the tool name and the image key.
    pub id: String,

    /// Image tag (default: "latest").
    #[serde(default = "default_version")]
    pub version: String,

    /// Human-readable description surfaced as the tool description.
    pub description: String,

    /// Ordered invocation schema.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,

    /// Build context relative to the sandboxes root.
    ///
    /// Defaults to the directory holding the definition.
    #[serde(default)]
    pub build_context: PathBuf,

    /// Dockerfile name inside the build context.
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    /// Command run in the container; empty means the image default.
    #[serde(default)]
    pub command: Vec<String>,

    /// Container working directory.
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Invocation timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Resource limits.
    #[serde(default)]
    pub resources: ResourceLimits,

    /// Hardening options.
    #[serde(default)]
    pub security: SecurityOptions,

    /// Network options.
    #[serde(default)]
    pub network: NetworkOptions,
}

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "latest".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_workdir() -> String {
    "/sandbox".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl SandboxConfig {
    /// Parse and validate one definition.
    ///
    /// `dir_name` is the directory the definition lives in; it becomes the
    /// build context when none is declared. `path` is only used in errors.
    pub fn from_json(json: &str, dir_name: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: SandboxConfig =
            serde_json::from_str(json).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if config.build_context.as_os_str().is_empty() {
            config.build_context = PathBuf::from(dir_name);
        }

        config.validate().map_err(|reason| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;

        Ok(config)
    }

    /// Check field constraints, returning a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_id(&self.id) {
            return Err(format!(
                "id '{}' must be 1-{MAX_ID_LEN} chars of [a-z0-9_.-] starting with a letter or digit",
                self.id
            ));
        }
        if self.description.trim().is_empty() {
            return Err("description is required".into());
        }
        if self.version.is_empty() || !self.version.chars().all(is_tag_char) {
            return Err(format!("version '{}' is not a valid image tag", self.version));
        }
        if !is_relative_inside(&self.build_context) {
            return Err(format!(
                "buildContext '{}' must be a relative path inside the sandboxes directory",
                self.build_context.display()
            ));
        }
        if !is_plain_file_name(&self.dockerfile) {
            return Err(format!("dockerfile '{}' must be a file name", self.dockerfile));
        }
        if !self.workdir.starts_with('/') {
            return Err(format!("workdir '{}' must be absolute", self.workdir));
        }
        if self.timeout == 0 {
            return Err("timeout must be > 0".into());
        }
        if self.resources.cpus <= 0.0 || self.resources.memory_mb == 0 {
            return Err("resources.cpus and resources.memoryMb must be > 0".into());
        }
        if self.resources.memory_mb > MAX_MEMORY_MB {
            return Err(format!("resources.memoryMb must be <= {MAX_MEMORY_MB}"));
        }

        let mut seen = std::collections::HashSet::new();
        let mut files = std::collections::HashSet::new();
        for param in &self.parameters {
            if !is_valid_param_name(&param.name) {
                return Err(format!("parameter name '{}' is not an identifier", param.name));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(format!("parameter '{}' declared twice", param.name));
            }
            if let Some(file) = &param.file {
                if !is_plain_file_name(file) {
                    return Err(format!(
                        "parameter '{}' file '{}' must be a file name",
                        param.name, file
                    ));
                }
                if !files.insert(file.as_str()) {
                    return Err(format!(
                        "parameter '{}' file '{}' is already written by another parameter",
                        param.name, file
                    ));
                }
            }
        }

        Ok(())
    }

    /// Full image reference, e.g. `sandbox-mcp/python:latest`.
    pub fn image_ref(&self) -> String {
        format!("{IMAGE_REPOSITORY}/{}:{}", self.id, self.version)
    }

    /// Invocation timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Look up a declared parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    id.len() <= MAX_ID_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_.-".contains(c))
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_.-".contains(c)
}

fn is_valid_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_plain_file_name(name: &str) -> bool {
    let path = Path::new(name);
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_relative_inside(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
