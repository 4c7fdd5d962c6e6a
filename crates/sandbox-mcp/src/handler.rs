//! Executing tool calls against sandbox images.
//!
//! A call is validated against the sandbox's declared parameters before the
//! container runtime is touched. Valid arguments reach the sandboxed program
//! three ways:
//!
//! - `{{name}}` placeholders in the sandbox command are replaced;
//! - each argument is exported as `SANDBOX_ARG_<NAME>`;
//! - parameters with a `file` are written into the mounted working directory.

use crate::types::ExecResponse;
use sandbox_core::{
    ContainerRuntime, ParameterSpec, ParameterType, RunRequest, RuntimeError, SandboxConfig,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Maximum size for a single argument value in bytes (10 MB).
pub const MAX_ARGUMENT_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Mode of the per-call working directory mounted into the container.
const WORKDIR_MODE: u32 = 0o755;

/// Mode of files written from `file` parameters.
const ARGUMENT_FILE_MODE: u32 = 0o644;

/// A tool call's arguments do not satisfy the sandbox's parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required parameter: {0}")]
    Missing(String),

    #[error("unknown parameter: {0}")]
    Unknown(String),

    #[error("parameter '{name}' must be {expected}, got {actual}")]
    WrongType {
        name: String,
        expected: &'static str,
        actual: String,
    },

    #[error("parameter '{name}' exceeds maximum size ({size} bytes > {max} bytes)")]
    TooLarge { name: String, size: usize, max: usize },
}

/// Why a tool call could not produce a sandbox result.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid arguments: {0}")]
    Validation(#[from] ValidationError),

    #[error("sandbox dispatch failed: {0}")]
    Dispatch(#[source] RuntimeError),

    #[error("request cancelled")]
    Cancelled,
}

impl From<RuntimeError> for HandlerError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Cancelled => Self::Cancelled,
            other => Self::Dispatch(other),
        }
    }
}

/// Arguments after validation, rendered to strings and keyed by name.
pub type ValidatedArgs = BTreeMap<String, String>;

/// Runs sandbox invocations on a container runtime.
#[derive(Clone)]
pub struct ToolHandler {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ToolHandler {
    /// Create a handler over the given runtime.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Validate `arguments` and run the sandbox once.
    pub async fn handle(
        &self,
        config: &SandboxConfig,
        arguments: Option<Map<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<ExecResponse, HandlerError> {
        let args = validate_arguments(config, &arguments.unwrap_or_default())?;

        tracing::info!(
            sandbox = %config.id,
            args = ?args.keys().collect::<Vec<_>>(),
            "Invoking sandbox"
        );

        // Removed on drop, after the container is gone.
        let workdir = tempfile::Builder::new()
            .prefix(&format!("sandbox-mcp-{}-", config.id))
            .tempdir()
            .map_err(RuntimeError::Io)?;
        // The container user may differ from ours and lacks DAC capabilities.
        set_mode(workdir.path(), WORKDIR_MODE).map_err(RuntimeError::Io)?;
        for param in &config.parameters {
            if let (Some(file), Some(value)) = (&param.file, args.get(&param.name)) {
                let path = workdir.path().join(file);
                tokio::fs::write(&path, value)
                    .await
                    .map_err(RuntimeError::Io)?;
                set_mode(&path, ARGUMENT_FILE_MODE).map_err(RuntimeError::Io)?;
            }
        }

        let mut request = RunRequest::for_sandbox(config);
        request.command = render_command(&config.command, config, &args);
        request.env = env_for(&args);
        request.mount = Some(workdir.path().to_path_buf());

        let output = self.runtime.run(request, cancel).await?;
        Ok(output.into())
    }
}

/// Check `arguments` against the sandbox parameters and render each value.
pub fn validate_arguments(
    config: &SandboxConfig,
    arguments: &Map<String, Value>,
) -> Result<ValidatedArgs, ValidationError> {
    if let Some(unknown) = arguments.keys().find(|k| config.parameter(k).is_none()) {
        return Err(ValidationError::Unknown(unknown.clone()));
    }

    let mut validated = ValidatedArgs::new();
    for param in &config.parameters {
        match arguments.get(&param.name) {
            None | Some(Value::Null) if param.required => {
                return Err(ValidationError::Missing(param.name.clone()));
            }
            None | Some(Value::Null) => {}
            Some(value) => {
                let rendered = render_value(param, value)?;
                if rendered.len() > MAX_ARGUMENT_SIZE_BYTES {
                    return Err(ValidationError::TooLarge {
                        name: param.name.clone(),
                        size: rendered.len(),
                        max: MAX_ARGUMENT_SIZE_BYTES,
                    });
                }
                validated.insert(param.name.clone(), rendered);
            }
        }
    }
    Ok(validated)
}

/// Convert a JSON value to the declared type, rendered as text.
fn render_value(param: &ParameterSpec, value: &Value) -> Result<String, ValidationError> {
    let rendered = match (param.kind, value) {
        (ParameterType::String, Value::String(s)) => Some(s.clone()),
        (ParameterType::String, Value::Number(n)) => Some(n.to_string()),
        (ParameterType::String, Value::Bool(b)) => Some(b.to_string()),

        (ParameterType::Integer, Value::Number(n)) => integer_of(n).map(|i| i.to_string()),
        (ParameterType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(|i| i.to_string()),

        (ParameterType::Number, Value::Number(n)) => Some(n.to_string()),
        (ParameterType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.to_string()),

        (ParameterType::Boolean, Value::Bool(b)) => Some(b.to_string()),
        (ParameterType::Boolean, Value::String(s)) => match s.trim() {
            "true" => Some("true".to_string()),
            "false" => Some("false".to_string()),
            _ => None,
        },

        _ => None,
    };

    rendered.ok_or_else(|| ValidationError::WrongType {
        name: param.name.clone(),
        expected: param.kind.as_str(),
        actual: describe(value),
    })
}

/// Accept whole numbers, including floats with no fractional part.
fn integer_of(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(_) => "boolean".into(),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) if s.len() > 32 => "string".into(),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}

/// Replace `{{name}}` placeholders in a single left-to-right pass.
///
/// Substituted values are never rescanned. Absent optional arguments become
/// empty; placeholders naming no declared parameter are kept verbatim.
fn render_command(command: &[String], config: &SandboxConfig, args: &ValidatedArgs) -> Vec<String> {
    command
        .iter()
        .map(|part| render_part(part, config, args))
        .collect()
}

fn render_part(part: &str, config: &SandboxConfig, args: &ValidatedArgs) -> String {
    let mut rendered = String::with_capacity(part.len());
    let mut rest = part;

    while let Some(open) = rest.find("{{") {
        rendered.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            rendered.push_str(&rest[open..]);
            return rendered;
        };

        let name = &after_open[..close];
        if config.parameter(name).is_some() {
            rendered.push_str(args.get(name).map(String::as_str).unwrap_or(""));
        } else {
            rendered.push_str(&rest[open..open + 2 + close + 2]);
        }
        rest = &after_open[close + 2..];
    }

    rendered.push_str(rest);
    rendered
}

#[cfg(unix)]
fn set_mode(path: &std::path::Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &std::path::Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn env_for(args: &ValidatedArgs) -> Vec<String> {
    args.iter()
        .map(|(name, value)| format!("SANDBOX_ARG_{}={}", name.to_ascii_uppercase(), value))
        .collect()
}
