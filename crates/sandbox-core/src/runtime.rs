//! The seam between sandbox logic and the container engine.
//!
//! [`ContainerRuntime`] is implemented by [`crate::DockerRuntime`] in
//! production and by in-memory fakes in tests.

use crate::config::{ResourceLimits, SandboxConfig, SecurityOptions};
use crate::error::{BuildError, RuntimeError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maximum captured output per stream in bytes (1 MB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// A request to build and tag one image.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Image reference to tag on success.
    pub image: String,
    /// Dockerfile name inside the archive.
    pub dockerfile: String,
    /// Tar archive of the build context.
    pub context: Vec<u8>,
}

/// Result of a successful image build.
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    /// Image reference that was tagged.
    pub image: String,
    /// Build output lines, in order.
    pub log: Vec<String>,
}

/// A request to run one sandbox container to completion.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Image reference to run.
    pub image: String,
    /// Command override; empty uses the image default.
    pub command: Vec<String>,
    /// `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Container working directory.
    pub workdir: String,
    /// Host directory bind-mounted at `workdir`.
    pub mount: Option<PathBuf>,
    /// Resource limits.
    pub resources: ResourceLimits,
    /// Hardening options.
    pub security: SecurityOptions,
    /// Attach to a network.
    pub network: bool,
    /// Wall-clock limit for the run.
    pub timeout: Duration,
}

impl RunRequest {
    /// Start a request from a sandbox definition; command, env and mount are
    /// filled in by the caller.
    pub fn for_sandbox(config: &SandboxConfig) -> Self {
        Self {
            image: config.image_ref(),
            command: Vec::new(),
            env: Vec::new(),
            workdir: config.workdir.clone(),
            mount: None,
            resources: config.resources.clone(),
            security: config.security.clone(),
            network: config.network.enabled,
            timeout: config.timeout(),
        }
    }
}

/// Captured result of a sandbox run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit code of the sandboxed process (-1 if it never exited).
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Whether the run was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl RunOutput {
    /// Check if the process succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// A container engine able to build images and run one-shot containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build `request.context` and tag it as `request.image`.
    ///
    /// On cancellation the tag must not move to a partial image.
    async fn build_image(
        &self,
        request: BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, BuildError>;

    /// Run a fresh container to completion and capture its output.
    ///
    /// Exceeding `request.timeout` yields `Ok` with `timed_out` set;
    /// cancellation yields [`RuntimeError::Cancelled`]. The container is
    /// removed in every case.
    async fn run(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RuntimeError>;
}

/// Truncate a string to max bytes, preserving UTF-8 boundaries.
pub fn truncate_output(mut s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s.push_str("\n... [output truncated]");
    s
}

/// Byte collector for one output stream that stops growing at a limit.
#[derive(Debug)]
pub(crate) struct CappedOutput {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedOutput {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append a chunk, dropping whatever does not fit.
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub(crate) fn is_full(&self) -> bool {
        self.truncated
    }

    /// Decode the collected bytes, marking the text if anything was dropped.
    pub(crate) fn finish(self) -> String {
        let text = String::from_utf8_lossy(&self.bytes).into_owned();
        if text.len() > self.limit {
            return truncate_output(text, self.limit);
        }
        if self.truncated {
            let mut text = text;
            text.push_str("\n... [output truncated]");
            return text;
        }
        text
    }
}
