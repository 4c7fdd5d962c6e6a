//! Docker implementation of [`ContainerRuntime`] using Bollard.

use crate::error::{BuildError, RuntimeError};
use crate::runtime::{
    BuildOutcome, BuildRequest, CappedOutput, ContainerRuntime, RunOutput, RunRequest,
    MAX_OUTPUT_SIZE,
};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptions, KillContainerOptions, LogsOptionsBuilder,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{Either, Full};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Label set on every sandbox container.
const SANDBOX_LABEL: &str = "sandbox-mcp.sandbox";

/// How a started container stopped.
enum Stopped {
    Exited(i64),
    TimedOut,
    Cancelled,
}

/// Container runtime backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon and verify it answers.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Unreachable`] if connection or ping fails.
    pub async fn connect() -> Result<Self, RuntimeError> {
        let runtime = Self::connect_lazy()?;
        runtime.ping().await?;

        debug!("Docker connection established");
        Ok(runtime)
    }

    /// Configure a client for the local daemon without contacting it.
    ///
    /// An absent daemon surfaces later, as [`RuntimeError::Unreachable`]
    /// from each call.
    pub fn connect_lazy() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unreachable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unreachable(e.to_string()))
    }

    /// Wrap an existing client without pinging it.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn create(&self, request: &RunRequest) -> Result<String, RuntimeError> {
        let mut host_config = HostConfig {
            memory: Some(memory_bytes(request.resources.memory_mb)),
            nano_cpus: Some((request.resources.cpus * 1_000_000_000.0) as i64),
            pids_limit: Some(request.resources.pids),
            network_mode: Some(if request.network { "bridge" } else { "none" }.to_string()),
            readonly_rootfs: Some(request.security.read_only_rootfs),
            ..Default::default()
        };
        if request.security.drop_capabilities {
            host_config.cap_drop = Some(vec!["ALL".to_string()]);
        }
        if request.security.no_new_privileges {
            host_config.security_opt = Some(vec!["no-new-privileges".to_string()]);
        }
        if request.security.read_only_rootfs {
            host_config.tmpfs = Some(HashMap::from([(
                "/tmp".to_string(),
                "rw,noexec,nosuid,size=64m".to_string(),
            )]));
        }
        if let Some(mount) = &request.mount {
            host_config.binds = Some(vec![format!("{}:{}", mount.display(), request.workdir)]);
        }

        let image_name = request
            .image
            .split_once('/')
            .map_or(request.image.as_str(), |(_, rest)| rest);
        let body = ContainerCreateBody {
            image: Some(request.image.clone()),
            cmd: (!request.command.is_empty()).then(|| request.command.clone()),
            env: Some(request.env.clone()),
            working_dir: Some(request.workdir.clone()),
            network_disabled: Some(!request.network),
            host_config: Some(host_config),
            labels: Some(HashMap::from([(
                SANDBOX_LABEL.to_string(),
                image_name.to_string(),
            )])),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(format!("sandbox-mcp-{}", uuid::Uuid::new_v4())),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| classify(e, &request.image))?;
        Ok(response.id)
    }

    /// Wait for the container to exit and return its status code.
    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let mut stream = Box::pin(
            self.docker
                .wait_container(id, None::<WaitContainerOptions>),
        );

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Bollard reports non-zero exits as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Ok(-1),
        }
    }

    async fn collect_logs(&self, id: &str) -> Result<(String, String), RuntimeError> {
        let options = LogsOptionsBuilder::new().stdout(true).stderr(true).build();
        let mut logs = Box::pin(self.docker.logs(id, Some(options)));

        let mut stdout = CappedOutput::new(MAX_OUTPUT_SIZE);
        let mut stderr = CappedOutput::new(MAX_OUTPUT_SIZE);
        while let Some(chunk) = logs.next().await {
            match chunk? {
                LogOutput::StdOut { message } => stdout.push(&message),
                LogOutput::StdErr { message } => stderr.push(&message),
                _ => {}
            }
            if stdout.is_full() && stderr.is_full() {
                debug!(container_id = %id, "Output limit reached on both streams");
                break;
            }
        }

        Ok((stdout.finish(), stderr.finish()))
    }

    async fn run_started(
        &self,
        id: &str,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;
        debug!(container_id = %id, "Sandbox container started");

        let stopped = tokio::select! {
            _ = cancel.cancelled() => Stopped::Cancelled,
            waited = tokio::time::timeout(request.timeout, self.wait(id)) => match waited {
                Ok(code) => Stopped::Exited(code?),
                Err(_) => Stopped::TimedOut,
            },
        };

        match stopped {
            Stopped::Exited(exit_code) => {
                let (stdout, stderr) = self.collect_logs(id).await?;
                Ok(RunOutput {
                    exit_code,
                    stdout,
                    stderr,
                    timed_out: false,
                })
            }
            Stopped::TimedOut => {
                warn!(container_id = %id, timeout = ?request.timeout, "Sandbox timed out, killing");
                self.kill(id).await;
                let (stdout, stderr) = self.collect_logs(id).await.unwrap_or_default();
                Ok(RunOutput {
                    exit_code: -1,
                    stdout,
                    stderr,
                    timed_out: true,
                })
            }
            Stopped::Cancelled => {
                warn!(container_id = %id, "Sandbox run cancelled, killing");
                self.kill(id).await;
                Err(RuntimeError::Cancelled)
            }
        }
    }

    async fn kill(&self, id: &str) {
        if let Err(e) = self
            .docker
            .kill_container(id, None::<KillContainerOptions>)
            .await
        {
            // The container may have exited between the timeout and the kill.
            debug!(container_id = %id, error = %e, "Kill failed");
        }
    }

    async fn remove(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(id, Some(options)).await {
            warn!(container_id = %id, error = %e, "Failed to remove sandbox container");
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self, request, cancel), fields(image = %request.image))]
    async fn build_image(
        &self,
        request: BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, BuildError> {
        let options = BuildImageOptionsBuilder::new()
            .dockerfile(&request.dockerfile)
            .t(&request.image)
            .rm(true)
            .forcerm(true)
            .build();

        let body = Either::Left(Full::new(Bytes::from(request.context)));
        let mut stream = Box::pin(self.docker.build_image(options, None, Some(body)));

        let mut log = Vec::new();
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    // Dropping the stream aborts the request; Docker only
                    // tags after the final step succeeds.
                    warn!("Image build cancelled");
                    return Err(BuildError::Cancelled);
                }
                item = stream.next() => item,
            };

            let Some(item) = item else { break };
            let info = item.map_err(|e| match e {
                DockerError::DockerStreamError { error } => BuildError::Failed(error),
                other => BuildError::Runtime(classify(other, &request.image)),
            })?;

            if let Some(detail) = info.error_detail {
                return Err(BuildError::Failed(
                    detail.message.unwrap_or_else(|| "unknown build error".into()),
                ));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!(output = %line, "build");
                    log.push(line.to_string());
                }
            }
        }

        info!("Image built");
        Ok(BuildOutcome {
            image: request.image,
            log,
        })
    }

    #[instrument(skip(self, request, cancel), fields(image = %request.image))]
    async fn run(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RuntimeError> {
        let id = self.create(&request).await?;
        debug!(container_id = %id, "Sandbox container created");

        let result = self.run_started(&id, &request, cancel).await;
        self.remove(&id).await;

        if let Ok(output) = &result {
            debug!(
                exit_code = output.exit_code,
                timed_out = output.timed_out,
                stdout_len = output.stdout.len(),
                stderr_len = output.stderr.len(),
                "Sandbox run completed"
            );
        }
        result
    }
}

/// Memory limit in bytes, saturating instead of overflowing.
fn memory_bytes(memory_mb: u64) -> i64 {
    i64::try_from(memory_mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)
}

/// Map Bollard errors onto the runtime taxonomy.
fn classify(error: DockerError, image: &str) -> RuntimeError {
    match error {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::ImageMissing(image.to_string()),
        DockerError::IOError { .. }
        | DockerError::SocketNotFoundError(_)
        | DockerError::HyperLegacyError { .. }
        | DockerError::RequestTimeoutError => RuntimeError::Unreachable(error.to_string()),
        other => RuntimeError::Docker(other),
    }
}
