//! Image build pipeline.
//!
//! [`build_image`] turns one sandbox definition plus its build context into
//! a tagged image. [`build_all`] drives a sequential pass over every
//! sandbox; a failing sandbox is reported and the pass moves on.

use crate::config::SandboxConfig;
use crate::error::BuildError;
use crate::runtime::{BuildOutcome, BuildRequest, ContainerRuntime};
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Receives progress of a build pass.
///
/// Passed explicitly so callers (and tests) decide where output goes.
pub trait BuildReporter {
    /// A sandbox build is about to start.
    fn started(&mut self, id: &str);
    /// A sandbox image was built and tagged.
    fn succeeded(&mut self, id: &str, outcome: &BuildOutcome);
    /// A sandbox build failed; the pass continues.
    fn failed(&mut self, id: &str, error: &BuildError);
}

/// Reporter that logs through `tracing`.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl BuildReporter for TracingReporter {
    fn started(&mut self, id: &str) {
        tracing::info!(sandbox = %id, "Building image");
    }

    fn succeeded(&mut self, id: &str, outcome: &BuildOutcome) {
        tracing::info!(sandbox = %id, image = %outcome.image, "Image ready");
    }

    fn failed(&mut self, id: &str, error: &BuildError) {
        tracing::error!(sandbox = %id, error = %error, "Failed to build image");
    }
}

/// Result of a build pass over many sandboxes.
#[derive(Debug, Default)]
pub struct BuildSummary {
    /// Ids whose image was built.
    pub built: Vec<String>,
    /// Ids whose build failed, with the error.
    pub failed: Vec<(String, BuildError)>,
}

impl BuildSummary {
    /// Number of sandboxes attempted.
    pub fn attempted(&self) -> usize {
        self.built.len() + self.failed.len()
    }

    /// Whether every build succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Build and tag the image for one sandbox.
///
/// The build context is resolved under `sandboxes_root` and packed into a
/// tar archive. Re-running overwrites the existing tag.
pub async fn build_image(
    runtime: &dyn ContainerRuntime,
    config: &SandboxConfig,
    sandboxes_root: &Path,
    cancel: &CancellationToken,
) -> Result<BuildOutcome, BuildError> {
    let context_dir = sandboxes_root.join(&config.build_context);
    if !context_dir.is_dir() {
        return Err(BuildError::MissingContext(context_dir));
    }
    let dockerfile = context_dir.join(&config.dockerfile);
    if !dockerfile.is_file() {
        return Err(BuildError::MissingDockerfile(dockerfile));
    }

    let context = archive_context(&context_dir).map_err(|source| BuildError::Archive {
        path: context_dir.clone(),
        source,
    })?;
    tracing::debug!(
        sandbox = %config.id,
        context = %context_dir.display(),
        archive_bytes = context.len(),
        "Build context archived"
    );

    let request = BuildRequest {
        image: config.image_ref(),
        dockerfile: config.dockerfile.clone(),
        context,
    };
    runtime.build_image(request, cancel).await
}

/// Build every sandbox in order, one at a time.
///
/// Never short-circuits: each sandbox is attempted and reported. A
/// cancelled token marks the remaining sandboxes as cancelled.
pub async fn build_all(
    runtime: &dyn ContainerRuntime,
    configs: &[SandboxConfig],
    sandboxes_root: &Path,
    cancel: &CancellationToken,
    reporter: &mut dyn BuildReporter,
) -> BuildSummary {
    let mut summary = BuildSummary::default();

    for config in configs {
        reporter.started(&config.id);
        let start = Instant::now();

        let result = if cancel.is_cancelled() {
            Err(BuildError::Cancelled)
        } else {
            build_image(runtime, config, sandboxes_root, cancel).await
        };

        match result {
            Ok(outcome) => {
                tracing::debug!(
                    sandbox = %config.id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Build finished"
                );
                reporter.succeeded(&config.id, &outcome);
                summary.built.push(config.id.clone());
            }
            Err(error) => {
                reporter.failed(&config.id, &error);
                summary.failed.push((config.id.clone(), error));
            }
        }
    }

    summary
}

/// Pack a directory into an uncompressed tar archive in memory.
fn archive_context(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::runtime::{RunOutput, RunRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records build requests; fails images listed in `fail`.
    #[derive(Default)]
    struct FakeRuntime {
        fail: Vec<String>,
        builds: Mutex<Vec<BuildRequest>>,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn build_image(
            &self,
            request: BuildRequest,
            _cancel: &CancellationToken,
        ) -> Result<BuildOutcome, BuildError> {
            self.builds.lock().unwrap().push(request.clone());
            if self.fail.contains(&request.image) {
                return Err(BuildError::Failed("step 2/3 returned 1".into()));
            }
            Ok(BuildOutcome {
                image: request.image,
                log: vec!["Successfully built".into()],
            })
        }

        async fn run(
            &self,
            _request: RunRequest,
            _cancel: &CancellationToken,
        ) -> Result<RunOutput, RuntimeError> {
            unreachable!("builds never run containers")
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        events: Vec<String>,
    }

    impl BuildReporter for RecordingReporter {
        fn started(&mut self, id: &str) {
            self.events.push(format!("start {id}"));
        }
        fn succeeded(&mut self, id: &str, _outcome: &BuildOutcome) {
            self.events.push(format!("ok {id}"));
        }
        fn failed(&mut self, id: &str, _error: &BuildError) {
            self.events.push(format!("fail {id}"));
        }
    }

    fn sandbox(root: &Path, id: &str) -> SandboxConfig {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Dockerfile"), "FROM alpine:3\n").unwrap();
        std::fs::write(dir.join("run.sh"), "#!/bin/sh\necho hi\n").unwrap();
        let json = format!(r#"{{"id": "{id}", "description": "{id} sandbox"}}"#);
        SandboxConfig::from_json(&json, id, &dir.join("config.json")).unwrap()
    }

    #[tokio::test]
    async fn test_build_image_archives_context() {
        let root = tempfile::tempdir().unwrap();
        let config = sandbox(root.path(), "echo");
        let runtime = FakeRuntime::default();

        let outcome = build_image(&runtime, &config, root.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.image, "sandbox-mcp/echo:latest");

        let builds = runtime.builds.lock().unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].dockerfile, "Dockerfile");

        let mut archive = tar::Archive::new(builds[0].context.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("Dockerfile")));
        assert!(names.iter().any(|n| n.ends_with("run.sh")));
    }

    #[tokio::test]
    async fn test_missing_dockerfile() {
        let root = tempfile::tempdir().unwrap();
        let config = sandbox(root.path(), "echo");
        std::fs::remove_file(root.path().join("echo/Dockerfile")).unwrap();

        let err = build_image(
            &FakeRuntime::default(),
            &config,
            root.path(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BuildError::MissingDockerfile(_)));
    }

    #[tokio::test]
    async fn test_build_all_continues_past_failure() {
        let root = tempfile::tempdir().unwrap();
        let configs: Vec<_> = ["alpha", "beta", "gamma"]
            .iter()
            .map(|id| sandbox(root.path(), id))
            .collect();
        let runtime = FakeRuntime {
            fail: vec!["sandbox-mcp/beta:latest".into()],
            ..Default::default()
        };
        let mut reporter = RecordingReporter::default();

        let summary = build_all(
            &runtime,
            &configs,
            root.path(),
            &CancellationToken::new(),
            &mut reporter,
        )
        .await;

        assert_eq!(summary.attempted(), 3);
        assert_eq!(summary.built, vec!["alpha", "gamma"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "beta");
        assert!(!summary.all_succeeded());
        assert_eq!(
            reporter.events,
            vec![
                "start alpha",
                "ok alpha",
                "start beta",
                "fail beta",
                "start gamma",
                "ok gamma"
            ]
        );
        assert_eq!(runtime.builds.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_build_all_after_cancel_builds_nothing() {
        let root = tempfile::tempdir().unwrap();
        let configs = vec![sandbox(root.path(), "alpha"), sandbox(root.path(), "beta")];
        let runtime = FakeRuntime::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = build_all(
            &runtime,
            &configs,
            root.path(),
            &cancel,
            &mut RecordingReporter::default(),
        )
        .await;

        assert_eq!(summary.attempted(), 2);
        assert!(summary
            .failed
            .iter()
            .all(|(_, e)| matches!(e, BuildError::Cancelled)));
        assert!(runtime.builds.lock().unwrap().is_empty());
    }
}
