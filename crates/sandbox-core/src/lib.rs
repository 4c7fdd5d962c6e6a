//! # sandbox-core
//!
//! Sandbox definitions and the Docker-image lifecycle behind sandbox-mcp.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       sandbox-core                       │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  <root>/<dir>/config.json                                │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────────┐    ┌────────────────────────┐  │
//! │  │ load_sandbox_configs│───▶│  Vec<SandboxConfig>    │  │
//! │  └─────────────────────┘    └────────────────────────┘  │
//! │                                  │            │          │
//! │                                  ▼            ▼          │
//! │                        ┌──────────────┐ ┌────────────┐  │
//! │                        │ build_image  │ │ RunRequest │  │
//! │                        │ build_all    │ └────────────┘  │
//! │                        └──────────────┘       │          │
//! │                                  │            │          │
//! │                                  ▼            ▼          │
//! │                        ┌──────────────────────────────┐ │
//! │                        │  dyn ContainerRuntime        │ │
//! │                        │  (DockerRuntime / bollard)   │ │
//! │                        └──────────────────────────────┘ │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use sandbox_core::{build_all, load_sandbox_configs, DockerRuntime, TracingReporter};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let root = std::path::Path::new("/home/me/.config/sandbox-mcp/sandboxes");
//! let configs = load_sandbox_configs(root)?;
//! let runtime = DockerRuntime::connect().await?;
//!
//! let summary = build_all(
//!     &runtime,
//!     &configs,
//!     root,
//!     &CancellationToken::new(),
//!     &mut TracingReporter,
//! )
//! .await;
//! println!("{} built, {} failed", summary.built.len(), summary.failed.len());
//! # Ok(())
//! # }
//! ```

mod builder;
mod config;
mod docker;
mod error;
mod pull;
mod runtime;
mod store;

pub use builder::{build_all, build_image, BuildReporter, BuildSummary, TracingReporter};
pub use config::{
    NetworkOptions, ParameterSpec, ParameterType, ResourceLimits, SandboxConfig,
    SecurityOptions, DEFAULT_TIMEOUT_SECS, IMAGE_REPOSITORY, MAX_MEMORY_MB,
};
pub use docker::DockerRuntime;
pub use error::{BuildError, ConfigError, PullError, RuntimeError};
pub use pull::{install_archive, pull_sandboxes, PullReport, DEFAULT_PULL_URL};
pub use runtime::{
    truncate_output, BuildOutcome, BuildRequest, ContainerRuntime, RunOutput, RunRequest,
    MAX_OUTPUT_SIZE,
};
pub use store::{load_sandbox_configs, DEFINITION_FILE};
