//! Error types for sandbox-core.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading sandbox definitions.
///
/// Any of these aborts the whole load: a partially valid set of
/// sandboxes is never returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The sandboxes root does not exist or is not a directory.
    #[error("sandboxes directory not found: {0}")]
    MissingRoot(PathBuf),

    /// A definition file or directory could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A definition file is not valid JSON for the sandbox schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Definition file
        path: PathBuf,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// A definition parsed but violates a field constraint.
    #[error("invalid sandbox definition {path}: {reason}")]
    Invalid {
        /// Definition file
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// Two definitions declare the same id.
    #[error("duplicate sandbox id '{id}' in {first} and {second}")]
    DuplicateId {
        /// The shared id
        id: String,
        /// First definition carrying the id
        first: PathBuf,
        /// Second definition carrying the id
        second: PathBuf,
    },
}

/// Errors from the container runtime when running a sandbox.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The Docker daemon could not be reached.
    #[error("container runtime unreachable: {0}")]
    Unreachable(String),

    /// The sandbox image has not been built.
    #[error("image not found: {0} (run with --build first)")]
    ImageMissing(String),

    /// Any other failure reported by Docker.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// The caller cancelled the run; the container was killed.
    #[error("run cancelled")]
    Cancelled,

    /// Local I/O while preparing the invocation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building one sandbox image.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build context directory does not exist.
    #[error("build context not found: {0}")]
    MissingContext(PathBuf),

    /// The Dockerfile is missing from the build context.
    #[error("dockerfile not found: {0}")]
    MissingDockerfile(PathBuf),

    /// Packing the build context failed.
    #[error("failed to archive build context {path}: {source}")]
    Archive {
        /// Build context directory
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Docker reported a failed build step.
    #[error("build failed: {0}")]
    Failed(String),

    /// The build was cancelled before completion.
    #[error("build cancelled")]
    Cancelled,

    /// The runtime could not be used at all.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Errors raised while pulling remote sandbox definitions.
#[derive(Debug, Error)]
pub enum PullError {
    /// Download failed.
    #[error("failed to download {url}: {source}")]
    Http {
        /// Archive URL
        url: String,
        /// Underlying HTTP error
        #[source]
        source: reqwest::Error,
    },

    /// The archive could not be unpacked.
    #[error("failed to unpack sandbox archive: {0}")]
    Archive(#[source] std::io::Error),

    /// The archive held no sandbox definitions.
    #[error("archive contains no sandbox definitions")]
    Empty,

    /// A definition inside the archive is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Writing into the sandboxes directory failed.
    #[error("failed to install into {path}: {source}")]
    Io {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
