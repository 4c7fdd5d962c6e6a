//! Fetching the default sandbox definitions from a release archive.
//!
//! The archive is a gzip-compressed tarball whose directories each hold a
//! `config.json` and a build context. A single wrapping top-level directory
//! is tolerated.

use crate::config::SandboxConfig;
use crate::error::{ConfigError, PullError};
use crate::store::definition_files;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Archive of the default sandboxes published with each release.
pub const DEFAULT_PULL_URL: &str =
    "https://github.com/pottekkat/sandbox-mcp/releases/latest/download/sandboxes.tar.gz";

/// What a pull did with each sandbox it found.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Newly installed sandboxes.
    pub installed: Vec<String>,
    /// Existing sandboxes overwritten because of `force`.
    pub replaced: Vec<String>,
    /// Existing sandboxes left untouched.
    pub skipped: Vec<String>,
}

/// Download the archive at `url` and install its sandboxes into `dest`.
///
/// Without `force`, a sandbox directory that already exists is skipped;
/// with `force` it is replaced.
pub async fn pull_sandboxes(dest: &Path, force: bool, url: &str) -> Result<PullReport, PullError> {
    tracing::info!(%url, dest = %dest.display(), force, "Pulling sandboxes");

    let http_err = |source| PullError::Http {
        url: url.to_string(),
        source,
    };
    let bytes = reqwest::get(url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(http_err)?
        .bytes()
        .await
        .map_err(http_err)?;
    tracing::debug!(bytes = bytes.len(), "Archive downloaded");

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || install_archive(&bytes, &dest, force))
        .await
        .map_err(|e| PullError::Archive(std::io::Error::other(e)))?
}

/// Unpack a `.tar.gz` archive of sandboxes and install it into `dest`.
///
/// Conflicts are decided by sandbox id. An installed sandbox with the same
/// id is skipped, or replaced in its own directory when `force` is set. A
/// directory that already holds a different sandbox is never overwritten.
pub fn install_archive(archive: &[u8], dest: &Path, force: bool) -> Result<PullReport, PullError> {
    let staging = tempfile::Builder::new()
        .prefix("sandbox-mcp-pull-")
        .tempdir()
        .map_err(PullError::Archive)?;

    tar::Archive::new(GzDecoder::new(archive))
        .unpack(staging.path())
        .map_err(PullError::Archive)?;

    let source_root = sandboxes_root(staging.path())?;
    let incoming = definition_files(&source_root)?;
    if incoming.is_empty() {
        return Err(PullError::Empty);
    }

    // Validate everything before touching the destination.
    let mut archive_ids: HashMap<String, PathBuf> = HashMap::new();
    let mut sandboxes = Vec::with_capacity(incoming.len());
    for (dir_name, definition) in incoming {
        let json = std::fs::read_to_string(&definition).map_err(PullError::Archive)?;
        let config = SandboxConfig::from_json(&json, &dir_name, &definition)?;
        if let Some(first) = archive_ids.get(&config.id) {
            return Err(ConfigError::DuplicateId {
                id: config.id,
                first: first.clone(),
                second: definition,
            }
            .into());
        }
        archive_ids.insert(config.id.clone(), definition);
        sandboxes.push((dir_name, config.id));
    }

    std::fs::create_dir_all(dest).map_err(|source| PullError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    let installed = InstalledSandboxes::scan(dest)?;

    let mut report = PullReport::default();
    for (dir_name, id) in sandboxes {
        let (target, exists) = match installed.dir_of(&id) {
            Some(existing) => (dest.join(existing), true),
            None => match installed.id_in(&dir_name) {
                Some(other) => {
                    tracing::warn!(
                        sandbox = %id,
                        dir = %dir_name,
                        holder = %other,
                        "Directory holds another sandbox, skipping"
                    );
                    report.skipped.push(id);
                    continue;
                }
                None => {
                    let target = dest.join(&dir_name);
                    let exists = target.exists();
                    (target, exists)
                }
            },
        };
        let io_err = |source| PullError::Io {
            path: target.clone(),
            source,
        };

        if exists {
            if !force {
                tracing::info!(sandbox = %id, dir = %target.display(), "Sandbox exists, skipping (use --force to overwrite)");
                report.skipped.push(id);
                continue;
            }
            std::fs::remove_dir_all(&target).map_err(io_err)?;
            copy_dir(&source_root.join(&dir_name), &target).map_err(io_err)?;
            tracing::info!(sandbox = %id, dir = %target.display(), "Sandbox replaced");
            report.replaced.push(id);
        } else {
            copy_dir(&source_root.join(&dir_name), &target).map_err(io_err)?;
            tracing::info!(sandbox = %id, "Sandbox installed");
            report.installed.push(id);
        }
    }

    Ok(report)
}

/// Ids of the sandboxes already present in a destination directory.
#[derive(Debug, Default)]
struct InstalledSandboxes {
    by_id: HashMap<String, String>,
    by_dir: HashMap<String, String>,
}

impl InstalledSandboxes {
    /// Read every definition under `dest`. Unreadable ones hold no id.
    fn scan(dest: &Path) -> Result<Self, PullError> {
        let mut installed = Self::default();
        for (dir_name, definition) in definition_files(dest)? {
            let config = std::fs::read_to_string(&definition)
                .map_err(|source| ConfigError::Io {
                    path: definition.clone(),
                    source,
                })
                .and_then(|json| SandboxConfig::from_json(&json, &dir_name, &definition));
            match config {
                Ok(config) => {
                    installed
                        .by_id
                        .entry(config.id.clone())
                        .or_insert_with(|| dir_name.clone());
                    installed.by_dir.insert(dir_name, config.id);
                }
                Err(e) => {
                    tracing::warn!(dir = %dir_name, error = %e, "Installed sandbox unreadable");
                }
            }
        }
        Ok(installed)
    }

    fn dir_of(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    fn id_in(&self, dir_name: &str) -> Option<&str> {
        self.by_dir.get(dir_name).map(String::as_str)
    }
}

/// Descend through a single wrapping directory, if that is all there is.
fn sandboxes_root(staging: &Path) -> Result<PathBuf, PullError> {
    let entries: Vec<_> = std::fs::read_dir(staging)
        .map_err(PullError::Archive)?
        .collect::<Result<_, _>>()
        .map_err(PullError::Archive)?;

    match entries.as_slice() {
        [only] if only.path().is_dir() && !only.path().join(crate::store::DEFINITION_FILE).exists() => {
            Ok(only.path())
        }
        _ => Ok(staging.to_path_buf()),
    }
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let kind = entry.file_type()?;
        if kind.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if kind.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
