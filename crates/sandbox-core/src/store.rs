//! Discovery and loading of sandbox definitions.

use crate::config::SandboxConfig;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Name of the definition file inside each sandbox directory.
pub const DEFINITION_FILE: &str = "config.json";

/// Load every sandbox definition under `root`.
///
/// Each non-hidden subdirectory holding a `config.json` is one sandbox.
/// Results are ordered by directory name. The load fails as a whole if any
/// definition is malformed or if two definitions share an id.
pub fn load_sandbox_configs(root: &Path) -> Result<Vec<SandboxConfig>, ConfigError> {
    if !root.is_dir() {
        return Err(ConfigError::MissingRoot(root.to_path_buf()));
    }

    let mut configs = Vec::new();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for (dir_name, definition) in definition_files(root)? {
        let json = std::fs::read_to_string(&definition).map_err(|source| ConfigError::Io {
            path: definition.clone(),
            source,
        })?;
        let config = SandboxConfig::from_json(&json, &dir_name, &definition)?;

        if let Some(first) = seen.get(&config.id) {
            return Err(ConfigError::DuplicateId {
                id: config.id,
                first: first.clone(),
                second: definition,
            });
        }

        tracing::debug!(id = %config.id, path = %definition.display(), "Loaded sandbox definition");
        seen.insert(config.id.clone(), definition);
        configs.push(config);
    }

    tracing::info!(count = configs.len(), root = %root.display(), "Sandbox definitions loaded");
    Ok(configs)
}

/// List `(directory name, definition path)` pairs under `root`, sorted.
pub(crate) fn definition_files(root: &Path) -> Result<Vec<(String, PathBuf)>, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: root.to_path_buf(),
        source,
    };

    let mut found = Vec::new();
    for entry in std::fs::read_dir(root).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 directory name");
            continue;
        };
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }

        let definition = entry.path().join(DEFINITION_FILE);
        if definition.is_file() {
            found.push((name, definition));
        } else {
            tracing::trace!(dir = %name, "No definition file, skipping");
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}
