//! Removing a target's output tree.

use std::fs;
use std::io;

use crate::config::{Config, TargetKind};
use crate::error::BuildError;

/// Recursively remove the output root of a target.
///
/// Returns whether anything was removed. Refuses to delete a directory that
/// contains the project root or any category's source directory.
pub fn clean(config: &Config, kind: TargetKind) -> Result<bool, BuildError> {
    let output_root = &config.target(kind).output_root;

    let protected = std::iter::once(config.root.clone()).chain(
        config
            .categories()
            .flat_map(|c| c.sources.bases().map(|b| config.root.join(b)).collect::<Vec<_>>()),
    );
    for path in protected {
        if path.starts_with(output_root) {
            return Err(BuildError::UnsafeClean(output_root.clone()));
        }
    }

    match fs::remove_dir_all(output_root) {
        Ok(()) => {
            tracing::info!("Removed {}", output_root.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildError::Clean {
            path: output_root.clone(),
            message: e.to_string(),
        }),
    }
}
