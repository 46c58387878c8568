//! Remove a target's output tree.

use anyhow::{Context, Result};
use lacquer_pipeline::{Config, TargetKind};

pub async fn run(config: Config, kind: TargetKind) -> Result<()> {
    let root = config.target(kind).output_root.clone();

    let removed = tokio::task::spawn_blocking(move || lacquer_pipeline::clean(&config, kind))
        .await
        .context("Clean task panicked")??;

    if removed {
        tracing::info!("Removed {}", root.display());
    } else {
        tracing::info!("{} does not exist, nothing to clean", root.display());
    }

    Ok(())
}
