//! Run named tasks.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use lacquer_pipeline::Config;

use crate::tasks::Tasks;

/// Load the project configuration.
pub fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Run the named tasks until they finish or Ctrl-C is pressed.
pub async fn run(config: Config, names: &[String]) -> Result<()> {
    let tasks = Tasks::new(Arc::new(config));
    let graph = tasks.graph(names)?;

    tokio::select! {
        result = lacquer_graph::run(&graph) => {
            let summary = result?;
            tracing::info!(
                "Finished {} tasks in {}ms",
                summary.completed.len(),
                summary.duration.as_millis()
            );
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Stopping...");
        }
    }

    Ok(())
}
