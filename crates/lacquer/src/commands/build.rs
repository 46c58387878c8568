//! One-shot build command.

use anyhow::Result;
use lacquer_pipeline::{Category, Config, TargetKind};

use crate::tasks::build_task_name;

/// Build one category, or all of them, into a target.
pub async fn run(config: Config, kind: TargetKind, category: Option<Category>) -> Result<()> {
    let categories = match category {
        Some(category) => vec![category],
        None => Category::ALL.to_vec(),
    };

    tracing::info!(
        "Building {} categories into {}",
        categories.len(),
        config.target(kind).output_root.display()
    );

    let names: Vec<String> = categories
        .into_iter()
        .map(|c| build_task_name(c, kind))
        .collect();

    super::run::run(config, &names).await
}
