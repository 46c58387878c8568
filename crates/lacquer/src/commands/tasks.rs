//! List the named tasks.

use std::sync::Arc;

use anyhow::Result;
use lacquer_pipeline::Config;

use crate::tasks::Tasks;

pub async fn run(config: Config) -> Result<()> {
    let tasks = Tasks::new(Arc::new(config));

    for name in tasks.names() {
        let graph = tasks.graph(std::slice::from_ref(&name))?;
        let description = graph.task(&name).map(|t| t.description()).unwrap_or("");
        println!("{:<24} {}", name, description);

        if graph.len() > 1 {
            let order = graph.topological_order()?;
            println!("{:<24} runs: {}", "", order.join(" -> "));
        }
    }

    Ok(())
}
