//! Dependency-ordered task execution.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;
use petgraph::Direction;
use tokio::task::JoinSet;

use crate::graph::{GraphError, TaskGraph, TaskResult};

/// Result of running a whole graph.
#[derive(Debug)]
pub struct RunSummary {
    /// Task names in completion order
    pub completed: Vec<String>,

    /// Wall clock time for the run
    pub duration: Duration,
}

/// Run every task in the graph.
///
/// A task starts as soon as all of its predecessors have finished, so
/// independent tasks overlap. The first failure aborts whatever is still
/// running and is returned; tasks that depend on it never start.
pub async fn run(graph: &TaskGraph) -> Result<RunSummary, GraphError> {
    let start = Instant::now();
    let inner = graph.inner();

    let mut pending: HashMap<NodeIndex, usize> = inner
        .node_indices()
        .map(|idx| (idx, inner.neighbors_directed(idx, Direction::Incoming).count()))
        .collect();

    let mut running: JoinSet<(NodeIndex, TaskResult)> = JoinSet::new();
    let mut completed = Vec::with_capacity(inner.node_count());

    let ready: Vec<NodeIndex> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| *idx)
        .collect();
    for idx in ready {
        spawn(graph, idx, &mut running);
    }

    while let Some(joined) = running.join_next().await {
        let (idx, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                running.abort_all();
                return Err(GraphError::TaskPanicked(e.to_string()));
            }
        };

        let name = inner[idx].name().to_string();
        if let Err(e) = result {
            running.abort_all();
            tracing::error!("'{}' errored: {}", name, e);
            return Err(GraphError::TaskFailed {
                task: name,
                message: e.to_string(),
            });
        }
        completed.push(name);

        for next in inner.neighbors_directed(idx, Direction::Outgoing) {
            if let Some(count) = pending.get_mut(&next) {
                *count -= 1;
                if *count == 0 {
                    spawn(graph, next, &mut running);
                }
            }
        }
    }

    Ok(RunSummary {
        completed,
        duration: start.elapsed(),
    })
}

fn spawn(graph: &TaskGraph, idx: NodeIndex, running: &mut JoinSet<(NodeIndex, TaskResult)>) {
    let task = &graph.inner()[idx];
    let name = task.name().to_string();
    let fut = task.start();

    running.spawn(async move {
        tracing::info!("Starting '{}'...", name);
        let started = Instant::now();
        let result = fut.await;
        if result.is_ok() {
            tracing::info!(
                "Finished '{}' after {}ms",
                name,
                started.elapsed().as_millis()
            );
        }
        (idx, result)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Task;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Barrier;

    fn recording(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Task {
        let log = Arc::clone(log);
        Task::new(name, "", move || {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn runs_series_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = TaskGraph::new();
        for name in ["clean", "html:build", "js:build", "scss:build"] {
            graph.add_task(recording(name, &log)).unwrap();
        }
        graph
            .series(&["clean", "html:build", "js:build", "scss:build"])
            .unwrap();

        let summary = run(&graph).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["clean", "html:build", "js:build", "scss:build"]
        );
        assert_eq!(summary.completed.len(), 4);
    }

    #[tokio::test]
    async fn independent_tasks_overlap() {
        // Both tasks wait on the same barrier: they only finish if they run
        // at the same time.
        let barrier = Arc::new(Barrier::new(2));
        let mut graph = TaskGraph::new();
        graph.add_task(Task::group("build", "")).unwrap();
        for name in ["watch", "serve"] {
            let barrier = Arc::clone(&barrier);
            graph
                .add_task(Task::new(name, "", move || {
                    let barrier = Arc::clone(&barrier);
                    async move {
                        barrier.wait().await;
                        Ok(())
                    }
                }))
                .unwrap();
        }
        graph.parallel_after("build", &["watch", "serve"]).unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(5), run(&graph))
            .await
            .expect("tasks did not run concurrently")
            .unwrap();

        assert_eq!(summary.completed[0], "build");
        assert_eq!(summary.completed.len(), 3);
    }

    #[tokio::test]
    async fn failure_stops_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = TaskGraph::new();
        graph.add_task(recording("clean", &log)).unwrap();
        graph
            .add_task(Task::new("scss:build", "", || async {
                Err("source directory missing".into())
            }))
            .unwrap();
        graph.add_task(recording("images:build", &log)).unwrap();
        graph
            .series(&["clean", "scss:build", "images:build"])
            .unwrap();

        let err = run(&graph).await.unwrap_err();

        assert_eq!(
            err,
            GraphError::TaskFailed {
                task: "scss:build".into(),
                message: "source directory missing".into(),
            }
        );
        assert_eq!(*log.lock().unwrap(), vec!["clean"]);
    }

    #[tokio::test]
    async fn graph_can_run_twice() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = TaskGraph::new();
        graph.add_task(recording("js:build", &log)).unwrap();

        run(&graph).await.unwrap();
        run(&graph).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["js:build", "js:build"]);
    }

    #[tokio::test]
    async fn empty_graph_completes() {
        let summary = run(&TaskGraph::new()).await.unwrap();
        assert!(summary.completed.is_empty());
    }
}
