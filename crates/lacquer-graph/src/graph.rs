//! Task graph definition.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

/// Outcome of a single task.
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Boxed future returned by a task action.
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send + 'static>>;

type Action = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// A named unit of work.
#[derive(Clone)]
pub struct Task {
    name: String,
    description: String,
    action: Action,
}

impl Task {
    /// Create a task from an async action.
    ///
    /// The action is invoked once per run; it must produce a fresh future
    /// each time.
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            action: Arc::new(move || Box::pin(action()) as TaskFuture),
        }
    }

    /// Create a task that does nothing. Used for aggregate tasks such as
    /// `default` whose only purpose is to depend on others.
    pub fn group(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, || async { Ok(()) })
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn start(&self) -> TaskFuture {
        (self.action)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Errors raised while defining or running a task graph.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GraphError {
    #[error("Task already defined: {0}")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task cannot depend on itself: {0}")]
    SelfDependency(String),

    #[error("Adding dependency would create a cycle: {0} -> {1}")]
    CycleDetected(String, String),

    #[error("Task '{task}' failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Task panicked: {0}")]
    TaskPanicked(String),
}

/// A directed acyclic graph of named tasks.
///
/// An edge `a -> b` means `a` must complete before `b` starts.
#[derive(Debug, Default)]
pub struct TaskGraph {
    graph: DiGraph<Task, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task.
    pub fn add_task(&mut self, task: Task) -> Result<(), GraphError> {
        if self.index.contains_key(task.name()) {
            return Err(GraphError::DuplicateTask(task.name().to_string()));
        }
        let name = task.name().to_string();
        let idx = self.graph.add_node(task);
        self.index.insert(name, idx);
        Ok(())
    }

    /// Declare that `task` depends on `depends_on`.
    ///
    /// Rejects the edge if it would close a cycle, leaving the graph unchanged.
    pub fn add_dependency(&mut self, task: &str, depends_on: &str) -> Result<(), GraphError> {
        if task == depends_on {
            return Err(GraphError::SelfDependency(task.to_string()));
        }

        let task_idx = self.node(task)?;
        let dep_idx = self.node(depends_on)?;

        // A path task ~> depends_on means the new edge would close a loop.
        if has_path_connecting(&self.graph, task_idx, dep_idx, None) {
            return Err(GraphError::CycleDetected(
                task.to_string(),
                depends_on.to_string(),
            ));
        }

        self.graph.update_edge(dep_idx, task_idx, ());
        Ok(())
    }

    /// Chain tasks so each one depends on the previous.
    pub fn series(&mut self, names: &[&str]) -> Result<(), GraphError> {
        for pair in names.windows(2) {
            self.add_dependency(pair[1], pair[0])?;
        }
        Ok(())
    }

    /// Make every task in `names` depend on `after`.
    pub fn parallel_after(&mut self, after: &str, names: &[&str]) -> Result<(), GraphError> {
        for name in names {
            self.add_dependency(name, after)?;
        }
        Ok(())
    }

    /// Whether a task with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Look up a task by name.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|idx| &self.graph[*idx])
    }

    /// Direct predecessors of a task, sorted by name.
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<&str>, GraphError> {
        let idx = self.node(name)?;
        let mut deps: Vec<&str> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| self.graph[n].name())
            .collect();
        deps.sort_unstable();
        Ok(deps)
    }

    /// Task names in an order where every task follows its dependencies.
    pub fn topological_order(&self) -> Result<Vec<&str>, GraphError> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            let name = self.graph[cycle.node_id()].name().to_string();
            GraphError::CycleDetected(name.clone(), name)
        })?;
        Ok(order.into_iter().map(|idx| self.graph[idx].name()).collect())
    }

    fn node(&self, name: &str) -> Result<NodeIndex, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::TaskNotFound(name.to_string()))
    }

    pub(crate) fn inner(&self) -> &DiGraph<Task, ()> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn graph_with(names: &[&str]) -> TaskGraph {
        let mut graph = TaskGraph::new();
        for name in names {
            graph.add_task(Task::group(*name, "")).unwrap();
        }
        graph
    }

    #[test]
    fn rejects_duplicate_tasks() {
        let mut graph = graph_with(&["clean"]);
        let err = graph.add_task(Task::group("clean", "")).unwrap_err();
        assert_eq!(err, GraphError::DuplicateTask("clean".into()));
    }

    #[test]
    fn rejects_unknown_tasks() {
        let mut graph = graph_with(&["clean"]);
        let err = graph.add_dependency("clean", "html:build").unwrap_err();
        assert_eq!(err, GraphError::TaskNotFound("html:build".into()));
    }

    #[test]
    fn rejects_self_dependency() {
        let mut graph = graph_with(&["clean"]);
        assert_eq!(
            graph.add_dependency("clean", "clean").unwrap_err(),
            GraphError::SelfDependency("clean".into())
        );
    }

    #[test]
    fn rejects_cycles_at_definition_time() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.series(&["a", "b", "c"]).unwrap();

        let err = graph.add_dependency("a", "c").unwrap_err();
        assert_eq!(err, GraphError::CycleDetected("a".into(), "c".into()));

        // The rejected edge is not left behind.
        assert_eq!(graph.dependencies_of("a").unwrap(), Vec::<&str>::new());
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn series_orders_tasks() {
        let mut graph = graph_with(&["others", "html", "clean", "js"]);
        graph.series(&["clean", "html", "js", "others"]).unwrap();

        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["clean", "html", "js", "others"]
        );
        assert_eq!(graph.dependencies_of("js").unwrap(), vec!["html"]);
    }

    #[test]
    fn parallel_after_fans_out() {
        let mut graph = graph_with(&["build", "watch", "serve", "default"]);
        graph.parallel_after("build", &["watch", "serve"]).unwrap();
        graph.add_dependency("default", "watch").unwrap();
        graph.add_dependency("default", "serve").unwrap();

        assert_eq!(graph.dependencies_of("default").unwrap(), vec!["serve", "watch"]);
        assert_eq!(graph.topological_order().unwrap()[0], "build");
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut graph = graph_with(&["a", "b"]);
        graph.add_dependency("b", "a").unwrap();
        graph.add_dependency("b", "a").unwrap();
        assert_eq!(graph.inner().edge_count(), 1);
    }
}
