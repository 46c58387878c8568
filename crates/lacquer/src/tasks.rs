//! The named tasks and the graphs that run them.

use std::sync::Arc;

use lacquer_graph::{GraphError, Task, TaskGraph};
use lacquer_pipeline::{BuildStep, Category, Config, ReloadSignal, TargetKind};
use lacquer_server::{DevServer, LiveReloadHub, WatchController};

/// Composite task: clean, build everything for dev, then watch and serve.
pub const DEFAULT: &str = "default";

/// Composite task: build everything for production.
pub const NETLIFY: &str = "netlify";

/// Name of a category's build task for a target.
pub fn build_task_name(category: Category, kind: TargetKind) -> String {
    match kind {
        TargetKind::Dev => format!("{}:build", category),
        TargetKind::Production => format!("{}:netlify:build", category),
    }
}

/// A task and the tasks it must wait for.
type Step = (String, Vec<String>);

/// Every named task, wired to one project.
pub struct Tasks {
    config: Arc<Config>,
    step: Arc<BuildStep>,
    hub: LiveReloadHub,
}

impl Tasks {
    pub fn new(config: Arc<Config>) -> Self {
        let hub = LiveReloadHub::new(config.dev.output_root.clone());
        Self {
            step: Arc::new(BuildStep::new(Arc::clone(&config))),
            config,
            hub,
        }
    }

    /// All task names in definition order.
    pub fn names(&self) -> Vec<String> {
        let mut names = vec!["clean".to_string()];
        for kind in [TargetKind::Dev, TargetKind::Production] {
            names.extend(Category::ALL.iter().map(|&c| build_task_name(c, kind)));
        }
        names.extend(["watch", "serve", DEFAULT, NETLIFY].map(String::from));
        names
    }

    /// Graph running the named tasks together.
    ///
    /// Composite tasks bring their ordering with them; separately named
    /// tasks are independent of each other.
    pub fn graph(&self, names: &[String]) -> Result<TaskGraph, GraphError> {
        let mut graph = TaskGraph::new();
        for name in names {
            let steps = self.plan(name)?;
            for (task, _) in &steps {
                if !graph.contains(task) {
                    graph.add_task(self.task(task)?)?;
                }
            }
            for (task, after) in &steps {
                for dependency in after {
                    graph.add_dependency(task, dependency)?;
                }
            }
        }
        Ok(graph)
    }

    fn plan(&self, name: &str) -> Result<Vec<Step>, GraphError> {
        match name {
            DEFAULT => {
                let mut chain = vec!["clean".to_string()];
                chain.extend(Category::ALL.iter().map(|&c| build_task_name(c, TargetKind::Dev)));
                let last = chain.last().cloned().unwrap_or_default();

                let mut steps = series(&chain);
                steps.push(("watch".to_string(), vec![last.clone()]));
                steps.push(("serve".to_string(), vec![last]));
                steps.push((
                    DEFAULT.to_string(),
                    vec!["watch".to_string(), "serve".to_string()],
                ));
                Ok(steps)
            }
            NETLIFY => {
                let chain: Vec<String> = Category::ALL
                    .iter()
                    .map(|&c| build_task_name(c, TargetKind::Production))
                    .collect();
                let last = chain.last().cloned().unwrap_or_default();

                let mut steps = series(&chain);
                steps.push((NETLIFY.to_string(), vec![last]));
                Ok(steps)
            }
            other => {
                // Validates the name
                self.task(other)?;
                Ok(vec![(other.to_string(), Vec::new())])
            }
        }
    }

    fn task(&self, name: &str) -> Result<Task, GraphError> {
        match name {
            "clean" => Ok(self.clean_task()),
            "watch" => Ok(self.watch_task()),
            "serve" => Ok(self.serve_task()),
            DEFAULT => Ok(Task::group(DEFAULT, "Build for dev, then watch and serve")),
            NETLIFY => Ok(Task::group(NETLIFY, "Build everything for production")),
            other => self
                .parse_build_task(other)
                .map(|(category, kind)| self.build_task(category, kind))
                .ok_or_else(|| GraphError::TaskNotFound(other.to_string())),
        }
    }

    fn parse_build_task(&self, name: &str) -> Option<(Category, TargetKind)> {
        Category::ALL.iter().find_map(|&category| {
            [TargetKind::Dev, TargetKind::Production]
                .into_iter()
                .find(|&kind| build_task_name(category, kind) == name)
                .map(|kind| (category, kind))
        })
    }

    fn clean_task(&self) -> Task {
        let config = Arc::clone(&self.config);
        Task::new("clean", "Remove the dev output tree", move || {
            let config = Arc::clone(&config);
            async move {
                tokio::task::spawn_blocking(move || {
                    lacquer_pipeline::clean(&config, TargetKind::Dev)
                })
                .await??;
                Ok(())
            }
        })
    }

    fn build_task(&self, category: Category, kind: TargetKind) -> Task {
        let step = Arc::clone(&self.step);
        let hub = self.hub.clone();
        let description = format!(
            "Build {} into {}",
            category,
            self.config.target(kind).output_root.display()
        );

        Task::new(build_task_name(category, kind), description, move || {
            let step = Arc::clone(&step);
            let hub = hub.clone();
            async move {
                let report =
                    tokio::task::spawn_blocking(move || step.run(category, kind, Some(&hub)))
                        .await??;
                for failed in &report.failed {
                    tracing::debug!("{} left unbuilt", failed.source.display());
                }
                Ok(())
            }
        })
    }

    fn watch_task(&self) -> Task {
        let step = Arc::clone(&self.step);
        let hub = self.hub.clone();
        Task::new("watch", "Rebuild categories as their sources change", move || {
            let reload: Arc<dyn ReloadSignal> = Arc::new(hub.clone());
            let controller = WatchController::new(Arc::clone(&step), Some(reload));
            async move {
                controller.run().await?;
                Ok(())
            }
        })
    }

    fn serve_task(&self) -> Task {
        let config = Arc::clone(&self.config);
        let hub = self.hub.clone();
        Task::new("serve", "Serve the dev output with live reload", move || {
            let server = DevServer::new(
                config.server.clone(),
                config.dev.output_root.clone(),
                hub.clone(),
            );
            async move {
                server.start().await?;
                Ok(())
            }
        })
    }
}

/// Steps running `names` one after another.
fn series(names: &[String]) -> Vec<Step> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let after = if i == 0 {
                Vec::new()
            } else {
                vec![names[i - 1].clone()]
            };
            (name.clone(), after)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn tasks_for(root: &Path) -> Tasks {
        Tasks::new(Arc::new(Config::defaults(root).unwrap()))
    }

    fn project() -> tempfile::TempDir {
        let temp = tempdir().unwrap();
        let root = temp.path();
        for dir in ["partials", "scss", "js", "images", "plugins"] {
            fs::create_dir_all(root.join("source").join(dir)).unwrap();
        }
        fs::write(root.join("source/partials/nav.htm"), "<nav></nav>").unwrap();
        fs::write(
            root.join("source/index.html"),
            "<body>@@include('nav.htm')</body>\n",
        )
        .unwrap();
        fs::write(root.join("source/scss/style.scss"), ".a { color: red; }").unwrap();
        fs::write(root.join("source/js/app.js"), "let a = 1;\n").unwrap();
        fs::write(root.join("source/favicon.ico"), [0u8, 1, 2]).unwrap();
        temp
    }

    #[test]
    fn lists_every_task() {
        let names = tasks_for(Path::new("/site")).names();
        assert_eq!(names.len(), 1 + 6 + 6 + 4);
        assert!(names.contains(&"scss:build".to_string()));
        assert!(names.contains(&"others:netlify:build".to_string()));
    }

    #[test]
    fn default_cleans_builds_then_watches_and_serves() {
        let tasks = tasks_for(Path::new("/site"));
        let graph = tasks.graph(&[DEFAULT.to_string()]).unwrap();

        assert_eq!(
            graph.topological_order().unwrap()[..7],
            [
                "clean",
                "html:build",
                "js:build",
                "scss:build",
                "images:build",
                "plugins:build",
                "others:build"
            ]
        );
        assert_eq!(graph.dependencies_of("watch").unwrap(), vec!["others:build"]);
        assert_eq!(graph.dependencies_of("serve").unwrap(), vec!["others:build"]);
        assert_eq!(graph.dependencies_of(DEFAULT).unwrap(), vec!["serve", "watch"]);
    }

    #[test]
    fn netlify_builds_production_without_clean() {
        let tasks = tasks_for(Path::new("/site"));
        let graph = tasks.graph(&[NETLIFY.to_string()]).unwrap();

        assert_eq!(graph.len(), 7);
        assert!(!graph.contains("clean"));
        assert!(!graph.contains("watch"));
        assert_eq!(
            graph.dependencies_of("scss:netlify:build").unwrap(),
            vec!["js:netlify:build"]
        );
    }

    #[test]
    fn single_task_runs_alone() {
        let tasks = tasks_for(Path::new("/site"));
        let graph = tasks.graph(&["js:build".to_string()]).unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.dependencies_of("js:build").unwrap().is_empty());
    }

    #[test]
    fn unknown_task_is_rejected() {
        let tasks = tasks_for(Path::new("/site"));
        assert_eq!(
            tasks.graph(&["fonts:build".to_string()]).unwrap_err(),
            GraphError::TaskNotFound("fonts:build".to_string())
        );
    }

    #[tokio::test]
    async fn netlify_writes_production_tree() {
        let temp = project();
        let tasks = tasks_for(temp.path());
        let graph = tasks.graph(&[NETLIFY.to_string()]).unwrap();

        let summary = lacquer_graph::run(&graph).await.unwrap();

        assert_eq!(summary.completed.len(), 7);
        let out = temp.path().join("netlify");
        assert_eq!(
            fs::read_to_string(out.join("index.html")).unwrap(),
            "<body><nav></nav></body>\n"
        );
        assert!(out.join("css/style.css").exists());
        assert!(out.join("css/maps/style.css.map").exists());
        assert!(out.join("js/app.js").exists());
        assert!(out.join("favicon.ico").exists());
        assert!(!temp.path().join("theme").exists());
    }

    #[tokio::test]
    async fn missing_sources_fail_the_task() {
        let temp = tempdir().unwrap();
        let tasks = tasks_for(temp.path());
        let graph = tasks.graph(&["js:build".to_string()]).unwrap();

        let err = lacquer_graph::run(&graph).await.unwrap_err();
        assert!(matches!(err, GraphError::TaskFailed { ref task, .. } if task == "js:build"));
    }
}
