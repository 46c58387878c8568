//! Watch mode: routes file changes to per-category rebuilds.
//!
//! Each category owns a mailbox holding a change counter. A worker waits for
//! the counter to move, lets it settle for the debounce window, then runs
//! one build. Changes arriving during a build collapse into a single
//! follow-up build, and builds of one category never overlap.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lacquer_pipeline::paths::relative_to;
use lacquer_pipeline::{BuildStep, Category, Config, ReloadSignal, TargetKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::server::ServerError;
use crate::watcher::FileWatcher;

/// Pending-change mailbox for one category.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: watch::Sender<u64>,
}

impl Mailbox {
    /// Record a change. Never blocks; repeated calls before the worker wakes
    /// count as one.
    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

/// Spawn the worker for one mailbox.
///
/// The worker exits once every clone of the returned mailbox is dropped.
pub fn spawn_worker<F, Fut>(debounce: Duration, mut build: F) -> (Mailbox, JoinHandle<()>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, mut rx) = watch::channel(0u64);

    let handle = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            loop {
                tokio::time::sleep(debounce).await;
                match rx.has_changed() {
                    Ok(true) => {
                        rx.borrow_and_update();
                    }
                    _ => break,
                }
            }
            build().await;
        }
    });

    (Mailbox { tx }, handle)
}

/// Categories a changed path belongs to.
pub fn route(config: &Config, root: &Path, path: &Path) -> Vec<Category> {
    let Some(relative) = relative_to(root, path) else {
        return Vec::new();
    };
    config
        .categories()
        .filter(|c| c.is_affected_by(&relative))
        .map(|c| c.category)
        .collect()
}

/// Lifecycle of the watch controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Watching,
}

/// Watches the source tree and rebuilds affected categories into the dev
/// target.
pub struct WatchController {
    step: Arc<BuildStep>,
    reload: Option<Arc<dyn ReloadSignal>>,
    state: WatchState,
}

impl WatchController {
    pub fn new(step: Arc<BuildStep>, reload: Option<Arc<dyn ReloadSignal>>) -> Self {
        Self {
            step,
            reload,
            state: WatchState::Idle,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Directories to watch: every glob base of every category.
    pub fn watch_dirs(config: &Config, root: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = config
            .categories()
            .flat_map(|c| c.sources.bases().chain(c.watch.bases()))
            .map(|base| root.join(base))
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    /// Start one worker per category.
    pub fn spawn_workers(&self) -> HashMap<Category, Mailbox> {
        let debounce = self.step.config().debounce;

        Category::ALL
            .iter()
            .map(|&category| {
                let step = Arc::clone(&self.step);
                let reload = self.reload.clone();
                let (mailbox, _) = spawn_worker(debounce, move || {
                    rebuild(Arc::clone(&step), reload.clone(), category)
                });
                (category, mailbox)
            })
            .collect()
    }

    /// Watch until the watcher stops delivering events.
    ///
    /// Build failures are logged; watching continues.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let config = Arc::clone(self.step.config());
        let root = config
            .root
            .canonicalize()
            .map_err(|e| ServerError::WatchError(format!("{}: {}", config.root.display(), e)))?;

        let mailboxes = self.spawn_workers();
        let dirs = Self::watch_dirs(&config, &root);
        let (watcher, mut rx) =
            FileWatcher::new(&dirs).map_err(|e| ServerError::WatchError(e.to_string()))?;

        self.state = WatchState::Watching;
        for dir in watcher.watched() {
            tracing::info!("Watching {}", dir.display());
        }

        while let Some(event) = rx.recv().await {
            for category in route(&config, &root, &event.path) {
                tracing::debug!("{} changed ({:?})", event.path.display(), event.kind);
                if let Some(mailbox) = mailboxes.get(&category) {
                    mailbox.notify();
                }
            }
        }

        drop(watcher);
        self.state = WatchState::Idle;
        Ok(())
    }
}

async fn rebuild(step: Arc<BuildStep>, reload: Option<Arc<dyn ReloadSignal>>, category: Category) {
    let result = tokio::task::spawn_blocking(move || {
        step.run(category, TargetKind::Dev, reload.as_deref())
    })
    .await;

    match result {
        Ok(Ok(report)) => {
            for failed in &report.failed {
                tracing::debug!("{} left unbuilt", failed.source.display());
            }
        }
        Ok(Err(e)) => tracing::error!("{} rebuild failed: {}", category, e),
        Err(e) => tracing::error!("{} rebuild panicked: {}", category, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn counting_worker(debounce: Duration, work: Duration) -> (Mailbox, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let (mailbox, _) = spawn_worker(debounce, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(work).await;
            }
        });
        (mailbox, builds)
    }

    #[tokio::test]
    async fn rapid_changes_build_once() {
        let (mailbox, builds) = counting_worker(Duration::from_millis(50), Duration::ZERO);

        mailbox.notify();
        mailbox.notify();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changes_during_build_coalesce_into_one_more() {
        let (mailbox, builds) =
            counting_worker(Duration::from_millis(20), Duration::from_millis(200));

        mailbox.notify();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        // Build in progress
        mailbox.notify();
        mailbox.notify();
        mailbox.notify();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn worker_exits_when_mailbox_dropped() {
        let (mailbox, handle) = spawn_worker(Duration::from_millis(10), || async {});
        drop(mailbox);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }

    #[test]
    fn routes_changes_to_their_category() {
        let config = Config::defaults(Path::new("/site")).unwrap();
        let root = Path::new("/site");

        assert_eq!(
            route(&config, root, Path::new("/site/source/js/app.js")),
            vec![Category::Js]
        );
        assert_eq!(
            route(&config, root, Path::new("/site/source/scss/_vars.scss")),
            vec![Category::Scss]
        );
        assert_eq!(
            route(&config, root, Path::new("/site/source/partials/header.htm")),
            vec![Category::Html]
        );
        assert!(route(&config, root, Path::new("/site/theme/js/app.js")).is_empty());
        assert!(route(&config, root, Path::new("/elsewhere/app.js")).is_empty());
    }

    #[test]
    fn watches_every_glob_base() {
        let config = Config::defaults(Path::new("/site")).unwrap();
        let dirs = WatchController::watch_dirs(&config, Path::new("/site"));

        assert!(dirs.contains(&PathBuf::from("/site/source")));
        assert!(dirs.contains(&PathBuf::from("/site/source/scss")));
        assert!(dirs.contains(&PathBuf::from("/site/source/partials")));
    }

    struct Recorder(std::sync::Mutex<Vec<Category>>);

    impl ReloadSignal for Recorder {
        fn assets_changed(&self, category: Category, _paths: &[PathBuf]) {
            self.0.lock().unwrap().push(category);
        }
    }

    #[tokio::test]
    async fn watching_rebuilds_changed_category_once() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("source/js")).unwrap();
        fs::create_dir_all(root.join("source/scss")).unwrap();
        fs::write(root.join("source/scss/style.scss"), ".a { color: red; }").unwrap();
        fs::write(
            root.join("lacquer.toml"),
            "[watch]\ndebounce_ms = 150\n",
        )
        .unwrap();

        let config = Arc::new(Config::load(&root.join("lacquer.toml")).unwrap());
        let recorder = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        let reload: Arc<dyn ReloadSignal> = recorder.clone();
        let controller = WatchController::new(Arc::new(BuildStep::new(config)), Some(reload));
        let handle = tokio::spawn(controller.run());

        // Give the watcher time to register
        tokio::time::sleep(Duration::from_millis(300)).await;

        fs::write(root.join("source/js/app.js"), "let v = 1;\n").unwrap();
        fs::write(root.join("source/js/app.js"), "let v = 2;\n").unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.abort();

        assert_eq!(*recorder.0.lock().unwrap(), vec![Category::Js]);
        assert_eq!(
            fs::read_to_string(root.join("theme/js/app.js")).unwrap(),
            "let v = 2;\n"
        );
        assert!(!root.join("theme/css").exists());
    }

    #[tokio::test]
    async fn script_change_rebuilds_only_scripts() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("source/js")).unwrap();
        fs::create_dir_all(root.join("source/scss")).unwrap();
        fs::write(root.join("source/js/app.js"), "let a = 1;\n").unwrap();
        fs::write(root.join("source/scss/style.scss"), ".a { color: red; }").unwrap();
        fs::write(
            root.join("lacquer.toml"),
            "[watch]\ndebounce_ms = 20\n",
        )
        .unwrap();

        let config = Arc::new(Config::load(&root.join("lacquer.toml")).unwrap());
        let recorder = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        let reload: Arc<dyn ReloadSignal> = recorder.clone();
        let controller = WatchController::new(Arc::new(BuildStep::new(config)), Some(reload));
        assert_eq!(controller.state(), WatchState::Idle);

        let mailboxes = controller.spawn_workers();
        mailboxes[&Category::Js].notify();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(root.join("theme/js/app.js").exists());
        assert!(!root.join("theme/css").exists());
        assert_eq!(*recorder.0.lock().unwrap(), vec![Category::Js]);
    }
}
