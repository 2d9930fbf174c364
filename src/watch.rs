//! Watch mode binds glob patterns to tasks and re-runs them on change.
//!
//! 1. **File watcher**: `notify` with a 250ms debouncer monitors the static
//!    root of every bound glob, collapsed to the minimal set of recursive
//!    watches.
//! 2. **Dispatch**: each debounced batch of paths is matched against the
//!    bindings and triggers every matched task once.
//! 3. **Workers**: every bound task owns a worker with a single pending slot.
//!    A trigger that arrives while the task runs fills the slot, further
//!    triggers merge into it, so runs of the same task never overlap.
//!
//! After a clean run the worker pushes a reload through [`LiveReload`];
//! degraded and failed runs are reported and the session keeps going.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc;

use crate::engine::{Status, TaskGraph};
use crate::error::WatchError;
use crate::live::{LiveReload, ReloadEvent};

/// What a successful run pushes to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    /// Reload the page.
    Full,
    /// Refresh stylesheets without a reload.
    Style,
}

/// A glob pattern bound to the task it triggers.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pub root: Utf8PathBuf,
    pub pattern: Pattern,
    pub task: Arc<str>,
    pub reload: ReloadKind,
}

/// Outcome of a single watch-triggered run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchReport {
    Completed { task: Arc<str> },
    Degraded { task: Arc<str> },
    Failed { task: Arc<str>, error: String },
}

impl WatchReport {
    pub fn task(&self) -> &str {
        match self {
            WatchReport::Completed { task }
            | WatchReport::Degraded { task }
            | WatchReport::Failed { task, .. } => task,
        }
    }
}

pub struct Watcher {
    graph: TaskGraph,
    root: Utf8PathBuf,
    bindings: Vec<WatchBinding>,
    live: Option<LiveReload>,
}

impl Watcher {
    /// Globs are resolved against `root`.
    pub fn new(graph: TaskGraph, root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            graph,
            root: root.into(),
            bindings: Vec::new(),
            live: None,
        }
    }

    pub fn live_reload(mut self, live: LiveReload) -> Self {
        self.live = Some(live);
        self
    }

    /// Bind `glob` to `task`. The static part of the glob has to exist.
    pub fn bind(&mut self, glob: &str, task: &str, reload: ReloadKind) -> Result<&mut Self, WatchError> {
        if !self.graph.contains(task) {
            return Err(WatchError::UnknownTask(task.to_string()));
        }

        let full = crate::collect::resolve(&self.root, glob);
        let (root, pattern) =
            resolve_watch_path(&full).map_err(|e| WatchError::Resolve(glob.to_string(), e))?;

        self.bindings.push(WatchBinding {
            root,
            pattern,
            task: Arc::from(task),
            reload,
        });

        Ok(self)
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// Spawn one worker per bound task. Has to be called inside a tokio
    /// runtime.
    pub fn session(self) -> WatchSession {
        let (tx_report, reports) = mpsc::unbounded_channel();
        let mut workers = HashMap::new();

        for binding in &self.bindings {
            if workers.contains_key(&binding.task) {
                continue;
            }

            // a task bound both ways falls back to a full reload
            let reload = match self
                .bindings
                .iter()
                .filter(|other| other.task == binding.task)
                .all(|other| other.reload == ReloadKind::Style)
            {
                true => ReloadKind::Style,
                false => ReloadKind::Full,
            };

            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(worker(
                self.graph.clone(),
                binding.task.clone(),
                reload,
                self.live.clone(),
                self.root.clone(),
                rx,
                tx_report.clone(),
            ));

            workers.insert(binding.task.clone(), tx);
        }

        WatchSession {
            bindings: self.bindings,
            workers,
            reports,
        }
    }

    /// Watch the filesystem and dispatch change batches until the event
    /// source goes away.
    pub async fn run(self) -> Result<(), WatchError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(Duration::from_millis(250), None, move |result: DebounceEventResult| {
            let _ = tx.send(result);
        })?;

        let watched = self.bindings.iter().map(|b| b.root.clone()).collect();

        // Collapse watched paths to reduce the number of watches
        for path in collapse_watch_paths(watched) {
            tracing::info!("watching {}", path);
            debouncer.watch(path.as_std_path(), RecursiveMode::Recursive)?;
        }

        let mut session = self.session();

        loop {
            tokio::select! {
                Some(result) = rx.recv() => match result {
                    Ok(events) => {
                        let paths: Vec<Utf8PathBuf> = events
                            .iter()
                            .flat_map(|de| de.event.paths.iter())
                            .filter_map(|path| Utf8PathBuf::from_path_buf(path.clone()).ok())
                            .collect();

                        session.dispatch(&paths);
                    }
                    Err(errors) => {
                        for e in errors {
                            tracing::error!("watch error: {e}");
                        }
                    }
                },
                Some(report) = session.next_report() => {
                    tracing::debug!("{report:?}");
                }
                else => break,
            }
        }

        Ok(())
    }
}

/// Running workers, fed by [`WatchSession::dispatch`].
pub struct WatchSession {
    bindings: Vec<WatchBinding>,
    workers: HashMap<Arc<str>, mpsc::Sender<Utf8PathBuf>>,
    reports: mpsc::UnboundedReceiver<WatchReport>,
}

impl WatchSession {
    /// Trigger every task with a binding that matches at least one of
    /// `paths`. Returns the tasks that were queued; a task whose pending slot
    /// is already full is not counted.
    pub fn dispatch(&self, paths: &[Utf8PathBuf]) -> Vec<Arc<str>> {
        let mut matched: Vec<(&Arc<str>, &Utf8PathBuf)> = Vec::new();

        for binding in &self.bindings {
            if matched.iter().any(|(task, _)| **task == binding.task) {
                continue;
            }

            if let Some(path) = paths
                .iter()
                .find(|path| binding.pattern.matches_path(path.as_std_path()))
            {
                matched.push((&binding.task, path));
            }
        }

        let mut queued = Vec::new();
        for (task, path) in matched {
            let Some(worker) = self.workers.get(task) else {
                continue;
            };

            match worker.try_send(path.clone()) {
                Ok(()) => queued.push(task.clone()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!("'{task}' already queued");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::error!("worker for '{task}' has stopped");
                }
            }
        }

        queued
    }

    pub async fn next_report(&mut self) -> Option<WatchReport> {
        self.reports.recv().await
    }
}

async fn worker(
    graph: TaskGraph,
    task: Arc<str>,
    reload: ReloadKind,
    live: Option<LiveReload>,
    root: Utf8PathBuf,
    mut rx: mpsc::Receiver<Utf8PathBuf>,
    reports: mpsc::UnboundedSender<WatchReport>,
) {
    while let Some(path) = rx.recv().await {
        tracing::info!("change detected in {path}, re-running '{task}'");

        let report = match graph.run(&task).await {
            Ok(Status::Done) => {
                if let Some(live) = &live {
                    live.notify(match reload {
                        ReloadKind::Full => ReloadEvent::Reload,
                        ReloadKind::Style => ReloadEvent::Style {
                            path: relative(&root, &path).to_string(),
                        },
                    });
                }
                WatchReport::Completed { task: task.clone() }
            }
            Ok(Status::Degraded) => {
                tracing::warn!("'{task}' finished with errors, no reload sent");
                WatchReport::Degraded { task: task.clone() }
            }
            Err(e) => {
                tracing::error!("{e}");
                WatchReport::Failed {
                    task: task.clone(),
                    error: e.to_string(),
                }
            }
        };

        if reports.send(report).is_err() {
            tracing::debug!("watch session closed");
        }
    }
}

fn relative<'a>(root: &Utf8Path, path: &'a Utf8Path) -> &'a Utf8Path {
    root.canonicalize_utf8()
        .ok()
        .and_then(|root| path.strip_prefix(root).ok())
        .unwrap_or(path)
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
pub fn resolve_watch_path(glob_str: impl AsRef<str>) -> anyhow::Result<(Utf8PathBuf, Pattern)> {
    let path = Utf8Path::new(glob_str.as_ref());

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    let absolute_root = root_part.canonicalize_utf8()?;

    // A concrete file is watched through its parent so atomic writes
    // (write to temp, rename over) are still seen.
    let (watch_root, match_pattern) = if suffix_part.as_str().is_empty() && absolute_root.is_file() {
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        (parent, absolute_root)
    } else {
        let pattern = absolute_root.join(&suffix_part);
        (absolute_root, pattern)
    };

    let pattern = Pattern::new(match_pattern.as_str())?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::timeout;

    use super::*;
    use crate::engine::{Blueprint, TaskContext};
    use crate::error::TaskError;

    fn cwd() -> Utf8PathBuf {
        Utf8PathBuf::try_from(std::env::current_dir().unwrap()).unwrap()
    }

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().canonicalize().unwrap()).unwrap();
        fs::create_dir_all(root.join("src/scss")).unwrap();
        fs::create_dir_all(root.join("src/js")).unwrap();
        (dir, root)
    }

    fn counting(runs: &Arc<AtomicUsize>, status: Status) -> impl Fn(TaskContext) -> crate::engine::TaskFuture + Send + Sync + 'static {
        let runs = runs.clone();
        move |_: TaskContext| -> crate::engine::TaskFuture {
            let runs = runs.clone();
            Box::pin(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(status)
            })
        }
    }

    #[test]
    fn concrete_file() {
        let (watch, pattern) = resolve_watch_path("Cargo.toml").unwrap();

        assert_eq!(watch, cwd());
        assert_eq!(pattern.as_str(), cwd().join("Cargo.toml"));
    }

    #[test]
    fn concrete_directory() {
        let (watch, pattern) = resolve_watch_path("src").unwrap();

        assert_eq!(watch, cwd().join("src"));
        assert_eq!(pattern.as_str(), cwd().join("src"));
    }

    #[test]
    fn directory_wildcard() {
        let (watch, pattern) = resolve_watch_path("src/**/*.rs").unwrap();

        assert_eq!(watch, cwd().join("src"));
        assert_eq!(pattern.as_str(), cwd().join("src/**/*.rs"));
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(resolve_watch_path("does-not-exist/**/*.scss").is_err());
    }

    #[test]
    fn collapse_nested_paths() {
        let paths = ["/a", "/a/b", "/a/b/c", "/b", "/c/d"]
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect();

        assert_eq!(collapse_watch_paths(paths), ["/a", "/b", "/c/d"]);
    }

    #[test]
    fn collapse_keeps_siblings_and_similar_names() {
        let paths = ["/a/x", "/a/y", "/foo", "/foo-bar"]
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect();

        assert_eq!(collapse_watch_paths(paths), ["/a/x", "/a/y", "/foo", "/foo-bar"]);
    }

    #[tokio::test]
    async fn change_runs_task_once_and_reloads_once() {
        let (_dir, root) = project();
        let runs = Arc::new(AtomicUsize::new(0));

        let mut bp = Blueprint::new();
        bp.register("style", &[], counting(&runs, Status::Done)).unwrap();
        bp.register("js", &[], counting(&Arc::default(), Status::Done)).unwrap();
        let graph = bp.finish().unwrap();

        let live = LiveReload::new();
        let mut events = live.subscribe();

        let mut watcher = Watcher::new(graph, &root).live_reload(live);
        watcher.bind("src/scss/**/*.scss", "style", ReloadKind::Style).unwrap();
        watcher.bind("src/js/**/*.js", "js", ReloadKind::Full).unwrap();
        let mut session = watcher.session();

        let queued = session.dispatch(&[root.join("src/scss/a.scss"), root.join("src/scss/b.scss")]);
        assert_eq!(queued, [Arc::<str>::from("style")]);

        let report = session.next_report().await.unwrap();
        assert_eq!(report, WatchReport::Completed { task: "style".into() });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert_eq!(
            events.try_recv().unwrap(),
            ReloadEvent::Style {
                path: "src/scss/a.scss".into()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_change_reaches_bound_task() {
        let (_dir, root) = project();
        let runs = Arc::new(AtomicUsize::new(0));

        let mut bp = Blueprint::new();
        bp.register("js", &[], counting(&runs, Status::Done)).unwrap();

        let live = LiveReload::new();
        let mut events = live.subscribe();

        let mut watcher = Watcher::new(bp.finish().unwrap(), &root).live_reload(live);
        watcher.bind("src/js/**/*.js", "js", ReloadKind::Full).unwrap();
        let running = tokio::spawn(watcher.run());

        // watches are registered in the background, keep touching until seen
        let event = timeout(Duration::from_secs(15), async {
            let mut tick = 0;
            loop {
                tick += 1;
                fs::write(root.join("src/js/index.js"), format!("run({tick});")).unwrap();
                if let Ok(event) = timeout(Duration::from_millis(750), events.recv()).await {
                    break event.unwrap();
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(event, ReloadEvent::Reload);
        assert!(runs.load(Ordering::SeqCst) >= 1);
        assert!(!running.is_finished());
        running.abort();
    }

    #[tokio::test]
    async fn unmatched_paths_trigger_nothing() {
        let (_dir, root) = project();
        let mut bp = Blueprint::new();
        bp.register("style", &[], counting(&Arc::default(), Status::Done)).unwrap();

        let mut watcher = Watcher::new(bp.finish().unwrap(), &root);
        watcher.bind("src/scss/**/*.scss", "style", ReloadKind::Style).unwrap();
        let session = watcher.session();

        assert!(session.dispatch(&[root.join("src/js/a.js"), root.join("README.md")]).is_empty());
    }

    #[tokio::test]
    async fn degraded_run_reports_without_reload() {
        let (_dir, root) = project();
        let mut bp = Blueprint::new();
        bp.register("style", &[], counting(&Arc::default(), Status::Degraded)).unwrap();

        let live = LiveReload::new();
        let mut events = live.subscribe();

        let mut watcher = Watcher::new(bp.finish().unwrap(), &root).live_reload(live);
        watcher.bind("src/scss/**/*.scss", "style", ReloadKind::Style).unwrap();
        let mut session = watcher.session();

        session.dispatch(&[root.join("src/scss/main.scss")]);

        assert_eq!(
            session.next_report().await.unwrap(),
            WatchReport::Degraded { task: "style".into() }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_run_keeps_session_alive() {
        let (_dir, root) = project();
        let mut bp = Blueprint::new();
        bp.register("js", &[], |_| async { Err(TaskError::Other(anyhow::anyhow!("syntax error"))) })
            .unwrap();

        let live = LiveReload::new();
        let mut events = live.subscribe();

        let mut watcher = Watcher::new(bp.finish().unwrap(), &root).live_reload(live);
        watcher.bind("src/js/**/*.js", "js", ReloadKind::Full).unwrap();
        let mut session = watcher.session();

        for _ in 0..2 {
            session.dispatch(&[root.join("src/js/index.js")]);
            let report = session.next_report().await.unwrap();
            assert!(matches!(report, WatchReport::Failed { ref error, .. } if error.contains("syntax error")));
        }

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_task_runs_never_overlap() {
        let (_dir, root) = project();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(Mutex::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut bp = Blueprint::new();
        {
            let (active, peak, runs) = (active.clone(), peak.clone(), runs.clone());
            bp.register("style", &[], move |_| {
                let (active, peak, runs) = (active.clone(), peak.clone(), runs.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    {
                        let mut peak = peak.lock().unwrap();
                        *peak = (*peak).max(now);
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    runs.fetch_add(1, Ordering::SeqCst);
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(Status::Done)
                }
            })
            .unwrap();
        }

        let mut watcher = Watcher::new(bp.finish().unwrap(), &root);
        watcher.bind("src/scss/**/*.scss", "style", ReloadKind::Style).unwrap();
        let mut session = watcher.session();
        let change = [root.join("src/scss/main.scss")];

        assert_eq!(session.dispatch(&change).len(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;

        // one fills the pending slot, the rest merge into it
        assert_eq!(session.dispatch(&change).len(), 1);
        assert!(session.dispatch(&change).is_empty());
        assert!(session.dispatch(&change).is_empty());

        for _ in 0..2 {
            let report = timeout(Duration::from_secs(5), session.next_report()).await.unwrap();
            assert!(matches!(report, Some(WatchReport::Completed { .. })));
        }

        assert!(timeout(Duration::from_millis(300), session.next_report()).await.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(*peak.lock().unwrap(), 1);
    }

    #[test]
    fn binding_unknown_task_fails() {
        let (_dir, root) = project();
        let mut watcher = Watcher::new(Blueprint::new().finish().unwrap(), &root);

        assert!(matches!(
            watcher.bind("src/scss/**/*.scss", "ghost", ReloadKind::Full),
            Err(WatchError::UnknownTask(_))
        ));
    }

    #[test]
    fn malformed_glob_fails_to_resolve() {
        let (_dir, root) = project();

        let mut bp = Blueprint::new();
        bp.register("style", &[], |_| async { Ok::<_, TaskError>(Status::Done) }).unwrap();
        let mut watcher = Watcher::new(bp.finish().unwrap(), &root);

        assert!(matches!(
            watcher.bind("src/scss/[*.scss", "style", ReloadKind::Full),
            Err(WatchError::Resolve(..))
        ));
    }
}
