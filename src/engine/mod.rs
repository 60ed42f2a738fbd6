//! The search engine: a single background worker fed through a mailbox.
//!
//! All project indexing and searching happens on the worker thread. Callers
//! talk to it through [`SearchEngine`], whose methods only enqueue work and
//! never block (except [`SearchEngine::cancel_search`] with `wait` and
//! [`SearchEngine::stop`]). Results come back through the [`Dispatcher`] the
//! engine was built with, and are handled when the caller pumps its
//! [`DispatchQueue`](crate::dispatch::DispatchQueue).
pub mod events;
mod mailbox;
pub mod search;
mod worker;

pub use events::{
    HeaderColumn, LocatorItem, Progress, SearchError, SearchEvent, SolutionEvent,
    DECLARATION_COLUMNS, FILE_COLUMNS,
};
pub use search::{parse_query, Query};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::decl::{CacheStats, DeclarationCache, DEFAULT_CAPACITY};
use crate::dispatch::Dispatcher;
use crate::error::{LocatorError, Result};
use crate::host::{ActiveDocument, ImageFactory, ProjectHierarchy, ProjectId, Workspace};
use crate::icons::IconCache;
use crate::metrics::Metrics;
use log::{debug, error, info};
use mailbox::Mailbox;
use parking_lot::{Condvar, Mutex};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    /// Waiting for messages.
    Idle,
    /// Handling a message.
    Working,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Matches are delivered once this much time passed since the last batch.
    pub flush_timeout: Duration,
    /// Slice length when the worker waits for the caller to build an image.
    pub handoff_poll: Duration,
    /// Slice length when the caller waits for the worker in `cancel_search`.
    pub cancel_wait_poll: Duration,
    pub cache_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            flush_timeout: Duration::from_millis(300),
            handoff_poll: Duration::from_millis(50),
            cancel_wait_poll: Duration::from_millis(50),
            cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            flush_timeout: Duration::from_millis(config.engine.flush_timeout_ms),
            handoff_poll: Duration::from_millis(config.engine.handoff_poll_ms.max(1)),
            cancel_wait_poll: Duration::from_millis(config.engine.cancel_wait_poll_ms.max(1)),
            cache_capacity: config.cache.capacity,
        }
    }
}

/// Workspace without any open document.
struct NoWorkspace;

impl Workspace for NoWorkspace {
    fn active_document(&self) -> Option<ActiveDocument> {
        None
    }
}

/// State shared between the engine handle and its worker.
pub(crate) struct Shared {
    mailbox: Mailbox,
    state: Mutex<EngineState>,
    state_changed: Condvar,
    /// Root of every worker-side token.
    shutdown: CancellationToken,
    /// Raised while the caller thread blocks on the worker, so handoffs to
    /// that thread give up instead of deadlocking.
    caller_blocked: CancellationToken,
    workspace: Arc<dyn Workspace>,
    dispatcher: Dispatcher,
    icons: Arc<IconCache>,
    cache: DeclarationCache,
    metrics: Arc<Metrics>,
    settings: EngineSettings,
    project_count: AtomicUsize,
}

impl Shared {
    fn set_state(&self, state: EngineState) {
        *self.state.lock() = state;
        self.state_changed.notify_all();
    }

    fn post_search(&self, event: SearchEvent) {
        if let Err(e) = self.dispatcher.post_search(event) {
            debug!("Search event dropped: {e}");
        }
    }

    fn post_solution(&self, event: SolutionEvent) {
        if let Err(e) = self.dispatcher.post_solution(event) {
            debug!("Solution event dropped: {e}");
        }
    }
}

pub struct EngineBuilder {
    dispatcher: Dispatcher,
    workspace: Option<Arc<dyn Workspace>>,
    image_factory: Option<Arc<dyn ImageFactory>>,
    metrics: Option<Arc<Metrics>>,
    settings: EngineSettings,
}

impl EngineBuilder {
    pub fn workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn image_factory(mut self, factory: Arc<dyn ImageFactory>) -> Self {
        self.image_factory = Some(factory);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<SearchEngine> {
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(Metrics::new()?),
        };
        let caller_blocked = CancellationToken::new();
        let icons = Arc::new(IconCache::new(
            self.image_factory,
            self.dispatcher.clone(),
            self.settings.handoff_poll,
            caller_blocked.clone(),
        ));

        let shared = Shared {
            mailbox: Mailbox::new(),
            state: Mutex::new(EngineState::NotStarted),
            state_changed: Condvar::new(),
            shutdown: CancellationToken::new(),
            caller_blocked,
            workspace: self.workspace.unwrap_or_else(|| Arc::new(NoWorkspace)),
            dispatcher: self.dispatcher,
            icons,
            cache: DeclarationCache::new(self.settings.cache_capacity),
            metrics,
            settings: self.settings,
            project_count: AtomicUsize::new(0),
        };

        Ok(SearchEngine {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        })
    }
}

/// Handle to the background indexing and search worker.
///
/// Dropping the engine stops the worker.
pub struct SearchEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SearchEngine {
    /// `dispatcher` must belong to the thread that will pump the events.
    pub fn builder(dispatcher: Dispatcher) -> EngineBuilder {
        EngineBuilder {
            dispatcher,
            workspace: None,
            image_factory: None,
            metrics: None,
            settings: EngineSettings::default(),
        }
    }

    /// Spawn the worker. Messages posted before this call are kept and handled
    /// once it runs. Starting twice is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        match *state {
            EngineState::NotStarted => {}
            EngineState::Terminated => {
                return Err(LocatorError::Other("search engine already stopped".into()))
            }
            EngineState::Idle | EngineState::Working => return Ok(()),
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("locator-worker".into())
            .spawn(move || Worker::new(shared).run())?;
        *self.worker.lock() = Some(handle);
        *state = EngineState::Idle;
        Ok(())
    }

    /// Stop the worker and wait for it to exit. Safe to call repeatedly.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            match *state {
                EngineState::Terminated => return,
                EngineState::NotStarted => {
                    *state = EngineState::Terminated;
                    self.shared.shutdown.cancel();
                    self.shared.state_changed.notify_all();
                    return;
                }
                EngineState::Idle | EngineState::Working => {}
            }
        }

        self.shared.mailbox.post_stop();
        self.shared.caller_blocked.cancel();
        self.shared.shutdown.cancel();

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("Search worker exited with a panic");
            }
        }
        self.shared.set_state(EngineState::Terminated);
        info!("Search engine stopped");
    }

    /// Start searching for `text`, replacing any search that has not started
    /// yet and interrupting the one that is running.
    pub fn search(&self, text: impl Into<String>) {
        self.shared.mailbox.set_search(text.into());
    }

    /// Drop the pending search and interrupt the running one.
    ///
    /// With `wait`, blocks until the worker is no longer busy. Image handoffs
    /// to the caller thread are abandoned meanwhile.
    pub fn cancel_search(&self, wait: bool) {
        self.shared.mailbox.cancel_search();
        if !wait {
            return;
        }

        self.shared.caller_blocked.cancel();
        {
            let mut state = self.shared.state.lock();
            while *state == EngineState::Working {
                self.shared
                    .state_changed
                    .wait_for(&mut state, self.shared.settings.cancel_wait_poll);
            }
        }
        self.shared.caller_blocked.reset();
    }

    pub fn project_loaded(&self, project: Arc<dyn ProjectHierarchy>) {
        debug!("Queueing load of {}", project.id());
        self.shared.mailbox.post_project_loaded(project);
    }

    pub fn project_unloaded(&self, id: ProjectId) {
        self.shared.mailbox.post_project_unloaded(id);
    }

    /// Drop queued project loads, abort the one in progress and tell the
    /// caller the solution is going away. Unloads still run.
    pub fn solution_closing(&self) {
        self.shared.mailbox.purge_loads();
        self.shared.post_solution(SolutionEvent::SolutionUnloading);
    }

    /// Warm the declaration cache for the active document.
    pub fn scan_active_document(&self) {
        self.shared.mailbox.post_scan_document();
    }

    /// Forget cached declarations of `path`. Returns whether any were cached.
    pub fn invalidate_document(&self, path: &Path) -> bool {
        let removed = self.shared.cache.remove(path);
        if removed {
            debug!("Invalidated declarations of {}", path.display());
        }
        removed
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    /// Block until the worker is idle with nothing queued. Returns `false` on
    /// timeout or if the engine is not running.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            match *state {
                EngineState::Idle if self.shared.mailbox.is_empty() => return true,
                EngineState::Terminated => return false,
                _ => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(self.shared.settings.cancel_wait_poll);
            self.shared.state_changed.wait_for(&mut state, slice);
        }
    }

    pub fn project_count(&self) -> usize {
        self.shared.project_count.load(Ordering::SeqCst)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }

    pub fn cached_documents(&self) -> usize {
        self.shared.cache.len()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.shared.metrics)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }
}

impl Drop for SearchEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch;

    #[test]
    fn test_lifecycle_states() {
        let (dispatcher, _queue) = dispatch::channel();
        let engine = SearchEngine::builder(dispatcher).build().unwrap();
        assert_eq!(engine.state(), EngineState::NotStarted);

        engine.start().unwrap();
        assert!(engine.wait_idle(Duration::from_secs(5)));
        assert_eq!(engine.state(), EngineState::Idle);

        engine.stop();
        assert_eq!(engine.state(), EngineState::Terminated);
        engine.stop();
        assert!(engine.start().is_err());
    }

    #[test]
    fn test_stop_before_start() {
        let (dispatcher, _queue) = dispatch::channel();
        let engine = SearchEngine::builder(dispatcher).build().unwrap();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Terminated);
        assert!(!engine.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = Config::default();
        config.engine.flush_timeout_ms = 120;
        config.cache.capacity = 7;
        let settings = EngineSettings::from(&config);
        assert_eq!(settings.flush_timeout, Duration::from_millis(120));
        assert_eq!(settings.cache_capacity, 7);
        assert_eq!(settings.handoff_poll, Duration::from_millis(50));
    }

    #[test]
    fn test_cancel_search_without_worker_returns() {
        let (dispatcher, _queue) = dispatch::channel();
        let engine = SearchEngine::builder(dispatcher).build().unwrap();
        engine.search("pending");
        engine.cancel_search(true);
        assert!(!engine.shared.mailbox.has_pending_search());
    }
}
