//! Application wiring: filesystem host, search engine and console output
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::dispatch::{self, DispatchQueue, EventHandler};
use crate::engine::{EngineSettings, SearchEngine};
use crate::error::{LocatorError, Result};
use crate::fs_host::{FsImageFactory, FsProject, FsWorkspace};
use crate::host::{ItemId, ProjectHierarchy, ProjectId};
use crate::interactive;
use crate::metrics::Metrics;
use crate::report::{ConsoleReporter, SearchSummary};
use clap::CommandFactory;
use log::{info, warn};
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns the engine and the caller side of its event queue. Must stay on the
/// thread that created it.
pub struct LocatorApp {
    config: Config,
    engine: SearchEngine,
    queue: DispatchQueue,
    workspace: Arc<FsWorkspace>,
    projects: Vec<Arc<FsProject>>,
    next_project: u64,
}

impl LocatorApp {
    pub fn new(config: Config) -> Result<Self> {
        let (dispatcher, queue) = dispatch::channel();
        let workspace = Arc::new(FsWorkspace::new()?);
        let engine = SearchEngine::builder(dispatcher)
            .workspace(workspace.clone())
            .image_factory(Arc::new(FsImageFactory))
            .metrics(Arc::new(Metrics::new()?))
            .settings(EngineSettings::from(&config))
            .build()?;
        engine.start()?;

        Ok(Self {
            config,
            engine,
            queue,
            workspace,
            projects: Vec::new(),
            next_project: 1,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    pub fn workspace(&self) -> &FsWorkspace {
        &self.workspace
    }

    pub fn projects(&self) -> &[Arc<FsProject>] {
        &self.projects
    }

    /// Index `dir` as a new project. Indexing itself happens on the worker.
    pub fn open_project(&mut self, dir: &Path) -> Result<ProjectId> {
        let id = ProjectId(self.next_project);
        self.next_project += 1;

        let project = FsProject::open(id, dir, &self.config.ignore)?;
        info!("Queueing project {}", project.root_path().display());
        self.engine.project_loaded(project.clone());
        self.projects.push(project);
        Ok(id)
    }

    pub fn close_project(&mut self, dir: &Path) -> Result<Option<ProjectId>> {
        let root = fs::canonicalize(dir)?;
        let Some(pos) = self.projects.iter().position(|p| p.root_path() == root) else {
            return Ok(None);
        };
        let project = self.projects.remove(pos);
        self.engine.project_unloaded(project.id());
        Ok(Some(project.id()))
    }

    /// Unload every project, dropping loads that have not run yet.
    pub fn close_all(&mut self) {
        self.engine.solution_closing();
        for project in self.projects.drain(..) {
            self.engine.project_unloaded(project.id());
        }
    }

    fn absolute(path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(env::current_dir()?.join(path))
        }
    }

    /// Project with the deepest root containing `path`.
    fn project_for(&self, path: &Path) -> Option<&Arc<FsProject>> {
        self.projects
            .iter()
            .filter(|p| path.starts_with(p.root_path()))
            .max_by_key(|p| p.root_path().components().count())
    }

    /// Tell the owning project that `path` now exists.
    pub fn add_file(&self, path: &Path) -> Result<ItemId> {
        let path = Self::absolute(path)?;
        let project = self.project_for(&path).ok_or_else(|| {
            LocatorError::Config(format!("{} is not inside an open project", path.display()))
        })?;
        project.add_path(&path)
    }

    /// Tell the owning project that `path` is gone.
    pub fn remove_file(&self, path: &Path) -> Result<Option<ItemId>> {
        let path = Self::absolute(path)?;
        Ok(self
            .project_for(&path)
            .and_then(|project| project.remove_path(&path)))
    }

    /// Make `path` the active document and warm its declarations. Anything
    /// cached for it before is discarded, since the file may have changed.
    pub fn set_active(&self, path: &Path) -> Result<()> {
        self.workspace.set_active(path)?;
        if let Some(active) = self.workspace.active_path() {
            self.engine.invalidate_document(&active);
        }
        self.engine.scan_active_document();
        Ok(())
    }

    /// Pump events until the worker has nothing left to do.
    pub fn settle<H: EventHandler>(&self, handler: &mut H, timeout: Duration) -> bool {
        let idle = self
            .queue
            .pump_until(handler, timeout, |_| self.engine.wait_idle(Duration::ZERO));
        self.queue.pump(handler);
        idle
    }

    /// Run one query to completion, streaming results into `reporter`.
    /// Raising `interrupted` cancels the search.
    pub fn search<W: Write>(
        &self,
        query: &str,
        reporter: &mut ConsoleReporter<W>,
        timeout: Duration,
        interrupted: Option<&AtomicBool>,
    ) -> Result<()> {
        reporter.begin(query);
        self.engine.search(query);

        let finished = self.queue.pump_until(reporter, timeout, |r| {
            if interrupted.is_some_and(|flag| flag.swap(false, Ordering::SeqCst)) {
                info!("Interrupted, canceling search");
                self.engine.cancel_search(false);
            }
            r.is_done()
        });
        if !finished {
            warn!("Search for '{query}' timed out, canceling");
            self.engine.cancel_search(true);
            self.queue
                .pump_until(reporter, DRAIN_TIMEOUT, |r| r.is_done());
        }

        match reporter.take_error() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

fn install_interrupt() -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|e| LocatorError::Other(format!("Failed to install Ctrl-C handler: {e}")))?;
    Ok(interrupted)
}

fn open_all(app: &mut LocatorApp, projects: &[PathBuf], active: Option<&PathBuf>) -> Result<()> {
    for dir in projects {
        app.open_project(dir)?;
    }
    if let Some(path) = active {
        app.set_active(path)?;
    }
    Ok(())
}

/// Execute the parsed command line.
pub fn run(cli: &Cli, config: Config) -> Result<()> {
    let metrics = match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "locator", &mut io::stdout());
            return Ok(());
        }
        Commands::Search {
            query,
            projects,
            active,
            format,
            timeout_ms,
        } => {
            let mut app = LocatorApp::new(config)?;
            open_all(&mut app, projects, active.as_ref())?;

            let display = &app.config().display;
            let mut reporter = ConsoleReporter::stdout(*format)
                .with_progress(display.show_progress)
                .with_summary(display.show_summary);
            let interrupted = install_interrupt()?;
            app.search(
                query,
                &mut reporter,
                Duration::from_millis(*timeout_ms),
                Some(&interrupted),
            )?;
            if let Some(SearchSummary::Failed(reason)) = reporter.summary() {
                return Err(LocatorError::Other(format!("search failed: {reason}")));
            }
            app.engine().metrics()
        }
        Commands::Interactive { projects, active } => {
            let mut app = LocatorApp::new(config)?;
            open_all(&mut app, projects, active.as_ref())?;

            let display = &app.config().display;
            let mut reporter = ConsoleReporter::stdout(Default::default())
                .with_progress(display.show_progress)
                .with_summary(display.show_summary);
            let interrupted = install_interrupt()?;
            interactive::run(
                &mut app,
                io::stdin().lock(),
                &mut reporter,
                &interrupted,
            )?;
            app.engine().metrics()
        }
    };

    if cli.metrics {
        eprintln!("{}", metrics.gather());
    }
    Ok(())
}
