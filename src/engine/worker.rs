//! The background thread: drains the mailbox and owns the project set
use super::events::{SearchEvent, SolutionEvent};
use super::mailbox::Message;
use super::search::{self, Outcome, SearchContext};
use super::{EngineState, Shared};
use crate::cancel::CancellationToken;
use crate::decl::DeclarationExtractor;
use crate::host::{ProjectHierarchy, ProjectId};
use crate::project::ProjectIndex;
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(super) struct Worker {
    shared: Arc<Shared>,
    /// Indexed projects in load order.
    projects: Vec<Arc<ProjectIndex>>,
}

impl Worker {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            projects: Vec::new(),
        }
    }

    pub fn run(mut self) {
        info!("Search worker started");

        loop {
            let Some(message) = self.next() else {
                self.shared.mailbox.wait_ready();
                continue;
            };
            if matches!(message, Message::Stop) {
                break;
            }

            let handled = panic::catch_unwind(AssertUnwindSafe(|| self.handle(message)));
            if handled.is_err() {
                error!("Worker handler panicked, continuing with the next message");
                self.shared.mailbox.finish_search();
                self.shared.mailbox.end_load();
            }
        }

        for project in self.projects.drain(..) {
            project.dispose();
        }
        self.shared.project_count.store(0, Ordering::SeqCst);
        self.shared.set_state(EngineState::Terminated);
        info!("Search worker stopped");
    }

    /// Take the next message, switching state under the same lock so
    /// `wait_idle` never sees an empty mailbox while work is in hand.
    fn next(&self) -> Option<Message> {
        let mut state = self.shared.state.lock();
        match self.shared.mailbox.try_next(&self.shared.shutdown) {
            Some(message) => {
                *state = EngineState::Working;
                Some(message)
            }
            None => {
                *state = EngineState::Idle;
                self.shared.state_changed.notify_all();
                None
            }
        }
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::ProjectLoaded { project, seq } => self.load_project(project, seq),
            Message::ProjectUnloaded(id) => self.unload_project(id),
            Message::ScanDocument => self.scan_document(),
            Message::Search { text, cancel } => self.search(&text, &cancel),
            Message::Stop => {}
        }
    }

    fn search(&self, text: &str, cancel: &CancellationToken) {
        let shared = &self.shared;
        shared.metrics.searches_started.inc();
        debug!("Searching for '{text}'");

        let ctx = SearchContext {
            cache: &shared.cache,
            metrics: &shared.metrics,
            flush_timeout: shared.settings.flush_timeout,
            cancel,
        };
        let ran = panic::catch_unwind(AssertUnwindSafe(|| {
            search::run(
                &ctx,
                &self.projects,
                shared.workspace.as_ref(),
                text,
                &mut |event: SearchEvent| shared.post_search(event),
            )
        }));
        // The caller still needs a terminal event.
        let outcome = ran.unwrap_or_else(|_| {
            error!("Search for '{text}' panicked in a host callback");
            shared.post_search(SearchEvent::Canceled);
            Outcome::Canceled
        });

        match outcome {
            Outcome::Canceled => {
                shared.metrics.searches_canceled.inc();
                debug!("Search for '{text}' canceled");
            }
            Outcome::Failed(e) => debug!("Search for '{text}' not run: {e}"),
            Outcome::Finished => {}
        }
        shared.mailbox.finish_search();
    }

    fn load_project(&mut self, project: Arc<dyn ProjectHierarchy>, seq: u64) {
        let shared = Arc::clone(&self.shared);
        let Some(cancel) = shared.mailbox.begin_load(seq, &shared.shutdown) else {
            return;
        };

        let name = project.name().unwrap_or_default();
        info!("Loading project '{name}'");
        shared.post_solution(SolutionEvent::ProjectLoading(name.clone()));

        match ProjectIndex::create(project, Arc::clone(&shared.icons), cancel) {
            Ok(index) => {
                shared.metrics.projects_loaded.inc();
                shared.metrics.files_indexed.inc_by(index.len() as u64);
                match self.projects.iter().position(|p| p.id() == index.id()) {
                    Some(pos) => {
                        debug!("Project '{name}' loaded again, replacing its index");
                        let old = std::mem::replace(&mut self.projects[pos], index);
                        old.dispose();
                    }
                    None => self.projects.push(index),
                }
            }
            Err(e) if e.is_cancelled() => info!("Loading of project '{name}' cancelled"),
            Err(e) => warn!("Failed to index project '{name}': {e}"),
        }

        shared.mailbox.end_load();
        shared
            .project_count
            .store(self.projects.len(), Ordering::SeqCst);
        shared.post_solution(SolutionEvent::ProjectFinishedLoading);
    }

    fn unload_project(&mut self, id: ProjectId) {
        let Some(pos) = self.projects.iter().position(|p| p.id() == id) else {
            debug!("Unload of unknown {id} ignored");
            return;
        };

        let index = self.projects.remove(pos);
        let name = index.name().to_string();
        self.shared
            .post_solution(SolutionEvent::ProjectUnloading(name.clone()));
        index.dispose();
        self.shared
            .project_count
            .store(self.projects.len(), Ordering::SeqCst);
        info!("Unloaded project '{name}'");
        self.shared
            .post_solution(SolutionEvent::ProjectFinishedUnloading);
    }

    /// Extract and cache the active document's declarations ahead of a search.
    fn scan_document(&self) {
        let shared = &self.shared;
        let Some(document) = shared.workspace.active_document() else {
            return;
        };
        let Some(roots) = document.declarations.as_ref() else {
            return;
        };
        if shared.cache.contains(&document.path) {
            return;
        }

        let cancel = shared.shutdown.child();
        let extractor = DeclarationExtractor::new(document.path.clone(), &cancel);
        match extractor.extract(roots) {
            Ok(symbols) => {
                let ctx = SearchContext {
                    cache: &shared.cache,
                    metrics: &shared.metrics,
                    flush_timeout: shared.settings.flush_timeout,
                    cancel: &cancel,
                };
                search::store(&ctx, document.path.clone(), symbols);
            }
            Err(e) => debug!("Scan of {} stopped: {e}", document.path.display()),
        }
    }
}
