//! In-memory host used by the integration tests.
#![allow(dead_code)]

use locator::dispatch::{self, DispatchQueue, EventHandler};
use locator::engine::{EngineSettings, SearchEngine, SearchEvent, SolutionEvent};
use locator::error::HostError;
use locator::host::{
    ActiveDocument, DeclElement, DeclKind, HierarchyEvents, ItemId, ItemInfo, ItemKind,
    ProjectHierarchy, ProjectId, SubscriptionCookie, TextPoint, TextPosition, Where, Workspace,
};
use locator::LocatorItem;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(10);

/// A project whose root folder holds a flat list of files.
pub struct MockProject {
    id: ProjectId,
    name: String,
    root: PathBuf,
    files: Mutex<Vec<(ItemId, String)>>,
    next_item: AtomicU64,
    sinks: Mutex<Vec<(u64, Arc<dyn HierarchyEvents>)>>,
    next_cookie: AtomicU64,
    /// Sleep on every item lookup, to make indexing slow.
    delay: Duration,
}

impl MockProject {
    pub fn new(id: u64, name: &str, files: &[&str]) -> Arc<Self> {
        Self::with_delay(id, name, files, Duration::ZERO)
    }

    pub fn with_delay(id: u64, name: &str, files: &[&str], delay: Duration) -> Arc<Self> {
        let project = Self {
            id: ProjectId(id),
            name: name.to_string(),
            root: PathBuf::from("/ws").join(name),
            files: Mutex::new(Vec::new()),
            next_item: AtomicU64::new(1),
            sinks: Mutex::new(Vec::new()),
            next_cookie: AtomicU64::new(1),
            delay,
        };
        for file in files {
            let item = project.next_item.fetch_add(1, Ordering::SeqCst);
            project.files.lock().push((item, file.to_string()));
        }
        Arc::new(project)
    }

    pub fn path_of(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    pub fn add(&self, file: &str) -> ItemId {
        let item = self.next_item.fetch_add(1, Ordering::SeqCst);
        self.files.lock().push((item, file.to_string()));
        let sinks: Vec<_> = self.sinks.lock().iter().map(|(_, s)| s.clone()).collect();
        for sink in sinks {
            sink.on_item_added(item);
        }
        item
    }

    pub fn remove(&self, file: &str) {
        let item = {
            let mut files = self.files.lock();
            let Some(pos) = files.iter().position(|(_, name)| name == file) else {
                return;
            };
            files.remove(pos).0
        };
        let sinks: Vec<_> = self.sinks.lock().iter().map(|(_, s)| s.clone()).collect();
        for sink in sinks {
            sink.on_item_deleted(item);
        }
    }

    pub fn subscribers(&self) -> usize {
        self.sinks.lock().len()
    }
}

impl ProjectHierarchy for MockProject {
    fn id(&self) -> ProjectId {
        self.id
    }

    fn name(&self) -> Result<String, HostError> {
        Ok(self.name.clone())
    }

    fn root_path(&self) -> PathBuf {
        self.root.clone()
    }

    fn root(&self) -> ItemId {
        0
    }

    fn first_child(&self, item: ItemId) -> Result<Option<ItemId>, HostError> {
        if item == 0 {
            Ok(self.files.lock().first().map(|(id, _)| *id))
        } else {
            Ok(None)
        }
    }

    fn next_sibling(&self, item: ItemId) -> Result<Option<ItemId>, HostError> {
        let files = self.files.lock();
        let pos = files
            .iter()
            .position(|(id, _)| *id == item)
            .ok_or(HostError::StaleNode(item))?;
        Ok(files.get(pos + 1).map(|(id, _)| *id))
    }

    fn item(&self, item: ItemId) -> Result<ItemInfo, HostError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if item == 0 {
            return Ok(ItemInfo {
                kind: ItemKind::Folder,
                name: self.name.clone(),
                path: self.root.clone(),
            });
        }
        let files = self.files.lock();
        let (_, name) = files
            .iter()
            .find(|(id, _)| *id == item)
            .ok_or(HostError::StaleNode(item))?;
        Ok(ItemInfo {
            kind: ItemKind::PhysicalFile,
            name: name.clone(),
            path: self.root.join(name),
        })
    }

    fn subscribe(&self, sink: Arc<dyn HierarchyEvents>) -> Result<SubscriptionCookie, HostError> {
        let cookie = self.next_cookie.fetch_add(1, Ordering::SeqCst);
        self.sinks.lock().push((cookie, sink));
        Ok(SubscriptionCookie(cookie))
    }

    fn unsubscribe(&self, cookie: SubscriptionCookie) -> Result<(), HostError> {
        self.sinks.lock().retain(|(c, _)| *c != cookie.0);
        Ok(())
    }
}

/// Declaration node with fixed answers.
pub struct Decl {
    pub kind: DeclKind,
    pub name: String,
    pub full_name: String,
    pub defining_file: Option<PathBuf>,
    pub has_body: bool,
    pub definition: Option<TextPoint>,
    pub children: Vec<Arc<dyn DeclElement>>,
    /// Sleep on every name lookup, to make extraction slow.
    pub delay: Duration,
    pub panics: bool,
}

impl Decl {
    fn base(kind: DeclKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            full_name: name.to_string(),
            defining_file: None,
            has_body: true,
            definition: None,
            children: Vec::new(),
            delay: Duration::ZERO,
            panics: false,
        }
    }

    pub fn namespace(name: &str, children: Vec<Arc<dyn DeclElement>>) -> Arc<dyn DeclElement> {
        Arc::new(Self {
            children,
            ..Self::base(DeclKind::Namespace, name)
        })
    }

    pub fn record(
        kind: DeclKind,
        name: &str,
        defined_in: &Path,
        children: Vec<Arc<dyn DeclElement>>,
    ) -> Arc<dyn DeclElement> {
        Arc::new(Self {
            defining_file: Some(defined_in.to_path_buf()),
            children,
            ..Self::base(kind, name)
        })
    }

    pub fn function(prototype: &str, file: &Path, offset: usize) -> Arc<dyn DeclElement> {
        Arc::new(Self {
            definition: Some(TextPoint {
                file: file.to_path_buf(),
                offset,
            }),
            ..Self::base(DeclKind::Function, prototype)
        })
    }

    pub fn slow_function(prototype: &str, delay: Duration) -> Arc<dyn DeclElement> {
        Arc::new(Self {
            delay,
            ..Self::base(DeclKind::Function, prototype)
        })
    }

    pub fn panicking(name: &str) -> Arc<dyn DeclElement> {
        Arc::new(Self {
            panics: true,
            ..Self::base(DeclKind::Class, name)
        })
    }
}

impl DeclElement for Decl {
    fn kind(&self) -> Result<DeclKind, HostError> {
        Ok(self.kind)
    }

    fn name(&self) -> Result<String, HostError> {
        if self.panics {
            panic!("host model blew up");
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(self.name.clone())
    }

    fn full_name(&self) -> Result<String, HostError> {
        Ok(self.full_name.clone())
    }

    fn children(&self) -> Result<Vec<Arc<dyn DeclElement>>, HostError> {
        Ok(self.children.clone())
    }

    fn defining_file(&self) -> Result<Option<PathBuf>, HostError> {
        if self.panics {
            panic!("host model blew up");
        }
        Ok(self.defining_file.clone())
    }

    fn has_body(&self) -> Result<bool, HostError> {
        Ok(self.has_body)
    }

    fn start_point(&self, at: Where) -> Result<TextPoint, HostError> {
        match at {
            Where::Definition => self
                .definition
                .clone()
                .ok_or(HostError::Unsupported("no definition")),
            Where::Declaration => Err(HostError::Unsupported("no declaration")),
        }
    }

    fn start_position(&self) -> Result<TextPosition, HostError> {
        Ok(TextPosition { line: 1, column: 1 })
    }
}

#[derive(Default)]
pub struct MockWorkspace {
    active: Mutex<Option<ActiveDocument>>,
}

impl MockWorkspace {
    pub fn set_active(&self, path: &Path, declarations: Option<Vec<Arc<dyn DeclElement>>>) {
        *self.active.lock() = Some(ActiveDocument {
            path: path.to_path_buf(),
            declarations,
        });
    }
}

impl Workspace for MockWorkspace {
    fn active_document(&self) -> Option<ActiveDocument> {
        self.active.lock().clone()
    }
}

/// Collects everything the engine delivers.
#[derive(Default)]
pub struct Recorder {
    pub search: Vec<SearchEvent>,
    pub solution: Vec<SolutionEvent>,
}

impl Recorder {
    pub fn terminal_count(&self) -> usize {
        self.search.iter().filter(|e| e.is_terminal()).count()
    }

    pub fn last_terminal(&self) -> Option<&SearchEvent> {
        self.search.iter().rev().find(|e| e.is_terminal())
    }

    pub fn item_names(&self) -> Vec<String> {
        self.search
            .iter()
            .filter_map(|e| match e {
                SearchEvent::Data(items) => Some(items),
                _ => None,
            })
            .flatten()
            .map(|item: &LocatorItem| item.name().to_string())
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&SearchEvent) -> bool) -> usize {
        self.search.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&mut self) {
        self.search.clear();
        self.solution.clear();
    }
}

impl EventHandler for Recorder {
    fn on_search_event(&mut self, event: SearchEvent) {
        self.search.push(event);
    }

    fn on_solution_event(&mut self, event: SolutionEvent) {
        self.solution.push(event);
    }
}

pub struct Harness {
    pub engine: SearchEngine,
    pub queue: DispatchQueue,
    pub workspace: Arc<MockWorkspace>,
    pub recorder: Recorder,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let (dispatcher, queue) = dispatch::channel();
        let workspace = Arc::new(MockWorkspace::default());
        let engine = SearchEngine::builder(dispatcher)
            .workspace(workspace.clone())
            .settings(settings)
            .build()
            .unwrap();
        Self {
            engine,
            queue,
            workspace,
            recorder: Recorder::default(),
        }
    }

    pub fn start(&self) {
        self.engine.start().unwrap();
    }

    pub fn load(&self, project: &Arc<MockProject>) {
        self.engine.project_loaded(project.clone());
    }

    /// Issue `text` and pump until the search ends.
    pub fn search(&mut self, text: &str) {
        self.recorder.clear();
        self.engine.search(text);
        self.wait_terminal();
    }

    pub fn wait_terminal(&mut self) {
        let done = self
            .queue
            .pump_until(&mut self.recorder, WAIT, |r| r.terminal_count() > 0);
        assert!(done, "search did not finish: {:?}", self.recorder.search);
    }

    /// Pump until the worker has drained its mailbox.
    pub fn settle(&mut self) {
        let engine = &self.engine;
        let idle = self
            .queue
            .pump_until(&mut self.recorder, WAIT, |_| engine.wait_idle(Duration::ZERO));
        assert!(idle, "engine did not settle");
        self.queue.pump(&mut self.recorder);
    }
}
