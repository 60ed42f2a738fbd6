//! A host backed by the local filesystem.
//!
//! Each project is a directory tree walked once with `ignore`, kept in memory
//! and edited through [`FsProject::add_path`] / [`FsProject::remove_path`],
//! which notify subscribers the way an IDE project system would. The active
//! document's declarations come from [`outline::OutlineParser`].
mod outline;

pub use outline::{is_source_file, OutlineElement, OutlineParser};

use crate::config::IgnoreConfig;
use crate::error::{HostError, LocatorError, Result};
use crate::host::{
    ActiveDocument, HierarchyEvents, IconHandle, Image, ImageFactory, ItemId, ItemInfo, ItemKind,
    ProjectHierarchy, ProjectId, SubscriptionCookie, Workspace,
};
use ignore::{DirEntry, WalkBuilder};
use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const ROOT: ItemId = 0;

pub const ICON_SOURCE: IconHandle = IconHandle(1);
pub const ICON_HEADER: IconHandle = IconHandle(2);
pub const ICON_TEXT: IconHandle = IconHandle(3);
pub const ICON_BUILD: IconHandle = IconHandle(4);

/// Entries below `root`, honoring ignore files and the configured filters.
pub fn walk_dir(root: &Path, ignore: &IgnoreConfig) -> impl Iterator<Item = DirEntry> {
    let patterns = ignore.patterns.clone();
    WalkBuilder::new(root)
        .hidden(ignore.hidden_files)
        .git_global(true)
        .git_ignore(true)
        .git_exclude(true)
        .ignore(true)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let name = entry.file_name().to_string_lossy();
            !patterns.iter().any(|p| p.as_str() == name)
        })
        .build()
        .filter_map(|entry| entry.ok())
}

/// Icon category of a file, by name.
pub fn icon_for(path: &Path) -> Option<IconHandle> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if matches!(name.as_str(), "cmakelists.txt" | "makefile" | "meson.build") {
        return Some(ICON_BUILD);
    }
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    match ext.as_str() {
        "c" | "cc" | "cpp" | "cxx" | "c++" | "inl" | "ipp" => Some(ICON_SOURCE),
        "h" | "hh" | "hpp" | "hxx" | "h++" => Some(ICON_HEADER),
        "txt" | "md" | "rst" => Some(ICON_TEXT),
        "cmake" | "pro" | "pri" | "qbs" | "sln" | "vcxproj" => Some(ICON_BUILD),
        _ => None,
    }
}

struct Node {
    info: ItemInfo,
    icon: Option<IconHandle>,
    parent: Option<ItemId>,
    children: Vec<ItemId>,
}

struct Tree {
    nodes: HashMap<ItemId, Node>,
    by_path: HashMap<PathBuf, ItemId>,
    next_id: ItemId,
}

impl Tree {
    fn new(name: String, root: PathBuf) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT,
            Node {
                info: ItemInfo {
                    kind: ItemKind::Folder,
                    name,
                    path: root.clone(),
                },
                icon: None,
                parent: None,
                children: Vec::new(),
            },
        );
        let mut by_path = HashMap::new();
        by_path.insert(root, ROOT);
        Self {
            nodes,
            by_path,
            next_id: ROOT + 1,
        }
    }

    fn node(&self, item: ItemId) -> std::result::Result<&Node, HostError> {
        self.nodes.get(&item).ok_or(HostError::StaleNode(item))
    }

    /// Insert `path` under `parent`, keeping siblings sorted by name.
    fn insert(&mut self, parent: ItemId, path: PathBuf, kind: ItemKind) -> ItemId {
        let id = self.next_id;
        self.next_id += 1;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let icon = match kind {
            ItemKind::PhysicalFile => icon_for(&path),
            _ => None,
        };

        let at = self.nodes.get(&parent).map(|p| {
            p.children
                .iter()
                .position(|c| self.nodes.get(c).is_some_and(|n| n.info.name > name))
                .unwrap_or(p.children.len())
        });
        if let (Some(at), Some(p)) = (at, self.nodes.get_mut(&parent)) {
            p.children.insert(at, id);
        }

        self.by_path.insert(path.clone(), id);
        self.nodes.insert(
            id,
            Node {
                info: ItemInfo { kind, name, path },
                icon,
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        id
    }

    /// Remove `item` and its subtree, returning the removed ids leaves first.
    fn remove(&mut self, item: ItemId) -> Vec<ItemId> {
        let Some(node) = self.nodes.remove(&item) else {
            return Vec::new();
        };
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|&c| c != item);
        }
        self.by_path.remove(&node.info.path);

        let mut removed = Vec::new();
        for child in node.children {
            removed.extend(self.remove(child));
        }
        removed.push(item);
        removed
    }
}

/// One directory tree exposed as a project.
pub struct FsProject {
    id: ProjectId,
    root_path: PathBuf,
    tree: RwLock<Tree>,
    subscribers: Mutex<HashMap<u64, Arc<dyn HierarchyEvents>>>,
    next_cookie: AtomicU64,
}

impl FsProject {
    pub fn open(id: ProjectId, root: &Path, ignore: &IgnoreConfig) -> Result<Arc<Self>> {
        let root_path = fs::canonicalize(root)?;
        if !root_path.is_dir() {
            return Err(LocatorError::Config(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let name = root_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root_path.display().to_string());

        let mut tree = Tree::new(name, root_path.clone());
        for entry in walk_dir(&root_path, ignore) {
            if entry.depth() == 0 {
                continue;
            }
            let kind = match entry.file_type() {
                Some(t) if t.is_dir() => ItemKind::Folder,
                Some(t) if t.is_file() => ItemKind::PhysicalFile,
                _ => ItemKind::Other,
            };
            let path = entry.into_path();
            let parent = path
                .parent()
                .and_then(|p| tree.by_path.get(p).copied())
                .unwrap_or(ROOT);
            tree.insert(parent, path, kind);
        }
        debug!(
            "Opened {} with {} nodes",
            root_path.display(),
            tree.nodes.len()
        );

        Ok(Arc::new(Self {
            id,
            root_path,
            tree: RwLock::new(tree),
            subscribers: Mutex::new(HashMap::new()),
            next_cookie: AtomicU64::new(1),
        }))
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_path.join(path)
        }
    }

    /// Add a file (and any missing parent folders) to the tree. Returns the
    /// file's item, which already existed when nothing was added.
    pub fn add_path(&self, path: &Path) -> Result<ItemId> {
        let path = self.absolute(path);
        let relative = path.strip_prefix(&self.root_path).map_err(|_| {
            LocatorError::Config(format!(
                "{} is outside project {}",
                path.display(),
                self.root_path.display()
            ))
        })?;

        let mut added = Vec::new();
        let item = {
            let mut tree = self.tree.write();
            let mut parent = ROOT;
            let mut current = self.root_path.clone();
            let parts: Vec<_> = relative.components().collect();
            for (i, part) in parts.iter().enumerate() {
                current.push(part);
                let kind = if i + 1 == parts.len() {
                    ItemKind::PhysicalFile
                } else {
                    ItemKind::Folder
                };
                parent = match tree.by_path.get(&current) {
                    Some(&existing) => existing,
                    None => {
                        let id = tree.insert(parent, current.clone(), kind);
                        added.push(id);
                        id
                    }
                };
            }
            parent
        };

        for id in &added {
            self.notify(|sink| sink.on_item_added(*id));
        }
        Ok(item)
    }

    /// Remove a file or folder. Returns the removed item, if it was known.
    pub fn remove_path(&self, path: &Path) -> Option<ItemId> {
        let path = self.absolute(path);
        let (item, removed) = {
            let mut tree = self.tree.write();
            let item = *tree.by_path.get(&path)?;
            if item == ROOT {
                return None;
            }
            (item, tree.remove(item))
        };

        for id in removed {
            self.notify(|sink| sink.on_item_deleted(id));
        }
        Some(item)
    }

    pub fn item_for(&self, path: &Path) -> Option<ItemId> {
        self.tree.read().by_path.get(&self.absolute(path)).copied()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver an event outside the tree and subscriber locks, so sinks may
    /// call back into the project.
    fn notify(&self, deliver: impl Fn(&dyn HierarchyEvents)) {
        let sinks: Vec<_> = self.subscribers.lock().values().cloned().collect();
        for sink in sinks {
            deliver(sink.as_ref());
        }
    }
}

impl ProjectHierarchy for FsProject {
    fn id(&self) -> ProjectId {
        self.id
    }

    fn name(&self) -> std::result::Result<String, HostError> {
        Ok(self.tree.read().node(ROOT)?.info.name.clone())
    }

    fn root_path(&self) -> PathBuf {
        self.root_path.clone()
    }

    fn root(&self) -> ItemId {
        ROOT
    }

    fn first_child(&self, item: ItemId) -> std::result::Result<Option<ItemId>, HostError> {
        Ok(self.tree.read().node(item)?.children.first().copied())
    }

    fn next_sibling(&self, item: ItemId) -> std::result::Result<Option<ItemId>, HostError> {
        let tree = self.tree.read();
        let Some(parent) = tree.node(item)?.parent else {
            return Ok(None);
        };
        let siblings = &tree.node(parent)?.children;
        Ok(siblings
            .iter()
            .position(|&s| s == item)
            .and_then(|i| siblings.get(i + 1).copied()))
    }

    fn item(&self, item: ItemId) -> std::result::Result<ItemInfo, HostError> {
        Ok(self.tree.read().node(item)?.info.clone())
    }

    fn icon(&self, item: ItemId) -> Option<IconHandle> {
        self.tree.read().nodes.get(&item).and_then(|n| n.icon)
    }

    fn subscribe(
        &self,
        sink: Arc<dyn HierarchyEvents>,
    ) -> std::result::Result<SubscriptionCookie, HostError> {
        let cookie = self.next_cookie.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().insert(cookie, sink);
        trace!("{} subscriber #{cookie} added", self.id);
        Ok(SubscriptionCookie(cookie))
    }

    fn unsubscribe(&self, cookie: SubscriptionCookie) -> std::result::Result<(), HostError> {
        self.subscribers
            .lock()
            .remove(&cookie.0)
            .map(|_| ())
            .ok_or(HostError::Other(format!("unknown subscription {}", cookie.0)))
    }
}

/// The editor side: which file is active and what it declares.
pub struct FsWorkspace {
    parser: OutlineParser,
    active: Mutex<Option<ActiveDocument>>,
}

impl FsWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            parser: OutlineParser::new()?,
            active: Mutex::new(None),
        })
    }

    /// Make `path` the active document, reading its declarations when it is
    /// a C or C++ file.
    pub fn set_active(&self, path: &Path) -> Result<()> {
        let path = fs::canonicalize(path)?;
        let declarations = if is_source_file(&path) {
            Some(self.parser.parse_file(&path)?)
        } else {
            None
        };
        debug!(
            "Active document {} ({} top-level declarations)",
            path.display(),
            declarations.as_ref().map_or(0, |d| d.len())
        );
        *self.active.lock() = Some(ActiveDocument { path, declarations });
        Ok(())
    }

    pub fn clear_active(&self) {
        *self.active.lock() = None;
    }

    pub fn active_path(&self) -> Option<PathBuf> {
        self.active.lock().as_ref().map(|d| d.path.clone())
    }
}

impl Workspace for FsWorkspace {
    fn active_document(&self) -> Option<ActiveDocument> {
        self.active.lock().clone()
    }
}

/// Label used as the image of a file in console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconLabel(pub &'static str);

/// Produces [`IconLabel`] images.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsImageFactory;

impl ImageFactory for FsImageFactory {
    fn from_icon(&self, icon: IconHandle) -> Option<Image> {
        let label = match icon {
            ICON_SOURCE => "source",
            ICON_HEADER => "header",
            ICON_TEXT => "text",
            ICON_BUILD => "build",
            _ => return None,
        };
        Some(Image::new(IconLabel(label)))
    }

    fn default_image(&self) -> Option<Image> {
        Some(Image::new(IconLabel("file")))
    }
}
