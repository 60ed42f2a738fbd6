//! Per-project file index kept in sync with the host's project tree
use crate::cancel::CancellationToken;
use crate::error::{HostError, LocatorError, Result};
use crate::host::{
    HierarchyEvents, Image, ItemId, ItemKind, ProjectHierarchy, ProjectId, SubscriptionCookie,
};
use crate::icons::IconCache;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};

/// One physical file of a project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedFile {
    #[serde(skip)]
    pub item: ItemId,
    pub name: String,
    pub path: PathBuf,
    /// Path relative to the project root.
    pub relative_path: String,
    #[serde(skip)]
    pub image: Option<Image>,
    #[serde(skip)]
    search_key: String,
}

impl IndexedFile {
    pub fn new(item: ItemId, name: String, path: PathBuf, project_root: &Path) -> Self {
        let relative_path = relative_to(&path, project_root);
        let search_key = name.to_uppercase();
        Self {
            item,
            name,
            path,
            relative_path,
            image: None,
            search_key,
        }
    }

    pub fn with_image(mut self, image: Option<Image>) -> Self {
        self.image = image;
        self
    }

    /// `upper_query` must already be uppercase.
    pub fn matches(&self, upper_query: &str) -> bool {
        self.search_key.contains(upper_query)
    }
}

/// Path of `path` relative to `root`, compared component-wise and
/// case-insensitively. Paths outside `root` keep their non-shared tail.
pub fn relative_to(path: &Path, root: &Path) -> String {
    if path.as_os_str().is_empty() {
        return String::new();
    }
    if root.as_os_str().is_empty() {
        return path.display().to_string();
    }

    let path_parts: Vec<Component> = path.components().collect();
    let root_parts: Vec<Component> = root.components().collect();
    let shared = path_parts
        .iter()
        .zip(root_parts.iter())
        .take_while(|(a, b)| {
            a.as_os_str()
                .to_string_lossy()
                .eq_ignore_ascii_case(&b.as_os_str().to_string_lossy())
        })
        .count();

    path_parts[shared..]
        .iter()
        .collect::<PathBuf>()
        .display()
        .to_string()
}

/// Snapshot of a project's physical files plus a live subscription to the
/// project's add/delete notifications.
pub struct ProjectIndex {
    hierarchy: Arc<dyn ProjectHierarchy>,
    name: String,
    root_path: PathBuf,
    items: Mutex<Vec<Arc<IndexedFile>>>,
    cookie: Mutex<Option<SubscriptionCookie>>,
    icons: Arc<IconCache>,
    cancel: CancellationToken,
}

impl ProjectIndex {
    /// Walk the project tree depth-first and subscribe to its notifications.
    ///
    /// `cancel` is polled for every node; a cancelled walk returns
    /// [`LocatorError::Cancelled`] and leaves nothing subscribed. The token is
    /// kept for image lookups triggered later by notifications.
    pub fn create(
        hierarchy: Arc<dyn ProjectHierarchy>,
        icons: Arc<IconCache>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let name = hierarchy.name().unwrap_or_else(|e| {
            debug!("Project {} has no name: {e}", hierarchy.id());
            String::new()
        });
        let root_path = hierarchy.root_path();

        let index = Arc::new(Self {
            hierarchy,
            name,
            root_path,
            items: Mutex::new(Vec::new()),
            cookie: Mutex::new(None),
            icons,
            cancel,
        });

        let items = index.walk()?;
        info!(
            "Indexed project '{}' ({} files)",
            index.name,
            items.len()
        );
        *index.items.lock() = items;
        index.subscribe();
        Ok(index)
    }

    pub fn id(&self) -> ProjectId {
        self.hierarchy.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Run `f` over the items while holding this project's lock.
    pub fn with_items<R>(&self, f: impl FnOnce(&[Arc<IndexedFile>]) -> R) -> R {
        let items = self.items.lock();
        f(&items)
    }

    pub fn snapshot(&self) -> Vec<Arc<IndexedFile>> {
        self.items.lock().clone()
    }

    pub fn on_item_added(&self, item: ItemId) {
        if let Some(file) = self.build_file(item) {
            debug!("Project '{}': added {}", self.name, file.relative_path);
            self.items.lock().push(Arc::new(file));
        }
    }

    pub fn on_item_deleted(&self, item: ItemId) {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|file| file.item != item);
        if items.len() != before {
            debug!("Project '{}': removed item {item}", self.name);
        }
    }

    /// Stop listening to the host. Safe to call repeatedly.
    pub fn dispose(&self) {
        let cookie = self.cookie.lock().take();
        if let Some(cookie) = cookie {
            if let Err(e) = self.hierarchy.unsubscribe(cookie) {
                warn!("Failed to unsubscribe from project '{}': {e}", self.name);
            }
        }
    }

    fn subscribe(self: &Arc<Self>) {
        let sink: Arc<dyn HierarchyEvents> = Arc::new(IndexEvents {
            index: Arc::downgrade(self),
        });
        match self.hierarchy.subscribe(sink) {
            Ok(cookie) => *self.cookie.lock() = Some(cookie),
            Err(e) => warn!(
                "Project '{}' will not track file changes: {e}",
                self.name
            ),
        }
    }

    fn walk(&self) -> Result<Vec<Arc<IndexedFile>>> {
        let mut items = Vec::new();
        let mut stack = vec![self.hierarchy.root()];

        while let Some(node) = stack.pop() {
            if self.cancel.is_cancelled() {
                info!("Indexing of project '{}' aborted", self.name);
                return Err(LocatorError::Cancelled);
            }

            if let Some(file) = self.build_file(node) {
                items.push(Arc::new(file));
            }

            // Children are pushed in reverse so they pop in tree order.
            let children = self.children_of(node);
            stack.extend(children.into_iter().rev());
        }

        Ok(items)
    }

    fn children_of(&self, node: ItemId) -> Vec<ItemId> {
        let mut children = Vec::new();
        let mut next = match self.hierarchy.first_child(node) {
            Ok(child) => child,
            Err(e) => {
                debug!("No children for node {node}: {e}");
                None
            }
        };

        while let Some(child) = next {
            if self.cancel.is_cancelled() {
                break;
            }
            children.push(child);
            next = match self.hierarchy.next_sibling(child) {
                Ok(sibling) => sibling,
                Err(e) => {
                    debug!("Sibling chain ends at node {child}: {e}");
                    None
                }
            };
        }
        children
    }

    fn build_file(&self, node: ItemId) -> Option<IndexedFile> {
        let info = match self.hierarchy.item(node) {
            Ok(info) => info,
            Err(HostError::NotAFile(_)) => return None,
            Err(e) => {
                debug!("Skipping node {node} in '{}': {e}", self.name);
                return None;
            }
        };
        if info.kind != ItemKind::PhysicalFile {
            return None;
        }

        let image = self
            .icons
            .image_for(self.hierarchy.as_ref(), node, &self.cancel);
        Some(IndexedFile::new(node, info.name, info.path, &self.root_path).with_image(image))
    }
}

impl Drop for ProjectIndex {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct IndexEvents {
    index: Weak<ProjectIndex>,
}

impl HierarchyEvents for IndexEvents {
    fn on_item_added(&self, item: ItemId) {
        if let Some(index) = self.index.upgrade() {
            index.on_item_added(item);
        }
    }

    fn on_item_deleted(&self, item: ItemId) {
        if let Some(index) = self.index.upgrade() {
            index.on_item_deleted(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch;
    use crate::host::ItemInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Root folder `0` with files `1..=count`. `broken` fails its lookup and
    /// `cancel_after` trips `cancel` once that many items were looked up.
    struct Tree {
        count: u64,
        broken: Option<ItemId>,
        cancel_after: Option<(usize, CancellationToken)>,
        lookups: AtomicUsize,
        subscribed: AtomicUsize,
    }

    impl Tree {
        fn new(count: u64) -> Self {
            Self {
                count,
                broken: None,
                cancel_after: None,
                lookups: AtomicUsize::new(0),
                subscribed: AtomicUsize::new(0),
            }
        }
    }

    impl ProjectHierarchy for Tree {
        fn id(&self) -> ProjectId {
            ProjectId(7)
        }
        fn name(&self) -> std::result::Result<String, HostError> {
            Ok("tree".into())
        }
        fn root_path(&self) -> PathBuf {
            PathBuf::from("/tree")
        }
        fn root(&self) -> ItemId {
            0
        }
        fn first_child(&self, item: ItemId) -> std::result::Result<Option<ItemId>, HostError> {
            Ok((item == 0 && self.count > 0).then_some(1))
        }
        fn next_sibling(&self, item: ItemId) -> std::result::Result<Option<ItemId>, HostError> {
            Ok((item < self.count).then_some(item + 1))
        }
        fn item(&self, item: ItemId) -> std::result::Result<ItemInfo, HostError> {
            let seen = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, token)) = &self.cancel_after {
                if seen >= *limit {
                    token.cancel();
                }
            }
            if item == 0 {
                return Ok(ItemInfo {
                    kind: ItemKind::Folder,
                    name: "tree".into(),
                    path: PathBuf::from("/tree"),
                });
            }
            if self.broken == Some(item) {
                return Err(HostError::PropertyUnavailable {
                    node: item,
                    property: "name",
                });
            }
            let name = format!("f{item}.cpp");
            Ok(ItemInfo {
                kind: ItemKind::PhysicalFile,
                path: PathBuf::from("/tree").join(&name),
                name,
            })
        }
        fn subscribe(
            &self,
            _sink: Arc<dyn HierarchyEvents>,
        ) -> std::result::Result<SubscriptionCookie, HostError> {
            self.subscribed.fetch_add(1, Ordering::SeqCst);
            Ok(SubscriptionCookie(1))
        }
        fn unsubscribe(&self, _cookie: SubscriptionCookie) -> std::result::Result<(), HostError> {
            self.subscribed.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn icons() -> Arc<IconCache> {
        let (dispatcher, _queue) = dispatch::channel();
        Arc::new(IconCache::new(
            None,
            dispatcher,
            Duration::from_millis(10),
            CancellationToken::new(),
        ))
    }

    #[test]
    fn test_bad_node_is_skipped() {
        let tree = Arc::new(Tree {
            broken: Some(2),
            ..Tree::new(3)
        });
        let index = ProjectIndex::create(tree.clone(), icons(), CancellationToken::new()).unwrap();

        let names: Vec<String> = index.snapshot().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["f1.cpp", "f3.cpp"]);
        assert_eq!(tree.subscribed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_walk_subscribes_nothing() {
        let cancel = CancellationToken::new();
        let tree = Arc::new(Tree {
            cancel_after: Some((3, cancel.clone())),
            ..Tree::new(50)
        });
        let result = ProjectIndex::create(tree.clone(), icons(), cancel);

        assert!(matches!(result, Err(LocatorError::Cancelled)));
        assert!(tree.lookups.load(Ordering::SeqCst) < 50);
        assert_eq!(tree.subscribed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispose_unsubscribes_once() {
        let tree = Arc::new(Tree::new(2));
        let index = ProjectIndex::create(tree.clone(), icons(), CancellationToken::new()).unwrap();
        assert_eq!(index.len(), 2);
        index.dispose();
        index.dispose();
        assert_eq!(tree.subscribed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_relative_to_root() {
        let rel = relative_to(Path::new("/work/app/src/main.cpp"), Path::new("/work/app"));
        assert_eq!(rel, Path::new("src").join("main.cpp").display().to_string());
    }

    #[test]
    fn test_relative_to_is_case_insensitive() {
        let rel = relative_to(Path::new("/Work/App/a.h"), Path::new("/work/app"));
        assert_eq!(rel, "a.h");
    }

    #[test]
    fn test_relative_to_empty_inputs() {
        assert_eq!(relative_to(Path::new(""), Path::new("/x")), "");
        assert_eq!(relative_to(Path::new("/x/y.h"), Path::new("")), "/x/y.h");
    }

    #[test]
    fn test_indexed_file_matches_uppercase() {
        let file = IndexedFile::new(
            1,
            "MyWidget.cpp".into(),
            PathBuf::from("/p/MyWidget.cpp"),
            Path::new("/p"),
        );
        assert!(file.matches("WIDGET"));
        assert!(file.matches("YWI"));
        assert!(!file.matches("WDGET"));
        assert!(!file.matches("widget"));
    }
}
