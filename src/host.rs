//! Interfaces to the surrounding IDE.
//!
//! The engine never talks to a project system, code model or UI toolkit
//! directly; everything it needs from the host goes through these traits.
//! Implementations are expected to be cheap to call from the worker thread
//! and to report failures per node rather than panicking.
use crate::error::HostError;
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifier of a node inside one project's item tree.
pub type ItemId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(pub u64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project#{}", self.0)
    }
}

/// Host-side icon identity. Images are cached per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IconHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionCookie(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    PhysicalFile,
    Folder,
    Reference,
    Other,
}

/// Properties of one node in a project tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub kind: ItemKind,
    pub name: String,
    /// Absolute path on disk. Only meaningful for physical files.
    pub path: PathBuf,
}

/// Receives add/delete notifications for a project tree. Calls may arrive on
/// any host thread.
pub trait HierarchyEvents: Send + Sync {
    fn on_item_added(&self, item: ItemId);
    fn on_item_deleted(&self, item: ItemId);
}

/// One loaded project's item tree.
pub trait ProjectHierarchy: Send + Sync {
    fn id(&self) -> ProjectId;
    fn name(&self) -> Result<String, HostError>;
    /// Directory the project's relative paths are computed against.
    fn root_path(&self) -> PathBuf;
    fn root(&self) -> ItemId;
    fn first_child(&self, item: ItemId) -> Result<Option<ItemId>, HostError>;
    fn next_sibling(&self, item: ItemId) -> Result<Option<ItemId>, HostError>;
    fn item(&self, item: ItemId) -> Result<ItemInfo, HostError>;

    fn icon(&self, _item: ItemId) -> Option<IconHandle> {
        None
    }

    fn subscribe(&self, sink: Arc<dyn HierarchyEvents>) -> Result<SubscriptionCookie, HostError>;
    fn unsubscribe(&self, cookie: SubscriptionCookie) -> Result<(), HostError>;
}

/// Element kinds exposed by the host code model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Namespace,
    Struct,
    Class,
    Union,
    Enum,
    Interface,
    Function,
    Other,
}

/// Which location of an element to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Where {
    Definition,
    Declaration,
}

/// A resolved location: file plus absolute character offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPoint {
    pub file: PathBuf,
    pub offset: usize,
}

/// 1-based line/column position inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TextPosition {
    pub line: usize,
    pub column: usize,
}

/// A node of the host's declaration tree for one source file.
pub trait DeclElement: Send + Sync {
    fn kind(&self) -> Result<DeclKind, HostError>;
    fn name(&self) -> Result<String, HostError>;
    fn full_name(&self) -> Result<String, HostError>;

    fn comment(&self) -> Result<String, HostError> {
        Ok(String::new())
    }

    /// Parameter-qualified signature. Only asked of functions.
    fn prototype(&self) -> Result<String, HostError> {
        self.name()
    }

    fn children(&self) -> Result<Vec<Arc<dyn DeclElement>>, HostError>;

    /// File holding the authoritative definition of a type, if the host knows it.
    fn defining_file(&self) -> Result<Option<PathBuf>, HostError>;

    fn has_body(&self) -> Result<bool, HostError> {
        Ok(true)
    }

    fn start_point(&self, at: Where) -> Result<TextPoint, HostError>;

    /// Raw structural start of the element, used when no direct locator exists.
    fn start_position(&self) -> Result<TextPosition, HostError>;
}

/// The document currently focused in the editor.
#[derive(Clone)]
pub struct ActiveDocument {
    pub path: PathBuf,
    /// Root declaration collection, `None` when the host has no code model
    /// for this document.
    pub declarations: Option<Vec<Arc<dyn DeclElement>>>,
}

impl fmt::Debug for ActiveDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveDocument")
            .field("path", &self.path)
            .field(
                "declarations",
                &self.declarations.as_ref().map(|roots| roots.len()),
            )
            .finish()
    }
}

pub trait Workspace: Send + Sync {
    fn active_document(&self) -> Option<ActiveDocument>;
}

/// Platform image produced by an [`ImageFactory`]. Opaque to the engine.
#[derive(Clone)]
pub struct Image(Arc<dyn Any + Send + Sync>);

impl Image {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Image(..)")
    }
}

/// Builds platform images. Must only be called on the caller (UI) thread;
/// the engine routes every call through its dispatcher.
#[cfg_attr(test, mockall::automock)]
pub trait ImageFactory: Send + Sync {
    fn from_icon(&self, icon: IconHandle) -> Option<Image>;
    fn default_image(&self) -> Option<Image>;
}

/// Opens search results in the editor.
pub trait Navigator {
    fn open_file(&mut self, path: &Path) -> Result<(), HostError>;
    fn goto_offset(&mut self, path: &Path, offset: usize) -> Result<(), HostError>;
    fn goto_position(&mut self, path: &Path, position: TextPosition) -> Result<(), HostError>;
}
