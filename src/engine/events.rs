//! Events delivered to the caller while searching and while the workspace changes
use crate::decl::DeclarationSymbol;
use crate::error::HostError;
use crate::host::Navigator;
use crate::project::IndexedFile;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// One result column, as the caller's list view should lay it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderColumn {
    pub title: &'static str,
    /// Name of the item property shown in this column.
    pub bound_property: &'static str,
    pub width: u32,
}

impl HeaderColumn {
    const fn new(title: &'static str, bound_property: &'static str, width: u32) -> Self {
        Self {
            title,
            bound_property,
            width,
        }
    }
}

pub const FILE_COLUMNS: [HeaderColumn; 2] = [
    HeaderColumn::new("Name", "name", 600),
    HeaderColumn::new("Path", "relative_path", 800),
];

pub const DECLARATION_COLUMNS: [HeaderColumn; 3] = [
    HeaderColumn::new("Code element", "name", 600),
    HeaderColumn::new("Fully qualified name", "full_name", 400),
    HeaderColumn::new("Comment", "comment", 800),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    Percent(u8),
    Indeterminate,
}

/// Why a search could not run at all.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchError {
    #[error("nothing to search for")]
    EmptyQuery,
    #[error("no projects are indexed")]
    NoProjects,
    #[error("no active document")]
    NoActiveDocument,
    #[error("active document has no declaration model")]
    NoDeclarationModel,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocatorItem {
    File(Arc<IndexedFile>),
    Declaration(Arc<DeclarationSymbol>),
}

impl LocatorItem {
    pub fn name(&self) -> &str {
        match self {
            LocatorItem::File(file) => &file.name,
            LocatorItem::Declaration(symbol) => &symbol.name,
        }
    }

    /// Open the underlying file or jump to the declaration.
    pub fn activate(&self, navigator: &mut dyn Navigator) -> Result<(), HostError> {
        match self {
            LocatorItem::File(file) => navigator.open_file(&file.path),
            LocatorItem::Declaration(symbol) => symbol.locator.navigate(navigator),
        }
    }
}

impl fmt::Display for LocatorItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocatorItem::File(file) => write!(f, "{}  {}", file.name, file.relative_path),
            LocatorItem::Declaration(symbol) => {
                write!(f, "{}  {}", symbol.name, symbol.full_name)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SearchEvent {
    HeaderData(Vec<HeaderColumn>),
    Data(Vec<LocatorItem>),
    Progress(Progress),
    Canceled,
    Error(SearchError),
    Finished,
}

impl SearchEvent {
    /// `Canceled`, `Error` and `Finished` end a search.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchEvent::Canceled | SearchEvent::Error(_) | SearchEvent::Finished
        )
    }
}

/// Workspace status changes, for status display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SolutionEvent {
    ProjectLoading(String),
    ProjectUnloading(String),
    ProjectFinishedLoading,
    ProjectFinishedUnloading,
    SolutionUnloading,
}

impl fmt::Display for SolutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolutionEvent::ProjectLoading(name) => write!(f, "Loading project {name}..."),
            SolutionEvent::ProjectUnloading(name) => write!(f, "Unloading project {name}..."),
            SolutionEvent::ProjectFinishedLoading => f.write_str("Project loaded"),
            SolutionEvent::ProjectFinishedUnloading => f.write_str("Project unloaded"),
            SolutionEvent::SolutionUnloading => f.write_str("Closing solution..."),
        }
    }
}
