use crate::error::HostError;
use crate::host::{Navigator, TextPosition};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Kinds of declarations that show up as search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Struct,
    Class,
    Union,
    Interface,
    Enum,
    Function,
}

impl SymbolKind {
    /// Position of this kind's picture in the caller's code icon strip.
    pub fn icon_index(self) -> usize {
        match self {
            SymbolKind::Struct => 0,
            SymbolKind::Class => 1,
            SymbolKind::Union => 2,
            SymbolKind::Interface => 3,
            SymbolKind::Enum => 4,
            SymbolKind::Function => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Struct => "struct",
            SymbolKind::Class => "class",
            SymbolKind::Union => "union",
            SymbolKind::Interface => "interface",
            SymbolKind::Enum => "enum",
            SymbolKind::Function => "function",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where activating a symbol takes the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SymbolLocator {
    /// Resolved character offset inside the extracted file.
    Direct { file: PathBuf, offset: usize },
    /// Raw element start, when no direct location was resolvable.
    Structural {
        file: PathBuf,
        start: Option<TextPosition>,
    },
}

impl SymbolLocator {
    pub fn file(&self) -> &PathBuf {
        match self {
            SymbolLocator::Direct { file, .. } | SymbolLocator::Structural { file, .. } => file,
        }
    }

    pub fn navigate(&self, navigator: &mut dyn Navigator) -> Result<(), HostError> {
        match self {
            SymbolLocator::Direct { file, offset } => navigator.goto_offset(file, *offset),
            SymbolLocator::Structural {
                file,
                start: Some(position),
            } => navigator.goto_position(file, *position),
            SymbolLocator::Structural { file, start: None } => navigator.open_file(file),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclarationSymbol {
    /// Short name; for functions the parameter-qualified prototype.
    pub name: String,
    pub full_name: String,
    pub comment: String,
    pub kind: SymbolKind,
    pub locator: SymbolLocator,
    #[serde(skip)]
    search_key: String,
}

impl DeclarationSymbol {
    pub fn new(
        name: String,
        full_name: String,
        comment: String,
        kind: SymbolKind,
        locator: SymbolLocator,
    ) -> Self {
        let search_key = name.to_uppercase();
        Self {
            name,
            full_name,
            comment,
            kind,
            locator,
            search_key,
        }
    }

    /// `upper_query` must already be uppercase.
    pub fn matches(&self, upper_query: &str) -> bool {
        self.search_key.contains(upper_query)
    }
}
