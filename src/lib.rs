//! Type-to-search quick navigation.
//!
//! Projects are indexed incrementally into flat file lists, the active
//! document's declarations are extracted on demand into a small LRU cache,
//! and a single background worker answers queries by streaming batches of
//! matches back to the caller's thread. The IDE side is abstracted behind
//! the traits in [`host`]; [`fs_host`] implements them over a plain directory
//! tree for the command-line front end.
pub mod app;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod decl;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fs_host;
pub mod host;
pub mod icons;
pub mod interactive;
pub mod metrics;
pub mod project;
pub mod report;

pub use crate::error::{HostError, LocatorError, Result};
pub use cancel::CancellationToken;
pub use decl::{DeclarationCache, DeclarationSymbol, SymbolKind, SymbolLocator};
pub use dispatch::{DispatchQueue, Dispatcher, EventHandler};
pub use engine::{
    EngineBuilder, EngineSettings, EngineState, LocatorItem, Progress, SearchEngine, SearchError,
    SearchEvent, SolutionEvent,
};
pub use project::{IndexedFile, ProjectIndex};
