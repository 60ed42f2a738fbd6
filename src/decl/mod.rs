//! Declaration symbols of the active document and their per-file cache
mod cache;
mod extract;
mod symbol;

pub use cache::{CacheStats, DeclarationCache, SymbolList, DEFAULT_CAPACITY};
pub use extract::DeclarationExtractor;
pub use symbol::{DeclarationSymbol, SymbolKind, SymbolLocator};
