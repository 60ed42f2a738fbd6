//! Walks a document's declaration tree and turns it into search symbols
use super::symbol::{DeclarationSymbol, SymbolKind, SymbolLocator};
use crate::cancel::CancellationToken;
use crate::error::{HostError, Result};
use crate::host::{DeclElement, DeclKind, Where};
use log::{debug, trace};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Emit<'a> = dyn FnMut(Arc<DeclarationSymbol>) + 'a;

/// Extracts the declarations that belong to one file.
///
/// Types that are only forward-declared here (their definition lives in some
/// other file pulled in by an include) are skipped. Failures reported by the
/// host for one element skip that element and leave its siblings alone.
pub struct DeclarationExtractor<'a> {
    file: PathBuf,
    cancel: &'a CancellationToken,
}

impl<'a> DeclarationExtractor<'a> {
    pub fn new(file: impl Into<PathBuf>, cancel: &'a CancellationToken) -> Self {
        Self {
            file: file.into(),
            cancel,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// All declarations under `roots`, in document order.
    pub fn extract(&self, roots: &[Arc<dyn DeclElement>]) -> Result<Vec<Arc<DeclarationSymbol>>> {
        let mut symbols = Vec::new();
        self.extract_with(roots, &mut |symbol| symbols.push(symbol))?;
        Ok(symbols)
    }

    /// Like [`extract`](Self::extract), handing each symbol to `emit` as soon
    /// as it is built. Returns `Err(Cancelled)` if the token trips mid-walk.
    pub fn extract_with(
        &self,
        roots: &[Arc<dyn DeclElement>],
        emit: &mut Emit<'_>,
    ) -> Result<()> {
        self.walk(roots, emit)
    }

    fn walk(&self, elements: &[Arc<dyn DeclElement>], emit: &mut Emit<'_>) -> Result<()> {
        for element in elements {
            self.cancel.check()?;

            let kind = match element.kind() {
                Ok(kind) => kind,
                Err(e) => {
                    debug!("Skipping element without kind: {e}");
                    continue;
                }
            };

            match kind {
                DeclKind::Namespace => self.namespace(element.as_ref(), emit)?,
                DeclKind::Struct => self.record(element.as_ref(), SymbolKind::Struct, emit)?,
                DeclKind::Class => self.record(element.as_ref(), SymbolKind::Class, emit)?,
                DeclKind::Union => self.record(element.as_ref(), SymbolKind::Union, emit)?,
                DeclKind::Enum => self.enumeration(element.as_ref(), emit),
                DeclKind::Interface => self.interface(element.as_ref(), emit)?,
                DeclKind::Function => self.function(element.as_ref(), emit),
                DeclKind::Other => {}
            }
        }
        Ok(())
    }

    fn children(&self, element: &dyn DeclElement, emit: &mut Emit<'_>) -> Result<()> {
        match element.children() {
            Ok(children) => self.walk(&children, emit),
            Err(e) => {
                debug!("Cannot list children: {e}");
                Ok(())
            }
        }
    }

    fn namespace(&self, element: &dyn DeclElement, emit: &mut Emit<'_>) -> Result<()> {
        self.children(element, emit)
    }

    /// Structs, classes and unions.
    fn record(
        &self,
        element: &dyn DeclElement,
        kind: SymbolKind,
        emit: &mut Emit<'_>,
    ) -> Result<()> {
        match element.defining_file() {
            Ok(Some(file)) if self.is_this_file(&file) => {
                if let Some(symbol) = self.symbol(element, kind) {
                    emit(symbol);
                }
                self.children(element, emit)
            }
            Ok(Some(other)) => {
                trace!("{kind} defined in {} skipped", other.display());
                Ok(())
            }
            // No definition known to the host: only look inside.
            Ok(None) => self.children(element, emit),
            Err(e) => {
                debug!("Skipping {kind}: {e}");
                Ok(())
            }
        }
    }

    fn enumeration(&self, element: &dyn DeclElement, emit: &mut Emit<'_>) {
        let defined_here = match element.defining_file() {
            Ok(Some(file)) => self.is_this_file(&file),
            Ok(None) => element.has_body().unwrap_or(false),
            Err(e) => {
                debug!("Skipping enum: {e}");
                false
            }
        };
        if defined_here {
            if let Some(symbol) = self.symbol(element, SymbolKind::Enum) {
                emit(symbol);
            }
        }
    }

    fn interface(&self, element: &dyn DeclElement, emit: &mut Emit<'_>) -> Result<()> {
        if let Some(symbol) = self.symbol(element, SymbolKind::Interface) {
            emit(symbol);
        }
        self.children(element, emit)
    }

    fn function(&self, element: &dyn DeclElement, emit: &mut Emit<'_>) {
        let name = match element.prototype() {
            Ok(name) => name,
            Err(e) => {
                debug!("Skipping function without prototype: {e}");
                return;
            }
        };
        let Some((full_name, comment)) = self.names(element) else {
            return;
        };
        let locator = self.function_locator(element);
        emit(Arc::new(DeclarationSymbol::new(
            name,
            full_name,
            comment,
            SymbolKind::Function,
            locator,
        )));
    }

    fn function_locator(&self, element: &dyn DeclElement) -> SymbolLocator {
        for at in [Where::Definition, Where::Declaration] {
            match element.start_point(at) {
                Ok(point) if self.is_this_file(&point.file) => {
                    return SymbolLocator::Direct {
                        file: point.file,
                        offset: point.offset,
                    };
                }
                Ok(_) => {}
                Err(e) => trace!("No {at:?} location: {e}"),
            }
        }
        SymbolLocator::Structural {
            file: self.file.clone(),
            start: element.start_position().ok(),
        }
    }

    fn symbol(&self, element: &dyn DeclElement, kind: SymbolKind) -> Option<Arc<DeclarationSymbol>> {
        let name = match element.name() {
            Ok(name) => name,
            Err(e) => {
                debug!("Skipping {kind} without name: {e}");
                return None;
            }
        };
        let (full_name, comment) = self.names(element)?;
        Some(Arc::new(DeclarationSymbol::new(
            name,
            full_name,
            comment,
            kind,
            SymbolLocator::Structural {
                file: self.file.clone(),
                start: element.start_position().ok(),
            },
        )))
    }

    fn names(&self, element: &dyn DeclElement) -> Option<(String, String)> {
        let full_name = element
            .full_name()
            .map_err(|e: HostError| debug!("Skipping element without full name: {e}"))
            .ok()?;
        let comment = element.comment().unwrap_or_default();
        Some((full_name, comment))
    }

    fn is_this_file(&self, other: &Path) -> bool {
        other == self.file
    }
}
