//! Cooperative cancellation shared between the caller and the worker thread
use crate::error::{LocatorError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable cancellation flag.
///
/// Tokens form a tree: a child token reports cancelled when it or any of its
/// ancestors has been cancelled, while cancelling a child leaves the parent
/// untouched. The engine owns one root token for shutdown and derives a child
/// for every search and every project scan.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<Node>,
}

#[derive(Debug, Default)]
struct Node {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a token that is also cancelled whenever `self` is.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Node {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears this token's own flag. Ancestors are not affected.
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// `Err(Cancelled)` once the token trips, for use with `?` inside loops.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(LocatorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_observes_parent() {
        let root = CancellationToken::new();
        let child = root.child();
        let grandchild = child.child();

        assert!(!grandchild.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let root = CancellationToken::new();
        let child = root.child();
        child.cancel();

        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
        assert!(root.check().is_ok());
        assert!(child.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_reset_and_clone_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }
}
