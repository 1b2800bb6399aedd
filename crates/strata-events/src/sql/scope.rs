//! Explicit unit-of-work resource scoping.
//!
//! A [`UnitOfWork`] is a context object passed down the call chain of one
//! logical operation. The first [`acquire`](UnitOfWork::acquire) for a
//! key creates the resource and yields the *root* handle; later acquires
//! on the same unit of work yield *nested* handles to the identical
//! instance. Only the root handle releases the resource, and it clears
//! the association before doing so — nested drops are bookkeeping only.
//!
//! A unit of work is single-threaded by design, so this is `Rc`-based;
//! concurrent units of work never share an instance.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use tracing::debug;

use crate::errors::{PersistenceError, Result};

/// A resource that can be explicitly released by its root scope owner.
pub trait ScopedRelease {
    /// Release the underlying resource. Must be safe to call once.
    fn release(&self);
}

type Slots<T> = Rc<RefCell<HashMap<String, Rc<T>>>>;

/// Context object owning the scoped resources of one logical operation.
pub struct UnitOfWork<T: ScopedRelease> {
    slots: Slots<T>,
}

impl<T: ScopedRelease> UnitOfWork<T> {
    /// Create an empty unit of work.
    pub fn new() -> Self {
        Self {
            slots: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Acquire the resource registered under `key`, creating it with
    /// `factory` on first acquisition.
    ///
    /// The creating caller receives the root handle and with it the
    /// responsibility for release; everyone else gets a nested handle
    /// to the identical instance. A factory that yields `Ok(None)` is a
    /// programming error surfaced as
    /// [`PersistenceError::InvalidFactoryResult`].
    pub fn acquire(
        &self,
        key: &str,
        factory: impl FnOnce() -> Result<Option<T>>,
    ) -> Result<ScopeHandle<T>> {
        let existing = self.slots.borrow().get(key).cloned();
        if let Some(resource) = existing {
            debug!(key, "joining existing scope");
            return Ok(ScopeHandle {
                resource,
                slots: Rc::clone(&self.slots),
                key: key.to_string(),
                root: false,
            });
        }

        let resource = factory()?
            .ok_or_else(|| PersistenceError::InvalidFactoryResult(key.to_string()))?;
        let resource = Rc::new(resource);
        debug!(key, "opening root scope");
        let _ = self
            .slots
            .borrow_mut()
            .insert(key.to_string(), Rc::clone(&resource));
        Ok(ScopeHandle {
            resource,
            slots: Rc::clone(&self.slots),
            key: key.to_string(),
            root: true,
        })
    }

    /// Number of live scope associations (diagnostics and tests).
    pub fn active_scopes(&self) -> usize {
        self.slots.borrow().len()
    }
}

impl<T: ScopedRelease> Default for UnitOfWork<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ScopedRelease> Clone for UnitOfWork<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Rc::clone(&self.slots),
        }
    }
}

/// Handle to a scoped resource. Derefs to the resource itself.
pub struct ScopeHandle<T: ScopedRelease> {
    resource: Rc<T>,
    slots: Slots<T>,
    key: String,
    root: bool,
}

impl<T: ScopedRelease> ScopeHandle<T> {
    /// Whether this handle owns the release of the resource.
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Create an additional nested (non-owning) handle.
    pub fn share(&self) -> ScopeHandle<T> {
        ScopeHandle {
            resource: Rc::clone(&self.resource),
            slots: Rc::clone(&self.slots),
            key: self.key.clone(),
            root: false,
        }
    }
}

// Manual impl: the resource itself need not be Debug.
impl<T: ScopedRelease> fmt::Debug for ScopeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("key", &self.key)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl<T: ScopedRelease> Deref for ScopeHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T: ScopedRelease> Drop for ScopeHandle<T> {
    fn drop(&mut self) {
        if !self.root {
            return;
        }
        debug!(key = %self.key, "closing root scope");
        // Clear the association first so re-entrant acquires during
        // release see an empty slot, then release exactly once.
        let _ = self.slots.borrow_mut().remove(&self.key);
        self.resource.release();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::cell::Cell;

    struct FakeResource {
        releases: Rc<Cell<usize>>,
    }

    impl ScopedRelease for FakeResource {
        fn release(&self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    fn fake(releases: &Rc<Cell<usize>>) -> impl FnOnce() -> Result<Option<FakeResource>> {
        let releases = Rc::clone(releases);
        move || Ok(Some(FakeResource { releases }))
    }

    #[test]
    fn nested_acquire_returns_identical_resource() {
        let uow: UnitOfWork<FakeResource> = UnitOfWork::new();
        let releases = Rc::new(Cell::new(0));

        let root = uow.acquire("db", fake(&releases)).unwrap();
        let nested = uow.acquire("db", fake(&releases)).unwrap();

        assert!(root.is_root());
        assert!(!nested.is_root());
        assert!(Rc::ptr_eq(&root.resource, &nested.resource));
    }

    #[test]
    fn only_root_drop_releases() {
        let uow: UnitOfWork<FakeResource> = UnitOfWork::new();
        let releases = Rc::new(Cell::new(0));

        let root = uow.acquire("db", fake(&releases)).unwrap();
        {
            let nested = uow.acquire("db", fake(&releases)).unwrap();
            drop(nested);
        }
        assert_eq!(releases.get(), 0);
        assert_eq!(uow.active_scopes(), 1);

        drop(root);
        assert_eq!(releases.get(), 1);
        assert_eq!(uow.active_scopes(), 0);
    }

    #[test]
    fn shared_handles_never_release() {
        let uow: UnitOfWork<FakeResource> = UnitOfWork::new();
        let releases = Rc::new(Cell::new(0));

        let root = uow.acquire("db", fake(&releases)).unwrap();
        let shared = root.share();
        drop(shared);
        assert_eq!(releases.get(), 0);
        drop(root);
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn reacquire_after_root_drop_creates_fresh_root() {
        let uow: UnitOfWork<FakeResource> = UnitOfWork::new();
        let releases = Rc::new(Cell::new(0));

        drop(uow.acquire("db", fake(&releases)).unwrap());
        assert_eq!(releases.get(), 1);

        let again = uow.acquire("db", fake(&releases)).unwrap();
        assert!(again.is_root());
        drop(again);
        assert_eq!(releases.get(), 2);
    }

    #[test]
    fn factory_returning_none_is_an_error() {
        let uow: UnitOfWork<FakeResource> = UnitOfWork::new();
        let result = uow.acquire("db", || Ok(None));
        assert_matches!(result, Err(PersistenceError::InvalidFactoryResult(key)) if key == "db");
        assert_eq!(uow.active_scopes(), 0);
    }

    #[test]
    fn factory_error_propagates() {
        let uow: UnitOfWork<FakeResource> = UnitOfWork::new();
        let result = uow.acquire("db", || Err(PersistenceError::ConnectionReleased));
        assert_matches!(result, Err(PersistenceError::ConnectionReleased));
    }

    #[test]
    fn distinct_keys_hold_distinct_resources() {
        let uow: UnitOfWork<FakeResource> = UnitOfWork::new();
        let releases = Rc::new(Cell::new(0));

        let a = uow.acquire("a", fake(&releases)).unwrap();
        let b = uow.acquire("b", fake(&releases)).unwrap();
        assert!(!Rc::ptr_eq(&a.resource, &b.resource));
        assert_eq!(uow.active_scopes(), 2);
    }

    #[test]
    fn nested_outliving_root_keeps_resource_alive_but_released_once() {
        let uow: UnitOfWork<FakeResource> = UnitOfWork::new();
        let releases = Rc::new(Cell::new(0));

        let root = uow.acquire("db", fake(&releases)).unwrap();
        let nested = uow.acquire("db", fake(&releases)).unwrap();
        drop(root);
        assert_eq!(releases.get(), 1);
        drop(nested);
        assert_eq!(releases.get(), 1);
    }

    // FakeResource is deliberately not Debug; the handle must still
    // format, so results holding handles can be asserted on.
    #[test]
    fn handle_debug_reports_key_and_ownership() {
        let uow: UnitOfWork<FakeResource> = UnitOfWork::new();
        let releases = Rc::new(Cell::new(0));

        let root = uow.acquire("db", fake(&releases)).unwrap();
        let rendered = format!("{root:?}");
        assert!(rendered.contains("\"db\""));
        assert!(rendered.contains("root: true"));
    }
}
