//! The handle scope chain.
//!
//! Scopes form a doubly linked list rooted at the env's root scope rather than a strict stack:
//! closing a scope unlinks it by joining its parent and child, so scopes closed out of order (for
//! example while unwinding nested native calls after an exception) never corrupt their ancestors.
//! Well-behaved callers still close scopes last-in-first-out.

use tracing::{debug, trace};

use crate::handle_store::HandleId;
use crate::status::Status;
use crate::store::{table_id, Store};
use crate::{NapiError, VmError};

table_id!(
  /// Id of a [`HandleScope`] within its env.
  ScopeId
);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
  Plain,
  /// May promote exactly one handle into its parent before closing.
  Escapable,
}

/// A lifetime frame. Every handle belongs to exactly one scope and is destroyed when that scope
/// closes.
#[derive(Debug)]
pub(crate) struct HandleScope {
  kind: ScopeKind,
  parent: Option<ScopeId>,
  child: Option<ScopeId>,
  handles: Vec<HandleId>,
  escape_called: bool,
}

impl HandleScope {
  fn new(kind: ScopeKind, parent: Option<ScopeId>) -> Self {
    Self {
      kind,
      parent,
      child: None,
      handles: Vec::new(),
      escape_called: false,
    }
  }
}

#[derive(Debug)]
pub(crate) struct ScopeStore {
  store: Store<ScopeId, HandleScope>,
  root: ScopeId,
  current: Option<ScopeId>,
  /// Whether the root scope is currently acting as the outermost frame.
  root_open: bool,
  open: u32,
}

impl ScopeStore {
  pub fn new() -> Result<Self, VmError> {
    let mut store = Store::new();
    let root = store.insert(HandleScope::new(ScopeKind::Plain, None))?;
    Ok(Self {
      store,
      root,
      current: None,
      root_open: false,
      open: 0,
    })
  }

  pub fn root(&self) -> ScopeId {
    self.root
  }

  pub fn current(&self) -> Option<ScopeId> {
    self.current
  }

  /// The scope new handles attach to. Falls back to the root when nothing is open.
  pub fn current_or_root(&self) -> ScopeId {
    self.current.unwrap_or(self.root)
  }

  /// Number of scopes opened and not yet closed.
  pub fn open_count(&self) -> u32 {
    self.open
  }

  pub fn open(&mut self, kind: ScopeKind) -> Result<ScopeId, VmError> {
    let Some(parent) = self.current else {
      // Nothing is open: the root scope becomes the outermost frame.
      self.current = Some(self.root);
      self.root_open = true;
      self.open += 1;
      trace!(target: "napi_env::scope", scope = ?self.root, "open root scope");
      if kind == ScopeKind::Plain {
        return Ok(self.root);
      }
      return self.open(kind);
    };

    let scope = self.store.insert(HandleScope::new(kind, Some(parent)))?;
    self.store.get_mut(parent)?.child = Some(scope);
    self.current = Some(scope);
    self.open += 1;
    trace!(target: "napi_env::scope", ?scope, ?parent, ?kind, "open scope");
    Ok(scope)
  }

  /// Unlinks `scope` from the chain and returns the handles it owned.
  ///
  /// The root scope stays in the table; only its handles and child link are reset.
  pub fn close(&mut self, scope: ScopeId) -> Result<Vec<HandleId>, NapiError> {
    let inactive_root = scope == self.root && !self.root_open;
    if self.open == 0 || inactive_root || !self.store.contains(scope) {
      debug!(target: "napi_env::scope", ?scope, open = self.open, "handle scope mismatch");
      return Err(Status::HandleScopeMismatch.into());
    }

    let (parent, child) = {
      let s = self.store.get(scope)?;
      (s.parent, s.child)
    };
    if self.current == Some(scope) {
      self.current = parent;
    }
    if let Some(parent) = parent {
      self.store.get_mut(parent)?.child = child;
    }
    if let Some(child) = child {
      self.store.get_mut(child)?.parent = parent;
    }
    self.open -= 1;

    let handles = if scope == self.root {
      self.root_open = false;
      let root = self.store.get_mut(scope)?;
      root.child = None;
      core::mem::take(&mut root.handles)
    } else {
      self.store.remove(scope)?.handles
    };
    trace!(target: "napi_env::scope", ?scope, handles = handles.len(), "close scope");
    Ok(handles)
  }

  pub fn attach(&mut self, scope: ScopeId, handle: HandleId) -> Result<(), VmError> {
    self.store.get_mut(scope)?.handles.push(handle);
    Ok(())
  }

  pub fn handles(&self, scope: ScopeId) -> Result<&[HandleId], VmError> {
    Ok(&self.store.get(scope)?.handles)
  }

  pub fn parent(&self, scope: ScopeId) -> Result<Option<ScopeId>, VmError> {
    Ok(self.store.get(scope)?.parent)
  }

  pub fn child(&self, scope: ScopeId) -> Result<Option<ScopeId>, VmError> {
    Ok(self.store.get(scope)?.child)
  }

  /// Marks the escapable `scope` as used and returns the scope the escaped handle belongs in.
  pub fn begin_escape(&mut self, scope: ScopeId) -> Result<ScopeId, NapiError> {
    let s = self
      .store
      .get_mut(scope)
      .map_err(|_| NapiError::Status(Status::HandleScopeMismatch))?;
    if s.kind != ScopeKind::Escapable {
      return Err(Status::HandleScopeMismatch.into());
    }
    if s.escape_called {
      return Err(Status::EscapeCalledTwice.into());
    }
    let parent = s.parent.ok_or(NapiError::Status(Status::HandleScopeMismatch))?;
    s.escape_called = true;
    Ok(parent)
  }

  /// Drops every scope and returns all handles they owned.
  pub fn dispose(&mut self) -> Vec<HandleId> {
    self.current = None;
    self.root_open = false;
    self.open = 0;
    self
      .store
      .drain()
      .into_iter()
      .flat_map(|(_, scope)| scope.handles)
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn root_is_reused_as_outermost_frame() {
    let mut scopes = ScopeStore::new().unwrap();
    let root = scopes.root();
    assert_eq!(scopes.open(ScopeKind::Plain).unwrap(), root);
    let child = scopes.open(ScopeKind::Plain).unwrap();
    assert_eq!(scopes.parent(child).unwrap(), Some(root));

    scopes.close(root).unwrap();
    assert!(matches!(
      scopes.close(root),
      Err(NapiError::Status(Status::HandleScopeMismatch))
    ));
    assert_eq!(scopes.open_count(), 1);
    // The child is still linked but now parentless.
    assert_eq!(scopes.parent(child).unwrap(), None);
    assert_eq!(scopes.current(), Some(child));
    scopes.close(child).unwrap();
    assert_eq!(scopes.current(), None);
    assert_eq!(scopes.open_count(), 0);
    assert!(scopes.handles(root).unwrap().is_empty());
  }

  #[test]
  fn escape_needs_an_escapable_scope() {
    let mut scopes = ScopeStore::new().unwrap();
    let plain = scopes.open(ScopeKind::Plain).unwrap();
    assert!(matches!(
      scopes.begin_escape(plain),
      Err(NapiError::Status(Status::HandleScopeMismatch))
    ));
    let escapable = scopes.open(ScopeKind::Escapable).unwrap();
    assert_eq!(scopes.begin_escape(escapable).unwrap(), plain);
    assert!(matches!(
      scopes.begin_escape(escapable),
      Err(NapiError::Status(Status::EscapeCalledTwice))
    ));
  }
}
