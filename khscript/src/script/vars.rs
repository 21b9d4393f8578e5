//! Variable store.
//!
//! Variables are stored as raw strings and parsed into values at use sites.
//! Three binding kinds exist: `let` (mutable, scoped), `const` (immutable),
//! and `legacy` (created implicitly by `set` on an unbound name). Stores
//! chain to an optional parent; reads walk the chain, writes land in the
//! nearest scope that already owns the name.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Let,
    Const,
    Legacy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarError {
    #[error("cannot redeclare '{0}': already a const in this scope")]
    Redeclaration(String),
    #[error("cannot assign to const '{0}'")]
    ConstAssign(String),
}

#[derive(Debug, Clone)]
struct Binding {
    value: String,
    kind: VarKind,
}

/// One scope level. `parent` is `None` for the task-level root scope.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    bindings: HashMap<String, Binding>,
    parent: Option<Box<VarStore>>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A nested scope whose reads fall through to `self`.
    pub fn child(self) -> Self {
        VarStore {
            bindings: HashMap::new(),
            parent: Some(Box::new(self)),
        }
    }

    /// Declare with `let`. Re-declaring an existing `let`/`legacy` binding
    /// in the same scope rebinds it; shadowing a same-scope const is an
    /// error.
    pub fn declare_let(&mut self, name: &str, value: String) -> Result<(), VarError> {
        if let Some(b) = self.bindings.get(name) {
            if b.kind == VarKind::Const {
                return Err(VarError::Redeclaration(name.to_owned()));
            }
        }
        self.bindings.insert(
            name.to_owned(),
            Binding {
                value,
                kind: VarKind::Let,
            },
        );
        Ok(())
    }

    /// Declare with `const`. The name must not exist in the current scope.
    pub fn declare_const(&mut self, name: &str, value: String) -> Result<(), VarError> {
        if self.bindings.contains_key(name) {
            return Err(VarError::Redeclaration(name.to_owned()));
        }
        self.bindings.insert(
            name.to_owned(),
            Binding {
                value,
                kind: VarKind::Const,
            },
        );
        Ok(())
    }

    /// Assign to the nearest scope that owns `name`. Unbound names get a
    /// legacy binding in the local scope.
    pub fn set(&mut self, name: &str, value: String) -> Result<(), VarError> {
        if let Some(b) = self.bindings.get_mut(name) {
            if b.kind == VarKind::Const {
                return Err(VarError::ConstAssign(name.to_owned()));
            }
            b.value = value;
            return Ok(());
        }
        if let Some(parent) = self.parent.as_mut() {
            if parent.has(name) {
                return parent.set(name, value);
            }
        }
        self.bindings.insert(
            name.to_owned(),
            Binding {
                value,
                kind: VarKind::Legacy,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        match self.bindings.get(name) {
            Some(b) => Some(b.value.as_str()),
            None => self.parent.as_ref().and_then(|p| p.get(name)),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn kind(&self, name: &str) -> Option<VarKind> {
        match self.bindings.get(name) {
            Some(b) => Some(b.kind),
            None => self.parent.as_ref().and_then(|p| p.kind(name)),
        }
    }

    pub fn is_const(&self, name: &str) -> bool {
        self.kind(name) == Some(VarKind::Const)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.bindings.remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
        self.parent = None;
    }

    pub fn len(&self) -> usize {
        self.bindings.len() + self.parent.as_ref().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current state, used to restore around function calls.
    pub fn snapshot(&self) -> VarStore {
        self.clone()
    }

    pub fn restore(&mut self, snap: VarStore) {
        *self = snap;
    }

    /// Names bound in this scope only.
    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
