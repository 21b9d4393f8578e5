//! Host capabilities.
//!
//! Scripts act on the world only by invoking named capabilities supplied by
//! the embedding host. A capability receives its raw argument text (after
//! variable substitution) and a [`CompletionHandle`]; it may settle the
//! handle inline or hand it to a spawned task and settle later. The script
//! task holds at most one unsettled handle at a time and polls it on its
//! tick.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Outcome of a capability invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Pending,
    Done,
    Failed(String),
    Cancelled,
}

/// Shared settle-once flag for one invocation. Cloned freely; the first
/// settle wins and later settles are ignored.
#[derive(Clone, Default)]
pub struct CompletionHandle {
    state: Arc<Mutex<Completion>>,
}

impl Default for Completion {
    fn default() -> Self {
        Completion::Pending
    }
}

impl CompletionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        self.settle(Completion::Done);
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.settle(Completion::Failed(message.into()));
    }

    pub fn cancel(&self) {
        self.settle(Completion::Cancelled);
    }

    fn settle(&self, next: Completion) {
        let mut state = self.state.lock();
        if *state == Completion::Pending {
            *state = next;
        }
    }

    pub fn is_settled(&self) -> bool {
        *self.state.lock() != Completion::Pending
    }

    pub fn status(&self) -> Completion {
        self.state.lock().clone()
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompletionHandle({:?})", self.status())
    }
}

/// A host-provided action scripts can invoke by name.
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Perform the action. `args` is the substituted argument text.
    /// Implementations must eventually settle `done`, inline or from a
    /// spawned task.
    fn invoke(&self, args: &str, done: CompletionHandle);
}

struct FnCapability<F> {
    name: String,
    description: String,
    f: F,
}

impl<F> Capability for FnCapability<F>
where
    F: Fn(&str, CompletionHandle) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn invoke(&self, args: &str, done: CompletionHandle) {
        (self.f)(args, done)
    }
}

/// Name-indexed capability table. Lookup is case-insensitive.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    caps: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, cap: Arc<dyn Capability>) {
        self.caps.insert(cap.name().to_lowercase(), cap);
    }

    /// Register a closure that settles its handle itself.
    pub fn register_fn<F>(&mut self, name: &str, description: &str, f: F)
    where
        F: Fn(&str, CompletionHandle) + Send + Sync + 'static,
    {
        self.register(Arc::new(FnCapability {
            name: name.to_owned(),
            description: description.to_owned(),
            f,
        }));
    }

    /// Register a closure that always completes inline.
    pub fn register_sync<F>(&mut self, name: &str, description: &str, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.register_fn(name, description, move |args, done| {
            f(args);
            done.complete();
        });
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.caps.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.caps.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.caps.values().map(|c| c.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
