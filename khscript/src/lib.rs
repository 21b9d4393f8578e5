//! khscript: an embedded, line-oriented scripting engine.
//!
//! Scripts compile to a queue of discrete instructions and advance one
//! capability invocation per host tick, so a script that loops forever
//! costs the host one bounded slice of work per tick instead of a hung
//! thread. The host supplies the action vocabulary through
//! [`capability::CapabilityRegistry`] and ambient state through
//! [`env::EnvFeed`]; [`guard::ResourceGuard`] polices CPU, rate, loop,
//! recursion, and memory behavior.
//!
//! ```
//! use khscript::capability::CapabilityRegistry;
//! use khscript::env::EnvFeed;
//! use khscript::guard::ResourceGuard;
//! use khscript::manager::TaskManager;
//! use khscript::task::ScriptKind;
//!
//! let mut capabilities = CapabilityRegistry::new();
//! capabilities.register_sync("print", "write a line", |args| println!("{args}"));
//!
//! let env = EnvFeed::new();
//! let mut guard = ResourceGuard::default();
//! let mut manager = TaskManager::default();
//! manager.spawn("hello", "loop 3 {\nprint hi\n}", ScriptKind::User);
//! while !manager.all_terminal() {
//!     manager.tick(&capabilities, &env, &mut guard);
//! }
//! ```

pub mod capability;
pub mod cli;
pub mod config;
pub mod env;
pub mod guard;
pub mod manager;
pub mod script;
pub mod task;

pub use capability::{Capability, CapabilityRegistry, Completion, CompletionHandle};
pub use config::{Config, ConfigError};
pub use env::EnvFeed;
pub use guard::{GuardAction, GuardOverrides, ResourceGuard, Strictness, WarningData, WarningKind};
pub use manager::{ManagerStats, TaskManager};
pub use script::{compile, evaluate, evaluate_condition, Program, Value};
pub use task::{ScriptKind, ScriptState, ScriptTask, TickCtx};
