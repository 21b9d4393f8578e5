//! Task manager.
//!
//! Owns every live [`ScriptTask`], hands out ids, drives their ticks with a
//! per-tick fairness cap, and garbage-collects tasks that have sat in a
//! terminal state past the retention window. Bulk operations work on all
//! tasks or on a tag.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info};

use crate::capability::CapabilityRegistry;
use crate::env::EnvFeed;
use crate::guard::ResourceGuard;
use crate::task::{ScriptKind, ScriptState, ScriptTask, TickCtx};

pub const DEFAULT_MAX_SCRIPTS_PER_TICK: usize = 10;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub total: usize,
    pub running: usize,
    pub waiting: usize,
    pub paused: usize,
    pub stopped: usize,
    pub errored: usize,
}

pub struct TaskManager {
    tasks: HashMap<u64, ScriptTask>,
    next_id: u64,
    max_scripts_per_tick: usize,
    retention: Duration,
    cursor: usize,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SCRIPTS_PER_TICK, DEFAULT_RETENTION)
    }
}

impl TaskManager {
    pub fn new(max_scripts_per_tick: usize, retention: Duration) -> Self {
        TaskManager {
            tasks: HashMap::new(),
            next_id: 1,
            max_scripts_per_tick: max_scripts_per_tick.max(1),
            retention,
            cursor: 0,
        }
    }

    /// Compile `source` and enqueue it as a new task. Compile problems are
    /// not fatal; they land in the task's diagnostics.
    pub fn spawn(&mut self, name: &str, source: &str, kind: ScriptKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let task = ScriptTask::new(id, name, source, kind);
        info!(
            script = name,
            id,
            diagnostics = task.diagnostics().len(),
            "script spawned"
        );
        self.tasks.insert(id, task);
        id
    }

    pub fn spawn_tagged(
        &mut self,
        name: &str,
        source: &str,
        kind: ScriptKind,
        tags: &[&str],
    ) -> u64 {
        let id = self.spawn(name, source, kind);
        if let Some(task) = self.tasks.get_mut(&id) {
            for tag in tags {
                task.add_tag(tag);
            }
        }
        id
    }

    // ── Tick ──────────────────────────────────────────────────────────────

    /// Advance up to `max_scripts_per_tick` runnable tasks by one step,
    /// rotating the starting point so no task starves, then collect
    /// expired terminal tasks.
    pub fn tick(
        &mut self,
        capabilities: &CapabilityRegistry,
        env: &EnvFeed,
        guard: &mut ResourceGuard,
    ) {
        guard.on_tick_start();

        let mut ids: Vec<u64> = self
            .tasks
            .iter()
            .filter(|(_, t)| {
                matches!(t.state(), ScriptState::Running | ScriptState::Waiting)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        if !ids.is_empty() {
            let start = self.cursor % ids.len();
            let mut ticked = 0;
            for offset in 0..ids.len() {
                if ticked >= self.max_scripts_per_tick {
                    break;
                }
                let id = ids[(start + offset) % ids.len()];
                let Some(task) = self.tasks.get_mut(&id) else {
                    continue;
                };
                if !guard.is_script_allowed(task.name()) {
                    continue;
                }
                let mut ctx = TickCtx {
                    capabilities,
                    env,
                    guard,
                };
                task.tick(&mut ctx);
                ticked += 1;
            }
            self.cursor = self.cursor.wrapping_add(self.max_scripts_per_tick);
        }

        self.collect_garbage(guard);
        guard.on_tick_end();
    }

    fn collect_garbage(&mut self, guard: &mut ResourceGuard) {
        let expired: Vec<u64> = self
            .tasks
            .iter()
            .filter(|(_, t)| t.stopped_since().is_some_and(|d| d >= self.retention))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(task) = self.tasks.remove(&id) {
                guard.cleanup_script(task.name());
                debug!(script = task.name(), id, "expired task collected");
            }
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn get(&self, id: u64) -> Option<&ScriptTask> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut ScriptTask> {
        self.tasks.get_mut(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<ScriptTask> {
        self.tasks.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.tasks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn by_state(&self, state: ScriptState) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .tasks
            .iter()
            .filter(|(_, t)| t.state() == state)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn by_tag(&self, tag: &str) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .tasks
            .iter()
            .filter(|(_, t)| t.has_tag(tag))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.state().is_terminal())
    }

    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            total: self.tasks.len(),
            ..ManagerStats::default()
        };
        for task in self.tasks.values() {
            match task.state() {
                ScriptState::Running => stats.running += 1,
                ScriptState::Waiting => stats.waiting += 1,
                ScriptState::Paused => stats.paused += 1,
                ScriptState::Stopped => stats.stopped += 1,
                ScriptState::Error => stats.errored += 1,
            }
        }
        stats
    }

    // ── Bulk operations ───────────────────────────────────────────────────

    pub fn pause_all(&mut self) {
        for task in self.tasks.values_mut() {
            task.pause();
        }
    }

    pub fn resume_all(&mut self) {
        for task in self.tasks.values_mut() {
            task.resume();
        }
    }

    pub fn stop_all(&mut self) {
        for task in self.tasks.values_mut() {
            task.stop();
        }
    }

    pub fn pause_by_tag(&mut self, tag: &str) -> usize {
        self.for_tag(tag, ScriptTask::pause)
    }

    pub fn resume_by_tag(&mut self, tag: &str) -> usize {
        self.for_tag(tag, ScriptTask::resume)
    }

    pub fn stop_by_tag(&mut self, tag: &str) -> usize {
        self.for_tag(tag, ScriptTask::stop)
    }

    fn for_tag(&mut self, tag: &str, op: impl Fn(&mut ScriptTask)) -> usize {
        let mut touched = 0;
        for task in self.tasks.values_mut() {
            if task.has_tag(tag) {
                op(task);
                touched += 1;
            }
        }
        touched
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{GuardOverrides, Strictness};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct World {
        capabilities: CapabilityRegistry,
        env: EnvFeed,
        guard: ResourceGuard,
        output: Arc<Mutex<Vec<String>>>,
    }

    impl World {
        fn new() -> Self {
            let output = Arc::new(Mutex::new(Vec::new()));
            let mut capabilities = CapabilityRegistry::new();
            let sink = output.clone();
            capabilities.register_sync("print", "", move |args| {
                sink.lock().push(args.to_owned());
            });
            World {
                capabilities,
                env: EnvFeed::new(),
                guard: ResourceGuard::new(Strictness::Off, GuardOverrides::default()),
                output,
            }
        }

        fn tick(&mut self, mgr: &mut TaskManager) {
            mgr.tick(&self.capabilities, &self.env, &mut self.guard);
        }

        fn printed(&self) -> Vec<String> {
            self.output.lock().clone()
        }
    }

    #[test]
    fn spawn_assigns_increasing_ids() {
        let mut mgr = TaskManager::default();
        let a = mgr.spawn("a", "print a", ScriptKind::User);
        let b = mgr.spawn("b", "print b", ScriptKind::System);
        assert!(b > a);
        assert_eq!(mgr.len(), 2);
    }

    #[test]
    fn fairness_cap_rotates() {
        let mut world = World::new();
        let mut mgr = TaskManager::new(1, DEFAULT_RETENTION);
        mgr.spawn("a", "print a\nprint a", ScriptKind::User);
        mgr.spawn("b", "print b\nprint b", ScriptKind::User);
        world.tick(&mut mgr);
        world.tick(&mut mgr);
        let mut first_two = world.printed();
        first_two.sort();
        // One step each, not two steps of the same script.
        assert_eq!(first_two, vec!["a", "b"]);
    }

    #[test]
    fn all_runnable_ticked_under_cap() {
        let mut world = World::new();
        let mut mgr = TaskManager::default();
        for i in 0..3 {
            mgr.spawn(&format!("s{i}"), "print x", ScriptKind::User);
        }
        world.tick(&mut mgr);
        assert_eq!(world.printed().len(), 3);
    }

    #[test]
    fn garbage_collects_expired_tasks() {
        let mut world = World::new();
        let mut mgr = TaskManager::new(10, Duration::ZERO);
        let id = mgr.spawn("a", "print a", ScriptKind::User);
        world.tick(&mut mgr);
        // Task finished; zero retention collects it on the next pass.
        world.tick(&mut mgr);
        world.tick(&mut mgr);
        assert!(mgr.get(id).is_none());
        assert!(mgr.is_empty());
    }

    #[test]
    fn retention_keeps_recent_corpses() {
        let mut world = World::new();
        let mut mgr = TaskManager::new(10, DEFAULT_RETENTION);
        let id = mgr.spawn("a", "print a", ScriptKind::User);
        for _ in 0..5 {
            world.tick(&mut mgr);
        }
        assert_eq!(mgr.get(id).unwrap().state(), ScriptState::Stopped);
    }

    #[test]
    fn bulk_ops_by_tag() {
        let mut world = World::new();
        let mut mgr = TaskManager::default();
        mgr.spawn_tagged("a", "print a\nprint a", ScriptKind::User, &["combat"]);
        mgr.spawn_tagged("b", "print b\nprint b", ScriptKind::User, &["combat"]);
        mgr.spawn_tagged("c", "print c\nprint c", ScriptKind::User, &["mining"]);
        assert_eq!(mgr.pause_by_tag("combat"), 2);
        world.tick(&mut mgr);
        assert_eq!(world.printed(), vec!["c"]);
        assert_eq!(mgr.resume_by_tag("combat"), 2);
        assert_eq!(mgr.stop_by_tag("mining"), 1);
        assert_eq!(mgr.by_state(ScriptState::Stopped), mgr.by_tag("mining"));
    }

    #[test]
    fn stats_count_states() {
        let mut world = World::new();
        let mut mgr = TaskManager::default();
        mgr.spawn("done", "print a", ScriptKind::User);
        mgr.spawn("live", "print a\nprint b\nprint c", ScriptKind::User);
        for _ in 0..3 {
            world.tick(&mut mgr);
        }
        let stats = mgr.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.stopped, 1);
        assert_eq!(stats.running + stats.waiting, 1);
    }

    #[test]
    fn stop_all_is_terminal() {
        let mut world = World::new();
        let mut mgr = TaskManager::default();
        mgr.spawn("a", "print a\nprint b", ScriptKind::User);
        mgr.stop_all();
        world.tick(&mut mgr);
        assert!(world.printed().is_empty());
        assert!(mgr.all_terminal());
    }

    #[test]
    fn guard_pause_skips_script() {
        let mut world = World::new();
        let mut mgr = TaskManager::default();
        mgr.spawn("a", "print a", ScriptKind::User);
        world.guard.pause_script("a", Duration::from_secs(60));
        world.tick(&mut mgr);
        assert!(world.printed().is_empty());
    }
}
