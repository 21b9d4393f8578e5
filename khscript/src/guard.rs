//! Resource guard.
//!
//! Watches per-script CPU time, action rate, loop behavior, recursion
//! depth, and memory growth, and reacts according to a strictness level.
//! The guard never acts on its own; callers (the task manager and the
//! tasks themselves) ask it before and after doing work and apply the
//! verdict it returns. Warning listeners get a structured record for every
//! violation, advisory or enforced.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How aggressively the guard intervenes. Levels order from most to least
/// permissive; `Off` disables every check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Off,
    Loose,
    #[default]
    Medium,
    Strict,
    Paranoid,
}

/// Numeric limits a strictness level implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardLimits {
    pub cpu_budget: Duration,
    pub actions_per_second: u32,
    pub loop_iterations: u32,
}

impl Strictness {
    pub fn limits(self) -> Option<GuardLimits> {
        let (cpu_ms, actions, iters) = match self {
            Strictness::Off => return None,
            Strictness::Loose => (50, 50, 10_000),
            Strictness::Medium => (10, 20, 5_000),
            Strictness::Strict => (5, 10, 2_000),
            Strictness::Paranoid => (2, 5, 500),
        };
        Some(GuardLimits {
            cpu_budget: Duration::from_millis(cpu_ms),
            actions_per_second: actions,
            loop_iterations: iters,
        })
    }
}

/// Optional per-deployment overrides for the numeric limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardOverrides {
    pub cpu_budget_millis: Option<u64>,
    pub actions_per_second: Option<u32>,
    pub loop_iterations: Option<u32>,
    pub recursion_depth: Option<u32>,
    pub memory_bytes_per_minute: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    CpuOverrun,
    ActionRate,
    LoopRunaway,
    LoopAdvisory,
    RecursionDepth,
    MemoryGrowth,
}

/// Structured record handed to warning listeners.
#[derive(Debug, Clone)]
pub struct WarningData {
    pub script: String,
    pub context: String,
    pub observed: f64,
    pub limit: f64,
    pub timestamp: SystemTime,
}

/// What the caller must do after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    Allow,
    /// Pause the script for the given duration.
    Pause(Duration),
    /// Stop the script for good.
    Stop,
    /// Stop and drop all guard state for the script.
    Cleanup,
}

const CPU_OVERRUN_PAUSE: Duration = Duration::from_secs(1);
const ACTION_THROTTLE: Duration = Duration::from_millis(100);
const LOOP_UNYIELDED: Duration = Duration::from_secs(1);
const LOOP_ADVISORY_UNYIELDED: Duration = Duration::from_millis(500);
const DEFAULT_RECURSION_CAP: u32 = 100;
const DEFAULT_MEMORY_PER_MINUTE: u64 = 1024 * 1024;
const MEMORY_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptStats {
    pub warnings: u32,
    pub cpu_violations: u32,
    pub rate_violations: u32,
    pub loop_violations: u32,
    pub pauses: u32,
    pub stops: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalStats {
    pub total_warnings: u32,
    pub scripts_paused: u32,
    pub scripts_stopped: u32,
}

#[derive(Debug)]
struct ScriptGuardState {
    cpu_start: Option<Instant>,
    actions: VecDeque<Instant>,
    loop_iterations: u32,
    last_yield: Instant,
    recursion_depth: u32,
    memory_window_start: Instant,
    memory_accumulated: u64,
    paused_until: Option<Instant>,
    stopped: bool,
    strictness_override: Option<Strictness>,
    stats: ScriptStats,
}

impl ScriptGuardState {
    fn new() -> Self {
        let now = Instant::now();
        ScriptGuardState {
            cpu_start: None,
            actions: VecDeque::new(),
            loop_iterations: 0,
            last_yield: now,
            recursion_depth: 0,
            memory_window_start: now,
            memory_accumulated: 0,
            paused_until: None,
            stopped: false,
            strictness_override: None,
            stats: ScriptStats::default(),
        }
    }
}

type WarningListener = Box<dyn Fn(WarningKind, &WarningData) + Send + Sync>;

pub struct ResourceGuard {
    strictness: Strictness,
    overrides: GuardOverrides,
    scripts: HashMap<String, ScriptGuardState>,
    listeners: Vec<WarningListener>,
    global_pause_until: Option<Instant>,
    global_stats: GlobalStats,
}

impl Default for ResourceGuard {
    fn default() -> Self {
        Self::new(Strictness::default(), GuardOverrides::default())
    }
}

impl ResourceGuard {
    pub fn new(strictness: Strictness, overrides: GuardOverrides) -> Self {
        ResourceGuard {
            strictness,
            overrides,
            scripts: HashMap::new(),
            listeners: Vec::new(),
            global_pause_until: None,
            global_stats: GlobalStats::default(),
        }
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    pub fn set_strictness(&mut self, level: Strictness) {
        self.strictness = level;
    }

    /// Per-script strictness, overriding the global level.
    pub fn override_strictness(&mut self, script: &str, level: Strictness) {
        self.state(script).strictness_override = Some(level);
    }

    pub fn on_warning<F>(&mut self, listener: F)
    where
        F: Fn(WarningKind, &WarningData) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    // ── Per-tick bookkeeping ──────────────────────────────────────────────

    /// Reset the per-tick loop counters. Call before ticking any script.
    pub fn on_tick_start(&mut self) {
        for state in self.scripts.values_mut() {
            state.loop_iterations = 0;
        }
    }

    pub fn on_tick_end(&mut self) {}

    // ── Admission ─────────────────────────────────────────────────────────

    /// Whether a script may run right now. Expired pauses are cleared as a
    /// side effect.
    pub fn is_script_allowed(&mut self, script: &str) -> bool {
        let now = Instant::now();
        if let Some(until) = self.global_pause_until {
            if now < until {
                return false;
            }
            self.global_pause_until = None;
        }
        let state = self.state(script);
        if state.stopped {
            return false;
        }
        if let Some(until) = state.paused_until {
            if now < until {
                return false;
            }
            state.paused_until = None;
        }
        true
    }

    // ── CPU ───────────────────────────────────────────────────────────────

    pub fn start_cpu_measure(&mut self, script: &str) {
        self.state(script).cpu_start = Some(Instant::now());
    }

    pub fn end_cpu_measure(&mut self, script: &str) -> GuardAction {
        let level = self.level_for(script);
        let Some(limits) = self.effective_limits(level) else {
            return GuardAction::Allow;
        };
        let Some(started) = self.state(script).cpu_start.take() else {
            return GuardAction::Allow;
        };
        let elapsed = started.elapsed();
        if elapsed <= limits.cpu_budget {
            return GuardAction::Allow;
        }
        self.state(script).stats.cpu_violations += 1;
        self.emit(
            WarningKind::CpuOverrun,
            script,
            "tick execution time",
            elapsed.as_secs_f64() * 1000.0,
            limits.cpu_budget.as_secs_f64() * 1000.0,
        );
        if level >= Strictness::Strict {
            self.pause_script(script, CPU_OVERRUN_PAUSE);
            return GuardAction::Pause(CPU_OVERRUN_PAUSE);
        }
        GuardAction::Allow
    }

    // ── Action rate ───────────────────────────────────────────────────────

    pub fn check_action_rate(&mut self, script: &str) -> GuardAction {
        let level = self.level_for(script);
        let Some(limits) = self.effective_limits(level) else {
            return GuardAction::Allow;
        };
        let now = Instant::now();
        let state = self.state(script);
        state.actions.push_back(now);
        while let Some(front) = state.actions.front() {
            if now.duration_since(*front) > Duration::from_secs(1) {
                state.actions.pop_front();
            } else {
                break;
            }
        }
        let observed = state.actions.len() as u32;
        if observed <= limits.actions_per_second {
            return GuardAction::Allow;
        }
        self.state(script).stats.rate_violations += 1;
        self.emit(
            WarningKind::ActionRate,
            script,
            "capability invocations per second",
            observed as f64,
            limits.actions_per_second as f64,
        );
        if level >= Strictness::Medium {
            self.pause_script(script, ACTION_THROTTLE);
            return GuardAction::Pause(ACTION_THROTTLE);
        }
        GuardAction::Allow
    }

    // ── Loops ─────────────────────────────────────────────────────────────

    /// One loop body expansion happened. Escalates from advisory warning
    /// to pause to stop as iteration counts grow without a yield.
    pub fn check_loop_iteration(&mut self, script: &str) -> GuardAction {
        let level = self.level_for(script);
        let Some(limits) = self.effective_limits(level) else {
            return GuardAction::Allow;
        };
        let state = self.state(script);
        state.loop_iterations += 1;
        let iterations = state.loop_iterations;
        let unyielded = state.last_yield.elapsed();

        // Check at the crossing point only, so an unenforced violation
        // warns once per tick instead of once per iteration.
        if iterations == limits.loop_iterations + 1 && unyielded > LOOP_UNYIELDED {
            self.state(script).stats.loop_violations += 1;
            self.emit(
                WarningKind::LoopRunaway,
                script,
                "loop iterations without yielding",
                iterations as f64,
                limits.loop_iterations as f64,
            );
            if level >= Strictness::Strict {
                self.stop_script(script);
                return GuardAction::Stop;
            }
            if level >= Strictness::Medium {
                self.pause_script(script, CPU_OVERRUN_PAUSE);
                return GuardAction::Pause(CPU_OVERRUN_PAUSE);
            }
            return GuardAction::Allow;
        }

        if iterations == limits.loop_iterations / 2 + 1 && unyielded > LOOP_ADVISORY_UNYIELDED {
            self.emit(
                WarningKind::LoopAdvisory,
                script,
                "loop iterations approaching limit",
                iterations as f64,
                limits.loop_iterations as f64,
            );
        }
        GuardAction::Allow
    }

    /// The script yielded (e.g. invoked `wait`); reset the runaway timer.
    pub fn mark_loop_yield(&mut self, script: &str) {
        let state = self.state(script);
        state.last_yield = Instant::now();
        state.loop_iterations = 0;
    }

    // ── Recursion ─────────────────────────────────────────────────────────

    /// Entering a function call. Returns false when the call must be
    /// refused.
    pub fn check_recursion(&mut self, script: &str) -> bool {
        let level = self.level_for(script);
        let cap = self.overrides.recursion_depth.unwrap_or(DEFAULT_RECURSION_CAP);
        let state = self.state(script);
        state.recursion_depth += 1;
        let depth = state.recursion_depth;
        if level == Strictness::Off || depth <= cap {
            return true;
        }
        self.emit(
            WarningKind::RecursionDepth,
            script,
            "nested function calls",
            depth as f64,
            cap as f64,
        );
        if level >= Strictness::Medium {
            // Undo the rejected entry.
            self.exit_recursion(script);
            return false;
        }
        true
    }

    pub fn exit_recursion(&mut self, script: &str) {
        let state = self.state(script);
        state.recursion_depth = state.recursion_depth.saturating_sub(1);
    }

    // ── Memory ────────────────────────────────────────────────────────────

    /// Record a memory delta in bytes; only growth counts against the
    /// per-minute budget.
    pub fn track_memory_usage(&mut self, script: &str, delta: i64) -> GuardAction {
        let level = self.level_for(script);
        if level == Strictness::Off || delta <= 0 {
            return GuardAction::Allow;
        }
        let limit = self
            .overrides
            .memory_bytes_per_minute
            .unwrap_or(DEFAULT_MEMORY_PER_MINUTE);
        let state = self.state(script);
        if state.memory_window_start.elapsed() > MEMORY_WINDOW {
            state.memory_window_start = Instant::now();
            state.memory_accumulated = 0;
        }
        state.memory_accumulated += delta as u64;
        let observed = state.memory_accumulated;
        if observed <= limit {
            return GuardAction::Allow;
        }
        self.emit(
            WarningKind::MemoryGrowth,
            script,
            "memory growth per minute",
            observed as f64,
            limit as f64,
        );
        if level >= Strictness::Strict {
            self.stop_script(script);
            return GuardAction::Cleanup;
        }
        GuardAction::Allow
    }

    // ── Verdict application ───────────────────────────────────────────────

    pub fn pause_script(&mut self, script: &str, duration: Duration) {
        self.state(script).paused_until = Some(Instant::now() + duration);
        self.state(script).stats.pauses += 1;
        self.global_stats.scripts_paused += 1;
    }

    pub fn stop_script(&mut self, script: &str) {
        self.state(script).stopped = true;
        self.state(script).stats.stops += 1;
        self.global_stats.scripts_stopped += 1;
    }

    /// Drop all state for a script that no longer exists.
    pub fn cleanup_script(&mut self, script: &str) {
        self.scripts.remove(script);
    }

    pub fn pause_global(&mut self, duration: Duration) {
        self.global_pause_until = Some(Instant::now() + duration);
    }

    // ── Stats ─────────────────────────────────────────────────────────────

    pub fn script_stats(&self, script: &str) -> ScriptStats {
        self.scripts
            .get(script)
            .map(|s| s.stats)
            .unwrap_or_default()
    }

    pub fn global_stats(&self) -> GlobalStats {
        self.global_stats
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn state(&mut self, script: &str) -> &mut ScriptGuardState {
        self.scripts
            .entry(script.to_owned())
            .or_insert_with(ScriptGuardState::new)
    }

    fn level_for(&mut self, script: &str) -> Strictness {
        self.state(script)
            .strictness_override
            .unwrap_or(self.strictness)
    }

    fn effective_limits(&self, level: Strictness) -> Option<GuardLimits> {
        let mut limits = level.limits()?;
        if let Some(ms) = self.overrides.cpu_budget_millis {
            limits.cpu_budget = Duration::from_millis(ms);
        }
        if let Some(n) = self.overrides.actions_per_second {
            limits.actions_per_second = n;
        }
        if let Some(n) = self.overrides.loop_iterations {
            limits.loop_iterations = n;
        }
        Some(limits)
    }

    fn emit(&mut self, kind: WarningKind, script: &str, context: &str, observed: f64, limit: f64) {
        self.global_stats.total_warnings += 1;
        self.state(script).stats.warnings += 1;
        let data = WarningData {
            script: script.to_owned(),
            context: context.to_owned(),
            observed,
            limit,
            timestamp: SystemTime::now(),
        };
        warn!(
            script,
            context, observed, limit, "resource guard warning: {kind:?}"
        );
        for listener in &self.listeners {
            listener(kind, &data);
        }
    }

    #[cfg(test)]
    fn rewind_yield(&mut self, script: &str, by: Duration) {
        self.state(script).last_yield = Instant::now() - by;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
