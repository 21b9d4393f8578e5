//! Script execution.
//!
//! A [`ScriptTask`] owns a compiled instruction queue and advances one
//! capability invocation per host tick. Control-flow instructions
//! (assignments, conditional arms, loop expansion, calls) are processed
//! inline within the tick until a leaf invocation dispatches or the queue
//! empties; an inline step budget keeps invoke-free loops from stalling
//! the host.
//!
//! Loops never pre-expand into the queue. A `LoopMarker` sits in the queue
//! where the loop runs; each time it reaches the front, one body copy is
//! spliced ahead of it and the marker re-arms behind that copy. `break`
//! discards the nearest marker, `continue` discards only the rest of the
//! current body copy.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::capability::{CapabilityRegistry, Completion, CompletionHandle};
use crate::env::EnvFeed;
use crate::guard::{GuardAction, ResourceGuard};
use crate::script::{
    compile, evaluate, evaluate_condition, substitute, AssignKind, CompileDiagnostic, FunctionDef,
    Instruction, Program, Value, VarStore,
};

/// Queue length at which a task is declared runaway and errored out.
pub const QUEUE_CEILING: usize = 1000;

/// Control-flow steps processed inline in one tick before yielding back to
/// the host. Sits above the guard's loop-iteration caps so the guard sees
/// a runaway loop before the budget cuts the tick short.
const MAX_INLINE_STEPS: usize = 25_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptState {
    Running,
    Paused,
    Stopped,
    Error,
    /// A capability invocation is in flight.
    Waiting,
}

impl ScriptState {
    /// Stopped and Error are terminal; the task can only leave them
    /// through `restart`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScriptState::Stopped | ScriptState::Error)
    }
}

/// Who launched the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    User,
    System,
    Remote,
}

/// Everything a task needs from its surroundings for one tick.
pub struct TickCtx<'a> {
    pub capabilities: &'a CapabilityRegistry,
    pub env: &'a EnvFeed,
    pub guard: &'a mut ResourceGuard,
}

pub struct ScriptTask {
    id: u64,
    name: String,
    source: String,
    kind: ScriptKind,
    tags: HashSet<String>,
    state: ScriptState,
    queue: VecDeque<Instruction>,
    functions: HashMap<String, FunctionDef>,
    diagnostics: Vec<CompileDiagnostic>,
    vars: VarStore,
    frames: Vec<VarStore>,
    return_slot: Option<Value>,
    in_flight: Option<CompletionHandle>,
    started_at: Instant,
    stopped_at: Option<Instant>,
    executed_commands: u64,
    last_error: Option<String>,
}

impl ScriptTask {
    pub fn new(id: u64, name: &str, source: &str, kind: ScriptKind) -> Self {
        let program = compile(source);
        let mut task = ScriptTask {
            id,
            name: name.to_owned(),
            source: source.to_owned(),
            kind,
            tags: HashSet::new(),
            state: ScriptState::Running,
            queue: VecDeque::new(),
            functions: HashMap::new(),
            diagnostics: Vec::new(),
            vars: VarStore::new(),
            frames: Vec::new(),
            return_slot: None,
            in_flight: None,
            started_at: Instant::now(),
            stopped_at: None,
            executed_commands: 0,
            last_error: None,
        };
        task.load(program);
        task
    }

    fn load(&mut self, program: Program) {
        self.queue = program.instructions.into();
        self.functions = program.functions;
        self.diagnostics = program.diagnostics;
        if self.queue.len() > QUEUE_CEILING {
            self.enter_error(format!(
                "script compiles to more than {QUEUE_CEILING} queued instructions"
            ));
        } else if self.queue.is_empty() {
            self.enter_stopped();
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn state(&self) -> ScriptState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn diagnostics(&self) -> &[CompileDiagnostic] {
        &self.diagnostics
    }

    pub fn vars(&self) -> &VarStore {
        &self.vars
    }

    pub fn queued_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn executed_commands(&self) -> u64 {
        self.executed_commands
    }

    pub fn uptime(&self) -> Duration {
        match self.stopped_at {
            Some(at) => at.duration_since(self.started_at),
            None => self.started_at.elapsed(),
        }
    }

    pub fn uptime_formatted(&self) -> String {
        let total = self.uptime().as_secs();
        let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
        if h > 0 {
            format!("{h}h {m:02}m {s:02}s")
        } else if m > 0 {
            format!("{m}m {s:02}s")
        } else {
            format!("{s}s")
        }
    }

    /// How long the task has been in a terminal state.
    pub fn stopped_since(&self) -> Option<Duration> {
        self.stopped_at.map(|at| at.elapsed())
    }

    // ── Tags ──────────────────────────────────────────────────────────────

    pub fn add_tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_lowercase());
    }

    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.remove(&tag.to_lowercase());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(&tag.to_lowercase())
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    pub fn pause(&mut self) {
        if matches!(self.state, ScriptState::Running | ScriptState::Waiting) {
            self.state = ScriptState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == ScriptState::Paused {
            self.state = if self.in_flight.is_some() {
                ScriptState::Waiting
            } else {
                ScriptState::Running
            };
        }
    }

    pub fn stop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.queue.clear();
        self.frames.clear();
        if let Some(handle) = self.in_flight.take() {
            handle.cancel();
        }
        self.enter_stopped();
    }

    /// Recompile the source and start over with fresh state.
    pub fn restart(&mut self) {
        self.stop();
        let program = compile(&self.source);
        self.vars = VarStore::new();
        self.frames.clear();
        self.return_slot = None;
        self.last_error = None;
        self.executed_commands = 0;
        self.started_at = Instant::now();
        self.stopped_at = None;
        self.state = ScriptState::Running;
        self.load(program);
    }

    fn enter_stopped(&mut self) {
        self.state = ScriptState::Stopped;
        self.stopped_at = Some(Instant::now());
        debug!(script = %self.name, "script stopped");
    }

    fn enter_error(&mut self, message: String) {
        warn!(script = %self.name, %message, "script errored");
        self.last_error = Some(message);
        self.queue.clear();
        self.frames.clear();
        if let Some(handle) = self.in_flight.take() {
            handle.cancel();
        }
        self.state = ScriptState::Error;
        self.stopped_at = Some(Instant::now());
    }

    // ── Tick ──────────────────────────────────────────────────────────────

    /// Advance by at most one capability invocation.
    pub fn tick(&mut self, ctx: &mut TickCtx<'_>) {
        match self.state {
            ScriptState::Running => {}
            ScriptState::Waiting => {
                let settled = match &self.in_flight {
                    Some(handle) => handle.is_settled(),
                    None => true,
                };
                if !settled {
                    return;
                }
                if let Some(handle) = self.in_flight.take() {
                    match handle.status() {
                        Completion::Failed(message) => {
                            warn!(script = %self.name, %message, "capability failed");
                            self.last_error = Some(message);
                        }
                        Completion::Cancelled => return,
                        _ => {}
                    }
                }
                self.state = ScriptState::Running;
            }
            _ => return,
        }

        ctx.guard.start_cpu_measure(&self.name);
        self.dispatch_until_invoke(ctx);
        if let GuardAction::Pause(_) = ctx.guard.end_cpu_measure(&self.name) {
            debug!(script = %self.name, "cpu budget exceeded, guard paused script");
        }
    }

    /// Process control flow inline until a capability dispatches, the
    /// queue drains, or the inline budget runs out.
    fn dispatch_until_invoke(&mut self, ctx: &mut TickCtx<'_>) {
        for _ in 0..MAX_INLINE_STEPS {
            let Some(instr) = self.queue.pop_front() else {
                self.enter_stopped();
                return;
            };
            match instr {
                Instruction::Invoke { name, args } => {
                    self.dispatch_invoke(ctx, &name, &args);
                    return;
                }
                Instruction::Assign { name, expr, kind } => {
                    self.run_assign(ctx, &name, &expr, kind);
                }
                Instruction::ConditionalChain { arms } => {
                    let chosen = arms.into_iter().find(|arm| match &arm.cond {
                        Some(cond) => self.eval_condition(ctx, cond),
                        None => true,
                    });
                    if let Some(arm) = chosen {
                        self.splice_front(arm.body);
                    }
                }
                Instruction::LoopMarker {
                    body,
                    cond,
                    remaining,
                } => {
                    if !self.run_loop_marker(ctx, body, cond, remaining) {
                        return;
                    }
                }
                Instruction::Break => self.run_break(ctx),
                Instruction::Continue => self.run_continue(),
                Instruction::ForStep(step) => {
                    self.queue.push_front(*step);
                }
                Instruction::Call { name, args, target } => {
                    self.run_call(ctx, &name, &args, target);
                }
                Instruction::Return { expr } => self.run_return(ctx, expr),
                Instruction::FrameRestore { target } => self.run_frame_restore(ctx, target),
            }
            if self.state.is_terminal() {
                return;
            }
        }
    }

    fn dispatch_invoke(&mut self, ctx: &mut TickCtx<'_>, name: &str, args: &str) {
        if name.eq_ignore_ascii_case("wait") {
            ctx.guard.mark_loop_yield(&self.name);
        }
        let Some(cap) = ctx.capabilities.get(name) else {
            let message = format!("unknown capability '{name}'");
            warn!(script = %self.name, %message, "invoke skipped");
            self.last_error = Some(message);
            return;
        };
        ctx.guard.check_action_rate(&self.name);
        let substituted = {
            let vars = &self.vars;
            let env = ctx.env;
            let resolver = move |n: &str| {
                vars.get(n)
                    .map(str::to_owned)
                    .or_else(|| env.get(n).map(str::to_owned))
            };
            substitute(args, &resolver)
        };
        let handle = CompletionHandle::new();
        self.in_flight = Some(handle.clone());
        self.executed_commands += 1;
        self.state = ScriptState::Waiting;
        cap.invoke(&substituted, handle);
    }

    fn run_assign(&mut self, ctx: &TickCtx<'_>, name: &str, expr: &str, kind: AssignKind) {
        let value = self.eval(ctx, expr);
        let raw = value.to_string();
        let result = match kind {
            AssignKind::Let => self.vars.declare_let(name, raw),
            AssignKind::Const => self.vars.declare_const(name, raw),
            AssignKind::Set => self.vars.set(name, raw),
        };
        if let Err(err) = result {
            warn!(script = %self.name, %err, "assignment rejected");
            self.last_error = Some(err.to_string());
        }
    }

    /// Expand one loop body copy. Returns false when the tick must end
    /// (the guard stopped or paused the script).
    fn run_loop_marker(
        &mut self,
        ctx: &mut TickCtx<'_>,
        body: Vec<Instruction>,
        cond: Option<String>,
        remaining: Option<u32>,
    ) -> bool {
        if remaining == Some(0) {
            return true;
        }
        if let Some(cond) = &cond {
            if !self.eval_condition(ctx, cond) {
                return true;
            }
        }
        match ctx.guard.check_loop_iteration(&self.name) {
            GuardAction::Stop | GuardAction::Cleanup => {
                warn!(script = %self.name, "runaway loop stopped by guard");
                self.enter_stopped();
                return false;
            }
            GuardAction::Pause(_) => {
                // Re-arm so the loop resumes where it left off.
                self.queue.push_front(Instruction::LoopMarker {
                    body,
                    cond,
                    remaining,
                });
                return false;
            }
            GuardAction::Allow => {}
        }
        let marker = Instruction::LoopMarker {
            body: body.clone(),
            cond,
            remaining: remaining.map(|n| n.saturating_sub(1)),
        };
        self.queue.push_front(marker);
        self.splice_front(body);
        true
    }

    fn run_break(&mut self, ctx: &mut TickCtx<'_>) {
        while let Some(instr) = self.queue.pop_front() {
            match instr {
                Instruction::LoopMarker { .. } => return,
                Instruction::FrameRestore { target } => self.run_frame_restore(ctx, target),
                _ => {}
            }
        }
    }

    // Stops short of a `ForStep` so the increment still runs; `break`
    // discards it along with the marker.
    fn run_continue(&mut self) {
        while let Some(instr) = self.queue.front() {
            if matches!(
                instr,
                Instruction::LoopMarker { .. }
                    | Instruction::ForStep(_)
                    | Instruction::FrameRestore { .. }
            ) {
                return;
            }
            self.queue.pop_front();
        }
    }

    fn run_call(
        &mut self,
        ctx: &mut TickCtx<'_>,
        name: &str,
        args: &[String],
        target: Option<(String, AssignKind)>,
    ) {
        let Some(def) = self.functions.get(name).cloned() else {
            let message = format!("unknown function '{name}'");
            warn!(script = %self.name, %message, "call skipped");
            self.last_error = Some(message);
            return;
        };
        if !ctx.guard.check_recursion(&self.name) {
            self.last_error = Some(format!("recursion limit reached calling '{name}'"));
            return;
        }
        // Calls are not closures: the whole store is snapshotted and
        // restored afterwards, so callee writes do not escape.
        self.frames.push(self.vars.snapshot());
        for (idx, param) in def.params.iter().enumerate() {
            let value = match args.get(idx) {
                Some(arg) => self.eval(ctx, arg).to_string(),
                None => String::new(),
            };
            if let Err(err) = self.vars.declare_let(param, value) {
                self.last_error = Some(err.to_string());
            }
        }
        self.queue.push_front(Instruction::FrameRestore { target });
        self.splice_front(def.body);
    }

    fn run_return(&mut self, ctx: &TickCtx<'_>, expr: Option<String>) {
        self.return_slot = expr.map(|e| self.eval(ctx, &e));
        // Skip the rest of the callee body.
        while let Some(instr) = self.queue.front() {
            if matches!(instr, Instruction::FrameRestore { .. }) {
                return;
            }
            self.queue.pop_front();
        }
    }

    fn run_frame_restore(&mut self, ctx: &mut TickCtx<'_>, target: Option<(String, AssignKind)>) {
        ctx.guard.exit_recursion(&self.name);
        if let Some(snapshot) = self.frames.pop() {
            self.vars.restore(snapshot);
        }
        if let Some((name, kind)) = target {
            let value = self.return_slot.take().unwrap_or(Value::Null);
            let raw = value.to_string();
            let result = match kind {
                AssignKind::Const => self.vars.declare_const(&name, raw),
                _ => self.vars.declare_let(&name, raw),
            };
            if let Err(err) = result {
                self.last_error = Some(err.to_string());
            }
        } else {
            self.return_slot = None;
        }
    }

    fn splice_front(&mut self, body: Vec<Instruction>) {
        for instr in body.into_iter().rev() {
            self.queue.push_front(instr);
        }
        if self.queue.len() > QUEUE_CEILING {
            self.enter_error(format!(
                "instruction queue exceeded {QUEUE_CEILING} entries"
            ));
        }
    }

    fn eval(&self, ctx: &TickCtx<'_>, expr: &str) -> Value {
        let vars = &self.vars;
        let env = ctx.env;
        let resolver = move |n: &str| {
            vars.get(n)
                .map(str::to_owned)
                .or_else(|| env.get(n).map(str::to_owned))
        };
        evaluate(expr, &resolver)
    }

    fn eval_condition(&self, ctx: &TickCtx<'_>, cond: &str) -> bool {
        let vars = &self.vars;
        let env = ctx.env;
        let resolver = move |n: &str| {
            vars.get(n)
                .map(str::to_owned)
                .or_else(|| env.get(n).map(str::to_owned))
        };
        evaluate_condition(cond, &resolver)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{GuardOverrides, Strictness};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Fixture {
        capabilities: CapabilityRegistry,
        env: EnvFeed,
        guard: ResourceGuard,
        output: Arc<Mutex<Vec<String>>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_guard(ResourceGuard::new(
                Strictness::Off,
                GuardOverrides::default(),
            ))
        }

        fn with_guard(guard: ResourceGuard) -> Self {
            let output = Arc::new(Mutex::new(Vec::new()));
            let mut capabilities = CapabilityRegistry::new();
            let sink = output.clone();
            capabilities.register_sync("print", "", move |args| {
                sink.lock().push(args.to_owned());
            });
            capabilities.register_sync("wait", "", |_| {});
            Fixture {
                capabilities,
                env: EnvFeed::new(),
                guard,
                output,
            }
        }

        fn tick(&mut self, task: &mut ScriptTask) {
            let mut ctx = TickCtx {
                capabilities: &self.capabilities,
                env: &self.env,
                guard: &mut self.guard,
            };
            task.tick(&mut ctx);
        }

        fn run(&mut self, task: &mut ScriptTask, max_ticks: usize) {
            for _ in 0..max_ticks {
                if task.state().is_terminal() {
                    return;
                }
                self.tick(task);
            }
        }

        fn printed(&self) -> Vec<String> {
            self.output.lock().clone()
        }
    }

    fn task(source: &str) -> ScriptTask {
        ScriptTask::new(1, "test", source, ScriptKind::User)
    }

    #[test]
    fn one_invoke_per_tick() {
        let mut fx = Fixture::new();
        let mut t = task("print a\nprint b\nprint c");
        fx.tick(&mut t);
        assert_eq!(fx.printed(), vec!["a"]);
        fx.tick(&mut t);
        fx.tick(&mut t);
        assert_eq!(fx.printed(), vec!["a", "b", "c"]);
        fx.tick(&mut t);
        assert_eq!(t.state(), ScriptState::Stopped);
        assert_eq!(t.executed_commands(), 3);
    }

    #[test]
    fn assignment_and_conditional_same_tick() {
        let mut fx = Fixture::new();
        let mut t = task("let x = 5\nif x > 3 {\nprint big\n} else {\nprint small\n}");
        fx.tick(&mut t);
        assert_eq!(fx.printed(), vec!["big"]);
        assert_eq!(t.vars().get("x"), Some("5"));
    }

    #[test]
    fn else_arm_taken() {
        let mut fx = Fixture::new();
        let mut t = task("let x = 1\nif x > 3 {\nprint big\n} else {\nprint small\n}");
        fx.run(&mut t, 10);
        assert_eq!(fx.printed(), vec!["small"]);
    }

    #[test]
    fn bounded_loop_runs_exactly_n_times() {
        let mut fx = Fixture::new();
        let mut t = task("loop 3 {\nprint x\n}");
        fx.run(&mut t, 20);
        assert_eq!(fx.printed(), vec!["x", "x", "x"]);
        assert_eq!(t.state(), ScriptState::Stopped);
    }

    #[test]
    fn while_loop_rechecks_condition() {
        let mut fx = Fixture::new();
        let mut t = task("let i = 0\nwhile i < 3 {\nprint $i\ni = i + 1\n}\nprint done");
        fx.run(&mut t, 30);
        assert_eq!(fx.printed(), vec!["0", "1", "2", "done"]);
    }

    #[test]
    fn for_loop_desugars_and_runs() {
        let mut fx = Fixture::new();
        let mut t = task("for (let i = 0; i < 3; i++) {\nprint $i\n}");
        fx.run(&mut t, 30);
        assert_eq!(fx.printed(), vec!["0", "1", "2"]);
    }

    #[test]
    fn continue_in_for_loop_runs_increment() {
        let mut fx = Fixture::new();
        let src = "for (let i = 0; i < 3; i++) {\nprint $i\ncontinue\nprint skipped\n}";
        let mut t = task(src);
        fx.run(&mut t, 30);
        assert_eq!(fx.printed(), vec!["0", "1", "2"]);
        assert_eq!(t.state(), ScriptState::Stopped);
    }

    #[test]
    fn break_in_for_loop_skips_increment() {
        let mut fx = Fixture::new();
        let src = "let i = 0\nfor (; i < 5; i++) {\nbreak\n}\nprint $i";
        let mut t = task(src);
        fx.run(&mut t, 30);
        assert_eq!(fx.printed(), vec!["0"]);
    }

    #[test]
    fn break_exits_infinite_loop() {
        let mut fx = Fixture::new();
        let mut t = task("loop {\nprint once\nbreak\n}\nprint after");
        fx.run(&mut t, 10);
        assert_eq!(fx.printed(), vec!["once", "after"]);
        assert_eq!(t.state(), ScriptState::Stopped);
    }

    #[test]
    fn continue_preserves_marker() {
        let mut fx = Fixture::new();
        let mut t =
            task("let i = 0\nwhile i < 3 {\ni = i + 1\nprint $i\ncontinue\nprint skipped\n}");
        fx.run(&mut t, 30);
        assert_eq!(fx.printed(), vec!["1", "2", "3"]);
    }

    #[test]
    fn conditional_break_in_loop() {
        let mut fx = Fixture::new();
        let mut t = task(
            "let i = 0\nloop {\ni = i + 1\nprint $i\nif i >= 2 {\nbreak\n}\n}\nprint end",
        );
        fx.run(&mut t, 30);
        assert_eq!(fx.printed(), vec!["1", "2", "end"]);
    }

    #[test]
    fn unknown_capability_is_nonfatal() {
        let mut fx = Fixture::new();
        let mut t = task("vanish\nprint still_here");
        fx.run(&mut t, 10);
        assert_eq!(fx.printed(), vec!["still_here"]);
        assert!(t.last_error().unwrap().contains("vanish"));
        assert_eq!(t.state(), ScriptState::Stopped);
    }

    #[test]
    fn failed_capability_records_error_and_continues() {
        let mut fx = Fixture::new();
        fx.capabilities.register_fn("explode", "", |_, done| {
            done.fail("boom");
        });
        let mut t = task("explode\nprint after");
        fx.run(&mut t, 10);
        assert_eq!(t.last_error(), Some("boom"));
        assert_eq!(fx.printed(), vec!["after"]);
    }

    #[test]
    fn pending_capability_blocks_progress() {
        let mut fx = Fixture::new();
        let handles: Arc<Mutex<Vec<CompletionHandle>>> = Arc::new(Mutex::new(Vec::new()));
        let held = handles.clone();
        fx.capabilities.register_fn("slow", "", move |_, done| {
            held.lock().push(done);
        });
        let mut t = task("slow\nprint after");
        fx.tick(&mut t);
        assert_eq!(t.state(), ScriptState::Waiting);
        fx.tick(&mut t);
        fx.tick(&mut t);
        assert!(fx.printed().is_empty());
        handles.lock()[0].complete();
        fx.tick(&mut t);
        fx.tick(&mut t);
        assert_eq!(fx.printed(), vec!["after"]);
    }

    #[test]
    fn substitution_uses_vars_then_env() {
        let mut fx = Fixture::new();
        fx.env.set("WORLD", "earth");
        let mut t = task("let who = moon\nprint $who and $WORLD");
        fx.run(&mut t, 10);
        assert_eq!(fx.printed(), vec!["moon and earth"]);
    }

    #[test]
    fn const_assignment_error_is_nonfatal() {
        let mut fx = Fixture::new();
        let mut t = task("const k = 1\nk = 2\nprint $k");
        fx.run(&mut t, 10);
        assert_eq!(fx.printed(), vec!["1"]);
        assert!(t.last_error().unwrap().contains("const"));
    }

    #[test]
    fn queue_overflow_errors_task() {
        let mut fx = Fixture::new();
        // Branching recursion grows the queue faster than it drains. The
        // guard is off, so only the queue ceiling contains it.
        let src = "fn f() {\nf()\nf()\n}\nf()";
        let mut t = task(src);
        fx.run(&mut t, 20);
        assert_eq!(t.state(), ScriptState::Error);
        assert!(t.last_error().unwrap().contains("queue"));
    }

    #[test]
    fn oversized_script_errors_at_load() {
        let src = "print x\n".repeat(QUEUE_CEILING + 1);
        let t = task(&src);
        assert_eq!(t.state(), ScriptState::Error);
    }

    #[test]
    fn pause_resume() {
        let mut fx = Fixture::new();
        let mut t = task("print a\nprint b");
        fx.tick(&mut t);
        t.pause();
        fx.tick(&mut t);
        fx.tick(&mut t);
        assert_eq!(fx.printed(), vec!["a"]);
        t.resume();
        fx.tick(&mut t);
        assert_eq!(fx.printed(), vec!["a", "b"]);
    }

    #[test]
    fn stop_is_terminal() {
        let mut fx = Fixture::new();
        let mut t = task("print a\nprint b");
        fx.tick(&mut t);
        t.stop();
        assert_eq!(t.state(), ScriptState::Stopped);
        assert_eq!(t.queued_commands(), 0);
        t.resume();
        fx.tick(&mut t);
        assert_eq!(t.state(), ScriptState::Stopped);
        assert_eq!(fx.printed(), vec!["a"]);
    }

    #[test]
    fn restart_resets_everything() {
        let mut fx = Fixture::new();
        let mut t = task("print a");
        fx.run(&mut t, 5);
        assert_eq!(t.state(), ScriptState::Stopped);
        t.restart();
        assert_eq!(t.state(), ScriptState::Running);
        assert_eq!(t.executed_commands(), 0);
        fx.run(&mut t, 5);
        assert_eq!(fx.printed(), vec!["a", "a"]);
    }

    #[test]
    fn function_call_with_return_value() {
        let mut fx = Fixture::new();
        let mut t = task("fn double(n) {\nreturn n * 2\n}\nlet x = double(21)\nprint $x");
        fx.run(&mut t, 10);
        assert_eq!(fx.printed(), vec!["42"]);
    }

    #[test]
    fn function_vars_restored_after_call() {
        let mut fx = Fixture::new();
        let src = "let x = 1\nfn clobber() {\nx = 99\nlet y = 5\n}\nclobber()\nprint $x $y";
        let mut t = task(src);
        fx.run(&mut t, 10);
        // Callee writes are rolled back with the snapshot.
        assert_eq!(fx.printed(), vec!["1 "]);
    }

    #[test]
    fn return_skips_rest_of_body() {
        let mut fx = Fixture::new();
        let src = "fn f() {\nprint inside\nreturn 1\nprint never\n}\nf()\nprint after";
        let mut t = task(src);
        fx.run(&mut t, 10);
        assert_eq!(fx.printed(), vec!["inside", "after"]);
    }

    #[test]
    fn recursion_guard_refuses_deep_calls() {
        let guard = ResourceGuard::new(Strictness::Medium, GuardOverrides::default());
        let mut fx = Fixture::with_guard(guard);
        let src = "fn down() {\ndown()\n}\ndown()\nprint survived";
        let mut t = task(src);
        fx.run(&mut t, 500);
        assert_eq!(fx.printed(), vec!["survived"]);
        assert!(t.last_error().unwrap().contains("recursion"));
    }

    #[test]
    fn tags() {
        let mut t = task("print a");
        t.add_tag("Combat");
        assert!(t.has_tag("combat"));
        assert!(t.has_tag("COMBAT"));
        t.remove_tag("combat");
        assert!(!t.has_tag("combat"));
    }

    #[test]
    fn empty_script_stops_immediately() {
        let t = task("// nothing\n\n");
        assert_eq!(t.state(), ScriptState::Stopped);
    }

    #[test]
    fn uptime_freezes_on_stop() {
        let mut fx = Fixture::new();
        let mut t = task("print a");
        fx.run(&mut t, 5);
        let a = t.uptime();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(t.uptime(), a);
    }
}
