//! Headless script runner.
//!
//! Compiles each script file into a task and drives the manager on a tokio
//! interval until every task reaches a terminal state. Ships a small
//! capability set (`print`, `log`, `wait`) so scripts have something to
//! act on outside a real host.

use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use khscript::cli;
use khscript::{
    CapabilityRegistry, Config, EnvFeed, ResourceGuard, ScriptKind, TaskManager,
};

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("khscript: {e}");
            eprintln!("{}", cli::usage());
            std::process::exit(2);
        }
    };

    let filter = if args.debug {
        EnvFilter::new("khscript=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("khscript=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("khscript: {e}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(level) = args.strictness {
        config.guard_strictness = level;
    }

    let mut guard = ResourceGuard::new(config.guard_strictness, config.guard_overrides);
    guard.on_warning(|kind, data| {
        warn!(
            script = %data.script,
            context = %data.context,
            observed = data.observed,
            limit = data.limit,
            "guard warning: {kind:?}"
        );
    });

    let capabilities = build_capabilities();
    let mut env = EnvFeed::new();
    let mut manager = TaskManager::new(config.max_scripts_per_tick, config.retention());

    for path in &args.scripts {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("khscript: cannot read {}: {e}", path.display());
                std::process::exit(1);
            }
        };
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let id = manager.spawn(&name, &source, ScriptKind::User);
        if let Some(task) = manager.get(id) {
            for diag in task.diagnostics() {
                warn!(script = %name, line = diag.line, "{}", diag.message);
            }
        }
    }

    let mut interval = tokio::time::interval(Duration::from_millis(args.tick_ms));
    let mut tick_count: u64 = 0;
    loop {
        interval.tick().await;
        tick_count += 1;
        env.refresh([
            ("TICK", tick_count.to_string()),
            ("SCRIPT_COUNT", manager.len().to_string()),
        ]);
        manager.tick(&capabilities, &env, &mut guard);
        if manager.all_terminal() {
            break;
        }
    }

    let stats = manager.stats();
    info!(
        ticks = tick_count,
        stopped = stats.stopped,
        errored = stats.errored,
        "all scripts finished"
    );
    for id in manager.ids() {
        if let Some(task) = manager.get(id) {
            if let Some(err) = task.last_error() {
                eprintln!("khscript: {}: {err}", task.name());
            }
        }
    }
    if stats.errored > 0 {
        std::process::exit(1);
    }
}

fn build_capabilities() -> CapabilityRegistry {
    let mut capabilities = CapabilityRegistry::new();
    capabilities.register_sync("print", "write a line to stdout", |args| {
        println!("{args}");
    });
    capabilities.register_sync("log", "write a line to the engine log", |args| {
        info!("script log: {args}");
    });
    // `wait <ms>` completes after a delay, letting scripts pace themselves.
    capabilities.register_fn("wait", "sleep for the given milliseconds", |args, done| {
        let ms: u64 = args.trim().parse().unwrap_or(0);
        if ms == 0 {
            done.complete();
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            done.complete();
        });
    });
    capabilities
}
