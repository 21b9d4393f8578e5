//! Command-line argument parsing.
//!
//! Usage:
//!   khscript [-t <ms>] [-c <config>] [-s <level>] [-d] <script>...

use std::path::PathBuf;

use crate::guard::Strictness;

/// Parsed command-line arguments.
#[derive(Debug)]
pub struct CliArgs {
    /// Script files to run.
    pub scripts: Vec<PathBuf>,
    /// Engine config file (`-c <file>`).
    pub config: Option<PathBuf>,
    /// Tick interval in milliseconds (`-t <ms>`).
    pub tick_ms: u64,
    /// Guard strictness override (`-s <level>`).
    pub strictness: Option<Strictness>,
    /// Debug logging (`-d`).
    pub debug: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        CliArgs {
            scripts: Vec::new(),
            config: None,
            tick_ms: 50,
            strictness: None,
            debug: false,
        }
    }
}

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(&raw[1..])
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            i += 1;
            args.scripts
                .extend(argv[i..].iter().map(PathBuf::from));
            break;
        }

        if !arg.starts_with('-') {
            args.scripts.push(PathBuf::from(arg));
            i += 1;
            continue;
        }

        match arg {
            "-d" | "--debug" => args.debug = true,
            "-t" | "--tick" => {
                let value = next_value(argv, &mut i, arg)?;
                args.tick_ms = value
                    .parse()
                    .map_err(|_| format!("invalid tick interval '{value}'"))?;
                if args.tick_ms == 0 {
                    return Err("tick interval must be at least 1ms".to_owned());
                }
            }
            "-c" | "--config" => {
                let value = next_value(argv, &mut i, arg)?;
                args.config = Some(PathBuf::from(value));
            }
            "-s" | "--strictness" => {
                let value = next_value(argv, &mut i, arg)?;
                args.strictness = Some(parse_strictness(&value)?);
            }
            other => return Err(format!("unknown option '{other}'")),
        }
        i += 1;
    }

    if args.scripts.is_empty() {
        return Err("no script files given".to_owned());
    }
    Ok(args)
}

fn next_value(argv: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    *i += 1;
    argv.get(*i)
        .cloned()
        .ok_or_else(|| format!("option '{flag}' needs a value"))
}

fn parse_strictness(s: &str) -> Result<Strictness, String> {
    match s.to_lowercase().as_str() {
        "off" => Ok(Strictness::Off),
        "loose" => Ok(Strictness::Loose),
        "medium" => Ok(Strictness::Medium),
        "strict" => Ok(Strictness::Strict),
        "paranoid" => Ok(Strictness::Paranoid),
        other => Err(format!(
            "unknown strictness '{other}' (off, loose, medium, strict, paranoid)"
        )),
    }
}

pub fn usage() -> &'static str {
    "Usage: khscript [-t <ms>] [-c <config>] [-s <level>] [-d] <script>..."
}

// ── Tests ─────────────────────────────────────────────────────────────────────
