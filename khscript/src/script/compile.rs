//! Statement compiler.
//!
//! Turns line-oriented source into a flat instruction stream plus a
//! function table. Compilation is a single forward scan; blocks are found
//! by depth-counting braces (a bare `end` line also closes one level).
//! Conditions are kept as source text and evaluated lazily when the
//! instruction is reached at runtime.
//!
//! Bad lines are not fatal: they are skipped, logged, and recorded as
//! diagnostics. Only unmatched block structure degrades a whole region
//! (the rest of the input becomes the block).

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Hard ceiling on loop iterations, bounded or not-yet-bounded.
pub const MAX_LOOP_ITERATIONS: u32 = 10_000;

// Statement recognizers, compiled once.
static LET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^let\s+([A-Za-z_]\w*)\s*=\s*(.+)$").unwrap());
static CONST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^const\s+([A-Za-z_]\w*)\s*=\s*(.+)$").unwrap());
static ASSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*=\s*([^=].*)$").unwrap());
static INCR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*\+\+$").unwrap());
static DECR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*--$").unwrap());
static IF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^if\b(.*?)\s*\{?$").unwrap());
static ELSE_IF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\}\s*)?else\s+if\b(.*?)\s*\{?$").unwrap());
static ELSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:\}\s*)?else\s*\{?$").unwrap());
static WHILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^while\b(.*?)\s*\{?$").unwrap());
static LOOP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^loop(?:\s+(\d+))?\s*\{?$").unwrap());
static FOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^for\s*\(\s*(.*?)\s*;\s*(.*?)\s*;\s*(.*?)\s*\)\s*\{?$").unwrap()
});
static FN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^fn\s+([A-Za-z_]\w*)\s*\(([^)]*)\)\s*\{?$").unwrap());
static CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*\((.*)\)$").unwrap());
static LET_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(let|const)\s+([A-Za-z_]\w*)\s*=\s*([A-Za-z_]\w*)\s*\((.*)\)$").unwrap()
});
static RETURN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^return(?:\s+(.+))?$").unwrap());
static INVOKE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][\w.]*)\s*(.*)$").unwrap());

/// How an assignment binds its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignKind {
    Let,
    Const,
    Set,
}

/// One arm of a conditional chain. `cond` is `None` for the final `else`.
#[derive(Debug, Clone, PartialEq)]
pub struct Arm {
    pub cond: Option<String>,
    pub body: Vec<Instruction>,
}

/// A single unit of work in a task's queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Invoke a host capability. `args` is raw text; `$var` substitution
    /// happens at dispatch time.
    Invoke { name: String, args: String },
    Assign {
        name: String,
        expr: String,
        kind: AssignKind,
    },
    ConditionalChain { arms: Vec<Arm> },
    /// Loop control point. `remaining` is `None` for an infinite `loop`;
    /// `cond` is re-checked at every expansion for `while`/`for`.
    LoopMarker {
        body: Vec<Instruction>,
        cond: Option<String>,
        remaining: Option<u32>,
    },
    Break,
    Continue,
    /// The `for` increment, kept distinct from plain body instructions so
    /// `continue` runs it before the next condition check.
    ForStep(Box<Instruction>),
    /// Call a script function. `target` receives the return value.
    Call {
        name: String,
        args: Vec<String>,
        target: Option<(String, AssignKind)>,
    },
    Return { expr: Option<String> },
    /// Runtime-only frame boundary appended after a spliced function body.
    FrameRestore { target: Option<(String, AssignKind)> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileDiagnostic {
    pub line: usize,
    pub message: String,
}

/// A compiled script: the top-level instruction stream plus hoisted
/// function definitions.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub functions: HashMap<String, FunctionDef>,
    pub diagnostics: Vec<CompileDiagnostic>,
}

pub fn compile(source: &str) -> Program {
    let lines: Vec<Line> = source
        .lines()
        .enumerate()
        .map(|(i, text)| Line {
            no: i + 1,
            text: strip_comment(text).trim().to_owned(),
        })
        .collect();

    let mut c = Compiler {
        functions: HashMap::new(),
        diagnostics: Vec::new(),
        known_fns: hoist_function_names(&lines),
    };
    let instructions = c.parse_block(&lines);
    Program {
        instructions,
        functions: c.functions,
        diagnostics: c.diagnostics,
    }
}

#[derive(Debug, Clone)]
struct Line {
    no: usize,
    text: String,
}

/// Strip a `//` comment, respecting quoted strings.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), b'\\') => i += 1,
            (None, q @ (b'"' | b'\'')) => quote = Some(q),
            (None, b'/') if bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
        i += 1;
    }
    line
}

/// Function names must be known before their bodies compile, so calls that
/// precede the definition still resolve.
fn hoist_function_names(lines: &[Line]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| FN_RE.captures(&l.text))
        .map(|c| c[1].to_owned())
        .collect()
}

/// True when a line opens a block without using a brace (closed by `end`).
fn is_braceless_header(text: &str) -> bool {
    if text.ends_with('{') {
        return false;
    }
    IF_RE.is_match(text)
        || WHILE_RE.is_match(text)
        || LOOP_RE.is_match(text)
        || FOR_RE.is_match(text)
        || FN_RE.is_match(text)
        || ELSE_IF_RE.is_match(text)
        || ELSE_RE.is_match(text)
}

/// Remove one balanced outer paren pair, as in `if (x > 3)`.
fn strip_parens(s: &str) -> &str {
    let t = s.trim();
    if t.starts_with('(') && t.ends_with(')') {
        let inner = &t[1..t.len() - 1];
        let mut depth = 0i32;
        for b in inner.bytes() {
            match b {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth < 0 {
                        return t;
                    }
                }
                _ => {}
            }
        }
        if depth == 0 {
            return inner.trim();
        }
    }
    t
}

/// Split an argument list on top-level commas, respecting quotes and
/// nested parens.
fn split_args(s: &str) -> Vec<String> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), b'\\') => i += 1,
            (Some(_), _) => {}
            (None, q @ (b'"' | b'\'')) => quote = Some(q),
            (None, b'(') => depth += 1,
            (None, b')') => depth -= 1,
            (None, b',') if depth == 0 => {
                out.push(s[start..i].trim().to_owned());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    out.push(s[start..].trim().to_owned());
    out
}

struct Compiler {
    functions: HashMap<String, FunctionDef>,
    diagnostics: Vec<CompileDiagnostic>,
    known_fns: Vec<String>,
}

impl Compiler {
    fn diag(&mut self, line: usize, message: impl Into<String>) {
        let message = message.into();
        warn!(line, %message, "script compile diagnostic");
        self.diagnostics.push(CompileDiagnostic { line, message });
    }

    fn parse_block(&mut self, lines: &[Line]) -> Vec<Instruction> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let text = lines[i].text.clone();
            if text.is_empty() {
                i += 1;
                continue;
            }
            // Stray closers are tolerated at any level.
            if text == "}" || text == "end" {
                i += 1;
                continue;
            }

            if let Some(caps) = FN_RE.captures(&text) {
                let name = caps[1].to_owned();
                let params: Vec<String> = split_args(&caps[2]);
                let (close, _) = self.block_end(lines, i);
                let body = self.parse_block(&lines[i + 1..close]);
                self.functions
                    .insert(name.clone(), FunctionDef { name, params, body });
                i = (close + 1).min(lines.len());
                continue;
            }

            if IF_RE.is_match(&text) {
                let (instr, next) = self.parse_conditional(lines, i);
                out.push(instr);
                i = next;
                continue;
            }

            // An else arm with no preceding if: skip its whole block.
            if ELSE_IF_RE.is_match(&text) || ELSE_RE.is_match(&text) {
                self.diag(lines[i].no, "else without matching if");
                let (close, _) = self.block_end(lines, i);
                i = (close + 1).min(lines.len());
                continue;
            }

            if let Some(caps) = FOR_RE.captures(&text) {
                let init = caps[1].to_owned();
                let cond = caps[2].to_owned();
                let incr = caps[3].to_owned();
                let (close, _) = self.block_end(lines, i);
                let mut body = self.parse_block(&lines[i + 1..close]);
                if let Some(instr) = self.parse_simple(&incr, lines[i].no) {
                    body.push(Instruction::ForStep(Box::new(instr)));
                }
                if let Some(instr) = self.parse_simple(&init, lines[i].no) {
                    out.push(instr);
                }
                out.push(Instruction::LoopMarker {
                    body,
                    cond: if cond.is_empty() { None } else { Some(cond) },
                    remaining: Some(MAX_LOOP_ITERATIONS),
                });
                i = (close + 1).min(lines.len());
                continue;
            }

            if let Some(caps) = WHILE_RE.captures(&text) {
                let cond = strip_parens(&caps[1]).to_owned();
                let (close, _) = self.block_end(lines, i);
                let body = self.parse_block(&lines[i + 1..close]);
                out.push(Instruction::LoopMarker {
                    body,
                    cond: Some(cond),
                    remaining: Some(MAX_LOOP_ITERATIONS),
                });
                i = (close + 1).min(lines.len());
                continue;
            }

            if let Some(caps) = LOOP_RE.captures(&text) {
                let count = caps
                    .get(1)
                    .map(|m| m.as_str().parse::<u32>().unwrap_or(u32::MAX));
                let (close, _) = self.block_end(lines, i);
                let body = self.parse_block(&lines[i + 1..close]);
                let remaining = match count {
                    Some(n) if n > MAX_LOOP_ITERATIONS => {
                        self.diag(
                            lines[i].no,
                            format!("loop count {n} capped at {MAX_LOOP_ITERATIONS}"),
                        );
                        Some(MAX_LOOP_ITERATIONS)
                    }
                    Some(n) => Some(n),
                    None => None,
                };
                out.push(Instruction::LoopMarker {
                    body,
                    cond: None,
                    remaining,
                });
                i = (close + 1).min(lines.len());
                continue;
            }

            if let Some(instr) = self.parse_simple(&text, lines[i].no) {
                out.push(instr);
            }
            i += 1;
        }
        out
    }

    /// An `if` plus any attached `else if`/`else` arms.
    ///
    /// Chained arms are recognized either on the closing line itself
    /// (`} else if x {`) or on the next non-blank line after the close.
    fn parse_conditional(&mut self, lines: &[Line], start: usize) -> (Instruction, usize) {
        let mut arms = Vec::new();
        let header = IF_RE
            .captures(&lines[start].text)
            .map(|c| strip_parens(&c[1]).to_owned())
            .unwrap_or_default();
        let mut cond = Some(header);
        let mut body_start = start + 1;
        let mut depth = block_open_depth(&lines[start].text);
        loop {
            let (close, rest) = self.scan_close(lines, body_start, depth);
            let body = self.parse_block(&lines[body_start..close]);
            let is_final = cond.is_none();
            arms.push(Arm {
                cond: cond.take(),
                body,
            });
            if is_final || close >= lines.len() {
                return (Instruction::ConditionalChain { arms }, (close + 1).min(lines.len()));
            }

            // Chain continuation on the close line or just after it.
            let (chain_text, after) = if !rest.is_empty() {
                (rest, close + 1)
            } else {
                match lines[close + 1..]
                    .iter()
                    .position(|l| !l.text.is_empty())
                {
                    Some(off)
                        if ELSE_IF_RE.is_match(&lines[close + 1 + off].text)
                            || ELSE_RE.is_match(&lines[close + 1 + off].text) =>
                    {
                        (lines[close + 1 + off].text.clone(), close + 2 + off)
                    }
                    _ => return (Instruction::ConditionalChain { arms }, close + 1),
                }
            };

            if let Some(caps) = ELSE_IF_RE.captures(&chain_text) {
                cond = Some(strip_parens(&caps[1]).to_owned());
            } else if ELSE_RE.is_match(&chain_text) {
                cond = None;
            } else {
                return (Instruction::ConditionalChain { arms }, close + 1);
            }
            body_start = after;
            depth = 1;
        }
    }

    /// Index of the line that closes a block opened at `open`, plus any
    /// text following the closing brace on that line.
    fn block_end(&mut self, lines: &[Line], open: usize) -> (usize, String) {
        let depth = block_open_depth(&lines[open].text);
        self.scan_close(lines, open + 1, depth)
    }

    fn scan_close(&mut self, lines: &[Line], from: usize, mut depth: i32) -> (usize, String) {
        for (idx, line) in lines.iter().enumerate().skip(from) {
            if line.text == "end" {
                depth -= 1;
                if depth <= 0 {
                    return (idx, String::new());
                }
                continue;
            }
            if is_braceless_header(&line.text) {
                depth += 1;
                continue;
            }
            for (pos, b) in line.text.bytes().enumerate() {
                match b {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth <= 0 {
                            return (idx, line.text[pos + 1..].trim().to_owned());
                        }
                    }
                    _ => {}
                }
            }
        }
        // Unmatched open: the rest of the input is the block.
        let at = lines.get(from.saturating_sub(1)).map_or(0, |l| l.no);
        self.diag(at, "unclosed block, treating rest of script as its body");
        (lines.len(), String::new())
    }

    /// One non-block statement, or `None` (with a diagnostic) if the line
    /// is unintelligible.
    fn parse_simple(&mut self, text: &str, line_no: usize) -> Option<Instruction> {
        if text.is_empty() {
            return None;
        }
        if text == "break" {
            return Some(Instruction::Break);
        }
        if text == "continue" {
            return Some(Instruction::Continue);
        }
        if let Some(caps) = RETURN_RE.captures(text) {
            return Some(Instruction::Return {
                expr: caps.get(1).map(|m| m.as_str().to_owned()),
            });
        }
        if let Some(caps) = LET_CALL_RE.captures(text) {
            let fname = caps[3].to_owned();
            if self.known_fns.iter().any(|f| *f == fname) {
                let kind = if &caps[1] == "const" {
                    AssignKind::Const
                } else {
                    AssignKind::Let
                };
                return Some(Instruction::Call {
                    name: fname,
                    args: split_args(&caps[4]),
                    target: Some((caps[2].to_owned(), kind)),
                });
            }
        }
        if let Some(caps) = LET_RE.captures(text) {
            return Some(Instruction::Assign {
                name: caps[1].to_owned(),
                expr: caps[2].to_owned(),
                kind: AssignKind::Let,
            });
        }
        if let Some(caps) = CONST_RE.captures(text) {
            return Some(Instruction::Assign {
                name: caps[1].to_owned(),
                expr: caps[2].to_owned(),
                kind: AssignKind::Const,
            });
        }
        if let Some(caps) = INCR_RE.captures(text) {
            return Some(Instruction::Assign {
                name: caps[1].to_owned(),
                expr: format!("{} + 1", &caps[1]),
                kind: AssignKind::Set,
            });
        }
        if let Some(caps) = DECR_RE.captures(text) {
            return Some(Instruction::Assign {
                name: caps[1].to_owned(),
                expr: format!("{} - 1", &caps[1]),
                kind: AssignKind::Set,
            });
        }
        if let Some(caps) = CALL_RE.captures(text) {
            let name = caps[1].to_owned();
            if self.known_fns.iter().any(|f| *f == name) {
                return Some(Instruction::Call {
                    name,
                    args: split_args(&caps[2]),
                    target: None,
                });
            }
            // Unknown callee: hand it to the host as a capability.
            return Some(Instruction::Invoke {
                name,
                args: caps[2].to_owned(),
            });
        }
        if let Some(caps) = ASSIGN_RE.captures(text) {
            return Some(Instruction::Assign {
                name: caps[1].to_owned(),
                expr: caps[2].trim().to_owned(),
                kind: AssignKind::Set,
            });
        }
        if let Some(caps) = INVOKE_RE.captures(text) {
            return Some(Instruction::Invoke {
                name: caps[1].to_owned(),
                args: caps[2].to_owned(),
            });
        }
        self.diag(line_no, format!("unrecognized statement: {text}"));
        None
    }
}

/// Net block depth a header line contributes.
fn block_open_depth(text: &str) -> i32 {
    if is_braceless_header(text) {
        return 1;
    }
    let mut depth = 0i32;
    for b in text.bytes() {
        match b {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            _ => {}
        }
    }
    depth.max(1)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_with_args() {
        let p = compile("print \"hello\"");
        assert_eq!(
            p.instructions,
            vec![Instruction::Invoke {
                name: "print".into(),
                args: "\"hello\"".into()
            }]
        );
    }

    #[test]
    fn assignment_kinds() {
        let p = compile("let a = 1\nconst b = 2\nc = 3");
        let kinds: Vec<_> = p
            .instructions
            .iter()
            .map(|i| match i {
                Instruction::Assign { kind, .. } => *kind,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(kinds, vec![AssignKind::Let, AssignKind::Const, AssignKind::Set]);
    }

    #[test]
    fn comments_and_blanks_skipped() {
        let p = compile("// header\n\nprint a // trailing\n");
        assert_eq!(p.instructions.len(), 1);
        assert!(p.diagnostics.is_empty());
    }

    #[test]
    fn comment_marker_inside_string_kept() {
        let p = compile("print \"http://x\"");
        match &p.instructions[0] {
            Instruction::Invoke { args, .. } => assert_eq!(args, "\"http://x\""),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn if_else_chain() {
        let src = "if x > 3 {\nprint big\n} else if x > 1 {\nprint mid\n} else {\nprint small\n}";
        let p = compile(src);
        assert_eq!(p.instructions.len(), 1);
        match &p.instructions[0] {
            Instruction::ConditionalChain { arms } => {
                assert_eq!(arms.len(), 3);
                assert_eq!(arms[0].cond.as_deref(), Some("x > 3"));
                assert_eq!(arms[1].cond.as_deref(), Some("x > 1"));
                assert_eq!(arms[2].cond, None);
                assert_eq!(arms[0].body.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn else_on_next_line() {
        let src = "if x {\nprint a\n}\nelse {\nprint b\n}";
        let p = compile(src);
        assert_eq!(p.instructions.len(), 1);
        match &p.instructions[0] {
            Instruction::ConditionalChain { arms } => assert_eq!(arms.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parenthesized_condition() {
        let p = compile("if (x > 3) {\nprint a\n}");
        match &p.instructions[0] {
            Instruction::ConditionalChain { arms } => {
                assert_eq!(arms[0].cond.as_deref(), Some("x > 3"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn infinite_loop_marker() {
        let p = compile("loop {\ntick\n}");
        match &p.instructions[0] {
            Instruction::LoopMarker {
                cond, remaining, body,
            } => {
                assert!(cond.is_none());
                assert!(remaining.is_none());
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bounded_loop() {
        let p = compile("loop 3 {\ntick\n}");
        match &p.instructions[0] {
            Instruction::LoopMarker { remaining, .. } => assert_eq!(*remaining, Some(3)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn oversized_loop_capped() {
        let p = compile("loop 99999 {\ntick\n}");
        match &p.instructions[0] {
            Instruction::LoopMarker { remaining, .. } => {
                assert_eq!(*remaining, Some(MAX_LOOP_ITERATIONS))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(p.diagnostics.len(), 1);
    }

    #[test]
    fn while_loop_carries_condition() {
        let p = compile("while (x < 5) {\nx++\n}");
        match &p.instructions[0] {
            Instruction::LoopMarker { cond, remaining, .. } => {
                assert_eq!(cond.as_deref(), Some("x < 5"));
                assert_eq!(*remaining, Some(MAX_LOOP_ITERATIONS));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn for_loop_desugars() {
        let p = compile("for (let i = 0; i < 3; i++) {\nprint $i\n}");
        assert_eq!(p.instructions.len(), 2);
        match &p.instructions[0] {
            Instruction::Assign { name, kind, .. } => {
                assert_eq!(name, "i");
                assert_eq!(*kind, AssignKind::Let);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &p.instructions[1] {
            Instruction::LoopMarker { body, cond, .. } => {
                assert_eq!(cond.as_deref(), Some("i < 3"));
                // Body plus the appended increment.
                assert_eq!(body.len(), 2);
                match &body[1] {
                    Instruction::ForStep(step) => assert!(matches!(
                        **step,
                        Instruction::Assign {
                            kind: AssignKind::Set,
                            ..
                        }
                    )),
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn function_hoisted_and_called() {
        let src = "greet(\"bob\")\nfn greet(who) {\nprint $who\n}";
        let p = compile(src);
        assert!(p.functions.contains_key("greet"));
        assert_eq!(p.functions["greet"].params, vec!["who"]);
        match &p.instructions[0] {
            Instruction::Call { name, args, target } => {
                assert_eq!(name, "greet");
                assert_eq!(args, &vec!["\"bob\"".to_string()]);
                assert!(target.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn call_result_assignment() {
        let src = "fn two() {\nreturn 2\n}\nlet x = two()";
        let p = compile(src);
        match &p.instructions[0] {
            Instruction::Call { target, .. } => {
                assert_eq!(target, &Some(("x".into(), AssignKind::Let)))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_call_becomes_invoke() {
        let p = compile("beep(440, 100)");
        match &p.instructions[0] {
            Instruction::Invoke { name, args } => {
                assert_eq!(name, "beep");
                assert_eq!(args, "440, 100");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn break_and_continue() {
        let p = compile("loop {\nbreak\ncontinue\n}");
        match &p.instructions[0] {
            Instruction::LoopMarker { body, .. } => {
                assert_eq!(body, &vec![Instruction::Break, Instruction::Continue]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn end_closes_braceless_block() {
        let p = compile("if x > 1\nprint a\nend");
        assert_eq!(p.instructions.len(), 1);
        assert!(matches!(
            p.instructions[0],
            Instruction::ConditionalChain { .. }
        ));
    }

    #[test]
    fn unclosed_block_consumes_rest() {
        let p = compile("loop {\nprint a\nprint b");
        assert_eq!(p.instructions.len(), 1);
        assert_eq!(p.diagnostics.len(), 1);
        match &p.instructions[0] {
            Instruction::LoopMarker { body, .. } => assert_eq!(body.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stray_close_ignored() {
        let p = compile("}\nprint a");
        assert_eq!(p.instructions.len(), 1);
    }

    #[test]
    fn nested_blocks() {
        let src = "loop {\nif x {\nprint a\n}\n}";
        let p = compile(src);
        match &p.instructions[0] {
            Instruction::LoopMarker { body, .. } => {
                assert_eq!(body.len(), 1);
                assert!(matches!(body[0], Instruction::ConditionalChain { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn split_args_respects_quotes_and_parens() {
        assert_eq!(
            split_args("\"a, b\", (1, 2), 3"),
            vec!["\"a, b\"", "(1, 2)", "3"]
        );
        assert!(split_args("").is_empty());
    }
}
