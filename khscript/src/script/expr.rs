//! Expression evaluator.
//!
//! A tokenless recursive-descent evaluator that walks the source bytes
//! directly, one parse function per precedence level. There is no separate
//! lexer and no AST; each level parses its operands and folds the result
//! immediately. Expressions are side-effect-free, so evaluation order never
//! matters beyond the result.
//!
//! The evaluator is total: malformed input never errors. Arithmetic that
//! cannot produce a number yields NaN, unknown identifiers evaluate to
//! themselves as strings, and input with trailing junk falls back to the
//! raw source text.

use super::value::Value;

/// Variable lookup callback. Returns the raw string form of a variable, or
/// `None` when the name is unbound.
pub type Resolver<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Evaluate an expression to a value. Never fails.
pub fn evaluate(src: &str, resolver: Resolver) -> Value {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return Value::Str(String::new());
    }
    let mut cur = Cursor {
        src: trimmed.as_bytes(),
        pos: 0,
        vars: resolver,
    };
    let result = cur.parse_ternary();
    cur.skip_ws();
    if cur.pos < cur.src.len() {
        // Trailing input the grammar did not consume: treat the whole
        // expression as literal text.
        return Value::Str(trimmed.to_owned());
    }
    result
}

/// Evaluate an expression and coerce the result to boolean.
pub fn evaluate_condition(src: &str, resolver: Resolver) -> bool {
    evaluate(src, resolver).truthy()
}

/// Replace every `$name` occurrence in `src` with the resolved variable
/// value. Unresolved references substitute as empty. A `$` not followed by
/// an identifier character passes through unchanged.
pub fn substitute(src: &str, resolver: Resolver) -> String {
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && is_ident_byte(bytes[i + 1]) {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_ident_byte(bytes[end]) {
                end += 1;
            }
            let name = &src[start..end];
            if let Some(val) = (resolver)(name) {
                out.push_str(&val);
            }
            i = end;
        } else {
            // Copy the literal run up to the next `$` in one slice. `$` is
            // ASCII, so the slice always lands on a char boundary.
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i] != b'$' {
                i += 1;
            }
            out.push_str(&src[start..i]);
        }
    }
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

// ── Cursor ────────────────────────────────────────────────────────────────────

struct Cursor<'a> {
    src: &'a [u8],
    pos: usize,
    vars: Resolver<'a>,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    /// Consume `op` if it appears next (after whitespace). Single-byte ops
    /// refuse to match when they are a prefix of a longer operator, so `<`
    /// does not swallow the head of `<=`.
    fn eat_op(&mut self, op: &[u8]) -> bool {
        self.skip_ws();
        if self.pos + op.len() > self.src.len() {
            return false;
        }
        if &self.src[self.pos..self.pos + op.len()] != op {
            return false;
        }
        let next = self.peek_at(op.len());
        match op {
            b"<" | b">" | b"!" | b"=" if next == Some(b'=') => return false,
            b"&" if next != Some(b'&') => return false,
            b"|" if next != Some(b'|') => return false,
            _ => {}
        }
        self.pos += op.len();
        true
    }

    // ── Precedence cascade, loosest first ─────────────────────────────────

    fn parse_ternary(&mut self) -> Value {
        let cond = self.parse_or();
        self.skip_ws();
        if self.peek() == Some(b'?') {
            self.pos += 1;
            let then_val = self.parse_ternary();
            self.skip_ws();
            if self.peek() == Some(b':') {
                self.pos += 1;
                let else_val = self.parse_ternary();
                return if cond.truthy() { then_val } else { else_val };
            }
            // Missing ':' is tolerated; the false branch defaults to null.
            return if cond.truthy() { then_val } else { Value::Null };
        }
        cond
    }

    fn parse_or(&mut self) -> Value {
        let mut left = self.parse_and();
        while self.eat_op(b"||") {
            let right = self.parse_and();
            left = Value::Bool(left.truthy() || right.truthy());
        }
        left
    }

    fn parse_and(&mut self) -> Value {
        let mut left = self.parse_equality();
        while self.eat_op(b"&&") {
            let right = self.parse_equality();
            left = Value::Bool(left.truthy() && right.truthy());
        }
        left
    }

    fn parse_equality(&mut self) -> Value {
        let mut left = self.parse_comparison();
        loop {
            if self.eat_op(b"==") {
                let right = self.parse_comparison();
                left = Value::Bool(left.loose_eq(&right));
            } else if self.eat_op(b"!=") {
                let right = self.parse_comparison();
                left = Value::Bool(!left.loose_eq(&right));
            } else {
                return left;
            }
        }
    }

    fn parse_comparison(&mut self) -> Value {
        let mut left = self.parse_additive();
        loop {
            let op = if self.eat_op(b"<=") {
                b"<=".as_slice()
            } else if self.eat_op(b">=") {
                b">=".as_slice()
            } else if self.eat_op(b"<") {
                b"<".as_slice()
            } else if self.eat_op(b">") {
                b">".as_slice()
            } else {
                return left;
            };
            let right = self.parse_additive();
            let ord = compare(&left, &right);
            left = Value::Bool(match op {
                b"<=" => ord <= 0,
                b">=" => ord >= 0,
                b"<" => ord < 0,
                _ => ord > 0,
            });
        }
    }

    fn parse_additive(&mut self) -> Value {
        let mut left = self.parse_multiplicative();
        loop {
            if self.eat_op(b"+") {
                let right = self.parse_multiplicative();
                left = match (left.to_number(), right.to_number()) {
                    (Some(a), Some(b)) => Value::Number(a + b),
                    _ => Value::Str(format!("{left}{right}")),
                };
            } else if self.eat_op(b"-") {
                let right = self.parse_multiplicative();
                left = match (left.to_number(), right.to_number()) {
                    (Some(a), Some(b)) => Value::Number(a - b),
                    _ => Value::Number(f64::NAN),
                };
            } else {
                return left;
            }
        }
    }

    fn parse_multiplicative(&mut self) -> Value {
        let mut left = self.parse_unary();
        loop {
            if self.eat_op(b"*") {
                let right = self.parse_unary();
                left = match (left.to_number(), right.to_number()) {
                    (Some(a), Some(b)) => Value::Number(a * b),
                    _ => Value::Number(f64::NAN),
                };
            } else if self.eat_op(b"/") {
                let right = self.parse_unary();
                left = match (left.to_number(), right.to_number()) {
                    (Some(a), Some(b)) if b != 0.0 => Value::Number(a / b),
                    _ => Value::Number(f64::NAN),
                };
            } else if self.eat_op(b"%") {
                let right = self.parse_unary();
                left = match (left.to_number(), right.to_number()) {
                    (Some(a), Some(b)) if b != 0.0 => Value::Number(a % b),
                    _ => Value::Number(f64::NAN),
                };
            } else {
                return left;
            }
        }
    }

    fn parse_unary(&mut self) -> Value {
        self.skip_ws();
        if self.peek() == Some(b'!') && self.peek_at(1) != Some(b'=') {
            self.pos += 1;
            let v = self.parse_unary();
            return Value::Bool(!v.truthy());
        }
        if self.peek() == Some(b'-') {
            self.pos += 1;
            let v = self.parse_unary();
            return match v.to_number() {
                Some(n) => Value::Number(-n),
                None => Value::Number(f64::NAN),
            };
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Value {
        self.skip_ws();
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let inner = self.parse_ternary();
                self.skip_ws();
                if self.peek() == Some(b')') {
                    self.pos += 1;
                }
                inner
            }
            Some(q @ (b'"' | b'\'')) => {
                self.pos += 1;
                self.parse_string(q)
            }
            Some(b) if b.is_ascii_digit() => self.parse_number(),
            Some(b'$') => {
                self.pos += 1;
                let name = self.parse_ident();
                match (self.vars)(&name) {
                    Some(raw) => Value::from_raw(&raw),
                    None => Value::Str(String::new()),
                }
            }
            Some(b) if is_ident_start(b) => {
                let name = self.parse_ident();
                if name.eq_ignore_ascii_case("true") {
                    Value::Bool(true)
                } else if name.eq_ignore_ascii_case("false") {
                    Value::Bool(false)
                } else if name.eq_ignore_ascii_case("null") {
                    Value::Null
                } else {
                    match (self.vars)(&name) {
                        Some(raw) => Value::from_raw(&raw),
                        // Bare words evaluate to themselves.
                        None => Value::Str(name),
                    }
                }
            }
            Some(_) | None => {
                // Unparseable byte: consume it so the caller always makes
                // progress, then surface null.
                self.advance();
                Value::Null
            }
        }
    }

    // Collects raw bytes and converts once at the end so multi-byte UTF-8
    // sequences survive intact.
    fn parse_string(&mut self, quote: u8) -> Value {
        let mut out = Vec::new();
        while let Some(b) = self.advance() {
            if b == quote {
                break;
            }
            if b == b'\\' {
                match self.advance() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'r') => out.push(b'\r'),
                    Some(b'\\') => out.push(b'\\'),
                    Some(b'"') => out.push(b'"'),
                    Some(b'\'') => out.push(b'\''),
                    Some(other) => out.push(other),
                    None => break,
                }
            } else {
                out.push(b);
            }
        }
        Value::Str(String::from_utf8_lossy(&out).into_owned())
    }

    /// Numbers accept `,` as a decimal separator alongside `.`.
    fn parse_number(&mut self) -> Value {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || b == b'.' || b == b',' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.src[start..self.pos]
            .iter()
            .map(|&b| if b == b',' { '.' } else { b as char })
            .collect();
        match text.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Number(f64::NAN),
        }
    }

    fn parse_ident(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_ident_byte(b) {
                self.pos += 1;
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }
}

/// Relational comparison: numeric when both sides coerce, otherwise
/// case-insensitive lexicographic. Returns -1/0/1.
fn compare(a: &Value, b: &Value) -> i8 {
    if let (Some(x), Some(y)) = (a.to_number(), b.to_number()) {
        return if x < y {
            -1
        } else if x > y {
            1
        } else {
            0
        };
    }
    let x = a.to_string().to_lowercase();
    let y = b.to_string().to_lowercase();
    match x.cmp(&y) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
