//! Runtime value type for KHScript.
//!
//! KHScript is dynamically typed; every value travels as one of four
//! variants and the evaluator coerces freely between numbers, strings, and
//! booleans. Arithmetic that cannot produce a number produces NaN rather
//! than an error, and equality is numeric-tolerant.

use std::fmt;

/// Numeric equality tolerance used by `==` / `!=`.
pub const EPSILON: f64 = 1e-4;

/// A KHScript runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Default for Value {
    fn default() -> Self {
        Value::Str(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => {
                // Integral numbers print without a fractional part.
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
        }
    }
}

impl Value {
    /// Coerce to a number. Strings accept `,` as a decimal separator;
    /// booleans map to 1/0; Null and non-numeric strings yield `None`.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => s.trim().replace(',', ".").parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => None,
        }
    }

    /// Coerce to boolean.
    ///
    /// Null is false; numbers are true unless zero or NaN; strings are true
    /// unless empty or one of "0" / "false" / "null" (case-insensitive).
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => {
                !s.is_empty()
                    && s != "0"
                    && !s.eq_ignore_ascii_case("false")
                    && !s.eq_ignore_ascii_case("null")
            }
        }
    }

    /// Parse a raw string into the most specific value: numbers become
    /// `Number`, everything else stays `Str`. Used when resolving variables,
    /// which are stored as strings.
    pub fn from_raw(s: &str) -> Value {
        match s.trim().replace(',', ".").parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Str(s.to_owned()),
        }
    }

    /// Name of the type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
        }
    }

    /// KHScript equality: Null only equals Null; otherwise numeric with
    /// epsilon tolerance when both sides coerce, else case-insensitive
    /// string comparison.
    pub fn loose_eq(&self, other: &Value) -> bool {
        if matches!(self, Value::Null) || matches!(other, Value::Null) {
            return matches!(self, Value::Null) && matches!(other, Value::Null);
        }
        if let (Some(a), Some(b)) = (self.to_number(), other.to_number()) {
            return (a - b).abs() < EPSILON;
        }
        self.to_string().eq_ignore_ascii_case(&other.to_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
