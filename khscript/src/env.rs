//! Host environment feed.
//!
//! A named snapshot of host state (positions, counters, whatever the
//! embedder exposes), refreshed once per tick and read by scripts as
//! ordinary variables when their own store has no binding. Names are
//! case-normalized on the way in and on lookup.

use std::collections::HashMap;

#[derive(Debug, Clone)]
struct EnvVar {
    value: String,
    description: String,
}

#[derive(Debug, Clone, Default)]
pub struct EnvFeed {
    vars: HashMap<String, EnvVar>,
}

impl EnvFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.set_described(name, value, "");
    }

    pub fn set_described(
        &mut self,
        name: &str,
        value: impl Into<String>,
        description: impl Into<String>,
    ) {
        self.vars.insert(
            name.to_uppercase(),
            EnvVar {
                value: value.into(),
                description: description.into(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(&name.to_uppercase()).map(|v| v.value.as_str())
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.vars
            .get(&name.to_uppercase())
            .map(|v| v.description.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(&name.to_uppercase())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Replace the whole snapshot. Descriptions of surviving names are
    /// kept.
    pub fn refresh<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut next = HashMap::new();
        for (name, value) in entries {
            let key = name.as_ref().to_uppercase();
            let description = self
                .vars
                .get(&key)
                .map(|v| v.description.clone())
                .unwrap_or_default();
            next.insert(
                key,
                EnvVar {
                    value: value.into(),
                    description,
                },
            );
        }
        self.vars = next;
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut env = EnvFeed::new();
        env.set("Health", "20");
        assert_eq!(env.get("HEALTH"), Some("20"));
        assert_eq!(env.get("health"), Some("20"));
    }

    #[test]
    fn refresh_replaces_values_keeps_descriptions() {
        let mut env = EnvFeed::new();
        env.set_described("x", "1", "x position");
        env.refresh([("x", "2"), ("y", "3")]);
        assert_eq!(env.get("x"), Some("2"));
        assert_eq!(env.description("x"), Some("x position"));
        assert_eq!(env.get("y"), Some("3"));
    }

    #[test]
    fn refresh_drops_absent_names() {
        let mut env = EnvFeed::new();
        env.set("gone", "1");
        env.refresh([("kept", "2")]);
        assert!(!env.contains("gone"));
        assert!(env.contains("kept"));
    }
}
