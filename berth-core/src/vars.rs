//! Variable providers
//!
//! The compose topology consumes variables such as `PG_USER` from the
//! invoking shell. Lookups go through `VarProvider` so callers can use the
//! process environment, a fixed map in tests, or a layered combination.

use std::collections::BTreeMap;

/// Trait for providing variables by name
pub trait VarProvider: Send + Sync {
    /// Get a variable by name
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads variables from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvVarProvider;

impl VarProvider for EnvVarProvider {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed set of variables
#[derive(Debug, Clone, Default)]
pub struct MapVarProvider {
    vars: BTreeMap<String, String>,
}

impl MapVarProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable, replacing any previous value
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl VarProvider for MapVarProvider {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for MapVarProvider {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}
