//! Deployment environment labels and the production safety policy

use serde::Serialize;

/// Labels treated as production regardless of configuration
const PRODUCTION_LABELS: &[&str] = &["production", "prod", "live"];
const PRODUCTION_PREFIXES: &[&str] = &["production-", "prod-"];

/// Target environment of a run, as supplied by the environment resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    label: String,
    production: bool,
}

impl Environment {
    /// Create an environment, classifying it from its label
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let production = Self::label_is_production(&label);
        Self { label, production }
    }

    /// Mark the environment as production-like. A production label cannot be
    /// downgraded.
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production || Self::label_is_production(&self.label);
        self
    }

    pub fn label_is_production(label: &str) -> bool {
        let label = label.trim().to_lowercase();
        PRODUCTION_LABELS.contains(&label.as_str())
            || PRODUCTION_PREFIXES.iter().any(|p| label.starts_with(p))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_production(&self) -> bool {
        self.production
    }

    /// Whether `rollback` may run here
    pub fn allows_rollback(&self) -> bool {
        !self.production
    }

    /// Whether `migrate` must pass the pre-flight gate first
    pub fn requires_preflight(&self) -> bool {
        self.production
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}
