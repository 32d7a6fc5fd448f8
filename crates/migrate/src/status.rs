//! Drift Detector / Status Reporter
//!
//! Compares the registry against the tracking table. Orphaned records are
//! reported, never corrected: resolving them is an operator decision.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::RegistrySnapshot;
use crate::state::AppliedRecord;

/// How an identifier relates to the registry and the tracking table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// In the registry and recorded as applied
    Applied,
    /// In the registry, not yet applied
    Pending,
    /// Recorded as applied but missing from the registry
    Orphaned,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Applied => write!(f, "applied"),
            Classification::Pending => write!(f, "pending"),
            Classification::Orphaned => write!(f, "orphaned"),
        }
    }
}

/// Identifiers split by classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// In registry order
    pub applied: Vec<String>,
    /// In registry order; the `migrate` plan
    pub pending: Vec<String>,
    /// In application order
    pub orphaned: Vec<String>,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        !self.orphaned.is_empty()
    }
}

/// Classify every identifier as applied, pending or orphaned
pub fn classify(snapshot: &RegistrySnapshot, applied: &[AppliedRecord]) -> DriftReport {
    let applied_ids: std::collections::HashSet<&str> =
        applied.iter().map(|r| r.identifier.as_str()).collect();

    let mut report = DriftReport::default();
    for id in snapshot.ids() {
        if applied_ids.contains(id.as_str()) {
            report.applied.push(id.to_string());
        } else {
            report.pending.push(id.to_string());
        }
    }

    report.orphaned = applied
        .iter()
        .filter(|r| !snapshot.contains(&r.identifier))
        .map(|r| r.identifier.clone())
        .collect();

    report
}

/// One line of a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub identifier: String,
    pub classification: Classification,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Status of every identifier for one environment
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub environment: String,
    pub target: String,
    /// Registry entries in order, followed by orphaned records
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn build(
        environment: impl Into<String>,
        target: impl Into<String>,
        snapshot: &RegistrySnapshot,
        applied: &[AppliedRecord],
    ) -> Self {
        let drift = classify(snapshot, applied);
        let applied_at: HashMap<&str, DateTime<Utc>> = applied
            .iter()
            .map(|r| (r.identifier.as_str(), r.applied_at))
            .collect();

        let entry = |identifier: &String, classification| StatusEntry {
            identifier: identifier.clone(),
            classification,
            applied_at: applied_at.get(identifier.as_str()).copied(),
        };

        // Walk the snapshot so applied and pending interleave in registry order.
        let mut entries: Vec<StatusEntry> = snapshot
            .ids()
            .iter()
            .map(|id| {
                let id = id.to_string();
                if drift.applied.contains(&id) {
                    entry(&id, Classification::Applied)
                } else {
                    entry(&id, Classification::Pending)
                }
            })
            .collect();
        entries.extend(
            drift
                .orphaned
                .iter()
                .map(|id| entry(id, Classification::Orphaned)),
        );

        Self {
            environment: environment.into(),
            target: target.into(),
            entries,
        }
    }

    fn with_classification(&self, classification: Classification) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.classification == classification)
            .map(|e| e.identifier.as_str())
            .collect()
    }

    pub fn applied(&self) -> Vec<&str> {
        self.with_classification(Classification::Applied)
    }

    pub fn pending(&self) -> Vec<&str> {
        self.with_classification(Classification::Pending)
    }

    pub fn orphaned(&self) -> Vec<&str> {
        self.with_classification(Classification::Orphaned)
    }

    pub fn has_drift(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.classification == Classification::Orphaned)
    }

    pub fn classification_of(&self, identifier: &str) -> Option<Classification> {
        self.entries
            .iter()
            .find(|e| e.identifier == identifier)
            .map(|e| e.classification)
    }
}
