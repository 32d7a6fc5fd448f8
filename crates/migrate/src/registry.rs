//! Migration Registry - the statically constructed, ordered set of units
//!
//! Units are registered explicitly in code rather than discovered on disk,
//! so `list()` depends only on program state. The order is fixed when the
//! registry is built and never changes afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MigrateError, MigrateResult};
use crate::identifier::MigrationId;
use crate::unit::MigrationUnit;

/// Ordered identifiers of every known unit at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    ids: Vec<MigrationId>,
}

impl RegistrySnapshot {
    pub fn new(mut ids: Vec<MigrationId>) -> Self {
        ids.sort();
        Self { ids }
    }

    pub fn ids(&self) -> &[MigrationId] {
        &self.ids
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.ids.iter().any(|id| id == identifier)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// All available migration units in their total order
#[derive(Clone)]
pub struct MigrationRegistry {
    units: Vec<Arc<dyn MigrationUnit>>,
    index: HashMap<String, usize>,
}

impl MigrationRegistry {
    /// Build the registry, failing if any two units collide
    pub fn new(mut units: Vec<Arc<dyn MigrationUnit>>) -> MigrateResult<Self> {
        units.sort_by(|a, b| a.id().cmp(b.id()));

        // Sorting puts colliding identifiers next to each other.
        let mut duplicates: Vec<String> = Vec::new();
        for pair in units.windows(2) {
            let (a, b) = (pair[0].id(), pair[1].id());
            if a == b || a.collides_with(b) {
                for id in [a, b] {
                    if !duplicates.iter().any(|d| d == id.as_str()) {
                        duplicates.push(id.to_string());
                    }
                }
            }
        }
        if !duplicates.is_empty() {
            return Err(MigrateError::Discovery { duplicates });
        }

        let index = units
            .iter()
            .enumerate()
            .map(|(i, unit)| (unit.id().to_string(), i))
            .collect();

        Ok(Self { units, index })
    }

    /// Builder-style registration for statically defined units
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Every unit, in order
    pub fn list(&self) -> &[Arc<dyn MigrationUnit>] {
        &self.units
    }

    pub fn get(&self, identifier: &str) -> Option<&Arc<dyn MigrationUnit>> {
        self.index.get(identifier).map(|&i| &self.units[i])
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            ids: self.units.iter().map(|u| u.id().clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.units.iter().map(|u| u.id().as_str()))
            .finish()
    }
}

/// Collects units before the registry validates and orders them
#[derive(Default)]
pub struct RegistryBuilder {
    units: Vec<Arc<dyn MigrationUnit>>,
}

impl RegistryBuilder {
    pub fn register<U: MigrationUnit + 'static>(mut self, unit: U) -> Self {
        self.units.push(Arc::new(unit));
        self
    }

    pub fn register_arc(mut self, unit: Arc<dyn MigrationUnit>) -> Self {
        self.units.push(unit);
        self
    }

    pub fn build(self) -> MigrateResult<MigrationRegistry> {
        MigrationRegistry::new(self.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::SqlMigration;

    fn sql(id: &str) -> SqlMigration {
        SqlMigration::new(id, "SELECT 1").unwrap()
    }

    #[test]
    fn test_registry_orders_by_identifier() {
        let registry = MigrationRegistry::builder()
            .register(sql("010_add_deals"))
            .register(sql("002_add_index"))
            .register(sql("001_create_users"))
            .build()
            .unwrap();

        let ids: Vec<&str> = registry.list().iter().map(|u| u.id().as_str()).collect();
        assert_eq!(ids, vec!["001_create_users", "002_add_index", "010_add_deals"]);
        assert_eq!(registry.snapshot().len(), 3);
        assert!(registry.get("002_add_index").is_some());
        assert!(registry.get("003_missing").is_none());
    }

    #[test]
    fn test_duplicate_identifiers_fail_fast() {
        let err = MigrationRegistry::builder()
            .register(sql("001_create_users"))
            .register(sql("002_add_index"))
            .register(sql("001_create_users"))
            .build()
            .unwrap_err();

        match err {
            MigrateError::Discovery { duplicates } => {
                assert_eq!(duplicates, vec!["001_create_users".to_string()]);
            }
            other => panic!("expected discovery error, got {other:?}"),
        }
    }

    #[test]
    fn test_equivalent_identifiers_collide() {
        let err = MigrationRegistry::builder()
            .register(sql("1_create_users"))
            .register(sql("001_create_users"))
            .build()
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("001_create_users"));
        assert!(message.contains("1_create_users"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = MigrationRegistry::builder().build().unwrap();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }
}
