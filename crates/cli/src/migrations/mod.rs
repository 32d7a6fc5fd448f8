//! Migrations shipped with the binary
//!
//! SQL units are embedded at compile time; the registry is built once per
//! process and never rescanned.

mod backfill_display_names;

use keel_migrate::{MigrateResult, MigrationRegistry, SqlMigration};

pub use backfill_display_names::BackfillDisplayNames;

/// Build the registry of every known migration
pub fn registry() -> MigrateResult<MigrationRegistry> {
    MigrationRegistry::builder()
        .register(
            SqlMigration::from_script(
                "0001_create_companies",
                include_str!("../../migrations/0001_create_companies.sql"),
            )?
            .with_description("Create companies table"),
        )
        .register(
            SqlMigration::from_script(
                "0002_create_users",
                include_str!("../../migrations/0002_create_users.sql"),
            )?
            .with_description("Create users table"),
        )
        .register(
            SqlMigration::from_script(
                "0003_add_users_email_index",
                include_str!("../../migrations/0003_add_users_email_index.sql"),
            )?
            .with_description("Unique index on users.email"),
        )
        .register(BackfillDisplayNames::new()?)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_migrate::{Environment, MemoryDatabase, MigrationRunner, TrackingTable};

    #[test]
    fn test_registry_order() {
        let registry = registry().unwrap();
        let ids: Vec<String> = registry.snapshot().ids().iter().map(|id| id.to_string()).collect();

        assert_eq!(
            ids,
            vec![
                "0001_create_companies",
                "0002_create_users",
                "0003_add_users_email_index",
                "0004_backfill_display_names",
            ]
        );
    }

    #[test]
    fn test_reversibility() {
        let registry = registry().unwrap();
        for unit in &registry.list()[..3] {
            assert!(unit.is_reversible(), "{} should be reversible", unit.id());
        }
        assert!(!registry.list()[3].is_reversible());
    }

    #[tokio::test]
    async fn test_bundled_migrations_apply_and_revert() {
        let db = MemoryDatabase::new();
        let mut runner = MigrationRunner::new(registry().unwrap(), db.clone(), Environment::new("development"));

        let result = runner.migrate().await.unwrap();
        assert_eq!(result.applied_count(), 4);
        assert!(db.has_table("companies"));
        assert!(db.has_table("users"));
        assert!(db.has_index("users_email_idx"));

        // The newest unit is a data backfill with no inverse.
        let err = runner.rollback().await.unwrap_err();
        assert!(matches!(err, keel_migrate::MigrateError::NotReversible { .. }));
        assert_eq!(
            db.tracking_rows(&TrackingTable::default()).unwrap().len(),
            4
        );
    }
}
