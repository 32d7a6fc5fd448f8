//! End-to-end behaviour of the migration runner against the in-memory backend

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use keel_migrate::{
    AppliedRecord, Classification, DelayGate, DenyGate, Environment, MemoryDatabase, MigrateError,
    MigrateResult, MigrationBackend, MigrationHooks, MigrationId, MigrationRegistry, MigrationRunner, MigrationUnit,
    PreflightGate, RunnerState, SchemaHandle, SqlMigration, TrackingTable,
};

fn create_users() -> SqlMigration {
    SqlMigration::from_script(
        "001_create_users",
        "-- Up migration\n\
         CREATE TABLE users (id BIGSERIAL PRIMARY KEY, email TEXT NOT NULL);\n\
         -- Down migration\n\
         DROP TABLE users;\n",
    )
    .unwrap()
}

fn add_index() -> SqlMigration {
    SqlMigration::new("002_add_index", "CREATE INDEX users_email_idx ON users (email)")
        .unwrap()
        .with_down("DROP INDEX users_email_idx")
}

fn create_companies() -> SqlMigration {
    SqlMigration::new("003_create_companies", "CREATE TABLE companies (id BIGSERIAL PRIMARY KEY)")
        .unwrap()
        .with_down("DROP TABLE companies")
}

fn registry(units: Vec<SqlMigration>) -> MigrationRegistry {
    units
        .into_iter()
        .fold(MigrationRegistry::builder(), |builder, unit| builder.register(unit))
        .build()
        .unwrap()
}

fn runner(db: &MemoryDatabase, units: Vec<SqlMigration>, env: &str) -> MigrationRunner<MemoryDatabase> {
    MigrationRunner::new(registry(units), db.clone(), Environment::new(env))
        .with_preflight(DelayGate::new(Duration::ZERO))
}

fn recorded(db: &MemoryDatabase) -> Vec<String> {
    db.tracking_rows(&TrackingTable::default())
        .unwrap_or_default()
        .into_iter()
        .map(|r| r.identifier)
        .collect()
}

/// Unit written in Rust that logs its execution order
struct Recording {
    id: MigrationId,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MigrationUnit for Recording {
    fn id(&self) -> &MigrationId {
        &self.id
    }

    async fn up(&self, handle: &mut dyn SchemaHandle) -> MigrateResult<()> {
        handle
            .execute(&format!("CREATE TABLE t_{} (id INT)", self.id.as_str().replace('-', "_")))
            .await?;
        self.log.lock().unwrap().push(self.id.to_string());
        Ok(())
    }
}

/// Gate that records what it was asked to confirm
#[derive(Clone, Default)]
struct RecordingGate {
    seen: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl PreflightGate for RecordingGate {
    async fn confirm(&self, _environment: &Environment, pending: &[MigrationId]) -> MigrateResult<()> {
        self.seen
            .lock()
            .unwrap()
            .push(pending.iter().map(|id| id.to_string()).collect());
        Ok(())
    }
}

#[tokio::test]
async fn test_example_scenario() {
    let db = MemoryDatabase::new();
    let mut runner = runner(&db, vec![create_users(), add_index()], "development");

    let status = runner.status().await.unwrap();
    assert_eq!(status.pending(), vec!["001_create_users", "002_add_index"]);
    assert!(status.applied().is_empty());

    let result = runner.migrate().await.unwrap();
    assert_eq!(result.applied_count(), 2);
    assert_eq!(recorded(&db), vec!["001_create_users", "002_add_index"]);

    let rollback = runner.rollback().await.unwrap();
    assert_eq!(rollback.reverted.as_deref(), Some("002_add_index"));
    assert_eq!(recorded(&db), vec!["001_create_users"]);
    assert!(!db.has_index("users_email_idx"));
    assert!(db.has_table("users"));

    let status = runner.status().await.unwrap();
    assert_eq!(status.applied(), vec!["001_create_users"]);
    assert_eq!(status.pending(), vec!["002_add_index"]);
    assert_eq!(runner.state(), RunnerState::Ready);
}

#[tokio::test]
async fn test_migrate_applies_in_identifier_order() {
    let db = MemoryDatabase::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let ids = ["10-deals", "2-contacts", "1-users", "003-companies"];
    let registry = ids
        .iter()
        .fold(MigrationRegistry::builder(), |builder, id| {
            builder.register(Recording {
                id: MigrationId::parse(*id).unwrap(),
                log: log.clone(),
            })
        })
        .build()
        .unwrap();

    let mut runner = MigrationRunner::new(registry, db.clone(), Environment::new("development"));
    runner.migrate().await.unwrap();

    let expected = vec!["1-users", "2-contacts", "003-companies", "10-deals"];
    assert_eq!(*log.lock().unwrap(), expected);
    assert_eq!(recorded(&db), expected);
}

#[tokio::test]
async fn test_second_migrate_applies_nothing() {
    let db = MemoryDatabase::new();
    let mut runner = runner(&db, vec![create_users(), add_index()], "development");

    runner.migrate().await.unwrap();
    let statements = db.statements().len();

    let second = runner.migrate().await.unwrap();
    assert_eq!(second.applied_count(), 0);
    assert_eq!(second.skipped_count, 2);
    assert_eq!(db.statements().len(), statements);

    let status = runner.status().await.unwrap();
    assert!(status
        .entries
        .iter()
        .all(|e| e.classification == Classification::Applied));
}

#[tokio::test]
async fn test_fresh_runner_resumes_from_state_store() {
    let db = MemoryDatabase::new();
    runner(&db, vec![create_users()], "development")
        .migrate()
        .await
        .unwrap();

    // A later release adds a unit; a new process picks up only that one.
    let mut next = runner(&db, vec![create_users(), add_index()], "development");
    let result = next.migrate().await.unwrap();

    let applied: Vec<&str> = result.applied.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(applied, vec!["002_add_index"]);
}

#[tokio::test]
async fn test_failed_unit_leaves_no_trace_and_halts_batch() {
    let db = MemoryDatabase::new();
    db.fail_statements_containing("users_email_idx");
    let mut runner = runner(
        &db,
        vec![create_users(), add_index(), create_companies()],
        "development",
    );

    let err = runner.migrate().await.unwrap_err();

    match &err {
        MigrateError::Halted {
            failed,
            committed,
            source,
        } => {
            assert_eq!(failed, "002_add_index");
            assert_eq!(committed, &vec!["001_create_users".to_string()]);
            assert!(source.to_string().contains("injected failure"));
        }
        other => panic!("expected halted error, got {other:?}"),
    }
    assert!(err.to_string().contains("1 migration(s) committed"));

    // The failed unit and everything after it left nothing behind.
    assert_eq!(recorded(&db), vec!["001_create_users"]);
    assert!(!db.has_index("users_email_idx"));
    assert!(!db.has_table("companies"));
    assert_eq!(runner.state(), RunnerState::Failed);
}

#[tokio::test]
async fn test_partial_ddl_is_rolled_back() {
    let db = MemoryDatabase::new();
    db.fail_statements_containing("not_a_real_type");
    let unit = SqlMigration::new(
        "001_create_users",
        "CREATE TABLE users (id INT); CREATE TABLE contacts (id INT); ALTER TABLE users ADD COLUMN x not_a_real_type",
    )
    .unwrap();
    let mut runner = runner(&db, vec![unit], "development");

    assert!(runner.migrate().await.is_err());

    assert!(!db.has_table("users"));
    assert!(!db.has_table("contacts"));
    assert!(recorded(&db).is_empty());
}

#[tokio::test]
async fn test_runner_rejects_commands_after_failure() {
    let db = MemoryDatabase::new();
    db.fail_statements_containing("CREATE TABLE users");
    let mut runner = runner(&db, vec![create_users()], "development");

    assert!(runner.migrate().await.is_err());
    let err = runner.status().await.unwrap_err();
    assert!(matches!(err, MigrateError::RunnerFailed { .. }));

    // A new invocation re-derives the plan, including the failed unit.
    db.clear_failures();
    let mut retry = self::runner(&db, vec![create_users()], "development");
    assert_eq!(retry.plan().await.unwrap(), vec![MigrationId::parse("001_create_users").unwrap()]);
    assert_eq!(retry.migrate().await.unwrap().applied_count(), 1);
}

#[tokio::test]
async fn test_rollback_reverts_exactly_one_unit() {
    let db = MemoryDatabase::new();
    let mut runner = runner(
        &db,
        vec![create_users(), add_index(), create_companies()],
        "staging",
    );
    runner.migrate().await.unwrap();

    let result = runner.rollback().await.unwrap();

    assert_eq!(result.reverted.as_deref(), Some("003_create_companies"));
    assert!(!db.has_table("companies"));
    assert!(db.has_index("users_email_idx"));
    let status = runner.status().await.unwrap();
    assert_eq!(status.classification_of("003_create_companies"), Some(Classification::Pending));
    assert_eq!(status.applied(), vec!["001_create_users", "002_add_index"]);
}

#[tokio::test]
async fn test_rollback_uses_application_order() {
    let db = MemoryDatabase::new();
    let table = TrackingTable::default();
    let mut runner = runner(&db, vec![create_users(), add_index()], "development");
    runner.status().await.unwrap();

    let mut tx = db.begin().await.unwrap();
    tx.execute("CREATE TABLE users (id INT); CREATE INDEX users_email_idx ON users (id)")
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // 001 was applied from a machine whose clock ran five minutes ahead; 002
    // committed later but carries the earlier timestamp.
    let now = Utc::now();
    db.seed_record(&table, AppliedRecord::new("001_create_users", now + chrono::Duration::minutes(5)));
    db.seed_record(&table, AppliedRecord::new("002_add_index", now));

    let result = runner.rollback().await.unwrap();
    assert_eq!(result.reverted.as_deref(), Some("002_add_index"));
    assert_eq!(recorded(&db), vec!["001_create_users"]);
    assert!(!db.has_index("users_email_idx"));
    assert!(db.has_table("users"));
}

#[tokio::test]
async fn test_rollback_with_nothing_applied() {
    let db = MemoryDatabase::new();
    let mut runner = runner(&db, vec![create_users()], "development");

    let result = runner.rollback().await.unwrap();
    assert!(result.reverted.is_none());
    assert_eq!(runner.state(), RunnerState::Ready);
}

#[tokio::test]
async fn test_irreversible_rollback_leaves_state_unchanged() {
    let db = MemoryDatabase::new();
    let forward_only = SqlMigration::new("002_backfill", "UPDATE users SET email = lower(email)").unwrap();
    let mut runner = runner(&db, vec![create_users(), forward_only], "development");
    runner.migrate().await.unwrap();
    let statements = db.statements();

    let err = runner.rollback().await.unwrap_err();

    assert!(matches!(err, MigrateError::NotReversible { ref identifier } if identifier == "002_backfill"));
    assert_eq!(recorded(&db), vec!["001_create_users", "002_backfill"]);
    assert_eq!(db.statements(), statements);
    assert_eq!(runner.state(), RunnerState::Ready);
}

#[tokio::test]
async fn test_orphaned_records_are_reported_and_untouched() {
    let db = MemoryDatabase::new();
    runner(&db, vec![create_users(), add_index()], "development")
        .migrate()
        .await
        .unwrap();

    // 002 was deleted from the registry after it ran.
    let mut runner = runner(&db, vec![create_users(), create_companies()], "development");

    let status = runner.status().await.unwrap();
    assert!(status.has_drift());
    assert_eq!(status.orphaned(), vec!["002_add_index"]);
    assert_eq!(status.pending(), vec!["003_create_companies"]);

    let result = runner.migrate().await.unwrap();
    let applied: Vec<&str> = result.applied.iter().map(|r| r.identifier.as_str()).collect();
    assert_eq!(applied, vec!["003_create_companies"]);
    assert_eq!(result.orphaned, vec!["002_add_index".to_string()]);
    assert!(recorded(&db).contains(&"002_add_index".to_string()));
}

#[tokio::test]
async fn test_rollback_skips_orphaned_records() {
    let db = MemoryDatabase::new();
    runner(&db, vec![create_users(), add_index()], "development")
        .migrate()
        .await
        .unwrap();

    let mut runner = runner(&db, vec![create_users()], "development");
    let result = runner.rollback().await.unwrap();

    assert_eq!(result.reverted.as_deref(), Some("001_create_users"));
    assert_eq!(recorded(&db), vec!["002_add_index"]);
}

#[tokio::test]
async fn test_production_rollback_refused_without_database_access() {
    let db = MemoryDatabase::new();
    let mut runner = runner(&db, vec![create_users()], "production");

    let err = runner.rollback().await.unwrap_err();

    assert!(matches!(err, MigrateError::PolicyRefusal { .. }));
    assert!(err.is_refusal());
    assert_eq!(db.transactions_begun(), 0);
}

#[tokio::test]
async fn test_production_migrate_passes_preflight_first() {
    let db = MemoryDatabase::new();
    let gate = RecordingGate::default();
    let mut runner = MigrationRunner::new(
        registry(vec![create_users(), add_index()]),
        db.clone(),
        Environment::new("prod-eu"),
    )
    .with_preflight(gate.clone());

    runner.migrate().await.unwrap();

    assert_eq!(
        *gate.seen.lock().unwrap(),
        vec![vec!["001_create_users".to_string(), "002_add_index".to_string()]]
    );
}

#[tokio::test]
async fn test_declined_preflight_applies_nothing() {
    let db = MemoryDatabase::new();
    let mut runner = MigrationRunner::new(registry(vec![create_users()]), db.clone(), Environment::new("production"))
        .with_preflight(DenyGate);

    let err = runner.migrate().await.unwrap_err();

    assert!(matches!(err, MigrateError::Aborted { .. }));
    assert!(recorded(&db).is_empty());
    assert!(!db.has_table("users"));
}

#[tokio::test]
async fn test_preflight_skipped_outside_production() {
    let db = MemoryDatabase::new();
    let mut runner = MigrationRunner::new(registry(vec![create_users()]), db.clone(), Environment::new("staging"))
        .with_preflight(DenyGate);

    assert_eq!(runner.migrate().await.unwrap().applied_count(), 1);
}

#[tokio::test]
async fn test_hooks_observe_each_unit() {
    let db = MemoryDatabase::new();
    db.fail_statements_containing("companies");
    let events = Arc::new(Mutex::new(Vec::new()));

    let (before, after, failed) = (events.clone(), events.clone(), events.clone());
    let hooks = MigrationHooks {
        before_migration: Some(Box::new(move |id: &str| before.lock().unwrap().push(format!("start {id}")))),
        after_migration: Some(Box::new(move |id: &str| after.lock().unwrap().push(format!("done {id}")))),
        on_error: Some(Box::new(move |id: &str, _: &MigrateError| failed.lock().unwrap().push(format!("fail {id}")))),
    };
    let mut runner = runner(&db, vec![create_users(), create_companies()], "development").with_hooks(hooks);

    assert!(runner.migrate().await.is_err());
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "start 001_create_users",
            "done 001_create_users",
            "start 003_create_companies",
            "fail 003_create_companies",
        ]
    );
}

#[tokio::test]
async fn test_custom_tracking_table() {
    let db = MemoryDatabase::new();
    let table = TrackingTable::new("schema_history").unwrap();
    let mut runner = runner(&db, vec![create_users()], "development").with_tracking_table(table.clone());

    runner.migrate().await.unwrap();

    assert_eq!(db.tracking_rows(&table).unwrap().len(), 1);
    assert!(db.tracking_rows(&TrackingTable::default()).is_none());
}

#[tokio::test]
async fn test_sql_runs_as_authored() {
    let function = "CREATE FUNCTION touch_updated_at() RETURNS trigger AS $$\n\
                    BEGIN\n    NEW.updated_at = now();\n    RETURN NEW;\nEND;\n\
                    $$ LANGUAGE plpgsql";
    let block = "DO $$\nBEGIN\n    IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'mood') THEN\n        \
                 CREATE TYPE mood AS ENUM ('happy', 'sad');\n    END IF;\nEND\n$$";
    let alter = "ALTER TABLE users ALTER COLUMN email TYPE text";
    let script = format!(
        "-- Up migration\n{};\n\n{};\n\n{};\n-- Down migration\nDROP FUNCTION touch_updated_at();\n",
        function, block, alter
    );
    let unit = SqlMigration::from_script("002_touch_trigger", &script).unwrap();

    let db = MemoryDatabase::new();
    let mut runner = runner(&db, vec![create_users(), unit], "development");
    runner.migrate().await.unwrap();

    let statements = db.statements();
    assert_eq!(&statements[statements.len() - 3..], &[function, block, alter]);

    runner.rollback().await.unwrap();
    assert_eq!(db.statements().last().map(String::as_str), Some("DROP FUNCTION touch_updated_at()"));
}
