//! Migration Units - the forward/inverse change pairs the engine applies

use async_trait::async_trait;

use crate::backend::SchemaHandle;
use crate::error::{MigrateError, MigrateResult};
use crate::identifier::MigrationId;
use crate::sql::{parse_sections, split_statements};

/// A single, identified schema change with an optional inverse
///
/// Once released, a unit's `up` body must not change: it has probably run
/// somewhere already. Corrections go into a new, later unit.
#[async_trait]
pub trait MigrationUnit: Send + Sync {
    /// Stable identifier; the registry orders units by it
    fn id(&self) -> &MigrationId;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Apply the change
    async fn up(&self, handle: &mut dyn SchemaHandle) -> MigrateResult<()>;

    /// Whether `down` is implemented
    fn is_reversible(&self) -> bool {
        false
    }

    /// Revert the change
    async fn down(&self, _handle: &mut dyn SchemaHandle) -> MigrateResult<()> {
        Err(MigrateError::NotReversible {
            identifier: self.id().to_string(),
        })
    }
}

/// Migration unit defined by SQL text
#[derive(Debug, Clone)]
pub struct SqlMigration {
    id: MigrationId,
    description: Option<String>,
    up_sql: String,
    down_sql: Option<String>,
}

impl SqlMigration {
    /// Forward-only migration
    pub fn new(identifier: impl Into<String>, up_sql: impl Into<String>) -> MigrateResult<Self> {
        Ok(Self {
            id: MigrationId::parse(identifier)?,
            description: None,
            up_sql: up_sql.into(),
            down_sql: None,
        })
    }

    /// Build from a script with `-- Up migration` / `-- Down migration`
    /// sections, typically embedded with `include_str!`
    pub fn from_script(identifier: impl Into<String>, script: &str) -> MigrateResult<Self> {
        let (up_sql, down_sql) = parse_sections(script);
        let migration = Self::new(identifier, up_sql)?;
        if split_statements(&migration.up_sql).is_empty() {
            return Err(MigrateError::Configuration(format!(
                "migration {} has an empty up section",
                migration.id
            )));
        }
        Ok(migration.with_down(down_sql))
    }

    /// Set the inverse; empty SQL leaves the migration irreversible
    pub fn with_down(mut self, down_sql: impl Into<String>) -> Self {
        let down_sql = down_sql.into();
        self.down_sql = if down_sql.trim().is_empty() {
            None
        } else {
            Some(down_sql)
        };
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn up_sql(&self) -> &str {
        &self.up_sql
    }

    pub fn down_sql(&self) -> Option<&str> {
        self.down_sql.as_deref()
    }

    /// Send the section exactly as authored, in one round trip
    async fn run_script(&self, handle: &mut dyn SchemaHandle, sql: &str) -> MigrateResult<()> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            for statement in split_statements(sql) {
                tracing::debug!(identifier = %self.id, statement = %statement, "executing statement");
            }
        }
        handle.execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl MigrationUnit for SqlMigration {
    fn id(&self) -> &MigrationId {
        &self.id
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn up(&self, handle: &mut dyn SchemaHandle) -> MigrateResult<()> {
        self.run_script(handle, &self.up_sql).await
    }

    fn is_reversible(&self) -> bool {
        self.down_sql.is_some()
    }

    async fn down(&self, handle: &mut dyn SchemaHandle) -> MigrateResult<()> {
        match &self.down_sql {
            Some(sql) => self.run_script(handle, sql).await,
            None => Err(MigrateError::NotReversible {
                identifier: self.id.to_string(),
            }),
        }
    }
}
