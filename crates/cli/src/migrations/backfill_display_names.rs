use async_trait::async_trait;
use keel_migrate::{MigrateResult, MigrationId, MigrationUnit, SchemaHandle};

/// Fill `users.display_name` from the local part of the email address.
///
/// Data-only and forward-only: the previous NULLs cannot be recovered.
pub struct BackfillDisplayNames {
    id: MigrationId,
}

impl BackfillDisplayNames {
    pub fn new() -> MigrateResult<Self> {
        Ok(Self {
            id: MigrationId::parse("0004_backfill_display_names")?,
        })
    }
}

#[async_trait]
impl MigrationUnit for BackfillDisplayNames {
    fn id(&self) -> &MigrationId {
        &self.id
    }

    fn description(&self) -> Option<&str> {
        Some("Backfill users.display_name")
    }

    async fn up(&self, handle: &mut dyn SchemaHandle) -> MigrateResult<()> {
        let updated = handle
            .execute(
                "UPDATE users SET display_name = split_part(email, '@', 1) \
                 WHERE display_name IS NULL",
            )
            .await?;
        tracing::info!(rows = updated, "backfilled display names");
        Ok(())
    }
}
