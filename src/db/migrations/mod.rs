use crate::error::Error;
use anyhow::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Schema scripts, applied in order. Every statement is idempotent.
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_organizations_users", include_str!("sql/001_organizations_users.sql")),
    ("002_cameras", include_str!("sql/002_cameras.sql")),
    ("003_sequences_detections", include_str!("sql/003_sequences_detections.sql")),
    ("004_alerting", include_str!("sql/004_alerting.sql")),
    ("005_webhooks", include_str!("sql/005_webhooks.sql")),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql)
            .await
            .map_err(|e| Error::Database(format!("Migration {} failed: {}", name, e)))?;
        info!("Applied migration: {}", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered() {
        let names: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn open_sequences_are_unique_per_camera() {
        let (_, sql) = MIGRATIONS.iter().find(|(n, _)| *n == "003_sequences_detections").unwrap();
        assert!(sql.contains("ON sequences(camera_id) WHERE closed_at IS NULL"));
    }
}
