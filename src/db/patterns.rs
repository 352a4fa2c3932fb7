//! Repository for the `patterns` and `ban_config` tables: the persisted
//! form of the rule set and tuning profile the config file seeds on
//! startup and the admin API may later adjust.

use crate::error::DbError;
use sqlx::SqlitePool;

/// A persisted pattern rule row.
#[derive(Debug, Clone)]
pub struct PatternRow {
    pub id: i64,
    pub name: String,
    pub regex: String,
    pub ip_group: i64,
    pub severity: i64,
    pub description: String,
    pub enabled: bool,
}

/// A persisted ban-config profile row.
#[derive(Debug, Clone)]
pub struct BanConfigRow {
    pub id: i64,
    pub name: String,
    pub initial_ban_time_seconds: i64,
    pub max_ban_time_seconds: i64,
    pub escalation_factor: f64,
    pub max_attempts: i64,
    pub time_window_seconds: i64,
    pub cleanup_interval_seconds: i64,
    pub max_memory_ttl_seconds: i64,
    pub enabled: bool,
}

pub struct PatternRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PatternRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update a pattern rule by unique name (config-driven seed
    /// on startup is idempotent).
    pub async fn upsert_pattern(
        &self,
        name: &str,
        regex: &str,
        ip_group: i64,
        severity: i64,
        description: &str,
        enabled: bool,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO patterns (name, regex, ip_group, severity, description, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                regex = excluded.regex,
                ip_group = excluded.ip_group,
                severity = excluded.severity,
                description = excluded.description,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(regex)
        .bind(ip_group)
        .bind(severity)
        .bind(description)
        .bind(enabled)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// All enabled pattern rules, in a stable order (insertion id).
    pub async fn list_enabled(&self) -> Result<Vec<PatternRow>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String, String, i64, i64, String, bool)>(
            r#"
            SELECT id, name, regex, ip_group, severity, description, enabled
            FROM patterns
            WHERE enabled = 1
            ORDER BY id ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, name, regex, ip_group, severity, description, enabled)| PatternRow {
                    id,
                    name,
                    regex,
                    ip_group,
                    severity,
                    description,
                    enabled,
                },
            )
            .collect())
    }

    /// Insert or update a named ban-config profile.
    pub async fn upsert_ban_config(
        &self,
        name: &str,
        initial_ban_time_seconds: i64,
        max_ban_time_seconds: i64,
        escalation_factor: f64,
        max_attempts: i64,
        time_window_seconds: i64,
        cleanup_interval_seconds: i64,
        max_memory_ttl_seconds: i64,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO ban_config (
                name, initial_ban_time_seconds, max_ban_time_seconds, escalation_factor,
                max_attempts, time_window_seconds, cleanup_interval_seconds,
                max_memory_ttl_seconds, enabled, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                initial_ban_time_seconds = excluded.initial_ban_time_seconds,
                max_ban_time_seconds = excluded.max_ban_time_seconds,
                escalation_factor = excluded.escalation_factor,
                max_attempts = excluded.max_attempts,
                time_window_seconds = excluded.time_window_seconds,
                cleanup_interval_seconds = excluded.cleanup_interval_seconds,
                max_memory_ttl_seconds = excluded.max_memory_ttl_seconds,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(initial_ban_time_seconds)
        .bind(max_ban_time_seconds)
        .bind(escalation_factor)
        .bind(max_attempts)
        .bind(time_window_seconds)
        .bind(cleanup_interval_seconds)
        .bind(max_memory_ttl_seconds)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a named ban-config profile, if present and enabled.
    pub async fn get_ban_config(&self, name: &str) -> Result<Option<BanConfigRow>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, i64, i64, f64, i64, i64, i64, i64, bool)>(
            r#"
            SELECT id, name, initial_ban_time_seconds, max_ban_time_seconds, escalation_factor,
                   max_attempts, time_window_seconds, cleanup_interval_seconds,
                   max_memory_ttl_seconds, enabled
            FROM ban_config
            WHERE name = ? AND enabled = 1
            "#,
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(
            |(
                id,
                name,
                initial_ban_time_seconds,
                max_ban_time_seconds,
                escalation_factor,
                max_attempts,
                time_window_seconds,
                cleanup_interval_seconds,
                max_memory_ttl_seconds,
                enabled,
            )| BanConfigRow {
                id,
                name,
                initial_ban_time_seconds,
                max_ban_time_seconds,
                escalation_factor,
                max_attempts,
                time_window_seconds,
                cleanup_interval_seconds,
                max_memory_ttl_seconds,
                enabled,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn upsert_pattern_is_idempotent_on_name() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.patterns();
        repo.upsert_pattern("dovecot", "auth failed rip=(.+)", 1, 4, "dovecot auth", true)
            .await
            .unwrap();
        repo.upsert_pattern("dovecot", "auth failed rip=(.+)", 1, 5, "updated", true)
            .await
            .unwrap();
        let rows = repo.list_enabled().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].severity, 5);
    }

    #[tokio::test]
    async fn upsert_ban_config_roundtrips() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.patterns();
        repo.upsert_ban_config("default", 300, 86400, 2.0, 3, 600, 60, 604800)
            .await
            .unwrap();
        let row = repo.get_ban_config("default").await.unwrap().unwrap();
        assert_eq!(row.max_attempts, 3);
        assert_eq!(row.escalation_factor, 2.0);
    }
}
