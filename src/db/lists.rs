//! Repository for the two persistent override lists: blacklist and
//! whitelist. Both tables share an identical shape (`id, ip_address
//! UNIQUE, reason, created_at, created_by, enabled`), so one repository
//! is parameterized by table name instead of duplicating the queries.

use crate::error::DbError;
use sqlx::SqlitePool;

/// Which of the two override lists a repository instance targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Blacklist,
    Whitelist,
}

impl ListKind {
    fn table_name(self) -> &'static str {
        match self {
            ListKind::Blacklist => "blacklist",
            ListKind::Whitelist => "whitelist",
        }
    }
}

/// A row from either list.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub id: i64,
    pub ip_address: String,
    pub reason: Option<String>,
    pub created_at: i64,
    pub created_by: Option<String>,
    pub enabled: bool,
}

/// Repository for blacklist/whitelist CRUD, bound to one table at
/// construction.
pub struct ListRepository<'a> {
    pool: &'a SqlitePool,
    kind: ListKind,
}

impl<'a> ListRepository<'a> {
    pub fn new(pool: &'a SqlitePool, kind: ListKind) -> Self {
        Self { pool, kind }
    }

    /// Insert an address. Returns `AlreadyPresent` if the unique
    /// constraint on `ip_address` is violated, rather than a bare SQL
    /// error — insertion conflicts on these tables are an expected,
    /// non-fatal condition.
    pub async fn add(
        &self,
        ip_address: &str,
        reason: Option<&str>,
        created_by: Option<&str>,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        let query = format!(
            "INSERT INTO {} (ip_address, reason, created_at, created_by, enabled) VALUES (?, ?, ?, ?, 1)",
            self.kind.table_name()
        );

        let result = sqlx::query(&query)
            .bind(ip_address)
            .bind(reason)
            .bind(now)
            .bind(created_by)
            .execute(self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(DbError::AlreadyPresent(ip_address.to_string()))
            }
            Err(e) => Err(DbError::Sqlx(e)),
        }
    }

    /// Soft-delete an address (set `enabled=false`). Returns whether a
    /// row was affected.
    pub async fn remove(&self, ip_address: &str) -> Result<bool, DbError> {
        let query = format!(
            "UPDATE {} SET enabled = 0 WHERE ip_address = ?",
            self.kind.table_name()
        );
        let result = sqlx::query(&query)
            .bind(ip_address)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Check whether an address is present and enabled.
    pub async fn contains(&self, ip_address: &str) -> Result<bool, DbError> {
        let query = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE ip_address = ? AND enabled = 1)",
            self.kind.table_name()
        );
        let exists: bool = sqlx::query_scalar(&query)
            .bind(ip_address)
            .fetch_one(self.pool)
            .await?;
        Ok(exists)
    }

    /// List every enabled entry.
    pub async fn list_enabled(&self) -> Result<Vec<ListEntry>, DbError> {
        let query = format!(
            "SELECT id, ip_address, reason, created_at, created_by, enabled FROM {} WHERE enabled = 1",
            self.kind.table_name()
        );
        let rows = sqlx::query_as::<_, (i64, String, Option<String>, i64, Option<String>, bool)>(
            &query,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, ip_address, reason, created_at, created_by, enabled)| ListEntry {
                    id,
                    ip_address,
                    reason,
                    created_at,
                    created_by,
                    enabled,
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn memory_db() -> Database {
        Database::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn add_then_contains() {
        let db = memory_db().await;
        db.blacklist()
            .add("10.0.0.1", Some("spam"), Some("admin"))
            .await
            .unwrap();
        assert!(db.blacklist().contains("10.0.0.1").await.unwrap());
        assert!(!db.whitelist().contains("10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_insert_is_already_present() {
        let db = memory_db().await;
        db.whitelist().add("10.0.0.2", None, None).await.unwrap();
        let err = db.whitelist().add("10.0.0.2", None, None).await.unwrap_err();
        assert!(matches!(err, DbError::AlreadyPresent(_)));
    }

    #[tokio::test]
    async fn soft_delete_clears_membership() {
        let db = memory_db().await;
        db.blacklist().add("10.0.0.3", None, None).await.unwrap();
        assert!(db.blacklist().contains("10.0.0.3").await.unwrap());
        assert!(db.blacklist().remove("10.0.0.3").await.unwrap());
        assert!(!db.blacklist().contains("10.0.0.3").await.unwrap());
    }

    #[tokio::test]
    async fn list_enabled_excludes_removed() {
        let db = memory_db().await;
        db.whitelist().add("10.0.0.4", None, None).await.unwrap();
        db.whitelist().add("10.0.0.5", None, None).await.unwrap();
        db.whitelist().remove("10.0.0.5").await.unwrap();
        let entries = db.whitelist().list_enabled().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ip_address, "10.0.0.4");
    }
}
