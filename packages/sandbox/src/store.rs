// ABOUTME: Durable project store for sandbox ids, endpoints and deployed source
// ABOUTME: SQLite implementation with embedded migrations plus an in-memory variant

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The orchestrator-owned fields of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSandboxRecord {
    pub project_id: String,
    pub external_sandbox_id: Option<String>,
    pub public_endpoint: Option<String>,
    pub current_source: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectSandboxRecord {
    fn empty(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            external_sandbox_id: None,
            public_endpoint: None,
            current_source: None,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, project_id: &str) -> Result<Option<ProjectSandboxRecord>>;

    async fn set_sandbox(
        &self,
        project_id: &str,
        external_id: &str,
        endpoint: Option<&str>,
    ) -> Result<()>;

    /// Forget the sandbox id and endpoint, keeping the source
    async fn clear_sandbox(&self, project_id: &str) -> Result<()>;

    async fn set_source(&self, project_id: &str, source: &str) -> Result<()>;

    /// Projects that currently have a persisted sandbox id
    async fn list_with_sandbox(&self) -> Result<Vec<ProjectSandboxRecord>>;
}

pub struct SqliteProjectStore {
    pool: SqlitePool,
}

impl SqliteProjectStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `database_url` and migrate it
    pub async fn open(database_url: &str) -> Result<Self> {
        if !database_url.contains(":memory:")
            && !sqlx::Sqlite::database_exists(database_url).await?
        {
            debug!("Creating database at: {}", database_url);
            sqlx::Sqlite::create_database(database_url).await?;
        }

        // An in-memory database only lives as long as its single connection
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;

        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    pub async fn initialize(&self) -> Result<()> {
        info!("Running project store migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_record(row: &SqliteRow) -> Result<ProjectSandboxRecord> {
        let updated_at: String = row.try_get("updated_at")?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| StoreError::InvalidData(format!("updated_at {:?}: {}", updated_at, e)))?
            .with_timezone(&Utc);

        Ok(ProjectSandboxRecord {
            project_id: row.try_get("project_id")?,
            external_sandbox_id: row.try_get("external_sandbox_id")?,
            public_endpoint: row.try_get("public_endpoint")?,
            current_source: row.try_get("current_source")?,
            updated_at,
        })
    }
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn get(&self, project_id: &str) -> Result<Option<ProjectSandboxRecord>> {
        let row = sqlx::query(
            r#"
            SELECT project_id, external_sandbox_id, public_endpoint, current_source, updated_at
            FROM project_sandboxes
            WHERE project_id = ?1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn set_sandbox(
        &self,
        project_id: &str,
        external_id: &str,
        endpoint: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_sandboxes (project_id, external_sandbox_id, public_endpoint, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(project_id) DO UPDATE SET
                external_sandbox_id = excluded.external_sandbox_id,
                public_endpoint = excluded.public_endpoint,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(external_id)
        .bind(endpoint)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_sandbox(&self, project_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE project_sandboxes
            SET external_sandbox_id = NULL, public_endpoint = NULL, updated_at = ?2
            WHERE project_id = ?1
            "#,
        )
        .bind(project_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_source(&self, project_id: &str, source: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_sandboxes (project_id, current_source, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(project_id) DO UPDATE SET
                current_source = excluded.current_source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(source)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_with_sandbox(&self) -> Result<Vec<ProjectSandboxRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, external_sandbox_id, public_endpoint, current_source, updated_at
            FROM project_sandboxes
            WHERE external_sandbox_id IS NOT NULL
            ORDER BY project_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

/// Process-local store for tests and throwaway runs
#[derive(Default)]
pub struct MemoryProjectStore {
    records: RwLock<HashMap<String, ProjectSandboxRecord>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get(&self, project_id: &str) -> Result<Option<ProjectSandboxRecord>> {
        Ok(self.records.read().await.get(project_id).cloned())
    }

    async fn set_sandbox(
        &self,
        project_id: &str,
        external_id: &str,
        endpoint: Option<&str>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .entry(project_id.to_string())
            .or_insert_with(|| ProjectSandboxRecord::empty(project_id));
        record.external_sandbox_id = Some(external_id.to_string());
        record.public_endpoint = endpoint.map(str::to_string);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_sandbox(&self, project_id: &str) -> Result<()> {
        if let Some(record) = self.records.write().await.get_mut(project_id) {
            record.external_sandbox_id = None;
            record.public_endpoint = None;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_source(&self, project_id: &str, source: &str) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .entry(project_id.to_string())
            .or_insert_with(|| ProjectSandboxRecord::empty(project_id));
        record.current_source = Some(source.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn list_with_sandbox(&self) -> Result<Vec<ProjectSandboxRecord>> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.external_sandbox_id.is_some())
            .cloned()
            .collect();
        records.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise(store: &dyn ProjectStore) {
        assert!(store.get("p1").await.unwrap().is_none());

        store
            .set_sandbox("p1", "ext-1", Some("http://127.0.0.1:49001"))
            .await
            .unwrap();
        store.set_source("p1", "export default {};").await.unwrap();
        store.set_source("p2", "// draft").await.unwrap();

        let record = store.get("p1").await.unwrap().unwrap();
        assert_eq!(record.external_sandbox_id.as_deref(), Some("ext-1"));
        assert_eq!(record.public_endpoint.as_deref(), Some("http://127.0.0.1:49001"));
        assert_eq!(record.current_source.as_deref(), Some("export default {};"));

        let listed = store.list_with_sandbox().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].project_id, "p1");

        store.clear_sandbox("p1").await.unwrap();
        let record = store.get("p1").await.unwrap().unwrap();
        assert!(record.external_sandbox_id.is_none());
        assert!(record.public_endpoint.is_none());
        assert_eq!(record.current_source.as_deref(), Some("export default {};"));
        assert!(store.list_with_sandbox().await.unwrap().is_empty());

        // Clearing an unknown project is a no-op
        store.clear_sandbox("nobody").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryProjectStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = SqliteProjectStore::open("sqlite::memory:").await.unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}", dir.path().join("voxcraft.db").display());

        {
            let store = SqliteProjectStore::open(&url).await.unwrap();
            store.set_sandbox("p1", "ext-9", None).await.unwrap();
            store.pool().close().await;
        }

        let reopened = SqliteProjectStore::open(&url).await.unwrap();
        let record = reopened.get("p1").await.unwrap().unwrap();
        assert_eq!(record.external_sandbox_id.as_deref(), Some("ext-9"));
        assert!(record.public_endpoint.is_none());
    }
}
