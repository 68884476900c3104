use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use super::models::{SourceId, SourceRecord};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StorageError {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StorageError::Database(sqlx::Error::Database(error)) => error.is_unique_violation(),
            _ => false,
        }
    }
}

const SOURCE_COLUMNS: &str = "id, url, title, is_pinned, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SourceRepository {
    pool: SqlitePool,
}

impl SourceRepository {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn insert_source(&self, url: &str) -> Result<SourceRecord, StorageError> {
        self.insert(url, None).await
    }

    /// Inserts a source that already has its display title.
    pub async fn insert_titled_source(&self, url: &str, title: &str) -> Result<SourceRecord, StorageError> {
        self.insert(url, Some(title)).await
    }

    async fn insert(&self, url: &str, title: Option<&str>) -> Result<SourceRecord, StorageError> {
        let id = sqlx::query("INSERT INTO sources (url, title) VALUES (?1, ?2)")
            .bind(url)
            .bind(title)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        let record = sqlx::query_as::<_, SourceRecord>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    /// First source whose URL or title matches exactly.
    pub async fn find_source_by_url_or_title(
        &self,
        url: &str,
        title: &str,
    ) -> Result<Option<SourceRecord>, StorageError> {
        let row = sqlx::query_as::<_, SourceRecord>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE url = ?1 OR title = ?2 ORDER BY id ASC LIMIT 1"
        ))
        .bind(url)
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_source_by_id(&self, id: SourceId) -> Result<Option<SourceRecord>, StorageError> {
        let row = sqlx::query_as::<_, SourceRecord>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Sources with the given pin state, oldest first.
    pub async fn list_sources_by_pin(&self, is_pinned: bool) -> Result<Vec<SourceRecord>, StorageError> {
        let rows = sqlx::query_as::<_, SourceRecord>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE is_pinned = ?1 ORDER BY id ASC"
        ))
        .bind(i64::from(is_pinned))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn rename_source(&self, id: SourceId, title: &str) -> Result<u64, StorageError> {
        let affected = sqlx::query(
            r#"
            UPDATE sources
            SET title = ?1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?2
            "#,
        )
        .bind(title)
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    pub async fn set_source_pinned(&self, id: SourceId, is_pinned: bool) -> Result<u64, StorageError> {
        let affected = sqlx::query(
            r#"
            UPDATE sources
            SET is_pinned = ?1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?2
            "#,
        )
        .bind(i64::from(is_pinned))
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    pub async fn delete_source(&self, id: SourceId) -> Result<u64, StorageError> {
        let affected = sqlx::query("DELETE FROM sources WHERE id = ?1")
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
