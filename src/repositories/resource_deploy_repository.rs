use crate::models::{ResourceDeploy, ResourceDeployFilter};
use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Resource already deployed: {resource_type} {resource_id}@{version}")]
    AlreadyExists {
        resource_type: String,
        resource_id: String,
        version: i64,
    },
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Durable store for deployment records
///
/// Writes take a connection so callers can run them inside a transaction
/// obtained from `pool.begin()`. Reads go straight to the pool.
#[async_trait]
pub trait ResourceDeployRepository: Send + Sync {
    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        record: &ResourceDeploy,
    ) -> RepositoryResult<i64>;

    /// Returns `false` when no row matched the record's key
    async fn update(
        &self,
        conn: &mut SqliteConnection,
        record: &ResourceDeploy,
    ) -> RepositoryResult<bool>;

    /// Returns `false` when no row matched
    async fn delete(
        &self,
        conn: &mut SqliteConnection,
        resource_type: &str,
        resource_id: &str,
        version: i64,
    ) -> RepositoryResult<bool>;

    async fn get(
        &self,
        resource_type: &str,
        resource_id: &str,
        version: i64,
    ) -> RepositoryResult<Option<ResourceDeploy>>;

    /// Rows in insertion order
    async fn select_list(&self, filter: &ResourceDeployFilter)
        -> RepositoryResult<Vec<ResourceDeploy>>;
}

pub struct SqliteResourceDeployRepository {
    pool: SqlitePool,
}

impl SqliteResourceDeployRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceDeployRepository for SqliteResourceDeployRepository {
    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        record: &ResourceDeploy,
    ) -> RepositoryResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO resource_deploy (resource_id, type, version, name, description, config)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.resource_id)
        .bind(&record.resource_type)
        .bind(record.version)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.config)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RepositoryError::AlreadyExists {
                    resource_type: record.resource_type.clone(),
                    resource_id: record.resource_id.clone(),
                    version: record.version,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        record: &ResourceDeploy,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resource_deploy
            SET name = ?, description = ?, config = ?, updated_at = unixepoch()
            WHERE resource_id = ? AND type = ? AND version = ?
            "#,
        )
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.config)
        .bind(&record.resource_id)
        .bind(&record.resource_type)
        .bind(record.version)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(
        &self,
        conn: &mut SqliteConnection,
        resource_type: &str,
        resource_id: &str,
        version: i64,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "DELETE FROM resource_deploy WHERE resource_id = ? AND type = ? AND version = ?",
        )
        .bind(resource_id)
        .bind(resource_type)
        .bind(version)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(
        &self,
        resource_type: &str,
        resource_id: &str,
        version: i64,
    ) -> RepositoryResult<Option<ResourceDeploy>> {
        let row = sqlx::query_as::<_, ResourceDeploy>(
            r#"
            SELECT id, resource_id, type, version, name, description, config, created_at, updated_at
            FROM resource_deploy
            WHERE resource_id = ? AND type = ? AND version = ?
            "#,
        )
        .bind(resource_id)
        .bind(resource_type)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn select_list(
        &self,
        filter: &ResourceDeployFilter,
    ) -> RepositoryResult<Vec<ResourceDeploy>> {
        let rows = sqlx::query_as::<_, ResourceDeploy>(
            r#"
            SELECT id, resource_id, type, version, name, description, config, created_at, updated_at
            FROM resource_deploy
            WHERE (?1 IS NULL OR type = ?1) AND (?2 IS NULL OR resource_id = ?2)
            ORDER BY id ASC
            "#,
        )
        .bind(filter.resource_type.as_deref())
        .bind(filter.resource_id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
