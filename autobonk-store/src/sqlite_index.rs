// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed local context index.
use std::str::FromStr;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{migrate, query, query_as};
use thiserror::Error;

use crate::index::ContextIndex;

/// Get migrations from folder without running them.
pub fn migrations() -> Migrator {
    migrate!()
}

pub struct SqliteIndexBuilder {
    url: String,
    max_connections: u32,
}

impl Default for SqliteIndexBuilder {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: 16,
        }
    }
}

impl SqliteIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn random_memory_url(mut self) -> Self {
        // Every in-memory database gets its own name to keep concurrently running tests isolated.
        self.url = format!(
            "sqlite://dbmem{}?mode=memory&cache=private",
            rand::random::<u32>()
        );
        self
    }

    pub fn database_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Connect to the database, creating it if it doesn't exist yet.
    pub async fn build(self) -> Result<SqliteIndex, SqliteIndexError> {
        let options = SqliteConnectOptions::from_str(&self.url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await?;

        migrations().run(&pool).await?;

        Ok(SqliteIndex { pool })
    }
}

/// Local context index persisted in a SQLite database.
///
/// Cloned instances re-use the same connection pool.
#[derive(Clone, Debug)]
pub struct SqliteIndex {
    pool: sqlx::SqlitePool,
}

impl SqliteIndex {
    /// Shortcut building an in-memory database for testing purposes.
    #[cfg(test)]
    pub async fn temporary() -> Self {
        SqliteIndexBuilder::new()
            .random_memory_url()
            .max_connections(1)
            .build()
            .await
            .expect("migrations succeeded")
    }
}

impl ContextIndex for SqliteIndex {
    type Error = SqliteIndexError;

    async fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), Self::Error> {
        query(
            "
            INSERT INTO
                local_index_v1 (key, value)
            VALUES
                (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        let row: Option<(Vec<u8>,)> = query_as(
            "
            SELECT
                value
            FROM
                local_index_v1
            WHERE
                key = ?1
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn delete(&mut self, key: &str) -> Result<bool, Self::Error> {
        let result = query(
            "
            DELETE FROM
                local_index_v1
            WHERE
                key = ?1
            ",
        )
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn range(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Self::Error> {
        let rows: Vec<(String, Vec<u8>)> = query_as(
            "
            SELECT
                key,
                value
            FROM
                local_index_v1
            WHERE
                substr(key, 1, ?2) = ?1
            ORDER BY
                key
            ",
        )
        .bind(prefix)
        .bind(prefix.chars().count() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[derive(Debug, Error)]
pub enum SqliteIndexError {
    /// SQLite database and connection error.
    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),

    /// SQL table schema migration error.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
