use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Namespace holding the table auto-cycle preference flags.
pub const AUTO_CYCLE_NAMESPACE: &str = "laser_panel.auto_cycle";

const AUTO_CYCLE_ENABLED_KEY: &str = "enabled";
const AUTO_CYCLE_COUNT_KEY: &str = "cycle_count";

/// Client-local preference store backed by SQLite.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredPreference {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoredAutoCycle {
    pub enabled: bool,
    pub cycle_count: u32,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database is a separate database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn get_preference(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM preferences WHERE namespace = ? AND key = ?",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read preference {namespace}/{key}"))?;
        Ok(value)
    }

    pub async fn put_preference(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO preferences (namespace, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(namespace, key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write preference {namespace}/{key}"))?;
        debug!("storage: preference written namespace={namespace} key={key} value={value}");
        Ok(())
    }

    pub async fn list_preferences(&self, namespace: &str) -> Result<Vec<StoredPreference>> {
        let rows = sqlx::query(
            "SELECT namespace, key, value, updated_at FROM preferences WHERE namespace = ? ORDER BY key",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list preferences in {namespace}"))?;

        let mut preferences = Vec::with_capacity(rows.len());
        for row in rows {
            preferences.push(StoredPreference {
                namespace: row.try_get("namespace")?,
                key: row.try_get("key")?,
                value: row.try_get("value")?,
                updated_at: row.try_get("updated_at")?,
            });
        }
        Ok(preferences)
    }

    /// Removes every preference in `namespace`, returning how many were deleted.
    pub async fn clear_namespace(&self, namespace: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM preferences WHERE namespace = ?")
            .bind(namespace)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to clear preferences in {namespace}"))?;
        Ok(result.rows_affected())
    }

    /// Reads the auto-cycle flags. Missing or unparseable values fall back to
    /// disabled with a zero count.
    pub async fn load_auto_cycle(&self, namespace: &str) -> Result<StoredAutoCycle> {
        let enabled = self
            .get_preference(namespace, AUTO_CYCLE_ENABLED_KEY)
            .await?
            .map(|value| value == "true")
            .unwrap_or(false);
        let cycle_count = self
            .get_preference(namespace, AUTO_CYCLE_COUNT_KEY)
            .await?
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(0);
        Ok(StoredAutoCycle {
            enabled,
            cycle_count,
        })
    }

    pub async fn save_auto_cycle(&self, namespace: &str, state: StoredAutoCycle) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in [
            (AUTO_CYCLE_ENABLED_KEY, state.enabled.to_string()),
            (AUTO_CYCLE_COUNT_KEY, state.cycle_count.to_string()),
        ] {
            sqlx::query(
                r#"
                INSERT INTO preferences (namespace, key, value, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(namespace, key)
                DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(namespace)
            .bind(key)
            .bind(value)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to write preference {namespace}/{key}"))?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
