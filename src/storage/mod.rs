// SPDX-License-Identifier: MIT
//! Device-local durable storage (SQLite, WAL mode).
//!
//! Holds the two pieces of pre-authentication state the pipeline needs to
//! survive crashes and offline periods: the captured attribution record and
//! the Install-sent flag, each under a fixed well-known key in the `settings`
//! table.

use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

use crate::attribution::AttributionRecord;

/// Well-known key for the serialized [`AttributionRecord`].
const KEY_ATTRIBUTION: &str = "attribution_record";
/// Well-known key for the Install-sent flag.
const KEY_INSTALL_SENT: &str = "install_event_sent";

/// Default timeout for individual SQLite queries.
/// Prevents a hung query from stalling the dispatch flow indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("adbridge.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .context("create settings table")?;
        Ok(())
    }

    // ─── Generic settings KV ─────────────────────────────────────────────────

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write `value` only if `key` is absent. Returns `true` if the write
    /// happened — the idempotence primitive behind first-capture-wins.
    pub async fn set_setting_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_setting(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Attribution record ──────────────────────────────────────────────────

    /// The unconsumed device-local attribution record, if one exists.
    pub async fn attribution_record(&self) -> Result<Option<AttributionRecord>> {
        with_timeout(async {
            match self.get_setting(KEY_ATTRIBUTION).await? {
                Some(json) => {
                    let record = serde_json::from_str(&json)
                        .context("corrupt attribution record in settings")?;
                    Ok(Some(record))
                }
                None => Ok(None),
            }
        })
        .await
    }

    /// Store the record unless one is already present. Returns `true` if this
    /// call wrote it.
    pub async fn store_attribution_if_absent(&self, record: &AttributionRecord) -> Result<bool> {
        let json = serde_json::to_string(record)?;
        self.set_setting_if_absent(KEY_ATTRIBUTION, &json).await
    }

    /// Delete the device-local record after it has been consumed.
    pub async fn clear_attribution_record(&self) -> Result<()> {
        self.delete_setting(KEY_ATTRIBUTION).await
    }

    // ─── Install-sent flag ───────────────────────────────────────────────────

    /// Fast-path short-circuit only — never the sole basis for a skip
    /// decision, and not authoritative across reinstalls.
    pub async fn install_event_sent(&self) -> Result<bool> {
        Ok(self.get_setting(KEY_INSTALL_SENT).await?.as_deref() == Some("true"))
    }

    /// Set only after the external API confirmed acceptance.
    pub async fn mark_install_event_sent(&self) -> Result<()> {
        self.set_setting(KEY_INSTALL_SENT, "true").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_storage() -> (Storage, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let s = Storage::new(dir.path()).await.expect("storage");
        (s, dir)
    }

    fn record(click: &str) -> AttributionRecord {
        AttributionRecord {
            click_id: Some(click.to_string()),
            campaign_id: Some("launch".to_string()),
            network: None,
            captured_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn settings_roundtrip() {
        let (storage, _dir) = test_storage().await;
        assert!(storage.get_setting("missing").await.unwrap().is_none());

        storage.set_setting("k", "v1").await.unwrap();
        storage.set_setting("k", "v2").await.unwrap();
        assert_eq!(storage.get_setting("k").await.unwrap().as_deref(), Some("v2"));

        storage.delete_setting("k").await.unwrap();
        assert!(storage.get_setting("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn attribution_record_is_write_once() {
        let (storage, _dir) = test_storage().await;
        assert!(storage.attribution_record().await.unwrap().is_none());

        assert!(storage.store_attribution_if_absent(&record("first")).await.unwrap());
        // Second capture with different parameters loses.
        assert!(!storage.store_attribution_if_absent(&record("second")).await.unwrap());

        let stored = storage.attribution_record().await.unwrap().unwrap();
        assert_eq!(stored.click_id.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn clearing_allows_a_fresh_capture() {
        let (storage, _dir) = test_storage().await;
        storage.store_attribution_if_absent(&record("first")).await.unwrap();
        storage.clear_attribution_record().await.unwrap();
        assert!(storage.attribution_record().await.unwrap().is_none());
        assert!(storage.store_attribution_if_absent(&record("second")).await.unwrap());
    }

    #[tokio::test]
    async fn install_flag_defaults_false_and_persists() {
        let (storage, dir) = test_storage().await;
        assert!(!storage.install_event_sent().await.unwrap());
        storage.mark_install_event_sent().await.unwrap();
        assert!(storage.install_event_sent().await.unwrap());

        // Survives a reopen of the same database.
        drop(storage);
        let reopened = Storage::new(dir.path()).await.unwrap();
        assert!(reopened.install_event_sent().await.unwrap());
    }
}
