//! Downloaded-blob cache.
//!
//! One file per resource URL under the cache directory, tracked in the
//! `file_cache` table together with a processed flag. ZIP resources also
//! track per-member progress in `archive_entries` so an interrupted run
//! resumes at the first member that was not fully persisted.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::models::url_basename;

/// Basename extensions kept as-is when naming a cached blob.
const NAMED_EXTENSIONS: [&str; 4] = [".zip", ".csv", ".json", ".xml"];

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub url: String,
    pub local_path: PathBuf,
    pub downloaded_at: String,
    pub file_size: i64,
    pub processed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSummary {
    pub cached_files: i64,
    pub processed_files: i64,
    pub total_bytes: i64,
}

#[derive(Clone)]
pub struct ContentCache {
    pool: SqlitePool,
    dir: PathBuf,
}

impl ContentCache {
    /// Creates the cache directory if needed. Tables come from
    /// [`crate::migrate::migrate_pool`].
    pub fn new(pool: SqlitePool, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self { pool, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn entry(&self, url: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT url, local_path, downloaded_at, file_size, processed FROM file_cache WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CacheEntry {
            url: row.get("url"),
            local_path: PathBuf::from(row.get::<String, _>("local_path")),
            downloaded_at: row.get("downloaded_at"),
            file_size: row.get("file_size"),
            processed: row.get::<i64, _>("processed") != 0,
        }))
    }

    /// Local path of a cached blob, only if the file is still on disk.
    pub async fn get(&self, url: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .entry(url)
            .await?
            .map(|e| e.local_path)
            .filter(|p| p.is_file()))
    }

    pub async fn is_processed(&self, url: &str) -> Result<bool> {
        Ok(self.entry(url).await?.map(|e| e.processed).unwrap_or(false))
    }

    /// Write a blob and register it as unprocessed, replacing any earlier
    /// download of the same URL. Member progress for the URL is reset.
    pub async fn store(&self, url: &str, bytes: &[u8]) -> Result<PathBuf> {
        let previous = self.entry(url).await?;
        let path = self.path_for(url).await?;

        let tmp = path.with_file_name(format!(
            ".{}.part",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move blob into place: {}", path.display()))?;

        if let Some(previous) = previous {
            if previous.local_path != path && previous.local_path.is_file() {
                let _ = tokio::fs::remove_file(&previous.local_path).await;
            }
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO file_cache (url, local_path, downloaded_at, file_size, processed)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(url) DO UPDATE SET
                local_path = excluded.local_path,
                downloaded_at = excluded.downloaded_at,
                file_size = excluded.file_size,
                processed = 0
            "#,
        )
        .bind(url)
        .bind(path.to_string_lossy().as_ref())
        .bind(Utc::now().to_rfc3339())
        .bind(bytes.len() as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM archive_entries WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(path)
    }

    /// No-op when the URL was never stored.
    pub async fn mark_processed(&self, url: &str) -> Result<()> {
        sqlx::query("UPDATE file_cache SET processed = 1 WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_entry_done(&self, url: &str, entry_name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM archive_entries WHERE url = ? AND entry_name = ?")
            .bind(url)
            .bind(entry_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn mark_entry_done(&self, url: &str, entry_name: &str, records: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO archive_entries (url, entry_name, record_count, processed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url, entry_name) DO UPDATE SET
                record_count = excluded.record_count,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(url)
        .bind(entry_name)
        .bind(records as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn summary(&self) -> Result<CacheSummary> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS files,
                   COALESCE(SUM(processed), 0) AS processed,
                   COALESCE(SUM(file_size), 0) AS bytes
            FROM file_cache
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheSummary {
            cached_files: row.get("files"),
            processed_files: row.get("processed"),
            total_bytes: row.get("bytes"),
        })
    }

    /// Basename when it carries a known extension and no other URL owns it,
    /// otherwise a hash of the URL.
    async fn path_for(&self, url: &str) -> Result<PathBuf> {
        let base = url_basename(url);
        let lower = base.to_lowercase();
        if !base.is_empty() && NAMED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            let candidate = self.dir.join(base);
            let owner: Option<String> =
                sqlx::query_scalar("SELECT url FROM file_cache WHERE local_path = ? AND url <> ?")
                    .bind(candidate.to_string_lossy().as_ref())
                    .bind(url)
                    .fetch_optional(&self.pool)
                    .await?;
            if owner.is_none() {
                return Ok(candidate);
            }
        }
        Ok(self.dir.join(hashed_name(url)))
    }
}

fn hashed_name(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{}.dat", &digest[..32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn cache(dir: &Path) -> ContentCache {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        ContentCache::new(pool, dir.join("blobs")).unwrap()
    }

    #[tokio::test]
    async fn store_then_get_and_mark() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path()).await;
        let url = "https://e.org/files/PT_main.zip";

        assert_eq!(cache.get(url).await.unwrap(), None);
        assert!(!cache.is_processed(url).await.unwrap());

        let path = cache.store(url, b"PK\x03\x04payload").await.unwrap();
        assert_eq!(path.file_name().unwrap(), "PT_main.zip");
        assert_eq!(cache.get(url).await.unwrap(), Some(path.clone()));
        assert!(!cache.is_processed(url).await.unwrap());

        cache.mark_processed(url).await.unwrap();
        assert!(cache.is_processed(url).await.unwrap());

        // re-download resets the flag
        cache.store(url, b"PK\x03\x04newer").await.unwrap();
        assert!(!cache.is_processed(url).await.unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04newer");
    }

    #[tokio::test]
    async fn missing_file_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path()).await;
        let url = "https://e.org/PT_claim.csv";
        let path = cache.store(url, b"a|b\n").await.unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cache.get(url).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unnamed_and_colliding_urls_get_hashed_names() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path()).await;

        let a = cache.store("https://e.org/download?id=7", b"x").await.unwrap();
        let a_name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(a_name.ends_with(".dat"));
        assert_eq!(a_name.len(), 36);

        let first = cache.store("https://one.org/data.csv", b"one").await.unwrap();
        let second = cache.store("https://two.org/data.csv", b"two").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[tokio::test]
    async fn entry_progress_resets_on_store() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path()).await;
        let url = "https://e.org/PT.zip";
        cache.store(url, b"zip").await.unwrap();

        cache.mark_entry_done(url, "PT_main.csv", 10).await.unwrap();
        cache.mark_entry_done(url, "PT_main.csv", 12).await.unwrap();
        assert!(cache.is_entry_done(url, "PT_main.csv").await.unwrap());
        assert!(!cache.is_entry_done(url, "PT_claim.csv").await.unwrap());

        cache.store(url, b"zip2").await.unwrap();
        assert!(!cache.is_entry_done(url, "PT_main.csv").await.unwrap());
    }

    #[tokio::test]
    async fn summary_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(tmp.path()).await;
        assert_eq!(cache.summary().await.unwrap(), CacheSummary::default());

        cache.store("https://e.org/a.csv", b"12345").await.unwrap();
        cache.store("https://e.org/b.csv", b"123").await.unwrap();
        cache.mark_processed("https://e.org/a.csv").await.unwrap();
        cache.mark_processed("https://e.org/never-stored.csv").await.unwrap();

        let s = cache.summary().await.unwrap();
        assert_eq!(s.cached_files, 2);
        assert_eq!(s.processed_files, 1);
        assert_eq!(s.total_bytes, 8);
    }
}
