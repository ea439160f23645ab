//! Persistent vector index over code chunks.
//!
//! Entries live in one SQLite file, keyed by collection, and are stored once
//! per content hash. Every indexed path gets a manifest row in `files`
//! pointing at its hash, written in the same transaction as any entries, so
//! a crash leaves either the old version or the complete new one. Entries
//! for a hash are deleted only when no manifest row references it; identical
//! files at several paths share them.
//!
//! Search is exhaustive: the query vector is compared against every entry
//! in the collection by cosine similarity, computed in Rust.

use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::chunk::chunk_file;
use crate::config::ChunkingConfig;
use crate::db;
use crate::embedding::{self, Embedder};
use crate::error::{CoreError, Result};
use crate::migrate;
use crate::models::{ChunkMetadata, SearchHit, SourceFile};
use crate::scanner::normalize_extension;

#[derive(Debug, Clone, Serialize)]
pub struct UpsertFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertReport {
    pub chunks_written: usize,
    pub files_written: usize,
    pub files_unchanged: usize,
    pub failures: Vec<UpsertFailure>,
}

/// Outcome of indexing one file version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileUpsert {
    /// The same content hash is already fully indexed.
    Unchanged,
    Written { chunks: usize },
}

impl FileUpsert {
    pub fn chunks_written(&self) -> usize {
        match self {
            FileUpsert::Unchanged => 0,
            FileUpsert::Written { chunks } => *chunks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub total_entries: u64,
    pub total_files: u64,
    pub collection: String,
    pub location: String,
}

pub struct IndexStore {
    pool: SqlitePool,
    collection: String,
    location: String,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    max_chars: usize,
    overlap_chars: usize,
    file_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    queries_served: AtomicU64,
}

impl IndexStore {
    /// Open or create the index at `path` and run migrations.
    pub async fn open(
        path: &Path,
        collection: &str,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        chunking: &ChunkingConfig,
    ) -> Result<Self> {
        if chunking.overlap_chars >= chunking.max_chars {
            return Err(CoreError::InvalidArgument(format!(
                "chunk overlap ({}) must be smaller than max size ({})",
                chunking.overlap_chars, chunking.max_chars
            )));
        }

        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
            location: path.display().to_string(),
            embedder,
            batch_size: batch_size.max(1),
            max_chars: chunking.max_chars,
            overlap_chars: chunking.overlap_chars,
            file_locks: Mutex::new(HashMap::new()),
            queries_served: AtomicU64::new(0),
        })
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of searches run since this store was opened.
    pub fn queries_served(&self) -> u64 {
        self.queries_served.load(Ordering::Relaxed)
    }

    /// Index a batch of files. One file's failure never aborts the others.
    pub async fn upsert(&self, files: &[SourceFile]) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();

        for file in files {
            match self.upsert_file(file).await {
                Ok(FileUpsert::Unchanged) => report.files_unchanged += 1,
                Ok(FileUpsert::Written { chunks }) => {
                    report.files_written += 1;
                    report.chunks_written += chunks;
                }
                Err(e @ CoreError::StoreUnavailable(_)) => return Err(e),
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to index file");
                    report.failures.push(UpsertFailure {
                        path: file.path.display().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Index one file version.
    ///
    /// Content already stored under another path is linked to this path
    /// without re-embedding. Embedding happens before any lock is taken;
    /// the per-hash lock only covers the re-check and the write transaction.
    pub async fn upsert_file(&self, file: &SourceFile) -> Result<FileUpsert> {
        let chunks = chunk_file(
            &file.content_hash,
            &file.content,
            self.max_chars,
            self.overlap_chars,
        )?;
        let path = file.path.to_string_lossy().to_string();

        if self
            .path_is_current(&path, &file.content_hash, chunks.len())
            .await?
        {
            debug!(path = %path, "unchanged, skipping");
            return Ok(FileUpsert::Unchanged);
        }
        if self.link_path(file, chunks.len()).await? {
            debug!(path = %path, "content already indexed, linked");
            return Ok(FileUpsert::Unchanged);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embedder.embed(batch).await?);
        }
        if vectors.len() != chunks.len() {
            return Err(CoreError::embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let lock = self.lock_for(&file.content_hash);
        let outcome = {
            let _guard = lock.lock().await;
            if self
                .path_is_current(&path, &file.content_hash, chunks.len())
                .await?
                || self.link_path(file, chunks.len()).await?
            {
                FileUpsert::Unchanged
            } else {
                self.write_file(file, &chunks, &vectors).await?;
                FileUpsert::Written {
                    chunks: chunks.len(),
                }
            }
        };
        drop(lock);
        self.release_locks();

        if let FileUpsert::Written { chunks } = outcome {
            debug!(path = %path, chunks, "indexed file");
        }
        Ok(outcome)
    }

    async fn write_file(
        &self,
        file: &SourceFile,
        chunks: &[crate::models::Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let path = file.path.to_string_lossy().to_string();
        let file_name = file.file_name();
        let modified_at = file.modified_at.timestamp();

        let mut tx = self.pool.begin().await?;

        // Partial rows for this version
        sqlx::query("DELETE FROM entries WHERE collection = ? AND file_hash = ?")
            .bind(&self.collection)
            .bind(&file.content_hash)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO entries (collection, chunk_id, file_hash, chunk_index, path,
                                     file_name, extension, size, modified_at, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&self.collection)
            .bind(&chunk.id)
            .bind(&chunk.file_hash)
            .bind(chunk.chunk_index)
            .bind(&path)
            .bind(&file_name)
            .bind(&file.extension)
            .bind(file.size as i64)
            .bind(modified_at)
            .bind(&chunk.text)
            .bind(embedding::vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        self.point_path_at(&mut *tx, &path, &file.content_hash, chunks.len())
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record `file`'s path against content that is already fully stored.
    ///
    /// Returns `false`, writing nothing, when the content is not stored yet.
    async fn link_path(&self, file: &SourceFile, chunk_count: usize) -> Result<bool> {
        let path = file.path.to_string_lossy().to_string();
        let mut tx = self.pool.begin().await?;

        // Take the write lock before reading so the count cannot go stale
        let previous: Option<String> = sqlx::query_scalar(
            "DELETE FROM files WHERE collection = ? AND path = ? RETURNING file_hash",
        )
        .bind(&self.collection)
        .bind(&path)
        .fetch_optional(&mut *tx)
        .await?;

        let stored = stored_chunks(&mut *tx, &self.collection, &file.content_hash).await?;
        if chunk_count == 0 || stored != chunk_count as i64 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO files (collection, path, file_hash, chunk_count, indexed_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.collection)
        .bind(&path)
        .bind(&file.content_hash)
        .bind(chunk_count as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        if let Some(old) = previous.filter(|h| *h != file.content_hash) {
            self.release_hash(&mut *tx, &old, &path).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Replace `path`'s manifest row, releasing the hash it pointed at before.
    async fn point_path_at(
        &self,
        conn: &mut SqliteConnection,
        path: &str,
        file_hash: &str,
        chunk_count: usize,
    ) -> Result<()> {
        let previous: Option<String> = sqlx::query_scalar(
            "DELETE FROM files WHERE collection = ? AND path = ? RETURNING file_hash",
        )
        .bind(&self.collection)
        .bind(path)
        .fetch_optional(&mut *conn)
        .await?;

        sqlx::query(
            "INSERT INTO files (collection, path, file_hash, chunk_count, indexed_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.collection)
        .bind(path)
        .bind(file_hash)
        .bind(chunk_count as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *conn)
        .await?;

        if let Some(old) = previous.filter(|h| h != file_hash) {
            self.release_hash(conn, &old, path).await?;
        }
        Ok(())
    }

    /// `departing` no longer holds `file_hash`. Entries are deleted once no
    /// path references the hash; otherwise they move to a remaining path.
    async fn release_hash(
        &self,
        conn: &mut SqliteConnection,
        file_hash: &str,
        departing: &str,
    ) -> Result<()> {
        let holder: Option<String> = sqlx::query_scalar(
            "SELECT path FROM files WHERE collection = ? AND file_hash = ? ORDER BY path LIMIT 1",
        )
        .bind(&self.collection)
        .bind(file_hash)
        .fetch_optional(&mut *conn)
        .await?;

        match holder {
            None => {
                sqlx::query("DELETE FROM entries WHERE collection = ? AND file_hash = ?")
                    .bind(&self.collection)
                    .bind(file_hash)
                    .execute(&mut *conn)
                    .await?;
            }
            Some(holder) => {
                let holder_path = Path::new(&holder);
                let file_name = holder_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let extension = holder_path
                    .extension()
                    .map(|e| normalize_extension(&e.to_string_lossy()))
                    .unwrap_or_default();
                sqlx::query(
                    r#"
                    UPDATE entries SET path = ?, file_name = ?, extension = ?
                    WHERE collection = ? AND file_hash = ? AND path = ?
                    "#,
                )
                .bind(&holder)
                .bind(&file_name)
                .bind(&extension)
                .bind(&self.collection)
                .bind(file_hash)
                .bind(departing)
                .execute(&mut *conn)
                .await?;
            }
        }
        Ok(())
    }

    /// Drop `path`'s manifest row and release its content.
    async fn forget_path(&self, conn: &mut SqliteConnection, path: &str) -> Result<bool> {
        let previous: Option<String> = sqlx::query_scalar(
            "DELETE FROM files WHERE collection = ? AND path = ? RETURNING file_hash",
        )
        .bind(&self.collection)
        .bind(path)
        .fetch_optional(&mut *conn)
        .await?;

        match previous {
            Some(old) => {
                self.release_hash(conn, &old, path).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn path_is_current(&self, path: &str, file_hash: &str, chunk_count: usize) -> Result<bool> {
        let manifest: Option<(String, i64)> = sqlx::query_as(
            "SELECT file_hash, chunk_count FROM files WHERE collection = ? AND path = ?",
        )
        .bind(&self.collection)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        match manifest {
            Some((hash, count)) if hash == file_hash && count == chunk_count as i64 => {
                let mut conn = self.pool.acquire().await?;
                Ok(stored_chunks(&mut *conn, &self.collection, file_hash).await? == count)
            }
            _ => Ok(false),
        }
    }

    fn lock_for(&self, file_hash: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .file_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(file_hash.to_string()).or_default().clone()
    }

    fn release_locks(&self) {
        let mut locks = self
            .file_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Return the `k` entries most similar to `query`.
    ///
    /// Ties keep insertion order.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k < 1 {
            return Err(CoreError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }
        self.queries_served.fetch_add(1, Ordering::Relaxed);

        let rows = sqlx::query(
            r#"
            SELECT seq, chunk_id, file_hash, chunk_index, path, file_name, extension,
                   size, modified_at, text, embedding
            FROM entries
            WHERE collection = ?
            ORDER BY seq
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = embedding::embed_query(self.embedder.as_ref(), query).await?;

        let mut scored: Vec<(i64, SearchHit)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = embedding::cosine_similarity(&query_vec, &embedding::blob_to_vec(&blob));
                let hit = SearchHit {
                    chunk_id: row.get("chunk_id"),
                    text: row.get("text"),
                    metadata: ChunkMetadata {
                        file_path: row.get("path"),
                        file_name: row.get("file_name"),
                        file_extension: row.get("extension"),
                        file_size: row.get::<i64, _>("size") as u64,
                        file_hash: row.get("file_hash"),
                        last_modified: row.get("modified_at"),
                        chunk_index: row.get("chunk_index"),
                    },
                    score,
                };
                (row.get::<i64, _>("seq"), hit)
            })
            .collect();

        scored.sort_by(|(seq_a, a), (seq_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(seq_a.cmp(seq_b))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, hit)| hit).collect())
    }

    /// Remove every entry and manifest row of this collection.
    pub async fn clear(&self) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entries WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(collection = %self.collection, "index cleared");
        Ok(true)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let total_entries: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ?")
                .bind(&self.collection)
                .fetch_one(&self.pool)
                .await?;
        let total_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;

        Ok(IndexStats {
            total_entries: total_entries as u64,
            total_files: total_files as u64,
            collection: self.collection.clone(),
            location: self.location.clone(),
        })
    }

    /// Drop indexed files under `root` whose path is not in `live_paths`.
    ///
    /// Content still referenced by a live path stays indexed. Returns the
    /// number of paths removed.
    pub async fn retain_paths_under(
        &self,
        root: &Path,
        live_paths: &HashSet<String>,
    ) -> Result<usize> {
        let indexed: Vec<String> =
            sqlx::query_scalar("SELECT path FROM files WHERE collection = ?")
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?;

        let stale: Vec<String> = indexed
            .into_iter()
            .filter(|p| Path::new(p).starts_with(root) && !live_paths.contains(p))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for path in &stale {
            self.forget_path(&mut *tx, path).await?;
        }
        tx.commit().await?;

        info!(removed = stale.len(), root = %root.display(), "pruned deleted files");
        Ok(stale.len())
    }

    /// Drop one path from the index. Returns whether it was indexed.
    pub async fn remove_path(&self, path: &Path) -> Result<bool> {
        let path = path.to_string_lossy().to_string();
        let mut tx = self.pool.begin().await?;
        let removed = self.forget_path(&mut *tx, &path).await?;
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn stored_chunks(conn: &mut SqliteConnection, collection: &str, file_hash: &str) -> Result<i64> {
    let stored = sqlx::query_scalar(
        "SELECT COUNT(*) FROM entries WHERE collection = ? AND file_hash = ?",
    )
    .bind(collection)
    .bind(file_hash)
    .fetch_one(&mut *conn)
    .await?;
    Ok(stored)
}
