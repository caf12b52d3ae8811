//! Durable embedding cache.
//!
//! Maintains two embedding matrices (full-text and "about") aligned row-for-row
//! with the knowledge base, mirrors both to binary cache files, and detects
//! staleness through file modification times. Readers work against an immutable
//! snapshot; rebuilds compute off-lock and swap the snapshot in one step, so a
//! retrieval racing a rebuild sees either the old pair or the new pair, never a
//! mix.

use crate::embedding::Embedder;
use crate::error::{Result, SvarError};
use crate::knowledge_base::{Document, KnowledgeBaseStore};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// A dense row-major matrix of embedding vectors, one row per document.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dimensions: usize,
    rows: Vec<Vec<f32>>,
}

impl EmbeddingMatrix {
    /// Build a matrix from embedding rows, validating uniform width.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dimensions = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(bad) = rows.iter().position(|r| r.len() != dimensions) {
            return Err(SvarError::Embedding(format!(
                "row {} has {} dimensions, expected {}",
                bad,
                rows[bad].len(),
                dimensions
            )));
        }
        Ok(Self { dimensions, rows })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Vector width.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Row at the given index.
    pub fn row(&self, index: usize) -> &[f32] {
        &self.rows[index]
    }

    /// Serialize to the cache file encoding: row count and dimensions as
    /// little-endian u32, then rows of little-endian f32.
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.rows.len() * self.dimensions * 4);
        bytes.extend_from_slice(&(self.rows.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        for row in &self.rows {
            for value in row {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }

    fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        let truncated = || {
            SvarError::CacheUnavailable(format!("{} is truncated or corrupt", path.display()))
        };

        if bytes.len() < 8 {
            return Err(truncated());
        }
        let row_count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let dimensions = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let data = &bytes[8..];
        if data.len() != row_count * dimensions * 4 {
            return Err(truncated());
        }

        let mut values = data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        let rows = (0..row_count)
            .map(|_| values.by_ref().take(dimensions).collect())
            .collect();

        Ok(Self { dimensions, rows })
    }

    /// Write the matrix to `path` atomically.
    ///
    /// The bytes go to a temporary file in the target directory first and are
    /// renamed into place; a failed write leaves no partial file behind and no
    /// reader ever observes a half-written cache file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&self.to_bytes())?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| SvarError::Io(e.error))?;
        Ok(())
    }

    /// Read a matrix previously written with [`write_to`](Self::write_to).
    pub fn read_from(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path).map_err(|e| {
            SvarError::CacheUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes, path)
    }
}

/// One consistent view of the cache: the knowledge base, both matrices, and the
/// cache files' modification times recorded when this view was installed.
#[derive(Debug)]
pub struct CacheSnapshot {
    pub documents: Vec<Document>,
    pub text: EmbeddingMatrix,
    pub about: EmbeddingMatrix,
    text_mtime: Option<SystemTime>,
    about_mtime: Option<SystemTime>,
}

impl CacheSnapshot {
    fn empty() -> Self {
        Self {
            documents: Vec::new(),
            text: EmbeddingMatrix {
                dimensions: 0,
                rows: Vec::new(),
            },
            about: EmbeddingMatrix {
                dimensions: 0,
                rows: Vec::new(),
            },
            text_mtime: None,
            about_mtime: None,
        }
    }
}

/// Matrices and documents computed by a rebuild, not yet committed.
struct BuiltIndex {
    documents: Vec<Document>,
    text: EmbeddingMatrix,
    about: EmbeddingMatrix,
}

/// Embedding cache with a durable on-disk mirror.
pub struct EmbeddingCache {
    store: KnowledgeBaseStore,
    embedder: Arc<dyn Embedder>,
    text_path: PathBuf,
    about_path: PathBuf,
    snapshot: RwLock<Arc<CacheSnapshot>>,
    /// Serializes rebuilds and disk reloads; snapshot readers never take it.
    writer: tokio::sync::Mutex<()>,
}

impl EmbeddingCache {
    /// Open the cache, loading from disk when both cache files exist and align
    /// with the knowledge base, rebuilding from scratch otherwise.
    pub async fn open(
        store: KnowledgeBaseStore,
        embedder: Arc<dyn Embedder>,
        text_path: impl Into<PathBuf>,
        about_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let cache = Self {
            store,
            embedder,
            text_path: text_path.into(),
            about_path: about_path.into(),
            snapshot: RwLock::new(Arc::new(CacheSnapshot::empty())),
            writer: tokio::sync::Mutex::new(()),
        };

        match cache.load_from_disk() {
            Ok(snapshot) => {
                info!(
                    "Loaded embedding cache from disk ({} documents)",
                    snapshot.documents.len()
                );
                cache.install(snapshot);
            }
            Err(e) => {
                info!("Embedding cache not usable ({}), rebuilding", e);
                cache.rebuild().await?;
            }
        }

        Ok(cache)
    }

    /// Current snapshot. Cheap: clones an `Arc` under a read lock.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// Rebuild the cache from the knowledge base source.
    ///
    /// Embeddings are computed before any lock is taken; the commit (file
    /// writes plus snapshot swap) happens under the writer lock. A row-count
    /// mismatch abandons the rebuild and leaves both the in-memory and on-disk
    /// state untouched. Idempotent and safe to call concurrently with
    /// retrieval.
    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<()> {
        let built = self.build().await?;

        let _guard = self.writer.lock().await;
        let snapshot = self.commit(built)?;
        info!(
            "Rebuilt embedding cache ({} documents)",
            snapshot.documents.len()
        );
        Ok(())
    }

    /// Verify the on-disk cache still matches this cache's recorded state and
    /// refresh from disk when it does not.
    ///
    /// Runs before every retrieval. The fast path is two file stats and no
    /// lock. When a mismatch is seen, the check is repeated under the writer
    /// lock so a reload cannot race a concurrent rebuild onto stale or
    /// partially-renamed files. Stat or reload failures degrade to a full
    /// rebuild; the previous snapshot keeps serving if that fails too.
    #[instrument(skip(self))]
    pub async fn ensure_fresh(&self) -> Result<()> {
        if self.is_fresh() {
            return Ok(());
        }

        {
            let _guard = self.writer.lock().await;
            // Re-check under the lock: a concurrent rebuild may have already
            // installed a snapshot matching the files on disk.
            if self.is_fresh() {
                return Ok(());
            }

            match self.load_from_disk() {
                Ok(snapshot) => {
                    debug!("Cache files changed on disk, reloaded");
                    self.install(snapshot);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Cache reload failed ({}), falling back to rebuild", e);
                }
            }
        }

        self.rebuild().await
    }

    /// Whether both cache files' current mtimes match the snapshot's record.
    fn is_fresh(&self) -> bool {
        let snapshot = self.snapshot();
        let (Some(text_recorded), Some(about_recorded)) =
            (snapshot.text_mtime, snapshot.about_mtime)
        else {
            return false;
        };
        match (modified_time(&self.text_path), modified_time(&self.about_path)) {
            (Ok(text_now), Ok(about_now)) => {
                text_now == text_recorded && about_now == about_recorded
            }
            // Missing or unreadable cache files make the cache unusable.
            _ => false,
        }
    }

    /// Load the knowledge base and compute both matrices. No locks held.
    async fn build(&self) -> Result<BuiltIndex> {
        let documents = self.store.load()?;

        let texts: Vec<String> = documents.iter().map(|d| d.embedding_text()).collect();
        let abouts: Vec<String> = documents.iter().map(|d| d.about.clone()).collect();

        let text_rows = self.embedder.embed_batch(&texts).await?;
        let about_rows = self.embedder.embed_batch(&abouts).await?;

        if text_rows.len() != documents.len() || about_rows.len() != documents.len() {
            return Err(SvarError::EmbeddingSizeMismatch {
                expected: documents.len(),
                text_rows: text_rows.len(),
                about_rows: about_rows.len(),
            });
        }

        Ok(BuiltIndex {
            documents,
            text: EmbeddingMatrix::from_rows(text_rows)?,
            about: EmbeddingMatrix::from_rows(about_rows)?,
        })
    }

    /// Write both matrices to disk and swap the snapshot. Caller holds the
    /// writer lock.
    fn commit(&self, built: BuiltIndex) -> Result<Arc<CacheSnapshot>> {
        built.text.write_to(&self.text_path)?;
        built.about.write_to(&self.about_path)?;

        let snapshot = Arc::new(CacheSnapshot {
            documents: built.documents,
            text: built.text,
            about: built.about,
            text_mtime: Some(modified_time(&self.text_path)?),
            about_mtime: Some(modified_time(&self.about_path)?),
        });
        *self.snapshot.write().unwrap() = snapshot.clone();
        Ok(snapshot)
    }

    fn install(&self, snapshot: CacheSnapshot) {
        *self.snapshot.write().unwrap() = Arc::new(snapshot);
    }

    /// Read both cache files and the knowledge base, checking alignment.
    ///
    /// The knowledge base is reloaded alongside the matrices: an external
    /// rebuild that changed the document count would otherwise break row
    /// alignment silently.
    fn load_from_disk(&self) -> Result<CacheSnapshot> {
        let text = EmbeddingMatrix::read_from(&self.text_path)?;
        let about = EmbeddingMatrix::read_from(&self.about_path)?;
        let documents = self.store.load()?;

        if text.len() != documents.len() || about.len() != documents.len() {
            return Err(SvarError::CacheUnavailable(format!(
                "cache rows ({} text, {} about) do not match knowledge base length {}",
                text.len(),
                about.len(),
                documents.len()
            )));
        }
        if !text.is_empty() && text.dimensions() != self.embedder.dimensions() {
            return Err(SvarError::CacheUnavailable(format!(
                "cache has {}-dimensional vectors, embedder produces {}",
                text.dimensions(),
                self.embedder.dimensions()
            )));
        }

        Ok(CacheSnapshot {
            documents,
            text,
            about,
            text_mtime: Some(modified_time(&self.text_path)?),
            about_mtime: Some(modified_time(&self.about_path)?),
        })
    }
}

fn modified_time(path: &Path) -> Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| SvarError::CacheUnavailable(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::MockEmbedder;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::io::Write as _;
    use std::time::Duration;

    const KB_JSON: &str = r#"[
        {"id": 1, "about": "Pricing", "text": "Defang is free for small teams.", "path": "/pricing"},
        {"id": 2, "about": "Deployment", "text": "Deploy services with a single command."},
        {"id": 3, "about": "Support", "text": "Reach the team on the community Discord.", "path": "/support"}
    ]"#;

    struct Fixture {
        dir: tempfile::TempDir,
        embedder: Arc<MockEmbedder>,
    }

    impl Fixture {
        fn new(kb_json: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut file = std::fs::File::create(dir.path().join("knowledge_base.json")).unwrap();
            file.write_all(kb_json.as_bytes()).unwrap();
            Self {
                dir,
                embedder: Arc::new(MockEmbedder::new()),
            }
        }

        fn store(&self) -> KnowledgeBaseStore {
            KnowledgeBaseStore::new(self.dir.path().join("knowledge_base.json"))
        }

        fn text_path(&self) -> PathBuf {
            self.dir.path().join("doc_embeddings.bin")
        }

        fn about_path(&self) -> PathBuf {
            self.dir.path().join("doc_about_embeddings.bin")
        }

        async fn open(&self) -> EmbeddingCache {
            EmbeddingCache::open(
                self.store(),
                self.embedder.clone(),
                self.text_path(),
                self.about_path(),
            )
            .await
            .unwrap()
        }
    }

    /// Embedder that drops the last row of every batch.
    struct ShortBatchEmbedder(MockEmbedder);

    #[async_trait]
    impl Embedder for ShortBatchEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.0.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut rows = self.0.embed_batch(texts).await?;
            rows.pop();
            Ok(rows)
        }

        fn dimensions(&self) -> usize {
            self.0.dimensions()
        }
    }

    #[test]
    fn test_matrix_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.bin");

        let matrix =
            EmbeddingMatrix::from_rows(vec![vec![1.0, -0.5, 0.25], vec![0.0, 2.0, -3.5]]).unwrap();
        matrix.write_to(&path).unwrap();

        let loaded = EmbeddingMatrix::read_from(&path).unwrap();
        assert_eq!(loaded, matrix);
        assert_eq!(loaded.dimensions(), 3);
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_matrix_rejects_ragged_rows() {
        let err = EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, SvarError::Embedding(_)));
    }

    #[test]
    fn test_matrix_read_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let err = EmbeddingMatrix::read_from(&path).unwrap_err();
        assert!(matches!(err, SvarError::CacheUnavailable(_)));
    }

    #[tokio::test]
    async fn test_open_rebuilds_when_no_cache_files() {
        let fixture = Fixture::new(KB_JSON);
        let cache = fixture.open().await;

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.documents.len(), 3);
        assert_eq!(snapshot.text.len(), 3);
        assert_eq!(snapshot.about.len(), 3);
        assert!(fixture.text_path().exists());
        assert!(fixture.about_path().exists());

        // Both matrices round-trip through their cache files
        let on_disk = EmbeddingMatrix::read_from(&fixture.text_path()).unwrap();
        assert_eq!(on_disk, snapshot.text);
    }

    #[tokio::test]
    async fn test_open_fast_path_skips_recompute() {
        let fixture = Fixture::new(KB_JSON);
        let first = fixture.open().await;
        let calls_after_build = fixture.embedder.batch_calls();
        assert_eq!(calls_after_build, 2);

        let second = EmbeddingCache::open(
            fixture.store(),
            fixture.embedder.clone(),
            fixture.text_path(),
            fixture.about_path(),
        )
        .await
        .unwrap();

        assert_eq!(fixture.embedder.batch_calls(), calls_after_build);
        assert_eq!(second.snapshot().text, first.snapshot().text);
    }

    #[tokio::test]
    async fn test_rebuild_abandoned_on_size_mismatch() {
        // Four documents, but the embedder will only return three vectors
        let fixture = Fixture::new(
            r#"[
                {"id": 1, "about": "Pricing", "text": "Defang is free for small teams.", "path": "/pricing"},
                {"id": 2, "about": "Deployment", "text": "Deploy services with a single command."},
                {"id": 3, "about": "Support", "text": "Reach the team on the community Discord.", "path": "/support"},
                {"id": 4, "about": "CLI", "text": "Install the CLI from the releases page."}
            ]"#,
        );
        let cache = fixture.open().await;
        let before = cache.snapshot();
        let text_bytes = std::fs::read(fixture.text_path()).unwrap();

        let broken = EmbeddingCache {
            store: fixture.store(),
            embedder: Arc::new(ShortBatchEmbedder(MockEmbedder::new())),
            text_path: fixture.text_path(),
            about_path: fixture.about_path(),
            snapshot: RwLock::new(cache.snapshot()),
            writer: tokio::sync::Mutex::new(()),
        };

        let err = broken.rebuild().await.unwrap_err();
        assert!(matches!(err, SvarError::EmbeddingSizeMismatch { .. }));

        // Prior in-memory and on-disk state remains authoritative
        assert!(Arc::ptr_eq(&broken.snapshot(), &before));
        assert_eq!(std::fs::read(fixture.text_path()).unwrap(), text_bytes);
    }

    #[tokio::test]
    async fn test_ensure_fresh_reloads_on_mtime_change() {
        let fixture = Fixture::new(KB_JSON);
        let cache = fixture.open().await;
        let before = cache.snapshot();
        let calls_after_build = fixture.embedder.batch_calls();

        // Rewrite the cache files as an external rebuild would; sleep so the
        // new mtimes differ even on coarse filesystem clocks.
        std::thread::sleep(Duration::from_millis(20));
        before.text.write_to(&fixture.text_path()).unwrap();
        before.about.write_to(&fixture.about_path()).unwrap();

        cache.ensure_fresh().await.unwrap();

        let after = cache.snapshot();
        assert!(!Arc::ptr_eq(&before, &after), "snapshot should be reloaded");
        assert_eq!(after.text, before.text);
        // Reload reads files, it never recomputes embeddings
        assert_eq!(fixture.embedder.batch_calls(), calls_after_build);
    }

    #[tokio::test]
    async fn test_ensure_fresh_is_idempotent() {
        let fixture = Fixture::new(KB_JSON);
        let cache = fixture.open().await;

        cache.ensure_fresh().await.unwrap();
        let first = cache.snapshot();
        cache.ensure_fresh().await.unwrap();
        let second = cache.snapshot();

        assert!(
            Arc::ptr_eq(&first, &second),
            "no intervening file change, so no reload"
        );
    }

    #[tokio::test]
    async fn test_ensure_fresh_rebuilds_when_files_missing() {
        let fixture = Fixture::new(KB_JSON);
        let cache = fixture.open().await;
        let calls_after_build = fixture.embedder.batch_calls();

        std::fs::remove_file(fixture.text_path()).unwrap();
        std::fs::remove_file(fixture.about_path()).unwrap();

        cache.ensure_fresh().await.unwrap();

        assert_eq!(fixture.embedder.batch_calls(), calls_after_build + 2);
        assert!(fixture.text_path().exists());
        assert!(fixture.about_path().exists());
        assert_eq!(cache.snapshot().text.len(), 3);
    }

    #[tokio::test]
    async fn test_open_rebuilds_on_row_misalignment() {
        let fixture = Fixture::new(KB_JSON);

        // Seed cache files that disagree with the 3-document knowledge base
        let stale = EmbeddingMatrix::from_rows(vec![vec![0.0; 256]]).unwrap();
        stale.write_to(&fixture.text_path()).unwrap();
        stale.write_to(&fixture.about_path()).unwrap();

        let cache = fixture.open().await;

        assert!(fixture.embedder.batch_calls() > 0, "must have recomputed");
        assert_eq!(cache.snapshot().text.len(), 3);
    }

    #[tokio::test]
    async fn test_rebuild_propagates_malformed_knowledge_base() {
        let fixture = Fixture::new(KB_JSON);
        let cache = fixture.open().await;
        let before = cache.snapshot();

        // Corrupt the knowledge base source; prior state must keep serving
        std::fs::write(
            fixture.dir.path().join("knowledge_base.json"),
            r#"[{"id": 9, "about": "Orphan"}]"#,
        )
        .unwrap();

        let err = cache.rebuild().await.unwrap_err();
        assert!(matches!(err, SvarError::MalformedKnowledgeBase(_)));
        assert!(Arc::ptr_eq(&cache.snapshot(), &before));
    }
}
