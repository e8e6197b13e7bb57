//! The persisted similarity index.
//!
//! A single SQLite file holds the synthesized documents, their embedding
//! vectors (little-endian f32 BLOBs), and an `index_meta` table recording
//! the embedding model, dimensionality, and a SHA-256 of the catalog the
//! index was built from.
//!
//! The file's presence is the build-or-load signal: an existing file is
//! opened and validated (never rebuilt), a missing one triggers a full
//! embed-and-store pass. Staleness against the catalog is detected via the
//! stored hash and reported on stderr, never acted on; `tome index
//! --rebuild` is the manual path.
//!
//! No other module touches the persisted file.

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::error::{Error, Result};
use crate::synth::{DocKind, Document};

/// A retrieval hit: the stored document plus its cosine similarity to the
/// query, in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    pub score: f64,
}

/// Summary of a loaded index, for `tome stats`.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub documents: i64,
    pub vectors: i64,
    pub by_type: Vec<(String, i64)>,
    pub model: String,
    pub dims: usize,
    pub created_at: Option<i64>,
}

pub struct SearchIndex {
    pool: SqlitePool,
    path: PathBuf,
    embedder: Box<dyn Embedder>,
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SearchIndex {
    /// Build-or-load: open the persisted index at the configured path if it
    /// exists (the `documents` argument is ignored on that branch),
    /// otherwise embed `documents` and persist a fresh one.
    pub async fn open(
        config: &Config,
        embedder: Box<dyn Embedder>,
        documents: &[Document],
    ) -> Result<Self> {
        let path = config.index.path.clone();

        if path.exists() {
            let index = Self::load_existing(config, embedder, path).await?;
            return Ok(index);
        }

        let pool = connect(&path).await?;
        let index = Self {
            pool,
            path,
            embedder,
        };

        if let Err(e) = index.build(config, documents).await {
            // A half-written bundle would be loaded as-is next time; remove
            // it so the next run rebuilds from scratch.
            index.pool.close().await;
            let _ = std::fs::remove_file(&index.path);
            return Err(e);
        }

        Ok(index)
    }

    /// Load an existing index; fails with an index error when no file is
    /// present.
    pub async fn load(config: &Config, embedder: Box<dyn Embedder>) -> Result<Self> {
        let path = config.index.path.clone();
        if !path.exists() {
            return Err(Error::index(
                &path,
                "no persisted index found; run `tome index` first",
            ));
        }
        Self::load_existing(config, embedder, path).await
    }

    async fn load_existing(
        config: &Config,
        embedder: Box<dyn Embedder>,
        path: PathBuf,
    ) -> Result<Self> {
        let pool = connect(&path).await?;
        let index = Self {
            pool,
            path,
            embedder,
        };

        index.validate().await?;
        index.warn_if_stale(&config.catalog.path).await;
        Ok(index)
    }

    /// Top-k nearest documents for a query, most similar first. Ties break
    /// on document id for determinism. An empty index yields an empty vec.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let query_vec = embedding::embed_query(self.embedder.as_ref(), query).await?;

        let rows = sqlx::query(
            r#"
            SELECT d.id, d.content, d.metadata_json, v.embedding
            FROM documents d
            JOIN document_vectors v ON v.document_id = d.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::index(&self.path, e))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            if blob.len() != self.embedder.dims() * 4 {
                return Err(Error::index(
                    &self.path,
                    format!("stored vector for '{}' has the wrong size", id),
                ));
            }

            let metadata_json: String = row.get("metadata_json");
            let kind: DocKind = serde_json::from_str(&metadata_json).map_err(|e| {
                Error::index(&self.path, format!("corrupt metadata for '{}': {}", id, e))
            })?;

            let vector = embedding::blob_to_vec(&blob);
            let score = f64::from(embedding::cosine_similarity(&query_vec, &vector));

            hits.push(SearchHit {
                document: Document {
                    id,
                    content: row.get("content"),
                    kind,
                },
                score,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        hits.truncate(k);

        Ok(hits)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let ix = |e: sqlx::Error| Error::index(&self.path, e);

        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(ix)?;

        let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(ix)?;

        let type_rows = sqlx::query(
            r#"
            SELECT json_extract(metadata_json, '$.type') AS doc_type, COUNT(*) AS n
            FROM documents
            GROUP BY doc_type
            ORDER BY n DESC, doc_type ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ix)?;

        let by_type = type_rows
            .iter()
            .map(|row| {
                let doc_type: Option<String> = row.get("doc_type");
                (doc_type.unwrap_or_else(|| "(unknown)".to_string()), row.get("n"))
            })
            .collect();

        let model = self
            .read_meta("model")
            .await?
            .unwrap_or_else(|| "(unknown)".to_string());
        let dims = self
            .read_meta("dims")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let created_at = self
            .read_meta("created_at")
            .await?
            .and_then(|v| v.parse().ok());

        Ok(IndexStats {
            documents,
            vectors,
            by_type,
            model,
            dims,
            created_at,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    // ============ Build path ============

    async fn build(&self, config: &Config, documents: &[Document]) -> Result<()> {
        self.create_schema().await?;

        for batch in documents.chunks(config.embedding.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| Error::index(&self.path, e))?;

            for (document, vector) in batch.iter().zip(vectors.iter()) {
                let metadata_json = serde_json::to_string(&document.kind)
                    .map_err(|e| Error::index(&self.path, e))?;

                // Identifiers are deterministically derived, so a collision
                // is a rewrite of the same logical document: last one wins.
                sqlx::query(
                    r#"
                    INSERT INTO documents (id, content, metadata_json)
                    VALUES (?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        content = excluded.content,
                        metadata_json = excluded.metadata_json
                    "#,
                )
                .bind(&document.id)
                .bind(&document.content)
                .bind(&metadata_json)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::index(&self.path, e))?;

                sqlx::query(
                    r#"
                    INSERT INTO document_vectors (document_id, embedding)
                    VALUES (?, ?)
                    ON CONFLICT(document_id) DO UPDATE SET
                        embedding = excluded.embedding
                    "#,
                )
                .bind(&document.id)
                .bind(embedding::vec_to_blob(vector))
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::index(&self.path, e))?;
            }

            tx.commit().await.map_err(|e| Error::index(&self.path, e))?;
        }

        self.write_meta("model", self.embedder.model_name()).await?;
        self.write_meta("dims", &self.embedder.dims().to_string())
            .await?;
        self.write_meta("created_at", &chrono::Utc::now().timestamp().to_string())
            .await?;
        if let Some(hash) = hash_file(&config.catalog.path) {
            self.write_meta("catalog_sha256", &hash).await?;
        }

        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        let ix = |e: sqlx::Error| Error::index(&self.path, e);

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                metadata_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ix)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_vectors (
                document_id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ix)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ix)?;

        Ok(())
    }

    // ============ Load path ============

    async fn validate(&self) -> Result<()> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::index(&self.path, format!("not a readable index: {}", e)))?;

        for required in ["documents", "document_vectors", "index_meta"] {
            if !tables.iter().any(|t| t == required) {
                return Err(Error::index(
                    &self.path,
                    format!(
                        "missing table '{}'; the bundle is incomplete or corrupt, run `tome index --rebuild`",
                        required
                    ),
                ));
            }
        }

        let stored_dims: Option<usize> = self.read_meta("dims").await?.and_then(|v| v.parse().ok());
        match stored_dims {
            Some(dims) if dims == self.embedder.dims() => {}
            Some(dims) => {
                return Err(Error::index(
                    &self.path,
                    format!(
                        "built with {}-dimensional embeddings but the configured provider produces {}",
                        dims,
                        self.embedder.dims()
                    ),
                ));
            }
            None => {
                return Err(Error::index(
                    &self.path,
                    "missing embedding metadata; run `tome index --rebuild`",
                ));
            }
        }

        if let Some(model) = self.read_meta("model").await? {
            if model != self.embedder.model_name() {
                eprintln!(
                    "warning: index was built with model '{}', configured model is '{}'",
                    model,
                    self.embedder.model_name()
                );
            }
        }

        Ok(())
    }

    async fn warn_if_stale(&self, catalog_path: &Path) {
        let stored = match self.read_meta("catalog_sha256").await {
            Ok(Some(hash)) => hash,
            _ => return,
        };
        if let Some(current) = hash_file(catalog_path) {
            if current != stored {
                eprintln!(
                    "warning: {} changed since the index was built; run `tome index --rebuild` to refresh",
                    catalog_path.display()
                );
            }
        }
    }

    // ============ Meta table ============

    async fn read_meta(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::index(&self.path, e))
    }

    async fn write_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::index(&self.path, e))?;
        Ok(())
    }
}

async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::index(path, e))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(|e| Error::index(path, e))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| Error::index(path, e))
}

fn hash_file(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(format!("{:x}", hasher.finalize()))
}

/// Full startup path shared by the query-side commands: load the catalog,
/// synthesize the document set, and build-or-load the index.
pub async fn open_pipeline(config: &Config) -> Result<SearchIndex> {
    let records = crate::catalog::load_catalog(
        &config.catalog.path,
        config.catalog.chunk_size,
    )?;
    let documents = crate::synth::synthesize(&records);
    let embedder = crate::embedding::create_embedder(&config.embedding)?;
    SearchIndex::open(config, embedder, &documents).await
}

/// `tome index`: build the persisted bundle eagerly.
pub async fn run_build(config: &Config, rebuild: bool) -> Result<()> {
    let path = &config.index.path;

    if path.exists() {
        if !rebuild {
            println!(
                "Index already exists at {}; use --rebuild to regenerate.",
                path.display()
            );
            return Ok(());
        }
        std::fs::remove_file(path).map_err(|e| Error::index(path, e))?;
        // WAL sidecars from an unclean shutdown would taint the new bundle.
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(sidecar));
        }
    }

    let index = open_pipeline(config).await?;
    let stats = index.stats().await?;

    println!("index built");
    println!("  path: {}", index.path().display());
    println!("  documents: {}", stats.documents);
    for (doc_type, count) in &stats.by_type {
        println!("    {}: {}", doc_type, count);
    }
    println!("  model: {} ({} dims)", stats.model, stats.dims);

    index.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::load_catalog;
    use crate::embedding::HashEmbedder;
    use crate::synth::synthesize;
    use std::io::Write;

    const DIMS: usize = 256;

    fn test_config(dir: &Path, catalog_lines: &[&str]) -> Config {
        let catalog_path = dir.join("books.jsonl");
        let mut file = std::fs::File::create(&catalog_path).unwrap();
        for line in catalog_lines {
            writeln!(file, "{}", line).unwrap();
        }

        let toml_str = format!(
            r#"
[catalog]
path = "{}"

[index]
path = "{}"

[embedding]
provider = "hash"
dims = {}
"#,
            catalog_path.display(),
            dir.join("index.sqlite").display(),
            DIMS
        );
        toml::from_str(&toml_str).unwrap()
    }

    const CORPUS: &[&str] = &[
        r#"{"id": 1, "title": "The Dragon Keep", "authors": ["X"], "publication_year": 1990, "average_rating": 4.5, "ratings_count": 10}"#,
        r#"{"id": 2, "title": "Ledger Days", "authors": ["X", "Y"], "publication_year": 1990, "average_rating": 3.0, "ratings_count": 5}"#,
    ];

    async fn build_index(config: &Config) -> SearchIndex {
        let records = load_catalog(&config.catalog.path, None).unwrap();
        let documents = synthesize(&records);
        SearchIndex::open(config, Box::new(HashEmbedder::new(DIMS)), &documents)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn persisted_search_matches_fresh_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), CORPUS);

        let index = build_index(&config).await;
        let before: Vec<String> = index
            .search("dragon", 5)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.document.id)
            .collect();
        index.close().await;

        // Second open takes the load branch (documents ignored).
        let reloaded = SearchIndex::open(&config, Box::new(HashEmbedder::new(DIMS)), &[])
            .await
            .unwrap();
        let after: Vec<String> = reloaded
            .search("dragon", 5)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.document.id)
            .collect();

        assert_eq!(before, after);
        assert!(!after.is_empty());
    }

    #[tokio::test]
    async fn search_ranks_matching_content_first() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), CORPUS);

        let index = build_index(&config).await;
        // Both the Book and TopRated documents for id 1 mention the phrase;
        // either outranking everything else is correct.
        let hits = index.search("Dragon Keep", 1).await.unwrap();
        assert!(hits[0].document.content.contains("The Dragon Keep"));
        index.close().await;
    }

    #[tokio::test]
    async fn empty_corpus_searches_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &[]);

        let index = build_index(&config).await;
        let hits = index.search("anything", 10).await.unwrap();
        assert!(hits.is_empty());
        index.close().await;
    }

    #[tokio::test]
    async fn dims_mismatch_is_an_index_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), CORPUS);

        build_index(&config).await.close().await;

        let err = SearchIndex::open(&config, Box::new(HashEmbedder::new(DIMS * 2)), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Index { .. }));
    }

    #[tokio::test]
    async fn load_without_bundle_is_an_index_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), CORPUS);

        let err = SearchIndex::load(&config, Box::new(HashEmbedder::new(DIMS)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Index { .. }));
    }

    #[tokio::test]
    async fn bundle_without_tables_is_an_index_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), CORPUS);

        // A plain SQLite file that was never an index.
        let pool = connect(&config.index.path).await.unwrap();
        sqlx::query("CREATE TABLE misc (x INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let err = SearchIndex::open(&config, Box::new(HashEmbedder::new(DIMS)), &[])
            .await
            .unwrap_err();
        match err {
            Error::Index { reason, .. } => assert!(reason.contains("missing table")),
            other => panic!("expected Index error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stats_reports_counts_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), CORPUS);

        let index = build_index(&config).await;
        let stats = index.stats().await.unwrap();

        // 2 books + 2 authors + 1 decade + 2 top-rated
        assert_eq!(stats.documents, 7);
        assert_eq!(stats.vectors, 7);
        assert_eq!(stats.dims, DIMS);
        assert_eq!(stats.model, "hash");

        let books = stats
            .by_type
            .iter()
            .find(|(t, _)| t == "Book")
            .map(|(_, n)| *n);
        assert_eq!(books, Some(2));
        index.close().await;
    }

    #[tokio::test]
    async fn failed_build_leaves_no_bundle() {
        struct Failing;

        #[async_trait::async_trait]
        impl Embedder for Failing {
            fn model_name(&self) -> &str {
                "failing"
            }
            fn dims(&self) -> usize {
                DIMS
            }
            async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Err(Error::Embedding("unreachable".to_string()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), CORPUS);
        let records = load_catalog(&config.catalog.path, None).unwrap();
        let documents = synthesize(&records);

        let err = SearchIndex::open(&config, Box::new(Failing), &documents)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert!(!config.index.path.exists());
    }
}
