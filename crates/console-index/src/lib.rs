//! Full-text index over container metadata.
//!
//! Every container becomes one tantivy document keyed by its identifier. The
//! matchable fields (names, image, command, state, labels, ...) are tokenised
//! with the default analyzer and the full record is stored verbatim as JSON.
//!
//! The index lives at `<user cache dir>/docker-console/index.tantivy` and is
//! opened if present, created otherwise. Nothing is ever pruned: containers
//! removed from the daemon stay searchable until the cache is deleted.

pub mod builder;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use console_common::{ConsoleError, ContainerRecord, Result, APPLICATION_NAME};
use directories::BaseDirs;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, error, info, instrument};

pub use builder::{build_index, spawn_index_build, start_index_build, BuildState, IndexBuild};

/// Name of the single collection held by the index.
pub const COLLECTION_NAME: &str = "containers";

/// Directory name of the index inside the application cache directory.
pub const INDEX_DIR_NAME: &str = "index.tantivy";

/// Number of ranked identifiers returned per query. The total hit count is
/// reported independently and may be larger.
pub const DEFAULT_HIT_LIMIT: usize = 10;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Result of a match query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchHits {
    /// Number of matching documents in the whole index.
    pub total: u64,
    /// Best-ranked identifiers, at most the hit limit.
    pub ids: Vec<String>,
}

/// Schema for container documents.
///
/// - `id`: STRING | STORED, the document key
/// - `names`, `image`, `image_id`, `command`, `state`, `status`, `labels`: TEXT
/// - `record`: STORED only, the container serialised as JSON
pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();

    schema_builder.add_text_field("id", STRING | STORED);

    schema_builder.add_text_field("names", TEXT);
    schema_builder.add_text_field("image", TEXT);
    schema_builder.add_text_field("image_id", TEXT);
    schema_builder.add_text_field("command", TEXT);
    schema_builder.add_text_field("state", TEXT);
    schema_builder.add_text_field("status", TEXT);
    // Keys and values, one entry each
    schema_builder.add_text_field("labels", TEXT);

    schema_builder.add_text_field("record", STORED);

    schema_builder.build()
}

struct Fields {
    id: Field,
    names: Field,
    image: Field,
    image_id: Field,
    command: Field,
    state: Field,
    status: Field,
    labels: Field,
    record: Field,
}

impl Fields {
    fn resolve(schema: &Schema) -> tantivy::Result<Self> {
        Ok(Self {
            id: schema.get_field("id")?,
            names: schema.get_field("names")?,
            image: schema.get_field("image")?,
            image_id: schema.get_field("image_id")?,
            command: schema.get_field("command")?,
            state: schema.get_field("state")?,
            status: schema.get_field("status")?,
            labels: schema.get_field("labels")?,
            record: schema.get_field("record")?,
        })
    }

    fn tokenized(&self) -> [Field; 7] {
        [
            self.names,
            self.image,
            self.image_id,
            self.command,
            self.state,
            self.status,
            self.labels,
        ]
    }
}

/// Handle to the container index, shared by the builder and all requests.
pub struct ContainerIndex {
    index: Index,
    reader: IndexReader,
    /// `commit` needs `&mut`, everything else goes through the same lock.
    writer: Mutex<IndexWriter>,
    fields: Fields,
    hit_limit: usize,
}

impl ContainerIndex {
    /// Open the index in the per-user cache directory, creating the
    /// application directory and the index as needed.
    pub fn open_in_cache_dir() -> Result<Self> {
        Self::open(&default_index_path()?)
    }

    /// Open or create an index at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let directory = MmapDirectory::open(path).map_err(io_error)?;
        let index = Index::open_or_create(directory, build_schema()).map_err(io_error)?;

        info!(path = %path.display(), collection = COLLECTION_NAME, "opened search index");
        Self::from_index(index)
    }

    /// Index held entirely in memory.
    pub fn open_in_ram() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        let fields = Fields::resolve(&index.schema()).map_err(io_error)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(io_error)?;
        let writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(io_error)?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
            hit_limit: DEFAULT_HIT_LIMIT,
        })
    }

    /// Override how many identifiers a query returns (minimum 1).
    #[cfg(test)]
    fn with_hit_limit(mut self, limit: usize) -> Self {
        self.hit_limit = limit.max(1);
        self
    }

    pub fn name(&self) -> &'static str {
        COLLECTION_NAME
    }

    /// Stage a container document, replacing any document with the same id.
    /// Not visible to queries until [`commit`](Self::commit).
    pub fn insert(&self, record: &ContainerRecord) -> Result<()> {
        let document = self.document_for(record)?;
        let writer = self.lock_writer()?;
        writer.delete_term(Term::from_field_text(self.fields.id, &record.id));
        writer.add_document(document).map_err(index_error)?;
        Ok(())
    }

    /// Insert every record and commit, stopping at the first failure.
    /// Records inserted before a failure are still committed.
    #[instrument(skip_all, fields(collection = COLLECTION_NAME, containers = records.len()))]
    pub fn insert_all(&self, records: &[ContainerRecord]) -> Result<u64> {
        self.insert_all_with(records, |record| self.insert(record))
    }

    fn insert_all_with<F>(&self, records: &[ContainerRecord], mut insert: F) -> Result<u64>
    where
        F: FnMut(&ContainerRecord) -> Result<()>,
    {
        for record in records {
            if let Err(err) = insert(record) {
                // The insertion error is the one reported
                if let Err(commit_err) = self.commit() {
                    error!("Failed to commit containers indexed before {}: {}", record.id, commit_err);
                }
                return Err(err);
            }
        }
        self.commit()?;
        Ok(self.doc_count())
    }

    /// Persist staged documents and make them visible to queries.
    pub fn commit(&self) -> Result<()> {
        self.lock_writer()?.commit().map_err(index_error)?;
        self.reader.reload().map_err(index_error)?;
        Ok(())
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Run a match query: `text` is tokenised like the indexed fields and a
    /// document matches when any token matches any field.
    pub fn search(&self, text: &str) -> Result<SearchHits> {
        let Some(query) = self.match_query(text)? else {
            return Ok(SearchHits::default());
        };

        let searcher = self.reader.searcher();
        let (total, top_docs) = searcher
            .search(&query, &(Count, TopDocs::with_limit(self.hit_limit)))
            .map_err(index_error)?;

        let mut ids = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let document: TantivyDocument = searcher.doc(address).map_err(index_error)?;
            if let Some(id) = document.get_first(self.fields.id).and_then(|v| v.as_str()) {
                ids.push(id.to_string());
            }
        }

        debug!(query = text, total, returned = ids.len(), "search complete");
        Ok(SearchHits {
            total: total as u64,
            ids,
        })
    }

    /// Stored copy of a container, as it was when indexed.
    #[cfg(test)]
    fn get(&self, id: &str) -> Result<Option<ContainerRecord>> {
        let query = TermQuery::new(
            Term::from_field_text(self.fields.id, id),
            IndexRecordOption::Basic,
        );
        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(1))
            .map_err(index_error)?;

        let Some((_score, address)) = top_docs.into_iter().next() else {
            return Ok(None);
        };
        let document: TantivyDocument = searcher.doc(address).map_err(index_error)?;
        let Some(json) = document.get_first(self.fields.record).and_then(|v| v.as_str()) else {
            return Ok(None);
        };
        serde_json::from_str(json).map(Some).map_err(index_error)
    }

    fn match_query(&self, text: &str) -> Result<Option<BooleanQuery>> {
        let mut analyzer = self
            .index
            .tokenizer_for_field(self.fields.names)
            .map_err(index_error)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        if tokens.is_empty() {
            return Ok(None);
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for token in &tokens {
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.id, token),
                    IndexRecordOption::Basic,
                )),
            ));
            for field in self.fields.tokenized() {
                clauses.push((
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_text(field, token),
                        IndexRecordOption::WithFreqs,
                    )),
                ));
            }
        }
        Ok(Some(BooleanQuery::new(clauses)))
    }

    fn document_for(&self, record: &ContainerRecord) -> Result<TantivyDocument> {
        let fields = &self.fields;
        let mut document = TantivyDocument::default();

        document.add_text(fields.id, &record.id);
        for name in &record.names {
            document.add_text(fields.names, name);
        }
        document.add_text(fields.image, &record.image);
        document.add_text(fields.image_id, &record.image_id);
        document.add_text(fields.command, &record.command);
        document.add_text(fields.state, &record.state);
        document.add_text(fields.status, &record.status);
        for (key, value) in &record.labels {
            document.add_text(fields.labels, key);
            document.add_text(fields.labels, value);
        }

        let json = serde_json::to_string(record).map_err(index_error)?;
        document.add_text(fields.record, json);
        Ok(document)
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|_| ConsoleError::Index("index writer lock poisoned".to_string()))
    }
}

/// `<user cache dir>/docker-console/index.tantivy`, creating the application
/// directory if it does not exist yet.
pub fn default_index_path() -> Result<PathBuf> {
    let base = BaseDirs::new().ok_or_else(|| {
        ConsoleError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            "user cache directory could not be resolved",
        ))
    })?;
    let app_dir = base.cache_dir().join(APPLICATION_NAME);
    std::fs::create_dir_all(&app_dir)?;
    Ok(app_dir.join(INDEX_DIR_NAME))
}

fn io_error<E>(err: E) -> ConsoleError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ConsoleError::Io(io::Error::other(err))
}

fn index_error(err: impl std::fmt::Display) -> ConsoleError {
    ConsoleError::Index(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use console_common::testing::container;

    fn indexed(records: &[ContainerRecord]) -> ContainerIndex {
        let index = ContainerIndex::open_in_ram().unwrap();
        index.insert_all(records).unwrap();
        index
    }

    #[test]
    fn test_build_schema_has_all_fields() {
        let schema = build_schema();
        for name in [
            "id", "names", "image", "image_id", "command", "state", "status", "labels", "record",
        ] {
            assert!(schema.get_field(name).is_ok(), "missing field {name}");
        }
        assert_eq!(schema.fields().count(), 9);
    }

    #[test]
    fn test_match_on_name_token() {
        let index = indexed(&[
            container("a1", "billing-api", "registry.local/billing:2.1"),
            container("b2", "postgres", "postgres:16"),
        ]);

        let hits = index.search("billing").unwrap();
        assert_eq!(hits.total, 1);
        assert_eq!(hits.ids, vec!["a1".to_string()]);
    }

    #[test]
    fn test_match_on_image_token() {
        let index = indexed(&[
            container("a1", "web", "nginx:1.25"),
            container("b2", "cache", "redis:7"),
        ]);

        let hits = index.search("redis").unwrap();
        assert_eq!(hits.ids, vec!["b2".to_string()]);
    }

    #[test]
    fn test_match_is_case_insensitive_and_ors_tokens() {
        let index = indexed(&[
            container("a1", "web", "nginx"),
            container("b2", "cache", "redis"),
            container("c3", "queue", "rabbitmq"),
        ]);

        let hits = index.search("NGINX Redis").unwrap();
        assert_eq!(hits.total, 2);
        assert!(hits.ids.contains(&"a1".to_string()));
        assert!(hits.ids.contains(&"b2".to_string()));
    }

    #[test]
    fn test_match_on_full_id_and_labels() {
        let mut labelled = container("f00dfeed", "api", "api:latest");
        labelled
            .labels
            .insert("com.docker.compose.project".to_string(), "storefront".to_string());
        let index = indexed(&[labelled, container("b2", "db", "postgres")]);

        assert_eq!(index.search("f00dfeed").unwrap().ids, vec!["f00dfeed".to_string()]);
        assert_eq!(index.search("storefront").unwrap().ids, vec!["f00dfeed".to_string()]);
    }

    #[test]
    fn test_no_match() {
        let index = indexed(&[container("a1", "web", "nginx")]);
        let hits = index.search("mongodb").unwrap();
        assert_eq!(hits, SearchHits::default());
    }

    #[test]
    fn test_query_without_tokens_matches_nothing() {
        let index = indexed(&[container("a1", "web", "nginx")]);
        assert_eq!(index.search("  :: / ").unwrap().total, 0);
    }

    #[test]
    fn test_empty_index_yields_no_hits() {
        let index = ContainerIndex::open_in_ram().unwrap();
        assert_eq!(index.search("nginx").unwrap().total, 0);
        assert_eq!(index.doc_count(), 0);
    }

    #[test]
    fn test_uncommitted_documents_are_invisible() {
        let index = ContainerIndex::open_in_ram().unwrap();
        index.insert(&container("a1", "web", "nginx")).unwrap();
        assert_eq!(index.search("nginx").unwrap().total, 0);

        index.commit().unwrap();
        assert_eq!(index.search("nginx").unwrap().total, 1);
    }

    #[test]
    fn test_insert_overwrites_same_id() {
        let index = indexed(&[container("a1", "web", "nginx")]);

        let mut updated = container("a1", "web", "caddy");
        updated.state = "exited".to_string();
        assert_eq!(index.insert_all(&[updated.clone()]).unwrap(), 1);

        assert_eq!(index.search("nginx").unwrap().total, 0);
        assert_eq!(index.search("caddy").unwrap().ids, vec!["a1".to_string()]);
        assert_eq!(index.get("a1").unwrap(), Some(updated));
    }

    #[test]
    fn test_get_returns_stored_record() {
        let record = container("a1", "web", "nginx");
        let index = indexed(&[record.clone()]);
        assert_eq!(index.get("a1").unwrap(), Some(record));
        assert_eq!(index.get("missing").unwrap(), None);
    }

    #[test]
    fn test_total_exceeds_hit_limit() {
        let records: Vec<_> = (0..12)
            .map(|i| container(&format!("id{i:02}"), &format!("web-{i}"), "nginx"))
            .collect();
        let index = indexed(&records);

        let hits = index.search("nginx").unwrap();
        assert_eq!(hits.total, 12);
        assert_eq!(hits.ids.len(), DEFAULT_HIT_LIMIT);
    }

    #[test]
    fn test_custom_hit_limit() {
        let index = ContainerIndex::open_in_ram().unwrap().with_hit_limit(2);
        let records: Vec<_> = (0..5)
            .map(|i| container(&format!("id{i}"), "web", "nginx"))
            .collect();
        index.insert_all(&records).unwrap();

        let hits = index.search("web").unwrap();
        assert_eq!(hits.total, 5);
        assert_eq!(hits.ids.len(), 2);
    }

    #[test]
    fn test_reopen_on_disk_keeps_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_DIR_NAME);

        {
            let index = ContainerIndex::open(&path).unwrap();
            index.insert_all(&[container("a1", "web", "nginx")]).unwrap();
        }

        let reopened = ContainerIndex::open(&path).unwrap();
        assert_eq!(reopened.doc_count(), 1);
        assert_eq!(reopened.search("web").unwrap().ids, vec!["a1".to_string()]);
    }

    #[test]
    fn test_insert_failure_aborts_and_commits_prefix() {
        let index = ContainerIndex::open_in_ram().unwrap();
        let records = vec![
            container("a1", "web", "nginx"),
            container("b2", "db", "postgres"),
            container("c3", "cache", "redis"),
            container("d4", "queue", "rabbitmq"),
        ];

        let mut attempted = Vec::new();
        let err = index
            .insert_all_with(&records, |record| {
                attempted.push(record.id.clone());
                if record.id == "c3" {
                    return Err(ConsoleError::Index("document rejected".to_string()));
                }
                index.insert(record)
            })
            .unwrap_err();

        assert!(matches!(err, ConsoleError::Index(ref msg) if msg == "document rejected"));
        assert_eq!(attempted, vec!["a1", "b2", "c3"]);
        assert_eq!(index.doc_count(), 2);
        assert_eq!(index.search("postgres").unwrap().ids, vec!["b2".to_string()]);
        assert_eq!(index.search("redis").unwrap().total, 0);
        assert_eq!(index.search("rabbitmq").unwrap().total, 0);
    }

    #[test]
    fn test_insert_failure_on_first_record_leaves_index_empty() {
        let index = ContainerIndex::open_in_ram().unwrap();
        let err = index
            .insert_all_with(&[container("a1", "web", "nginx")], |_| {
                Err(ConsoleError::Index("document rejected".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, ConsoleError::Index(_)));
        assert_eq!(index.doc_count(), 0);
    }

    #[test]
    fn test_open_on_regular_file_is_io_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = ContainerIndex::open(file.path()).err().unwrap();
        assert!(matches!(err, ConsoleError::Io(_)), "unexpected error {err:?}");
    }

    #[test]
    fn test_name_is_containers() {
        assert_eq!(ContainerIndex::open_in_ram().unwrap().name(), "containers");
    }
}
