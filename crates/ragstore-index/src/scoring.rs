//! Pluggable lexical scoring.
//!
//! The index only needs "given the corpus, rank positions for a query".
//! [`Scorer`] builds a [`ScoringIndex`] over a snapshot of the documents; the
//! index rebuilds it whenever the corpus changes shape.
//!
//! The default [`TantivyScorer`] loads each snapshot into an in-RAM Tantivy
//! index and ranks with Tantivy's BM25.

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, TEXT};
use tantivy::{doc, Index, IndexReader, ReloadPolicy, TantivyDocument};
use tracing::debug;

use crate::error::IndexError;

/// Tantivy refuses writer arenas below 15MB per thread.
const MIN_WRITER_MEMORY_BYTES: usize = 15_000_000;

/// Default memory budget for the snapshot writer (20MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 20;

/// Builds a scoring structure over a corpus.
pub trait Scorer: Send + Sync {
    fn build(&self, documents: &[String]) -> Result<Box<dyn ScoringIndex>, IndexError>;
}

/// A ranked view over one corpus snapshot.
pub trait ScoringIndex: Send + Sync {
    /// Up to `n` `(position, score)` pairs, best first.
    fn top_n(&self, query: &str, n: usize) -> Result<Vec<(usize, f32)>, IndexError>;

    /// Number of documents the structure was built over.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Field handles for the snapshot schema
#[derive(Debug, Clone)]
pub struct ScoringSchema {
    schema: Schema,
    /// Searchable document text (TEXT)
    pub text: Field,
    /// Position of the document in the corpus arrays (STORED)
    pub position: Field,
}

impl ScoringSchema {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Build the snapshot schema.
///
/// - text: TEXT - tokenized, lowercased, BM25-scored
/// - position: u64 STORED - maps a hit back to the corpus arrays
pub fn build_scoring_schema() -> ScoringSchema {
    let mut schema_builder = Schema::builder();
    let text = schema_builder.add_text_field("text", TEXT);
    let position = schema_builder.add_u64_field("position", STORED);
    let schema = schema_builder.build();

    ScoringSchema {
        schema,
        text,
        position,
    }
}

/// BM25 ranking backed by an in-RAM Tantivy index.
#[derive(Debug, Clone, Copy)]
pub struct TantivyScorer {
    /// Memory budget for the writer in MB
    pub writer_memory_mb: usize,
}

impl Default for TantivyScorer {
    fn default() -> Self {
        Self {
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }
}

impl TantivyScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }

    fn memory_budget(&self) -> usize {
        self.writer_memory_mb
            .saturating_mul(1024 * 1024)
            .max(MIN_WRITER_MEMORY_BYTES)
    }
}

impl Scorer for TantivyScorer {
    fn build(&self, documents: &[String]) -> Result<Box<dyn ScoringIndex>, IndexError> {
        let schema = build_scoring_schema();
        let index = Index::create_in_ram(schema.schema().clone());

        // One thread keeps the snapshot in a single segment.
        let mut writer: tantivy::IndexWriter<TantivyDocument> =
            index.writer_with_num_threads(1, self.memory_budget())?;
        for (position, text) in documents.iter().enumerate() {
            writer.add_document(doc!(
                schema.text => text.as_str(),
                schema.position => position as u64
            ))?;
        }
        writer.commit()?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let query_parser = QueryParser::for_index(&index, vec![schema.text]);

        debug!(documents = documents.len(), "Built scoring snapshot");

        Ok(Box::new(TantivySnapshot {
            reader,
            schema,
            query_parser,
            len: documents.len(),
        }))
    }
}

struct TantivySnapshot {
    reader: IndexReader,
    schema: ScoringSchema,
    query_parser: QueryParser,
    len: usize,
}

impl ScoringIndex for TantivySnapshot {
    fn top_n(&self, query: &str, n: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        let limit = n.min(self.len);
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Free text may contain query syntax; lenient parsing never fails.
        let (parsed, _errors) = self.query_parser.parse_query_lenient(query);

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

        let mut ranked = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let Some(position) = doc
                .get_first(self.schema.position)
                .and_then(|v| v.as_u64())
            else {
                continue;
            };
            if score > 0.0 {
                ranked.push((position as usize, score));
            }
        }
        Ok(ranked)
    }

    fn len(&self) -> usize {
        self.len
    }
}
