//! Incrementally updatable text index.
//!
//! The corpus is three parallel arrays (documents, ids, metadata) plus a
//! scoring structure built over them. Removal only tombstones an id; search
//! filters tombstones out. Once enough of the corpus is tombstoned,
//! compaction filters the arrays and rebuilds scoring in one swap.
//!
//! ## Concurrency
//!
//! State sits behind one `RwLock`: searches share it, mutations exclude.
//! The corpus itself is an `Arc` so compaction can filter a snapshot without
//! holding the lock, then commit with a short write section. At most one
//! compaction runs at a time ([`CompactionGuard`]).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ragstore_types::IndexSettings;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, IndexCheckpoint, Metadata};
use crate::error::IndexError;
use crate::guard::CompactionGuard;
use crate::scoring::{Scorer, ScoringIndex, TantivyScorer};

/// Incremental index configuration
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Where checkpoints go; `None` disables checkpointing
    pub checkpoint_dir: Option<PathBuf>,
    /// Save a checkpoint after every structural mutation
    pub auto_checkpoint: bool,
    /// Fragmentation ratio at which removals trigger compaction
    pub compaction_threshold: f64,
    /// Checkpoint files kept on disk
    pub checkpoint_retention: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: None,
            auto_checkpoint: true,
            compaction_threshold: 0.2,
            checkpoint_retention: 3,
        }
    }
}

impl IndexConfig {
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn with_auto_checkpoint(mut self, enabled: bool) -> Self {
        self.auto_checkpoint = enabled;
        self
    }

    pub fn with_compaction_threshold(mut self, threshold: f64) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    pub fn with_checkpoint_retention(mut self, retention: usize) -> Self {
        self.checkpoint_retention = retention;
        self
    }
}

impl From<&IndexSettings> for IndexConfig {
    fn from(settings: &IndexSettings) -> Self {
        Self {
            checkpoint_dir: Some(settings.expanded_checkpoint_dir()),
            auto_checkpoint: settings.auto_checkpoint,
            compaction_threshold: settings.compaction_threshold,
            checkpoint_retention: settings.checkpoint_retention,
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// A live document as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedDocument {
    pub doc_id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// Index statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    /// Physical corpus size, tombstones included
    pub document_count: usize,
    pub live_count: usize,
    pub tombstone_count: usize,
    pub fragmentation_ratio: f64,
    pub version: u64,
    pub indexed: bool,
    pub compactions: u64,
    pub compaction_in_progress: bool,
    pub last_checkpoint_version: Option<u64>,
}

struct Corpus {
    documents: Vec<String>,
    doc_ids: Vec<String>,
    metadatas: Vec<Metadata>,
    positions: HashMap<String, usize>,
    scoring: Box<dyn ScoringIndex>,
}

impl Corpus {
    fn build(
        documents: Vec<String>,
        doc_ids: Vec<String>,
        metadatas: Vec<Metadata>,
        scorer: &dyn Scorer,
    ) -> Result<Self, IndexError> {
        let positions = doc_ids
            .iter()
            .enumerate()
            .map(|(position, id)| (id.clone(), position))
            .collect();
        let scoring = scorer.build(&documents)?;
        Ok(Self {
            documents,
            doc_ids,
            metadatas,
            positions,
            scoring,
        })
    }

    /// A new corpus without `removed`, with scoring rebuilt.
    fn without(&self, removed: &HashSet<String>, scorer: &dyn Scorer) -> Result<Self, IndexError> {
        let keep = self.len().saturating_sub(removed.len());
        let mut documents = Vec::with_capacity(keep);
        let mut doc_ids = Vec::with_capacity(keep);
        let mut metadatas = Vec::with_capacity(keep);

        for (position, id) in self.doc_ids.iter().enumerate() {
            if removed.contains(id) {
                continue;
            }
            documents.push(self.documents[position].clone());
            doc_ids.push(id.clone());
            metadatas.push(self.metadatas[position].clone());
        }
        Self::build(documents, doc_ids, metadatas, scorer)
    }

    fn len(&self) -> usize {
        self.doc_ids.len()
    }
}

#[derive(Default)]
struct IndexState {
    corpus: Option<Arc<Corpus>>,
    deleted_ids: HashSet<String>,
    version: u64,
    compactions: u64,
    last_checkpoint_version: Option<u64>,
}

impl IndexState {
    fn physical_len(&self) -> usize {
        self.corpus.as_ref().map_or(0, |c| c.len())
    }

    fn fragmentation_ratio(&self) -> f64 {
        let physical = self.physical_len();
        if physical == 0 || self.deleted_ids.is_empty() {
            0.0
        } else {
            self.deleted_ids.len() as f64 / physical as f64
        }
    }
}

fn validate_batch(
    documents: &[String],
    doc_ids: &[String],
    metadatas: Option<Vec<Metadata>>,
) -> Result<Vec<Metadata>, IndexError> {
    let metadata_len = metadatas.as_ref().map_or(documents.len(), Vec::len);
    if documents.len() != doc_ids.len() || metadata_len != documents.len() {
        return Err(IndexError::LengthMismatch {
            documents: documents.len(),
            ids: doc_ids.len(),
            metadatas: metadata_len,
        });
    }

    let mut seen = HashSet::with_capacity(doc_ids.len());
    for id in doc_ids {
        if !seen.insert(id.as_str()) {
            return Err(IndexError::DuplicateId(id.clone()));
        }
    }

    Ok(metadatas.unwrap_or_else(|| vec![Metadata::new(); documents.len()]))
}

/// Text index supporting append, tombstone removal, compaction and
/// checkpoint recovery.
pub struct IncrementalIndex {
    state: RwLock<IndexState>,
    scorer: Arc<dyn Scorer>,
    compaction: CompactionGuard,
    store: Option<CheckpointStore>,
    /// Serializes checkpoint writes; two writers of one version would share
    /// a temp file.
    checkpoint_lock: Mutex<()>,
    config: IndexConfig,
}

impl IncrementalIndex {
    /// Create an empty index ranked by Tantivy's BM25.
    pub fn new(config: IndexConfig) -> Self {
        Self::with_scorer(config, Arc::new(TantivyScorer::default()))
    }

    pub fn with_scorer(config: IndexConfig, scorer: Arc<dyn Scorer>) -> Self {
        let store = config
            .checkpoint_dir
            .as_ref()
            .map(|dir| CheckpointStore::new(dir.clone(), config.checkpoint_retention));
        Self {
            state: RwLock::new(IndexState::default()),
            scorer,
            compaction: CompactionGuard::new(),
            store,
            checkpoint_lock: Mutex::new(()),
            config,
        }
    }

    pub fn from_settings(settings: &IndexSettings) -> Self {
        Self::new(IndexConfig::from(settings))
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn checkpoint_store(&self) -> Option<&CheckpointStore> {
        self.store.as_ref()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().expect("index lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().expect("index lock poisoned")
    }

    /// Replace the whole corpus.
    ///
    /// `metadatas = None` gives every document an empty map.
    pub fn index_documents(
        &self,
        documents: Vec<String>,
        doc_ids: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
    ) -> Result<(), IndexError> {
        let metadatas = validate_batch(&documents, &doc_ids, metadatas)?;
        let count = documents.len();
        let corpus = Corpus::build(documents, doc_ids, metadatas, self.scorer.as_ref())?;

        let version = {
            let mut state = self.write();
            state.corpus = Some(Arc::new(corpus));
            state.deleted_ids.clear();
            state.version += 1;
            state.version
        };

        info!(documents = count, version, "Indexed documents");
        self.auto_checkpoint();
        Ok(())
    }

    /// Append documents and rebuild scoring over the full corpus.
    ///
    /// An id that is live fails the whole batch; an id that is only
    /// tombstoned is replaced by the new document.
    pub fn add_documents(
        &self,
        documents: Vec<String>,
        doc_ids: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
    ) -> Result<(), IndexError> {
        let metadatas = validate_batch(&documents, &doc_ids, metadatas)?;
        let added = documents.len();

        let (version, replaced) = {
            let mut guard = self.write();
            let state = &mut *guard;

            let (mut all_docs, mut all_ids, mut all_metas, replaced) = match &state.corpus {
                None => (Vec::new(), Vec::new(), Vec::new(), HashSet::new()),
                Some(current) => {
                    let mut replaced = HashSet::new();
                    for id in &doc_ids {
                        if !current.positions.contains_key(id) {
                            continue;
                        }
                        if !state.deleted_ids.contains(id) {
                            return Err(IndexError::DuplicateId(id.clone()));
                        }
                        replaced.insert(id.clone());
                    }

                    let capacity = current.len() - replaced.len() + added;
                    let mut docs = Vec::with_capacity(capacity);
                    let mut ids = Vec::with_capacity(capacity);
                    let mut metas = Vec::with_capacity(capacity);
                    for (position, id) in current.doc_ids.iter().enumerate() {
                        if replaced.contains(id) {
                            continue;
                        }
                        docs.push(current.documents[position].clone());
                        ids.push(id.clone());
                        metas.push(current.metadatas[position].clone());
                    }
                    (docs, ids, metas, replaced)
                }
            };

            all_docs.extend(documents);
            all_ids.extend(doc_ids);
            all_metas.extend(metadatas);
            let corpus = Corpus::build(all_docs, all_ids, all_metas, self.scorer.as_ref())?;

            state.corpus = Some(Arc::new(corpus));
            for id in &replaced {
                state.deleted_ids.remove(id);
            }
            state.version += 1;
            (state.version, replaced.len())
        };

        info!(added, replaced, version, "Added documents");
        self.auto_checkpoint();
        Ok(())
    }

    /// Tombstone the given ids. Unknown ids are ignored.
    ///
    /// Returns how many ids were newly tombstoned. May trigger compaction.
    pub fn remove_documents<S: AsRef<str>>(&self, doc_ids: &[S]) -> usize {
        let (removed, ratio) = {
            let mut guard = self.write();
            let state = &mut *guard;
            let Some(corpus) = &state.corpus else {
                return 0;
            };

            let mut removed = 0;
            for id in doc_ids {
                let id = id.as_ref();
                if corpus.positions.contains_key(id) && state.deleted_ids.insert(id.to_string()) {
                    removed += 1;
                }
            }
            (removed, state.fragmentation_ratio())
        };

        if removed > 0 {
            debug!(removed, fragmentation = ratio, "Tombstoned documents");
            self.compact_if_needed(false);
        }
        removed
    }

    /// Tombstones over physical corpus size; 0 when nothing is tombstoned.
    pub fn fragmentation_ratio(&self) -> f64 {
        self.read().fragmentation_ratio()
    }

    /// Compact when forced or when fragmentation reached the threshold.
    ///
    /// Returns `false` without waiting if another compaction is running.
    pub fn compact_if_needed(&self, force: bool) -> bool {
        let Some(_run) = self.compaction.try_acquire() else {
            debug!("Compaction already in progress; skipping");
            return false;
        };

        if !force {
            let ratio = self.fragmentation_ratio();
            if ratio < self.config.compaction_threshold {
                return false;
            }
        }
        self.run_compaction()
    }

    /// Physically drop tombstoned documents and rebuild scoring.
    pub fn compact(&self) -> bool {
        let Some(_run) = self.compaction.try_acquire() else {
            debug!("Compaction already in progress; skipping");
            return false;
        };
        self.run_compaction()
    }

    // Caller holds the compaction guard.
    fn run_compaction(&self) -> bool {
        let (snapshot, tombstones) = {
            let state = self.read();
            let Some(corpus) = &state.corpus else {
                return false;
            };
            (corpus.clone(), state.deleted_ids.clone())
        };

        let compacted = match snapshot.without(&tombstones, self.scorer.as_ref()) {
            Ok(compacted) => compacted,
            Err(e) => {
                warn!(error = %e, "Compaction failed; keeping tombstones");
                return false;
            }
        };

        let (version, removed, carried) = {
            let mut guard = self.write();
            let state = &mut *guard;
            let Some(current) = state.corpus.clone() else {
                debug!("Index cleared during compaction; discarding result");
                return false;
            };

            // The snapshot Arc is still held, so pointer equality means no
            // corpus replacement landed during the build.
            let (compacted, applied) = if Arc::ptr_eq(&current, &snapshot) {
                (compacted, tombstones)
            } else {
                let applied = state.deleted_ids.clone();
                match current.without(&applied, self.scorer.as_ref()) {
                    Ok(compacted) => (compacted, applied),
                    Err(e) => {
                        warn!(error = %e, "Compaction failed; keeping tombstones");
                        return false;
                    }
                }
            };

            let removed = current.len().saturating_sub(compacted.len());
            state.corpus = Some(Arc::new(compacted));
            state.deleted_ids.retain(|id| !applied.contains(id));
            state.version += 1;
            state.compactions += 1;
            (state.version, removed, state.deleted_ids.len())
        };

        info!(removed, carried, version, "Compacted index");
        self.auto_checkpoint();
        true
    }

    /// Top `top_k` live documents for `query`, best first.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let state = self.read();
        let corpus = state.corpus.as_ref().ok_or(IndexError::NotIndexed)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let candidates = corpus
            .scoring
            .top_n(query, top_k.saturating_add(state.deleted_ids.len()))?;
        let hits = candidates
            .into_iter()
            .filter_map(|(position, score)| {
                let doc_id = corpus.doc_ids.get(position)?;
                if state.deleted_ids.contains(doc_id) {
                    return None;
                }
                Some(SearchHit {
                    doc_id: doc_id.clone(),
                    text: corpus.documents[position].clone(),
                    score,
                    metadata: corpus.metadatas[position].clone(),
                })
            })
            .take(top_k)
            .collect();
        Ok(hits)
    }

    /// Snapshot of the current state, or `None` before indexing.
    pub fn checkpoint(&self) -> Option<IndexCheckpoint> {
        let state = self.read();
        let corpus = state.corpus.as_ref()?;
        Some(IndexCheckpoint::new(
            state.version,
            corpus.documents.clone(),
            corpus.doc_ids.clone(),
            corpus.metadatas.clone(),
            state.deleted_ids.iter().cloned().collect(),
        ))
    }

    /// Write a checkpoint of the current state.
    pub fn save_checkpoint(&self) -> bool {
        let Some(store) = &self.store else {
            debug!("No checkpoint directory configured; skipping save");
            return false;
        };
        let _writing = self.checkpoint_lock.lock().expect("checkpoint mutex poisoned");
        let Some(checkpoint) = self.checkpoint() else {
            debug!("Nothing indexed; skipping checkpoint");
            return false;
        };

        match store.save(&checkpoint) {
            Ok(path) => {
                self.write().last_checkpoint_version = Some(checkpoint.version);
                info!(
                    version = checkpoint.version,
                    path = %path.display(),
                    "Saved index checkpoint"
                );
                true
            }
            Err(e) => {
                warn!(version = checkpoint.version, error = %e, "Failed to save index checkpoint");
                false
            }
        }
    }

    /// Replace in-memory state with a checkpoint: `version`, or the newest.
    pub fn load_checkpoint(&self, version: Option<u64>) -> bool {
        let Some(store) = &self.store else {
            debug!("No checkpoint directory configured; skipping load");
            return false;
        };

        let checkpoint = match store.load(version) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                info!(?version, "No index checkpoint to load");
                return false;
            }
            Err(e) => {
                warn!(?version, error = %e, "Failed to load index checkpoint");
                return false;
            }
        };

        let loaded = checkpoint.version;
        let documents = checkpoint.documents.len();
        let corpus = match Corpus::build(
            checkpoint.documents,
            checkpoint.doc_ids,
            checkpoint.metadatas,
            self.scorer.as_ref(),
        ) {
            Ok(corpus) => corpus,
            Err(e) => {
                warn!(version = loaded, error = %e, "Failed to rebuild checkpointed corpus");
                return false;
            }
        };

        // Newer checkpoints may exist when an older one is loaded. Numbering
        // continues past them so the next mutation never reuses a file name.
        let newest_on_disk = match store.list() {
            Ok(checkpoints) => checkpoints.iter().map(|c| c.version).max(),
            Err(e) => {
                warn!(error = %e, "Failed to list index checkpoints");
                None
            }
        };

        let version = {
            let mut state = self.write();
            state.corpus = Some(Arc::new(corpus));
            state.deleted_ids = checkpoint.deleted_ids.into_iter().collect();
            state.version = loaded.max(newest_on_disk.unwrap_or(0)).max(state.version);
            state.last_checkpoint_version = Some(loaded);
            state.version
        };

        info!(loaded, version, documents, "Loaded index checkpoint");
        true
    }

    /// Drop tombstoned documents and rebuild scoring unconditionally.
    pub fn rebuild_index(&self) -> Result<(), IndexError> {
        let (version, dropped) = {
            let mut guard = self.write();
            let state = &mut *guard;
            let current = state.corpus.clone().ok_or(IndexError::NotIndexed)?;

            let dropped = std::mem::take(&mut state.deleted_ids);
            let rebuilt = match current.without(&dropped, self.scorer.as_ref()) {
                Ok(rebuilt) => rebuilt,
                Err(e) => {
                    state.deleted_ids = dropped;
                    return Err(e);
                }
            };
            state.corpus = Some(Arc::new(rebuilt));
            state.version += 1;
            if !dropped.is_empty() {
                state.compactions += 1;
            }
            (state.version, dropped.len())
        };

        info!(version, dropped, "Rebuilt index");
        self.auto_checkpoint();
        Ok(())
    }

    /// Back to the empty state. The version counter keeps counting so later
    /// checkpoints never collide with earlier ones.
    pub fn clear(&self) {
        let mut state = self.write();
        state.corpus = None;
        state.deleted_ids.clear();
        info!(version = state.version, "Cleared index");
    }

    pub fn is_indexed(&self) -> bool {
        self.read().corpus.is_some()
    }

    pub fn version(&self) -> u64 {
        self.read().version
    }

    /// Live (non-tombstoned) document count.
    pub fn len(&self) -> usize {
        let state = self.read();
        state.physical_len() - state.deleted_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `doc_id` is live.
    pub fn contains(&self, doc_id: &str) -> bool {
        let state = self.read();
        state
            .corpus
            .as_ref()
            .is_some_and(|c| c.positions.contains_key(doc_id))
            && !state.deleted_ids.contains(doc_id)
    }

    pub fn get_document(&self, doc_id: &str) -> Option<IndexedDocument> {
        let state = self.read();
        if state.deleted_ids.contains(doc_id) {
            return None;
        }
        let corpus = state.corpus.as_ref()?;
        let position = *corpus.positions.get(doc_id)?;
        Some(IndexedDocument {
            doc_id: corpus.doc_ids[position].clone(),
            text: corpus.documents[position].clone(),
            metadata: corpus.metadatas[position].clone(),
        })
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.read();
        let document_count = state.physical_len();
        IndexStats {
            document_count,
            live_count: document_count - state.deleted_ids.len(),
            tombstone_count: state.deleted_ids.len(),
            fragmentation_ratio: state.fragmentation_ratio(),
            version: state.version,
            indexed: state.corpus.is_some(),
            compactions: state.compactions,
            compaction_in_progress: self.compaction.is_running(),
            last_checkpoint_version: state.last_checkpoint_version,
        }
    }

    fn auto_checkpoint(&self) {
        if self.config.auto_checkpoint && self.store.is_some() {
            self.save_checkpoint();
        }
    }
}
