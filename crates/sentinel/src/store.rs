//! The trace store (C5): a content-addressed, date-partitioned directory
//! of immutable JSON trace files, plus a golden/blessed index computed
//! on demand from that same ground truth.
//!
//! Grounded in the file-backend idiom from the teacher's streaming
//! backend: direct `File::open` + match on `ErrorKind::NotFound` instead
//! of a preceding `.exists()` check (avoids the TOCTOU race), and an
//! atomic write via a same-directory temp file plus `rename`.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::model::Trace;

/// SHA-256 of `text`, truncated to 16 hex characters. Used to compare
/// response content for blessing and for the regression checker (C10)
/// without storing full response bodies twice.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Content-addressed, date-partitioned trace store.
///
/// `<root>/traces/<YYYY-MM-DD>/<trace_id>.json` holds one trace each;
/// `<root>/graphs/<execution_id>.json` holds an explicit snapshot once
/// one has been taken for that execution.
pub struct Store {
    config: StoreConfig,
    /// Serialises the bless read-modify-write so two concurrent blesses
    /// for the same `(model, provider)` cannot both observe "no golden
    /// yet" (§5 shared resource policy).
    bless_lock: Mutex<()>,
}

impl Store {
    /// Open a store rooted at `config.root`. Does not create the
    /// directory eagerly; `save` creates date directories as needed.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            bless_lock: Mutex::new(()),
        }
    }

    fn traces_dir(&self) -> PathBuf {
        self.config.root.join("traces")
    }

    fn graphs_dir(&self) -> PathBuf {
        self.config.root.join("graphs")
    }

    fn date_dir(&self, date: NaiveDate) -> PathBuf {
        self.traces_dir().join(date.format("%Y-%m-%d").to_string())
    }

    fn trace_path(&self, trace: &Trace) -> PathBuf {
        self.date_dir(trace.timestamp.date_naive())
            .join(format!("{}.json", trace.trace_id))
    }

    /// `save(trace)` — idempotent by `(date-dir, trace_id)`; replaces the
    /// file's contents. Writes via a same-directory temp file plus
    /// rename so a reader never observes a partially written file.
    pub fn save(&self, trace: &Trace) -> Result<()> {
        let dir = self.date_dir(trace.timestamp.date_naive());
        fs::create_dir_all(&dir)?;
        let final_path = dir.join(format!("{}.json", trace.trace_id));
        let tmp_path = dir.join(format!("{}.json.tmp-{}", trace.trace_id, Uuid::new_v4()));

        let body = serde_json::to_string_pretty(trace)?;
        if let Err(e) = fs::write(&tmp_path, body) {
            tracing::error!(trace_id = %trace.trace_id, path = %tmp_path.display(), error = %e, "failed to write trace file");
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            tracing::error!(trace_id = %trace.trace_id, path = %final_path.display(), error = %e, "failed to rename trace file into place");
            return Err(e.into());
        }
        tracing::debug!(trace_id = %trace.trace_id, path = %final_path.display(), "trace persisted");
        Ok(())
    }

    fn read_trace_file(path: &Path) -> Option<Trace> {
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open trace file");
                return None;
            }
        };
        match serde_json::from_reader(file) {
            Ok(trace) => Some(trace),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unparseable trace file");
                None
            }
        }
    }

    /// `get(trace_id)` — scans date directories; returns the trace or
    /// `None` if it isn't found or can't be parsed.
    #[must_use]
    pub fn get(&self, trace_id: Uuid) -> Result<Option<Trace>> {
        let traces_dir = self.traces_dir();
        if !traces_dir.exists() {
            return Ok(None);
        }
        let file_name = format!("{trace_id}.json");
        for entry in WalkDir::new(&traces_dir).min_depth(2).max_depth(2) {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.file_name().to_string_lossy() == file_name {
                return Ok(Self::read_trace_file(entry.path()));
            }
        }
        Ok(None)
    }

    /// All traces currently on disk, in reverse-chronological order by
    /// `(date directory desc, file name desc)`, skipping unparseable
    /// files. This is the shared scan `list`/`list_blessed`/`lineage`
    /// build on top of (open question (a): filters apply post-load).
    fn read_all_traces_desc(&self) -> Vec<Trace> {
        let traces_dir = self.traces_dir();
        if !traces_dir.exists() {
            return Vec::new();
        }
        let mut date_dirs: Vec<PathBuf> = fs::read_dir(&traces_dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.path())
            .collect();
        date_dirs.sort_by(|a, b| b.cmp(a));

        let mut traces = Vec::new();
        for date_dir in date_dirs {
            let mut files: Vec<PathBuf> = fs::read_dir(&date_dir)
                .into_iter()
                .flatten()
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
                .collect();
            files.sort_by(|a, b| b.cmp(a));
            for file in files {
                if let Some(trace) = Self::read_trace_file(&file) {
                    traces.push(trace);
                }
            }
        }
        traces
    }

    /// `list(limit, offset, model?, provider?, date?)` — reverse
    /// chronological, filters applied after every matching file has
    /// been loaded (open question (a): preserved, not optimised away).
    #[must_use]
    pub fn list(
        &self,
        limit: usize,
        offset: usize,
        model: Option<&str>,
        provider: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Trace>> {
        let filtered: Vec<Trace> = self
            .read_all_traces_desc()
            .into_iter()
            .filter(|t| model.map_or(true, |m| t.request.model == m))
            .filter(|t| provider.map_or(true, |p| t.request.provider == p))
            .filter(|t| date.map_or(true, |d| t.timestamp.date_naive() == d))
            .collect();
        Ok(filtered.into_iter().skip(offset).take(limit).collect())
    }

    /// `delete(trace_id)` — removes the file if present; returns whether
    /// anything was removed.
    pub fn delete(&self, trace_id: Uuid) -> Result<bool> {
        let traces_dir = self.traces_dir();
        if !traces_dir.exists() {
            return Ok(false);
        }
        let file_name = format!("{trace_id}.json");
        for entry in WalkDir::new(&traces_dir).min_depth(2).max_depth(2) {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.file_name().to_string_lossy() == file_name {
                fs::remove_file(entry.path())?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// `bless(trace_id, force)` — idempotent; sets `blessed=true`,
    /// computes `metadata.output_hash`, stamps `metadata.blessed_at`.
    /// Enforces at-most-one blessed trace per `(model, provider)` unless
    /// `force` is set, in which case the previous golden for that pair
    /// is unblessed. The uniqueness check and the write happen under
    /// [`Store::bless_lock`] so two concurrent blessings of different
    /// traces for the same pair can't both observe "no golden yet".
    pub fn bless(&self, trace_id: Uuid, force: bool) -> Result<Trace> {
        let _guard = self.bless_lock.lock();

        let trace = self
            .get(trace_id)?
            .ok_or_else(|| Error::InputError(format!("unknown trace id: {trace_id}")))?;

        if let Some(existing) = self.get_golden(&trace.request.model, &trace.request.provider)? {
            if existing.trace_id != trace_id {
                if !force {
                    return Err(Error::StoreError(format!(
                        "trace {} is already blessed for (model={}, provider={}); pass force to override",
                        existing.trace_id, trace.request.model, trace.request.provider
                    )));
                }
                self.save(&existing.with_unbless())?;
            }
        }

        let output_hash = content_hash(&trace.response.text);
        let blessed = trace.with_bless(output_hash, Utc::now());
        self.save(&blessed)?;
        Ok(blessed)
    }

    /// `unbless(trace_id)` — clears the blessed flag and bless metadata.
    pub fn unbless(&self, trace_id: Uuid) -> Result<Trace> {
        let trace = self
            .get(trace_id)?
            .ok_or_else(|| Error::InputError(format!("unknown trace id: {trace_id}")))?;
        let unblessed = trace.with_unbless();
        self.save(&unblessed)?;
        Ok(unblessed)
    }

    /// `list_blessed()` — filters over the full scan.
    #[must_use]
    pub fn list_blessed(&self) -> Result<Vec<Trace>> {
        Ok(self
            .read_all_traces_desc()
            .into_iter()
            .filter(|t| t.blessed)
            .collect())
    }

    /// `get_golden(model, provider)` — first blessed match for the pair.
    #[must_use]
    pub fn get_golden(&self, model: &str, provider: &str) -> Result<Option<Trace>> {
        Ok(self
            .list_blessed()?
            .into_iter()
            .find(|t| t.request.model == model && t.request.provider == provider))
    }

    /// `traces_by_execution(execution_id)` — ascending by timestamp.
    #[must_use]
    pub fn traces_by_execution(&self, execution_id: &str) -> Result<Vec<Trace>> {
        let mut traces: Vec<Trace> = self
            .read_all_traces_desc()
            .into_iter()
            .filter(|t| t.execution_id == execution_id)
            .collect();
        traces.sort_by_key(|t| t.timestamp);
        Ok(traces)
    }

    /// `lineage(trace_id)` — traverse `replay_of` upward to a root
    /// (cycle-guarded), then BFS downward over traces whose `replay_of`
    /// matches any visited id. Returns the full connected lineage,
    /// ascending by timestamp.
    #[must_use]
    pub fn lineage(&self, trace_id: Uuid) -> Result<Vec<Trace>> {
        let all = self.read_all_traces_desc();
        let by_id: std::collections::HashMap<Uuid, &Trace> =
            all.iter().map(|t| (t.trace_id, t)).collect();

        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut cursor = Some(trace_id);
        while let Some(id) = cursor {
            if !visited.insert(id) {
                break; // cycle guard
            }
            cursor = by_id.get(&id).and_then(|t| t.replay_of);
        }

        // BFS downward: any trace whose replay_of is in `visited` joins it.
        loop {
            let mut grew = false;
            for trace in &all {
                if let Some(parent) = trace.replay_of {
                    if visited.contains(&parent) && visited.insert(trace.trace_id) {
                        grew = true;
                    }
                }
            }
            if !grew {
                break;
            }
        }

        let mut lineage: Vec<Trace> = all
            .into_iter()
            .filter(|t| visited.contains(&t.trace_id))
            .collect();
        lineage.sort_by_key(|t| t.timestamp);
        Ok(lineage)
    }

    /// Path a graph snapshot for `execution_id` would be written to.
    #[must_use]
    pub fn graph_snapshot_path(&self, execution_id: &str) -> PathBuf {
        self.graphs_dir().join(format!("{execution_id}.json"))
    }

    /// Persist pre-serialised snapshot JSON for `execution_id`. Only
    /// ever called explicitly (§4.4: graph files "only materialise when
    /// explicitly snapshotted").
    pub fn save_graph_snapshot(&self, execution_id: &str, json: &str) -> Result<()> {
        let dir = self.graphs_dir();
        fs::create_dir_all(&dir)?;
        let path = self.graph_snapshot_path(execution_id);
        let tmp_path = dir.join(format!("{execution_id}.json.tmp-{}", Uuid::new_v4()));
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, Parameters, Request, Response, Runtime};
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::new(StoreConfig::new(dir.path()));
        (dir, store)
    }

    fn trace_with(model: &str, provider: &str, text: &str) -> Trace {
        Trace {
            trace_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            execution_id: "exec".to_string(),
            node_id: Uuid::new_v4().to_string(),
            parent_node_id: None,
            request: Request {
                provider: provider.to_string(),
                model: model.to_string(),
                messages: vec![Message::user("hi")],
                parameters: Parameters::default(),
            },
            response: Response {
                text: text.to_string(),
                tokens: None,
                latency_ms: 10,
                usage: None,
            },
            runtime: Runtime::new(provider, None),
            replay_of: None,
            metadata: Default::default(),
            verdict: None,
            blessed: false,
        }
    }

    #[test]
    fn save_then_get_round_trips() {
        let (_dir, store) = store();
        let trace = trace_with("gpt-4o", "openai", "hello");
        store.save(&trace).expect("save");
        let loaded = store.get(trace.trace_id).expect("get").expect("present");
        assert_eq!(loaded, trace);
    }

    #[test]
    fn get_missing_returns_none() {
        let (_dir, store) = store();
        assert_eq!(store.get(Uuid::new_v4()).expect("get"), None);
    }

    #[test]
    fn save_is_idempotent_by_trace_id() {
        let (_dir, store) = store();
        let mut trace = trace_with("gpt-4o", "openai", "v1");
        store.save(&trace).expect("save v1");
        trace.response.text = "v2".to_string();
        store.save(&trace).expect("save v2");
        let loaded = store.get(trace.trace_id).expect("get").expect("present");
        assert_eq!(loaded.response.text, "v2");

        let all = store.list(100, 0, None, None, None).expect("list");
        assert_eq!(all.len(), 1, "overwritten, not duplicated");
    }

    #[test]
    fn list_filters_by_model_and_provider() {
        let (_dir, store) = store();
        store
            .save(&trace_with("gpt-4o", "openai", "a"))
            .expect("save");
        store
            .save(&trace_with("claude-3", "anthropic", "b"))
            .expect("save");

        let openai_only = store
            .list(100, 0, None, Some("openai"), None)
            .expect("list");
        assert_eq!(openai_only.len(), 1);
        assert_eq!(openai_only[0].request.provider, "openai");
    }

    #[test]
    fn list_respects_limit_and_offset() {
        let (_dir, store) = store();
        for i in 0..5 {
            store
                .save(&trace_with("gpt-4o", "openai", &format!("t{i}")))
                .expect("save");
        }
        let page = store.list(2, 1, None, None, None).expect("list");
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn delete_removes_trace() {
        let (_dir, store) = store();
        let trace = trace_with("gpt-4o", "openai", "hi");
        store.save(&trace).expect("save");
        assert!(store.delete(trace.trace_id).expect("delete"));
        assert_eq!(store.get(trace.trace_id).expect("get"), None);
        assert!(!store.delete(trace.trace_id).expect("delete again"));
    }

    #[test]
    fn bless_sets_hash_and_flag() {
        let (_dir, store) = store();
        let trace = trace_with("gpt-4o", "openai", "Paris.");
        store.save(&trace).expect("save");
        let blessed = store.bless(trace.trace_id, false).expect("bless");
        assert!(blessed.blessed);
        assert!(blessed.output_hash().is_some());
    }

    #[test]
    fn bless_is_idempotent() {
        let (_dir, store) = store();
        let trace = trace_with("gpt-4o", "openai", "Paris.");
        store.save(&trace).expect("save");
        let first = store.bless(trace.trace_id, false).expect("bless once");
        let second = store.bless(trace.trace_id, false).expect("bless twice");
        assert_eq!(first.output_hash(), second.output_hash());
    }

    #[test]
    fn bless_enforces_one_golden_per_model_provider_unless_forced() {
        let (_dir, store) = store();
        let a = trace_with("gpt-4o", "openai", "a");
        let b = trace_with("gpt-4o", "openai", "b");
        store.save(&a).expect("save a");
        store.save(&b).expect("save b");

        store.bless(a.trace_id, false).expect("bless a");
        let err = store.bless(b.trace_id, false).expect_err("conflict");
        assert!(matches!(err, Error::StoreError(_)));

        let forced = store.bless(b.trace_id, true).expect("force bless b");
        assert!(forced.blessed);
        let a_reloaded = store.get(a.trace_id).expect("get").expect("present");
        assert!(!a_reloaded.blessed, "previous golden unblessed by force");
    }

    #[test]
    fn get_golden_returns_the_blessed_trace() {
        let (_dir, store) = store();
        let trace = trace_with("gpt-4o", "openai", "golden");
        store.save(&trace).expect("save");
        store.bless(trace.trace_id, false).expect("bless");
        let golden = store
            .get_golden("gpt-4o", "openai")
            .expect("get_golden")
            .expect("present");
        assert_eq!(golden.trace_id, trace.trace_id);
    }

    #[test]
    fn traces_by_execution_sorted_ascending() {
        let (_dir, store) = store();
        let mut first = trace_with("gpt-4o", "openai", "first");
        first.execution_id = "exec-a".to_string();
        first.timestamp = Utc::now() - chrono::Duration::seconds(10);
        let mut second = trace_with("gpt-4o", "openai", "second");
        second.execution_id = "exec-a".to_string();
        store.save(&second).expect("save second");
        store.save(&first).expect("save first");

        let ordered = store.traces_by_execution("exec-a").expect("list");
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].response.text, "first");
        assert_eq!(ordered[1].response.text, "second");
    }

    #[test]
    fn lineage_follows_replay_chain_both_directions() {
        let (_dir, store) = store();
        let original = trace_with("gpt-4o", "openai", "Paris.");
        store.save(&original).expect("save original");

        let mut replay = trace_with("gpt-4o", "openai", "Paris");
        replay.replay_of = Some(original.trace_id);
        store.save(&replay).expect("save replay");

        let mut replay2 = trace_with("gpt-4o", "openai", "Paris!");
        replay2.replay_of = Some(replay.trace_id);
        store.save(&replay2).expect("save replay2");

        let lineage = store.lineage(replay.trace_id).expect("lineage");
        let ids: HashSet<Uuid> = lineage.iter().map(|t| t.trace_id).collect();
        assert!(ids.contains(&original.trace_id));
        assert!(ids.contains(&replay.trace_id));
        assert!(ids.contains(&replay2.trace_id));
    }

    #[test]
    fn unparseable_file_is_skipped_not_fatal() {
        let (dir, store) = store();
        let date_dir = dir.path().join("traces").join("2026-01-01");
        fs::create_dir_all(&date_dir).expect("mkdir");
        fs::write(date_dir.join("not-json.json"), b"{ not valid json").expect("write");

        let good = trace_with("gpt-4o", "openai", "fine");
        store.save(&good).expect("save");

        let all = store.list(100, 0, None, None, None).expect("list");
        assert_eq!(all.len(), 1);
    }
}
