//! Persistence seams: keystream counters, binary artifacts and metadata records.
//!
//! Each concern is a trait with an in-process implementation (tests, one-shot
//! runs) and a file-backed implementation rooted at a data directory. File
//! writes go through a temporary file in the target directory followed by an
//! atomic rename, so readers never observe a half-written document.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::records::{AuditRecord, RunRecord, SimulationRecord, TestReportRecord};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write `bytes` to `path` via a sibling temp file and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Unavailable(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::from(e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?)
}

// ---------------------------------------------------------------------------
// Counter store
// ---------------------------------------------------------------------------

/// Generator registration and keystream position for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub key_hex: String,
    pub nonce_hex: String,
    /// Number of 64-byte blocks consumed so far.
    pub counter: u64,
}

/// Keystream position per run. `atomic_increment` must be atomic per run id.
pub trait CounterStore: Send + Sync {
    /// Register `run_id` with counter 0, or return the existing state unchanged.
    fn get_or_create(
        &self,
        run_id: Uuid,
        key_hex: &str,
        nonce_hex: &str,
    ) -> Result<RunState, StoreError>;

    fn get(&self, run_id: Uuid) -> Result<Option<RunState>, StoreError>;

    /// Add `delta` to the counter and return the new value.
    fn atomic_increment(&self, run_id: Uuid, delta: u64) -> Result<u64, StoreError>;
}

/// Namespaced key: `"{environment}:{namespace}:{run_id}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterKeyspace {
    pub environment: String,
    pub namespace: String,
}

impl CounterKeyspace {
    pub fn new(environment: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            namespace: namespace.into(),
        }
    }

    pub fn key(&self, run_id: Uuid) -> String {
        format!("{}:{}:{}", self.environment, self.namespace, run_id)
    }
}

impl Default for CounterKeyspace {
    fn default() -> Self {
        Self::new("development", "rng_runs")
    }
}

fn new_state(run_id: Uuid, key_hex: &str, nonce_hex: &str) -> RunState {
    RunState {
        run_id,
        key_hex: key_hex.to_string(),
        nonce_hex: nonce_hex.to_string(),
        counter: 0,
    }
}

fn bump(state: &mut RunState, delta: u64) -> Result<u64, StoreError> {
    state.counter = state
        .counter
        .checked_add(delta)
        .ok_or_else(|| StoreError::Unavailable(format!("counter overflow for {}", state.run_id)))?;
    Ok(state.counter)
}

#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    keyspace: CounterKeyspace,
    entries: Mutex<HashMap<String, RunState>>,
}

impl MemoryCounterStore {
    pub fn new(keyspace: CounterKeyspace) -> Self {
        Self {
            keyspace,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl CounterStore for MemoryCounterStore {
    fn get_or_create(
        &self,
        run_id: Uuid,
        key_hex: &str,
        nonce_hex: &str,
    ) -> Result<RunState, StoreError> {
        let mut entries = lock(&self.entries);
        let state = entries
            .entry(self.keyspace.key(run_id))
            .or_insert_with(|| new_state(run_id, key_hex, nonce_hex));
        Ok(state.clone())
    }

    fn get(&self, run_id: Uuid) -> Result<Option<RunState>, StoreError> {
        Ok(lock(&self.entries).get(&self.keyspace.key(run_id)).cloned())
    }

    fn atomic_increment(&self, run_id: Uuid, delta: u64) -> Result<u64, StoreError> {
        let key = self.keyspace.key(run_id);
        let mut entries = lock(&self.entries);
        let state = entries.get_mut(&key).ok_or(StoreError::NotFound(key))?;
        bump(state, delta)
    }
}

/// Counters persisted as one JSON document per run under
/// `{root}/{environment}/{namespace}/{run_id}.json`.
///
/// Each read-modify-write holds an exclusive `flock` on the run's sibling
/// `.lock` file, so processes sharing `root` never lose registrations or
/// increments. Runs are independent files; registering one run never
/// rewrites another. On non-Unix targets only the in-process mutex applies.
#[derive(Debug)]
pub struct FileCounterStore {
    keyspace: CounterKeyspace,
    root: PathBuf,
    guard: Mutex<()>,
}

impl FileCounterStore {
    pub fn new(root: impl Into<PathBuf>, keyspace: CounterKeyspace) -> Self {
        Self {
            keyspace,
            root: root.into(),
            guard: Mutex::new(()),
        }
    }

    fn run_dir(&self) -> PathBuf {
        self.root
            .join(&self.keyspace.environment)
            .join(&self.keyspace.namespace)
    }

    fn state_path(&self, run_id: Uuid) -> PathBuf {
        self.run_dir().join(format!("{run_id}.json"))
    }

    fn lock_run(&self, run_id: Uuid) -> Result<RunLock, StoreError> {
        RunLock::acquire(&self.run_dir().join(format!("{run_id}.lock")))
    }
}

/// Exclusive advisory lock held until drop.
struct RunLock {
    _file: std::fs::File,
}

impl RunLock {
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: `flock` only touches the descriptor owned by `file`,
            // which stays open for the lifetime of the returned guard.
            let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if ret != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(Self { _file: file })
    }
}

impl CounterStore for FileCounterStore {
    fn get_or_create(
        &self,
        run_id: Uuid,
        key_hex: &str,
        nonce_hex: &str,
    ) -> Result<RunState, StoreError> {
        let _guard = lock(&self.guard);
        let _run = self.lock_run(run_id)?;
        let path = self.state_path(run_id);
        if let Some(state) = read_json::<RunState>(&path)? {
            return Ok(state);
        }
        let state = new_state(run_id, key_hex, nonce_hex);
        write_json(&path, &state)?;
        Ok(state)
    }

    fn get(&self, run_id: Uuid) -> Result<Option<RunState>, StoreError> {
        read_json(&self.state_path(run_id))
    }

    fn atomic_increment(&self, run_id: Uuid, delta: u64) -> Result<u64, StoreError> {
        let _guard = lock(&self.guard);
        let _run = self.lock_run(run_id)?;
        let path = self.state_path(run_id);
        let mut state = read_json::<RunState>(&path)?
            .ok_or_else(|| StoreError::NotFound(self.keyspace.key(run_id)))?;
        let counter = bump(&mut state, delta)?;
        write_json(&path, &state)?;
        Ok(counter)
    }
}

// ---------------------------------------------------------------------------
// Artifact store
// ---------------------------------------------------------------------------

/// Opaque binary objects addressed by relative `/`-separated paths.
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` at `path`, replacing any previous object; returns the path.
    fn put(&self, path: &str, bytes: &[u8]) -> Result<String, StoreError>;
    fn get(&self, path: &str) -> Result<Vec<u8>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.objects).remove(path)
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<String, StoreError> {
        lock(&self.objects).insert(path.to_string(), bytes.to_vec());
        Ok(path.to_string())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        lock(&self.objects)
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}

/// Artifacts stored as files below a root directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative artifact path, refusing anything that escapes the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(path);
        let normal = rel.components().all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !normal {
            return Err(StoreError::Unavailable(format!("invalid artifact path {path:?}")));
        }
        Ok(self.root.join(rel))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<String, StoreError> {
        write_atomic(&self.resolve(path)?, bytes)?;
        Ok(path.to_string())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        match std::fs::read(self.resolve(path)?) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

pub trait RecordStore: Send + Sync {
    fn add_simulation(&self, record: SimulationRecord) -> Result<(), StoreError>;
    fn get_simulation(&self, id: Uuid) -> Result<Option<SimulationRecord>, StoreError>;

    fn add_run(&self, record: RunRecord) -> Result<(), StoreError>;
    fn get_run(&self, id: Uuid) -> Result<Option<RunRecord>, StoreError>;

    fn add_audit(&self, record: AuditRecord) -> Result<(), StoreError>;
    fn get_audit(&self, id: Uuid) -> Result<Option<AuditRecord>, StoreError>;

    /// Drop every stored report for `run_id` and store `reports` in their place.
    fn replace_test_reports(
        &self,
        run_id: Uuid,
        reports: Vec<TestReportRecord>,
    ) -> Result<(), StoreError>;
    fn test_reports(&self, run_id: Uuid) -> Result<Vec<TestReportRecord>, StoreError>;
}

#[derive(Debug, Default)]
struct RecordTables {
    simulations: HashMap<Uuid, SimulationRecord>,
    runs: HashMap<Uuid, RunRecord>,
    audits: HashMap<Uuid, AuditRecord>,
    reports: HashMap<Uuid, Vec<TestReportRecord>>,
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: Mutex<RecordTables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn add_simulation(&self, record: SimulationRecord) -> Result<(), StoreError> {
        lock(&self.tables)
            .simulations
            .insert(record.simulation_id, record);
        Ok(())
    }

    fn get_simulation(&self, id: Uuid) -> Result<Option<SimulationRecord>, StoreError> {
        Ok(lock(&self.tables).simulations.get(&id).cloned())
    }

    fn add_run(&self, record: RunRecord) -> Result<(), StoreError> {
        lock(&self.tables).runs.insert(record.run_id, record);
        Ok(())
    }

    fn get_run(&self, id: Uuid) -> Result<Option<RunRecord>, StoreError> {
        Ok(lock(&self.tables).runs.get(&id).cloned())
    }

    fn add_audit(&self, record: AuditRecord) -> Result<(), StoreError> {
        lock(&self.tables).audits.insert(record.audit_id, record);
        Ok(())
    }

    fn get_audit(&self, id: Uuid) -> Result<Option<AuditRecord>, StoreError> {
        Ok(lock(&self.tables).audits.get(&id).cloned())
    }

    fn replace_test_reports(
        &self,
        run_id: Uuid,
        reports: Vec<TestReportRecord>,
    ) -> Result<(), StoreError> {
        lock(&self.tables).reports.insert(run_id, reports);
        Ok(())
    }

    fn test_reports(&self, run_id: Uuid) -> Result<Vec<TestReportRecord>, StoreError> {
        Ok(lock(&self.tables)
            .reports
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// One JSON file per record under `{root}/records/{kind}/{id}.json`.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, kind: &str, id: Uuid) -> PathBuf {
        self.root
            .join("records")
            .join(kind)
            .join(format!("{id}.json"))
    }
}

impl RecordStore for FsRecordStore {
    fn add_simulation(&self, record: SimulationRecord) -> Result<(), StoreError> {
        write_json(&self.path("simulations", record.simulation_id), &record)
    }

    fn get_simulation(&self, id: Uuid) -> Result<Option<SimulationRecord>, StoreError> {
        read_json(&self.path("simulations", id))
    }

    fn add_run(&self, record: RunRecord) -> Result<(), StoreError> {
        write_json(&self.path("runs", record.run_id), &record)
    }

    fn get_run(&self, id: Uuid) -> Result<Option<RunRecord>, StoreError> {
        read_json(&self.path("runs", id))
    }

    fn add_audit(&self, record: AuditRecord) -> Result<(), StoreError> {
        write_json(&self.path("audits", record.audit_id), &record)
    }

    fn get_audit(&self, id: Uuid) -> Result<Option<AuditRecord>, StoreError> {
        read_json(&self.path("audits", id))
    }

    fn replace_test_reports(
        &self,
        run_id: Uuid,
        reports: Vec<TestReportRecord>,
    ) -> Result<(), StoreError> {
        write_json(&self.path("test_reports", run_id), &reports)
    }

    fn test_reports(&self, run_id: Uuid) -> Result<Vec<TestReportRecord>, StoreError> {
        Ok(read_json(&self.path("test_reports", run_id))?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::records::ReportStatus;

    #[test]
    fn test_keyspace_format() {
        let id = Uuid::nil();
        let ks = CounterKeyspace::new("prod", "rng_runs");
        assert_eq!(
            ks.key(id),
            "prod:rng_runs:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_memory_counter_lifecycle() {
        let store = MemoryCounterStore::default();
        let id = Uuid::new_v4();
        assert!(store.get(id).unwrap().is_none());
        assert!(matches!(
            store.atomic_increment(id, 1),
            Err(StoreError::NotFound(_))
        ));

        let state = store.get_or_create(id, "aa", "bb").unwrap();
        assert_eq!(state.counter, 0);
        assert_eq!(store.atomic_increment(id, 2).unwrap(), 2);
        assert_eq!(store.atomic_increment(id, 3).unwrap(), 5);

        // Re-registration keeps the existing position.
        let again = store.get_or_create(id, "cc", "dd").unwrap();
        assert_eq!(again.counter, 5);
        assert_eq!(again.key_hex, "aa");
    }

    #[test]
    fn test_memory_counter_concurrent_increments() {
        let store = Arc::new(MemoryCounterStore::default());
        let id = Uuid::new_v4();
        store.get_or_create(id, "k", "n").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.atomic_increment(id, 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get(id).unwrap().unwrap().counter, 800);
    }

    #[test]
    fn test_keyspaces_are_isolated() {
        let id = Uuid::new_v4();
        let dir = tempfile::tempdir().unwrap();
        let dev = FileCounterStore::new(dir.path(), CounterKeyspace::new("dev", "rng_runs"));
        let prod = FileCounterStore::new(dir.path(), CounterKeyspace::new("prod", "rng_runs"));
        dev.get_or_create(id, "k", "n").unwrap();
        dev.atomic_increment(id, 4).unwrap();
        assert!(prod.get(id).unwrap().is_none());
        assert!(matches!(
            prod.atomic_increment(id, 1),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_file_counter_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("counters");
        let id = Uuid::new_v4();
        {
            let store = FileCounterStore::new(&root, CounterKeyspace::default());
            store.get_or_create(id, "key", "nonce").unwrap();
            assert_eq!(store.atomic_increment(id, 7).unwrap(), 7);
        }
        let reopened = FileCounterStore::new(&root, CounterKeyspace::default());
        let state = reopened.get(id).unwrap().unwrap();
        assert_eq!(state.counter, 7);
        assert_eq!(state.nonce_hex, "nonce");
        assert!(
            root.join("development")
                .join("rng_runs")
                .join(format!("{id}.json"))
                .exists()
        );
    }

    #[test]
    fn test_file_counter_instances_never_drop_registrations() {
        // Independent instances stand in for separate processes: neither
        // shares the other's in-process mutex.
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let root = root.clone();
                std::thread::spawn(move || {
                    let store = FileCounterStore::new(root, CounterKeyspace::default());
                    let ids: Vec<Uuid> = (0..40).map(|_| Uuid::new_v4()).collect();
                    for &id in &ids {
                        store.get_or_create(id, "k", "n").unwrap();
                        store.atomic_increment(id, 3).unwrap();
                    }
                    ids
                })
            })
            .collect();
        let ids: Vec<Uuid> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 80);

        let reader = FileCounterStore::new(&root, CounterKeyspace::default());
        let missing = ids
            .iter()
            .filter(|&&id| reader.get(id).unwrap().map(|s| s.counter) != Some(3))
            .count();
        assert_eq!(missing, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_counter_increments_are_atomic_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let id = Uuid::new_v4();
        FileCounterStore::new(&root, CounterKeyspace::default())
            .get_or_create(id, "k", "n")
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let root = root.clone();
                std::thread::spawn(move || {
                    let store = FileCounterStore::new(root, CounterKeyspace::default());
                    (0..25)
                        .map(|_| store.atomic_increment(id, 1).unwrap())
                        .collect::<Vec<u64>>()
                })
            })
            .collect();
        let mut seen: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        seen.sort_unstable();

        // Every increment observed a distinct counter value.
        assert_eq!(seen, (1..=100).collect::<Vec<u64>>());
        let reader = FileCounterStore::new(&root, CounterKeyspace::default());
        assert_eq!(reader.get(id).unwrap().unwrap().counter, 100);
    }

    #[test]
    fn test_memory_artifacts() {
        let store = MemoryArtifactStore::new();
        assert!(store.is_empty());
        store.put("runs/a/sequence.bin", &[1, 2, 3]).unwrap();
        assert_eq!(store.get("runs/a/sequence.bin").unwrap(), vec![1, 2, 3]);
        assert!(matches!(store.get("missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_fs_artifacts_roundtrip_and_reject_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let path = store.put("chaos/x.bin", b"abc").unwrap();
        assert_eq!(path, "chaos/x.bin");
        assert_eq!(store.get("chaos/x.bin").unwrap(), b"abc");
        assert!(dir.path().join("chaos").join("x.bin").exists());

        assert!(matches!(store.get("chaos/y.bin"), Err(StoreError::NotFound(_))));
        assert!(store.put("../escape.bin", b"x").is_err());
        assert!(store.put("/etc/passwd", b"x").is_err());
    }

    fn report(run_id: Uuid, name: &str) -> TestReportRecord {
        TestReportRecord {
            run_id,
            test_name: name.to_string(),
            status: ReportStatus::Passed,
            metrics: BTreeMap::new(),
        }
    }

    fn check_report_replacement(store: &dyn RecordStore) {
        let run_id = Uuid::new_v4();
        assert!(store.test_reports(run_id).unwrap().is_empty());
        store
            .replace_test_reports(run_id, vec![report(run_id, "frequency"), report(run_id, "runs")])
            .unwrap();
        store
            .replace_test_reports(run_id, vec![report(run_id, "chi_square")])
            .unwrap();
        let stored = store.test_reports(run_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].test_name, "chi_square");
    }

    #[test]
    fn test_memory_records_replace_reports() {
        check_report_replacement(&MemoryRecordStore::new());
    }

    #[test]
    fn test_fs_records_replace_reports() {
        let dir = tempfile::tempdir().unwrap();
        check_report_replacement(&FsRecordStore::new(dir.path()));
    }

    #[test]
    fn test_fs_records_audit_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        let record = AuditRecord {
            audit_id: Uuid::new_v4(),
            name: "sample".into(),
            description: None,
            data_hash: "00".into(),
            result_path: "audit/x.bin".into(),
        };
        store.add_audit(record.clone()).unwrap();
        assert_eq!(store.get_audit(record.audit_id).unwrap(), Some(record));
        assert_eq!(store.get_audit(Uuid::new_v4()).unwrap(), None);
    }
}
