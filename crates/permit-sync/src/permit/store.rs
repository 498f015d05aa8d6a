use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use super::record::PermitRecord;

pub const CURRENT_FILE: &str = "permit.json";
pub const HISTORY_FILE: &str = "history.json";
pub const PENDING_FILE: &str = "pending_publish.json";

/// Error enumeration for record store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("permit {permit_number} is already in history")]
    DuplicateRecord { permit_number: String },
    #[error("unable to write {path}: {reason}")]
    WriteFailure { path: PathBuf, reason: String },
    #[error("unable to read {path}: {reason}")]
    ReadFailure { path: PathBuf, reason: String },
    #[error("permit {permit_number} was added to history but the current slot was not updated: {source}")]
    PartialCommit {
        permit_number: String,
        #[source]
        source: Box<StoreError>,
    },
}

/// Durable home of the current permit and the permit history.
///
/// Implementations only ever see one writer: the sync pipeline.
pub trait RecordStore: Send + Sync {
    /// Replaces the current slot. Readers see either the old or the new
    /// record, never a partial one.
    fn set_current(&self, record: &PermitRecord) -> Result<(), StoreError>;
    /// Appends to history; `DuplicateRecord` if the permit number is known.
    fn append_history(&self, record: &PermitRecord) -> Result<(), StoreError>;
    fn get_current(&self) -> Result<Option<PermitRecord>, StoreError>;
    fn find_in_history(&self, permit_number: &str) -> Result<Option<PermitRecord>, StoreError>;
    /// History in insertion order, oldest first.
    fn history(&self) -> Result<Vec<PermitRecord>, StoreError>;
    /// Permit number whose publish has not succeeded yet.
    fn pending_publish(&self) -> Result<Option<String>, StoreError>;
    fn mark_pending_publish(&self, permit_number: &str) -> Result<(), StoreError>;
    fn clear_pending_publish(&self) -> Result<(), StoreError>;
}

/// Outcome of [`commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Appended,
    /// The permit was already in history; only the current slot was written.
    AlreadyInHistory,
}

/// Stores a freshly extracted record: history first, then the current slot,
/// so the current slot never names a permit missing from history. A permit
/// already in history is not an error.
pub fn commit<S: RecordStore + ?Sized>(
    store: &S,
    record: &PermitRecord,
) -> Result<CommitOutcome, StoreError> {
    let outcome = match store.append_history(record) {
        Ok(()) => CommitOutcome::Appended,
        Err(StoreError::DuplicateRecord { permit_number }) => {
            debug!(%permit_number, "permit already in history");
            CommitOutcome::AlreadyInHistory
        }
        Err(other) => return Err(other),
    };

    store
        .set_current(record)
        .map_err(|source| StoreError::PartialCommit {
            permit_number: record.permit_number.clone(),
            source: Box::new(source),
        })?;

    Ok(outcome)
}

/// History lookup by permit number, or the current record when no number is
/// given.
pub fn lookup<S: RecordStore + ?Sized>(
    store: &S,
    permit_number: Option<&str>,
) -> Result<Option<PermitRecord>, StoreError> {
    match permit_number.map(str::trim).filter(|value| !value.is_empty()) {
        Some(number) => store.find_in_history(number),
        None => store.get_current(),
    }
}

/// JSON files under a data directory, each replaced wholesale through a
/// temporary file in the same directory.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    root: PathBuf,
}

impl FileRecordStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    fn pending_path(&self) -> PathBuf {
        self.root.join(PENDING_FILE)
    }

    fn read_history(&self) -> Result<Vec<PermitRecord>, StoreError> {
        Ok(read_json(&self.history_path())?.unwrap_or_default())
    }
}

impl RecordStore for FileRecordStore {
    fn set_current(&self, record: &PermitRecord) -> Result<(), StoreError> {
        write_json_atomic(&self.current_path(), record)?;
        info!(permit_number = %record.permit_number, "current permit updated");
        Ok(())
    }

    fn append_history(&self, record: &PermitRecord) -> Result<(), StoreError> {
        let mut history = self.read_history()?;
        if history
            .iter()
            .any(|existing| existing.permit_number == record.permit_number)
        {
            return Err(StoreError::DuplicateRecord {
                permit_number: record.permit_number.clone(),
            });
        }
        history.push(record.clone());
        write_json_atomic(&self.history_path(), &history)?;
        info!(
            permit_number = %record.permit_number,
            entries = history.len(),
            "permit appended to history"
        );
        Ok(())
    }

    fn get_current(&self) -> Result<Option<PermitRecord>, StoreError> {
        read_json(&self.current_path())
    }

    fn find_in_history(&self, permit_number: &str) -> Result<Option<PermitRecord>, StoreError> {
        Ok(self
            .read_history()?
            .into_iter()
            .find(|record| record.permit_number == permit_number))
    }

    fn history(&self) -> Result<Vec<PermitRecord>, StoreError> {
        self.read_history()
    }

    fn pending_publish(&self) -> Result<Option<String>, StoreError> {
        read_json(&self.pending_path())
    }

    fn mark_pending_publish(&self, permit_number: &str) -> Result<(), StoreError> {
        write_json_atomic(&self.pending_path(), &permit_number)
    }

    fn clear_pending_publish(&self) -> Result<(), StoreError> {
        let path = self.pending_path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::WriteFailure {
                path,
                reason: err.to_string(),
            }),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let failure = |reason: String| StoreError::ReadFailure {
        path: path.to_path_buf(),
        reason,
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(failure(err.to_string())),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| failure(err.to_string()))
}

/// Writes pretty JSON to a sibling temp file, syncs it, then renames it over
/// `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| StoreError::WriteFailure {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    write_atomic(path, &bytes).map_err(|err| StoreError::WriteFailure {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Process-local store for tests and previews.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    current: Option<PermitRecord>,
    history: Vec<PermitRecord>,
    pending: Option<String>,
}

impl InMemoryRecordStore {
    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn set_current(&self, record: &PermitRecord) -> Result<(), StoreError> {
        self.with_state(|state| state.current = Some(record.clone()));
        Ok(())
    }

    fn append_history(&self, record: &PermitRecord) -> Result<(), StoreError> {
        self.with_state(|state| {
            if state
                .history
                .iter()
                .any(|existing| existing.permit_number == record.permit_number)
            {
                return Err(StoreError::DuplicateRecord {
                    permit_number: record.permit_number.clone(),
                });
            }
            state.history.push(record.clone());
            Ok(())
        })
    }

    fn get_current(&self) -> Result<Option<PermitRecord>, StoreError> {
        Ok(self.with_state(|state| state.current.clone()))
    }

    fn find_in_history(&self, permit_number: &str) -> Result<Option<PermitRecord>, StoreError> {
        Ok(self.with_state(|state| {
            state
                .history
                .iter()
                .find(|record| record.permit_number == permit_number)
                .cloned()
        }))
    }

    fn history(&self) -> Result<Vec<PermitRecord>, StoreError> {
        Ok(self.with_state(|state| state.history.clone()))
    }

    fn pending_publish(&self) -> Result<Option<String>, StoreError> {
        Ok(self.with_state(|state| state.pending.clone()))
    }

    fn mark_pending_publish(&self, permit_number: &str) -> Result<(), StoreError> {
        self.with_state(|state| state.pending = Some(permit_number.to_string()));
        Ok(())
    }

    fn clear_pending_publish(&self) -> Result<(), StoreError> {
        self.with_state(|state| state.pending = None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permit::record::PermitTimestamp;

    fn record(permit_number: &str) -> PermitRecord {
        PermitRecord {
            permit_number: permit_number.to_string(),
            plate_number: "ABC123".to_string(),
            valid_from: PermitTimestamp::parse("Nov 7, 2025: 18:00").expect("from"),
            valid_to: PermitTimestamp::parse("Nov 14, 2025: 17:59").expect("to"),
            barcode_value: None,
            barcode_label: Some("00435".to_string()),
            amount_paid: None,
        }
    }

    #[test]
    fn set_current_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileRecordStore::new(dir.path());
        assert_eq!(store.get_current().expect("read"), None);

        let permit = record("T6151625");
        store.set_current(&permit).expect("write");
        assert_eq!(store.get_current().expect("read"), Some(permit));
    }

    #[test]
    fn set_current_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileRecordStore::new(dir.path().join("nested"));
        store.set_current(&record("T1")).expect("write");
        store.set_current(&record("T2")).expect("overwrite");

        let names: Vec<String> = std::fs::read_dir(store.root())
            .expect("list")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![CURRENT_FILE.to_string()]);
        let current = store.get_current().expect("read").expect("present");
        assert_eq!(current.permit_number, "T2");
    }

    #[test]
    fn duplicate_append_is_rejected_and_history_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileRecordStore::new(dir.path());
        store.append_history(&record("T1")).expect("first append");

        let error = store
            .append_history(&record("T1"))
            .expect_err("duplicate rejected");
        assert!(matches!(error, StoreError::DuplicateRecord { ref permit_number } if permit_number == "T1"));
        assert_eq!(store.history().expect("history").len(), 1);
    }

    #[test]
    fn history_keeps_insertion_order_and_finds_exact_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileRecordStore::new(dir.path());
        for number in ["T3", "T1", "T2"] {
            store.append_history(&record(number)).expect("append");
        }

        let numbers: Vec<String> = store
            .history()
            .expect("history")
            .into_iter()
            .map(|entry| entry.permit_number)
            .collect();
        assert_eq!(numbers, ["T3", "T1", "T2"]);
        assert_eq!(store.find_in_history("T1").expect("find"), Some(record("T1")));
        assert_eq!(store.find_in_history("T9").expect("find"), None);
    }

    #[test]
    fn commit_is_idempotent_for_the_same_permit() {
        let store = InMemoryRecordStore::default();
        let permit = record("T6151625");

        assert_eq!(commit(&store, &permit).expect("commit"), CommitOutcome::Appended);
        assert_eq!(
            commit(&store, &permit).expect("recommit"),
            CommitOutcome::AlreadyInHistory
        );
        assert_eq!(store.history().expect("history").len(), 1);
        assert_eq!(store.get_current().expect("current"), Some(permit));
    }

    #[test]
    fn lookup_falls_back_to_current() {
        let store = InMemoryRecordStore::default();
        commit(&store, &record("T1")).expect("commit");
        commit(&store, &record("T2")).expect("commit");

        assert_eq!(
            lookup(&store, None).expect("lookup").map(|r| r.permit_number),
            Some("T2".to_string())
        );
        assert_eq!(
            lookup(&store, Some(" ")).expect("lookup").map(|r| r.permit_number),
            Some("T2".to_string())
        );
        assert_eq!(
            lookup(&store, Some("T1")).expect("lookup").map(|r| r.permit_number),
            Some("T1".to_string())
        );
        assert_eq!(lookup(&store, Some("T7")).expect("lookup"), None);
    }

    #[test]
    fn pending_marker_survives_until_cleared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileRecordStore::new(dir.path());
        assert_eq!(store.pending_publish().expect("read"), None);

        store.mark_pending_publish("T1").expect("mark");
        let reopened = FileRecordStore::new(dir.path());
        assert_eq!(reopened.pending_publish().expect("read"), Some("T1".to_string()));

        reopened.clear_pending_publish().expect("clear");
        reopened.clear_pending_publish().expect("clearing twice is fine");
        assert_eq!(store.pending_publish().expect("read"), None);
    }

    #[test]
    fn corrupt_history_is_a_read_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(HISTORY_FILE), "{not json").expect("write");
        let store = FileRecordStore::new(dir.path());
        assert!(matches!(
            store.append_history(&record("T1")),
            Err(StoreError::ReadFailure { .. })
        ));
    }
}
