/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! File-backed store.
//!
//! The engine directory holds two files:
//! - `sequence-numbers`: append-only JSON-lines log of counter updates, the
//!   last record per session id winning. The log is rewritten as a snapshot
//!   once the number of superseded records passes a threshold.
//! - `session-ids`: JSON snapshot of the id map and the id allocator,
//!   rewritten on every assignment (assignments are rare).
//!
//! The log is replayed into memory at [`FileStore::open`], so every read
//! path (`load`, `lookup`, `all_sessions`) is served from the in-memory
//! maps without touching disk. Write paths append or rewrite files and run
//! on tokio's blocking pool via `spawn_blocking`; the framer awaits each
//! write-through before issuing the next, which keeps the log in submission
//! order while the reactor task itself never parks on disk I/O. `open` is
//! the one synchronous entry point, called once at engine launch before the
//! duty cycle starts.

use crate::traits::{GatewayStore, SequenceEntry, SequenceStore, SessionIdStore};
use crate::{SEQUENCE_NUMBERS_FILE, SESSION_IDS_FILE};
use async_trait::async_trait;
use fixgate_core::types::SessionKey;
use fixgate_core::{SessionId, StoreError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Superseded records tolerated in the log before compaction.
const COMPACTION_THRESHOLD: usize = 4096;

#[derive(Debug, Serialize, Deserialize)]
struct SequenceRecord {
    id: SessionId,
    #[serde(flatten)]
    entry: SequenceEntry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdSnapshot {
    next_id: u64,
    entries: Vec<(SessionId, SessionKey)>,
}

/// Store persisted under one engine directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    sequences: HashMap<SessionId, SequenceEntry>,
    ids: HashMap<SessionKey, SessionId>,
    next_id: u64,
    log: File,
    dead_records: usize,
}

impl FileStore {
    /// Opens (or creates) the store in `dir`, replaying the sequence log.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the directory cannot be created or an
    /// existing log or snapshot cannot be parsed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let (sequences, dead_records) = replay_log(&dir.join(SEQUENCE_NUMBERS_FILE))?;
        let snapshot = read_ids(&dir.join(SESSION_IDS_FILE))?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(SEQUENCE_NUMBERS_FILE))?;

        info!(
            dir = %dir.display(),
            sessions = snapshot.entries.len(),
            counters = sequences.len(),
            "opened file store"
        );

        Ok(Self {
            dir,
            inner: Arc::new(Mutex::new(Inner {
                sequences,
                ids: snapshot.entries.iter().map(|(id, k)| (k.clone(), *id)).collect(),
                next_id: snapshot.next_id,
                log,
                dead_records,
            })),
        })
    }

    /// Runs a disk-touching job on the blocking pool.
    async fn run_blocking<T, F>(&self, job: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &mut Inner) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            let mut inner = inner.lock();
            job(&dir, &mut inner)
        })
        .await
        .map_err(|e| StoreError::Io(format!("store worker failed: {e}")))?
    }
}

fn replay_log(path: &Path) -> Result<(HashMap<SessionId, SequenceEntry>, usize), StoreError> {
    let mut sequences = HashMap::new();
    let mut total = 0usize;

    if path.exists() {
        let reader = BufReader::new(File::open(path)?);
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let record: SequenceRecord =
                serde_json::from_str(&line).map_err(|e| StoreError::Corrupted {
                    reason: format!("bad sequence record: {e}"),
                })?;
            sequences.insert(record.id, record.entry);
            total += 1;
        }
    }

    let dead = total.saturating_sub(sequences.len());
    Ok((sequences, dead))
}

fn read_ids(path: &Path) -> Result<IdSnapshot, StoreError> {
    if !path.exists() {
        return Ok(IdSnapshot::default());
    }
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| StoreError::Corrupted {
        reason: format!("bad session-ids snapshot: {e}"),
    })
}

fn append_record(inner: &mut Inner, record: &SequenceRecord) -> Result<(), StoreError> {
    let mut line = serde_json::to_string(record).map_err(|e| StoreError::Corrupted {
        reason: format!("unencodable sequence record: {e}"),
    })?;
    line.push('\n');
    inner.log.write_all(line.as_bytes())?;
    Ok(())
}

fn compact(dir: &Path, inner: &mut Inner) -> Result<(), StoreError> {
    let path = dir.join(SEQUENCE_NUMBERS_FILE);
    let tmp = dir.join(".sequence-numbers.tmp");

    {
        let mut out = File::create(&tmp)?;
        for (id, entry) in &inner.sequences {
            let mut line = serde_json::to_string(&SequenceRecord { id: *id, entry: *entry })
                .map_err(|e| StoreError::Corrupted {
                    reason: format!("unencodable sequence record: {e}"),
                })?;
            line.push('\n');
            out.write_all(line.as_bytes())?;
        }
        out.sync_all()?;
    }
    fs::rename(&tmp, &path)?;

    inner.log = OpenOptions::new().append(true).open(&path)?;
    inner.dead_records = 0;
    debug!(live = inner.sequences.len(), "compacted sequence log");
    Ok(())
}

fn write_ids(dir: &Path, inner: &Inner) -> Result<(), StoreError> {
    let snapshot = IdSnapshot {
        next_id: inner.next_id,
        entries: inner.ids.iter().map(|(k, id)| (*id, k.clone())).collect(),
    };
    let tmp = dir.join(".session-ids.tmp");
    {
        let file = File::create(&tmp)?;
        serde_json::to_writer(&file, &snapshot).map_err(|e| StoreError::Corrupted {
            reason: format!("unencodable session-ids snapshot: {e}"),
        })?;
        file.sync_all()?;
    }
    fs::rename(tmp, dir.join(SESSION_IDS_FILE))?;
    Ok(())
}

#[async_trait]
impl SequenceStore for FileStore {
    async fn load(&self, session_id: SessionId) -> Result<Option<SequenceEntry>, StoreError> {
        Ok(self.inner.lock().sequences.get(&session_id).copied())
    }

    async fn save(&self, session_id: SessionId, entry: SequenceEntry) -> Result<(), StoreError> {
        self.run_blocking(move |dir, inner| {
            if inner.sequences.insert(session_id, entry).is_some() {
                inner.dead_records += 1;
            }
            append_record(inner, &SequenceRecord {
                id: session_id,
                entry,
            })?;

            if inner.dead_records > COMPACTION_THRESHOLD {
                compact(dir, inner)?;
            }
            Ok(())
        })
        .await
    }

    async fn reset_sequence_number(&self, session_id: SessionId) -> Result<(), StoreError> {
        self.run_blocking(move |_, inner| {
            let entry = inner
                .sequences
                .get_mut(&session_id)
                .ok_or(StoreError::UnknownSession { session_id })?;
            entry.next_sent_seq = 1;
            entry.next_recv_seq = 1;
            let entry = *entry;

            inner.dead_records += 1;
            append_record(inner, &SequenceRecord {
                id: session_id,
                entry,
            })
        })
        .await
    }
}

#[async_trait]
impl SessionIdStore for FileStore {
    async fn assign(&self, key: &SessionKey) -> Result<SessionId, StoreError> {
        if let Some(id) = self.inner.lock().ids.get(key) {
            return Ok(*id);
        }
        let key = key.clone();
        self.run_blocking(move |dir, inner| {
            // double-checked: another assignment may have raced ahead
            if let Some(id) = inner.ids.get(&key) {
                return Ok(*id);
            }
            inner.next_id += 1;
            let id = SessionId::new(inner.next_id);
            inner.ids.insert(key, id);
            write_ids(dir, inner)?;
            Ok(id)
        })
        .await
    }

    async fn lookup(&self, key: &SessionKey) -> Result<Option<SessionId>, StoreError> {
        Ok(self.inner.lock().ids.get(key).copied())
    }

    async fn all_sessions(&self) -> Result<Vec<(SessionId, SessionKey)>, StoreError> {
        Ok(self
            .inner
            .lock()
            .ids
            .iter()
            .map(|(key, id)| (*id, key.clone()))
            .collect())
    }
}

#[async_trait]
impl GatewayStore for FileStore {
    async fn reset_state(&self, backup_location: Option<&Path>) -> Result<(), StoreError> {
        let backup = backup_location.map(Path::to_path_buf);
        self.run_blocking(move |dir, inner| {
            if let Some(backup) = backup {
                fs::create_dir_all(&backup)?;
                for name in [SEQUENCE_NUMBERS_FILE, SESSION_IDS_FILE] {
                    let source = dir.join(name);
                    if source.exists() {
                        fs::copy(&source, backup.join(name))?;
                    }
                }
                info!(backup = %backup.display(), "backed up engine state");
            }

            inner.sequences.clear();
            inner.ids.clear();
            inner.dead_records = 0;

            inner.log = File::create(dir.join(SEQUENCE_NUMBERS_FILE))?;
            write_ids(dir, inner)?;
            Ok(())
        })
        .await
    }
}
