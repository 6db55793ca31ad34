//! Storage collaborator and the write-behind persister.
//!
//! Storage exists for crash recovery: the in-memory sessions are the truth
//! while the process runs. Writes go through [`Persister`], a single
//! background worker fed by an ordered queue, so a slow disk never blocks
//! gameplay and a failed write is logged instead of undoing a mutation.

use dashmap::DashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tycoon_core::{Catalog, CatalogError, GameState, GameStatus, LogEntry};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bad JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Reference data rejected: {0}")]
    Catalog(#[from] CatalogError),
}

/// Where sessions and reference data live between restarts
pub trait GameStore: Send + Sync {
    fn save_snapshot(&self, game: &GameState) -> Result<(), StoreError>;

    fn append_log(&self, code: &str, entry: &LogEntry) -> Result<(), StoreError>;

    fn delete(&self, code: &str) -> Result<(), StoreError>;

    /// Every stored session that is not finished. Unreadable entries are skipped.
    fn load_active(&self) -> Result<Vec<GameState>, StoreError>;

    fn load_catalog(&self) -> Result<Catalog, StoreError>;
}

/// JSON files under one data directory:
/// `snapshots/<code>.json`, `logs/<code>.jsonl` and an optional `catalog.json`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [root.join("snapshots"), root.join("logs")] {
            fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir.clone(), source })?;
        }
        Ok(Self { root })
    }

    fn snapshot_path(&self, code: &str) -> PathBuf {
        self.root.join("snapshots").join(format!("{code}.json"))
    }

    fn log_path(&self, code: &str) -> PathBuf {
        self.root.join("logs").join(format!("{code}.jsonl"))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn json_err(path: &Path) -> impl FnOnce(serde_json::Error) -> StoreError + '_ {
    move |source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    }
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(io_err(path)(e)),
        _ => Ok(()),
    }
}

fn read_snapshot(path: &Path) -> Result<GameState, StoreError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&bytes).map_err(json_err(path))
}

impl GameStore for FileStore {
    fn save_snapshot(&self, game: &GameState) -> Result<(), StoreError> {
        let path = self.snapshot_path(&game.code);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(game).map_err(json_err(&path))?;
        fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))
    }

    fn append_log(&self, code: &str, entry: &LogEntry) -> Result<(), StoreError> {
        let path = self.log_path(code);
        let mut line = serde_json::to_string(entry).map_err(json_err(&path))?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err(&path))?;
        file.write_all(line.as_bytes()).map_err(io_err(&path))
    }

    fn delete(&self, code: &str) -> Result<(), StoreError> {
        remove_if_present(&self.snapshot_path(code))?;
        remove_if_present(&self.log_path(code))
    }

    fn load_active(&self) -> Result<Vec<GameState>, StoreError> {
        let dir = self.root.join("snapshots");
        let mut games = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
            let path = entry.map_err(io_err(&dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_snapshot(&path) {
                Ok(game) if game.status != GameStatus::Finished => games.push(game),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), "Skipping unreadable snapshot: {}", e),
            }
        }
        games.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(games)
    }

    fn load_catalog(&self) -> Result<Catalog, StoreError> {
        let path = self.root.join("catalog.json");
        if !path.exists() {
            debug!("No catalog.json in {}, using the standard board", self.root.display());
            return Ok(Catalog::standard());
        }
        let bytes = fs::read(&path).map_err(io_err(&path))?;
        let catalog: Catalog = serde_json::from_slice(&bytes).map_err(json_err(&path))?;
        catalog.validate()?;
        Ok(catalog)
    }
}

/// Store that keeps everything in memory and always serves the standard board
#[derive(Default)]
pub struct MemoryStore {
    pub snapshots: DashMap<String, GameState>,
    pub logs: DashMap<String, Vec<LogEntry>>,
}

impl GameStore for MemoryStore {
    fn save_snapshot(&self, game: &GameState) -> Result<(), StoreError> {
        self.snapshots.insert(game.code.clone(), game.clone());
        Ok(())
    }

    fn append_log(&self, code: &str, entry: &LogEntry) -> Result<(), StoreError> {
        self.logs.entry(code.to_string()).or_default().push(entry.clone());
        Ok(())
    }

    fn delete(&self, code: &str) -> Result<(), StoreError> {
        self.snapshots.remove(code);
        self.logs.remove(code);
        Ok(())
    }

    fn load_active(&self) -> Result<Vec<GameState>, StoreError> {
        let mut games: Vec<GameState> = self
            .snapshots
            .iter()
            .filter(|g| g.status != GameStatus::Finished)
            .map(|g| g.value().clone())
            .collect();
        games.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(games)
    }

    fn load_catalog(&self) -> Result<Catalog, StoreError> {
        Ok(Catalog::standard())
    }
}

/// One queued write
#[derive(Debug)]
pub enum PersistJob {
    Snapshot(Box<GameState>),
    Log { code: String, entry: LogEntry },
    Delete(String),
}

impl PersistJob {
    fn run(&self, store: &dyn GameStore) -> Result<(), StoreError> {
        match self {
            PersistJob::Snapshot(game) => store.save_snapshot(game),
            PersistJob::Log { code, entry } => store.append_log(code, entry),
            PersistJob::Delete(code) => store.delete(code),
        }
    }

    fn code(&self) -> &str {
        match self {
            PersistJob::Snapshot(game) => &game.code,
            PersistJob::Log { code, .. } | PersistJob::Delete(code) => code,
        }
    }
}

/// Handle to the write-behind queue
#[derive(Clone)]
pub struct Persister {
    tx: mpsc::UnboundedSender<PersistJob>,
}

impl Persister {
    /// Start the worker. Jobs run one at a time in submission order.
    pub fn spawn(store: Arc<dyn GameStore>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistJob>();

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let store = Arc::clone(&store);
                let code = job.code().to_string();
                match tokio::task::spawn_blocking(move || job.run(store.as_ref())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(code = %code, "Persist failed: {}", e),
                    Err(e) => error!(code = %code, "Persist task panicked: {}", e),
                }
            }
            info!("Persister stopped");
        });

        (Self { tx }, worker)
    }

    fn submit(&self, job: PersistJob) {
        if self.tx.send(job).is_err() {
            error!("Persister is gone, dropping write");
        }
    }

    pub fn save_snapshot(&self, game: GameState) {
        self.submit(PersistJob::Snapshot(Box::new(game)));
    }

    pub fn append_log(&self, code: &str, entry: LogEntry) {
        self.submit(PersistJob::Log {
            code: code.to_string(),
            entry,
        });
    }

    pub fn delete(&self, code: &str) {
        self.submit(PersistJob::Delete(code.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tycoon_core::LogKind;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("tycoon-store-{}", Uuid::new_v4()))
    }

    fn game(code: &str) -> GameState {
        GameState::new(code, "host", "Host", &Catalog::standard(), 1_000).unwrap()
    }

    fn entry(seq: u64) -> LogEntry {
        LogEntry {
            seq,
            kind: LogKind::Info,
            message: format!("entry {seq}"),
            timestamp: 1_000 + seq,
        }
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = temp_dir();
        let store = FileStore::open(&dir).unwrap();

        let mut finished = game("DONE");
        finished.status = GameStatus::Finished;
        store.save_snapshot(&game("ABCD")).unwrap();
        store.save_snapshot(&finished).unwrap();
        store.append_log("ABCD", &entry(1)).unwrap();
        store.append_log("ABCD", &entry(2)).unwrap();

        let active = store.load_active().unwrap();
        assert_eq!(active, vec![game("ABCD")]);

        let log = fs::read_to_string(dir.join("logs/ABCD.jsonl")).unwrap();
        assert_eq!(log.lines().count(), 2);

        store.delete("ABCD").unwrap();
        store.delete("ABCD").unwrap();
        assert!(store.load_active().unwrap().is_empty());
        assert!(!dir.join("logs/ABCD.jsonl").exists());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_corrupt_snapshot_costs_only_itself() {
        let dir = temp_dir();
        let store = FileStore::open(&dir).unwrap();
        store.save_snapshot(&game("GOOD")).unwrap();
        fs::write(dir.join("snapshots/BAD1.json"), b"{ truncated").unwrap();
        fs::write(dir.join("snapshots/BAD2.json"), b"[]").unwrap();

        assert_eq!(store.load_active().unwrap(), vec![game("GOOD")]);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_file_store_catalog() {
        let dir = temp_dir();
        let store = FileStore::open(&dir).unwrap();
        assert_eq!(store.load_catalog().unwrap(), Catalog::standard());

        let mut broken = Catalog::standard();
        broken.layout.pop();
        fs::write(dir.join("catalog.json"), serde_json::to_vec(&broken).unwrap()).unwrap();
        assert!(matches!(store.load_catalog(), Err(StoreError::Catalog(_))));

        fs::write(dir.join("catalog.json"), b"{").unwrap();
        assert!(matches!(store.load_catalog(), Err(StoreError::Json { .. })));

        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_persister_applies_jobs_in_order() {
        let store = Arc::new(MemoryStore::default());
        let (persister, worker) = Persister::spawn(store.clone());

        let mut g = game("WXYZ");
        persister.save_snapshot(g.clone());
        g.version = 5;
        persister.save_snapshot(g.clone());
        persister.append_log("WXYZ", entry(1));
        persister.append_log("WXYZ", entry(2));
        persister.save_snapshot(game("GONE"));
        persister.delete("GONE");
        drop(persister);
        worker.await.unwrap();

        assert_eq!(store.snapshots.get("WXYZ").unwrap().version, 5);
        let seqs: Vec<u64> = store.logs.get("WXYZ").unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(store.snapshots.get("GONE").is_none());
    }
}
