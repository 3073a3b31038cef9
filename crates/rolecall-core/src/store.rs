//! Transactional record store
//!
//! One read-modify-write cycle at a time, process-wide. Writers queue on a
//! fair `tokio::sync::Mutex` (FIFO), work on a clone of the current document,
//! persist it, and only then publish it to readers. A failed mutator or a
//! failed write leaves the committed state untouched.
//!
//! Readers take an `Arc<Database>` from a parking_lot `RwLock` and never wait
//! behind the write queue.

use crate::error::{CoreError, CoreResult};
use crate::models::Database;
use parking_lot::{Mutex, RwLock};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where the document lives between restarts
pub trait Persistence: Send + Sync {
    /// Load the whole document; a missing store yields an empty database
    fn load(&self) -> CoreResult<Database>;

    /// Durably replace the whole document
    fn save(&self, db: &Database) -> CoreResult<()>;

    /// Whether `save` does blocking IO and must run off the async workers
    fn blocks(&self) -> bool {
        true
    }
}

/// JSON document on disk, replaced atomically (write temp file, then rename)
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> CoreResult<Database> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No database file yet, starting empty");
                return Ok(Database::default());
            }
            Err(source) => {
                return Err(CoreError::FileRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| CoreError::JsonParse {
            path: self.path.clone(),
            message: source.to_string(),
            source,
        })
    }

    fn save(&self, db: &Database) -> CoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| CoreError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_vec_pretty(db).map_err(CoreError::Serialize)?;
        let tmp = self.temp_path();
        let write_tmp = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&content)?;
            file.sync_all()
        };
        write_tmp().map_err(|source| CoreError::FileWrite {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| CoreError::FileWrite {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory persistence for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saved: Mutex<Database>,
    fail_next_save: Mutex<bool>,
    save_count: Mutex<usize>,
}

impl MemoryPersistence {
    pub fn new(initial: Database) -> Self {
        Self {
            saved: Mutex::new(initial),
            ..Self::default()
        }
    }

    /// Make the next `save` fail once
    pub fn fail_next_save(&self) {
        *self.fail_next_save.lock() = true;
    }

    pub fn saved(&self) -> Database {
        self.saved.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.save_count.lock()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> CoreResult<Database> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, db: &Database) -> CoreResult<()> {
        if std::mem::take(&mut *self.fail_next_save.lock()) {
            return Err(CoreError::PersistenceUnavailable(
                "injected save failure".to_string(),
            ));
        }
        *self.saved.lock() = db.clone();
        *self.save_count.lock() += 1;
        Ok(())
    }

    fn blocks(&self) -> bool {
        false
    }
}

impl<P: Persistence + ?Sized> Persistence for Arc<P> {
    fn load(&self) -> CoreResult<Database> {
        (**self).load()
    }

    fn save(&self, db: &Database) -> CoreResult<()> {
        (**self).save(db)
    }

    fn blocks(&self) -> bool {
        (**self).blocks()
    }
}

/// Single-writer store over a [`Persistence`] backend
pub struct TransactionalStore {
    persistence: Arc<dyn Persistence>,

    /// Committed state (readers clone the Arc)
    current: RwLock<Arc<Database>>,

    /// Write slot; tokio's mutex hands out the lock in FIFO order
    write_slot: tokio::sync::Mutex<()>,
}

impl TransactionalStore {
    /// Load the document and wrap it
    pub fn open(persistence: impl Persistence + 'static) -> CoreResult<Self> {
        let db = persistence.load()?;
        info!(
            users = db.users.len(),
            orgs = db.orgs.len(),
            sessions = db.sessions.len(),
            "Store opened"
        );
        Ok(Self {
            persistence: Arc::new(persistence),
            current: RwLock::new(Arc::new(db)),
            write_slot: tokio::sync::Mutex::new(()),
        })
    }

    /// In-memory store seeded with `db`
    pub fn in_memory(db: Database) -> Self {
        Self {
            persistence: Arc::new(MemoryPersistence::new(db.clone())),
            current: RwLock::new(Arc::new(db)),
            write_slot: tokio::sync::Mutex::new(()),
        }
    }

    /// Latest committed document; does not wait for writers
    pub fn snapshot(&self) -> Arc<Database> {
        Arc::clone(&self.current.read())
    }

    /// Run `mutator` against a private copy of the document and commit it.
    ///
    /// The copy is discarded if the mutator returns an error or if the write
    /// fails; readers only ever see fully persisted states.
    pub async fn commit<T, F>(&self, mutator: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Database) -> CoreResult<T>,
    {
        self.commit_with(mutator, |_, output| output).await
    }

    /// [`commit`](Self::commit), then run `on_commit` against the new state
    /// before the write slot is released.
    ///
    /// Work done in `on_commit` (notifications) is ordered exactly like the
    /// commits themselves.
    pub async fn commit_with<T, R, F, A>(&self, mutator: F, on_commit: A) -> CoreResult<R>
    where
        F: FnOnce(&mut Database) -> CoreResult<T>,
        A: FnOnce(&Database, T) -> R,
    {
        let _slot = self.write_slot.lock().await;
        let started = Instant::now();

        let mut draft = Database::clone(&self.snapshot());
        let output = mutator(&mut draft)?;
        let draft = Arc::new(draft);

        if let Err(e) = self.persist(Arc::clone(&draft)).await {
            warn!(error = %e, "Commit failed, keeping previous state");
            return Err(e);
        }

        *self.current.write() = Arc::clone(&draft);
        debug!(elapsed_us = started.elapsed().as_micros() as u64, "Commit applied");
        Ok(on_commit(&draft, output))
    }

    /// Save on the blocking pool; file IO must not stall a runtime worker
    async fn persist(&self, db: Arc<Database>) -> CoreResult<()> {
        if !self.persistence.blocks() {
            return self.persistence.save(&db);
        }
        let persistence = Arc::clone(&self.persistence);
        tokio::task::spawn_blocking(move || persistence.save(&db))
            .await
            .map_err(|e| CoreError::PersistenceUnavailable(format!("save task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountStatus, EnterpriseOrg};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn org(id: &str) -> EnterpriseOrg {
        EnterpriseOrg {
            id: id.to_string(),
            name: id.to_string(),
            status: AccountStatus::Active,
            daily_seconds_quota: 3_600,
            per_user_daily_seconds_cap: 600,
            manual_bonus_seconds: 0,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_state() {
        let store = TransactionalStore::in_memory(Database::default());
        let inserted = store
            .commit(|db| {
                db.orgs.insert("org-1".to_string(), org("org-1"));
                Ok(db.orgs.len())
            })
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert!(store.snapshot().org("org-1").is_some());
    }

    #[tokio::test]
    async fn test_mutator_error_discards_draft() {
        let store = TransactionalStore::in_memory(Database::default());
        let result: CoreResult<()> = store
            .commit(|db| {
                db.orgs.insert("org-1".to_string(), org("org-1"));
                Err(CoreError::OrgNotFound {
                    org_id: "org-2".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert!(store.snapshot().orgs.is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_committed_state() {
        let persistence = Arc::new(MemoryPersistence::default());
        let store = TransactionalStore::open(Arc::clone(&persistence)).unwrap();

        store
            .commit(|db| {
                db.orgs.insert("org-1".to_string(), org("org-1"));
                Ok(())
            })
            .await
            .unwrap();

        persistence.fail_next_save();
        let result = store
            .commit(|db| {
                db.orgs.insert("org-2".to_string(), org("org-2"));
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CoreError::PersistenceUnavailable(_))));
        assert!(store.snapshot().org("org-2").is_none());
        assert!(persistence.saved().org("org-2").is_none());
        assert_eq!(persistence.save_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_commits_serialize() {
        let store = Arc::new(TransactionalStore::in_memory(Database::default()));
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .commit(move |db| {
                        // read-modify-write on the same field
                        let entry = db
                            .orgs
                            .entry("org-1".to_string())
                            .or_insert_with(|| org("org-1"));
                        entry.manual_bonus_seconds += 1;
                        Ok(i)
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.snapshot().org("org-1").unwrap().manual_bonus_seconds, 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_on_commit_runs_in_commit_order() {
        let store = Arc::new(TransactionalStore::in_memory(Database::default()));
        let observed = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let observed = Arc::clone(&observed);
                tokio::spawn(async move {
                    store
                        .commit_with(
                            |db| {
                                let entry = db
                                    .orgs
                                    .entry("org-1".to_string())
                                    .or_insert_with(|| org("org-1"));
                                entry.manual_bonus_seconds += 1;
                                Ok(())
                            },
                            |db, ()| {
                                let seen = db.org("org-1").map(|o| o.manual_bonus_seconds);
                                observed.lock().push(seen);
                            },
                        )
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let expected: Vec<_> = (1..=16).map(Some).collect();
        assert_eq!(*observed.lock(), expected);
    }

    #[tokio::test]
    async fn test_on_commit_skipped_when_save_fails() {
        let persistence = Arc::new(MemoryPersistence::default());
        let store = TransactionalStore::open(Arc::clone(&persistence)).unwrap();
        persistence.fail_next_save();

        let mut ran = false;
        let result = store
            .commit_with(|_| Ok(()), |_, ()| ran = true)
            .await;

        assert!(result.is_err());
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_json_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("db.json");

        let store = TransactionalStore::open(JsonFilePersistence::new(&path)).unwrap();
        assert!(store.snapshot().orgs.is_empty());

        store
            .commit(|db| {
                db.orgs.insert("org-1".to_string(), org("org-1"));
                Ok(())
            })
            .await
            .unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = TransactionalStore::open(JsonFilePersistence::new(&path)).unwrap();
        assert_eq!(reopened.snapshot().org("org-1"), store.snapshot().org("org-1"));
    }

    #[test]
    fn test_json_file_corrupt_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = TransactionalStore::open(JsonFilePersistence::new(&path));
        assert!(matches!(result, Err(CoreError::JsonParse { .. })));
    }
}
