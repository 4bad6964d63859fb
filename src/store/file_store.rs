//! # File Store
//!
//! [`CertificateAuthorityStore`] keeping all records in a single JSON document.
//!
//! Commits write a complete new document next to the old one and rename it into place, so
//! a reader sees either the old or the new state. Locking happens on two levels:
//!
//! * inside a process, one `tokio` mutex per CA row and a read/write lock on the
//!   in-memory copy of the document;
//! * across processes, lock files next to the document: `<state>.<ca id>.lock` for a CA row
//!   (held for a whole transaction) and `<state>.lock` for the document (held while a
//!   change is applied).
//!
//! A lock file that stays taken for longer than the store's lock wait fails the operation
//! with [`StoreError::LockTimeout`]; a row is normally held for one signing call, so the wait
//! has to outlast the signing timeout.
//!
//! Without a backing file ([`FileStore::in_memory`]) only the in-process locks exist.
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{CertificateAuthorityStore, CertificateFilter, StoreError, StoreTransaction};
use crate::model::{CaId, CertificateAuthority, IssuedCertificate};

/// How long [`FileStore::open`] waits for a lock file held by another process.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(60);
const LOCK_FILE_RETRY: Duration = Duration::from_millis(20);

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct StoreState {
    authorities: Vec<CertificateAuthority>,
    certificates: Vec<IssuedCertificate>,
}

impl StoreState {
    /// The newest non-revoked authority. On equal creation times the later record wins.
    fn active_authority(&self) -> Option<&CertificateAuthority> {
        self.authorities
            .iter()
            .filter(|ca| !ca.is_revoked())
            .max_by_key(|ca| ca.created_at())
    }

    fn authority_mut(&mut self, id: &CaId) -> Option<&mut CertificateAuthority> {
        self.authorities.iter_mut().find(|ca| ca.id() == id)
    }
}

fn read_state(path: &Path) -> Result<StoreState, StoreError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StoreState::default()),
        Err(e) => Err(e.into()),
    }
}

/// An exclusive lock file, removed on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    async fn acquire(path: PathBuf, wait: Duration) -> Result<Self, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(LockFile { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        warn!(
                            "lock file {:?} still taken after {}",
                            path,
                            humantime::format_duration(wait)
                        );
                        return Err(StoreError::LockTimeout { path });
                    }
                    tokio::time::sleep(LOCK_FILE_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("failed to remove lock file {:?}: {}", self.path, e);
        }
    }
}

/// Exclusive hold on one CA row.
#[derive(Debug)]
struct RowLock {
    _guard: OwnedMutexGuard<()>,
    _file: Option<LockFile>,
}

#[derive(Debug)]
struct Inner {
    path: Option<PathBuf>,
    state: RwLock<StoreState>,
    row_locks: StdMutex<HashMap<CaId, Arc<Mutex<()>>>>,
}

/// JSON document store for CA and certificate records.
#[derive(Debug, Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
    lock_wait: Duration,
}

impl FileStore {
    /// A store without a backing file.
    pub fn in_memory() -> Self {
        FileStore::with_state(None, StoreState::default())
    }

    /// Opens the store backed by `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = read_state(&path)?;
        info!(
            "opened store {:?} with {} authorities and {} certificates",
            path,
            state.authorities.len(),
            state.certificates.len()
        );
        Ok(FileStore::with_state(Some(path), state))
    }

    fn with_state(path: Option<PathBuf>, state: StoreState) -> Self {
        FileStore {
            inner: Arc::new(Inner {
                path,
                state: RwLock::new(state),
                row_locks: StdMutex::new(HashMap::new()),
            }),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Sets how long to wait for lock files held by other processes.
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    fn lock_file_path(&self, name: Option<&str>) -> Option<PathBuf> {
        self.inner.path.as_ref().map(|path| {
            let mut lock_path = path.as_os_str().to_os_string();
            if let Some(name) = name {
                lock_path.push(format!(".{}", name));
            }
            lock_path.push(".lock");
            PathBuf::from(lock_path)
        })
    }

    fn row_mutex(&self, id: &CaId) -> Arc<Mutex<()>> {
        let mut row_locks = self
            .inner
            .row_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(row_locks.entry(id.clone()).or_default())
    }

    async fn lock_row(&self, id: &CaId) -> Result<RowLock, StoreError> {
        let guard = self.row_mutex(id).lock_owned().await;
        let file = match self.lock_file_path(Some(&id.to_string())) {
            Some(path) => Some(LockFile::acquire(path, self.lock_wait).await?),
            None => None,
        };
        debug!("locked certificate authority {}", id);
        Ok(RowLock {
            _guard: guard,
            _file: file,
        })
    }

    /// Reloads the document so changes of other processes become visible.
    async fn refresh(&self) -> Result<(), StoreError> {
        if let Some(path) = &self.inner.path {
            let mut state = self.inner.state.write().await;
            *state = read_state(path)?;
        }
        Ok(())
    }

    async fn active_authority(&self) -> Option<CertificateAuthority> {
        self.inner.state.read().await.active_authority().cloned()
    }

    /// Applies `change` to the latest document and writes the result.
    ///
    /// Nothing is written and the in-memory copy stays untouched if `change` fails.
    async fn apply<T, F>(&self, change: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(&mut StoreState) -> Result<T, StoreError> + Send,
    {
        let mut state = self.inner.state.write().await;
        let _document_lock = match self.lock_file_path(None) {
            Some(path) => Some(LockFile::acquire(path, self.lock_wait).await?),
            None => None,
        };
        let mut next = match &self.inner.path {
            Some(path) => read_state(path)?,
            None => state.clone(),
        };
        let result = change(&mut next)?;
        self.write_state(&next)?;
        *state = next;
        Ok(result)
    }

    fn write_state(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.inner.path else {
            return Ok(());
        };
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, state)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Transaction of a [`FileStore`].
#[derive(Debug)]
pub struct FileTransaction {
    store: FileStore,
    locked: Option<(CaId, RowLock)>,
    authority_update: Option<CertificateAuthority>,
    certificates: Vec<IssuedCertificate>,
    committed: bool,
}

impl FileTransaction {
    fn check_locked(&self, id: &CaId) -> Result<(), StoreError> {
        match &self.locked {
            Some((locked, _)) if locked == id => Ok(()),
            _ => Err(StoreError::NotLocked(id.clone())),
        }
    }
}

#[async_trait]
impl StoreTransaction for FileTransaction {
    async fn get_active(&mut self) -> Result<CertificateAuthority, StoreError> {
        if let Some((id, _)) = &self.locked {
            if let Some(update) = &self.authority_update {
                return Ok(update.clone());
            }
            let state = self.store.inner.state.read().await;
            return state
                .authorities
                .iter()
                .find(|ca| ca.id() == id)
                .cloned()
                .ok_or_else(|| StoreError::UnknownAuthority(id.clone()));
        }

        loop {
            self.store.refresh().await?;
            let candidate = self
                .store
                .active_authority()
                .await
                .ok_or(StoreError::NoActiveAuthority)?;
            let row = self.store.lock_row(candidate.id()).await?;

            // the selection may have changed while waiting for the lock
            self.store.refresh().await?;
            match self.store.active_authority().await {
                Some(active) if active.id() == candidate.id() => {
                    self.locked = Some((active.id().clone(), row));
                    return Ok(active);
                }
                Some(_) => debug!(
                    "active authority changed while waiting for {}, retrying",
                    candidate.id()
                ),
                None => return Err(StoreError::NoActiveAuthority),
            }
        }
    }

    fn persist(&mut self, authority: &CertificateAuthority) -> Result<(), StoreError> {
        self.check_locked(authority.id())?;
        self.authority_update = Some(authority.clone());
        Ok(())
    }

    fn insert_certificate(&mut self, certificate: &IssuedCertificate) -> Result<(), StoreError> {
        self.check_locked(certificate.authority())?;
        self.certificates.push(certificate.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let authority_update = self.authority_update.take();
        let certificates = std::mem::take(&mut self.certificates);
        if authority_update.is_none() && certificates.is_empty() {
            self.committed = true;
            return Ok(());
        }

        self.store
            .apply(|state| {
                if let Some(update) = &authority_update {
                    let current = state
                        .authority_mut(update.id())
                        .ok_or_else(|| StoreError::UnknownAuthority(update.id().clone()))?;
                    if update.last_issued_serial_number() < current.last_issued_serial_number() {
                        return Err(StoreError::SerialRegression {
                            authority: update.id().clone(),
                            current: current.last_issued_serial_number(),
                            requested: update.last_issued_serial_number(),
                        });
                    }
                    *current = update.clone();
                }

                for certificate in &certificates {
                    let authority = certificate.authority();
                    let serial = certificate.serial_number();
                    let counter = state
                        .authorities
                        .iter()
                        .find(|ca| ca.id() == authority)
                        .map(|ca| ca.last_issued_serial_number())
                        .ok_or_else(|| StoreError::UnknownAuthority(authority.clone()))?;
                    // a certificate is only stored together with the counter advance covering it
                    if serial > counter {
                        return Err(StoreError::SerialRegression {
                            authority: authority.clone(),
                            current: counter,
                            requested: serial,
                        });
                    }
                    if state
                        .certificates
                        .iter()
                        .any(|c| c.authority() == authority && c.serial_number() == serial)
                    {
                        return Err(StoreError::DuplicateSerial {
                            authority: authority.clone(),
                            serial,
                        });
                    }
                    state.certificates.push(certificate.clone());
                }
                Ok(())
            })
            .await?;

        self.committed = true;
        debug!("committed transaction");
        Ok(())
    }
}

impl Drop for FileTransaction {
    fn drop(&mut self) {
        if !self.committed && (self.authority_update.is_some() || !self.certificates.is_empty()) {
            debug!(
                "rolling back transaction with {} staged certificate(s)",
                self.certificates.len()
            );
        }
    }
}

#[async_trait]
impl CertificateAuthorityStore for FileStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(FileTransaction {
            store: self.clone(),
            locked: None,
            authority_update: None,
            certificates: Vec::new(),
            committed: false,
        }))
    }

    async fn create_authority(&self, authority: CertificateAuthority) -> Result<(), StoreError> {
        let id = authority.id().clone();
        self.apply(move |state| {
            if state.authorities.iter().any(|ca| ca.id() == authority.id()) {
                return Err(StoreError::DuplicateAuthority(authority.id().clone()));
            }
            state.authorities.push(authority);
            Ok(())
        })
        .await?;
        info!("created certificate authority {}", id);
        Ok(())
    }

    async fn authorities(&self) -> Result<Vec<CertificateAuthority>, StoreError> {
        self.refresh().await?;
        let mut authorities = self.inner.state.read().await.authorities.clone();
        authorities.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(authorities)
    }

    async fn revoke_authority(
        &self,
        id: &CaId,
        at: DateTime<Utc>,
    ) -> Result<CertificateAuthority, StoreError> {
        // wait for signers holding the row
        let _row = self.lock_row(id).await?;
        let revoked = self
            .apply(|state| {
                let authority = state
                    .authority_mut(id)
                    .ok_or_else(|| StoreError::UnknownAuthority(id.clone()))?;
                if !authority.revoke(at) {
                    return Err(StoreError::AlreadyRevoked(format!(
                        "certificate authority {}",
                        id
                    )));
                }
                Ok(authority.clone())
            })
            .await?;
        info!("revoked certificate authority {}", id);
        Ok(revoked)
    }

    async fn certificates(
        &self,
        filter: CertificateFilter,
    ) -> Result<Vec<IssuedCertificate>, StoreError> {
        self.refresh().await?;
        let mut certificates: Vec<IssuedCertificate> = self
            .inner
            .state
            .read()
            .await
            .certificates
            .iter()
            .filter(|certificate| filter.matches(certificate))
            .cloned()
            .collect();
        certificates.sort_by(|a, b| b.issued_at().cmp(&a.issued_at()));
        Ok(certificates)
    }

    async fn revoke_certificate(
        &self,
        authority: &CaId,
        serial: u64,
        at: DateTime<Utc>,
    ) -> Result<IssuedCertificate, StoreError> {
        let revoked = self
            .apply(|state| {
                let certificate = state
                    .certificates
                    .iter_mut()
                    .find(|c| c.authority() == authority && c.serial_number() == serial)
                    .ok_or_else(|| StoreError::UnknownCertificate {
                        authority: authority.clone(),
                        serial,
                    })?;
                if !certificate.revoke(at) {
                    return Err(StoreError::AlreadyRevoked(format!(
                        "certificate {} of {}",
                        serial, authority
                    )));
                }
                Ok(certificate.clone())
            })
            .await?;
        info!("revoked certificate {} of {}", serial, authority);
        Ok(revoked)
    }
}
