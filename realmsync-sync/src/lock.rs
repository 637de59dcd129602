//! Per-target mutual exclusion for reconciliation runs.
//!
//! At most one run may hold a target at a time. [`TargetLock::acquire`] waits
//! up to a patience window and then fails with [`LockError::Busy`]; a zero
//! patience fails immediately. Callers hold a [`LockGuard`], which releases
//! the target on drop so that every exit path (success, error, panic unwind)
//! gives the target back.
//!
//! - [`InProcessLock`]: threads of one process (mutex + condvar).
//! - [`FileLock`]: processes on one host, via an advisory lock on
//!   `<home>/.realmsync/locks/<target>.lock`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;
use realmsync_core::{config::realmsync_root, TargetName};

use crate::error::LockError;

const FILE_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub trait TargetLock: Send + Sync {
    fn acquire(&self, target: &TargetName, patience: Duration) -> Result<(), LockError>;

    /// Give the target back. A release without a matching acquire is a no-op.
    fn release(&self, target: &TargetName);
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Holds a target until dropped.
#[must_use = "the target is released as soon as the guard is dropped"]
pub struct LockGuard {
    lock: Arc<dyn TargetLock>,
    target: TargetName,
}

impl LockGuard {
    pub fn acquire(
        lock: Arc<dyn TargetLock>,
        target: &TargetName,
        patience: Duration,
    ) -> Result<Self, LockError> {
        lock.acquire(target, patience)?;
        tracing::debug!("lock acquired: {}", target);
        Ok(Self {
            lock,
            target: target.clone(),
        })
    }

    pub fn target(&self) -> &TargetName {
        &self.target
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release(&self.target);
        tracing::debug!("lock released: {}", self.target);
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// Lock table shared by the threads of one process.
#[derive(Debug, Default)]
pub struct InProcessLock {
    held: Mutex<HashMap<TargetName, ThreadId>>,
    freed: Condvar,
}

impl InProcessLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashMap<TargetName, ThreadId>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_held(&self, target: &TargetName) -> bool {
        self.held().contains_key(target)
    }
}

impl TargetLock for InProcessLock {
    fn acquire(&self, target: &TargetName, patience: Duration) -> Result<(), LockError> {
        let started = Instant::now();
        let deadline = started + patience;
        let mut held = self.held();
        while held.contains_key(target) {
            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Busy {
                    target: target.clone(),
                    waited: started.elapsed(),
                });
            }
            held = self
                .freed
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        held.insert(target.clone(), thread::current().id());
        Ok(())
    }

    fn release(&self, target: &TargetName) {
        let mut held = self.held();
        if held.get(target) == Some(&thread::current().id()) {
            held.remove(target);
            self.freed.notify_all();
        }
    }
}

// ---------------------------------------------------------------------------
// Lock files
// ---------------------------------------------------------------------------

/// Advisory `flock`-style locks on files below `<home>/.realmsync/locks/`.
///
/// The operating system drops the lock when the owning process exits, so a
/// file left behind by a crashed run never blocks the next one. Lock files
/// are kept on disk between runs.
#[derive(Debug)]
pub struct FileLock {
    dir: PathBuf,
    owned: Mutex<HashMap<TargetName, File>>,
}

/// `<home>/.realmsync/locks/<target>.lock`, target percent-encoded.
pub fn lock_path_at(home: &Path, target: &TargetName) -> PathBuf {
    realmsync_root(home)
        .join("locks")
        .join(target.file_name("lock"))
}

impl FileLock {
    pub fn new(home: &Path) -> Self {
        Self {
            dir: realmsync_root(home).join("locks"),
            owned: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, target: &TargetName) -> PathBuf {
        self.dir.join(target.file_name("lock"))
    }

    fn owned(&self) -> MutexGuard<'_, HashMap<TargetName, File>> {
        self.owned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Ok(None)` when another holder has the file locked.
    fn try_lock(path: &Path) -> Result<Option<File>, LockError> {
        let io = |source: std::io::Error| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(file)),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(io(e)),
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs4::lock_contended_error().raw_os_error()
}

impl TargetLock for FileLock {
    fn acquire(&self, target: &TargetName, patience: Duration) -> Result<(), LockError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| LockError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(target);
        let started = Instant::now();
        loop {
            if let Some(file) = Self::try_lock(&path)? {
                self.owned().insert(target.clone(), file);
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= patience {
                return Err(LockError::Busy {
                    target: target.clone(),
                    waited,
                });
            }
            thread::sleep(FILE_POLL_INTERVAL.min(patience - waited));
        }
    }

    fn release(&self, target: &TargetName) {
        let Some(file) = self.owned().remove(target) else {
            return;
        };
        if let Err(e) = FileExt::unlock(&file) {
            tracing::warn!(
                "could not unlock {}: {}",
                self.path_for(target).display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn acme() -> TargetName {
        TargetName::from("acme")
    }

    #[test]
    fn zero_patience_fails_fast_when_held() {
        let lock = InProcessLock::new();
        lock.acquire(&acme(), Duration::ZERO).unwrap();

        let lock = Arc::new(lock);
        let other = Arc::clone(&lock);
        let err = thread::spawn(move || other.acquire(&acme(), Duration::ZERO))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, LockError::Busy { .. }));
    }

    #[test]
    fn distinct_targets_do_not_contend() {
        let lock = InProcessLock::new();
        lock.acquire(&acme(), Duration::ZERO).unwrap();
        lock.acquire(&TargetName::from("globex"), Duration::ZERO)
            .unwrap();
    }

    #[test]
    fn waiter_gets_target_after_release() {
        let lock: Arc<dyn TargetLock> = Arc::new(InProcessLock::new());
        let guard = LockGuard::acquire(Arc::clone(&lock), &acme(), Duration::ZERO).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                tx.send(()).unwrap();
                lock.acquire(&acme(), Duration::from_secs(5))
            })
        };
        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        drop(guard);
        waiter.join().unwrap().expect("waiter should acquire after release");
    }

    #[test]
    fn patience_elapses_with_busy_error() {
        let lock = Arc::new(InProcessLock::new());
        lock.acquire(&acme(), Duration::ZERO).unwrap();
        let other = Arc::clone(&lock);
        let started = Instant::now();
        let err = thread::spawn(move || other.acquire(&acme(), Duration::from_millis(150)))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(150));
        match err {
            LockError::Busy { waited, .. } => assert!(waited >= Duration::from_millis(150)),
            other => panic!("expected Busy, got {other:?}"),
        }
    }

    #[test]
    fn release_without_acquire_is_noop() {
        let lock = InProcessLock::new();
        lock.release(&acme());
        assert!(!lock.is_held(&acme()));
    }

    #[test]
    fn non_owner_cannot_release() {
        let lock = Arc::new(InProcessLock::new());
        lock.acquire(&acme(), Duration::ZERO).unwrap();
        let other = Arc::clone(&lock);
        thread::spawn(move || other.release(&acme())).join().unwrap();
        assert!(lock.is_held(&acme()));
    }

    #[test]
    fn file_lock_excludes_other_holders_until_released() {
        let home = TempDir::new().unwrap();
        let lock: Arc<dyn TargetLock> = Arc::new(FileLock::new(home.path()));
        let path = lock_path_at(home.path(), &acme());
        let second = FileLock::new(home.path());
        {
            let _guard = LockGuard::acquire(Arc::clone(&lock), &acme(), Duration::ZERO).unwrap();
            assert!(path.exists());

            let err = second
                .acquire(&acme(), Duration::from_millis(120))
                .unwrap_err();
            assert!(matches!(err, LockError::Busy { .. }));
            second.release(&acme());
            assert!(
                second.acquire(&acme(), Duration::ZERO).is_err(),
                "a non-holder's release must not free the target"
            );
        }
        second
            .acquire(&acme(), Duration::ZERO)
            .expect("target is free once the guard is dropped");
        second.release(&acme());
    }

    #[test]
    fn leftover_lock_file_does_not_block() {
        let home = TempDir::new().unwrap();
        let path = lock_path_at(home.path(), &acme());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "999999\n").unwrap();

        let lock = FileLock::new(home.path());
        lock.acquire(&acme(), Duration::ZERO)
            .expect("an unlocked leftover file is free to take");
        lock.release(&acme());
    }

    #[test]
    fn file_lock_reentry_from_same_instance_is_busy() {
        let home = TempDir::new().unwrap();
        let lock = FileLock::new(home.path());
        lock.acquire(&acme(), Duration::ZERO).unwrap();
        assert!(matches!(
            lock.acquire(&acme(), Duration::ZERO),
            Err(LockError::Busy { .. })
        ));
        lock.release(&acme());
        lock.acquire(&acme(), Duration::ZERO).unwrap();
    }

    #[test]
    fn file_lock_paths_stay_inside_lock_dir() {
        let home = TempDir::new().unwrap();
        let target = TargetName::from("../../escaped");
        let path = lock_path_at(home.path(), &target);
        assert_eq!(
            path.parent(),
            Some(realmsync_root(home.path()).join("locks").as_path())
        );

        let lock = FileLock::new(home.path());
        lock.acquire(&target, Duration::ZERO).unwrap();
        assert!(path.exists());
        assert!(!home.path().join("escaped.lock").exists());
        lock.release(&target);
    }
}
