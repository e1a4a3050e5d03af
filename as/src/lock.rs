//! Advisory file locks for single-writer task ownership

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

/// An exclusive advisory lock held on a named lock file.
///
/// The lock is released when the value is dropped. Two processes (or two
/// workers in one process) cannot hold the same named lock at once; the
/// loser gets `None` and is expected to skip the task.
pub struct StoreLock {
    name: String,
    path: PathBuf,
    file: File,
}

impl StoreLock {
    /// Try to acquire the lock named `name` under `lock_dir`.
    ///
    /// Returns `None` if another holder already has it.
    pub fn try_acquire(lock_dir: &Path, name: &str) -> std::io::Result<Option<Self>> {
        fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(format!("{}.lock", name));
        let file = OpenOptions::new().create(true).write(true).open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(name, "StoreLock::try_acquire: acquired");
                Ok(Some(Self {
                    name: name.to_string(),
                    path,
                    file,
                }))
            }
            Err(_) => {
                debug!(name, "StoreLock::try_acquire: busy");
                Ok(None)
            }
        }
    }

    /// The lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        debug!(name = %self.name, "StoreLock: released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_and_release() {
        let temp = tempdir().unwrap();

        let lock = StoreLock::try_acquire(temp.path(), "task-1").unwrap();
        assert!(lock.is_some());

        // Second acquire while held fails
        let second = StoreLock::try_acquire(temp.path(), "task-1").unwrap();
        assert!(second.is_none());

        // Released on drop, third acquire succeeds
        drop(lock);
        let third = StoreLock::try_acquire(temp.path(), "task-1").unwrap();
        assert!(third.is_some());
    }

    #[test]
    fn test_distinct_names_do_not_conflict() {
        let temp = tempdir().unwrap();

        let a = StoreLock::try_acquire(temp.path(), "task-a").unwrap();
        let b = StoreLock::try_acquire(temp.path(), "task-b").unwrap();

        assert!(a.is_some());
        assert!(b.is_some());
    }
}
