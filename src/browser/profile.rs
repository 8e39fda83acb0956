use crate::browser::chrome;
use crate::error::{PublishError, Result};
use log::{info, warn};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOCK_FILE_NAME: &str = "mp-publisher.lock";

/// An ownerless lock this young may still be getting its pid written.
const UNWRITTEN_LOCK_GRACE: Duration = Duration::from_secs(5);

/// Exclusive claim on a browser profile directory.
///
/// Held for the lifetime of a connection; the lock file is removed on
/// [`ProfileLock::release`] or drop, whichever comes first.
#[derive(Debug)]
pub struct ProfileLock {
    path: PathBuf,
    released: bool,
}

impl ProfileLock {
    pub fn acquire(profile_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(profile_dir).map_err(|e| {
            PublishError::Launch(format!(
                "profile directory {} is not writable: {}",
                profile_dir.display(),
                e
            ))
        })?;
        let path = profile_dir.join(LOCK_FILE_NAME);

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    info!("[Profile] locked {}", profile_dir.display());
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match lock_owner(&path) {
                        Some(pid) if pid != std::process::id() && chrome::is_pid_running(pid) => {
                            return Err(PublishError::ProfileBusy(profile_dir.to_path_buf()));
                        }
                        Some(pid) if pid == std::process::id() => {
                            return Err(PublishError::ProfileBusy(profile_dir.to_path_buf()));
                        }
                        None if is_recent(&path) => {
                            return Err(PublishError::ProfileBusy(profile_dir.to_path_buf()));
                        }
                        owner => {
                            warn!(
                                "[Profile] reclaiming stale lock {} owner={:?}",
                                path.display(),
                                owner
                            );
                            match std::fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                                Err(e) => return Err(e.into()),
                            }
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(PublishError::ProfileBusy(profile_dir.to_path_buf()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Remove the lock file. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("[Profile] failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock_owner(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_recent(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .map_or(false, |age| age < UNWRITTEN_LOCK_GRACE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = ProfileLock::acquire(dir.path()).unwrap();
        assert!(first.path().exists());

        match ProfileLock::acquire(dir.path()) {
            Err(PublishError::ProfileBusy(path)) => assert_eq!(path, dir.path()),
            other => panic!("expected ProfileBusy, got {:?}", other),
        }

        first.release();
        first.release();
        assert!(first.is_released());
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
        assert!(ProfileLock::acquire(dir.path()).is_ok());
    }

    fn age(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - by).unwrap();
    }

    #[test]
    fn stale_lock_from_unparseable_owner_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        std::fs::write(&path, "garbage").unwrap();
        age(&path, Duration::from_secs(60));
        let lock = ProfileLock::acquire(dir.path()).unwrap();
        drop(lock);
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn fresh_lock_without_a_pid_is_still_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        // Created by another publisher that has not written its pid yet.
        std::fs::write(&path, "").unwrap();

        assert!(matches!(
            ProfileLock::acquire(dir.path()),
            Err(PublishError::ProfileBusy(_))
        ));
        assert!(path.exists());

        age(&path, Duration::from_secs(60));
        assert!(ProfileLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn creates_missing_profile_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let _lock = ProfileLock::acquire(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
