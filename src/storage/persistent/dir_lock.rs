//! Single-owner guard for a store directory.
//!
//! `PersistentStore::open` takes an advisory OS lock on `dedupkit.lock`
//! inside the directory before it reads the snapshot or the WAL. A second
//! open of the same directory, from this process or another, fails fast with
//! `ErrorKind::WouldBlock` instead of waiting. The owner writes its process
//! id into the file so the failure can name who holds it.

use std::fs::{self, File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

/// Name of the lock file inside a store directory.
pub const LOCK_FILE: &str = "dedupkit.lock";

/// Held for as long as a store has its directory open.
#[derive(Debug)]
pub struct DirectoryLock {
    _file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Claims `dir` for the calling store.
    ///
    /// # Errors
    /// `ErrorKind::WouldBlock` naming the directory when another store owns
    /// it. Any other error comes from creating or writing the lock file.
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !try_lock_exclusive(&file)? {
            let holder = match Self::holder(dir) {
                Ok(Some(pid)) => format!(" (pid {pid})"),
                _ => String::new(),
            };
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("{} is locked by another store{holder}", dir.display()),
            ));
        }

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.sync_data()?;

        Ok(Self { _file: file, path })
    }

    /// Process id recorded by the current or last owner of `dir`, if any.
    ///
    /// # Errors
    /// I/O errors other than a missing lock file.
    pub fn holder(dir: &Path) -> IoResult<Option<u32>> {
        match fs::read_to_string(dir.join(LOCK_FILE)) {
            Ok(text) => Ok(text.trim().parse().ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Location of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `Ok(false)` when someone else holds the lock.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> IoResult<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK => Ok(false),
        _ => Err(err),
    }
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> IoResult<bool> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    // SAFETY: the handle belongs to `file`; `overlapped` is a plain C struct
    // that lives across the synchronous call.
    let ok = unsafe {
        let mut overlapped: OVERLAPPED = std::mem::zeroed();
        LockFileEx(
            file.as_raw_handle() as HANDLE,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if ok != 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    #[allow(clippy::cast_possible_wrap)]
    let contended = err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32);
    if contended {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(any(unix, windows)))]
fn try_lock_exclusive(_file: &File) -> IoResult<bool> {
    Err(IoError::new(
        ErrorKind::Unsupported,
        "directory locking is not available on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_file_lives_in_the_store_directory() {
        let dir = tempdir().unwrap();
        let lock = DirectoryLock::acquire(dir.path()).unwrap();
        assert_eq!(lock.path(), dir.path().join(LOCK_FILE));
        assert_eq!(DirectoryLock::holder(dir.path()).unwrap(), Some(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn second_owner_is_refused_with_the_directory_named() {
        let dir = tempdir().unwrap();
        let _owner = DirectoryLock::acquire(dir.path()).unwrap();

        let err = DirectoryLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        let msg = err.to_string();
        assert!(msg.contains(&dir.path().display().to_string()), "{msg}");
        assert!(msg.contains(&format!("pid {}", std::process::id())), "{msg}");
    }

    #[test]
    fn directory_can_be_claimed_again_after_release() {
        let dir = tempdir().unwrap();
        drop(DirectoryLock::acquire(dir.path()).unwrap());
        assert!(DirectoryLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempdir().unwrap();
        let err = DirectoryLock::acquire(&dir.path().join("absent")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn holder_is_none_before_first_open() {
        let dir = tempdir().unwrap();
        assert_eq!(DirectoryLock::holder(dir.path()).unwrap(), None);
    }
}
