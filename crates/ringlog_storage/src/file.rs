//! File-based storage backend over a preallocated file.

use crate::aligned::AlignedBuf;
use crate::backend::{check_bounds, IoMode, StorageBackend};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A file-based storage backend.
///
/// The file is preallocated to the journal capacity by
/// [`StorageBackend::allocate`] and then written in place at arbitrary
/// offsets.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_data()` to ensure data is on disk
///
/// # Direct I/O
///
/// With [`IoMode::Direct`] every request must be aligned (see
/// [`IoMode::check`]). On Linux the file is opened with
/// `O_DIRECT | O_DSYNC`. Some filesystems (tmpfs, for one) refuse
/// `O_DIRECT`; the backend then logs a warning and falls back to page-cache
/// I/O while still enforcing the alignment contract.
///
/// # Exclusivity
///
/// The backend holds an exclusive advisory lock on the file for its whole
/// lifetime. A second `open` of the same path fails with
/// [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use ringlog_storage::{FileBackend, IoMode, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("journal.bin"), IoMode::Buffered).unwrap();
/// backend.allocate(64 * 1024 * 1024).unwrap();
/// backend.write_at(4096, b"persistent data").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    capacity: u64,
    mode: IoMode,
    os_direct: bool,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// The capacity of an existing file is its current length.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created, or if
    /// another owner holds its lock.
    pub fn open(path: &Path, mode: IoMode) -> StorageResult<Self> {
        let (file, os_direct) = open_file(path, mode)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let capacity = file.metadata()?.len();
        debug!(path = %path.display(), capacity, ?mode, os_direct, "opened backing file");

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            capacity,
            mode,
            os_direct,
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path, mode: IoMode) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path, mode)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the operating system accepted `O_DIRECT`.
    #[must_use]
    pub fn is_os_direct(&self) -> bool {
        self.os_direct
    }
}

#[cfg(target_os = "linux")]
fn open_file(path: &Path, mode: IoMode) -> StorageResult<(File, bool)> {
    use std::os::unix::fs::OpenOptionsExt;

    if mode.is_direct() {
        let direct = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .custom_flags(libc::O_DIRECT | libc::O_DSYNC)
            .open(path);
        match direct {
            Ok(file) => return Ok((file, true)),
            Err(err) if err.raw_os_error() == Some(libc::EINVAL) => {
                warn!(
                    path = %path.display(),
                    "filesystem does not support O_DIRECT, using buffered I/O"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok((open_buffered(path)?, false))
}

#[cfg(not(target_os = "linux"))]
fn open_file(path: &Path, mode: IoMode) -> StorageResult<(File, bool)> {
    if mode.is_direct() {
        warn!(
            path = %path.display(),
            "direct I/O is only wired up on Linux, using buffered I/O"
        );
    }
    Ok((open_buffered(path)?, false))
}

fn open_buffered(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

impl StorageBackend for FileBackend {
    fn allocate(&mut self, capacity: u64) -> StorageResult<()> {
        if capacity < self.capacity {
            return Err(StorageError::CapacityShrink {
                current: self.capacity,
                requested: capacity,
            });
        }
        let file = self.file.lock();
        if capacity > self.capacity {
            file.set_len(capacity)?;
            file.sync_all()?;
        }
        self.capacity = capacity;
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        if self.capacity == 0 {
            return Err(StorageError::NotAllocated);
        }
        self.mode.check(offset, len, std::ptr::null())?;
        check_bounds(offset, len, self.capacity)?;

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        if self.mode.is_direct() {
            let mut buf = AlignedBuf::zeroed(len, self.mode.alignment());
            file.read_exact(buf.as_mut_slice())?;
            Ok(buf.as_slice().to_vec())
        } else {
            let mut buffer = vec![0u8; len];
            file.read_exact(&mut buffer)?;
            Ok(buffer)
        }
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if self.capacity == 0 {
            return Err(StorageError::NotAllocated);
        }
        self.mode.check(offset, data.len(), data.as_ptr())?;
        check_bounds(offset, data.len(), self.capacity)?;

        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn io_mode(&self) -> IoMode {
        self.mode
    }
}
