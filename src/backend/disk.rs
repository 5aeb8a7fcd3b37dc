//! Local disk backend
//!
//! Positional reads and writes against one data file. A file opened
//! read-only still offers the writable view, but every mutation fails with
//! `PermissionDenied`, which the volume loader treats as a cue to recreate
//! an empty data file.

use crate::backend::{BackendStorageFile, FileStat, WritableBackendStorageFile};
use crate::common::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub struct DiskFile {
    file: File,
    path: PathBuf,
    writable: bool,
}

impl DiskFile {
    /// Open read-write, creating the file if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            writable: true,
        })
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            file,
            path,
            writable: false,
        })
    }

    /// Create or truncate to zero length, read-write.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            writable: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is opened read-only", self.path.display()),
            ))
        }
    }
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, offset)
}

#[async_trait]
impl BackendStorageFile for DiskFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut read = 0;
        while read < buf.len() {
            match pread(&self.file, &mut buf[read..], offset + read as u64) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(read)
    }

    async fn get_stat(&self) -> Result<FileStat> {
        let metadata = self.file.metadata()?;
        Ok(FileStat {
            size: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "disk"
    }

    fn as_writable(&self) -> Option<&dyn WritableBackendStorageFile> {
        Some(self)
    }
}

#[async_trait]
impl WritableBackendStorageFile for DiskFile {
    async fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.check_writable()?;
        let mut written = 0;
        while written < buf.len() {
            match pwrite(&self.file, &buf[written..], offset + written as u64) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write data").into())
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    async fn truncate(&self, size: u64) -> Result<()> {
        self.check_writable()?;
        self.file.set_len(size)?;
        Ok(())
    }

    async fn instantiate(&self, src: &Path) -> Result<()> {
        self.check_writable()?;
        let mut source = File::open(src)?;
        let mut target = &self.file;
        target.seek(SeekFrom::Start(0))?;
        let copied = io::copy(&mut source, &mut target)?;
        self.file.set_len(copied)?;
        tracing::info!(
            "instantiated {} from {} ({} bytes)",
            self.path.display(),
            src.display(),
            copied
        );
        Ok(())
    }
}

impl fmt::Display for DiskFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
