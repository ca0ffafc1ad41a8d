//! The receiver-side `FileWriter`: opens the destination file on `SEND`,
//! accepts out-of-order positioned writes from `PAKG`, and truncates to
//! the declared size on `VRFY`.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{PeerSyncError, Result};

/// At most one `FileWriter` exists per path at a time, owned by whichever
/// receiver worker is handling the connection that opened it.
pub struct FileWriter {
    path: PathBuf,
    file_size: u64,
    file: File,
}

impl FileWriter {
    /// Open (creating if necessary) `path` for positioned writes, creating
    /// any missing parent directories first -- the receiver's destination
    /// path is taken verbatim off the wire.
    pub fn create(path: &Path, file_size: u64) -> Result<FileWriter> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(PeerSyncError::LocalFilesystem)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(PeerSyncError::LocalFilesystem)?;

        Ok(FileWriter {
            path: path.to_path_buf(),
            file_size,
            file,
        })
    }

    /// Write `data` at absolute offset `position`. Blocks from the same
    /// file may arrive on different connections interleaved; because every
    /// `PAKG` carries an absolute position this is always safe.
    pub fn write_at(&mut self, position: u64, data: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(position))
            .map_err(PeerSyncError::LocalFilesystem)?;
        self.file.write_all(data).map_err(PeerSyncError::LocalFilesystem)
    }

    /// Truncate to the size declared by `SEND` and close. This establishes
    /// the exact final length even if the last `PAKG` rounded up to a
    /// read-buffer boundary.
    pub fn close(mut self) -> Result<()> {
        self.file.flush().map_err(PeerSyncError::LocalFilesystem)?;
        self.file
            .set_len(self.file_size)
            .map_err(PeerSyncError::LocalFilesystem)
    }

    /// The path this writer was opened against.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
