/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

use crate::SetupError;
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

const FIFO_MODE: libc::mode_t = 0o660;

/// Remove whatever is at `path` and create a fresh named pipe there
pub fn create_fifo(path: &Path) -> Result<(), SetupError> {
    let pipe_error = |source: io::Error| SetupError::Pipe {
        path: path.to_path_buf(),
        source,
    };

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(pipe_error(e)),
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| pipe_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE) };
    if rc != 0 {
        return Err(pipe_error(io::Error::last_os_error()));
    }
    Ok(())
}

/// Open the read end without waiting for a writer
pub fn open_reader(path: &Path) -> Result<File, SetupError> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|source| SetupError::Pipe {
            path: path.to_path_buf(),
            source,
        })
}

/// Open the write end without blocking on a full pipe.
///
/// Fails with `ENXIO` while nobody holds the read end.
pub fn open_writer(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}
