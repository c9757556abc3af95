//! Brokered access to device files.
//!
//! Every device node the daemon reads is opened and closed through a
//! [`DeviceGate`]. The gate is handed to the device context when it is built,
//! so the backends never open device files on their own.

use std::fs::OpenOptions;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use log::error;

/// Opens and closes device files on behalf of the event sources.
pub trait DeviceGate: Clone + 'static {
    /// Open `path` with the `open(2)` `flags`.
    ///
    /// Returns the open handle, or the negated `errno` on failure. A failed
    /// open is never fatal here; the caller decides what to do with it.
    fn open(&mut self, path: &Path, flags: i32) -> Result<OwnedFd, i32>;

    /// Release a handle previously returned by [`DeviceGate::open`].
    fn close(&mut self, fd: OwnedFd);
}

/// A gate that opens device files with the privileges of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestrictedGate;

impl DeviceGate for RestrictedGate {
    fn open(&mut self, path: &Path, flags: i32) -> Result<OwnedFd, i32> {
        let access = flags & libc::O_ACCMODE;

        OpenOptions::new()
            .read(access == libc::O_RDONLY || access == libc::O_RDWR)
            .write(access == libc::O_WRONLY || access == libc::O_RDWR)
            .custom_flags(flags & !libc::O_ACCMODE)
            .open(path)
            .map(OwnedFd::from)
            .map_err(|e| {
                error!("Failed to open {} because of {}.", path.display(), e);
                -e.raw_os_error().unwrap_or(libc::EIO)
            })
    }

    fn close(&mut self, fd: OwnedFd) {
        drop(fd);
    }
}
