//! Owned raw descriptor shared by the OS-backed resources.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// File descriptor closed exactly once, either by [`close`](Self::close) or
/// on drop.
#[derive(Debug)]
pub(crate) struct OwnedDevice {
    fd: RawFd,
}

impl OwnedDevice {
    /// Wrap the result of `open(2)`/`socket(2)`.
    pub fn from_raw(fd: RawFd) -> io::Result<Self> {
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(self.fd, buf.as_ptr() as *const _, buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    pub fn close(self) -> io::Result<()> {
        let fd = self.fd;
        std::mem::forget(self);
        if unsafe { libc::close(fd) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for OwnedDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for OwnedDevice {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
