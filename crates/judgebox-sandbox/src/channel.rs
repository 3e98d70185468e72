//! Eventfd rendezvous between the supervisor and the cloned child.
//!
//! Two one-shot counters give the handshake unambiguous direction:
//!
//! - **ready**: child writes one token once its stdio is wired up; the
//!   parent blocks on it before installing resource limits.
//! - **release**: parent writes one token once limits are installed; the
//!   child blocks on it before entering the jail and exec'ing.
//!
//! Each token is the eventfd-native atomic 8-byte write/read; one write
//! unblocks exactly one reader. An eventfd never reports EOF, so the
//! parent bounds its wait with poll(2): a child that dies between
//! rendezvous points surfaces as a poll timeout, which the driver treats
//! as a crash in bootstrap.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use rustix::io::Errno;

use judgebox_sys::last_errno;

/// How long the parent waits for the child to reach the first rendezvous
/// point. Bootstrap up to that point is a handful of opens and dup2s.
const RENDEZVOUS_TIMEOUT_MS: libc::c_int = 5_000;

/// The rendezvous pair. Owned by the parent; the child gets the raw fds
/// through its payload (after `clone` without `CLONE_FILES` it holds its
/// own copies and closes them itself).
#[derive(Debug)]
pub struct Rendezvous {
    ready: OwnedFd,
    release: OwnedFd,
}

impl Rendezvous {
    pub fn new() -> io::Result<Self> {
        let ready = unsafe { libc::eventfd(0, 0) };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        let release = unsafe { libc::eventfd(0, 0) };
        if release < 0 {
            unsafe { libc::close(ready) };
            return Err(io::Error::last_os_error());
        }
        // SAFETY: On success, both fds are valid and unowned elsewhere.
        Ok(Self {
            ready: unsafe { OwnedFd::from_raw_fd(ready) },
            release: unsafe { OwnedFd::from_raw_fd(release) },
        })
    }

    #[inline]
    pub fn ready_fd(&self) -> RawFd {
        self.ready.as_raw_fd()
    }

    #[inline]
    pub fn release_fd(&self) -> RawFd {
        self.release.as_raw_fd()
    }

    /// Blocks until the child announces it is set up enough to take
    /// limits.
    ///
    /// The wait is bounded: the handshake happens before any untrusted
    /// code runs, so a child that misses the deadline died in bootstrap.
    pub fn await_ready(&self) -> io::Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.ready.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd is a valid pollfd for a live fd.
        let ret = unsafe { libc::poll(&mut pfd, 1, RENDEZVOUS_TIMEOUT_MS) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        if ret == 0 {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "child never signalled readiness",
            ));
        }
        wait_raw(self.ready.as_raw_fd()).map_err(into_io)
    }

    /// Releases the child to enter the jail and exec.
    pub fn release_child(&self) -> io::Result<()> {
        signal_raw(self.release.as_raw_fd()).map_err(into_io)
    }
}

fn into_io(errno: Errno) -> io::Error {
    io::Error::from_raw_os_error(errno.raw_os_error())
}

/// Writes one token. Used by the child on its raw copy of the fd.
pub(crate) fn signal_raw(fd: RawFd) -> Result<(), Errno> {
    let token: u64 = 1;
    // SAFETY: fd is a live eventfd; the write is exactly 8 bytes.
    let n = unsafe { libc::write(fd, (&token as *const u64).cast(), 8) };
    if n != 8 { Err(last_errno()) } else { Ok(()) }
}

/// Blocks for one token. Used by the child on its raw copy of the fd.
pub(crate) fn wait_raw(fd: RawFd) -> Result<(), Errno> {
    let mut token: u64 = 0;
    // SAFETY: fd is a live eventfd; the read is exactly 8 bytes.
    let n = unsafe { libc::read(fd, (&mut token as *mut u64).cast(), 8) };
    if n != 8 { Err(last_errno()) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let rv = Rendezvous::new().unwrap();
        signal_raw(rv.ready_fd()).unwrap();
        rv.await_ready().unwrap();
        rv.release_child().unwrap();
        wait_raw(rv.release_fd()).unwrap();
    }

    #[test]
    fn one_write_unblocks_one_read() {
        let rv = Rendezvous::new().unwrap();
        signal_raw(rv.ready_fd()).unwrap();
        signal_raw(rv.ready_fd()).unwrap();
        // eventfd(0, 0) read drains the whole counter in one 8-byte read.
        rv.await_ready().unwrap();
    }

    #[test]
    fn fds_are_distinct() {
        let rv = Rendezvous::new().unwrap();
        assert_ne!(rv.ready_fd(), rv.release_fd());
    }
}
