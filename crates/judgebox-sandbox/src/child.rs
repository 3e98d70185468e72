//! Child-side bootstrap between `clone` and `execve`.
//!
//! Runs on the cloned child's stack inside the new PID namespace. The
//! ordering is load-bearing:
//!
//! 1. open the input/output files - they are host paths, so this must
//!    happen before the jail is entered
//! 2. wire them to stdin/stdout
//! 3. signal *ready*, then block on *release* - resource limits land in
//!    the parent during this window
//! 4. open the whitelist - may also live outside the jail
//! 5. `chdir` + `chroot` into the jail
//! 6. drop gid, then uid - once uid is unprivileged, `setgid` would fail
//! 7. compile and install the seccomp whitelist
//! 8. `execve` the submission
//!
//! Any failure prints a diagnostic to stderr and exits with the
//! setup-failure sentinel. The child never cleans up cgroups or channel
//! fds; the parent owns that, keyed off the exit status.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Write as _};
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;

use rustix::io::Errno;
use thiserror::Error;

use judgebox_sys::last_errno;

use crate::channel::{self, Rendezvous};
use crate::filter::{self, FilterError};
use crate::outcome::SETUP_FAILURE_STATUS;
use crate::plan::{Plan, PlanError};

/// Immutable parameter block the parent prepares before `clone`. The
/// child reads it from its copy-on-write view of the parent's memory and
/// never touches it after `execve`.
#[derive(Debug)]
pub(crate) struct ChildPayload {
    exe: CString,
    jail: CString,
    input: CString,
    output: CString,
    whitelist: CString,
    uid: libc::uid_t,
    gid: libc::gid_t,
    ready_fd: RawFd,
    release_fd: RawFd,
}

impl ChildPayload {
    pub(crate) fn new(plan: &Plan, channel: &Rendezvous) -> Result<Self, PlanError> {
        Ok(Self {
            exe: path_cstring(plan.exe.as_os_str().as_bytes(), "executable")?,
            jail: path_cstring(plan.jail.as_os_str().as_bytes(), "jail")?,
            input: path_cstring(plan.input.as_os_str().as_bytes(), "input")?,
            output: path_cstring(plan.output.as_os_str().as_bytes(), "output")?,
            whitelist: path_cstring(plan.whitelist.as_os_str().as_bytes(), "whitelist")?,
            uid: plan.uid,
            gid: plan.gid,
            ready_fd: channel.ready_fd(),
            release_fd: channel.release_fd(),
        })
    }
}

fn path_cstring(bytes: &[u8], what: &'static str) -> Result<CString, PlanError> {
    CString::new(bytes).map_err(|_| PlanError::NulInPath(what))
}

#[derive(Debug, Error)]
enum ChildError {
    #[error("open input: {0}")]
    OpenInput(Errno),

    #[error("open output: {0}")]
    OpenOutput(Errno),

    #[error("dup2: {0}")]
    Dup2(Errno),

    #[error("close: {0}")]
    Close(Errno),

    #[error("ready signal: {0}")]
    Ready(Errno),

    #[error("release wait: {0}")]
    Release(Errno),

    #[error("open whitelist: {0}")]
    OpenWhitelist(Errno),

    #[error("chdir into jail: {0}")]
    Chdir(Errno),

    #[error("chroot: {0}")]
    Chroot(Errno),

    #[error("setgid: {0}")]
    Setgid(Errno),

    #[error("setuid: {0}")]
    Setuid(Errno),

    #[error("syscall filter: {0}")]
    Filter(#[from] FilterError),

    #[error("execve: {0}")]
    Exec(Errno),
}

/// Entry point passed to `clone(2)`.
pub(crate) extern "C" fn child_trampoline(arg: *mut libc::c_void) -> libc::c_int {
    // SAFETY: the parent passes a ChildPayload it keeps alive across the
    // clone call; without CLONE_VM the child owns a private copy.
    let payload = unsafe { &*(arg as *const ChildPayload) };
    match bootstrap(payload) {
        Ok(never) => match never {},
        Err(err) => {
            let _ = writeln!(io::stderr(), "sandbox child: {err}");
            SETUP_FAILURE_STATUS
        }
    }
}

fn bootstrap(cp: &ChildPayload) -> Result<Infallible, ChildError> {
    // Host-view opens come first; after chroot these paths are gone.
    let input = unsafe { libc::open(cp.input.as_ptr(), libc::O_RDONLY) };
    if input < 0 {
        return Err(ChildError::OpenInput(last_errno()));
    }
    let output = unsafe {
        libc::open(
            cp.output.as_ptr(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            0o600 as libc::mode_t,
        )
    };
    if output < 0 {
        return Err(ChildError::OpenOutput(last_errno()));
    }

    // The submission talks to the judge through fds 0 and 1 only.
    if unsafe { libc::dup2(input, libc::STDIN_FILENO) } < 0 {
        return Err(ChildError::Dup2(last_errno()));
    }
    if unsafe { libc::dup2(output, libc::STDOUT_FILENO) } < 0 {
        return Err(ChildError::Dup2(last_errno()));
    }
    if unsafe { libc::close(input) } < 0 {
        return Err(ChildError::Close(last_errno()));
    }
    if unsafe { libc::close(output) } < 0 {
        return Err(ChildError::Close(last_errno()));
    }

    // Rendezvous: announce readiness, then block until the parent has
    // installed cgroups and armed the terminator.
    channel::signal_raw(cp.ready_fd).map_err(ChildError::Ready)?;
    channel::wait_raw(cp.release_fd).map_err(ChildError::Release)?;
    if unsafe { libc::close(cp.release_fd) } < 0 {
        return Err(ChildError::Close(last_errno()));
    }
    if unsafe { libc::close(cp.ready_fd) } < 0 {
        return Err(ChildError::Close(last_errno()));
    }

    // The whitelist may live outside the jail, so grab the fd now.
    let whitelist_fd = unsafe {
        libc::open(
            cp.whitelist.as_ptr(),
            libc::O_RDONLY | libc::O_CLOEXEC,
        )
    };
    if whitelist_fd < 0 {
        return Err(ChildError::OpenWhitelist(last_errno()));
    }

    // Enter the jail.
    if unsafe { libc::chdir(cp.jail.as_ptr()) } < 0 {
        return Err(ChildError::Chdir(last_errno()));
    }
    if unsafe { libc::chroot(b".\0".as_ptr().cast()) } < 0 {
        return Err(ChildError::Chroot(last_errno()));
    }

    // Drop privileges. The uid/gid persist across execve and are
    // inherited by anything the submission spawns. gid must go first:
    // once uid is unprivileged, setgid would fail.
    if unsafe { libc::setgid(cp.gid) } < 0 {
        return Err(ChildError::Setgid(last_errno()));
    }
    if unsafe { libc::setuid(cp.uid) } < 0 {
        return Err(ChildError::Setuid(last_errno()));
    }

    // Syscalls outside the whitelist kill the process from here on.
    // SAFETY: whitelist_fd is a live fd we own; File takes it over.
    let whitelist = unsafe { File::from_raw_fd(whitelist_fd) };
    filter::install_from(whitelist)?;

    let argv = [cp.exe.as_ptr(), std::ptr::null()];
    unsafe { libc::execv(cp.exe.as_ptr(), argv.as_ptr()) };
    Err(ChildError::Exec(last_errno()))
}
