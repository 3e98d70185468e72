//! Low-level Linux syscall wrappers for the judgebox sandbox.
//!
//! This crate provides thin wrappers around the Linux-specific security
//! syscalls the sandbox driver needs but that are not covered by rustix or
//! libc directly. For standard syscalls, use rustix.
//!
//! ## Modules
//!
//! - **seccomp** - Seccomp-BPF whitelist filter construction and installation
//! - **syscalls** - x86-64 syscall-name lookup table for whitelist files
//!
//! ## Seccomp-BPF
//!
//! Seccomp-BPF allows filtering syscalls via BPF programs. This crate builds
//! a whitelist-based filter: syscalls on the list are allowed, everything
//! else kills the process with SIGSYS. The filter is permanent once applied
//! and requires `PR_SET_NO_NEW_PRIVS` first.
//!
//! # Safety
//!
//! This crate contains raw syscall wrappers. Casts between integer types
//! are unavoidable when interfacing with the kernel ABI.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod seccomp;
pub mod syscalls;

#[inline]
pub fn last_errno() -> rustix::io::Errno {
    // SAFETY: __errno_location always returns valid thread-local pointer.
    rustix::io::Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}
