//! judgebox-sandbox: sandboxed execution of untrusted contest submissions.
//!
//! This crate runs one untrusted program under strict confinement and
//! reports why it stopped. It combines:
//!
//! - **PID namespace** - the child is cloned with `CLONE_NEWPID`
//! - **chroot jail** - the child sees only a pre-populated directory
//! - **Credential drop** - the child execs as a configured non-root uid/gid
//! - **Seccomp-BPF** - syscall whitelist compiled from a file
//! - **Cgroups** - memory and task caps, plus a wall-clock terminator
//!
//! ## Handshake
//!
//! The parent and child rendezvous twice over an eventfd pair so that
//! resource limits are always installed after the child exists but before
//! it runs untrusted code:
//!
//! 1. child wires its stdio to the input/output files, signals *ready*
//! 2. parent creates per-pid cgroups, writes caps, arms the terminator
//! 3. parent signals *release*
//! 4. child enters the jail, drops privileges, installs the syscall
//!    filter, and execs the submission
//! 5. parent waits, coordinates with the terminator, and classifies the
//!    exit into an [`Outcome`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use judgebox_sandbox::{run, Limits, Plan};
//!
//! let plan = Plan::new("/prog", "/srv/jail", "in.txt", "out.txt",
//!                      "whitelist.txt", 1000, 1000)
//!     .limits(Limits { memory_bytes: 64 << 20, wall_ms: 1000, max_tasks: 1 });
//! let outcome = run(&plan);
//! ```
//!
//! ## Requirements
//!
//! The supervisor must be privileged: `clone(CLONE_NEWPID)`, `chroot`,
//! `setuid`/`setgid`, seccomp installation, and cgroup filesystem writes.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod cgroup;
pub mod channel;
mod child;
pub mod driver;
pub mod filter;
pub mod limits;
pub mod outcome;
pub mod plan;
pub mod terminator;

pub use cgroup::CgroupSet;
pub use driver::{run, DriverError};
pub use outcome::{ExceededCause, Outcome};
pub use plan::{Limits, Plan, PlanError};
