//! Parent-side sandbox driver.
//!
//! [`run`] is the public entry point: it creates the confined child,
//! installs resource limits while the child waits at the rendezvous,
//! releases it, reaps it, coordinates with the terminator, and classifies
//! the outcome. It is a pure function over the plan; every process and
//! cgroup side effect is keyed by the child pid it creates.
//!
//! ```text
//! START -> CLONED -> CHILD_READY -> LIMITS_SET -> CHILD_RELEASED -> REAPED -> CLASSIFIED
//!     \        \           \             \               \
//!      \->FAIL  \->FAIL     \->FAIL       \->FAIL         \->FAIL
//! ```
//!
//! Every failure transition sends SIGTERM to the child if it exists,
//! reaps it, removes any created cgroup directories, cancels an armed
//! terminator, and releases the channel fds and the child stack.

use std::io;
use std::sync::Arc;

use rustix::io::Errno;
use thiserror::Error;

use judgebox_sys::last_errno;

use crate::channel::Rendezvous;
use crate::child::{self, ChildPayload};
use crate::limits::{self, LimitError};
use crate::outcome::{self, ChildWait, ExceededCause, ExceededCell, Outcome};
use crate::plan::{Plan, PlanError};

/// Stack handed to `clone(2)`. Generous for the bootstrap code that runs
/// on it; the submission gets a fresh stack from `execve`.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Setup failure in the parent before the outcome could be classified.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("plan: {0}")]
    Plan(#[from] PlanError),

    #[error("seccomp is not available on this kernel")]
    SeccompUnavailable,

    #[error("rendezvous channel: {0}")]
    Channel(io::Error),

    #[error("clone: {0}")]
    Clone(Errno),

    #[error("child readiness: {0}")]
    Ready(io::Error),

    #[error("limit install: {0}")]
    Limits(#[from] LimitError),

    #[error("child release: {0}")]
    Release(io::Error),

    #[error("waitpid: {0}")]
    Wait(Errno),
}

/// Runs one submission under the sandbox and reports why it stopped.
///
/// Setup failures are logged with their cause and folded into
/// [`Outcome::Failure`]; the caller only ever sees the six-valued
/// outcome.
pub fn run(plan: &Plan) -> Outcome {
    match run_inner(plan) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(error = %err, "sandbox setup failed");
            Outcome::Failure
        }
    }
}

fn run_inner(plan: &Plan) -> Result<Outcome, DriverError> {
    plan.validate()?;

    // Preflight before any process exists: without seccomp the child
    // would fail mid-bootstrap, after the cgroups are already in place.
    if !judgebox_sys::seccomp::seccomp_available() {
        return Err(DriverError::SeccompUnavailable);
    }

    let channel = Rendezvous::new().map_err(DriverError::Channel)?;
    let payload = ChildPayload::new(plan, &channel)?;

    // clone(2) wants the top of the stack: it grows downward on every
    // architecture we run on.
    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let pid = unsafe {
        libc::clone(
            child::child_trampoline,
            stack.as_mut_ptr().add(stack.len()).cast(),
            libc::CLONE_NEWPID | libc::SIGCHLD,
            &payload as *const ChildPayload as *mut libc::c_void,
        )
    };
    if pid == -1 {
        return Err(DriverError::Clone(last_errno()));
    }
    tracing::debug!(pid, "child cloned into new pid namespace");

    // Rendezvous 1: the child has wired its stdio and is waiting for its
    // caps. A failed read means it died in early bootstrap.
    if let Err(err) = channel.await_ready() {
        kill_and_reap(pid);
        return Err(DriverError::Ready(err));
    }

    let exceeded = Arc::new(ExceededCell::new());
    let (cgroups, armed) = match limits::install(pid, &plan.limits, &plan.cgroups, &exceeded) {
        Ok(installed) => installed,
        Err(err) => {
            kill_and_reap(pid);
            return Err(err.into());
        }
    };

    // Rendezvous 2: limits are in place, let the child confine itself and
    // exec the submission.
    if let Err(err) = channel.release_child() {
        kill_and_reap(pid);
        armed.mark_reaped();
        armed.disarm();
        cgroups.remove_logged();
        return Err(DriverError::Release(err));
    }

    // No further rendezvous; closes both eventfds on the parent side.
    drop(channel);

    let wait = wait_child(pid);

    // The child is reaped (or waitpid failed and nothing more can be
    // signalled safely): tell the terminator, then cancel it or wait out
    // its cleanup.
    armed.mark_reaped();
    let fired = armed.fired();
    armed.disarm();

    let wait = match wait {
        Ok(wait) => wait,
        Err(errno) => {
            cgroups.remove_logged();
            return Err(DriverError::Wait(errno));
        }
    };

    // Attribute controller breaches before the directories go away. A
    // wall-clock cause recorded by the terminator wins; the cell is
    // set-once.
    if exceeded.get() == ExceededCause::None {
        match cgroups.probe_breach() {
            Ok(Some(cause)) => {
                exceeded.record(cause);
            }
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "breach probe failed"),
        }
    }
    cgroups.remove_logged();

    let cause = exceeded.get();
    let outcome = outcome::classify(wait, cause);
    tracing::info!(pid, ?wait, ?cause, fired, %outcome, "child reaped");
    Ok(outcome)
}

/// Blocking wait for the direct child.
fn wait_child(pid: libc::pid_t) -> Result<ChildWait, Errno> {
    let mut status: libc::c_int = 0;
    // SAFETY: pid is our direct child; status is a valid out-pointer.
    if unsafe { libc::waitpid(pid, &mut status, 0) } == -1 {
        return Err(last_errno());
    }
    if libc::WIFEXITED(status) {
        Ok(ChildWait::Exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        Ok(ChildWait::Signaled(libc::WTERMSIG(status)))
    } else {
        Ok(ChildWait::Unknown)
    }
}

/// Abort-path teardown: terminate the child and reap it so no zombie
/// outlives the invocation.
fn kill_and_reap(pid: libc::pid_t) {
    if unsafe { libc::kill(pid, libc::SIGTERM) } == -1 {
        tracing::error!(pid, errno = %last_errno(), "kill failed");
    }
    let mut status: libc::c_int = 0;
    if unsafe { libc::waitpid(pid, &mut status, 0) } == -1 {
        tracing::error!(pid, errno = %last_errno(), "reap failed");
    }
}
