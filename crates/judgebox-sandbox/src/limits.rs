//! Resource-limit installation for a freshly cloned child.
//!
//! Runs in the window between the child's *ready* token and the parent's
//! *release* token: the child exists but has not executed untrusted code
//! yet, so every cap lands before it can matter. On success the child sits
//! in capped memory/pids/cpuacct cgroups and a wall-clock terminator is
//! armed. On failure [`ExceededCause::Fatal`] is recorded and everything
//! created here is torn down; killing the child is the driver's job.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cgroup::{CgroupError, CgroupSet, PidCgroups};
use crate::outcome::{ExceededCause, ExceededCell};
use crate::plan::Limits;
use crate::terminator::{self, ArmedTerminator};

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("cgroup: {0}")]
    Cgroup(#[from] CgroupError),

    #[error("terminator spawn: {0}")]
    Spawn(io::Error),
}

/// Creates the per-pid controller directories with the configured caps,
/// attaches the child, and arms the wall-clock terminator.
pub fn install(
    pid: libc::pid_t,
    limits: &Limits,
    cgroups: &CgroupSet,
    exceeded: &Arc<ExceededCell>,
) -> Result<(PidCgroups, ArmedTerminator), LimitError> {
    match install_inner(pid, limits, cgroups, exceeded) {
        Ok(armed) => Ok(armed),
        Err(err) => {
            exceeded.record(ExceededCause::Fatal);
            Err(err)
        }
    }
}

fn install_inner(
    pid: libc::pid_t,
    limits: &Limits,
    cgroups: &CgroupSet,
    exceeded: &Arc<ExceededCell>,
) -> Result<(PidCgroups, ArmedTerminator), LimitError> {
    let groups = cgroups.create_for(pid, limits)?;

    if let Err(err) = groups.attach(pid) {
        groups.remove_logged();
        return Err(err.into());
    }

    let wall = Duration::from_millis(limits.wall_ms);
    match terminator::arm(pid, wall, Arc::clone(exceeded)) {
        Ok(armed) => {
            tracing::debug!(pid, wall_ms = limits.wall_ms, "resource limits installed");
            Ok((groups, armed))
        }
        Err(err) => {
            groups.remove_logged();
            Err(LimitError::Spawn(err))
        }
    }
}
