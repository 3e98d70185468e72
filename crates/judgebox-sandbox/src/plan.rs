//! Sandbox run configuration.
//!
//! A [`Plan`] describes everything needed to judge one submission: where
//! the jail is, which program to exec inside it, which files become its
//! stdin/stdout, the syscall whitelist, the identity to run as, and the
//! resource caps.
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `limits.memory_bytes` | 256 MiB |
//! | `limits.wall_ms` | 10 000 ms |
//! | `limits.max_tasks` | 16 |
//! | `cgroups` | `/sys/fs/cgroup/{memory,pids,cpuacct}` |

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cgroup::CgroupSet;

/// Resource caps for one run. All strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Memory cap in bytes (`memory.limit_in_bytes`).
    pub memory_bytes: u64,
    /// Wall-clock budget in milliseconds.
    pub wall_ms: u64,
    /// Maximum processes/threads (`pids.max`).
    pub max_tasks: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024,
            wall_ms: 10_000,
            max_tasks: 16,
        }
    }
}

/// Invalid plan configuration.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("{0} path is empty")]
    EmptyPath(&'static str),

    #[error("{0} path is not absolute")]
    RelativePath(&'static str),

    #[error("{0} path contains a NUL byte")]
    NulInPath(&'static str),

    #[error("refusing to run the submission as root (uid and gid must be non-zero)")]
    RootIdentity,

    #[error("{0} limit must be strictly positive")]
    ZeroLimit(&'static str),
}

/// Everything needed for one sandboxed run.
///
/// The executable path is interpreted *after* `chroot`, so callers pass
/// e.g. `/prog` for a binary at `<jail>/prog`. Input and output paths are
/// host paths; the supervisor opens them before the child enters the
/// jail.
#[derive(Debug, Clone)]
pub struct Plan {
    pub exe: PathBuf,
    pub jail: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub whitelist: PathBuf,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub limits: Limits,
    pub cgroups: CgroupSet,
}

impl Plan {
    pub fn new(
        exe: impl Into<PathBuf>,
        jail: impl Into<PathBuf>,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        whitelist: impl Into<PathBuf>,
        uid: libc::uid_t,
        gid: libc::gid_t,
    ) -> Self {
        Self {
            exe: exe.into(),
            jail: jail.into(),
            input: input.into(),
            output: output.into(),
            whitelist: whitelist.into(),
            uid,
            gid,
            limits: Limits::default(),
            cgroups: CgroupSet::default(),
        }
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn cgroups(mut self, cgroups: CgroupSet) -> Self {
        self.cgroups = cgroups;
        self
    }

    /// Checks the invariants the driver relies on before any process is
    /// created.
    pub fn validate(&self) -> Result<(), PlanError> {
        check_path(&self.exe, "executable", true)?;
        check_path(&self.jail, "jail", true)?;
        check_path(&self.input, "input", false)?;
        check_path(&self.output, "output", false)?;
        check_path(&self.whitelist, "whitelist", false)?;
        if self.uid == 0 || self.gid == 0 {
            return Err(PlanError::RootIdentity);
        }
        if self.limits.memory_bytes == 0 {
            return Err(PlanError::ZeroLimit("memory"));
        }
        if self.limits.wall_ms == 0 {
            return Err(PlanError::ZeroLimit("wall-clock"));
        }
        if self.limits.max_tasks == 0 {
            return Err(PlanError::ZeroLimit("tasks"));
        }
        Ok(())
    }
}

fn check_path(path: &Path, what: &'static str, must_be_absolute: bool) -> Result<(), PlanError> {
    if path.as_os_str().is_empty() {
        return Err(PlanError::EmptyPath(what));
    }
    if must_be_absolute && !path.is_absolute() {
        return Err(PlanError::RelativePath(what));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        Plan::new(
            "/prog",
            "/srv/jail",
            "/tmp/in.txt",
            "/tmp/out.txt",
            "/etc/judgebox/whitelist",
            1000,
            1000,
        )
    }

    #[test]
    fn valid_plan_passes() {
        assert!(plan().validate().is_ok());
    }

    #[test]
    fn root_identity_rejected() {
        let mut p = plan();
        p.uid = 0;
        assert!(matches!(p.validate(), Err(PlanError::RootIdentity)));

        let mut p = plan();
        p.gid = 0;
        assert!(matches!(p.validate(), Err(PlanError::RootIdentity)));
    }

    #[test]
    fn zero_limits_rejected() {
        let p = plan().limits(Limits {
            memory_bytes: 0,
            ..Limits::default()
        });
        assert!(matches!(p.validate(), Err(PlanError::ZeroLimit("memory"))));

        let p = plan().limits(Limits {
            wall_ms: 0,
            ..Limits::default()
        });
        assert!(matches!(
            p.validate(),
            Err(PlanError::ZeroLimit("wall-clock"))
        ));

        let p = plan().limits(Limits {
            max_tasks: 0,
            ..Limits::default()
        });
        assert!(matches!(p.validate(), Err(PlanError::ZeroLimit("tasks"))));
    }

    #[test]
    fn relative_jail_rejected() {
        let mut p = plan();
        p.jail = "jail".into();
        assert!(matches!(p.validate(), Err(PlanError::RelativePath("jail"))));
    }

    #[test]
    fn empty_path_rejected() {
        let mut p = plan();
        p.input = "".into();
        assert!(matches!(p.validate(), Err(PlanError::EmptyPath("input"))));
    }
}
