//! Cgroup-v1 controller directories for a sandboxed child.
//!
//! For each run, a directory named after the child pid is created under
//! each controller root (memory, pids, cpuacct), caps are written, and the
//! pid is attached via the `tasks` file. After the child is reaped the
//! driver probes the controllers for breaches (`memory.oom_control`,
//! `pids.events`) and then removes the directories.
//!
//! cpuacct carries no cap; membership is what makes the kernel account the
//! child's CPU time where the judge can read it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::outcome::ExceededCause;
use crate::plan::Limits;

/// Controller roots under which per-pid directories are created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupSet {
    pub memory: PathBuf,
    pub pids: PathBuf,
    pub cpuacct: PathBuf,
}

impl Default for CgroupSet {
    fn default() -> Self {
        Self {
            memory: "/sys/fs/cgroup/memory".into(),
            pids: "/sys/fs/cgroup/pids".into(),
            cpuacct: "/sys/fs/cgroup/cpuacct".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CgroupError {
    #[error("create {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("remove {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

/// The per-pid controller directories of one run.
#[derive(Debug)]
pub struct PidCgroups {
    memory: PathBuf,
    pids: PathBuf,
    cpuacct: PathBuf,
}

impl CgroupSet {
    /// Creates the per-pid directories and writes the caps. On failure,
    /// directories created so far are removed before the error is
    /// returned.
    pub fn create_for(&self, pid: libc::pid_t, limits: &Limits) -> Result<PidCgroups, CgroupError> {
        tracing::debug!(
            pid,
            memory = limits.memory_bytes,
            tasks = limits.max_tasks,
            "creating per-pid cgroups"
        );

        let groups = PidCgroups {
            memory: self.memory.join(pid.to_string()),
            pids: self.pids.join(pid.to_string()),
            cpuacct: self.cpuacct.join(pid.to_string()),
        };

        let result = (|| {
            for dir in groups.dirs() {
                fs::create_dir(dir).map_err(|source| CgroupError::Create {
                    path: dir.clone(),
                    source,
                })?;
            }
            write_value(
                &groups.memory.join("memory.limit_in_bytes"),
                limits.memory_bytes,
            )?;
            // With swap accounting enabled the memsw cap must match, or the
            // child can swap past the memory cap. The file is absent when
            // the kernel runs without swap accounting.
            let memsw = groups.memory.join("memory.memsw.limit_in_bytes");
            if memsw.exists() {
                write_value(&memsw, limits.memory_bytes)?;
            }
            write_value(&groups.pids.join("pids.max"), limits.max_tasks)?;
            Ok(())
        })();

        if let Err(err) = result {
            groups.remove_logged();
            return Err(err);
        }
        Ok(groups)
    }
}

impl PidCgroups {
    fn dirs(&self) -> [&PathBuf; 3] {
        [&self.memory, &self.pids, &self.cpuacct]
    }

    /// Places `pid` into all three controllers.
    pub fn attach(&self, pid: libc::pid_t) -> Result<(), CgroupError> {
        for dir in self.dirs() {
            write_value(&dir.join("tasks"), pid)?;
        }
        Ok(())
    }

    /// Looks for a breach after the child has died. The `oom_kill` count
    /// distinguishes a real kill from an allocation that merely brushed
    /// the cap and got reclaimed. Memory wins if both controllers report
    /// a breach.
    pub fn probe_breach(&self) -> Result<Option<ExceededCause>, CgroupError> {
        let oom = read_to_string(&self.memory.join("memory.oom_control"))?;
        if parse_event_field(&oom, "oom_kill") > 0 {
            return Ok(Some(ExceededCause::Memory));
        }
        let events = read_to_string(&self.pids.join("pids.events"))?;
        if parse_event_field(&events, "max") > 0 {
            return Ok(Some(ExceededCause::Tasks));
        }
        Ok(None)
    }

    /// Removes the per-pid directories. The kernel may briefly report
    /// EBUSY after the child is reaped, so each removal is retried a few
    /// times.
    pub fn remove(&self) -> Result<(), CgroupError> {
        let mut last: Option<CgroupError> = None;
        for dir in self.dirs() {
            match remove_with_retry(dir) {
                Ok(()) => {}
                Err(err) => last = Some(err),
            }
        }
        match last {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Best-effort removal on abort paths; failures are logged loudly
    /// because an orphaned cgroup directory leaks kernel state.
    pub fn remove_logged(&self) {
        if let Err(err) = self.remove() {
            tracing::error!(error = %err, "failed to remove per-pid cgroup directory");
        }
    }
}

fn write_value(path: &Path, value: impl ToString) -> Result<(), CgroupError> {
    fs::write(path, value.to_string()).map_err(|source| CgroupError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn read_to_string(path: &Path) -> Result<String, CgroupError> {
    fs::read_to_string(path).map_err(|source| CgroupError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn remove_with_retry(dir: &Path) -> Result<(), CgroupError> {
    const ATTEMPTS: u32 = 5;
    let mut attempt = 0;
    loop {
        match fs::remove_dir(dir) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                attempt += 1;
                if attempt >= ATTEMPTS {
                    return Err(CgroupError::Remove {
                        path: dir.to_path_buf(),
                        source: err,
                    });
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

/// Parses a `key value` events file such as `pids.events` or
/// `memory.oom_control` and returns the named field, or 0 when absent.
fn parse_event_field(content: &str, field: &str) -> u64 {
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        if parts.next() == Some(field) {
            return parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        }
    }
    0
}
