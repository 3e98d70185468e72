//! Common utilities for the driver scenario tests.
//!
//! The privileged scenarios need root, mounted cgroup-v1 controllers, and
//! a statically linked busybox to populate the jail with. Run them with
//! `cargo test -- --ignored` as root on a suitable host.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use judgebox_sandbox::{Limits, Plan};

/// Uid/gid the scenarios run submissions as.
pub const SANDBOX_UID: u32 = 65534; // nobody
pub const SANDBOX_GID: u32 = 65534; // nogroup

/// Whitelist generous enough for busybox shell scripts.
pub const SHELL_WHITELIST: &str = "\
# stdio
read
write
open
openat
close
fstat
stat
lstat
newfstatat
lseek
dup
dup2
dup3
pipe
pipe2
fcntl
ioctl
poll
ppoll
select
# memory
mmap
mprotect
munmap
brk
mremap
madvise
# signals
rt_sigaction
rt_sigprocmask
rt_sigreturn
sigaltstack
kill
tgkill
# processes
clone
fork
vfork
execve
exit
exit_group
wait4
getpid
getppid
gettid
getuid
getgid
geteuid
getegid
getpgrp
# filesystem
access
faccessat
getcwd
chdir
readlink
readlinkat
getdents64
umask
unlink
# misc
uname
arch_prctl
prctl
futex
set_tid_address
set_robust_list
get_robust_list
getrandom
clock_gettime
clock_nanosleep
nanosleep
sched_getaffinity
sysinfo
getrusage
prlimit64
rseq
";

/// Finds a statically linked busybox to seed the jail with.
pub fn find_busybox() -> Option<PathBuf> {
    ["/bin/busybox", "/sbin/busybox", "/usr/bin/busybox"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Lays out a jail: busybox at `/bin/busybox` with applet links, and the
/// given shell script as `/prog`.
pub fn setup_jail(root: &Path, script: &str) {
    let busybox = find_busybox().expect("static busybox required for jail scenarios");

    let bin = root.join("bin");
    fs::create_dir_all(&bin).unwrap();
    fs::copy(&busybox, bin.join("busybox")).unwrap();
    fs::set_permissions(bin.join("busybox"), fs::Permissions::from_mode(0o755)).unwrap();
    for applet in ["sh", "cat", "sleep", "true", "awk", "head", "yes"] {
        std::os::unix::fs::symlink("busybox", bin.join(applet)).unwrap();
    }

    let prog = root.join("prog");
    fs::write(&prog, script).unwrap();
    fs::set_permissions(&prog, fs::Permissions::from_mode(0o755)).unwrap();
}

/// A plan over a prepared scratch directory: jail under `root/jail`,
/// input/output/whitelist files beside it.
pub fn plan_for(root: &Path, script: &str, input: &str, limits: Limits) -> Plan {
    let jail = root.join("jail");
    fs::create_dir_all(&jail).unwrap();
    setup_jail(&jail, script);

    let input_path = root.join("input.txt");
    fs::write(&input_path, input).unwrap();
    let whitelist_path = root.join("whitelist.txt");
    fs::write(&whitelist_path, SHELL_WHITELIST).unwrap();

    Plan::new(
        "/prog",
        &jail,
        &input_path,
        root.join("output.txt"),
        &whitelist_path,
        SANDBOX_UID,
        SANDBOX_GID,
    )
    .limits(limits)
}

/// Snapshot of the numeric (per-pid) entries under the controller roots.
/// Taken before and after a run to assert the driver left nothing behind.
pub fn pid_dir_snapshot(plan: &Plan) -> Vec<String> {
    let mut entries = Vec::new();
    for root in [
        &plan.cgroups.memory,
        &plan.cgroups.pids,
        &plan.cgroups.cpuacct,
    ] {
        if let Ok(dir) = fs::read_dir(root) {
            for entry in dir.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.chars().all(|c| c.is_ascii_digit()) {
                    entries.push(format!("{}/{}", root.display(), name));
                }
            }
        }
    }
    entries.sort();
    entries
}
