//! judgebox CLI - run one submission under the sandbox.
//!
//! Must run privileged: the driver needs `clone(CLONE_NEWPID)`, `chroot`,
//! `setuid`/`setgid`, seccomp installation, and cgroup filesystem writes.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use judgebox_sandbox::{run, CgroupSet, Limits, Outcome, Plan};

#[derive(Parser)]
#[command(name = "judgebox")]
#[command(author, version, about = "Run an untrusted contest submission under resource caps")]
struct Cli {
    /// Executable path inside the jail (after chroot), e.g. /prog
    #[arg(long)]
    exe: PathBuf,

    /// Jail root directory (host path)
    #[arg(long)]
    jail: PathBuf,

    /// File wired to the submission's stdin (host path)
    #[arg(long)]
    input: PathBuf,

    /// File wired to the submission's stdout (host path, created 0600)
    #[arg(long)]
    output: PathBuf,

    /// Syscall whitelist file, one name or number per line
    #[arg(long)]
    whitelist: PathBuf,

    /// Uid the submission runs as (must be non-zero)
    #[arg(long)]
    uid: u32,

    /// Gid the submission runs as (must be non-zero)
    #[arg(long)]
    gid: u32,

    /// Memory cap in bytes
    #[arg(long, default_value_t = 256 * 1024 * 1024)]
    memory_bytes: u64,

    /// Wall-clock budget in milliseconds
    #[arg(long, default_value_t = 10_000)]
    wall_ms: u64,

    /// Maximum processes/threads
    #[arg(long, default_value_t = 16)]
    max_tasks: u32,

    /// Memory controller root
    #[arg(long, default_value = "/sys/fs/cgroup/memory")]
    cgroup_memory: PathBuf,

    /// Pids controller root
    #[arg(long, default_value = "/sys/fs/cgroup/pids")]
    cgroup_pids: PathBuf,

    /// Cpuacct controller root
    #[arg(long, default_value = "/sys/fs/cgroup/cpuacct")]
    cgroup_cpuacct: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let plan = Plan::new(
        cli.exe,
        cli.jail,
        cli.input,
        cli.output,
        cli.whitelist,
        cli.uid,
        cli.gid,
    )
    .limits(Limits {
        memory_bytes: cli.memory_bytes,
        wall_ms: cli.wall_ms,
        max_tasks: cli.max_tasks,
    })
    .cgroups(CgroupSet {
        memory: cli.cgroup_memory,
        pids: cli.cgroup_pids,
        cpuacct: cli.cgroup_cpuacct,
    });

    let outcome = run(&plan);
    println!("{outcome}");
    if outcome == Outcome::Ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
