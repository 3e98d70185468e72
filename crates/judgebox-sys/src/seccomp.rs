//! Seccomp-BPF syscall whitelisting.
//!
//! The sandbox confines the submitted program to an explicit whitelist of
//! syscalls. The BPF filter runs on every syscall:
//!
//! 1. Verify architecture is `x86_64` (kill otherwise)
//! 2. Load syscall number from `seccomp_data`
//! 3. Compare against the whitelist
//! 4. Allow if a match is found, kill the process otherwise
//!
//! A killed syscall delivers SIGSYS, so a submission that strays outside the
//! whitelist dies signalled and is classified as a runtime error by the
//! driver.
//!
//! ## Security Notes
//!
//! - Filter is permanent - cannot be removed once applied
//! - Requires `PR_SET_NO_NEW_PRIVS` first (the installer sets it)
//! - The filter applies to the calling thread and is inherited across
//!   `execve`, which is exactly when the untrusted program starts

use rustix::io::Errno;

use crate::last_errno;

// Seccomp constants
const SECCOMP_SET_MODE_FILTER: u32 = 1;
const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

// BPF instruction classes
const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;

// BPF ld/ldx fields
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;

// BPF alu/jmp fields
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;

const AUDIT_ARCH_X86_64: u32 = 0xc000_003e;

// seccomp_data offsets (x86_64)
const OFFSET_SYSCALL_NR: u32 = 0;
const OFFSET_ARCH: u32 = 4;

/// Maximum whitelist size (BPF jump offsets are u8).
pub const MAX_WHITELIST_SIZE: usize = 250;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    #[inline]
    pub const fn stmt(code: u16, k: u32) -> Self {
        Self {
            code,
            jt: 0,
            jf: 0,
            k,
        }
    }

    #[inline]
    pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SockFprog {
    pub len: u16,
    pub filter: *const SockFilter,
}

/// Builds the whitelist BPF program.
///
/// ## Filter Layout
///
/// ```text
/// [0-2]   Architecture check (x86_64)
/// [3]     Load syscall number
/// [4..N]  Whitelist checks -> ALLOW
/// [N+1]   RET KILL (default deny)
/// [N+2]   RET ALLOW
/// ```
///
/// # Panics
///
/// Panics if `syscalls.len()` > [`MAX_WHITELIST_SIZE`] (BPF jump offsets are
/// u8). Callers compiling untrusted whitelist files must check the size
/// first.
pub fn build_whitelist_filter(syscalls: &[i64]) -> Vec<SockFilter> {
    assert!(
        syscalls.len() <= MAX_WHITELIST_SIZE,
        "whitelist too large: {} > {} (BPF jump offset overflow)",
        syscalls.len(),
        MAX_WHITELIST_SIZE
    );

    let n = syscalls.len();
    let mut filter = Vec::with_capacity(n + 6);

    // === Architecture check ===
    filter.push(SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_ARCH));
    filter.push(SockFilter::jump(
        BPF_JMP | BPF_JEQ | BPF_K,
        AUDIT_ARCH_X86_64,
        1,
        0,
    ));
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS));

    // === Load syscall number ===
    filter.push(SockFilter::stmt(
        BPF_LD | BPF_W | BPF_ABS,
        OFFSET_SYSCALL_NR,
    ));

    // === Whitelist check ===
    for (i, &nr) in syscalls.iter().enumerate() {
        let allow_offset = (n - i) as u8;
        filter.push(SockFilter::jump(
            BPF_JMP | BPF_JEQ | BPF_K,
            nr as u32,
            allow_offset,
            0,
        ));
    }

    // === Default deny ===
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS));

    // === ALLOW ===
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));

    filter
}

/// Applies a seccomp-BPF filter to the current thread.
///
/// Sets `PR_SET_NO_NEW_PRIVS` first; without it the kernel refuses the
/// filter from an unprivileged process.
///
/// # Safety
///
/// This permanently restricts syscalls for this thread. The filter must be
/// valid.
///
/// # Errors
///
/// Returns `Errno` if the filter cannot be applied.
pub unsafe fn seccomp_set_mode_filter(fprog: &SockFprog) -> Result<(), Errno> {
    let ret = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if ret != 0 {
        return Err(last_errno());
    }

    let ret = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_SET_MODE_FILTER,
            0u32,
            fprog as *const _,
        )
    };
    if ret != 0 { Err(last_errno()) } else { Ok(()) }
}

/// Returns true if seccomp is available.
pub fn seccomp_available() -> bool {
    unsafe { libc::prctl(libc::PR_GET_SECCOMP, 0, 0, 0, 0) >= 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_structure() {
        let syscalls = &[libc::SYS_read, libc::SYS_write, libc::SYS_exit_group];
        let filter = build_whitelist_filter(syscalls);
        // 3 (arch) + 1 (load) + 3 (whitelist) + 2 (kill/allow)
        assert_eq!(filter.len(), 9);
    }

    #[test]
    fn arch_check_comes_first() {
        let filter = build_whitelist_filter(&[libc::SYS_exit_group]);
        assert_eq!(filter[0].code, BPF_LD | BPF_W | BPF_ABS);
        assert_eq!(filter[0].k, OFFSET_ARCH);
        assert_eq!(filter[1].k, AUDIT_ARCH_X86_64);
        assert_eq!(filter[2].k, SECCOMP_RET_KILL_PROCESS);
    }

    #[test]
    fn default_action_is_kill() {
        let syscalls = &[libc::SYS_read, libc::SYS_write];
        let filter = build_whitelist_filter(syscalls);
        let deny = &filter[filter.len() - 2];
        assert_eq!(deny.code, BPF_RET | BPF_K);
        assert_eq!(deny.k, SECCOMP_RET_KILL_PROCESS);
        let allow = &filter[filter.len() - 1];
        assert_eq!(allow.k, SECCOMP_RET_ALLOW);
    }

    #[test]
    fn whitelist_jumps_land_on_allow() {
        let syscalls = &[libc::SYS_read, libc::SYS_write, libc::SYS_exit_group];
        let filter = build_whitelist_filter(syscalls);
        let allow_index = filter.len() - 1;
        for (i, &nr) in syscalls.iter().enumerate() {
            let check = &filter[4 + i];
            assert_eq!(check.k, nr as u32);
            assert_eq!(4 + i + 1 + check.jt as usize, allow_index);
        }
    }

    #[test]
    fn empty_whitelist_denies_everything() {
        let filter = build_whitelist_filter(&[]);
        assert_eq!(filter.len(), 6);
        assert_eq!(filter[4].k, SECCOMP_RET_KILL_PROCESS);
    }

    #[test]
    #[should_panic(expected = "whitelist too large")]
    fn whitelist_overflow_panics() {
        let huge: Vec<i64> = (0..300).map(|i| i as i64).collect();
        build_whitelist_filter(&huge);
    }

    #[test]
    fn seccomp_is_available() {
        // Any kernel this sandbox targets has seccomp compiled in.
        assert!(seccomp_available());
    }
}
