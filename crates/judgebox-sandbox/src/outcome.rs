//! Run outcomes and the shared limit-breach cell.
//!
//! [`ExceededCause`] records why a limit was breached. It starts as `None`
//! and is written at most once: by the terminator on wall-clock expiry, by
//! the limit installer on a fatal error, or by the driver when it finds a
//! memory/task breach in the controllers after reaping the child. The cell
//! is shared across threads, so writes go through a set-once atomic.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Exit status the child uses for any failure before `execve`.
///
/// Deliberately outside 0-125 so it stands apart from ordinary program
/// exits; a submission exiting 126 on purpose is indistinguishable, which
/// is the best an exit status can do.
pub const SETUP_FAILURE_STATUS: i32 = 126;

/// Why a resource limit was breached, or `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceededCause {
    None = 0,
    /// The limit installer itself failed.
    Fatal = 1,
    Memory = 2,
    WallClock = 3,
    Tasks = 4,
}

impl ExceededCause {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Fatal,
            2 => Self::Memory,
            3 => Self::WallClock,
            4 => Self::Tasks,
            _ => Self::None,
        }
    }
}

/// Set-once cell holding an [`ExceededCause`].
#[derive(Debug, Default)]
pub struct ExceededCell(AtomicU8);

impl ExceededCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ExceededCause::None as u8))
    }

    /// Records `cause` if nothing was recorded yet. Returns whether the
    /// write took effect.
    pub fn record(&self, cause: ExceededCause) -> bool {
        self.0
            .compare_exchange(
                ExceededCause::None as u8,
                cause as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn get(&self) -> ExceededCause {
        ExceededCause::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// How `waitpid` reported the child's death.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildWait {
    Exited(i32),
    Signaled(i32),
    /// Neither exited nor signaled. Should be impossible without
    /// `WUNTRACED`, classified as a failure.
    Unknown,
}

/// Result of one sandboxed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Normal exit within all limits.
    Ok,
    /// Signaled death with no limit breached (crash, or a syscall outside
    /// the whitelist).
    RuntimeError,
    MemoryExceeded,
    TimeExceeded,
    TaskExceeded,
    /// The sandbox itself failed; nothing can be said about the program.
    Failure,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::RuntimeError => "runtime-error",
            Self::MemoryExceeded => "memory-exceeded",
            Self::TimeExceeded => "time-exceeded",
            Self::TaskExceeded => "task-exceeded",
            Self::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// Maps a wait status and a breach cause to the outcome reported to the
/// caller. The setup-failure sentinel wins over everything: it means the
/// child never reached the submission.
pub(crate) fn classify(wait: ChildWait, cause: ExceededCause) -> Outcome {
    if wait == ChildWait::Exited(SETUP_FAILURE_STATUS) {
        return Outcome::Failure;
    }
    if wait == ChildWait::Unknown {
        return Outcome::Failure;
    }
    match cause {
        ExceededCause::None => match wait {
            ChildWait::Signaled(_) => Outcome::RuntimeError,
            _ => Outcome::Ok,
        },
        ExceededCause::Fatal => Outcome::Failure,
        ExceededCause::Memory => Outcome::MemoryExceeded,
        ExceededCause::WallClock => Outcome::TimeExceeded,
        ExceededCause::Tasks => Outcome::TaskExceeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_records_once() {
        let cell = ExceededCell::new();
        assert_eq!(cell.get(), ExceededCause::None);
        assert!(cell.record(ExceededCause::WallClock));
        assert!(!cell.record(ExceededCause::Memory));
        assert_eq!(cell.get(), ExceededCause::WallClock);
    }

    #[test]
    fn classify_clean_exit() {
        assert_eq!(
            classify(ChildWait::Exited(0), ExceededCause::None),
            Outcome::Ok
        );
        // Non-zero exits are still "ok" from the sandbox's point of view;
        // verdicts about the answer belong to the judge above us.
        assert_eq!(
            classify(ChildWait::Exited(1), ExceededCause::None),
            Outcome::Ok
        );
    }

    #[test]
    fn classify_signaled_without_breach_is_runtime_error() {
        assert_eq!(
            classify(ChildWait::Signaled(libc::SIGSEGV), ExceededCause::None),
            Outcome::RuntimeError
        );
        assert_eq!(
            classify(ChildWait::Signaled(libc::SIGSYS), ExceededCause::None),
            Outcome::RuntimeError
        );
    }

    #[test]
    fn classify_breaches() {
        assert_eq!(
            classify(ChildWait::Signaled(libc::SIGKILL), ExceededCause::WallClock),
            Outcome::TimeExceeded
        );
        assert_eq!(
            classify(ChildWait::Signaled(libc::SIGKILL), ExceededCause::Memory),
            Outcome::MemoryExceeded
        );
        // A task breach can surface even when the program then exits
        // normally: its forks failed, the pids counter still ticked.
        assert_eq!(
            classify(ChildWait::Exited(0), ExceededCause::Tasks),
            Outcome::TaskExceeded
        );
    }

    #[test]
    fn classify_setup_failure_sentinel() {
        assert_eq!(
            classify(ChildWait::Exited(SETUP_FAILURE_STATUS), ExceededCause::None),
            Outcome::Failure
        );
        // Sentinel wins even over a recorded breach.
        assert_eq!(
            classify(
                ChildWait::Exited(SETUP_FAILURE_STATUS),
                ExceededCause::WallClock
            ),
            Outcome::Failure
        );
    }

    #[test]
    fn classify_fatal_and_unknown() {
        assert_eq!(
            classify(ChildWait::Exited(0), ExceededCause::Fatal),
            Outcome::Failure
        );
        assert_eq!(
            classify(ChildWait::Unknown, ExceededCause::None),
            Outcome::Failure
        );
    }
}
