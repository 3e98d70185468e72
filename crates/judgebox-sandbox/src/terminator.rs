//! Wall-clock terminator.
//!
//! A dedicated thread armed by the limit installer. When the wall-clock
//! budget elapses it SIGKILLs the child and records
//! [`ExceededCause::WallClock`]; if the parent reaps the child first it
//! cancels the thread instead. The shared state is a small machine:
//!
//! ```text
//! Armed ──cancel──> Cancelled
//!   │
//!   └──expiry──> FiredCleaning ──> FiredDone
//! ```
//!
//! The parent publishes `terminated` after `waitpid` so a terminator that
//! fires late does not signal a pid the kernel may have reused. Waiting
//! for a firing terminator to finish is a condvar wait, not a spin.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::outcome::{ExceededCause, ExceededCell};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Armed,
    FiredCleaning,
    FiredDone,
    Cancelled,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    terminated: AtomicBool,
}

/// Handle held by the driver for one armed terminator.
#[derive(Debug)]
pub struct ArmedTerminator {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    pid: libc::pid_t,
}

/// Arms a terminator for `pid` with the given wall-clock budget.
pub fn arm(
    pid: libc::pid_t,
    wall: Duration,
    exceeded: Arc<ExceededCell>,
) -> io::Result<ArmedTerminator> {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Armed),
        cond: Condvar::new(),
        terminated: AtomicBool::new(false),
    });

    let thread_shared = Arc::clone(&shared);
    let thread = thread::Builder::new()
        .name(format!("terminator-{pid}"))
        .spawn(move || watch(pid, wall, &thread_shared, &exceeded))?;

    Ok(ArmedTerminator {
        shared,
        thread: Some(thread),
        pid,
    })
}

fn watch(pid: libc::pid_t, wall: Duration, shared: &Shared, exceeded: &ExceededCell) {
    let deadline = Instant::now() + wall;

    let mut state = shared.state.lock().unwrap();
    loop {
        if *state == State::Cancelled {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let (guard, _) = shared.cond.wait_timeout(state, deadline - now).unwrap();
        state = guard;
    }

    // Fire. The kill and the cause are skipped when the parent already
    // reaped the child.
    *state = State::FiredCleaning;
    drop(state);

    if !shared.terminated.load(Ordering::Acquire) {
        // SAFETY: plain kill(2); a stale pid at worst hits a zombie the
        // parent has not reaped yet, guarded by the terminated flag.
        unsafe { libc::kill(pid, libc::SIGKILL) };
        exceeded.record(ExceededCause::WallClock);
        tracing::debug!(pid, "wall clock expired, child killed");
    }

    let mut state = shared.state.lock().unwrap();
    *state = State::FiredDone;
    shared.cond.notify_all();
}

impl ArmedTerminator {
    /// Tells the terminator the child has been reaped and must not be
    /// signalled. Called by the driver right after `waitpid` returns.
    pub fn mark_reaped(&self) {
        self.shared.terminated.store(true, Ordering::Release);
    }

    /// True once the wall clock fired (for outcome logging and tests).
    pub fn fired(&self) -> bool {
        matches!(
            *self.shared.state.lock().unwrap(),
            State::FiredCleaning | State::FiredDone
        )
    }

    /// Cancels the terminator, or waits for a fired one to finish
    /// cleaning up, then joins the thread.
    pub fn disarm(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        let mut state = self.shared.state.lock().unwrap();
        match *state {
            State::Armed => {
                *state = State::Cancelled;
                self.shared.cond.notify_all();
            }
            State::FiredCleaning => {
                while *state != State::FiredDone {
                    state = self.shared.cond.wait(state).unwrap();
                }
            }
            State::FiredDone | State::Cancelled => {}
        }
        drop(state);

        if thread.join().is_err() {
            tracing::error!(pid = self.pid, "terminator thread panicked");
        }
    }
}

impl Drop for ArmedTerminator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn cancel_before_fire() {
        let exceeded = Arc::new(ExceededCell::new());
        let t = arm(1, Duration::from_secs(3600), Arc::clone(&exceeded)).unwrap();
        assert!(!t.fired());
        let started = Instant::now();
        t.disarm();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(exceeded.get(), ExceededCause::None);
    }

    #[test]
    fn fire_kills_and_records_wall_clock() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sleep");
        let pid = child.id() as libc::pid_t;

        let exceeded = Arc::new(ExceededCell::new());
        let t = arm(pid, Duration::from_millis(50), Arc::clone(&exceeded)).unwrap();

        let status = child.wait().expect("wait");
        assert!(!status.success());
        t.mark_reaped();
        t.disarm();
        assert_eq!(exceeded.get(), ExceededCause::WallClock);
    }

    #[test]
    fn reaped_child_is_not_signalled() {
        let exceeded = Arc::new(ExceededCell::new());
        // Nonexistent pid; terminated is set before the budget elapses, so
        // the terminator must skip the kill and record nothing.
        let t = arm(
            libc::pid_t::MAX,
            Duration::from_millis(50),
            Arc::clone(&exceeded),
        )
        .unwrap();
        t.mark_reaped();
        thread::sleep(Duration::from_millis(150));
        assert!(t.fired());
        t.disarm();
        assert_eq!(exceeded.get(), ExceededCause::None);
    }
}
