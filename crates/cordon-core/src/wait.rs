//! Parent/child synchronization

use crate::{CordonError, Result};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

/// How often a bounded wait re-polls the child
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What the synchronizer observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The target was ourselves; nothing to wait for
    NoChild,
    /// The child exited, was killed, stopped or continued
    Changed(WaitStatus),
}

impl SyncOutcome {
    /// Exit status for the parent. The child's own exit status is reported
    /// but does not change it.
    #[must_use]
    pub const fn exit_status(&self) -> u8 {
        0
    }

    /// Human-readable line for the report
    #[must_use]
    pub fn describe(&self, parent: Pid) -> String {
        match self {
            Self::NoChild => format!("* no child to wait for {parent}"),
            Self::Changed(status) => {
                let child = status.pid().map_or_else(|| "?".to_string(), |p| p.to_string());
                format!("* child {child} {}, parent exiting {parent}", describe_status(status))
            }
        }
    }
}

fn describe_status(status: &WaitStatus) -> String {
    match status {
        WaitStatus::Exited(_, code) => format!("exited with status {code}"),
        WaitStatus::Signaled(_, signal, _) => format!("killed by {signal}"),
        WaitStatus::Stopped(_, signal) => format!("stopped by {signal}"),
        WaitStatus::Continued(_) => "continued".to_string(),
        other => format!("changed state ({other:?})"),
    }
}

/// Blocks the parent until its child changes state
#[derive(Debug, Clone, Copy, Default)]
pub struct Synchronizer {
    /// None blocks indefinitely
    timeout: Option<Duration>,
}

impl Synchronizer {
    #[must_use]
    pub const fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Wait for `child` to exit, stop or continue
    ///
    /// Returns immediately with `NoChild` when `child` is the caller.
    /// A failing wait (no such child, interrupted, timed out) is a `Wait`
    /// error; a child exiting non-zero is not.
    pub fn wait(&self, child: Pid) -> Result<SyncOutcome> {
        let me = nix::unistd::getpid();
        if child == me {
            tracing::debug!(pid = me.as_raw(), "no child to wait for");
            return Ok(SyncOutcome::NoChild);
        }

        tracing::debug!(child = child.as_raw(), timeout = ?self.timeout, "waiting for child");

        let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        let status = match self.timeout {
            None => waitpid(child, Some(flags)).map_err(|e| wait_error(me, child, e))?,
            Some(timeout) => poll_until(child, flags, timeout).map_err(|e| match e {
                CordonError::Nix(errno) => wait_error(me, child, errno),
                other => other,
            })?,
        };

        tracing::info!(child = child.as_raw(), ?status, "child changed state");
        Ok(SyncOutcome::Changed(status))
    }
}

fn wait_error(parent: Pid, child: Pid, errno: nix::Error) -> CordonError {
    CordonError::Wait(format!(
        "waitpid returned an error when parent {parent} waited for child {child}: {errno}"
    ))
}

fn poll_until(child: Pid, flags: WaitPidFlag, timeout: Duration) -> Result<WaitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match waitpid(child, Some(flags | WaitPidFlag::WNOHANG))? {
            WaitStatus::StillAlive => {}
            status => return Ok(status),
        }
        if Instant::now() >= deadline {
            return Err(CordonError::Wait(format!(
                "child {child} did not change state within {timeout:?}"
            )));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::{ForkResult, fork};

    /// Fork a child that sleeps `millis` and exits with `code`
    fn spawn_child(code: i32, millis: u32) -> Pid {
        // SAFETY: the child only calls usleep and _exit
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => unsafe {
                libc::usleep(millis * 1000);
                libc::_exit(code)
            },
            ForkResult::Parent { child } => child,
        }
    }

    #[test]
    fn test_self_returns_without_blocking() {
        let outcome = Synchronizer::default().wait(nix::unistd::getpid()).unwrap();
        assert_eq!(outcome, SyncOutcome::NoChild);
        assert_eq!(outcome.exit_status(), 0);
    }

    #[test]
    fn test_child_exit_zero_is_success() {
        let child = spawn_child(0, 0);
        let outcome = Synchronizer::default().wait(child).unwrap();

        assert_eq!(outcome, SyncOutcome::Changed(WaitStatus::Exited(child, 0)));
        assert_eq!(outcome.exit_status(), 0);
    }

    #[test]
    fn test_child_nonzero_exit_still_success() {
        let child = spawn_child(7, 0);
        let outcome = Synchronizer::default().wait(child).unwrap();

        assert_eq!(outcome, SyncOutcome::Changed(WaitStatus::Exited(child, 7)));
        assert_eq!(outcome.exit_status(), 0);
        assert!(outcome.describe(nix::unistd::getpid()).contains("exited with status 7"));
    }

    #[test]
    fn test_invalid_pid_is_wait_error() {
        let err = Synchronizer::default().wait(Pid::from_raw(999_999_999)).unwrap_err();
        assert!(matches!(err, CordonError::Wait(_)));
        assert_eq!(err.step(), "child synchronization");
    }

    #[test]
    fn test_timeout_expires() {
        let child = spawn_child(0, 5_000);
        let err = Synchronizer::new(Some(Duration::from_millis(50)))
            .wait(child)
            .unwrap_err();
        assert!(matches!(err, CordonError::Wait(_)));

        kill(child, Signal::SIGKILL).unwrap();
        waitpid(child, None).unwrap();
    }

    #[test]
    fn test_timeout_sees_exit() {
        let child = spawn_child(0, 0);
        let outcome = Synchronizer::new(Some(Duration::from_secs(10))).wait(child).unwrap();
        assert_eq!(outcome, SyncOutcome::Changed(WaitStatus::Exited(child, 0)));
    }

    #[test]
    fn test_stopped_child_is_a_state_change() {
        let child = spawn_child(0, 5_000);
        kill(child, Signal::SIGSTOP).unwrap();

        let outcome = Synchronizer::default().wait(child).unwrap();
        assert_eq!(outcome, SyncOutcome::Changed(WaitStatus::Stopped(child, Signal::SIGSTOP)));

        kill(child, Signal::SIGKILL).unwrap();
        waitpid(child, None).unwrap();
    }

    #[test]
    fn test_no_child_description() {
        let me = nix::unistd::getpid();
        assert_eq!(SyncOutcome::NoChild.describe(me), format!("* no child to wait for {me}"));
    }
}
