//! Parent side of an external command: signal window, waiting and terminal
//! reclaim.

use crate::session::Session;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// Signals the shell ignores while a child is being started and watched.
pub(crate) const JOB_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTTOU];

/// While alive, the job-control signals are ignored by the shell.
///
/// Dropping the guard puts them back to their default disposition, on every
/// path out of the parent branch.
pub(crate) struct IgnoreJobSignals(());

impl IgnoreJobSignals {
    pub(crate) fn new() -> Self {
        set_job_signals(SigHandler::SigIgn);
        Self(())
    }
}

impl Drop for IgnoreJobSignals {
    fn drop(&mut self) {
        set_job_signals(SigHandler::SigDfl);
    }
}

/// Sets every signal in [`JOB_SIGNALS`] to `handler`.
///
/// Only calls `signal(2)`, so the child may use it between fork and exec.
pub(crate) fn set_job_signals(handler: SigHandler) {
    for sig in JOB_SIGNALS {
        // Neither disposition installs a Rust handler.
        let _ = unsafe { signal(sig, handler) };
    }
}

/// Hands the terminal back to the shell when dropped.
///
/// Must be created after [`IgnoreJobSignals`] so it drops first, while
/// `SIGTTOU` is still ignored.
pub(crate) struct ReclaimTerminal<'a> {
    session: &'a Session,
}

impl<'a> ReclaimTerminal<'a> {
    pub(crate) fn new(session: &'a Session) -> Self {
        Self { session }
    }
}

impl Drop for ReclaimTerminal<'_> {
    fn drop(&mut self) {
        self.session.reclaim_terminal();
    }
}

/// How the shell treats a launched child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Block until the child terminates or stops.
    Foreground,
    /// Poll once without blocking.
    Background,
}

impl Mode {
    pub fn from_background(background: bool) -> Self {
        if background {
            Mode::Background
        } else {
            Mode::Foreground
        }
    }
}

/// Watches `child` according to `mode`.
///
/// Returns the last status observed, or `None` when a background child is
/// still running or the wait failed. The terminal is reclaimed by the
/// caller's [`ReclaimTerminal`] guard.
pub fn supervise(child: Pid, mode: Mode) -> Option<WaitStatus> {
    match mode {
        Mode::Foreground => loop {
            match waitpid(child, Some(WaitPidFlag::WUNTRACED)) {
                Ok(status) => {
                    debug!("foreground child {child}: {status:?}");
                    return Some(status);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("waitpid({child}) failed: {e}");
                    return None;
                }
            }
        },
        Mode::Background => match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                debug!("background child {child} running");
                None
            }
            Ok(status) => {
                debug!("background child {child}: {status:?}");
                Some(status)
            }
            Err(e) => {
                warn!("waitpid({child}) failed: {e}");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::lock_signals;
    use nix::sys::signal::{SaFlags, SigAction, SigSet, sigaction};

    fn current_handler(sig: Signal) -> SigHandler {
        // Read the disposition by swapping in the same value back.
        let probe = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        let old = unsafe { sigaction(sig, &probe) }.unwrap();
        unsafe { sigaction(sig, &old) }.unwrap();
        old.handler()
    }

    #[test]
    fn test_guard_ignores_then_restores_default() {
        let _lock = lock_signals();
        {
            let _guard = IgnoreJobSignals::new();
            assert_eq!(current_handler(Signal::SIGINT), SigHandler::SigIgn);
            assert_eq!(current_handler(Signal::SIGTTOU), SigHandler::SigIgn);
        }
        assert_eq!(current_handler(Signal::SIGINT), SigHandler::SigDfl);
        assert_eq!(current_handler(Signal::SIGTTOU), SigHandler::SigDfl);
    }

    #[test]
    fn test_guard_restores_on_early_return() {
        let _lock = lock_signals();
        fn launch(fail: bool) -> Result<(), ()> {
            let _guard = IgnoreJobSignals::new();
            if fail {
                return Err(());
            }
            Ok(())
        }
        assert!(launch(true).is_err());
        assert_eq!(current_handler(Signal::SIGINT), SigHandler::SigDfl);
    }

    #[test]
    fn test_mode_from_background_flag() {
        assert_eq!(Mode::from_background(true), Mode::Background);
        assert_eq!(Mode::from_background(false), Mode::Foreground);
    }

    #[test]
    fn test_reclaim_guard_on_detached_session_is_noop() {
        let session = Session::detached();
        drop(ReclaimTerminal::new(&session));
    }
}
