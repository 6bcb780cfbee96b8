use log::{debug, warn};
use nix::sys::signal::{Signal, killpg};
use nix::sys::termios::{SetArg, Termios, tcgetattr, tcsetattr};
use nix::unistd::{Pid, getpgrp, getpid, setpgid, tcgetpgrp, tcsetpgrp};
use std::io::IsTerminal;
use std::os::fd::{BorrowedFd, RawFd};

/// Process-wide state of the running shell.
///
/// Created once at startup and passed to the driver loop and the supervisor.
/// The only thing that changes afterwards is which process group owns the
/// terminal, and that always returns to [`Session::pgid`] after a dispatch.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) terminal: RawFd,
    pub(crate) interactive: bool,
    pub(crate) pgid: Pid,
    pub(crate) tmodes: Option<Termios>,
}

impl Session {
    /// Brings the shell up on standard input.
    ///
    /// When standard input is a terminal the shell waits until it is in the
    /// foreground, moves into its own process group, takes the terminal and
    /// saves its modes. Any failure leaves a non-interactive session: no
    /// prompts and no terminal hand-off.
    pub fn init() -> Self {
        let mut session = Self::detached();
        if !std::io::stdin().is_terminal() {
            debug!("standard input is not a terminal");
            return session;
        }

        match session.take_terminal() {
            Ok(tmodes) => {
                session.interactive = true;
                session.pgid = getpgrp();
                session.tmodes = Some(tmodes);
                debug!("interactive session, shell pgid {}", session.pgid);
            }
            Err(e) => warn!("terminal bring-up failed, running non-interactively: {e}"),
        }
        session
    }

    /// Session that never touches the terminal.
    pub fn detached() -> Self {
        Self {
            terminal: nix::libc::STDIN_FILENO,
            interactive: false,
            pgid: getpgrp(),
            tmodes: None,
        }
    }

    fn take_terminal(&self) -> nix::Result<Termios> {
        loop {
            let pgid = getpgrp();
            if tcgetpgrp(self.fd())? == pgid {
                break;
            }
            killpg(pgid, Signal::SIGTTIN)?;
        }

        let pid = getpid();
        if let Err(e) = setpgid(pid, pid) {
            // A session leader cannot change its group; it already leads one.
            debug!("setpgid on shell: {e}");
        }
        tcsetpgrp(self.fd(), getpgrp())?;
        tcgetattr(self.fd())
    }

    /// Whether prompts are shown and the terminal is handed to children.
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Process group of the shell, captured at startup.
    pub fn pgid(&self) -> Pid {
        self.pgid
    }

    pub(crate) fn fd(&self) -> BorrowedFd<'_> {
        // The descriptor stays open for the lifetime of the process.
        unsafe { BorrowedFd::borrow_raw(self.terminal) }
    }

    /// Makes `pgid` the foreground process group of the terminal.
    pub(crate) fn give_terminal(&self, pgid: Pid) -> nix::Result<()> {
        if !self.interactive {
            return Ok(());
        }
        tcsetpgrp(self.fd(), pgid)
    }

    /// Returns the terminal to the shell and reapplies the saved modes.
    pub(crate) fn reclaim_terminal(&self) {
        if !self.interactive {
            return;
        }
        if let Err(e) = tcsetpgrp(self.fd(), self.pgid) {
            warn!("could not reclaim the terminal: {e}");
        }
        if let Some(tmodes) = &self.tmodes {
            if let Err(e) = tcsetattr(self.fd(), SetArg::TCSADRAIN, tmodes) {
                warn!("could not restore terminal modes: {e}");
            }
        }
    }
}
