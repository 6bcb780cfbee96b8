use crate::redirect::{Invocation, Operand};
use crate::session::Session;
use crate::supervisor::set_job_signals;
use anyhow::{Context, Result};
use log::debug;
use nix::fcntl::{OFlag, open};
use nix::libc::{self, c_char};
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::sys::stat::Mode;
use nix::unistd::{ForkResult, Pid, close, dup2, fork, getpid, setpgid};
use std::ffi::{CStr, CString};
use std::os::fd::RawFd;

/// Used when the platform does not report a default search path.
const FALLBACK_SEARCH_PATH: &str = "/bin:/usr/bin";

/// Returns the platform's default command search path, `confstr(_CS_PATH)`.
///
/// The user's `PATH` is deliberately not consulted.
pub fn default_search_path() -> String {
    let len = unsafe { libc::confstr(libc::_CS_PATH, std::ptr::null_mut(), 0) };
    if len == 0 {
        return FALLBACK_SEARCH_PATH.to_owned();
    }
    let mut buf = vec![0u8; len];
    let written = unsafe { libc::confstr(libc::_CS_PATH, buf.as_mut_ptr().cast::<c_char>(), len) };
    if written == 0 || written > len {
        return FALLBACK_SEARCH_PATH.to_owned();
    }
    CStr::from_bytes_until_nul(&buf)
        .ok()
        .and_then(|path| path.to_str().ok())
        .filter(|path| !path.is_empty())
        .map_or_else(|| FALLBACK_SEARCH_PATH.to_owned(), str::to_owned)
}

/// Paths exec is attempted on, in order, for `program`.
///
/// A name containing `/` is tried as given and nothing else. Otherwise each
/// non-empty entry of the colon-separated `search_path` is prefixed to the
/// name; the bare name itself is never tried.
pub fn candidates(program: &str, search_path: &str) -> Vec<String> {
    if program.contains('/') {
        return vec![program.to_owned()];
    }
    search_path
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| format!("{dir}/{program}"))
        .collect()
}

/// Argument vector laid out the way `execv` expects it: pointers to the
/// arguments followed by a null pointer.
pub struct ArgVector {
    args: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl ArgVector {
    pub fn new<S: AsRef<str>>(words: &[S]) -> Result<Self> {
        let args = words
            .iter()
            .map(|word| to_cstring(word.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        // Moving `args` into the struct keeps each string's heap buffer in place.
        let ptrs = args
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        Ok(Self { args, ptrs })
    }

    /// First element, the program name.
    pub fn program(&self) -> Option<&CStr> {
        self.args.first().map(CString::as_c_str)
    }

    /// Null-terminated array of argument pointers, valid while `self` lives.
    pub fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }
}

fn to_cstring(word: &str) -> Result<CString> {
    CString::new(word).with_context(|| format!("argument {word:?} contains a NUL byte"))
}

/// Redirection operand ready for `open`; `None` is a missing operand and
/// always fails to open.
type ChildPath = Option<CString>;

fn child_path(operand: &Operand) -> Result<ChildPath> {
    match operand {
        Operand::Path(path) => to_cstring(path).map(Some),
        Operand::Missing => Ok(None),
    }
}

/// Everything the child needs, built in the parent before fork.
///
/// After fork the child only makes system calls: it never allocates, locks
/// or logs.
pub struct Launch {
    argv: ArgVector,
    candidates: Vec<CString>,
    stdin_source: Option<ChildPath>,
    stdout_sink: Option<ChildPath>,
    background: bool,
}

impl Launch {
    /// Converts a parsed command line into a launch, resolving candidate
    /// paths against `search_path`.
    pub fn prepare(invocation: &Invocation, search_path: &str) -> Result<Self> {
        let argv = ArgVector::new(&invocation.argv)?;
        let candidates = match invocation.argv.first() {
            Some(program) => candidates(program, search_path)
                .iter()
                .map(|candidate| to_cstring(candidate))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        let plan = &invocation.plan;
        Ok(Self {
            argv,
            candidates,
            stdin_source: plan.stdin_source.as_ref().map(child_path).transpose()?,
            stdout_sink: plan.stdout_sink.as_ref().map(child_path).transpose()?,
            background: plan.background,
        })
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    /// Forks the child and returns its pid in the parent.
    ///
    /// The caller is expected to ignore the job-control signals around this
    /// call and to reclaim the terminal afterwards.
    pub fn spawn(&self, session: &Session) -> Result<Pid> {
        match unsafe { fork() }.context("fork failed")? {
            ForkResult::Child => self.exec_child(session),
            ForkResult::Parent { child } => {
                // Also done here so the group exists before the terminal moves.
                if let Err(e) = setpgid(child, child) {
                    debug!("setpgid({child}) from parent: {e}");
                }
                if !self.background {
                    if let Err(e) = session.give_terminal(child) {
                        debug!("tcsetpgrp({child}) from parent: {e}");
                    }
                }
                debug!(
                    "spawned {child} ({})",
                    if self.background { "background" } else { "foreground" }
                );
                Ok(child)
            }
        }
    }

    fn exec_child(&self, session: &Session) -> ! {
        let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
        if !self.background {
            let _ = session.give_terminal(getpid());
        }
        set_job_signals(SigHandler::SigDfl);
        // The Rust runtime ignores SIGPIPE and exec keeps ignored dispositions.
        let _ = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) };

        if let Some(path) = &self.stdin_source {
            redirect(
                path.as_deref(),
                OFlag::O_RDONLY,
                Mode::empty(),
                libc::STDIN_FILENO,
                b"Error opening file for reading.\n",
            );
        }
        if let Some(path) = &self.stdout_sink {
            redirect(
                path.as_deref(),
                OFlag::O_CREAT | OFlag::O_TRUNC | OFlag::O_WRONLY,
                Mode::from_bits_truncate(0o644),
                libc::STDOUT_FILENO,
                b"Error opening file for writing.\n",
            );
        }

        let Some(program) = self.argv.program() else {
            exit_child(0);
        };
        for candidate in &self.candidates {
            // Only returns on failure; move on to the next directory.
            unsafe { libc::execv(candidate.as_ptr(), self.argv.as_ptr()) };
        }
        write_stderr(program.to_bytes());
        write_stderr(b": command not found\n");
        exit_child(0)
    }
}

/// Opens `path` and moves it onto `target`, or reports `failure` and exits 1.
fn redirect(path: Option<&CStr>, flags: OFlag, mode: Mode, target: RawFd, failure: &[u8]) {
    let opened = match path {
        Some(path) => open(path, flags, mode).ok(),
        None => None,
    };
    let Some(fd) = opened else {
        write_stderr(failure);
        exit_child(1);
    };
    if fd != target {
        let _ = dup2(fd, target);
        let _ = close(fd);
    }
}

fn write_stderr(bytes: &[u8]) {
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}

fn exit_child(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::redirect::parse;
    use crate::supervisor::{Mode as WaitMode, supervise};
    use crate::test_support::lock_children;
    use nix::sys::wait::WaitStatus;
    use std::env as stdenv;
    use std::fs;
    use std::path::PathBuf;

    fn temp_file(tag: &str) -> PathBuf {
        stdenv::temp_dir().join(format!("jobshell_external_{}_{}", std::process::id(), tag))
    }

    fn run(line: &str) -> Option<WaitStatus> {
        let invocation = parse(&tokenize(line));
        let launch = Launch::prepare(&invocation, &default_search_path()).unwrap();
        let child = launch.spawn(&Session::detached()).unwrap();
        supervise(child, WaitMode::from_background(launch.is_background()))
    }

    #[test]
    fn test_default_search_path_lists_bin() {
        let path = default_search_path();
        assert!(!path.is_empty());
        assert!(path.split(':').any(|dir| dir == "/bin" || dir == "/usr/bin"));
    }

    #[test]
    fn test_name_with_slash_is_tried_once() {
        assert_eq!(candidates("/bin/echo", "/bin:/usr/bin"), vec!["/bin/echo"]);
        assert_eq!(candidates("./run.sh", "/bin:/usr/bin"), vec!["./run.sh"]);
    }

    #[test]
    fn test_bare_name_never_tries_itself() {
        let found = candidates("echo", "/bin:/usr/bin");
        assert_eq!(found, vec!["/bin/echo", "/usr/bin/echo"]);
        assert!(!found.iter().any(|c| c == "echo"));
    }

    #[test]
    fn test_empty_search_entries_are_skipped() {
        assert_eq!(candidates("ls", ":/bin::/sbin:"), vec!["/bin/ls", "/sbin/ls"]);
        assert!(candidates("ls", "").is_empty());
    }

    #[test]
    fn test_arg_vector_is_null_terminated() {
        let argv = ArgVector::new(&["echo", "hello", "world"]).unwrap();
        assert_eq!(argv.program(), Some(c"echo"));
        let ptrs = argv.as_ptr();
        unsafe {
            assert_eq!(CStr::from_ptr(*ptrs.add(1)), c"hello");
            assert!((*ptrs.add(3)).is_null());
        }
    }

    #[test]
    fn test_empty_arg_vector_is_just_the_sentinel() {
        let argv = ArgVector::new::<&str>(&[]).unwrap();
        assert_eq!(argv.program(), None);
        unsafe { assert!((*argv.as_ptr()).is_null()) };
    }

    #[test]
    fn test_nul_byte_is_rejected_before_fork() {
        assert!(ArgVector::new(&["ec\0ho"]).is_err());
        let invocation = parse(&tokenize("cat > a\0b"));
        assert!(Launch::prepare(&invocation, "/bin").is_err());
    }

    #[test]
    fn test_prepare_keeps_plan() {
        let invocation = parse(&tokenize("sleep 1 &"));
        let launch = Launch::prepare(&invocation, "/bin").unwrap();
        assert!(launch.is_background());
        assert_eq!(launch.candidates, vec![c"/bin/sleep".to_owned()]);
        assert!(launch.stdin_source.is_none());
        assert!(launch.stdout_sink.is_none());

        let invocation = parse(&tokenize("cat <"));
        let launch = Launch::prepare(&invocation, "/bin").unwrap();
        assert_eq!(launch.stdin_source, Some(None));
    }

    #[test]
    fn test_foreground_child_is_reaped() {
        let _lock = lock_children();
        let status = run("/bin/sh -c 'exit 3'");
        assert!(matches!(status, Some(WaitStatus::Exited(_, 3))));
    }

    #[test]
    fn test_unknown_command_exits_zero() {
        let _lock = lock_children();
        let status = run("jobshell_no_such_command_xyz");
        assert!(matches!(status, Some(WaitStatus::Exited(_, 0))));
    }

    #[test]
    fn test_output_redirection_truncates_file() {
        let _lock = lock_children();
        let out = temp_file("truncate");
        fs::write(&out, "old contents that are longer\n").unwrap();

        let status = run(&format!("/bin/echo hi > {}", out.display()));

        assert!(matches!(status, Some(WaitStatus::Exited(_, 0))));
        assert_eq!(fs::read_to_string(&out).unwrap(), "hi\n");
        let _ = fs::remove_file(out);
    }

    #[test]
    fn test_unreadable_input_exits_one() {
        let _lock = lock_children();
        let status = run("/bin/cat < /no/such/input/for/jobshell");
        assert!(matches!(status, Some(WaitStatus::Exited(_, 1))));
    }

    #[test]
    fn test_missing_output_operand_exits_one() {
        let _lock = lock_children();
        let status = run("/bin/echo hi >");
        assert!(matches!(status, Some(WaitStatus::Exited(_, 1))));
    }

    #[test]
    fn test_redirection_without_program_creates_file() {
        let _lock = lock_children();
        let out = temp_file("bare");
        let _ = fs::remove_file(&out);

        let status = run(&format!("> {}", out.display()));

        assert!(matches!(status, Some(WaitStatus::Exited(_, 0))));
        assert_eq!(fs::read_to_string(&out).unwrap(), "");
        let _ = fs::remove_file(out);
    }
}
