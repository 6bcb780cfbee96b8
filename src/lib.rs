//! Command-execution engine of a small interactive job-control shell.
//!
//! Each input line is split into words and either handled by a built-in
//! (`?`, `exit`, `pwd`, `cd`, `wait`) inside the shell process, or run as an
//! external program in its own process group. External programs are resolved
//! against the platform's default search path, may redirect standard input or
//! output to a file, and may run in the background with a trailing `&`.
//!
//! The main entry point is [`Interpreter`], driven by a [`Session`] created
//! once at startup.

mod builtin;
pub mod command;
pub mod external;
mod interpreter;
pub mod io_adapters;
pub mod lexer;
pub mod redirect;
mod session;
mod supervisor;

pub use builtin::{BUILTINS, BuiltinDescriptor, invoke, lookup};
pub use command::{ExitCode, Flow};
pub use interpreter::Interpreter;
pub use session::Session;
pub use supervisor::{Mode, supervise};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    fn lock(mutex: &'static OnceLock<Mutex<()>>) -> MutexGuard<'static, ()> {
        mutex
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serializes tests that read or change the working directory.
    pub(crate) fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        lock(&MUTEX)
    }

    /// Serializes tests that fork or reap children.
    pub(crate) fn lock_children() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        lock(&MUTEX)
    }

    /// Serializes tests that inspect signal dispositions.
    pub(crate) fn lock_signals() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        lock(&MUTEX)
    }
}
