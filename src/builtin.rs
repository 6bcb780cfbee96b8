use crate::command::Flow;
use crate::lexer::Tokens;
use anyhow::{Context, Result};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::wait::wait;
use std::env;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;

/// Signature shared by every entry of [`BUILTINS`].
///
/// Handlers run inside the shell process and never fork.
pub type Handler = fn(&Tokens, &mut dyn Write, &mut dyn Write) -> Result<Flow>;

/// One row of the built-in table.
pub struct BuiltinDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub handler: Handler,
}

/// Built-in commands known to the shell, in the order `?` lists them.
pub static BUILTINS: &[BuiltinDescriptor] = &[
    BuiltinDescriptor {
        name: Help::NAME,
        help: "show this help menu",
        handler: run::<Help>,
    },
    BuiltinDescriptor {
        name: Exit::NAME,
        help: "exit the command shell",
        handler: run::<Exit>,
    },
    BuiltinDescriptor {
        name: Pwd::NAME,
        help: "print working directory",
        handler: run::<Pwd>,
    },
    BuiltinDescriptor {
        name: Cd::NAME,
        help: "change directory",
        handler: run::<Cd>,
    },
    BuiltinDescriptor {
        name: Wait::NAME,
        help: "wait for all background jobs to terminate",
        handler: run::<Wait>,
    },
];

/// Finds the table index of the built-in called `name`.
///
/// Linear scan, exact and case-sensitive.
pub fn lookup(name: &str) -> Option<usize> {
    BUILTINS.iter().position(|builtin| builtin.name == name)
}

/// Runs the built-in at `index` with the full token view of the line.
pub fn invoke(
    index: usize,
    tokens: &Tokens,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<Flow> {
    let builtin = BUILTINS
        .get(index)
        .with_context(|| format!("no built-in at index {index}"))?;
    (builtin.handler)(tokens, stdout, stderr)
}

/// Built-in commands built from the token view and executed in-process.
///
/// Arguments are taken verbatim: a word such as `-x` or `help` is an
/// ordinary argument, never an option.
pub(crate) trait BuiltinCommand: Sized {
    /// Word that selects the command.
    const NAME: &'static str;

    /// Picks the arguments the command uses out of the whole line.
    fn from_tokens(tokens: &Tokens) -> Self;

    /// Executes the command with the shell's output streams.
    fn execute(self, stdout: &mut dyn Write, stderr: &mut dyn Write) -> Result<Flow>;
}

fn run<T: BuiltinCommand>(
    tokens: &Tokens,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<Flow> {
    T::from_tokens(tokens).execute(stdout, stderr)
}

/// Show this help menu.
pub struct Help;

impl BuiltinCommand for Help {
    const NAME: &'static str = "?";

    fn from_tokens(_tokens: &Tokens) -> Self {
        Help
    }

    fn execute(self, stdout: &mut dyn Write, _stderr: &mut dyn Write) -> Result<Flow> {
        for builtin in BUILTINS {
            writeln!(stdout, "{} - {}", builtin.name, builtin.help)?;
        }
        Ok(Flow::Continue)
    }
}

/// Exit the command shell with status 0. Arguments are ignored.
pub struct Exit;

impl BuiltinCommand for Exit {
    const NAME: &'static str = "exit";

    fn from_tokens(_tokens: &Tokens) -> Self {
        Exit
    }

    fn execute(self, _stdout: &mut dyn Write, _stderr: &mut dyn Write) -> Result<Flow> {
        Ok(Flow::Exit(0))
    }
}

/// Print the current working directory to standard output.
pub struct Pwd;

impl BuiltinCommand for Pwd {
    const NAME: &'static str = "pwd";

    fn from_tokens(_tokens: &Tokens) -> Self {
        Pwd
    }

    fn execute(self, stdout: &mut dyn Write, stderr: &mut dyn Write) -> Result<Flow> {
        match env::current_dir() {
            Ok(dir) => {
                stdout.write_all(dir.as_os_str().as_bytes())?;
                stdout.write_all(b"\n")?;
            }
            Err(e) => {
                debug!("getcwd failed: {e}");
                writeln!(stderr, "Error.")?;
            }
        }
        Ok(Flow::Continue)
    }
}

/// Change the working directory of the shell to the first argument.
pub struct Cd {
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    const NAME: &'static str = "cd";

    fn from_tokens(tokens: &Tokens) -> Self {
        Cd {
            target: tokens.get(1).map(str::to_owned),
        }
    }

    fn execute(self, _stdout: &mut dyn Write, stderr: &mut dyn Write) -> Result<Flow> {
        match self.target {
            None => writeln!(stderr, "Please specify a directory.")?,
            Some(target) => {
                if let Err(e) = env::set_current_dir(&target) {
                    debug!("chdir to {target} failed: {e}");
                    writeln!(stderr, "{target} not found.")?;
                }
            }
        }
        Ok(Flow::Continue)
    }
}

/// Wait until every child of the shell has terminated.
pub struct Wait;

impl BuiltinCommand for Wait {
    const NAME: &'static str = "wait";

    fn from_tokens(_tokens: &Tokens) -> Self {
        Wait
    }

    fn execute(self, _stdout: &mut dyn Write, stderr: &mut dyn Write) -> Result<Flow> {
        writeln!(stderr, "Stop. Wait a minute.")?;
        loop {
            match wait() {
                Ok(status) => debug!("reaped {status:?}"),
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    warn!("wait failed: {e}");
                    break;
                }
            }
        }
        Ok(Flow::Continue)
    }
}
