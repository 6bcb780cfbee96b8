use crate::builtin;
use crate::command::{ExitCode, Flow};
use crate::external::{Launch, default_search_path};
use crate::io_adapters::{EditorLines, LineSource, StreamLines};
use crate::lexer::{self, Tokens};
use crate::redirect::{self, Diagnostic};
use crate::session::Session;
use crate::supervisor::{IgnoreJobSignals, Mode, ReclaimTerminal, supervise};
use anyhow::Result;
use log::{debug, warn};
use std::io::{self, Write};

/// The driver loop: prompt, read, tokenize, then run a built-in or launch an
/// external program, until end of input or `exit`.
///
/// Dispatches are strictly sequential. When a dispatch returns, the terminal
/// belongs to the shell again and `SIGINT`/`SIGTTOU` have their default
/// disposition.
///
/// Example
/// ```
/// use jobshell::{Flow, Interpreter, Session};
/// let mut sh = Interpreter::new(Session::detached());
/// let mut out = Vec::new();
/// let flow = sh.dispatch("?\n", &mut out, &mut Vec::new()).unwrap();
/// assert_eq!(flow, Flow::Continue);
/// assert_eq!(String::from_utf8(out).unwrap().lines().count(), 5);
/// ```
pub struct Interpreter {
    session: Session,
    search_path: String,
}

impl Interpreter {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            search_path: default_search_path(),
        }
    }

    /// Runs the loop on the process's standard streams.
    ///
    /// Interactive sessions read through the line editor, falling back to
    /// plain buffered reads if it cannot be set up.
    pub fn repl(&mut self) -> Result<ExitCode> {
        if self.session.is_interactive() {
            match EditorLines::new() {
                Ok(mut editor) => {
                    return self.run(&mut editor, &mut io::stdout(), &mut io::stderr());
                }
                Err(e) => warn!("line editor unavailable: {e}"),
            }
        }
        let stdin = io::stdin();
        let mut source = StreamLines::new(stdin.lock(), io::stdout());
        self.run(&mut source, &mut io::stdout(), &mut io::stderr())
    }

    /// Runs the loop over `source` until it is exhausted or `exit` is entered.
    ///
    /// The prompt `<N>: ` is shown only on interactive sessions; `N` starts at
    /// zero and advances once per dispatch, blank lines and failures included.
    pub fn run(
        &mut self,
        source: &mut dyn LineSource,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        let mut line_number: usize = 0;
        loop {
            let prompt = self
                .session
                .is_interactive()
                .then(|| format!("{line_number}: "));
            let Some(line) = source.next_line(prompt.as_deref())? else {
                debug!("end of input");
                stdout.flush()?;
                return Ok(0);
            };

            match self.dispatch(&line, stdout, stderr) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit(code)) => {
                    stdout.flush()?;
                    return Ok(code);
                }
                Err(e) => {
                    let _ = writeln!(stderr, "jobshell: {e:#}");
                }
            }
            line_number += 1;
        }
    }

    /// Handles one input line.
    pub fn dispatch(
        &mut self,
        line: &str,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<Flow> {
        let tokens = lexer::tokenize(line);
        let Some(name) = tokens.get(0) else {
            return Ok(Flow::Continue);
        };

        if let Some(index) = builtin::lookup(name) {
            debug!("built-in {name}");
            return builtin::invoke(index, &tokens, stdout, stderr);
        }

        self.launch(&tokens, stdout, stderr)?;
        Ok(Flow::Continue)
    }

    fn launch(&self, tokens: &Tokens, stdout: &mut dyn Write, stderr: &mut dyn Write) -> Result<()> {
        let invocation = redirect::parse(tokens);
        for diagnostic in &invocation.diagnostics {
            match diagnostic {
                Diagnostic::SyntaxError => writeln!(stderr, "Syntax error.")?,
            }
        }
        let launch = Launch::prepare(&invocation, &self.search_path)?;

        stdout.flush()?;
        stderr.flush()?;

        // Drop order matters: the terminal comes back while SIGTTOU is still
        // ignored, then the signals are restored.
        let _signals = IgnoreJobSignals::new();
        let _terminal = ReclaimTerminal::new(&self.session);

        let child = launch.spawn(&self.session)?;
        supervise(child, Mode::from_background(launch.is_background()));
        Ok(())
    }
}
