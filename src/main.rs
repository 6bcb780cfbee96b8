use argh::FromArgs;
use jobshell::{Interpreter, Session};

#[derive(FromArgs)]
/// Interactive command shell. Reads commands from standard input until end of
/// input or `exit`; type `?` for the list of built-ins.
struct Args {}

fn main() -> anyhow::Result<()> {
    let _args: Args = argh::from_env();
    env_logger::init();

    let session = Session::init();
    let code = Interpreter::new(session).repl()?;
    std::process::exit(code)
}
