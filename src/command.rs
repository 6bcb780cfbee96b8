/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// Continuation flag returned by every dispatch.
///
/// Built-ins and external launches return [`Flow::Continue`]; only the `exit`
/// built-in asks the driver loop to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// Terminate the shell process with the given status.
    Exit(ExitCode),
}
