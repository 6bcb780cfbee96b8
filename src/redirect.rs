//! Extraction of `>`, `<` and `&` from a command line.
//!
//! The scan runs left to right and stops at the first marker, so a command
//! carries at most one redirection. Everything after the marker, apart from
//! its path operand, is dropped from the argument vector.

use crate::lexer::Tokens;

/// Path operand of a redirection marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// The word following the marker.
    Path(String),
    /// The marker was the last word; opening it always fails in the child.
    Missing,
}

impl Operand {
    fn following(tokens: &Tokens, index: usize) -> Self {
        match tokens.get(index + 1) {
            Some(path) => Operand::Path(path.to_owned()),
            None => Operand::Missing,
        }
    }
}

/// What the child must do to its standard streams, and whether the shell
/// should wait for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectionPlan {
    /// Opened read-only and placed on descriptor 0.
    pub stdin_source: Option<Operand>,
    /// Opened create/truncate/write-only with mode 0644 and placed on descriptor 1.
    pub stdout_sink: Option<Operand>,
    pub background: bool,
}

/// Problems found while scanning. They are reported, not fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// Printed as `Syntax error.`
    SyntaxError,
}

/// Result of scanning one command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Program name followed by its arguments. May be empty when the line
    /// starts with a marker.
    pub argv: Vec<String>,
    pub plan: RedirectionPlan,
    pub diagnostics: Vec<Diagnostic>,
}

/// Splits `tokens` into an argument vector and a redirection plan.
///
/// A marker is any word whose first character is `>`, `<` or `&`; the rest of
/// the marker word is ignored and the next word is the path operand. A line
/// with more than one word whose last word starts with `&` runs in the
/// background even when a redirection ended the scan earlier.
pub fn parse(tokens: &Tokens) -> Invocation {
    let len = tokens.len();
    let mut invocation = Invocation::default();
    let mut end = len;

    for (index, token) in tokens.iter().enumerate() {
        if token.starts_with('>') {
            if index + 1 >= len {
                invocation.diagnostics.push(Diagnostic::SyntaxError);
            }
            invocation.plan.stdout_sink = Some(Operand::following(tokens, index));
        } else if token.starts_with('<') {
            if len < 3 {
                invocation.diagnostics.push(Diagnostic::SyntaxError);
            }
            invocation.plan.stdin_source = Some(Operand::following(tokens, index));
        } else if token.starts_with('&') {
            invocation.plan.background = true;
        } else {
            continue;
        }
        end = index;
        break;
    }

    if len > 1 && tokens.get(len - 1).is_some_and(|last| last.starts_with('&')) {
        invocation.plan.background = true;
    }

    invocation.argv = tokens.iter().take(end).map(str::to_owned).collect();
    invocation
}
