use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::VecDeque;
use std::io::{BufRead, Read, Write};

/// Size of the line buffer, terminator included.
pub const MAX_LINE: usize = 4096;

/// Source of input lines for the driver loop.
pub trait LineSource {
    /// Shows `prompt` when given and returns the next line, or `None` at end
    /// of input.
    fn next_line(&mut self, prompt: Option<&str>) -> Result<Option<String>>;
}

/// Reads lines from any buffered reader, at most `MAX_LINE - 1` bytes at a
/// time; a longer line comes back in several pieces.
///
/// Prompts are written to `prompt_out`.
pub struct StreamLines<R, W> {
    reader: R,
    prompt_out: W,
}

impl<R: BufRead, W: Write> StreamLines<R, W> {
    pub fn new(reader: R, prompt_out: W) -> Self {
        Self { reader, prompt_out }
    }

    /// Gives back the reader and the prompt sink.
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.prompt_out)
    }
}

impl<R: BufRead, W: Write> LineSource for StreamLines<R, W> {
    fn next_line(&mut self, prompt: Option<&str>) -> Result<Option<String>> {
        if let Some(prompt) = prompt {
            self.prompt_out.write_all(prompt.as_bytes())?;
            self.prompt_out.flush()?;
        }
        let mut buf = Vec::new();
        let read = (&mut self.reader)
            .take((MAX_LINE - 1) as u64)
            .read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

/// Pieces of an edited line still waiting to be dispatched.
///
/// Each piece after the first is announced with its own prompt, as a
/// buffered reader would show one before every read.
#[derive(Debug, Default)]
struct PendingPieces {
    pieces: VecDeque<String>,
}

impl PendingPieces {
    /// Queues `line` with its newline restored, cut to the read limit, and
    /// returns the first piece.
    fn start(&mut self, line: &str) -> Option<String> {
        self.pieces = split_line(&format!("{line}\n"), MAX_LINE - 1).into();
        self.pieces.pop_front()
    }

    /// Next queued piece, writing `prompt` to `prompt_out` first.
    fn next_piece(
        &mut self,
        prompt: Option<&str>,
        prompt_out: &mut dyn Write,
    ) -> Result<Option<String>> {
        let Some(piece) = self.pieces.pop_front() else {
            return Ok(None);
        };
        if let Some(prompt) = prompt {
            prompt_out.write_all(prompt.as_bytes())?;
            prompt_out.flush()?;
        }
        Ok(Some(piece))
    }
}

/// Interactive line editing backed by rustyline.
///
/// Lines are not added to any history.
pub struct EditorLines {
    editor: DefaultEditor,
    pending: PendingPieces,
}

impl EditorLines {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
            pending: PendingPieces::default(),
        })
    }
}

impl LineSource for EditorLines {
    fn next_line(&mut self, prompt: Option<&str>) -> Result<Option<String>> {
        if let Some(piece) = self.pending.next_piece(prompt, &mut std::io::stdout())? {
            return Ok(Some(piece));
        }

        match self.editor.readline(prompt.unwrap_or("")) {
            Ok(line) => Ok(self.pending.start(&line)),
            // Ctrl-C at the prompt abandons the line.
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(ReadlineError::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Cuts `line` into pieces of at most `limit` bytes, on character boundaries.
fn split_line(line: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = line;
    while !rest.is_empty() {
        let mut end = limit.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (piece, tail) = rest.split_at(end);
        pieces.push(piece.to_owned());
        rest = tail;
    }
    pieces
}
