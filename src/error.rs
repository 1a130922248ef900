//! Structured diagnostics for the assembler.
//!
//! User-visible failures are always one of [`AsError`]'s variants and always carry
//! a [`SourceLocation`]. Bugs in the assembler itself (a broken invariant, not a bad
//! input file) are reported with `panic!` instead, per the propagation policy: a
//! panic carries no file/line because it does not describe the user's source.

use std::fmt;
use std::io;
use std::path::PathBuf;

use termcolor::{Color, ColorSpec, StandardStream, WriteColor};

/// A position in a source file, attached to every token and every user-facing error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        SourceLocation {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// A user-visible assembler error, always tied to a location in the input.
#[derive(Debug, thiserror::Error)]
pub enum AsError {
    #[error("{location}: {message}")]
    Lexical {
        location: SourceLocation,
        message: String,
    },
    #[error("{location}: {message}")]
    Syntactic {
        location: SourceLocation,
        message: String,
    },
    #[error("{location}: {message}")]
    Semantic {
        location: SourceLocation,
        message: String,
    },
    /// No location available (e.g. a CLI-level failure before any file was opened).
    #[error("{message}")]
    Plain { message: String },
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl AsError {
    pub fn lexical(location: SourceLocation, message: impl Into<String>) -> Self {
        AsError::Lexical {
            location,
            message: message.into(),
        }
    }

    pub fn syntactic(location: SourceLocation, message: impl Into<String>) -> Self {
        AsError::Syntactic {
            location,
            message: message.into(),
        }
    }

    pub fn semantic(location: SourceLocation, message: impl Into<String>) -> Self {
        AsError::Semantic {
            location,
            message: message.into(),
        }
    }

    pub fn plain(message: impl Into<String>) -> Self {
        AsError::Plain {
            message: message.into(),
        }
    }

    /// Render this error as the single coloured diagnostic line the CLI prints
    /// before exiting non-zero.
    pub fn report(&self, stream: &mut StandardStream) {
        let _ = match self {
            AsError::Lexical { location, message }
            | AsError::Syntactic { location, message }
            | AsError::Semantic { location, message } => write_located(stream, location, message),
            AsError::Plain { message } => write_plain(stream, message),
            AsError::Io(e) => write_plain(stream, &e.to_string()),
        };
    }
}

fn write_located(stream: &mut StandardStream, location: &SourceLocation, message: &str) -> io::Result<()> {
    let mut bold = ColorSpec::new();
    bold.set_bold(true);
    stream.set_color(&bold)?;
    write!(stream, "{}: ", location)?;
    stream.reset()?;
    write_error_prefix(stream)?;
    writeln!(stream, "{}", message)
}

fn write_plain(stream: &mut StandardStream, message: &str) -> io::Result<()> {
    write_error_prefix(stream)?;
    writeln!(stream, "{}", message)
}

fn write_error_prefix(stream: &mut StandardStream) -> io::Result<()> {
    let mut red = ColorSpec::new();
    red.set_fg(Some(Color::Red)).set_bold(true);
    stream.set_color(&red)?;
    write!(stream, "error: ")?;
    stream.reset()
}

pub type AsResult<T> = Result<T, AsError>;
