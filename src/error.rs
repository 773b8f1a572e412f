use std::fmt;
use std::io;

/// Top-level error type for both binaries.
///
/// Mirrors the teacher's habit of staying on `std::io::Result` for most of
/// the call stack (see `utils::open_file`) rather than reaching for
/// `anyhow`: this crate's own package never depended on it, so the rewrite
/// keeps a small hand-rolled enum instead of adding the dependency back.
#[derive(Debug)]
pub enum StrError {
    /// Fatal usage error: bad or missing CLI arguments. (spec §7a)
    Usage(String),
    /// Fatal input error: malformed FASTQ/STR read name, hash failure. (spec §7b)
    Input(String),
    Io(io::Error),
}

impl fmt::Display for StrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrError::Usage(msg) => write!(f, "usage error: {msg}"),
            StrError::Input(msg) => write!(f, "input error: {msg}"),
            StrError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for StrError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StrError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StrError {
    fn from(err: io::Error) -> Self {
        StrError::Io(err)
    }
}

pub type StrResult<T> = Result<T, StrError>;
