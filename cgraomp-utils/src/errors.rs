//! Errors generated by the toolchain.
use std::fmt::Display;

/// Convenience wrapper representing a possibly erroring computation.
pub type CgraResult<T> = std::result::Result<T, Error>;

/// Errors surfaced by the pipeline. Every failure path that crosses a crate
/// boundary is one of these; warnings go through `log` instead.
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

/// The taxonomy of fatal failures.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ErrorKind {
    /// Malformed machine description, options, or pass pipeline.
    Configuration,
    /// Missing precondition in the input module (e.g. offload metadata).
    InvalidModule,
    /// Failure loading a DFG pass plugin.
    Plugin,
    /// Failure writing an output artifact.
    Write,
    /// Everything else.
    Misc,
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ErrorKind::Configuration => write!(f, "Configuration: ")?,
            ErrorKind::InvalidModule => write!(f, "Invalid module: ")?,
            ErrorKind::Plugin => write!(f, "Plugin: ")?,
            ErrorKind::Write => write!(f, "Write failed: ")?,
            ErrorKind::Misc => (),
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn configuration<S: ToString>(msg: S) -> Self {
        Self {
            kind: ErrorKind::Configuration,
            message: msg.to_string(),
        }
    }

    pub fn invalid_module<S: ToString>(msg: S) -> Self {
        Self {
            kind: ErrorKind::InvalidModule,
            message: msg.to_string(),
        }
    }

    pub fn plugin<S: ToString>(msg: S) -> Self {
        Self {
            kind: ErrorKind::Plugin,
            message: msg.to_string(),
        }
    }

    pub fn write_error<S: ToString>(msg: S) -> Self {
        Self {
            kind: ErrorKind::Write,
            message: msg.to_string(),
        }
    }

    pub fn misc<S: ToString>(msg: S) -> Self {
        Self {
            kind: ErrorKind::Misc,
            message: msg.to_string(),
        }
    }

    /// True when this error came from the configuration layer (model file,
    /// options, pipeline). Used by the driver to pick the exit path.
    pub fn is_configuration(&self) -> bool {
        self.kind == ErrorKind::Configuration
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::write_error(e.to_string())
    }
}

impl From<std::fmt::Error> for Error {
    fn from(e: std::fmt::Error) -> Self {
        Error::write_error(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::configuration(e.to_string())
    }
}
