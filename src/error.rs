use std::fmt;
use std::io;
use thiserror::Error;

/// Result type of the patch engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by patch generation and application.
#[derive(Debug, Error)]
pub enum Error {
    /// A required input buffer is absent or unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The patch is not a well-formed patch of a supported version.
    #[error("malformed patch: {0}")]
    MalformedPatch(String),

    /// A buffer disagrees with the length or fingerprint recorded in the patch.
    #[error("{subject} mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch {
        subject: Subject,
        expected: String,
        actual: String,
    },

    /// The inputs are too large to be processed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Failed to write the generated patch.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Fieldless failure tag, convenient on foreign-function boundaries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    MalformedPatch,
    IntegrityMismatch,
    ResourceExhausted,
    Io,
}

/// The value an integrity check was performed on.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Subject {
    SourceLength,
    SourceFingerprint,
    TargetLength,
    TargetFingerprint,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subject::SourceLength => "source length",
            Subject::SourceFingerprint => "source fingerprint",
            Subject::TargetLength => "target length",
            Subject::TargetFingerprint => "target fingerprint",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Returns the failure tag.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::MalformedPatch(_) => ErrorKind::MalformedPatch,
            Error::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::MalformedPatch(msg.into())
    }

    pub(crate) fn mismatch<E: fmt::Display, A: fmt::Display>(subject: Subject, expected: E, actual: A) -> Self {
        Error::IntegrityMismatch {
            subject,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Reserves room for `n` more elements, reporting allocation failure instead of aborting.
pub(crate) fn try_reserve<T>(buf: &mut Vec<T>, n: usize) -> Result<()> {
    buf.try_reserve(n).map_err(|_| {
        let bytes = n.saturating_mul(std::mem::size_of::<T>());
        Error::ResourceExhausted(format!("cannot allocate {} bytes", bytes))
    })
}
