use thiserror::Error;

/// Error taxonomy for every atom read, write and mutation entry point.
///
/// `FileFormat` covers structural inconsistencies in the parsed bytes,
/// `UnexpectedEof` a short read from the underlying stream, `Write` a failed
/// put on the output stream, and `Unexpected` impossible-state conditions
/// that indicate a bug rather than bad input.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("file format error: {0}")]
    FileFormat(String),

    #[error("unexpected end of stream: {0}")]
    UnexpectedEof(String),

    #[error("file write error: {0}")]
    Write(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub type FormatResult<T> = Result<T, FormatError>;
