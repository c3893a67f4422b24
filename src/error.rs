use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExportError>;

/// Conditions surfaced to the caller of an export session.
///
/// Per-item extraction skips and per-attachment media failures never appear
/// here; they degrade into the output data instead.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("renderer failure: {0}")]
    Renderer(String),

    #[error("an export session is already running")]
    SessionActive,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Renderer(err.to_string())
    }
}

impl From<zip::result::ZipError> for ExportError {
    fn from(err: zip::result::ZipError) -> Self {
        ExportError::Renderer(err.to_string())
    }
}
