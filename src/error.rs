use thiserror::Error;

/// Error taxonomy of the import/merge core.
///
/// Parsing and fetch errors are local: a batch keeps processing the
/// remaining archives after one of them fails. `Conflict` is not a
/// failure of the engine, it is a decision deferred to the caller.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unrecognized archive format: {archive}")]
    UnrecognizedFormat { archive: String },

    #[error("corrupt archive {archive}: {detail}")]
    CorruptArchive { archive: String, detail: String },

    #[error("remote part not found: {0}")]
    RemoteNotFound(String),

    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("entry {identity} already exists in the target library")]
    Conflict { identity: String },

    #[error("unresolved cross-reference in {entry}: {reference}")]
    CrossReferenceUnresolved { entry: String, reference: String },

    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    #[error("archive read failure: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl ImportError {
    pub fn corrupt(archive: impl Into<String>, detail: impl Into<String>) -> Self {
        ImportError::CorruptArchive {
            archive: archive.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
