//! Error taxonomy for the highlight pipeline.
//!
//! Gateway errors ([`StoreError`], [`OcrError`], [`RenderError`]) are mapped
//! into a per-document [`DocumentError`] by the orchestrator. Every
//! `DocumentError` is recovered locally: the document is skipped and a
//! diagnostic line is recorded. Only [`QueryError`] reaches the caller.

use thiserror::Error;

/// Errors from an [`ObjectStore`](crate::traits::ObjectStore) operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Network failure, throttling or a 5xx answer. Safe to retry.
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("object not found: {0}")]
    NotFound(String),

    /// Anything the store will keep refusing (auth, bad request).
    #[error("store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Errors from an [`OcrBackend`](crate::traits::OcrBackend) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OcrError {
    #[error("transient OCR error: {0}")]
    Transient(String),

    /// The backend refused the request (bad document, access denied, ...).
    #[error("OCR request rejected: {0}")]
    Rejected(String),

    #[error("malformed OCR response: {0}")]
    Malformed(String),
}

impl OcrError {
    pub fn is_transient(&self) -> bool {
        matches!(self, OcrError::Transient(_))
    }
}

/// Errors from the highlight renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot read PDF: {0}")]
    Load(String),

    #[error("page {page} does not exist (document has {pages} pages)")]
    PageOutOfRange { page: u32, pages: usize },

    #[error("cannot write PDF: {0}")]
    Save(String),
}

/// Why a single document was skipped during a query.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("store unavailable after {attempts} attempts: {message}")]
    TransientStore { attempts: u32, message: String },

    #[error("document vanished during the query")]
    NotFound,

    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("document is empty")]
    EmptyDocument,

    #[error("extraction returned invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("highlight rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("store error: {0}")]
    Store(String),
}

impl DocumentError {
    /// Map a store error that survived the retry policy.
    pub fn from_store(err: StoreError, attempts: u32) -> Self {
        match err {
            StoreError::Transient(message) => DocumentError::TransientStore { attempts, message },
            StoreError::NotFound(_) => DocumentError::NotFound,
            StoreError::Permanent(message) => DocumentError::Store(message),
        }
    }
}

/// Errors surfaced to the caller of a query operation.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The scope itself could not be enumerated; nothing was processed.
    #[error("cannot list documents under '{prefix}': {source}")]
    Listing {
        prefix: String,
        #[source]
        source: StoreError,
    },

    #[error("keyword must not be empty")]
    EmptyKeyword,

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid filename: '{0}'")]
    InvalidFilename(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
