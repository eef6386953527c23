//! Collaborator traits for the highlight pipeline.
//!
//! The orchestrator never talks to S3 or Textract directly. It receives an
//! [`ObjectStore`], an [`OcrBackend`] and a [`Clock`](crate::clock::Clock) as
//! explicit dependencies, so each can be replaced by a test double or an
//! alternative backend.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            QueryOrchestrator             │
//! │  ┌───────────┐ ┌───────────┐ ┌────────┐  │
//! │  │ObjectStore│ │OcrBackend │ │ Clock  │  │
//! │  │ S3/Memory │ │ Textract  │ │System  │  │
//! │  └───────────┘ └───────────┘ └────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     query_scope() → QueryOutcome
//! ```

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{OcrError, StoreError};
use crate::models::{JobHandle, JobStatus, ObjectInfo, ResultPage};

// ═══════════════════════════════════════════════════════════════════════
// Object Store
// ═══════════════════════════════════════════════════════════════════════

/// A blob store addressed by hierarchical string keys.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list`](ObjectStore::list) | Every object under a prefix |
/// | [`head`](ObjectStore::head) | Metadata probe (size) |
/// | [`get`](ObjectStore::get) | Fetch an object's bytes |
/// | [`put`](ObjectStore::put) | Create or overwrite an object |
/// | [`delete`](ObjectStore::delete) | Remove an object |
/// | [`signed_read_url`](ObjectStore::signed_read_url) | Time-limited read URL |
///
/// No operation is transactional. Callers must tolerate read-after-write
/// eventual consistency when the backend only offers that.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object whose key starts with `prefix`, sorted by key.
    ///
    /// Implementations follow pagination until exhausted and skip
    /// directory-marker keys ending in `/`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError>;

    async fn head(&self, key: &str) -> Result<ObjectInfo, StoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    /// Remove an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Issue a read URL valid for `ttl`, or `None` when the backend has no
    /// notion of URLs.
    async fn signed_read_url(&self, key: &str, ttl: Duration)
        -> Result<Option<String>, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════
// OCR Backend
// ═══════════════════════════════════════════════════════════════════════

/// An asynchronous text-detection service.
///
/// Jobs are submitted with a reference to a document already in the object
/// store, never with raw bytes. The caller polls
/// [`poll_status`](OcrBackend::poll_status) until a terminal state, then
/// drains [`fetch_results`](OcrBackend::fetch_results) page by page.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Short backend identifier used in logs (e.g. `"textract"`).
    fn name(&self) -> &str;

    /// Start a text-detection job for the stored object `key`.
    ///
    /// `request_token` stays the same across retries of one submission, so a
    /// backend that already accepted the request returns the same job.
    async fn submit(&self, key: &str, request_token: &str) -> Result<JobHandle, OcrError>;

    async fn poll_status(&self, job: &JobHandle) -> Result<JobStatus, OcrError>;

    /// Fetch one page of results. `page_token` is `None` for the first page
    /// and the previous page's `next_token` afterwards.
    async fn fetch_results(
        &self,
        job: &JobHandle,
        page_token: Option<&str>,
    ) -> Result<ResultPage, OcrError>;
}
