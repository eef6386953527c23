//! Text extraction client.
//!
//! Drives one OCR job per document through the state machine
//!
//! ```text
//! SUBMITTED ─▶ RUNNING ─▶ RUNNING ─▶ … ─▶ SUCCEEDED
//!                 │
//!                 └──────(FAILED | timeout)─▶ FAILED
//! ```
//!
//! and normalizes the backend's blocks into [`ExtractedWord`]s (for
//! highlighting) or [`ExtractedLine`]s (for plain-text search).
//!
//! Before submitting, a metadata probe rejects zero-byte documents so no
//! backend job is wasted on them. While the job runs the extractor sleeps on
//! the injected [`Clock`] between polls; the sleep is an `.await` point, so
//! dropping the extraction future cancels the wait. A job that is still
//! running once `timeout` has elapsed is treated as failed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{ExtractionConfig, QueryConfig};
use crate::error::{DocumentError, OcrError};
use crate::models::{
    Block, BlockKind, DocumentRef, ExtractedLine, ExtractedWord, JobHandle, JobStatus,
    NormalizedBox,
};
use crate::retry::{Exhausted, RetryPolicy};
use crate::traits::{ObjectStore, OcrBackend};

/// Items extracted from one document plus a one-line summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction<T> {
    pub items: Vec<T>,
    pub diagnostic: String,
}

/// State of one extraction job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running { polls: u32 },
    Succeeded,
    Failed { reason: String },
}

impl JobState {
    /// Apply a polled status. `timed_out` tells whether the overall deadline
    /// has passed; it only matters while the job is still running.
    pub fn on_status(self, status: JobStatus, timed_out: bool) -> JobState {
        let polls = match self {
            JobState::Submitted => 1,
            JobState::Running { polls } => polls + 1,
            terminal => return terminal,
        };
        match status {
            JobStatus::Succeeded => JobState::Succeeded,
            JobStatus::Failed(message) => JobState::Failed {
                reason: message.unwrap_or_else(|| "backend reported FAILED".to_string()),
            },
            JobStatus::Running if timed_out => JobState::Failed {
                reason: format!("still running after {} polls, timed out", polls),
            },
            JobStatus::Running => JobState::Running { polls },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed { .. })
    }
}

/// Runs OCR jobs against stored documents.
pub struct Extractor {
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn OcrBackend>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    timeout: Duration,
    ocr_retry: RetryPolicy,
    store_retry: RetryPolicy,
}

impl Extractor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn OcrBackend>,
        clock: Arc<dyn Clock>,
        extraction: &ExtractionConfig,
        query: &QueryConfig,
    ) -> Self {
        Self {
            store,
            backend,
            clock,
            poll_interval: extraction.poll_interval(),
            timeout: extraction.timeout(),
            ocr_retry: RetryPolicy::new(extraction.max_retries),
            store_retry: RetryPolicy::new(query.store_retries),
        }
    }

    /// Every word with its geometry, across all pages.
    pub async fn extract_words(
        &self,
        document: &DocumentRef,
    ) -> Result<Extraction<ExtractedWord>, DocumentError> {
        let (blocks, summary) = self.run_job(document).await?;
        let words = normalize_words(&blocks)?;
        let pages = distinct_pages(words.iter().map(|w| w.page));
        Ok(Extraction {
            diagnostic: format!("{}: {} words on {} pages", summary, words.len(), pages),
            items: words,
        })
    }

    /// Every line with its page number.
    pub async fn extract_lines(
        &self,
        document: &DocumentRef,
    ) -> Result<Extraction<ExtractedLine>, DocumentError> {
        let (blocks, summary) = self.run_job(document).await?;
        let lines = normalize_lines(&blocks)?;
        let pages = distinct_pages(lines.iter().map(|l| l.page));
        Ok(Extraction {
            diagnostic: format!("{}: {} lines on {} pages", summary, lines.len(), pages),
            items: lines,
        })
    }

    /// Probe, submit, poll to a terminal state, and drain every result page.
    async fn run_job(&self, document: &DocumentRef) -> Result<(Vec<Block>, String), DocumentError> {
        let key = document.key();

        let info = self
            .store_retry
            .run(&*self.clock, "head", || self.store.head(key))
            .await
            .map_err(|e| DocumentError::from_store(e.error, e.attempts))?;
        if info.size == 0 {
            info!(key, "empty document, not submitting");
            return Err(DocumentError::EmptyDocument);
        }

        // One token per document, so a retried submit that already reached
        // the backend does not start a second job.
        let request_token = Uuid::new_v4().simple().to_string();
        let job = self
            .ocr_retry
            .run(&*self.clock, "submit", || {
                self.backend.submit(key, &request_token)
            })
            .await
            .map_err(extraction_failed)?;
        info!(key, job = %job, backend = self.backend.name(), "extraction job submitted");

        let started = self.clock.now();
        let mut state = JobState::Submitted;
        while !state.is_terminal() {
            if let JobState::Running { .. } = state {
                debug!(key, job = %job, "waiting for extraction job");
                self.clock.sleep(self.poll_interval).await;
            }
            let status = self
                .ocr_retry
                .run(&*self.clock, "poll", || self.backend.poll_status(&job))
                .await
                .map_err(extraction_failed)?;
            let timed_out = self.clock.now().duration_since(started) >= self.timeout;
            state = state.on_status(status, timed_out);
        }

        if let JobState::Failed { reason } = state {
            warn!(key, job = %job, %reason, "extraction job failed");
            return Err(DocumentError::ExtractionFailed(reason));
        }

        let blocks = self.collect_results(&job).await?;
        let elapsed = self.clock.now().duration_since(started);
        Ok((
            blocks,
            format!(
                "{} job {} finished in {}s",
                self.backend.name(),
                job,
                elapsed.as_secs()
            ),
        ))
    }

    /// Follow pagination tokens until exhausted.
    async fn collect_results(&self, job: &JobHandle) -> Result<Vec<Block>, DocumentError> {
        let mut blocks = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .ocr_retry
                .run(&*self.clock, "fetch", || {
                    self.backend.fetch_results(job, token.as_deref())
                })
                .await
                .map_err(extraction_failed)?;
            blocks.extend(page.blocks);
            match page.next_token {
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    return Err(DocumentError::ExtractionFailed(format!(
                        "backend repeated page token '{}'",
                        next
                    )));
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(blocks)
    }
}

fn extraction_failed(e: Exhausted<OcrError>) -> DocumentError {
    if e.error.is_transient() {
        DocumentError::ExtractionFailed(format!("{} (after {} attempts)", e.error, e.attempts))
    } else {
        DocumentError::ExtractionFailed(e.error.to_string())
    }
}

fn block_page(block: &Block) -> Result<u32, DocumentError> {
    match block.page {
        None => Ok(1),
        Some(0) => Err(DocumentError::InvalidGeometry(
            "block on page 0".to_string(),
        )),
        Some(page) => Ok(page),
    }
}

/// Keep `WORD` blocks that carry text and geometry, tagged with the `LINE`
/// block that lists them as children.
pub fn normalize_words(blocks: &[Block]) -> Result<Vec<ExtractedWord>, DocumentError> {
    let parents: HashMap<&str, u32> = blocks
        .iter()
        .filter(|b| b.kind == BlockKind::Line)
        .zip(0u32..)
        .flat_map(|(line, index)| line.children.iter().map(move |id| (id.as_str(), index)))
        .collect();

    let mut words = Vec::new();
    for block in blocks.iter().filter(|b| b.kind == BlockKind::Word) {
        let (text, (left, top, width, height)) = match (&block.text, block.bbox) {
            (Some(text), Some(bbox)) if !text.is_empty() => (text, bbox),
            _ => continue,
        };
        let bbox = NormalizedBox::new(left, top, width, height)
            .map_err(|e| DocumentError::InvalidGeometry(format!("word '{}': {}", text, e)))?;
        words.push(ExtractedWord {
            text: text.clone(),
            bbox,
            page: block_page(block)?,
            line: block
                .id
                .as_deref()
                .and_then(|id| parents.get(id))
                .copied(),
        });
    }
    Ok(words)
}

/// Keep `LINE` blocks that carry text.
pub fn normalize_lines(blocks: &[Block]) -> Result<Vec<ExtractedLine>, DocumentError> {
    let mut lines = Vec::new();
    for block in blocks.iter().filter(|b| b.kind == BlockKind::Line) {
        let text = match block.text {
            Some(ref text) if !text.is_empty() => text,
            _ => continue,
        };
        if let Some((left, top, width, height)) = block.bbox {
            NormalizedBox::new(left, top, width, height)
                .map_err(|e| DocumentError::InvalidGeometry(format!("line '{}': {}", text, e)))?;
        }
        lines.push(ExtractedLine {
            text: text.clone(),
            page: block_page(block)?,
        });
    }
    Ok(lines)
}

fn distinct_pages(pages: impl Iterator<Item = u32>) -> usize {
    let mut pages: Vec<u32> = pages.collect();
    pages.sort_unstable();
    pages.dedup();
    pages.len()
}
