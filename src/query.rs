//! Query orchestrator.
//!
//! Drives the pipeline for one scope:
//!
//! ```text
//! list ─▶ filter ─▶ per document: extract ─▶ match ─▶ get ─▶ render ─▶ put ─▶ link
//!                                                                   │
//!                                              stale cleanup ◀──────┘ (after the run)
//! ```
//!
//! Documents are processed one at a time. Any failure inside a single
//! document is recorded as a diagnostic line and the run moves on; only a
//! failure to enumerate the scope aborts the call.
//!
//! The orchestrator holds no mutable state, so one instance may serve
//! concurrent queries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use globset::GlobSet;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::{Config, LinkMode};
use crate::error::{DocumentError, QueryError};
use crate::extract::Extractor;
use crate::matcher::{find_first_line, match_words};
use crate::models::{
    ArtifactLink, DocumentRef, LocateHit, LocateOutcome, QueryMatch, QueryOutcome, Scope,
};
use crate::render::{render, HighlightStyle};
use crate::retry::RetryPolicy;
use crate::traits::{ObjectStore, OcrBackend};

const PDF_CONTENT_TYPE: &str = "application/pdf";

pub struct QueryOrchestrator {
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    extractor: Extractor,
    root: String,
    documents: GlobSet,
    link_mode: LinkMode,
    url_ttl: Duration,
    store_retry: RetryPolicy,
    style: HighlightStyle,
}

impl QueryOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn OcrBackend>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Result<Self> {
        let extractor = Extractor::new(
            store.clone(),
            backend,
            clock.clone(),
            &config.extraction,
            &config.query,
        );
        Ok(Self {
            store,
            clock,
            extractor,
            root: config.store.root.clone(),
            documents: config.query.document_matcher()?,
            link_mode: config.query.link_mode,
            url_ttl: Duration::from_secs(config.query.url_ttl_secs),
            store_retry: RetryPolicy::new(config.query.store_retries),
            style: HighlightStyle::from(&config.render),
        })
    }

    /// Find `keyword` in every document of `scope` and store a highlighted
    /// copy of each document that contains it.
    pub async fn query_scope(
        &self,
        scope: &Scope,
        keyword: &str,
    ) -> Result<QueryOutcome, QueryError> {
        let keyword = checked_keyword(keyword)?;
        let documents = self.list_documents(scope).await?;
        info!(scope = %scope, keyword = %keyword, documents = documents.len(), "query started");

        let mut outcome = QueryOutcome::default();
        let mut written = HashSet::new();
        for document in documents {
            match self.highlight_document(scope, &keyword, &document).await {
                Ok(Some((found, summary))) => {
                    info!(key = %document, matches = found.matched_words, "document highlighted");
                    outcome.diagnostics.push(format!(
                        "{}: processed, {} matches ({})",
                        document, found.matched_words, summary
                    ));
                    written.insert(found.artifact.key().to_string());
                    outcome.matches.push(found);
                }
                Ok(None) => {
                    info!(key = %document, "keyword not found");
                    outcome
                        .diagnostics
                        .push(format!("{}: keyword not found", document));
                }
                Err(e) => {
                    warn!(key = %document, error = %e, "document skipped");
                    outcome
                        .diagnostics
                        .push(format!("{}: {}", document, describe_failure(&e)));
                }
            }
        }

        self.remove_stale(scope, &keyword, &written, &mut outcome.diagnostics)
            .await;
        info!(scope = %scope, keyword = %keyword, matches = outcome.matches.len(), "query finished");
        Ok(outcome)
    }

    /// Extract, match and, on a hit, render and store the artifact.
    async fn highlight_document(
        &self,
        scope: &Scope,
        keyword: &str,
        document: &DocumentRef,
    ) -> Result<Option<(QueryMatch, String)>, DocumentError> {
        let extraction = self.extractor.extract_words(document).await?;
        let result = match_words(document, &extraction.items, keyword);
        if !result.is_hit() {
            return Ok(None);
        }

        let source = self
            .store_retry
            .run(&*self.clock, "get", || self.store.get(document.key()))
            .await
            .map_err(|e| DocumentError::from_store(e.error, e.attempts))?;
        let highlighted = render(&source, &result.matched_words, &self.style)?;

        let artifact = DocumentRef::new(scope.artifact_key(&self.root, keyword, document));
        self.store_retry
            .run(&*self.clock, "put", || {
                self.store
                    .put(artifact.key(), highlighted.clone(), PDF_CONTENT_TYPE)
            })
            .await
            .map_err(|e| DocumentError::from_store(e.error, e.attempts))?;

        let link = self.link_for(&artifact).await;
        Ok(Some((
            QueryMatch {
                document: document.clone(),
                artifact,
                link,
                matched_words: result.matched_words.len(),
            },
            extraction.diagnostic,
        )))
    }

    async fn link_for(&self, artifact: &DocumentRef) -> ArtifactLink {
        let key = artifact.key().to_string();
        if self.link_mode == LinkMode::Key {
            return ArtifactLink::Key(key);
        }
        match self.store.signed_read_url(artifact.key(), self.url_ttl).await {
            Ok(Some(url)) => ArtifactLink::SignedUrl(url),
            Ok(None) => ArtifactLink::Key(key),
            Err(e) => {
                warn!(key = %artifact, error = %e, "cannot sign artifact URL, returning key");
                ArtifactLink::Key(key)
            }
        }
    }

    /// Delete artifacts under the (scope, keyword) prefix this run did not write.
    async fn remove_stale(
        &self,
        scope: &Scope,
        keyword: &str,
        keep: &HashSet<String>,
        diagnostics: &mut Vec<String>,
    ) {
        let prefix = scope.artifact_prefix(&self.root, keyword);
        let existing = match self
            .store_retry
            .run(&*self.clock, "list", || self.store.list(&prefix))
            .await
        {
            Ok(objects) => objects,
            Err(e) => {
                warn!(prefix = %prefix, error = %e.error, "stale result cleanup skipped");
                diagnostics.push(format!("{}: cleanup skipped: {}", prefix, e.error));
                return;
            }
        };

        for object in existing.iter().filter(|o| !keep.contains(&o.key)) {
            match self
                .store_retry
                .run(&*self.clock, "delete", || self.store.delete(&object.key))
                .await
            {
                Ok(()) => {
                    info!(key = %object.key, "removed stale result");
                    diagnostics.push(format!("{}: removed stale result", object.key));
                }
                Err(e) => {
                    warn!(key = %object.key, error = %e.error, "cannot remove stale result");
                    diagnostics.push(format!(
                        "{}: cannot remove stale result: {}",
                        object.key, e.error
                    ));
                }
            }
        }
    }

    /// Store `bytes` as a document of `scope` under the basename of `filename`.
    pub async fn upload_document(
        &self,
        scope: &Scope,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentRef, QueryError> {
        let name = sanitize_filename(filename)?;
        let document = DocumentRef::new(format!("{}{}", scope.document_prefix(&self.root), name));
        let content_type = if self.documents.is_match(name) {
            PDF_CONTENT_TYPE
        } else {
            "application/octet-stream"
        };
        self.store_retry
            .run(&*self.clock, "put", || {
                self.store.put(document.key(), bytes.clone(), content_type)
            })
            .await
            .map_err(|e| QueryError::Store(e.error))?;
        info!(key = %document, size = bytes.len(), "document uploaded");
        Ok(document)
    }

    /// Documents directly inside `scope` that match the document globs, by key.
    pub async fn list_documents(&self, scope: &Scope) -> Result<Vec<DocumentRef>, QueryError> {
        let prefix = scope.document_prefix(&self.root);
        let objects = self
            .store_retry
            .run(&*self.clock, "list", || self.store.list(&prefix))
            .await
            .map_err(|e| QueryError::Listing {
                prefix: prefix.clone(),
                source: e.error,
            })?;

        let mut documents: Vec<DocumentRef> = objects
            .into_iter()
            .filter(|o| {
                o.key
                    .strip_prefix(&prefix)
                    .is_some_and(|name| !name.contains('/') && self.documents.is_match(name))
            })
            .map(|o| DocumentRef::new(o.key))
            .collect();
        documents.sort();
        Ok(documents)
    }

    /// Plain-text search: report the first page of each document whose text
    /// contains `keyword`. No artifacts are written.
    pub async fn locate_scope(
        &self,
        scope: &Scope,
        keyword: &str,
    ) -> Result<LocateOutcome, QueryError> {
        let keyword = checked_keyword(keyword)?;
        let documents = self.list_documents(scope).await?;
        info!(scope = %scope, keyword = %keyword, documents = documents.len(), "locate started");

        let mut outcome = LocateOutcome::default();
        for document in documents {
            match self.extractor.extract_lines(&document).await {
                Ok(extraction) => match find_first_line(&extraction.items, &keyword) {
                    Some(page) => {
                        outcome
                            .diagnostics
                            .push(format!("{}: found on page {}", document, page));
                        outcome.hits.push(LocateHit { document, page });
                    }
                    None => outcome
                        .diagnostics
                        .push(format!("{}: keyword not found", document)),
                },
                Err(e) => {
                    warn!(key = %document, error = %e, "document skipped");
                    outcome
                        .diagnostics
                        .push(format!("{}: {}", document, describe_failure(&e)));
                }
            }
        }
        Ok(outcome)
    }

    /// Delete every stored artifact for (`scope`, `keyword`). Returns how many
    /// were removed.
    pub async fn clear_results(&self, scope: &Scope, keyword: &str) -> Result<usize, QueryError> {
        let keyword = checked_keyword(keyword)?;
        let prefix = scope.artifact_prefix(&self.root, &keyword);
        let objects = self
            .store_retry
            .run(&*self.clock, "list", || self.store.list(&prefix))
            .await
            .map_err(|e| QueryError::Listing {
                prefix: prefix.clone(),
                source: e.error,
            })?;

        for object in &objects {
            self.store_retry
                .run(&*self.clock, "delete", || self.store.delete(&object.key))
                .await
                .map_err(|e| QueryError::Store(e.error))?;
        }
        info!(prefix = %prefix, removed = objects.len(), "results cleared");
        Ok(objects.len())
    }
}

/// Reject a blank keyword and collapse inner whitespace, so spellings that
/// search identically also share one results folder.
fn checked_keyword(keyword: &str) -> Result<String, QueryError> {
    let collapsed = keyword.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(QueryError::EmptyKeyword);
    }
    Ok(collapsed)
}

/// Diagnostic wording for a skipped document.
fn describe_failure(e: &DocumentError) -> String {
    match e {
        DocumentError::EmptyDocument => "skipped (empty document)".to_string(),
        DocumentError::NotFound => "vanished".to_string(),
        other => format!("failed: {}", other),
    }
}

/// Reduce a client-supplied filename to a safe basename.
pub fn sanitize_filename(filename: &str) -> Result<&str, QueryError> {
    let invalid = || QueryError::InvalidFilename(filename.to_string());
    if filename.split(['/', '\\']).any(|part| part == "..") {
        return Err(invalid());
    }
    let name = filename.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name.chars().any(char::is_control) {
        return Err(invalid());
    }
    Ok(name)
}
