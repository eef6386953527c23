//! Core data models used throughout docspot.
//!
//! These types describe the documents, extracted text and query results that
//! flow through the locate-and-highlight pipeline, plus the object key scheme
//! that ties a highlighted artifact to its source document.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::QueryError;

/// Folder name under an owner that holds highlighted artifacts.
pub const QUERY_RESULTS_DIR: &str = "query_results";

/// Filename prefix of every highlighted artifact.
pub const ARTIFACT_PREFIX: &str = "highlighted_";

/// Slack allowed on normalized coordinates for float noise from OCR engines.
const GEOMETRY_EPSILON: f64 = 1e-6;

/// Key of one stored document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DocumentRef(String);

impl DocumentRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }

    /// Last path segment of the key.
    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The owner/folder boundary a query searches in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    owner: String,
    folder: String,
}

impl Scope {
    /// Build a scope, rejecting segments that would escape the owner's area.
    pub fn new(owner: &str, folder: &str) -> Result<Self, QueryError> {
        let owner = owner.trim();
        let folder = folder.trim().trim_matches('/');
        for (what, value) in [("owner", owner), ("folder", folder)] {
            if value.is_empty() {
                return Err(QueryError::InvalidScope(format!("{} must not be empty", what)));
            }
            if value.contains('/') || value == "." || value == ".." {
                return Err(QueryError::InvalidScope(format!(
                    "{} '{}' must be a single path segment",
                    what, value
                )));
            }
        }
        if folder == QUERY_RESULTS_DIR {
            return Err(QueryError::InvalidScope(format!(
                "folder '{}' is reserved for highlighted results",
                QUERY_RESULTS_DIR
            )));
        }
        Ok(Self {
            owner: owner.to_string(),
            folder: folder.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// `{root}/{owner}/{folder}/`
    pub fn document_prefix(&self, root: &str) -> String {
        format!("{}{}/{}/", root_prefix(root), self.owner, self.folder)
    }

    /// `{root}/{owner}/query_results/{folder}/{keyword_slug}/`
    pub fn artifact_prefix(&self, root: &str, keyword: &str) -> String {
        format!(
            "{}{}/{}/{}/{}/",
            root_prefix(root),
            self.owner,
            QUERY_RESULTS_DIR,
            self.folder,
            keyword_slug(keyword)
        )
    }

    /// Key of the highlighted copy of `source` for `keyword`.
    pub fn artifact_key(&self, root: &str, keyword: &str, source: &DocumentRef) -> String {
        format!(
            "{}{}{}",
            self.artifact_prefix(root, keyword),
            ARTIFACT_PREFIX,
            source.basename()
        )
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.folder)
    }
}

fn root_prefix(root: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        String::new()
    } else {
        format!("{}/", root)
    }
}

/// Key-safe form of a keyword.
///
/// Matching is case-insensitive and treats any whitespace run as one space,
/// so the slug is lowercased and whitespace is collapsed first. Keywords that
/// need escaping get a hash suffix so two distinct keywords never share a
/// results folder.
pub fn keyword_slug(keyword: &str) -> String {
    let lowered = keyword
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let safe = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    if !lowered.is_empty() && lowered.chars().all(safe) && !lowered.starts_with('.') {
        return lowered;
    }
    let escaped: String = lowered
        .chars()
        .map(|c| if safe(c) && c != '.' { c } else { '_' })
        .collect();
    let digest = hex::encode(Sha256::digest(lowered.as_bytes()));
    format!("{}-{}", escaped, &digest[..8])
}

/// Metadata for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// A word or line location relative to page size. Every field is in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedBox {
    /// Validate and build a box. Returns a description of the violation when
    /// any coordinate falls outside the page.
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Result<Self, String> {
        let in_unit = |v: f64| v.is_finite() && (-GEOMETRY_EPSILON..=1.0 + GEOMETRY_EPSILON).contains(&v);
        if !(in_unit(left) && in_unit(top) && in_unit(width) && in_unit(height)) {
            return Err(format!(
                "box (left={}, top={}, width={}, height={}) outside [0,1]",
                left, top, width, height
            ));
        }
        if left + width > 1.0 + GEOMETRY_EPSILON || top + height > 1.0 + GEOMETRY_EPSILON {
            return Err(format!(
                "box (left={}, top={}, width={}, height={}) extends past the page edge",
                left, top, width, height
            ));
        }
        Ok(Self {
            left: left.clamp(0.0, 1.0),
            top: top.clamp(0.0, 1.0),
            width: width.clamp(0.0, 1.0),
            height: height.clamp(0.0, 1.0),
        })
    }
}

/// One OCR word with its location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedWord {
    pub text: String,
    pub bbox: NormalizedBox,
    /// 1-based page number.
    pub page: u32,
    /// Position of the enclosing OCR line in extraction order, or `None`
    /// when no line block lists this word as a child.
    pub line: Option<u32>,
}

/// One OCR line, used by the plain-text search path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedLine {
    pub text: String,
    pub page: u32,
}

/// Words of one document that contain the keyword.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub document: DocumentRef,
    pub matched_words: Vec<ExtractedWord>,
    pub first_page: Option<u32>,
}

impl MatchResult {
    pub fn is_hit(&self) -> bool {
        !self.matched_words.is_empty()
    }
}

/// How a highlighted artifact is handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArtifactLink {
    SignedUrl(String),
    Key(String),
}

impl std::fmt::Display for ArtifactLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactLink::SignedUrl(url) => f.write_str(url),
            ArtifactLink::Key(key) => f.write_str(key),
        }
    }
}

/// A matching document and its highlighted copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMatch {
    pub document: DocumentRef,
    pub artifact: DocumentRef,
    pub link: ArtifactLink,
    pub matched_words: usize,
}

/// Result of [`query_scope`](crate::query::QueryOrchestrator::query_scope).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub matches: Vec<QueryMatch>,
    pub diagnostics: Vec<String>,
}

impl QueryOutcome {
    pub fn matched_documents(&self) -> Vec<&DocumentRef> {
        self.matches.iter().map(|m| &m.document).collect()
    }
}

/// A document whose text contains the keyword, and where it first appears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocateHit {
    pub document: DocumentRef,
    pub page: u32,
}

/// Result of [`locate_scope`](crate::query::QueryOrchestrator::locate_scope).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocateOutcome {
    pub hits: Vec<LocateHit>,
    pub diagnostics: Vec<String>,
}

/// Opaque identifier of an in-flight extraction job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status reported by the OCR backend for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed(Option<String>),
}

/// Granularity of an OCR block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Word,
    Line,
    Other(String),
}

impl BlockKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "WORD" => BlockKind::Word,
            "LINE" => BlockKind::Line,
            other => BlockKind::Other(other.to_string()),
        }
    }
}

/// A raw block from the OCR backend. Geometry is still unvalidated.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub text: Option<String>,
    /// `(left, top, width, height)` as reported.
    pub bbox: Option<(f64, f64, f64, f64)>,
    pub page: Option<u32>,
    /// Backend identifier of the block, when it has one.
    pub id: Option<String>,
    /// Ids of the blocks this one contains, e.g. the words of a line.
    pub children: Vec<String>,
}

/// One page of job results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    pub blocks: Vec<Block>,
    pub next_token: Option<String>,
}
