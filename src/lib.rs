//! # docspot
//!
//! Locate a keyword inside stored PDF documents and produce highlighted
//! copies of the documents that contain it.
//!
//! Users upload PDFs into logical folders (`{root}/{owner}/{folder}/`) of an
//! object store. A query runs OCR over every document of a folder, finds the
//! keyword, draws a highlight annotation over each occurrence and stores the
//! result under `{root}/{owner}/query_results/{folder}/{keyword}/`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐   ┌──────────┐
//! │ Object Store │──▶│  Extractor  │──▶│ Matcher  │──▶│ Renderer │
//! │ (S3/memory)  │   │ (Textract)  │   │          │   │ (lopdf)  │
//! └──────┬───────┘   └─────────────┘   └──────────┘   └────┬─────┘
//!        ▲                                                 │
//!        └──────────────── QueryOrchestrator ◀─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docspot upload ana taxes ./scans/        # every file of the directory
//! docspot query ana taxes invoice          # highlight and print links
//! docspot locate ana taxes invoice         # first page per document
//! docspot clear ana taxes invoice          # drop stored results
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and key layout |
//! | [`error`] | Error taxonomy |
//! | [`traits`] | `ObjectStore` and `OcrBackend` seams |
//! | [`clock`] | Injectable time source |
//! | [`retry`] | Bounded retry with backoff |
//! | [`sigv4`] | AWS Signature V4 |
//! | [`store_s3`] | S3 object store |
//! | [`store_memory`] | In-memory object store |
//! | [`textract`] | Amazon Textract OCR backend |
//! | [`extract`] | OCR job polling and normalization |
//! | [`matcher`] | Keyword matching |
//! | [`render`] | Highlight annotations |
//! | [`query`] | Pipeline orchestration |

pub mod clock;
pub mod config;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod models;
pub mod query;
pub mod render;
pub mod retry;
pub mod sigv4;
pub mod store_memory;
pub mod store_s3;
pub mod textract;
pub mod traits;
