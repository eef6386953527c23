//! Keyword matching over extracted text.
//!
//! Matching is case-insensitive substring containment: `"cat"` matches
//! `"Category"`. There is no tokenization or fuzziness.
//!
//! - Word granularity ([`match_words`]) is exhaustive, because every
//!   occurrence gets highlighted. A keyword of several words matches runs of
//!   that many consecutive words of one OCR line, so `"invoice 123"`
//!   highlights both words and never pairs the end of one line with the
//!   start of the next.
//! - Line granularity ([`find_first_line`]) stops at the first hit and only
//!   reports its page.

use crate::models::{DocumentRef, ExtractedLine, ExtractedWord, MatchResult};

/// Case-folded keyword ready for repeated containment checks.
#[derive(Debug, Clone)]
pub struct Needle(String);

impl Needle {
    /// `None` for an empty or whitespace-only keyword. Inner whitespace is
    /// collapsed to single spaces.
    pub fn new(keyword: &str) -> Option<Self> {
        let folded = keyword
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if folded.is_empty() {
            None
        } else {
            Some(Self(folded))
        }
    }

    pub fn is_in(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.0)
    }

    /// Number of OCR words an occurrence spans.
    pub fn word_span(&self) -> usize {
        self.0.split(' ').count()
    }
}

/// Collect every word of `document` that is part of an occurrence of
/// `keyword`, in extraction order.
pub fn match_words(document: &DocumentRef, words: &[ExtractedWord], keyword: &str) -> MatchResult {
    let mut hit = vec![false; words.len()];
    if let Some(needle) = Needle::new(keyword) {
        let span = needle.word_span();
        for (start, window) in words.windows(span).enumerate() {
            if !same_line(window) {
                continue;
            }
            let joined = window
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            if needle.is_in(&joined) {
                hit[start..start + span].fill(true);
            }
        }
    }
    let matched_words: Vec<ExtractedWord> = words
        .iter()
        .zip(hit)
        .filter_map(|(w, hit)| hit.then(|| w.clone()))
        .collect();
    MatchResult {
        document: document.clone(),
        first_page: matched_words.first().map(|w| w.page),
        matched_words,
    }
}

/// A single word always qualifies; a run needs a known line shared by all.
fn same_line(window: &[ExtractedWord]) -> bool {
    let first = &window[0];
    window.len() == 1
        || (first.line.is_some()
            && window
                .iter()
                .all(|w| w.line == first.line && w.page == first.page))
}

/// Page of the first line containing `keyword`.
pub fn find_first_line(lines: &[ExtractedLine], keyword: &str) -> Option<u32> {
    let needle = Needle::new(keyword)?;
    lines.iter().find(|l| needle.is_in(&l.text)).map(|l| l.page)
}
