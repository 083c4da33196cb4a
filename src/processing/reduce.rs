//! Token-budgeted batching for the reduce stage.
//!
//! When the joined map summaries exceed the token budget, they are grouped into consecutive
//! batches that each fit, every batch is collapsed into one intermediate summary, and the
//! process repeats until a single prompt fits.

use super::citations::merge_citations;
use super::prompts::join_summaries;
use super::tokens::TokenCounter;
use std::ops::Range;

/// A summary flowing through the reduce stage with the citation tags it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    /// Summary prose.
    pub text: String,
    /// Tags of every chunk folded into this summary, first-seen order.
    pub citations: Vec<String>,
}

impl Digest {
    /// Wrap a map-stage summary carrying a single tag.
    pub fn from_summary(text: String, citation: String) -> Self {
        Self {
            text,
            citations: vec![citation],
        }
    }
}

/// Token count of the digests as joined for a reduce prompt.
pub fn joined_tokens(digests: &[Digest], counter: &TokenCounter) -> usize {
    counter(&join_summaries(digests.iter().map(|d| d.text.as_str())))
}

/// Group consecutive digests into batches whose joined text fits `token_max`.
///
/// Order is preserved and every batch is non-empty. A digest that alone exceeds the budget
/// becomes its own batch.
pub fn plan_batches(
    digests: &[Digest],
    token_max: usize,
    counter: &TokenCounter,
) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    while start < digests.len() {
        let mut end = start + 1;
        while end < digests.len() && joined_tokens(&digests[start..=end], counter) <= token_max {
            end += 1;
        }
        batches.push(start..end);
        start = end;
    }
    batches
}

/// Union of the citations of `digests`, first-seen order.
pub fn batch_citations(digests: &[Digest]) -> Vec<String> {
    merge_citations(digests.iter().map(|d| d.citations.as_slice()))
}
