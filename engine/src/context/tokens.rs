//! Pluggable token estimation.
//!
//! No tokenizer crate is vendored in; both implementations here are
//! approximations. A real BPE-accurate estimator can be dropped in later by
//! implementing `TokenEstimator` without touching call sites.

use crate::message::Message;

pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, messages: &[Message]) -> usize;
}

/// ~4 characters per token, the same ratio the original implementation
/// falls back to when no accurate tokenizer is available.
pub struct CharCountEstimator;

impl TokenEstimator for CharCountEstimator {
    fn estimate(&self, messages: &[Message]) -> usize {
        let mut total_chars = 0usize;
        for msg in messages {
            total_chars += msg.content().len();
            for tc in msg.tool_calls() {
                total_chars += tc.name.len() + tc.arguments.to_string().len();
            }
        }
        total_chars / 4
    }
}

/// Whitespace word count, a cruder but cheaper estimate than char counting.
pub struct WordCountEstimator;

impl TokenEstimator for WordCountEstimator {
    fn estimate(&self, messages: &[Message]) -> usize {
        let mut total_words = 0usize;
        for msg in messages {
            total_words += msg.content().split_whitespace().count();
            for tc in msg.tool_calls() {
                total_words += tc.name.split_whitespace().count();
            }
        }
        // words roughly undercount tokens; scale up to stay conservative.
        (total_words as f64 * 1.3) as usize
    }
}
