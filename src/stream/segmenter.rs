// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Text segmenter
//
// Decides when the chunk under construction is ready for moderation.
// Stateless: the running text and word count live in the caller.

use crate::config::{ModerationConfig, DEFAULT_MAX_WORDS, DEFAULT_MIN_WORDS};

/// Chunk boundary policy.
///
/// Ready when `word_count >= min_words` and the text ends a sentence, or
/// when `word_count >= max_words` regardless of punctuation. Whitespace-only
/// text is never ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmenter {
    min_words: usize,
    max_words: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_WORDS, DEFAULT_MAX_WORDS)
    }
}

impl Segmenter {
    pub fn new(min_words: usize, max_words: usize) -> Self {
        Self {
            min_words,
            max_words,
        }
    }

    pub fn from_config(config: &ModerationConfig) -> Self {
        Self::new(config.min_words, config.max_words)
    }

    pub fn is_ready(&self, text: &str, word_count: usize) -> bool {
        let trimmed = text.trim_end();
        if trimmed.is_empty() {
            return false;
        }
        if word_count >= self.max_words {
            return true;
        }
        word_count >= self.min_words && trimmed.ends_with(&['.', '!', '?'][..])
    }
}

/// Whitespace-separated words in one delta.
///
/// Counted per delta and summed by the caller, so a word split across two
/// deltas counts twice.
pub fn count_words(delta: &str) -> usize {
    delta.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_boundary_after_min_words_is_ready() {
        let seg = Segmenter::new(10, 30);
        let text = "one two three four five six seven eight nine ten.";
        assert!(seg.is_ready(text, count_words(text)));
    }

    #[test]
    fn boundary_ignores_trailing_whitespace() {
        let seg = Segmenter::new(3, 30);
        assert!(seg.is_ready("is this ready?  \n", 3));
        assert!(seg.is_ready("yes it is!\t", 3));
    }

    #[test]
    fn boundary_below_min_words_not_ready() {
        let seg = Segmenter::new(10, 30);
        assert!(!seg.is_ready("Short sentence.", 2));
    }

    #[test]
    fn no_boundary_below_max_not_ready() {
        let seg = Segmenter::new(10, 30);
        assert!(!seg.is_ready("a run of words with no punctuation at all yet", 12));
        assert!(!seg.is_ready("ends with a comma,", 29));
    }

    #[test]
    fn max_words_forces_ready_without_boundary() {
        let seg = Segmenter::new(10, 30);
        let text = "word ".repeat(30);
        assert!(seg.is_ready(&text, 30));
        assert!(seg.is_ready("x", 45));
    }

    #[test]
    fn whitespace_only_never_ready() {
        let seg = Segmenter::new(1, 1);
        assert!(!seg.is_ready("   \n\t", 100));
        assert!(!seg.is_ready("", 100));
    }

    #[test]
    fn count_words_splits_on_any_whitespace() {
        assert_eq!(count_words("Hello world this is "), 4);
        assert_eq!(count_words("  a\tb\nc  "), 3);
        assert_eq!(count_words("   "), 0);
        assert_eq!(count_words("unbroken"), 1);
    }
}
