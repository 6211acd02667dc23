//! Document chunking for indexing.
//!
//! Splits free-form document text into overlapping chunks bounded by a token
//! budget. Chunks are the retrieval unit: each is embedded and indexed
//! independently, so the split has to keep paragraphs intact and carry a
//! trailing overlap so context spanning a boundary stays findable.

use serde::{Deserialize, Serialize};

use crate::tokens::estimate_tokens;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the chunking service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum estimated tokens per chunk.
    pub max_tokens: usize,
    /// Tokens' worth of trailing text carried into the next chunk.
    pub overlap_tokens: usize,
    /// Paragraph separator to split on.
    pub separator: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            overlap_tokens: 50,
            separator: "\n\n".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChunkingService
// ─────────────────────────────────────────────────────────────────────────────

/// Splits document text into bounded, overlapping chunks.
#[derive(Debug, Clone, Default)]
pub struct ChunkingService {
    config: ChunkingConfig,
}

impl ChunkingService {
    /// Create a chunking service with the given configuration.
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Split text into ordered chunks.
    ///
    /// Paragraphs are accumulated greedily; when adding the next paragraph
    /// would push the buffer over the token budget, the buffer is closed and
    /// the next chunk is seeded with a trailing overlap from it. A single
    /// paragraph that alone exceeds the budget is emitted as its own
    /// oversized chunk rather than split further, which guarantees
    /// termination on pathological input.
    ///
    /// Empty or whitespace-only input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let paragraphs: Vec<&str> = text
            .split(self.config.separator.as_str())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let mut chunks = Vec::new();
        let mut buffer = String::new();

        for paragraph in paragraphs {
            if buffer.is_empty() {
                buffer.push_str(paragraph);
                continue;
            }

            let candidate_tokens =
                estimate_tokens(&buffer) + estimate_tokens(paragraph);

            if candidate_tokens > self.config.max_tokens {
                let overlap = self.trailing_overlap(&buffer);
                chunks.push(std::mem::take(&mut buffer));

                if !overlap.is_empty() {
                    buffer.push_str(&overlap);
                    buffer.push_str(&self.config.separator);
                }
                buffer.push_str(paragraph);
            } else {
                buffer.push_str(&self.config.separator);
                buffer.push_str(paragraph);
            }
        }

        if !buffer.is_empty() {
            chunks.push(buffer);
        }

        chunks
    }

    /// Last `overlap_tokens`' worth of words from a closed chunk.
    fn trailing_overlap(&self, chunk: &str) -> String {
        if self.config.overlap_tokens == 0 {
            return String::new();
        }

        let words: Vec<&str> = chunk.split_whitespace().collect();
        let mut taken: Vec<&str> = Vec::new();
        let mut tokens = 0;

        for word in words.iter().rev() {
            let word_tokens = estimate_tokens(word);
            if tokens + word_tokens > self.config.overlap_tokens {
                break;
            }
            tokens += word_tokens;
            taken.push(word);
        }

        taken.reverse();
        taken.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_chunker() -> ChunkingService {
        ChunkingService::new(ChunkingConfig {
            max_tokens: 20,
            overlap_tokens: 5,
            separator: "\n\n".to_string(),
        })
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunker = ChunkingService::default();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\n  \t").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = ChunkingService::default();
        let chunks = chunker.chunk("A short paragraph.\n\nAnd another one.");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("A short paragraph."));
        assert!(chunks[0].contains("And another one."));
    }

    #[test]
    fn test_splits_when_over_budget() {
        let chunker = small_chunker();
        let para = "one two three four five six seven eight nine ten";
        let text = format!("{para}\n\n{para}\n\n{para}");

        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1, "expected multiple chunks, got {chunks:?}");
    }

    #[test]
    fn test_overlap_carried_forward() {
        let chunker = small_chunker();
        let para = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let text = format!("{para}\n\n{para}");

        let chunks = chunker.chunk(&text);
        assert_eq!(chunks.len(), 2);

        // The tail of chunk 0 appears at the start of chunk 1.
        let tail: Vec<&str> = chunks[0].split_whitespace().rev().take(2).collect();
        for word in tail {
            assert!(
                chunks[1].contains(word),
                "overlap word {word:?} missing from second chunk"
            );
        }
        // The second chunk leads with the overlap, not the paragraph itself.
        assert!(!chunks[1].starts_with(para));
    }

    #[test]
    fn test_oversized_paragraph_single_chunk() {
        let chunker = small_chunker();
        // One paragraph far beyond max_tokens, no separators inside
        let words: Vec<String> = (0..200).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");

        let chunks = chunker.chunk(&text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("word199"));
    }

    #[test]
    fn test_custom_separator() {
        let chunker = ChunkingService::new(ChunkingConfig {
            max_tokens: 8,
            overlap_tokens: 0,
            separator: "---".to_string(),
        });
        let chunks = chunker.chunk("first part here now---second part here now");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "first part here now");
        assert_eq!(chunks[1], "second part here now");
    }
}
