//! Token-bounded text splitting with overlap.
//!
//! Sizes are counted with the cl100k BPE vocabulary, so a segment never holds
//! more than `chunk_size` tokens whatever the script.

use std::sync::LazyLock;

use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::models::IngestionConfig;

static CL100K: LazyLock<CoreBPE> =
    LazyLock::new(|| cl100k_base().unwrap_or_else(|e| panic!("invalid cl100k vocabulary: {e}")));

/// Upper bound on characters examined per token of budget when sizing a window.
const MAX_CHARS_PER_TOKEN: usize = 8;

/// Number of cl100k tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    CL100K.encode_with_special_tokens(text).len()
}

/// Splits cleaned text into overlapping segments of at most `chunk_size` tokens.
#[derive(Debug, Clone)]
pub struct TokenTextSplitter {
    chunk_size: usize,
    overlap: usize,
    min_chunk_chars: usize,
    max_chunks: usize,
    keep_separator: bool,
}

impl TokenTextSplitter {
    pub fn new(config: &IngestionConfig) -> Self {
        let chunk_size = (config.chunk_size as usize).max(1);
        Self {
            chunk_size,
            overlap: (config.chunk_overlap as usize).min(chunk_size - 1),
            min_chunk_chars: config.min_chunk_chars,
            max_chunks: config.max_chunks.max(1),
            keep_separator: config.keep_separator,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&IngestionConfig::default())
    }

    /// Split `text` into ordered segments.
    ///
    /// Segments are trimmed; any at or below the minimum length are dropped.
    /// At most `max_chunks` segments are returned.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut segments = Vec::new();
        let mut start = 0;

        while start < total && segments.len() < self.max_chunks {
            let fit_end = self.window_end(&chars, start);
            let mut end = fit_end;
            if fit_end < total {
                end = self.find_break_point(&chars, start, fit_end);
                if end < fit_end && !self.fits(&chars[start..end]) {
                    end = fit_end;
                }
            }

            if let Some(segment) = self.finish_segment(&chars[start..end]) {
                segments.push(segment);
            }

            if end >= total {
                break;
            }
            start = self.next_start(&chars, start, end);
        }

        segments
    }

    fn render(&self, chars: &[char]) -> String {
        let raw: String = chars.iter().collect();
        if self.keep_separator {
            raw.trim().to_string()
        } else {
            raw.replace(['\r', '\n'], " ").trim().to_string()
        }
    }

    fn fits(&self, chars: &[char]) -> bool {
        count_tokens(&self.render(chars)) <= self.chunk_size
    }

    fn finish_segment(&self, chars: &[char]) -> Option<String> {
        let segment = self.render(chars);
        (segment.chars().count() > self.min_chunk_chars).then_some(segment)
    }

    /// Largest end such that `chars[start..end]` fits the token budget.
    ///
    /// Always advances by at least one character.
    fn window_end(&self, chars: &[char], start: usize) -> usize {
        let limit = (start + self.chunk_size * MAX_CHARS_PER_TOKEN).min(chars.len());
        if self.fits(&chars[start..limit]) {
            return limit;
        }

        let (mut lo, mut hi) = (start + 1, limit);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.fits(&chars[start..mid]) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Start of the next window so that roughly `overlap` tokens repeat.
    fn next_start(&self, chars: &[char], start: usize, end: usize) -> usize {
        if self.overlap == 0 {
            return end;
        }
        let window = end - start;
        let tokens = count_tokens(&chars[start..end].iter().collect::<String>()).max(1);
        let back = (window * self.overlap / tokens).min(window - 1);
        let mut next = end - back;

        // Begin the overlap on a word boundary when one is close by.
        if let Some(offset) = chars[next..end].iter().position(|c| c.is_whitespace()) {
            if next + offset + 1 < end {
                next += offset + 1;
            }
        }
        next.max(start + 1)
    }

    /// Find a natural break point in the second half of the window.
    fn find_break_point(&self, chars: &[char], start: usize, target_end: usize) -> usize {
        let search_start = (start + (target_end - start) / 2).max(start + 1);
        if search_start >= target_end {
            return target_end;
        }
        let search_range = &chars[search_start..target_end];

        let mut paragraph = None;
        let mut last_newline = None;
        let mut last_sentence = None;
        let mut last_space = None;

        for (i, c) in search_range.iter().enumerate() {
            let pos = search_start + i;
            match c {
                '\n' => {
                    if i > 0 && search_range[i - 1] == '\n' {
                        paragraph = Some(pos + 1);
                    }
                    last_newline = Some(pos + 1);
                }
                '.' | '!' | '?' => {
                    if chars.get(pos + 1).is_some_and(|c| c.is_whitespace()) {
                        last_sentence = Some(pos + 1);
                    }
                }
                '。' | '！' | '？' | '；' => last_sentence = Some(pos + 1),
                ' ' | '\t' => last_space = Some(pos + 1),
                _ => {}
            }
        }

        let boundary = if self.keep_separator {
            paragraph.or(last_newline).or(last_sentence)
        } else {
            last_sentence.or(last_newline)
        };
        boundary.or(last_space).unwrap_or(target_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: u32, chunk_overlap: u32) -> TokenTextSplitter {
        TokenTextSplitter::new(&IngestionConfig {
            chunk_size,
            chunk_overlap,
            ..Default::default()
        })
    }

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        let count = count_tokens("Hello, world!");
        assert!(count > 0 && count < 10);
    }

    #[test]
    fn test_small_text_single_segment() {
        let segments = TokenTextSplitter::with_defaults().split("Hello, world!");
        assert_eq!(segments, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text() {
        assert!(TokenTextSplitter::with_defaults().split("").is_empty());
        assert!(TokenTextSplitter::with_defaults().split("   \n ").is_empty());
    }

    #[test]
    fn test_tiny_segment_dropped() {
        // 5 chars is at the floor and is discarded
        assert!(TokenTextSplitter::with_defaults().split("hello").is_empty());
        assert_eq!(TokenTextSplitter::with_defaults().split("hello!").len(), 1);
    }

    #[test]
    fn test_long_text_overlaps() {
        let splitter = splitter(50, 10);
        let text = "The committee reviews every request within five working days. ".repeat(40);
        let segments = splitter.split(&text);

        assert!(segments.len() > 1);
        assert!(segments.iter().all(|s| count_tokens(s) <= 50));
        let covered: usize = segments.iter().map(|s| s.len()).sum();
        assert!(covered > text.trim().len());
    }

    #[test]
    fn test_cjk_segments_within_token_budget() {
        let splitter = splitter(20, 4);
        let text = "员工每年享有二十天带薪年假，未使用的假期可顺延一年。病假需要医生证明。".repeat(30);
        let segments = splitter.split(&text);

        assert!(segments.len() > 1);
        for segment in &segments {
            assert!(count_tokens(segment) <= 20, "{} tokens: {segment}", count_tokens(segment));
        }
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let splitter = splitter(20, 2);
        let first = format!("word{}.", " word".repeat(11));
        let text = format!("{first}\n\n{}", "another sentence follows here ".repeat(5));
        let segments = splitter.split(&text);

        assert_eq!(segments[0], first);
    }

    #[test]
    fn test_without_separator_flattens_newlines() {
        let splitter = TokenTextSplitter::new(&IngestionConfig {
            keep_separator: false,
            ..Default::default()
        });
        let segments = splitter.split("line one\nline two");
        assert_eq!(segments, vec!["line one line two".to_string()]);
    }

    #[test]
    fn test_max_chunks_cap() {
        let splitter = TokenTextSplitter::new(&IngestionConfig {
            chunk_size: 10,
            chunk_overlap: 0,
            max_chunks: 3,
            ..Default::default()
        });
        let segments = splitter.split(&"word ".repeat(200));
        assert_eq!(segments.len(), 3);
    }

    #[test]
    fn test_deterministic() {
        let splitter = splitter(20, 5);
        let text = "The quick brown fox. Jumps over the lazy dog.\n\n".repeat(20);
        assert_eq!(splitter.split(&text), splitter.split(&text));
    }
}
