//! Tokenizer adapter: pluggable, deterministic token counting.
//!
//! A [`Tokenizer`] reports the byte spans of the tokens in a text. Counting,
//! head/tail truncation, and raw token-window splitting are all derived from
//! those spans, so every scheme supports the chunker's overlap and
//! last-resort split rules without exposing token ids.
//!
//! # Named schemes
//!
//! | Name | Token |
//! |------|-------|
//! | `cl100k_base` | a BPE token of the `cl100k_base` encoding (default) |
//! | `o200k_base` | a BPE token of the `o200k_base` encoding |
//! | `words` | a run of word characters, or a single punctuation mark |
//! | `chars` | four consecutive characters (the 4 chars ≈ 1 token heuristic) |
//!
//! Custom schemes implement [`Tokenizer`] directly or wrap a closure in
//! [`FnTokenizer`]. A scheme may override [`Tokenizer::count`] (e.g. to
//! weight long tokens); budget checks always go through `count`.

use std::ops::Range;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::error::{ConfigError, TokenizationError};

/// Characters per token for the `chars` scheme.
const CHARS_PER_TOKEN: usize = 4;

/// Token counting capability. Implementations must be deterministic and
/// free of side effects: parallel and sequential chunking must agree.
pub trait Tokenizer: Send + Sync {
    /// Scheme name, used in error messages and logs.
    fn name(&self) -> &str;

    /// Ordered, non-overlapping byte spans, one per token.
    fn spans(&self, text: &str) -> Result<Vec<Range<usize>>, TokenizationError>;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> Result<usize, TokenizationError> {
        Ok(self.spans(text)?.len())
    }

    /// [`spans`](Tokenizer::spans), checked for ordering and UTF-8 boundaries.
    fn checked_spans(&self, text: &str) -> Result<Vec<Range<usize>>, TokenizationError> {
        let spans = self.spans(text)?;
        let mut prev_end = 0;
        for s in &spans {
            if s.start < prev_end
                || s.end < s.start
                || s.end > text.len()
                || !text.is_char_boundary(s.start)
                || !text.is_char_boundary(s.end)
            {
                return Err(TokenizationError::new(
                    self.name(),
                    format!("invalid token span {}..{}", s.start, s.end),
                ));
            }
            prev_end = s.end;
        }
        Ok(spans)
    }

    /// Longest prefix of `text`, ending on a token boundary, whose count
    /// fits in `budget`.
    fn head_within<'a>(&self, text: &'a str, budget: usize) -> Result<&'a str, TokenizationError> {
        let spans = self.checked_spans(text)?;
        if self.count(text)? <= budget {
            return Ok(text);
        }
        let prefix = |k: usize| -> &'a str {
            if k == 0 {
                ""
            } else {
                &text[..spans[k - 1].end]
            }
        };
        let (mut lo, mut hi) = (0usize, spans.len());
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.count(prefix(mid))? <= budget {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Ok(prefix(lo))
    }

    /// Longest suffix of `text`, starting on a token boundary, whose count
    /// fits in `budget`.
    fn tail_within<'a>(&self, text: &'a str, budget: usize) -> Result<&'a str, TokenizationError> {
        let spans = self.checked_spans(text)?;
        if self.count(text)? <= budget {
            return Ok(text);
        }
        let n = spans.len();
        let suffix = |k: usize| -> &'a str {
            if k == 0 {
                ""
            } else {
                &text[spans[n - k].start..]
            }
        };
        let (mut lo, mut hi) = (0usize, n);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.count(suffix(mid))? <= budget {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Ok(suffix(lo))
    }
}

/// Word-level scheme: alphanumeric runs and individual punctuation marks.
/// Whitespace carries no tokens.
#[derive(Debug, Clone, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn name(&self) -> &str {
        "words"
    }

    fn spans(&self, text: &str) -> Result<Vec<Range<usize>>, TokenizationError> {
        let mut spans = Vec::new();
        let mut word_start: Option<usize> = None;
        for (i, c) in text.char_indices() {
            if c.is_alphanumeric() || c == '_' {
                if word_start.is_none() {
                    word_start = Some(i);
                }
                continue;
            }
            if let Some(start) = word_start.take() {
                spans.push(start..i);
            }
            if !c.is_whitespace() {
                spans.push(i..i + c.len_utf8());
            }
        }
        if let Some(start) = word_start {
            spans.push(start..text.len());
        }
        Ok(spans)
    }
}

/// Fixed-ratio scheme: every four characters (whitespace included) form a token.
#[derive(Debug, Clone, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn name(&self) -> &str {
        "chars"
    }

    fn spans(&self, text: &str) -> Result<Vec<Range<usize>>, TokenizationError> {
        let mut spans = Vec::new();
        let mut start = 0;
        let mut n = 0;
        for (i, _) in text.char_indices() {
            if n == CHARS_PER_TOKEN {
                spans.push(start..i);
                start = i;
                n = 0;
            }
            n += 1;
        }
        if n > 0 {
            spans.push(start..text.len());
        }
        Ok(spans)
    }
}

/// Byte-pair encoding scheme backed by a tiktoken vocabulary.
///
/// A token that ends inside a multi-byte character is merged with the
/// following tokens until the decoded bytes form valid UTF-8, so a span
/// may cover more than one token id. `count` still reports the raw number
/// of token ids.
pub struct BpeTokenizer {
    name: &'static str,
    bpe: CoreBPE,
}

impl BpeTokenizer {
    pub fn cl100k_base() -> Result<Self, ConfigError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| ConfigError(format!("failed to load cl100k_base: {}", e)))?;
        Ok(Self {
            name: "cl100k_base",
            bpe,
        })
    }

    pub fn o200k_base() -> Result<Self, ConfigError> {
        let bpe = tiktoken_rs::o200k_base()
            .map_err(|e| ConfigError(format!("failed to load o200k_base: {}", e)))?;
        Ok(Self {
            name: "o200k_base",
            bpe,
        })
    }
}

impl std::fmt::Debug for BpeTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeTokenizer").field("name", &self.name).finish()
    }
}

impl Tokenizer for BpeTokenizer {
    fn name(&self) -> &str {
        self.name
    }

    fn spans(&self, text: &str) -> Result<Vec<Range<usize>>, TokenizationError> {
        let tokens = self.bpe.encode_ordinary(text);
        let mut spans = Vec::with_capacity(tokens.len());
        let mut pending = Vec::new();
        let mut cursor = 0;
        for token in tokens {
            pending.push(token);
            let Ok(piece) = self.bpe.decode(pending.clone()) else {
                continue;
            };
            if !text[cursor..].starts_with(piece.as_str()) {
                return Err(TokenizationError::new(
                    self.name,
                    format!("decoded token does not match text at byte {}", cursor),
                ));
            }
            spans.push(cursor..cursor + piece.len());
            cursor += piece.len();
            pending.clear();
        }
        if !pending.is_empty() || cursor != text.len() {
            return Err(TokenizationError::new(
                self.name,
                format!("tokens cover {} of {} bytes", cursor, text.len()),
            ));
        }
        Ok(spans)
    }

    fn count(&self, text: &str) -> Result<usize, TokenizationError> {
        Ok(self.bpe.encode_ordinary(text).len())
    }
}

type SpanFn = dyn Fn(&str) -> Vec<Range<usize>> + Send + Sync;

/// Custom scheme backed by a span-producing closure.
pub struct FnTokenizer {
    name: String,
    f: Box<SpanFn>,
}

impl FnTokenizer {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> Vec<Range<usize>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl std::fmt::Debug for FnTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTokenizer").field("name", &self.name).finish()
    }
}

impl Tokenizer for FnTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn spans(&self, text: &str) -> Result<Vec<Range<usize>>, TokenizationError> {
        Ok((self.f)(text))
    }
}

/// Resolve a named scheme from configuration.
pub fn tokenizer_for(name: &str) -> Result<Arc<dyn Tokenizer>, ConfigError> {
    match name {
        "cl100k_base" => Ok(Arc::new(BpeTokenizer::cl100k_base()?)),
        "o200k_base" => Ok(Arc::new(BpeTokenizer::o200k_base()?)),
        "words" => Ok(Arc::new(WordTokenizer)),
        "chars" => Ok(Arc::new(CharTokenizer)),
        other => Err(ConfigError(format!(
            "unknown tokenizer '{}'. Use cl100k_base, o200k_base, words or chars.",
            other
        ))),
    }
}
