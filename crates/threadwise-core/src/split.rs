//! Recursive splitting for content that exceeds the token budget on its own.
//!
//! Splitting descends through [`SplitLevel`]s: paragraph boundaries first,
//! then sentence boundaries, then raw token windows. The token level is the
//! floor: it always advances by at least one token, so recursion terminates
//! even for content with no semantic anchors. A single token whose count
//! alone exceeds the budget becomes a forced piece.

use crate::error::TokenizationError;
use crate::tokenizer::Tokenizer;

/// Granularity of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitLevel {
    Paragraph,
    Sentence,
    Token,
}

impl SplitLevel {
    fn finer(self) -> SplitLevel {
        match self {
            SplitLevel::Paragraph => SplitLevel::Sentence,
            SplitLevel::Sentence | SplitLevel::Token => SplitLevel::Token,
        }
    }

    fn separator(self) -> &'static str {
        match self {
            SplitLevel::Paragraph => "\n\n",
            SplitLevel::Sentence => " ",
            SplitLevel::Token => "",
        }
    }
}

/// One piece of split content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub text: String,
    /// The piece is a single token that exceeds the budget.
    pub forced: bool,
}

impl Piece {
    fn fitted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            forced: false,
        }
    }
}

/// Split `text` into pieces of at most `budget` tokens each (forced
/// pieces excepted). Pieces are returned in reading order; only
/// whitespace at split points is dropped.
pub fn split_oversized(
    tokenizer: &dyn Tokenizer,
    text: &str,
    budget: usize,
) -> Result<Vec<Piece>, TokenizationError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    split_at(tokenizer, text, budget.max(1), SplitLevel::Paragraph)
}

fn split_at(
    tokenizer: &dyn Tokenizer,
    text: &str,
    budget: usize,
    level: SplitLevel,
) -> Result<Vec<Piece>, TokenizationError> {
    if tokenizer.count(text)? <= budget {
        return Ok(vec![Piece::fitted(text)]);
    }
    if level == SplitLevel::Token {
        return token_windows(tokenizer, text, budget);
    }

    let segments = match level {
        SplitLevel::Paragraph => paragraphs(text),
        _ => sentences(text),
    };
    if segments.len() <= 1 {
        return split_at(tokenizer, text, budget, level.finer());
    }

    let sep = level.separator();
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for seg in segments {
        if tokenizer.count(seg)? > budget {
            if !buf.is_empty() {
                pieces.push(Piece::fitted(std::mem::take(&mut buf)));
            }
            pieces.extend(split_at(tokenizer, seg, budget, level.finer())?);
            continue;
        }

        let candidate = if buf.is_empty() {
            seg.to_string()
        } else {
            format!("{}{}{}", buf, sep, seg)
        };
        if tokenizer.count(&candidate)? <= budget {
            buf = candidate;
        } else {
            pieces.push(Piece::fitted(std::mem::replace(&mut buf, seg.to_string())));
        }
    }

    if !buf.is_empty() {
        pieces.push(Piece::fitted(buf));
    }

    Ok(pieces)
}

/// Last-resort split at raw token boundaries.
fn token_windows(
    tokenizer: &dyn Tokenizer,
    text: &str,
    budget: usize,
) -> Result<Vec<Piece>, TokenizationError> {
    let spans = tokenizer.checked_spans(text)?;
    let n = spans.len();
    let window = |i: usize, j: usize| &text[spans[i].start..spans[j - 1].end];

    let mut pieces = Vec::new();
    let mut i = 0;
    while i < n {
        let (mut lo, mut hi) = (i + 1, (i + budget).min(n));
        if tokenizer.count(window(i, lo))? > budget {
            pieces.push(Piece {
                text: window(i, lo).to_string(),
                forced: true,
            });
            i = lo;
            continue;
        }
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if tokenizer.count(window(i, mid))? <= budget {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        let piece = window(i, lo).trim();
        if !piece.is_empty() {
            pieces.push(Piece::fitted(piece));
        }
        i = lo;
    }
    Ok(pieces)
}

fn paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split after `.`, `?`, or `!` when followed by whitespace.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '?' | '!') {
            continue;
        }
        if let Some(&(_, next)) = chars.peek() {
            if next.is_whitespace() {
                let end = i + c.len_utf8();
                let s = text[start..end].trim();
                if !s.is_empty() {
                    out.push(s);
                }
                start = end;
            }
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}
