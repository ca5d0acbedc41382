//! Thread-aware chunker.
//!
//! Turns an [`EmailThread`] into detail-level [`Unit`]s. Messages are
//! formatted with a sender/date header and packed greedily in chronological
//! order until the next one would break `chunk_size`. Every unit after the
//! first opens with a thread-context marker naming the thread and the
//! senders and dates of the messages that came before, followed by an
//! overlap seed taken from the end of the previous unit. Message text
//! reaches a later unit only through the seed, so adjacent units never
//! share more than `chunk_overlap` tokens of body text:
//!
//! ```text
//! [Thread: Q3 budget | Preceding: Alice (Jan 15) | Bob (Jan 15)]
//!
//! <overlap seed>
//!
//! **From: Bob <bob@example.com> (2024-01-15 11:02)**
//!
//! <message body>
//! ```
//!
//! A message that cannot fit in a unit on its own is split by
//! [`split_oversized`](crate::split::split_oversized); its pieces become
//! consecutive units whose markers say which message they continue.
//! Unsplittable content is emitted without an overlap seed and flagged
//! `oversized` when it still breaks the budget.

use std::fmt::Write;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ChunkerConfig;
use crate::error::{ChunkingError, ConfigError, TokenizationError};
use crate::models::{EmailMessage, EmailThread, Unit, UnitLevel, UnitMetadata, SOURCE_TYPE};
use crate::split::split_oversized;
use crate::tokenizer::{tokenizer_for, Tokenizer};

/// Separator between the marker, the overlap seed, and each message.
const PART_SEPARATOR: &str = "\n\n";

/// Render a message the way it appears inside a unit: a bold sender/date
/// header, a blank line, then the body.
pub fn format_message(msg: &EmailMessage) -> String {
    let header = format!(
        "**From: {} ({})**",
        msg.sender.trim(),
        msg.timestamp.format("%Y-%m-%d %H:%M")
    );
    let body = msg.body.trim();
    if body.is_empty() {
        header
    } else {
        format!("{}{}{}", header, PART_SEPARATOR, body)
    }
}

/// Display name from an address such as `"Alice Smith <alice@example.com>"`.
/// Falls back to the bare address.
pub fn display_name(sender: &str) -> &str {
    let sender = sender.trim();
    match sender.find('<') {
        Some(idx) if sender.ends_with('>') => {
            let name = sender[..idx].trim().trim_matches('"').trim();
            if name.is_empty() {
                sender[idx + 1..sender.len() - 1].trim()
            } else {
                name
            }
        }
        _ => sender,
    }
}

/// Splits threads into detail units under a token budget.
pub struct ThreadChunker {
    config: ChunkerConfig,
    tokenizer: Arc<dyn Tokenizer>,
}

impl ThreadChunker {
    /// Build a chunker using the tokenizer scheme named in `config`.
    pub fn new(config: ChunkerConfig) -> Result<Self, ConfigError> {
        let tokenizer = tokenizer_for(&config.tokenizer)?;
        Self::with_tokenizer(config, tokenizer)
    }

    /// Build a chunker around a custom tokenizer. `config.tokenizer` is ignored.
    pub fn with_tokenizer(
        config: ChunkerConfig,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, tokenizer })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> Arc<dyn Tokenizer> {
        Arc::clone(&self.tokenizer)
    }

    /// Chunk a thread into detail units with positions `0..n`.
    ///
    /// An empty thread yields no units. Pure: the same thread and config
    /// always produce the same units.
    pub fn chunk(
        &self,
        thread: &EmailThread,
        project_id: &str,
    ) -> Result<Vec<Unit>, TokenizationError> {
        let messages = thread.ordered_messages();
        let mut pass = ChunkPass {
            chunker: self,
            thread_id: &thread.id,
            project_id,
            subject: thread.subject(),
            messages: &messages,
            units: Vec::new(),
        };

        let mut open: Option<OpenUnit> = None;
        for (i, msg) in messages.iter().enumerate() {
            let formatted = format_message(msg);

            if let Some(mut current) = open.take() {
                if pass.fits(&current, &formatted)? {
                    current.push(formatted, &msg.id);
                    open = Some(current);
                    continue;
                }
                pass.close(current)?;
            }

            let mut fresh = pass.open(i, false)?;
            if fresh.seed.is_some() && !pass.fits(&fresh, &formatted)? {
                fresh.seed = None;
            }
            if pass.fits(&fresh, &formatted)? {
                fresh.push(formatted, &msg.id);
                open = Some(fresh);
                continue;
            }

            pass.split_message(i, &formatted)?;
        }
        if let Some(current) = open {
            pass.close(current)?;
        }

        debug!(
            thread_id = %thread.id,
            messages = messages.len(),
            units = pass.units.len(),
            "chunked thread"
        );
        Ok(pass.units)
    }

    /// Oversize flags as errors, for callers that keep an audit trail.
    pub fn audit(&self, units: &[Unit]) -> Vec<ChunkingError> {
        units
            .iter()
            .filter_map(|u| u.chunking_error(self.config.chunk_size))
            .collect()
    }

    /// Token budget for one piece of a split message, leaving room for the
    /// marker, the overlap seed, and their separators.
    fn piece_budget(&self) -> Result<usize, TokenizationError> {
        let separators = 2 * self.tokenizer.count(PART_SEPARATOR)?;
        Ok(self
            .config
            .chunk_size
            .saturating_sub(self.config.reserved_tokens())
            .saturating_sub(separators)
            .max(1))
    }

    /// Tail of the previous unit's body, at most `chunk_overlap` tokens,
    /// starting at a paragraph or sentence boundary when one falls inside
    /// the window.
    fn overlap_seed(&self, prev_body: &str) -> Result<Option<String>, TokenizationError> {
        if self.config.chunk_overlap == 0 {
            return Ok(None);
        }
        let tail = self
            .tokenizer
            .tail_within(prev_body, self.config.chunk_overlap)?;
        let tail = if tail.len() < prev_body.len() {
            snap_to_boundary(tail)
        } else {
            tail
        };
        let seed = tail.trim();
        Ok((!seed.is_empty()).then(|| seed.to_string()))
    }

    /// Thread-context marker for a unit that starts after `preceding`.
    /// Keeps as many of the most recent preceding messages as fit in
    /// `context.max_tokens`.
    fn context_marker(
        &self,
        subject: Option<&str>,
        preceding: &[&EmailMessage],
        continued: Option<&EmailMessage>,
    ) -> Result<Option<String>, TokenizationError> {
        let ctx = &self.config.context;
        if !ctx.enabled || ctx.max_tokens == 0 {
            return Ok(None);
        }

        let entries: Vec<String> = preceding.iter().map(|m| self.marker_entry(m)).collect();
        let continued = continued.map(|m| {
            format!(
                "Continued: {} ({})",
                display_name(&m.sender),
                self.marker_date(m)
            )
        });

        let render = |subject: Option<&str>, k: usize| -> String {
            let mut fields = Vec::new();
            if let Some(s) = subject {
                fields.push(format!("Thread: {}", s));
            }
            if k > 0 {
                fields.push(format!(
                    "Preceding: {}",
                    entries[entries.len() - k..].join(" | ")
                ));
            }
            if let Some(c) = &continued {
                fields.push(c.clone());
            }
            format!("[{}]", fields.join(" | "))
        };

        let subject = subject.map(str::trim).filter(|s| !s.is_empty());
        let mut subject = subject.map(str::to_string);
        let mut best = render(subject.as_deref(), 0);

        if self.tokenizer.count(&best)? > ctx.max_tokens {
            if let Some(s) = subject.take() {
                let scaffold = self.tokenizer.count(&render(Some(""), 0))?;
                let room = ctx.max_tokens.saturating_sub(scaffold);
                let head = self.tokenizer.head_within(&s, room)?.trim_end();
                if !head.is_empty() {
                    subject = Some(format!("{}...", head));
                }
            }
            best = render(subject.as_deref(), 0);
            if self.tokenizer.count(&best)? > ctx.max_tokens {
                best = self.tokenizer.head_within(&best, ctx.max_tokens)?.to_string();
            }
        }

        for k in 1..=entries.len() {
            let candidate = render(subject.as_deref(), k);
            if self.tokenizer.count(&candidate)? > ctx.max_tokens {
                break;
            }
            best = candidate;
        }

        if best == "[]" || best.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(best))
    }

    fn marker_entry(&self, msg: &EmailMessage) -> String {
        format!("{} ({})", display_name(&msg.sender), self.marker_date(msg))
    }

    fn marker_date(&self, msg: &EmailMessage) -> String {
        let mut out = String::new();
        if write!(out, "{}", msg.timestamp.format(&self.config.context.date_format)).is_err() {
            out.clear();
            out.push_str(&msg.timestamp.format("%b %d").to_string());
        }
        out
    }
}

/// Move the start of an overlap window forward to the first paragraph or
/// sentence boundary it contains. Returns the window unchanged if snapping
/// would leave nothing.
fn snap_to_boundary(tail: &str) -> &str {
    if let Some(idx) = tail.find(PART_SEPARATOR) {
        let rest = tail[idx..].trim_start();
        if !rest.is_empty() {
            return rest;
        }
    }
    let mut chars = tail.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '?' | '!') {
            continue;
        }
        if let Some(&(_, next)) = chars.peek() {
            if next.is_whitespace() {
                let rest = tail[i + c.len_utf8()..].trim_start();
                if !rest.is_empty() {
                    return rest;
                }
            }
        }
    }
    tail
}

/// A unit being assembled.
struct OpenUnit {
    /// Index of the first contributing message.
    first: usize,
    marker: Option<String>,
    seed: Option<String>,
    parts: Vec<String>,
    message_ids: Vec<String>,
    /// Holds a piece that could not be split under the budget.
    forced: bool,
}

impl OpenUnit {
    fn push(&mut self, part: String, message_id: &str) {
        self.parts.push(part);
        if !self.message_ids.iter().any(|m| m == message_id) {
            self.message_ids.push(message_id.to_string());
        }
    }

    /// Unit text with an optional extra part appended, and the byte offset
    /// where the body starts.
    fn render(&self, extra: Option<&str>) -> (String, usize) {
        let mut text = String::new();
        for prefix in [self.marker.as_deref(), self.seed.as_deref()]
            .into_iter()
            .flatten()
        {
            text.push_str(prefix);
            text.push_str(PART_SEPARATOR);
        }
        let body_start = text.len();
        for (k, part) in self.parts.iter().map(String::as_str).chain(extra).enumerate() {
            if k > 0 {
                text.push_str(PART_SEPARATOR);
            }
            text.push_str(part);
        }
        (text, body_start)
    }
}

/// State for chunking one thread.
struct ChunkPass<'a> {
    chunker: &'a ThreadChunker,
    thread_id: &'a str,
    project_id: &'a str,
    subject: Option<&'a str>,
    messages: &'a [&'a EmailMessage],
    units: Vec<Unit>,
}

impl<'a> ChunkPass<'a> {
    fn fits(&self, unit: &OpenUnit, part: &str) -> Result<bool, TokenizationError> {
        let (text, _) = unit.render(Some(part));
        Ok(self.chunker.tokenizer.count(&text)? <= self.chunker.config.chunk_size)
    }

    /// Start a unit whose first content comes from message `index`.
    /// `continued` marks a piece of a message already begun in an earlier unit.
    fn open(&self, index: usize, continued: bool) -> Result<OpenUnit, TokenizationError> {
        let mut unit = OpenUnit {
            first: index,
            marker: None,
            seed: None,
            parts: Vec::new(),
            message_ids: Vec::new(),
            forced: false,
        };
        let Some(prev) = self.units.last() else {
            return Ok(unit);
        };

        let continued_from = if continued {
            Some(self.messages[index])
        } else {
            None
        };
        unit.marker = self.chunker.context_marker(
            self.subject,
            &self.messages[..index],
            continued_from,
        )?;
        unit.seed = self.chunker.overlap_seed(prev.body())?;
        Ok(unit)
    }

    fn split_message(&mut self, index: usize, formatted: &str) -> Result<(), TokenizationError> {
        let msg = self.messages[index];
        let budget = self.chunker.piece_budget()?;
        let pieces = split_oversized(self.chunker.tokenizer.as_ref(), formatted, budget)?;
        debug!(
            thread_id = %self.thread_id,
            message_id = %msg.id,
            pieces = pieces.len(),
            budget,
            "split oversized message"
        );

        for (j, piece) in pieces.into_iter().enumerate() {
            let mut unit = self.open(index, j > 0)?;
            if piece.forced {
                unit.seed = None;
                unit.forced = true;
            }
            unit.push(piece.text, &msg.id);
            self.close(unit)?;
        }
        Ok(())
    }

    fn close(&mut self, mut unit: OpenUnit) -> Result<(), TokenizationError> {
        let limit = self.chunker.config.chunk_size;
        let tokenizer = &self.chunker.tokenizer;

        let (mut text, mut body_start) = unit.render(None);
        let mut token_count = tokenizer.count(&text)?;
        if token_count > limit && unit.seed.is_some() {
            unit.seed = None;
            (text, body_start) = unit.render(None);
            token_count = tokenizer.count(&text)?;
        }

        let overlap_tokens = match &unit.seed {
            Some(seed) => tokenizer.count(seed)?,
            None => 0,
        };
        let position = self.units.len();
        let oversized = token_count > limit;
        if oversized && unit.forced {
            warn!(
                thread_id = %self.thread_id,
                position,
                tokens = token_count,
                limit,
                "detail unit exceeds token budget; content is unsplittable"
            );
        } else if oversized {
            warn!(
                thread_id = %self.thread_id,
                position,
                tokens = token_count,
                limit,
                "detail unit exceeds token budget after assembly"
            );
        }

        let first = self.messages[unit.first];
        let metadata = UnitMetadata {
            project_id: self.project_id.to_string(),
            source_type: SOURCE_TYPE.to_string(),
            thread_id: self.thread_id.to_string(),
            sender: Some(first.sender.clone()),
            date: Some(first.timestamp),
            subject: self.subject.map(str::to_string),
            source_message_ids: unit.message_ids,
            level: UnitLevel::Detail,
            position: Some(position),
            thread_context: unit.marker,
            oversized,
        };
        self.units.push(Unit::detail(
            self.thread_id,
            position,
            text,
            token_count,
            body_start,
            overlap_tokens,
            metadata,
        ));
        Ok(())
    }
}
