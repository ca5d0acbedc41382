//! Thread summarization with a fallback chain.
//!
//! A [`ThreadSummarizer`] produces exactly one summary-level [`Unit`] per
//! thread. It tries each configured [`SummaryStrategy`] in order and
//! always ends with [`ExtractiveStrategy`], which cannot fail, so a
//! language-model outage never blocks indexing.
//!
//! | Strategy | Source | Failure |
//! |----------|--------|---------|
//! | [`LanguageModelStrategy`] | [`LanguageModelProvider`] prompt | permanent provider error, retries exhausted, empty reply |
//! | [`ExtractiveStrategy`] | subject + first/last message excerpts | never |

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::chunk::format_message;
use crate::config::SummarizerConfig;
use crate::error::{ProviderError, SummarizationError, TokenizationError};
use crate::models::{EmailThread, Unit, UnitLevel, UnitMetadata, SOURCE_TYPE};
use crate::provider::{CompletionRequest, LanguageModelProvider};
use crate::tokenizer::Tokenizer;

/// Fixed instruction placed before the thread transcript.
pub const SUMMARY_INSTRUCTION: &str = "Summarize the following email thread in a concise paragraph. \
Focus on the key topics, decisions, and action items.";

const EXCERPT_GAP: &str = "[...]";

const SECTION_SEPARATOR: &str = "\n\n";

/// Produces summary text for a thread.
#[async_trait]
pub trait SummaryStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn summarize(&self, thread: &EmailThread) -> Result<String, SummarizationError>;
}

/// Summarizes by prompting a language model with a budgeted transcript.
pub struct LanguageModelStrategy {
    provider: Arc<dyn LanguageModelProvider>,
    config: SummarizerConfig,
    tokenizer: Arc<dyn Tokenizer>,
}

impl LanguageModelStrategy {
    pub fn new(
        provider: Arc<dyn LanguageModelProvider>,
        config: SummarizerConfig,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            provider,
            config,
            tokenizer,
        }
    }

    /// Instruction plus transcript. A transcript over the prompt budget
    /// keeps whole messages from both ends: `head_ratio` of the budget for
    /// the earliest, the rest for the latest.
    pub fn build_prompt(&self, thread: &EmailThread) -> Result<String, TokenizationError> {
        let parts: Vec<String> = thread
            .ordered_messages()
            .into_iter()
            .map(format_message)
            .collect();
        let budget = self.config.prompt_budget();
        let transcript = parts.join(SECTION_SEPARATOR);

        let body = if self.tokenizer.count(&transcript)? <= budget {
            transcript
        } else {
            self.head_and_tail(&parts, budget)?
        };
        Ok(format!("{}\n\n{}", SUMMARY_INSTRUCTION, body))
    }

    /// Whole messages from both ends plus an omission marker. The marker
    /// and the separators are charged against `budget` before the messages
    /// are chosen.
    fn head_and_tail(&self, parts: &[String], budget: usize) -> Result<String, TokenizationError> {
        let counts = parts
            .iter()
            .map(|p| self.tokenizer.count(p))
            .collect::<Result<Vec<_>, _>>()?;
        let sep = self.tokenizer.count(SECTION_SEPARATOR)?;
        let marker = self.tokenizer.count(&omission_marker(parts.len()))? + sep;

        // Token counts are not always additive across joins; shrink until
        // the rendered body fits.
        let mut slack = 0;
        loop {
            let content_budget = budget.saturating_sub(marker + slack);
            let body = self.select_sections(parts, &counts, sep, content_budget)?;
            let used = self.tokenizer.count(&body)?;
            if used <= budget || content_budget == 0 {
                return Ok(body);
            }
            slack += used - budget;
        }
    }

    fn select_sections(
        &self,
        parts: &[String],
        counts: &[usize],
        sep: usize,
        budget: usize,
    ) -> Result<String, TokenizationError> {
        let n = parts.len();

        let head_budget = (budget as f64 * self.config.head_ratio as f64).floor() as usize;
        let mut head_end = 0;
        let mut used = 0;
        while head_end < n && used + counts[head_end] + sep <= head_budget {
            used += counts[head_end] + sep;
            head_end += 1;
        }

        let tail_budget = budget - used;
        let mut tail_start = n;
        let mut tail_used = 0;
        while tail_start > head_end && tail_used + counts[tail_start - 1] + sep <= tail_budget {
            tail_used += counts[tail_start - 1] + sep;
            tail_start -= 1;
        }

        let mut sections: Vec<String> = parts[..head_end].to_vec();
        let mut partial = None;
        if tail_start == n && head_end < n {
            // Latest message alone is over budget: keep its end.
            let room = tail_budget.saturating_sub(sep);
            let tail = self.tokenizer.tail_within(&parts[n - 1], room)?;
            if !tail.trim().is_empty() {
                partial = Some(tail.trim().to_string());
                tail_start = n - 1;
            }
        }

        let omitted = tail_start - head_end;
        if omitted > 0 {
            sections.push(omission_marker(omitted));
        }
        match partial {
            Some(p) => sections.push(p),
            None => sections.extend(parts[tail_start..].iter().cloned()),
        }
        Ok(sections.join(SECTION_SEPARATOR))
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let timeout = self.config.timeout();
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout(timeout, self.provider.complete(request, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::timeout(format!(
                "language model call exceeded {:?}",
                timeout
            ))),
        }
    }
}

fn omission_marker(omitted: usize) -> String {
    format!("[... {} messages omitted ...]", omitted)
}

#[async_trait]
impl SummaryStrategy for LanguageModelStrategy {
    fn name(&self) -> &str {
        "language_model"
    }

    async fn summarize(&self, thread: &EmailThread) -> Result<String, SummarizationError> {
        let request = CompletionRequest {
            prompt: self.build_prompt(thread)?,
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let request = &request;
        let text = self
            .config
            .retry_policy()
            .run("language model summary", move || self.complete(request))
            .await
            .map_err(|e| e.error)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(SummarizationError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

/// Summarizes by quoting: the subject, the opening of the first message
/// and, for longer threads, the opening of the last one.
pub struct ExtractiveStrategy {
    tokenizer: Arc<dyn Tokenizer>,
    budget: usize,
}

impl ExtractiveStrategy {
    /// `budget` is the token ceiling for the whole extract.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, budget: usize) -> Self {
        Self { tokenizer, budget }
    }

    /// Build the extract. Falls back to character truncation if the
    /// tokenizer fails.
    pub fn extract(&self, thread: &EmailThread) -> String {
        match self.try_extract(thread) {
            Ok(text) => text,
            Err(e) => {
                warn!(thread_id = %thread.id, error = %e, "tokenizer failed; extract truncated by characters");
                let text = self.layout(thread, |p, share| {
                    p.chars().take(self.budget * 4 / share.max(1)).collect::<String>()
                });
                text.chars().take(self.budget * 4).collect()
            }
        }
    }

    fn try_extract(&self, thread: &EmailThread) -> Result<String, TokenizationError> {
        let heading = heading(thread);
        let gap = if thread.messages.len() > 1 {
            self.tokenizer.count(EXCERPT_GAP)?
        } else {
            0
        };
        let remaining = self
            .budget
            .saturating_sub(self.tokenizer.count(&heading)?)
            .saturating_sub(gap);

        let mut failure = None;
        let text = self.layout(thread, |p, share| {
            let limit = remaining / share.max(1);
            match self.tokenizer.head_within(p, limit) {
                Ok(head) if head.len() < p.len() => trim_to_sentence(head).to_string(),
                Ok(head) => head.to_string(),
                Err(e) => {
                    failure = Some(e);
                    String::new()
                }
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(text),
        }
    }

    /// Assemble heading and excerpts; `excerpt(paragraph, parts)` shortens
    /// one paragraph to its share of the remaining budget.
    fn layout<F>(&self, thread: &EmailThread, mut excerpt: F) -> String
    where
        F: FnMut(&str, usize) -> String,
    {
        let msgs = thread.ordered_messages();
        let mut sections = vec![heading(thread)];
        match msgs.as_slice() {
            [] => {}
            [only] => sections.push(excerpt(first_paragraph(&only.body), 1)),
            [first, .., last] => {
                sections.push(excerpt(first_paragraph(&first.body), 2));
                sections.push(EXCERPT_GAP.to_string());
                sections.push(excerpt(first_paragraph(&last.body), 2));
            }
        }
        sections.retain(|s| !s.trim().is_empty());
        sections.join("\n\n")
    }
}

#[async_trait]
impl SummaryStrategy for ExtractiveStrategy {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn summarize(&self, thread: &EmailThread) -> Result<String, SummarizationError> {
        Ok(self.extract(thread))
    }
}

fn heading(thread: &EmailThread) -> String {
    format!("Thread: {}", thread.subject().unwrap_or("(no subject)"))
}

fn first_paragraph(body: &str) -> &str {
    body.trim()
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or("")
}

/// Cut a truncated excerpt back to its last sentence end, if it has one.
fn trim_to_sentence(text: &str) -> &str {
    match text.rfind(&['.', '?', '!'][..]) {
        Some(idx) if idx > 0 => &text[..=idx],
        _ => text,
    }
}

/// Result of summarizing one thread.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub unit: Unit,
    /// Name of the strategy that produced the text.
    pub strategy: String,
}

/// Produces the summary-level unit for a thread.
pub struct ThreadSummarizer {
    strategies: Vec<Arc<dyn SummaryStrategy>>,
    extractive: ExtractiveStrategy,
    tokenizer: Arc<dyn Tokenizer>,
    config: SummarizerConfig,
    limit: usize,
}

impl ThreadSummarizer {
    /// Extractive-only summarizer. `chunk_size` caps summary length
    /// alongside `config.max_tokens`.
    pub fn new(config: SummarizerConfig, tokenizer: Arc<dyn Tokenizer>, chunk_size: usize) -> Self {
        let limit = config.max_tokens.min(chunk_size).max(1);
        Self {
            strategies: Vec::new(),
            extractive: ExtractiveStrategy::new(Arc::clone(&tokenizer), limit),
            tokenizer,
            config,
            limit,
        }
    }

    /// Try a language model before the extractive fallback.
    pub fn with_language_model(self, provider: Arc<dyn LanguageModelProvider>) -> Self {
        let strategy =
            LanguageModelStrategy::new(provider, self.config.clone(), Arc::clone(&self.tokenizer));
        self.with_strategy(Arc::new(strategy))
    }

    /// Append a strategy to the chain, ahead of the extractive fallback.
    pub fn with_strategy(mut self, strategy: Arc<dyn SummaryStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies
            .iter()
            .map(|s| s.name())
            .chain(std::iter::once(self.extractive.name()))
            .collect()
    }

    pub async fn summarize(&self, thread: &EmailThread, project_id: &str) -> Unit {
        self.summarize_outcome(thread, project_id).await.unit
    }

    /// Like [`summarize`](Self::summarize), also reporting which strategy won.
    pub async fn summarize_outcome(&self, thread: &EmailThread, project_id: &str) -> SummaryOutcome {
        if thread.is_empty() {
            debug!(thread_id = %thread.id, "empty thread; empty summary");
            return SummaryOutcome {
                unit: self.build_unit(thread, project_id, String::new(), 0),
                strategy: "empty".to_string(),
            };
        }

        let mut produced = None;
        for strategy in &self.strategies {
            match strategy.summarize(thread).await {
                Ok(text) => {
                    produced = Some((text, strategy.name().to_string()));
                    break;
                }
                Err(e) => warn!(
                    thread_id = %thread.id,
                    strategy = strategy.name(),
                    error = %e,
                    "summary strategy failed; falling back"
                ),
            }
        }
        let (text, strategy) = produced.unwrap_or_else(|| {
            (
                self.extractive.extract(thread),
                self.extractive.name().to_string(),
            )
        });

        let (text, token_count) = self.bound(&thread.id, text);
        SummaryOutcome {
            unit: self.build_unit(thread, project_id, text, token_count),
            strategy,
        }
    }

    /// Enforce the summary token ceiling.
    fn bound(&self, thread_id: &str, text: String) -> (String, usize) {
        let counted = self.tokenizer.count(&text).and_then(|n| {
            if n <= self.limit {
                Ok((text.clone(), n))
            } else {
                let head = self.tokenizer.head_within(&text, self.limit)?.trim_end().to_string();
                let n = self.tokenizer.count(&head)?;
                Ok((head, n))
            }
        });
        match counted {
            Ok(bounded) => bounded,
            Err(e) => {
                warn!(thread_id, error = %e, "tokenizer failed; summary truncated by characters");
                let text: String = text.chars().take(self.limit * 4).collect();
                let n = text.chars().count().div_ceil(4);
                (text, n)
            }
        }
    }

    fn build_unit(&self, thread: &EmailThread, project_id: &str, text: String, token_count: usize) -> Unit {
        let msgs = thread.ordered_messages();
        let first = msgs.first();
        let metadata = UnitMetadata {
            project_id: project_id.to_string(),
            source_type: SOURCE_TYPE.to_string(),
            thread_id: thread.id.clone(),
            sender: first.map(|m| m.sender.clone()),
            date: first.map(|m| m.timestamp),
            subject: thread.subject().map(str::to_string),
            source_message_ids: msgs.iter().map(|m| m.id.clone()).collect(),
            level: UnitLevel::Summary,
            position: None,
            thread_context: None,
            oversized: false,
        };
        Unit::summary(&thread.id, text, token_count, metadata)
    }
}
