//! # Threadwise Core
//!
//! Thread-aware chunking and hierarchical retrieval for email: data
//! models, the tokenizer adapter, the chunker and summarizer that turn a
//! thread into summary and detail units, the provider and store traits,
//! the batched embedder, and the two-phase retriever.
//!
//! This crate performs no network or filesystem I/O. Embedding and
//! language-model providers and the vector store are capability traits
//! injected at construction time.
//!
//! | Module | Role |
//! |--------|------|
//! | [`models`] | threads, messages, units, metadata |
//! | [`tokenizer`] | pluggable token counting |
//! | [`chunk`] / [`split`] | detail units under a token budget |
//! | [`summarize`] | one summary unit per thread, with fallback chain |
//! | [`predicate`] | metadata pre-filter |
//! | [`embedding`] | batching, retry, cosine similarity |
//! | [`retry`] | backoff shared by provider calls |
//! | [`store`] | vector store trait and in-memory store |
//! | [`retrieve`] | two-phase hierarchical query |
//! | [`pipeline`] | chunk → summarize → embed → upsert |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod predicate;
pub mod provider;
pub mod retrieve;
pub mod retry;
pub mod split;
pub mod store;
pub mod summarize;
pub mod tokenizer;
