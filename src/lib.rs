//! # Threadwise
//!
//! Application layer over [`threadwise_core`]: TOML configuration, logging
//! setup, thread file loading and the `tw` command implementations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌──────────────┐
//! │ thread JSON  │──▶│ chunk + summarize  │──▶│ units (JSON) │
//! └──────────────┘   │  (threadwise-core) │   └──────────────┘
//!                    └────────────────────┘
//! ```
//!
//! Embedding, storage and retrieval live in the core crate behind the
//! provider and store traits; callers embedding the library wire in their
//! own implementations.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | tracing subscriber setup |
//! | [`threads`] | thread file loading |
//! | [`commands`] | `tw chunk`, `tw summarize`, `tw config` |

pub mod commands;
pub mod config;
pub mod logging;
pub mod threads;
