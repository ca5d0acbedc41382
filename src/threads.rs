//! Thread file loading.
//!
//! A thread file is JSON holding either one thread object or an array of
//! them, in the shape of [`EmailThread`].

use anyhow::{Context, Result};
use std::path::Path;

use threadwise_core::models::EmailThread;

pub fn parse_threads(content: &str) -> Result<Vec<EmailThread>> {
    let value: serde_json::Value =
        serde_json::from_str(content).context("Thread file is not valid JSON")?;
    if value.is_array() {
        serde_json::from_value(value).context("Failed to parse thread array")
    } else {
        let thread: EmailThread =
            serde_json::from_value(value).context("Failed to parse thread")?;
        Ok(vec![thread])
    }
}

pub fn load_threads(path: &Path) -> Result<Vec<EmailThread>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read thread file: {}", path.display()))?;
    parse_threads(&content).with_context(|| format!("Invalid thread file: {}", path.display()))
}
