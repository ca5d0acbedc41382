//! Structured pre-filter over unit metadata.
//!
//! A [`MetadataPredicate`] is evaluated before any vector comparison, so
//! it bounds the candidate set a store has to score. Every set field must
//! match; unset fields match anything.
//!
//! | Field | Match rule |
//! |-------|------------|
//! | `project_id` | exact |
//! | `thread_id` | exact |
//! | `sender` | case-insensitive substring of the unit's sender |
//! | `date_from` / `date_to` | inclusive bounds on the unit's date |
//! | `subject_terms` | every term occurs in the subject, case-insensitive |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::UnitMetadata;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataPredicate {
    pub project_id: Option<String>,
    pub sender: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub subject_terms: Vec<String>,
    pub thread_id: Option<String>,
}

impl MetadataPredicate {
    /// A predicate that matches every unit.
    pub fn any() -> Self {
        Self::default()
    }

    /// Shorthand for the most common filter.
    pub fn project(project_id: impl Into<String>) -> Self {
        Self::any().with_project(project_id)
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_date_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_subject_term(mut self, term: impl Into<String>) -> Self {
        self.subject_terms.push(term.into());
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when `meta` satisfies every set field. A unit without a date
    /// fails any date bound; a unit without a subject fails any subject term.
    pub fn matches(&self, meta: &UnitMetadata) -> bool {
        if let Some(p) = &self.project_id {
            if &meta.project_id != p {
                return false;
            }
        }
        if let Some(t) = &self.thread_id {
            if &meta.thread_id != t {
                return false;
            }
        }
        if let Some(s) = &self.sender {
            let needle = s.to_lowercase();
            match &meta.sender {
                Some(sender) if sender.to_lowercase().contains(&needle) => {}
                _ => return false,
            }
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(date) = meta.date else {
                return false;
            };
            if self.date_from.is_some_and(|from| date < from) {
                return false;
            }
            if self.date_to.is_some_and(|to| date > to) {
                return false;
            }
        }
        if !self.subject_terms.is_empty() {
            let Some(subject) = &meta.subject else {
                return false;
            };
            let subject = subject.to_lowercase();
            if !self
                .subject_terms
                .iter()
                .all(|t| subject.contains(&t.to_lowercase()))
            {
                return false;
            }
        }
        true
    }
}
