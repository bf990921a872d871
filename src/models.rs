//! Core data models used throughout MailPilot.
//!
//! These types represent the messages, decisions, and events that flow
//! through the ingestion and question-answering pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single email message as fetched from the mail provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    /// Provider category labels (e.g. Gmail `CATEGORY_PROMOTIONS`).
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Verdict of the relevance filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Relevant,
    Spam,
}

/// Machine-readable explanation for a filter verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    TrustedSender,
    SubjectKeyword,
    ThreadReply,
    BodyKeyword,
    Recent,
    SpamKeyword,
    MarketingSender,
    PromotionalLabel,
    NoPositiveSignal,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::TrustedSender => "trusted_sender",
            ReasonCode::SubjectKeyword => "subject_keyword",
            ReasonCode::ThreadReply => "thread_reply",
            ReasonCode::BodyKeyword => "body_keyword",
            ReasonCode::Recent => "recent",
            ReasonCode::SpamKeyword => "spam_keyword",
            ReasonCode::MarketingSender => "marketing_sender",
            ReasonCode::PromotionalLabel => "promotional_label",
            ReasonCode::NoPositiveSignal => "no_positive_signal",
        }
    }
}

/// Outcome of classifying one message. Ephemeral; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RelevanceDecision {
    pub message_id: String,
    pub verdict: Verdict,
    /// Ordered reason codes, most decisive first.
    pub reasons: Vec<ReasonCode>,
}

impl RelevanceDecision {
    pub fn is_relevant(&self) -> bool {
        self.verdict == Verdict::Relevant
    }
}

/// Opaque token marking the last processed position in the mail
/// provider's change stream. Passed in and out of the sync operation
/// explicitly; persistence is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor(String);

impl SyncCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of one sync call: the new messages plus the cursor to persist
/// once they have been processed.
#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub messages: Vec<Message>,
    pub next_cursor: SyncCursor,
}

/// A calendar event, fetched fresh per query and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// Metadata for an indexed message, as returned from the retrieval store.
#[derive(Debug, Clone, Serialize)]
pub struct MessageMeta {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

/// One semantic search result: metadata, a body excerpt, and a
/// similarity score (higher is better).
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub meta: MessageMeta,
    pub excerpt: String,
    pub score: f64,
}

/// A retrieved source message referenced by an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
}
