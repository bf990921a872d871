//! Relevance filter.
//!
//! Decides which incoming messages are worth indexing. The rule
//! classifier is a pure function of message content and the configured
//! rule set — no I/O, deterministic for a fixed configuration. A
//! statistical model can be swapped in behind the same [`Classifier`]
//! trait without touching the pipeline.
//!
//! Rule precedence:
//! 1. Strong positives (trusted sender, subject keyword, reply) win
//!    outright, even over spam signals.
//! 2. Otherwise weak positives (body keywords, recency) and spam signals
//!    (spam keywords, marketing senders, promotional labels) are scored
//!    with configurable weights.
//! 3. No positive signal at all defaults to Spam.

use chrono::{DateTime, Utc};

use crate::config::FilterConfig;
use crate::models::{Message, ReasonCode, RelevanceDecision, Verdict};

pub trait Classifier: Send + Sync {
    fn classify(&self, message: &Message) -> RelevanceDecision;
}

pub struct RuleClassifier {
    rules: FilterConfig,
    /// Injected clock reference so classification is deterministic in
    /// tests; production uses the construction time of each call.
    now: Option<DateTime<Utc>>,
}

impl RuleClassifier {
    pub fn new(rules: FilterConfig) -> Self {
        Self { rules, now: None }
    }

    /// Pin "now" for recency checks. Test hook.
    pub fn with_now(rules: FilterConfig, now: DateTime<Utc>) -> Self {
        Self {
            rules,
            now: Some(now),
        }
    }

    fn strong_positive(&self, message: &Message) -> Option<ReasonCode> {
        let sender = message.sender.to_lowercase();
        if self
            .rules
            .trusted_senders
            .iter()
            .any(|s| sender.contains(&s.to_lowercase()))
        {
            return Some(ReasonCode::TrustedSender);
        }

        let subject = message.subject.to_lowercase();
        if contains_any(&subject, &self.rules.subject_keywords) {
            return Some(ReasonCode::SubjectKeyword);
        }

        if subject.starts_with("re:") {
            return Some(ReasonCode::ThreadReply);
        }

        None
    }

    fn spam_signals(&self, message: &Message) -> Vec<ReasonCode> {
        let mut reasons = Vec::new();
        let subject = message.subject.to_lowercase();
        let body = message.body.to_lowercase();
        let sender = message.sender.to_lowercase();

        if contains_any(&subject, &self.rules.spam_keywords)
            || contains_any(&body, &self.rules.spam_keywords)
        {
            reasons.push(ReasonCode::SpamKeyword);
        }
        if contains_any(&sender, &self.rules.marketing_sender_patterns) {
            reasons.push(ReasonCode::MarketingSender);
        }
        if message
            .labels
            .iter()
            .any(|l| l == "CATEGORY_PROMOTIONS" || l == "CATEGORY_SOCIAL")
        {
            reasons.push(ReasonCode::PromotionalLabel);
        }

        reasons
    }

    fn weak_positives(&self, message: &Message) -> Vec<(ReasonCode, f64)> {
        let mut signals = Vec::new();
        let body = message.body.to_lowercase();

        if contains_any(&body, &self.rules.body_keywords) {
            signals.push((ReasonCode::BodyKeyword, self.rules.body_keyword_weight));
        }

        let now = self.now.unwrap_or_else(Utc::now);
        let age = now.signed_duration_since(message.timestamp);
        if age.num_days() < self.rules.recency_days {
            signals.push((ReasonCode::Recent, self.rules.recency_weight));
        }

        signals
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, message: &Message) -> RelevanceDecision {
        // Strong rules are absolute: a trusted sender or an explicit
        // meeting/deadline subject overrides any spam signal.
        if let Some(reason) = self.strong_positive(message) {
            return RelevanceDecision {
                message_id: message.id.clone(),
                verdict: Verdict::Relevant,
                reasons: vec![reason],
            };
        }

        let spam = self.spam_signals(message);
        let weak = self.weak_positives(message);

        if weak.is_empty() {
            let mut reasons = spam;
            if reasons.is_empty() {
                reasons.push(ReasonCode::NoPositiveSignal);
            }
            return RelevanceDecision {
                message_id: message.id.clone(),
                verdict: Verdict::Spam,
                reasons,
            };
        }

        let positive: f64 = weak.iter().map(|(_, w)| w).sum();
        let negative = spam.len() as f64 * self.rules.spam_signal_weight;

        if positive - negative > self.rules.relevance_threshold {
            RelevanceDecision {
                message_id: message.id.clone(),
                verdict: Verdict::Relevant,
                reasons: weak.into_iter().map(|(r, _)| r).collect(),
            }
        } else {
            let mut reasons = spam;
            if reasons.is_empty() {
                reasons.push(ReasonCode::NoPositiveSignal);
            }
            RelevanceDecision {
                message_id: message.id.clone(),
                verdict: Verdict::Spam,
                reasons,
            }
        }
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|n| !n.is_empty() && haystack.contains(&n.to_lowercase()))
}
