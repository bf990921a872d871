//! Content security: PII scrubbing and prompt-injection screening.
//!
//! Two independent passes guard the boundary between the user's data and
//! the hosted model:
//!
//! - [`Scrubber`] replaces PII (email addresses, phone numbers, SSNs,
//!   IPv4 addresses) with stable placeholders like `<EMAIL_1>` before a
//!   prompt leaves the process, and [`Scrubber::restore`] maps them back
//!   in the model's answer. The same value always gets the same
//!   placeholder within one scrub, so the model can still correlate
//!   mentions.
//! - [`is_safe`] screens ingested message text for prompt-injection
//!   phrasing before it enters the index at all.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static PII_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        (
            "EMAIL",
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
        ),
        ("SSN", Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
        (
            "PHONE",
            Regex::new(r"\b(\+\d{1,2}\s?)?\(?\d{3}\)?[\s.-]\d{3}[\s.-]?\d{4}\b").unwrap(),
        ),
        (
            "IP_ADDRESS",
            Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap(),
        ),
    ]
});

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)ignore\s+(all\s+)?(previous|prior)\s+instructions",
        r"(?i)ignore\s+system\s+prompt",
        r"(?i)you\s+are\s+now\s+a",
        r"(?i)override\s+system",
        r"(?i)simulat(e|ing)\s+mode",
        r"(?i)jailbreak",
        r"(?i)DAN\s+mode",
        r"(?i)system\s+override",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// One scrub pass over outbound text, holding the placeholder mapping
/// needed to restore the model's answer afterwards.
#[derive(Default)]
pub struct Scrubber {
    mapping: HashMap<String, String>,
}

impl Scrubber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace PII in `text` with placeholders, remembering the mapping.
    pub fn scrub(&mut self, text: &str) -> String {
        let mut scrubbed = text.to_string();
        for (label, pattern) in PII_PATTERNS.iter() {
            loop {
                let Some(found) = pattern.find(&scrubbed) else {
                    break;
                };
                let original = found.as_str().to_string();
                let placeholder = self
                    .mapping
                    .iter()
                    .find(|(_, v)| **v == original)
                    .map(|(k, _)| k.clone())
                    .unwrap_or_else(|| {
                        let placeholder = format!("<{}_{}>", label, self.mapping.len() + 1);
                        self.mapping.insert(placeholder.clone(), original.clone());
                        placeholder
                    });
                scrubbed = scrubbed.replace(&original, &placeholder);
            }
        }
        scrubbed
    }

    /// Put the original values back into `text` (typically the answer).
    pub fn restore(&self, text: &str) -> String {
        let mut restored = text.to_string();
        for (placeholder, original) in &self.mapping {
            restored = restored.replace(placeholder, original);
        }
        restored
    }
}

/// Whether ingested text is free of prompt-injection phrasing. Unsafe
/// messages are dropped before indexing.
pub fn is_safe(text: &str) -> bool {
    INJECTION_PATTERNS.iter().all(|p| !p.is_match(text))
}
