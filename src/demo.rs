//! Demo-mode providers.
//!
//! Deterministic in-process stand-ins for the mail, calendar, and LLM
//! backends, used when `env = "demo"`. They let the whole pipeline run
//! end to end with no credentials and no network: the mail provider
//! serves a fixed inbox (a mix the relevance filter will split), the
//! calendar provider a fixed week, and the LLM echoes the question with
//! citation markers for each source in the prompt.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::calendar::CalendarProvider;
use crate::error::{PilotError, Result};
use crate::llm::LlmClient;
use crate::mail::MailProvider;
use crate::models::{CalendarEvent, Message, SyncBatch, SyncCursor};

const CURSOR_PREFIX: &str = "demo-";

const DEFAULT_WINDOW_DAYS: i64 = 30;

pub struct DemoMailProvider {
    base: DateTime<Utc>,
    window_days: i64,
}

impl DemoMailProvider {
    pub fn new() -> Self {
        Self {
            base: Utc::now(),
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }

    /// Pin the clock the seeded inbox is generated against. Test hook.
    pub fn with_base(base: DateTime<Utc>) -> Self {
        Self {
            base,
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }

    /// Limit the initial backfill window, mirroring the real provider's
    /// `newer_than:` query.
    pub fn with_backfill_days(mut self, days: i64) -> Self {
        self.window_days = days;
        self
    }

    fn seeds(&self) -> Vec<Message> {
        let m = |id: &str, sender: &str, subject: &str, body: &str, days_ago: i64,
                 labels: &[&str]| Message {
            id: id.to_string(),
            thread_id: None,
            sender: sender.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp: self.base - Duration::days(days_ago),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        };

        vec![
            m(
                "demo-msg-1",
                "professor@university.edu",
                "Assignment 3 deadline moved",
                "The deadline for assignment 3 has moved to Friday June 20 at 17:00. \
                 Please submit via the portal.",
                1,
                &["INBOX"],
            ),
            m(
                "demo-msg-2",
                "manager@acme-corp.com",
                "Re: project sync",
                "Moving our project sync to Tuesday 10:00. Agenda attached.",
                2,
                &["INBOX"],
            ),
            m(
                "demo-msg-3",
                "noreply@flightbookings.example.com",
                "Your booking confirmation",
                "Your flight to Berlin departs June 22 at 08:35 from gate B12. \
                 Check-in opens 24 hours before departure.",
                3,
                &["INBOX"],
            ),
            m(
                "demo-msg-4",
                "deals@shopping-marketing.example.com",
                "HUGE summer sale inside",
                "50% discount on everything! Unsubscribe at the bottom of this newsletter.",
                1,
                &["INBOX", "CATEGORY_PROMOTIONS"],
            ),
            m(
                "demo-msg-5",
                "promo@freebies.example.com",
                "Claim your free trial now",
                "Limited offer, sponsored content, view in browser.",
                4,
                &["INBOX", "CATEGORY_PROMOTIONS"],
            ),
            m(
                "demo-msg-6",
                "manager@acme-corp.com",
                "Re: budget review",
                "Circling back on the figures from last quarter.",
                45,
                &["INBOX"],
            ),
        ]
    }
}

impl Default for DemoMailProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailProvider for DemoMailProvider {
    async fn sync(&self, cursor: Option<&SyncCursor>) -> Result<SyncBatch> {
        let oldest = self.base - Duration::days(self.window_days);
        let seeds: Vec<Message> = self
            .seeds()
            .into_iter()
            .filter(|m| m.timestamp >= oldest)
            .collect();
        let delivered = match cursor {
            None => 0,
            Some(cursor) => cursor
                .as_str()
                .strip_prefix(CURSOR_PREFIX)
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or(PilotError::CursorInvalid)?,
        };

        let messages: Vec<Message> = seeds.into_iter().skip(delivered).collect();
        let next = delivered + messages.len();
        Ok(SyncBatch {
            messages,
            next_cursor: SyncCursor::new(format!("{CURSOR_PREFIX}{next}")),
        })
    }
}

pub struct DemoCalendarProvider {
    base: DateTime<Utc>,
}

impl DemoCalendarProvider {
    pub fn new() -> Self {
        Self { base: Utc::now() }
    }

    pub fn with_base(base: DateTime<Utc>) -> Self {
        Self { base }
    }
}

impl Default for DemoCalendarProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CalendarProvider for DemoCalendarProvider {
    async fn list_events(&self, days: i64) -> Result<Vec<CalendarEvent>> {
        let event = |id: &str, summary: &str, location: Option<&str>, days_ahead: i64,
                     hour: i64| {
            let start = self.base + Duration::days(days_ahead) + Duration::hours(hour);
            CalendarEvent {
                id: id.to_string(),
                summary: summary.to_string(),
                start,
                end: start + Duration::hours(1),
                location: location.map(|l| l.to_string()),
                description: None,
            }
        };

        let mut events = vec![
            event("demo-evt-1", "Project sync", Some("Room 2"), 1, 10),
            event("demo-evt-2", "Dentist appointment", None, 2, 15),
            event("demo-evt-3", "Flight to Berlin", Some("Airport"), 6, 8),
            event("demo-evt-4", "Team offsite", Some("Lakeside"), 12, 9),
        ];
        let horizon = self.base + Duration::days(days.max(0));
        events.retain(|e| e.start <= horizon);
        events.sort_by(|a, b| a.start.cmp(&b.start));
        Ok(events)
    }
}

/// Canned LLM: answers deterministically and cites every numbered source
/// found in the prompt, so the citation path is exercised end to end.
pub struct DemoLlm;

#[async_trait]
impl LlmClient for DemoLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut markers = Vec::new();
        for n in 1..=50 {
            if prompt.contains(&format!("[{n}]")) {
                markers.push(format!("[{n}]"));
            }
        }
        let citations = if markers.is_empty() {
            String::new()
        } else {
            format!(" Sources: {}.", markers.join(" "))
        };
        Ok(format!(
            "Based on your recent email and calendar, here is what I found.{citations}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backfill_then_empty_delta() {
        let provider = DemoMailProvider::new();

        let first = provider.sync(None).await.unwrap();
        assert_eq!(first.messages.len(), 5);
        assert_eq!(first.next_cursor.as_str(), "demo-5");

        let second = provider.sync(Some(&first.next_cursor)).await.unwrap();
        assert!(second.messages.is_empty());
        assert_eq!(second.next_cursor, first.next_cursor);
    }

    #[tokio::test]
    async fn backfill_window_excludes_old_messages() {
        let default_window = DemoMailProvider::new();
        let batch = default_window.sync(None).await.unwrap();
        assert_eq!(batch.messages.len(), 5);
        assert!(batch.messages.iter().all(|m| m.id != "demo-msg-6"));

        let wide_window = DemoMailProvider::new().with_backfill_days(60);
        let batch = wide_window.sync(None).await.unwrap();
        assert_eq!(batch.messages.len(), 6);
        assert_eq!(batch.next_cursor.as_str(), "demo-6");
        assert!(batch.messages.iter().any(|m| m.id == "demo-msg-6"));
    }

    #[tokio::test]
    async fn garbage_cursor_is_invalid() {
        let provider = DemoMailProvider::new();
        let err = provider
            .sync(Some(&SyncCursor::new("not-a-demo-cursor")))
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::CursorInvalid));
    }

    #[tokio::test]
    async fn calendar_respects_horizon() {
        let provider = DemoCalendarProvider::new();
        let week = provider.list_events(7).await.unwrap();
        assert_eq!(week.len(), 3);
        assert!(week.windows(2).all(|w| w[0].start <= w[1].start));

        let fortnight = provider.list_events(14).await.unwrap();
        assert_eq!(fortnight.len(), 4);
    }

    #[tokio::test]
    async fn demo_llm_cites_prompt_sources() {
        let answer = DemoLlm
            .generate("Context:\n[1] one\n[2] two\nQuestion: hi")
            .await
            .unwrap();
        assert!(answer.contains("[1]"));
        assert!(answer.contains("[2]"));
    }
}
