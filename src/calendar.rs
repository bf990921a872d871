//! Calendar context provider.
//!
//! Fetches upcoming events fresh for every question — calendar data is
//! never persisted or indexed, only folded into the prompt. Failures here
//! degrade the answer, they never fail it; that policy lives in the
//! orchestrator, this module just reports errors honestly.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;

use crate::auth::TokenManager;
use crate::config::MailConfig;
use crate::error::{PilotError, Result};
use crate::models::CalendarEvent;

const CALENDAR_BASE: &str = "https://www.googleapis.com/calendar/v3";

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Events starting within the next `days` days, soonest first.
    async fn list_events(&self, days: i64) -> Result<Vec<CalendarEvent>>;
}

pub struct GoogleCalendarProvider {
    client: reqwest::Client,
    tokens: TokenManager,
}

impl GoogleCalendarProvider {
    pub fn new(config: &MailConfig, account: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        let tokens = TokenManager::for_account(config, account)?;
        Ok(Self { client, tokens })
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    async fn list_events(&self, days: i64) -> Result<Vec<CalendarEvent>> {
        let now = Utc::now();
        let horizon = now + Duration::days(days.max(0));
        let token = self.tokens.access_token().await?;

        let url = format!("{CALENDAR_BASE}/calendars/primary/events");
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("timeMin", now.to_rfc3339()),
                ("timeMax", horizon.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", "50".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => {
                    PilotError::Auth(format!("calendar provider rejected credentials: {body}"))
                }
                code => PilotError::Transient(format!("calendar provider error {code}: {body}")),
            });
        }

        let listing: EventListing = response.json().await?;
        let mut events: Vec<CalendarEvent> =
            listing.items.into_iter().filter_map(parse_event).collect();
        events.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        Ok(events)
    }
}

#[derive(Debug, Deserialize)]
struct EventListing {
    #[serde(default)]
    items: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    description: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
}

/// Timed events carry `dateTime`; all-day events carry `date` only.
#[derive(Debug, Deserialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<DateTime<Utc>>,
    date: Option<NaiveDate>,
}

impl EventTime {
    fn resolve(&self) -> Option<DateTime<Utc>> {
        if let Some(dt) = self.date_time {
            return Some(dt);
        }
        self.date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}

fn parse_event(raw: RawEvent) -> Option<CalendarEvent> {
    let start = raw.start.as_ref()?.resolve()?;
    let end = raw.end.as_ref().and_then(EventTime::resolve).unwrap_or(start);
    Some(CalendarEvent {
        id: raw.id,
        summary: raw.summary.unwrap_or_else(|| "(no title)".to_string()),
        start,
        end,
        location: raw.location,
        description: raw.description,
    })
}
