//! Periodic background work.
//!
//! Two jobs share one interval loop: a sync cycle for every known account,
//! and a reminder pass that surfaces calendar events starting within the
//! next few minutes. The single-flight guards inside
//! [`AppContext::sync_accounts`] make a tick that fires while a manual
//! sync is still running a no-op for that account, so overlapping cycles
//! never race.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::app::{AppContext, SyncOutcome};
use crate::models::CalendarEvent;

/// Events starting within this many minutes get a reminder.
const REMINDER_WINDOW_MINS: i64 = 15;

pub fn spawn(ctx: Arc<AppContext>) -> JoinHandle<()> {
    let interval_secs = ctx.config.scheduler.interval_secs;
    info!(interval_secs, "background sync scheduler started");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately; skip it so startup stays quick
        interval.tick().await;

        let mut notified: HashSet<String> = HashSet::new();

        loop {
            interval.tick().await;
            match ctx.sync_accounts(false, None).await {
                Ok(outcomes) => {
                    for outcome in &outcomes {
                        if let SyncOutcome::Skipped { account } = outcome {
                            info!(account = %account, "sync already in flight, skipped");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "scheduled sync failed"),
            }

            match ctx.calendar.list_events(1).await {
                Ok(events) => {
                    for event in due_reminders(&events, Utc::now(), &notified) {
                        let minutes = (event.start - Utc::now()).num_minutes().max(0);
                        info!(
                            event_id = %event.id,
                            summary = %event.summary,
                            minutes,
                            "upcoming event reminder"
                        );
                        notified.insert(event.id.clone());
                    }
                }
                Err(e) => warn!(error = %e, "reminder pass skipped, calendar unavailable"),
            }
        }
    })
}

/// Events starting within the reminder window that have not been
/// announced yet. Already-started events are excluded.
fn due_reminders<'a>(
    events: &'a [CalendarEvent],
    now: DateTime<Utc>,
    notified: &HashSet<String>,
) -> Vec<&'a CalendarEvent> {
    events
        .iter()
        .filter(|e| {
            let until = e.start - now;
            until > chrono::Duration::zero()
                && until <= chrono::Duration::minutes(REMINDER_WINDOW_MINS)
                && !notified.contains(&e.id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str, start: DateTime<Utc>) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            summary: format!("Event {id}"),
            start,
            end: start + chrono::Duration::hours(1),
            location: None,
            description: None,
        }
    }

    #[test]
    fn reminders_fire_only_inside_the_window() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let events = vec![
            event("soon", now + chrono::Duration::minutes(10)),
            event("later", now + chrono::Duration::hours(2)),
            event("started", now - chrono::Duration::minutes(5)),
        ];

        let due = due_reminders(&events, now, &HashSet::new());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "soon");
    }

    #[test]
    fn reminders_are_not_repeated() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let events = vec![event("soon", now + chrono::Duration::minutes(10))];

        let mut notified = HashSet::new();
        assert_eq!(due_reminders(&events, now, &notified).len(), 1);

        notified.insert("soon".to_string());
        assert!(due_reminders(&events, now, &notified).is_empty());
    }
}
