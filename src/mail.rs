//! Mail sync client.
//!
//! Wraps the mail provider's incremental-change API behind the
//! [`MailProvider`] trait. The contract is `sync(cursor) -> SyncBatch`:
//! a null cursor performs a bounded backfill (most recent
//! `backfill_days`, capped at `max_backfill_messages`), a non-null
//! cursor requests only the delta since that change id. The client keeps
//! no state of its own — cursor persistence is the caller's job.
//!
//! Error mapping at this boundary: 401/403 → `Auth`, 429/5xx/network →
//! `Transient`, an expired start history id (provider 404) →
//! `CursorInvalid`.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::TokenManager;
use crate::config::MailConfig;
use crate::error::{PilotError, Result};
use crate::models::{Message, SyncBatch, SyncCursor};

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Fetch new messages since `cursor` (or a bounded backfill when the
    /// cursor is absent) together with the cursor to persist afterwards.
    async fn sync(&self, cursor: Option<&SyncCursor>) -> Result<SyncBatch>;
}

pub struct GmailProvider {
    client: reqwest::Client,
    tokens: TokenManager,
    config: MailConfig,
}

impl GmailProvider {
    pub fn new(config: MailConfig, account: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        let tokens = TokenManager::for_account(&config, account)?;
        Ok(Self {
            client,
            tokens,
            config,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        cursor_sensitive: bool,
    ) -> Result<T> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, cursor_sensitive));
        }

        Ok(response.json().await?)
    }

    async fn fetch_message(&self, id: &str) -> Result<Option<Message>> {
        let url = format!("{GMAIL_BASE}/users/me/messages/{id}");
        let raw: GmailMessage = self
            .get_json(&url, &[("format", "full".to_string())], false)
            .await?;
        Ok(parse_gmail_message(raw))
    }

    async fn fetch_messages(&self, ids: &[String]) -> Result<Vec<Message>> {
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.fetch_message(id).await {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => warn!(message_id = %id, "skipping unparseable message"),
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    /// Bounded initial backfill: list ids within the configured window,
    /// fetch their details, and take the current profile history id as
    /// the cursor for subsequent delta syncs.
    async fn backfill(&self) -> Result<SyncBatch> {
        let query = backfill_query(self.config.backfill_days);
        let mut ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.clone()),
                ("maxResults", self.config.page_size.to_string()),
            ];
            if let Some(ref token) = page_token {
                params.push(("pageToken", token.clone()));
            }

            let url = format!("{GMAIL_BASE}/users/me/messages");
            let page: ListResponse = self.get_json(&url, &params, false).await?;

            ids.extend(page.messages.into_iter().map(|m| m.id));
            if ids.len() >= self.config.max_backfill_messages {
                ids.truncate(self.config.max_backfill_messages);
                break;
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = ids.len(), "backfill message ids listed");
        let messages = self.fetch_messages(&ids).await?;

        let profile: Profile = self
            .get_json(&format!("{GMAIL_BASE}/users/me/profile"), &[], false)
            .await?;

        Ok(SyncBatch {
            messages,
            next_cursor: SyncCursor::new(profile.history_id),
        })
    }

    /// Delta sync: walk the history stream from the cursor, collecting
    /// added message ids.
    async fn delta(&self, cursor: &SyncCursor) -> Result<SyncBatch> {
        let mut ids: Vec<String> = Vec::new();
        let mut latest_history_id = cursor.as_str().to_string();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("startHistoryId", cursor.as_str().to_string()),
                ("historyTypes", "messageAdded".to_string()),
            ];
            if let Some(ref token) = page_token {
                params.push(("pageToken", token.clone()));
            }

            let url = format!("{GMAIL_BASE}/users/me/history");
            let page: HistoryResponse = self.get_json(&url, &params, true).await?;

            for record in page.history {
                for added in record.messages_added {
                    if !ids.contains(&added.message.id) {
                        ids.push(added.message.id);
                    }
                }
            }
            if let Some(history_id) = page.history_id {
                latest_history_id = history_id;
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = ids.len(), "delta message ids listed");
        let messages = self.fetch_messages(&ids).await?;

        Ok(SyncBatch {
            messages,
            next_cursor: SyncCursor::new(latest_history_id),
        })
    }
}

#[async_trait]
impl MailProvider for GmailProvider {
    async fn sync(&self, cursor: Option<&SyncCursor>) -> Result<SyncBatch> {
        match cursor {
            Some(cursor) => self.delta(cursor).await,
            None => self.backfill().await,
        }
    }
}

fn classify_status(
    status: reqwest::StatusCode,
    body: &str,
    cursor_sensitive: bool,
) -> PilotError {
    match status.as_u16() {
        401 | 403 => PilotError::Auth(format!("mail provider rejected credentials: {body}")),
        404 if cursor_sensitive => PilotError::CursorInvalid,
        429 => PilotError::Transient(format!("mail provider rate limit: {body}")),
        code if status.is_server_error() => {
            PilotError::Transient(format!("mail provider error {code}: {body}"))
        }
        code => PilotError::Transient(format!("mail provider error {code}: {body}")),
    }
}

/// Provider search query bounding an initial backfill.
fn backfill_query(days: i64) -> String {
    format!("newer_than:{days}d -in:spam -in:trash")
}

// ============ Wire types ============

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(rename = "historyId")]
    history_id: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    #[serde(rename = "historyId")]
    history_id: Option<String>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryRecord {
    #[serde(default, rename = "messagesAdded")]
    messages_added: Vec<AddedMessage>,
}

#[derive(Debug, Deserialize)]
struct AddedMessage {
    message: MessageRef,
}

#[derive(Debug, Deserialize)]
struct GmailMessage {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
    #[serde(default, rename = "labelIds")]
    label_ids: Vec<String>,
    #[serde(rename = "internalDate")]
    internal_date: Option<String>,
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default, rename = "mimeType")]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<Payload>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    data: Option<String>,
}

// ============ Parsing ============

/// Normalize a raw provider message into a [`Message`]. Returns `None`
/// when the payload is missing entirely.
fn parse_gmail_message(raw: GmailMessage) -> Option<Message> {
    let payload = raw.payload?;

    let mut subject = String::new();
    let mut sender = String::new();
    for header in &payload.headers {
        match header.name.to_lowercase().as_str() {
            "subject" => subject = header.value.clone(),
            "from" => sender = header.value.clone(),
            _ => {}
        }
    }

    let body = extract_body(&payload);

    // internalDate is epoch milliseconds as a string
    let timestamp = raw
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms))
        .unwrap_or_else(Utc::now);

    Some(Message {
        id: raw.id,
        thread_id: raw.thread_id,
        sender,
        subject,
        body,
        timestamp,
        labels: raw.label_ids,
    })
}

/// Extract a plain-text body, preferring `text/plain` parts and falling
/// back to stripped `text/html`.
fn extract_body(payload: &Payload) -> String {
    if let Some(text) = find_part(payload, "text/plain") {
        return text.trim().to_string();
    }
    if let Some(html) = find_part(payload, "text/html") {
        return strip_html(&html).trim().to_string();
    }
    String::new()
}

fn find_part(payload: &Payload, mime_type: &str) -> Option<String> {
    if payload.mime_type == mime_type {
        if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
            if let Some(decoded) = decode_body_data(data) {
                return Some(decoded);
            }
        }
    }
    for part in &payload.parts {
        if let Some(found) = find_part(part, mime_type) {
            return Some(found);
        }
    }
    None
}

/// Decode base64url body data, repairing missing padding first.
fn decode_body_data(data: &str) -> Option<String> {
    let mut padded = data.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let bytes = base64::engine::general_purpose::URL_SAFE.decode(padded).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Minimal HTML-to-text: drops tags, decodes the common entities, and
/// collapses whitespace. Good enough for prompt context; not a renderer.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
