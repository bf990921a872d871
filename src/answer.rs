//! Question-answering orchestrator.
//!
//! Walks one question through gather → prompt → generate and always
//! produces an answer. Failures in any gathering step (store, embeddings,
//! calendar) drop that context block and mark the response degraded; an
//! LLM failure gets one retry and then an apologetic fallback. The
//! orchestrator never returns an error to its caller.
//!
//! The prompt is assembled deterministically: same question, same indexed
//! state, same calendar snapshot give the same prompt byte for byte.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::calendar::CalendarProvider;
use crate::config::{EmbeddingConfig, LlmConfig};
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::models::{CalendarEvent, Citation, SearchHit};
use crate::scrub::Scrubber;
use crate::store::RetrievalStore;

/// Ceiling on each context-gathering step.
const GATHER_TIMEOUT: Duration = Duration::from_secs(10);

const FALLBACK_ANSWER: &str = "I'm sorry, I couldn't reach the language model to answer \
that right now. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Full context was gathered and the model answered.
    Done,
    /// The answer was produced with partial context or without the model.
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub question: String,
    pub answer: String,
    pub outcome: Outcome,
    pub citations: Vec<Citation>,
}

pub struct Orchestrator {
    store: RetrievalStore,
    calendar: Arc<dyn CalendarProvider>,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingProvider>,
    embedding: EmbeddingConfig,
    llm_config: LlmConfig,
}

impl Orchestrator {
    pub fn new(
        store: RetrievalStore,
        calendar: Arc<dyn CalendarProvider>,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        embedding: EmbeddingConfig,
        llm_config: LlmConfig,
    ) -> Self {
        Self {
            store,
            calendar,
            llm,
            embedder,
            embedding,
            llm_config,
        }
    }

    /// Answer a question. Infallible: every failure path ends in a
    /// degraded but well-formed response.
    pub async fn answer(&self, question: &str) -> AnswerResponse {
        debug!("gathering context");
        let mut degraded = false;

        let events = match tokio::time::timeout(
            GATHER_TIMEOUT,
            self.calendar.list_events(self.llm_config.calendar_days),
        )
        .await
        {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!(error = %e, "calendar context unavailable");
                degraded = true;
                Vec::new()
            }
            Err(_) => {
                warn!("calendar context timed out");
                degraded = true;
                Vec::new()
            }
        };

        let hits = match tokio::time::timeout(GATHER_TIMEOUT, self.retrieve(question)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(error = %e, "email context unavailable");
                degraded = true;
                Vec::new()
            }
            Err(_) => {
                warn!("email retrieval timed out");
                degraded = true;
                Vec::new()
            }
        };

        // PII leaves the process as placeholders and is restored in the
        // model's answer.
        let mut scrubber = Scrubber::new();
        let prompt = scrubber.scrub(&build_prompt(question, Utc::now(), &events, &hits));

        debug!(
            events = events.len(),
            hits = hits.len(),
            "prompting model"
        );
        let llm_timeout = Duration::from_secs(self.llm_config.timeout_secs);
        let answer = match self.generate_with_retry(&prompt, llm_timeout).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "model unavailable, falling back");
                return AnswerResponse {
                    question: question.to_string(),
                    answer: FALLBACK_ANSWER.to_string(),
                    outcome: Outcome::Degraded,
                    citations: Vec::new(),
                };
            }
        };

        let answer = scrubber.restore(&answer);
        let citations = extract_citations(&answer, &hits);

        AnswerResponse {
            question: question.to_string(),
            answer,
            outcome: if degraded {
                Outcome::Degraded
            } else {
                Outcome::Done
            },
            citations,
        }
    }

    /// Retrieve email context for the question: semantic search when
    /// embeddings are configured, otherwise the most recent indexed
    /// messages.
    async fn retrieve(&self, question: &str) -> Result<Vec<SearchHit>> {
        let k = self.llm_config.retrieval_k;

        if self.embedding.is_enabled() {
            let query_vec = embed_query(self.embedder.as_ref(), &self.embedding, question).await?;
            return self.store.search(&query_vec, k).await;
        }

        let mut hits = Vec::new();
        for meta in self.store.recent(k).await? {
            let excerpt = self
                .store
                .message_body(&meta.id)
                .await?
                .unwrap_or_default()
                .chars()
                .take(600)
                .collect();
            hits.push(SearchHit {
                meta,
                excerpt,
                score: 0.0,
            });
        }
        Ok(hits)
    }

    async fn generate_with_retry(&self, prompt: &str, timeout: Duration) -> Result<String> {
        match tokio::time::timeout(timeout, self.llm.generate(prompt)).await {
            Ok(Ok(text)) => return Ok(text),
            // Bad credentials will not fix themselves on a retry.
            Ok(Err(e @ crate::error::PilotError::Auth(_))) => return Err(e),
            Ok(Err(e)) => warn!(error = %e, "model call failed, retrying once"),
            Err(_) => warn!("model call timed out, retrying once"),
        }

        match tokio::time::timeout(timeout, self.llm.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(crate::error::PilotError::LlmUnavailable(
                "model call timed out".to_string(),
            )),
        }
    }
}

/// Assemble the prompt. Sources are numbered `[1]..[k]` in retrieval
/// order so the model can cite them.
fn build_prompt(
    question: &str,
    now: DateTime<Utc>,
    events: &[CalendarEvent],
    hits: &[SearchHit],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are a personal assistant with access to the user's email and calendar.\n\
         Answer the question using ONLY the context below. When you use an email,\n\
         cite it by its bracketed number, e.g. [1]. If the context does not contain\n\
         the answer, say so plainly.\n\n",
    );
    prompt.push_str(&format!("Current date: {}\n\n", now.format("%Y-%m-%d")));

    prompt.push_str("Upcoming calendar events:\n");
    if events.is_empty() {
        prompt.push_str("(none in the next few days)\n");
    } else {
        for event in events {
            prompt.push_str(&format!(
                "- {}: {}{}\n",
                event.start.format("%Y-%m-%d %H:%M UTC"),
                event.summary,
                event
                    .location
                    .as_deref()
                    .map(|l| format!(" ({l})"))
                    .unwrap_or_default()
            ));
        }
    }
    prompt.push('\n');

    prompt.push_str("Relevant emails:\n");
    if hits.is_empty() {
        prompt.push_str("(no indexed email available)\n");
    } else {
        for (i, hit) in hits.iter().enumerate() {
            prompt.push_str(&format!(
                "[{}] Subject: {} | From: {} | Date: {}\n{}\n\n",
                i + 1,
                hit.meta.subject,
                hit.meta.sender,
                hit.meta.timestamp.format("%Y-%m-%d"),
                hit.excerpt.trim()
            ));
        }
    }

    prompt.push_str(&format!("\nQuestion: {question}\n"));
    prompt
}

/// Map `[N]` markers in the answer back to retrieved messages. An answer
/// with no recognizable markers cites everything that was retrieved, so
/// the user can always see what the answer was grounded in.
fn extract_citations(answer: &str, hits: &[SearchHit]) -> Vec<Citation> {
    let cite = |hit: &SearchHit| Citation {
        message_id: hit.meta.id.clone(),
        subject: hit.meta.subject.clone(),
        sender: hit.meta.sender.clone(),
    };

    let mut cited = Vec::new();
    for (i, hit) in hits.iter().enumerate() {
        if answer.contains(&format!("[{}]", i + 1)) {
            cited.push(cite(hit));
        }
    }

    if cited.is_empty() {
        return hits.iter().map(cite).collect();
    }
    cited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::DemoCalendarProvider;
    use crate::error::PilotError;
    use crate::migrate;
    use crate::models::{Message, MessageMeta};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use sqlx::SqlitePool;
    use std::sync::Mutex;

    struct CapturingLlm {
        prompts: Mutex<Vec<String>>,
        response: std::result::Result<String, ()>,
    }

    impl CapturingLlm {
        fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                response: Ok(text.to_string()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                response: Err(()),
            })
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for CapturingLlm {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(()) => Err(PilotError::LlmUnavailable("down".to_string())),
            }
        }
    }

    async fn seeded_store() -> (tempfile::TempDir, RetrievalStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(tmp.path().join("pilot.sqlite"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let store = RetrievalStore::new(pool);

        let message = Message {
            id: "m1".to_string(),
            thread_id: None,
            sender: "professor@university.edu".to_string(),
            subject: "Assignment deadline".to_string(),
            body: "The deadline is Friday at 17:00.".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 14, 9, 0, 0).unwrap(),
            labels: vec![],
        };
        store.upsert_message("me@example.com", &message).await.unwrap();
        (tmp, store)
    }

    fn orchestrator(
        store: RetrievalStore,
        llm: Arc<dyn LlmClient>,
    ) -> Orchestrator {
        Orchestrator::new(
            store,
            Arc::new(DemoCalendarProvider::new()),
            llm,
            Arc::new(crate::embedding::DisabledProvider),
            EmbeddingConfig::default(),
            LlmConfig::default(),
        )
    }

    #[tokio::test]
    async fn answers_with_context_and_citations() {
        let (_tmp, store) = seeded_store().await;
        let llm = CapturingLlm::answering("The deadline is Friday [1].");
        let orch = orchestrator(store, llm.clone());

        let response = orch.answer("When is my deadline?").await;
        assert_eq!(response.outcome, Outcome::Done);
        assert_eq!(response.citations.len(), 1);
        assert_eq!(response.citations[0].message_id, "m1");

        let prompt = llm.last_prompt();
        assert!(prompt.contains("Assignment deadline"));
        assert!(prompt.contains("When is my deadline?"));
    }

    #[tokio::test]
    async fn calendar_events_reach_the_prompt() {
        let (_tmp, store) = seeded_store().await;
        let llm = CapturingLlm::answering("You have a sync and a dentist visit.");
        let orch = orchestrator(store, llm.clone());

        orch.answer("What is on my schedule?").await;
        let prompt = llm.last_prompt();
        assert!(prompt.contains("Project sync"));
        assert!(prompt.contains("Dentist appointment"));
    }

    #[tokio::test]
    async fn pii_is_scrubbed_from_prompt_and_restored_in_answer() {
        let (_tmp, store) = seeded_store().await;
        let llm = CapturingLlm::answering("Ask <EMAIL_1> for an extension [1].");
        let orch = orchestrator(store, llm.clone());

        let response = orch.answer("Who do I ask about the deadline?").await;

        let prompt = llm.last_prompt();
        assert!(!prompt.contains("professor@university.edu"));
        assert!(prompt.contains("<EMAIL_1>"));
        assert!(response.answer.contains("professor@university.edu"));
        assert_eq!(response.citations.len(), 1);
    }

    #[tokio::test]
    async fn unmarked_answer_cites_all_retrieved() {
        let (_tmp, store) = seeded_store().await;
        let llm = CapturingLlm::answering("It is Friday at five.");
        let orch = orchestrator(store, llm);

        let response = orch.answer("Deadline?").await;
        assert_eq!(response.citations.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_degrades_but_still_answers() {
        let (_tmp, store) = seeded_store().await;
        store.pool().close().await;
        let llm = CapturingLlm::answering("I could not find that in your email.");
        let orch = orchestrator(store, llm.clone());

        let response = orch.answer("Anything from my boss?").await;
        assert_eq!(response.outcome, Outcome::Degraded);
        assert!(response.citations.is_empty());
        assert!(!response.answer.is_empty());
        assert!(llm.last_prompt().contains("no indexed email available"));
    }

    #[tokio::test]
    async fn llm_failure_yields_apologetic_fallback() {
        let (_tmp, store) = seeded_store().await;
        let llm = CapturingLlm::failing();
        let orch = orchestrator(store, llm.clone());

        let response = orch.answer("Deadline?").await;
        assert_eq!(response.outcome, Outcome::Degraded);
        assert!(response.citations.is_empty());
        assert!(response.answer.contains("try again"));
        // one retry after the initial failure
        assert_eq!(llm.prompts.lock().unwrap().len(), 2);
    }

    #[test]
    fn prompt_is_deterministic() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let hits = vec![SearchHit {
            meta: MessageMeta {
                id: "m1".to_string(),
                subject: "S".to_string(),
                sender: "a@b.c".to_string(),
                timestamp: now,
            },
            excerpt: "body".to_string(),
            score: 0.9,
        }];
        let a = build_prompt("q", now, &[], &hits);
        let b = build_prompt("q", now, &[], &hits);
        assert_eq!(a, b);
        assert!(a.contains("[1] Subject: S"));
    }
}
