//! Application wiring.
//!
//! [`AppContext`] owns everything the CLI, HTTP server, and scheduler
//! share: the store, the per-environment providers, the orchestrator, and
//! the single-flight sync guards. `env = "demo"` swaps every external
//! backend for its deterministic in-process counterpart.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::answer::Orchestrator;
use crate::calendar::{CalendarProvider, GoogleCalendarProvider};
use crate::config::{Config, EnvMode};
use crate::demo::{DemoCalendarProvider, DemoLlm, DemoMailProvider};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{PilotError, Result};
use crate::filter::RuleClassifier;
use crate::llm::{GeminiClient, LlmClient};
use crate::mail::{GmailProvider, MailProvider};
use crate::store::RetrievalStore;
use crate::sync::{self, SyncGuards, SyncReport};
use crate::{db, migrate};

/// Per-account outcome of a sync request covering several accounts.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SyncOutcome {
    Completed {
        #[serde(flatten)]
        report: SyncReport,
    },
    /// A sync for this account was already in flight.
    Skipped { account: String },
    Failed { account: String, error: String },
}

pub struct AppContext {
    pub config: Config,
    pub store: RetrievalStore,
    pub guards: SyncGuards,
    pub calendar: Arc<dyn CalendarProvider>,
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub orchestrator: Orchestrator,
}

impl AppContext {
    /// Open the database, run migrations, and build the provider set for
    /// the configured environment.
    pub async fn init(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        let store = RetrievalStore::new(pool);

        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);

        let (calendar, llm): (Arc<dyn CalendarProvider>, Arc<dyn LlmClient>) = match config.env {
            EnvMode::Demo => (Arc::new(DemoCalendarProvider::new()), Arc::new(DemoLlm)),
            EnvMode::Dev => {
                let account = primary_account(&config)?;
                (
                    Arc::new(GoogleCalendarProvider::new(&config.mail, &account)?),
                    Arc::new(GeminiClient::new(&config.llm)?),
                )
            }
        };

        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::clone(&calendar),
            Arc::clone(&llm),
            Arc::clone(&embedder),
            config.embedding.clone(),
            config.llm.clone(),
        );

        Ok(Self {
            config,
            store,
            guards: SyncGuards::new(),
            calendar,
            llm,
            embedder,
            orchestrator,
        })
    }

    /// Accounts to sync: the configured list plus any registered at
    /// runtime, deduplicated. Demo mode always has one account.
    pub async fn accounts(&self) -> Result<Vec<String>> {
        let mut emails: Vec<String> = self
            .config
            .mail
            .accounts
            .iter()
            .map(|a| a.email.clone())
            .collect();
        for record in sync::list_accounts(self.store.pool()).await? {
            if !emails.contains(&record.email) {
                emails.push(record.email);
            }
        }
        if emails.is_empty() && self.config.env == EnvMode::Demo {
            emails.push("demo@example.com".to_string());
        }
        Ok(emails)
    }

    pub fn mail_provider(&self, account: &str) -> Result<Arc<dyn MailProvider>> {
        Ok(match self.config.env {
            EnvMode::Demo => {
                Arc::new(DemoMailProvider::new().with_backfill_days(self.config.mail.backfill_days))
            }
            EnvMode::Dev => Arc::new(GmailProvider::new(self.config.mail.clone(), account)?),
        })
    }

    /// Sync every known account (or just `only`). Accounts fail
    /// independently; one bad account never blocks the rest.
    pub async fn sync_accounts(&self, full: bool, only: Option<&str>) -> Result<Vec<SyncOutcome>> {
        let accounts = match only {
            Some(account) => vec![account.to_string()],
            None => self.accounts().await?,
        };
        if accounts.is_empty() {
            return Err(PilotError::Config(
                "no accounts configured; add one first".to_string(),
            ));
        }

        let classifier = RuleClassifier::new(self.config.filter.clone());
        let mut outcomes = Vec::with_capacity(accounts.len());

        for account in accounts {
            let Some(_permit) = self.guards.try_begin(&account) else {
                outcomes.push(SyncOutcome::Skipped { account });
                continue;
            };

            let result = match self.mail_provider(&account) {
                Ok(provider) => {
                    sync::run_account_sync(
                        &self.store,
                        provider.as_ref(),
                        &classifier,
                        self.embedder.as_ref(),
                        &self.config.embedding,
                        &account,
                        full,
                        self.config.mail.max_retries,
                    )
                    .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(report) => outcomes.push(SyncOutcome::Completed { report }),
                Err(e) => {
                    warn!(account = %account, error = %e, "account sync failed");
                    outcomes.push(SyncOutcome::Failed {
                        account,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(outcomes)
    }
}

fn primary_account(config: &Config) -> Result<String> {
    let accounts = &config.mail.accounts;
    accounts
        .iter()
        .find(|a| a.primary)
        .or_else(|| accounts.first())
        .map(|a| a.email.clone())
        .ok_or_else(|| {
            PilotError::Config(
                "no mail accounts configured; add one under [[mail.accounts]]".to_string(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountConfig, DbConfig, ServerConfig};

    fn demo_config(db_path: std::path::PathBuf) -> Config {
        Config {
            db: DbConfig { path: db_path },
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
            env: EnvMode::Demo,
            mail: Default::default(),
            embedding: Default::default(),
            llm: Default::default(),
            filter: Default::default(),
            scheduler: Default::default(),
        }
    }

    #[tokio::test]
    async fn demo_context_syncs_and_answers_without_credentials() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = AppContext::init(demo_config(tmp.path().join("pilot.sqlite")))
            .await
            .unwrap();

        let outcomes = ctx.sync_accounts(false, None).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], SyncOutcome::Completed { .. }));
        assert_eq!(ctx.store.message_count().await.unwrap(), 3);

        let response = ctx.orchestrator.answer("What is coming up?").await;
        assert!(!response.answer.is_empty());
        assert!(!response.citations.is_empty());
    }

    #[tokio::test]
    async fn registered_accounts_are_included() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = demo_config(tmp.path().join("pilot.sqlite"));
        config.mail.accounts.push(AccountConfig {
            email: "configured@example.com".to_string(),
            primary: true,
        });
        let ctx = AppContext::init(config).await.unwrap();

        sync::add_account(ctx.store.pool(), "added@example.com", false)
            .await
            .unwrap();

        let accounts = ctx.accounts().await.unwrap();
        assert_eq!(
            accounts,
            vec!["configured@example.com", "added@example.com"]
        );
    }

    #[test]
    fn primary_account_prefers_flag() {
        let tmp_config = {
            let mut config = demo_config(std::path::PathBuf::from("x"));
            config.mail.accounts = vec![
                AccountConfig {
                    email: "first@example.com".to_string(),
                    primary: false,
                },
                AccountConfig {
                    email: "main@example.com".to_string(),
                    primary: true,
                },
            ];
            config
        };
        assert_eq!(primary_account(&tmp_config).unwrap(), "main@example.com");
    }
}
