//! End-to-end pipeline test against the demo providers: sync → filter →
//! index → ask, with no network and no credentials.

use mailpilot::answer::Outcome;
use mailpilot::app::{AppContext, SyncOutcome};
use mailpilot::config::{Config, DbConfig, EnvMode, ServerConfig};

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
async fn demo_pipeline_end_to_end() {
    let tmp = tempfile::TempDir::new().unwrap();
    let ctx = AppContext::init(demo_config(tmp.path().join("pilot.sqlite")))
        .await
        .unwrap();

    // First sync backfills the demo inbox; the filter keeps the three
    // real messages and drops the two promotional ones.
    let outcomes = ctx.sync_accounts(false, None).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        SyncOutcome::Completed { report } => {
            assert_eq!(report.fetched, 5);
            assert_eq!(report.relevant, 3);
            assert_eq!(report.spam, 2);
        }
        other => panic!("expected completed sync, got {other:?}"),
    }
    assert_eq!(ctx.store.message_count().await.unwrap(), 3);

    // Second sync is an empty delta and changes nothing.
    let outcomes = ctx.sync_accounts(false, None).await.unwrap();
    match &outcomes[0] {
        SyncOutcome::Completed { report } => assert_eq!(report.fetched, 0),
        other => panic!("expected completed sync, got {other:?}"),
    }
    assert_eq!(ctx.store.message_count().await.unwrap(), 3);

    // Recency listing is newest first.
    let recent = ctx.store.recent(10).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert!(recent
        .windows(2)
        .all(|w| w[0].timestamp >= w[1].timestamp));

    // A question gets a full answer with citations into the index.
    let response = ctx.orchestrator.answer("What deadlines do I have?").await;
    assert_eq!(response.outcome, Outcome::Done);
    assert!(!response.answer.is_empty());
    assert!(!response.citations.is_empty());
    for citation in &response.citations {
        assert!(recent.iter().any(|m| m.id == citation.message_id));
    }

    // Calendar context comes straight from the provider, never the store.
    let events = ctx.calendar.list_events(7).await.unwrap();
    assert!(!events.is_empty());
    assert!(events.windows(2).all(|w| w[0].start <= w[1].start));
}
