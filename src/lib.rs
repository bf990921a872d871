//! # MailPilot
//!
//! A local-first personal assistant over your email and calendar.
//!
//! MailPilot incrementally syncs mail from one or more accounts, filters
//! out noise with a deterministic rule classifier, indexes the relevant
//! messages (optionally with embeddings) in SQLite, and answers natural
//! language questions by combining retrieved email with upcoming calendar
//! events in a single LLM prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │  Mail     │──▶│  Filter  │──▶│  SQLite    │   │ Calendar │
//! │  (Gmail)  │   │  rules   │   │ msgs+vecs  │   │ (Google) │
//! └──────────┘   └──────────┘   └─────┬─────┘   └────┬─────┘
//!                                     │              │
//!                                     ▼              ▼
//!                               ┌───────────────────────┐
//!                               │     Orchestrator      │──▶ LLM
//!                               └─────┬───────────┬─────┘
//!                                     ▼           ▼
//!                                ┌────────┐  ┌────────┐
//!                                │  CLI   │  │  HTTP  │
//!                                │ (mpt)  │  │ server │
//!                                └────────┘  └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mpt init                          # create database and config
//! mpt accounts add me@example.com --primary
//! mpt sync                          # backfill, then incremental
//! mpt ask "when is my next deadline?"
//! mpt serve                         # start the HTTP API
//! ```
//!
//! Set `env = "demo"` in the config to run the whole pipeline with
//! deterministic in-process providers and no credentials.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`mail`] | Incremental mail sync client |
//! | [`calendar`] | Calendar context provider |
//! | [`filter`] | Relevance rule classifier |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | SQLite retrieval store |
//! | [`sync`] | Ingestion pipeline and cursors |
//! | [`answer`] | Question-answering orchestrator |
//! | [`scrub`] | PII scrubbing and injection screening |
//! | [`llm`] | LLM client |
//! | [`server`] | JSON HTTP server |
//! | [`scheduler`] | Periodic background sync |
//! | [`demo`] | Credential-free demo providers |

pub mod answer;
pub mod app;
pub mod auth;
pub mod calendar;
pub mod config;
pub mod db;
pub mod demo;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod llm;
pub mod mail;
pub mod migrate;
pub mod models;
pub mod scheduler;
pub mod scrub;
pub mod server;
pub mod store;
pub mod sync;
