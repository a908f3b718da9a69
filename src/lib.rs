//! # Pulse
//!
//! A Slack project-status assistant. Pulse ingests tracker issues, pull
//! requests and wiki pages into one semantic index and answers questions
//! with summaries grounded in what it retrieves.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │ Sources          │──▶│ Link + Normalize │──▶│ Index Store │
//! │ Jira/GitHub/Wiki │   │  (pulse-core)    │   │ SQLite/mem  │
//! └──────────────────┘   └──────────────────┘   └──────┬──────┘
//!                                                      │ top-k
//!                      ┌───────────────┐        ┌──────▼──────┐
//!   Slack ────────────▶│  Front Door   │───────▶│   Answer    │──▶ Generator
//!                      └───────────────┘        │   Engine    │
//!                                               └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pulse init                      # create database
//! pulse sync                      # fetch every source and rebuild the index
//! pulse search "login bug"        # inspect retrieval
//! pulse ask "what is blocking ID?"
//! pulse serve                     # Slack endpoint + /ask
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`app`] | Builds the shared application context |
//! | [`traits`] | The [`RecordSource`](traits::RecordSource) extension trait |
//! | [`connector_jira`] | Jira issues |
//! | [`connector_github`] | GitHub pull requests |
//! | [`connector_confluence`] | Confluence pages |
//! | [`connector_json`] | Records from a local JSON file |
//! | [`ingest`] | Ingestion cycle and periodic refresh |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Streaming generation providers |
//! | [`sqlite_store`] | SQLite-backed index |
//! | [`frontdoor`] | Question handling under a timeout |
//! | [`slack`] | Slack signing, events and transport |
//! | [`server`] | HTTP server |
//! | [`retry`] | Shared retry-with-backoff policy |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod config;
pub mod connector_confluence;
pub mod connector_github;
pub mod connector_jira;
pub mod connector_json;
pub mod db;
pub mod embedding;
pub mod frontdoor;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod retry;
pub mod search;
pub mod server;
pub mod slack;
pub mod sources;
pub mod sqlite_store;
pub mod traits;
