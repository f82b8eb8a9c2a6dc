//! # Intel Hub
//!
//! Ingestion and question answering over a library of research reports.
//!
//! Each report arrives as a bundle (a directory with a markdown rendition, a
//! page/block content map and the original PDF). The pipeline indexes the
//! text in a retrieval store, has a language model extract structured
//! intelligence (findings, statistics, quotes, insights, recommendations,
//! summary, briefing hook) and persists it in SQLite. Chat answers questions
//! scoped to one report, the whole corpus, or through a five-step "minister"
//! reasoning chain, and always cites what it retrieved.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────┐   ┌──────────┐
//! │ Bundles  │──▶│ parse → upload → extract  │──▶│  SQLite  │
//! │ dir/zip  │   │  (jobs, bounded workers)  │   │          │
//! └──────────┘   └─────┬──────────────┬──────┘   └────┬─────┘
//!                      ▼              ▼               │
//!                 ┌─────────┐   ┌───────────┐         │
//!                 │ RAGFlow │   │ OpenRouter│         │
//!                 └────┬────┘   └─────┬─────┘         │
//!                      └──── chat / minister ◀────────┤
//!                                   │                 │
//!                            ┌──────┴──────┐   ┌──────┴─────┐
//!                            │  CLI (hub)  │   │  HTTP API  │
//!                            └─────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hub init                               # create database
//! hub process --path ./reports           # ingest report bundles
//! hub status                             # extraction coverage
//! hub chat "What drives GCC AI adoption?" --mode all
//! hub serve                              # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`bundle`] | Report bundle parsing |
//! | [`archive`] | ZIP unpacking |
//! | [`metadata`] | Source, year and category inference |
//! | [`ragflow`] | Retrieval store client |
//! | [`llm`] | LLM gateway client |
//! | [`prompts`] | Prompt templates |
//! | [`extraction`] | Structured extraction |
//! | [`retry`] | Backoff policy |
//! | [`ingest`] | Batch pipeline |
//! | [`jobs`] | Job bookkeeping |
//! | [`chat`] | Chat dispatch and conversations |
//! | [`minister`] | Minister reasoning chain |
//! | [`web`] | Web search and article scraping |
//! | [`news`] | News "So What?" analysis |
//! | [`search`] | Library listing and search |
//! | [`databank`] | Extracted item search and stats |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod archive;
pub mod audit;
pub mod bundle;
pub mod chat;
pub mod config;
pub mod databank;
pub mod db;
pub mod error;
pub mod extraction;
pub mod get;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod metadata;
pub mod migrate;
pub mod minister;
pub mod models;
pub mod news;
pub mod progress;
pub mod prompts;
pub mod ragflow;
pub mod retry;
pub mod search;
pub mod server;
pub mod stats;
pub mod web;
