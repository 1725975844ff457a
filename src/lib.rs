//! # repo-scribe
//!
//! A local-first documentation warehouse for source repositories.
//!
//! Repositories are submitted as jobs. A single-worker scheduler picks them
//! up, obtains a working copy, and drives a language-model generation
//! service through a fixed pipeline that produces a README, an overview
//! article, a hierarchical documentation catalogue with one generated page
//! per node, a mind-map outline and a changelog.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────────────────────┐
//! │   submit   │──▶│   SQLite    │◀──│      WarehouseScheduler      │
//! │   (CLI)    │   │ jobs / docs │   │  acquire ─▶ pipeline stages  │
//! └────────────┘   └─────────────┘   └──────────────┬───────────────┘
//!                                                   │
//!                        ┌──────────────────────────┼──────────────────┐
//!                        ▼                          ▼                  ▼
//!                 ┌─────────────┐          ┌────────────────┐   ┌─────────────┐
//!                 │  Catalogue  │          │ CataloguePlanner│   │  Document   │
//!                 │  FileTree   │          │ think ▶ plan   │   │  Generator  │
//!                 └─────────────┘          └────────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! scribe init
//! scribe submit https://github.com/acme/tool.git
//! scribe run --once
//! scribe status <job-id>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`generation`] | Generation service abstraction and OpenAI-compatible client |
//! | [`git`] | Working-copy acquisition and commit history |
//! | [`catalogue`] | Working-copy scanning and tree rendering |
//! | [`prompts`] | Prompt text per stage |
//! | [`planner`] | Two-pass catalogue planning with retry |
//! | [`generator`] | Bounded-concurrency document generation |
//! | [`pipeline`] | Per-job stage sequence |
//! | [`scheduler`] | Job polling loop |
//! | [`jobs`] | CLI command implementations |

pub mod catalogue;
pub mod config;
pub mod db;
pub mod generation;
pub mod generator;
pub mod git;
pub mod jobs;
pub mod migrate;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod scheduler;
pub mod sqlite_store;
