//! # Channel Harvest
//!
//! Conversation-history ingestion for retrieval indexes.
//!
//! Channel Harvest pages through a chat channel's history, resolves user ids
//! to names, rebuilds reply threads into a nested snapshot and indexes every
//! message (replies with their parent as context) into a hosted document
//! index, skipping content it has already sent.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────┐
//! │   History    │──▶│   Enricher   │──▶│   Threads    │──▶│  Snapshot   │
//! │  (paginated) │   │ names + time │   │ parent/reply │   │   (JSON)    │
//! └──────────────┘   └──────▲───────┘   └──────────────┘   └─────┬──────┘
//! ┌──────────────┐          │                                    ▼
//! │  User list   │──────────┘                             ┌────────────┐
//! │ (directory)  │                                        │ Dedup+Index │
//! └──────────────┘                                        └────────────┘
//! ```
//!
//! All source calls go through [`fetcher::RateLimitedFetcher`], which waits
//! out rate limits and retries the same request.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`models`] | Core data types |
//! | [`traits`] | Source and index seams |
//! | [`connector_slack`] | Slack Web API source |
//! | [`fetcher`] | Rate-limit retry around single source calls |
//! | [`history`] | History pagination |
//! | [`directory`] | User id → name directory |
//! | [`enrich`] | Mention rewriting and timestamp normalization |
//! | [`thread`] | Thread reconstruction |
//! | [`chunk`] | Text chunking |
//! | [`dedup`] | Deduplication and index documents |
//! | [`index_http`] | Index sinks (HTTP, in-memory) |
//! | [`snapshot`] | Snapshot and seen-set files |
//! | [`stats`] | Snapshot summary |
//! | [`progress`] | Run progress reporting |
//! | [`ingest`] | Stage orchestration |

pub mod chunk;
pub mod config;
pub mod connector_slack;
pub mod dedup;
pub mod directory;
pub mod enrich;
pub mod fetcher;
pub mod history;
pub mod index_http;
pub mod ingest;
pub mod models;
pub mod progress;
pub mod snapshot;
pub mod stats;
pub mod thread;
pub mod traits;
