//! # Civic Sync
//!
//! Keeps civic and social-service entity tables in sync with the feeds
//! that describe them.
//!
//! Every feed supplies `(identifier, record)` pairs for one table. The
//! engine in [`civic_sync_core`] mirrors the table, plans the minimal set
//! of creates and updates, soft-deactivates rows that disappeared from the
//! feed, and writes in bounded batches. Re-running a pass is idempotent.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │   Feeds     │──▶│   Synchronizer   │──▶│ TableStore   │
//! │ file / http │   │ mirror·plan·write│   │ Airtable/SQL │
//! └─────────────┘   └──────────────────┘   └──────┬───────┘
//!                                                 │
//!                             ┌───────────────────┤
//!                             ▼                   ▼
//!                        ┌──────────┐       ┌──────────┐
//!                        │  stats   │       │  export  │
//!                        └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! civsync init                   # create the local database
//! civsync feeds                  # list configured feeds
//! civsync sync shil --dry-run    # plan without writing
//! civsync sync all               # run every feed
//! civsync stats Organizations    # rows per source and status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`feeds`] | Feed trait, JSON feeds, feed registry |
//! | [`mapping`] | Field mapping and identifier derivation |
//! | [`ingest`] | Sync orchestration for the CLI |
//! | [`airtable`] | Airtable REST store |
//! | [`sqlite_store`] | Local SQLite store |
//! | [`backend`] | Store selection |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod airtable;
pub mod backend;
pub mod config;
pub mod db;
pub mod export;
pub mod feeds;
pub mod ingest;
pub mod mapping;
pub mod migrate;
pub mod progress;
pub mod sources;
pub mod sqlite_store;
pub mod stats;
