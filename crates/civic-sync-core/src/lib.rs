//! # Civic Sync Core
//!
//! Store-agnostic synchronization engine: typed field values, identity
//! hashing, the remote table mirror, the diff planner, the status
//! reconciler and the batched writer.
//!
//! This crate performs no network or filesystem I/O of its own. Every
//! remote access goes through the [`store::TableStore`] trait, so the same
//! engine drives Airtable, SQLite or the in-memory store used in tests.

pub mod diff;
pub mod identity;
pub mod join;
pub mod mirror;
pub mod models;
pub mod plan;
pub mod progress;
pub mod reconcile;
pub mod store;
pub mod sync;
pub mod writer;
