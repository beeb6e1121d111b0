//! In-memory [`TableStore`] implementation for tests and local previews.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Handles are sequential (`rec00000001`, ...). Listing, the n-th create
//! call, or the n-th update call can be made to fail, to exercise the
//! engine's failure semantics.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{FieldMap, RecordUpdate, RemoteRecord};

use super::TableStore;

/// In-memory store. Tables must be created before use.
pub struct InMemoryTableStore {
    tables: RwLock<HashMap<String, Vec<RemoteRecord>>>,
    next_handle: AtomicU64,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    fail_listing: AtomicBool,
    failing_creates: Mutex<HashSet<usize>>,
    failing_updates: Mutex<HashSet<usize>>,
    max_batch: Option<usize>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            fail_listing: AtomicBool::new(false),
            failing_creates: Mutex::new(HashSet::new()),
            failing_updates: Mutex::new(HashSet::new()),
            max_batch: None,
        }
    }

    /// Reject any batch larger than `max`, like a remote API's request cap.
    pub fn with_max_batch(mut self, max: usize) -> Self {
        self.max_batch = Some(max);
        self
    }

    /// Create an empty table (no-op if it already exists).
    pub fn create_table(&self, table: &str) {
        self.tables
            .write()
            .unwrap()
            .entry(table.to_string())
            .or_default();
    }

    /// Insert a row directly, bypassing call counters. Returns its handle.
    pub fn seed(&self, table: &str, fields: FieldMap) -> String {
        let handle = self.mint_handle();
        self.tables
            .write()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(RemoteRecord {
                handle: handle.clone(),
                fields,
            });
        handle
    }

    /// Snapshot of a table's rows in insertion order.
    pub fn records(&self, table: &str) -> Vec<RemoteRecord> {
        self.tables
            .read()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every subsequent listing fail (or succeed again).
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make the `n`-th `batch_create` call (1-based, counted from now on) fail.
    pub fn fail_create_call(&self, n: usize) {
        let base = self.create_calls.load(Ordering::SeqCst);
        self.failing_creates.lock().unwrap().insert(base + n);
    }

    /// Make the `n`-th `batch_update` call (1-based, counted from now on) fail.
    pub fn fail_update_call(&self, n: usize) {
        let base = self.update_calls.load(Ordering::SeqCst);
        self.failing_updates.lock().unwrap().insert(base + n);
    }

    /// Total `batch_create` calls received so far.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Total `batch_update` calls received so far.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn mint_handle(&self) -> String {
        format!("rec{:08}", self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    fn check_batch_size(&self, len: usize) -> Result<()> {
        if let Some(max) = self.max_batch {
            if len > max {
                bail!("batch of {} records exceeds limit of {}", len, max);
            }
        }
        Ok(())
    }
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn list_all_records(&self, table: &str) -> Result<Vec<RemoteRecord>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            bail!("listing of table '{}' failed", table);
        }
        let tables = self.tables.read().unwrap();
        match tables.get(table) {
            Some(rows) => Ok(rows.clone()),
            None => bail!("table not found: '{}'", table),
        }
    }

    async fn batch_create(&self, table: &str, records: &[FieldMap]) -> Result<Vec<RemoteRecord>> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_creates.lock().unwrap().contains(&call) {
            bail!("injected failure on create call {}", call);
        }
        self.check_batch_size(records.len())?;

        let mut tables = self.tables.write().unwrap();
        let rows = match tables.get_mut(table) {
            Some(rows) => rows,
            None => bail!("table not found: '{}'", table),
        };
        let mut created = Vec::with_capacity(records.len());
        for fields in records {
            let record = RemoteRecord {
                handle: self.mint_handle(),
                fields: fields.clone(),
            };
            rows.push(record.clone());
            created.push(record);
        }
        Ok(created)
    }

    async fn batch_update(&self, table: &str, updates: &[RecordUpdate]) -> Result<()> {
        let call = self.update_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_updates.lock().unwrap().contains(&call) {
            bail!("injected failure on update call {}", call);
        }
        self.check_batch_size(updates.len())?;

        let mut tables = self.tables.write().unwrap();
        let rows = match tables.get_mut(table) {
            Some(rows) => rows,
            None => bail!("table not found: '{}'", table),
        };

        // Whole-batch rejection: validate every handle before writing any.
        for update in updates {
            if !rows.iter().any(|r| r.handle == update.handle) {
                bail!("record not found: '{}'", update.handle);
            }
        }
        for update in updates {
            if let Some(row) = rows.iter_mut().find(|r| r.handle == update.handle) {
                for (name, value) in &update.fields {
                    row.fields.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}
