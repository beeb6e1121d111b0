//! Airtable REST implementation of [`TableStore`].
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `list_all_records` | `GET /{base}/{table}?pageSize=N&offset=…`, following `offset` until absent |
//! | `batch_create` | `POST /{base}/{table}` with `{"records": [{"fields": …}], "typecast": true}` |
//! | `batch_update` | `PATCH /{base}/{table}` with `{"records": [{"id": …, "fields": …}], "typecast": true}` |
//!
//! Retry lives here, below the engine:
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - HTTP 4xx (not 429) → fail immediately
//! - Network error → retry
//!
//! Airtable rejects a whole request when one record in it is invalid; the
//! engine's batch writer absorbs that as a failed batch.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use civic_sync_core::models::{
    field_map_from_json, field_map_to_json, FieldMap, RecordUpdate, RemoteRecord,
};
use civic_sync_core::store::TableStore;

use crate::config::{AirtableConfig, AIRTABLE_MAX_PAGE_SIZE};

pub struct AirtableStore {
    client: reqwest::Client,
    api_url: Url,
    base_id: String,
    api_key: String,
    page_size: usize,
    max_retries: u32,
    retry_base: Duration,
}

impl AirtableStore {
    /// Build a client for the base in `config`, reading the API key from
    /// the environment variable it names.
    pub fn from_config(config: &AirtableConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} not set", config.api_key_env))?;
        Ok(Self::new(
            &config.api_url,
            &config.base_id,
            &api_key,
            Duration::from_secs(config.timeout_secs),
        )?
        .with_page_size(config.page_size)
        .with_max_retries(config.max_retries))
    }

    pub fn new(api_url: &str, base_id: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let api_url =
            Url::parse(api_url).with_context(|| format!("invalid airtable api_url: {}", api_url))?;
        if api_url.cannot_be_a_base() {
            bail!("invalid airtable api_url: {}", api_url);
        }
        Ok(Self {
            client,
            api_url,
            base_id: base_id.to_string(),
            api_key: api_key.to_string(),
            page_size: AIRTABLE_MAX_PAGE_SIZE,
            max_retries: 5,
            retry_base: Duration::from_secs(1),
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, AIRTABLE_MAX_PAGE_SIZE);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// First backoff delay; doubles on every further attempt.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// `{api_url}/{base}/{table}`, with the table name percent-encoded.
    fn table_url(&self, table: &str) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("invalid airtable api_url: {}", self.api_url))?
            .pop_if_empty()
            .push(&self.base_id)
            .push(table);
        Ok(url)
    }

    /// Send one request, retrying transient failures.
    async fn send(
        &self,
        method: Method,
        url: &Url,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: base, 2×base, 4×base, ...
                let delay = self.retry_base * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(&self.api_key)
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return Ok(json);
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%method, status = status.as_u16(), attempt, "airtable request failed; retrying");
                        last_err = Some(anyhow!("Airtable API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("Airtable API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(%method, attempt, error = %e, "airtable request failed; retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Airtable request failed after retries")))
    }
}

/// Extract `records[].{id, fields}` from a list or write response.
fn parse_records(json: &Value) -> Result<Vec<RemoteRecord>> {
    let records = json
        .get("records")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow!("Invalid Airtable response: missing records array"))?;

    records
        .iter()
        .map(|record| {
            let handle = record
                .get("id")
                .and_then(|id| id.as_str())
                .ok_or_else(|| anyhow!("Invalid Airtable response: record without id"))?;
            // Airtable omits empty cells, and may omit `fields` entirely.
            let fields = record
                .get("fields")
                .map(field_map_from_json)
                .unwrap_or_default();
            Ok(RemoteRecord {
                handle: handle.to_string(),
                fields,
            })
        })
        .collect()
}

#[async_trait]
impl TableStore for AirtableStore {
    fn backend_name(&self) -> &str {
        "airtable"
    }

    async fn list_all_records(&self, table: &str) -> Result<Vec<RemoteRecord>> {
        let url = self.table_url(table)?;
        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let mut query = vec![("pageSize", self.page_size.to_string())];
            if let Some(o) = &offset {
                query.push(("offset", o.clone()));
            }

            let json = self
                .send(Method::GET, &url, &query, None)
                .await
                .with_context(|| format!("failed to list page {} of '{}'", pages + 1, table))?;
            records.extend(parse_records(&json)?);
            pages += 1;

            match json.get("offset").and_then(|o| o.as_str()) {
                Some(next) if offset.as_deref() == Some(next) => {
                    bail!("Airtable returned the same offset twice while listing '{}'", table)
                }
                Some(next) => offset = Some(next.to_string()),
                None => break,
            }
        }

        debug!(table, pages, records = records.len(), "airtable listing complete");
        Ok(records)
    }

    async fn batch_create(&self, table: &str, records: &[FieldMap]) -> Result<Vec<RemoteRecord>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.table_url(table)?;
        let body = json!({
            "records": records
                .iter()
                .map(|fields| json!({ "fields": field_map_to_json(fields) }))
                .collect::<Vec<_>>(),
            "typecast": true,
        });

        let json = self.send(Method::POST, &url, &[], Some(&body)).await?;
        parse_records(&json)
    }

    async fn batch_update(&self, table: &str, updates: &[RecordUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let url = self.table_url(table)?;
        let body = json!({
            "records": updates
                .iter()
                .map(|u| json!({ "id": u.handle, "fields": field_map_to_json(&u.fields) }))
                .collect::<Vec<_>>(),
            "typecast": true,
        });

        self.send(Method::PATCH, &url, &[], Some(&body)).await?;
        Ok(())
    }
}
