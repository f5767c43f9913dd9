use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use tracing::warn;

use crate::config::AppConfig;
use crate::records::BucketRecord;

/// Boundary to the remote counter store.
///
/// The engine only ever reads bucket records; production wires in the HTTP
/// implementation, tests substitute in-memory stores.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch_bucket_records(
        &self,
        scope_id: &str,
        record_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BucketRecord>>;
}

/// One JSON page returned by the counter store.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordPage {
    records: Vec<BucketRecord>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// HTTP client for the counter store's paginated bucket endpoint.
pub struct HttpRecordStore {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
    max_records: u32,
}

impl HttpRecordStore {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::try_from(format!("Bearer {}", config.upstream.api_token))
            .context("counter store token contains invalid header characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(config.upstream.timeout)
            .default_headers(headers)
            .user_agent(concat!("evalmon/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build counter store HTTP client")?;

        Ok(Self {
            client,
            base_url: config.upstream.base_url.trim_end_matches('/').to_string(),
            page_size: config.upstream.page_size,
            max_records: config.limits.max_records,
        })
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    /// Walk the store's cursor pagination until the range is exhausted or
    /// the per-query result cap is reached. Hitting the cap is a non-fatal
    /// signal: the partial (most recent pages first) result is returned and
    /// the truncation logged.
    async fn fetch_bucket_records(
        &self,
        scope_id: &str,
        record_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BucketRecord>> {
        let url = format!("{}/api/buckets", self.base_url);
        let mut records: Vec<BucketRecord> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&url)
                .query(&[("scope", scope_id), ("type", record_type)])
                .query(&[("start", start.timestamp()), ("end", end.timestamp())])
                .query(&[("limit", self.page_size)]);
            if let Some(token) = &cursor {
                request = request.query(&[("cursor", token.as_str())]);
            }

            let page: RecordPage = request
                .send()
                .await
                .context("counter store request failed")?
                .error_for_status()
                .context("counter store returned an error status")?
                .json()
                .await
                .context("failed to decode counter store response")?;

            records.extend(page.records);

            if records.len() as u32 >= self.max_records {
                if page.next_cursor.is_some() {
                    warn!(
                        scope_id,
                        record_type,
                        fetched = records.len(),
                        cap = self.max_records,
                        "result cap reached; proceeding with partial records"
                    );
                }
                records.truncate(self.max_records as usize);
                break;
            }

            match page.next_cursor {
                Some(token) => cursor = Some(token),
                None => break,
            }
        }

        Ok(records)
    }
}
