use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::time::sleep;
use tracing::warn;

use crate::error::SourceError;

const MAX_ATTEMPTS: u32 = 10;

/// Filters applied to the transaction-event listing, from the CLI flags.
#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    /// Restrict to one event type (`update` for the updates-only modes).
    pub event_type: Option<String>,
    /// Only events triggered by a human.
    pub hi_only: bool,
    /// Comma-separated task name prefixes, passed through verbatim.
    pub task_prefixes: Option<String>,
}

/// Cursor query for one page of transaction events.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub cursor: Option<String>,
}

/// One transaction event as listed by the source. `pointer` addresses the
/// transaction inside the contact's task-log as `"tl,ta"`; `md5` is the
/// source-computed content digest used for dedup.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEvent {
    pub fired: String,
    #[serde(default)]
    pub seqnr: String,
    #[serde(default, rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub hi: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub pointer: String,
    pub md5: String,
    pub contact_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPage {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub results: Vec<TransactionEvent>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// One page of the contact-id listing (init mode).
#[derive(Debug, Clone, Default)]
pub struct ContactIdPage {
    pub ids: Vec<String>,
    /// True when the listing returned fewer rows than requested.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CampaignForm {
    #[serde(default)]
    pub form: FormDefinition,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FormDefinition {
    #[serde(default)]
    pub elements: Vec<FormElement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormElement {
    #[serde(rename = "type", default)]
    pub element_type: String,
    #[serde(rename = "fieldType", default)]
    pub field_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub deleted: bool,
}

/// Typed view of the source API as the pipeline consumes it. The HTTP
/// client below is the production implementation; tests substitute stubs.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn campaign_form(&self) -> Result<CampaignForm, SourceError>;

    async fn list_contact_ids(
        &self,
        cursor: &str,
        limit: usize,
    ) -> Result<ContactIdPage, SourceError>;

    async fn fetch_contacts(&self, ids: &[String])
        -> Result<Vec<Map<String, Value>>, SourceError>;

    async fn fetch_events(&self, query: &EventQuery) -> Result<EventPage, SourceError>;
}

#[derive(Deserialize)]
struct ListingPage {
    #[serde(rename = "_results_", default)]
    results: Vec<Map<String, Value>>,
    #[serde(rename = "_count_", default)]
    count: usize,
}

/// Source API client. Tokens ride in the URL path per the API's
/// `/!{token}/` convention; the id listing uses its own token.
pub struct HttpActivitySource {
    http: Client,
    base_url: String,
    campaign_id: String,
    campaign_token: String,
    listing_token: String,
    filters: EventFilters,
    retry_base: Duration,
}

impl HttpActivitySource {
    pub fn new(
        base_url: String,
        campaign_id: String,
        campaign_token: String,
        listing_token: String,
        filters: EventFilters,
    ) -> Result<Self, SourceError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let http = Client::builder()
            .default_headers(headers)
            .user_agent("activity-sync-worker")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url,
            campaign_id,
            campaign_token,
            listing_token,
            filters,
            retry_base: Duration::from_secs(1),
        })
    }

    /// Shrinks the backoff base so tests do not sleep for real.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    fn api_url(&self, suffix: &str) -> String {
        format!(
            "{}/!{}/api/campaigns/{}/{}",
            self.base_url, self.campaign_token, self.campaign_id, suffix
        )
    }

    /// Sends a request up to [`MAX_ATTEMPTS`] times with `2^i` second
    /// backoff. 403 aborts immediately: that is a credential problem, not
    /// a transient one.
    async fn send_with_retry(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<String, SourceError> {
        let mut last = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            let Some(request) = request.try_clone() else {
                break;
            };
            match request.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp.text().await?),
                Ok(resp) if resp.status() == StatusCode::FORBIDDEN => {
                    return Err(SourceError::Forbidden(url.to_owned()));
                }
                Ok(resp) => {
                    last = format!("HTTP {}", resp.status());
                    warn!(url, attempt = attempt + 1, status = %resp.status(), "source request failed");
                }
                Err(e) => {
                    last = e.to_string();
                    warn!(url, attempt = attempt + 1, error = %e, "source request failed");
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                sleep(self.retry_base * 2u32.pow(attempt)).await;
            }
        }
        Err(SourceError::RetriesExhausted {
            url: url.to_owned(),
            attempts: MAX_ATTEMPTS,
            last,
        })
    }
}

#[async_trait]
impl ActivitySource for HttpActivitySource {
    async fn campaign_form(&self) -> Result<CampaignForm, SourceError> {
        let url = format!(
            "{}/!{}/api/campaigns/{}",
            self.base_url, self.campaign_token, self.campaign_id
        );
        let raw = self.send_with_retry(self.http.get(&url), &url).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn list_contact_ids(
        &self,
        cursor: &str,
        limit: usize,
    ) -> Result<ContactIdPage, SourceError> {
        let url = format!(
            "{}/!{}/data/campaigns/{}/contacts/",
            self.base_url, self.listing_token, self.campaign_id
        );
        let limit_param = limit.to_string();
        let request = self.http.get(&url).query(&[
            ("_type_", "f"),
            ("_limit_", limit_param.as_str()),
            ("_name___GT", cursor),
        ]);
        let raw = self.send_with_retry(request, &url).await?;
        let page: ListingPage = serde_json::from_str(&raw)?;
        let ids = page
            .results
            .iter()
            .filter_map(|record| record.get("_name_").and_then(Value::as_str))
            .map(str::to_owned)
            .collect();
        Ok(ContactIdPage {
            ids,
            exhausted: page.count < limit,
        })
    }

    async fn fetch_contacts(
        &self,
        ids: &[String],
    ) -> Result<Vec<Map<String, Value>>, SourceError> {
        let url = self.api_url("contacts/flat_view");
        let raw = self
            .send_with_retry(self.http.post(&url).json(&ids), &url)
            .await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn fetch_events(&self, query: &EventQuery) -> Result<EventPage, SourceError> {
        let url = self.api_url("contacts/transactions/");
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(event_type) = &self.filters.event_type {
            params.push(("type", event_type));
        }
        if self.filters.hi_only {
            params.push(("hi", "true"));
        }
        if let Some(tasks) = &self.filters.task_prefixes {
            params.push(("tasks", tasks));
        }
        if let Some(from) = &query.from {
            params.push(("from", from));
        }
        if let Some(to) = &query.to {
            params.push(("to", to));
        }
        if let Some(cursor) = &query.cursor {
            params.push(("cursor", cursor));
        }
        let request = self.http.get(&url).query(&params);
        let raw = self.send_with_retry(request, &url).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}
