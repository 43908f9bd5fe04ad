//! JSON-over-HTTP backend with a resettable session.

mod wire;

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::{debug, info, warn};

use super::{
    FetchError, ItemPage, ItemSource, OperationClient, OperationError, Session, SessionError,
};
use crate::models::{Batch, BatchResult, GroupDirectory, GroupTask, Item};
use wire::{GroupEntry, ItemsPage, ItemsRequest, OperationRequest, OperationResponse};

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 300;

/// Connection settings for [`HttpBackend`].
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Base URL without trailing slash, e.g. `https://api.example.com`.
    pub base_url: String,
    pub groups_path: String,
    pub items_path: String,
    pub operation_path: String,
    /// Items requested per page when listing a group.
    pub page_size: usize,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub token: Option<String>,
    pub token_header: String,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Static parameters sent with every operation call.
    pub operation_params: serde_json::Map<String, serde_json::Value>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            groups_path: "/api/groups".to_string(),
            items_path: "/api/items".to_string(),
            operation_path: "/api/operation".to_string(),
            page_size: 1000,
            request_timeout: Duration::from_secs(60),
            user_agent: concat!("batchsweep/", env!("CARGO_PKG_VERSION")).to_string(),
            token: None,
            token_header: "Authorization".to_string(),
            headers: BTreeMap::new(),
            operation_params: serde_json::Map::new(),
        }
    }
}

/// Backend speaking the JSON contract described in the crate docs.
///
/// The reqwest client is the session: workers clone it out under a read lock
/// for each request, and [`Session::reset`] swaps in a freshly built one.
pub struct HttpBackend {
    settings: BackendSettings,
    client: RwLock<Client>,
}

impl HttpBackend {
    /// Create a backend and its initial session.
    pub fn new(settings: BackendSettings) -> Result<Self, SessionError> {
        let client = build_client(&settings)?;
        Ok(Self {
            settings,
            client: RwLock::new(client),
        })
    }

    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn client(&self) -> Client {
        match self.client.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(ref token) = self.settings.token {
            if !token.is_empty() {
                let value = if self.settings.token_header.eq_ignore_ascii_case("authorization") {
                    format!("Bearer {}", token)
                } else {
                    token.clone()
                };
                request = request.header(self.settings.token_header.as_str(), value);
            }
        }
        for (name, value) in &self.settings.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    /// Load the backend's group list into an immutable directory.
    pub async fn fetch_groups(&self) -> Result<GroupDirectory, FetchError> {
        let url = self.url(&self.settings.groups_path);
        debug!("Fetching group list from {}", url);

        let to_fetch_error = |message: String| FetchError::Backend {
            group: "*".to_string(),
            message,
        };

        let response = self
            .with_headers(self.client().get(&url))
            .send()
            .await
            .map_err(|e| to_fetch_error(describe_reqwest_error(&e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| to_fetch_error(describe_reqwest_error(&e)))?;
        if !status.is_success() {
            return Err(to_fetch_error(describe_http_status(status.as_u16(), &body)));
        }

        let entries: Vec<GroupEntry> =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode {
                group: "*".to_string(),
                message: e.to_string(),
            })?;

        Ok(GroupDirectory::new(
            entries
                .into_iter()
                .filter_map(|g| Some((g.name?, wire::id_string(&g.id)?))),
        ))
    }
}

fn build_client(settings: &BackendSettings) -> Result<Client, SessionError> {
    Client::builder()
        .user_agent(&settings.user_agent)
        .timeout(settings.request_timeout)
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(|e| SessionError(describe_reqwest_error(&e)))
}

/// Render a reqwest error with its full source chain, so markers such as
/// "connection refused" or "timed out" buried in the I/O error stay visible.
fn describe_reqwest_error(err: &reqwest::Error) -> String {
    let mut message = if err.is_timeout() {
        format!("request timed out: {}", err)
    } else {
        err.to_string()
    };
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn describe_http_status(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("HTTP {}", status);
    }
    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    format!("HTTP {}: {}", status, snippet)
}

#[async_trait]
impl ItemSource for HttpBackend {
    fn page_size(&self) -> usize {
        self.settings.page_size
    }

    async fn fetch_page(
        &self,
        group: &GroupTask,
        offset: usize,
        limit: usize,
    ) -> Result<ItemPage, FetchError> {
        let url = self.url(&self.settings.items_path);
        let body = ItemsRequest {
            group_id: &group.group_id,
            group_name: &group.group_name,
            offset,
            limit,
            filter: &group.fetch_params,
        };

        let backend_error = |message: String| FetchError::Backend {
            group: group.group_name.clone(),
            message,
        };

        let response = self
            .with_headers(self.client().post(&url).json(&body))
            .send()
            .await
            .map_err(|e| backend_error(describe_reqwest_error(&e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| backend_error(describe_reqwest_error(&e)))?;
        if !status.is_success() {
            return Err(backend_error(describe_http_status(status.as_u16(), &text)));
        }

        let page: ItemsPage = serde_json::from_str(&text).map_err(|e| FetchError::Decode {
            group: group.group_name.clone(),
            message: e.to_string(),
        })?;

        let raw_len = page.items.len();
        let mut items = Vec::with_capacity(raw_len);
        for entry in page.items {
            match wire::id_string(&entry.id) {
                Some(id) => items.push(
                    Item::new(id, entry.name.unwrap_or_default())
                        .with_payload(entry.payload.unwrap_or(serde_json::Value::Null)),
                ),
                None => warn!(
                    "Skipping item without usable id in group {}",
                    group.group_name
                ),
            }
        }
        Ok(ItemPage::new(items, raw_len))
    }
}

#[async_trait]
impl OperationClient for HttpBackend {
    async fn execute(&self, batch: &Batch) -> Result<BatchResult, OperationError> {
        let url = self.url(&self.settings.operation_path);
        let ids: Vec<&str> = batch.ids().map(|id| id.0.as_str()).collect();
        let body = OperationRequest {
            ids,
            params: &self.settings.operation_params,
        };

        let response = self
            .with_headers(self.client().post(&url).json(&body))
            .send()
            .await
            .map_err(|e| OperationError::new(describe_reqwest_error(&e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OperationError::new(describe_reqwest_error(&e)))?;
        if !status.is_success() {
            return Err(OperationError::new(describe_http_status(
                status.as_u16(),
                &text,
            )));
        }

        let parsed: OperationResponse = serde_json::from_str(&text)
            .map_err(|e| OperationError::new(format!("Malformed operation response: {}", e)))?;
        Ok(parsed.into_batch_result())
    }
}

#[async_trait]
impl Session for HttpBackend {
    async fn reset(&self) -> Result<(), SessionError> {
        let fresh = build_client(&self.settings)?;
        match self.client.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        info!("HTTP session recreated for {}", self.settings.base_url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_http_status_truncates_body() {
        let long = "x".repeat(1000);
        let message = describe_http_status(502, &long);
        assert!(message.starts_with("HTTP 502: "));
        assert_eq!(message.len(), "HTTP 502: ".len() + MAX_ERROR_BODY);
        assert_eq!(describe_http_status(404, "  "), "HTTP 404");
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let backend = HttpBackend::new(BackendSettings {
            base_url: "https://api.example.com/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            backend.url("/api/items"),
            "https://api.example.com/api/items"
        );
    }
}
