//! ============================================================================
//! Bungie API Client - Request plumbing and response envelopes
//! ============================================================================
//! Every Bungie platform response is wrapped in an envelope:
//! `{ Response, ErrorCode, ErrorStatus, Message, MessageData }`.
//! `request` attaches the API key and bearer token, unwraps the envelope
//! and turns non-success codes into `SetkeeperError::Remote`.
//! ============================================================================

mod profile;

pub use profile::{DestinyComponent, PROFILE_COMPONENTS, VENDOR_COMPONENTS};

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::auth::{TokenProvider, BUNGIE_BASE_URL};
use crate::db::LocalStore;
use crate::telemetry::Telemetry;
use crate::types::SetkeeperError;

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+/").unwrap());

/// Per-request switches
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Skip the access token lookup entirely
    pub no_auth: bool,
}

impl RequestOptions {
    pub fn no_auth() -> Self {
        Self { no_auth: true }
    }
}

/// Optional request body. Either kind turns the request into a POST.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Sent as `application/x-www-form-urlencoded`
    Form(String),
    /// Sent as `application/json`
    Json(Value),
}

/// Replace numeric path segments (account and character ids) with `_`
pub fn clean_url(url: &str) -> String {
    NUMERIC_SEGMENT.replace_all(url, "/_/").into_owned()
}

/// JavaScript-style truthiness, which decides whether `Response` is used
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Client for the Bungie.net platform API
pub struct DestinyClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    tokens: Arc<dyn TokenProvider>,
    telemetry: Arc<Telemetry>,
    store: Option<Arc<LocalStore>>,
}

impl DestinyClient {
    pub fn new(api_key: String, tokens: Arc<dyn TokenProvider>, telemetry: Arc<Telemetry>) -> Self {
        Self::with_base_url(BUNGIE_BASE_URL.to_string(), api_key, tokens, telemetry)
    }

    pub fn with_base_url(
        base_url: String,
        api_key: String,
        tokens: Arc<dyn TokenProvider>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("setkeeper/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            tokens,
            telemetry,
            store: None,
        }
    }

    /// Cache fetched profiles, URL bodies and manifest tables in `store`
    pub fn with_store(mut self, store: Arc<LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn store(&self) -> Option<&Arc<LocalStore>> {
        self.store.as_ref()
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn tokens(&self) -> &Arc<dyn TokenProvider> {
        &self.tokens
    }

    /// Plain GET of a JSON document, no API key or envelope handling
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SetkeeperError::Http(e.to_string()))?;

        let body = response
            .json()
            .await
            .map_err(|e| SetkeeperError::Parse(format!("{}: {}", url, e)))?;
        Ok(body)
    }

    /// Authenticated GET against the platform API
    pub async fn get(&self, pathname: &str) -> Result<Option<Value>> {
        self.request(pathname, RequestOptions::default(), None).await
    }

    /// Call the platform API and unwrap its envelope.
    /// Returns `Ok(None)` when Bungie reports `DestinyAccountNotFound`.
    pub async fn request(
        &self,
        pathname: &str,
        opts: RequestOptions,
        body: Option<RequestBody>,
    ) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, pathname);

        let access_token = if opts.no_auth {
            None
        } else {
            self.tokens.access_token().await?
        };

        let mut request = match body {
            Some(RequestBody::Form(form)) => self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(form),
            Some(RequestBody::Json(json)) => self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(json.to_string()),
            None => self.client.get(&url),
        };

        request = request.header("x-api-key", &self.api_key);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        debug!("REQUEST: {}", pathname);

        let response = request
            .send()
            .await
            .map_err(|e| SetkeeperError::Http(e.to_string()))?;
        let status = response.status();
        let resp: Value = response
            .json()
            .await
            .map_err(|e| SetkeeperError::Parse(format!("{} ({}): {}", clean_url(&url), status, e)))?;

        debug!("RESPONSE: {}", pathname);

        self.unwrap_envelope(&url, resp)
    }

    fn unwrap_envelope(&self, url: &str, resp: Value) -> Result<Option<Value>> {
        let error_status = resp
            .get("ErrorStatus")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if error_status == "DestinyAccountNotFound" {
            return Ok(None);
        }

        if let Some(code) = resp.get("ErrorCode") {
            if code.as_i64() != Some(1) {
                let err = SetkeeperError::Remote {
                    code: code.as_i64().unwrap_or_default(),
                    status: error_status,
                    message: resp
                        .get("Message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    url: clean_url(url),
                };

                if err.is_maintenance() {
                    let mut data = resp.clone();
                    if let Value::Object(map) = &mut data {
                        map.insert("url".to_string(), Value::String(url.to_string()));
                    }
                    self.telemetry
                        .track_breadcrumb("Bungie API Error", "api", "error", data);
                    return Err(err.into());
                }

                let err = anyhow::Error::new(err);
                self.telemetry.track_error(&err);
                return Err(err);
            }
        }

        match resp.get("Response") {
            Some(inner) if is_truthy(inner) => Ok(Some(inner.clone())),
            _ => Ok(Some(resp)),
        }
    }
}
