use crate::config::{HTTP_TIMEOUT_SECS, RESULT_PER_PAGE};
use crate::models::FacetFilter;
use anyhow::{Context, Result};
use bytes::Bytes;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid URL `{0}`")]
    InvalidUrl(String),
    #[error("request error during `{stage}`: {source}")]
    Request {
        stage: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected HTTP status {status} during `{stage}`")]
    HttpStatus { stage: &'static str, status: u16 },
    #[error("failed to read HTTP body during `{stage}`: {source}")]
    Body {
        stage: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("JSON decode error during `{stage}`: {source}")]
    Json {
        stage: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Worth retrying later: transport failures, throttling and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Request { .. } | ApiError::Body { .. } => true,
            ApiError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ApiError::InvalidUrl(_) | ApiError::Json { .. } => false,
        }
    }
}

/// Shared HTTP client for the listing, detail and image endpoints.
///
/// Requests go out one at a time from the caller's point of view; the rate
/// limiter only spaces them so the upstream API is never hammered.
#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    http: Client,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl ApiClient {
    pub fn new(base_url: &str, headers: HeaderMap, requests_per_second: u32) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid API base URL: {base_url}"))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            base_url,
            http,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// `GET <base>?<facets>&resultPerPage=200`
    pub fn listing_url(&self, filter: &FacetFilter) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in filter.query_pairs() {
                query.append_pair(key, &value);
            }
            query.append_pair("resultPerPage", &RESULT_PER_PAGE.to_string());
        }
        url
    }

    /// `GET <base>/<identity>` with the identity encoded as one path segment.
    pub fn detail_url(&self, entity_id: &str) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(entity_id);
        Ok(url)
    }

    pub fn parse_url(raw: &str) -> Result<Url, ApiError> {
        Url::parse(raw).map_err(|_| ApiError::InvalidUrl(raw.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        stage: &'static str,
    ) -> Result<T, ApiError> {
        let body = self.get_bytes(url, stage).await?;
        serde_json::from_slice(&body).map_err(|source| ApiError::Json { stage, source })
    }

    pub async fn get_bytes(&self, url: Url, stage: &'static str) -> Result<Bytes, ApiError> {
        self.rate_limiter.until_ready().await;
        debug!(stage, url = %url, "GET");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| ApiError::Request { stage, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                stage,
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|source| ApiError::Body { stage, source })
    }
}

/// Reads the static request headers file (a flat JSON object of name -> value).
pub fn load_headers(path: &Path) -> Result<HeaderMap> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read headers file: {}", path.display()))?;
    parse_headers(&raw).with_context(|| format!("Invalid headers file: {}", path.display()))
}

pub fn parse_headers(raw: &str) -> Result<HeaderMap> {
    let entries: BTreeMap<String, String> =
        serde_json::from_str(raw).context("Headers must be a JSON object of strings")?;

    let mut headers = HeaderMap::with_capacity(entries.len());
    for (name, value) in entries {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name: {name}"))?;
        let header_value = HeaderValue::from_str(&value)
            .with_context(|| format!("Invalid value for header {name}"))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
