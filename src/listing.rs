use crate::config::{MAX_PAGES_PER_FILTER, RESULT_CAP};
use crate::http::{ApiClient, ApiError};
use crate::models::FacetFilter;
use async_trait::async_trait;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct ListingResponse {
    total: Option<u64>,
    #[serde(rename = "_embedded", default)]
    embedded: Option<Embedded>,
    #[serde(rename = "_links", default)]
    links: Option<Links>,
}

#[derive(Deserialize)]
struct Embedded {
    #[serde(default)]
    notices: Vec<Value>,
}

#[derive(Deserialize)]
struct Links {
    next: Option<Href>,
}

#[derive(Deserialize)]
struct Href {
    href: String,
}

/// One page of listing results.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub stubs: Vec<Value>,
    pub next: Option<String>,
    pub total: Option<u64>,
}

impl From<ListingResponse> for ListingPage {
    fn from(resp: ListingResponse) -> Self {
        Self {
            stubs: resp.embedded.map(|e| e.notices).unwrap_or_default(),
            next: resp.links.and_then(|l| l.next).map(|n| n.href),
            total: resp.total,
        }
    }
}

/// Total match count reported for a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCount {
    Known(u64),
    /// The endpoint answered without a `total`; treated as coverable.
    Unknown,
}

impl MatchCount {
    pub fn exceeds_cap(self) -> bool {
        matches!(self, MatchCount::Known(n) if n > RESULT_CAP)
    }
}

/// Anything that can report how many records a filter matches.
#[async_trait]
pub trait CountSource: Send + Sync {
    async fn probe(&self, filter: &FacetFilter) -> Result<MatchCount, ApiError>;
}

/// Probes and walks the listing endpoint over HTTP.
#[derive(Clone)]
pub struct ListingClient {
    api: ApiClient,
}

/// Everything one filter walk produced, including how it ended.
#[derive(Debug, Default)]
pub struct Walk {
    pub stubs: Vec<Value>,
    pub pages: usize,
    pub reported_total: Option<u64>,
    /// Set when a page request failed; stubs gathered before it are kept.
    pub failure: Option<ApiError>,
}

impl ListingClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn fetch_page(&self, url: reqwest::Url) -> Result<ListingPage, ApiError> {
        let resp: ListingResponse = self.api.get_json(url, "listing_page").await?;
        Ok(resp.into())
    }

    /// Follows `_links.next.href` until the API stops handing one out.
    ///
    /// A repeated next link or more than `MAX_PAGES_PER_FILTER` pages ends the
    /// walk early with a warning.
    pub async fn walk(&self, filter: &FacetFilter) -> Walk {
        let mut walk = Walk::default();
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut url = self.api.listing_url(filter);

        loop {
            if walk.pages >= MAX_PAGES_PER_FILTER {
                warn!(filter = %filter, pages = walk.pages, "Page limit reached, stopping walk");
                break;
            }
            visited.insert(url.to_string());

            let page = match self.fetch_page(url).await {
                Ok(page) => page,
                Err(e) => {
                    walk.failure = Some(e);
                    break;
                }
            };
            walk.pages += 1;
            if walk.reported_total.is_none() {
                walk.reported_total = page.total;
            }
            walk.stubs.extend(page.stubs);

            let Some(next) = page.next else {
                break;
            };
            if visited.contains(&next) {
                warn!(filter = %filter, next = %next, "Cyclic next link, stopping walk");
                break;
            }
            url = match ApiClient::parse_url(&next) {
                Ok(u) => u,
                Err(e) => {
                    walk.failure = Some(e);
                    break;
                }
            };
        }

        if let Some(total) = walk.reported_total {
            if total > RESULT_CAP {
                warn!(
                    filter = %filter,
                    total,
                    retrieved = walk.stubs.len(),
                    "Filter matches more than the result cap, some records stay hidden"
                );
            }
        }
        debug!(filter = %filter, pages = walk.pages, stubs = walk.stubs.len(), "Walk finished");
        walk
    }
}

#[async_trait]
impl CountSource for ListingClient {
    /// One listing request; only `total` is read.
    async fn probe(&self, filter: &FacetFilter) -> Result<MatchCount, ApiError> {
        let page = self.fetch_page(self.api.listing_url(filter)).await?;
        Ok(match page.total {
            Some(n) => MatchCount::Known(n),
            None => MatchCount::Unknown,
        })
    }
}
