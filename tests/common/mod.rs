#![allow(dead_code)]

use dragnet::http::ApiClient;
use reqwest::header::HeaderMap;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// Matches a listing request whose facet parameters are exactly `pairs`
/// (the page size is ignored).
pub struct FacetsAre(pub Vec<(&'static str, &'static str)>);

impl Match for FacetsAre {
    fn matches(&self, request: &Request) -> bool {
        let actual: Vec<(String, String)> = request
            .url
            .query_pairs()
            .filter(|(k, _)| k != "resultPerPage")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let expected: Vec<(String, String)> = self
            .0
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        actual == expected
    }
}

pub fn api(server: &MockServer) -> ApiClient {
    ApiClient::new(&format!("{}/notices", server.uri()), HeaderMap::new(), 1000).unwrap()
}

pub fn listing(total: u64, notices: Vec<Value>, next: Option<String>) -> Value {
    let mut body = json!({
        "total": total,
        "_embedded": { "notices": notices },
        "_links": {}
    });
    if let Some(href) = next {
        body["_links"]["next"] = json!({ "href": href });
    }
    body
}

pub fn stub(entity_id: &str, name: &str) -> Value {
    json!({ "entity_id": entity_id, "name": name })
}

/// Listing page for exactly these facets.
pub async fn mount_listing(
    server: &MockServer,
    facets: Vec<(&'static str, &'static str)>,
    body: Value,
) {
    Mock::given(method("GET"))
        .and(path("/notices"))
        .and(FacetsAre(facets))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .with_priority(1)
        .mount(server)
        .await;
}

/// Catch-all listing page for every filter without its own mock.
pub async fn mount_default_listing(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path("/notices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .with_priority(10)
        .mount(server)
        .await;
}
