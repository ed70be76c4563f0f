//! HTTP client for OpenSearch / Elasticsearch `_search`

use crate::client::{SearchClient, SearchHit, SearchRequest};
use crate::error::{LookupError, LookupResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use spanfill_core::config::TraceGroupSettings;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// `_search` client shared by every worker.
///
/// `reqwest::Client` pools connections internally and is cheap to clone,
/// so a search clones it out of the lock and runs without holding it.
pub struct OpenSearchClient {
    client: RwLock<Option<Client>>,
    hosts: Vec<String>,
    next_host: AtomicUsize,
    username: Option<String>,
    password: Option<String>,
}

impl OpenSearchClient {
    /// Create a new client for the configured hosts
    pub fn new(settings: &TraceGroupSettings) -> LookupResult<Self> {
        if settings.hosts.is_empty() {
            return Err(LookupError::Protocol(
                "no document store hosts configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .user_agent(format!("spanfill/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;

        let hosts: Vec<String> = settings
            .hosts
            .iter()
            .map(|h| h.trim_end_matches('/').to_string())
            .collect();

        info!("Search client created: hosts={:?}", hosts);

        Ok(Self {
            client: RwLock::new(Some(client)),
            hosts,
            next_host: AtomicUsize::new(0),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    /// Hosts in rotation order
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.client.read().is_none()
    }

    fn next_host(&self) -> &str {
        let i = self.next_host.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        &self.hosts[i]
    }

    async fn handle_response(&self, response: reqwest::Response) -> LookupResult<Vec<SearchHit>> {
        let status = response.status();

        if status == StatusCode::OK {
            let body = response.bytes().await?;
            let parsed: SearchResponse = serde_json::from_slice(&body)
                .map_err(|e| LookupError::Protocol(e.to_string()))?;
            return parsed.into_hits();
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_reason(&body).unwrap_or(body);
        if status.is_server_error() {
            error!("Search server error {}: {}", status, message);
        } else {
            debug!("Search rejected with {}: {}", status, message);
        }
        Err(LookupError::server(status.as_u16(), message))
    }
}

#[async_trait]
impl SearchClient for OpenSearchClient {
    async fn search(&self, request: &SearchRequest) -> LookupResult<Vec<SearchHit>> {
        let client = self.client.read().clone().ok_or(LookupError::Closed)?;
        let url = format!("{}/{}/_search", self.next_host(), request.index);

        debug!(
            "Searching {} for {} trace ids",
            url,
            request.trace_ids.len()
        );

        let mut builder = client.post(&url).json(&query_body(request));
        if let Some(username) = &self.username {
            builder = builder.basic_auth(username, self.password.as_ref());
        }

        let response = builder.send().await?;
        self.handle_response(response).await
    }

    fn close(&self) -> LookupResult<()> {
        if self.client.write().take().is_some() {
            info!("Search client closed");
        }
        Ok(())
    }
}

/// Build the `_search` body for a batched trace id lookup
pub fn query_body(request: &SearchRequest) -> Value {
    let mut terms = Map::new();
    terms.insert(request.trace_id_field.clone(), json!(request.trace_ids));

    let mut filters = vec![
        json!({ "terms": terms }),
        json!({ "exists": { "field": request.trace_group_field } }),
    ];

    if let Some(parent_field) = &request.root_span_field {
        let mut term = Map::new();
        term.insert(parent_field.clone(), json!(""));
        filters.push(json!({ "term": term }));
    }

    json!({
        "size": request.size,
        "_source": false,
        "docvalue_fields": [request.trace_id_field, request.trace_group_field],
        "query": { "bool": { "filter": filters } }
    })
}

/// `reason` of an OpenSearch error body, if it has one
fn error_reason(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/root_cause/0/reason")
        .or_else(|| value.pointer("/error/reason"))
        .and_then(Value::as_str)
        .map(String::from)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    timed_out: bool,
    #[serde(default, rename = "_shards")]
    shards: Option<ShardStats>,
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct ShardStats {
    #[serde(default)]
    failed: u64,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    total: Option<HitsTotal>,
    #[serde(default)]
    hits: Vec<SearchHit>,
}

/// `hits.total`: an object since Elasticsearch 7, a bare count before
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HitsTotal {
    Tracked {
        value: u64,
        #[serde(default)]
        relation: Option<String>,
    },
    Count(u64),
}

impl HitsTotal {
    /// Whether more documents matched than `returned`
    fn exceeds(&self, returned: usize) -> bool {
        match self {
            // "gte" means the count stopped at `value`; more may exist
            HitsTotal::Tracked { value, relation } => {
                *value > returned as u64 || relation.as_deref() == Some("gte")
            }
            HitsTotal::Count(value) => *value > returned as u64,
        }
    }

    fn value(&self) -> u64 {
        match self {
            HitsTotal::Tracked { value, .. } | HitsTotal::Count(value) => *value,
        }
    }
}

impl SearchResponse {
    fn into_hits(self) -> LookupResult<Vec<SearchHit>> {
        let failed_shards = self.shards.map(|s| s.failed).unwrap_or(0);
        if self.timed_out || failed_shards > 0 {
            return Err(LookupError::PartialResponse {
                timed_out: self.timed_out,
                failed_shards,
            });
        }

        let returned = self.hits.hits.len();
        if let Some(total) = self.hits.total.as_ref().filter(|t| t.exceeds(returned)) {
            return Err(LookupError::TruncatedHits {
                returned,
                total: total.value(),
            });
        }

        Ok(self.hits.hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(hosts: Vec<String>) -> TraceGroupSettings {
        TraceGroupSettings {
            hosts,
            index: "spans".to_string(),
            request_timeout_ms: 2_000,
            ..Default::default()
        }
    }

    fn request(ids: &[&str]) -> SearchRequest {
        SearchRequest {
            index: "spans".to_string(),
            trace_id_field: "traceId".to_string(),
            trace_group_field: "traceGroup".to_string(),
            trace_ids: ids.iter().map(|s| s.to_string()).collect(),
            size: ids.len(),
            root_span_field: None,
        }
    }

    fn hits_body(hits: Value) -> Value {
        let total = hits.as_array().map(Vec::len).unwrap_or(0);
        json!({
            "took": 3,
            "timed_out": false,
            "_shards": {"total": 1, "successful": 1, "skipped": 0, "failed": 0},
            "hits": {"total": {"value": total, "relation": "eq"}, "hits": hits}
        })
    }

    async fn serve_search_response(body: Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_query_body() {
        let body = query_body(&request(&["t1", "t2"]));
        assert_eq!(
            body,
            json!({
                "size": 2,
                "_source": false,
                "docvalue_fields": ["traceId", "traceGroup"],
                "query": {"bool": {"filter": [
                    {"terms": {"traceId": ["t1", "t2"]}},
                    {"exists": {"field": "traceGroup"}}
                ]}}
            })
        );
    }

    #[test]
    fn test_query_body_root_spans_only() {
        let mut req = request(&["t1"]);
        req.root_span_field = Some("parentSpanId".to_string());
        let body = query_body(&req);
        assert_eq!(
            body.pointer("/query/bool/filter/2"),
            Some(&json!({"term": {"parentSpanId": ""}}))
        );
    }

    #[test]
    fn test_error_reason() {
        let body = r#"{"error":{"root_cause":[{"type":"index_not_found_exception","reason":"no such index [spans]"}],"reason":"outer"},"status":404}"#;
        assert_eq!(error_reason(body).as_deref(), Some("no such index [spans]"));
        assert_eq!(error_reason("gateway down"), None);
    }

    #[test]
    fn test_trailing_slash_removed() {
        let client = OpenSearchClient::new(&settings(vec!["http://search:9200/".to_string()])).unwrap();
        assert_eq!(client.hosts(), ["http://search:9200"]);
    }

    #[tokio::test]
    async fn test_search_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/spans/_search"))
            .and(body_partial_json(json!({
                "_source": false,
                "query": {"bool": {"filter": [{"terms": {"traceId": ["t1", "t2"]}}]}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(hits_body(json!([
                {"_id": "a", "fields": {"traceId": ["t1"], "traceGroup": ["/g1"]}},
                {"_id": "b", "fields": {"traceId": ["t2"], "traceGroup": ["/g2"]}}
            ]))))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenSearchClient::new(&settings(vec![server.uri()])).unwrap();
        let hits = client.search(&request(&["t1", "t2"])).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].field_str("traceGroup"), Some("/g1"));
        assert_eq!(hits[1].field_str("traceId"), Some("t2"));
    }

    #[tokio::test]
    async fn test_search_sends_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(hits_body(json!([]))))
            .expect(1)
            .mount(&server)
            .await;

        let mut s = settings(vec![server.uri()]);
        s.username = Some("admin".to_string());
        s.password = Some("secret".to_string());

        let client = OpenSearchClient::new(&s).unwrap();
        let hits = client.search(&request(&["t1"])).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_rotates_hosts() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        for server in [&first, &second] {
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200).set_body_json(hits_body(json!([]))))
                .expect(1)
                .mount(server)
                .await;
        }

        let client = OpenSearchClient::new(&settings(vec![first.uri(), second.uri()])).unwrap();
        client.search(&request(&["t1"])).await.unwrap();
        client.search(&request(&["t2"])).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": {"type": "cluster_block_exception", "reason": "blocked by: [SERVICE_UNAVAILABLE]"},
                "status": 503
            })))
            .mount(&server)
            .await;

        let client = OpenSearchClient::new(&settings(vec![server.uri()])).unwrap();
        let err = client.search(&request(&["t1"])).await.unwrap_err();
        match err {
            LookupError::Server { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "blocked by: [SERVICE_UNAVAILABLE]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_partial_response_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "timed_out": false,
                "_shards": {"total": 3, "successful": 2, "failed": 1},
                "hits": {"hits": [{"fields": {"traceId": ["t1"], "traceGroup": ["/g1"]}}]}
            })))
            .mount(&server)
            .await;

        let client = OpenSearchClient::new(&settings(vec![server.uri()])).unwrap();
        let err = client.search(&request(&["t1"])).await.unwrap_err();
        assert!(matches!(
            err,
            LookupError::PartialResponse {
                timed_out: false,
                failed_shards: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_truncated_hits_are_an_error() {
        let server = serve_search_response(json!({
            "timed_out": false,
            "_shards": {"total": 1, "successful": 1, "failed": 0},
            "hits": {
                "total": {"value": 25000, "relation": "eq"},
                "hits": [{"fields": {"traceId": ["t1"], "traceGroup": ["/g1"]}}]
            }
        }))
        .await;

        let client = OpenSearchClient::new(&settings(vec![server.uri()])).unwrap();
        let err = client.search(&request(&["t1", "t2"])).await.unwrap_err();
        assert!(matches!(
            err,
            LookupError::TruncatedHits {
                returned: 1,
                total: 25000
            }
        ));
    }

    #[tokio::test]
    async fn test_lower_bound_total_is_truncated() {
        let server = serve_search_response(json!({
            "hits": {
                "total": {"value": 1, "relation": "gte"},
                "hits": [{"fields": {"traceId": ["t1"], "traceGroup": ["/g1"]}}]
            }
        }))
        .await;

        let client = OpenSearchClient::new(&settings(vec![server.uri()])).unwrap();
        let err = client.search(&request(&["t1"])).await.unwrap_err();
        assert!(matches!(err, LookupError::TruncatedHits { .. }));
    }

    #[tokio::test]
    async fn test_legacy_numeric_total() {
        let hit = json!({"fields": {"traceId": ["t1"], "traceGroup": ["/g1"]}});

        let complete = serve_search_response(json!({"hits": {"total": 1, "hits": [hit.clone()]}})).await;
        let client = OpenSearchClient::new(&settings(vec![complete.uri()])).unwrap();
        assert_eq!(client.search(&request(&["t1"])).await.unwrap().len(), 1);

        let truncated = serve_search_response(json!({"hits": {"total": 3, "hits": [hit]}})).await;
        let client = OpenSearchClient::new(&settings(vec![truncated.uri()])).unwrap();
        assert!(matches!(
            client.search(&request(&["t1"])).await,
            Err(LookupError::TruncatedHits {
                returned: 1,
                total: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&server)
            .await;

        let client = OpenSearchClient::new(&settings(vec![server.uri()])).unwrap();
        let err = client.search(&request(&["t1"])).await.unwrap_err();
        assert!(matches!(err, LookupError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let client = OpenSearchClient::new(&settings(vec!["http://127.0.0.1:1".to_string()])).unwrap();
        let err = client.search(&request(&["t1"])).await.unwrap_err();
        assert!(matches!(err, LookupError::Network(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_searches() {
        let client = OpenSearchClient::new(&settings(vec!["http://127.0.0.1:1".to_string()])).unwrap();
        assert!(!client.is_closed());

        client.close().unwrap();
        client.close().unwrap();
        assert!(client.is_closed());

        let err = client.search(&request(&["t1"])).await.unwrap_err();
        assert!(matches!(err, LookupError::Closed));
    }
}
