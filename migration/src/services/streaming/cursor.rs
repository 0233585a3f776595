//! Cursor paginated search over the HTTP API

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::errors::{SearchError, SearchResult};
use super::traits::{extract_policies, PolicySearch, SearchEvent, SEARCH_FIELDS};
use crate::services::client::{ClientError, CredentialProvider};
use crate::services::config::MigrationConfig;

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    cursor: Option<String>,
}

pub struct CursorSearch {
    endpoint: String,
    http: reqwest::Client,
    credentials: Arc<CredentialProvider>,
    page_size: usize,
    namespaces: Vec<String>,
    filter: Option<String>,
    cursor: Option<String>,
    started: bool,
    completed: bool,
    seen: HashSet<String>,
}

impl CursorSearch {
    pub fn new(
        endpoint: &str,
        config: &MigrationConfig,
        http: reqwest::Client,
        credentials: Arc<CredentialProvider>,
    ) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
            credentials,
            page_size: config.page_size,
            namespaces: config.namespaces.clone(),
            filter: config.filter.clone(),
            cursor: None,
            started: false,
            completed: false,
            seen: HashSet::new(),
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut options = vec![format!("size({})", self.page_size)];
        if let Some(cursor) = &self.cursor {
            options.push(format!("cursor({})", cursor));
        }

        let mut query = vec![
            ("fields", SEARCH_FIELDS.to_string()),
            ("option", options.join(",")),
        ];
        if !self.namespaces.is_empty() {
            query.push(("namespaces", self.namespaces.join(",")));
        }
        if let Some(filter) = &self.filter {
            query.push(("filter", filter.clone()));
        }
        query
    }

    #[instrument(skip(self), fields(cursor = ?self.cursor))]
    async fn fetch_page(&mut self) -> SearchResult<Vec<SearchEvent>> {
        let mut headers = HeaderMap::new();
        self.credentials.add_auth_header(&mut headers).await?;

        let url = format!("{}/search/things", self.endpoint);
        let query = self.query();
        debug!("Executing search request: {} {:?}", url, query);

        let response = self
            .http
            .get(&url)
            .headers(headers)
            .query(&query)
            .send()
            .await
            .map_err(ClientError::from)?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::RequestFailed { status, body });
        }

        let page: SearchPage = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse {
                reason: e.to_string(),
            })?;

        let mut events = extract_policies(&page.items, &mut self.seen);

        match page.cursor.filter(|c| !c.is_empty()) {
            Some(cursor) => self.cursor = Some(cursor),
            None => {
                debug!("No cursor present in response, search completed.");
                self.cursor = None;
                self.completed = true;
                events.push(SearchEvent::Complete);
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl PolicySearch for CursorSearch {
    fn name(&self) -> &'static str {
        "cursor"
    }

    async fn start(&mut self) -> SearchResult<Vec<SearchEvent>> {
        self.started = true;
        self.fetch_page().await
    }

    async fn request_more(&mut self) -> SearchResult<Vec<SearchEvent>> {
        if !self.started {
            return Err(SearchError::NotStarted);
        }
        if self.completed {
            return Ok(Vec::new());
        }
        self.fetch_page().await
    }

    fn is_ready(&self) -> bool {
        self.started && !self.completed
    }

    fn is_complete(&self) -> bool {
        self.completed
    }

    fn result_count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item(thing: &str, policy: &str) -> Value {
        json!({
            "thingId": thing,
            "_policy": {
                "policyId": policy,
                "entries": { "DEFAULT": { "subjects": {}, "resources": {} } }
            }
        })
    }

    fn search(server: &MockServer, config: MigrationConfig) -> CursorSearch {
        let http = reqwest::Client::new();
        let credentials = Arc::new(CredentialProvider::new(&config, http.clone()));
        CursorSearch::new(&server.uri(), &config, http, credentials)
    }

    fn next_ids(events: &[SearchEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SearchEvent::Next(p) => Some(p.id.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_pages_until_cursor_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/things"))
            .and(query_param("option", "size(2),cursor(abc)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [item("ns:t3", "ns:p2"), item("ns:t4", "ns:p3")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/things"))
            .and(query_param("option", "size(2)"))
            .and(query_param("fields", "thingId,_policy"))
            .and(query_param("namespaces", "ns,other"))
            .and(query_param("filter", "exists(_policy)"))
            .and(header("authorization", "Bearer abc1234"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [item("ns:t1", "ns:p1"), item("ns:t2", "ns:p2")],
                "cursor": "abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = MigrationConfig {
            page_size: 2,
            namespaces: vec!["ns".to_string(), "other".to_string()],
            filter: Some("exists(_policy)".to_string()),
            bearer_token: Some("abc1234".to_string()),
            ..Default::default()
        };
        let mut search = search(&server, config);
        assert!(!search.is_ready());

        let first = search.start().await.unwrap();
        assert_eq!(next_ids(&first), vec!["ns:p1", "ns:p2"]);
        assert!(search.is_ready());
        assert!(!search.is_complete());

        let second = search.request_more().await.unwrap();
        assert_eq!(next_ids(&second), vec!["ns:p3"]);
        assert_eq!(second.last(), Some(&SearchEvent::Complete));
        assert!(search.is_complete());
        assert!(!search.is_ready());
        assert_eq!(search.result_count(), 3);

        assert!(search.request_more().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_result_completes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/things"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [], "cursor": "" })))
            .mount(&server)
            .await;

        let mut search = search(&server, MigrationConfig::default());
        let events = search.start().await.unwrap();

        assert_eq!(events, vec![SearchEvent::Complete]);
        assert_eq!(search.result_count(), 0);
    }

    #[tokio::test]
    async fn test_non_200_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/things"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad filter"))
            .mount(&server)
            .await;

        let mut search = search(&server, MigrationConfig::default());
        match search.start().await {
            Err(SearchError::RequestFailed { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad filter");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_more_before_start() {
        let server = MockServer::start().await;
        let mut search = search(&server, MigrationConfig::default());
        assert!(matches!(search.request_more().await, Err(SearchError::NotStarted)));
    }
}
