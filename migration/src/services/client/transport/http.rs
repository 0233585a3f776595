//! Request/response transport over the HTTP API
//!
//! Only policy modify commands are supported. Each command becomes a `PUT` run
//! on its own task, and the response is fed back through the inbound channel
//! as if it had arrived on a duplex connection.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, instrument, warn};

use super::{Inbound, Transport};
use crate::services::client::auth::CredentialProvider;
use crate::services::client::types::{DittoMessage, CONTENT_TYPE_JSON, CORRELATION_ID, IF_MATCH};
use crate::services::client::{ClientError, ClientResult};

/// Status used for responses synthesized from network errors
pub const NETWORK_ERROR_STATUS: u16 = 503;

pub struct HttpTransport {
    endpoint: String,
    http: reqwest::Client,
    credentials: Arc<CredentialProvider>,
    inbound: Mutex<Option<mpsc::UnboundedSender<DittoMessage>>>,
}

impl HttpTransport {
    pub fn new(endpoint: &str, http: reqwest::Client, credentials: Arc<CredentialProvider>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
            credentials,
            inbound: Mutex::new(None),
        }
    }

    /// Client with the per-request timeout applied
    pub fn client_with_timeout(timeout: Duration) -> ClientResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::from)
    }

    fn policy_url(&self, policy_id: &str) -> String {
        format!("{}/policies/{}", self.endpoint, policy_id)
    }

    async fn request_headers(&self, message: &DittoMessage) -> ClientResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        self.credentials.add_auth_header(&mut headers).await?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));

        for name in [CORRELATION_ID, IF_MATCH] {
            if let Some(value) = message.header_str(name) {
                let invalid = |e: String| ClientError::SerializationError {
                    message: format!("header {}: {}", name, e),
                };
                let header_name =
                    HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
                let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
                headers.insert(header_name, value);
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn connect(&self) -> ClientResult<Inbound> {
        // Resolves OAuth up front so a bad credential fails the connect
        let mut headers = HeaderMap::new();
        self.credentials.add_auth_header(&mut headers).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock().await = Some(tx);
        debug!("HTTP transport ready for {}", self.endpoint);
        Ok(rx)
    }

    #[instrument(skip(self, message), fields(topic = %message.topic))]
    async fn send(&self, message: DittoMessage) -> ClientResult<()> {
        let inbound = self
            .inbound
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotReady)?;

        let policy_id = match message.policy_id() {
            Some(id) if message.is_modify_policy() => id,
            _ => {
                return Err(ClientError::UnsupportedCommand {
                    topic: message.topic.clone(),
                })
            }
        };

        let headers = self.request_headers(&message).await?;
        let request = self
            .http
            .put(self.policy_url(&policy_id))
            .headers(headers)
            .json(message.value.as_ref().unwrap_or(&Value::Null));

        let topic = message.topic.clone();
        let correlation_id = message.correlation_id().unwrap_or_default().to_string();

        tokio::spawn(async move {
            let (status, value) = match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    (status, parse_body(&body))
                }
                Err(e) => {
                    warn!("Request for {} failed: {}", policy_id, e);
                    (
                        NETWORK_ERROR_STATUS,
                        json!({
                            "status": NETWORK_ERROR_STATUS,
                            "error": "transport:request.failed",
                            "message": e.to_string(),
                        }),
                    )
                }
            };

            let response = DittoMessage::new(topic, &correlation_id).with_value(value);
            let response = DittoMessage {
                status: Some(status),
                ..response
            };
            if inbound.send(response).is_err() {
                debug!("Inbound channel closed, dropping response for {}", policy_id);
            }
        });

        Ok(())
    }

    async fn close(&self) -> ClientResult<()> {
        match self.inbound.lock().await.take() {
            Some(_) => Ok(()),
            None => Err(ClientError::NotReady),
        }
    }
}

fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::types::PolicyDocument;
    use crate::services::config::MigrationConfig;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpTransport {
        let config = MigrationConfig {
            http_endpoint: Some(server.uri()),
            bearer_token: Some("abc1234".to_string()),
            ..Default::default()
        };
        let http = reqwest::Client::new();
        let credentials = Arc::new(CredentialProvider::new(&config, http.clone()));
        HttpTransport::new(&format!("{}/", server.uri()), http, credentials)
    }

    fn policy() -> PolicyDocument {
        PolicyDocument::from_value(json!({
            "policyId": "org.example:device",
            "entries": { "DEFAULT": { "subjects": { "a": { "type": "t" } }, "resources": {} } }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let server = MockServer::start().await;
        let transport = transport(&server);
        let message = DittoMessage::modify_policy(&policy(), "cid", false).unwrap();

        assert!(matches!(transport.send(message).await, Err(ClientError::NotReady)));
        assert!(matches!(transport.close().await, Err(ClientError::NotReady)));
    }

    #[tokio::test]
    async fn test_modify_is_put_and_answered_on_inbound() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/policies/org.example:device"))
            .and(header("authorization", "Bearer abc1234"))
            .and(header("correlation-id", "cid-1"))
            .and(header("if-match", "\"rev:0\""))
            .and(body_json(serde_json::to_value(policy()).unwrap()))
            .respond_with(ResponseTemplate::new(412).set_body_json(json!({
                "status": 412,
                "error": "policies:precondition.failed"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(&server);
        let mut inbound = transport.connect().await.unwrap();
        let message = DittoMessage::modify_policy(&policy(), "cid-1", true).unwrap();
        transport.send(message).await.unwrap();

        let response = inbound.recv().await.unwrap();
        assert_eq!(response.status, Some(412));
        assert_eq!(response.correlation_id(), Some("cid-1"));
        assert_eq!(response.topic, "org.example/device/policies/commands/modify");
        assert_eq!(response.value.unwrap()["error"], "policies:precondition.failed");
    }

    #[tokio::test]
    async fn test_no_content_response() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let transport = transport(&server);
        let mut inbound = transport.connect().await.unwrap();
        transport
            .send(DittoMessage::modify_policy(&policy(), "cid-2", false).unwrap())
            .await
            .unwrap();

        let response = inbound.recv().await.unwrap();
        assert_eq!(response.status, Some(204));
        assert_eq!(response.value, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_network_error_becomes_503() {
        let config = MigrationConfig::default();
        let http = reqwest::Client::new();
        let credentials = Arc::new(CredentialProvider::new(&config, http.clone()));
        // Nothing listens on port 1
        let transport = HttpTransport::new("http://127.0.0.1:1", http, credentials);

        let mut inbound = transport.connect().await.unwrap();
        transport
            .send(DittoMessage::modify_policy(&policy(), "cid-3", false).unwrap())
            .await
            .unwrap();

        let response = inbound.recv().await.unwrap();
        assert_eq!(response.status, Some(NETWORK_ERROR_STATUS));
        assert_eq!(response.correlation_id(), Some("cid-3"));
    }

    #[tokio::test]
    async fn test_search_commands_are_unsupported() {
        let server = MockServer::start().await;
        let transport = transport(&server);
        let _inbound = transport.connect().await.unwrap();

        let subscribe = DittoMessage::new("_/_/things/twin/search/subscribe", "cid");
        assert!(matches!(
            transport.send(subscribe).await,
            Err(ClientError::UnsupportedCommand { .. })
        ));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"a\":1}"), json!({ "a": 1 }));
        assert_eq!(parse_body("oops"), json!("oops"));
    }
}
