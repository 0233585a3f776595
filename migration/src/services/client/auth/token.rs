//! OAuth2 client-credentials token acquisition

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::services::client::{ClientError, ClientResult};
use crate::services::config::OAuthConfig;

/// Source of OAuth access tokens
#[async_trait]
pub trait TokenGenerator: Send + Sync {
    async fn get_token(&self, oauth: &OAuthConfig) -> ClientResult<String>;
}

/// Exchanges client id and secret for an access token at `tokenUrl`
pub struct ClientCredentialsTokenGenerator {
    http: reqwest::Client,
}

impl ClientCredentialsTokenGenerator {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for ClientCredentialsTokenGenerator {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl TokenGenerator for ClientCredentialsTokenGenerator {
    #[instrument(skip(self, oauth), fields(client = %oauth.client))]
    async fn get_token(&self, oauth: &OAuthConfig) -> ClientResult<String> {
        debug!("Retrieving token for client {}", oauth.client);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", oauth.client.as_str()),
            ("client_secret", oauth.secret.as_str()),
            ("scope", oauth.scope.as_str()),
        ];

        let response = self
            .http
            .post(&oauth.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ClientError::AuthenticationFailed {
                message: format!("token request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::AuthenticationFailed {
                message: format!("token endpoint returned {}: {}", status, body),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::AuthenticationFailed {
                message: format!("invalid token response: {}", e),
            })?;

        match body.get("access_token").and_then(Value::as_str) {
            Some(token) => Ok(token.to_string()),
            None => Err(ClientError::AuthenticationFailed {
                message: format!("response contained no access_token: {}", body),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oauth(server: &MockServer) -> OAuthConfig {
        OAuthConfig {
            token_url: format!("{}/token", server.uri()),
            client: "my-client".to_string(),
            secret: "s3cr3t".to_string(),
            scope: "openid".to_string(),
        }
    }

    #[tokio::test]
    async fn test_client_credentials_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=my-client"))
            .and(body_string_contains("client_secret=s3cr3t"))
            .and(body_string_contains("scope=openid"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "abc1234", "expires_in": 300 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = ClientCredentialsTokenGenerator::default()
            .get_token(&oauth(&server))
            .await
            .unwrap();
        assert_eq!(token, "abc1234");
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let err = ClientCredentialsTokenGenerator::default()
            .get_token(&oauth(&server))
            .await
            .unwrap_err();
        match err {
            ClientError::AuthenticationFailed { message } => {
                assert!(message.contains("invalid_client"), "{}", message)
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_response_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token_type": "bearer" })))
            .mount(&server)
            .await;

        let result = ClientCredentialsTokenGenerator::default()
            .get_token(&oauth(&server))
            .await;
        assert!(matches!(result, Err(ClientError::AuthenticationFailed { .. })));
    }
}
