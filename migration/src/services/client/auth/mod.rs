//! Credential provider
//!
//! Picks exactly one credential from the configuration, in order: static bearer
//! token, OAuth client credentials, basic auth, API key header. The same choice
//! drives HTTP headers and the WebSocket URL.

mod token;

pub use token::{ClientCredentialsTokenGenerator, TokenGenerator};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::services::client::{ClientError, ClientResult};
use crate::services::config::{MigrationConfig, OAuthConfig};

pub const WS_PATH: &str = "/ws/2";
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// The credential selected for a run
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMethod {
    Bearer(String),
    OAuth(OAuthConfig),
    Basic { username: String, password: String },
    ApiKey { key: String, value: String },
    Anonymous,
}

impl AuthMethod {
    pub fn from_config(config: &MigrationConfig) -> Self {
        if let Some(token) = &config.bearer_token {
            AuthMethod::Bearer(token.clone())
        } else if let Some(oauth) = &config.oauth {
            AuthMethod::OAuth(oauth.clone())
        } else if let Some(basic) = &config.basic_auth {
            AuthMethod::Basic {
                username: basic.username.clone(),
                password: basic.password.clone(),
            }
        } else if let Some(api_key) = &config.api_key {
            AuthMethod::ApiKey {
                key: api_key.key.clone(),
                value: api_key.value.clone(),
            }
        } else {
            AuthMethod::Anonymous
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Bearer(_) => "bearer",
            AuthMethod::OAuth(_) => "oauth",
            AuthMethod::Basic { .. } => "basic",
            AuthMethod::ApiKey { .. } => "api-key",
            AuthMethod::Anonymous => "anonymous",
        }
    }
}

/// Applies the configured credential to requests and WebSocket URLs.
///
/// OAuth tokens are fetched on first use and kept for the rest of the process.
pub struct CredentialProvider {
    method: AuthMethod,
    token_generator: Arc<dyn TokenGenerator>,
    cached_token: Mutex<Option<String>>,
}

impl CredentialProvider {
    pub fn new(config: &MigrationConfig, http: reqwest::Client) -> Self {
        Self::with_token_generator(
            config,
            Arc::new(ClientCredentialsTokenGenerator::new(http)),
        )
    }

    pub fn with_token_generator(
        config: &MigrationConfig,
        token_generator: Arc<dyn TokenGenerator>,
    ) -> Self {
        let method = AuthMethod::from_config(config);
        debug!("Using {} authentication", method.name());
        Self {
            method,
            token_generator,
            cached_token: Mutex::new(None),
        }
    }

    /// Token for bearer-style credentials, `None` for the others
    pub async fn bearer_token(&self) -> ClientResult<Option<String>> {
        match &self.method {
            AuthMethod::Bearer(token) => Ok(Some(token.clone())),
            AuthMethod::OAuth(oauth) => {
                let mut cached = self.cached_token.lock().await;
                if let Some(token) = cached.as_ref() {
                    return Ok(Some(token.clone()));
                }
                let token = self.token_generator.get_token(oauth).await?;
                *cached = Some(token.clone());
                Ok(Some(token))
            }
            _ => Ok(None),
        }
    }

    pub async fn add_auth_header(&self, headers: &mut HeaderMap) -> ClientResult<()> {
        if let Some(token) = self.bearer_token().await? {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
            return Ok(());
        }

        match &self.method {
            AuthMethod::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{}:{}", username, password));
                headers.insert(AUTHORIZATION, header_value(&format!("Basic {}", encoded))?);
            }
            AuthMethod::ApiKey { .. } => {
                if let Some((name, value)) = self.api_key_header()? {
                    headers.insert(name, value);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The API key as a header pair, if that is the selected credential
    pub fn api_key_header(&self) -> ClientResult<Option<(HeaderName, HeaderValue)>> {
        match &self.method {
            AuthMethod::ApiKey { key, value } => {
                let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    ClientError::AuthenticationFailed {
                        message: format!("invalid API key header name '{}': {}", key, e),
                    }
                })?;
                Ok(Some((name, header_value(value)?)))
            }
            _ => Ok(None),
        }
    }

    /// WebSocket URL for `endpoint`: path set to `/ws/2`, bearer and OAuth
    /// tokens appended as `access_token`, basic credentials put in the userinfo.
    pub async fn decorate_ws_url(&self, endpoint: &str) -> ClientResult<Url> {
        let mut url = Url::parse(endpoint).map_err(|e| ClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        url.set_path(WS_PATH);

        if let Some(token) = self.bearer_token().await? {
            url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, &token);
        } else if let AuthMethod::Basic { username, password } = &self.method {
            let invalid = |_| ClientError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                message: "endpoint cannot carry credentials".to_string(),
            };
            url.set_username(username).map_err(invalid)?;
            url.set_password(Some(password)).map_err(invalid)?;
        }

        Ok(url)
    }
}

fn header_value(value: &str) -> ClientResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ClientError::AuthenticationFailed {
        message: format!("credential is not a valid header value: {}", e),
    })
}
