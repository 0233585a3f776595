//! Run configuration
//!
//! Loaded from a YAML file with camelCase keys. Every tunable has a default so a
//! minimal file only names an endpoint and the migrations to run.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::migration::types::{deserialize_steps, MigrationStep};
use crate::services::errors::{MigrationError, MigrationResult};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_FAILED_REPORT: &str = "failed.json";

/// Which channel carries search and write traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Websocket,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    pub token_url: String,
    pub client: String,
    pub secret: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

/// A static header sent with every HTTP request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleLogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ConsoleLogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub filename: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub console: ConsoleLogConfig,
    #[serde(default)]
    pub file: Option<FileLogConfig>,
}

/// Top level configuration of a migration run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationConfig {
    #[serde(default)]
    pub http_endpoint: Option<String>,
    #[serde(default)]
    pub ws_endpoint: Option<String>,
    #[serde(default)]
    pub transport: Option<TransportKind>,

    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default, rename = "oAuth")]
    pub oauth: Option<OAuthConfig>,
    #[serde(default)]
    pub basic_auth: Option<BasicAuthConfig>,
    #[serde(default)]
    pub api_key: Option<ApiKeyConfig>,

    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_failed_report_path")]
    pub failed_report_path: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default, deserialize_with = "deserialize_steps")]
    pub migrations: Vec<MigrationStep>,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_write_timeout_secs() -> u64 {
    DEFAULT_WRITE_TIMEOUT_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_failed_report_path() -> PathBuf {
    PathBuf::from(DEFAULT_FAILED_REPORT)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            http_endpoint: None,
            ws_endpoint: None,
            transport: None,
            bearer_token: None,
            oauth: None,
            basic_auth: None,
            api_key: None,
            namespaces: Vec::new(),
            filter: None,
            page_size: DEFAULT_PAGE_SIZE,
            dry_run: false,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            retry: RetryConfig::default(),
            failed_report_path: default_failed_report_path(),
            logging: LoggingConfig::default(),
            migrations: Vec::new(),
        }
    }
}

impl MigrationConfig {
    pub fn from_yaml_str(source: &str) -> MigrationResult<Self> {
        serde_yaml::from_str(source)
            .map_err(|e| MigrationError::configuration("config", e))
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> MigrationResult<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let source = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::configuration("config", format!("{}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&source)
    }

    /// The configured transport, or websocket when a WebSocket endpoint is set
    pub fn transport_kind(&self) -> TransportKind {
        match self.transport {
            Some(kind) => kind,
            None if self.ws_endpoint.is_some() => TransportKind::Websocket,
            None => TransportKind::Http,
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Endpoint for the selected transport, checked to parse as a URL
    pub fn endpoint(&self) -> MigrationResult<Url> {
        let (field, endpoint) = match self.transport_kind() {
            TransportKind::Websocket => ("wsEndpoint", &self.ws_endpoint),
            TransportKind::Http => ("httpEndpoint", &self.http_endpoint),
        };
        let endpoint = endpoint
            .as_deref()
            .ok_or_else(|| MigrationError::configuration(field, "<missing>"))?;
        Url::parse(endpoint).map_err(|e| MigrationError::configuration(field, format!("{} ({})", endpoint, e)))
    }

    pub fn validate(&self) -> MigrationResult<()> {
        if self.page_size == 0 {
            return Err(MigrationError::configuration("pageSize", self.page_size));
        }
        if self.max_in_flight == 0 {
            return Err(MigrationError::configuration("maxInFlight", self.max_in_flight));
        }
        if self.write_timeout_secs == 0 {
            return Err(MigrationError::configuration(
                "writeTimeoutSecs",
                self.write_timeout_secs,
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(MigrationError::configuration(
                "heartbeatIntervalSecs",
                self.heartbeat_interval_secs,
            ));
        }

        self.endpoint()?;

        if let Some(oauth) = &self.oauth {
            if oauth.token_url.is_empty() || oauth.client.is_empty() || oauth.secret.is_empty() {
                return Err(MigrationError::configuration(
                    "oAuth",
                    "tokenUrl, client and secret must be set",
                ));
            }
            Url::parse(&oauth.token_url).map_err(|e| {
                MigrationError::configuration("oAuth.tokenUrl", format!("{} ({})", oauth.token_url, e))
            })?;
        }

        for step in &self.migrations {
            if let MigrationStep::ReplaceEntries(replace) = step {
                if replace.policy_entries.is_empty() {
                    return Err(MigrationError::configuration(
                        "migrations.replaceEntries.policyEntries",
                        "<empty>",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Map a configured log level to a `tracing` filter directive.
///
/// Accepts `tracing` names as well as the syslog-style names older
/// configuration files use (`WARNING`, `CRITICAL`, `NOTSET`).
pub fn log_level_directive(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "notset" | "trace" => "trace",
        "debug" => "debug",
        "warning" | "warn" => "warn",
        "error" | "critical" => "error",
        "off" => "off",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_applied() {
        let config = MigrationConfig::from_yaml_str("wsEndpoint: ws://localhost:8080\n").unwrap();

        assert_eq!(config.page_size, 50);
        assert_eq!(config.max_in_flight, 10);
        assert_eq!(config.write_timeout(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.failed_report_path, PathBuf::from("failed.json"));
        assert_eq!(config.logging.console.level, "info");
        assert!(!config.dry_run);
        assert!(config.migrations.is_empty());
        assert_eq!(config.transport_kind(), TransportKind::Websocket);
        config.validate().unwrap();
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
httpEndpoint: https://ditto.example.com/api/2
transport: http
oAuth:
  tokenUrl: https://login.example.com/token
  client: my-client
  secret: s3cr3t
  scope: openid
namespaces: [org.example, org.other]
filter: 'like(thingId,"org.example:*")'
pageSize: 20
dryRun: true
logging:
  console: { level: WARNING }
  file: { level: DEBUG, filename: migration.log }
migrations:
  - replaceSubject: { old: "a", new: "b", type: migrated }
    addSubject: { label: DEFAULT, subject: "c", type: added }
  - addEntry:
      label: ops
      replace: true
      entry:
        subjects: { "ops:team": { type: generated } }
        resources: { "thing:/": { grant: [READ], revoke: [] } }
"#;
        let config = MigrationConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.transport_kind(), TransportKind::Http);
        assert_eq!(config.oauth.as_ref().unwrap().client, "my-client");
        assert_eq!(config.namespaces, vec!["org.example", "org.other"]);
        assert_eq!(config.page_size, 20);
        assert!(config.dry_run);
        assert_eq!(config.logging.file.as_ref().unwrap().filename, PathBuf::from("migration.log"));
        let kinds: Vec<&str> = config.migrations.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec!["replaceSubject", "addSubject", "addEntry"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_zero_page_size() {
        let config = MigrationConfig::from_yaml_str("wsEndpoint: ws://localhost\npageSize: 0\n").unwrap();
        match config.validate() {
            Err(MigrationError::Configuration { field, .. }) => assert_eq!(field, "pageSize"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validation_requires_endpoint_for_transport() {
        let config = MigrationConfig::from_yaml_str("transport: http\nwsEndpoint: ws://localhost\n").unwrap();
        match config.validate() {
            Err(MigrationError::Configuration { field, .. }) => assert_eq!(field, "httpEndpoint"),
            other => panic!("unexpected result: {:?}", other),
        }

        let config = MigrationConfig::from_yaml_str("wsEndpoint: not a url\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_incomplete_oauth() {
        let yaml = "wsEndpoint: ws://localhost\noAuth: { tokenUrl: '', client: c, secret: s }\n";
        let config = MigrationConfig::from_yaml_str(yaml).unwrap();
        match config.validate() {
            Err(MigrationError::Configuration { field, .. }) => assert_eq!(field, "oAuth"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_step_fails_loading() {
        let yaml = "wsEndpoint: ws://localhost\nmigrations:\n  - replaceSubject: { old: a }\n";
        assert!(matches!(
            MigrationConfig::from_yaml_str(yaml),
            Err(MigrationError::Configuration { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "httpEndpoint: http://localhost:8080/api/2").unwrap();
        writeln!(file, "bearerToken: abc").unwrap();

        let config = MigrationConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.bearer_token.as_deref(), Some("abc"));
        assert_eq!(config.transport_kind(), TransportKind::Http);

        assert!(MigrationConfig::load_from_file("/definitely/not/here.yml").is_err());
    }

    #[test]
    fn test_log_level_directive() {
        assert_eq!(log_level_directive("WARNING"), "warn");
        assert_eq!(log_level_directive("CRITICAL"), "error");
        assert_eq!(log_level_directive("debug"), "debug");
        assert_eq!(log_level_directive("NOTSET"), "trace");
        assert_eq!(log_level_directive("whatever"), "info");
    }
}
