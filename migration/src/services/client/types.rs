//! Ditto protocol envelope shared by both transports

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::migration::types::PolicyDocument;

pub const CORRELATION_ID: &str = "correlation-id";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const IF_MATCH: &str = "If-Match";
/// Revision precondition that never matches an existing policy
pub const DRY_RUN_PRECONDITION: &str = "\"rev:0\"";
pub const SEARCH_TOPIC_PREFIX: &str = "_/_/things/twin/search/";
pub const MODIFY_POLICY_SUFFIX: &str = "/policies/commands/modify";

/// A Ditto protocol message, used for commands, responses and events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DittoMessage {
    pub topic: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
}

fn root_path() -> String {
    "/".to_string()
}

impl DittoMessage {
    pub fn new(topic: impl Into<String>, correlation_id: &str) -> Self {
        let mut headers = Map::new();
        headers.insert(
            "content-type".to_string(),
            Value::String(CONTENT_TYPE_JSON.to_string()),
        );
        headers.insert(
            CORRELATION_ID.to_string(),
            Value::String(correlation_id.to_string()),
        );
        Self {
            topic: topic.into(),
            headers,
            path: root_path(),
            value: None,
            status: None,
            fields: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_fields(mut self, fields: &str) -> Self {
        self.fields = Some(fields.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_string(), Value::String(value.to_string()));
        self
    }

    /// Modify command writing the whole policy back.
    ///
    /// In dry-run the command carries a precondition that can never be met, so
    /// the store validates it and answers 412 without changing anything.
    pub fn modify_policy(
        policy: &PolicyDocument,
        correlation_id: &str,
        dry_run: bool,
    ) -> serde_json::Result<Self> {
        let topic = format!("{}{}", policy.topic_path(), MODIFY_POLICY_SUFFIX);
        let mut message = Self::new(topic, correlation_id).with_value(serde_json::to_value(policy)?);
        if dry_run {
            message = message.with_header(IF_MATCH, DRY_RUN_PRECONDITION);
        }
        Ok(message)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get(CORRELATION_ID).and_then(Value::as_str)
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(Value::as_str)
    }

    pub fn is_search_message(&self) -> bool {
        self.topic.starts_with(SEARCH_TOPIC_PREFIX)
    }

    pub fn is_modify_policy(&self) -> bool {
        self.topic.ends_with(MODIFY_POLICY_SUFFIX)
    }

    /// `namespace:name` recovered from a policy command topic
    pub fn policy_id(&self) -> Option<String> {
        let mut parts = self.topic.splitn(3, '/');
        let namespace = parts.next()?;
        let name = parts.next()?;
        match parts.next() {
            Some(rest) if rest.starts_with("policies") => Some(format!("{}:{}", namespace, name)),
            _ => None,
        }
    }
}
