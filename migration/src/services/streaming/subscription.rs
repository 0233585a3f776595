//! Push search over the Ditto search protocol
//!
//! The subscription lives on the duplex transport: commands go out through
//! `Transport::send`, and the store's answers arrive on the inbound channel and
//! are handed back here through `handle_message`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::{SearchError, SearchResult};
use super::traits::{extract_policies, PolicySearch, SearchEvent, SEARCH_FIELDS};
use crate::services::client::types::SEARCH_TOPIC_PREFIX;
use crate::services::client::{DittoMessage, Transport};
use crate::services::config::MigrationConfig;

const SUBSCRIBE: &str = "subscribe";
const REQUEST: &str = "request";
const CREATED: &str = "created";
const NEXT: &str = "next";
const COMPLETE: &str = "complete";
const FAILED: &str = "failed";

/// Pages requested per `request` command
const PAGES_PER_REQUEST: u64 = 1;

pub struct SubscriptionSearch {
    transport: Arc<dyn Transport>,
    page_size: usize,
    namespaces: Vec<String>,
    filter: Option<String>,
    correlation_id: Option<String>,
    subscription_id: Option<String>,
    awaiting: bool,
    completed: bool,
    seen: HashSet<String>,
}

impl SubscriptionSearch {
    pub fn new(config: &MigrationConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            page_size: config.page_size,
            namespaces: config.namespaces.clone(),
            filter: config.filter.clone(),
            correlation_id: None,
            subscription_id: None,
            awaiting: false,
            completed: false,
            seen: HashSet::new(),
        }
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    fn command(&self, action: &str, value: Value) -> DittoMessage {
        let correlation_id = self
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        DittoMessage::new(format!("{}{}", SEARCH_TOPIC_PREFIX, action), &correlation_id).with_value(value)
    }

    fn subscribe_value(&self) -> Value {
        let mut value = Map::new();
        if let Some(filter) = &self.filter {
            value.insert("filter".to_string(), json!(filter));
        }
        if !self.namespaces.is_empty() {
            value.insert("namespaces".to_string(), json!(self.namespaces));
        }
        value.insert("options".to_string(), json!(format!("size({})", self.page_size)));
        Value::Object(value)
    }

    fn is_ours(&self, message: &DittoMessage) -> bool {
        let from_message = message
            .value
            .as_ref()
            .and_then(|v| v.get("subscriptionId"))
            .and_then(Value::as_str);
        match (from_message, self.subscription_id.as_deref()) {
            (Some(theirs), Some(ours)) => theirs == ours,
            _ => false,
        }
    }
}

#[async_trait]
impl PolicySearch for SubscriptionSearch {
    fn name(&self) -> &'static str {
        "subscription"
    }

    async fn start(&mut self) -> SearchResult<Vec<SearchEvent>> {
        self.correlation_id = Some(Uuid::new_v4().to_string());
        let subscribe = self
            .command(SUBSCRIBE, self.subscribe_value())
            .with_fields(SEARCH_FIELDS);

        debug!("Creating search subscription");
        self.transport.send(subscribe).await?;
        self.awaiting = true;
        Ok(Vec::new())
    }

    async fn request_more(&mut self) -> SearchResult<Vec<SearchEvent>> {
        if self.completed {
            return Ok(Vec::new());
        }
        let subscription_id = self.subscription_id.clone().ok_or(SearchError::NotStarted)?;
        let request = self.command(
            REQUEST,
            json!({ "subscriptionId": subscription_id, "demand": PAGES_PER_REQUEST }),
        );

        debug!("Requesting next page of subscription {}", subscription_id);
        self.transport.send(request).await?;
        self.awaiting = true;
        Ok(Vec::new())
    }

    fn handle_message(&mut self, message: &DittoMessage) -> Option<Vec<SearchEvent>> {
        if !message.is_search_message() {
            return None;
        }
        let action = message.topic.strip_prefix(SEARCH_TOPIC_PREFIX)?;

        if action == CREATED {
            if self.subscription_id.is_some() {
                debug!("Ignoring additional subscription");
                return Some(Vec::new());
            }
            let id = message
                .value
                .as_ref()
                .and_then(|v| v.get("subscriptionId"))
                .and_then(Value::as_str);
            return match id {
                Some(id) => {
                    info!("Search subscription {} created", id);
                    self.subscription_id = Some(id.to_string());
                    self.awaiting = false;
                    Some(Vec::new())
                }
                None => {
                    self.completed = true;
                    Some(vec![SearchEvent::Failed(json!({
                        "error": "search:subscription.invalid",
                        "message": "created event without subscriptionId",
                    }))])
                }
            };
        }

        if !self.is_ours(message) {
            debug!("Ignoring {} event for another subscription", action);
            return Some(Vec::new());
        }

        let value = message.value.clone().unwrap_or(Value::Null);
        let events = match action {
            NEXT => {
                self.awaiting = false;
                let items = value
                    .get("items")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                extract_policies(items, &mut self.seen)
            }
            COMPLETE => {
                self.awaiting = false;
                self.completed = true;
                vec![SearchEvent::Complete]
            }
            FAILED => {
                warn!("Search subscription failed: {}", value);
                self.awaiting = false;
                self.completed = true;
                vec![SearchEvent::Failed(value.get("error").cloned().unwrap_or(value))]
            }
            other => {
                debug!("Ignoring search event {}", other);
                Vec::new()
            }
        };
        Some(events)
    }

    fn is_ready(&self) -> bool {
        self.subscription_id.is_some() && !self.awaiting && !self.completed
    }

    fn is_complete(&self) -> bool {
        self.completed
    }

    fn result_count(&self) -> usize {
        self.seen.len()
    }
}
