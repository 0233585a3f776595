//! Retrieval abstraction shared by the pull and push search strategies

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::debug;

use super::errors::SearchResult;
use crate::migration::types::PolicyDocument;
use crate::services::client::DittoMessage;

/// Projection requested from the search so each item carries its policy
pub const SEARCH_FIELDS: &str = "thingId,_policy";

/// Something the search produced for its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    /// A policy not delivered before in this search
    Next(PolicyDocument),
    /// A policy that could not be parsed; `payload` describes the problem
    Invalid { id: String, payload: Value },
    Complete,
    /// The store reported the search as failed
    Failed(Value),
}

/// Consumer of search events
pub trait SearchHandler {
    fn on_next(&mut self, policy: PolicyDocument);
    fn on_invalid(&mut self, id: String, payload: Value);
    fn on_complete(&mut self);
    fn on_error(&mut self, error: Value);
}

pub fn dispatch_events<H: SearchHandler + ?Sized>(handler: &mut H, events: Vec<SearchEvent>) {
    for event in events {
        match event {
            SearchEvent::Next(policy) => handler.on_next(policy),
            SearchEvent::Invalid { id, payload } => handler.on_invalid(id, payload),
            SearchEvent::Complete => handler.on_complete(),
            SearchEvent::Failed(error) => handler.on_error(error),
        }
    }
}

/// A paged or subscription based search over policies.
///
/// `start` and `request_more` may return events directly (pull) or leave them
/// to arrive later through `handle_message` (push).
#[async_trait]
pub trait PolicySearch: Send {
    fn name(&self) -> &'static str;

    async fn start(&mut self) -> SearchResult<Vec<SearchEvent>>;

    async fn request_more(&mut self) -> SearchResult<Vec<SearchEvent>>;

    /// Events carried by an inbound message, or `None` if the message does
    /// not belong to the search
    fn handle_message(&mut self, _message: &DittoMessage) -> Option<Vec<SearchEvent>> {
        None
    }

    /// More results may be requested right now
    fn is_ready(&self) -> bool;

    fn is_complete(&self) -> bool;

    /// Distinct policies delivered so far
    fn result_count(&self) -> usize;
}

/// Turn result items into events, skipping policies in `seen` and adding the
/// new ones to it.
pub(crate) fn extract_policies(items: &[Value], seen: &mut HashSet<String>) -> Vec<SearchEvent> {
    let mut events = Vec::new();
    for item in items {
        let thing_id = item.get("thingId").and_then(Value::as_str).unwrap_or("<unknown>");
        debug!("Thing found: {}", thing_id);

        let Some(policy) = item.get("_policy") else {
            debug!("Thing {} has no readable policy, skipping", thing_id);
            continue;
        };

        let policy_id = policy.get("policyId").and_then(Value::as_str).map(str::to_string);
        if let Some(id) = &policy_id {
            if seen.contains(id) {
                debug!("Policy {} already delivered", id);
                continue;
            }
        }

        match PolicyDocument::from_value(policy.clone()) {
            Ok(document) => {
                seen.insert(document.id.clone());
                events.push(SearchEvent::Next(document));
            }
            Err(e) => {
                let id = policy_id.unwrap_or_else(|| format!("thing:{}", thing_id));
                seen.insert(id.clone());
                events.push(SearchEvent::Invalid {
                    payload: json!({
                        "status": 400,
                        "error": "policies:policy.invalid",
                        "message": e.to_string(),
                        "policyId": id,
                        "thingId": thing_id,
                    }),
                    id,
                });
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(thing: &str, policy: &str) -> Value {
        json!({
            "thingId": thing,
            "_policy": {
                "policyId": policy,
                "entries": { "DEFAULT": { "subjects": {}, "resources": {} } }
            }
        })
    }

    #[derive(Default)]
    struct Recorder {
        next: Vec<String>,
        invalid: Vec<String>,
        complete: bool,
        errors: Vec<Value>,
    }

    impl SearchHandler for Recorder {
        fn on_next(&mut self, policy: PolicyDocument) {
            self.next.push(policy.id);
        }
        fn on_invalid(&mut self, id: String, _payload: Value) {
            self.invalid.push(id);
        }
        fn on_complete(&mut self) {
            self.complete = true;
        }
        fn on_error(&mut self, error: Value) {
            self.errors.push(error);
        }
    }

    #[test]
    fn test_extract_deduplicates_shared_policies() {
        let mut seen = HashSet::new();
        let first = extract_policies(
            &[item("ns:t1", "ns:p1"), item("ns:t2", "ns:p1"), item("ns:t3", "ns:p2")],
            &mut seen,
        );
        let second = extract_policies(&[item("ns:t4", "ns:p2"), item("ns:t5", "ns:p3")], &mut seen);

        let ids = |events: &[SearchEvent]| -> Vec<String> {
            events
                .iter()
                .filter_map(|e| match e {
                    SearchEvent::Next(p) => Some(p.id.clone()),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(ids(&first), vec!["ns:p1", "ns:p2"]);
        assert_eq!(ids(&second), vec!["ns:p3"]);
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_extract_reports_malformed_and_skips_missing() {
        let mut seen = HashSet::new();
        let events = extract_policies(
            &[
                json!({ "thingId": "ns:t1" }),
                json!({ "thingId": "ns:t2", "_policy": { "policyId": "ns:bad", "entries": {} } }),
                json!({ "thingId": "ns:t3", "_policy": { "entries": "nope" } }),
            ],
            &mut seen,
        );

        assert_eq!(events.len(), 2);
        match &events[0] {
            SearchEvent::Invalid { id, payload } => {
                assert_eq!(id, "ns:bad");
                assert_eq!(payload["status"], 400);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match &events[1] {
            SearchEvent::Invalid { id, .. } => assert_eq!(id, "thing:ns:t3"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_events() {
        let mut recorder = Recorder::default();
        let mut seen = HashSet::new();
        let mut events = extract_policies(&[item("ns:t1", "ns:p1")], &mut seen);
        events.push(SearchEvent::Invalid {
            id: "ns:bad".to_string(),
            payload: Value::Null,
        });
        events.push(SearchEvent::Failed(json!({ "status": 500 })));
        events.push(SearchEvent::Complete);

        dispatch_events(&mut recorder, events);

        assert_eq!(recorder.next, vec!["ns:p1"]);
        assert_eq!(recorder.invalid, vec!["ns:bad"]);
        assert_eq!(recorder.errors, vec![json!({ "status": 500 })]);
        assert!(recorder.complete);
    }
}
