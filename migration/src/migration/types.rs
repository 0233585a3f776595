//! Policy document model and migration step configuration

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A policy as stored in the remote store.
///
/// Members this model does not know about (`imports`, `_revision`, ...) are kept
/// in `extra` so a write-back never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "policyId")]
    pub id: String,
    pub entries: BTreeMap<String, PolicyEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A labelled block of a policy grouping subjects and their resource grants
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicyEntry {
    #[serde(default)]
    pub subjects: BTreeMap<String, Subject>,
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(rename = "type")]
    pub subject_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Subject {
    pub fn of_type(subject_type: &str) -> Self {
        Self {
            subject_type: subject_type.to_string(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub grant: BTreeSet<String>,
    #[serde(default)]
    pub revoke: BTreeSet<String>,
}

/// Reasons a retrieved document is rejected at the retrieval boundary
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentError {
    Malformed { reason: String },
    MissingId,
    NoEntries { id: String },
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::Malformed { reason } => write!(f, "Malformed policy: {}", reason),
            DocumentError::MissingId => write!(f, "Policy has no policyId"),
            DocumentError::NoEntries { id } => write!(f, "Policy {} has no entries", id),
        }
    }
}

impl std::error::Error for DocumentError {}

impl PolicyDocument {
    /// Parse and validate a policy taken from a search result
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let document: PolicyDocument =
            serde_json::from_value(value).map_err(|e| DocumentError::Malformed {
                reason: e.to_string(),
            })?;

        if document.id.is_empty() {
            return Err(DocumentError::MissingId);
        }
        if document.entries.is_empty() {
            return Err(DocumentError::NoEntries { id: document.id });
        }

        Ok(document)
    }

    /// `namespace:name` becomes `namespace/name` for protocol topics
    pub fn topic_path(&self) -> String {
        self.id.replacen(':', "/", 1)
    }
}

/// Kind names as they appear in configuration
pub const REPLACE_SUBJECT: &str = "replaceSubject";
pub const ADD_SUBJECT: &str = "addSubject";
pub const ADD_ENTRY: &str = "addEntry";
pub const REPLACE_ENTRIES: &str = "replaceEntries";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaceSubject {
    pub old: String,
    pub new: String,
    #[serde(rename = "type")]
    pub subject_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddSubject {
    pub label: String,
    pub subject: String,
    #[serde(rename = "type")]
    pub subject_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddEntry {
    pub label: String,
    pub entry: PolicyEntry,
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceEntries {
    pub policy_entries: BTreeMap<String, PolicyEntry>,
}

/// One configured transformation rule.
///
/// Configured as a single-key map, e.g. `{replaceSubject: {old, new, type}}`.
/// Kinds this build does not know are kept as `Unknown` and ignored when applied.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationStep {
    ReplaceSubject(ReplaceSubject),
    AddSubject(AddSubject),
    AddEntry(AddEntry),
    ReplaceEntries(ReplaceEntries),
    Unknown { kind: String },
}

impl MigrationStep {
    pub fn from_config(kind: &str, params: Value) -> Result<Self, serde_json::Error> {
        let step = match kind {
            REPLACE_SUBJECT => MigrationStep::ReplaceSubject(serde_json::from_value(params)?),
            ADD_SUBJECT => MigrationStep::AddSubject(serde_json::from_value(params)?),
            ADD_ENTRY => MigrationStep::AddEntry(serde_json::from_value(params)?),
            REPLACE_ENTRIES => MigrationStep::ReplaceEntries(serde_json::from_value(params)?),
            other => MigrationStep::Unknown {
                kind: other.to_string(),
            },
        };
        Ok(step)
    }

    pub fn kind(&self) -> &str {
        match self {
            MigrationStep::ReplaceSubject(_) => REPLACE_SUBJECT,
            MigrationStep::AddSubject(_) => ADD_SUBJECT,
            MigrationStep::AddEntry(_) => ADD_ENTRY,
            MigrationStep::ReplaceEntries(_) => REPLACE_ENTRIES,
            MigrationStep::Unknown { kind } => kind,
        }
    }
}

impl Serialize for MigrationStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            MigrationStep::ReplaceSubject(step) => map.serialize_entry(REPLACE_SUBJECT, step)?,
            MigrationStep::AddSubject(step) => map.serialize_entry(ADD_SUBJECT, step)?,
            MigrationStep::AddEntry(step) => map.serialize_entry(ADD_ENTRY, step)?,
            MigrationStep::ReplaceEntries(step) => map.serialize_entry(REPLACE_ENTRIES, step)?,
            MigrationStep::Unknown { kind } => map.serialize_entry(kind, &Value::Null)?,
        }
        map.end()
    }
}

/// Deserialize the `migrations` list.
///
/// Each list element is a map; every key in it is one step, so an element with
/// two keys yields two steps.
pub fn deserialize_steps<'de, D>(deserializer: D) -> Result<Vec<MigrationStep>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Map<String, Value>> = Vec::deserialize(deserializer)?;
    let mut steps = Vec::new();
    for element in raw {
        for (kind, params) in element {
            let step = MigrationStep::from_config(&kind, params)
                .map_err(|e| D::Error::custom(format!("invalid {} step: {}", kind, e)))?;
            steps.push(step);
        }
    }
    Ok(steps)
}
