// Audit entry types and structures
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mutating operation recorded in a group's action log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SgroupAction {
    Create,
    ModifyAttrs,
    Delete,
    ModifyMembersOrRights,
    ModifyRemoteQuery,
}

/// `{action, when, who, msg?, ...data}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub action: SgroupAction,
    pub when: DateTime<Utc>,
    pub who: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ActionEntry {
    /// Non-object payloads are kept under a `data` key
    pub fn new(action: SgroupAction, who: impl Into<String>, msg: Option<&str>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("data".to_string(), other)]),
        };
        Self {
            action,
            when: Utc::now(),
            who: who.into(),
            msg: msg.map(str::to_string),
            data,
        }
    }
}

/// `{when, mright, new_count, added, removed}`: one flattened-relation update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub when: DateTime<Utc>,
    pub mright: String,
    pub new_count: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Result of reading a log file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SgroupLogs {
    /// Last modification time of the log file
    pub last_log_date: Option<DateTime<Utc>>,
    /// Whether `logs` covers the whole file
    pub whole_file: bool,
    pub logs: Vec<Value>,
}

impl SgroupLogs {
    pub fn empty() -> Self {
        Self {
            last_log_date: None,
            whole_file: true,
            logs: Vec::new(),
        }
    }
}
