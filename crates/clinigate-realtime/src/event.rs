use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of row-level mutation reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Feed event kinds we do not recognize; still invalidated.
    #[serde(other)]
    Unknown,
}

/// One change-feed notification: `{ event, table, old?, new? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event: ChangeKind,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

impl ChangeEvent {
    pub fn new(event: ChangeKind, table: impl Into<String>) -> Self {
        Self {
            event,
            table: table.into(),
            old: None,
            new: None,
        }
    }
}
