use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::Task;
use crate::error::{TaskError, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// A change notification exactly as the feed delivers it.
///
/// For deletes `new` is usually an empty object and `old` only carries the
/// columns of the replica identity, so both are kept as raw JSON until
/// [`RemoteEvent::from_record`] decodes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub event_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl ChangeRecord {
    pub fn inserted(task: &Task) -> Self {
        Self {
            event_type: ChangeType::Insert,
            new: serde_json::to_value(task).ok(),
            old: None,
        }
    }

    pub fn updated(task: &Task) -> Self {
        Self {
            event_type: ChangeType::Update,
            new: serde_json::to_value(task).ok(),
            old: None,
        }
    }

    pub fn deleted(task: &Task) -> Self {
        Self {
            event_type: ChangeType::Delete,
            new: None,
            old: Some(serde_json::json!({
                "id": task.id,
                "user_id": task.user_id,
            })),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteChange {
    Inserted(Task),
    Updated(Task),
    Deleted { id: String },
}

/// A decoded change notification, tagged with the identity that owns the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEvent {
    /// `None` when the notification carried no `user_id` at all.
    pub owner: Option<String>,
    pub change: RemoteChange,
}

impl RemoteEvent {
    pub fn from_record(record: &ChangeRecord) -> TaskResult<Self> {
        let owner = owner_of(record.new.as_ref()).or_else(|| owner_of(record.old.as_ref()));

        let change = match record.event_type {
            ChangeType::Insert => RemoteChange::Inserted(decode_task(record.new.as_ref())?),
            ChangeType::Update => RemoteChange::Updated(decode_task(record.new.as_ref())?),
            ChangeType::Delete => {
                let id = record
                    .old
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .and_then(id_to_string)
                    .ok_or_else(|| {
                        TaskError::transport("delete notification without an id")
                    })?;
                RemoteChange::Deleted { id }
            }
        };

        Ok(Self { owner, change })
    }

    pub fn task_id(&self) -> &str {
        match &self.change {
            RemoteChange::Inserted(task) | RemoteChange::Updated(task) => &task.id,
            RemoteChange::Deleted { id } => id,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner.as_deref() == Some(user_id)
    }
}

fn owner_of(row: Option<&Value>) -> Option<String> {
    row?.get("user_id")?.as_str().map(str::to_string)
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decode_task(row: Option<&Value>) -> TaskResult<Task> {
    let row = row.ok_or_else(|| TaskError::transport("change notification without a row"))?;
    Ok(serde_json::from_value(row.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::fixtures::make_task;

    #[test]
    fn test_decode_insert_from_wire() {
        let json = r#"{
            "eventType": "INSERT",
            "new": {
                "id": "t1",
                "title": "Buy milk",
                "is_complete": false,
                "created_at": "2025-03-01T10:00:00Z",
                "user_id": "user-1"
            },
            "old": {}
        }"#;
        let record: ChangeRecord = serde_json::from_str(json).unwrap();
        let event = RemoteEvent::from_record(&record).unwrap();

        assert_eq!(event.owner.as_deref(), Some("user-1"));
        assert_eq!(event.task_id(), "t1");
        assert!(matches!(event.change, RemoteChange::Inserted(_)));
    }

    #[test]
    fn test_delete_owner_comes_from_old_row() {
        let record = ChangeRecord::deleted(&make_task("t9", "gone", 100));
        let event = RemoteEvent::from_record(&record).unwrap();

        assert_eq!(event.change, RemoteChange::Deleted { id: "t9".to_string() });
        assert!(event.is_owned_by("user-1"));
        assert!(!event.is_owned_by("user-2"));
    }

    #[test]
    fn test_delete_without_replica_identity_has_no_owner() {
        let json = r#"{"eventType": "DELETE", "new": {}, "old": {"id": 42}}"#;
        let record: ChangeRecord = serde_json::from_str(json).unwrap();
        let event = RemoteEvent::from_record(&record).unwrap();

        assert_eq!(event.task_id(), "42");
        assert!(event.owner.is_none());
    }

    #[test]
    fn test_update_without_row_is_an_error() {
        let record = ChangeRecord {
            event_type: ChangeType::Update,
            new: None,
            old: None,
        };
        assert!(RemoteEvent::from_record(&record).is_err());
    }
}
