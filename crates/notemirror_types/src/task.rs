//! Task and reminder entities and the raw update stream that carries them.
//!
//! Tasks and reminders are not part of the metadata chunks. They arrive as a
//! stream of generic entity updates ordered by a millisecond timestamp, each
//! one carrying an operation code, an instance type, a reference to the
//! entity it touches and (for entities) a JSON payload.

use serde::{Deserialize, Serialize};

/// Operation carried by an entity update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SyncOperationType {
    /// Access list propagation.
    AccessFanout = 0,
    /// Entity created.
    Create = 1,
    /// Entity updated.
    Update = 2,
    /// Entity deleted.
    Delete = 3,
    /// Entity permanently removed.
    Expunge = 4,
    /// Entity moved between owners.
    Migrate = 5,
    /// Entity created together with its parent.
    WithEntityCreate = 6,
    /// Forced access list propagation.
    ForceFanout = 7,
    /// Notification only.
    Notify = 8,
}

impl SyncOperationType {
    /// Maps a wire code to an operation.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::AccessFanout,
            1 => Self::Create,
            2 => Self::Update,
            3 => Self::Delete,
            4 => Self::Expunge,
            5 => Self::Migrate,
            6 => Self::WithEntityCreate,
            7 => Self::ForceFanout,
            8 => Self::Notify,
            _ => return None,
        })
    }

    /// Returns true for operations that create or replace an entity.
    pub fn is_upsert(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::WithEntityCreate)
    }

    /// Returns true for operations that remove an entity.
    pub fn is_removal(self) -> bool {
        matches!(self, Self::Delete | Self::Expunge)
    }
}

/// Kind of instance an update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum InstanceType {
    /// A user, identity or business.
    Agent = 0,
    /// A data entity.
    Entity = 1,
    /// A membership record.
    Membership = 2,
    /// An association between entities.
    Association = 3,
}

impl InstanceType {
    /// Maps a wire code to an instance type.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Agent,
            1 => Self::Entity,
            2 => Self::Membership,
            3 => Self::Association,
            _ => return None,
        })
    }
}

/// Entity kinds the mirror cares about.
///
/// The remote knows many more; anything else is reported as unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum EntityType {
    /// A note.
    Note = 0,
    /// A notebook.
    Notebook = 1,
    /// A task inside a note.
    Task = 15,
    /// A reminder attached to a task.
    Reminder = 16,
}

impl EntityType {
    /// Maps a wire code to an entity type.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Note,
            1 => Self::Notebook,
            15 => Self::Task,
            16 => Self::Reminder,
            _ => return None,
        })
    }
}

/// Reference to an entity: identifier plus raw entity type code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity identifier.
    pub id: String,
    /// Raw entity type code.
    #[serde(rename = "type")]
    pub entity_type: i32,
}

impl EntityRef {
    /// Creates a reference.
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type as i32,
        }
    }
}

/// One raw update of the task stream, codes left undecoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// Raw operation code.
    pub operation: i32,
    /// Raw instance type code.
    pub instance_type: i32,
    /// Entity the update refers to.
    pub entity: EntityRef,
    /// Parent entity, required for tasks and reminders.
    pub parent: Option<EntityRef>,
    /// Update time in milliseconds since the epoch.
    pub updated: i64,
    /// Entity body for upserts, `null` otherwise.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EntityUpdate {
    /// Creates an entity update with an empty payload.
    pub fn new(
        operation: SyncOperationType,
        entity: EntityRef,
        parent: Option<EntityRef>,
        updated: i64,
    ) -> Self {
        Self {
            operation: operation as i32,
            instance_type: InstanceType::Entity as i32,
            entity,
            parent,
            updated,
            payload: serde_json::Value::Null,
        }
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// One page of the task stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdatePage {
    /// Updates in timestamp order.
    pub updates: Vec<EntityUpdate>,
    /// Timestamp to resume from for the next page.
    pub last_timestamp: i64,
    /// True if more pages follow.
    pub has_more: bool,
}

/// A reminder attached to a task.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reminder {
    pub reminder_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<i32>,
    #[serde(rename = "noteLevelID", skip_serializing_if = "Option::is_none")]
    pub note_level_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_date: Option<i64>,
    #[serde(rename = "reminderDateUIOption", skip_serializing_if = "Option::is_none")]
    pub reminder_date_ui_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date_offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
}

/// A task inside a note.
///
/// Field names follow the remote's JSON so a payload can be stored and read
/// back without loss of known fields.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub task_id: String,
    /// Note holding the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<i32>,
    #[serde(rename = "noteLevelID", skip_serializing_if = "Option::is_none")]
    pub note_level_id: Option<String>,
    #[serde(rename = "taskGroupNoteLevelID", skip_serializing_if = "Option::is_none")]
    pub task_group_note_level_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
    #[serde(rename = "dueDateUIOption", skip_serializing_if = "Option::is_none")]
    pub due_date_ui_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_updated: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_note: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_flag: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_editor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_after_completion: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reminders: Vec<Reminder>,
}

/// Decoded effects of one or more task stream pages, applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskChunk {
    /// Timestamp watermark reached after applying the chunk.
    pub last_timestamp: i64,
    /// Tasks created or updated.
    pub tasks: Vec<Task>,
    /// Reminders created or updated.
    pub reminders: Vec<Reminder>,
    /// Removed task identifiers.
    pub expunged_tasks: Vec<String>,
    /// Removed reminder identifiers.
    pub expunged_reminders: Vec<String>,
}

impl TaskChunk {
    /// Creates an empty chunk ending at `last_timestamp`.
    pub fn new(last_timestamp: i64) -> Self {
        Self {
            last_timestamp,
            ..Self::default()
        }
    }

    /// Returns true if the chunk carries no changes.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.reminders.is_empty()
            && self.expunged_tasks.is_empty()
            && self.expunged_reminders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_map_both_ways() {
        for code in 0..=8 {
            let op = SyncOperationType::from_code(code).unwrap();
            assert_eq!(op as i32, code);
        }
        assert_eq!(SyncOperationType::from_code(200), None);
        assert_eq!(InstanceType::from_code(4), None);
        assert_eq!(EntityType::from_code(15), Some(EntityType::Task));
        assert_eq!(EntityType::from_code(4), None);
    }

    #[test]
    fn upsert_and_removal_sets() {
        assert!(SyncOperationType::WithEntityCreate.is_upsert());
        assert!(SyncOperationType::Expunge.is_removal());
        assert!(!SyncOperationType::Notify.is_upsert());
        assert!(!SyncOperationType::Migrate.is_removal());
    }

    #[test]
    fn task_reads_remote_json() {
        let task: Task = serde_json::from_value(json!({
            "taskId": "t1",
            "parentId": "n1",
            "label": "Buy milk",
            "noteLevelID": "nl-1",
            "dueDateUIOption": "date_only",
            "reminders": [{"reminderId": "r1", "reminderDate": 1744277698000i64}],
            "someFutureField": 1
        }))
        .unwrap();

        assert_eq!(task.task_id, "t1");
        assert_eq!(task.parent_id.as_deref(), Some("n1"));
        assert_eq!(task.note_level_id.as_deref(), Some("nl-1"));
        assert_eq!(task.due_date_ui_option.as_deref(), Some("date_only"));
        assert_eq!(task.reminders[0].reminder_date, Some(1_744_277_698_000));
    }

    #[test]
    fn task_json_omits_absent_fields() {
        let task = Task {
            task_id: "t1".into(),
            label: Some("x".into()),
            ..Task::default()
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value, json!({"taskId": "t1", "label": "x"}));
    }
}
