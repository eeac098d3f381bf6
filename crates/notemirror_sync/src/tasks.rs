//! Task and reminder stream ingestion.
//!
//! The task stream is paged by update timestamp rather than by update
//! sequence number. Each page is decoded into a [`TaskChunk`] and applied in
//! one store transaction together with the page's timestamp watermark.
//!
//! Updates that do not fit the expected shape are logged and skipped; the
//! stream never fails because of a single odd record.

use crate::cancel::CancellationToken;
use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteService;
use crate::retry::with_network_retry;
use notemirror_store::MirrorStore;
use notemirror_types::{
    EntityType, EntityUpdate, InstanceType, Reminder, SyncOperationType, Task, TaskUpdatePage,
    WatermarkScope,
};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;
use tracing::{debug, info, warn};

pub use notemirror_types::TaskChunk;

/// Counters of one task stream ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Pages applied.
    pub pages: u64,
    /// Tasks created or updated.
    pub tasks: u64,
    /// Reminders created or updated.
    pub reminders: u64,
    /// Tasks removed.
    pub expunged_tasks: u64,
    /// Reminders removed.
    pub expunged_reminders: u64,
    /// Updates skipped as inconsistent.
    pub skipped: u64,
}

impl AddAssign for TaskStats {
    fn add_assign(&mut self, other: Self) {
        self.pages += other.pages;
        self.tasks += other.tasks;
        self.reminders += other.reminders;
        self.expunged_tasks += other.expunged_tasks;
        self.expunged_reminders += other.expunged_reminders;
        self.skipped += other.skipped;
    }
}

enum Change {
    Task(Task),
    Reminder(Reminder),
    RemoveTask(String),
    RemoveReminder(String),
}

/// Decodes task stream pages and applies them to a store.
#[derive(Debug, Clone, Default)]
pub struct TaskIngester;

impl TaskIngester {
    /// Creates an ingester.
    pub fn new() -> Self {
        Self
    }

    /// Pulls every page after the stored task watermark and applies it.
    pub fn ingest<S, R>(
        &self,
        store: &mut S,
        remote: &R,
        retry: &RetryConfig,
        cancel: &CancellationToken,
    ) -> SyncResult<TaskStats>
    where
        S: MirrorStore + ?Sized,
        R: RemoteService + ?Sized,
    {
        let stored = store.get_watermark(&WatermarkScope::Tasks)?;
        let mut after = i64::try_from(stored)
            .map_err(|_| SyncError::Protocol(format!("task watermark {} out of range", stored)))?;
        let mut stats = TaskStats::default();

        info!("Syncing tasks and reminders...");
        loop {
            let page = with_network_retry(retry, cancel, "task stream fetch", || {
                remote.fetch_task_updates(after)
            })?;

            if page.last_timestamp < after {
                return Err(SyncError::Protocol(format!(
                    "task page ends at {} but {} is already stored",
                    page.last_timestamp, after
                )));
            }
            if page.has_more && page.last_timestamp == after {
                return Err(SyncError::Protocol(format!(
                    "task stream did not advance past {}",
                    after
                )));
            }

            let (chunk, skipped) = self.decode_page(&page);
            if !chunk.is_empty() || chunk.last_timestamp != after {
                store.apply_task_chunk(&chunk)?;
                stats += TaskStats {
                    pages: 1,
                    tasks: chunk.tasks.len() as u64,
                    reminders: chunk.reminders.len() as u64,
                    expunged_tasks: chunk.expunged_tasks.len() as u64,
                    expunged_reminders: chunk.expunged_reminders.len() as u64,
                    skipped: 0,
                };
            }
            stats.skipped += skipped;
            after = page.last_timestamp;

            if !page.has_more {
                break;
            }
        }
        Ok(stats)
    }

    /// Decodes one page. Returns the chunk and the number of skipped updates.
    ///
    /// Later updates of the same entity win over earlier ones.
    pub fn decode_page(&self, page: &TaskUpdatePage) -> (TaskChunk, u64) {
        let mut tasks = BTreeMap::new();
        let mut reminders = BTreeMap::new();
        let mut removed_tasks = BTreeSet::new();
        let mut removed_reminders = BTreeSet::new();
        let mut skipped = 0;

        for update in &page.updates {
            match decode_update(update) {
                Ok(Some(Change::Task(task))) => {
                    removed_tasks.remove(&task.task_id);
                    tasks.insert(task.task_id.clone(), task);
                }
                Ok(Some(Change::Reminder(reminder))) => {
                    removed_reminders.remove(&reminder.reminder_id);
                    reminders.insert(reminder.reminder_id.clone(), reminder);
                }
                Ok(Some(Change::RemoveTask(id))) => {
                    tasks.remove(&id);
                    removed_tasks.insert(id);
                }
                Ok(Some(Change::RemoveReminder(id))) => {
                    reminders.remove(&id);
                    removed_reminders.insert(id);
                }
                Ok(None) => {}
                Err(reason) => {
                    warn!(
                        "Sync data inconsistency - {}, skipping entity [{}]",
                        reason, update.entity.id
                    );
                    skipped += 1;
                }
            }
        }

        let chunk = TaskChunk {
            last_timestamp: page.last_timestamp,
            tasks: tasks.into_values().collect(),
            reminders: reminders.into_values().collect(),
            expunged_tasks: removed_tasks.into_iter().collect(),
            expunged_reminders: removed_reminders.into_iter().collect(),
        };
        (chunk, skipped)
    }
}

// `Ok(None)` is a silently ignored update, `Err` a logged inconsistency.
fn decode_update(update: &EntityUpdate) -> Result<Option<Change>, String> {
    let operation = SyncOperationType::from_code(update.operation)
        .ok_or_else(|| "unknown operation type".to_string())?;
    if !operation.is_upsert() && !operation.is_removal() {
        return Ok(None);
    }

    let instance = InstanceType::from_code(update.instance_type)
        .ok_or_else(|| "unknown instance type".to_string())?;
    if instance != InstanceType::Entity {
        return Ok(None);
    }

    let entity_type = EntityType::from_code(update.entity.entity_type)
        .ok_or_else(|| "unknown entity type".to_string())?;
    let id = update.entity.id.clone();

    if operation.is_removal() {
        return Ok(match entity_type {
            EntityType::Task => Some(Change::RemoveTask(id)),
            EntityType::Reminder => Some(Change::RemoveReminder(id)),
            EntityType::Note | EntityType::Notebook => None,
        });
    }

    if matches!(entity_type, EntityType::Note | EntityType::Notebook) {
        return Ok(None);
    }
    let parent = update
        .parent
        .as_ref()
        .ok_or_else(|| "entity without parent".to_string())?;
    let parent_type = EntityType::from_code(parent.entity_type);

    match entity_type {
        EntityType::Task => {
            if parent_type != Some(EntityType::Note) {
                return Err("task outside of note".into());
            }
            let mut task: Task = parse_payload(update)?;
            task.task_id = id;
            task.parent_id = Some(parent.id.clone());
            task.parent_type = Some(parent.entity_type);
            debug!("Task [{}] in note [{}]", task.task_id, parent.id);
            Ok(Some(Change::Task(task)))
        }
        EntityType::Reminder => {
            if parent_type != Some(EntityType::Task) {
                return Err("reminder outside of task".into());
            }
            let mut reminder: Reminder = parse_payload(update)?;
            reminder.reminder_id = id;
            reminder.source_id = Some(parent.id.clone());
            debug!("Reminder [{}] of task [{}]", reminder.reminder_id, parent.id);
            Ok(Some(Change::Reminder(reminder)))
        }
        EntityType::Note | EntityType::Notebook => Ok(None),
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(update: &EntityUpdate) -> Result<T, String> {
    if update.payload.is_null() {
        return serde_json::from_value(serde_json::Value::Object(Default::default()))
            .map_err(|e| format!("malformed payload ({})", e));
    }
    serde_json::from_value(update.payload.clone()).map_err(|e| format!("malformed payload ({})", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRemote;
    use notemirror_store::SqliteStore;
    use notemirror_types::EntityRef;
    use serde_json::json;

    fn task_update(op: SyncOperationType, id: &str, note: &str, ts: i64) -> EntityUpdate {
        EntityUpdate::new(
            op,
            EntityRef::new(id, EntityType::Task),
            Some(EntityRef::new(note, EntityType::Note)),
            ts,
        )
        .with_payload(json!({ "label": format!("task {}", id), "status": "open" }))
    }

    fn reminder_update(id: &str, task: &str, ts: i64) -> EntityUpdate {
        EntityUpdate::new(
            SyncOperationType::Create,
            EntityRef::new(id, EntityType::Reminder),
            Some(EntityRef::new(task, EntityType::Task)),
            ts,
        )
        .with_payload(json!({ "reminderDate": 1_700_000_000_000i64 }))
    }

    fn page(updates: Vec<EntityUpdate>, last_timestamp: i64, has_more: bool) -> TaskUpdatePage {
        TaskUpdatePage {
            updates,
            last_timestamp,
            has_more,
        }
    }

    #[test]
    fn upserts_and_removals_are_decoded() {
        let updates = vec![
            task_update(SyncOperationType::Create, "t1", "n1", 1),
            task_update(SyncOperationType::WithEntityCreate, "t2", "n1", 2),
            reminder_update("r1", "t1", 3),
            EntityUpdate::new(
                SyncOperationType::Expunge,
                EntityRef::new("t9", EntityType::Task),
                None,
                4,
            ),
            EntityUpdate::new(
                SyncOperationType::Delete,
                EntityRef::new("r9", EntityType::Reminder),
                None,
                5,
            ),
        ];

        let (chunk, skipped) = TaskIngester::new().decode_page(&page(updates, 5, false));

        assert_eq!(skipped, 0);
        assert_eq!(chunk.tasks.len(), 2);
        assert_eq!(chunk.tasks[0].task_id, "t1");
        assert_eq!(chunk.tasks[0].parent_id.as_deref(), Some("n1"));
        assert_eq!(chunk.tasks[0].label.as_deref(), Some("task t1"));
        assert_eq!(chunk.reminders[0].source_id.as_deref(), Some("t1"));
        assert_eq!(chunk.reminders[0].reminder_date, Some(1_700_000_000_000));
        assert_eq!(chunk.expunged_tasks, vec!["t9".to_string()]);
        assert_eq!(chunk.expunged_reminders, vec!["r9".to_string()]);
        assert_eq!(chunk.last_timestamp, 5);
    }

    #[test]
    fn later_removal_cancels_earlier_upsert() {
        let updates = vec![
            task_update(SyncOperationType::Create, "t1", "n1", 1),
            EntityUpdate::new(
                SyncOperationType::Delete,
                EntityRef::new("t1", EntityType::Task),
                None,
                2,
            ),
        ];

        let (chunk, _) = TaskIngester::new().decode_page(&page(updates, 2, false));

        assert!(chunk.tasks.is_empty());
        assert_eq!(chunk.expunged_tasks, vec!["t1".to_string()]);
    }

    #[test]
    fn inconsistent_updates_are_skipped() {
        let mut unknown_op = task_update(SyncOperationType::Update, "a", "n1", 1);
        unknown_op.operation = 200;
        let mut unknown_instance = task_update(SyncOperationType::Update, "b", "n1", 1);
        unknown_instance.instance_type = 100;
        let mut unknown_entity = task_update(SyncOperationType::Update, "c", "n1", 1);
        unknown_entity.entity.entity_type = 100;
        let mut orphan = task_update(SyncOperationType::Update, "d", "n1", 1);
        orphan.parent = None;
        let mut task_in_notebook = task_update(SyncOperationType::Update, "e", "nb1", 1);
        task_in_notebook.parent = Some(EntityRef::new("nb1", EntityType::Notebook));
        let mut reminder_in_notebook = reminder_update("f", "nb1", 1);
        reminder_in_notebook.parent = Some(EntityRef::new("nb1", EntityType::Notebook));
        let malformed = task_update(SyncOperationType::Update, "g", "n1", 1)
            .with_payload(json!({ "priority": "very high" }));

        let updates = vec![
            unknown_op,
            unknown_instance,
            unknown_entity,
            orphan,
            task_in_notebook,
            reminder_in_notebook,
            malformed,
        ];
        let (chunk, skipped) = TaskIngester::new().decode_page(&page(updates, 1, false));

        assert_eq!(skipped, 7);
        assert!(chunk.is_empty());
    }

    #[test]
    fn fanout_and_non_entity_updates_are_ignored_silently() {
        let fanout = task_update(SyncOperationType::AccessFanout, "a", "n1", 1);
        let notify = task_update(SyncOperationType::Notify, "b", "n1", 1);
        let mut agent = task_update(SyncOperationType::Update, "c", "n1", 1);
        agent.instance_type = InstanceType::Agent as i32;

        let (chunk, skipped) =
            TaskIngester::new().decode_page(&page(vec![fanout, notify, agent], 1, false));

        assert_eq!(skipped, 0);
        assert!(chunk.is_empty());
    }

    #[test]
    fn pages_are_applied_and_watermark_kept() {
        let remote = MockRemote::new("alice");
        remote.add_task_page(page(
            vec![task_update(SyncOperationType::Create, "t1", "n1", 100)],
            100,
            true,
        ));
        remote.add_task_page(page(vec![reminder_update("r1", "t1", 200)], 200, false));
        let mut store = SqliteStore::open_in_memory().unwrap();

        let stats = TaskIngester::new()
            .ingest(
                &mut store,
                &remote,
                &RetryConfig::no_retry(),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(stats.pages, 2);
        assert_eq!(stats.tasks, 1);
        assert_eq!(stats.reminders, 1);
        assert_eq!(store.get_watermark(&WatermarkScope::Tasks).unwrap(), 200);
        let counts = store.stats().unwrap();
        assert_eq!((counts.tasks, counts.reminders), (1, 1));

        let again = TaskIngester::new()
            .ingest(
                &mut store,
                &remote,
                &RetryConfig::no_retry(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(again, TaskStats::default());
    }
}
