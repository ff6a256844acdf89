//! Per-object metadata: the `main` item, derived `items`, and the
//! `tasks` retry/completion ledger the processing engine owns.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    hash::ContentHash,
    model::{
        manifest::Manifest,
        object::{ObjectStatus, ObjectType, is_original_name},
    },
};

/// A stale `processing` lease older than this is treated as abandoned and
/// eligible for retry (§4.F).
pub const STALE_PROCESSING_WINDOW: Duration = Duration::minutes(5);

/// Metadata for one stored binary inside an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMeta {
    pub name: String,
    pub name_ext: String,
    pub object_type: ObjectType,
    pub content_type: String,
    pub hash_id: ContentHash,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub duration: f64,
    pub bitrate: u64,
    pub codec: String,
    /// Free-form nested data, e.g. extracted colors or a base64 preview.
    #[serde(default)]
    pub ext: HashMap<String, serde_json::Value>,
    /// The set of manifest task ids that produced/touched this item.
    #[serde(default)]
    pub task_id: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ItemMeta {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            name_ext: String::new(),
            object_type: ObjectType::Other,
            content_type: String::new(),
            hash_id: ContentHash::ZERO,
            width: 0,
            height: 0,
            size: 0,
            duration: 0.0,
            bitrate: 0,
            codec: String::new(),
            ext: HashMap::new(),
            task_id: Vec::new(),
            updated_at: now,
        }
    }

    /// The basename this item is stored under (`<name>.<ext>`).
    pub fn fullname(&self) -> String {
        if self.name_ext.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.name_ext)
        }
    }

    pub fn set_ext(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.ext.insert(key.into(), value);
    }

    /// Dotted-path lookup into `ext`, e.g. `"colors.0"`.
    pub fn ext_path(&self, path: &str) -> Option<&serde_json::Value> {
        let mut cur = self.ext.get(path.split('.').next()?)?;
        for segment in path.split('.').skip(1) {
            cur = cur.get(segment)?;
        }
        Some(cur)
    }

    fn mark_task(&mut self, task_id: &str) {
        if !self.task_id.iter().any(|t| t == task_id) {
            self.task_id.push(task_id.to_string());
        }
    }

    fn unmark_task(&mut self, task_id: &str) {
        self.task_id.retain(|t| t != task_id);
    }
}

/// Terminal status of one task execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Ok,
    Error,
}

/// One execution record for a manifest task, accumulated across
/// reconciliation runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub attempts: u32,
    pub status: TaskStatus,
    pub message: String,
    pub target_item_name: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-object aggregate metadata: the engine's source of truth for
/// retry accounting and consistency checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub main: ItemMeta,
    #[serde(default)]
    pub items: Vec<ItemMeta>,
    #[serde(default)]
    pub tasks: Vec<TaskInfo>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub manifest_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meta {
    pub fn new(main: ItemMeta) -> Self {
        let now = Utc::now();
        Self {
            main,
            items: Vec::new(),
            tasks: Vec::new(),
            tags: Vec::new(),
            params: HashMap::new(),
            manifest_version: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Resolve a task's `source`/`target` name to its `ItemMeta`. Original
    /// names (`""`, `"@"`, `"original"`, `"original.*"`) resolve to `main`.
    pub fn item_by_name(&self, name: &str) -> Option<&ItemMeta> {
        if is_original_name(name) {
            return Some(&self.main);
        }
        self.items.iter().find(|i| i.name == name)
    }

    pub fn item_by_name_mut(&mut self, name: &str) -> Option<&mut ItemMeta> {
        if is_original_name(name) {
            return Some(&mut self.main);
        }
        self.items.iter_mut().find(|i| i.name == name)
    }

    /// Find the derived item by name, inserting an empty one if absent.
    pub fn find_or_create_item(&mut self, name: &str) -> &mut ItemMeta {
        if let Some(idx) = self.items.iter().position(|i| i.name == name) {
            return &mut self.items[idx];
        }
        self.items.push(ItemMeta::new(name));
        self.items.last_mut().unwrap()
    }

    pub fn task_info(&self, id: &str) -> Option<&TaskInfo> {
        self.tasks.iter().rev().find(|t| t.id == id)
    }

    /// A task is processing-complete if its last record is `ok`, or is
    /// `error` with `attempts > max_retries`, or is `processing` older
    /// than the stale-lease window.
    pub fn is_processing_complete_task(&self, task_id: &str, max_retries: u32) -> bool {
        match self.task_info(task_id) {
            None => false,
            Some(info) => match info.status {
                TaskStatus::Ok => true,
                TaskStatus::Error => info.attempts > max_retries,
                TaskStatus::Processing => {
                    Utc::now() - info.updated_at >= STALE_PROCESSING_WINDOW
                }
            },
        }
    }

    /// Record the outcome of executing `task` against `target_name`.
    /// Appends a `TaskInfo` with an incremented attempt counter and marks
    /// (on success) or un-marks (on failure) the target item with the
    /// task id.
    pub fn complete(&mut self, target_name: &str, task_id: &str, err: Option<&str>) {
        let attempts = self
            .tasks
            .iter()
            .rev()
            .find(|t| t.id == task_id)
            .map(|t| t.attempts)
            .unwrap_or(0);
        let now = Utc::now();
        let status = if err.is_some() {
            TaskStatus::Error
        } else {
            TaskStatus::Ok
        };
        self.tasks.push(TaskInfo {
            id: task_id.to_string(),
            attempts: attempts + 1,
            status,
            message: err.unwrap_or_default().to_string(),
            target_item_name: target_name.to_string(),
            updated_at: now,
        });
        if let Some(item) = self.item_by_name_mut(target_name) {
            if err.is_some() {
                item.unmark_task(task_id);
            } else {
                item.mark_task(task_id);
            }
            item.updated_at = now;
        }
        self.updated_at = now;
    }

    /// Drop `TaskInfo` records whose task no longer exists in `manifest`.
    pub fn remove_excess_tasks(&mut self, manifest: &Manifest) {
        let valid: std::collections::HashSet<&str> =
            manifest.all_tasks().map(|t| t.id.as_str()).collect();
        self.tasks.retain(|t| valid.contains(t.id.as_str()));
    }

    /// Derived items no longer referenced by any manifest task: neither
    /// their name matches a task `target`, nor does any of their
    /// `task_id` entries survive in the manifest (invariant 3).
    pub fn excess_items(&self, manifest: &Manifest) -> Vec<String> {
        let targets = manifest.target_names();
        let valid_task_ids: std::collections::HashSet<&str> =
            manifest.all_tasks().map(|t| t.id.as_str()).collect();
        self.items
            .iter()
            .filter(|item| {
                !targets.contains(&item.name)
                    && !item.task_id.iter().any(|id| valid_task_ids.contains(id.as_str()))
            })
            .map(|item| item.fullname())
            .collect()
    }

    /// Forces every task to re-run on the next reconciliation (used by
    /// `refresh` events).
    pub fn reset_completion(&mut self) {
        self.tasks.clear();
    }

    /// Invariant 6: `manifest_version` matches, every task is
    /// processing-complete, no excess items, and
    /// `target_count - error_task_count <= items.len()`. The `<=`
    /// (never `<` or `==`) tolerates over-production, which is swept as
    /// "excess" rather than treated as inconsistent.
    pub fn is_consistent(&self, manifest: &Manifest) -> bool {
        if self.manifest_version != manifest.version {
            return false;
        }
        let max_retries = u32::MAX; // consistency check is retry-budget agnostic
        let all_complete = manifest
            .all_tasks()
            .all(|t| self.is_processing_complete_task(&t.id, max_retries));
        if !all_complete {
            return false;
        }
        if !self.excess_items(manifest).is_empty() {
            return false;
        }
        let target_count = manifest.target_names().len();
        let error_count = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Error)
            .count();
        target_count.saturating_sub(error_count) <= self.items.len()
    }

    pub fn derive_status(&self, manifest: &Manifest) -> ObjectStatus {
        if manifest.all_tasks().next().is_none() {
            return ObjectStatus::Ok;
        }
        let mut status = ObjectStatus::Ok;
        for task in manifest.all_tasks() {
            status = status.merge(match self.task_info(&task.id) {
                None => ObjectStatus::Processing,
                Some(info) => match info.status {
                    TaskStatus::Ok => ObjectStatus::Ok,
                    TaskStatus::Processing => ObjectStatus::Processing,
                    TaskStatus::Error => {
                        if info.attempts > 0 && task.required {
                            ObjectStatus::Error
                        } else {
                            ObjectStatus::Processing
                        }
                    }
                },
            });
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::manifest::{Stage, Task};

    fn manifest_with_one_task(required: bool) -> Manifest {
        Manifest {
            version: "v1".into(),
            content_types: vec!["*".into()],
            stages: vec![Stage {
                name: "s".into(),
                tasks: vec![Task {
                    id: "s:small:0".into(),
                    source: "@".into(),
                    target: "small".into(),
                    object_type: None,
                    actions: vec![],
                    required,
                    when: vec![],
                }],
            }],
        }
    }

    #[test]
    fn complete_increments_attempts_and_marks_item() {
        let mut meta = Meta::new(ItemMeta::new("main"));
        meta.find_or_create_item("small");
        meta.complete("small", "s:small:0", None);
        let info = meta.task_info("s:small:0").unwrap();
        assert_eq!(info.attempts, 1);
        assert_eq!(info.status, TaskStatus::Ok);
        assert!(meta.item_by_name("small").unwrap().task_id.contains(&"s:small:0".to_string()));
    }

    #[test]
    fn retry_ceiling_marks_complete_after_budget_exhausted() {
        let mut meta = Meta::new(ItemMeta::new("main"));
        meta.find_or_create_item("small");
        for _ in 0..3 {
            meta.complete("small", "s:small:0", Some("boom"));
        }
        assert_eq!(meta.task_info("s:small:0").unwrap().attempts, 3);
        assert!(meta.is_processing_complete_task("s:small:0", 2));
        assert!(!meta.is_processing_complete_task("s:small:0", 5));
    }

    #[test]
    fn excess_items_are_detected_after_manifest_shrink() {
        let mut meta = Meta::new(ItemMeta::new("main"));
        meta.find_or_create_item("small");
        meta.complete("small", "s:small:0", None);
        meta.find_or_create_item("preview");
        meta.complete("preview", "s:preview:1", None);

        let shrunk = manifest_with_one_task(true);
        let excess = meta.excess_items(&shrunk);
        assert_eq!(excess, vec!["preview".to_string()]);
    }

    #[test]
    fn consistency_tolerates_excess_production_but_not_missing_items() {
        let manifest = manifest_with_one_task(true);
        let mut meta = Meta::new(ItemMeta::new("main"));
        meta.manifest_version = "v1".into();
        // No items yet: target_count(1) - errors(0) > items(0) -> inconsistent.
        assert!(!meta.is_consistent(&manifest));

        meta.find_or_create_item("small");
        meta.complete("small", "s:small:0", None);
        assert!(meta.is_consistent(&manifest));
    }

    #[test]
    fn reset_completion_clears_tasks_for_refresh() {
        let mut meta = Meta::new(ItemMeta::new("main"));
        meta.find_or_create_item("small");
        meta.complete("small", "s:small:0", None);
        meta.reset_completion();
        assert!(meta.tasks.is_empty());
    }
}
