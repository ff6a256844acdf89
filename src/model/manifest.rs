//! Manifest, Stage, Task and Action — the declarative pipeline
//! description attached to a bucket (or, as an override, to a single
//! object).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{errors::StoreError, model::object::ObjectType};

/// A single named parameter value carried by an [`Action`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    StringList(Vec<String>),
}

/// One named transformation with its parameters, dispatched to a
/// converter by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub values: HashMap<String, Value>,
    /// Forces execution even when the operation would otherwise be a
    /// no-op (e.g. resize to the current size).
    #[serde(default)]
    pub must_execute: bool,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: HashMap::new(),
            must_execute: false,
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn value_string(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Int(i)) => i.to_string(),
            Some(Value::Float(f)) => f.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    pub fn value_i64(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(Value::Int(i)) => *i,
            Some(Value::Float(f)) => *f as i64,
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn value_f64(&self, key: &str, default: f64) -> f64 {
        match self.values.get(key) {
            Some(Value::Float(f)) => *f,
            Some(Value::Int(i)) => *i as f64,
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn value_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "1" | "true" | "yes" | "on"),
            _ => default,
        }
    }

    pub fn value_string_slice(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(Value::StringList(v)) => v.clone(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// The minimum retry unit: one source item, one target item, an ordered
/// action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    /// `""` or `"@"` mean the original; otherwise the target name of an
    /// earlier task.
    #[serde(default)]
    pub source: String,
    /// Output item name; empty means "overwrite source metadata only".
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub object_type: Option<ObjectType>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// If false, action failures do not fail the task.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Reserved dependency declaration; not enforced by the engine.
    #[serde(default)]
    pub when: Vec<String>,
}

fn default_required() -> bool {
    true
}

impl Task {
    /// True when `source` denotes the original item.
    pub fn source_is_original(&self) -> bool {
        self.source.is_empty() || self.source == "@"
    }

    /// True when the task only mutates the source item's metadata.
    pub fn is_meta_only(&self) -> bool {
        self.target.is_empty()
    }
}

/// An ordered group of tasks within a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stage {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// The declarative description of how objects in a group should be
/// processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: String,
    /// Allowed mime patterns: `*`, `prefix/*`, or an exact content type.
    #[serde(default)]
    pub content_types: Vec<String>,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: String::new(),
            content_types: vec!["*".to_string()],
            stages: Vec::new(),
        }
    }
}

impl Manifest {
    /// Normalizes every task's `id`, deriving `{stage}:{target}:{n}` when
    /// omitted, and checks the resulting id set is unique (invariant 4).
    pub fn prepare_info(&mut self) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for stage in &mut self.stages {
            for (n, task) in stage.tasks.iter_mut().enumerate() {
                if task.id.is_empty() {
                    task.id = format!("{}:{}:{}", stage.name, task.target, n);
                }
                if !seen.insert(task.id.clone()) {
                    return Err(StoreError::Custom(format!(
                        "duplicate task id `{}` after manifest normalization",
                        task.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every `(target_name, task_id)` pair declared by the manifest,
    /// used to compute excess items (invariant 3) and target counts
    /// (invariant 6).
    pub fn target_names(&self) -> HashSet<String> {
        self.stages
            .iter()
            .flat_map(|s| s.tasks.iter())
            .filter(|t| !t.target.is_empty())
            .map(|t| t.target.clone())
            .collect()
    }

    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.stages.iter().flat_map(|s| s.tasks.iter())
    }

    pub fn task_by_id(&self, id: &str) -> Option<&Task> {
        self.all_tasks().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_info_derives_missing_ids() {
        let mut manifest = Manifest {
            version: "1".into(),
            content_types: vec!["image/*".into()],
            stages: vec![Stage {
                name: "thumbs".into(),
                tasks: vec![
                    Task {
                        id: String::new(),
                        source: "@".into(),
                        target: "small".into(),
                        object_type: None,
                        actions: vec![],
                        required: true,
                        when: vec![],
                    },
                    Task {
                        id: String::new(),
                        source: "@".into(),
                        target: "preview".into(),
                        object_type: None,
                        actions: vec![],
                        required: false,
                        when: vec![],
                    },
                ],
            }],
        };
        manifest.prepare_info().unwrap();
        assert_eq!(manifest.stages[0].tasks[0].id, "thumbs:small:0");
        assert_eq!(manifest.stages[0].tasks[1].id, "thumbs:preview:1");
    }

    #[test]
    fn prepare_info_rejects_duplicate_ids() {
        let mut manifest = Manifest {
            version: "1".into(),
            content_types: vec!["*".into()],
            stages: vec![Stage {
                name: "s".into(),
                tasks: vec![
                    Task {
                        id: "fixed".into(),
                        source: "@".into(),
                        target: "a".into(),
                        object_type: None,
                        actions: vec![],
                        required: true,
                        when: vec![],
                    },
                    Task {
                        id: "fixed".into(),
                        source: "@".into(),
                        target: "b".into(),
                        object_type: None,
                        actions: vec![],
                        required: true,
                        when: vec![],
                    },
                ],
            }],
        };
        assert!(manifest.prepare_info().is_err());
    }

    #[test]
    fn action_value_accessors_fall_back_to_default() {
        let action = Action::new("resize").with_value("width", Value::Int(200));
        assert_eq!(action.value_i64("width", 0), 200);
        assert_eq!(action.value_i64("height", 100), 100);
        assert_eq!(action.value_string("missing", "fallback"), "fallback");
    }
}
