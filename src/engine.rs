//! The processing engine (§4.F): walks a manifest's stages and tasks,
//! dispatches actions through the converter registry, and records
//! progress in `meta.tasks`.

use std::io::Cursor;

use crate::{
    converters::{ConverterRegistry, Input, Output, ProcessOutcome},
    errors::StoreError,
    kv::Interlock,
    model::{
        Object,
        manifest::Task,
        meta::{ItemMeta, Meta},
        object::source_filename,
    },
    storage::StorageDriver,
};

/// Engine-tunable limits carried from `EngineConfig`.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    pub max_tasks: usize,
    pub max_stages: usize,
    pub max_retries: u32,
}

fn processing_key(object: &Object) -> String {
    format!("processing_status:{}:{}", object.bucket, object.path)
}

/// Runs outstanding tasks for `object` against `driver`/`registry`,
/// honoring `limits`. Returns `Ok(true)` when every task in the manifest
/// reached a terminal state, `Ok(false)` when `max_tasks`/`max_stages`
/// left work outstanding, or `Err(ObjectInProcessing)` if another worker
/// already holds the lease.
pub fn process_tasks(
    object: &mut Object,
    driver: &dyn StorageDriver,
    registry: &ConverterRegistry,
    interlock: &dyn Interlock,
    limits: EngineLimits,
) -> Result<bool, StoreError> {
    let lease_key = processing_key(object);
    if !interlock.try_begin_update(&lease_key) {
        return Err(StoreError::ObjectInProcessing(object.id()));
    }

    let result = run_stages(object, driver, registry, limits);

    object.meta.remove_excess_tasks(&object.manifest);
    interlock.release(&lease_key);
    result
}

fn run_stages(
    object: &mut Object,
    driver: &dyn StorageDriver,
    registry: &ConverterRegistry,
    limits: EngineLimits,
) -> Result<bool, StoreError> {
    let manifest = object.manifest.clone();
    let mut tasks_run = 0usize;
    let mut all_complete = true;

    for (stage_idx, stage) in manifest.stages.iter().enumerate() {
        if stage_idx >= limits.max_stages {
            all_complete = false;
            break;
        }
        for task in &stage.tasks {
            if tasks_run >= limits.max_tasks {
                all_complete = false;
                break;
            }
            if object.meta.is_processing_complete_task(&task.id, limits.max_retries) {
                continue;
            }
            if !registry.any_converter_for_task(task) {
                all_complete = false;
                break;
            }
            tasks_run += 1;
            execute_task(object, driver, registry, task)?;
        }
    }

    Ok(all_complete)
}

fn execute_task(
    object: &mut Object,
    driver: &dyn StorageDriver,
    registry: &ConverterRegistry,
    task: &Task,
) -> Result<(), StoreError> {
    let source_meta = object
        .meta
        .item_by_name(&task.source)
        .cloned()
        .ok_or_else(|| StoreError::MissingSource(task.id.clone(), task.source.clone()))?;

    let target_name = if task.is_meta_only() {
        task.source.clone()
    } else {
        task.target.clone()
    };

    let reader = driver.read(object, &task.source)?;
    let bytes = {
        use std::io::Read;
        let mut buf = Vec::new();
        let mut r = reader;
        r.read_to_end(&mut buf)?;
        buf
    };

    let first_action = task.actions.first().cloned().unwrap_or_else(|| crate::model::manifest::Action::new(""));
    let mut input = Input::new(Box::new(Cursor::new(bytes)), first_action, task.clone(), source_meta.clone());
    let mut target_meta = if task.is_meta_only() {
        source_meta.clone()
    } else {
        object.meta.item_by_name(&task.target).cloned().unwrap_or_else(|| ItemMeta::new(&task.target))
    };

    let mut last_output: Option<Output> = None;
    let mut run_err: Option<String> = None;

    for action in &task.actions {
        input.set_action(action.clone());
        let mut output = Output::new(target_meta.clone());
        match registry.find(action) {
            None => {
                run_err = Some(format!("no converter for action `{}`", action.name));
                break;
            }
            Some(converter) => match converter.process(&mut input, &mut output) {
                Ok(ProcessOutcome::Skip) => {
                    if let Err(e) = input.rewind(&task.id) {
                        run_err = Some(e.to_string());
                        break;
                    }
                    let _ = converter.finish(&mut input, &mut output);
                    target_meta = output.meta_ref();
                    last_output = Some(output);
                }
                Ok(ProcessOutcome::Written) => {
                    let _ = converter.finish(&mut input, &mut output);
                    if let Some(bytes) = output.peek_bytes() {
                        input.replace_reader(bytes.to_vec());
                    }
                    target_meta = output.meta_ref();
                    last_output = Some(output);
                }
                Err(e) => {
                    run_err = Some(e.to_string());
                    break;
                }
            },
        }
    }

    let produced_bytes = last_output.as_mut().and_then(|o| o.take_bytes());

    if run_err.is_none() {
        match &produced_bytes {
            Some(bytes) if !task.is_meta_only() => {
                driver.update(object, &target_name, &mut bytes.as_slice(), Some(&target_meta))?;
            }
            _ => {
                driver.update_meta(object, &target_name, &target_meta)?;
            }
        }
    }

    object.meta.complete(&target_name, &task.id, run_err.as_deref());

    if let Some(err) = run_err {
        if task.required {
            return Err(StoreError::ConverterError(task.id.clone(), err));
        }
    }
    Ok(())
}

/// Reconcile `meta.items` against `manifest` after a processing pass,
/// deleting items the manifest no longer references (invariant 3).
pub fn sweep_excess_items(object: &mut Object, driver: &dyn StorageDriver) -> Result<(), StoreError> {
    let excess = object.meta.excess_items(&object.manifest);
    if excess.is_empty() {
        return Ok(());
    }
    driver.remove(object, &excess)?;
    object.meta.items.retain(|item| !excess.contains(&item.fullname()));
    Ok(())
}

/// Force every task to re-run and remove all derived items, used by
/// `refresh` events (§4.G).
pub fn reset_for_refresh(object: &mut Object, driver: &dyn StorageDriver) -> Result<(), StoreError> {
    driver.clean(object)?;
    object.meta.reset_completion();
    Ok(())
}

pub fn meta_is_ready_for_reconciliation(meta: &Meta) -> bool {
    !meta.main.content_type.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        kv::memory::MemoryInterlock,
        model::manifest::{Action, Manifest, Stage, Value},
        storage::{fs::FsDriver, path::PathGenerator, CreateParams},
    };
    use std::time::Duration;

    fn setup() -> (tempfile::TempDir, FsDriver, Object) {
        let dir = tempfile::tempdir().unwrap();
        let driver = FsDriver::new(dir.path(), PathGenerator::new("fixed/path", 5));
        let mut obj = driver.create("bucket", Some("fixed/path"), false, &CreateParams::default()).unwrap();
        let jpeg_bytes = vec![0xFFu8, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4, 5, 6, 7, 8];
        driver.update(&mut obj, "", &mut jpeg_bytes.as_slice(), None).unwrap();
        obj.manifest = Manifest {
            version: "v1".into(),
            content_types: vec!["*".into()],
            stages: vec![Stage {
                name: "copy".into(),
                tasks: vec![Task {
                    id: "copy:small:0".into(),
                    source: "@".into(),
                    target: "small".into(),
                    object_type: None,
                    actions: vec![Action::new("shell").with_value("command", Value::String("cat".into()))],
                    required: true,
                    when: vec![],
                }],
            }],
        };
        driver.update_manifest("bucket", &obj.manifest).unwrap();
        (dir, driver, obj)
    }

    #[test]
    fn process_tasks_runs_pending_task_to_completion() {
        let (_tmp, driver, mut obj) = setup();
        let registry = ConverterRegistry::with_defaults(std::env::temp_dir());
        let interlock = MemoryInterlock::new(Duration::from_secs(300));
        let limits = EngineLimits { max_tasks: usize::MAX, max_stages: usize::MAX, max_retries: 2 };
        let complete = process_tasks(&mut obj, &driver, &registry, &interlock, limits).unwrap();
        assert!(complete);
        assert!(obj.meta.item_by_name("small").is_some());
        assert_eq!(obj.meta.task_info("copy:small:0").unwrap().status, crate::model::meta::TaskStatus::Ok);
    }

    #[test]
    fn concurrent_processing_is_rejected_by_interlock() {
        let (_tmp, driver, mut obj) = setup();
        let registry = ConverterRegistry::with_defaults(std::env::temp_dir());
        let interlock = MemoryInterlock::new(Duration::from_secs(300));
        let limits = EngineLimits { max_tasks: usize::MAX, max_stages: usize::MAX, max_retries: 2 };
        interlock.try_begin_update(&processing_key(&obj));
        let err = process_tasks(&mut obj, &driver, &registry, &interlock, limits);
        assert!(matches!(err, Err(StoreError::ObjectInProcessing(_))));
    }

    #[test]
    fn max_tasks_limit_leaves_work_outstanding() {
        let (_tmp, driver, mut obj) = setup();
        let registry = ConverterRegistry::with_defaults(std::env::temp_dir());
        let interlock = MemoryInterlock::new(Duration::from_secs(300));
        let limits = EngineLimits { max_tasks: 0, max_stages: usize::MAX, max_retries: 2 };
        let complete = process_tasks(&mut obj, &driver, &registry, &interlock, limits).unwrap();
        assert!(!complete);
    }
}
