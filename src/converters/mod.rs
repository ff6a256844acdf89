//! The converter registry: the `Converter` trait every action processor
//! implements, the `Input`/`Output` contract passed to them, and the
//! built-in image and external-command families.

pub mod image;
pub mod procedure;
pub mod shell;

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use crate::{
    errors::StoreError,
    model::{manifest::Action, manifest::Task, meta::ItemMeta},
};

/// Any reader a converter can both read and rewind.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// What a converter did with its output.
pub enum ProcessOutcome {
    /// The action produced new bytes, already stored in `Output`.
    Written,
    /// The action was a no-op; the engine should rewind the input reader
    /// and feed it unchanged to the next action.
    Skip,
}

/// The reader side of a converter invocation: the source bytes, the
/// action being executed, the owning task, and the source item's
/// metadata.
pub struct Input {
    reader: Box<dyn ReadSeek>,
    action: Action,
    task: Task,
    source_meta: ItemMeta,
    scratch: Option<Box<dyn std::any::Any + Send>>,
}

impl Input {
    pub fn new(reader: Box<dyn ReadSeek>, action: Action, task: Task, source_meta: ItemMeta) -> Self {
        Self {
            reader,
            action,
            task,
            source_meta,
            scratch: None,
        }
    }

    pub fn reader_mut(&mut self) -> &mut dyn ReadSeek {
        &mut *self.reader
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Swap in the next action in the chain while keeping the same
    /// reader/task/source metadata — the engine calls this once per
    /// action within a task's action list.
    pub fn set_action(&mut self, action: Action) {
        self.action = action;
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn source_meta(&self) -> &ItemMeta {
        &self.source_meta
    }

    /// Read the whole input into memory. Most built-in image processors
    /// need the full buffer to decode; external-command converters
    /// stream it instead.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Rewind the reader so the next action in the chain sees the same
    /// bytes again — the engine calls this on `ProcessOutcome::Skip`.
    pub fn rewind(&mut self, task_id: &str) -> Result<(), StoreError> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|_| StoreError::ReaderResetFailed(task_id.to_string()))?;
        Ok(())
    }

    /// Replace the reader with one over `bytes`, used after a non-skip
    /// action to feed its output into the next action.
    pub fn replace_reader(&mut self, bytes: Vec<u8>) {
        self.reader = Box::new(Cursor::new(bytes));
    }

    /// Take out per-task working state a previous action in this task's
    /// chain stashed via `put_scratch` (e.g. the image family's decoded
    /// buffer), so a multi-action converter can decode once per task
    /// instead of once per action.
    pub fn take_scratch<T: 'static>(&mut self) -> Option<T> {
        let boxed = self.scratch.take()?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(boxed) => {
                self.scratch = Some(boxed);
                None
            }
        }
    }

    /// Stash working state for the next action in this task's chain to
    /// pick up via `take_scratch`.
    pub fn put_scratch<T: 'static + Send>(&mut self, value: T) {
        self.scratch = Some(Box::new(value));
    }
}

/// The writer side of a converter invocation: the output bytes (if any)
/// and the mutable metadata of the target item.
#[derive(Default)]
pub struct Output {
    bytes: Option<Vec<u8>>,
    meta: Option<ItemMeta>,
}

impl Output {
    pub fn new(meta: ItemMeta) -> Self {
        Self {
            bytes: None,
            meta: Some(meta),
        }
    }

    pub fn set_output(&mut self, bytes: Vec<u8>) {
        self.bytes = Some(bytes);
    }

    pub fn take_bytes(&mut self) -> Option<Vec<u8>> {
        self.bytes.take()
    }

    /// Look at the produced bytes without consuming them, so the engine
    /// can feed the same output into both the next action's input and
    /// the final driver write.
    pub fn peek_bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn meta_mut(&mut self) -> &mut ItemMeta {
        self.meta.get_or_insert_with(|| ItemMeta::new(""))
    }

    /// The target item metadata accumulated so far, defaulting to an
    /// empty `ItemMeta` if no converter has touched it yet.
    pub fn meta_ref(&self) -> ItemMeta {
        self.meta.clone().unwrap_or_else(|| ItemMeta::new(""))
    }

    pub fn into_meta(self) -> ItemMeta {
        self.meta.unwrap_or_else(|| ItemMeta::new(""))
    }
}

/// One or more named operations implemented by a process function. An
/// action matches the first registered converter whose `test` returns
/// true.
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    fn test(&self, action: &Action) -> bool;

    fn process(&self, input: &mut Input, output: &mut Output) -> Result<ProcessOutcome, StoreError>;

    /// Optional cleanup hook invoked once the task finishes, regardless of
    /// outcome — external-command converters use this to remove temp
    /// files.
    fn finish(&self, _input: &mut Input, _output: &mut Output) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Dispatch table of registered converters, consulted in registration
/// order.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: Vec<Box<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, converter: Box<dyn Converter>) -> &mut Self {
        self.converters.push(converter);
        self
    }

    /// The first converter whose `test` accepts `action`.
    pub fn find(&self, action: &Action) -> Option<&dyn Converter> {
        self.converters
            .iter()
            .find(|c| c.test(action))
            .map(|c| c.as_ref())
    }

    /// True if at least one action in `task` has a matching converter.
    /// A task with none has its stage skipped rather than failed.
    pub fn any_converter_for_task(&self, task: &Task) -> bool {
        task.actions.iter().any(|a| self.find(a).is_some())
    }

    /// The default registry: every built-in image processor plus the
    /// shell and procedure external-command converters.
    pub fn with_defaults(procedure_dir: impl Into<std::path::PathBuf>) -> Self {
        let mut registry = Self::new();
        image::register_defaults(&mut registry);
        registry.register(Box::new(shell::ShellConverter::default()));
        registry.register(Box::new(procedure::ProcedureConverter::new(procedure_dir)));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysMatch;
    impl Converter for AlwaysMatch {
        fn name(&self) -> &str {
            "always"
        }
        fn test(&self, _action: &Action) -> bool {
            true
        }
        fn process(&self, _input: &mut Input, _output: &mut Output) -> Result<ProcessOutcome, StoreError> {
            Ok(ProcessOutcome::Written)
        }
    }

    #[test]
    fn registry_finds_first_matching_converter() {
        let mut registry = ConverterRegistry::new();
        registry.register(Box::new(AlwaysMatch));
        let action = Action::new("anything");
        assert!(registry.find(&action).is_some());
    }

    #[test]
    fn task_without_matching_converter_reports_none() {
        let registry = ConverterRegistry::new();
        let task = Task {
            id: "t".into(),
            source: "@".into(),
            target: "small".into(),
            object_type: None,
            actions: vec![Action::new("resize")],
            required: true,
            when: vec![],
        };
        assert!(!registry.any_converter_for_task(&task));
    }
}
