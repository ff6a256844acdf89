//! The `procedure` external-command converter: runs a named script from
//! a configured directory, reusing the `shell` converter's execution
//! machinery with the script's absolute path substituted in.

use std::path::PathBuf;

use crate::{
    converters::{Converter, Input, Output, ProcessOutcome, shell},
    errors::StoreError,
    model::manifest::Action,
};

pub const ACTION_NAME: &str = "procedure";

pub struct ProcedureConverter {
    procedure_directory: PathBuf,
}

impl ProcedureConverter {
    pub fn new(procedure_directory: impl Into<PathBuf>) -> Self {
        Self {
            procedure_directory: procedure_directory.into(),
        }
    }
}

impl Converter for ProcedureConverter {
    fn name(&self) -> &str {
        ACTION_NAME
    }

    fn test(&self, action: &Action) -> bool {
        action.name == ACTION_NAME
    }

    fn process(&self, input: &mut Input, output: &mut Output) -> Result<ProcessOutcome, StoreError> {
        let action = input.action().clone();
        let procedure_name = action.value_string("name", "");
        if procedure_name.is_empty() {
            return Err(StoreError::ConverterError(
                ACTION_NAME.to_string(),
                "missing `name` parameter".to_string(),
            ));
        }
        let args = action.value_string_slice("args");
        let script_path = self.procedure_directory.join(&procedure_name);
        let mut command = format!("{}", script_path.to_string_lossy());
        for arg in &args {
            command.push(' ');
            command.push_str(arg);
        }
        shell::execute(&command, &action, input, output)
    }
}
