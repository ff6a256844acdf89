//! The `shell` external-command converter: runs a shell command against
//! the input bytes, in one of three invocation modes (§4.C).

use std::{
    io::{Read, Write},
    process::{Command, Stdio},
};

use tempfile::NamedTempFile;

use crate::{
    converters::{Converter, Input, Output, ProcessOutcome},
    errors::StoreError,
    model::manifest::Action,
};

pub const ACTION_NAME: &str = "shell";

#[derive(Default)]
pub struct ShellConverter;

impl Converter for ShellConverter {
    fn name(&self) -> &str {
        ACTION_NAME
    }

    fn test(&self, action: &Action) -> bool {
        action.name == ACTION_NAME
    }

    fn process(&self, input: &mut Input, output: &mut Output) -> Result<ProcessOutcome, StoreError> {
        let action = input.action().clone();
        let command = action.value_string("command", "");
        if command.is_empty() {
            return Err(StoreError::ConverterError(
                ACTION_NAME.to_string(),
                "missing `command` parameter".to_string(),
            ));
        }
        execute(&command, &action, input, output)
    }
}

/// Shared by `shell` and `procedure`: runs `command` through `/bin/sh -c`,
/// substituting `{{inputFile}}`/`{{outputFile}}` placeholders for the
/// temp-file invocation modes, otherwise piping bytes via stdin/stdout.
pub fn execute(
    command: &str,
    action: &Action,
    input: &mut Input,
    output: &mut Output,
) -> Result<ProcessOutcome, StoreError> {
    let target_meta_field = action.value_string("target-meta", "");
    let to_json_string = action.value_bool("tojson", false);
    let uses_input_file = command.contains("{{inputFile}}");
    let uses_output_file = command.contains("{{outputFile}}");

    let bytes = input.read_all()?;
    let mut resolved_command = command.to_string();
    let mut input_guard: Option<NamedTempFile> = None;
    let mut output_guard: Option<NamedTempFile> = None;

    if uses_input_file {
        let mut f = NamedTempFile::new()?;
        f.write_all(&bytes)?;
        f.flush()?;
        resolved_command = resolved_command.replace("{{inputFile}}", f.path().to_string_lossy().as_ref());
        input_guard = Some(f);
    }
    if uses_output_file {
        let f = NamedTempFile::new()?;
        resolved_command = resolved_command.replace("{{outputFile}}", f.path().to_string_lossy().as_ref());
        output_guard = Some(f);
    }

    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(&resolved_command)
        .stdin(if uses_input_file { Stdio::null() } else { Stdio::piped() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if !uses_input_file {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&bytes)?;
        }
    }

    let result = child.wait_with_output()?;
    if !result.status.success() {
        return Err(StoreError::ConverterError(
            ACTION_NAME.to_string(),
            format!(
                "command exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr)
            ),
        ));
    }

    let stdout = if uses_output_file {
        let mut f = std::fs::File::open(output_guard.as_ref().unwrap().path())?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        buf
    } else {
        result.stdout
    };

    drop(input_guard);
    drop(output_guard);

    if !target_meta_field.is_empty() {
        let value = if to_json_string {
            serde_json::Value::String(String::from_utf8_lossy(&stdout).to_string())
        } else {
            serde_json::from_slice(&stdout).map_err(|e| {
                StoreError::ConverterError(ACTION_NAME.to_string(), format!("invalid JSON output: {e}"))
            })?
        };
        output.meta_mut().set_ext(target_meta_field, value);
        return Ok(ProcessOutcome::Skip);
    }

    output.set_output(stdout);
    Ok(ProcessOutcome::Written)
}
