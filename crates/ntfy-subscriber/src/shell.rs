//! Built-in command handlers that run external programs.
//!
//! Programs are executed directly, never through `sh -c`, so message text
//! can only ever become arguments of an allow-listed program.

use std::path::PathBuf;
use std::process::Command as Process;

use crate::registry::Command;
use crate::types::{BoxError, Error, Notification};

/// Runs an allow-listed program with the notification's arguments.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    name: String,
    path: PathBuf,
}

impl ShellCommand {
    /// Resolve `program` on `PATH` (or as a path). Only the first word is used.
    pub fn new(program: &str) -> Result<Self, Error> {
        let name = program
            .split_whitespace()
            .next()
            .ok_or_else(|| Error::Shell("program must not be empty".to_string()))?;
        let path = which::which(name)
            .map_err(|e| Error::Shell(format!("cannot resolve {name:?}: {e}")))?;
        // Commands are matched against the first word of a message, so a
        // program given as a path registers under its file name.
        let name = path
            .file_name()
            .and_then(|f| f.to_str())
            .filter(|_| name.contains(std::path::MAIN_SEPARATOR))
            .unwrap_or(name)
            .to_string();
        Ok(Self { name, path })
    }

    /// Name the command is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Command for ShellCommand {
    fn run(&self, args: &[String], record: &Notification) -> Result<(), BoxError> {
        run_to_completion(&self.name, Process::new(&self.path).args(args), record)
    }
}

/// Runs a fixed command line when its alias is received. Message arguments
/// are ignored.
#[derive(Debug, Clone)]
pub struct ShellAlias {
    alias: String,
    program: String,
    args: Vec<String>,
}

impl ShellAlias {
    /// `command_line` is the program followed by its arguments. A single
    /// string element is split on whitespace.
    pub fn new<I, S>(alias: &str, command_line: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut words: Vec<String> = command_line.into_iter().map(Into::into).collect();
        if let [single] = words.as_slice() {
            words = single.split_whitespace().map(str::to_string).collect();
        }
        let mut words = words.into_iter();
        let program = words
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::Shell(format!("alias {alias:?} has an empty command line")))?;
        Ok(Self {
            alias: alias.to_string(),
            program,
            args: words.collect(),
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Program and arguments that the alias runs.
    pub fn command_line(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl Command for ShellAlias {
    fn run(&self, _args: &[String], record: &Notification) -> Result<(), BoxError> {
        run_to_completion(&self.alias, Process::new(&self.program).args(&self.args), record)
    }
}

fn run_to_completion(
    label: &str,
    process: &mut Process,
    record: &Notification,
) -> Result<(), BoxError> {
    let status = process.status()?;
    if status.success() {
        tracing::debug!(command = label, record_id = %record.id, "program exited successfully");
        Ok(())
    } else {
        Err(format!("{label} exited with {status}").into())
    }
}
