//! Spawn options

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::command::Command;
use crate::native::NativeResolver;
use crate::size::WinSize;

/// Everything needed to start a process attached to a PTY
///
/// ```no_run
/// use ptybridge::PtyProcessOptions;
///
/// let options = PtyProcessOptions::new(["bash", "-l"])
///     .env("TERM", "xterm-256color")
///     .directory("/tmp")
///     .initial_columns(120)
///     .initial_rows(40);
/// ```
#[derive(Clone)]
pub struct PtyProcessOptions {
    command: Command,
    environment: HashMap<String, String>,
    directory: Option<PathBuf>,
    initial_columns: Option<u16>,
    initial_rows: Option<u16>,
    redirect_error_stream: bool,
    console_mode: bool,
    preserve_output_after_exit: bool,
    native_resolver: Option<Arc<dyn NativeResolver>>,
}

impl PtyProcessOptions {
    /// Options for `command` with an empty environment
    pub fn new(command: impl Into<Command>) -> Self {
        Self {
            command: command.into(),
            environment: HashMap::new(),
            directory: None,
            initial_columns: None,
            initial_rows: None,
            redirect_error_stream: true,
            console_mode: false,
            preserve_output_after_exit: true,
            native_resolver: None,
        }
    }

    /// Replace the whole environment of the child
    pub fn environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Add one environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Start from the environment of the current process
    pub fn inherit_env(mut self) -> Self {
        self.environment.extend(std::env::vars());
        self
    }

    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn initial_columns(mut self, columns: u16) -> Self {
        self.initial_columns = Some(columns);
        self
    }

    pub fn initial_rows(mut self, rows: u16) -> Self {
        self.initial_rows = Some(rows);
        self
    }

    /// Merge the child's stderr into the main stream (default `true`)
    pub fn redirect_error_stream(mut self, redirect: bool) -> Self {
        self.redirect_error_stream = redirect;
        self
    }

    /// Run without a controlling terminal session and with echo disabled
    pub fn console_mode(mut self, console_mode: bool) -> Self {
        self.console_mode = console_mode;
        self
    }

    /// Keep output readable after the child exits (Unix, default `true`)
    pub fn preserve_output_after_exit(mut self, preserve: bool) -> Self {
        self.preserve_output_after_exit = preserve;
        self
    }

    /// Resolve native files through `resolver` instead of the configured directory
    pub fn native_resolver(mut self, resolver: Arc<dyn NativeResolver>) -> Self {
        self.native_resolver = Some(resolver);
        self
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn env_map(&self) -> &HashMap<String, String> {
        &self.environment
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// The requested initial size, if either dimension was given
    pub fn initial_size(&self) -> Option<WinSize> {
        WinSize::from_requested(self.initial_columns, self.initial_rows)
    }

    pub fn is_redirect_error_stream(&self) -> bool {
        self.redirect_error_stream
    }

    pub fn is_console_mode(&self) -> bool {
        self.console_mode
    }

    pub fn is_preserve_output_after_exit(&self) -> bool {
        self.preserve_output_after_exit
    }

    /// Whether a separate PTY carries the child's stderr
    pub fn uses_error_device(&self) -> bool {
        self.console_mode && !self.redirect_error_stream
    }

    pub fn resolver(&self) -> Option<&Arc<dyn NativeResolver>> {
        self.native_resolver.as_ref()
    }
}

impl fmt::Debug for PtyProcessOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtyProcessOptions")
            .field("command", &self.command)
            .field("environment", &self.environment.len())
            .field("directory", &self.directory)
            .field("initial_columns", &self.initial_columns)
            .field("initial_rows", &self.initial_rows)
            .field("redirect_error_stream", &self.redirect_error_stream)
            .field("console_mode", &self.console_mode)
            .field("preserve_output_after_exit", &self.preserve_output_after_exit)
            .field("native_resolver", &self.native_resolver.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PtyProcessOptions::new("sh");
        assert!(options.env_map().is_empty());
        assert!(options.working_directory().is_none());
        assert!(options.initial_size().is_none());
        assert!(options.is_redirect_error_stream());
        assert!(!options.is_console_mode());
        assert!(options.is_preserve_output_after_exit());
        assert!(!options.uses_error_device());
    }

    #[test]
    fn test_initial_size_defaults_missing_dimension() {
        let options = PtyProcessOptions::new("sh").initial_rows(50);
        assert_eq!(options.initial_size(), Some(WinSize::new(80, 50)));
    }

    #[test]
    fn test_error_device_only_in_console_mode() {
        let options = PtyProcessOptions::new("sh").redirect_error_stream(false);
        assert!(!options.uses_error_device());
        assert!(options.console_mode(true).uses_error_device());
    }

    #[test]
    fn test_env_builder() {
        let options = PtyProcessOptions::new(["env"]).env("A", "1").env("B", "2");
        assert_eq!(options.env_map().get("A").map(String::as_str), Some("1"));
        assert_eq!(options.env_map().len(), 2);
        assert_eq!(options.command().to_argument_list(), vec!["env"]);
    }
}
