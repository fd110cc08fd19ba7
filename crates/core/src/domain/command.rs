// Command specification and launch normalization

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::error::{ProcessError, Result};

/// What to run: program, arguments, working directory and environment
///
/// There are no redirection or shell settings; the launcher always pipes the
/// standard streams and runs the program directly.
///
/// # Example
/// ```text
/// let spec = CommandSpec::new("sh")
///     .args(["-c", "echo hello"])
///     .env("LANG", "C");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to execute
    pub program: String,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Working directory (inherits the caller's when `None`)
    pub working_dir: Option<PathBuf>,

    /// Environment variables to set (merged with the inherited environment)
    pub env: HashMap<String, String>,

    /// Environment variables to remove
    pub env_remove: Vec<String>,

    /// Whether to clear the inherited environment first
    pub env_clear: bool,
}

impl CommandSpec {
    /// Create a spec for the given program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Add an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Remove an environment variable
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Clear the inherited environment before setting variables
    pub fn env_clear(mut self) -> Self {
        self.env_clear = true;
        self
    }

    /// Check the command can be handed to the OS launcher
    ///
    /// # Errors
    /// - ProcessError::InvalidConfiguration if the program is blank or an
    ///   environment key is empty or contains `=` / NUL
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(ProcessError::InvalidConfiguration(
                "program must not be empty".to_string(),
            ));
        }

        let bad_key = self
            .env
            .keys()
            .chain(self.env_remove.iter())
            .find(|k| k.is_empty() || k.contains('=') || k.contains('\0'));

        if let Some(key) = bad_key {
            return Err(ProcessError::InvalidConfiguration(format!(
                "invalid environment variable name: {:?}",
                key
            )));
        }

        Ok(())
    }
}

/// Normalized copy of a [`CommandSpec`] as handed to the OS launcher
///
/// The program name is trimmed and duplicate `env_remove` entries are
/// collapsed. The caller's spec is cloned, never mutated. The launcher always
/// pipes all three standard streams, runs the program directly (no shell) and
/// creates no console window; none of that is configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    spec: CommandSpec,
}

impl LaunchConfig {
    /// Validate and normalize a caller-supplied spec
    pub fn from_spec(spec: &CommandSpec) -> Result<Self> {
        spec.validate()?;

        let mut normalized = spec.clone();
        normalized.program = spec.program.trim().to_string();

        let mut seen = HashSet::new();
        normalized
            .env_remove
            .retain(|key| seen.insert(key.clone()));

        Ok(Self { spec: normalized })
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn program(&self) -> &str {
        &self.spec.program
    }
}
