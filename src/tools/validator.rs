//! Command Validation Module
//!
//! This module provides command validation to prevent shell injection attacks.
//! It uses a whitelist approach to ensure only known-safe commands can be executed.

use anyhow::Result;
use std::path::Path;

/// Error types for command validation
#[derive(Debug, thiserror::Error)]
pub enum CommandValidationError {
    #[error("Command '{0}' is not in the allowed whitelist")]
    NotAllowed(String),

    #[error("Command '{0}' contains invalid characters")]
    InvalidCharacters(String),

    #[error("Command argument '{0}' contains shell metacharacters")]
    ShellMetacharacter(String),

    #[error("Command path is absolute and potentially unsafe: '{0}'")]
    AbsolutePath(String),

    #[error("Command path contains directory traversal: '{0}'")]
    DirectoryTraversal(String),
}

/// Safe command wrapper that has been validated
#[derive(Debug, Clone)]
pub struct SafeCommand {
    /// The command to execute
    pub command: String,

    /// The arguments to pass to the command
    pub args: Vec<String>,
}

impl SafeCommand {
    /// Create a new safe command
    ///
    /// This should only be called after validation via CommandValidator.
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self { command, args }
    }

    /// Get the command and args as a tuple for subprocess execution
    pub fn as_tuple(&self) -> (&str, &[String]) {
        (&self.command, &self.args)
    }
}

/// Command validator that enforces security policies
///
/// # Security Principles
///
/// 1. **Whitelist Only**: Only known-safe commands are allowed
/// 2. **No Shell Injection**: Commands are never interpreted by a shell
/// 3. **Path Validation**: Prevents directory traversal and absolute paths
/// 4. **Argument Sanitization**: All arguments are checked for metacharacters
pub struct CommandValidator {
    /// Whitelist of allowed commands
    allowed_commands: Vec<String>,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::with_default_whitelist()
    }
}

impl CommandValidator {
    /// Create a new validator with the default whitelist
    ///
    /// The default whitelist includes:
    /// - npx (for Node.js packages)
    /// - python, python3 (for Python scripts)
    /// - node (for Node.js scripts)
    /// - cargo (for Rust tools)
    pub fn with_default_whitelist() -> Self {
        Self {
            allowed_commands: vec![
                "npx".to_string(),
                "python".to_string(),
                "python3".to_string(),
                "node".to_string(),
                "cargo".to_string(),
            ],
        }
    }

    /// Create a new validator with a custom whitelist
    pub fn with_whitelist(allowed: Vec<String>) -> Self {
        Self {
            allowed_commands: allowed,
        }
    }

    /// Validate a command and its arguments
    ///
    /// # Arguments
    ///
    /// * `command` - The command to validate
    /// * `args` - The arguments to validate
    ///
    /// # Returns
    ///
    /// Returns a `SafeCommand` if validation passes, or an error if validation fails.
    ///
    /// # Example
    ///
    /// ```
    /// use builder_orchestrator::tools::CommandValidator;
    ///
    /// let validator = CommandValidator::default();
    /// let safe = validator.validate("npx", &["-y", "@modelcontextprotocol/server-filesystem"]);
    /// assert!(safe.is_ok());
    /// ```
    pub fn validate(&self, command: &str, args: &[&str]) -> Result<SafeCommand> {
        // Check if command is whitelisted
        self.check_whitelist(command)?;

        // Check command path safety
        self.check_path(command)?;

        // Check for shell metacharacters in command
        self.check_shell_metacharacters(command, "command")?;

        // Validate all arguments
        for arg in args {
            self.check_shell_metacharacters(arg, "argument")?;
        }

        Ok(SafeCommand {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Check if the command is in the whitelist
    fn check_whitelist(&self, command: &str) -> Result<()> {
        if !self.allowed_commands.contains(&command.to_string()) {
            return Err(CommandValidationError::NotAllowed(command.to_string()).into());
        }
        Ok(())
    }

    /// Check if the command path is safe
    ///
    /// Prevents:
    /// - Absolute paths (e.g., /bin/bash)
    /// - Directory traversal (e.g., ../malicious)
    fn check_path(&self, command: &str) -> Result<()> {
        let path = Path::new(command);

        // Check for absolute path
        if path.is_absolute() {
            return Err(CommandValidationError::AbsolutePath(command.to_string()).into());
        }

        // Check for directory traversal
        if command.contains("..") {
            return Err(CommandValidationError::DirectoryTraversal(command.to_string()).into());
        }

        Ok(())
    }

    /// Check for shell metacharacters that could enable injection
    ///
    /// These characters are dangerous when interpreted by a shell:
    /// - ; : Command separator
    /// - | : Pipe
    /// - & : Background execution
    /// - $ : Variable expansion
    /// - ` : Command substitution
    /// - \n : Newline (command separator)
    /// - \r : Carriage return
    /// - ( ) : Subshell
    /// - < > : Redirection
    fn check_shell_metacharacters(&self, input: &str, context: &str) -> Result<()> {
        let dangerous_chars = [';', '|', '&', '$', '`', '\n', '\r', '(', ')', '<', '>'];

        for &char in dangerous_chars.iter() {
            if input.contains(char) {
                return Err(CommandValidationError::ShellMetacharacter(format!(
                    "{} with {}",
                    context, char
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Get the current whitelist
    pub fn whitelist(&self) -> &[String] {
        &self.allowed_commands
    }

    /// Check if a command is in the whitelist
    pub fn is_allowed(&self, command: &str) -> bool {
        self.allowed_commands.contains(&command.to_string())
    }
}
