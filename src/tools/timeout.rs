//! Execution Timeout Management
//!
//! This module provides timeout handling for subprocess execution.

use std::time::Duration;
use tokio::time;

/// Execution timeout configuration
///
/// Timeouts are enforced to prevent commands from hanging indefinitely.
#[derive(Debug, Clone)]
pub struct ExecutionTimeout {
    /// The timeout duration
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Arguments
    ///
    /// * `duration` - The timeout duration
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use builder_orchestrator::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Create a timeout for long-running operations (5 minutes)
    pub fn long() -> Self {
        Self::new(Duration::from_secs(300))
    }

    /// Create a timeout for medium operations (1 minute, default)
    pub fn medium() -> Self {
        Self::default()
    }

    /// Create a timeout for quick operations (10 seconds)
    pub fn short() -> Self {
        Self::new(Duration::from_secs(10))
    }

    /// Create a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Execute a future with a timeout
    ///
    /// # Arguments
    ///
    /// * `future` - The future to execute
    ///
    /// # Returns
    ///
    /// Returns the result of the future if it completes before the timeout,
    /// or an error if the timeout expires.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use builder_orchestrator::tools::ExecutionTimeout;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let timeout = ExecutionTimeout::short();
    ///     let result = timeout.run(async {
    ///         // Do some work
    ///         Ok::<(), anyhow::Error>(())
    ///     }).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn run<F, T>(&self, future: F) -> anyhow::Result<T>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        match time::timeout(self.duration, future).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "Command execution timed out after {:?}",
                self.duration
            )),
        }
    }
}
