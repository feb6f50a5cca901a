//! External command seam.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a command to completion. A run that exceeds `timeout` or cannot be
/// started is an `ExternalCommand` error; a non-zero exit is not.
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        argv: &[String],
        timeout: Duration,
    ) -> impl Future<Output = Result<ProcessOutput>> + Send;

    /// Whether `program` can be found on `PATH`.
    fn command_exists(&self, program: &str) -> bool;
}

pub(crate) fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
