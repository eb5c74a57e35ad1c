//! The privileged credential lookup command.

use std::future::Future;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_PROGRAM: &str = "credential-get";
const DEFAULT_ARGS: &[&str] = &["--format=json"];
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Marker the host prints on stderr when the unit lacks credential access.
const PERMISSION_DENIED: &str = "permission denied";

/// Source of the raw credential document.
///
/// Implemented by [`LookupCommand`]; tests provide in-memory doubles.
pub trait CredentialLookup {
    /// Returns the raw JSON credential document.
    fn lookup(&self) -> impl Future<Output = Result<Vec<u8>, LookupError>> + Send;
}

/// Errors that may arise running the credential lookup.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LookupError {
    /// The lookup program is not installed.
    #[error("credential lookup program not found: {program}")]
    NotFound {
        /// The program that could not be found.
        program: String,
    },

    /// The unit has not been granted access to credentials.
    #[error("credential lookup denied: {stderr}")]
    PermissionDenied {
        /// Trimmed stderr of the lookup program.
        stderr: String,
    },

    /// The lookup program exited unsuccessfully for another reason.
    #[error("credential lookup failed with exit code {code:?}: {stderr}")]
    Failed {
        /// Exit code, `None` if the program was terminated by a signal.
        code: Option<i32>,
        /// Trimmed stderr of the lookup program.
        stderr: String,
    },

    /// The lookup program could not be run.
    #[error("failed running credential lookup program")]
    Io(#[source] io::Error),

    /// The lookup program did not finish in time.
    #[error("credential lookup timed out after {0:?}")]
    Timeout(Duration),
}

impl LookupError {
    /// Returns `true` for failures that mean "no credential access here", after
    /// which static configuration is consulted instead.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::PermissionDenied { .. })
    }
}

/// Runs an external program and captures its stdout as the credential document.
///
/// Defaults to `credential-get --format=json` with a 5 second timeout. The
/// child is killed if the timeout elapses.
#[derive(Debug, Clone)]
pub struct LookupCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for LookupCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_owned(),
            args: DEFAULT_ARGS.iter().map(|a| (*a).to_owned()).collect(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl LookupCommand {
    /// Creates a lookup running `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replaces the program arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets how long the program may run.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self) -> Result<Vec<u8>, LookupError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => LookupError::NotFound {
                    program: self.program.clone(),
                },
                _ => LookupError::Io(e),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| LookupError::Timeout(self.timeout))?
            .map_err(LookupError::Io)?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        if stderr.contains(PERMISSION_DENIED) {
            Err(LookupError::PermissionDenied { stderr })
        } else {
            Err(LookupError::Failed {
                code: output.status.code(),
                stderr,
            })
        }
    }
}

impl CredentialLookup for LookupCommand {
    fn lookup(&self) -> impl Future<Output = Result<Vec<u8>, LookupError>> + Send {
        self.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_runs_credential_get_as_json() {
        let cmd = LookupCommand::default();
        assert_eq!(cmd.program(), "credential-get");
        assert_eq!(cmd.args, ["--format=json"]);
        assert_eq!(cmd.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_only_missing_access_is_expected() {
        assert!(LookupError::NotFound {
            program: "x".into()
        }
        .is_expected());
        assert!(LookupError::PermissionDenied {
            stderr: "permission denied".into()
        }
        .is_expected());
        assert!(!LookupError::Failed {
            code: Some(1),
            stderr: String::new()
        }
        .is_expected());
        assert!(!LookupError::Timeout(DEFAULT_TIMEOUT).is_expected());
    }
}
