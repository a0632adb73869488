//! Release error taxonomy.
//!
//! Every error is either fatal (it ends the run) or advisory (it is logged
//! and recorded, and never changes the deployment status).

use thiserror::Error;

/// Whether an error may end the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Advisory,
}

/// Errors produced by the release orchestrator and its components.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Bad inputs detected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// The lock command exited non-zero.
    #[error("Failed to lock environment: {0}")]
    LockAcquisition(String),

    /// The lock command succeeded but its output carried no ticket.
    #[error("Failed to parse lock response: {0}")]
    MalformedLockResponse(String),

    /// Hub or environment login failed.
    #[error("Failed to authenticate to {target}: {detail}")]
    Authentication { target: String, detail: String },

    /// The release candidate definition could not be fetched.
    #[error("Failed to fetch release candidate: {0}")]
    DefinitionFetch(String),

    /// The deploy command exited non-zero.
    #[error("Release deployment failed: {0}")]
    Deployment(String),

    /// Changelog discovery or formatting failed.
    #[error("Changelog processing failed: {0}")]
    ChangelogProcessing(String),

    /// Token fetch or comment upsert failed.
    #[error("Failed to publish comment: {0}")]
    CommentPublish(String),

    /// The unlock command exited non-zero.
    #[error("Failed to unlock environment: {0}")]
    LockRelease(String),

    /// The external program could not be started.
    #[error("failed to start {program}: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit where the caller asked for it to be an error.
    #[error("{program} exited with code {exit_code}: {detail}")]
    CommandFailed {
        program: String,
        exit_code: i32,
        detail: String,
    },

    /// The cross-invocation state store could not be read or written.
    #[error("state store error: {0}")]
    StateStore(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReleaseError {
    /// Classify the error.
    pub fn severity(&self) -> Severity {
        match self {
            ReleaseError::ChangelogProcessing(_)
            | ReleaseError::CommentPublish(_)
            | ReleaseError::LockRelease(_) => Severity::Advisory,
            _ => Severity::Fatal,
        }
    }

    pub fn is_advisory(&self) -> bool {
        self.severity() == Severity::Advisory
    }
}

impl From<release_remote::RemoteError> for ReleaseError {
    fn from(err: release_remote::RemoteError) -> Self {
        ReleaseError::CommentPublish(err.to_string())
    }
}

/// Result type for release operations.
pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Collects advisory failures from best-effort steps.
///
/// Nothing recorded here can change the outcome of the required steps.
#[derive(Debug, Default)]
pub struct AdvisoryLog {
    entries: Vec<ReleaseError>,
}

impl AdvisoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the outcome of a best-effort step through the log, keeping the
    /// value on success.
    pub fn capture<T>(&mut self, step: &str, outcome: Result<T>) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(step, error = %err, "Best-effort step failed");
                self.entries.push(err);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn into_entries(self) -> Vec<ReleaseError> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        assert_eq!(
            ReleaseError::Validation("x".into()).severity(),
            Severity::Fatal
        );
        assert_eq!(
            ReleaseError::LockAcquisition("busy".into()).severity(),
            Severity::Fatal
        );
        assert_eq!(
            ReleaseError::Authentication {
                target: "DevHub".into(),
                detail: "expired".into()
            }
            .severity(),
            Severity::Fatal
        );
        assert!(ReleaseError::ChangelogProcessing("x".into()).is_advisory());
        assert!(ReleaseError::CommentPublish("x".into()).is_advisory());
        assert!(ReleaseError::LockRelease("x".into()).is_advisory());
    }

    #[test]
    fn test_authentication_display() {
        let err = ReleaseError::Authentication {
            target: "environment".to_string(),
            detail: "no such org".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to authenticate to environment: no such org"
        );
    }

    #[test]
    fn test_advisory_log_captures_failures_only() {
        let mut log = AdvisoryLog::new();
        assert_eq!(log.capture("ok", Ok(3)), Some(3));
        assert_eq!(
            log.capture::<()>("comment", Err(ReleaseError::CommentPublish("403".into()))),
            None
        );
        assert_eq!(log.len(), 1);
        assert!(matches!(
            log.into_entries().as_slice(),
            [ReleaseError::CommentPublish(_)]
        ));
    }

    #[test]
    fn test_remote_error_maps_to_comment_publish() {
        let err: ReleaseError = release_remote::RemoteError::MissingToken.into();
        assert!(matches!(err, ReleaseError::CommentPublish(_)));
        assert!(err.is_advisory());
    }
}
