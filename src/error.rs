use thiserror::Error;

/// Batch error taxonomy.
///
/// `Configuration` and `InstanceAlreadyComplete` are launch/build-time
/// failures and are never retried. `ItemProcessor` failures may be skipped
/// when their kind is whitelisted by the step's skip policy. `ItemWriter`
/// failures are retried with the same chunk payload up to the step's retry
/// limit. Everything else fails the step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("job instance already complete: {0}")]
    InstanceAlreadyComplete(String),

    #[error("item reader error: {0}")]
    ItemReader(String),

    #[error("item processor error [{kind}]: {message}")]
    ItemProcessor { kind: String, message: String },

    #[error("item writer error: {0}")]
    ItemWriter(String),

    #[error("step '{step}' failed: {message}")]
    StepFailure { step: String, message: String },
}

impl BatchError {
    /// Shorthand for a processor failure tagged with a skip-policy kind.
    pub fn processor(kind: impl Into<String>, message: impl Into<String>) -> Self {
        BatchError::ItemProcessor {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The skip-policy kind of this error, if it has one.
    ///
    /// Only processor failures carry a kind; all other errors are outside
    /// the scope of skip policies.
    pub fn skip_kind(&self) -> Option<&str> {
        match self {
            BatchError::ItemProcessor { kind, .. } => Some(kind),
            _ => None,
        }
    }
}
