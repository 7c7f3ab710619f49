/// Sbom service error variants surfaced by repositories and adapters.
#[derive(Debug, thiserror::Error)]
pub enum SbomServiceError {
    #[error("invalid outbox message: {0}")]
    InvalidOutboxMessage(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Consumer-facing error classification. Permanent errors route the inbound
/// message to the DLQ and commit its offset; transient errors retry the same
/// message with backoff. No other layer interprets error kinds.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("permanent: {0}")]
    Permanent(#[source] anyhow::Error),
    #[error("transient: {0}")]
    Transient(#[source] anyhow::Error),
}

impl ProcessingError {
    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(err.into())
    }

    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Repository failures default to transient: database connectivity, broker
/// writes and parser subprocesses all recover under retry. Call sites that
/// know better (decode failures, missing rows) classify explicitly.
impl From<SbomServiceError> for ProcessingError {
    fn from(err: SbomServiceError) -> Self {
        Self::Transient(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_is_permanent() {
        assert!(ProcessingError::permanent(anyhow::anyhow!("bad json")).is_permanent());
    }

    #[test]
    fn transient_is_not_permanent() {
        assert!(!ProcessingError::transient(anyhow::anyhow!("db down")).is_permanent());
    }

    #[test]
    fn service_error_converts_to_transient() {
        let err: ProcessingError =
            SbomServiceError::Internal(anyhow::anyhow!("connection reset")).into();
        assert!(!err.is_permanent());
    }
}
