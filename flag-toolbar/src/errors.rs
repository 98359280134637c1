use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("{0} is not supported by the wrapped client")]
    Unsupported(&'static str),
    #[error("failed to update context: {0}")]
    ContextUpdate(String),
    #[error("failed to start client: {0}")]
    Start(String),
}

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("evaluation of {flag} failed: {reason}")]
    Failed { flag: String, reason: String },
    #[error("evaluation of {0} panicked: {1}")]
    Panicked(String, String),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot is not valid utf-8 after decoding: {0}")]
    Decode(#[from] std::str::Utf8Error),
    #[error("failed to parse snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown storage mode: {0}")]
    UnknownStorageMode(String),
    #[error("unknown payload kind: {0}")]
    UnknownPayloadKind(String),
    #[error("unknown context field: {0}")]
    UnknownContextField(String),
    #[error("invalid boolean value: {0}")]
    InvalidBool(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ClientError::Unsupported("update_context").to_string(),
            "update_context is not supported by the wrapped client"
        );
        assert_eq!(
            EvaluationError::Failed {
                flag: "checkout".to_string(),
                reason: "boom".to_string()
            }
            .to_string(),
            "evaluation of checkout failed: boom"
        );
        assert_eq!(
            ConfigError::UnknownStorageMode("disk".to_string()).to_string(),
            "unknown storage mode: disk"
        );
    }
}
