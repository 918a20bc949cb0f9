use thiserror::Error;

pub type Result<T, E = RuntimeError> = core::result::Result<T, E>;

/// Coarse classification of a [`RuntimeError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NullArgument,
    IllegalArgument,
    CorruptDataStructure,
    UnparseableString,
    NotFound,
    TypeMismatch,
    OutOfMemory,
    WouldExceedLimit,
    Unsupported,
    NotYetImplemented,
    AlreadyExists,
    ConfigurationConflict,
    ConfigurationError,
    FunctionFailed,
    DuplicateType,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("null argument: {0}")]
    NullArgument(String),
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    #[error("corrupt data structure: {0}")]
    CorruptDataStructure(String),
    #[error("unparseable string: {0}")]
    UnparseableString(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("would exceed limit: {0}")]
    WouldExceedLimit(String),
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("not yet implemented: {0}")]
    NotYetImplemented(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("device operation failed: {0}")]
    FunctionFailed(String),
    #[error("duplicate driver type: {0}")]
    DuplicateType(String),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NullArgument(_) => ErrorKind::NullArgument,
            Self::IllegalArgument(_) => ErrorKind::IllegalArgument,
            Self::CorruptDataStructure(_) => ErrorKind::CorruptDataStructure,
            Self::UnparseableString(_) => ErrorKind::UnparseableString,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::TypeMismatch(_) => ErrorKind::TypeMismatch,
            Self::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Self::WouldExceedLimit(_) => ErrorKind::WouldExceedLimit,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::NotYetImplemented(_) => ErrorKind::NotYetImplemented,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::ConfigurationConflict(_) => ErrorKind::ConfigurationConflict,
            Self::ConfigurationError(_) => ErrorKind::ConfigurationError,
            Self::FunctionFailed(_) => ErrorKind::FunctionFailed,
            Self::DuplicateType(_) => ErrorKind::DuplicateType,
        }
    }

    /// The caller-supplied context message.
    pub fn message(&self) -> &str {
        match self {
            Self::NullArgument(m)
            | Self::IllegalArgument(m)
            | Self::CorruptDataStructure(m)
            | Self::UnparseableString(m)
            | Self::NotFound(m)
            | Self::TypeMismatch(m)
            | Self::OutOfMemory(m)
            | Self::WouldExceedLimit(m)
            | Self::Unsupported(m)
            | Self::NotYetImplemented(m)
            | Self::AlreadyExists(m)
            | Self::ConfigurationConflict(m)
            | Self::ConfigurationError(m)
            | Self::FunctionFailed(m)
            | Self::DuplicateType(m) => m,
        }
    }

    /// Shorthand used by operation-table defaults.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_message() {
        let err = RuntimeError::TypeMismatch("field 'x' is double".into());
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(err.message(), "field 'x' is double");
        assert_eq!(err.to_string(), "type mismatch: field 'x' is double");
    }

    #[test]
    fn test_unsupported_helper() {
        let err = RuntimeError::unsupported("home search");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
