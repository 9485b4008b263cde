use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// The store could not be reached or failed server-side.
    Unavailable,
    PermissionDenied,
    InvalidArgument,
    Internal,
}

impl StoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorCode::Unavailable => "store/unavailable",
            StoreErrorCode::PermissionDenied => "store/permission-denied",
            StoreErrorCode::InvalidArgument => "store/invalid-argument",
            StoreErrorCode::Internal => "store/internal",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreError {
    pub code: StoreErrorCode,
    message: String,
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

pub fn unavailable(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::Unavailable, message)
}

pub fn permission_denied(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::PermissionDenied, message)
}

pub fn invalid_argument(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::Internal, message)
}
