use std::fmt::{Display, Formatter};

use crate::auth::AuthError;
use crate::realtime::RealtimeError;
use crate::store::{StoreError, ValidationError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncErrorCode {
    AuthUnavailable,
    StoreUnavailable,
    SubscriptionDropped,
    ValidationFailed,
    NotReady,
}

impl SyncErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorCode::AuthUnavailable => "sync/auth-unavailable",
            SyncErrorCode::StoreUnavailable => "sync/store-unavailable",
            SyncErrorCode::SubscriptionDropped => "sync/subscription-dropped",
            SyncErrorCode::ValidationFailed => "sync/validation-failed",
            SyncErrorCode::NotReady => "sync/not-ready",
        }
    }
}

/// Error surfaced by the sync loop. None of these end the session on their own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncError {
    pub code: SyncErrorCode,
    message: String,
    cause: Option<&'static str>,
}

impl SyncError {
    pub fn new(code: SyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    fn with_cause(mut self, cause: &'static str) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Code of the collaborator error this was raised from, e.g. `store/permission-denied`.
    pub fn cause_code(&self) -> Option<&'static str> {
        self.cause
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for SyncError {}

pub type SyncResult<T> = Result<T, SyncError>;

pub fn not_ready(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::NotReady, message)
}

pub fn subscription_dropped(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::SubscriptionDropped, message)
}

impl From<AuthError> for SyncError {
    fn from(err: AuthError) -> Self {
        SyncError::new(SyncErrorCode::AuthUnavailable, err.to_string())
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::new(SyncErrorCode::StoreUnavailable, err.message()).with_cause(err.code_str())
    }
}

impl From<RealtimeError> for SyncError {
    fn from(err: RealtimeError) -> Self {
        SyncError::new(SyncErrorCode::SubscriptionDropped, err.message())
            .with_cause(err.code_str())
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::new(SyncErrorCode::ValidationFailed, err.to_string())
            .with_cause(err.field.as_str())
    }
}
