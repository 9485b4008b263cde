use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RealtimeErrorCode {
    /// The realtime service could not be reached.
    Unavailable,
    JoinRejected,
    /// An open channel closed without being asked to.
    ChannelClosed,
    Protocol,
    InvalidArgument,
}

impl RealtimeErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RealtimeErrorCode::Unavailable => "realtime/unavailable",
            RealtimeErrorCode::JoinRejected => "realtime/join-rejected",
            RealtimeErrorCode::ChannelClosed => "realtime/channel-closed",
            RealtimeErrorCode::Protocol => "realtime/protocol",
            RealtimeErrorCode::InvalidArgument => "realtime/invalid-argument",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealtimeError {
    pub code: RealtimeErrorCode,
    message: String,
}

impl RealtimeError {
    pub fn new(code: RealtimeErrorCode, message: impl Into<String>) -> Self {
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

impl Display for RealtimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for RealtimeError {}

pub type RealtimeResult<T> = Result<T, RealtimeError>;

pub fn unavailable(message: impl Into<String>) -> RealtimeError {
    RealtimeError::new(RealtimeErrorCode::Unavailable, message)
}

pub fn join_rejected(message: impl Into<String>) -> RealtimeError {
    RealtimeError::new(RealtimeErrorCode::JoinRejected, message)
}

pub fn channel_closed(message: impl Into<String>) -> RealtimeError {
    RealtimeError::new(RealtimeErrorCode::ChannelClosed, message)
}

pub fn protocol_error(message: impl Into<String>) -> RealtimeError {
    RealtimeError::new(RealtimeErrorCode::Protocol, message)
}

pub fn invalid_argument(message: impl Into<String>) -> RealtimeError {
    RealtimeError::new(RealtimeErrorCode::InvalidArgument, message)
}
