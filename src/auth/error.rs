use std::fmt;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The identity provider could not be reached or did not answer in time.
    Unavailable(String),
    Network(String),
    InvalidCredential(String),
    InvalidResponse(String),
}

impl AuthError {
    /// Whether the failure means the provider is unreachable rather than that
    /// it rejected the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, AuthError::Unavailable(_) | AuthError::Network(_))
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Unavailable(message) => write!(f, "Identity provider unavailable: {message}"),
            AuthError::Network(message) => write!(f, "Network error: {message}"),
            AuthError::InvalidCredential(message) => write!(f, "Invalid credential: {message}"),
            AuthError::InvalidResponse(message) => write!(f, "Invalid auth response: {message}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            AuthError::Unavailable(error.to_string())
        } else {
            AuthError::Network(error.to_string())
        }
    }
}

impl From<url::ParseError> for AuthError {
    fn from(error: url::ParseError) -> Self {
        AuthError::InvalidResponse(format!("invalid url: {error}"))
    }
}
