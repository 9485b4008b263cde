use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    MissingCollaborator { name: &'static str },
    MissingOption { name: &'static str },
    InvalidOption { name: &'static str, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &'static str {
        match self {
            AppError::MissingCollaborator { .. } => "app/missing-collaborator",
            AppError::MissingOption { .. } => "app/missing-option",
            AppError::InvalidOption { .. } => "app/invalid-option",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MissingCollaborator { name } => {
                write!(f, "No {name} was provided to the app builder")
            }
            AppError::MissingOption { name } => {
                write!(f, "App options must include '{name}'")
            }
            AppError::InvalidOption { name, message } => {
                write!(f, "Invalid app option '{name}': {message}")
            }
        }
    }
}

impl std::error::Error for AppError {}
