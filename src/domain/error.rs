use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("document path is empty")]
    EmptyPath,
    #[error("document path `{path}` escapes the vault root")]
    EscapingPath { path: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn escaping(path: impl Into<String>) -> Self {
        Self::EscapingPath { path: path.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
