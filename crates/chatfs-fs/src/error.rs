use std::fmt;

use thiserror::Error;

use chatfs_store::StoreError;

/// Inputs the operator may have to supply before the backend authorizes us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthInput {
    PhoneNumber,
    Code,
    ApiCredentials,
}

impl fmt::Display for AuthInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthInput::PhoneNumber => write!(f, "a phone number"),
            AuthInput::Code => write!(f, "an authorization code"),
            AuthInput::ApiCredentials => write!(f, "an API id and hash"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("Directory not empty")]
    NotEmpty,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("File too large: offset {0} is past the size limit")]
    FileTooLarge(u64),

    #[error("Authorization requires {0}, which was not supplied")]
    MissingAuthInput(AuthInput),

    #[error("Backend event stream closed")]
    BackendClosed,
}

impl FsError {
    /// Fatal errors stop the event worker; everything else is logged and the
    /// offending event dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::MissingAuthInput(_) | FsError::BackendClosed)
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
