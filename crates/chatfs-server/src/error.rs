use thiserror::Error;

use chatfs_fs::{AuthInput, FsError};

use crate::ninep::codec::CodecError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("9P codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Backend bridge error: {0}")]
    Bridge(String),
}

/// Failure of a single 9P request, sent back to the client as an Rerror.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("unknown fid")]
    UnknownFid,

    #[error("fid already in use")]
    FidInUse,

    #[error("fid already open")]
    AlreadyOpen,

    #[error("fid not open for {0}")]
    NotOpen(&'static str),

    #[error("file not found")]
    NotFound,

    #[error("not a directory")]
    NotADirectory,

    #[error("permission denied")]
    PermissionDenied,

    #[error("authentication not required")]
    NoAuthRequired,

    #[error("create prohibited")]
    CreateProhibited,

    #[error("rename not supported")]
    RenameNotSupported,

    #[error("bad offset in directory read")]
    BadDirectoryOffset,

    #[error("protocol version not negotiated")]
    NoVersion,

    #[error("unexpected request")]
    Unexpected,

    #[error("{0}")]
    Codec(#[from] CodecError),

    #[error("{0}")]
    Fs(#[from] FsError),
}

/// Environment variable an operator sets to supply `input`.
pub fn auth_input_variable(input: AuthInput) -> &'static str {
    match input {
        AuthInput::PhoneNumber => "CHATFS_PHONE",
        AuthInput::Code => "CHATFS_AUTH_CODE",
        AuthInput::ApiCredentials => "CHATFS_API_ID and CHATFS_API_HASH",
    }
}
