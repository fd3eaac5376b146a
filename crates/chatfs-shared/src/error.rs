use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Document is not a JSON object")]
    NotAnObject,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}
