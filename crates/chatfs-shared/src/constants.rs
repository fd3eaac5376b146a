/// Application name
pub const APP_NAME: &str = "chatfs";

/// Column at which message bodies are wrapped
pub const WRAP_WIDTH: usize = 70;

/// Prefix marking one level of quoting in a rendered message
pub const QUOTE_PREFIX: &str = "> ";

/// Prefix for quoted text inside an inbound message
pub const DOUBLE_QUOTE_PREFIX: &str = "> > ";

/// Separator between the sender and the text in tail-log entries
pub const AUTHOR_SEPARATOR: &str = "§";

/// Extension of message files
pub const MESSAGE_FILE_EXT: &str = "txt";

/// Name of the control file used to send messages
pub const IN_FILE_NAME: &str = "in";

/// Name of the control file streaming new messages
pub const OUT_FILE_NAME: &str = "out";

/// Default 9P listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5640";

/// Name of the SQLite history database inside the data directory
pub const HISTORY_DB_FILE: &str = "history.db";

/// Directory (inside the data directory) handed to the backend for its own state
pub const BACKEND_DATA_DIR: &str = "tdlib";

/// Largest size a message file may grow to through writes
pub const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;
