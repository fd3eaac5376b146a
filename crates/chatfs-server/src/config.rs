//! Server configuration loaded from environment variables.
//!
//! Everything except the backend credentials has a default, so the server
//! can start with no configuration and serve existing history offline.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chatfs_fs::AuthSettings;
use chatfs_shared::constants::{BACKEND_DATA_DIR, DEFAULT_LISTEN_ADDR, HISTORY_DB_FILE};
use chatfs_store::database::default_data_dir;
use chatfs_store::StoreError;

#[derive(Clone)]
pub struct ServerConfig {
    /// Address the 9P listener binds.
    /// Env: `CHATFS_LISTEN_ADDR`
    /// Default: `127.0.0.1:5640`
    pub listen_addr: SocketAddr,

    /// Directory holding the history database and the backend's state.
    /// Env: `CHATFS_DATA_DIR`
    /// Default: the platform data directory for chatfs.
    pub data_dir: Option<PathBuf>,

    /// Owner reported for every file.
    /// Env: `CHATFS_OWNER`, then `USER`
    /// Default: `none`
    pub owner: String,

    /// Program speaking JSON lines to the backend, with its arguments.
    /// Env: `CHATFS_BRIDGE` (whitespace separated)
    /// Default: unset, history is served read-only and nothing is sent.
    pub bridge: Option<Vec<String>>,

    /// Env: `CHATFS_PHONE`
    pub phone_number: Option<String>,

    /// One-time authorization code.
    /// Env: `CHATFS_AUTH_CODE`
    pub auth_code: Option<String>,

    /// Key of the backend's local database.
    /// Env: `CHATFS_DB_KEY`
    /// Default: empty
    pub encryption_key: String,

    /// Env: `CHATFS_API_ID`
    pub api_id: Option<i64>,

    /// Env: `CHATFS_API_HASH`
    pub api_hash: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR
                .parse()
                .unwrap_or_else(|_| ([127, 0, 0, 1], 5640).into()),
            data_dir: None,
            owner: "none".to_string(),
            bridge: None,
            phone_number: None,
            auth_code: None,
            encryption_key: String::new(),
            api_id: None,
            api_hash: None,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("data_dir", &self.data_dir)
            .field("owner", &self.owner)
            .field("bridge", &self.bridge)
            .field("phone_number", &self.phone_number.as_ref().map(|_| "<set>"))
            .field("auth_code", &self.auth_code.as_ref().map(|_| "<set>"))
            .field("encryption_key", &(!self.encryption_key.is_empty()).then_some("<set>"))
            .field("api_id", &self.api_id)
            .field("api_hash", &self.api_hash.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(addr) = non_empty("CHATFS_LISTEN_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.listen_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid CHATFS_LISTEN_ADDR, using default"),
            }
        }

        if let Some(dir) = non_empty("CHATFS_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(owner) = non_empty("CHATFS_OWNER").or_else(|| non_empty("USER")) {
            config.owner = owner;
        }

        if let Some(bridge) = non_empty("CHATFS_BRIDGE") {
            config.bridge = Some(bridge.split_whitespace().map(str::to_string).collect());
        }

        config.phone_number = non_empty("CHATFS_PHONE");
        config.auth_code = non_empty("CHATFS_AUTH_CODE");
        config.api_hash = non_empty("CHATFS_API_HASH");
        if let Some(key) = lookup("CHATFS_DB_KEY") {
            config.encryption_key = key;
        }

        if let Some(id) = non_empty("CHATFS_API_ID") {
            match id.trim().parse::<i64>() {
                Ok(parsed) => config.api_id = Some(parsed),
                Err(_) => tracing::warn!(value = %id, "Invalid CHATFS_API_ID, ignoring"),
            }
        }

        config
    }

    /// The configured data directory, or the platform default.
    pub fn resolve_data_dir(&self) -> Result<PathBuf, StoreError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn history_path(data_dir: &Path) -> PathBuf {
        data_dir.join(HISTORY_DB_FILE)
    }

    pub fn auth_settings(&self, data_dir: &Path) -> AuthSettings {
        AuthSettings {
            phone_number: self.phone_number.clone(),
            code: self.auth_code.clone(),
            encryption_key: self.encryption_key.clone(),
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            backend_data_dir: data_dir.join(BACKEND_DATA_DIR),
        }
    }
}
