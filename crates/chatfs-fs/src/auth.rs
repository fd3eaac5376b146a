//! Answers to the backend's authorization state machine.

use std::path::PathBuf;

use tracing::{info, warn};

use chatfs_shared::protocol::ClientParameters;
use chatfs_shared::{AuthorizationState, BackendCommand};

use crate::error::{AuthInput, FsError, Result};

/// Operator-supplied inputs for authorization.
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    pub phone_number: Option<String>,
    /// Only needed once, on first authorization.
    pub code: Option<String>,
    /// Key of the backend's local database; empty means unencrypted.
    pub encryption_key: String,
    pub api_id: Option<i64>,
    pub api_hash: Option<String>,
    /// Where the backend keeps its own state.
    pub backend_data_dir: PathBuf,
}

pub struct AuthFlow {
    settings: AuthSettings,
}

impl AuthFlow {
    pub fn new(settings: AuthSettings) -> Self {
        Self { settings }
    }

    /// The command answering `state`, if any. A missing input is fatal.
    pub fn respond(&self, state: &AuthorizationState) -> Result<Option<BackendCommand>> {
        let command = match state {
            AuthorizationState::WaitTdlibParameters => {
                let (Some(api_id), Some(api_hash)) =
                    (self.settings.api_id, self.settings.api_hash.clone())
                else {
                    return Err(FsError::MissingAuthInput(AuthInput::ApiCredentials));
                };
                BackendCommand::SetTdlibParameters {
                    parameters: ClientParameters {
                        database_directory: self.settings.backend_data_dir.display().to_string(),
                        use_message_database: true,
                        use_secret_chats: true,
                        api_id,
                        api_hash,
                        system_language_code: "en".to_string(),
                        device_model: "Desktop".to_string(),
                        system_version: "Unknown".to_string(),
                        application_version: env!("CARGO_PKG_VERSION").to_string(),
                        enable_storage_optimizer: true,
                    },
                }
            }
            AuthorizationState::WaitEncryptionKey => BackendCommand::CheckDatabaseEncryptionKey {
                key: self.settings.encryption_key.clone(),
            },
            AuthorizationState::WaitPhoneNumber => {
                let phone_number = self
                    .settings
                    .phone_number
                    .clone()
                    .ok_or(FsError::MissingAuthInput(AuthInput::PhoneNumber))?;
                BackendCommand::SetAuthenticationPhoneNumber { phone_number }
            }
            AuthorizationState::WaitCode => {
                let code = self
                    .settings
                    .code
                    .clone()
                    .ok_or(FsError::MissingAuthInput(AuthInput::Code))?;
                BackendCommand::CheckAuthenticationCode { code }
            }
            AuthorizationState::Ready => {
                info!("Backend authorized");
                return Ok(None);
            }
            AuthorizationState::Other(tag) => {
                warn!(state = %tag, "Unhandled authorization state");
                return Ok(None);
            }
        };
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AuthSettings {
        AuthSettings {
            phone_number: Some("+15550100".to_string()),
            code: None,
            encryption_key: "secret".to_string(),
            api_id: Some(12345),
            api_hash: Some("abcdef".to_string()),
            backend_data_dir: PathBuf::from("/var/lib/chatfs/tdlib"),
        }
    }

    #[test]
    fn answers_each_waiting_state() {
        let flow = AuthFlow::new(settings());
        assert_eq!(
            flow.respond(&AuthorizationState::WaitPhoneNumber).unwrap(),
            Some(BackendCommand::SetAuthenticationPhoneNumber {
                phone_number: "+15550100".to_string()
            })
        );
        assert_eq!(
            flow.respond(&AuthorizationState::WaitEncryptionKey).unwrap(),
            Some(BackendCommand::CheckDatabaseEncryptionKey {
                key: "secret".to_string()
            })
        );
        match flow.respond(&AuthorizationState::WaitTdlibParameters).unwrap() {
            Some(BackendCommand::SetTdlibParameters { parameters }) => {
                assert_eq!(parameters.api_id, 12345);
                assert_eq!(parameters.database_directory, "/var/lib/chatfs/tdlib");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(flow.respond(&AuthorizationState::Ready).unwrap(), None);
        assert_eq!(
            flow.respond(&AuthorizationState::Other("authorizationStateClosed".into()))
                .unwrap(),
            None
        );
    }

    #[test]
    fn missing_code_is_fatal() {
        let flow = AuthFlow::new(settings());
        let err = flow.respond(&AuthorizationState::WaitCode).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, FsError::MissingAuthInput(AuthInput::Code)));

        let flow = AuthFlow::new(AuthSettings {
            code: Some("12345".to_string()),
            ..settings()
        });
        assert_eq!(
            flow.respond(&AuthorizationState::WaitCode).unwrap(),
            Some(BackendCommand::CheckAuthenticationCode {
                code: "12345".to_string()
            })
        );
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let flow = AuthFlow::new(AuthSettings::default());
        for state in [
            AuthorizationState::WaitTdlibParameters,
            AuthorizationState::WaitPhoneNumber,
        ] {
            assert!(flow.respond(&state).unwrap_err().is_fatal());
        }
    }
}
