// Types, constants and wire documents shared by every chatfs crate.

pub mod constants;
pub mod document;
pub mod error;
pub mod protocol;
pub mod types;
pub mod wrap;

pub use document::Document;
pub use error::ProtocolError;
pub use protocol::{AuthorizationState, BackendCommand, BackendEvent, NewMessage, UserUpdate};
pub use types::{ChatId, MessageId, UserId};
pub use wrap::wrap;
