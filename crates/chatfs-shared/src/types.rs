use serde::{Deserialize, Serialize};

// Backend identifiers are 64-bit integers. Store keys use their decimal form.

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i64);

macro_rules! impl_id {
    ($($ty:ident),*) => {$(
        impl $ty {
            pub fn to_key(&self) -> String {
                self.0.to_string()
            }

            pub fn from_key(key: &str) -> Option<Self> {
                key.trim().parse().ok().map(Self)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    )*};
}

impl_id!(UserId, ChatId, MessageId);

/// Conversation ids and user ids share a namespace for private chats, so a
/// chat's handle is looked up by reinterpreting its id as a user id.
impl From<ChatId> for UserId {
    fn from(id: ChatId) -> Self {
        UserId(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_decimal() {
        assert_eq!(MessageId(-1234).to_key(), "-1234");
        assert_eq!(ChatId::from_key("42"), Some(ChatId(42)));
        assert_eq!(ChatId::from_key("ann"), None);
    }
}
