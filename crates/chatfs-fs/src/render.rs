//! Text views of stored messages.

use chatfs_shared::constants::{
    AUTHOR_SEPARATOR, DOUBLE_QUOTE_PREFIX, MESSAGE_FILE_EXT, QUOTE_PREFIX, WRAP_WIDTH,
};
use chatfs_shared::wrap;
use chatfs_store::MessageRecord;

/// Contents of a message file.
///
/// Outgoing bodies are bare and their quote gets one level of prefix.
/// Inbound bodies are quoted once and their quote twice, so that anything
/// the user types unprefixed reads as a reply.
pub fn render_message(message: &MessageRecord) -> String {
    let (body_prefix, quote_prefix) = if message.is_outgoing {
        ("", QUOTE_PREFIX)
    } else {
        (QUOTE_PREFIX, DOUBLE_QUOTE_PREFIX)
    };

    let mut out = String::new();
    if !message.quoted_text.is_empty() {
        out.push_str(&wrap(&message.quoted_text, quote_prefix, WRAP_WIDTH));
        out.push('\n');
    }
    out.push_str(&wrap(&message.text, body_prefix, WRAP_WIDTH));
    out.push('\n');
    out
}

/// Entry appended to a conversation's `out` log.
pub fn render_tail_entry(message: &MessageRecord) -> String {
    let mut out = String::new();
    if !message.quoted_text.is_empty() {
        out.push_str(&format!(
            "{} {AUTHOR_SEPARATOR} {QUOTE_PREFIX}{}\n",
            message.sender, message.quoted_text
        ));
    }
    out.push_str(&format!(
        "{} {AUTHOR_SEPARATOR} {}\n",
        message.sender, message.text
    ));
    out
}

/// Preferred file name: the send time in unix seconds.
pub fn message_file_name(message: &MessageRecord) -> String {
    format!("{}.{MESSAGE_FILE_EXT}", message.sent_at.timestamp())
}

/// Name used when the preferred one is taken by another message sent in the
/// same second.
pub fn disambiguated_file_name(message: &MessageRecord) -> String {
    format!(
        "{}-{}.{MESSAGE_FILE_EXT}",
        message.sent_at.timestamp(),
        message.id
    )
}

/// Keep only the lines the user added: every line starting with the quote
/// prefix is dropped, blank lines included in what stays. Trailing
/// newlines are trimmed.
pub fn strip_quoted(edited: &[u8]) -> String {
    let mut out = String::new();
    for line in edited.split(|b| *b == b'\n') {
        if line.starts_with(QUOTE_PREFIX.as_bytes()) {
            continue;
        }
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.trim_end_matches('\n').to_string()
}
