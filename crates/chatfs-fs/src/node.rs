//! Behaviors of the nodes in the chat tree.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use chatfs_shared::{BackendCommand, ChatId, MessageId};
use chatfs_store::MessageRecord;

use crate::context::NodeContext;
use crate::error::{FsError, Result};
use crate::ramfile::RamFile;
use crate::render::{render_message, strip_quoted};
use crate::taillog::TailLog;

/// Requested attribute changes. `None` leaves an attribute untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatChange {
    pub length: Option<u64>,
}

impl StatChange {
    pub fn truncate() -> Self {
        Self { length: Some(0) }
    }

    pub fn is_noop(&self) -> bool {
        self.length.is_none()
    }
}

pub enum Node {
    Root,
    Chat(ChatDir),
    Message(MessageFile),
    In(SendSink),
    Out(TailLog),
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Root | Node::Chat(_))
    }

    /// Permission bits, without the directory flag.
    pub fn permissions(&self) -> u32 {
        match self {
            Node::Root | Node::Chat(_) => 0o700,
            Node::Message(_) | Node::In(_) => 0o600,
            Node::Out(_) => 0o400,
        }
    }

    pub fn length(&self) -> u64 {
        match self {
            Node::Message(file) => file.len(),
            Node::Out(log) => log.len(),
            _ => 0,
        }
    }

    pub async fn read(&self, offset: u64, count: usize) -> Result<Vec<u8>> {
        match self {
            Node::Message(file) => Ok(file.read(offset, count)),
            Node::Out(log) => Ok(log.read(offset, count).await),
            Node::In(_) => Ok(Vec::new()),
            Node::Root | Node::Chat(_) => Err(FsError::NotSupported("read of a directory")),
        }
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        match self {
            Node::Message(file) => file.write(offset, data),
            Node::In(sink) => Ok(sink.write(data)),
            _ => Err(FsError::NotSupported("write")),
        }
    }

    pub fn write_stat(&self, change: StatChange) -> Result<()> {
        match (self, change.length) {
            (_, None) => Ok(()),
            (Node::Message(file), Some(0)) => {
                file.truncate();
                Ok(())
            }
            (Node::In(sink), Some(0)) => {
                sink.discard();
                Ok(())
            }
            (Node::Message(_) | Node::In(_), Some(_)) => Ok(()),
            _ => Err(FsError::NotSupported("wstat")),
        }
    }

    /// Called when the last open handle on the node is released.
    pub fn clunk(&self, ctx: &NodeContext) -> Result<()> {
        match self {
            Node::Message(file) => file.clunk(ctx),
            Node::In(sink) => {
                sink.flush(ctx);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat directory

pub struct ChatDir {
    chat_id: ChatId,
}

impl ChatDir {
    pub fn new(chat_id: ChatId) -> Self {
        Self { chat_id }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }
}

// ---------------------------------------------------------------------------
// Message file

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Unread,
    /// Read through the filesystem, the backend not told yet.
    ReadLocally,
    /// The backend was asked to mark it read.
    Acknowledged,
}

struct MessageState {
    contents: RamFile,
    modified: bool,
    read: ReadState,
}

pub struct MessageFile {
    id: MessageId,
    chat_id: ChatId,
    is_outgoing: bool,
    state: Mutex<MessageState>,
}

impl MessageFile {
    pub fn new(record: &MessageRecord) -> Self {
        Self {
            id: record.id,
            chat_id: record.chat_id,
            is_outgoing: record.is_outgoing,
            state: Mutex::new(MessageState {
                contents: RamFile::new(render_message(record).as_bytes()),
                modified: false,
                read: ReadState::Unread,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MessageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn len(&self) -> u64 {
        self.lock().contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contents(&self) -> Vec<u8> {
        self.lock().contents.contents().to_vec()
    }

    pub fn read_state(&self) -> ReadState {
        self.lock().read
    }

    pub fn read(&self, offset: u64, count: usize) -> Vec<u8> {
        let mut state = self.lock();
        let mut buf = vec![0u8; count];
        let result = state.contents.read_at(&mut buf, offset);
        buf.truncate(result.count);
        if result.count > 0 && state.read == ReadState::Unread {
            state.read = ReadState::ReadLocally;
        }
        buf
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let mut state = self.lock();
        let written = state.contents.write_at(data, offset)?;
        if written > 0 {
            state.modified = true;
        }
        Ok(written)
    }

    pub fn truncate(&self) {
        self.lock().contents.truncate();
    }

    /// Replace the contents with a fresh rendering. Read state and pending
    /// edits are left alone.
    pub fn replace_contents(&self, rendered: &str) {
        self.lock().contents = RamFile::new(rendered.as_bytes());
    }

    /// Acknowledge a local read and turn edits into a reply.
    ///
    /// Decisions are made under the node lock; commands and the store are
    /// touched only after it is released.
    pub fn clunk(&self, ctx: &NodeContext) -> Result<()> {
        let (acknowledge, edited) = {
            let mut state = self.lock();
            let acknowledge = state.read == ReadState::ReadLocally;
            if acknowledge {
                state.read = ReadState::Acknowledged;
            }
            let edited = if state.modified {
                state.modified = false;
                Some(strip_quoted(state.contents.contents()))
            } else {
                None
            };
            (acknowledge, edited)
        };

        if acknowledge {
            ctx.send(BackendCommand::mark_read(self.chat_id, self.id));
        }

        let Some(reply) = edited else {
            return Ok(());
        };
        if self.is_outgoing {
            debug!(message_id = %self.id, "Edit of an outgoing message discarded");
        } else if reply.trim().is_empty() {
            debug!(message_id = %self.id, "Edit left no reply text");
        } else {
            ctx.send(BackendCommand::send_text(self.chat_id, reply, Some(self.id)));
        }

        match ctx.view(|tx| Ok(tx.message(self.id)?))? {
            Some(record) => self.replace_contents(&render_message(&record)),
            None => warn!(message_id = %self.id, "Message vanished from the store"),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Send sink

/// Accumulates writes and sends them as one message on release.
pub struct SendSink {
    chat_id: ChatId,
    pending: Mutex<Vec<u8>>,
}

impl SendSink {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offsets are ignored; every write appends.
    pub fn write(&self, data: &[u8]) -> usize {
        self.lock().extend_from_slice(data);
        data.len()
    }

    pub fn discard(&self) {
        self.lock().clear();
    }

    pub fn flush(&self, ctx: &NodeContext) {
        let pending = std::mem::take(&mut *self.lock());
        if pending.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&pending).into_owned();
        ctx.send(BackendCommand::send_text(self.chat_id, text, None));
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;

    use chatfs_shared::protocol::InputMessageContent;
    use chatfs_store::Database;

    use super::*;

    fn record(is_outgoing: bool) -> MessageRecord {
        MessageRecord {
            id: MessageId(7),
            chat_id: ChatId(42),
            sent_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            sender: "ann".to_string(),
            quoted_text: String::new(),
            text: "hello".to_string(),
            is_outgoing,
        }
    }

    fn context(
        stored: Option<&MessageRecord>,
    ) -> (NodeContext, mpsc::UnboundedReceiver<BackendCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = NodeContext::new(Database::open_in_memory().unwrap(), tx);
        if let Some(record) = stored {
            ctx.update(|tx| Ok(tx.put_message(record)?)).unwrap();
        }
        (ctx, rx)
    }

    fn sent_text(command: BackendCommand) -> (ChatId, String, Option<MessageId>) {
        match command {
            BackendCommand::SendMessage {
                chat_id,
                reply_to_message_id,
                input_message_content: InputMessageContent::InputMessageText { text },
            } => (chat_id, text.text, reply_to_message_id),
            other => panic!("expected a send, got {other:?}"),
        }
    }

    #[test]
    fn read_then_clunk_marks_read_once() {
        let record = record(false);
        let (ctx, mut rx) = context(Some(&record));
        let file = MessageFile::new(&record);

        file.clunk(&ctx).unwrap();
        assert!(rx.try_recv().is_err());

        assert_eq!(file.read(0, 64), b"> hello\n");
        assert_eq!(file.read_state(), ReadState::ReadLocally);
        file.clunk(&ctx).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendCommand::mark_read(ChatId(42), MessageId(7))
        );

        file.read(0, 64);
        file.clunk(&ctx).unwrap();
        assert_eq!(file.read_state(), ReadState::Acknowledged);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_read_does_not_mark() {
        let record = record(false);
        let file = MessageFile::new(&record);
        assert!(file.read(100, 10).is_empty());
        assert!(file.read(0, 0).is_empty());
        assert_eq!(file.read_state(), ReadState::Unread);
    }

    #[test]
    fn edit_of_inbound_message_sends_reply() {
        let record = record(false);
        let (ctx, mut rx) = context(Some(&record));
        let file = MessageFile::new(&record);

        let len = file.len();
        file.write(len, b"sure thing\n").unwrap();
        file.clunk(&ctx).unwrap();

        let (chat, text, reply_to) = sent_text(rx.try_recv().unwrap());
        assert_eq!(chat, ChatId(42));
        assert_eq!(text, "sure thing");
        assert_eq!(reply_to, Some(MessageId(7)));
        assert_eq!(file.contents(), b"> hello\n");

        file.clunk(&ctx).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn edit_of_outgoing_message_is_discarded() {
        let record = record(true);
        let (ctx, mut rx) = context(Some(&record));
        let file = MessageFile::new(&record);

        file.write(0, b"rewritten\n").unwrap();
        file.clunk(&ctx).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(file.contents(), b"hello\n");
    }

    #[test]
    fn truncate_then_write_replaces_contents() {
        let record = record(false);
        let (ctx, mut rx) = context(Some(&record));
        let node = Node::Message(MessageFile::new(&record));

        node.write_stat(StatChange::truncate()).unwrap();
        assert_eq!(node.length(), 0);
        node.write(0, b"> hello\nthanks\n").unwrap();
        node.clunk(&ctx).unwrap();

        let (_, text, _) = sent_text(rx.try_recv().unwrap());
        assert_eq!(text, "thanks");
    }

    #[test]
    fn send_sink_sends_on_release() {
        let (ctx, mut rx) = context(None);
        let node = Node::In(SendSink::new(ChatId(42)));

        node.clunk(&ctx).unwrap();
        assert!(rx.try_recv().is_err());

        node.write(0, b"hi ").unwrap();
        node.write(0, b"there\n").unwrap();
        node.clunk(&ctx).unwrap();
        let (chat, text, reply_to) = sent_text(rx.try_recv().unwrap());
        assert_eq!((chat, text.as_str(), reply_to), (ChatId(42), "hi there\n", None));

        node.clunk(&ctx).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsupported_operations_are_rejected() {
        let out = Node::Out(TailLog::new());
        assert!(matches!(out.write(0, b"x"), Err(FsError::NotSupported(_))));
        assert!(matches!(
            out.write_stat(StatChange::truncate()),
            Err(FsError::NotSupported(_))
        ));
        assert!(matches!(
            Node::Root.read(0, 1).await,
            Err(FsError::NotSupported(_))
        ));
        let sink = Node::In(SendSink::new(ChatId(1)));
        assert!(sink.read(0, 1).await.unwrap().is_empty());
        assert!(sink.write_stat(StatChange { length: Some(9) }).is_ok());
        assert!(Node::Root.write_stat(StatChange::default()).is_ok());
    }
}
