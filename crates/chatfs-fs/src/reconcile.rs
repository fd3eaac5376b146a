//! Keeps the tree in step with the store and the backend's event stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chatfs_shared::{BackendEvent, ChatId, MessageId, NewMessage, UserId, UserUpdate};
use chatfs_store::MessageRecord;

use crate::auth::AuthFlow;
use crate::error::{FsError, Result};
use crate::filesystem::ChatFs;
use crate::node::Node;
use crate::render::render_message;
use crate::tree::Times;

pub struct Reconciler {
    fs: Arc<ChatFs>,
    auth: AuthFlow,
}

impl Reconciler {
    pub fn new(fs: Arc<ChatFs>, auth: AuthFlow) -> Self {
        Self { fs, auth }
    }

    /// Rebuild the tree from the store. Runs once, before the file service
    /// starts serving.
    pub fn load_history(&self) -> Result<()> {
        let (chats, messages, handles) = self.fs.context().view(|tx| {
            let chats = tx.list_chats()?;
            let messages = tx.list_messages()?;
            let mut handles: HashMap<ChatId, String> = HashMap::new();
            for message in &messages {
                if !handles.contains_key(&message.chat_id) {
                    let handle = tx
                        .user_handle(UserId::from(message.chat_id))?
                        .unwrap_or_else(|| message.chat_id.to_key());
                    handles.insert(message.chat_id, handle);
                }
            }
            Ok((chats, messages, handles))
        })?;

        let tree = self.fs.tree();
        for chat in &chats {
            tree.ensure_chat(&chat.handle, chat.chat_id, Times::default());
        }

        let mut skipped = 0usize;
        for message in &messages {
            let dir = handles
                .get(&message.chat_id)
                .and_then(|handle| tree.chat(handle));
            match dir {
                Some(dir) => {
                    self.fs.materialize(&dir, message);
                }
                None => skipped += 1,
            }
        }

        info!(
            chats = chats.len(),
            messages = messages.len() - skipped,
            skipped,
            "History loaded"
        );
        Ok(())
    }

    /// Decode and apply one raw backend document. Undecodable documents
    /// and non-fatal failures are logged and dropped.
    pub fn handle_raw(&self, raw: &str) -> Result<()> {
        if raw.trim().is_empty() {
            return Ok(());
        }
        let event = match BackendEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable backend document");
                return Ok(());
            }
        };
        match self.handle_event(event) {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "Failed to apply backend event");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    pub fn handle_event(&self, event: BackendEvent) -> Result<()> {
        match event {
            BackendEvent::UserUpdate(user) => self.update_user(&user),
            BackendEvent::NewMessage(message) => self.new_message(message),
            BackendEvent::MessageContent {
                message_id,
                new_text,
            } => self.message_content(message_id, &new_text),
            BackendEvent::AuthorizationState(state) => {
                if let Some(command) = self.auth.respond(&state)? {
                    self.fs.context().send(command);
                }
                Ok(())
            }
            BackendEvent::Unknown(kind) => {
                debug!(kind = %kind, "Ignoring backend event");
                Ok(())
            }
        }
    }

    fn update_user(&self, user: &UserUpdate) -> Result<()> {
        let Some(handle) = user.handle() else {
            warn!(user_id = %user.id, "User has no usable name");
            return Ok(());
        };
        self.fs
            .context()
            .update(|tx| Ok(tx.put_user_handle(user.id, &handle)?))?;
        debug!(user_id = %user.id, handle = %handle, "User handle stored");
        Ok(())
    }

    fn new_message(&self, message: NewMessage) -> Result<()> {
        if !message.is_plain() {
            debug!(kind = %message.kind, "Ignoring non-plain message");
            return Ok(());
        }

        let (record, handle) = self.fs.context().update(|tx| {
            let quoted_text = match message.reply_to {
                Some(target) => match tx.message(target)? {
                    Some(quoted) => quoted.text,
                    None => {
                        debug!(message_id = %target, "Reply target not in history");
                        String::new()
                    }
                },
                None => String::new(),
            };
            let sender = match message.sender_id {
                Some(id) => tx.user_handle(id)?.unwrap_or_else(|| id.to_key()),
                None => String::new(),
            };
            let known_handle = tx.user_handle(UserId::from(message.chat_id))?;

            let record = MessageRecord {
                id: message.id,
                chat_id: message.chat_id,
                sent_at: message.date,
                sender,
                quoted_text,
                text: message.text.clone(),
                is_outgoing: message.is_outgoing,
            };
            tx.put_message(&record)?;
            if let Some(handle) = &known_handle {
                tx.put_chat(handle, message.chat_id)?;
            }
            let handle = known_handle.unwrap_or_else(|| message.chat_id.to_key());
            Ok((record, handle))
        })?;

        let dir = self
            .fs
            .tree()
            .ensure_chat(&handle, record.chat_id, Times::now());
        self.fs.materialize(&dir, &record);
        debug!(message_id = %record.id, handle = %handle, "Message materialized");
        Ok(())
    }

    fn message_content(&self, id: MessageId, new_text: &str) -> Result<()> {
        let text = new_text.trim().to_string();
        let updated = self.fs.context().update(|tx| {
            let Some(mut record) = tx.message(id)? else {
                return Ok(None);
            };
            record.text = text;
            tx.put_message(&record)?;
            Ok(Some(record))
        })?;

        let Some(record) = updated else {
            debug!(message_id = %id, "Edit of a message not in history");
            return Ok(());
        };
        if let Some(entry) = self.fs.tree().message(id) {
            if let Node::Message(file) = entry.node() {
                file.replace_contents(&render_message(&record));
            }
        }
        Ok(())
    }
}

/// Apply backend documents until the stream ends or a fatal error occurs.
///
/// Blocking: run it on a dedicated thread. It returns
/// [`FsError::BackendClosed`] when the sender side is dropped.
pub fn run(reconciler: &Reconciler, mut events: mpsc::Receiver<String>) -> Result<()> {
    while let Some(raw) = events.blocking_recv() {
        reconciler.handle_raw(&raw)?;
    }
    Err(FsError::BackendClosed)
}
