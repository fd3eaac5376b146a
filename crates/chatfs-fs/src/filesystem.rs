use std::sync::Arc;

use tracing::{debug, info};

use chatfs_shared::constants::OUT_FILE_NAME;
use chatfs_store::{Database, MessageRecord};

use crate::context::{CommandSender, NodeContext};
use crate::error::{FsError, Result};
use crate::node::{Node, StatChange};
use crate::render::render_tail_entry;
use crate::tree::{Entry, Stat, Tree};

/// The chat tree together with the services its nodes use.
///
/// This is the surface a file-service transport drives: every operation
/// takes an [`Entry`] obtained from walking the tree.
pub struct ChatFs {
    tree: Tree,
    ctx: NodeContext,
}

impl ChatFs {
    pub fn new(db: Database, commands: CommandSender) -> Self {
        Self {
            tree: Tree::new(),
            ctx: NodeContext::new(db, commands),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn root(&self) -> Arc<Entry> {
        self.tree.root().clone()
    }

    pub fn stat(&self, entry: &Entry) -> Stat {
        entry.stat()
    }

    /// Register an open handle on `entry`.
    pub fn open(&self, entry: &Entry) {
        entry.acquire();
    }

    /// Release an open handle; the node's deferred effects run when the
    /// last one goes.
    pub fn clunk(&self, entry: &Entry) -> Result<()> {
        if entry.release() {
            entry.node().clunk(&self.ctx)
        } else {
            Ok(())
        }
    }

    pub async fn read(&self, entry: &Entry, offset: u64, count: usize) -> Result<Vec<u8>> {
        entry.node().read(offset, count).await
    }

    pub fn write(&self, entry: &Entry, offset: u64, data: &[u8]) -> Result<usize> {
        entry.node().write(offset, data)
    }

    pub fn write_stat(&self, entry: &Entry, change: StatChange) -> Result<()> {
        entry.node().write_stat(change)
    }

    pub fn remove(&self, entry: &Arc<Entry>) -> Result<()> {
        match entry.node() {
            Node::Root | Node::Out(_) => Err(FsError::NotSupported("remove")),
            // Lets `rm -r` through; the file stays with its directory.
            Node::In(_) => Ok(()),
            Node::Message(file) => {
                self.ctx
                    .update(|tx| Ok(tx.delete_message(file.id())?))?;
                self.tree.detach(entry);
                debug!(message_id = %file.id(), "Message removed");
                Ok(())
            }
            Node::Chat(_) => {
                if entry.has_message_children() {
                    return Err(FsError::NotEmpty);
                }
                self.ctx.update(|tx| Ok(tx.delete_chat(entry.name())?))?;
                self.tree.detach(entry);
                info!(handle = %entry.name(), "Chat directory removed");
                Ok(())
            }
        }
    }

    /// Give `record` a file under `chat` and, when the file is new, append
    /// its entry to the chat's `out` log.
    pub fn materialize(&self, chat: &Arc<Entry>, record: &MessageRecord) -> Arc<Entry> {
        let (entry, created) = self.tree.attach_message(chat, record);
        if created {
            if let Some(out) = chat.child(OUT_FILE_NAME) {
                if let Node::Out(log) = out.node() {
                    log.append(render_tail_entry(record).as_bytes());
                }
            }
        }
        entry
    }
}
