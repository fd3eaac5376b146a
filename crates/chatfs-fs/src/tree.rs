//! The in-memory hierarchy: root, one directory per chat, and the files
//! inside each directory.
//!
//! Each directory guards its children with its own lock. A message index
//! maps backend message ids to their files; when both are needed the index
//! lock is always taken before a directory's.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chatfs_shared::constants::{IN_FILE_NAME, OUT_FILE_NAME};
use chatfs_shared::{ChatId, MessageId};
use chatfs_store::MessageRecord;

use crate::node::{ChatDir, MessageFile, Node, SendSink};
use crate::render::{disambiguated_file_name, message_file_name, render_message};
use crate::taillog::TailLog;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Times {
    pub mtime: u32,
    pub atime: u32,
}

impl Times {
    pub fn at(seconds: u32) -> Self {
        Self {
            mtime: seconds,
            atime: seconds,
        }
    }

    pub fn now() -> Self {
        Self::at(crate::unix_now())
    }
}

/// Attributes reported for an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub qid_path: u64,
    pub name: String,
    pub is_dir: bool,
    pub permissions: u32,
    pub length: u64,
    pub mtime: u32,
    pub atime: u32,
}

pub struct Entry {
    qid_path: u64,
    name: String,
    node: Node,
    parent: Weak<Entry>,
    times: Mutex<Times>,
    children: RwLock<BTreeMap<String, Arc<Entry>>>,
    opens: AtomicUsize,
}

impl Entry {
    fn new(qid_path: u64, name: &str, node: Node, parent: Weak<Entry>, times: Times) -> Self {
        Self {
            qid_path,
            name: name.to_string(),
            node,
            parent,
            times: Mutex::new(times),
            children: RwLock::new(BTreeMap::new()),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn qid_path(&self) -> u64 {
        self.qid_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn parent(&self) -> Option<Arc<Entry>> {
        self.parent.upgrade()
    }

    pub fn is_dir(&self) -> bool {
        self.node.is_dir()
    }

    pub fn times(&self) -> Times {
        *self.times.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise both timestamps to at least `seconds`.
    pub fn raise_times(&self, seconds: u32) {
        let mut times = self.times.lock().unwrap_or_else(PoisonError::into_inner);
        times.mtime = times.mtime.max(seconds);
        times.atime = times.atime.max(seconds);
    }

    pub fn stat(&self) -> Stat {
        let times = match &self.node {
            Node::Out(log) => Times::at(log.mtime()),
            _ => self.times(),
        };
        Stat {
            qid_path: self.qid_path,
            name: self.name.clone(),
            is_dir: self.is_dir(),
            permissions: self.node.permissions(),
            length: self.node.length(),
            mtime: times.mtime,
            atime: times.atime,
        }
    }

    pub fn child(&self, name: &str) -> Option<Arc<Entry>> {
        read(&self.children).get(name).cloned()
    }

    /// Snapshot of the children in name order.
    pub fn children(&self) -> Vec<Arc<Entry>> {
        read(&self.children).values().cloned().collect()
    }

    pub fn has_message_children(&self) -> bool {
        read(&self.children)
            .values()
            .any(|child| matches!(child.node, Node::Message(_)))
    }

    pub(crate) fn acquire(&self) {
        self.opens.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one open handle; true when it was the last one.
    pub(crate) fn release(&self) -> bool {
        self.opens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|previous| previous == 1)
            .unwrap_or(false)
    }

    pub fn open_handles(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }
}

pub struct Tree {
    root: Arc<Entry>,
    next_qid_path: AtomicU64,
    messages: RwLock<HashMap<MessageId, Arc<Entry>>>,
}

impl Tree {
    pub fn new() -> Self {
        Self {
            root: Arc::new(Entry::new(0, "/", Node::Root, Weak::new(), Times::now())),
            next_qid_path: AtomicU64::new(1),
            messages: RwLock::new(HashMap::new()),
        }
    }

    fn allocate_qid_path(&self) -> u64 {
        self.next_qid_path.fetch_add(1, Ordering::Relaxed)
    }

    pub fn root(&self) -> &Arc<Entry> {
        &self.root
    }

    pub fn chat(&self, handle: &str) -> Option<Arc<Entry>> {
        self.root.child(handle)
    }

    /// Resolve a slash-separated path below the root.
    pub fn lookup(&self, path: &str) -> Option<Arc<Entry>> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self.root.clone(), |entry, part| entry.child(part))
    }

    /// Return the directory for `handle`, creating it with its `in` and
    /// `out` files when missing. A new directory is complete before it
    /// becomes visible.
    pub fn ensure_chat(&self, handle: &str, chat_id: ChatId, times: Times) -> Arc<Entry> {
        let mut chats = write(&self.root.children);
        if let Some(existing) = chats.get(handle) {
            return existing.clone();
        }

        let dir = Arc::new(Entry::new(
            self.allocate_qid_path(),
            handle,
            Node::Chat(ChatDir::new(chat_id)),
            Arc::downgrade(&self.root),
            times,
        ));
        {
            let mut files = write(&dir.children);
            for (name, node) in [
                (IN_FILE_NAME, Node::In(SendSink::new(chat_id))),
                (OUT_FILE_NAME, Node::Out(TailLog::new())),
            ] {
                let file = Entry::new(
                    self.allocate_qid_path(),
                    name,
                    node,
                    Arc::downgrade(&dir),
                    times,
                );
                files.insert(name.to_string(), Arc::new(file));
            }
        }
        chats.insert(handle.to_string(), dir.clone());
        dir
    }

    pub fn message(&self, id: MessageId) -> Option<Arc<Entry>> {
        read(&self.messages).get(&id).cloned()
    }

    /// Attach a file for `record` under `chat`. An id that is already
    /// materialized is re-rendered in place; the flag tells whether a new
    /// file was created.
    pub fn attach_message(&self, chat: &Arc<Entry>, record: &MessageRecord) -> (Arc<Entry>, bool) {
        let mut index = write(&self.messages);
        if let Some(existing) = index.get(&record.id) {
            if let Node::Message(file) = existing.node() {
                file.replace_contents(&render_message(record));
            }
            return (existing.clone(), false);
        }

        let seconds = unix_seconds(record);
        let mut files = write(&chat.children);
        let mut name = message_file_name(record);
        if files.contains_key(&name) {
            name = disambiguated_file_name(record);
        }
        let entry = Arc::new(Entry::new(
            self.allocate_qid_path(),
            &name,
            Node::Message(MessageFile::new(record)),
            Arc::downgrade(chat),
            Times::at(seconds),
        ));
        files.insert(name, entry.clone());
        index.insert(record.id, entry.clone());
        drop(files);
        drop(index);

        chat.raise_times(seconds);
        (entry, true)
    }

    /// Remove `entry` from its parent, forgetting any message ids below it.
    pub fn detach(&self, entry: &Arc<Entry>) -> bool {
        let mut index = write(&self.messages);
        let Some(parent) = entry.parent() else {
            return false;
        };
        let mut siblings = write(&parent.children);
        match siblings.get(entry.name()) {
            Some(current) if Arc::ptr_eq(current, entry) => {}
            _ => return false,
        }
        siblings.remove(entry.name());
        drop(siblings);

        forget(&mut index, entry);
        true
    }

    pub fn message_count(&self) -> usize {
        read(&self.messages).len()
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

fn forget(index: &mut HashMap<MessageId, Arc<Entry>>, entry: &Arc<Entry>) {
    if let Node::Message(file) = entry.node() {
        if index.get(&file.id()).is_some_and(|e| Arc::ptr_eq(e, entry)) {
            index.remove(&file.id());
        }
    }
    for child in entry.children() {
        forget(index, &child);
    }
}

pub(crate) fn unix_seconds(record: &MessageRecord) -> u32 {
    record.sent_at.timestamp().clamp(0, u32::MAX as i64) as u32
}
