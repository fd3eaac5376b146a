//! # chatfs-fs
//!
//! The synthetic file tree of a chat account and the machinery keeping it
//! current.
//!
//! ```text
//! /
//! ├── ann/                 one directory per chat
//! │   ├── 1700000000.txt   one file per message
//! │   ├── in               write a message, sent on close
//! │   └── out              endless log of incoming messages
//! └── ...
//! ```
//!
//! [`ChatFs`] owns the tree and exposes the node operations a file-service
//! transport needs. [`Reconciler`] feeds it from the history store at
//! startup and from backend events afterwards.

pub mod auth;
pub mod context;
pub mod error;
pub mod filesystem;
pub mod node;
pub mod ramfile;
pub mod reconcile;
pub mod render;
pub mod taillog;
pub mod tree;

pub use auth::{AuthFlow, AuthSettings};
pub use context::{CommandSender, NodeContext};
pub use error::{AuthInput, FsError, Result};
pub use filesystem::ChatFs;
pub use node::{Node, StatChange};
pub use reconcile::Reconciler;
pub use tree::{Entry, Stat, Times, Tree};

/// Current time in unix seconds, as carried in file attributes.
pub(crate) fn unix_now() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}
