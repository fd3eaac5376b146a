//! # chatfs-store
//!
//! Durable history for chatfs, backed by SQLite.
//!
//! Three collections survive restarts: user id -> handle, chat handle ->
//! chat id, and message id -> message record. All access goes through
//! [`Database::update`] and [`Database::view`], which run the caller's
//! closure inside a single transaction and hand it a [`Tx`] with typed
//! helpers for each collection.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::{Database, Tx};
pub use error::StoreError;
pub use models::*;
