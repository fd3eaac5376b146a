//! 9P2000 file service for the chat tree.

pub mod codec;
pub mod server;

pub use server::serve;
