//! Slate shared channel store.
//!
//! The only communication substrate between Slate nodes: a flat namespace
//! of named channels supporting whole-channel read, whole-channel replace,
//! listing by prefix and delete. There is no locking and no atomic append;
//! concurrent writers overwrite each other (last write wins).
//!
//! # Quick start
//!
//! ```rust
//! use slate_store::{ChannelStore, MemoryStore};
//!
//! # fn example() -> Result<(), slate_store::StoreError> {
//! let store = MemoryStore::new();
//! store.append_line("broadcast", "[2026-01-01 10:00:00] alice: hi (id:0a1b2c3d)")?;
//!
//! let data = store.read_full("broadcast")?.expect("channel exists");
//! assert!(data.starts_with(b"[2026-01-01"));
//! assert!(store.list_channels("broad")?.contains("broadcast"));
//! # Ok(())
//! # }
//! ```

mod config;
mod dir;
mod error;
mod memory;
mod store;

pub use config::DirStoreConfig;
pub use dir::DirStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{validate_channel, with_line_appended, ChannelStore};

pub use bytes::Bytes;

/// Environment variable overriding the default [`DirStore`] root.
pub const STORE_DIR_ENV: &str = "SLATE_STORE_DIR";
