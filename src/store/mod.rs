//! Token state: the canonical collection, the active pointer, and the
//! commands that mutate them.

pub mod token_store;

pub use token_store::{SyncState, TokenStore, TOKEN_LIST_KEY};
