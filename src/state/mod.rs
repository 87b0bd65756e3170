//! State management module
//!
//! This module handles the feed and everything it is built from:
//! - Shared data structures and feed ordering (data.rs)
//! - The SQLite content store and its query contract (library.rs)
//! - Directory import into the content store (indexer.rs)
//! - Background library scans (loader.rs)
//! - The observable feed with its preview slot (feed.rs)

pub mod data;
pub mod feed;
pub mod indexer;
pub mod library;
pub mod loader;
