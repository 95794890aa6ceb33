//! Storage engine
//!
//! The content-addressable on-disk layout, the in-memory repository cache
//! with write-behind metadata persistence, and the two-level reader/writer
//! locking protocol. `manager::RepositoryManager` is the single entry point
//! consumed by the HTTP layer; the submodules are its building blocks.

pub mod lock;
pub mod manager;
pub mod meta_store;
pub mod meta_writer;
pub mod pathing;
pub mod repository;
