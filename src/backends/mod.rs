//! Backend interfaces and implementations for run storage, squashable
//! counters, and the fast-path stats cache.

mod base;
mod memory;

pub use base::{
    BackendError, BackendResult, RunCountBackend, RunStoreBackend, SquashSummary,
    StatsCacheBackend,
};
pub use memory::MemoryBackend;
