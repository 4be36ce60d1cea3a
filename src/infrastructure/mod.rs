//! Adapters implementing the domain ports.

pub mod in_memory;
pub mod in_memory_bus;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
