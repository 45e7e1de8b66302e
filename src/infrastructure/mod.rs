//! Adapters behind the domain ports: simulation store backends and the
//! sandbox collaborators.

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod sandbox;
