//! Adapters behind the domain ports: stores, the mock chain and the
//! in-process message bus.

pub mod in_memory;
pub mod message_bus;
pub mod mock_chain;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
