//! Adapters behind the domain ports: storage backends, sandbox providers,
//! notification sinks and clocks.

pub mod clock;
pub mod in_memory;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod sandbox;
