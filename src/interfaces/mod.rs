//! Adapters that drive the engine from outside.

pub mod csv;
pub mod replay;
