//! Infrastructure layer
//!
//! Store-backed implementations of the domain repository traits.

pub mod flow;

pub use flow::SqliteLogicalFlowRepository;
