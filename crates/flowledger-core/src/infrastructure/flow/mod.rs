//! SQLite-backed logical flow storage

mod repository;

pub use repository::SqliteLogicalFlowRepository;
