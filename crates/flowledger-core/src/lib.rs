//! flowledger Core Library
//!
//! Registry of directed "logical flows" between architectural entities:
//! - Domain model (entity references, flows, lifecycle, dedup matching)
//! - Repository trait with a SQLite implementation
//! - Reconciliation sweeps (orphaned and self-referencing flows)
//! - Storage (SQLite pool + versioned migrations)
//! - Configuration

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod reconciliation;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::flow::{
        EntityKind, EntityReference, FlowId, IdSelector, LifecycleStatus, LogicalFlow,
        LogicalFlowRepository,
    };
    pub use crate::error::{Error, Result};
    pub use crate::infrastructure::SqliteLogicalFlowRepository;
    pub use crate::reconciliation::{FlowReconciler, ReconciliationJob, ReconciliationReport};
    pub use crate::storage::{Database, DatabaseConfig};
}
