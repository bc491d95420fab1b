//! Logical flow registry domain
//!
//! Directed edges ("logical flows") between architectural entities, with a
//! soft-delete/restore lifecycle layered over a relational store.
//!
//! ## Lifecycle
//!
//! ```text
//!   add ──▶ ACTIVE ──remove──▶ REMOVED ──restore/add──▶ ACTIVE ──▶ ...
//! ```
//!
//! Rows are never physically deleted. Restoring reuses the original id and
//! creation metadata; only the lifecycle and last-updated fields change.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flowledger_core::domain::flow::{EntityReference, LogicalFlow, LogicalFlowRepository};
//!
//! let flow = LogicalFlow::new(EntityReference::application(1), EntityReference::actor(2), "alice");
//! let stored = repository.add_flow(&flow).await?;
//! repository.remove_flow(stored.id.unwrap(), "alice").await?;
//!
//! // Adding the same pair again brings the original record back
//! let again = repository.add_flow(&flow).await?;
//! assert_eq!(again.id, stored.id);
//! ```

mod dedup;
mod entity;
mod naming;
mod repository;
mod selector;

pub use dedup::{same_endpoints, without_pairs, FlowKey};
pub use entity::{
    EntityKind, EntityReference, FlowId, LifecycleStatus, LogicalFlow, UserTimestamp,
    DEFAULT_PROVENANCE,
};
pub use naming::{resolve_name, NameResolver, NoNameResolver, StaticNameResolver};
pub use repository::LogicalFlowRepository;
pub use selector::{IdSelector, SelectorFragment};
