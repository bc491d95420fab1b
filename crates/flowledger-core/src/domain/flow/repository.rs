//! Repository trait for logical flow persistence
//!
//! "Not found" is never an error: single lookups return `Option`, finders
//! return an empty `Vec`. Batch operations given an empty input return an
//! empty result without touching the store.

use async_trait::async_trait;

use crate::error::Result;

use super::entity::{EntityReference, FlowId, LogicalFlow};
use super::selector::IdSelector;

/// Storage operations and lifecycle transitions for flow edges
#[async_trait]
pub trait LogicalFlowRepository: Send + Sync {
    // ========== Lookups ==========

    /// Active flows where `reference` is the source or the target
    async fn find_by_entity_reference(&self, reference: &EntityReference) -> Result<Vec<LogicalFlow>>;

    /// The single active flow between `source` and `target`
    async fn get_by_source_and_target(
        &self,
        source: &EntityReference,
        target: &EntityReference,
    ) -> Result<Option<LogicalFlow>>;

    /// Active flows matching any of the given endpoint pairs
    async fn find_by_sources_and_targets(
        &self,
        pairs: &[(EntityReference, EntityReference)],
    ) -> Result<Vec<LogicalFlow>>;

    /// Active flows whose target is any of `references`
    async fn find_upstream_flows_for_entity_references(
        &self,
        references: &[EntityReference],
    ) -> Result<Vec<LogicalFlow>>;

    /// Flow by id, whatever its lifecycle status
    async fn get_by_flow_id(&self, id: FlowId) -> Result<Option<LogicalFlow>>;

    /// All flows with status `ACTIVE`
    async fn find_all_active(&self) -> Result<Vec<LogicalFlow>>;

    /// Flows among `ids` that are not removed
    async fn find_active_by_flow_ids(&self, ids: &[FlowId]) -> Result<Vec<LogicalFlow>>;

    /// Flows among `ids`, including removed ones
    async fn find_all_by_flow_ids(&self, ids: &[FlowId]) -> Result<Vec<LogicalFlow>>;

    /// Flows whose id is produced by `selector`
    ///
    /// Unlike the other finders this does not filter out removed flows.
    async fn find_by_selector(&self, selector: &IdSelector) -> Result<Vec<LogicalFlow>>;

    /// Number of flows that are not removed
    async fn count_active(&self) -> Result<u64>;

    // ========== Lifecycle ==========

    /// Mark a flow removed; returns the number of rows changed (0 or 1)
    async fn remove_flow(&self, id: FlowId, user: &str) -> Result<u64>;

    /// Restore-or-insert a single flow keyed by its endpoints
    ///
    /// The id on `flow` is ignored. A matching record is reactivated and
    /// returned; otherwise a new record is inserted.
    async fn add_flow(&self, flow: &LogicalFlow) -> Result<LogicalFlow>;

    /// Batch restore-or-insert; returns inserted flows followed by restored ones
    async fn add_flows(&self, flows: &[LogicalFlow], user: &str) -> Result<Vec<LogicalFlow>>;

    /// Reactivate a flow by id; true when exactly one row changed
    async fn restore_flow(&self, id: FlowId, user: &str) -> Result<bool>;

    // ========== Bulk maintenance ==========

    /// Remove flows with an application endpoint not produced by `active_application_ids`
    async fn cleanup_orphans(&self, active_application_ids: &IdSelector) -> Result<u64>;

    /// Remove flows whose source id equals their target id
    async fn cleanup_self_referencing_flows(&self) -> Result<u64>;
}
