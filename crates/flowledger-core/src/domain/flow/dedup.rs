//! Endpoint-pair matching for batch reconciliation
//!
//! Two flows describe the same edge when their source and target identities
//! agree. Surrogate id, timestamps, lifecycle and display names are ignored.

use std::collections::{HashMap, HashSet};

use super::entity::{EntityKind, EntityReference, LogicalFlow};

/// Dedup key: the `(source, target)` identity pair of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub source_kind: EntityKind,
    pub source_id: i64,
    pub target_kind: EntityKind,
    pub target_id: i64,
}

impl FlowKey {
    pub fn new(source: &EntityReference, target: &EntityReference) -> Self {
        Self {
            source_kind: source.kind,
            source_id: source.id,
            target_kind: target.kind,
            target_id: target.id,
        }
    }

    pub fn of(flow: &LogicalFlow) -> Self {
        Self::new(&flow.source, &flow.target)
    }

    pub fn source(&self) -> EntityReference {
        EntityReference::new(self.source_kind, self.source_id)
    }

    pub fn target(&self) -> EntityReference {
        EntityReference::new(self.target_kind, self.target_id)
    }

    /// Key the given flows by endpoint pair; the first flow seen for a pair wins
    pub fn index<'a, I>(flows: I) -> HashMap<FlowKey, &'a LogicalFlow>
    where
        I: IntoIterator<Item = &'a LogicalFlow>,
    {
        let mut map = HashMap::new();
        for flow in flows {
            map.entry(Self::of(flow)).or_insert(flow);
        }
        map
    }
}

/// Whether two flows share the same endpoint identities
pub fn same_endpoints(a: &LogicalFlow, b: &LogicalFlow) -> bool {
    FlowKey::of(a) == FlowKey::of(b)
}

/// Flows from `candidates` whose endpoint pair is not in `exclude`
pub fn without_pairs<'a>(
    candidates: &'a [LogicalFlow],
    exclude: &'a HashSet<FlowKey>,
) -> impl Iterator<Item = &'a LogicalFlow> + 'a {
    candidates
        .iter()
        .filter(move |flow| !exclude.contains(&FlowKey::of(flow)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(source: EntityReference, target: EntityReference) -> LogicalFlow {
        LogicalFlow::new(source, target, "test")
    }

    #[test]
    fn test_same_endpoints_ignores_id_and_status() {
        let a = flow(EntityReference::application(1), EntityReference::actor(2)).with_id(1);
        let b = flow(
            EntityReference::application(1).with_name("Billing"),
            EntityReference::actor(2),
        )
        .with_id(99)
        .removed("someone", chrono::Utc::now());

        assert!(same_endpoints(&a, &b));
    }

    #[test]
    fn test_direction_and_kind_matter() {
        let a = flow(EntityReference::application(1), EntityReference::actor(2));
        let reversed = flow(EntityReference::actor(2), EntityReference::application(1));
        let other_kind = flow(EntityReference::actor(1), EntityReference::actor(2));

        assert!(!same_endpoints(&a, &reversed));
        assert!(!same_endpoints(&a, &other_kind));
    }

    #[test]
    fn test_index_keeps_first_per_pair() {
        let first = flow(EntityReference::application(1), EntityReference::application(2)).with_id(1);
        let dup = flow(EntityReference::application(1), EntityReference::application(2)).with_id(2);
        let other = flow(EntityReference::application(3), EntityReference::application(2)).with_id(3);
        let flows = vec![first, dup, other];

        let index = FlowKey::index(&flows);
        assert_eq!(index.len(), 2);
        let key = FlowKey::new(&EntityReference::application(1), &EntityReference::application(2));
        assert_eq!(index[&key].id, Some(1));
    }

    #[test]
    fn test_without_pairs() {
        let restored = flow(EntityReference::application(1), EntityReference::actor(2));
        let fresh = flow(EntityReference::application(3), EntityReference::actor(4));
        let inputs = vec![restored.clone(), fresh.clone()];
        let exclude: HashSet<FlowKey> = [FlowKey::of(&restored)].into_iter().collect();

        let remaining: Vec<_> = without_pairs(&inputs, &exclude).collect();
        assert_eq!(remaining.len(), 1);
        assert!(same_endpoints(remaining[0], &fresh));

        // The set is only borrowed, so it stays usable while the iterator is live
        let mut lazy = without_pairs(&inputs, &exclude);
        assert!(exclude.contains(&FlowKey::of(&restored)));
        assert!(lazy.next().is_some_and(|f| same_endpoints(f, &fresh)));
        assert!(lazy.next().is_none());
    }
}
