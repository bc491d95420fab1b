//! Logical flow entities
//!
//! A logical flow is a directed edge recording that data conceptually moves
//! from a source entity to a target entity. Flows are never physically
//! deleted: removal flips the lifecycle status and restoration flips it back,
//! keeping the original id and creation provenance.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Surrogate identifier of a logical flow
pub type FlowId = i64;

/// Kinds of architectural entity a flow endpoint can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Application,
    Actor,
    EndUserApplication,
    DataType,
    ChangeInitiative,
    Server,
    Database,
    Measurable,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Application,
        EntityKind::Actor,
        EntityKind::EndUserApplication,
        EntityKind::DataType,
        EntityKind::ChangeInitiative,
        EntityKind::Server,
        EntityKind::Database,
        EntityKind::Measurable,
    ];

    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "APPLICATION",
            Self::Actor => "ACTOR",
            Self::EndUserApplication => "END_USER_APPLICATION",
            Self::DataType => "DATA_TYPE",
            Self::ChangeInitiative => "CHANGE_INITIATIVE",
            Self::Server => "SERVER",
            Self::Database => "DATABASE",
            Self::Measurable => "MEASURABLE",
        }
    }

    /// Parse the stored representation
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
    }

    /// Whether display names can be resolved for this kind
    pub fn supports_name_resolution(&self) -> bool {
        matches!(self, Self::Application | Self::Actor)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::InvalidEntityKind(s.to_string()))
    }
}

/// Reference to an architectural entity
///
/// Identity is `(kind, id)`. The name is a read-time display value and takes
/// no part in equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityReference {
    pub kind: EntityKind,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntityReference {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id, name: None }
    }

    pub fn application(id: i64) -> Self {
        Self::new(EntityKind::Application, id)
    }

    pub fn actor(id: i64) -> Self {
        Self::new(EntityKind::Actor, id)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Copy of this reference without a display name
    pub fn identity(&self) -> Self {
        Self::new(self.kind, self.id)
    }
}

impl PartialEq for EntityReference {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl Eq for EntityReference {}

impl Hash for EntityReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityReference {
    type Err = Error;

    /// Parses `KIND:id`, e.g. `APPLICATION:12`
    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidEntityReference(s.to_string()))?;
        let kind = kind.trim().parse::<EntityKind>()?;
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::InvalidEntityReference(s.to_string()))?;
        Ok(Self::new(kind, id))
    }
}

/// Lifecycle of a flow edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    #[default]
    Active,
    Removed,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Removed => "REMOVED",
        }
    }

    /// Lenient read: anything other than `REMOVED` is treated as active
    pub fn from_stored(s: &str) -> Self {
        if s.eq_ignore_ascii_case("REMOVED") {
            Self::Removed
        } else {
            Self::Active
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who did something, and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTimestamp {
    pub by: String,
    pub at: DateTime<Utc>,
}

impl UserTimestamp {
    pub fn new(by: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self { by: by.into(), at }
    }

    pub fn now(by: impl Into<String>) -> Self {
        Self::new(by, Utc::now())
    }
}

/// A directed edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "LogicalFlowRepr", from = "LogicalFlowRepr")]
pub struct LogicalFlow {
    /// Assigned on first insert, stable across remove/restore cycles
    pub id: Option<FlowId>,
    pub source: EntityReference,
    pub target: EntityReference,
    pub lifecycle_status: LifecycleStatus,
    pub last_updated: UserTimestamp,
    pub last_attested: Option<UserTimestamp>,
    /// Immutable provenance of first creation
    pub created: UserTimestamp,
    /// Source-system tag
    pub provenance: String,
}

/// Default provenance tag for flows registered through this crate
pub const DEFAULT_PROVENANCE: &str = "flowledger";

impl LogicalFlow {
    /// A new, not yet persisted, active flow
    pub fn new(source: EntityReference, target: EntityReference, user: impl Into<String>) -> Self {
        let stamp = UserTimestamp::now(user);
        Self {
            id: None,
            source,
            target,
            lifecycle_status: LifecycleStatus::Active,
            last_updated: stamp.clone(),
            last_attested: None,
            created: stamp,
            provenance: DEFAULT_PROVENANCE.to_string(),
        }
    }

    pub fn with_id(mut self, id: FlowId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = provenance.into();
        self
    }

    pub fn with_created(mut self, created: UserTimestamp) -> Self {
        self.created = created;
        self
    }

    pub fn with_last_updated(mut self, last_updated: UserTimestamp) -> Self {
        self.last_updated = last_updated;
        self
    }

    /// Legacy boolean view of the lifecycle status
    pub fn is_removed(&self) -> bool {
        self.lifecycle_status.is_removed()
    }

    pub fn last_updated_by(&self) -> &str {
        &self.last_updated.by
    }

    /// Snapshot of this flow after removal by `user`
    pub fn removed(&self, user: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.transitioned(LifecycleStatus::Removed, user, at)
    }

    /// Snapshot of this flow after restoration by `user`
    ///
    /// Id, endpoints and created metadata are carried over untouched.
    pub fn restored(&self, user: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.transitioned(LifecycleStatus::Active, user, at)
    }

    fn transitioned(&self, status: LifecycleStatus, user: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            lifecycle_status: status,
            last_updated: UserTimestamp::new(user, at),
            ..self.clone()
        }
    }
}

/// Wire shape of a flow; carries the legacy `is_removed` flag
#[derive(Serialize, Deserialize)]
struct LogicalFlowRepr {
    #[serde(default)]
    id: Option<FlowId>,
    source: EntityReference,
    target: EntityReference,
    #[serde(default)]
    entity_lifecycle_status: LifecycleStatus,
    #[serde(default)]
    is_removed: bool,
    last_updated_by: String,
    last_updated_at: DateTime<Utc>,
    #[serde(default)]
    last_attested_by: Option<String>,
    #[serde(default)]
    last_attested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created: Option<UserTimestamp>,
    #[serde(default = "default_provenance")]
    provenance: String,
}

fn default_provenance() -> String {
    DEFAULT_PROVENANCE.to_string()
}

impl From<LogicalFlow> for LogicalFlowRepr {
    fn from(flow: LogicalFlow) -> Self {
        let (last_attested_by, last_attested_at) = match flow.last_attested {
            Some(UserTimestamp { by, at }) => (Some(by), Some(at)),
            None => (None, None),
        };
        Self {
            id: flow.id,
            is_removed: flow.lifecycle_status.is_removed(),
            entity_lifecycle_status: flow.lifecycle_status,
            source: flow.source,
            target: flow.target,
            last_updated_by: flow.last_updated.by,
            last_updated_at: flow.last_updated.at,
            last_attested_by,
            last_attested_at,
            created: Some(flow.created),
            provenance: flow.provenance,
        }
    }
}

impl From<LogicalFlowRepr> for LogicalFlow {
    fn from(repr: LogicalFlowRepr) -> Self {
        // The legacy flag wins when the two disagree on removal.
        let lifecycle_status = if repr.is_removed {
            LifecycleStatus::Removed
        } else {
            repr.entity_lifecycle_status
        };
        let last_updated = UserTimestamp::new(repr.last_updated_by, repr.last_updated_at);
        let last_attested = match (repr.last_attested_by, repr.last_attested_at) {
            (Some(by), Some(at)) => Some(UserTimestamp::new(by, at)),
            _ => None,
        };
        Self {
            id: repr.id,
            source: repr.source,
            target: repr.target,
            lifecycle_status,
            created: repr.created.unwrap_or_else(|| last_updated.clone()),
            last_updated,
            last_attested,
            provenance: repr.provenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("application"), Some(EntityKind::Application));
        assert_eq!(EntityKind::parse("PERSON"), None);
    }

    #[test]
    fn test_name_resolution_kinds() {
        assert!(EntityKind::Application.supports_name_resolution());
        assert!(EntityKind::Actor.supports_name_resolution());
        assert!(!EntityKind::DataType.supports_name_resolution());
    }

    #[test]
    fn test_entity_reference_identity_ignores_name() {
        let a = EntityReference::application(1).with_name("Payments");
        let b = EntityReference::application(1);
        let c = EntityReference::actor(1);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_entity_reference_parse() {
        let r: EntityReference = "APPLICATION:12".parse().unwrap();
        assert_eq!(r, EntityReference::application(12));
        assert_eq!(r.to_string(), "APPLICATION:12");

        assert!(matches!(
            "APPLICATION".parse::<EntityReference>(),
            Err(Error::InvalidEntityReference(_))
        ));
        assert!(matches!(
            "APPLICATION:abc".parse::<EntityReference>(),
            Err(Error::InvalidEntityReference(_))
        ));
        assert!(matches!(
            "WIDGET:1".parse::<EntityReference>(),
            Err(Error::InvalidEntityKind(_))
        ));
    }

    #[test]
    fn test_lenient_status_read() {
        assert_eq!(LifecycleStatus::from_stored("REMOVED"), LifecycleStatus::Removed);
        assert_eq!(LifecycleStatus::from_stored("ACTIVE"), LifecycleStatus::Active);
        assert_eq!(LifecycleStatus::from_stored("PENDING"), LifecycleStatus::Active);
    }

    #[test]
    fn test_remove_and_restore_snapshots() {
        let flow = LogicalFlow::new(EntityReference::application(1), EntityReference::actor(2), "alice")
            .with_id(100);
        let later = flow.created.at + Duration::minutes(5);

        let removed = flow.removed("bob", later);
        assert!(removed.is_removed());
        assert_eq!(removed.id, Some(100));
        assert_eq!(removed.created, flow.created);
        assert_eq!(removed.last_updated_by(), "bob");
        assert!(!flow.is_removed(), "original snapshot is untouched");

        let restored = removed.restored("carol", later + Duration::minutes(1));
        assert_eq!(restored.lifecycle_status, LifecycleStatus::Active);
        assert_eq!(restored.created, flow.created);
        assert_eq!(restored.last_updated_by(), "carol");
    }

    #[test]
    fn test_serialization_emits_legacy_flag() {
        let flow = LogicalFlow::new(EntityReference::application(1), EntityReference::actor(2), "alice")
            .with_id(7)
            .removed("alice", Utc::now());

        let json = serde_json::to_value(&flow).unwrap();
        assert_eq!(json["is_removed"], true);
        assert_eq!(json["entity_lifecycle_status"], "REMOVED");
        assert_eq!(json["source"]["kind"], "APPLICATION");

        let back: LogicalFlow = serde_json::from_value(json).unwrap();
        assert_eq!(back, flow);
    }

    #[test]
    fn test_deserialize_legacy_flag_only() {
        let json = serde_json::json!({
            "source": { "kind": "APPLICATION", "id": 1 },
            "target": { "kind": "ACTOR", "id": 2 },
            "is_removed": true,
            "last_updated_by": "alice",
            "last_updated_at": "2024-01-01T00:00:00Z"
        });

        let flow: LogicalFlow = serde_json::from_value(json).unwrap();
        assert!(flow.is_removed());
        assert_eq!(flow.created.by, "alice");
        assert_eq!(flow.provenance, DEFAULT_PROVENANCE);
    }
}
