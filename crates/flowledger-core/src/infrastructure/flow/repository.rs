//! SQLite implementation of the LogicalFlowRepository
//!
//! Dynamic disjunctions (batch pair lookups, kind-partitioned upstream
//! lookups) are assembled with `QueryBuilder` so every value is bound. Each
//! batch path returns early on empty input, before any condition is built.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info, warn};

use crate::domain::flow::{
    resolve_name, without_pairs, EntityKind, EntityReference, FlowId, FlowKey, IdSelector,
    LifecycleStatus, LogicalFlow, LogicalFlowRepository, NameResolver, NoNameResolver,
    SelectorFragment, UserTimestamp,
};
use crate::error::{Error, Result};

const FLOW_COLUMNS: &str = "id, source_entity_kind, source_entity_id, target_entity_kind, \
     target_entity_id, entity_lifecycle_status, is_removed, last_updated_by, last_updated_at, \
     last_attested_by, last_attested_at, created_by, created_at, provenance";

/// Neither the status nor the legacy flag marks the row removed
const NOT_REMOVED: &str = "(is_removed = 0 AND entity_lifecycle_status != 'REMOVED')";

/// Status-only filter used by the maintenance sweeps
const STATUS_NOT_REMOVED: &str = "entity_lifecycle_status != 'REMOVED'";

/// SQLite implementation of the logical flow repository
#[derive(Clone)]
pub struct SqliteLogicalFlowRepository {
    pool: SqlitePool,
    names: Arc<dyn NameResolver>,
}

impl SqliteLogicalFlowRepository {
    /// Create a repository that does not resolve endpoint names
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_name_resolver(pool, Arc::new(NoNameResolver))
    }

    /// Create a repository that attaches endpoint names on read
    pub fn with_name_resolver(pool: SqlitePool, names: Arc<dyn NameResolver>) -> Self {
        Self { pool, names }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(&self, mut query: QueryBuilder<'_, Sqlite>) -> Result<Vec<LogicalFlow>> {
        let rows: Vec<FlowRow> = query.build_query_as().fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }

    async fn hydrate(&self, rows: Vec<FlowRow>) -> Result<Vec<LogicalFlow>> {
        let mut flows = Vec::with_capacity(rows.len());
        for row in rows {
            flows.push(self.with_names(row.into_flow()?).await?);
        }
        Ok(flows)
    }

    async fn with_names(&self, flow: LogicalFlow) -> Result<LogicalFlow> {
        let source = resolve_name(self.names.as_ref(), flow.source.identity()).await?;
        let target = resolve_name(self.names.as_ref(), flow.target.identity()).await?;
        Ok(LogicalFlow { source, target, ..flow })
    }

    /// Reactivate the record for the flow's endpoint pair
    ///
    /// Prefers an already-active row (only its last-updated stamp changes),
    /// otherwise the oldest removed one. True when a row was updated.
    async fn restore_by_endpoints(&self, flow: &LogicalFlow, user: &str) -> Result<bool> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "UPDATE logical_flows SET entity_lifecycle_status = 'ACTIVE', is_removed = 0, last_updated_by = ",
        );
        query
            .push_bind(user.to_string())
            .push(", last_updated_at = ")
            .push_bind(format_timestamp(&Utc::now()))
            .push(" WHERE id = (SELECT id FROM logical_flows WHERE ");
        push_pair_condition(&mut query, &flow.source, &flow.target);
        query.push(format!(" ORDER BY CASE WHEN {NOT_REMOVED} THEN 0 ELSE 1 END, id LIMIT 1)"));

        let result = query.build().execute(&self.pool).await.map_err(Error::from_store)?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_and_return(&self, flow: &LogicalFlow) -> Result<LogicalFlow> {
        let flow = as_new_flow(flow);
        let id = insert_flow(&self.pool, &flow).await?;
        info!(flow_id = id, source = %flow.source, target = %flow.target, "Logical flow created");
        self.with_names(flow.with_id(id)).await
    }

    async fn canonical_for(&self, flow: &LogicalFlow) -> Result<LogicalFlow> {
        self.get_by_source_and_target(&flow.source, &flow.target)
            .await?
            .ok_or_else(|| {
                Error::Other(format!(
                    "Flow from {} to {} was restored but could not be read back",
                    flow.source, flow.target
                ))
            })
    }

    /// One restore-or-insert pass over a batch, in a single transaction
    ///
    /// Per requested pair the existing active row wins, otherwise the oldest
    /// removed one. Those rows are stamped (and reactivated) in one UPDATE;
    /// every other pair is inserted.
    async fn add_flows_once(&self, flows: &[LogicalFlow], user: &str) -> Result<Vec<LogicalFlow>> {
        let mut tx = self.pool.begin().await?;

        let mut query = base_query();
        push_any_pair_condition(&mut query, flows.iter().map(|f| (&f.source, &f.target)));
        query.push(format!(" ORDER BY CASE WHEN {NOT_REMOVED} THEN 0 ELSE 1 END, id"));
        let rows: Vec<FlowRow> = query.build_query_as().fetch_all(&mut *tx).await?;
        let existing = rows
            .into_iter()
            .map(FlowRow::into_flow)
            .collect::<Result<Vec<_>>>()?;

        let by_pair = FlowKey::index(&existing);
        let reused_ids: Vec<FlowId> = by_pair.values().filter_map(|f| f.id).collect();
        let restored_at = Utc::now();

        if !reused_ids.is_empty() {
            let mut update = QueryBuilder::<Sqlite>::new(
                "UPDATE logical_flows SET entity_lifecycle_status = 'ACTIVE', is_removed = 0, last_updated_by = ",
            );
            update
                .push_bind(user.to_string())
                .push(", last_updated_at = ")
                .push_bind(format_timestamp(&restored_at))
                .push(" WHERE id IN ");
            push_id_list(&mut update, reused_ids.iter().copied());
            update.build().execute(&mut *tx).await.map_err(Error::from_store)?;
        }

        let reused_pairs: HashSet<FlowKey> = by_pair.keys().copied().collect();
        let mut seen = reused_pairs.clone();
        let mut added = Vec::new();
        for flow in without_pairs(flows, &reused_pairs) {
            if !seen.insert(FlowKey::of(flow)) {
                continue;
            }
            let flow = as_new_flow(flow);
            let id = insert_flow(&mut *tx, &flow).await?;
            added.push(flow.with_id(id));
        }

        tx.commit().await?;

        let reactivated = by_pair.values().filter(|f| f.is_removed()).count();
        let mut reused: Vec<LogicalFlow> = by_pair
            .values()
            .map(|f| f.restored(user, restored_at))
            .collect();
        reused.sort_by_key(|f| f.id);

        info!(
            inserted = added.len(),
            restored = reactivated,
            refreshed = reused.len() - reactivated,
            user,
            "Batch of logical flows added"
        );

        let mut result = Vec::with_capacity(added.len() + reused.len());
        for flow in added.into_iter().chain(reused) {
            result.push(self.with_names(flow).await?);
        }
        Ok(result)
    }

    /// Select the ids matching a sweep condition, log them, then remove them in one UPDATE
    async fn sweep<F>(&self, job: &str, reason: &str, push_condition: F) -> Result<u64>
    where
        F: for<'q> Fn(&mut QueryBuilder<'q, Sqlite>),
    {
        let mut tx = self.pool.begin().await?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT id FROM logical_flows WHERE ");
        push_condition(&mut select);
        select.push(" ORDER BY id");
        let flow_ids: Vec<i64> = select.build_query_scalar().fetch_all(&mut *tx).await?;

        info!(job, flow_ids = ?flow_ids, "{}", reason);

        let mut update = QueryBuilder::<Sqlite>::new(
            "UPDATE logical_flows SET entity_lifecycle_status = 'REMOVED', is_removed = 1 WHERE ",
        );
        push_condition(&mut update);
        let result = update.build().execute(&mut *tx).await.map_err(Error::from_store)?;

        tx.commit().await?;

        let affected = result.rows_affected();
        if affected != flow_ids.len() as u64 {
            warn!(job, selected = flow_ids.len(), affected, "Sweep affected a different number of rows than selected");
        }
        Ok(affected)
    }
}

#[async_trait]
impl LogicalFlowRepository for SqliteLogicalFlowRepository {
    // ========== Lookups ==========

    async fn find_by_entity_reference(&self, reference: &EntityReference) -> Result<Vec<LogicalFlow>> {
        let mut query = base_query();
        query.push("(");
        push_source_condition(&mut query, reference);
        query.push(" OR ");
        push_target_condition(&mut query, reference);
        query.push(") AND ").push(NOT_REMOVED);

        let flows = self.fetch(query).await?;
        debug!(entity = %reference, count = flows.len(), "Found flows for entity");
        Ok(flows)
    }

    async fn get_by_source_and_target(
        &self,
        source: &EntityReference,
        target: &EntityReference,
    ) -> Result<Option<LogicalFlow>> {
        let mut query = base_query();
        push_pair_condition(&mut query, source, target);
        query.push(" AND ").push(NOT_REMOVED).push(" LIMIT 2");

        let mut flows = self.fetch(query).await?;
        if flows.len() > 1 {
            return Err(Error::DuplicateActiveFlow {
                from: source.to_string(),
                to: target.to_string(),
            });
        }
        Ok(flows.pop())
    }

    async fn find_by_sources_and_targets(
        &self,
        pairs: &[(EntityReference, EntityReference)],
    ) -> Result<Vec<LogicalFlow>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = base_query();
        push_any_pair_condition(&mut query, pairs.iter().map(|(s, t)| (s, t)));
        query.push(" AND ").push(NOT_REMOVED);

        self.fetch(query).await
    }

    async fn find_upstream_flows_for_entity_references(
        &self,
        references: &[EntityReference],
    ) -> Result<Vec<LogicalFlow>> {
        if references.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids_by_kind: BTreeMap<EntityKind, BTreeSet<i64>> = BTreeMap::new();
        for reference in references {
            ids_by_kind.entry(reference.kind).or_default().insert(reference.id);
        }

        // One "kind = K AND id IN (...)" clause per distinct kind
        let mut query = base_query();
        query.push("(");
        for (i, (kind, ids)) in ids_by_kind.iter().enumerate() {
            if i > 0 {
                query.push(" OR ");
            }
            query
                .push("(target_entity_kind = ")
                .push_bind(kind.as_str())
                .push(" AND target_entity_id IN ");
            push_id_list(&mut query, ids.iter().copied());
            query.push(")");
        }
        query.push(") AND ").push(NOT_REMOVED);

        let flows = self.fetch(query).await?;
        debug!(kinds = ids_by_kind.len(), count = flows.len(), "Found upstream flows");
        Ok(flows)
    }

    async fn get_by_flow_id(&self, id: FlowId) -> Result<Option<LogicalFlow>> {
        let mut query = base_query();
        query.push("id = ").push_bind(id);

        let row: Option<FlowRow> = query.build_query_as().fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(self.with_names(row.into_flow()?).await?)),
            None => Ok(None),
        }
    }

    async fn find_all_active(&self) -> Result<Vec<LogicalFlow>> {
        let mut query = base_query();
        query
            .push("entity_lifecycle_status = ")
            .push_bind(LifecycleStatus::Active.as_str())
            .push(" AND is_removed = 0");
        self.fetch(query).await
    }

    async fn find_active_by_flow_ids(&self, ids: &[FlowId]) -> Result<Vec<LogicalFlow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = base_query();
        query.push("id IN ");
        push_id_list(&mut query, ids.iter().copied());
        query.push(" AND ").push(NOT_REMOVED);
        self.fetch(query).await
    }

    async fn find_all_by_flow_ids(&self, ids: &[FlowId]) -> Result<Vec<LogicalFlow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = base_query();
        query.push("id IN ");
        push_id_list(&mut query, ids.iter().copied());
        self.fetch(query).await
    }

    async fn find_by_selector(&self, selector: &IdSelector) -> Result<Vec<LogicalFlow>> {
        // No lifecycle filter here: callers decide which ids they want.
        let mut query = base_query();
        query.push("id IN (");
        push_selector(&mut query, selector);
        query.push(")");
        self.fetch(query).await
    }

    async fn count_active(&self) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM logical_flows WHERE {NOT_REMOVED}"))
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    // ========== Lifecycle ==========

    async fn remove_flow(&self, id: FlowId, user: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE logical_flows
            SET entity_lifecycle_status = 'REMOVED', is_removed = 1,
                last_updated_at = ?, last_updated_by = ?
            WHERE id = ? AND {NOT_REMOVED}
            "#
        ))
        .bind(format_timestamp(&Utc::now()))
        .bind(user)
        .bind(id)
        .execute(&self.pool)
        .await?;

        let affected = result.rows_affected();
        if affected > 0 {
            info!(flow_id = id, user, "Logical flow removed");
        } else {
            debug!(flow_id = id, "No active flow to remove");
        }
        Ok(affected)
    }

    async fn add_flow(&self, flow: &LogicalFlow) -> Result<LogicalFlow> {
        let user = flow.last_updated_by();

        if self.restore_by_endpoints(flow, user).await? {
            info!(source = %flow.source, target = %flow.target, user, "Logical flow restored");
            return self.canonical_for(flow).await;
        }

        match self.insert_and_return(flow).await {
            Err(Error::ConstraintViolation(reason)) => {
                // A concurrent add for the same pair got there first; restoring now
                // picks up its active row.
                warn!(source = %flow.source, target = %flow.target, %reason, "Insert collided, retrying as restore");
                if self.restore_by_endpoints(flow, user).await? {
                    self.canonical_for(flow).await
                } else {
                    Err(Error::ConstraintViolation(reason))
                }
            }
            other => other,
        }
    }

    async fn add_flows(&self, flows: &[LogicalFlow], user: &str) -> Result<Vec<LogicalFlow>> {
        if flows.is_empty() {
            return Ok(Vec::new());
        }

        match self.add_flows_once(flows, user).await {
            Err(Error::ConstraintViolation(reason)) => {
                // Another writer inserted one of the new pairs after the lookup; the
                // second pass finds its row and refreshes it instead.
                warn!(count = flows.len(), %reason, "Batch insert collided, retrying");
                self.add_flows_once(flows, user).await
            }
            other => other,
        }
    }

    async fn restore_flow(&self, id: FlowId, user: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE logical_flows
            SET entity_lifecycle_status = 'ACTIVE', is_removed = 0,
                last_updated_by = ?, last_updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(user)
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::from_store)?;

        let restored = result.rows_affected() == 1;
        if restored {
            info!(flow_id = id, user, "Logical flow restored");
        }
        Ok(restored)
    }

    // ========== Bulk maintenance ==========

    async fn cleanup_orphans(&self, active_application_ids: &IdSelector) -> Result<u64> {
        self.sweep(
            "cleanup_orphans",
            "Marking flows removed as one or both application endpoints no longer exist",
            |query| {
                let application = EntityKind::Application.as_str();
                query
                    .push(STATUS_NOT_REMOVED)
                    .push(" AND ((source_entity_kind = ")
                    .push_bind(application)
                    .push(" AND source_entity_id NOT IN (");
                push_selector(query, active_application_ids);
                query
                    .push(")) OR (target_entity_kind = ")
                    .push_bind(application)
                    .push(" AND target_entity_id NOT IN (");
                push_selector(query, active_application_ids);
                query.push(")))");
            },
        )
        .await
    }

    async fn cleanup_self_referencing_flows(&self) -> Result<u64> {
        // The kind check compares the target kind with itself, so any flow whose
        // source id equals its target id matches, regardless of kinds.
        self.sweep(
            "cleanup_self_referencing_flows",
            "Marking self-referencing flows removed",
            |query| {
                query.push(STATUS_NOT_REMOVED).push(
                    " AND source_entity_id = target_entity_id \
                     AND target_entity_kind = target_entity_kind",
                );
            },
        )
        .await
    }
}

// ========== Query helpers ==========

fn base_query<'q>() -> QueryBuilder<'q, Sqlite> {
    QueryBuilder::new(format!("SELECT {FLOW_COLUMNS} FROM logical_flows WHERE "))
}

fn push_source_condition(query: &mut QueryBuilder<'_, Sqlite>, reference: &EntityReference) {
    query
        .push("(source_entity_id = ")
        .push_bind(reference.id)
        .push(" AND source_entity_kind = ")
        .push_bind(reference.kind.as_str())
        .push(")");
}

fn push_target_condition(query: &mut QueryBuilder<'_, Sqlite>, reference: &EntityReference) {
    query
        .push("(target_entity_id = ")
        .push_bind(reference.id)
        .push(" AND target_entity_kind = ")
        .push_bind(reference.kind.as_str())
        .push(")");
}

fn push_pair_condition(
    query: &mut QueryBuilder<'_, Sqlite>,
    source: &EntityReference,
    target: &EntityReference,
) {
    push_source_condition(query, source);
    query.push(" AND ");
    push_target_condition(query, target);
}

/// `((pair 1) OR (pair 2) ...)`; callers guarantee at least one pair
fn push_any_pair_condition<'r, I>(query: &mut QueryBuilder<'_, Sqlite>, pairs: I)
where
    I: IntoIterator<Item = (&'r EntityReference, &'r EntityReference)>,
{
    query.push("(");
    for (i, (source, target)) in pairs.into_iter().enumerate() {
        if i > 0 {
            query.push(" OR ");
        }
        query.push("(");
        push_pair_condition(query, source, target);
        query.push(")");
    }
    query.push(")");
}

/// `(?, ?, ...)`; callers guarantee at least one id
fn push_id_list<I>(query: &mut QueryBuilder<'_, Sqlite>, ids: I)
where
    I: IntoIterator<Item = i64>,
{
    query.push("(");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");
}

fn push_selector(query: &mut QueryBuilder<'_, Sqlite>, selector: &IdSelector) {
    for fragment in selector.fragments() {
        match fragment {
            SelectorFragment::Sql(sql) => {
                query.push(sql);
            }
            SelectorFragment::Int(value) => {
                query.push_bind(*value);
            }
            SelectorFragment::Text(value) => {
                query.push_bind(value.clone());
            }
        }
    }
}

async fn insert_flow<'e, E>(executor: E, flow: &LogicalFlow) -> Result<FlowId>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let (attested_by, attested_at) = match &flow.last_attested {
        Some(stamp) => (Some(stamp.by.clone()), Some(format_timestamp(&stamp.at))),
        None => (None, None),
    };

    let result = sqlx::query(
        r#"
        INSERT INTO logical_flows (
            source_entity_kind, source_entity_id, target_entity_kind, target_entity_id,
            entity_lifecycle_status, is_removed, last_updated_by, last_updated_at,
            last_attested_by, last_attested_at, created_by, created_at, provenance
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(flow.source.kind.as_str())
    .bind(flow.source.id)
    .bind(flow.target.kind.as_str())
    .bind(flow.target.id)
    .bind(flow.lifecycle_status.as_str())
    .bind(flow.is_removed())
    .bind(&flow.last_updated.by)
    .bind(format_timestamp(&flow.last_updated.at))
    .bind(attested_by)
    .bind(attested_at)
    .bind(&flow.created.by)
    .bind(format_timestamp(&flow.created.at))
    .bind(&flow.provenance)
    .execute(executor)
    .await
    .map_err(Error::from_store)?;

    Ok(result.last_insert_rowid())
}

/// The snapshot that gets inserted for a brand-new flow
fn as_new_flow(flow: &LogicalFlow) -> LogicalFlow {
    LogicalFlow {
        id: None,
        source: flow.source.identity(),
        target: flow.target.identity(),
        lifecycle_status: LifecycleStatus::Active,
        ..flow.clone()
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid {} timestamp '{}': {}", column, value, e)))
}

// ========== Row mapping ==========

#[derive(Debug, FromRow)]
struct FlowRow {
    id: i64,
    source_entity_kind: String,
    source_entity_id: i64,
    target_entity_kind: String,
    target_entity_id: i64,
    entity_lifecycle_status: String,
    is_removed: bool,
    last_updated_by: String,
    last_updated_at: String,
    last_attested_by: Option<String>,
    last_attested_at: Option<String>,
    created_by: String,
    created_at: String,
    provenance: String,
}

impl FlowRow {
    fn into_flow(self) -> Result<LogicalFlow> {
        let source_kind: EntityKind = self.source_entity_kind.parse()?;
        let target_kind: EntityKind = self.target_entity_kind.parse()?;

        let lifecycle_status = if self.is_removed {
            LifecycleStatus::Removed
        } else {
            LifecycleStatus::from_stored(&self.entity_lifecycle_status)
        };

        let last_attested = match (self.last_attested_by, self.last_attested_at) {
            (Some(by), Some(at)) => Some(UserTimestamp::new(by, parse_timestamp("last_attested_at", &at)?)),
            _ => None,
        };

        Ok(LogicalFlow {
            id: Some(self.id),
            source: EntityReference::new(source_kind, self.source_entity_id),
            target: EntityReference::new(target_kind, self.target_entity_id),
            lifecycle_status,
            last_updated: UserTimestamp::new(
                self.last_updated_by,
                parse_timestamp("last_updated_at", &self.last_updated_at)?,
            ),
            last_attested,
            created: UserTimestamp::new(self.created_by, parse_timestamp("created_at", &self.created_at)?),
            provenance: self.provenance,
        })
    }
}
