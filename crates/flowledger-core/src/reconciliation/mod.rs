//! Reconciliation jobs
//!
//! Stateless maintenance sweeps over the flow registry. Each job marks
//! offending flows removed in bulk and reports how many it touched; finding
//! nothing to do is a successful run.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::flow::{IdSelector, LogicalFlowRepository};
use crate::error::Result;

/// A maintenance sweep over the flow registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationJob {
    /// Remove flows with an application endpoint that no longer exists
    Orphans,
    /// Remove flows whose source and target ids coincide
    SelfReferencing,
}

impl ReconciliationJob {
    pub const ALL: [ReconciliationJob; 2] = [Self::Orphans, Self::SelfReferencing];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orphans => "orphans",
            Self::SelfReferencing => "self_referencing",
        }
    }
}

impl fmt::Display for ReconciliationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one job run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub job: ReconciliationJob,
    /// Flows marked removed by this run
    pub affected: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Runs reconciliation jobs against a flow repository
pub struct FlowReconciler {
    repository: Arc<dyn LogicalFlowRepository>,
    active_applications: IdSelector,
}

impl FlowReconciler {
    /// `active_applications` selects the ids of applications that still exist
    pub fn new(repository: Arc<dyn LogicalFlowRepository>, active_applications: IdSelector) -> Self {
        Self {
            repository,
            active_applications,
        }
    }

    pub async fn run(&self, job: ReconciliationJob) -> Result<ReconciliationReport> {
        let started_at = Utc::now();

        let affected = match job {
            ReconciliationJob::Orphans => {
                self.repository
                    .cleanup_orphans(&self.active_applications)
                    .await?
            }
            ReconciliationJob::SelfReferencing => {
                self.repository.cleanup_self_referencing_flows().await?
            }
        };

        let report = ReconciliationReport {
            job,
            affected,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            job = %job,
            affected,
            duration_ms = report.duration_ms(),
            "Reconciliation job finished"
        );
        Ok(report)
    }

    /// Run every job in turn, stopping at the first failure
    pub async fn run_all(&self) -> Result<Vec<ReconciliationReport>> {
        let mut reports = Vec::with_capacity(ReconciliationJob::ALL.len());
        for job in ReconciliationJob::ALL {
            reports.push(self.run(job).await?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow::{EntityReference, LogicalFlow};
    use crate::infrastructure::SqliteLogicalFlowRepository;
    use crate::storage::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_repo() -> Arc<SqliteLogicalFlowRepository> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        Arc::new(SqliteLogicalFlowRepository::new(pool))
    }

    async fn add(repo: &SqliteLogicalFlowRepository, source: EntityReference, target: EntityReference) {
        repo.add_flow(&LogicalFlow::new(source, target, "test"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_single_job() {
        let repo = setup_test_repo().await;
        add(&repo, EntityReference::application(1), EntityReference::application(1)).await;
        add(&repo, EntityReference::application(1), EntityReference::application(2)).await;

        let reconciler = FlowReconciler::new(repo.clone(), IdSelector::ids([1, 2]));
        let report = reconciler.run(ReconciliationJob::SelfReferencing).await.unwrap();

        assert_eq!(report.job, ReconciliationJob::SelfReferencing);
        assert_eq!(report.affected, 1);
        assert!(report.finished_at >= report.started_at);
        assert_eq!(repo.count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_all() {
        let repo = setup_test_repo().await;
        add(&repo, EntityReference::application(1), EntityReference::application(2)).await;
        add(&repo, EntityReference::application(9), EntityReference::actor(2)).await;
        add(&repo, EntityReference::actor(3), EntityReference::application(3)).await;

        // Application 3 is active, so only the self-reference sweep catches that flow
        let reconciler = FlowReconciler::new(repo.clone(), IdSelector::ids([1, 2, 3]));
        let reports = reconciler.run_all().await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].job, ReconciliationJob::Orphans);
        assert_eq!(reports[0].affected, 1);
        assert_eq!(reports[1].job, ReconciliationJob::SelfReferencing);
        assert_eq!(reports[1].affected, 1);
        assert_eq!(repo.count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_do_is_success() {
        let repo = setup_test_repo().await;
        let reconciler = FlowReconciler::new(repo, IdSelector::ids([]));

        let reports = reconciler.run_all().await.unwrap();
        assert!(reports.iter().all(|r| r.affected == 0));
    }

    #[test]
    fn test_job_names() {
        assert_eq!(ReconciliationJob::Orphans.to_string(), "orphans");
        assert_eq!(ReconciliationJob::SelfReferencing.as_str(), "self_referencing");
    }
}
