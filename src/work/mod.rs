//! Work store - claimable units of implementation work, commit records, and
//! the supervisor's crash/health logs.
//!
//! SQLite in WAL mode is the one transactional shared store in the system.
//! Multiple developer processes race on `claim`; the claim is a single
//! compare-and-set statement whose WHERE clause also carries the
//! sequential-ordering precondition, so exactly one racing caller wins and
//! nobody can jump the queue inside a group.

use crate::specs::{extract_sections, SpecStore};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("work not found: {0}")]
    NotFound(String),
    #[error("file access violation: '{path}' is not in assigned_files of {work_id}")]
    FileAccessViolation { work_id: String, path: String },
    #[error("invalid status transition {from} -> {to} for {work_id}")]
    InvalidTransition {
        work_id: String,
        from: WorkStatus,
        to: WorkStatus,
    },
    #[error("work {0} is not held by {1}")]
    NotHeld(String, String),
    #[error("spec {0} not found")]
    SpecMissing(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// `pending → in_progress → {completed, failed}`.
    fn can_transition_to(&self, to: WorkStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
struct WorkUnitRow {
    work_id: String,
    priority_number: i64,
    group_id: String,
    ord: i64,
    spec_id: String,
    scope_description: String,
    assigned_files: String,
    status: String,
    claimed_by: Option<String>,
    claimed_at: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    pub work_id: String,
    pub priority_number: i64,
    pub group_id: String,
    pub order: i64,
    pub spec_id: String,
    pub scope_description: String,
    /// The exclusive write capability: the claimant must not touch paths
    /// outside this set for the duration of the claim.
    pub assigned_files: Vec<String>,
    pub status: WorkStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

impl From<WorkUnitRow> for WorkUnit {
    fn from(r: WorkUnitRow) -> Self {
        WorkUnit {
            work_id: r.work_id,
            priority_number: r.priority_number,
            group_id: r.group_id,
            order: r.ord,
            spec_id: r.spec_id,
            scope_description: r.scope_description,
            assigned_files: serde_json::from_str(&r.assigned_files).unwrap_or_default(),
            status: WorkStatus::parse(&r.status).unwrap_or(WorkStatus::Pending),
            claimed_by: r.claimed_by,
            claimed_at: r.claimed_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            created_at: r.created_at,
        }
    }
}

impl WorkUnit {
    /// Check a path against the unit's write capability. Violation is an
    /// error at the boundary so the caller's tick fails fast.
    pub fn validate_file_access(&self, path: &str) -> Result<(), WorkError> {
        let normalized = Path::new(path);
        for assigned in &self.assigned_files {
            let assigned_path = Path::new(assigned);
            if normalized == assigned_path || normalized.ends_with(assigned_path) {
                return Ok(());
            }
        }
        Err(WorkError::FileAccessViolation {
            work_id: self.work_id.clone(),
            path: path.to_string(),
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommitRecord {
    pub id: i64,
    pub work_id: String,
    pub commit_sha: String,
    pub message: String,
    pub committed_at: String,
    pub reviewed_by: Option<String>,
    pub review_status: Option<String>,
    pub review_notes: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CrashReport {
    pub id: i64,
    pub role: String,
    pub pid: i64,
    pub task: Option<String>,
    pub crashed_at: String,
    pub error_kind: String,
    pub error_message: String,
    pub respawned: i64,
    pub reported: i64,
    pub report_id: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HealthRecord {
    pub id: i64,
    pub ts: String,
    pub status: String,
    pub active_agents: i64,
    pub crashed_agents: i64,
    pub zombies: i64,
    pub supervisor_responsive: i64,
    pub last_tick_age: f64,
    pub actions_taken: String,
    pub reports_filed: i64,
}

/// Fields supplied when seeding a unit (admin path / planning tool).
#[derive(Debug, Clone)]
pub struct NewWorkUnit {
    pub work_id: String,
    pub priority_number: i64,
    pub group_id: String,
    pub order: i64,
    pub spec_id: String,
    pub scope_description: String,
    pub assigned_files: Vec<String>,
}

// ─── WorkStore ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct WorkStore {
    pool: SqlitePool,
}

impl WorkStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        for sql in [include_str!("migrations/001_init.sql")] {
            for stmt in sql.split(';') {
                let stmt = stmt.trim();
                if !stmt.is_empty() {
                    sqlx::query(stmt).execute(pool).await?;
                }
            }
        }
        Ok(())
    }

    /// Quick connectivity probe used by startup health checks.
    pub async fn ping(&self) -> Result<()> {
        let _: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    // ─── Work units ─────────────────────────────────────────────────────────

    pub async fn insert_work(&self, new: &NewWorkUnit) -> Result<(), WorkError> {
        let files = serde_json::to_string(&new.assigned_files)
            .context("serialize assigned_files")?;
        sqlx::query(
            "INSERT INTO work_units
                 (work_id, priority_number, group_id, ord, spec_id, scope_description,
                  assigned_files, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(&new.work_id)
        .bind(new.priority_number)
        .bind(&new.group_id)
        .bind(new.order)
        .bind(&new.spec_id)
        .bind(&new.scope_description)
        .bind(&files)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, work_id: &str) -> Result<Option<WorkUnit>, WorkError> {
        let row: Option<WorkUnitRow> =
            sqlx::query_as("SELECT * FROM work_units WHERE work_id = ?")
                .bind(work_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    /// Next claimable unit for a priority, respecting sequential ordering.
    ///
    /// Walks the priority's units by ascending order: completed units are
    /// skipped; the first non-completed unit is returned when it is pending
    /// and unclaimed, otherwise the caller must wait (`None`). A failed
    /// earlier unit therefore blocks its successors.
    pub async fn next_work_for_priority(
        &self,
        priority_number: i64,
    ) -> Result<Option<WorkUnit>, WorkError> {
        let rows: Vec<WorkUnitRow> = sqlx::query_as(
            "SELECT * FROM work_units WHERE priority_number = ? ORDER BY ord ASC",
        )
        .bind(priority_number)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let unit: WorkUnit = row.into();
            match unit.status {
                WorkStatus::Completed => continue,
                WorkStatus::Pending if unit.claimed_by.is_none() => return Ok(Some(unit)),
                _ => {
                    info!(
                        work_id = %unit.work_id,
                        order = unit.order,
                        status = %unit.status,
                        "waiting for earlier work in sequence"
                    );
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    /// Atomically claim a unit.
    ///
    /// One UPDATE carries both the compare-and-set (`status = 'pending' AND
    /// claimed_by IS NULL`) and the sequential-ordering precondition (no
    /// earlier unit of the same group left uncompleted), so the operation is
    /// linearizable: for any work_id, exactly one racing caller sees `true`.
    pub async fn claim(&self, work_id: &str, claimant: &str) -> Result<bool, WorkError> {
        if self.get(work_id).await?.is_none() {
            return Err(WorkError::NotFound(work_id.to_string()));
        }

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE work_units
             SET status = 'in_progress', claimed_by = ?, claimed_at = ?, started_at = ?
             WHERE work_id = ?
               AND status = 'pending'
               AND claimed_by IS NULL
               AND NOT EXISTS (
                   SELECT 1 FROM work_units w2
                   WHERE w2.group_id = work_units.group_id
                     AND w2.ord < work_units.ord
                     AND w2.status != 'completed'
               )",
        )
        .bind(claimant)
        .bind(&now)
        .bind(&now)
        .bind(work_id)
        .execute(&self.pool)
        .await?;

        let won = result.rows_affected() > 0;
        if won {
            info!(work_id, claimant, "claimed work unit");
        } else {
            warn!(work_id, claimant, "claim lost (raced or blocked by ordering)");
        }
        Ok(won)
    }

    /// Check a path against a unit's write capability. See
    /// [`WorkUnit::validate_file_access`].
    pub fn validate_file_access(&self, work: &WorkUnit, path: &str) -> Result<(), WorkError> {
        work.validate_file_access(path)
    }

    /// Transition a unit's status. Only the legal transitions are accepted;
    /// timestamps are stamped on transition.
    pub async fn update_status(
        &self,
        work_id: &str,
        new_status: WorkStatus,
        error: Option<&str>,
    ) -> Result<(), WorkError> {
        let unit = self
            .get(work_id)
            .await?
            .ok_or_else(|| WorkError::NotFound(work_id.to_string()))?;

        if !unit.status.can_transition_to(new_status) {
            return Err(WorkError::InvalidTransition {
                work_id: work_id.to_string(),
                from: unit.status,
                to: new_status,
            });
        }

        let now = Utc::now().to_rfc3339();
        match new_status {
            WorkStatus::InProgress => {
                sqlx::query(
                    "UPDATE work_units SET status = ?, started_at = ? WHERE work_id = ?",
                )
                .bind(new_status.as_str())
                .bind(&now)
                .bind(work_id)
                .execute(&self.pool)
                .await?;
            }
            WorkStatus::Completed | WorkStatus::Failed => {
                sqlx::query(
                    "UPDATE work_units SET status = ?, completed_at = ? WHERE work_id = ?",
                )
                .bind(new_status.as_str())
                .bind(&now)
                .bind(work_id)
                .execute(&self.pool)
                .await?;
                if new_status == WorkStatus::Failed {
                    warn!(work_id, error = error.unwrap_or("unspecified"), "work failed");
                }
            }
            WorkStatus::Pending => unreachable!("no transition leads back to pending"),
        }
        info!(work_id, status = new_status.as_str(), "work status updated");
        Ok(())
    }

    /// Append a commit record for a unit the caller currently holds.
    /// A unit can accumulate several commits; commits against a unit not
    /// held by `claimant` are rejected.
    pub async fn record_commit(
        &self,
        work_id: &str,
        claimant: &str,
        commit_sha: &str,
        message: &str,
    ) -> Result<(), WorkError> {
        let result = sqlx::query(
            "INSERT INTO commit_records (work_id, commit_sha, message, committed_at)
             SELECT ?, ?, ?, ?
             WHERE EXISTS (
                 SELECT 1 FROM work_units
                 WHERE work_id = ? AND claimed_by = ? AND status = 'in_progress'
             )",
        )
        .bind(work_id)
        .bind(commit_sha)
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .bind(work_id)
        .bind(claimant)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WorkError::NotHeld(
                work_id.to_string(),
                claimant.to_string(),
            ));
        }
        info!(work_id, sha = &commit_sha[..commit_sha.len().min(8)], "commit recorded");
        Ok(())
    }

    /// Commit records for one unit, in insertion order.
    pub async fn commits_for_work(&self, work_id: &str) -> Result<Vec<CommitRecord>, WorkError> {
        Ok(sqlx::query_as(
            "SELECT * FROM commit_records WHERE work_id = ? ORDER BY id ASC",
        )
        .bind(work_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Commits still awaiting an architect review, oldest first.
    pub async fn unreviewed_commits(&self, limit: i64) -> Result<Vec<CommitRecord>, WorkError> {
        Ok(sqlx::query_as(
            "SELECT * FROM commit_records WHERE review_status IS NULL ORDER BY id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Record a review verdict on a commit.
    pub async fn review_commit(
        &self,
        commit_id: i64,
        reviewer: &str,
        review_status: &str,
        notes: &str,
    ) -> Result<(), WorkError> {
        sqlx::query(
            "UPDATE commit_records
             SET reviewed_by = ?, review_status = ?, review_notes = ?
             WHERE id = ?",
        )
        .bind(reviewer)
        .bind(review_status)
        .bind(notes)
        .bind(commit_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The spec subset governing a unit: the sections its
    /// `scope_description` names, or the whole spec when it names none.
    pub fn read_spec_section(
        &self,
        work: &WorkUnit,
        specs: &SpecStore,
    ) -> Result<String, WorkError> {
        let spec = specs
            .find(&work.spec_id)
            .map_err(WorkError::Other)?
            .ok_or_else(|| WorkError::SpecMissing(work.spec_id.clone()))?;
        Ok(extract_sections(&spec.content, &work.scope_description))
    }

    // ─── Crash reports ──────────────────────────────────────────────────────

    pub async fn append_crash_report(
        &self,
        role: &str,
        pid: u32,
        task: Option<&str>,
        error_kind: &str,
        error_message: &str,
        respawned: bool,
    ) -> Result<i64, WorkError> {
        let result = sqlx::query(
            "INSERT INTO crash_reports
                 (role, pid, task, crashed_at, error_kind, error_message, respawned)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(role)
        .bind(pid as i64)
        .bind(task)
        .bind(Utc::now().to_rfc3339())
        .bind(error_kind)
        .bind(error_message)
        .bind(respawned as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Mark a crash as filed with the external tracker.
    pub async fn mark_crash_reported(
        &self,
        crash_id: i64,
        report_id: &str,
    ) -> Result<(), WorkError> {
        sqlx::query("UPDATE crash_reports SET reported = 1, report_id = ? WHERE id = ?")
            .bind(report_id)
            .bind(crash_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn crash_reports_for_role(
        &self,
        role: &str,
    ) -> Result<Vec<CrashReport>, WorkError> {
        Ok(
            sqlx::query_as("SELECT * FROM crash_reports WHERE role = ? ORDER BY id ASC")
                .bind(role)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // ─── Health records ─────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn append_health_record(
        &self,
        status: &str,
        active_agents: i64,
        crashed_agents: i64,
        zombies: i64,
        last_tick_age: f64,
        actions_taken: &[String],
        reports_filed: i64,
    ) -> Result<(), WorkError> {
        sqlx::query(
            "INSERT INTO health_records
                 (ts, status, active_agents, crashed_agents, zombies,
                  supervisor_responsive, last_tick_age, actions_taken, reports_filed)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status)
        .bind(active_agents)
        .bind(crashed_agents)
        .bind(zombies)
        .bind(last_tick_age)
        .bind(serde_json::to_string(actions_taken).context("serialize actions")?)
        .bind(reports_filed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn last_health_record(&self) -> Result<Option<HealthRecord>, WorkError> {
        Ok(
            sqlx::query_as("SELECT * FROM health_records ORDER BY id DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, WorkStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkStore::open(&dir.path().join("crewd.db")).await.unwrap();
        (dir, store)
    }

    fn unit(id: &str, order: i64) -> NewWorkUnit {
        NewWorkUnit {
            work_id: id.to_string(),
            priority_number: 31,
            group_id: "GROUP-31".to_string(),
            order,
            spec_id: "31".to_string(),
            scope_description: String::new(),
            assigned_files: vec!["a.md".to_string()],
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_ordered() {
        let (_dir, store) = store().await;
        store.insert_work(&unit("WORK-31-1", 1)).await.unwrap();
        store.insert_work(&unit("WORK-31-2", 2)).await.unwrap();

        // U2 cannot be claimed while U1 is not completed.
        assert!(!store.claim("WORK-31-2", "dev-a").await.unwrap());

        assert!(store.claim("WORK-31-1", "dev-a").await.unwrap());
        // Second claim on the same unit loses.
        assert!(!store.claim("WORK-31-1", "dev-b").await.unwrap());

        // Still blocked while U1 is in_progress.
        assert!(!store.claim("WORK-31-2", "dev-b").await.unwrap());

        store
            .update_status("WORK-31-1", WorkStatus::Completed, None)
            .await
            .unwrap();
        assert!(store.claim("WORK-31-2", "dev-b").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let (_dir, store) = store().await;
        store.insert_work(&unit("WORK-31-1", 1)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim("WORK-31-1", &format!("dev-{i}")).await.unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn next_work_walks_the_sequence() {
        let (_dir, store) = store().await;
        store.insert_work(&unit("WORK-31-1", 1)).await.unwrap();
        store.insert_work(&unit("WORK-31-2", 2)).await.unwrap();

        let next = store.next_work_for_priority(31).await.unwrap().unwrap();
        assert_eq!(next.work_id, "WORK-31-1");

        store.claim("WORK-31-1", "dev-a").await.unwrap();
        // In-progress head blocks the whole sequence.
        assert!(store.next_work_for_priority(31).await.unwrap().is_none());

        store
            .update_status("WORK-31-1", WorkStatus::Completed, None)
            .await
            .unwrap();
        let next = store.next_work_for_priority(31).await.unwrap().unwrap();
        assert_eq!(next.work_id, "WORK-31-2");

        store.claim("WORK-31-2", "dev-a").await.unwrap();
        store
            .update_status("WORK-31-2", WorkStatus::Completed, None)
            .await
            .unwrap();
        assert!(store.next_work_for_priority(31).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_unit_blocks_successors() {
        let (_dir, store) = store().await;
        store.insert_work(&unit("WORK-31-1", 1)).await.unwrap();
        store.insert_work(&unit("WORK-31-2", 2)).await.unwrap();

        store.claim("WORK-31-1", "dev-a").await.unwrap();
        store
            .update_status("WORK-31-1", WorkStatus::Failed, Some("tests failed"))
            .await
            .unwrap();

        assert!(store.next_work_for_priority(31).await.unwrap().is_none());
        assert!(!store.claim("WORK-31-2", "dev-a").await.unwrap());
    }

    #[tokio::test]
    async fn claim_on_completed_unit_is_false_and_transitions_checked() {
        let (_dir, store) = store().await;
        store.insert_work(&unit("WORK-31-1", 1)).await.unwrap();
        store.claim("WORK-31-1", "dev-a").await.unwrap();
        store
            .update_status("WORK-31-1", WorkStatus::Completed, None)
            .await
            .unwrap();

        assert!(!store.claim("WORK-31-1", "dev-b").await.unwrap());
        let err = store
            .update_status("WORK-31-1", WorkStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn claim_unknown_work_is_not_found() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.claim("WORK-404", "dev-a").await.unwrap_err(),
            WorkError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn commits_require_holding_the_unit() {
        let (_dir, store) = store().await;
        store.insert_work(&unit("WORK-31-1", 1)).await.unwrap();

        // Not claimed - rejected.
        assert!(matches!(
            store
                .record_commit("WORK-31-1", "dev-a", "abc123", "feat: x")
                .await
                .unwrap_err(),
            WorkError::NotHeld(_, _)
        ));

        store.claim("WORK-31-1", "dev-a").await.unwrap();
        store
            .record_commit("WORK-31-1", "dev-a", "abc123", "feat: x")
            .await
            .unwrap();
        // Wrong claimant - rejected.
        assert!(store
            .record_commit("WORK-31-1", "dev-b", "def456", "feat: y")
            .await
            .is_err());

        store
            .record_commit("WORK-31-1", "dev-a", "def456", "feat: y")
            .await
            .unwrap();
        let commits = store.commits_for_work("WORK-31-1").await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].commit_sha, "abc123");
        assert_eq!(commits[1].commit_sha, "def456");
    }

    #[tokio::test]
    async fn commit_review_roundtrip() {
        let (_dir, store) = store().await;
        store.insert_work(&unit("WORK-31-1", 1)).await.unwrap();
        store.claim("WORK-31-1", "dev-a").await.unwrap();
        store
            .record_commit("WORK-31-1", "dev-a", "abc123", "feat: x")
            .await
            .unwrap();

        let pending = store.unreviewed_commits(10).await.unwrap();
        assert_eq!(pending.len(), 1);

        store
            .review_commit(pending[0].id, "architect", "approved", "looks right")
            .await
            .unwrap();
        assert!(store.unreviewed_commits(10).await.unwrap().is_empty());
        let reviewed = &store.commits_for_work("WORK-31-1").await.unwrap()[0];
        assert_eq!(reviewed.reviewed_by.as_deref(), Some("architect"));
        assert_eq!(reviewed.review_status.as_deref(), Some("approved"));
    }

    #[tokio::test]
    async fn file_capability_is_enforced() {
        let (_dir, store) = store().await;
        store.insert_work(&unit("WORK-31-1", 1)).await.unwrap();
        store.claim("WORK-31-1", "dev-a").await.unwrap();

        let work = store.get("WORK-31-1").await.unwrap().unwrap();
        assert!(work.validate_file_access("a.md").is_ok());
        assert!(matches!(
            work.validate_file_access("b.md").unwrap_err(),
            WorkError::FileAccessViolation { .. }
        ));
    }

    #[tokio::test]
    async fn spec_section_resolution() {
        let (_dir, store) = store().await;
        let specs_dir = tempfile::tempdir().unwrap();
        let specs = SpecStore::new(specs_dir.path());
        specs
            .put(
                "31",
                "Group claims",
                "# SPEC-31\n\n## Design\n\ndesign body\n\n## Implementation\n\nimpl body\n",
            )
            .unwrap();

        let mut new = unit("WORK-31-1", 1);
        new.scope_description = "Phase 1: /design".to_string();
        store.insert_work(&new).await.unwrap();
        let work = store.get("WORK-31-1").await.unwrap().unwrap();

        let section = store.read_spec_section(&work, &specs).unwrap();
        assert!(section.contains("design body"));
        assert!(!section.contains("impl body"));
    }

    #[tokio::test]
    async fn crash_and_health_logs_append() {
        let (_dir, store) = store().await;
        let crash_id = store
            .append_crash_report("architect", 4242, None, "process_exit", "exit code 1", true)
            .await
            .unwrap();
        store
            .mark_crash_reported(crash_id, "BUG-77")
            .await
            .unwrap();

        let reports = store.crash_reports_for_role("architect").await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report_id.as_deref(), Some("BUG-77"));
        assert_eq!(reports[0].respawned, 1);

        store
            .append_health_record("critical", 5, 1, 0, 1.5, &["restarted architect".into()], 1)
            .await
            .unwrap();
        let last = store.last_health_record().await.unwrap().unwrap();
        assert_eq!(last.status, "critical");
        assert_eq!(last.crashed_agents, 1);
    }
}
