// SQLite JobStore Implementation

use crate::error::map_sqlx_error;
use crate::rows::{args_json, cursor_column, failure_columns, JobRow};
use crate::transaction::SqliteSchedulingTransaction;
use async_trait::async_trait;
use quarry_core::domain::{Job, JobState};
use quarry_core::error::Result;
use quarry_core::port::{JobStore, SchedulingTransaction, TransactionalStore};
use sqlx::{SqliteConnection, SqlitePool};

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn insert_job(conn: &mut SqliteConnection, job: &Job) -> Result<()> {
    let (failure_kind, failure_phase, failure_reason) = failure_columns(job);
    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, repository_id, backend, backend_args, cache_policy, queue, state,
            from_cursor, cursor, items_written, batches_written, cache_hits,
            created_at, started_at, finished_at, worker_id,
            failure_kind, failure_phase, failure_reason, retry_of
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&job.id)
    .bind(&job.repository_id)
    .bind(job.backend.as_str())
    .bind(args_json(&job.backend_args))
    .bind(job.cache_policy.to_string())
    .bind(&job.queue)
    .bind(job.state.to_string())
    .bind(cursor_column(job.from_cursor.as_ref()))
    .bind(cursor_column(job.cursor.as_ref()))
    .bind(job.items_written)
    .bind(job.batches_written)
    .bind(job.cache_hits)
    .bind(job.created_at)
    .bind(job.started_at)
    .bind(job.finished_at)
    .bind(&job.worker_id)
    .bind(failure_kind)
    .bind(failure_phase)
    .bind(failure_reason)
    .bind(&job.retry_of)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

/// Mutable columns only; identity and argument snapshot never change
pub(crate) async fn update_job(conn: &mut SqliteConnection, job: &Job) -> Result<()> {
    let (failure_kind, failure_phase, failure_reason) = failure_columns(job);
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET state = ?, cursor = ?, items_written = ?, batches_written = ?, cache_hits = ?,
            started_at = ?, finished_at = ?, worker_id = ?,
            failure_kind = ?, failure_phase = ?, failure_reason = ?
        WHERE id = ?
        "#,
    )
    .bind(job.state.to_string())
    .bind(cursor_column(job.cursor.as_ref()))
    .bind(job.items_written)
    .bind(job.batches_written)
    .bind(job.cache_hits)
    .bind(job.started_at)
    .bind(job.finished_at)
    .bind(&job.worker_id)
    .bind(failure_kind)
    .bind(failure_phase)
    .bind(failure_reason)
    .bind(&job.id)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;

    if result.rows_affected() == 0 {
        return Err(quarry_core::AppError::NotFound(format!("job {}", job.id)));
    }
    Ok(())
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        insert_job(&mut conn, job).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        update_job(&mut conn, job).await
    }

    async fn list_for_repository(&self, repository_id: &str, limit: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE repository_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(repository_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE state = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(state.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn count_by_state(&self, state: JobState) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = ?")
            .bind(state.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count)
    }
}

#[async_trait]
impl TransactionalStore for SqliteJobStore {
    async fn begin_transaction(&self) -> Result<Box<dyn SchedulingTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqliteSchedulingTransaction::new(tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, SqliteRepositoryStore};
    use quarry_core::domain::{
        BackendArgs, BackendType, CachePolicy, Cursor, Failure, FailureKind, Progress,
        Repository, WorkerPhase,
    };
    use quarry_core::port::{RepositoryStore, Transaction};

    async fn setup() -> (SqliteJobStore, SqliteRepositoryStore, Repository) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repos = SqliteRepositoryStore::new(pool.clone());
        let repo =
            Repository::new("repo-A", BackendType::new("git"), BackendArgs::new(), true, 0)
                .unwrap();
        repos.insert(&repo).await.unwrap();
        (SqliteJobStore::new(pool), repos, repo)
    }

    fn job(id: &str, repo: &Repository, created_at: i64) -> Job {
        Job::new(id, created_at, repo, BackendArgs::new(), CachePolicy::Use)
    }

    #[tokio::test]
    async fn test_failed_job_roundtrip() {
        let (store, _repos, repo) = setup().await;
        let mut job = job("job-1", &repo, 1_000);
        store.insert(&job).await.unwrap();

        job.start(1_100, Some("w-1".to_string())).unwrap();
        let mut progress = job.progress();
        progress.advance(Cursor::new("c1"), 3, true);
        job.fail(
            1_200,
            Failure::new(FailureKind::Writer, Some(WorkerPhase::Writing), "bulk rejected"),
            &progress,
        )
        .unwrap();
        store.update(&job).await.unwrap();

        let found = store.find_by_id("job-1").await.unwrap().unwrap();
        assert_eq!(found, job);
        assert_eq!(found.cache_hits, 1);
        assert_eq!(found.failure.unwrap().phase, Some(WorkerPhase::Writing));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let (store, _repos, repo) = setup().await;
        for (i, created_at) in [1_000, 3_000, 2_000].iter().enumerate() {
            store
                .insert(&job(&format!("job-{}", i + 1), &repo, *created_at))
                .await
                .unwrap();
        }

        let listed = store.list_for_repository("repo-A", 2).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["job-2", "job-3"]);
        assert_eq!(store.count_by_state(JobState::Pending).await.unwrap(), 3);
        assert_eq!(store.find_by_state(JobState::Running).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_update_missing_job_is_not_found() {
        let (store, _repos, repo) = setup().await;
        let err = store.update(&job("ghost", &repo, 0)).await.unwrap_err();
        assert!(matches!(err, quarry_core::AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_and_release_moves_cursor() {
        let (store, repos, repo) = setup().await;

        let first = job("job-1", &repo, 1_000);
        let mut tx = store.begin_transaction().await.unwrap();
        assert!(tx.claim_repository("repo-A", "job-1", 1_000).await.unwrap());
        tx.insert_job(&first).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        assert!(!tx.claim_repository("repo-A", "job-2", 1_001).await.unwrap());
        tx.rollback().await.unwrap();

        let busy = repos.find_by_id("repo-A").await.unwrap().unwrap();
        assert_eq!(busy.active_job_id.as_deref(), Some("job-1"));
        assert_eq!(busy.last_job_id.as_deref(), Some("job-1"));

        let mut done = first.clone();
        done.start(1_100, None).unwrap();
        let mut progress = Progress::starting_at(None);
        progress.advance(Cursor::new("c4"), 10, false);
        done.finish(1_200, &progress).unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.update_job(&done).await.unwrap();
        // Only the holder releases
        assert!(!tx
            .release_repository("repo-A", "job-2", done.cursor.as_ref(), None, 1_200)
            .await
            .unwrap());
        assert!(tx
            .release_repository("repo-A", "job-1", done.cursor.as_ref(), Some(5_000), 1_200)
            .await
            .unwrap());
        tx.commit().await.unwrap();

        let idle = repos.find_by_id("repo-A").await.unwrap().unwrap();
        assert!(!idle.is_busy());
        assert_eq!(idle.cursor, Some(Cursor::new("c4")));
        assert_eq!(idle.next_update_at, Some(5_000));

        // A new claim supersedes the pending update
        let mut tx = store.begin_transaction().await.unwrap();
        assert!(tx.claim_repository("repo-A", "job-2", 1_300).await.unwrap());
        tx.commit().await.unwrap();
        let claimed = repos.find_by_id("repo-A").await.unwrap().unwrap();
        assert_eq!(claimed.next_update_at, None);
        assert_eq!(
            store.find_by_id("job-1").await.unwrap().unwrap().state,
            JobState::Finished
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_claim() {
        let (store, repos, repo) = setup().await;
        let mut tx = store.begin_transaction().await.unwrap();
        assert!(tx.claim_repository("repo-A", "job-1", 1_000).await.unwrap());
        tx.insert_job(&job("job-1", &repo, 1_000)).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(!repos.find_by_id("repo-A").await.unwrap().unwrap().is_busy());
        assert!(store.find_by_id("job-1").await.unwrap().is_none());
    }
}
