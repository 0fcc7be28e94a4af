//! Races against one database file shared by several pools
//!
//! Every harness opens its own connection pool on the same file, the way separate
//! server and worker processes would, so only the store's conditional updates
//! keep the racers apart.

mod common;

use common::{Harness, BACKEND, LEASE_MS};
use quarry_core::application::{ExecutionMode, ScheduleRequest};
use quarry_core::domain::JobState;
use quarry_core::AppError;

const RACERS: usize = 8;

async fn harnesses(dir: &std::path::Path, count: usize) -> Vec<Harness> {
    let mut all = Vec::with_capacity(count);
    for _ in 0..count {
        all.push(Harness::on_disk(dir, ExecutionMode::Async, 1).await);
    }
    all
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_schedule_calls_claim_repository_once() {
    let dir = tempfile::tempdir().unwrap();
    let racers = harnesses(dir.path(), RACERS).await;
    racers[0].register("repo-A").await;

    let handles: Vec<_> = racers
        .iter()
        .map(|h| {
            let scheduler = h.scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .schedule_job(ScheduleRequest::new("repo-A"))
                    .await
            })
        })
        .collect();

    let mut scheduled = Vec::new();
    let mut busy = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(s) => scheduled.push(s.job),
            Err(AppError::RepositoryBusy(_)) => busy += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(scheduled.len(), 1);
    assert_eq!(busy, RACERS - 1);
    let winner = &scheduled[0];
    assert_eq!(winner.state, JobState::Pending);

    let observer = &racers[RACERS - 1];
    let repo = observer.scheduler.repository_status("repo-A").await.unwrap();
    assert_eq!(repo.active_job_id.as_deref(), Some(winner.id.as_str()));
    assert_eq!(observer.scheduler.list_jobs("repo-A").await.unwrap().len(), 1);
    assert_eq!(observer.queue.depth(BACKEND).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_workers_lease_a_message_once() {
    let dir = tempfile::tempdir().unwrap();
    let racers = harnesses(dir.path(), RACERS / 2).await;
    racers[0].register("repo-A").await;
    let job = racers[0]
        .scheduler
        .schedule_job(ScheduleRequest::new("repo-A"))
        .await
        .unwrap()
        .job;

    // Two dequeues per pool, so racers also share connections of one pool
    let handles: Vec<_> = (0..RACERS)
        .map(|i| {
            let queue = racers[i % racers.len()].queue.clone();
            tokio::spawn(async move { queue.dequeue(BACKEND, &format!("w-{}", i), LEASE_MS).await })
        })
        .collect();

    let mut leased = Vec::new();
    for handle in handles {
        if let Some(message) = handle.await.unwrap().unwrap() {
            leased.push(message);
        }
    }

    assert_eq!(leased.len(), 1);
    let message = &leased[0];
    assert_eq!(message.message.job_id, job.id);
    assert_eq!(message.deliveries, 1);

    // The lease is exclusive: nobody else may checkpoint or settle it
    let owner = message.lease_owner.clone();
    let other = if owner == "w-0" { "w-1" } else { "w-0" };
    assert!(!racers[1].queue.ack(message.id, other).await.unwrap());
    assert!(racers[1].queue.ack(message.id, &owner).await.unwrap());
    assert_eq!(racers[0].queue.depth(BACKEND).await.unwrap(), 0);
}
