//! Real connectors end to end: a local git repository fetched by a background
//! worker into a JSON-lines file

use quarry_core::application::{
    shutdown_channel, ExecutionMode, JobRunner, QueuedExecutor, RegisterRepository, RetryPolicy,
    ScheduleRequest, Scheduler, SchedulerConfig, SchedulerPorts, Worker, WorkerConfig,
};
use quarry_core::domain::{BackendType, Job, JobState};
use quarry_core::port::{JobQueue, SystemTimeProvider, TimeProvider, UuidProvider};
use quarry_infra_connectors::{BackendRegistry, JsonlWriter};
use quarry_infra_sqlite::{database_url, SqliteStore};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn git(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

fn commit(dir: &Path, subject: &str) {
    git(dir, &["commit", "--quiet", "--allow-empty", "-m", subject]);
}

fn head(dir: &Path) -> String {
    let out = std::process::Command::new("git")
        .current_dir(dir)
        .args(["rev-parse", "HEAD"])
        .output()
        .unwrap();
    String::from_utf8(out.stdout).unwrap().trim().to_string()
}

fn written_subjects(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| {
            let value: Value = serde_json::from_str(line).unwrap();
            value["data"]["subject"].as_str().unwrap().to_string()
        })
        .collect()
}

async fn wait_terminal(scheduler: &Scheduler, job_id: &str) -> Job {
    for _ in 0..200 {
        let job = scheduler.job_status(job_id).await.unwrap();
        if job.state.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {} did not finish", job_id);
}

#[tokio::test]
async fn test_git_history_is_written_incrementally() {
    let source = tempfile::tempdir().unwrap();
    git(source.path(), &["init", "--quiet"]);
    git(source.path(), &["config", "user.name", "Quarry Test"]);
    git(source.path(), &["config", "user.email", "test@quarry.invalid"]);
    for i in 1..=5 {
        commit(source.path(), &format!("commit {}", i));
    }

    let work = tempfile::tempdir().unwrap();
    let out = work.path().join("items.jsonl");
    let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = SqliteStore::open(&database_url(&work.path().join("quarry.db")), time.clone())
        .await
        .unwrap();

    let backends = Arc::new(BackendRegistry::with_defaults(reqwest::Client::new()));
    let cache = Arc::new(store.cache());
    let runner = JobRunner::new(
        backends.clone(),
        cache.clone(),
        Arc::new(JsonlWriter::new(&out)),
        time.clone(),
        RetryPolicy::new(3, 10, 2.0),
    );
    let queue: Arc<dyn JobQueue> = Arc::new(store.queue());
    let jobs = Arc::new(store.jobs());
    let scheduler = Arc::new(Scheduler::new(
        SchedulerPorts {
            repositories: Arc::new(store.repositories()),
            jobs: jobs.clone(),
            transactions: jobs,
            queue: queue.clone(),
            cache,
            backends,
            executor: Arc::new(QueuedExecutor::new(queue.clone())),
            time_provider: time,
            id_provider: Arc::new(UuidProvider),
        },
        SchedulerConfig::default(),
    ));

    let (shutdown_tx, shutdown) = shutdown_channel();
    let worker = Worker::new(
        WorkerConfig::new("w-1", vec!["git".to_string()]),
        queue,
        Arc::new(store.jobs()),
        runner,
        scheduler.clone(),
    );
    let worker_task = tokio::spawn(async move { worker.run(shutdown).await });

    scheduler
        .register(RegisterRepository {
            id: "https://example.com/demo.git".to_string(),
            backend: BackendType::new("git"),
            backend_args: json!({
                "gitpath": source.path().to_str().unwrap(),
                "batch_size": 2,
            })
            .as_object()
            .cloned()
            .unwrap(),
            cache_enabled: true,
            update_interval_ms: None,
        })
        .await
        .unwrap();

    let first = scheduler
        .schedule_job(ScheduleRequest::new("https://example.com/demo.git"))
        .await
        .unwrap();
    assert_eq!(first.mode, ExecutionMode::Async);
    let first = wait_terminal(&scheduler, &first.job.id).await;
    assert_eq!(first.state, JobState::Finished, "{:?}", first.failure);
    assert_eq!(first.items_written, 5);
    assert_eq!(first.batches_written, 3);
    assert_eq!(first.cursor.as_ref().map(|c| c.as_str().to_string()), Some(head(source.path())));
    assert_eq!(
        written_subjects(&out),
        vec!["commit 1", "commit 2", "commit 3", "commit 4", "commit 5"]
    );

    commit(source.path(), "commit 6");
    commit(source.path(), "commit 7");

    let second = scheduler
        .schedule_job(ScheduleRequest::new("https://example.com/demo.git"))
        .await
        .unwrap();
    let second = wait_terminal(&scheduler, &second.job.id).await;
    assert_eq!(second.state, JobState::Finished, "{:?}", second.failure);
    assert_eq!(second.from_cursor, first.cursor);
    assert_eq!(second.items_written, 2);
    assert_eq!(written_subjects(&out).len(), 7);

    let repo = scheduler
        .repository_status("https://example.com/demo.git")
        .await
        .unwrap();
    assert_eq!(repo.cursor.map(|c| c.as_str().to_string()), Some(head(source.path())));

    shutdown_tx.shutdown();
    let stopped = tokio::time::timeout(Duration::from_secs(5), worker_task)
        .await
        .unwrap()
        .unwrap();
    assert!(stopped.is_ok());
    store.close().await;
}
