//! Shared wiring: an in-memory (or on-disk) store, a scripted `git` backend and a recording writer

#![allow(dead_code)]

use quarry_core::application::{
    ExecutionMode, Executor, InlineExecutor, JobRunner, QueuedExecutor, RegisterRepository,
    RetryPolicy, Scheduler, SchedulerConfig, SchedulerPorts, Worker, WorkerConfig,
};
use quarry_core::domain::{BackendArgs, BackendType, Repository};
use quarry_core::port::backend::mocks::{ScriptedBackend, ScriptedBackendFactory};
use quarry_core::port::id_provider::mocks::SequentialIdProvider;
use quarry_core::port::time_provider::mocks::ManualClock;
use quarry_core::port::writer::mocks::RecordingWriter;
use quarry_core::port::{IdProvider, JobQueue, ReportSink, TimeProvider, UuidProvider};
use quarry_infra_sqlite::{database_url, SqliteStore};
use std::path::Path;
use std::sync::Arc;

pub const BACKEND: &str = "git";
pub const LEASE_MS: i64 = 60_000;
pub const START_MILLIS: i64 = 1_700_000_000_000;

pub struct Harness {
    pub store: SqliteStore,
    pub scheduler: Arc<Scheduler>,
    pub queue: Arc<dyn JobQueue>,
    pub runner: JobRunner,
    pub backend: ScriptedBackend,
    pub writer: Arc<RecordingWriter>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// `batches` batches of two items each, cursors `c1..`
    pub async fn new(mode: ExecutionMode, batches: usize) -> Self {
        Self::with_parts(mode, ScriptedBackend::with_batches(batches, 2), RecordingWriter::new())
            .await
    }

    /// Store in a database file under `dir`, served by a multi-connection pool
    ///
    /// Several harnesses on one `dir` behave like separate processes sharing the
    /// store, so job ids are UUIDs.
    pub async fn on_disk(dir: &Path, mode: ExecutionMode, batches: usize) -> Self {
        Self::open(
            &database_url(&dir.join("quarry.db")),
            mode,
            ScriptedBackend::with_batches(batches, 2),
            RecordingWriter::new(),
            Arc::new(UuidProvider),
        )
        .await
    }

    pub async fn with_parts(
        mode: ExecutionMode,
        backend: ScriptedBackend,
        writer: RecordingWriter,
    ) -> Self {
        Self::open(
            "sqlite::memory:",
            mode,
            backend,
            writer,
            Arc::new(SequentialIdProvider::new()),
        )
        .await
    }

    async fn open(
        url: &str,
        mode: ExecutionMode,
        backend: ScriptedBackend,
        writer: RecordingWriter,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let time: Arc<dyn TimeProvider> = clock.clone();
        let store = SqliteStore::open(url, time.clone()).await.unwrap();

        let backends = Arc::new(ScriptedBackendFactory::new(BACKEND, backend.clone()));
        let writer = Arc::new(writer);
        let cache = Arc::new(store.cache());
        let runner = JobRunner::new(
            backends.clone(),
            cache.clone(),
            writer.clone(),
            time.clone(),
            RetryPolicy::new(3, 0, 1.0),
        );
        let queue: Arc<dyn JobQueue> = Arc::new(store.queue());
        let executor: Arc<dyn Executor> = match mode {
            ExecutionMode::Sync => Arc::new(InlineExecutor::new(runner.clone())),
            ExecutionMode::Async => Arc::new(QueuedExecutor::new(queue.clone())),
        };
        let jobs = Arc::new(store.jobs());

        let scheduler = Arc::new(Scheduler::new(
            SchedulerPorts {
                repositories: Arc::new(store.repositories()),
                jobs: jobs.clone(),
                transactions: jobs,
                queue: queue.clone(),
                cache,
                backends,
                executor,
                time_provider: time,
                id_provider,
            },
            SchedulerConfig::default(),
        ));

        Self {
            store,
            scheduler,
            queue,
            runner,
            backend,
            writer,
            clock,
        }
    }

    pub async fn register(&self, id: &str) -> Repository {
        self.register_with_interval(id, None).await
    }

    /// Register with continuous updates every `interval_ms` after a FINISHED job
    pub async fn register_with_interval(&self, id: &str, interval_ms: Option<i64>) -> Repository {
        self.scheduler
            .register(RegisterRepository {
                id: id.to_string(),
                backend: BackendType::new(BACKEND),
                backend_args: BackendArgs::new(),
                cache_enabled: true,
                update_interval_ms: interval_ms,
            })
            .await
            .unwrap()
    }

    /// Worker reporting straight to the scheduler
    pub fn worker(&self, id: &str) -> Worker {
        self.worker_reporting_to(id, self.scheduler.clone())
    }

    pub fn worker_reporting_to(&self, id: &str, sink: Arc<dyn ReportSink>) -> Worker {
        let mut config = WorkerConfig::new(id, vec![BACKEND.to_string()]);
        config.lease_timeout_ms = LEASE_MS;
        Worker::new(
            config,
            self.queue.clone(),
            Arc::new(self.store.jobs()),
            self.runner.clone(),
            sink,
        )
    }
}
