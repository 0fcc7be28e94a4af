//! Composition root: wires stores, connectors and services for each role

use crate::config::{DaemonConfig, WriterKind};
use anyhow::{Context, Result};
use quarry_api_http::{HttpServer, HttpServerConfig};
use quarry_core::application::{
    run_periodic, ContinuousUpdates, ExecutionMode, Executor, InlineExecutor, JobRunner,
    MaintenanceTask, QueuedExecutor, RecoveryService, ReportListener, Scheduler, SchedulerConfig,
    SchedulerPorts, ShutdownToken, Worker, WorkerConfig,
};
use quarry_core::port::{
    BackendFactory, ItemWriter, JobQueue, JobStore, MaintenanceConfig, ReportSink,
    SystemTimeProvider, TimeProvider, UuidProvider,
};
use quarry_infra_connectors::{BackendRegistry, DiscardWriter, ElasticsearchWriter, JsonlWriter};
use quarry_infra_sqlite::{database_url, SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Background tasks of a running process, awaited on shutdown
pub struct Running {
    pub tasks: Vec<(String, JoinHandle<()>)>,
    store: SqliteStore,
}

impl Running {
    /// Wait for every task, giving up after `grace`
    pub async fn join(self, grace: Duration) {
        for (name, handle) in self.tasks {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task = %name, error = %e, "Task ended abnormally"),
                Err(_) => error!(task = %name, "Task did not stop in time"),
            }
        }
        self.store.close().await;
    }
}

/// Connectors shared by both roles
struct Connectors {
    backends: Arc<BackendRegistry>,
    writer: Arc<dyn ItemWriter>,
}

fn http_client(cfg: &DaemonConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.http_timeout_secs))
        .user_agent(concat!("quarry/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

fn build_writer(cfg: &DaemonConfig, client: reqwest::Client) -> Result<Arc<dyn ItemWriter>> {
    let writer: Arc<dyn ItemWriter> = match cfg.writer {
        WriterKind::Jsonl => {
            let path = cfg.writer_path();
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            Arc::new(JsonlWriter::new(path))
        }
        WriterKind::Elasticsearch => {
            Arc::new(ElasticsearchWriter::new(client, &cfg.es_url, cfg.es_index.clone()))
        }
        WriterKind::None => Arc::new(DiscardWriter::new()),
    };
    info!(writer = writer.name(), "Item writer ready");
    Ok(writer)
}

fn connectors(cfg: &DaemonConfig) -> Result<Connectors> {
    let client = http_client(cfg)?;
    let backends = Arc::new(BackendRegistry::with_defaults(client.clone()));
    let writer = build_writer(cfg, client)?;
    Ok(Connectors { backends, writer })
}

async fn open_store(cfg: &DaemonConfig, time: Arc<dyn TimeProvider>) -> Result<SqliteStore> {
    let db_path = cfg.db_path();
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    info!(db_path = %db_path.display(), "Opening store");
    SqliteStore::open(&database_url(&db_path), time)
        .await
        .context("Failed to open store")
}

/// Queues served by this process: configured ones, or one per registered backend
fn served_queues(cfg: &DaemonConfig, backends: &BackendRegistry) -> Vec<String> {
    if cfg.queues.is_empty() {
        backends
            .backend_types()
            .into_iter()
            .map(|b| b.as_str().to_string())
            .collect()
    } else {
        cfg.queues.clone()
    }
}

fn spawn_workers(
    cfg: &DaemonConfig,
    queues: Vec<String>,
    queue: Arc<dyn JobQueue>,
    jobs: Arc<dyn JobStore>,
    runner: &JobRunner,
    sink: Arc<dyn ReportSink>,
    shutdown: &ShutdownToken,
) -> Vec<(String, JoinHandle<()>)> {
    (0..cfg.workers)
        .map(|index| {
            let mut config = WorkerConfig::new(cfg.worker_id(index), queues.clone());
            config.lease_timeout_ms = cfg.lease_timeout_ms;
            let worker = Worker::new(
                config,
                queue.clone(),
                jobs.clone(),
                runner.clone(),
                sink.clone(),
            );
            let name = format!("worker {}", worker.id());
            let token = shutdown.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = worker.run(token).await {
                    error!(worker_id = %worker.id(), error = %e, "Worker failed");
                }
            });
            (name, handle)
        })
        .collect()
}

/// Server role: HTTP API, scheduler, report listener, maintenance
///
/// In async mode the process also runs `cfg.workers` queue workers that report
/// straight to the scheduler.
pub async fn run_server(cfg: &DaemonConfig, shutdown: ShutdownToken) -> Result<Running> {
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = open_store(cfg, time_provider.clone()).await?;
    let Connectors { backends, writer } = connectors(cfg)?;

    let jobs = Arc::new(store.jobs());
    let queue: Arc<dyn JobQueue> = Arc::new(store.queue());
    let cache = Arc::new(store.cache());
    let runner = JobRunner::new(
        backends.clone(),
        cache.clone(),
        writer,
        time_provider.clone(),
        cfg.retry_policy(),
    );

    let executor: Arc<dyn Executor> = match cfg.mode {
        ExecutionMode::Sync => Arc::new(InlineExecutor::new(runner.clone())),
        ExecutionMode::Async => Arc::new(QueuedExecutor::new(queue.clone())),
    };

    let scheduler = Arc::new(Scheduler::new(
        SchedulerPorts {
            repositories: Arc::new(store.repositories()),
            jobs: jobs.clone(),
            transactions: jobs.clone(),
            queue: queue.clone(),
            cache,
            backends: backends.clone(),
            executor,
            time_provider: time_provider.clone(),
            id_provider: Arc::new(UuidProvider),
        },
        SchedulerConfig::default(),
    ));

    // Reports written by workers while no server was up come first
    let listener = ReportListener::new(
        Arc::new(store.reports()),
        scheduler.clone(),
        Duration::from_millis(cfg.report_poll_ms),
    );
    let drained = listener.drain().await.context("Applying pending reports failed")?;
    info!(reports = drained, "Pending worker reports applied");

    let recovery = RecoveryService::new(
        jobs.clone(),
        queue.clone(),
        jobs.clone(),
        time_provider.clone(),
        cfg.mode,
    );
    let recovered = recovery.reconcile().await.context("Startup recovery failed")?;
    info!(
        requeued = recovered.requeued,
        interrupted = recovered.interrupted,
        "Startup recovery completed"
    );

    let server = HttpServer::new(
        HttpServerConfig {
            host: cfg.host.clone(),
            port: cfg.port,
        },
        scheduler.clone(),
    );
    let tcp = server
        .bind()
        .await
        .with_context(|| format!("Failed to bind {}:{}", cfg.host, cfg.port))?;

    let mut tasks = Vec::new();
    let token = shutdown.clone();
    tasks.push((
        "http".to_string(),
        tokio::spawn(async move {
            if let Err(e) = server.serve(tcp, token).await {
                error!(error = %e, "HTTP server failed");
            }
        }),
    ));

    if cfg.mode == ExecutionMode::Async {
        let queues = served_queues(cfg, &backends);
        let sink: Arc<dyn ReportSink> = scheduler.clone();
        tasks.extend(spawn_workers(
            cfg,
            queues,
            queue,
            jobs.clone(),
            &runner,
            sink,
            &shutdown,
        ));
    }

    tasks.push((
        "report listener".to_string(),
        tokio::spawn(listener.run(shutdown.clone())),
    ));

    let maintenance = MaintenanceTask::new(
        Arc::new(store.maintenance()),
        MaintenanceConfig {
            job_retention_days: cfg.job_retention_days,
            ..MaintenanceConfig::default()
        },
    );
    tasks.push((
        "maintenance".to_string(),
        tokio::spawn(run_periodic(
            Arc::new(maintenance),
            Duration::from_secs(cfg.maintenance_interval_hours.max(1) * 3600),
            shutdown.clone(),
        )),
    ));

    tasks.push((
        "continuous updates".to_string(),
        tokio::spawn(run_periodic(
            Arc::new(ContinuousUpdates::new(scheduler)),
            Duration::from_secs(cfg.update_poll_secs),
            shutdown,
        )),
    ));

    info!(mode = %cfg.mode, host = %cfg.host, port = cfg.port, "Server ready");
    Ok(Running { tasks, store })
}

/// Worker role: queue workers whose reports travel through the store
pub async fn run_worker(cfg: &DaemonConfig, shutdown: ShutdownToken) -> Result<Running> {
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = open_store(cfg, time_provider.clone()).await?;
    let Connectors { backends, writer } = connectors(cfg)?;

    let runner = JobRunner::new(
        backends.clone(),
        Arc::new(store.cache()),
        writer,
        time_provider,
        cfg.retry_policy(),
    );
    let queue: Arc<dyn JobQueue> = Arc::new(store.queue());
    let sink: Arc<dyn ReportSink> = Arc::new(store.reports());
    let queues = served_queues(cfg, &backends);

    info!(workers = cfg.workers, queues = ?queues, "Worker role ready");
    let jobs: Arc<dyn JobStore> = Arc::new(store.jobs());
    let tasks = spawn_workers(cfg, queues, queue, jobs, &runner, sink, &shutdown);
    Ok(Running { tasks, store })
}
