use anyhow::Result;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::adapters::git::GitHost;
use crate::build::builder::{BuildOutcome, BuildRequest, Builder};
use crate::build::log_stream::JobLogStream;
use crate::build::registry::RegistryProvider;
use crate::build::{auto_detect, post_build};
use crate::db::models::{BuildConfig, BuildJobStatus};
use crate::metrics::{BUILDS_TOTAL, BUILD_DURATION_SECONDS, BUILD_QUEUE_LENGTH};
use crate::settings::BuildSettings;

/// Handle shared with HTTP handlers so they can look up a job's live or
/// buffered log stream without reaching into the dispatcher's internals.
pub struct BuildQueueHandle {
    streams: Mutex<HashMap<Uuid, Arc<JobLogStream>>>,
}

impl Default for BuildQueueHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildQueueHandle {
    pub fn new() -> Self {
        Self { streams: Mutex::new(HashMap::new()) }
    }

    pub fn stream_for(&self, job_id: Uuid) -> Arc<JobLogStream> {
        self.streams
            .lock()
            .unwrap()
            .entry(job_id)
            .or_insert_with(|| Arc::new(JobLogStream::new(job_id)))
            .clone()
    }

    fn drop_stream(&self, job_id: Uuid) {
        self.streams.lock().unwrap().remove(&job_id);
    }
}

/// Long-lived dispatcher task: pulls leasable jobs from the store up to
/// `build_concurrency` at a time, runs each on its own task, and reaps
/// expired leases / wall-clock timeouts on a fixed tick.
pub struct Dispatcher {
    pool: PgPool,
    builder: Arc<dyn Builder>,
    git_host: Arc<dyn GitHost>,
    registry: Option<Arc<dyn RegistryProvider>>,
    settings: BuildSettings,
    worker_id: String,
    queue: Arc<BuildQueueHandle>,
}

impl Dispatcher {
    pub fn new(
        pool: PgPool,
        builder: Arc<dyn Builder>,
        git_host: Arc<dyn GitHost>,
        registry: Option<Arc<dyn RegistryProvider>>,
        settings: BuildSettings,
        queue: Arc<BuildQueueHandle>,
    ) -> Self {
        Self { pool, builder, git_host, registry, settings, worker_id: format!("enclii-{}", Uuid::new_v4()), queue }
    }

    pub fn spawn(self: Arc<Self>) {
        let dispatch = self.clone();
        tokio::spawn(async move { dispatch.dispatch_loop().await });
        let reap = self.clone();
        tokio::spawn(async move { reap.reap_loop().await });
    }

    async fn dispatch_loop(&self) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.settings.build_concurrency));
        loop {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            match crate::db::build_jobs::lease_next(
                &self.pool,
                &self.worker_id,
                self.settings.lease_duration_secs as i64,
                self.settings.max_lease_attempts as i32,
            )
            .await
            {
                Ok(Some(job)) => {
                    let pool = self.pool.clone();
                    let builder = self.builder.clone();
                    let git_host = self.git_host.clone();
                    let registry = self.registry.clone();
                    let settings = self.settings.clone();
                    let queue = self.queue.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        run_job(pool, builder, git_host, registry, settings, queue, job).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = ?e, "failed to lease next build job");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }

            if let Ok(queued) = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM build_jobs WHERE status = 'Queued'")
                .fetch_one(&self.pool)
                .await
            {
                BUILD_QUEUE_LENGTH.with_label_values(&["default"]).set(queued as f64);
            }
        }
    }

    async fn reap_loop(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            if let Err(e) = crate::db::build_jobs::reap_expired_leases(&self.pool, self.settings.max_lease_attempts as i32).await {
                tracing::error!(error = ?e, "failed to reap expired build job leases");
            }
            match crate::db::build_jobs::timed_out_jobs(&self.pool).await {
                Ok(jobs) => {
                    for job in jobs {
                        tracing::warn!(job_id = %job.id, "build job exceeded its timeout");
                        let _ = crate::db::build_jobs::mark_terminal(&self.pool, job.id, BuildJobStatus::Failed, Some("timeout"), Some("build exceeded configured timeout")).await;
                        let _ = crate::db::releases::mark_failed(&self.pool, job.release_id, "build timed out").await;
                        BUILDS_TOTAL.with_label_values(&["timeout"]).inc();
                        self.queue.drop_stream(job.id);
                    }
                }
                Err(e) => tracing::error!(error = ?e, "failed to list timed-out build jobs"),
            }
        }
    }
}

async fn run_job(
    pool: PgPool,
    builder: Arc<dyn Builder>,
    git_host: Arc<dyn GitHost>,
    registry: Option<Arc<dyn RegistryProvider>>,
    settings: BuildSettings,
    queue: Arc<BuildQueueHandle>,
    job: crate::db::models::BuildJob,
) {
    let started = std::time::Instant::now();
    let logs = queue.stream_for(job.id);
    let span = tracing::info_span!("build_job", job_id = %job.id, release_id = %job.release_id, sha = %job.git_sha);
    let _enter = span.enter();

    let result = execute(&pool, &builder, &git_host, registry.as_ref(), &settings, &logs, &job).await;
    let outcome_label = if result.is_ok() { "success" } else { "failure" };

    match result {
        Ok(outcome) => {
            logs.push(None, format!("build succeeded: {}", outcome.image_uri));
            let _ = crate::db::build_jobs::mark_terminal(&pool, job.id, BuildJobStatus::Succeeded, None, None).await;
            BUILDS_TOTAL.with_label_values(&["success"]).inc();
        }
        Err(e) => {
            tracing::error!(error = ?e, "build job failed");
            logs.push(Some("error".to_string()), format!("build failed: {e:#}"));
            let _ = crate::db::build_jobs::mark_terminal(&pool, job.id, BuildJobStatus::Failed, Some("build_failed"), Some(&e.to_string())).await;
            let _ = crate::db::releases::mark_failed(&pool, job.release_id, &e.to_string()).await;
            BUILDS_TOTAL.with_label_values(&["failure"]).inc();
        }
    }

    BUILD_DURATION_SECONDS.with_label_values(&[outcome_label]).observe(started.elapsed().as_secs_f64());
}

async fn execute(
    pool: &PgPool,
    builder: &Arc<dyn Builder>,
    git_host: &Arc<dyn GitHost>,
    registry: Option<&Arc<dyn RegistryProvider>>,
    settings: &BuildSettings,
    logs: &JobLogStream,
    job: &crate::db::models::BuildJob,
) -> Result<BuildOutcome> {
    crate::db::releases::mark_building(pool, job.release_id).await?;

    let workdir = tempfile::tempdir()?;
    git_host.checkout(&job.git_repo_url, job.git_branch.as_deref(), &job.git_sha, workdir.path(), logs).await?;

    let mut build_config: BuildConfig = serde_json::from_value(job.build_config.clone())?;
    if matches!(build_config, BuildConfig::Auto) {
        build_config = auto_detect::detect(workdir.path());
        logs.push(None, format!("auto-detected build config: {build_config:?}"));
    }

    let repository = job.project_id.to_string();
    let (registry_url, username, password) = match registry {
        Some(provider) => {
            let creds = provider.get_credentials(&repository).await?;
            (creds.registry_url, creds.username, creds.password)
        }
        None => (format!("enclii-local/{repository}"), String::new(), String::new()),
    };
    let short_sha = &job.git_sha[..job.git_sha.len().min(8)];
    let image_tag = format!("{registry_url}:{short_sha}");

    let request = BuildRequest {
        job_id: job.id,
        workdir: workdir.path().to_path_buf(),
        build_config,
        image_tag: image_tag.clone(),
        registry_username: username,
        registry_password: password,
    };

    let started = std::time::Instant::now();
    let outcome = builder.build(&request, logs).await?;

    let post = post_build::run(
        "docker",
        &outcome.image_uri,
        settings.generate_sbom,
        settings.sign_images,
        settings.cosign_key.as_deref(),
        logs,
    )
    .await;

    crate::db::releases::mark_ready(
        pool,
        job.release_id,
        &outcome.image_uri,
        post.digest.as_deref().unwrap_or_default(),
        post.size_bytes.unwrap_or(0),
        post.sbom_ref.map(|r| serde_json::json!({ "ref": r })),
        post.sbom_ref.as_ref().map(|_| "spdx-json"),
        post.signature_ref.as_deref(),
        started.elapsed().as_millis() as i64,
    )
    .await?;

    Ok(outcome)
}
