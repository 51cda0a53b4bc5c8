use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::build::log_stream::JobLogStream;
use crate::db::models::BuildConfig;

/// Everything a builder needs to produce and push one image.
pub struct BuildRequest {
    pub job_id: uuid::Uuid,
    pub workdir: std::path::PathBuf,
    pub build_config: BuildConfig,
    pub image_tag: String,
    pub registry_username: String,
    pub registry_password: String,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub image_uri: String,
    pub pushed: bool,
}

/// Either strategy produces the same outcome record; the rest of the system
/// is agnostic to which one ran.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, request: &BuildRequest, logs: &JobLogStream) -> Result<BuildOutcome>;
}

/// Shells out to a local container build tool against an already-cloned
/// working tree.
pub struct LocalBuilder {
    container_cli: String,
}

impl LocalBuilder {
    pub fn new(container_cli: impl Into<String>) -> Self {
        Self { container_cli: container_cli.into() }
    }

    fn dockerfile_args(&self, config: &BuildConfig) -> Result<Vec<String>> {
        match config {
            BuildConfig::Dockerfile { path, context, build_args, target } => {
                let mut args = vec!["-f".to_string(), path.clone()];
                for (k, v) in build_args {
                    args.push("--build-arg".to_string());
                    args.push(format!("{k}={v}"));
                }
                if let Some(t) = target {
                    args.push("--target".to_string());
                    args.push(t.clone());
                }
                args.push(context.clone());
                Ok(args)
            }
            BuildConfig::Buildpack { .. } => bail!("LocalBuilder invoked with a buildpack config; use pack build instead"),
            BuildConfig::Function { .. } => bail!("Function build configs must be resolved to a concrete Dockerfile before building"),
            BuildConfig::Auto => bail!("BuildConfig::Auto must be resolved before dispatch"),
        }
    }
}

#[async_trait]
impl Builder for LocalBuilder {
    async fn build(&self, request: &BuildRequest, logs: &JobLogStream) -> Result<BuildOutcome> {
        if !request.registry_username.is_empty() {
            login(&self.container_cli, &request.registry_password, &request.registry_username, &request.image_tag, logs).await?;
        }

        match &request.build_config {
            BuildConfig::Buildpack { builder } => {
                run_streamed(
                    "pack",
                    &["build", &request.image_tag, "--builder", builder, "--path", &request.workdir.to_string_lossy()],
                    &request.workdir,
                    logs,
                )
                .await?;
            }
            _ => {
                let mut args = vec!["build".to_string(), "-t".to_string(), request.image_tag.clone()];
                args.extend(self.dockerfile_args(&request.build_config)?);
                let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                run_streamed(&self.container_cli, &arg_refs, &request.workdir, logs).await?;
            }
        }

        run_streamed(&self.container_cli, &["push", &request.image_tag], &request.workdir, logs).await?;

        Ok(BuildOutcome { image_uri: request.image_tag.clone(), pushed: true })
    }
}

async fn login(cli: &str, password: &str, username: &str, image_tag: &str, logs: &JobLogStream) -> Result<()> {
    let registry_host = image_tag.split('/').next().unwrap_or(image_tag);
    logs.push(None, format!("authenticating with {registry_host}"));

    use tokio::io::AsyncWriteExt;
    let mut child = Command::new(cli)
        .args(["login", registry_host, "--username", username, "--password-stdin"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn {cli} login"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(password.as_bytes()).await?;
    }
    let status = child.wait().await?;
    if !status.success() {
        bail!("{cli} login failed with status {status}");
    }
    Ok(())
}

async fn run_streamed(cli: &str, args: &[&str], cwd: &Path, logs: &JobLogStream) -> Result<()> {
    logs.push(None, format!("$ {cli} {}", args.join(" ")));

    let mut child = Command::new(cli)
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {cli}"))?;

    let stdout = child.stdout.take().context("child stdout not captured")?;
    let stderr = child.stderr.take().context("child stderr not captured")?;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    loop {
        tokio::select! {
            line = stdout_lines.next_line() => {
                match line? {
                    Some(text) => { logs.push(None, text); }
                    None => break,
                }
            }
            line = stderr_lines.next_line() => {
                if let Some(text) = line? {
                    logs.push(Some("warn".to_string()), text);
                }
            }
        }
    }
    while let Some(text) = stderr_lines.next_line().await? {
        logs.push(Some("warn".to_string()), text);
    }

    let status = child.wait().await?;
    if !status.success() {
        bail!("{cli} {} exited with status {status}", args.first().copied().unwrap_or_default());
    }
    Ok(())
}

/// Creates a short-lived cluster Job running a rootless image builder,
/// watches it to completion, and reads its pod logs as the build log.
#[cfg(feature = "k8s")]
pub struct InClusterBuilder {
    client: kube::Client,
    namespace: String,
    builder_image: String,
}

#[cfg(feature = "k8s")]
impl InClusterBuilder {
    pub fn new(client: kube::Client, namespace: impl Into<String>, builder_image: impl Into<String>) -> Self {
        Self { client, namespace: namespace.into(), builder_image: builder_image.into() }
    }
}

#[cfg(feature = "k8s")]
#[async_trait]
impl Builder for InClusterBuilder {
    async fn build(&self, request: &BuildRequest, logs: &JobLogStream) -> Result<BuildOutcome> {
        use k8s_openapi::api::batch::v1::Job;
        use k8s_openapi::api::core::v1::Pod;
        use kube::api::{Api, DeleteParams, ListParams, PostParams};
        use kube::runtime::wait::{await_condition, conditions};

        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &self.namespace);
        let job_name = format!("enclii-build-{}", request.job_id);

        let manifest = build_job_manifest(&job_name, &self.builder_image, request);
        jobs.create(&PostParams::default(), &manifest).await.context("failed to create build Job")?;

        logs.push(None, format!("dispatched in-cluster build job {job_name}"));

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let lp = ListParams::default().labels(&format!("job-name={job_name}"));
        let pod_name = loop {
            let list = pods.list(&lp).await.context("failed to list build job pods")?;
            if let Some(pod) = list.items.into_iter().next() {
                if let Some(name) = pod.metadata.name {
                    break name;
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        };

        let cond = await_condition(jobs.clone(), &job_name, conditions::is_job_completed());
        tokio::time::timeout(std::time::Duration::from_secs(30 * 60), cond)
            .await
            .context("in-cluster build job timed out")?
            .context("failed waiting for build job completion")?;

        let log_text = pods
            .logs(&pod_name, &Default::default())
            .await
            .unwrap_or_else(|e| format!("<failed to fetch pod logs: {e}>"));
        for line in log_text.lines() {
            logs.push(None, line.to_string());
        }

        let _ = jobs.delete(&job_name, &DeleteParams::background()).await;

        Ok(BuildOutcome { image_uri: request.image_tag.clone(), pushed: true })
    }
}

#[cfg(feature = "k8s")]
fn build_job_manifest(name: &str, builder_image: &str, request: &BuildRequest) -> k8s_openapi::api::batch::v1::Job {
    use k8s_openapi::api::batch::v1::{Job, JobSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    Job {
        metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta::default()),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "builder".to_string(),
                        image: Some(builder_image.to_string()),
                        args: Some(vec![
                            "--destination".to_string(),
                            request.image_tag.clone(),
                        ]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
