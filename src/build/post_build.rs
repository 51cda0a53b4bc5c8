use std::process::Stdio;
use tokio::process::Command;

use crate::build::log_stream::JobLogStream;

/// Outcome of the optional post-build steps. Every field is `None` when the
/// corresponding tool wasn't found on `$PATH` — missing tooling never fails
/// a build.
#[derive(Debug, Clone, Default)]
pub struct PostBuildResult {
    pub digest: Option<String>,
    pub size_bytes: Option<i64>,
    pub sbom_ref: Option<String>,
    pub signature_ref: Option<String>,
}

async fn tool_available(name: &str) -> bool {
    Command::new(name)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Inspects the pushed image for digest and size using the same container
/// CLI used to build it.
async fn inspect_image(container_cli: &str, image_uri: &str) -> Option<(String, i64)> {
    let output = Command::new(container_cli)
        .args(["manifest", "inspect", image_uri])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let manifest: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    let digest = manifest.get("config")?.get("digest")?.as_str()?.to_string();
    let size = manifest
        .get("layers")
        .and_then(|l| l.as_array())
        .map(|layers| layers.iter().filter_map(|l| l.get("size").and_then(|s| s.as_i64())).sum())
        .unwrap_or(0);
    Some((digest, size))
}

async fn generate_sbom(image_uri: &str) -> Option<String> {
    if !tool_available("syft").await {
        tracing::warn!("syft not found on PATH, skipping SBOM generation");
        return None;
    }
    let output = Command::new("syft")
        .args([image_uri, "-o", "spdx-json"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        tracing::warn!(image_uri, "syft exited non-zero, skipping SBOM for this build");
        return None;
    }
    // Content-addressed by the SBOM's own digest, matching how images are addressed.
    use sha2::Digest;
    let digest = hex::encode(sha2::Sha256::digest(&output.stdout));
    Some(format!("sbom://{digest}"))
}

async fn sign_image(image_uri: &str, key_ref: &str) -> Option<String> {
    if !tool_available("cosign").await {
        tracing::warn!("cosign not found on PATH, skipping image signing");
        return None;
    }
    let status = Command::new("cosign")
        .args(["sign", "--key", key_ref, "--yes", image_uri])
        .status()
        .await
        .ok()?;
    if !status.success() {
        tracing::warn!(image_uri, "cosign sign failed, leaving image unsigned");
        return None;
    }
    Some(format!("{image_uri}.sig"))
}

pub async fn run(
    container_cli: &str,
    image_uri: &str,
    generate_sbom_enabled: bool,
    sign_images_enabled: bool,
    cosign_key: Option<&str>,
    logs: &JobLogStream,
) -> PostBuildResult {
    let mut result = PostBuildResult::default();

    if let Some((digest, size)) = inspect_image(container_cli, image_uri).await {
        logs.push(None, format!("inspected image: digest={digest} size={size}"));
        result.digest = Some(digest);
        result.size_bytes = Some(size);
    } else {
        logs.push(Some("warn".to_string()), "could not inspect image for digest/size".to_string());
    }

    if generate_sbom_enabled {
        result.sbom_ref = generate_sbom(image_uri).await;
        if let Some(ref r) = result.sbom_ref {
            logs.push(None, format!("generated SBOM: {r}"));
        }
    }

    if sign_images_enabled {
        if let Some(key_ref) = cosign_key {
            result.signature_ref = sign_image(image_uri, key_ref).await;
            if let Some(ref r) = result.signature_ref {
                logs.push(None, format!("signed image: {r}"));
            }
        } else {
            logs.push(Some("warn".to_string()), "sign_images enabled but no cosign_key configured".to_string());
        }
    }

    result
}
