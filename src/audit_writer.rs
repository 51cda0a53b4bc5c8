use sqlx::PgPool;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::metrics::AUDIT_WRITER_CRITICAL_TOTAL;

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub outcome: String,
    pub request_id: String,
}

const CHANNEL_CAPACITY: usize = 1024;
const SEND_TIMEOUT: Duration = Duration::from_millis(50);

/// Handle used by handlers/domain services to record an audit event without
/// ever failing the caller's request: `record` never returns an error.
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditWriter {
    /// Spawns the draining task and returns a cheap-to-clone handle. The
    /// fallback file receives newline-delimited JSON when the bounded
    /// channel is saturated past `SEND_TIMEOUT`.
    pub fn spawn(pool: PgPool, fallback_path: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(drain(pool, rx, fallback_path));
        Self { tx }
    }

    pub async fn record(&self, event: AuditEvent) {
        match tokio::time::timeout(SEND_TIMEOUT, self.tx.send(event.clone())).await {
            Ok(Ok(())) => {}
            _ => {
                tracing::error!(
                    actor = %event.actor,
                    action = %event.action,
                    resource = %event.resource,
                    "audit channel saturated past timeout, spilling to fallback store"
                );
                AUDIT_WRITER_CRITICAL_TOTAL.with_label_values(&["channel_saturated"]).inc();
                spill_to_disk(&event).await;
            }
        }
    }
}

async fn drain(pool: PgPool, mut rx: mpsc::Receiver<AuditEvent>, fallback_path: PathBuf) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = crate::db::audit::append(
            &pool,
            &event.actor,
            &event.action,
            &event.resource,
            &event.outcome,
            &event.request_id,
        )
        .await
        {
            tracing::error!(error = ?e, "failed to persist audit entry, spilling to fallback store");
            AUDIT_WRITER_CRITICAL_TOTAL.with_label_values(&["write_failed"]).inc();
            spill_to_disk_at(&fallback_path, &event).await;
        }
    }
}

async fn spill_to_disk(event: &AuditEvent) {
    spill_to_disk_at(&PathBuf::from("./audit-fallback.ndjson"), event).await;
}

async fn spill_to_disk_at(path: &PathBuf, event: &AuditEvent) {
    let line = match serde_json::to_string(&serde_json::json!({
        "actor": event.actor,
        "action": event.action,
        "resource": event.resource,
        "outcome": event.outcome,
        "request_id": event.request_id,
        "spilled_at": chrono::Utc::now().to_rfc3339(),
    })) {
        Ok(line) => line,
        Err(e) => {
            tracing::error!(error = ?e, "failed to serialize audit fallback entry, dropping");
            return;
        }
    };

    let result = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await;

    match result {
        Ok(mut file) => {
            if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                tracing::error!(error = ?e, "failed to append to audit fallback file");
            }
        }
        Err(e) => {
            tracing::error!(error = ?e, "failed to open audit fallback file");
        }
    }
}
