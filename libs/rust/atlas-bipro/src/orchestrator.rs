//! Shipment orchestration
//!
//! Drives the full per-carrier loop: list pending shipments, then per
//! shipment (through a bounded worker pool) download, split, persist all
//! documents plus the raw envelope to the archive, and acknowledge.
//!
//! Ordering guarantee: acknowledge is sent only after every document and
//! the raw envelope of that shipment are durably stored. Shipments with
//! missing multipart parts or failed persists are recorded as failures and
//! never acknowledged; the carrier redelivers them on the next run.

use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::{ArchiveError, ArchiveStore};
use crate::categories::{category_short_name, mime_to_extension};
use crate::error::TransferError;
use crate::transfer::{ListFilter, ShipmentContent, ShipmentInfo, TransferClient};

/// Upper bound on concurrent downloads across all carriers.
pub const DEFAULT_GLOBAL_WORKERS: usize = 20;
/// Upper bound on concurrent downloads per carrier.
pub const DEFAULT_CARRIER_WORKERS: usize = 5;

/// Source type the archive records for BiPRO uploads.
const ARCHIVE_SOURCE: &str = "bipro";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub per_carrier_workers: usize,
    pub global_workers: usize,
    /// Archive box incoming documents land in.
    pub box_type: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            per_carrier_workers: DEFAULT_CARRIER_WORKERS,
            global_workers: DEFAULT_GLOBAL_WORKERS,
            box_type: Some("inbox".to_string()),
        }
    }
}

/// Emitted after each shipment completes (successfully or not).
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub carrier: String,
    pub done: usize,
    pub total: usize,
    /// Shipment id plus category short name, for display.
    pub current: String,
}

/// Per-shipment failure, kept alongside the successes.
#[derive(Debug)]
pub struct ShipmentFailure {
    pub shipment_id: String,
    pub error: TransferError,
}

/// Outcome of one carrier sync.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub carrier: String,
    pub total: usize,
    pub acknowledged: Vec<String>,
    pub failures: Vec<ShipmentFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Handle to a running sync: progress stream, cancellation, result.
pub struct SyncHandle {
    pub progress: mpsc::Receiver<ProgressEvent>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<Result<SyncReport, TransferError>>,
}

impl SyncHandle {
    /// Request cooperative cancellation: no new calls are issued, in-flight
    /// downloads are aborted, nothing partially persisted is acknowledged.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<SyncReport, TransferError> {
        self.task
            .await
            .map_err(|e| TransferError::Fatal(format!("sync task panicked: {e}")))?
    }
}

/// Per-carrier sync driver over a shared archive and global worker budget.
pub struct Orchestrator {
    archive: Arc<dyn ArchiveStore>,
    global_slots: Arc<Semaphore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(archive: Arc<dyn ArchiveStore>, config: OrchestratorConfig) -> Self {
        let global_slots = Arc::new(Semaphore::new(config.global_workers));
        Self {
            archive,
            global_slots,
            config,
        }
    }

    /// Spawn a sync for one carrier and return its handle.
    pub fn spawn_sync(&self, client: Arc<TransferClient>) -> SyncHandle {
        let (progress_tx, progress_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let archive = self.archive.clone();
        let global_slots = self.global_slots.clone();
        let config = self.config.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_sync(archive, global_slots, config, client, progress_tx, task_cancel).await
        });
        SyncHandle {
            progress: progress_rx,
            cancel,
            task,
        }
    }

    /// Run a sync for one carrier to completion (no progress stream).
    pub async fn sync_carrier(
        &self,
        client: Arc<TransferClient>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, TransferError> {
        let (progress_tx, mut progress_rx) = mpsc::channel(64);
        // Drain progress into the void; callers who want events use
        // spawn_sync.
        tokio::spawn(async move { while progress_rx.recv().await.is_some() {} });
        run_sync(
            self.archive.clone(),
            self.global_slots.clone(),
            self.config.clone(),
            client,
            progress_tx,
            cancel.clone(),
        )
        .await
    }
}

async fn run_sync(
    archive: Arc<dyn ArchiveStore>,
    global_slots: Arc<Semaphore>,
    config: OrchestratorConfig,
    client: Arc<TransferClient>,
    progress_tx: mpsc::Sender<ProgressEvent>,
    cancel: CancellationToken,
) -> Result<SyncReport, TransferError> {
    let carrier_name = client.carrier().name.clone();
    let pending = client
        .list_shipments(&ListFilter::default(), &cancel)
        .await?;
    let total = pending.len();
    info!(carrier = %carrier_name, total, "starting shipment sync");

    let mut report = SyncReport {
        carrier: carrier_name.clone(),
        total,
        ..SyncReport::default()
    };

    let carrier_slots = Arc::new(Semaphore::new(config.per_carrier_workers.max(1)));
    let done = Arc::new(AtomicUsize::new(0));
    let mut tasks = JoinSet::new();

    for shipment in pending {
        let archive = archive.clone();
        let client = client.clone();
        let global_slots = global_slots.clone();
        let carrier_slots = carrier_slots.clone();
        let cancel = cancel.clone();
        let progress_tx = progress_tx.clone();
        let done = done.clone();
        let carrier_name = carrier_name.clone();
        let box_type = config.box_type.clone();

        tasks.spawn(async move {
            let result = async {
                let _carrier_permit = tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    permit = carrier_slots.acquire_owned() => permit,
                };
                let _global_permit = tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    permit = global_slots.acquire_owned() => permit,
                };
                process_shipment(archive.as_ref(), &client, &shipment, box_type.as_deref(), &cancel)
                    .await
            }
            .await;

            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = progress_tx
                .send(ProgressEvent {
                    carrier: carrier_name,
                    done: finished,
                    total,
                    current: format!(
                        "{} ({})",
                        shipment.id,
                        category_short_name(&shipment.category)
                    ),
                })
                .await;
            (shipment.id, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((shipment_id, Ok(()))) => report.acknowledged.push(shipment_id),
            Ok((shipment_id, Err(error))) => {
                warn!(carrier = %report.carrier, shipment_id = %shipment_id, error = %error, "shipment failed");
                report.failures.push(ShipmentFailure { shipment_id, error });
            }
            Err(join_error) => {
                report.failures.push(ShipmentFailure {
                    shipment_id: "<unknown>".into(),
                    error: TransferError::Fatal(format!("worker panicked: {join_error}")),
                });
            }
        }
    }

    info!(
        carrier = %report.carrier,
        acknowledged = report.acknowledged.len(),
        failed = report.failures.len(),
        "shipment sync finished"
    );
    Ok(report)
}

/// Download, persist and acknowledge a single shipment.
async fn process_shipment(
    archive: &dyn ArchiveStore,
    client: &TransferClient,
    shipment: &ShipmentInfo,
    box_type: Option<&str>,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    let content = client.get_shipment(&shipment.id, cancel).await?;
    if content.has_missing_parts() {
        return Err(TransferError::Fatal(format!(
            "shipment {} references missing multipart parts; not acknowledging",
            shipment.id
        )));
    }

    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }
    persist_shipment(archive, &content, shipment, box_type).await?;

    if cancel.is_cancelled() {
        // Persisted but not acknowledged: safe, the next run re-downloads
        // and the archive dedupes.
        return Err(TransferError::Cancelled);
    }
    client.acknowledge_shipment(&shipment.id, cancel).await
}

/// Write every document plus the raw envelope to the archive. Filenames
/// follow the house scheme so a box listing reads chronologically.
async fn persist_shipment(
    archive: &dyn ArchiveStore,
    content: &ShipmentContent,
    shipment: &ShipmentInfo,
    box_type: Option<&str>,
) -> Result<(), TransferError> {
    let staging = tempfile::tempdir()
        .map_err(|e| TransferError::Fatal(format!("cannot create staging dir: {e}")))?;

    let date = shipment
        .created_at
        .map(|d| d.date_naive())
        .unwrap_or_else(|| Utc::now().date_naive());
    let carrier = safe_filename(&content.carrier);
    let category = safe_filename(category_short_name(&shipment.category));
    let id = safe_filename(&shipment.id);

    for (index, document) in content.documents.iter().enumerate() {
        let ext = document
            .filename
            .as_deref()
            .and_then(extension_of)
            .unwrap_or_else(|| mime_to_extension(&document.mime_type));
        let filename = format!(
            "Lieferung_Dok_{date}_{carrier}_{category}_{id}_{n}{ext}",
            n = index + 1
        );
        let path = staging.path().join(&filename);
        tokio::fs::write(&path, &document.content)
            .await
            .map_err(|e| TransferError::Fatal(format!("staging write failed: {e}")))?;
        archive
            .upload(&path, ARCHIVE_SOURCE, box_type)
            .await
            .map_err(persist_err)?;
    }

    let raw_filename = format!("Lieferung_Roh_{date}_{carrier}_{id}.xml");
    let raw_path = staging.path().join(&raw_filename);
    tokio::fs::write(&raw_path, content.raw_envelope.as_bytes())
        .await
        .map_err(|e| TransferError::Fatal(format!("staging write failed: {e}")))?;
    archive
        .upload(&raw_path, ARCHIVE_SOURCE, box_type)
        .await
        .map_err(persist_err)?;

    Ok(())
}

fn persist_err(e: ArchiveError) -> TransferError {
    match e {
        ArchiveError::Http(reason) => TransferError::Transient(reason),
        ArchiveError::Status(status) if status >= 500 => {
            TransferError::Transient(format!("archive returned HTTP {status}"))
        }
        other => TransferError::Fatal(format!("archive upload failed: {other}")),
    }
}

/// Known document extension, lowercased, when the carrier's filename has a
/// usable one.
fn extension_of(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(".pdf"),
        "xml" => Some(".xml"),
        "txt" => Some(".txt"),
        "jpg" | "jpeg" => Some(".jpg"),
        "png" => Some(".png"),
        "tif" | "tiff" => Some(".tif"),
        "doc" => Some(".doc"),
        "docx" => Some(".docx"),
        "xls" => Some(".xls"),
        "xlsx" => Some(".xlsx"),
        "zip" => Some(".zip"),
        _ => None,
    }
}

/// Replace everything outside `[A-Za-z0-9._-]` and cap the length.
fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(50)
        .collect()
}
