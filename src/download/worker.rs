//! Download worker: executes one task end to end
//!
//! One-shot: a worker is created for a task, runs to a terminal outcome
//! (completed, failed, or cancelled), and is never reused.
//!
//! Execution shape:
//! - pre-flight: plan the file list, estimate bytes, check free disk space,
//!   create the destination directory
//! - fetch loop: one provider call per file, skipping files the resume
//!   sidecar already marks complete; pause parks the loop (persisting the
//!   sidecar), cancel exits it
//! - retry scope around the whole attempt: non-retryable errors and
//!   cancellation short-circuit; otherwise exponential backoff sleeps in
//!   one-second steps so cancel is observed within a second
//!
//! Control arrives through watch channels owned by the scheduler; progress
//! leaves through a store/event pump fed by the throttled tracker. Store
//! errors on progress writes are logged and dropped; store errors on the
//! terminal status transition fail the task but never the process.

use crate::api::{FileDownloadRequest, ProgressFn, RepoApi, RepoFile};
use crate::api::transfer::{self, TransferSignals};
use crate::config::DownloadSettings;
use crate::download::progress::{ProgressInfo, ProgressTracker};
use crate::download::resume::{ResumeState, ResumeStore};
use crate::error::{Result, SuiteError};
use crate::events::{topic, EventBus};
use crate::paths::available_disk_space;
use crate::storage::models::{DownloadTask, NewHistoryEntry, TaskPatch, TaskStatus};
use crate::storage::{FileEntryUpsert, Store};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

const PAUSE_POLL: Duration = Duration::from_millis(500);

/// Scheduler-held handle that signals a running worker.
#[derive(Debug)]
pub struct WorkerControl {
    pause_tx: watch::Sender<bool>,
    cancel_tx: watch::Sender<bool>,
}

impl WorkerControl {
    pub fn pause(&self) {
        let _ = self.pause_tx.send(true);
    }

    pub fn resume(&self) {
        let _ = self.pause_tx.send(false);
    }

    /// One-way; also clears pause so a paused worker can observe it.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        let _ = self.pause_tx.send(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }
}

/// Create the control handle plus the signal bundle a worker observes.
pub fn control_channel() -> (WorkerControl, TransferSignals) {
    let (pause_tx, pause) = watch::channel(false);
    let (cancel_tx, cancel) = watch::channel(false);
    (
        WorkerControl {
            pause_tx,
            cancel_tx,
        },
        TransferSignals { pause, cancel },
    )
}

/// Shared collaborators a worker needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Store,
    pub events: Arc<EventBus>,
    pub resume: ResumeStore,
    pub settings: DownloadSettings,
}

struct CompletedDownload {
    dest_dir: PathBuf,
    total_bytes: u64,
    downloaded_bytes: u64,
}

enum Outcome {
    Completed(CompletedDownload),
    Failed(SuiteError),
    Cancelled,
}

/// Executes a single task.
pub struct DownloadWorker {
    task: DownloadTask,
    api: Arc<dyn RepoApi>,
    ctx: WorkerContext,
    signals: TransferSignals,
}

impl DownloadWorker {
    pub fn new(
        task: DownloadTask,
        api: Arc<dyn RepoApi>,
        ctx: WorkerContext,
        signals: TransferSignals,
    ) -> Self {
        Self {
            task,
            api,
            ctx,
            signals,
        }
    }

    /// Run to a terminal outcome. Consumes the worker.
    pub async fn run(self) {
        let task_id = self.task.id;
        let started_at = self.task.started_at.unwrap_or_else(Utc::now);

        let outcome = self.run_with_retries().await;

        match outcome {
            Outcome::Completed(done) => {
                let patch = TaskPatch {
                    status: Some(TaskStatus::Completed),
                    total_bytes: Some(done.total_bytes.max(done.downloaded_bytes)),
                    downloaded_bytes: Some(done.downloaded_bytes),
                    speed_bps: Some(0.0),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                };
                if let Err(e) = self.ctx.store.update_task(task_id, &patch).await {
                    error!(task_id, "failed to persist completion: {e}");
                    self.ctx.events.emit(
                        topic::DOWNLOAD_FAILED,
                        json!({"task_id": task_id, "error": e.to_string()}),
                    );
                    return;
                }

                let duration = (Utc::now() - started_at).num_seconds().max(0) as u64;
                let history = NewHistoryEntry {
                    repo_id: self.task.repo_id.clone(),
                    platform: self.task.platform,
                    repo_type: self.task.repo_type,
                    save_path: done.dest_dir.display().to_string(),
                    total_bytes: done.total_bytes.max(done.downloaded_bytes),
                    duration_seconds: duration,
                    tags: Vec::new(),
                };
                match self.ctx.store.append_history(&history).await {
                    Ok(history_id) => self.ctx.events.emit(
                        topic::HISTORY_ADDED,
                        json!({"id": history_id, "repo_id": self.task.repo_id}),
                    ),
                    Err(e) => error!(task_id, "failed to append history: {e}"),
                }

                self.ctx.resume.clear(task_id).await;

                self.ctx.events.emit(
                    topic::DOWNLOAD_COMPLETED,
                    json!({"task_id": task_id, "path": done.dest_dir.display().to_string()}),
                );
                info!(task_id, repo_id = %self.task.repo_id, "download completed");
            }
            Outcome::Failed(e) => {
                let message = e.to_string();
                let patch = TaskPatch {
                    status: Some(TaskStatus::Failed),
                    error_message: Some(message.clone()),
                    speed_bps: Some(0.0),
                    ..Default::default()
                };
                if let Err(persist_err) = self.ctx.store.update_task(task_id, &patch).await {
                    error!(task_id, "failed to persist failure: {persist_err}");
                }

                self.ctx.events.emit(
                    topic::DOWNLOAD_FAILED,
                    json!({
                        "task_id": task_id,
                        "error": message,
                        "suggestion": e.suggestion(),
                    }),
                );
                error!(task_id, repo_id = %self.task.repo_id, "download failed: {message}");
            }
            Outcome::Cancelled => {
                // The scheduler already flipped the row and emitted
                // download.cancelled; this write is an idempotent backstop
                // for shutdown paths.
                let _ = self
                    .ctx
                    .store
                    .update_task(
                        task_id,
                        &TaskPatch {
                            status: Some(TaskStatus::Cancelled),
                            speed_bps: Some(0.0),
                            ..Default::default()
                        },
                    )
                    .await;
                info!(task_id, repo_id = %self.task.repo_id, "download cancelled");
            }
        }
    }

    async fn run_with_retries(&self) -> Outcome {
        let max_retries = if self.ctx.settings.auto_retry {
            self.ctx.settings.max_retries
        } else {
            0
        };

        let mut attempt: u32 = 0;
        loop {
            match self.execute_attempt().await {
                Ok(done) => return Outcome::Completed(done),
                Err(SuiteError::Cancelled) => return Outcome::Cancelled,
                Err(e) if !e.is_retryable() => return Outcome::Failed(e),
                Err(e) => {
                    if attempt >= max_retries {
                        return Outcome::Failed(e);
                    }

                    let delay = self
                        .ctx
                        .settings
                        .retry_delay
                        .saturating_mul(1u64 << attempt.min(16));
                    warn!(
                        task_id = self.task.id,
                        attempt = attempt + 1,
                        delay,
                        "attempt failed ({e}), retrying"
                    );

                    attempt += 1;
                    let _ = self
                        .ctx
                        .store
                        .update_task(
                            self.task.id,
                            &TaskPatch {
                                retry_count: Some(attempt),
                                ..Default::default()
                            },
                        )
                        .await;

                    if !self.backoff_wait(delay).await {
                        return Outcome::Cancelled;
                    }
                }
            }
        }
    }

    /// Sleep `seconds` in one-second steps; false when cancel fired.
    async fn backoff_wait(&self, seconds: u64) -> bool {
        for _ in 0..seconds {
            if self.signals.is_cancelled() {
                return false;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        !self.signals.is_cancelled()
    }

    async fn execute_attempt(&self) -> Result<CompletedDownload> {
        // Pre-flight: plan files and estimate the total.
        let files = self.plan_files().await?;
        let estimate: u64 = files.iter().map(|f| f.size).sum();

        self.check_disk_space(estimate)?;

        if let Err(e) = self
            .ctx
            .store
            .update_task(
                self.task.id,
                &TaskPatch {
                    total_bytes: Some(estimate),
                    ..Default::default()
                },
            )
            .await
        {
            debug!(task_id = self.task.id, "failed to persist size estimate: {e}");
        }

        let dest_dir = PathBuf::from(&self.task.save_path).join(self.task.repo_name());
        tokio::fs::create_dir_all(&dest_dir).await?;

        let mut state = self.ctx.resume.load(self.task.id).await;
        let completed_bytes: u64 = files
            .iter()
            .filter(|f| state.completed_files.contains(&f.path))
            .map(|f| f.size)
            .sum();

        let tracker = Arc::new(Mutex::new(ProgressTracker::new(self.task.id, estimate)));
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(progress_pump(
            self.ctx.store.clone(),
            Arc::clone(&self.ctx.events),
            self.signals.cancel.clone(),
            progress_rx,
        ));

        let result = self
            .fetch_all(&files, &mut state, &tracker, &progress_tx, &dest_dir, completed_bytes)
            .await;

        drop(progress_tx);
        let _ = pump.await;

        result.map(|downloaded_bytes| CompletedDownload {
            dest_dir,
            total_bytes: estimate,
            downloaded_bytes,
        })
    }

    /// Ordered list of files this task transfers: the selection when one was
    /// given (in selection order), otherwise the whole listing.
    async fn plan_files(&self) -> Result<Vec<RepoFile>> {
        let listing = self
            .api
            .list_files(&self.task.repo_id, self.task.repo_type)
            .await?;

        if self.task.selected_files.is_empty() {
            return Ok(listing);
        }

        let by_path: HashMap<&str, &RepoFile> =
            listing.iter().map(|f| (f.path.as_str(), f)).collect();

        Ok(self
            .task
            .selected_files
            .iter()
            .map(|path| {
                by_path.get(path.as_str()).map(|f| (*f).clone()).unwrap_or(RepoFile {
                    path: path.clone(),
                    ..Default::default()
                })
            })
            .collect())
    }

    fn check_disk_space(&self, estimate: u64) -> Result<()> {
        if estimate == 0 {
            debug!(
                task_id = self.task.id,
                "size estimate unavailable, skipping disk space check"
            );
            return Ok(());
        }

        let save_path = Path::new(&self.task.save_path);
        let Some(available) = available_disk_space(save_path) else {
            warn!(
                task_id = self.task.id,
                "could not determine free space for {}", self.task.save_path
            );
            return Ok(());
        };

        let required = estimate + estimate / 10; // 10% headroom
        if available < required {
            return Err(SuiteError::InsufficientSpace {
                required,
                available,
                path: self.task.save_path.clone(),
            });
        }

        debug!(
            task_id = self.task.id,
            required, available, "disk space check passed"
        );
        Ok(())
    }

    async fn fetch_all(
        &self,
        files: &[RepoFile],
        state: &mut ResumeState,
        tracker: &Arc<Mutex<ProgressTracker>>,
        progress_tx: &mpsc::UnboundedSender<ProgressInfo>,
        dest_dir: &Path,
        mut base_bytes: u64,
    ) -> Result<u64> {
        let files_total = files.len();
        let already_done = files
            .iter()
            .filter(|f| state.completed_files.contains(&f.path))
            .count();

        {
            let mut t = tracker.lock().unwrap();
            t.set_files(already_done, files_total);
            if let Some(info) = t.update(base_bytes) {
                let _ = progress_tx.send(info);
            }
        }

        for (i, file) in files.iter().enumerate() {
            if self.signals.is_cancelled() {
                return Err(SuiteError::Cancelled);
            }

            if state.completed_files.contains(&file.path) {
                state.files_completed = i + 1;
                debug!(task_id = self.task.id, file = %file.path, "already complete, skipping");
                continue;
            }

            while self.signals.is_paused() {
                state.current_file = Some(file.path.clone());
                if let Err(e) = self.ctx.resume.save(self.task.id, state).await {
                    warn!(task_id = self.task.id, "failed to save resume state: {e}");
                }
                tracker.lock().unwrap().reset_speed();
                tokio::time::sleep(PAUSE_POLL).await;
                if self.signals.is_cancelled() {
                    return Err(SuiteError::Cancelled);
                }
            }

            state.current_file = Some(file.path.clone());
            {
                let mut t = tracker.lock().unwrap();
                t.set_current_file(Some(file.path.clone()));
                t.set_files(i, files_total);
            }

            let progress: ProgressFn = {
                let tracker = Arc::clone(tracker);
                let progress_tx = progress_tx.clone();
                let base = base_bytes;
                Arc::new(move |file_done, _file_total| {
                    let mut t = tracker.lock().unwrap();
                    if let Some(info) = t.update(base + file_done) {
                        let _ = progress_tx.send(info);
                    }
                })
            };

            let request = FileDownloadRequest {
                repo_id: &self.task.repo_id,
                filename: &file.path,
                local_dir: dest_dir,
                repo_type: self.task.repo_type,
                progress: Some(progress),
                signals: self.signals.clone(),
                bandwidth_limit: self.ctx.settings.bandwidth_limit,
            };
            let local_path = self.api.download_file(&request).await?;

            let verified = self.verify_file(file, &local_path).await?;

            let actual_size = tokio::fs::metadata(&local_path)
                .await
                .map(|m| m.len())
                .unwrap_or(file.size);
            base_bytes += if file.size > 0 { file.size } else { actual_size };

            state.completed_files.insert(file.path.clone());
            state.files_completed = i + 1;
            state.downloaded_bytes = base_bytes;
            if let Err(e) = self.ctx.resume.save(self.task.id, state).await {
                warn!(task_id = self.task.id, "failed to save resume state: {e}");
            }

            let entry = FileEntryUpsert {
                path: file.path.clone(),
                size: actual_size,
                downloaded_bytes: actual_size,
                status: TaskStatus::Completed,
                checksum: file.sha256.clone(),
                verified,
            };
            if let Err(e) = self.ctx.store.upsert_file_entry(self.task.id, &entry).await {
                debug!(task_id = self.task.id, "failed to record file entry: {e}");
            }

            let mut t = tracker.lock().unwrap();
            t.set_files(i + 1, files_total);
            if let Some(info) = t.update(base_bytes) {
                let _ = progress_tx.send(info);
            }
        }

        let final_info = {
            let mut t = tracker.lock().unwrap();
            t.set_current_file(None);
            t.set_files(files_total, files_total);
            t.force_snapshot()
        };
        let _ = progress_tx.send(final_info);

        Ok(base_bytes)
    }

    /// Compare the fetched file against the listing checksum when both the
    /// setting and a checksum are present. Mismatch is task-fatal.
    async fn verify_file(&self, file: &RepoFile, local_path: &Path) -> Result<bool> {
        if !self.ctx.settings.verify_checksums {
            return Ok(false);
        }
        let Some(expected) = &file.sha256 else {
            return Ok(false);
        };

        let actual = transfer::file_sha256(local_path).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(SuiteError::FileVerification {
                path: local_path.display().to_string(),
                expected: expected.clone(),
                actual,
            });
        }
        debug!(task_id = self.task.id, file = %file.path, "checksum verified");
        Ok(true)
    }
}

/// Receives throttled snapshots, persists them (lossily), and fans them out
/// on the bus. Nothing is emitted once cancel has fired.
async fn progress_pump(
    store: Store,
    events: Arc<EventBus>,
    cancel: watch::Receiver<bool>,
    mut rx: mpsc::UnboundedReceiver<ProgressInfo>,
) {
    while let Some(info) = rx.recv().await {
        if *cancel.borrow() {
            continue;
        }

        let patch = TaskPatch {
            downloaded_bytes: Some(info.downloaded_bytes),
            total_bytes: Some(info.total_bytes),
            speed_bps: Some(info.speed_bps),
            ..Default::default()
        };
        if let Err(e) = store.update_task(info.task_id, &patch).await {
            debug!(task_id = info.task_id, "progress persist failed: {e}");
        }

        let payload = serde_json::to_value(&info).unwrap_or_else(|_| json!({}));
        events.emit(topic::DOWNLOAD_PROGRESS, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_channel_signalling() {
        let (control, signals) = control_channel();
        assert!(!signals.is_paused());
        assert!(!signals.is_cancelled());

        control.pause();
        assert!(signals.is_paused());
        assert!(control.is_paused());

        control.resume();
        assert!(!signals.is_paused());

        control.pause();
        control.cancel();
        assert!(signals.is_cancelled());
        // Cancel clears pause so a parked worker wakes up and exits.
        assert!(!signals.is_paused());
    }
}
