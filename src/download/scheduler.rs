//! Scheduler: priority queue + bounded worker pool
//!
//! One background loop (every 500 ms) pops ready tasks off a min-heap
//! ordered by (priority, submission id) and hands each to a fresh worker,
//! holding the pool at `max_workers` running transfers. Paused workers stay
//! alive (and keep their resume position warm) but do not count against
//! dispatch capacity; resuming re-enqueues the task and the dispatch sweep
//! unpauses the existing worker instead of spawning a second one, so a task
//! id never has two workers.
//!
//! The queue, the worker map, and the paused set live under one mutex;
//! critical sections never touch the store or the network.

use crate::api::ProviderFactory;
use crate::config::Config;
use crate::download::resume::ResumeStore;
use crate::download::worker::{control_channel, DownloadWorker, WorkerControl, WorkerContext};
use crate::error::{Result, SuiteError};
use crate::events::{topic, EventBus};
use crate::storage::models::{DownloadTask, NewTask, TaskPatch, TaskStatus};
use crate::storage::Store;
use chrono::Utc;
use serde_json::json;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Heap entry; min-heap order by (priority, submission id).
#[derive(Debug)]
struct QueueEntry {
    priority: u8,
    seq: i64,
    task: DownloadTask,
}

impl QueueEntry {
    fn new(task: DownloadTask) -> Self {
        Self {
            priority: task.priority,
            seq: task.id,
            task,
        }
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

struct WorkerHandle {
    control: WorkerControl,
    join: JoinHandle<()>,
    paused: bool,
    snapshot: DownloadTask,
}

#[derive(Default)]
struct SchedulerState {
    queue: BinaryHeap<Reverse<QueueEntry>>,
    active: HashMap<i64, WorkerHandle>,
    paused: HashSet<i64>,
    cancelled_pending: HashSet<i64>,
}

/// Snapshot of the scheduler's runtime counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub active_count: usize,
    pub paused_count: usize,
    pub queue_size: usize,
    pub max_workers: usize,
}

/// Process-level download coordinator.
pub struct Scheduler {
    store: Store,
    events: Arc<EventBus>,
    resume: ResumeStore,
    factory: Arc<dyn ProviderFactory>,
    worker_ctx: WorkerContext,
    max_workers: usize,
    state: Mutex<SchedulerState>,
    running: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    /// Owning handle for the background loop; set right after construction.
    me: Mutex<Weak<Scheduler>>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        events: Arc<EventBus>,
        resume: ResumeStore,
        config: &Config,
        factory: Arc<dyn ProviderFactory>,
    ) -> Arc<Self> {
        let worker_ctx = WorkerContext {
            store: store.clone(),
            events: Arc::clone(&events),
            resume: resume.clone(),
            settings: config.download.clone(),
        };

        let scheduler = Arc::new(Self {
            store,
            events,
            resume,
            factory,
            worker_ctx,
            max_workers: config.download.max_workers.clamp(1, 8),
            state: Mutex::new(SchedulerState::default()),
            running: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
            me: Mutex::new(Weak::new()),
        });
        *scheduler.me.lock().unwrap() = Arc::downgrade(&scheduler);
        scheduler
    }

    /// Rehydrate pending tasks from the store and launch the dispatch loop.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let pending = self.store.get_pending().await?;
        if !pending.is_empty() {
            let restored = pending.len();
            {
                let mut state = self.state.lock().unwrap();
                for task in pending {
                    state.queue.push(Reverse(QueueEntry::new(task)));
                }
            }
            info!(restored, "restored pending downloads");
            self.events.emit(topic::QUEUE_CHANGED, json!({}));
        }

        let scheduler = self
            .me
            .lock()
            .unwrap()
            .upgrade()
            .ok_or_else(|| SuiteError::InvalidState("scheduler already dropped".to_string()))?;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while scheduler.running.load(Ordering::SeqCst) {
                interval.tick().await;
                scheduler.sweep().await;
            }
        });
        *self.loop_handle.lock().unwrap() = Some(handle);

        info!(max_workers = self.max_workers, "scheduler started");
        Ok(())
    }

    /// Broadcast cancel to running workers and join the loop within a
    /// bounded grace period. Workers that don't honor cancel in time are
    /// abandoned; their streams close when the runtime drops them.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        {
            let state = self.state.lock().unwrap();
            for handle in state.active.values() {
                handle.control.cancel();
            }
        }

        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
                warn!("scheduler loop did not stop within the grace period");
            }
        }

        info!("scheduler stopped");
    }

    /// Persist and enqueue a new task; returns its id. Priority is clamped
    /// to 1..=10 and the repo id must be `owner/name`.
    pub async fn add(&self, mut new_task: NewTask) -> Result<i64> {
        if !crate::api::validate_repo_id(&new_task.repo_id) {
            return Err(SuiteError::InvalidInput(format!(
                "invalid repository id: '{}'",
                new_task.repo_id
            )));
        }

        new_task.priority = new_task.priority.clamp(1, 10);
        new_task.status = TaskStatus::Queued;

        let id = self.store.add_task(&new_task).await?;
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| SuiteError::Persist("task row vanished after insert".to_string()))?;

        {
            let mut state = self.state.lock().unwrap();
            state.queue.push(Reverse(QueueEntry::new(task)));
        }

        self.events.emit(topic::QUEUE_CHANGED, json!({}));
        self.events.emit(
            topic::DOWNLOAD_QUEUED,
            json!({"task_id": id, "repo_id": new_task.repo_id}),
        );

        info!(task_id = id, repo_id = %new_task.repo_id, "download queued");
        Ok(id)
    }

    /// Pause a running download. False when the id has no running worker.
    pub async fn pause(&self, task_id: i64) -> bool {
        let paused = {
            let mut state = self.state.lock().unwrap();
            match state.active.get_mut(&task_id) {
                Some(handle) if !handle.paused && !handle.join.is_finished() => {
                    handle.control.pause();
                    handle.paused = true;
                    state.paused.insert(task_id);
                    true
                }
                _ => false,
            }
        };
        if !paused {
            return false;
        }

        if let Err(e) = self
            .store
            .update_task(task_id, &TaskPatch::status(TaskStatus::Paused))
            .await
        {
            warn!(task_id, "failed to persist paused status: {e}");
        }
        self.events
            .emit(topic::DOWNLOAD_PAUSED, json!({"task_id": task_id}));

        info!(task_id, "download paused");
        true
    }

    /// Resume a paused download: the task snapshot goes back on the queue
    /// and the next sweep unpauses its (still alive) worker.
    pub async fn resume(&self, task_id: i64) -> bool {
        // Claim the paused entry and take a snapshot, but keep the queue
        // untouched for now.
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            if !state.paused.remove(&task_id) {
                return false;
            }
            state
                .active
                .get(&task_id)
                .map(|handle| handle.snapshot.clone())
        };
        let Some(task) = snapshot else {
            return false;
        };

        // Persist the queued status before the entry becomes poppable.
        // Pushing first would let the sweep dispatch (and mark the row
        // downloading) with this write still in flight, which would then
        // land late and flip an actively-downloading row back to queued.
        // The write is conditional on the row still being paused so a
        // concurrent cancel is not overwritten either.
        let transitioned = match self
            .store
            .transition_status(task_id, TaskStatus::Paused, TaskStatus::Queued)
            .await
        {
            Ok(moved) => moved,
            Err(e) => {
                warn!(task_id, "failed to persist queued status: {e}");
                false
            }
        };
        if !transitioned {
            match self.store.get_task(task_id).await {
                // Cancelled or deleted while paused; nothing left to resume.
                Ok(Some(row)) if row.status.is_terminal() => return false,
                Ok(None) => return false,
                // The earlier paused write never landed; catch the row up.
                Ok(Some(_)) => {
                    if let Err(e) = self
                        .store
                        .update_task(task_id, &TaskPatch::status(TaskStatus::Queued))
                        .await
                    {
                        warn!(task_id, "failed to persist queued status: {e}");
                    }
                }
                Err(e) => warn!(task_id, "could not verify task before resume: {e}"),
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            state.queue.push(Reverse(QueueEntry::new(task)));
        }

        self.events
            .emit(topic::DOWNLOAD_RESUMED, json!({"task_id": task_id}));
        self.events.emit(topic::QUEUE_CHANGED, json!({}));

        info!(task_id, "download resumed");
        true
    }

    /// Cancel a download wherever it currently is: running (signal the
    /// worker), paused, or still queued (tombstoned and dropped on the next
    /// sweep).
    pub async fn cancel(&self, task_id: i64) -> bool {
        let found = {
            let mut state = self.state.lock().unwrap();
            if let Some(handle) = state.active.remove(&task_id) {
                handle.control.cancel();
                state.paused.remove(&task_id);
                true
            } else if state
                .queue
                .iter()
                .any(|Reverse(entry)| entry.task.id == task_id)
            {
                state.cancelled_pending.insert(task_id);
                true
            } else {
                false
            }
        };
        if !found {
            return false;
        }

        if let Err(e) = self
            .store
            .update_task(task_id, &TaskPatch::status(TaskStatus::Cancelled))
            .await
        {
            warn!(task_id, "failed to persist cancelled status: {e}");
        }
        self.events
            .emit(topic::DOWNLOAD_CANCELLED, json!({"task_id": task_id}));
        self.events.emit(topic::QUEUE_CHANGED, json!({}));

        info!(task_id, "download cancelled");
        true
    }

    /// Persist a new priority (clamped). A queued task's position is
    /// corrected by rebuilding the heap; an active task keeps its slot.
    pub async fn set_priority(&self, task_id: i64, priority: u8) -> Result<bool> {
        let priority = priority.clamp(1, 10);
        let matched = self
            .store
            .update_task(
                task_id,
                &TaskPatch {
                    priority: Some(priority),
                    ..Default::default()
                },
            )
            .await?;
        if !matched {
            return Ok(false);
        }

        let mut state = self.state.lock().unwrap();
        let entries: Vec<QueueEntry> = state.queue.drain().map(|Reverse(e)| e).collect();
        for mut entry in entries {
            if entry.task.id == task_id {
                entry.priority = priority;
                entry.task.priority = priority;
            }
            state.queue.push(Reverse(entry));
        }
        Ok(true)
    }

    /// Pause every running download; returns how many were paused.
    pub async fn pause_all(&self) -> usize {
        let ids: Vec<i64> = {
            let state = self.state.lock().unwrap();
            state
                .active
                .iter()
                .filter(|(_, h)| !h.paused)
                .map(|(id, _)| *id)
                .collect()
        };

        let mut count = 0;
        for id in ids {
            if self.pause(id).await {
                count += 1;
            }
        }
        count
    }

    /// Resume every paused download; returns how many were resumed.
    pub async fn resume_all(&self) -> usize {
        let ids: Vec<i64> = {
            let state = self.state.lock().unwrap();
            state.paused.iter().copied().collect()
        };

        let mut count = 0;
        for id in ids {
            if self.resume(id).await {
                count += 1;
            }
        }
        count
    }

    /// Snapshots of tasks currently owned by a worker.
    pub fn get_active(&self) -> Vec<DownloadTask> {
        let state = self.state.lock().unwrap();
        state
            .active
            .values()
            .filter(|h| !h.join.is_finished())
            .map(|h| {
                let mut task = h.snapshot.clone();
                task.status = if h.paused {
                    TaskStatus::Paused
                } else {
                    TaskStatus::Downloading
                };
                task
            })
            .collect()
    }

    pub fn get_queue_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .queue
            .iter()
            .filter(|Reverse(entry)| !state.cancelled_pending.contains(&entry.task.id))
            .count()
    }

    pub fn get_status(&self) -> SchedulerStatus {
        let state = self.state.lock().unwrap();
        let queue_size = state
            .queue
            .iter()
            .filter(|Reverse(entry)| !state.cancelled_pending.contains(&entry.task.id))
            .count();
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            active_count: state
                .active
                .values()
                .filter(|h| !h.join.is_finished())
                .count(),
            paused_count: state.paused.len(),
            queue_size,
            max_workers: self.max_workers,
        }
    }

    /// Drop the resume sidecar for a task (partial files stay on disk).
    pub async fn clear_resume_state(&self, task_id: i64) -> bool {
        self.resume.clear(task_id).await
    }

    /// One pass of the background loop: reap finished workers, then fill
    /// free slots from the queue.
    async fn sweep(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.active.retain(|_, h| !h.join.is_finished());
            let live: HashSet<i64> = state.active.keys().copied().collect();
            state.paused.retain(|id| live.contains(id));
        }

        loop {
            let next = {
                let mut state = self.state.lock().unwrap();
                let running = state
                    .active
                    .values()
                    .filter(|h| !h.paused && !h.join.is_finished())
                    .count();
                if running >= self.max_workers {
                    None
                } else {
                    let mut popped = None;
                    while let Some(Reverse(entry)) = state.queue.pop() {
                        if state.cancelled_pending.remove(&entry.task.id) {
                            debug!(task_id = entry.task.id, "dropping cancelled queue entry");
                            continue;
                        }
                        popped = Some(entry.task);
                        break;
                    }
                    popped
                }
            };

            match next {
                Some(task) => self.dispatch(task).await,
                None => break,
            }
        }
    }

    async fn dispatch(&self, mut task: DownloadTask) {
        // The queue entry is a stale snapshot; the row is authoritative. A
        // task cancelled or deleted after enqueueing must not dispatch.
        match self.store.get_task(task.id).await {
            Ok(Some(current)) if !current.status.is_terminal() => {}
            Ok(_) => {
                debug!(task_id = task.id, "skipping dispatch of terminal or deleted task");
                return;
            }
            Err(e) => {
                warn!(task_id = task.id, "could not re-read task before dispatch: {e}");
                return;
            }
        }

        // A live worker for this id means the pop is a resume marker:
        // unpause it rather than spawning a second worker.
        let unpaused = {
            let mut state = self.state.lock().unwrap();
            match state.active.get_mut(&task.id) {
                Some(handle) if !handle.join.is_finished() => {
                    handle.control.resume();
                    handle.paused = false;
                    true
                }
                Some(_) => {
                    state.active.remove(&task.id);
                    false
                }
                None => false,
            }
        };
        if unpaused {
            if let Err(e) = self
                .store
                .update_task(task.id, &TaskPatch::status(TaskStatus::Downloading))
                .await
            {
                warn!(task_id = task.id, "failed to persist downloading status: {e}");
            }
            debug!(task_id = task.id, "unpaused existing worker");
            return;
        }

        let now = Utc::now();
        task.status = TaskStatus::Downloading;
        task.started_at = Some(task.started_at.unwrap_or(now));

        let patch = TaskPatch {
            status: Some(TaskStatus::Downloading),
            started_at: task.started_at,
            ..Default::default()
        };
        if let Err(e) = self.store.update_task(task.id, &patch).await {
            error!(task_id = task.id, "failed to mark task downloading: {e}");
            self.events.emit(
                topic::DOWNLOAD_FAILED,
                json!({"task_id": task.id, "error": e.to_string()}),
            );
            return;
        }

        let api = match self.factory.create(&task).await {
            Ok(api) => api,
            Err(e) => {
                let message = e.to_string();
                error!(task_id = task.id, "provider construction failed: {message}");
                let _ = self
                    .store
                    .update_task(
                        task.id,
                        &TaskPatch {
                            status: Some(TaskStatus::Failed),
                            error_message: Some(message.clone()),
                            ..Default::default()
                        },
                    )
                    .await;
                self.events.emit(
                    topic::DOWNLOAD_FAILED,
                    json!({"task_id": task.id, "error": message}),
                );
                return;
            }
        };

        // Emit before the spawn so per-task ordering holds: started always
        // precedes the worker's first progress event.
        self.events.emit(
            topic::DOWNLOAD_STARTED,
            json!({"task_id": task.id, "repo_id": task.repo_id}),
        );

        let (control, signals) = control_channel();
        let worker = DownloadWorker::new(task.clone(), api, self.worker_ctx.clone(), signals);
        let join = tokio::spawn(worker.run());

        {
            let mut state = self.state.lock().unwrap();
            state.active.insert(
                task.id,
                WorkerHandle {
                    control,
                    join,
                    paused: false,
                    snapshot: task.clone(),
                },
            );
        }

        info!(task_id = task.id, repo_id = %task.repo_id, "download started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{Platform, RepoType};

    fn entry(id: i64, priority: u8) -> QueueEntry {
        let task = DownloadTask {
            id,
            repo_id: format!("o/r{id}"),
            platform: Platform::Huggingface,
            repo_type: RepoType::Model,
            status: TaskStatus::Queued,
            save_path: "/tmp".to_string(),
            selected_files: Vec::new(),
            total_bytes: 0,
            downloaded_bytes: 0,
            speed_bps: 0.0,
            priority,
            retry_count: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
            profile_id: None,
        };
        QueueEntry::new(task)
    }

    #[test]
    fn test_queue_orders_by_priority_then_id() {
        let mut queue: BinaryHeap<Reverse<QueueEntry>> = BinaryHeap::new();
        queue.push(Reverse(entry(1, 5)));
        queue.push(Reverse(entry(2, 1)));
        queue.push(Reverse(entry(3, 5)));
        queue.push(Reverse(entry(4, 10)));

        let order: Vec<i64> = std::iter::from_fn(|| queue.pop().map(|Reverse(e)| e.task.id)).collect();
        // priority 1 first; equal priority 5 by submission id; 10 last
        assert_eq!(order, vec![2, 1, 3, 4]);
    }
}
