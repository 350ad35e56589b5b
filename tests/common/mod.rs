//! Shared test support: an in-memory mock hub provider and a scheduler
//! harness wired against temp directories.

use async_trait::async_trait;
use hf_suite::api::{
    FileDownloadRequest, ProviderFactory, RepoApi, RepoFile, RepoMetadata, SearchFilters,
};
use hf_suite::config::Config;
use hf_suite::download::{ResumeStore, Scheduler};
use hf_suite::error::{Result, SuiteError};
use hf_suite::events::{topic, EventBus};
use hf_suite::storage::{Database, DownloadTask, NewTask, Platform, RepoType, Store};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Controllable in-memory provider.
pub struct MockApi {
    files: Vec<RepoFile>,
    chunk_size: usize,
    chunk_delay: Duration,
    /// Download calls that fail with a transient network error before any
    /// byte is produced; decremented per call.
    transient_failures: AtomicU32,
    served: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn new(files: Vec<(&str, u64)>) -> Self {
        Self::with_files(
            files
                .into_iter()
                .map(|(path, size)| RepoFile {
                    path: path.to_string(),
                    size,
                    ..Default::default()
                })
                .collect(),
        )
    }

    pub fn with_files(files: Vec<RepoFile>) -> Self {
        Self {
            files,
            chunk_size: 1024,
            chunk_delay: Duration::from_millis(1),
            transient_failures: AtomicU32::new(0),
            served: Mutex::new(Vec::new()),
        }
    }

    /// Slow the transfer down so pause/cancel can land mid-file.
    pub fn slow(mut self, chunk_size: usize, chunk_delay: Duration) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_delay = chunk_delay;
        self
    }

    /// Make the next `n` download calls fail with a retryable error.
    pub fn inject_failures(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// File paths actually transferred (resume skips never show up here).
    pub fn served(&self) -> Vec<String> {
        self.served.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepoApi for MockApi {
    fn platform_name(&self) -> &'static str {
        "huggingface"
    }

    async fn get_repo_info(&self, repo_id: &str, repo_type: RepoType) -> Result<RepoMetadata> {
        Ok(RepoMetadata {
            repo_id: repo_id.to_string(),
            platform: "huggingface".to_string(),
            repo_type: repo_type.as_str().to_string(),
            ..Default::default()
        })
    }

    async fn list_files(&self, _repo_id: &str, _repo_type: RepoType) -> Result<Vec<RepoFile>> {
        Ok(self.files.clone())
    }

    async fn download_file(&self, request: &FileDownloadRequest<'_>) -> Result<PathBuf> {
        if self.transient_failures.load(Ordering::SeqCst) > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(SuiteError::Network {
                message: "injected connection reset".to_string(),
                is_transient: true,
            });
        }

        let size = self
            .files
            .iter()
            .find(|f| f.path == request.filename)
            .map(|f| f.size)
            .unwrap_or(0) as usize;

        let dest = request.local_dir.join(request.filename);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }

        let mut written = 0usize;
        let mut buffer = Vec::with_capacity(size);
        while written < size {
            if request.signals.is_cancelled() {
                return Err(SuiteError::Cancelled);
            }
            while request.signals.is_paused() {
                tokio::time::sleep(Duration::from_millis(25)).await;
                if request.signals.is_cancelled() {
                    return Err(SuiteError::Cancelled);
                }
            }

            let step = self.chunk_size.min(size - written);
            buffer.extend(std::iter::repeat(b'x').take(step));
            written += step;

            if let Some(progress) = &request.progress {
                progress(written as u64, size as u64);
            }
            tokio::time::sleep(self.chunk_delay).await;
        }

        tokio::fs::write(&dest, &buffer).await.unwrap();
        self.served
            .lock()
            .unwrap()
            .push(request.filename.to_string());
        Ok(dest)
    }

    async fn search(
        &self,
        _query: &str,
        _limit: usize,
        _filters: &SearchFilters,
    ) -> Result<Vec<RepoMetadata>> {
        Ok(Vec::new())
    }
}

pub struct MockFactory {
    pub api: Arc<MockApi>,
}

#[async_trait]
impl ProviderFactory for MockFactory {
    async fn create(&self, _task: &DownloadTask) -> Result<Arc<dyn RepoApi>> {
        Ok(Arc::clone(&self.api) as Arc<dyn RepoApi>)
    }
}

/// Records every emitted event in order.
#[derive(Clone)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<(String, Value)>>>,
}

impl EventLog {
    pub fn attach(bus: &Arc<EventBus>) -> Self {
        let log = Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        };
        for name in [
            topic::DOWNLOAD_QUEUED,
            topic::DOWNLOAD_STARTED,
            topic::DOWNLOAD_PROGRESS,
            topic::DOWNLOAD_COMPLETED,
            topic::DOWNLOAD_FAILED,
            topic::DOWNLOAD_CANCELLED,
            topic::DOWNLOAD_PAUSED,
            topic::DOWNLOAD_RESUMED,
            topic::QUEUE_CHANGED,
            topic::HISTORY_ADDED,
        ] {
            let entries = Arc::clone(&log.entries);
            let topic_name = name.to_string();
            bus.subscribe(
                name,
                Arc::new(move |payload| {
                    entries
                        .lock()
                        .unwrap()
                        .push((topic_name.clone(), payload.clone()));
                }),
            );
        }
        log
    }

    pub fn all(&self) -> Vec<(String, Value)> {
        self.entries.lock().unwrap().clone()
    }

    /// Event names involving `task_id`, in emission order.
    pub fn names_for(&self, task_id: i64) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|(_, payload)| payload.get("task_id").and_then(Value::as_i64) == Some(task_id))
            .map(|(name, _)| name)
            .collect()
    }

    pub fn count(&self, name: &str, task_id: i64) -> usize {
        self.names_for(task_id)
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }

    pub fn progress_values(&self, task_id: i64) -> Vec<u64> {
        self.all()
            .into_iter()
            .filter(|(name, payload)| {
                name == topic::DOWNLOAD_PROGRESS
                    && payload.get("task_id").and_then(Value::as_i64) == Some(task_id)
            })
            .filter_map(|(_, payload)| payload.get("downloaded_bytes").and_then(Value::as_u64))
            .collect()
    }
}

pub struct TestHarness {
    pub temp: TempDir,
    pub store: Store,
    pub events: Arc<EventBus>,
    pub scheduler: Arc<Scheduler>,
    pub resume: ResumeStore,
    pub api: Arc<MockApi>,
    pub log: EventLog,
}

impl TestHarness {
    pub async fn new(api: Arc<MockApi>) -> Self {
        Self::with_config(api, |_| {}).await
    }

    pub async fn with_config(api: Arc<MockApi>, configure: impl FnOnce(&mut Config)) -> Self {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("suite.db")).await.unwrap();
        let store = Store::new(db);
        let events = Arc::new(EventBus::new());
        let resume = ResumeStore::new(temp.path().join("resume_states"));

        let mut config = Config::default();
        config.download.retry_delay = 1;
        configure(&mut config);

        let factory = Arc::new(MockFactory {
            api: Arc::clone(&api),
        });
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::clone(&events),
            resume.clone(),
            &config,
            factory,
        );
        let log = EventLog::attach(&events);

        Self {
            temp,
            store,
            events,
            scheduler,
            resume,
            api,
            log,
        }
    }

    pub fn save_dir(&self) -> PathBuf {
        self.temp.path().join("downloads")
    }

    pub fn new_task(&self, repo_id: &str) -> NewTask {
        NewTask::new(
            repo_id,
            self.save_dir().to_str().unwrap(),
            Platform::Huggingface,
            RepoType::Model,
        )
    }

    pub async fn wait_for_status(
        &self,
        task_id: i64,
        status: hf_suite::storage::TaskStatus,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(Some(task)) = self.store.get_task(task_id).await {
                if task.status == status {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}
