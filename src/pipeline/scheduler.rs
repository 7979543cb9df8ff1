use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::error::PipelineError;

const MIN_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSpec {
    pub raw_content: String,
    pub commit_ref: Option<String>,
}

#[async_trait]
pub trait SpecProvider: Send + Sync {
    async fn fetch(&self, source_id: &str) -> Result<FetchedSpec, PipelineError>;
}

#[derive(Debug, Clone, Default)]
pub struct FileSpecProvider {
    paths: HashMap<String, PathBuf>,
}

impl FileSpecProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(source_id.into(), path.into());
        self
    }
}

#[async_trait]
impl SpecProvider for FileSpecProvider {
    async fn fetch(&self, source_id: &str) -> Result<FetchedSpec, PipelineError> {
        let path = self
            .paths
            .get(source_id)
            .ok_or_else(|| PipelineError::Source(format!("no file registered for {source_id}")))?;
        let raw_content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::Source(format!("{}: {e}", path.display())))?;
        Ok(FetchedSpec {
            raw_content,
            commit_ref: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSource {
    pub source_id: String,
    pub project_id: String,
    pub interval: Duration,
}

#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Spawns `job` every `period`, replacing and aborting any timer already
    // registered for `source_id` under the same lock.
    pub fn schedule<F, Fut>(&self, source_id: &str, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let mut timers = self
            .timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                job().await;
            }
        });
        if let Some(previous) = timers.insert(source_id.to_string(), handle) {
            debug!(source_id, "replacing existing timer");
            previous.abort();
        }
    }

    pub fn cancel(&self, source_id: &str) -> bool {
        let removed = self
            .timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(source_id);
        match removed {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut timers = self
            .timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self, source_id: &str) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(source_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;

    fn counting_job(counter: &Arc<AtomicU32>) -> impl Fn() -> std::future::Ready<()> + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn rescheduling_replaces_the_old_timer() {
        let registry = TimerRegistry::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        registry.schedule("s1", Duration::from_millis(20), counting_job(&first));
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.schedule("s1", Duration::from_millis(20), counting_job(&second));
        assert_eq!(registry.active_count(), 1);

        // Give the aborted task time to observe cancellation.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let frozen = first.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(first.load(Ordering::SeqCst), frozen);
        assert!(second.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn cancel_stops_ticks() {
        let registry = TimerRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        registry.schedule("s1", Duration::from_millis(20), counting_job(&counter));
        registry.schedule("s2", Duration::from_millis(20), counting_job(&counter));
        assert!(registry.is_scheduled("s1"));

        assert!(registry.cancel("s1"));
        assert!(!registry.cancel("s1"));
        assert!(!registry.is_scheduled("s1"));
        assert_eq!(registry.active_count(), 1);

        registry.cancel_all();
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn file_provider_reads_registered_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("openapi.yaml");
        std::fs::write(&path, "paths: {}\n").unwrap();

        let provider = FileSpecProvider::new().with_source("openapi", &path);
        let spec = provider.fetch("openapi").await.unwrap();
        assert_eq!(spec.raw_content, "paths: {}\n");
        assert!(matches!(
            provider.fetch("unknown").await,
            Err(PipelineError::Source(_))
        ));
    }
}
