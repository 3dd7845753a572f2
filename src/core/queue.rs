use std::future::Future;
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use super::errors::{Result, UploadError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct QueueState {
    /// 等待空闲槽位的任务数
    waiting: usize,
    /// 正在执行的任务数
    running: usize,
}

struct QueueInner {
    concurrency: usize,
    semaphore: Arc<Semaphore>,
    paused: watch::Sender<bool>,
    state: watch::Sender<QueueState>,
    /// Cancelled by `clear()`, then replaced.
    clear_token: Mutex<CancellationToken>,
}

/// Bounded-concurrency job queue shared by every upload of an uploader.
///
/// Jobs start in submission order. At most `concurrency` jobs run at once,
/// whatever upload they belong to.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (paused, _) = watch::channel(false);
        let (state, _) = watch::channel(QueueState::default());

        Self {
            inner: Arc::new(QueueInner {
                concurrency,
                semaphore: Arc::new(Semaphore::new(concurrency)),
                paused,
                state,
                clear_token: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Runs `job` once a slot is free and the queue is not paused.
    ///
    /// Resolves with [`UploadError::Cancelled`] if `token` fires while the job
    /// waits or runs, or if the queue is cleared before the job started.
    pub async fn add<F, Fut, T>(&self, token: &CancellationToken, job: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cleared = self.inner.clear_token.lock().clone();

        let waiting = CountGuard::waiting(&self.inner);
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(UploadError::cancelled()),
            _ = cleared.cancelled() => return Err(UploadError::cancelled()),
            permit = self.acquire() => permit?,
        };
        drop(waiting);

        let _running = CountGuard::running(&self.inner);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(UploadError::cancelled()),
            result = job() => result,
        };
        drop(permit);
        result
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| UploadError::cancelled())?;

        let mut paused = self.inner.paused.subscribe();
        paused
            .wait_for(|paused| !*paused)
            .await
            .map_err(|_| UploadError::cancelled())?;
        Ok(permit)
    }

    /// Stops starting new jobs. Running jobs are left alone.
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    pub fn start(&self) {
        self.inner.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Drops every job still waiting for a slot.
    pub fn clear(&self) {
        let mut token = self.inner.clear_token.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Jobs waiting for a slot.
    pub fn size(&self) -> usize {
        self.inner.state.borrow().waiting
    }

    /// Jobs currently running.
    pub fn pending(&self) -> usize {
        self.inner.state.borrow().running
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Resolves once nothing waits and nothing runs.
    pub async fn on_idle(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| s.waiting == 0 && s.running == 0).await;
    }

    /// Resolves once no job is running.
    pub async fn on_pending_zero(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| s.running == 0).await;
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("concurrency", &self.inner.concurrency)
            .field("paused", &self.is_paused())
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

enum Counter {
    Waiting,
    Running,
}

struct CountGuard<'a> {
    inner: &'a QueueInner,
    counter: Counter,
}

impl<'a> CountGuard<'a> {
    fn waiting(inner: &'a QueueInner) -> Self {
        inner.state.send_modify(|s| s.waiting += 1);
        Self { inner, counter: Counter::Waiting }
    }

    fn running(inner: &'a QueueInner) -> Self {
        inner.state.send_modify(|s| s.running += 1);
        Self { inner, counter: Counter::Running }
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        match self.counter {
            Counter::Waiting => self.inner.state.send_modify(|s| s.waiting -= 1),
            Counter::Running => self.inner.state.send_modify(|s| s.running -= 1),
        }
    }
}
