use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Notify, Semaphore};

/// Caps in-flight requests against one upstream API and parks new work while
/// a quota window recovers.
///
/// Wrap in an `Arc` via [`Throttler::new`] and call [`Throttler::acquire`]
/// before each request. When an upstream reports quota exhaustion, call
/// [`Throttler::pause_until_after`] with the window's reset time; overlapping
/// pauses resolve to the longest one.
#[derive(Debug)]
pub struct Throttler {
    semaphore: Arc<Semaphore>,
    paused: AtomicBool,
    resume: Notify,
    /// When the active pause expires, so the longest of overlapping pauses wins.
    resume_at: std::sync::Mutex<Option<Instant>>,
}

impl Throttler {
    /// Slack required before a new pause supersedes an active one, so
    /// concurrent tasks that all saw the same reset header don't each
    /// reschedule the wakeup.
    const MIN_PAUSE_EXTENSION: Duration = Duration::from_secs(1);

    pub fn new(max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            resume_at: std::sync::Mutex::new(None),
        })
    }

    /// Wait until unpaused, then take a concurrency slot. Hold the returned
    /// permit for the duration of the request.
    pub async fn acquire(&self) -> tokio::sync::OwnedSemaphorePermit {
        loop {
            if self.paused.load(Ordering::Acquire) {
                self.resume.notified().await;
                continue;
            }

            return Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Park new request dispatch for `duration`, then resume automatically.
    ///
    /// Requests already in flight are not interrupted. Returns `false` when an
    /// equivalent or longer pause is already active.
    pub fn pause_until_after(self: &Arc<Self>, duration: Duration) -> bool {
        let new_resume_at = Instant::now() + duration;

        {
            let mut guard = self.resume_at.lock().expect("lock not poisoned");
            if guard.is_some_and(|existing| existing + Self::MIN_PAUSE_EXTENSION >= new_resume_at) {
                return false;
            }
            *guard = Some(new_resume_at);
        }

        self.paused.store(true, Ordering::Release);
        let this = Arc::clone(self);
        drop(tokio::spawn(async move {
            tokio::time::sleep(duration).await;

            let should_resume = {
                let mut guard = this.resume_at.lock().expect("lock not poisoned");
                if guard.is_some_and(|t| Instant::now() >= t) {
                    *guard = None;
                    true
                } else {
                    // A longer pause superseded this one.
                    false
                }
            };

            if should_resume {
                this.paused.store(false, Ordering::Release);
                this.resume.notify_waiters();
            }
        }));

        true
    }
}
