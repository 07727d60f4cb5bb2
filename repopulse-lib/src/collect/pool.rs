//! Credential rotation for the hosting API.
//!
//! Multiple credentials spread quota consumption: a fetch runs on the current
//! credential until that credential's quota runs dry, then rotates to the
//! next. Each credential remembers when its window resets so a fetch never
//! burns a request on one known to be exhausted.

use super::sources::FetchError;
use chrono::{DateTime, Utc};
use core::sync::atomic::{AtomicUsize, Ordering};
use ohno::app_err;
use std::sync::{Arc, Mutex};

const LOG_TARGET: &str = "      pool";

/// Auth-rejected credentials sit out this long before being tried again.
const AUTH_FAILURE_COOLDOWN_HOURS: i64 = 24;

/// A round-robin pool of API credentials with per-credential exhaustion
/// tracking.
///
/// Generic over the credential type so tests can drive rotation with scripted
/// fakes.
pub struct RotationPool<C> {
    credentials: Vec<Arc<C>>,
    cursor: AtomicUsize,
    exhausted_until: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl<C> RotationPool<C> {
    #[must_use]
    pub fn new(credentials: Vec<C>) -> Self {
        let exhausted = vec![None; credentials.len()];
        Self {
            credentials: credentials.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
            exhausted_until: Mutex::new(exhausted),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Run `f`, rotating through credentials on quota exhaustion or rejection.
    ///
    /// The current credential is sticky across calls. A rate-limited result
    /// marks the credential exhausted until its reset time and moves on; a
    /// rejected credential sits out for a cooldown. When every credential is
    /// exhausted the call fails as rate-limited with the soonest reset time,
    /// without spending a request.
    pub async fn with_rotation<T, F, Fut>(&self, f: F) -> Result<T, FetchError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        if self.credentials.is_empty() {
            return Err(FetchError::Transient(app_err!("no credentials configured")));
        }

        let mut last_auth_error = None;
        let mut saw_rate_limit = false;

        for _ in 0..self.credentials.len() {
            let now = Utc::now();
            let Some((index, credential)) = self.acquire(now) else {
                break;
            };

            match f(credential).await {
                Ok(value) => return Ok(value),
                Err(FetchError::RateLimited { reset_at }) => {
                    log::warn!(target: LOG_TARGET, "Credential #{index} exhausted until {reset_at}, rotating");
                    saw_rate_limit = true;
                    self.mark_exhausted(index, reset_at);
                }
                Err(e @ FetchError::Auth(_)) => {
                    log::warn!(target: LOG_TARGET, "Credential #{index} rejected, cooling down: {e}");
                    self.mark_exhausted(index, now + chrono::Duration::hours(AUTH_FAILURE_COOLDOWN_HOURS));
                    last_auth_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        if saw_rate_limit || last_auth_error.is_none() {
            let reset_at = self.soonest_reset().unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1));
            Err(FetchError::RateLimited { reset_at })
        } else {
            Err(last_auth_error.expect("checked above"))
        }
    }

    /// Mark a credential unusable until `until`.
    pub fn mark_exhausted(&self, index: usize, until: DateTime<Utc>) {
        let mut exhausted = self.exhausted_until.lock().expect("lock not poisoned");
        if let Some(slot) = exhausted.get_mut(index) {
            *slot = Some(until);
        }
    }

    /// The next usable credential, starting from the sticky cursor. `None`
    /// when every credential is currently exhausted: rather than hand back a
    /// credential known to be out of quota, callers fail fast with the
    /// soonest reset time and let the backoff schedule pick the retry up.
    fn acquire(&self, now: DateTime<Utc>) -> Option<(usize, Arc<C>)> {
        let start = self.cursor.load(Ordering::Acquire);
        let mut exhausted = self.exhausted_until.lock().expect("lock not poisoned");

        for offset in 0..self.credentials.len() {
            let index = (start + offset) % self.credentials.len();
            if exhausted[index].is_none_or(|until| until <= now) {
                exhausted[index] = None;
                self.cursor.store(index, Ordering::Release);
                return Some((index, Arc::clone(&self.credentials[index])));
            }
        }

        None
    }

    fn soonest_reset(&self) -> Option<DateTime<Utc>> {
        let exhausted = self.exhausted_until.lock().expect("lock not poisoned");
        exhausted.iter().flatten().min().copied()
    }
}
