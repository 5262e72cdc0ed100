//! The signing key store.
//!
//! Holds the current `KeySet` snapshot behind an `ArcSwap` and owns the
//! background task that refreshes it.
//!
//! # Design
//!
//! - Readers call `snapshot()` and get an `Arc<KeySet>` without locking.
//! - A refresh builds a complete new `KeySet` and swaps it in; in-flight
//!   validations keep the snapshot they loaded.
//! - At most one refresh is pending at a time. Triggers while one is
//!   pending coalesce into it; triggers within `min_refresh_interval` of the
//!   last refresh start are dropped.
//! - `refresh_now` claims the same pending slot. If a refresh is already
//!   pending it waits for it to finish before fetching.
//! - The refresh task holds a `Weak<KeyStore>` and exits once the store is
//!   dropped.
//!
//! # Invariants
//! - `RefreshProgress::pending` is true from a successful claim until the
//!   claiming refresh finishes or is dropped. At most one fetch is in flight.
//! - Installed generations are strictly increasing.
//! - A failed refresh never replaces the installed snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use rand::Rng;
use tokio::sync::{Notify, watch};

use super::{JwkSet, KeySet, KeySource, KeySourceError};

/// Upper bound for the delay between fetch attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Configuration for key set refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Interval between periodic refreshes.
    pub refresh_interval: Duration,
    /// Coalescing window: triggers this soon after a refresh started are dropped.
    pub min_refresh_interval: Duration,
    /// Upper bound for a single fetch attempt.
    pub fetch_timeout: Duration,
    /// Fetch attempts per refresh, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            min_refresh_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(5),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

/// Outcome of `KeyStore::trigger_refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// This call scheduled a new refresh.
    Scheduled,
    /// A refresh was already pending; this call joined it.
    Coalesced,
    /// The last refresh started inside the coalescing window.
    Throttled,
}

/// Refresh state, published on a watch channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshProgress {
    /// Generation of the installed snapshot (0 if none).
    pub generation: u64,
    /// Refreshes finished, successful or not.
    pub completed: u64,
    /// A refresh is scheduled or running.
    pub pending: bool,
}

/// Shared owner of the current signing key set.
pub struct KeyStore {
    current: ArcSwap<KeySet>,
    source: Arc<dyn KeySource>,
    config: RefreshConfig,
    last_refresh_started: Mutex<Option<Instant>>,
    next_generation: AtomicU64,
    notify: Arc<Notify>,
    progress: watch::Sender<RefreshProgress>,
}

impl KeyStore {
    /// Create a store with an empty, never-loaded key set.
    ///
    /// When called inside a tokio runtime the refresh task is spawned
    /// immediately. Call `refresh_now` to load the first snapshot.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn new(source: Arc<dyn KeySource>, config: RefreshConfig) -> Arc<Self> {
        let (progress, _) = watch::channel(RefreshProgress::default());
        let store = Arc::new(Self {
            current: ArcSwap::from_pointee(KeySet::empty()),
            source,
            config,
            last_refresh_started: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            notify: Arc::new(Notify::new()),
            progress,
        });

        // Only spawn if we're inside a tokio runtime (may not be in some test contexts)
        if tokio::runtime::Handle::try_current().is_ok() {
            spawn_refresh_task(
                Arc::downgrade(&store),
                Arc::clone(&store.notify),
                config.refresh_interval,
            );
        }

        store
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    #[must_use]
    pub fn progress(&self) -> RefreshProgress {
        *self.progress.borrow()
    }

    /// Ask the refresh task to fetch a new key set.
    ///
    /// Never blocks and never performs I/O.
    pub fn trigger_refresh(&self) -> RefreshTrigger {
        let mut trigger = RefreshTrigger::Coalesced;
        self.progress.send_if_modified(|progress| {
            if progress.pending {
                return false;
            }
            if self.in_cooldown() {
                trigger = RefreshTrigger::Throttled;
                return false;
            }
            progress.pending = true;
            trigger = RefreshTrigger::Scheduled;
            true
        });

        if trigger == RefreshTrigger::Scheduled {
            self.notify.notify_one();
        }
        trigger
    }

    /// Wait until more than `completed` refreshes have finished.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for_refresh_after(&self, completed: u64, timeout: Duration) -> bool {
        let mut receiver = self.progress.subscribe();
        matches!(
            tokio::time::timeout(
                timeout,
                receiver.wait_for(|progress| progress.completed > completed)
            )
            .await,
            Ok(Ok(_))
        )
    }

    /// Fetch the key set now and install it.
    ///
    /// If another refresh is pending, waits for it to finish first so that
    /// two fetches never overlap. Retries with backoff up to `max_attempts`.
    /// On failure the current snapshot stays installed.
    ///
    /// # Errors
    /// Returns the last `KeySourceError` if every attempt failed.
    pub async fn refresh_now(&self) -> Result<u64, KeySourceError> {
        let mut receiver = self.progress.subscribe();
        while !self.claim_refresh() {
            // The sender lives in `self`, so the channel cannot close here.
            let _ = receiver.wait_for(|progress| !progress.pending).await;
        }
        self.run_claimed_refresh().await
    }

    /// Take the pending slot. Returns `false` if a refresh already holds it.
    fn claim_refresh(&self) -> bool {
        self.progress.send_if_modified(|progress| {
            if progress.pending {
                false
            } else {
                progress.pending = true;
                true
            }
        })
    }

    /// Run a refresh whose pending slot the caller holds.
    async fn run_claimed_refresh(&self) -> Result<u64, KeySourceError> {
        let mut claim = RefreshClaim {
            progress: &self.progress,
            installed: None,
        };
        self.mark_refresh_started();

        match self.fetch_with_retry().await {
            Ok(document) => {
                let generation = self.install(&document);
                claim.installed = Some(generation);
                Ok(generation)
            }
            Err(e) => {
                tracing::warn!(
                    source = %self.source.describe(),
                    error = %e,
                    "key set refresh failed; keeping the current snapshot"
                );
                Err(e)
            }
        }
    }

    fn install(&self, document: &JwkSet) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        let key_set = KeySet::from_jwks(document, generation);
        tracing::info!(
            generation,
            keys = key_set.len(),
            kids = ?key_set.kids(),
            "installed signing key set"
        );
        self.current.store(Arc::new(key_set));
        generation
    }

    async fn fetch_with_retry(&self) -> Result<JwkSet, KeySourceError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.fetch_once().await {
                Ok(document) => return Ok(document),
                Err(e) if attempt < max_attempts => {
                    let delay = with_jitter(backoff);
                    tracing::warn!(attempt, error = %e, ?delay, "key set fetch failed; retrying");
                    tokio::time::sleep(delay).await;
                    backoff = backoff.saturating_mul(2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self) -> Result<JwkSet, KeySourceError> {
        let timeout = self.config.fetch_timeout;
        tokio::time::timeout(timeout, self.source.fetch())
            .await
            .unwrap_or(Err(KeySourceError::Timeout(timeout)))
    }

    fn mark_refresh_started(&self) {
        let mut started = self
            .last_refresh_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *started = Some(Instant::now());
    }

    fn in_cooldown(&self) -> bool {
        let started = self
            .last_refresh_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        started.is_some_and(|at| at.elapsed() < self.config.min_refresh_interval)
    }
}

/// Releases the pending slot and publishes the outcome when a refresh ends,
/// including when its future is dropped mid-fetch.
struct RefreshClaim<'a> {
    progress: &'a watch::Sender<RefreshProgress>,
    installed: Option<u64>,
}

impl Drop for RefreshClaim<'_> {
    fn drop(&mut self) {
        let installed = self.installed;
        self.progress.send_modify(|progress| {
            if let Some(generation) = installed {
                progress.generation = progress.generation.max(generation);
            }
            progress.completed += 1;
            progress.pending = false;
        });
    }
}

impl Drop for KeyStore {
    fn drop(&mut self) {
        // Wake the refresh task so it notices the store is gone. The stored
        // permit covers a task that is between waits.
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

fn with_jitter(base: Duration) -> Duration {
    let max_jitter_ms = u64::try_from(base.as_millis() / 4).unwrap_or(u64::MAX);
    if max_jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
}

/// Spawn the background refresh task for a store.
///
/// The task wakes on triggers and every `refresh_interval`. It exits when
/// the store is dropped (the weak reference no longer upgrades).
pub fn spawn_refresh_task(
    store: Weak<KeyStore>,
    notify: Arc<Notify>,
    refresh_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        refresh_loop(store, notify, refresh_interval).await;
    })
}

async fn refresh_loop(store: Weak<KeyStore>, notify: Arc<Notify>, refresh_interval: Duration) {
    loop {
        let scheduled = tokio::select! {
            () = notify.notified() => true,
            () = tokio::time::sleep(refresh_interval) => false,
        };

        let Some(store) = store.upgrade() else {
            break;
        };

        if !scheduled && !store.claim_refresh() {
            // A refresh is already pending or running.
            continue;
        }

        // Failures are logged inside; the stale snapshot stays in use.
        let _ = store.run_claimed_refresh().await;
    }
    tracing::debug!("key set refresh task exiting");
}
