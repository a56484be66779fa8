//! Replay protection for accepted transaction references.
//!
//! Payment credentials are bearer-style and single-use; without this guard a
//! captured `Authorization` header could re-trigger a paid action
//! indefinitely. The guard keeps a time-windowed set of references and
//! rejects a second claim of the same reference inside the window,
//! independent of challenge state.
//!
//! Verification is asynchronous and may fail, so the guard also offers a
//! two-phase protocol: [`ReplayGuard::begin_verification`] reserves a
//! reference before the verifier runs, [`ReplayGuard::commit_verification`]
//! finalizes acceptance, and [`ReplayGuard::rollback_verification`] releases
//! the reservation so a legitimate retry after a transient outage is not
//! permanently blocked.
//!
//! Eviction is time-window only: a reference becomes claimable again once
//! the window has fully elapsed. This bounds memory; deployments needing
//! longer replay-safety size the window past their retry horizon.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Default retention window: 300 000 ms.
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_millis(300_000);

/// Run a full sweep of the entry map every this many reservations.
const SWEEP_INTERVAL: u64 = 256;

/// Windowed set of previously accepted (or in-verification) transaction
/// references.
#[async_trait]
pub trait ReplayGuard: Send + Sync {
    /// Atomically claims `reference` in one step.
    ///
    /// Returns `true` if the reference was absent from the active window and
    /// is now recorded; `false` if it is already claimed (replay). Only one
    /// concurrent caller per reference may win.
    async fn mark_used(&self, reference: &str) -> bool;

    /// Reserves `reference` ahead of an asynchronous verification.
    ///
    /// Same claim semantics as [`Self::mark_used`]; the reservation must be
    /// either committed or rolled back once verification settles.
    async fn begin_verification(&self, reference: &str) -> bool;

    /// Finalizes a reservation after verification succeeded.
    async fn commit_verification(&self, reference: &str);

    /// Releases a reservation after verification failed or errored.
    ///
    /// Committed entries are left untouched.
    async fn rollback_verification(&self, reference: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayState {
    Reserved,
    Committed,
}

#[derive(Debug, Clone, Copy)]
struct ReplayEntry {
    state: ReplayState,
    at: Instant,
}

/// In-memory [`ReplayGuard`] for single-instance deployments and tests.
#[derive(Debug)]
pub struct MemoryReplayGuard {
    entries: DashMap<String, ReplayEntry>,
    window: Duration,
    accesses: AtomicU64,
}

impl Default for MemoryReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_WINDOW)
    }
}

impl MemoryReplayGuard {
    /// Creates a guard with the given retention window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            window,
            accesses: AtomicU64::new(0),
        }
    }

    /// The configured retention window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Number of references currently tracked, stale entries included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no references are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_stale(&self, entry: &ReplayEntry, now: Instant) -> bool {
        now.duration_since(entry.at) >= self.window
    }

    /// Claims `reference` with the given state. The entry API holds the
    /// shard lock across the check-and-insert, so only one caller wins.
    fn claim(&self, reference: &str, state: ReplayState) -> bool {
        self.maybe_sweep();
        let now = Instant::now();
        match self.entries.entry(reference.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if self.is_stale(occupied.get(), now) {
                    occupied.insert(ReplayEntry { state, at: now });
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ReplayEntry { state, at: now });
                true
            }
        }
    }

    /// Lazy whole-map eviction, amortized over accesses so no timer task is
    /// needed.
    fn maybe_sweep(&self) {
        let count = self.accesses.fetch_add(1, Ordering::Relaxed);
        if count % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            let now = Instant::now();
            self.entries.retain(|_, entry| !self.is_stale(entry, now));
        }
    }
}

#[async_trait]
impl ReplayGuard for MemoryReplayGuard {
    async fn mark_used(&self, reference: &str) -> bool {
        self.claim(reference, ReplayState::Committed)
    }

    async fn begin_verification(&self, reference: &str) -> bool {
        self.claim(reference, ReplayState::Reserved)
    }

    async fn commit_verification(&self, reference: &str) {
        if let Some(mut entry) = self.entries.get_mut(reference) {
            entry.state = ReplayState::Committed;
            entry.at = Instant::now();
        }
    }

    async fn rollback_verification(&self, reference: &str) {
        self.entries
            .remove_if(reference, |_, entry| entry.state == ReplayState::Reserved);
    }
}
