//! Payment challenges and the challenge store.
//!
//! A challenge is a server-issued, time-bounded, single-use invitation to pay
//! a specific amount of a specific asset to a specific destination. The store
//! tracks outstanding challenges keyed by id together with a consumed flag,
//! and is the seam a multi-instance deployment swaps for a shared backend:
//! the orchestrator depends only on the [`ChallengeStore`] trait.
//!
//! The bundled [`MemoryChallengeStore`] is scoped to one worker instance and
//! is explicitly not durable across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::timestamp;

/// Fixed intent tag for charge challenges, reserved for future intents.
pub const INTENT_CHARGE: &str = "charge";

/// The payment a challenge invites: amount, asset, destination, deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    /// Amount due, as a decimal string in the asset's base units.
    pub amount: String,
    /// Token identifier of the asset to pay with.
    pub asset: String,
    /// Recipient identifier the payment must reach.
    pub destination: String,
    /// Instant at and after which the charge is no longer payable.
    #[serde(with = "timestamp::iso8601")]
    pub expires: DateTime<Utc>,
}

/// A server-issued payment challenge.
///
/// Never mutated after creation; only its stored `used` flag changes, and
/// only once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    /// Opaque unguessable id; the consumption key.
    pub id: String,
    /// Context label copied verbatim into receipts and headers.
    pub realm: String,
    /// Payment method label copied verbatim into receipts and headers.
    pub method: String,
    /// Intent tag, currently always [`INTENT_CHARGE`].
    pub intent: String,
    /// The charge this challenge invites.
    pub request: ChargeRequest,
    /// Instant at and after which the challenge is unusable.
    #[serde(with = "timestamp::iso8601")]
    pub expires: DateTime<Utc>,
    /// Optional human-readable description of what is being paid for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PaymentChallenge {
    /// Whether the challenge is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

/// A stored challenge together with its consumption state.
#[derive(Debug, Clone)]
pub struct StoredChallenge {
    /// The issued challenge.
    pub challenge: PaymentChallenge,
    /// Whether a successful verification has consumed the challenge.
    pub used: bool,
}

impl StoredChallenge {
    /// Wraps a freshly issued challenge in an unconsumed entry.
    #[must_use]
    pub const fn new(challenge: PaymentChallenge) -> Self {
        Self {
            challenge,
            used: false,
        }
    }
}

/// Shared, atomically updatable storage for outstanding challenges.
///
/// All methods are async so implementations backed by an external store can
/// plug in without changing the orchestrator. The in-process implementation
/// is [`MemoryChallengeStore`].
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Stores a freshly issued challenge, keyed by its id.
    async fn put(&self, entry: StoredChallenge);

    /// Looks up a challenge by id without mutating it.
    async fn get(&self, id: &str) -> Option<StoredChallenge>;

    /// Atomically transitions `used = false → true`.
    ///
    /// Returns `true` only for the single caller that wins the transition;
    /// `false` if the entry is absent or already consumed. This is the
    /// compare-and-swap that keeps a challenge single-use under concurrent
    /// credential submissions.
    async fn try_mark_used(&self, id: &str) -> bool;

    /// Reverts `used` to `false`, permitting a legitimate retry after a
    /// failed broadcast.
    async fn unmark_used(&self, id: &str);

    /// Removes a challenge, forcing any later credential for it to
    /// re-challenge.
    async fn delete(&self, id: &str);

    /// Drops every entry whose challenge expired before `now`. Called
    /// opportunistically on each issuance to bound memory.
    async fn purge_expired(&self, now: DateTime<Utc>);
}

/// In-memory [`ChallengeStore`] for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryChallengeStore {
    entries: DashMap<String, StoredChallenge>,
}

impl MemoryChallengeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding entries, consumed or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn put(&self, entry: StoredChallenge) {
        self.entries.insert(entry.challenge.id.clone(), entry);
    }

    async fn get(&self, id: &str) -> Option<StoredChallenge> {
        self.entries.get(id).map(|e| e.clone())
    }

    async fn try_mark_used(&self, id: &str) -> bool {
        // get_mut holds the shard lock, so check-and-set is atomic per key.
        match self.entries.get_mut(id) {
            Some(mut entry) if !entry.used => {
                entry.used = true;
                true
            }
            _ => false,
        }
    }

    async fn unmark_used(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.used = false;
        }
    }

    async fn delete(&self, id: &str) {
        self.entries.remove(id);
    }

    async fn purge_expired(&self, now: DateTime<Utc>) {
        self.entries
            .retain(|_, entry| !entry.challenge.is_expired(now));
    }
}
