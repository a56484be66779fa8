//! Injected collaborator interfaces.
//!
//! The gate is ledger-agnostic: it never inspects a proof itself. Checking a
//! signed transaction against the required recipient/amount/asset, submitting
//! it to a network, and looking up its confirmation are all supplied by the
//! caller through these traits. All three are uniformly asynchronous.

use std::time::Duration;

use async_trait::async_trait;

use crate::challenge::ChargeRequest;
use crate::codec::ProofPayload;
use crate::error::{BroadcastError, VerifierError};

/// Verdict returned by a [`PaymentVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Whether the proof satisfies the charge.
    pub valid: bool,
    /// Payer identity, when the verifier resolved one.
    pub payer: Option<String>,
    /// Machine- or human-readable reason when `valid` is `false`.
    pub reason: Option<String>,
}

impl Verification {
    /// A passing verdict.
    #[must_use]
    pub const fn valid() -> Self {
        Self {
            valid: true,
            payer: None,
            reason: None,
        }
    }

    /// A failing verdict with a reason.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            payer: None,
            reason: Some(reason.into()),
        }
    }

    /// Sets the payer identity.
    #[must_use]
    pub fn with_payer(mut self, payer: impl Into<String>) -> Self {
        self.payer = Some(payer.into());
        self
    }
}

/// Result of a successful broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Hash the network assigned to the submitted transaction.
    pub transaction_hash: String,
}

/// Result of a confirmation lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    /// Block the transaction landed in.
    pub block_number: u64,
}

/// Checks a signed payment proof against a charge on a ledger.
///
/// Implementations must be safe to call concurrently for different
/// references and idempotent for the same signed proof; the gate coalesces
/// concurrent calls for one reference but retries may re-invoke.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    /// Resolves the proof to a verdict.
    ///
    /// `max_age` carries the gate's `allowed_age` configuration through to
    /// the ledger lookup; the gate imposes no timeout of its own.
    ///
    /// # Errors
    ///
    /// Returns [`VerifierError`] when no verdict could be reached at all
    /// (infrastructure fault). A resolvable-but-failing proof is a
    /// `valid: false` verdict, not an error.
    async fn verify(
        &self,
        proof: &ProofPayload,
        charge: &ChargeRequest,
        max_age: Option<Duration>,
    ) -> Result<Verification, VerifierError>;
}

/// Submits a signed transaction to the underlying network.
#[async_trait]
pub trait TransactionBroadcaster: Send + Sync {
    /// Broadcasts the proof's signed transaction.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError`] if the submission did not go through; the
    /// gate rolls the challenge back so the credential can be retried.
    async fn broadcast(&self, proof: &ProofPayload) -> Result<BroadcastOutcome, BroadcastError>;
}

/// Looks up the block a broadcast transaction landed in.
///
/// Used only to enrich receipts; failures are non-fatal.
#[async_trait]
pub trait TransactionConfirmer: Send + Sync {
    /// Waits for and returns the transaction's confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`VerifierError`] if the confirmation could not be obtained.
    async fn confirm(&self, tx_hash: &str) -> Result<Confirmation, VerifierError>;
}
