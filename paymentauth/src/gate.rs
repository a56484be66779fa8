//! The gate orchestrator: the challenge/credential protocol state machine.
//!
//! Given an inbound request's `Authorization` header and a gate
//! configuration, [`PaymentGate::authorize`] drives the full
//! challenge-issue / credential-validate / verify / broadcast / receipt
//! flow and returns a structured [`GateDecision`] for the transport layer
//! to render. The gate never touches the transport itself and never lets a
//! collaborator failure escape unmapped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::challenge::{
    ChallengeStore, ChargeRequest, INTENT_CHARGE, MemoryChallengeStore, PaymentChallenge,
    StoredChallenge,
};
use crate::coalesce::VerifyCoalescer;
use crate::codec::{
    self, PAYLOAD_TYPE_KEY_AUTHORIZATION, PAYLOAD_TYPE_TRANSACTION, ParsedAuthorization,
    PaymentCredential, ProofPayload,
};
use crate::error::GateError;
use crate::receipt::{PaymentReceipt, ReceiptStatus};
use crate::replay::{MemoryReplayGuard, ReplayGuard};
use crate::verifier::{
    PaymentVerifier, TransactionBroadcaster, TransactionConfirmer, Verification,
};

/// Default challenge validity: 300 000 ms.
pub const DEFAULT_CHALLENGE_VALIDITY: Duration = Duration::from_millis(300_000);

/// Configuration for one protected resource.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Payment method label, copied into challenges and receipts.
    pub method: String,
    /// Realm label, copied into challenges.
    pub realm: String,
    /// Recipient identifier payments must reach.
    pub destination: String,
    /// Token identifier of the accepted asset.
    pub asset: String,
    /// Amount due, as a decimal string in base units.
    pub amount: String,
    /// How long an issued challenge stays payable.
    pub challenge_validity: Duration,
    /// Optional human-readable description for challenges.
    pub description: Option<String>,
    /// Maximum accepted age of the referenced transaction, passed through
    /// to the verifier.
    pub allowed_age: Option<Duration>,
    /// Base URL of a ledger explorer, used to link receipts.
    pub explorer_url: Option<Url>,
}

impl GateConfig {
    /// Creates a configuration with the default challenge validity and no
    /// optional fields.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        realm: impl Into<String>,
        destination: impl Into<String>,
        asset: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            realm: realm.into(),
            destination: destination.into(),
            asset: asset.into(),
            amount: amount.into(),
            challenge_validity: DEFAULT_CHALLENGE_VALIDITY,
            description: None,
            allowed_age: None,
            explorer_url: None,
        }
    }

    /// Sets how long issued challenges stay payable.
    #[must_use]
    pub const fn with_challenge_validity(mut self, validity: Duration) -> Self {
        self.challenge_validity = validity;
        self
    }

    /// Sets the challenge description shown to payers.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the maximum accepted transaction age.
    #[must_use]
    pub const fn with_allowed_age(mut self, age: Duration) -> Self {
        self.allowed_age = Some(age);
        self
    }

    /// Sets the explorer base URL used for receipt links.
    #[must_use]
    pub fn with_explorer_url(mut self, url: Url) -> Self {
        self.explorer_url = Some(url);
        self
    }

    /// Builds the explorer link for a transaction, when an explorer is
    /// configured.
    #[must_use]
    pub fn explorer_link(&self, tx_hash: &str) -> Option<Url> {
        let base = self.explorer_url.as_ref()?;
        base.join(&format!("tx/{tx_hash}")).ok()
    }
}

/// A request admitted through the gate.
#[derive(Debug, Clone)]
pub struct GrantedPayment {
    /// Receipt for the settled payment.
    pub receipt: PaymentReceipt,
    /// Canonical transaction hash the payment settled under.
    pub tx_hash: String,
    /// Block the transaction landed in, when confirmed.
    pub block_number: Option<u64>,
    /// Payer identity, when the verifier resolved one.
    pub payer: Option<String>,
    /// Explorer link for the transaction, when configured.
    pub explorer_url: Option<Url>,
}

/// A request rejected by the gate.
#[derive(Debug, Clone)]
pub struct RejectedPayment {
    /// Why the request was rejected.
    pub error: GateError,
    /// Fresh challenge for the client to answer, when one is reissued.
    pub challenge: Option<PaymentChallenge>,
}

impl RejectedPayment {
    const fn bare(error: GateError) -> Self {
        Self {
            error,
            challenge: None,
        }
    }
}

/// Outcome of [`PaymentGate::authorize`], for the transport to render.
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// The request may proceed.
    Authorized(GrantedPayment),
    /// The request must not proceed; render the rejection.
    Rejected(RejectedPayment),
}

/// The payment gate.
///
/// Holds the challenge store, replay guard, verification coalescer, and
/// injected collaborators. Construct one per protected resource (or share
/// one across routes with the same charge) and keep it for the worker's
/// lifetime; the stores are process-wide state scoped to this instance.
#[allow(missing_debug_implementations)]
pub struct PaymentGate {
    config: GateConfig,
    challenges: Arc<dyn ChallengeStore>,
    replay: Arc<dyn ReplayGuard>,
    coalescer: VerifyCoalescer,
    verifier: Arc<dyn PaymentVerifier>,
    broadcaster: Option<Arc<dyn TransactionBroadcaster>>,
    confirmer: Option<Arc<dyn TransactionConfirmer>>,
}

impl PaymentGate {
    /// Creates a gate with in-memory challenge and replay stores.
    #[must_use]
    pub fn new(config: GateConfig, verifier: Arc<dyn PaymentVerifier>) -> Self {
        Self {
            config,
            challenges: Arc::new(MemoryChallengeStore::new()),
            replay: Arc::new(MemoryReplayGuard::default()),
            coalescer: VerifyCoalescer::new(),
            verifier,
            broadcaster: None,
            confirmer: None,
        }
    }

    /// Swaps in a challenge store (e.g. one backed by a shared cache).
    #[must_use]
    pub fn with_challenge_store(mut self, store: Arc<dyn ChallengeStore>) -> Self {
        self.challenges = store;
        self
    }

    /// Swaps in a replay guard.
    #[must_use]
    pub fn with_replay_guard(mut self, guard: Arc<dyn ReplayGuard>) -> Self {
        self.replay = guard;
        self
    }

    /// Sets the broadcaster invoked after successful verification.
    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn TransactionBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Sets the confirmer used to enrich receipts with block numbers.
    #[must_use]
    pub fn with_confirmer(mut self, confirmer: Arc<dyn TransactionConfirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// The gate's configuration.
    #[must_use]
    pub const fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Runs the protocol state machine for one request.
    ///
    /// `header` is the raw `Authorization` value, if the request carried
    /// one. The returned decision is terminal: either the request proceeds,
    /// or the transport renders the rejection and it does not.
    pub async fn authorize(&self, header: Option<&str>) -> GateDecision {
        match self.authorize_inner(header).await {
            Ok(grant) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(tx_hash = %grant.tx_hash, "payment authorized");
                GateDecision::Authorized(grant)
            }
            Err(rejection) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(
                    code = rejection.error.code(),
                    reissued = rejection.challenge.is_some(),
                    "payment rejected"
                );
                GateDecision::Rejected(rejection)
            }
        }
    }

    async fn authorize_inner(
        &self,
        header: Option<&str>,
    ) -> Result<GrantedPayment, RejectedPayment> {
        let now = Utc::now();

        let header = match header {
            Some(h) if codec::has_payment_scheme(h) => h,
            _ => return Err(self.reissue(GateError::PaymentRequired).await),
        };

        match codec::parse_authorization(header) {
            Ok(ParsedAuthorization::Credential(credential)) => {
                self.authorize_credential(credential, now).await
            }
            Ok(ParsedAuthorization::Legacy { tx_hash }) => self.authorize_legacy(tx_hash, now).await,
            Err(err) => Err(RejectedPayment::bare(GateError::MalformedProof(
                err.to_string(),
            ))),
        }
    }

    /// Steps 3–9 of the structured-credential flow.
    async fn authorize_credential(
        &self,
        credential: PaymentCredential,
        now: DateTime<Utc>,
    ) -> Result<GrantedPayment, RejectedPayment> {
        let Some(stored) = self.challenges.get(&credential.id).await else {
            return Err(self.reissue(GateError::UnknownChallenge).await);
        };

        if stored.used {
            return Err(self.reissue(GateError::UsedChallenge).await);
        }

        if stored.challenge.is_expired(now) {
            self.challenges.delete(&credential.id).await;
            return Err(self.reissue(GateError::PaymentExpired).await);
        }

        let kind = credential.payload.kind.as_str();
        if kind != PAYLOAD_TYPE_TRANSACTION && kind != PAYLOAD_TYPE_KEY_AUTHORIZATION {
            return Err(RejectedPayment::bare(GateError::MalformedProof(format!(
                "unsupported payload type `{kind}`"
            ))));
        }

        let reference = claimed_reference(&credential.payload);

        // Replay protection runs strictly before the costly verifier call.
        if !self.replay.begin_verification(&reference).await {
            return Err(RejectedPayment::bare(GateError::Replayed));
        }

        let verdict = self
            .run_verification(&credential.payload, &stored.challenge.request, &reference)
            .await?;

        // Single-use: only one concurrent submission may consume the
        // challenge. The loser releases its reservation and re-challenges.
        if !self.challenges.try_mark_used(&credential.id).await {
            self.replay.rollback_verification(&reference).await;
            return Err(self.reissue(GateError::UsedChallenge).await);
        }

        let mut tx_hash = reference.clone();
        if let Some(broadcaster) = &self.broadcaster {
            match broadcaster.broadcast(&credential.payload).await {
                Ok(outcome) => tx_hash = outcome.transaction_hash,
                Err(err) => {
                    // Roll everything back so the same credential can be
                    // resubmitted once broadcast recovers.
                    self.challenges.unmark_used(&credential.id).await;
                    self.replay.rollback_verification(&reference).await;
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(error = %err, "broadcast failed, challenge released");
                    return Err(RejectedPayment::bare(GateError::Broadcast(err.message)));
                }
            }
        }

        self.replay.commit_verification(&reference).await;

        Ok(self.grant(tx_hash, verdict.payer).await)
    }

    /// Legacy flow: the credential is just a transaction hash. No challenge
    /// is consumed and nothing is ever broadcast; the verifier checks the
    /// already-submitted transaction against the configured charge.
    async fn authorize_legacy(
        &self,
        tx_hash: String,
        now: DateTime<Utc>,
    ) -> Result<GrantedPayment, RejectedPayment> {
        if !self.replay.begin_verification(&tx_hash).await {
            return Err(RejectedPayment::bare(GateError::Replayed));
        }

        let proof = ProofPayload {
            kind: PAYLOAD_TYPE_TRANSACTION.to_owned(),
            signature: tx_hash.clone(),
            reference: Some(tx_hash.clone()),
        };
        let charge = self.charge_request(now);

        let verdict = self.run_verification(&proof, &charge, &tx_hash).await?;

        self.replay.commit_verification(&tx_hash).await;

        Ok(self.grant(tx_hash, verdict.payer).await)
    }

    /// Runs the verifier through the coalescer and maps failures, rolling
    /// the replay reservation back on every non-authorizing outcome.
    async fn run_verification(
        &self,
        proof: &ProofPayload,
        charge: &ChargeRequest,
        reference: &str,
    ) -> Result<Verification, RejectedPayment> {
        let verifier = Arc::clone(&self.verifier);
        let proof = proof.clone();
        let charge = charge.clone();
        let max_age = self.config.allowed_age;

        let outcome = self
            .coalescer
            .verify(reference, move || async move {
                verifier.verify(&proof, &charge, max_age).await
            })
            .await;

        match outcome {
            Err(err) => {
                self.replay.rollback_verification(reference).await;
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %err, "verifier unavailable");
                Err(RejectedPayment::bare(GateError::Network(
                    err.message.clone(),
                )))
            }
            Ok(verdict) if !verdict.valid => {
                self.replay.rollback_verification(reference).await;
                // The outstanding challenge stays valid here: the client may
                // retry with a corrected proof before it expires.
                let reason = verdict
                    .reason
                    .unwrap_or_else(|| "proof does not satisfy the charge".to_owned());
                Err(RejectedPayment::bare(GateError::VerificationFailed(reason)))
            }
            Ok(verdict) => Ok(verdict),
        }
    }

    /// Builds the granted outcome, optionally confirming the transaction.
    async fn grant(&self, tx_hash: String, payer: Option<String>) -> GrantedPayment {
        let mut block_number = None;
        if let Some(confirmer) = &self.confirmer {
            match confirmer.confirm(&tx_hash).await {
                Ok(confirmation) => block_number = Some(confirmation.block_number),
                Err(_err) => {
                    // Confirmation only enriches the receipt.
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(error = %_err, "confirmation unavailable, receipt unenriched");
                }
            }
        }

        let receipt = PaymentReceipt {
            status: ReceiptStatus::Success,
            method: self.config.method.clone(),
            timestamp: Utc::now(),
            reference: tx_hash.clone(),
            block_number,
        };

        GrantedPayment {
            explorer_url: self.config.explorer_link(&tx_hash),
            receipt,
            tx_hash,
            block_number,
            payer,
        }
    }

    /// Mints, stores, and returns a fresh challenge, purging expired
    /// entries on the way.
    async fn issue_challenge(&self) -> PaymentChallenge {
        let now = Utc::now();
        let charge = self.charge_request(now);
        let challenge = PaymentChallenge {
            id: codec::generate_challenge_id(),
            realm: self.config.realm.clone(),
            method: self.config.method.clone(),
            intent: INTENT_CHARGE.to_owned(),
            expires: charge.expires,
            request: charge,
            description: self.config.description.clone(),
        };

        self.challenges.purge_expired(now).await;
        self.challenges
            .put(StoredChallenge::new(challenge.clone()))
            .await;
        challenge
    }

    fn charge_request(&self, now: DateTime<Utc>) -> ChargeRequest {
        let validity = chrono::Duration::from_std(self.config.challenge_validity)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        ChargeRequest {
            amount: self.config.amount.clone(),
            asset: self.config.asset.clone(),
            destination: self.config.destination.clone(),
            expires: now + validity,
        }
    }

    async fn reissue(&self, error: GateError) -> RejectedPayment {
        RejectedPayment {
            error,
            challenge: Some(self.issue_challenge().await),
        }
    }
}

/// Canonical replay/coalescing key for a proof: the claimed hash when the
/// client supplied one, otherwise the signature blob itself.
fn claimed_reference(payload: &ProofPayload) -> String {
    payload
        .reference
        .as_deref()
        .unwrap_or(&payload.signature)
        .trim()
        .to_ascii_lowercase()
}
