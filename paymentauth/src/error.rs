//! Error taxonomy for the payment gate.
//!
//! Every rejection the gate can produce maps to a stable machine-readable
//! code and an HTTP status hint, so transports can render structured bodies
//! and client SDKs can decide between retrying immediately (fresh challenge
//! attached), retrying with backoff ([`GateError::Network`]), or aborting
//! ([`GateError::MalformedProof`], [`GateError::Replayed`]).

use std::fmt;

/// A rejection produced by the gate orchestrator.
///
/// Collaborator failures are caught at the gate boundary and mapped into
/// this taxonomy; they never propagate through the transport unhandled.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GateError {
    /// No payment credential was presented; a fresh challenge is attached.
    #[error("Payment Required")]
    PaymentRequired,

    /// The `Authorization` header is structurally invalid or carries an
    /// unsupported payload type. Not retryable without fixing the request.
    #[error("malformed payment proof: {0}")]
    MalformedProof(String),

    /// The credential references a challenge id the store does not hold.
    #[error("unknown or expired challenge ID")]
    UnknownChallenge,

    /// The referenced challenge has already been consumed.
    #[error("challenge has already been used")]
    UsedChallenge,

    /// The referenced challenge expired before the credential arrived.
    #[error("challenge has expired")]
    PaymentExpired,

    /// The transaction reference was already accepted inside the replay
    /// window. No new challenge is issued; the original attempt already
    /// succeeded or is in flight elsewhere.
    #[error("transaction reference has already been used")]
    Replayed,

    /// The verifier resolved the proof and found it does not satisfy the
    /// charge. The outstanding challenge stays valid, so the client may
    /// retry with a corrected proof against it.
    #[error("transaction verification failed: {0}")]
    VerificationFailed(String),

    /// The verifier itself failed (infrastructure, not user, fault).
    /// Retrying without new proof is sensible.
    #[error("payment verification unavailable: {0}")]
    Network(String),

    /// The broadcaster failed after successful verification. The challenge
    /// is rolled back so the same credential may be resubmitted.
    #[error("transaction broadcast failed: {0}")]
    Broadcast(String),
}

impl GateError {
    /// Stable machine-readable code for structured error bodies.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::PaymentRequired => "PAYMENT_REQUIRED",
            Self::MalformedProof(_) => "MALFORMED_PROOF",
            Self::UnknownChallenge => "UNKNOWN_CHALLENGE",
            Self::UsedChallenge => "USED_CHALLENGE",
            Self::PaymentExpired => "PAYMENT_EXPIRED",
            Self::Replayed => "REPLAY",
            Self::VerificationFailed(_) => "VERIFICATION_FAILED",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Broadcast(_) => "BROADCAST_FAILED",
        }
    }

    /// HTTP status the transport should render for this rejection.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::PaymentRequired
            | Self::PaymentExpired
            | Self::Replayed
            | Self::VerificationFailed(_) => 402,
            Self::MalformedProof(_) => 400,
            Self::UnknownChallenge | Self::UsedChallenge => 401,
            Self::Broadcast(_) => 500,
            Self::Network(_) => 503,
        }
    }
}

/// Structural failure while decoding an `Authorization` header or a
/// `WWW-Authenticate` challenge value.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The header does not start with a recognized scheme prefix.
    #[error("unrecognized authorization scheme")]
    UnrecognizedScheme,

    /// The credential token is not valid base64url.
    #[error("invalid credential encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// The decoded credential is not the expected JSON shape.
    #[error("invalid credential body: {0}")]
    Json(#[from] serde_json::Error),

    /// A structurally required field is empty or absent.
    #[error("missing credential field: {0}")]
    MissingField(&'static str),

    /// A legacy credential's transaction hash is not 32 hex-encoded bytes.
    #[error("invalid transaction hash format")]
    InvalidTransactionHash,

    /// A challenge header parameter is absent or unreadable.
    #[error("missing challenge parameter: {0}")]
    MissingParameter(&'static str),
}

/// Failure reported by an injected [`PaymentVerifier`](crate::verifier::PaymentVerifier).
///
/// Distinct from a `valid: false` verdict: this means the verifier could not
/// reach an answer at all.
#[derive(Debug, Clone)]
pub struct VerifierError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl VerifierError {
    /// Creates a new verifier error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for VerifierError {}

/// Failure reported by an injected
/// [`TransactionBroadcaster`](crate::verifier::TransactionBroadcaster).
#[derive(Debug, Clone)]
pub struct BroadcastError {
    /// Human-readable description of the failure.
    pub message: String,
    /// Transaction hash, if the network assigned one before failing.
    pub transaction: Option<String>,
}

impl BroadcastError {
    /// Creates a new broadcast error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transaction: None,
        }
    }

    /// Sets the transaction hash.
    #[must_use]
    pub fn with_transaction(mut self, tx: impl Into<String>) -> Self {
        self.transaction = Some(tx.into());
        self
    }
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BroadcastError {}
