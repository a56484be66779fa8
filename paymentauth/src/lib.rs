#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core protocol logic for an HTTP 402 Payment Required authorization gate.
//!
//! A protected resource answers unauthenticated requests with a time-bounded,
//! single-use payment challenge. The client pays, then resubmits the request
//! with a credential referencing the challenge; the gate validates the
//! challenge state, guards against replay, verifies the payment through an
//! injected verifier (coalescing concurrent verifications of the same
//! transaction), optionally broadcasts the signed transaction, and emits a
//! receipt.
//!
//! This crate is transport- and ledger-agnostic. HTTP wiring lives in
//! `paymentauth-http`; checking a proof against a ledger, broadcasting, and
//! confirmation are all injected through the [`verifier`] traits.
//!
//! # Modules
//!
//! - [`challenge`] - Challenge data model and the pluggable challenge store
//! - [`codec`] - `Authorization` / `WWW-Authenticate` / `Payment-Receipt` codec
//! - [`replay`] - Time-windowed replay protection for transaction references
//! - [`coalesce`] - Single-flight coalescing of verification calls
//! - [`gate`] - The orchestrating state machine and its configuration
//! - [`verifier`] - Injected collaborator traits
//! - [`receipt`] - Receipt artifact emitted on success
//! - [`error`] - Rejection taxonomy with stable codes and status hints
//! - [`timestamp`] - Canonical ISO-8601 timestamp handling
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation of gate decisions

pub mod challenge;
pub mod coalesce;
pub mod codec;
pub mod error;
pub mod gate;
pub mod receipt;
pub mod replay;
pub mod timestamp;
pub mod verifier;

pub use challenge::{ChallengeStore, ChargeRequest, MemoryChallengeStore, PaymentChallenge};
pub use codec::{ParsedAuthorization, PaymentCredential, ProofPayload};
pub use error::{BroadcastError, CredentialError, GateError, VerifierError};
pub use gate::{GateConfig, GateDecision, GrantedPayment, PaymentGate, RejectedPayment};
pub use receipt::{PaymentReceipt, ReceiptStatus};
pub use replay::{MemoryReplayGuard, ReplayGuard};
pub use verifier::{
    BroadcastOutcome, Confirmation, PaymentVerifier, TransactionBroadcaster, TransactionConfirmer,
    Verification,
};
