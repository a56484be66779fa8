//! Credential codec: header encoding and decoding for the payment gate.
//!
//! Handles base64url-encoded JSON credentials in the `Authorization` header,
//! the `WWW-Authenticate` challenge value, and the `Payment-Receipt` header.
//!
//! Challenge formatting is deterministic (fixed parameter order, fixed
//! timestamp precision) so encode/decode round-trips compare bit-exactly.

use std::fmt::Write as _;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as b64url;
use chrono::{DateTime, Utc};
use rand::RngExt;
use rand::rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::challenge::{ChargeRequest, PaymentChallenge};
use crate::error::CredentialError;
use crate::receipt::PaymentReceipt;
use crate::timestamp;

/// Scheme prefix for structured credentials.
pub const SCHEME_PAYMENT: &str = "Payment";

/// Scheme prefix for legacy bare-transaction-hash credentials.
pub const SCHEME_LEGACY: &str = "Tempo";

/// Proof payload types the gate recognizes.
pub const PAYLOAD_TYPE_TRANSACTION: &str = "transaction";
/// See [`PAYLOAD_TYPE_TRANSACTION`].
pub const PAYLOAD_TYPE_KEY_AUTHORIZATION: &str = "keyAuthorization";

static TX_HASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("static pattern")
});

static CHALLENGE_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\w+)="((?:[^"\\]|\\.)*)""#).expect("static pattern")
});

/// Proof submitted inside a structured credential.
///
/// The codec checks structure only; whether `type` names a supported proof
/// kind is the orchestrator's call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofPayload {
    /// Proof type label (`"transaction"` or `"keyAuthorization"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque hex blob: the signed transaction or key authorization.
    pub signature: String,
    /// Claimed transaction hash, when the client knows it up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// A client-submitted payment credential referencing an outstanding
/// challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCredential {
    /// Challenge id this credential answers.
    pub id: String,
    /// The signed proof.
    pub payload: ProofPayload,
}

/// Decoded `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedAuthorization {
    /// Structured `Payment <base64url-json>` credential.
    Credential(PaymentCredential),
    /// Legacy `Tempo <txHash>` credential: the payload is only the
    /// transaction hash, lowercased.
    Legacy {
        /// The claimed transaction hash.
        tx_hash: String,
    },
}

/// Whether the header value carries one of the gate's auth schemes.
///
/// Anything else is treated as "no credential presented" and answered with a
/// fresh challenge rather than a malformed-proof rejection.
#[must_use]
pub fn has_payment_scheme(header: &str) -> bool {
    header.starts_with("Payment ") || header.starts_with("Tempo ")
}

/// Parses an `Authorization` header into a credential.
///
/// # Errors
///
/// Returns [`CredentialError`] if the scheme prefix is unrecognized, the
/// token is not valid base64url JSON, a required field is empty, or a legacy
/// hash is malformed.
pub fn parse_authorization(header: &str) -> Result<ParsedAuthorization, CredentialError> {
    if let Some(token) = header.strip_prefix("Payment ") {
        let bytes = b64url.decode(token.trim())?;
        let credential: PaymentCredential = serde_json::from_slice(&bytes)?;
        if credential.id.is_empty() {
            return Err(CredentialError::MissingField("id"));
        }
        if credential.payload.kind.is_empty() {
            return Err(CredentialError::MissingField("payload.type"));
        }
        if credential.payload.signature.is_empty() {
            return Err(CredentialError::MissingField("payload.signature"));
        }
        return Ok(ParsedAuthorization::Credential(credential));
    }

    if let Some(token) = header.strip_prefix("Tempo ") {
        let hash = token.trim();
        if !TX_HASH_RE.is_match(hash) {
            return Err(CredentialError::InvalidTransactionHash);
        }
        return Ok(ParsedAuthorization::Legacy {
            tx_hash: hash.to_ascii_lowercase(),
        });
    }

    Err(CredentialError::UnrecognizedScheme)
}

/// Encodes a credential into an `Authorization` header value.
///
/// # Errors
///
/// Returns [`CredentialError::Json`] if serialization fails.
pub fn encode_authorization(credential: &PaymentCredential) -> Result<String, CredentialError> {
    let json = serde_json::to_vec(credential)?;
    Ok(format!("Payment {}", b64url.encode(&json)))
}

/// Renders a challenge into a `WWW-Authenticate` header value.
///
/// Parameter order is fixed (`id`, `realm`, `method`, `intent`, `request`,
/// `expires`, then optional `description`) so the output is byte-stable for
/// a given challenge.
///
/// # Errors
///
/// Returns [`CredentialError::Json`] if the embedded charge request cannot
/// be serialized.
pub fn format_www_authenticate(challenge: &PaymentChallenge) -> Result<String, CredentialError> {
    let request_json = serde_json::to_vec(&challenge.request)?;
    let mut value = format!(
        "Payment id=\"{}\", realm=\"{}\", method=\"{}\", intent=\"{}\", request=\"{}\", expires=\"{}\"",
        escape_param(&challenge.id),
        escape_param(&challenge.realm),
        escape_param(&challenge.method),
        escape_param(&challenge.intent),
        b64url.encode(&request_json),
        timestamp::to_canonical(&challenge.expires),
    );
    if let Some(description) = &challenge.description {
        let _ = write!(value, ", description=\"{}\"", escape_param(description));
    }
    Ok(value)
}

/// Parses a `WWW-Authenticate` value produced by [`format_www_authenticate`]
/// back into a challenge.
///
/// # Errors
///
/// Returns [`CredentialError`] if the scheme prefix is wrong, a required
/// parameter is missing, or the embedded charge request does not decode.
pub fn parse_www_authenticate(value: &str) -> Result<PaymentChallenge, CredentialError> {
    let params = value
        .strip_prefix("Payment ")
        .ok_or(CredentialError::UnrecognizedScheme)?;

    let mut id = None;
    let mut realm = None;
    let mut method = None;
    let mut intent = None;
    let mut request = None;
    let mut expires = None;
    let mut description = None;

    for caps in CHALLENGE_PARAM_RE.captures_iter(params) {
        let key = &caps[1];
        let val = unescape_param(&caps[2]);
        match key {
            "id" => id = Some(val),
            "realm" => realm = Some(val),
            "method" => method = Some(val),
            "intent" => intent = Some(val),
            "request" => request = Some(val),
            "expires" => expires = Some(val),
            "description" => description = Some(val),
            _ => {}
        }
    }

    let request = request.ok_or(CredentialError::MissingParameter("request"))?;
    let request_bytes = b64url.decode(request.as_bytes())?;
    let request: ChargeRequest = serde_json::from_slice(&request_bytes)?;

    let expires = expires.ok_or(CredentialError::MissingParameter("expires"))?;
    let expires: DateTime<Utc> = timestamp::from_canonical(&expires)
        .map_err(|_| CredentialError::MissingParameter("expires"))?;

    Ok(PaymentChallenge {
        id: id.ok_or(CredentialError::MissingParameter("id"))?,
        realm: realm.ok_or(CredentialError::MissingParameter("realm"))?,
        method: method.ok_or(CredentialError::MissingParameter("method"))?,
        intent: intent.ok_or(CredentialError::MissingParameter("intent"))?,
        request,
        expires,
        description,
    })
}

/// Renders a receipt into a `Payment-Receipt` header value:
/// `status=…; method=…; timestamp=…; reference=…[; blockNumber=…]`.
#[must_use]
pub fn format_receipt(receipt: &PaymentReceipt) -> String {
    let mut value = format!(
        "status={}; method={}; timestamp={}; reference={}",
        receipt.status.as_str(),
        receipt.method,
        timestamp::to_canonical(&receipt.timestamp),
        receipt.reference,
    );
    if let Some(block) = receipt.block_number {
        let _ = write!(value, "; blockNumber={block}");
    }
    value
}

/// Generates a fresh unguessable challenge id: 128 bits from the OS CSPRNG,
/// hex-encoded.
#[must_use]
pub fn generate_challenge_id() -> String {
    let bytes: [u8; 16] = rng().random();
    let mut id = String::with_capacity(32);
    for byte in bytes {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

fn escape_param(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn unescape_param(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
