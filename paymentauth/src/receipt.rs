//! Payment receipts.
//!
//! A receipt is the immutable artifact the gate emits after a credential is
//! accepted. The gate itself does not persist receipts; callers may log or
//! store them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp;

/// Outcome recorded on a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    /// The payment was verified (and broadcast, when configured).
    Success,
    /// The payment did not complete.
    Failed,
}

impl ReceiptStatus {
    /// The wire representation used in the `Payment-Receipt` header.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Receipt for a settled payment, rendered into the `Payment-Receipt`
/// response header by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    /// Whether the payment completed.
    pub status: ReceiptStatus,
    /// Payment method label, copied from the gate configuration.
    pub method: String,
    /// When the gate emitted the receipt.
    #[serde(with = "timestamp::iso8601")]
    pub timestamp: DateTime<Utc>,
    /// Canonical transaction reference (hash) the payment settled under.
    pub reference: String,
    /// Ledger block the transaction landed in, when a confirmer supplied it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}
