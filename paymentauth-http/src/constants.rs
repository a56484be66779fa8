//! HTTP-specific constants for the payment gate.

/// Request header carrying the payment credential (client → server).
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Response header carrying the payment challenge (server → client).
pub const WWW_AUTHENTICATE_HEADER: &str = "WWW-Authenticate";

/// Response header carrying the payment receipt (server → client).
pub const PAYMENT_RECEIPT_HEADER: &str = "Payment-Receipt";

/// `Cache-Control` value on challenge and rejection responses.
pub const CACHE_CONTROL_REJECTED: &str = "no-store";

/// `Cache-Control` value on authorized responses.
pub const CACHE_CONTROL_GRANTED: &str = "private";

/// HTTP 402 Payment Required status code.
pub const HTTP_STATUS_PAYMENT_REQUIRED: u16 = 402;
