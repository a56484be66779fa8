//! Rendering gate decisions into HTTP responses.
//!
//! Rejections become structured JSON bodies with a stable `error` string and
//! machine-readable `code`, plus a `WWW-Authenticate` challenge header when
//! the gate reissued one. Grants get a `Payment-Receipt` header and a
//! `Cache-Control: private` marker; challenge and rejection responses are
//! never cacheable.

use axum_core::body::Body;
use axum_core::response::Response;
use http::{HeaderValue, StatusCode, header};
use paymentauth::codec;
use paymentauth::gate::{GrantedPayment, RejectedPayment};
use serde_json::json;

use crate::constants::{
    CACHE_CONTROL_GRANTED, CACHE_CONTROL_REJECTED, PAYMENT_RECEIPT_HEADER,
    WWW_AUTHENTICATE_HEADER,
};

/// Renders a gate rejection as a complete HTTP response.
#[must_use]
pub fn rejection_response(rejection: &RejectedPayment) -> Response {
    let status = StatusCode::from_u16(rejection.error.status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Body::from(
        json!({
            "error": rejection.error.to_string(),
            "code": rejection.error.code(),
        })
        .to_string(),
    );

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, CACHE_CONTROL_REJECTED);

    if let Some(challenge) = &rejection.challenge {
        let value = codec::format_www_authenticate(challenge)
            .expect("challenge serialization failed");
        builder = builder.header(WWW_AUTHENTICATE_HEADER, value);
    }

    builder.body(body).expect("failed to construct response")
}

/// Renders an authorized payment as a standalone 200 response, for use when
/// the gate itself is the endpoint.
#[must_use]
pub fn granted_response(grant: &GrantedPayment) -> Response {
    let mut body = json!({
        "paid": true,
        "receipt": grant.receipt,
        "txHash": grant.tx_hash,
        "blockNumber": grant.block_number,
        "payer": grant.payer,
    });
    if let Some(url) = &grant.explorer_url {
        body["explorerUrl"] = json!(url.as_str());
    }

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("failed to construct response");
    with_receipt_headers(response, grant)
}

/// Stamps receipt headers onto a response produced by the inner service.
#[must_use]
pub fn with_receipt_headers(mut response: Response, grant: &GrantedPayment) -> Response {
    let receipt = codec::format_receipt(&grant.receipt);
    if let Ok(value) = HeaderValue::from_str(&receipt) {
        response.headers_mut().insert(PAYMENT_RECEIPT_HEADER, value);
    }
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_CONTROL_GRANTED),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use paymentauth::error::GateError;
    use paymentauth::receipt::{PaymentReceipt, ReceiptStatus};

    fn grant() -> GrantedPayment {
        GrantedPayment {
            receipt: PaymentReceipt {
                status: ReceiptStatus::Success,
                method: "tempo".to_owned(),
                timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
                reference: "0xabc".to_owned(),
                block_number: Some(7),
            },
            tx_hash: "0xabc".to_owned(),
            block_number: Some(7),
            payer: Some("0xpayer".to_owned()),
            explorer_url: None,
        }
    }

    #[test]
    fn rejections_carry_code_and_cache_policy() {
        let rejection = RejectedPayment {
            error: GateError::Replayed,
            challenge: None,
        };
        let response = rejection_response(&rejection);
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            CACHE_CONTROL_REJECTED
        );
        assert!(response.headers().get(WWW_AUTHENTICATE_HEADER).is_none());
    }

    #[test]
    fn grants_carry_receipt_and_cache_policy() {
        let response = granted_response(&grant());
        assert_eq!(response.status(), StatusCode::OK);
        let receipt = response
            .headers()
            .get(PAYMENT_RECEIPT_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(receipt.starts_with("status=success; method=tempo; "));
        assert!(receipt.ends_with("; reference=0xabc; blockNumber=7"));
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            CACHE_CONTROL_GRANTED
        );
    }
}
