//! Axum middleware enforcing the 402 payment gate on protected routes.
//!
//! Wrap routes with [`PaymentAuthLayer`] to require payment before they run.
//! Requests without a valid credential are answered with
//! `402 Payment Required` and a `WWW-Authenticate` challenge; authorized
//! requests reach the inner service with the [`GrantedPayment`] available as
//! a request extension, and the response gains `Payment-Receipt` and
//! `Cache-Control: private` headers.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum_core::extract::Request;
use axum_core::response::Response;
use http::header;
use paymentauth::gate::{GateDecision, GrantedPayment, PaymentGate};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use crate::respond;

/// Tower layer that wraps a service with the payment gate.
///
/// One gate instance (and therefore one challenge store, replay guard, and
/// coalescer) is shared by every service the layer produces.
#[derive(Clone)]
#[allow(missing_debug_implementations)]
pub struct PaymentAuthLayer {
    gate: Arc<PaymentGate>,
}

impl PaymentAuthLayer {
    /// Creates a layer around a configured gate.
    #[must_use]
    pub const fn new(gate: Arc<PaymentGate>) -> Self {
        Self { gate }
    }

    /// The gate this layer enforces.
    #[must_use]
    pub const fn gate(&self) -> &Arc<PaymentGate> {
        &self.gate
    }
}

impl<S> Layer<S> for PaymentAuthLayer
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PaymentAuthService;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentAuthService {
            gate: Arc::clone(&self.gate),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Service that runs the gate before its inner service.
#[derive(Clone)]
#[allow(missing_debug_implementations)]
pub struct PaymentAuthService {
    gate: Arc<PaymentGate>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl Service<Request> for PaymentAuthService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let gate = Arc::clone(&self.gate);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let header = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned);

            match gate.authorize(header.as_deref()).await {
                GateDecision::Authorized(grant) => {
                    #[cfg(feature = "telemetry")]
                    tracing::debug!(tx_hash = %grant.tx_hash, "request admitted through payment gate");
                    req.extensions_mut().insert::<GrantedPayment>(grant.clone());
                    let response = inner.call(req).await?;
                    Ok(respond::with_receipt_headers(response, &grant))
                }
                GateDecision::Rejected(rejection) => Ok(respond::rejection_response(&rejection)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::to_bytes;
    use axum::routing::get;
    use axum::{Extension, Json, Router};
    use http::StatusCode;
    use paymentauth::challenge::ChargeRequest;
    use paymentauth::codec::{
        self, PAYLOAD_TYPE_TRANSACTION, PaymentCredential, ProofPayload,
    };
    use paymentauth::error::VerifierError;
    use paymentauth::gate::GateConfig;
    use paymentauth::verifier::{PaymentVerifier, Verification};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::constants::{PAYMENT_RECEIPT_HEADER, WWW_AUTHENTICATE_HEADER};

    struct AlwaysValid;

    #[async_trait::async_trait]
    impl PaymentVerifier for AlwaysValid {
        async fn verify(
            &self,
            _proof: &ProofPayload,
            _charge: &ChargeRequest,
            _max_age: Option<Duration>,
        ) -> Result<Verification, VerifierError> {
            Ok(Verification::valid().with_payer("0xpayer"))
        }
    }

    fn app() -> (Router, Arc<PaymentGate>) {
        let config = GateConfig::new("tempo", "api", "0xfeedface", "usd", "1000000");
        let gate = Arc::new(PaymentGate::new(config, Arc::new(AlwaysValid)));
        let router = Router::new()
            .route(
                "/paid",
                get(|Extension(grant): Extension<GrantedPayment>| async move {
                    Json(serde_json::json!({
                        "paid": true,
                        "txHash": grant.tx_hash,
                        "payer": grant.payer,
                    }))
                }),
            )
            .layer(PaymentAuthLayer::new(Arc::clone(&gate)));
        (router, gate)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn tx(n: u8) -> String {
        format!("0x{}", format!("{n:02x}").repeat(32))
    }

    #[tokio::test]
    async fn anonymous_request_gets_a_challenge() {
        let (app, _gate) = app();
        let response = app
            .oneshot(Request::builder().uri("/paid").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        let www = response
            .headers()
            .get(WWW_AUTHENTICATE_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        assert!(codec::parse_www_authenticate(&www).is_ok());

        let body = body_json(response).await;
        assert_eq!(body["error"], "Payment Required");
        assert_eq!(body["code"], "PAYMENT_REQUIRED");
    }

    #[tokio::test]
    async fn malformed_credential_is_a_bad_request() {
        let (app, _gate) = app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/paid")
                    .header(header::AUTHORIZATION, "Payment not-base64!!")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "MALFORMED_PROOF");
    }

    #[tokio::test]
    async fn paid_request_reaches_the_route_with_a_receipt() {
        let (app, _gate) = app();

        // First request mints the challenge.
        let challenge_response = app
            .clone()
            .oneshot(Request::builder().uri("/paid").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        let www = challenge_response
            .headers()
            .get(WWW_AUTHENTICATE_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        let challenge = codec::parse_www_authenticate(&www).unwrap();

        let credential = PaymentCredential {
            id: challenge.id,
            payload: ProofPayload {
                kind: PAYLOAD_TYPE_TRANSACTION.to_owned(),
                signature: "0xsigned".to_owned(),
                reference: Some(tx(1)),
            },
        };
        let authorization = codec::encode_authorization(&credential).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/paid")
                    .header(header::AUTHORIZATION, authorization)
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let receipt = response
            .headers()
            .get(PAYMENT_RECEIPT_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        assert!(receipt.starts_with("status=success; method=tempo; "));
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "private"
        );

        let body = body_json(response).await;
        assert_eq!(body["paid"], true);
        assert_eq!(body["txHash"], tx(1));
        assert_eq!(body["payer"], "0xpayer");
    }

    #[tokio::test]
    async fn replayed_credential_is_rejected_without_a_new_challenge() {
        let (app, gate) = app();

        let first = match gate.authorize(None).await {
            GateDecision::Rejected(rejection) => rejection.challenge.unwrap(),
            GateDecision::Authorized(_) => panic!("anonymous request authorized"),
        };
        let second = match gate.authorize(None).await {
            GateDecision::Rejected(rejection) => rejection.challenge.unwrap(),
            GateDecision::Authorized(_) => panic!("anonymous request authorized"),
        };

        let make = |challenge_id: String| {
            let credential = PaymentCredential {
                id: challenge_id,
                payload: ProofPayload {
                    kind: PAYLOAD_TYPE_TRANSACTION.to_owned(),
                    signature: "0xsigned".to_owned(),
                    reference: Some(tx(2)),
                },
            };
            codec::encode_authorization(&credential).unwrap()
        };

        let ok = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/paid")
                    .header(header::AUTHORIZATION, make(first.id))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let replayed = app
            .oneshot(
                Request::builder()
                    .uri("/paid")
                    .header(header::AUTHORIZATION, make(second.id))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(replayed.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(replayed).await;
        assert_eq!(body["code"], "REPLAY");
    }
}
