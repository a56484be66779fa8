#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Axum/tower middleware for enforcing HTTP 402 payments on protected routes.
//!
//! Requests without a valid payment credential receive a
//! `402 Payment Required` response with a `WWW-Authenticate` challenge;
//! requests carrying a valid credential are verified (and optionally
//! broadcast) by the gate before reaching the protected handler, which can
//! read the [`GrantedPayment`](paymentauth::gate::GrantedPayment) request
//! extension.
//!
//! # Modules
//!
//! - [`constants`] - HTTP header names and cache-control values
//! - [`respond`] - Rendering gate decisions into HTTP responses
//! - [`layer`] - Tower layer/service pair wrapping the gate
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation of admissions

pub mod constants;
pub mod layer;
pub mod respond;

pub use layer::{PaymentAuthLayer, PaymentAuthService};
