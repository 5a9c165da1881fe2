//! formpay-backend: payment processing and webhook-driven state
//! reconciliation for form-builder checkouts.
//!
//! A submission charges (or subscribes) through a payment gateway with the
//! internal order id embedded in gateway-side metadata; the asynchronous
//! webhook stream is then correlated back onto the order record and applied
//! through an idempotent state machine, safe under at-least-once delivery
//! and out-of-order arrival.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod reconcile;
pub mod services;
