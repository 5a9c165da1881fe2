//! Payment gateway clients.
//!
//! Everything here is a thin, typed wrapper over the remote gateway APIs:
//! synchronous charge/subscription calls made at submission time, and the
//! verification + decoding of asynchronous webhook notifications into
//! `GatewayEvent` values the reconciliation layer consumes.

pub mod client;
pub mod error;
pub mod factory;
pub mod gateways;
pub mod types;
pub mod utils;
