//! Business services: the synchronous checkout path, plan and vault caches,
//! and the notification hooks reconciliation outcomes fan out through.

pub mod checkout;
pub mod customer_vault;
pub mod notification;
pub mod plan_cache;

#[cfg(test)]
mod checkout_tests;
