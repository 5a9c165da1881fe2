pub mod braintree;
pub mod stripe;

pub use braintree::{BraintreeConfig, BraintreeGateway};
pub use stripe::{StripeConfig, StripeGateway};
