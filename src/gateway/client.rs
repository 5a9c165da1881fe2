use crate::gateway::error::GatewayResult;
use crate::gateway::types::{
    BillingAddress, ChargeOutcome, ChargeRequest, CustomerDetails, CustomerProfile, GatewayEvent,
    GatewayName, Money, Plan, RefundOutcome, SubscriptionDetails, SubscriptionOutcome,
    SubscriptionRequest,
};
use async_trait::async_trait;

/// Thin RPC wrapper over a payment gateway's remote API.
///
/// Creation calls embed the internal order id in gateway-side metadata so the
/// asynchronous webhook path can correlate notifications back to an order.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    fn name(&self) -> GatewayName;

    /// Token handed to the client-side tokenization UI.
    async fn generate_client_token(&self) -> GatewayResult<String>;

    async fn create_charge(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome>;

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Option<Money>,
    ) -> GatewayResult<RefundOutcome>;

    async fn void(&self, transaction_id: &str) -> GatewayResult<RefundOutcome>;

    async fn create_customer(
        &self,
        customer: &CustomerDetails,
        payment_method_token: &str,
        billing: Option<&BillingAddress>,
    ) -> GatewayResult<CustomerProfile>;

    /// Attach a tokenized payment method to an existing vaulted customer.
    /// Returns the gateway-side payment method reference.
    async fn attach_payment_method(
        &self,
        customer_ref: &str,
        payment_method_token: &str,
    ) -> GatewayResult<String>;

    async fn create_subscription(
        &self,
        request: SubscriptionRequest,
    ) -> GatewayResult<SubscriptionOutcome>;

    async fn cancel_subscription(&self, subscription_id: &str) -> GatewayResult<()>;

    async fn fetch_subscription(&self, subscription_id: &str)
        -> GatewayResult<SubscriptionDetails>;

    async fn fetch_plans(&self) -> GatewayResult<Vec<Plan>>;

    /// Verify authenticity of an inbound webhook and decode it into a typed
    /// event. A bad signature is `AuthenticityError`; an unparseable body is
    /// `MalformedEventError`. Unknown but authentic notification kinds decode
    /// to `EventDetail::Unrecognized`.
    fn verify_webhook(&self, signature: Option<&str>, body: &[u8]) -> GatewayResult<GatewayEvent>;

    /// Answer a gateway webhook-endpoint challenge probe, for gateways that
    /// issue one.
    fn verify_challenge(&self, challenge: &str) -> GatewayResult<String>;
}
