use crate::gateway::client::GatewayClient;
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::gateways::{BraintreeGateway, StripeGateway};
use crate::gateway::types::GatewayName;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct GatewayFactoryConfig {
    pub default_gateway: GatewayName,
    pub enabled_gateways: Vec<GatewayName>,
}

impl GatewayFactoryConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let default_gateway =
            std::env::var("DEFAULT_PAYMENT_GATEWAY").unwrap_or_else(|_| "braintree".to_string());
        let default_gateway = GatewayName::from_str(&default_gateway)?;

        let enabled_raw = std::env::var("ENABLED_PAYMENT_GATEWAYS")
            .unwrap_or_else(|_| "braintree,stripe".to_string());
        let mut enabled_gateways = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            enabled_gateways.push(GatewayName::from_str(value)?);
        }

        if !enabled_gateways.contains(&default_gateway) {
            return Err(GatewayError::ValidationError {
                message: "default gateway must be enabled".to_string(),
                field: Some("DEFAULT_PAYMENT_GATEWAY".to_string()),
            });
        }

        Ok(Self {
            default_gateway,
            enabled_gateways,
        })
    }
}

pub struct GatewayFactory {
    config: GatewayFactoryConfig,
}

impl GatewayFactory {
    pub fn from_env() -> GatewayResult<Self> {
        let config = GatewayFactoryConfig::from_env()?;
        Ok(Self { config })
    }

    pub fn with_config(config: GatewayFactoryConfig) -> Self {
        Self { config }
    }

    pub fn get_gateway(&self, gateway: GatewayName) -> GatewayResult<Box<dyn GatewayClient>> {
        if !self.config.enabled_gateways.contains(&gateway) {
            return Err(GatewayError::ValidationError {
                message: format!("gateway {} is disabled", gateway),
                field: Some("gateway".to_string()),
            });
        }

        match gateway {
            GatewayName::Braintree => Ok(Box::new(BraintreeGateway::from_env()?)),
            GatewayName::Stripe => Ok(Box::new(StripeGateway::from_env()?)),
        }
    }

    pub fn get_default_gateway(&self) -> GatewayResult<Box<dyn GatewayClient>> {
        self.get_gateway(self.config.default_gateway)
    }

    pub fn list_enabled_gateways(&self) -> Vec<GatewayName> {
        self.config.enabled_gateways.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_name_parsing_works() {
        assert!(matches!(
            GatewayName::from_str("braintree"),
            Ok(GatewayName::Braintree)
        ));
        assert!(matches!(
            GatewayName::from_str(" Stripe "),
            Ok(GatewayName::Stripe)
        ));
        assert!(GatewayName::from_str("paypal").is_err());
    }

    #[test]
    fn disabled_gateway_is_refused() {
        let factory = GatewayFactory::with_config(GatewayFactoryConfig {
            default_gateway: GatewayName::Braintree,
            enabled_gateways: vec![GatewayName::Braintree],
        });
        assert!(factory.get_gateway(GatewayName::Stripe).is_err());
    }
}
