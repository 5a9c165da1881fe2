use crate::gateway::error::{GatewayError, GatewayResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Authentication scheme for an outbound gateway request.
#[derive(Clone, Copy)]
pub enum Auth<'a> {
    Bearer(&'a str),
    Basic(&'a str, &'a str),
    None,
}

#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl GatewayHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Auth<'_>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> GatewayResult<T> {
        self.execute(method, url, auth, RequestBody::Json(body), additional_headers)
            .await
    }

    pub async fn request_form<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Auth<'_>,
        params: &[(String, String)],
    ) -> GatewayResult<T> {
        self.execute(method, url, auth, RequestBody::Form(params), &[])
            .await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Auth<'_>,
        body: RequestBody<'_>,
        additional_headers: &[(&str, &str)],
    ) -> GatewayResult<T> {
        // Only idempotent reads are retried; mutations run once so a flaky
        // connection can never double-charge.
        let max_retries = if method == reqwest::Method::GET {
            self.max_retries
        } else {
            0
        };

        let mut last_error = None;
        for attempt in 0..=max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            match auth {
                Auth::Bearer(token) => request = request.bearer_auth(token),
                Auth::Basic(user, pass) => request = request.basic_auth(user, Some(pass)),
                Auth::None => {}
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            match body {
                RequestBody::Json(Some(payload)) => request = request.json(payload),
                RequestBody::Json(None) => {}
                RequestBody::Form(params) => request = request.form(params),
            }

            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::ApiError {
                                gateway: "http".to_string(),
                                message: format!("invalid gateway JSON response: {}", e),
                                code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimitError {
                            message: "gateway rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(GatewayError::ApiError {
                        gateway: "http".to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NetworkError {
            message: "gateway request failed".to_string(),
        }))
    }
}

#[derive(Clone, Copy)]
enum RequestBody<'a> {
    Json(Option<&'a JsonValue>),
    Form(&'a [(String, String)]),
}

pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> Option<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match hmac_sha256_hex(payload, secret) {
        Some(computed) => secure_eq(computed.as_bytes(), signature.trim().as_bytes()),
        None => false,
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_verification_accepts_own_signature() {
        let payload = br#"{"kind":"subscription_went_active"}"#;
        let signature = hmac_sha256_hex(payload, "secret").expect("signing");
        assert!(verify_hmac_sha256_hex(payload, "secret", &signature));
    }

    #[test]
    fn hmac_verification_detects_invalid_signature() {
        let payload = br#"{"kind":"subscription_went_active"}"#;
        assert!(!verify_hmac_sha256_hex(payload, "secret", "not-a-valid-signature"));
        let other = hmac_sha256_hex(payload, "other-secret").expect("signing");
        assert!(!verify_hmac_sha256_hex(payload, "secret", &other));
    }
}
