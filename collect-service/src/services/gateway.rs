//! Payment gateway client for collect requests.
//!
//! The gateway expects the request body to carry a `sign` field: an HS256 JWT
//! over `{school_id, amount, callback_url}` keyed with the PG key.

use crate::config::GatewayConfig;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct CollectRequest {
    pub amount: f64,
    pub callback_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectResponse {
    /// Gateway-assigned id; becomes the order id.
    pub collect_request_id: String,
    pub payment_url: String,
}

#[async_trait]
pub trait CollectGateway: Send + Sync {
    async fn create_collect_request(&self, request: CollectRequest) -> Result<CollectResponse>;
}

#[derive(Debug, Serialize)]
struct SignClaims<'a> {
    school_id: &'a str,
    amount: &'a str,
    callback_url: &'a str,
}

#[derive(Debug, Serialize)]
struct CollectRequestBody<'a> {
    school_id: &'a str,
    amount: &'a str,
    callback_url: &'a str,
    sign: String,
}

#[derive(Debug, Deserialize)]
struct CollectResponseBody {
    collect_request_id: String,
    #[serde(rename = "Collect_request_url", alias = "collect_request_url")]
    collect_request_url: String,
}

#[derive(Clone)]
pub struct EdvironGateway {
    client: Client,
    config: GatewayConfig,
}

impl EdvironGateway {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn sign(&self, claims: &SignClaims<'_>) -> Result<String> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.config.pg_key.expose_secret().as_bytes()),
        )
        .map_err(|e| PaymentError::Upstream(format!("failed to sign collect request: {}", e)))
    }
}

#[async_trait]
impl CollectGateway for EdvironGateway {
    async fn create_collect_request(&self, request: CollectRequest) -> Result<CollectResponse> {
        let amount = request.amount.to_string();
        let school_id = self.config.school_id.as_str();

        let sign = self.sign(&SignClaims {
            school_id,
            amount: &amount,
            callback_url: &request.callback_url,
        })?;
        let body = CollectRequestBody {
            school_id,
            amount: &amount,
            callback_url: &request.callback_url,
            sign,
        };

        let url = format!(
            "{}/erp/create-collect-request",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| PaymentError::Upstream(format!("collect request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PaymentError::Upstream(format!("failed to read gateway response: {}", e)))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %text, "Collect request rejected by gateway");
            return Err(PaymentError::Upstream(format!(
                "gateway answered {}",
                status
            )));
        }

        let parsed: CollectResponseBody = serde_json::from_str(&text).map_err(|e| {
            tracing::error!(body = %text, "Unexpected collect request response");
            PaymentError::Upstream(format!("invalid gateway response: {}", e))
        })?;

        tracing::info!(
            collect_request_id = %parsed.collect_request_id,
            amount = request.amount,
            "Collect request created"
        );

        Ok(CollectResponse {
            collect_request_id: parsed.collect_request_id,
            payment_url: parsed.collect_request_url,
        })
    }
}
