//! Razorpay payment gateway client
//!
//! Orders, refunds and RazorpayX payouts over the REST API with HTTP basic
//! auth (`key_id:key_secret`). Services talk to the `PaymentGateway` trait so
//! tests can substitute a fake.

use async_trait::async_trait;
use pulse_common::config::RazorpaySettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("basis-pulse/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;
const PAYOUT_IDEMPOTENCY_HEADER: &str = "X-Payout-Idempotency";

/// Gateway client errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Gateway API error {status}: {description}")]
    Api { status: u16, description: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// `POST /v1/orders` body
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
}

/// `POST /v1/payouts` body
#[derive(Debug, Clone, Serialize)]
pub struct CreatePayoutRequest {
    pub account_number: String,
    pub fund_account_id: String,
    pub amount: i64,
    pub currency: String,
    pub mode: String,
    pub purpose: String,
    pub reference_id: String,
    pub queue_if_low_balance: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayPayout {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub amount: Option<i64>,
}

/// Razorpay error envelope: `{"error": {"code": ..., "description": ...}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    description: Option<String>,
}

/// Payment gateway operations used by the booking, ticket and payout flows
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key handed to the checkout widget
    fn key_id(&self) -> &str;

    async fn create_order(&self, request: &CreateOrderRequest)
        -> Result<GatewayOrder, GatewayError>;

    /// Refund `amount` paise of a captured payment
    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, GatewayError>;

    /// Transfer `amount` paise to a consultant fund account
    async fn create_payout(
        &self,
        fund_account_id: &str,
        amount: i64,
        reference_id: &str,
    ) -> Result<GatewayPayout, GatewayError>;
}

/// Razorpay REST client
pub struct RazorpayClient {
    http_client: reqwest::Client,
    settings: RazorpaySettings,
}

impl RazorpayClient {
    pub fn new(settings: RazorpaySettings) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            settings,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn ensure_configured(&self) -> Result<(), GatewayError> {
        if self.settings.is_configured() {
            Ok(())
        } else {
            Err(GatewayError::NotConfigured(
                "Razorpay key_id/key_secret missing".to_string(),
            ))
        }
    }

    async fn post_json<B, T>(
        &self,
        path: &str,
        body: &B,
        idempotency: Option<(&str, &str)>,
    ) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        self.ensure_configured()?;

        let mut request = self
            .http_client
            .post(self.url(path))
            .basic_auth(&self.settings.key_id, Some(&self.settings.key_secret))
            .json(body);
        if let Some((header, key)) = idempotency {
            request = request.header(header, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let description = serde_json::from_str::<ErrorEnvelope>(&error_text)
                .ok()
                .and_then(|envelope| envelope.error.description)
                .unwrap_or(error_text);
            return Err(GatewayError::Api {
                status: status.as_u16(),
                description,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    fn key_id(&self) -> &str {
        &self.settings.key_id
    }

    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        tracing::debug!(receipt = %request.receipt, amount = request.amount, "Creating Razorpay order");
        let order: GatewayOrder = self.post_json("/v1/orders", request, None).await?;
        tracing::info!(gateway_order_id = %order.id, amount = order.amount, "Razorpay order created");
        Ok(order)
    }

    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, GatewayError> {
        let body = serde_json::json!({ "amount": amount });
        let refund: GatewayRefund = self
            .post_json(&format!("/v1/payments/{}/refund", payment_id), &body, None)
            .await?;
        tracing::info!(refund_id = %refund.id, payment_id, amount, "Razorpay refund issued");
        Ok(refund)
    }

    async fn create_payout(
        &self,
        fund_account_id: &str,
        amount: i64,
        reference_id: &str,
    ) -> Result<GatewayPayout, GatewayError> {
        if self.settings.payout_account_number.trim().is_empty() {
            return Err(GatewayError::NotConfigured(
                "RazorpayX payout account number missing".to_string(),
            ));
        }

        let request = CreatePayoutRequest {
            account_number: self.settings.payout_account_number.clone(),
            fund_account_id: fund_account_id.to_string(),
            amount,
            currency: pulse_common::money::CURRENCY.to_string(),
            mode: "IMPS".to_string(),
            purpose: "payout".to_string(),
            reference_id: reference_id.to_string(),
            queue_if_low_balance: true,
        };
        // RazorpayX replays the original payout for a repeated key
        let payout: GatewayPayout = self
            .post_json(
                "/v1/payouts",
                &request,
                Some((PAYOUT_IDEMPOTENCY_HEADER, reference_id)),
            )
            .await?;
        tracing::info!(gateway_payout_id = %payout.id, status = %payout.status, "Razorpay payout created");
        Ok(payout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str) -> RazorpaySettings {
        RazorpaySettings {
            key_id: "rzp_test_key".to_string(),
            key_secret: "secret".to_string(),
            webhook_secret: "whsec".to_string(),
            base_url: base_url.to_string(),
            payout_account_number: String::new(),
        }
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = RazorpayClient::new(settings("http://localhost:9000/")).unwrap();
        assert_eq!(client.url("/v1/orders"), "http://localhost:9000/v1/orders");
    }

    #[tokio::test]
    async fn test_unconfigured_client_refuses_calls() {
        let mut s = settings("http://localhost:9");
        s.key_secret.clear();
        let client = RazorpayClient::new(s).unwrap();
        let request = CreateOrderRequest {
            amount: 100,
            currency: "INR".to_string(),
            receipt: "r".to_string(),
            notes: HashMap::new(),
        };
        assert!(matches!(
            client.create_order(&request).await,
            Err(GatewayError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_payout_requires_account_number() {
        let client = RazorpayClient::new(settings("http://localhost:9")).unwrap();
        assert!(matches!(
            client.create_payout("fa_1", 100, "ref").await,
            Err(GatewayError::NotConfigured(_))
        ));
    }
}
