//! Payment gateway capability.
//!
//! Checkout only needs two things from a gateway: create a remote order for
//! an amount, and verify the signature the client brings back after paying.
//! Both live behind [`PaymentGateway`] so the order flow can run against a
//! fake in tests.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::errors::ServiceError;

pub mod razorpay;

pub use razorpay::RazorpayGateway;

type HmacSha256 = Hmac<Sha256>;

/// Order created on the gateway side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub id: String,
    /// Amount in minor units (paise)
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("gateway is not configured: {0}")]
    NotConfigured(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an order the client can pay against.
    async fn create_remote_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<RemoteOrder, GatewayError>;

    /// Check the client-supplied signature for a completed payment.
    fn verify_signature(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool;

    /// Public key handed to the client-side checkout widget.
    fn key_id(&self) -> &str;
}

/// Hex HMAC-SHA256 of `"{order_id}|{payment_id}"`.
pub fn sign_payment(secret: &str, gateway_order_id: &str, payment_id: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(format!("{}|{}", gateway_order_id, payment_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of a hex signature against the expected MAC.
pub fn verify_payment_signature(
    secret: &str,
    gateway_order_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    let provided = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(format!("{}|{}", gateway_order_id, payment_id).as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// Converts a rupee amount to paise.
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    if amount.is_sign_negative() {
        return Err(GatewayError::InvalidAmount(amount.to_string()));
    }
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| GatewayError::InvalidAmount(amount.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signature_matches_only_its_own_pair() {
        let sig = sign_payment("secret", "order_1", "pay_1");
        assert_eq!(sig.len(), 64);
        assert!(verify_payment_signature("secret", "order_1", "pay_1", &sig));
        assert!(!verify_payment_signature("secret", "order_1", "pay_2", &sig));
        assert!(!verify_payment_signature("other", "order_1", "pay_1", &sig));
    }

    #[test]
    fn malformed_signature_is_rejected() {
        assert!(!verify_payment_signature("secret", "o", "p", "not-hex"));
        assert!(!verify_payment_signature("secret", "o", "p", ""));
    }

    #[test]
    fn minor_units_round_to_paise() {
        assert_eq!(to_minor_units(dec!(708)).unwrap(), 70_800);
        assert_eq!(to_minor_units(dec!(637.2)).unwrap(), 63_720);
        assert_eq!(to_minor_units(dec!(0.005)).unwrap(), 0);
        assert!(to_minor_units(dec!(-1)).is_err());
    }
}
