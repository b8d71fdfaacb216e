//! Razorpay signature verification
//!
//! Two HMAC-SHA256 schemes are in use:
//! - Checkout callback: `hex(HMAC(key_secret, "<order_id>|<payment_id>"))`
//! - Webhooks: `hex(HMAC(webhook_secret, raw_body))` in `X-Razorpay-Signature`
//!
//! Comparisons go through `Mac::verify_slice`, which is constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature verification failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Secret not configured
    MissingSecret,

    /// Signature is not valid hex
    Malformed,

    /// Signature does not match the payload
    Mismatch,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::MissingSecret => write!(f, "Signing secret not configured"),
            SignatureError::Malformed => write!(f, "Malformed signature"),
            SignatureError::Mismatch => write!(f, "Signature mismatch"),
        }
    }
}

impl std::error::Error for SignatureError {}

fn mac_for(secret: &str) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::MissingSecret)
}

/// Hex-encoded HMAC-SHA256 of `payload`
///
/// # Examples
///
/// ```
/// use pulse_common::api::signature::hmac_sha256_hex;
///
/// let sig = hmac_sha256_hex("secret", b"order_1|pay_1");
/// assert_eq!(sig.len(), 64);
/// ```
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn verify(secret: &str, payload: &[u8], signature: &str) -> Result<(), SignatureError> {
    let mut mac = mac_for(secret)?;
    let provided = hex::decode(signature.trim()).map_err(|_| SignatureError::Malformed)?;
    mac.update(payload);
    mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
}

/// Verify the checkout callback signature for a gateway order/payment pair
pub fn verify_payment_signature(
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
    key_secret: &str,
) -> Result<(), SignatureError> {
    let payload = format!("{}|{}", gateway_order_id, gateway_payment_id);
    verify(key_secret, payload.as_bytes(), signature)
}

/// Verify a webhook body against its `X-Razorpay-Signature` header
pub fn verify_webhook_signature(
    body: &[u8],
    signature: &str,
    webhook_secret: &str,
) -> Result<(), SignatureError> {
    verify(webhook_secret, body, signature)
}
