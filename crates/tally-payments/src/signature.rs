//! Stripe webhook signature verification.
//!
//! `Stripe-Signature` header format: `t=<timestamp>,v1=<signature>[,v1=...]`.
//! The signed payload is `<timestamp>.` followed by the request body exactly
//! as received, so verification must run on the raw bytes.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age for webhook events (5 minutes).
pub const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Clock skew tolerance for future timestamps (60 seconds).
pub const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

/// Parsed `Stripe-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        PaymentError::WebhookSignature("Invalid timestamp".into())
                    })?);
                }
                // Malformed hex just can't match; keep scanning
                "v1" => {
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| PaymentError::WebhookSignature("Missing timestamp".into()))?;
        if signatures.is_empty() {
            return Err(PaymentError::WebhookSignature("No v1 signature".into()));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::Config("Invalid webhook secret".into()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verify a signature header against the raw payload at a given time
pub fn verify_at(payload: &[u8], header: &str, secret: &str, now: i64) -> Result<()> {
    let header = SignatureHeader::parse(header)?;

    let age = now.checked_sub(header.timestamp).ok_or_else(|| {
        PaymentError::WebhookSignature("Timestamp outside tolerance".into())
    })?;
    if age > MAX_TIMESTAMP_AGE_SECS {
        return Err(PaymentError::WebhookSignature(format!(
            "Timestamp outside tolerance ({age}s old)"
        )));
    }
    if age < -MAX_FUTURE_TOLERANCE_SECS {
        return Err(PaymentError::WebhookSignature("Timestamp in the future".into()));
    }

    let mac = mac_for(secret, header.timestamp, payload)?;
    // verify_slice compares in constant time
    let matched = header
        .signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());

    if matched {
        Ok(())
    } else {
        Err(PaymentError::WebhookSignature(
            "No signatures found matching the expected signature for payload".into(),
        ))
    }
}

/// Verify a signature header against the raw payload now
pub fn verify(payload: &[u8], header: &str, secret: &str) -> Result<()> {
    verify_at(payload, header, secret, Utc::now().timestamp())
}

/// Build a `Stripe-Signature` header value for a payload.
///
/// Useful for replaying events against a local server.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String> {
    let mac = mac_for(secret, timestamp, payload)?;
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}
