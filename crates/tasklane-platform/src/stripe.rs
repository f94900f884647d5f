use anyhow::{Context, Result, anyhow, bail};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use tasklane_core::{PaymentIntent, PaymentIntentStatus, PaymentProcessor};

use crate::config::StripeConfig;

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock skew between the signature timestamp and our clock.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verify a `Stripe-Signature` header (`t=<ts>,v1=<hex hmac>`) against the
/// raw request body. The signed payload is `"{t}.{body}"` keyed with the
/// endpoint secret.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str) -> Result<(), SignatureError> {
    let now = chrono::Utc::now().timestamp();
    verify_signature_at(payload, header, secret, now)
}

pub fn verify_signature_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut v1: Option<&str> = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1 = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let v1 = v1.ok_or(SignatureError::Malformed)?;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }

    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signature = hex::decode(v1).map_err(|_| SignatureError::Malformed)?;
    let mut mac =
        HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    // Constant-time comparison.
    mac.verify_slice(&signature)
        .map_err(|_| SignatureError::Mismatch)?;

    Ok(())
}

/// A verified webhook event, reduced to what the intake dispatches on.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub payment_intent: PaymentIntent,
}

/// Parse the event envelope (`{id, type, data: {object: <payment intent>}}`).
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent> {
    let envelope: Value = serde_json::from_slice(payload).context("event body is not JSON")?;
    let id = envelope
        .get("id")
        .and_then(Value::as_str)
        .context("event id missing")?
        .to_string();
    let event_type = envelope
        .get("type")
        .and_then(Value::as_str)
        .context("event type missing")?
        .to_string();
    let object = envelope
        .pointer("/data/object")
        .context("event data.object missing")?;

    Ok(WebhookEvent {
        id,
        event_type,
        payment_intent: payment_intent_from_value(object)?,
    })
}

fn payment_intent_from_value(object: &Value) -> Result<PaymentIntent> {
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .context("payment intent id missing")?
        .to_string();
    let status_raw = object
        .get("status")
        .and_then(Value::as_str)
        .context("payment intent status missing")?;
    let status = PaymentIntentStatus::parse(status_raw)
        .map_err(|err| anyhow!("unrecognized payment intent status: {err}"))?;
    let amount_minor = object
        .get("amount")
        .and_then(Value::as_i64)
        .context("payment intent amount missing")?;
    let currency = object
        .get("currency")
        .and_then(Value::as_str)
        .unwrap_or("usd")
        .to_string();
    let capture_method = object
        .get("capture_method")
        .and_then(Value::as_str)
        .unwrap_or("automatic")
        .to_string();
    let metadata = object.get("metadata").cloned().unwrap_or(Value::Null);

    Ok(PaymentIntent {
        id,
        status,
        amount_minor,
        currency,
        capture_method,
        metadata,
    })
}

/// Thin REST client for the payment intents API. Form-encoded requests,
/// bearer auth, bounded timeout; a timeout surfaces as an error the caller
/// logs and continues past.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build stripe http client")?;

        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<PaymentIntent> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("stripe request failed")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("stripe response is not JSON")?;

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("stripe returned {status}: {message}");
        }

        payment_intent_from_value(&body)
    }
}

#[async_trait::async_trait]
impl PaymentProcessor for StripeClient {
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent> {
        let url = format!("{}/v1/payment_intents/{id}", self.api_base);
        self.send(self.http.get(url)).await
    }

    async fn capture_payment_intent(&self, id: &str) -> Result<PaymentIntent> {
        let url = format!("{}/v1/payment_intents/{id}/capture", self.api_base);
        self.send(self.http.post(url)).await
    }

    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: Value,
    ) -> Result<PaymentIntent> {
        let url = format!("{}/v1/payment_intents", self.api_base);

        let mut form = vec![
            ("amount".to_string(), amount_minor.to_string()),
            ("currency".to_string(), currency.to_string()),
            ("confirm".to_string(), "true".to_string()),
            ("off_session".to_string(), "true".to_string()),
        ];
        if let Some(entries) = metadata.as_object() {
            for (key, value) in entries {
                let value = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                form.push((format!("metadata[{key}]"), value));
            }
        }

        self.send(self.http.post(url).form(&form)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(b"test_secret").unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_a_valid_signature() {
        let payload = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let header = sign(payload, 1_700_000_000);
        verify_signature_at(payload, &header, SECRET, 1_700_000_010).unwrap();
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign(payload, 1_700_000_000);
        let result = verify_signature_at(br#"{"id":"evt_2"}"#, &header, SECRET, 1_700_000_010);
        assert!(matches!(result, Err(SignatureError::Mismatch)));
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let payload = b"{}";
        let header = sign(payload, 1_700_000_000);
        let result = verify_signature_at(payload, &header, SECRET, 1_700_000_000 + 301);
        assert!(matches!(result, Err(SignatureError::Stale)));
    }

    #[test]
    fn rejects_a_signature_that_is_not_hex() {
        assert!(matches!(
            verify_signature_at(b"{}", "t=100,v1=not-hex", SECRET, 100),
            Err(SignatureError::Malformed)
        ));
    }

    #[test]
    fn rejects_a_malformed_header() {
        assert!(matches!(
            verify_signature_at(b"{}", "v1=abc", SECRET, 0),
            Err(SignatureError::Malformed)
        ));
    }

    #[test]
    fn parses_an_event_envelope() {
        let payload = br#"{
            "id": "evt_9",
            "type": "payment_intent.succeeded",
            "data": {
                "object": {
                    "id": "pi_123",
                    "status": "requires_capture",
                    "amount": 11820,
                    "currency": "usd",
                    "capture_method": "manual",
                    "metadata": {"type": "offer_purchase"}
                }
            }
        }"#;

        let event = parse_event(payload).unwrap();
        assert_eq!(event.id, "evt_9");
        assert_eq!(event.event_type, "payment_intent.succeeded");
        assert_eq!(event.payment_intent.id, "pi_123");
        assert_eq!(
            event.payment_intent.status,
            PaymentIntentStatus::RequiresCapture
        );
        assert_eq!(event.payment_intent.amount_minor, 11820);
    }
}
