//! Razorpay orders and UPI handle validation.

use std::time::Duration;

use nanoid::nanoid;
use serde::Deserialize;
use serde_json::json;
use url::Url;

pub const CURRENCY: &str = "INR";

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("payment provider returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid payment url: {0}")]
    Url(#[from] url::ParseError),
}

pub struct Razorpay {
    http: reqwest::Client,
    base_url: Url,
    key_id: String,
    key_secret: String,
}

#[derive(Deserialize)]
struct Order {
    id: String,
}

#[derive(Deserialize)]
struct VpaCheck {
    success: bool,
}

/// Razorpay takes amounts in the smallest currency unit.
pub fn to_paise(rupees: f64) -> i64 {
    (rupees * 100.0).round() as i64
}

/// Receipts are capped at 40 characters by Razorpay.
pub fn receipt_for(event_id: i32, user_id: i32) -> String {
    let receipt = format!("evt{event_id}-u{user_id}-{}", nanoid!(8));
    receipt.chars().take(40).collect()
}

impl Razorpay {
    pub fn new(base_url: &str, key_id: &str, key_secret: &str) -> Result<Self, PaymentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        Ok(Self {
            http,
            base_url,
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, PaymentError> {
        let response = self
            .http
            .post(self.base_url.join(path)?)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn create_order(&self, rupees: f64, receipt: &str) -> Result<String, PaymentError> {
        let order: Order = self
            .post(
                "orders",
                json!({
                    "amount": to_paise(rupees),
                    "currency": CURRENCY,
                    "receipt": receipt,
                    "payment_capture": 1,
                }),
            )
            .await?;
        tracing::info!(order_id = %order.id, %receipt, "razorpay order created");
        Ok(order.id)
    }

    pub async fn validate_vpa(&self, vpa: &str) -> Result<bool, PaymentError> {
        let check: VpaCheck = self
            .post("payments/validate/vpa", json!({ "vpa": vpa }))
            .await?;
        Ok(check.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_are_sent_in_paise() {
        assert_eq!(to_paise(150.0), 15000);
        assert_eq!(to_paise(99.99), 9999);
        assert_eq!(to_paise(0.1 + 0.2), 30);
    }

    #[test]
    fn receipts_fit_razorpay_limits() {
        let receipt = receipt_for(123_456, 987_654);
        assert!(receipt.starts_with("evt123456-u987654-"));
        assert!(receipt.len() <= 40);
        assert_ne!(receipt, receipt_for(123_456, 987_654));
    }

    #[test]
    fn base_url_gets_a_trailing_slash() {
        let client = Razorpay::new("https://api.razorpay.com/v1", "key", "secret").unwrap();
        assert_eq!(
            client.base_url.join("orders").unwrap().as_str(),
            "https://api.razorpay.com/v1/orders"
        );
    }
}
