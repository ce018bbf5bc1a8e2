// service/mpesa.rs
//
// M-Pesa (Daraja) STK push client. The gateway acknowledges a push
// synchronously and confirms the actual fund movement later through the
// callback endpoint; nothing here mutates the ledger.
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;
use crate::service::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MpesaMode {
    /// No network calls; pushes succeed synchronously with synthetic ids.
    Mock,
    Sandbox,
    Live,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StkPushResponse {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub response_description: String,
    /// True when the confirmation arrived synchronously (mock mode only);
    /// live pushes always confirm via callback.
    pub confirmed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PayoutResponse {
    pub conversation_id: String,
    pub response_description: String,
}

#[derive(Debug)]
pub struct MpesaService {
    client: reqwest::Client,
    mode: MpesaMode,
    consumer_key: String,
    consumer_secret: String,
    shortcode: String,
    passkey: String,
    callback_url: String,
}

impl MpesaService {
    pub fn new(config: &Config) -> Self {
        let mode = match config.mpesa_env.as_str() {
            "live" => MpesaMode::Live,
            "sandbox" => MpesaMode::Sandbox,
            _ => MpesaMode::Mock,
        };

        // Bounded timeout: a hung gateway call must not hold a request task
        // (and its idempotency window) open indefinitely.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.mpesa_timeout_secs))
            .build()
            .expect("reqwest client");

        Self {
            client,
            mode,
            consumer_key: config.mpesa_consumer_key.clone(),
            consumer_secret: config.mpesa_consumer_secret.clone(),
            shortcode: config.mpesa_shortcode.clone(),
            passkey: config.mpesa_passkey.clone(),
            callback_url: config.mpesa_callback_url.clone(),
        }
    }

    pub fn is_mock(&self) -> bool {
        self.mode == MpesaMode::Mock
    }

    fn base_url(&self) -> &str {
        match self.mode {
            MpesaMode::Live => "https://api.safaricom.co.ke",
            _ => "https://sandbox.safaricom.co.ke",
        }
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.base_url()
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(format!("OAuth request failed: {}", e)))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("OAuth response invalid: {}", e)))?;

        body["access_token"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ServiceError::Gateway("OAuth response missing access_token".to_string()))
    }

    /// Prompt the user's phone for a PIN to collect `amount_cents`.
    /// Synchronous acknowledgment only; the money moves when the callback
    /// arrives.
    pub async fn initiate_push(
        &self,
        phone: &str,
        amount_cents: i64,
        reference: &str,
        description: &str,
    ) -> Result<StkPushResponse, ServiceError> {
        if self.is_mock() {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            return Ok(StkPushResponse {
                checkout_request_id: format!("ws_CO_mock_{}", &suffix[..12]),
                merchant_request_id: format!("mr_mock_{}", &suffix[12..24]),
                response_description: "Success. Request accepted for processing".to_string(),
                confirmed: true,
            });
        }

        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = BASE64.encode(format!("{}{}{}", self.shortcode, self.passkey, timestamp));

        // Daraja takes whole shillings
        let amount = (amount_cents + 99) / 100;

        let payload = serde_json::json!({
            "BusinessShortCode": self.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount,
            "PartyA": phone,
            "PartyB": self.shortcode,
            "PhoneNumber": phone,
            "CallBackURL": self.callback_url,
            "AccountReference": reference,
            "TransactionDesc": description,
        });

        let response = self
            .client
            .post(format!("{}/mpesa/stkpush/v1/processrequest", self.base_url()))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(format!("STK push failed: {}", e)))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("STK push response invalid: {}", e)))?;

        if body["ResponseCode"].as_str() == Some("0") {
            Ok(StkPushResponse {
                checkout_request_id: body["CheckoutRequestID"].as_str().unwrap_or("").to_string(),
                merchant_request_id: body["MerchantRequestID"].as_str().unwrap_or("").to_string(),
                response_description: body["ResponseDescription"].as_str().unwrap_or("").to_string(),
                confirmed: false,
            })
        } else {
            let message = body["errorMessage"]
                .as_str()
                .or_else(|| body["ResponseDescription"].as_str())
                .unwrap_or("STK push rejected");
            Err(ServiceError::Gateway(message.to_string()))
        }
    }

    /// Send `amount_cents` out to a customer phone (withdrawal payout).
    pub async fn initiate_payout(
        &self,
        phone: &str,
        amount_cents: i64,
        reference: &str,
    ) -> Result<PayoutResponse, ServiceError> {
        if self.is_mock() {
            return Ok(PayoutResponse {
                conversation_id: format!("AG_mock_{}", uuid::Uuid::new_v4().simple()),
                response_description: "Accept the service request successfully.".to_string(),
            });
        }

        let token = self.access_token().await?;
        let amount = (amount_cents + 99) / 100;

        let payload = serde_json::json!({
            "InitiatorName": "kazihub",
            "CommandID": "BusinessPayment",
            "Amount": amount,
            "PartyA": self.shortcode,
            "PartyB": phone,
            "Remarks": reference,
            "QueueTimeOutURL": self.callback_url,
            "ResultURL": self.callback_url,
            "Occasion": "withdrawal",
        });

        let response = self
            .client
            .post(format!("{}/mpesa/b2c/v1/paymentrequest", self.base_url()))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(format!("Payout request failed: {}", e)))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("Payout response invalid: {}", e)))?;

        if body["ResponseCode"].as_str() == Some("0") {
            Ok(PayoutResponse {
                conversation_id: body["ConversationID"].as_str().unwrap_or("").to_string(),
                response_description: body["ResponseDescription"].as_str().unwrap_or("").to_string(),
            })
        } else {
            let message = body["errorMessage"]
                .as_str()
                .or_else(|| body["ResponseDescription"].as_str())
                .unwrap_or("Payout rejected");
            Err(ServiceError::Gateway(message.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Callback payload
// ---------------------------------------------------------------------------

/// Envelope Daraja POSTs to the callback endpoint.
#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub item: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }

    fn item(&self, name: &str) -> Option<&serde_json::Value> {
        self.callback_metadata
            .as_ref()?
            .item
            .iter()
            .find(|item| item.name == name)?
            .value
            .as_ref()
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.item("MpesaReceiptNumber")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Amount arrives in whole shillings.
    pub fn amount_cents(&self) -> Option<i64> {
        self.item("Amount")
            .and_then(|v| v.as_f64())
            .map(|kes| (kes * 100.0).round() as i64)
    }

    pub fn phone_number(&self) -> Option<String> {
        self.item("PhoneNumber").map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// The gateway must always receive a success acknowledgment, whatever the
/// internal outcome, to avoid provider-side retry storms.
pub fn callback_ack() -> serde_json::Value {
    serde_json::json!({ "ResultCode": 0, "ResultDesc": "Accepted" })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS_CALLBACK: &str = r#"{
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": 1000.00},
                        {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                        {"Name": "TransactionDate", "Value": 20191219102115},
                        {"Name": "PhoneNumber", "Value": 254712345678}
                    ]
                }
            }
        }
    }"#;

    const FAILURE_CALLBACK: &str = r#"{
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user."
            }
        }
    }"#;

    #[test]
    fn test_parse_success_callback() {
        let envelope: StkCallbackEnvelope = serde_json::from_str(SUCCESS_CALLBACK).unwrap();
        let callback = envelope.body.stk_callback;

        assert!(callback.is_success());
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(callback.receipt_number().as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(callback.amount_cents(), Some(100_000));
        assert_eq!(callback.phone_number().as_deref(), Some("254712345678"));
    }

    #[test]
    fn test_parse_failure_callback() {
        let envelope: StkCallbackEnvelope = serde_json::from_str(FAILURE_CALLBACK).unwrap();
        let callback = envelope.body.stk_callback;

        assert!(!callback.is_success());
        assert_eq!(callback.result_code, 1032);
        assert_eq!(callback.receipt_number(), None);
        assert_eq!(callback.amount_cents(), None);
    }

    #[test]
    fn test_ack_is_always_success() {
        let ack = callback_ack();
        assert_eq!(ack["ResultCode"], 0);
    }
}
