use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `"{gateway_order_id}|{gateway_payment_id}"` under `secret_key`.
pub fn sign(
    gateway_order_id: &str,
    gateway_payment_id: &str,
    secret_key: &str,
) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid HMAC key: {}", e)))?;
    mac.update(gateway_order_id.as_bytes());
    mac.update(b"|");
    mac.update(gateway_payment_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// True only when `signature` is exactly the expected hex digest.
pub fn verify_signature(
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
    secret_key: &str,
) -> bool {
    match sign(gateway_order_id, gateway_payment_id, secret_key) {
        Ok(expected) => constant_time_eq(&expected, signature),
        Err(_) => false,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Identifiers and signature the gateway hands back to the client after checkout.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
}

/// Gateway callback that passed signature verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedPayment {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub gateway_signature: String,
}

fn required(value: &Option<String>, field: &str) -> Result<String, ServiceError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::MissingPaymentDetails(format!("{} is required", field)))
}

/// Holds the gateway secret; refuses to exist without one.
#[derive(Clone)]
pub struct PaymentVerifier {
    secret: Arc<str>,
}

impl fmt::Debug for PaymentVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl PaymentVerifier {
    pub fn new(secret: impl Into<String>) -> Result<Self, ServiceError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(ServiceError::ConfigurationError(
                "payment gateway secret is not configured".to_string(),
            ));
        }
        Ok(Self {
            secret: Arc::from(secret),
        })
    }

    pub fn verify(&self, gateway_order_id: &str, gateway_payment_id: &str, signature: &str) -> bool {
        verify_signature(gateway_order_id, gateway_payment_id, signature, &self.secret)
    }

    /// Validates presence of every field, then the signature.
    pub fn check(&self, details: &PaymentDetails) -> Result<VerifiedPayment, ServiceError> {
        let gateway_order_id = required(&details.gateway_order_id, "gatewayOrderId")?;
        let gateway_payment_id = required(&details.gateway_payment_id, "gatewayPaymentId")?;
        let gateway_signature = required(&details.gateway_signature, "gatewaySignature")?;

        if !self.verify(&gateway_order_id, &gateway_payment_id, &gateway_signature) {
            counter!("payments.signature_rejected", 1);
            warn!(
                gateway_order_id = %gateway_order_id,
                gateway_payment_id = %gateway_payment_id,
                "Payment signature verification failed"
            );
            return Err(ServiceError::InvalidSignature);
        }

        Ok(VerifiedPayment {
            gateway_order_id,
            gateway_payment_id,
            gateway_signature,
        })
    }
}

/// Order registered with the payment gateway ahead of checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GatewayOrder {
    pub id: String,
    /// Amount in minor currency units (paise, cents)
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GatewayOrderRequest {
    pub amount: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
}

/// Converts a major-unit amount (e.g. 499.50) to minor units (49950).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::InvalidAmount(
            "amount must be greater than zero".to_string(),
        ));
    }
    (amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidAmount("amount is too large".to_string()))
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: GatewayOrderRequest)
        -> Result<GatewayOrder, ServiceError>;
}

/// REST client for the gateway's `/orders` endpoint.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: Arc<str>,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::ConfigurationError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: Arc::from(key_secret.into()),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), fields(amount = request.amount, currency = %request.currency))]
    async fn create_order(
        &self,
        request: GatewayOrderRequest,
    ) -> Result<GatewayOrder, ServiceError> {
        let url = format!("{}/orders", self.base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&*self.key_secret))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Payment gateway request failed: {}", e);
                ServiceError::ExternalServiceError(format!("gateway unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Payment gateway rejected order creation");
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {}",
                status
            )));
        }

        let order = response.json::<GatewayOrder>().await.map_err(|e| {
            error!("Invalid payment gateway response: {}", e);
            ServiceError::ExternalServiceError(format!("invalid gateway response: {}", e))
        })?;

        info!(gateway_order_id = %order.id, "Gateway order created");
        Ok(order)
    }
}

/// Verifier plus gateway client, shared by the payment handlers.
#[derive(Clone)]
pub struct PaymentService {
    verifier: PaymentVerifier,
    gateway: Arc<dyn PaymentGateway>,
    default_currency: String,
}

impl PaymentService {
    pub fn new(
        verifier: PaymentVerifier,
        gateway: Arc<dyn PaymentGateway>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            gateway,
            default_currency: default_currency.into(),
        }
    }

    #[instrument(skip(self))]
    pub async fn create_gateway_order(
        &self,
        amount: Decimal,
        currency: Option<String>,
        receipt: Option<String>,
    ) -> Result<GatewayOrder, ServiceError> {
        let amount = to_minor_units(amount)?;
        let currency = currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.default_currency.clone());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ServiceError::ValidationError(format!(
                "currency '{}' is not an ISO 4217 code",
                currency
            )));
        }

        self.gateway
            .create_order(GatewayOrderRequest {
                amount,
                currency,
                receipt,
            })
            .await
    }

    pub fn verify(&self, details: &PaymentDetails) -> Result<VerifiedPayment, ServiceError> {
        self.verifier.check(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    const KEY: &str = "gateway_test_secret";

    #[test]
    fn verifies_matching_signature() {
        let sig = sign("order_abc", "pay_123", KEY).unwrap();
        assert!(verify_signature("order_abc", "pay_123", &sig, KEY));
        assert!(!verify_signature("order_abc", "pay_124", &sig, KEY));
        assert!(!verify_signature("order_abc", "pay_123", &sig, "other_key"));
    }

    #[test]
    fn signature_is_lowercase_hex_sha256() {
        let sig = sign("a", "b", KEY).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn empty_secret_is_a_configuration_error() {
        assert_matches!(
            PaymentVerifier::new("  "),
            Err(ServiceError::ConfigurationError(_))
        );
    }

    #[test]
    fn check_reports_missing_fields_before_signature() {
        let verifier = PaymentVerifier::new(KEY).unwrap();
        let details = PaymentDetails {
            gateway_order_id: Some("order_abc".into()),
            gateway_payment_id: None,
            gateway_signature: Some("deadbeef".into()),
        };
        assert_matches!(
            verifier.check(&details),
            Err(ServiceError::MissingPaymentDetails(msg)) if msg.contains("gatewayPaymentId")
        );
    }

    #[test]
    fn check_rejects_bad_signature() {
        let verifier = PaymentVerifier::new(KEY).unwrap();
        let details = PaymentDetails {
            gateway_order_id: Some("order_abc".into()),
            gateway_payment_id: Some("pay_123".into()),
            gateway_signature: Some("0".repeat(64)),
        };
        assert_matches!(verifier.check(&details), Err(ServiceError::InvalidSignature));
    }

    #[test]
    fn debug_output_hides_secret() {
        let verifier = PaymentVerifier::new(KEY).unwrap();
        assert!(!format!("{:?}", verifier).contains(KEY));
    }

    #[test]
    fn minor_units_conversion() {
        assert_eq!(to_minor_units(dec!(499.50)).unwrap(), 49950);
        assert_eq!(to_minor_units(dec!(0.005)).unwrap(), 1);
        assert_matches!(to_minor_units(dec!(0)), Err(ServiceError::InvalidAmount(_)));
    }

    fn mutate(s: &str, idx: usize) -> String {
        let mut chars: Vec<char> = s.chars().collect();
        let i = idx % chars.len();
        chars[i] = if chars[i] == 'a' { 'b' } else { 'a' };
        chars.into_iter().collect()
    }

    proptest! {
        #[test]
        fn any_single_character_mutation_fails(
            oid in "[a-zA-Z0-9_]{1,24}",
            pid in "[a-zA-Z0-9_]{1,24}",
            idx in any::<usize>(),
            target in 0u8..3,
        ) {
            let sig = sign(&oid, &pid, KEY).unwrap();
            prop_assert!(verify_signature(&oid, &pid, &sig, KEY));

            let (o, p, s) = match target {
                0 => (mutate(&oid, idx), pid.clone(), sig.clone()),
                1 => (oid.clone(), mutate(&pid, idx), sig.clone()),
                _ => (oid.clone(), pid.clone(), mutate(&sig, idx)),
            };
            prop_assert!(!verify_signature(&o, &p, &s, KEY));
        }
    }
}
