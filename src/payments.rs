use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentBrand {
    Visa,
    Mastercard,
    AmericanExpress,
    Paypal,
}

impl PaymentBrand {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentBrand::Visa => "visa",
            PaymentBrand::Mastercard => "mastercard",
            PaymentBrand::AmericanExpress => "american-express",
            PaymentBrand::Paypal => "paypal",
        }
    }
}

impl FromStr for PaymentBrand {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "visa" => Ok(PaymentBrand::Visa),
            "mastercard" => Ok(PaymentBrand::Mastercard),
            "american-express" => Ok(PaymentBrand::AmericanExpress),
            "paypal" => Ok(PaymentBrand::Paypal),
            _ => Err(AppError::InvalidProvider),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    pub cc_number: String,
    pub ccv: String,
    pub expiration_date: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, brand: PaymentBrand, card: &CardDetails) -> AppResult<()>;
}

/// Posts card details to the provider endpoint for the brand.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    endpoint_template: String,
}

impl HttpPaymentGateway {
    pub fn new(endpoint_template: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint_template = endpoint_template.into();
        if !endpoint_template.contains("{brand}") {
            anyhow::bail!("payments endpoint_template must contain {{brand}}");
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint_template })
    }

    pub fn endpoint(&self, brand: PaymentBrand) -> String {
        self.endpoint_template.replace("{brand}", brand.as_str())
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, brand: PaymentBrand, card: &CardDetails) -> AppResult<()> {
        let url = self.endpoint(brand);
        let resp = self.client.post(&url).json(card).send().await.map_err(|e| {
            tracing::warn!(brand = brand.as_str(), error = %e, "payment provider unreachable");
            AppError::PaymentFailed
        })?;
        if resp.status() != reqwest::StatusCode::OK {
            tracing::warn!(brand = brand.as_str(), status = resp.status().as_u16(), "payment declined");
            return Err(AppError::PaymentFailed);
        }
        Ok(())
    }
}
