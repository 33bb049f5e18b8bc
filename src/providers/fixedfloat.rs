//! FixedFloat client
//!
//! REST over `POST /api/v2/<method>` with a JSON body. Every request is signed
//! with HMAC-SHA256 of the exact body bytes, hex encoded in `X-API-SIGN`.
//! Orders are reconciled by per-transaction polling.

use super::http::{de_flag, de_opt_count, non_empty, HttpTransport};
use super::signing::HmacSigner;
use super::{
    lookup_each, EmergencyRequest, OrderRef, OrderRequest, ProviderClient, ProviderCurrency,
    ProviderKind, ProviderOrder, ProviderQuote, QuoteRequest, Reconciliation, RetryOn, RetryPolicy,
};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::transaction::{EmergencyChoice, Leg, Received, TransactionStatus};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Native order states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixedFloatStatus {
    New,
    Pending,
    Exchange,
    Withdraw,
    Done,
    Expired,
    Emergency,
}

impl FixedFloatStatus {
    #[cfg(test)]
    const ALL: [FixedFloatStatus; 7] = [
        FixedFloatStatus::New,
        FixedFloatStatus::Pending,
        FixedFloatStatus::Exchange,
        FixedFloatStatus::Withdraw,
        FixedFloatStatus::Done,
        FixedFloatStatus::Expired,
        FixedFloatStatus::Emergency,
    ];

    fn parse(native: &str) -> ProviderResult<Self> {
        match native {
            "NEW" => Ok(FixedFloatStatus::New),
            "PENDING" => Ok(FixedFloatStatus::Pending),
            "EXCHANGE" => Ok(FixedFloatStatus::Exchange),
            "WITHDRAW" => Ok(FixedFloatStatus::Withdraw),
            "DONE" => Ok(FixedFloatStatus::Done),
            "EXPIRED" => Ok(FixedFloatStatus::Expired),
            "EMERGENCY" => Ok(FixedFloatStatus::Emergency),
            other => Err(ProviderError::UnknownProviderStatus(format!(
                "fixedfloat: {}",
                other
            ))),
        }
    }

    #[cfg(test)]
    fn as_str(&self) -> &'static str {
        match self {
            FixedFloatStatus::New => "NEW",
            FixedFloatStatus::Pending => "PENDING",
            FixedFloatStatus::Exchange => "EXCHANGE",
            FixedFloatStatus::Withdraw => "WITHDRAW",
            FixedFloatStatus::Done => "DONE",
            FixedFloatStatus::Expired => "EXPIRED",
            FixedFloatStatus::Emergency => "EMERGENCY",
        }
    }

    fn canonical(self) -> TransactionStatus {
        match self {
            FixedFloatStatus::New => TransactionStatus::Created,
            FixedFloatStatus::Pending => TransactionStatus::Pending,
            FixedFloatStatus::Exchange => TransactionStatus::Exchange,
            FixedFloatStatus::Withdraw => TransactionStatus::Withdraw,
            FixedFloatStatus::Done => TransactionStatus::Done,
            FixedFloatStatus::Expired => TransactionStatus::Expired,
            FixedFloatStatus::Emergency => TransactionStatus::Emergency,
        }
    }
}

/// Map a FixedFloat status through the fixed table
pub(crate) fn map_native(native: &str) -> ProviderResult<TransactionStatus> {
    FixedFloatStatus::parse(native).map(FixedFloatStatus::canonical)
}

/// Error table for non-zero response codes
fn map_error(code: i64, message: &str) -> ProviderError {
    match code {
        310 | 311 | 312 => ProviderError::InvalidAddress(message.to_string()),
        303 | 306 | 307 => ProviderError::OutOfLimits(message.to_string()),
        300 | 500 | 501 => ProviderError::PartnerInternal(message.to_string()),
        _ => ProviderError::Api {
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn into_data<T: DeserializeOwned>(self) -> ProviderResult<T> {
        if self.code != 0 {
            return Err(map_error(self.code, &self.msg));
        }
        Ok(serde_json::from_value(self.data)?)
    }
}

#[derive(Debug, Deserialize)]
struct Currency {
    code: String,
    #[serde(default)]
    coin: String,
    network: String,
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "de_flag")]
    recv: bool,
    #[serde(default, deserialize_with = "de_flag")]
    send: bool,
    #[serde(default)]
    tag: Option<String>,
}

impl From<Currency> for ProviderCurrency {
    fn from(c: Currency) -> Self {
        ProviderCurrency {
            name: if c.name.is_empty() { c.coin } else { c.name },
            code: c.code,
            network: c.network,
            tag_name: non_empty(c.tag),
            // `recv` means FixedFloat accepts deposits in this currency
            can_send: c.recv,
            can_receive: c.send,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PriceSide {
    amount: Decimal,
    #[serde(default)]
    min: Decimal,
    #[serde(default)]
    max: Decimal,
    #[serde(default, rename = "networkFee")]
    network_fee: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct Price {
    from: PriceSide,
    to: PriceSide,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Tx {
    id: Option<String>,
    amount: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_count")]
    confirmations: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct OrderSide {
    code: Option<String>,
    network: Option<String>,
    amount: Option<Decimal>,
    address: Option<String>,
    tag: Option<String>,
    #[serde(default)]
    tx: Tx,
}

impl OrderSide {
    fn split(self) -> (Leg, Received) {
        let leg = Leg {
            currency: self.code,
            network: self.network,
            amount: self.amount,
            address: non_empty(self.address),
            tag: non_empty(self.tag),
        };
        let received = Received {
            id: non_empty(self.tx.id),
            amount: self.tx.amount,
            confirmations: self.tx.confirmations,
        };
        (leg, received)
    }
}

#[derive(Debug, Default, Deserialize)]
struct OrderTime {
    reg: Option<i64>,
    expiration: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Order {
    id: String,
    token: Option<String>,
    status: String,
    #[serde(default)]
    time: OrderTime,
    #[serde(default)]
    from: OrderSide,
    #[serde(default)]
    to: OrderSide,
    #[serde(default)]
    back: OrderSide,
}

fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
}

impl From<Order> for ProviderOrder {
    fn from(order: Order) -> Self {
        let (from, received_from) = order.from.split();
        let (to, received_to) = order.to.split();
        let (back, received_back) = order.back.split();

        ProviderOrder {
            id: order.id,
            token: order.token,
            native_status: order.status,
            from,
            to,
            back,
            registered_at: from_unix(order.time.reg),
            expires_at: from_unix(order.time.expiration),
            received_from,
            received_to,
            received_back,
        }
    }
}

pub struct FixedFloatClient {
    transport: HttpTransport,
    signer: HmacSigner,
    api_key: String,
    policy: RetryPolicy,
}

impl FixedFloatClient {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            transport: HttpTransport::new(
                ProviderKind::FixedFloat,
                &config.base_url,
                Duration::from_millis(config.timeout_ms),
            )?,
            signer: HmacSigner::new(&config.api_secret),
            api_key: config.api_key.clone(),
            policy: RetryPolicy::from_config(config),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &str) -> ProviderResult<T> {
        let signature = self.signer.sign_hex(body.as_bytes())?;
        let request = self
            .transport
            .request(Method::POST, &format!("/api/v2/{}", method))
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header("X-API-KEY", &self.api_key)
            .header("X-API-SIGN", signature)
            .body(body.to_string());

        let envelope: Envelope = self.transport.send(request).await?.json()?;
        envelope.into_data()
    }

    fn quote_body(request: &QuoteRequest) -> String {
        json!({
            "type": request.rate_type.as_str(),
            "fromCcy": request.from_code,
            "toCcy": request.to_code,
            "direction": request.direction.as_str(),
            "amount": request.amount,
        })
        .to_string()
    }
}

#[async_trait]
impl ProviderClient for FixedFloatClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::FixedFloat
    }

    fn reconciliation(&self) -> Reconciliation {
        Reconciliation::Polling
    }

    fn map_status(&self, native: &str) -> ProviderResult<TransactionStatus> {
        map_native(native)
    }

    async fn currencies(&self) -> ProviderResult<Vec<ProviderCurrency>> {
        let currencies: Vec<Currency> = self
            .policy
            .run("ccies", RetryOn::Transient, || self.call("ccies", "{}"))
            .await?;
        Ok(currencies.into_iter().map(ProviderCurrency::from).collect())
    }

    async fn currency(&self, code: &str, network: &str) -> ProviderResult<ProviderCurrency> {
        self.currencies()
            .await?
            .into_iter()
            .find(|c| c.code.eq_ignore_ascii_case(code) && c.network.eq_ignore_ascii_case(network))
            .ok_or_else(|| {
                ProviderError::Unsupported(format!("fixedfloat does not list {} on {}", code, network))
            })
    }

    async fn quote(&self, request: &QuoteRequest) -> ProviderResult<ProviderQuote> {
        let body = Self::quote_body(request);
        let price: Price = self
            .policy
            .run("price", RetryOn::Transient, || self.call("price", &body))
            .await?;

        if let Some(limit) = price.errors.iter().find(|e| e.starts_with("LIMIT_")) {
            return Err(ProviderError::OutOfLimits(limit.clone()));
        }

        Ok(ProviderQuote {
            amount_in: price.from.amount,
            amount_out: price.to.amount,
            network_fee: price.to.network_fee,
            min: price.from.min,
            max: price.from.max,
        })
    }

    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<ProviderOrder> {
        let mut body = json!({
            "type": request.rate_type.as_str(),
            "fromCcy": request.from_code,
            "toCcy": request.to_code,
            "direction": request.direction.as_str(),
            "amount": request.amount,
            "toAddress": request.to_address,
        });
        if let Some(tag) = &request.to_tag {
            body["tag"] = json!(tag);
        }
        if let Some(refund) = &request.refund_address {
            body["refundAddress"] = json!(refund);
        }
        if let Some(tag) = &request.refund_tag {
            body["refundTag"] = json!(tag);
        }
        let body = body.to_string();

        let order: Order = self
            .policy
            .run("create", RetryOn::RateLimit, || self.call("create", &body))
            .await?;
        debug!(order_id = %order.id, "FixedFloat order created");
        Ok(order.into())
    }

    async fn order_status(&self, order: &OrderRef) -> ProviderResult<ProviderOrder> {
        let body = json!({ "id": order.id, "token": order.token }).to_string();
        let order: Order = self
            .policy
            .run("order", RetryOn::Transient, || self.call("order", &body))
            .await?;
        Ok(order.into())
    }

    async fn order_statuses(&self, orders: &[OrderRef]) -> ProviderResult<Vec<ProviderOrder>> {
        lookup_each(self, orders).await
    }

    async fn emergency(&self, request: &EmergencyRequest) -> ProviderResult<()> {
        let choice = match request.choice {
            EmergencyChoice::Exchange => "EXCHANGE",
            EmergencyChoice::Refund => "REFUND",
            EmergencyChoice::None => {
                return Err(ProviderError::Unsupported(
                    "emergency action without a choice".to_string(),
                ))
            }
        };

        let mut body = json!({
            "id": request.order.id,
            "token": request.order.token,
            "choice": choice,
        });
        if let Some(address) = &request.address {
            body["address"] = json!(address);
        }
        if let Some(tag) = &request.tag {
            body["tag"] = json!(tag);
        }
        let body = body.to_string();

        let _: Value = self
            .policy
            .run("emergency", RetryOn::RateLimit, || self.call("emergency", &body))
            .await?;
        Ok(())
    }
}
