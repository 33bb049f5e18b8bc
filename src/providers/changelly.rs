//! Changelly client
//!
//! JSON-RPC 2.0 over a single endpoint. The request body is signed with the
//! partner's Ed25519 key and sent base64 encoded in `X-Api-Signature`.
//! Statuses are reconciled in batches through `getTransactions`.

use super::http::{de_flag, de_opt_count, non_empty, HttpTransport};
use super::signing::Ed25519Signer;
use super::{
    EmergencyRequest, OrderRef, OrderRequest, ProviderClient, ProviderCurrency, ProviderKind,
    ProviderOrder, ProviderQuote, QuoteRequest, Reconciliation, RetryOn, RetryPolicy,
};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::transaction::{Direction, EmergencyChoice, Leg, RateType, Received, TransactionStatus};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangellyStatus {
    New,
    Waiting,
    Confirming,
    Exchanging,
    Sending,
    Finished,
    Failed,
    Refunded,
    Hold,
    Overdue,
    Expired,
}

impl ChangellyStatus {
    #[cfg(test)]
    const ALL: [ChangellyStatus; 11] = [
        ChangellyStatus::New,
        ChangellyStatus::Waiting,
        ChangellyStatus::Confirming,
        ChangellyStatus::Exchanging,
        ChangellyStatus::Sending,
        ChangellyStatus::Finished,
        ChangellyStatus::Failed,
        ChangellyStatus::Refunded,
        ChangellyStatus::Hold,
        ChangellyStatus::Overdue,
        ChangellyStatus::Expired,
    ];

    fn parse(native: &str) -> ProviderResult<Self> {
        match native {
            "new" => Ok(ChangellyStatus::New),
            "waiting" => Ok(ChangellyStatus::Waiting),
            "confirming" => Ok(ChangellyStatus::Confirming),
            "exchanging" => Ok(ChangellyStatus::Exchanging),
            "sending" => Ok(ChangellyStatus::Sending),
            "finished" => Ok(ChangellyStatus::Finished),
            "failed" => Ok(ChangellyStatus::Failed),
            "refunded" => Ok(ChangellyStatus::Refunded),
            "hold" => Ok(ChangellyStatus::Hold),
            "overdue" => Ok(ChangellyStatus::Overdue),
            "expired" => Ok(ChangellyStatus::Expired),
            other => Err(ProviderError::UnknownProviderStatus(format!(
                "changelly: {}",
                other
            ))),
        }
    }

    #[cfg(test)]
    fn as_str(&self) -> &'static str {
        match self {
            ChangellyStatus::New => "new",
            ChangellyStatus::Waiting => "waiting",
            ChangellyStatus::Confirming => "confirming",
            ChangellyStatus::Exchanging => "exchanging",
            ChangellyStatus::Sending => "sending",
            ChangellyStatus::Finished => "finished",
            ChangellyStatus::Failed => "failed",
            ChangellyStatus::Refunded => "refunded",
            ChangellyStatus::Hold => "hold",
            ChangellyStatus::Overdue => "overdue",
            ChangellyStatus::Expired => "expired",
        }
    }

    fn canonical(self) -> TransactionStatus {
        match self {
            ChangellyStatus::New | ChangellyStatus::Waiting => TransactionStatus::Created,
            ChangellyStatus::Confirming => TransactionStatus::Pending,
            ChangellyStatus::Exchanging => TransactionStatus::Exchange,
            ChangellyStatus::Sending => TransactionStatus::Withdraw,
            ChangellyStatus::Finished | ChangellyStatus::Refunded => TransactionStatus::Done,
            ChangellyStatus::Failed => TransactionStatus::Error,
            ChangellyStatus::Overdue | ChangellyStatus::Expired => TransactionStatus::Expired,
            ChangellyStatus::Hold => TransactionStatus::Emergency,
        }
    }
}

/// Map a Changelly status through the fixed table
pub(crate) fn map_native(native: &str) -> ProviderResult<TransactionStatus> {
    ChangellyStatus::parse(native).map(ChangellyStatus::canonical)
}

/// JSON-RPC errors carry free-text messages, so the table keys on wording
/// first and falls back to the server error codes.
fn map_error(code: i64, message: &str) -> ProviderError {
    let lower = message.to_lowercase();
    if lower.contains("address") {
        ProviderError::InvalidAddress(message.to_string())
    } else if ["amount", "minimal", "maximal"]
        .iter()
        .any(|word| lower.contains(word))
    {
        ProviderError::OutOfLimits(message.to_string())
    } else if code == -32603 || code == -32000 {
        ProviderError::PartnerInternal(message.to_string())
    } else {
        ProviderError::Api {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Amounts arrive as strings and are empty until the provider knows them
fn de_opt_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Decimal>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

impl RpcResponse {
    fn into_result<T: DeserializeOwned>(self) -> ProviderResult<T> {
        if let Some(error) = self.error {
            return Err(map_error(error.code, &error.message));
        }
        Ok(serde_json::from_value(self.result)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Currency {
    ticker: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    blockchain: String,
    #[serde(default, deserialize_with = "de_flag")]
    enabled: bool,
    #[serde(default, deserialize_with = "de_flag")]
    enabled_from: bool,
    #[serde(default, deserialize_with = "de_flag")]
    enabled_to: bool,
    #[serde(default)]
    extra_id_name: Option<String>,
}

impl From<Currency> for ProviderCurrency {
    fn from(c: Currency) -> Self {
        ProviderCurrency {
            code: c.ticker,
            network: c.blockchain,
            name: c.full_name,
            tag_name: non_empty(c.extra_id_name),
            can_send: c.enabled && c.enabled_from,
            can_receive: c.enabled && c.enabled_to,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRow {
    /// Rate id, present on fixed-rate quotes
    #[serde(default)]
    id: Option<String>,
    amount_from: Decimal,
    amount_to: Decimal,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    network_fee: Option<Decimal>,
    #[serde(default, alias = "minFrom")]
    min: Decimal,
    #[serde(default, alias = "maxFrom")]
    max: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tx {
    id: String,
    #[serde(default)]
    status: Option<String>,
    currency_from: Option<String>,
    currency_to: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    amount_expected_from: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    amount_expected_to: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    amount_from: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    amount_to: Option<Decimal>,
    payin_address: Option<String>,
    payin_extra_id: Option<String>,
    payout_address: Option<String>,
    payout_extra_id: Option<String>,
    refund_address: Option<String>,
    refund_extra_id: Option<String>,
    payin_hash: Option<String>,
    payout_hash: Option<String>,
    refund_hash: Option<String>,
    #[serde(default, deserialize_with = "de_opt_count")]
    payin_confirmations: Option<i32>,
    created_at: Option<i64>,
    #[serde(default)]
    pay_till: Option<DateTime<Utc>>,
}

impl From<Tx> for ProviderOrder {
    fn from(tx: Tx) -> Self {
        let payin_hash = non_empty(tx.payin_hash);
        let payout_hash = non_empty(tx.payout_hash);

        ProviderOrder {
            token: None,
            // Creation responses omit the status until the first deposit check
            native_status: tx.status.unwrap_or_else(|| "new".to_string()),
            from: Leg {
                currency: tx.currency_from.clone(),
                network: None,
                amount: tx.amount_expected_from,
                address: non_empty(tx.payin_address),
                tag: non_empty(tx.payin_extra_id),
            },
            to: Leg {
                currency: tx.currency_to,
                network: None,
                amount: tx.amount_expected_to,
                address: non_empty(tx.payout_address),
                tag: non_empty(tx.payout_extra_id),
            },
            back: Leg {
                currency: tx.currency_from,
                address: non_empty(tx.refund_address),
                tag: non_empty(tx.refund_extra_id),
                ..Default::default()
            },
            registered_at: tx.created_at.and_then(|s| Utc.timestamp_opt(s, 0).single()),
            expires_at: tx.pay_till,
            received_from: Received {
                amount: payin_hash.as_ref().and(tx.amount_from),
                id: payin_hash,
                confirmations: tx.payin_confirmations,
            },
            received_to: Received {
                amount: payout_hash.as_ref().and(tx.amount_to),
                id: payout_hash,
                confirmations: None,
            },
            received_back: Received {
                id: non_empty(tx.refund_hash),
                ..Default::default()
            },
            id: tx.id,
        }
    }
}

pub struct ChangellyClient {
    transport: HttpTransport,
    signer: Ed25519Signer,
    api_key: String,
    policy: RetryPolicy,
}

impl ChangellyClient {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            transport: HttpTransport::new(
                ProviderKind::Changelly,
                &config.base_url,
                Duration::from_millis(config.timeout_ms),
            )?,
            signer: Ed25519Signer::from_base64_seed(&config.api_secret)?,
            api_key: config.api_key.clone(),
            policy: RetryPolicy::from_config(config),
        })
    }

    fn request_body(method: &str, params: &Value) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        })
        .to_string()
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: &Value) -> ProviderResult<T> {
        let body = Self::request_body(method, params);
        let signature = self.signer.sign_base64(body.as_bytes());

        let request = self
            .transport
            .request(Method::POST, "")
            .header(CONTENT_TYPE, "application/json")
            .header("X-Api-Key", &self.api_key)
            .header("X-Api-Signature", signature)
            .body(body);

        let response: RpcResponse = self.transport.send(request).await?.json()?;
        response.into_result()
    }

    /// `getFixRateForAmount` or `getExchangeAmount` depending on rate type
    async fn quote_row(&self, request: &QuoteRequest) -> ProviderResult<QuoteRow> {
        let amount_key = match request.direction {
            Direction::From => "amountFrom",
            Direction::To => "amountTo",
        };
        let method = match (request.rate_type, request.direction) {
            (RateType::Fixed, _) => "getFixRateForAmount",
            (RateType::Float, Direction::From) => "getExchangeAmount",
            (RateType::Float, Direction::To) => {
                return Err(ProviderError::Unsupported(
                    "changelly floating quotes are send-side only".to_string(),
                ))
            }
        };
        let params = json!([{
            "from": request.from_code,
            "to": request.to_code,
            amount_key: request.amount,
        }]);

        let mut rows: Vec<QuoteRow> = self
            .policy
            .run(method, RetryOn::Transient, || self.call(method, &params))
            .await?;
        if rows.is_empty() {
            return Err(ProviderError::DataDecode(format!("{} returned no rows", method)));
        }
        Ok(rows.swap_remove(0))
    }

    async fn transactions(&self, ids: &[&str]) -> ProviderResult<Vec<Tx>> {
        let params = json!({ "id": ids, "limit": ids.len() });
        self.policy
            .run("getTransactions", RetryOn::Transient, || {
                self.call("getTransactions", &params)
            })
            .await
    }
}

#[async_trait]
impl ProviderClient for ChangellyClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Changelly
    }

    fn reconciliation(&self) -> Reconciliation {
        Reconciliation::Batch
    }

    fn map_status(&self, native: &str) -> ProviderResult<TransactionStatus> {
        map_native(native)
    }

    async fn currencies(&self) -> ProviderResult<Vec<ProviderCurrency>> {
        let params = json!({});
        let currencies: Vec<Currency> = self
            .policy
            .run("getCurrenciesFull", RetryOn::Transient, || {
                self.call("getCurrenciesFull", &params)
            })
            .await?;
        Ok(currencies.into_iter().map(ProviderCurrency::from).collect())
    }

    async fn currency(&self, code: &str, network: &str) -> ProviderResult<ProviderCurrency> {
        self.currencies()
            .await?
            .into_iter()
            .find(|c| c.code.eq_ignore_ascii_case(code) && c.network.eq_ignore_ascii_case(network))
            .ok_or_else(|| {
                ProviderError::Unsupported(format!("changelly does not list {} on {}", code, network))
            })
    }

    async fn quote(&self, request: &QuoteRequest) -> ProviderResult<ProviderQuote> {
        let row = self.quote_row(request).await?;
        Ok(ProviderQuote {
            amount_in: row.amount_from,
            amount_out: row.amount_to,
            network_fee: row.network_fee,
            min: row.min,
            max: row.max,
        })
    }

    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<ProviderOrder> {
        let amount_key = match request.direction {
            Direction::From => "amountFrom",
            Direction::To => "amountTo",
        };
        let mut params = json!({
            "from": request.from_code,
            "to": request.to_code,
            "address": request.to_address,
            amount_key: request.amount,
        });
        if let Some(tag) = &request.to_tag {
            params["extraId"] = json!(tag);
        }
        if let Some(refund) = &request.refund_address {
            params["refundAddress"] = json!(refund);
        }
        if let Some(tag) = &request.refund_tag {
            params["refundExtraId"] = json!(tag);
        }

        let method = match request.rate_type {
            RateType::Float => "createTransaction",
            RateType::Fixed => {
                // Fixed orders are bound to a fresh rate id
                let quote = QuoteRequest {
                    rate_type: request.rate_type,
                    direction: request.direction,
                    from_code: request.from_code.clone(),
                    from_network: request.from_network.clone(),
                    to_code: request.to_code.clone(),
                    to_network: request.to_network.clone(),
                    amount: request.amount,
                };
                let rate_id = self.quote_row(&quote).await?.id.ok_or_else(|| {
                    ProviderError::DataDecode("fixed quote without rate id".to_string())
                })?;
                params["rateId"] = json!(rate_id);
                "createFixTransaction"
            }
        };

        let tx: Tx = self
            .policy
            .run(method, RetryOn::RateLimit, || self.call(method, &params))
            .await?;
        debug!(order_id = %tx.id, method, "Changelly order created");
        Ok(tx.into())
    }

    async fn order_status(&self, order: &OrderRef) -> ProviderResult<ProviderOrder> {
        self.transactions(&[order.id.as_str()])
            .await?
            .into_iter()
            .find(|tx| tx.id == order.id)
            .map(ProviderOrder::from)
            .ok_or_else(|| {
                ProviderError::DataDecode(format!("order {} missing from response", order.id))
            })
    }

    async fn order_statuses(&self, orders: &[OrderRef]) -> ProviderResult<Vec<ProviderOrder>> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = orders.iter().map(|o| o.id.as_str()).collect();
        Ok(self
            .transactions(&ids)
            .await?
            .into_iter()
            .map(ProviderOrder::from)
            .collect())
    }

    async fn emergency(&self, request: &EmergencyRequest) -> ProviderResult<()> {
        let action = match request.choice {
            EmergencyChoice::Exchange => "exchange",
            EmergencyChoice::Refund => "refund",
            EmergencyChoice::None => {
                return Err(ProviderError::Unsupported(
                    "emergency action without a choice".to_string(),
                ))
            }
        };

        let mut params = json!({ "id": request.order.id, "action": action });
        if let Some(address) = &request.address {
            params["address"] = json!(address);
        }
        if let Some(tag) = &request.tag {
            params["extraId"] = json!(tag);
        }

        let _: Value = self
            .policy
            .run("resolveHold", RetryOn::RateLimit, || {
                self.call("resolveHold", &params)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{stub_config, ProviderStub};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use rust_decimal_macros::dec;

    fn config() -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::Changelly,
            enabled: true,
            priority: 1,
            base_url: "https://api.changelly.com/v2".to_string(),
            api_key: "key".to_string(),
            api_secret: BASE64.encode([3u8; 32]),
            timeout_ms: 1_000,
            max_retries: 3,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 40,
            batch_size: 10,
            sweep_interval_secs: 30,
        }
    }

    #[test]
    fn test_status_table_is_total() {
        let client = ChangellyClient::new(&config()).unwrap();
        for status in ChangellyStatus::ALL {
            assert!(client.map_status(status.as_str()).is_ok(), "{:?}", status);
        }
        assert_eq!(client.map_status("waiting"), Ok(TransactionStatus::Created));
        assert_eq!(client.map_status("refunded"), Ok(TransactionStatus::Done));
        assert_eq!(client.map_status("hold"), Ok(TransactionStatus::Emergency));
        assert!(matches!(
            client.map_status("paused"),
            Err(ProviderError::UnknownProviderStatus(_))
        ));
        assert_eq!(client.reconciliation(), Reconciliation::Batch);
    }

    #[test]
    fn test_rejects_invalid_signing_key() {
        let mut config = config();
        config.api_secret = "short".to_string();
        assert!(ChangellyClient::new(&config).is_err());
    }

    #[test]
    fn test_error_table() {
        assert!(matches!(
            map_error(-32600, "Invalid address"),
            ProviderError::InvalidAddress(_)
        ));
        assert!(matches!(
            map_error(-32600, "Invalid amount: minimal amount is 0.005"),
            ProviderError::OutOfLimits(_)
        ));
        assert!(matches!(
            map_error(-32603, "Internal error"),
            ProviderError::PartnerInternal(_)
        ));
        assert!(matches!(
            map_error(-32601, "Method not found"),
            ProviderError::Api { .. }
        ));
    }

    #[test]
    fn test_request_body_is_jsonrpc() {
        let body = ChangellyClient::request_body("getTransactions", &json!({ "id": ["a"] }));
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "getTransactions");
        assert_eq!(value["params"]["id"][0], "a");
    }

    #[test]
    fn test_transactions_decoding() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"1","result":[
                {"id":"cx1","status":"confirming","currencyFrom":"btc","currencyTo":"eth",
                 "amountExpectedFrom":"0.01","amountExpectedTo":"0.27","amountFrom":"0.01","amountTo":"",
                 "payinAddress":"bc1qdeposit","payoutAddress":"0xabc","payinHash":"h1","payoutHash":null,
                 "payinConfirmations":"1","createdAt":1700000000,"payTill":"2023-11-14T22:43:20Z"},
                {"id":"cx2","status":"finished","amountTo":"0.5","payoutHash":"h2"}
            ]}"#,
        )
        .unwrap();
        let orders: Vec<ProviderOrder> = response
            .into_result::<Vec<Tx>>()
            .unwrap()
            .into_iter()
            .map(ProviderOrder::from)
            .collect();

        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].native_status, "confirming");
        assert_eq!(orders[0].from.amount, Some(dec!(0.01)));
        assert_eq!(orders[0].received_from.id.as_deref(), Some("h1"));
        assert_eq!(orders[0].received_from.confirmations, Some(1));
        assert!(orders[0].received_to.is_empty());
        assert_eq!(orders[0].registered_at.unwrap().timestamp(), 1_700_000_000);
        assert!(orders[0].expires_at.is_some());
        assert_eq!(orders[1].received_to.amount, Some(dec!(0.5)));
    }

    #[test]
    fn test_rpc_error_mapped() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32600,"message":"Invalid payout address"}}"#,
        )
        .unwrap();
        assert!(matches!(
            response.into_result::<Vec<Tx>>(),
            Err(ProviderError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_fixed_quote_row() {
        let row: QuoteRow = serde_json::from_str(
            r#"{"id":"rate-1","amountFrom":"0.01","amountTo":"595","networkFee":"1.2","minFrom":"0.001","maxFrom":"2"}"#,
        )
        .unwrap();
        assert_eq!(row.id.as_deref(), Some("rate-1"));
        assert_eq!(row.min, dec!(0.001));
        assert_eq!(row.max, dec!(2));
        assert_eq!(row.network_fee, Some(dec!(1.2)));
    }

    fn quote_request(rate_type: RateType, direction: Direction) -> QuoteRequest {
        QuoteRequest {
            rate_type,
            direction,
            from_code: "btc".to_string(),
            from_network: "bitcoin".to_string(),
            to_code: "usdt20".to_string(),
            to_network: "ethereum".to_string(),
            amount: dec!(0.01),
        }
    }

    #[tokio::test]
    async fn test_fixed_quote_over_rpc() {
        let seed = BASE64.encode([7u8; 32]);
        let (stub, base_url) = ProviderStub::new()
            .reply(
                "getFixRateForAmount",
                r#"{"jsonrpc":"2.0","id":"1","result":[{
                    "id":"rate-1","from":"btc","to":"usdt20",
                    "amountFrom":"0.01","amountTo":"595.1","networkFee":"1.2",
                    "min":"0.001","max":"2"
                }]}"#,
            )
            .serve()
            .await;
        let client = ChangellyClient::new(&stub_config(ProviderKind::Changelly, &base_url, &seed)).unwrap();

        let quote = client
            .quote(&quote_request(RateType::Fixed, Direction::To))
            .await
            .unwrap();

        assert_eq!(quote.amount_in, dec!(0.01));
        assert_eq!(quote.amount_out, dec!(595.1));
        assert_eq!(quote.network_fee, Some(dec!(1.2)));
        assert_eq!(quote.min, dec!(0.001));
        assert_eq!(quote.max, dec!(2));

        let requests = stub.requests();
        assert_eq!(requests.len(), 1);
        let sent = &requests[0];
        let body = sent.json();
        assert_eq!(body["method"], "getFixRateForAmount");
        assert_eq!(body["params"][0]["from"], "btc");
        assert_eq!(body["params"][0]["to"], "usdt20");
        assert!(body["params"][0].get("amountTo").is_some());
        assert!(body["params"][0].get("amountFrom").is_none());

        assert_eq!(sent.header("X-Api-Key"), Some("test-key"));
        let signature = BASE64.decode(sent.header("X-Api-Signature").unwrap()).unwrap();
        let signature = ed25519_dalek::Signature::from_slice(&signature).unwrap();
        let verifying_key = Ed25519Signer::from_base64_seed(&seed).unwrap().verifying_key();
        assert!(ed25519_dalek::Verifier::verify(&verifying_key, sent.body.as_bytes(), &signature).is_ok());
    }

    #[tokio::test]
    async fn test_float_quote_send_side_only() {
        let (stub, base_url) = ProviderStub::new()
            .reply(
                "getExchangeAmount",
                r#"{"jsonrpc":"2.0","id":"1","result":[{
                    "from":"btc","to":"usdt20","amountFrom":"0.01","amountTo":"596.4",
                    "networkFee":"","min":"0.002","max":"5"
                }]}"#,
            )
            .serve()
            .await;
        let client = ChangellyClient::new(&stub_config(
            ProviderKind::Changelly,
            &base_url,
            &BASE64.encode([7u8; 32]),
        ))
        .unwrap();

        let quote = client
            .quote(&quote_request(RateType::Float, Direction::From))
            .await
            .unwrap();
        assert_eq!(quote.amount_out, dec!(596.4));
        assert_eq!(quote.network_fee, None);

        let result = client
            .quote(&quote_request(RateType::Float, Direction::To))
            .await;
        assert!(matches!(result, Err(ProviderError::Unsupported(_))));
        assert_eq!(stub.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_currency_lookup_over_rpc() {
        let (stub, base_url) = ProviderStub::new()
            .reply(
                "getCurrenciesFull",
                r#"{"jsonrpc":"2.0","id":"1","result":[
                    {"ticker":"btc","fullName":"Bitcoin","blockchain":"bitcoin",
                     "enabled":true,"enabledFrom":true,"enabledTo":true},
                    {"ticker":"xrp","fullName":"Ripple","blockchain":"ripple",
                     "enabled":true,"enabledFrom":true,"enabledTo":false,"extraIdName":"Destination tag"}
                ]}"#,
            )
            .serve()
            .await;
        let client = ChangellyClient::new(&stub_config(
            ProviderKind::Changelly,
            &base_url,
            &BASE64.encode([7u8; 32]),
        ))
        .unwrap();

        let xrp = client.currency("XRP", "Ripple").await.unwrap();
        assert_eq!(xrp.name, "Ripple");
        assert!(xrp.can_send);
        assert!(!xrp.can_receive);
        assert_eq!(xrp.tag_name.as_deref(), Some("Destination tag"));

        assert!(matches!(
            client.currency("eth", "ethereum").await,
            Err(ProviderError::Unsupported(_))
        ));
        assert_eq!(stub.requests()[0].json()["method"], "getCurrenciesFull");
    }
}
