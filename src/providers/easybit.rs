//! Easybit client
//!
//! REST with GET lookups and POST actions. Requests carry `API-KEY`,
//! `API-TIMESTAMP` and `API-SIGN`, the latter a base64 HMAC-SHA256 over
//! timestamp, method, path (with query) and body. Easybit only quotes
//! floating rates.

use super::http::{de_flag, de_opt_count, non_empty, HttpTransport};
use super::signing::HmacSigner;
use super::{
    lookup_each, EmergencyRequest, OrderRef, OrderRequest, ProviderClient, ProviderCurrency,
    ProviderKind, ProviderOrder, ProviderQuote, QuoteRequest, Reconciliation, RetryOn, RetryPolicy,
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
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EasybitStatus {
    AwaitingDeposit,
    ConfirmingDeposit,
    Exchanging,
    Sending,
    Complete,
    Refund,
    Failed,
    RequestOverdue,
    VolatilityProtection,
    ActionRequest,
}

impl EasybitStatus {
    #[cfg(test)]
    const ALL: [EasybitStatus; 10] = [
        EasybitStatus::AwaitingDeposit,
        EasybitStatus::ConfirmingDeposit,
        EasybitStatus::Exchanging,
        EasybitStatus::Sending,
        EasybitStatus::Complete,
        EasybitStatus::Refund,
        EasybitStatus::Failed,
        EasybitStatus::RequestOverdue,
        EasybitStatus::VolatilityProtection,
        EasybitStatus::ActionRequest,
    ];

    fn parse(native: &str) -> ProviderResult<Self> {
        match native {
            "Awaiting Deposit" => Ok(EasybitStatus::AwaitingDeposit),
            "Confirming Deposit" => Ok(EasybitStatus::ConfirmingDeposit),
            "Exchanging" => Ok(EasybitStatus::Exchanging),
            "Sending" => Ok(EasybitStatus::Sending),
            "Complete" => Ok(EasybitStatus::Complete),
            "Refund" => Ok(EasybitStatus::Refund),
            "Failed" => Ok(EasybitStatus::Failed),
            "Request Overdue" => Ok(EasybitStatus::RequestOverdue),
            "Volatility Protection" => Ok(EasybitStatus::VolatilityProtection),
            "Action Request" => Ok(EasybitStatus::ActionRequest),
            other => Err(ProviderError::UnknownProviderStatus(format!("easybit: {}", other))),
        }
    }

    #[cfg(test)]
    fn as_str(&self) -> &'static str {
        match self {
            EasybitStatus::AwaitingDeposit => "Awaiting Deposit",
            EasybitStatus::ConfirmingDeposit => "Confirming Deposit",
            EasybitStatus::Exchanging => "Exchanging",
            EasybitStatus::Sending => "Sending",
            EasybitStatus::Complete => "Complete",
            EasybitStatus::Refund => "Refund",
            EasybitStatus::Failed => "Failed",
            EasybitStatus::RequestOverdue => "Request Overdue",
            EasybitStatus::VolatilityProtection => "Volatility Protection",
            EasybitStatus::ActionRequest => "Action Request",
        }
    }

    fn canonical(self) -> TransactionStatus {
        match self {
            EasybitStatus::AwaitingDeposit | EasybitStatus::ConfirmingDeposit => {
                TransactionStatus::Pending
            }
            EasybitStatus::Exchanging => TransactionStatus::Exchange,
            EasybitStatus::Sending => TransactionStatus::Withdraw,
            EasybitStatus::Complete | EasybitStatus::Refund => TransactionStatus::Done,
            EasybitStatus::Failed => TransactionStatus::Error,
            EasybitStatus::RequestOverdue => TransactionStatus::Expired,
            EasybitStatus::VolatilityProtection | EasybitStatus::ActionRequest => {
                TransactionStatus::Emergency
            }
        }
    }
}

/// Map an Easybit status through the fixed table
pub(crate) fn map_native(native: &str) -> ProviderResult<TransactionStatus> {
    EasybitStatus::parse(native).map(EasybitStatus::canonical)
}

fn map_error(code: i64, message: &str) -> ProviderError {
    match code {
        1005 | 1006 => ProviderError::InvalidAddress(message.to_string()),
        1007 | 1008 => ProviderError::OutOfLimits(message.to_string()),
        500 | 1000 => ProviderError::PartnerInternal(message.to_string()),
        _ => ProviderError::Api {
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(deserialize_with = "de_flag")]
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

impl Envelope {
    fn into_data<T: DeserializeOwned>(self) -> ProviderResult<T> {
        if !self.success {
            return Err(map_error(
                self.error_code.unwrap_or_default(),
                self.error_message.as_deref().unwrap_or("unspecified error"),
            ));
        }
        Ok(serde_json::from_value(self.data)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Network {
    network: String,
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    receive_status: bool,
    #[serde(default, deserialize_with = "de_flag")]
    send_status: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Currency {
    currency: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    network_list: Vec<Network>,
}

impl Currency {
    fn flatten(self) -> impl Iterator<Item = ProviderCurrency> {
        let Currency {
            currency,
            name,
            network_list,
        } = self;
        network_list.into_iter().map(move |n| ProviderCurrency {
            code: currency.clone(),
            network: n.network,
            name: name.clone(),
            tag_name: non_empty(n.tag_name),
            can_send: n.send_status,
            can_receive: n.receive_status,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairInfo {
    minimum_amount: Decimal,
    maximum_amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Rate {
    send_amount: Decimal,
    receive_amount: Decimal,
    #[serde(default)]
    network_fee: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Order {
    id: String,
    #[serde(default)]
    status: Option<String>,
    send: Option<String>,
    receive: Option<String>,
    send_network: Option<String>,
    receive_network: Option<String>,
    send_amount: Option<Decimal>,
    receive_amount: Option<Decimal>,
    send_address: Option<String>,
    send_tag: Option<String>,
    receive_address: Option<String>,
    receive_tag: Option<String>,
    refund_address: Option<String>,
    refund_tag: Option<String>,
    hash_in: Option<String>,
    hash_out: Option<String>,
    #[serde(default, deserialize_with = "de_opt_count")]
    confirmations: Option<i32>,
    created_at: Option<i64>,
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

impl From<Order> for ProviderOrder {
    fn from(order: Order) -> Self {
        let received_from = Received {
            id: non_empty(order.hash_in),
            amount: None,
            confirmations: order.confirmations,
        };
        let hash_out = non_empty(order.hash_out);
        let received_to = Received {
            amount: hash_out.as_ref().and(order.receive_amount),
            id: hash_out,
            confirmations: None,
        };

        ProviderOrder {
            id: order.id,
            token: None,
            // A freshly created order carries no status field yet
            native_status: order.status.unwrap_or_else(|| "Awaiting Deposit".to_string()),
            from: Leg {
                currency: order.send,
                network: order.send_network.clone(),
                amount: order.send_amount,
                address: non_empty(order.send_address),
                tag: non_empty(order.send_tag),
            },
            to: Leg {
                currency: order.receive,
                network: order.receive_network,
                amount: order.receive_amount,
                address: non_empty(order.receive_address),
                tag: non_empty(order.receive_tag),
            },
            back: Leg {
                network: order.send_network,
                address: non_empty(order.refund_address),
                tag: non_empty(order.refund_tag),
                ..Default::default()
            },
            registered_at: from_millis(order.created_at),
            expires_at: None,
            received_from,
            received_to,
            received_back: Received::default(),
        }
    }
}

pub struct EasybitClient {
    transport: HttpTransport,
    signer: HmacSigner,
    api_key: String,
    policy: RetryPolicy,
}

impl EasybitClient {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            transport: HttpTransport::new(
                ProviderKind::Easybit,
                &config.base_url,
                Duration::from_millis(config.timeout_ms),
            )?,
            signer: HmacSigner::new(&config.api_secret),
            api_key: config.api_key.clone(),
            policy: RetryPolicy::from_config(config),
        })
    }

    /// Signed request; `path` includes the query string
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> ProviderResult<T> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let payload = format!(
            "{}{}{}{}",
            timestamp,
            method.as_str(),
            path,
            body.unwrap_or_default()
        );
        let signature = self.signer.sign_base64(payload.as_bytes())?;

        let mut request = self
            .transport
            .request(method, path)
            .header("API-KEY", &self.api_key)
            .header("API-TIMESTAMP", timestamp)
            .header("API-SIGN", signature);
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let envelope: Envelope = self.transport.send(request).await?.json()?;
        envelope.into_data()
    }

    fn pair_query(request: &QuoteRequest) -> String {
        format!(
            "send={}&receive={}&sendNetwork={}&receiveNetwork={}",
            request.from_code, request.to_code, request.from_network, request.to_network
        )
    }

    fn amount_type(direction: Direction) -> &'static str {
        match direction {
            Direction::From => "send",
            Direction::To => "receive",
        }
    }
}

#[async_trait]
impl ProviderClient for EasybitClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Easybit
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
            .run("currencyList", RetryOn::Transient, || {
                self.call(Method::GET, "/currencyList", None)
            })
            .await?;
        Ok(currencies.into_iter().flat_map(Currency::flatten).collect())
    }

    async fn currency(&self, code: &str, network: &str) -> ProviderResult<ProviderCurrency> {
        self.currencies()
            .await?
            .into_iter()
            .find(|c| c.code.eq_ignore_ascii_case(code) && c.network.eq_ignore_ascii_case(network))
            .ok_or_else(|| {
                ProviderError::Unsupported(format!("easybit does not list {} on {}", code, network))
            })
    }

    async fn quote(&self, request: &QuoteRequest) -> ProviderResult<ProviderQuote> {
        if request.rate_type == RateType::Fixed {
            return Err(ProviderError::Unsupported("easybit quotes floating rates only".to_string()));
        }

        let pair_path = format!("/pairInfo?{}", Self::pair_query(request));
        let pair: PairInfo = self
            .policy
            .run("pairInfo", RetryOn::Transient, || {
                self.call(Method::GET, &pair_path, None)
            })
            .await?;

        let rate_path = format!(
            "/rate?{}&amount={}&amountType={}",
            Self::pair_query(request),
            request.amount,
            Self::amount_type(request.direction)
        );
        let rate: Rate = self
            .policy
            .run("rate", RetryOn::Transient, || {
                self.call(Method::GET, &rate_path, None)
            })
            .await?;

        Ok(ProviderQuote {
            amount_in: rate.send_amount,
            amount_out: rate.receive_amount,
            network_fee: rate.network_fee,
            min: pair.minimum_amount,
            max: pair.maximum_amount,
        })
    }

    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<ProviderOrder> {
        if request.rate_type == RateType::Fixed {
            return Err(ProviderError::Unsupported("easybit quotes floating rates only".to_string()));
        }

        let mut body = json!({
            "send": request.from_code,
            "receive": request.to_code,
            "sendNetwork": request.from_network,
            "receiveNetwork": request.to_network,
            "amount": request.amount,
            "amountType": Self::amount_type(request.direction),
            "receiveAddress": request.to_address,
        });
        if let Some(tag) = &request.to_tag {
            body["receiveTag"] = json!(tag);
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
            .run("order", RetryOn::RateLimit, || {
                self.call(Method::POST, "/order", Some(body.as_str()))
            })
            .await?;
        debug!(order_id = %order.id, "Easybit order created");
        Ok(order.into())
    }

    async fn order_status(&self, order: &OrderRef) -> ProviderResult<ProviderOrder> {
        let path = format!("/orderStatus?id={}", order.id);
        let order: Order = self
            .policy
            .run("orderStatus", RetryOn::Transient, || {
                self.call(Method::GET, &path, None)
            })
            .await?;
        Ok(order.into())
    }

    async fn order_statuses(&self, orders: &[OrderRef]) -> ProviderResult<Vec<ProviderOrder>> {
        lookup_each(self, orders).await
    }

    async fn emergency(&self, request: &EmergencyRequest) -> ProviderResult<()> {
        let action = match request.choice {
            EmergencyChoice::Exchange => "continue",
            EmergencyChoice::Refund => "refund",
            EmergencyChoice::None => {
                return Err(ProviderError::Unsupported(
                    "emergency action without a choice".to_string(),
                ))
            }
        };

        let mut body = json!({ "id": request.order.id, "action": action });
        if let Some(address) = &request.address {
            body["refundAddress"] = json!(address);
        }
        if let Some(tag) = &request.tag {
            body["refundTag"] = json!(tag);
        }
        let body = body.to_string();

        let _: Value = self
            .policy
            .run("orderAction", RetryOn::RateLimit, || {
                self.call(Method::POST, "/orderAction", Some(body.as_str()))
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{stub_config, ProviderStub};
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_table_is_total() {
        for status in EasybitStatus::ALL {
            assert_eq!(EasybitStatus::parse(status.as_str()), Ok(status));
        }
        assert_eq!(map_native("Awaiting Deposit"), Ok(TransactionStatus::Pending));
        assert_eq!(map_native("Complete"), Ok(TransactionStatus::Done));
        assert_eq!(map_native("Refund"), Ok(TransactionStatus::Done));
        assert_eq!(map_native("Failed"), Ok(TransactionStatus::Error));
        assert_eq!(map_native("Request Overdue"), Ok(TransactionStatus::Expired));
        assert_eq!(map_native("Action Request"), Ok(TransactionStatus::Emergency));
        assert!(matches!(
            map_native("awaiting deposit"),
            Err(ProviderError::UnknownProviderStatus(_))
        ));
    }

    #[test]
    fn test_error_envelope() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"success":0,"errorCode":1006,"errorMessage":"Invalid receive address"}"#,
        )
        .unwrap();
        assert!(matches!(
            envelope.into_data::<Order>(),
            Err(ProviderError::InvalidAddress(_))
        ));

        assert!(matches!(map_error(1008, "too big"), ProviderError::OutOfLimits(_)));
        assert!(matches!(map_error(1000, "busy"), ProviderError::PartnerInternal(_)));
        assert!(matches!(map_error(1012, "?"), ProviderError::Api { .. }));
    }

    #[test]
    fn test_created_order_decoding() {
        let envelope: Envelope = serde_json::from_str(
            r#"{
                "success": 1,
                "data": {
                    "id": "EB-1",
                    "send": "BTC", "receive": "ETH",
                    "sendNetwork": "BTC", "receiveNetwork": "ETH",
                    "sendAmount": "0.01", "receiveAmount": "0.27",
                    "sendAddress": "bc1qdeposit", "sendTag": null,
                    "receiveAddress": "0xabc", "receiveTag": "",
                    "refundAddress": "bc1qrefund",
                    "createdAt": 1700000000000
                }
            }"#,
        )
        .unwrap();
        let order: ProviderOrder = envelope.into_data::<Order>().unwrap().into();

        assert_eq!(order.native_status, "Awaiting Deposit");
        assert_eq!(order.from.amount, Some(dec!(0.01)));
        assert_eq!(order.to.address.as_deref(), Some("0xabc"));
        assert_eq!(order.to.tag, None);
        assert_eq!(order.back.address.as_deref(), Some("bc1qrefund"));
        assert_eq!(order.registered_at.unwrap().timestamp(), 1_700_000_000);
        assert!(order.received_from.is_empty());
        assert!(order.received_to.is_empty());
    }

    #[test]
    fn test_payout_recorded_only_with_hash() {
        let order: Order = serde_json::from_str(
            r#"{"id":"EB-1","status":"Complete","receiveAmount":"0.27","hashIn":"in1","hashOut":"out1","confirmations":"2"}"#,
        )
        .unwrap();
        let order = ProviderOrder::from(order);
        assert_eq!(order.received_from.id.as_deref(), Some("in1"));
        assert_eq!(order.received_from.confirmations, Some(2));
        assert_eq!(order.received_to.amount, Some(dec!(0.27)));
    }

    #[test]
    fn test_networks_flattened() {
        let currency: Currency = serde_json::from_str(
            r#"{"currency":"USDT","name":"Tether","networkList":[
                {"network":"ETH","receiveStatus":true,"sendStatus":true},
                {"network":"TRX","receiveStatus":false,"sendStatus":true,"tagName":""}
            ]}"#,
        )
        .unwrap();
        let flattened: Vec<_> = currency.flatten().collect();
        assert_eq!(flattened.len(), 2);
        assert_eq!(flattened[1].network, "TRX");
        assert!(!flattened[1].can_receive);
        assert_eq!(flattened[1].tag_name, None);
    }

    fn quote_request(rate_type: RateType, direction: Direction) -> QuoteRequest {
        QuoteRequest {
            rate_type,
            direction,
            from_code: "BTC".to_string(),
            from_network: "BTC".to_string(),
            to_code: "USDT".to_string(),
            to_network: "ETH".to_string(),
            amount: dec!(0.01),
        }
    }

    #[tokio::test]
    async fn test_float_quote_from_pair_and_rate() {
        let (stub, base_url) = ProviderStub::new()
            .reply(
                "/pairInfo",
                r#"{"success":1,"data":{"minimumAmount":"0.0004","maximumAmount":"2.5"}}"#,
            )
            .reply(
                "/rate",
                r#"{"success":1,"data":{"sendAmount":"0.01","receiveAmount":"594.3","networkFee":"1.5"}}"#,
            )
            .serve()
            .await;
        let client =
            EasybitClient::new(&stub_config(ProviderKind::Easybit, &base_url, "secret")).unwrap();

        let quote = client
            .quote(&quote_request(RateType::Float, Direction::To))
            .await
            .unwrap();

        assert_eq!(quote.amount_in, dec!(0.01));
        assert_eq!(quote.amount_out, dec!(594.3));
        assert_eq!(quote.network_fee, Some(dec!(1.5)));
        assert_eq!(quote.min, dec!(0.0004));
        assert_eq!(quote.max, dec!(2.5));

        let requests = stub.requests();
        assert_eq!(requests.len(), 2);
        let pair = "send=BTC&receive=USDT&sendNetwork=BTC&receiveNetwork=ETH";
        assert_eq!(requests[0].uri, format!("/pairInfo?{}", pair));
        assert_eq!(
            requests[1].uri,
            format!("/rate?{}&amount=0.01&amountType=receive", pair)
        );

        let sent = &requests[1];
        assert_eq!(sent.header("API-KEY"), Some("test-key"));
        let payload = format!("{}GET{}", sent.header("API-TIMESTAMP").unwrap(), sent.uri);
        let expected = HmacSigner::new("secret").sign_base64(payload.as_bytes()).unwrap();
        assert_eq!(sent.header("API-SIGN"), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_fixed_quote_unsupported() {
        let (stub, base_url) = ProviderStub::new().serve().await;
        let client =
            EasybitClient::new(&stub_config(ProviderKind::Easybit, &base_url, "secret")).unwrap();

        let result = client
            .quote(&quote_request(RateType::Fixed, Direction::From))
            .await;
        assert!(matches!(result, Err(ProviderError::Unsupported(_))));
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn test_currency_lookup_per_network() {
        let list = r#"{"success":1,"data":[
            {"currency":"USDT","name":"Tether","networkList":[
                {"network":"ETH","receiveStatus":1,"sendStatus":1},
                {"network":"TRX","receiveStatus":0,"sendStatus":1}
            ]},
            {"currency":"XRP","name":"Ripple","networkList":[
                {"network":"XRP","receiveStatus":1,"sendStatus":1,"tagName":"Destination tag"}
            ]}
        ]}"#;
        let (stub, base_url) = ProviderStub::new().reply("/currencyList", list).serve().await;
        let client =
            EasybitClient::new(&stub_config(ProviderKind::Easybit, &base_url, "secret")).unwrap();

        assert_eq!(client.currencies().await.unwrap().len(), 3);

        let trx = client.currency("USDT", "TRX").await.unwrap();
        assert!(trx.can_send);
        assert!(!trx.can_receive);
        let xrp = client.currency("xrp", "xrp").await.unwrap();
        assert_eq!(xrp.tag_name.as_deref(), Some("Destination tag"));

        assert!(matches!(
            client.currency("USDT", "SOL").await,
            Err(ProviderError::Unsupported(_))
        ));
        assert_eq!(stub.requests()[0].uri, "/currencyList");
    }

    #[tokio::test]
    async fn test_error_reply_maps_code() {
        let (_stub, base_url) = ProviderStub::new()
            .reply(
                "/pairInfo",
                r#"{"success":0,"errorCode":1007,"errorMessage":"Amount too low"}"#,
            )
            .serve()
            .await;
        let client =
            EasybitClient::new(&stub_config(ProviderKind::Easybit, &base_url, "secret")).unwrap();

        let result = client
            .quote(&quote_request(RateType::Float, Direction::From))
            .await;
        assert!(matches!(result, Err(ProviderError::OutOfLimits(_))));
    }
}
