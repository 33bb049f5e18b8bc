//! HTTP plumbing shared by the REST and JSON-RPC provider clients

use super::ProviderKind;
use crate::error::{ProviderError, ProviderResult};

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Raw provider response; error payloads are decoded by each client
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> ProviderResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            ProviderError::DataDecode(format!("{} (http status {})", e, self.status))
        })
    }
}

pub struct HttpTransport {
    client: Client,
    base_url: String,
    provider: ProviderKind,
}

impl HttpTransport {
    pub fn new(provider: ProviderKind, base_url: &str, timeout: Duration) -> ProviderResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("swap-broker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ProviderError::Network(format!("failed to build {} HTTP client: {}", provider, e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            provider,
        })
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
    }

    /// Send a request. HTTP 429 is the rate-limit signal for every provider.
    pub async fn send(&self, request: RequestBuilder) -> ProviderResult<HttpResponse> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        debug!(
            provider = %self.provider,
            status = status.as_u16(),
            bytes = body.len(),
            "Provider response"
        );

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        Ok(HttpResponse { status, body })
    }
}

/// Providers encode booleans as `true`, `1` or `"1"` depending on the endpoint
pub fn de_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.as_str(), "1" | "true" | "TRUE"),
        _ => false,
    })
}

/// Optional counter that may arrive as a number or a numeric string
pub fn de_opt_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Treat empty strings as absent
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Payload {
        code: i64,
    }

    #[test]
    fn test_decode_failure_is_data_decode() {
        let response = HttpResponse {
            status: StatusCode::BAD_GATEWAY,
            body: "<html>bad gateway</html>".to_string(),
        };
        let result: ProviderResult<Payload> = response.json();
        assert!(matches!(result, Err(ProviderError::DataDecode(_))));

        let response = HttpResponse {
            status: StatusCode::OK,
            body: r#"{"code":0}"#.to_string(),
        };
        assert_eq!(response.json::<Payload>().unwrap().code, 0);
    }

    #[derive(Debug, Deserialize)]
    struct Flags {
        #[serde(deserialize_with = "de_flag")]
        a: bool,
        #[serde(deserialize_with = "de_flag")]
        b: bool,
        #[serde(deserialize_with = "de_flag")]
        c: bool,
        #[serde(default, deserialize_with = "de_opt_count")]
        confirmations: Option<i32>,
    }

    #[test]
    fn test_lenient_wire_values() {
        let flags: Flags =
            serde_json::from_str(r#"{"a":1,"b":"true","c":false,"confirmations":"3"}"#).unwrap();
        assert!(flags.a && flags.b && !flags.c);
        assert_eq!(flags.confirmations, Some(3));

        let flags: Flags = serde_json::from_str(r#"{"a":0,"b":true,"c":"0"}"#).unwrap();
        assert!(!flags.a && flags.b && !flags.c);
        assert_eq!(flags.confirmations, None);

        assert_eq!(non_empty(Some(" ".to_string())), None);
        assert_eq!(non_empty(Some("memo".to_string())), Some("memo".to_string()));
    }

    #[test]
    fn test_base_url_normalized() {
        let transport =
            HttpTransport::new(ProviderKind::Easybit, "https://api.example.com/", Duration::from_secs(1))
                .unwrap();
        let request = transport.request(Method::GET, "/rate").build().unwrap();
        assert_eq!(request.url().as_str(), "https://api.example.com/rate");
    }
}
