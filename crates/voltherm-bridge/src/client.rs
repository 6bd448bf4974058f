// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Voltherm.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use crate::errors::{BridgeError, BridgeResult};
use crate::response::ResponseMap;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// REST client of the inverter bridge service.
///
/// The bridge owns the serial link to the inverter and exposes every
/// protocol query as `GET /api/query/{code}`.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    base_url: String,
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> BridgeResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client,
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run one protocol query and return the response map
    pub async fn query(&self, code: &str) -> BridgeResult<ResponseMap> {
        debug!("🔍 [BRIDGE QUERY] {}", code);
        self.request(code, self.max_retries).await
    }

    /// Send a setting command such as `PCP03` exactly once. A request that
    /// timed out may still have reached the inverter, so transport failures
    /// are not retried.
    pub async fn command(&self, code: &str) -> BridgeResult<ResponseMap> {
        debug!("📤 [BRIDGE COMMAND] {}", code);
        self.request(code, 1).await
    }

    async fn request(&self, code: &str, max_attempts: u32) -> BridgeResult<ResponseMap> {
        let url = format!("{}/api/query/{}", self.base_url, urlencoding::encode(code));
        let response = self
            .retry_request(max_attempts, || async { self.client.get(&url).send().await })
            .await?;

        match response.status() {
            StatusCode::OK => match response.json::<Value>().await? {
                Value::Object(map) => {
                    trace!("   Response: {:?}", map);
                    Ok(map)
                }
                other @ (Value::Null
                | Value::Bool(_)
                | Value::Number(_)
                | Value::String(_)
                | Value::Array(_)) => Err(BridgeError::InvalidResponse(format!(
                    "expected a JSON object for {code}, got {other}"
                ))),
            },
            status => {
                let error_text = response.text().await.unwrap_or_default();
                error!("❌ [BRIDGE ERROR] {} -> status {}: {}", code, status, error_text);
                Err(BridgeError::ApiError {
                    status: status.as_u16(),
                    message: error_text,
                })
            }
        }
    }

    /// Retry transport failures with exponential backoff
    async fn retry_request<F, Fut>(
        &self,
        max_attempts: u32,
        mut request_fn: F,
    ) -> BridgeResult<reqwest::Response>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempts = 0;
        let mut delay = self.retry_delay;

        loop {
            attempts += 1;
            match request_fn().await {
                Ok(response) => return Ok(response),
                Err(e) if attempts >= max_attempts => {
                    error!("Bridge request failed after {} attempts: {}", attempts, e);
                    return Err(BridgeError::HttpError(e));
                }
                Err(e) => {
                    warn!(
                        "Bridge request failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempts, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    pub fn with_retry_config(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// Local endpoint that accepts connections and drops them unanswered.
    /// Returns the base URL and the number of accepted connections.
    async fn dropping_endpoint() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(socket);
            }
        });

        (format!("http://{addr}"), accepted)
    }

    #[tokio::test]
    async fn test_query_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query/QMOD")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"device_mode": ["Battery", ""]}).to_string())
            .create_async()
            .await;

        let client = BridgeClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let response = client.query("QMOD").await.unwrap();

        assert_eq!(response["device_mode"][0], "Battery");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_server_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query/QPIGS")
            .with_status(503)
            .with_body("serial port busy")
            .create_async()
            .await;

        let client = BridgeClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let result = client.query("QPIGS").await;

        assert!(matches!(
            result,
            Err(BridgeError::ApiError { status: 503, ref message }) if message == "serial port busy"
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_rejects_non_object() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/query/QMOD")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[1, 2, 3]")
            .create_async()
            .await;

        let client = BridgeClient::new(format!("{}/", server.url()), Duration::from_secs(5)).unwrap();

        assert!(matches!(
            client.query("QMOD").await,
            Err(BridgeError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_bridge() {
        let client = BridgeClient::new("http://127.0.0.1:1", Duration::from_millis(200))
            .unwrap()
            .with_retry_config(2, Duration::from_millis(1));

        assert!(matches!(
            client.query("QMOD").await,
            Err(BridgeError::HttpError(_))
        ));
    }

    #[tokio::test]
    async fn test_queries_retry_but_commands_are_sent_once() {
        let (url, accepted) = dropping_endpoint().await;
        let client = BridgeClient::new(url, Duration::from_secs(2))
            .unwrap()
            .with_retry_config(3, Duration::from_millis(1));

        assert!(client.query("QPIGS").await.is_err());
        assert_eq!(accepted.load(Ordering::SeqCst), 3);

        accepted.store(0, Ordering::SeqCst);
        assert!(matches!(
            client.command("PCP03").await,
            Err(BridgeError::HttpError(_))
        ));
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}
