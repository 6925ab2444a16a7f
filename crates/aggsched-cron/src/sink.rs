//! Downstream result collector.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::debug;

use aggsched_config::{ConfigError, PostMethod, PostResultConfig};
use aggsched_storage::Row;

use crate::error::{Result, SchedulerError};

/// Receives the rows produced by a firing.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn post_result(&self, rows: &[Row]) -> Result<()>;
}

/// Posts `{"result": rows}` as JSON to a fixed endpoint.
pub struct HttpResultSink {
    client: Client,
    endpoint: String,
    method: Method,
    request_timeout: Duration,
}

impl HttpResultSink {
    pub fn new(
        endpoint: impl Into<String>,
        method: PostMethod,
        request_timeout: Duration,
        client_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(client_timeout)
            .build()
            .map_err(|e| SchedulerError::ForwardingFailure(format!("client setup: {e}")))?;
        let method = match method {
            PostMethod::Post => Method::POST,
            PostMethod::Put => Method::PUT,
            PostMethod::Patch => Method::PATCH,
        };
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            method,
            request_timeout,
        })
    }

    pub fn from_config(config: &PostResultConfig) -> Result<Self> {
        let method = config
            .method
            .parse::<PostMethod>()
            .map_err(|_| ConfigError::Invalid {
                key: "post_result.method",
                message: format!("unsupported method {}", config.method),
            })?;
        Self::new(
            config.endpoint(),
            method,
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.client_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ResultSink for HttpResultSink {
    async fn post_result(&self, rows: &[Row]) -> Result<()> {
        let body = serde_json::json!({ "result": rows });
        let response = self
            .client
            .request(self.method.clone(), &self.endpoint)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| SchedulerError::ForwardingFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchedulerError::ForwardingFailure(format!(
                "{} responded {status}",
                self.endpoint
            )));
        }
        debug!(endpoint = %self.endpoint, rows = rows.len(), "Result forwarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::put};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/result")
    }

    fn rows() -> Vec<Row> {
        let mut row = Row::new();
        row.insert("result".into(), Value::from(70.0));
        vec![row]
    }

    fn sink(endpoint: String, method: PostMethod) -> HttpResultSink {
        HttpResultSink::new(endpoint, method, Duration::from_secs(5), Duration::from_secs(10)).unwrap()
    }

    #[tokio::test]
    async fn test_posts_result_body() {
        let received = Arc::new(Mutex::new(None::<Value>));
        let captured = received.clone();
        let router = Router::new().route(
            "/result",
            put(move |Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = Some(body);
                    StatusCode::OK
                }
            }),
        );
        let endpoint = serve(router).await;

        sink(endpoint, PostMethod::Put).post_result(&rows()).await.unwrap();
        let body = received.lock().unwrap().take().unwrap();
        assert_eq!(body["result"][0]["result"], 70.0);
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let router = Router::new().route(
            "/result",
            axum::routing::post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let endpoint = serve(router).await;

        let err = sink(endpoint, PostMethod::Post).post_result(&rows()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ForwardingFailure(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = sink(format!("http://{addr}/result"), PostMethod::Post)
            .post_result(&rows())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ForwardingFailure(_)));
    }

    #[tokio::test]
    async fn test_from_config_endpoint() {
        let sink = HttpResultSink::from_config(&PostResultConfig::default()).unwrap();
        assert_eq!(sink.endpoint(), "http://127.0.0.1:5000/result");

        let bad = PostResultConfig {
            method: "DELETE".into(),
            ..Default::default()
        };
        assert!(matches!(
            HttpResultSink::from_config(&bad),
            Err(SchedulerError::Config(ConfigError::Invalid { key: "post_result.method", .. }))
        ));
    }
}
