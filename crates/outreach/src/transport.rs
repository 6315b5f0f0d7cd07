//! Outreach delivery transports.

use crate::error::{OutreachError, OutreachResult};
use async_trait::async_trait;
use serde::Serialize;

/// Delivery seam for outreach sends.
///
/// Implementations report success only after the message is accepted by the
/// downstream provider; any failure is retryable from the sequencer's
/// perspective.
#[async_trait]
pub trait OutreachTransport: Send + Sync + 'static {
    /// Deliver one campaign step to a recipient.
    ///
    /// `vars` carries the lead's continuity context for template rendering;
    /// it may be JSON null when the lead never reported any state.
    async fn send(
        &self,
        to_email: &str,
        template: &str,
        step: u32,
        vars: &serde_json::Value,
    ) -> OutreachResult<()>;

    /// Get the name of this transport.
    ///
    /// Returns a static string identifier (e.g., "http", "log").
    /// Used for metrics and logging.
    fn transport_name(&self) -> &'static str;
}

/// Transport that logs each send instead of delivering.
///
/// Used in development and tests; always succeeds.
pub struct LogTransport;

#[async_trait]
impl OutreachTransport for LogTransport {
    async fn send(
        &self,
        to_email: &str,
        template: &str,
        step: u32,
        _vars: &serde_json::Value,
    ) -> OutreachResult<()> {
        tracing::info!(
            to = %to_email,
            template = %template,
            step = step,
            "Outreach send (log transport)"
        );
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "log"
    }
}

#[derive(Serialize)]
struct DeliveryRequest<'a> {
    to: &'a str,
    template: &'a str,
    step: u32,
    vars: &'a serde_json::Value,
}

/// Transport that POSTs each send to an HTTP delivery endpoint as JSON.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpTransport {
    /// Create a new HTTP transport for the given endpoint.
    pub fn new(endpoint: String, auth_token: Option<String>) -> OutreachResult<Self> {
        if endpoint.is_empty() {
            return Err(OutreachError::Config(
                "outreach http endpoint is empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| OutreachError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            auth_token,
        })
    }
}

#[async_trait]
impl OutreachTransport for HttpTransport {
    async fn send(
        &self,
        to_email: &str,
        template: &str,
        step: u32,
        vars: &serde_json::Value,
    ) -> OutreachResult<()> {
        let body = DeliveryRequest {
            to: to_email,
            template,
            step,
            vars,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OutreachError::Delivery(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // Transient or permanent, the next sweep retries either way.
            return Err(OutreachError::Delivery(format!(
                "delivery endpoint returned {status}"
            )));
        }
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn http_transport_posts_delivery_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/deliver")
                    .header("authorization", "Bearer secret")
                    .json_body_partial(
                        r#"{"to": "ada@example.com", "template": "welcome-back", "step": 1}"#,
                    );
                then.status(200);
            })
            .await;

        let transport =
            HttpTransport::new(server.url("/deliver"), Some("secret".to_string())).unwrap();
        transport
            .send(
                "ada@example.com",
                "welcome-back",
                1,
                &serde_json::Value::Null,
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_transport_treats_non_2xx_as_delivery_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/deliver");
                then.status(503);
            })
            .await;

        let transport = HttpTransport::new(server.url("/deliver"), None).unwrap();
        let err = transport
            .send("ada@example.com", "welcome-back", 1, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, OutreachError::Delivery(_)));
    }

    #[test]
    fn http_transport_rejects_empty_endpoint() {
        assert!(HttpTransport::new(String::new(), None).is_err());
    }
}
