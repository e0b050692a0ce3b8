//! `Transport` over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::ports::{OutboundRequest, Transport, TransportError, TransportResponse};

/// Response bodies are read up to this many bytes; the rest is never
/// downloaded. Only kept for diagnostics.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Client with a request timeout, no redirect following and a
    /// `hookline/<version>` user agent.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(format!("hookline/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read at most `MAX_BODY_BYTES` of the body, then drop the connection.
    async fn read_capped(&self, mut response: reqwest::Response) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        while buf.len() < MAX_BODY_BYTES {
            let Some(chunk) = response.chunk().await.map_err(|e| self.map_error(e))? else {
                break;
            };
            let room = MAX_BODY_BYTES - buf.len();
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.body(request.body).send().await.map_err(|e| {
            tracing::debug!(target: "hookline::transport", url = %request.url, error = %e, "request failed");
            self.map_error(e)
        })?;

        let status = response.status().as_u16();
        let body = self.read_capped(response).await?;

        tracing::debug!(
            target: "hookline::transport",
            url = %request.url,
            status,
            "response received"
        );
        Ok(TransportResponse { status, body })
    }
}
