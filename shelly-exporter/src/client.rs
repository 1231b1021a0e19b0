//! HTTP client for the Shelly Gen1 device API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::resolver::Credentials;
use crate::target::Target;

/// Error type for device requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication rejected (HTTP {0})")]
    Unauthorized(u16),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Fetches JSON documents from a device.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// GET `path` on `target` and parse the body as JSON.
    async fn get_json(
        &self,
        target: &Target,
        path: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<Value, DeviceError>;
}

/// [`DeviceClient`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    client: reqwest::Client,
}

impl HttpDeviceClient {
    /// Create a client. Timeouts are applied per request.
    ///
    /// Devices live on the local network, so proxy settings from the
    /// environment are ignored.
    pub fn new() -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("shelly-exporter/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
            .map_err(|e| DeviceError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn get_json(
        &self,
        target: &Target,
        path: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<Value, DeviceError> {
        let url = target.url(path);
        trace!(url = %url, "Requesting device endpoint");

        let mut request = self.client.get(&url).timeout(timeout);
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(DeviceError::Unauthorized(response.status().as_u16()));
            }
            status if !status.is_success() => {
                return Err(DeviceError::Status(status.as_u16()));
            }
            _ => {}
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                DeviceError::Malformed(e.to_string())
            } else {
                classify(e, timeout)
            }
        })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> DeviceError {
    if error.is_timeout() {
        DeviceError::Timeout(timeout)
    } else {
        DeviceError::Transport(error.to_string())
    }
}
