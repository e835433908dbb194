//! JSON over HTTP client shared by both transports

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct PeerClient {
    client: Client,
}

impl PeerClient {
    /// `request_timeout` bounds a whole request; turn deadlines are enforced
    /// by the engine on top of it.
    pub fn new(request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }

    pub async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!("POST {}", url);
        let response = self.client.post(url).json(body).send().await?;
        decode(check(response).await?).await
    }

    pub async fn get_json<R: DeserializeOwned>(&self, url: &str) -> Result<R, TransportError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        decode(check(response).await?).await
    }

    pub async fn post_empty(&self, url: &str) -> Result<(), TransportError> {
        debug!("POST {}", url);
        let response = self.client.post(url).send().await?;
        check(response).await.map(|_| ())
    }

    pub async fn delete(&self, url: &str) -> Result<(), TransportError> {
        debug!("DELETE {}", url);
        let response = self.client.delete(url).send().await?;
        check(response).await.map(|_| ())
    }
}

async fn check(response: Response) -> Result<Response, TransportError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status { status, body })
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, TransportError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
}
