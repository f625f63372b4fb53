//! Transports that carry one devserver RPC

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use thiserror::Error;
use tracing::debug;

/// Failure of a single request, before any devserver-level interpretation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// The server dropped the connection mid-response
    #[error("bad status line: {0}")]
    BadStatus(String),

    /// The server answered with an error status or an embedded error page
    #[error("server error ({status:?}): {body}")]
    Server { status: Option<u16>, body: String },

    /// The remote command (ssh) exited non-zero
    #[error("command failed with exit status {exit_status}: {stderr}")]
    Command { exit_status: i32, stderr: String },
}

/// Executes RPC URLs and returns the response body
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<String, TransportError>;

    /// POST one file as a multipart form field
    async fn post_file(
        &self,
        url: &str,
        field: &str,
        file_name: &str,
        contents: Vec<u8>,
        timeout: Duration,
    ) -> Result<String, TransportError>;
}

/// Plain HTTP transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    async fn read_response(response: reqwest::Response) -> Result<String, TransportError> {
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            return Err(TransportError::Server {
                status: Some(status.as_u16()),
                body,
            });
        }
        Ok(body)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connection(e.to_string())
    } else if e.is_request() || e.is_body() || e.is_decode() {
        TransportError::BadStatus(e.to_string())
    } else {
        TransportError::Connection(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<String, TransportError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::read_response(response).await
    }

    async fn post_file(
        &self,
        url: &str,
        field: &str,
        file_name: &str,
        contents: Vec<u8>,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        debug!("POST {} ({} bytes)", url, contents.len());
        let part = multipart::Part::bytes(contents).file_name(file_name.to_string());
        let form = multipart::Form::new().part(field.to_string(), part);
        let response = self
            .client
            .post(url)
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::read_response(response).await
    }
}
