//! Build and execute a single devserver RPC

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::constants::{DEFAULT_RPC_TIMEOUT, ERR_MSG_FOR_INVALID_DEVSERVER_RESPONSE};
use crate::errors::{DevServerError, Result};
use crate::http::markup::strip_http_message;
use crate::http::transport::{Transport, TransportError};

/// Ordered RPC query parameters
pub type Params = Vec<(String, String)>;

/// Render a boolean the way the devserver expects it on the wire
pub fn wire_bool(value: bool) -> String {
    if value { "True" } else { "False" }.to_string()
}

/// Executes RPC URLs through a [`Transport`] and classifies failures
#[derive(Clone)]
pub struct DevServerCall {
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
}

impl DevServerCall {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            default_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    /// Per-request timeout used when a call does not pass one
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// `{host}/{method}?k1=v1&k2=v2`, values rendered verbatim
    pub fn build_call(host: &str, method: &str, params: &[(String, String)]) -> String {
        let args = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}/{}?{}", host, method, args)
    }

    /// Run `url` and return the body
    pub async fn run_call(&self, url: &str, timeout: Option<Duration>) -> Result<String> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let body = self
            .transport
            .get(url, timeout)
            .await
            .map_err(|e| classify_transport_error(url, e))?;

        if body.contains(ERR_MSG_FOR_INVALID_DEVSERVER_RESPONSE) {
            debug!("Proxy error in RPC call {}, devserver is overloaded", url);
            return Err(DevServerError::Overload(format!(
                "{} returned: {}",
                url,
                strip_http_message(&body).trim()
            )));
        }
        Ok(body)
    }

    /// Run `url` and return the body split into lines, trailing whitespace removed
    pub async fn run_call_lines(&self, url: &str, timeout: Option<Duration>) -> Result<Vec<String>> {
        let body = self.run_call(url, timeout).await?;
        Ok(body.lines().map(|l| l.trim_end().to_string()).collect())
    }

    /// POST a file; same error classification as [`run_call`](Self::run_call)
    pub async fn post_file(
        &self,
        url: &str,
        field: &str,
        file_name: &str,
        contents: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.transport
            .post_file(url, field, file_name, contents, timeout)
            .await
            .map_err(|e| classify_transport_error(url, e))
    }
}

/// scheme://host[:port] of an RPC url
pub(crate) fn server_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let mut server = format!("{}://{}", parsed.scheme(), parsed.host_str().unwrap_or(""));
            if let Some(port) = parsed.port() {
                server.push_str(&format!(":{}", port));
            }
            server
        }
        Err(_) => url.split('/').take(3).collect::<Vec<_>>().join("/"),
    }
}

fn classify_transport_error(url: &str, e: TransportError) -> DevServerError {
    match e {
        TransportError::Connection(msg) | TransportError::Timeout(msg) => {
            DevServerError::TransientConnection(format!("{}: {}", url, msg))
        }
        TransportError::Command { exit_status, stderr } => DevServerError::TransientConnection(
            format!("{}: ssh exited with {}: {}", url, exit_status, stderr.trim()),
        ),
        TransportError::BadStatus(msg) => {
            error!("{}", msg);
            DevServerError::Server(format!(
                "Received Bad Status line, Devserver {} might have gone down while handling the call: {}",
                server_of(url),
                url
            ))
        }
        TransportError::Server { body, .. } => DevServerError::Server(strip_http_message(&body)),
    }
}
