//! REST client for server-side error injections
//!
//! Talks to the error-injection endpoints every server exposes on its REST
//! port:
//!
//! | call | request |
//! |------|---------|
//! | enable | `POST /v2/error_injection/injection/{name}?one_shot={bool}` |
//! | disable | `DELETE /v2/error_injection/injection/{name}` |
//! | enabled | `GET /v2/error_injection/injection` (JSON list of names) |
//! | message | `POST /v2/error_injection/injection/{name}/message` |
//!
//! Requests use a blocking HTTP agent on tokio's blocking pool.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use casprobe_core::{EndpointConfig, Error, ErrorInjector, Result};

const INJECTION_PATH: &str = "/v2/error_injection/injection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Delete,
}

/// Why a request failed
#[derive(Debug)]
enum CallError {
    /// The node could not be reached at all
    Unreachable(String),
    /// The node answered with an error status or an unreadable body
    Failed(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Unreachable(msg) => write!(f, "unreachable: {}", msg),
            CallError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

/// [`ErrorInjector`] over the servers' REST API
#[derive(Debug, Clone)]
pub struct RestInjector {
    port: u16,
    timeout: Duration,
}

impl RestInjector {
    /// Client for servers listening on `config.rest_port`
    pub fn new(config: &EndpointConfig) -> Self {
        RestInjector {
            port: config.rest_port,
            timeout: config.rest_timeout(),
        }
    }

    /// Base URL of `node`'s REST API
    pub fn base_url(&self, node: IpAddr) -> String {
        format!("http://{}", SocketAddr::new(node, self.port))
    }

    fn injection_url(&self, node: IpAddr, name: &str) -> String {
        format!("{}{}/{}", self.base_url(node), INJECTION_PATH, name)
    }

    async fn call(&self, method: Method, url: String) -> std::result::Result<String, CallError> {
        let timeout = self.timeout;
        debug!(target: "casprobe::rest", ?method, url = %url, "request");
        tokio::task::spawn_blocking(move || blocking_call(method, &url, timeout))
            .await
            .map_err(|e| CallError::Failed(format!("request task failed: {}", e)))?
    }
}

fn blocking_call(
    method: Method,
    url: &str,
    timeout: Duration,
) -> std::result::Result<String, CallError> {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    let agent = ureq::Agent::new_with_config(config);

    let response = match method {
        Method::Get => agent.get(url).call(),
        Method::Post => agent.post(url).send_empty(),
        Method::Delete => agent.delete(url).call(),
    };
    let mut response = response.map_err(|e| match e {
        ureq::Error::StatusCode(code) => CallError::Failed(format!("{} returned {}", url, code)),
        other => CallError::Unreachable(format!("{}: {}", url, other)),
    })?;

    response
        .body_mut()
        .read_to_string()
        .map_err(|e| CallError::Failed(format!("failed to read response from {}: {}", url, e)))
}

#[async_trait]
impl ErrorInjector for RestInjector {
    async fn enable(&self, node: IpAddr, name: &str, one_shot: bool) -> Result<()> {
        let url = format!("{}?one_shot={}", self.injection_url(node, name), one_shot);
        match self.call(Method::Post, url).await {
            Ok(_) => Ok(()),
            Err(CallError::Unreachable(msg)) => {
                warn!(target: "casprobe::rest", node = %node, injection = name, reason = %msg, "node unreachable; injection not enabled");
                Ok(())
            }
            Err(e) => Err(Error::transport(e)),
        }
    }

    async fn disable(&self, node: IpAddr, name: &str) -> Result<()> {
        match self.call(Method::Delete, self.injection_url(node, name)).await {
            Ok(_) => Ok(()),
            Err(CallError::Unreachable(msg)) => {
                warn!(target: "casprobe::rest", node = %node, injection = name, reason = %msg, "node unreachable; injection not disabled");
                Ok(())
            }
            Err(e) => Err(Error::transport(e)),
        }
    }

    async fn enabled(&self, node: IpAddr) -> Result<Vec<String>> {
        let url = format!("{}{}", self.base_url(node), INJECTION_PATH);
        let body = self.call(Method::Get, url).await.map_err(Error::transport)?;
        serde_json::from_str(&body)
            .map_err(|e| Error::transport(format!("invalid injection list from {}: {}", node, e)))
    }

    async fn message(&self, node: IpAddr, name: &str) -> Result<()> {
        let url = format!("{}/message", self.injection_url(node, name));
        self.call(Method::Post, url)
            .await
            .map(|_| ())
            .map_err(Error::transport)
    }
}
