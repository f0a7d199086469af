//! Service registration against the local Consul agent HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use tracing::{debug, info};

use tandem_engine::{EngineError, EngineResult, ServiceRegistry};

const REGISTER_PATH: &str = "/v1/agent/service/register";
const DEREGISTER_PATH: &str = "/v1/agent/service/deregister";

#[derive(Debug, Serialize)]
struct Registration<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Checks")]
    checks: Vec<Check<'a>>,
}

#[derive(Debug, Serialize)]
struct Check<'a> {
    #[serde(rename = "HTTP")]
    http: &'a str,
    #[serde(rename = "Interval")]
    interval: String,
}

/// JSON body registering `name` with one HTTP check per URL.
pub fn registration_body(name: &str, check_urls: &[String], interval_secs: u32) -> String {
    let registration = Registration {
        name,
        checks: check_urls
            .iter()
            .map(|url| Check {
                http: url,
                interval: format!("{interval_secs}s"),
            })
            .collect(),
    };
    // Only strings and a vector: serialization cannot fail.
    serde_json::to_string(&registration).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    /// Agent address (`host:port`).
    address: String,
    timeout: Duration,
}

impl ConsulRegistry {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one `PUT` and return the response body, failing on non-2xx.
    async fn put(&self, path: &str, body: String) -> EngineResult<String> {
        let uri = format!("http://{}{path}", self.address);
        tokio::time::timeout(self.timeout, self.send(path, &uri, body))
            .await
            .map_err(|_| EngineError::Registration(format!("{uri}: timed out")))?
    }

    async fn send(&self, path: &str, uri: &str, body: String) -> EngineResult<String> {
        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| fail(uri, "connection failed", e))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| fail(uri, "handshake failed", e))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "registry connection closed");
            }
        });

        let req = http::Request::builder()
            .method("PUT")
            .uri(path)
            .header("host", &self.address)
            .header("content-type", "application/json")
            .header("user-agent", "tandem/0.1")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| fail(uri, "invalid request", e))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| fail(uri, "request failed", e))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| fail(uri, "reading response failed", e))?
            .to_bytes();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if !status.is_success() {
            return Err(EngineError::Registration(format!(
                "{uri}: {status}: {}",
                text.trim()
            )));
        }
        Ok(text)
    }
}

fn fail(uri: &str, what: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Registration(format!("{uri}: {what}: {e}"))
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn register(
        &self,
        name: &str,
        check_urls: &[String],
        interval_secs: u32,
    ) -> EngineResult<()> {
        let body = registration_body(name, check_urls, interval_secs);
        self.put(REGISTER_PATH, body).await?;
        info!(%name, checks = check_urls.len(), "service registered");
        Ok(())
    }

    async fn deregister(&self, name: &str) -> EngineResult<()> {
        self.put(&format!("{DEREGISTER_PATH}/{name}"), String::new())
            .await?;
        info!(%name, "service deregistered");
        Ok(())
    }
}
