//! Endpoint resolution and reachability probing
//!
//! This module handles:
//! - Splitting a public URL into host/port dialing components
//! - Localhost detection (accepted, but unreachable to remote clients)
//! - Health probing of the advertised URL, with retries while the node boots

use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};

const LOCALHOST_NAMES: &[&str] = &["localhost", "127.0.0.1", "::1", "[::1]", "0.0.0.0"];

/// Dialing components of a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    /// Address the inference server should bind for this public endpoint
    pub fn bind_host(&self) -> &'static str {
        if is_localhost_host(&self.host) {
            "127.0.0.1"
        } else {
            "0.0.0.0"
        }
    }
}

pub fn extract_host_port(url: &str) -> Result<HostPort> {
    let parsed = Url::parse(url).map_err(|e| HostError::Validation(format!("Invalid URL '{}': {}", url, e)))?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| HostError::Validation(format!("URL '{}' has no host", url)))?
        .to_string();
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| HostError::Validation(format!("URL '{}' has no port", url)))?;

    Ok(HostPort { host, port })
}

fn is_localhost_host(host: &str) -> bool {
    LOCALHOST_NAMES.iter().any(|name| host.eq_ignore_ascii_case(name))
}

pub fn is_localhost_url(url: &str) -> bool {
    extract_host_port(url)
        .map(|hp| is_localhost_host(&hp.host))
        .unwrap_or(false)
}

/// Log an advisory for localhost URLs. Returns true if a warning was issued.
pub fn warn_if_localhost(url: &str) -> bool {
    let local = is_localhost_url(url);
    if local {
        warn!(
            url = %url,
            "Public URL points at localhost; remote clients will not be able to reach this host"
        );
    }
    local
}

/// Operator-facing hints for an unreachable endpoint
pub fn troubleshooting_hints(url: &str) -> Vec<String> {
    let mut hints = Vec::new();
    match extract_host_port(url) {
        Ok(hp) => {
            hints.push(format!("Check that port {} is open in your firewall", hp.port));
            hints.push(format!(
                "If behind NAT, forward external port {} to this machine",
                hp.port
            ));
            hints.push(format!("Verify that {} resolves to this machine's public IP", hp.host));
            if is_localhost_host(&hp.host) {
                hints.push("A localhost URL is only reachable from this machine".to_string());
            }
        }
        Err(_) => hints.push(format!("'{}' is not a valid URL", url)),
    }
    hints.push(format!("Test from another machine: curl {}/health", url.trim_end_matches('/')));
    hints
}

/// Reachability seam
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    /// Never errors: timeouts and connection failures yield `false`
    async fn verify_public_endpoint(&self, url: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub attempts: u32,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub health_path: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            health_path: "/health".to_string(),
        }
    }
}

/// HTTP health probe against the advertised URL
pub struct HttpProbe {
    client: reqwest::Client,
    settings: ProbeSettings,
}

impl HttpProbe {
    pub fn new(settings: ProbeSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| HostError::Process(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    fn health_url(&self, url: &str) -> String {
        format!(
            "{}/{}",
            url.trim_end_matches('/'),
            self.settings.health_path.trim_start_matches('/')
        )
    }

    async fn probe_once(&self, health_url: &str) -> bool {
        match self.client.get(health_url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(url = %health_url, status = %response.status(), "Health probe returned non-success");
                false
            }
            Err(e) => {
                debug!(url = %health_url, error = %e, "Health probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl EndpointProbe for HttpProbe {
    async fn verify_public_endpoint(&self, url: &str) -> bool {
        let health_url = self.health_url(url);
        let attempts = self.settings.attempts.max(1);

        for attempt in 1..=attempts {
            if self.probe_once(&health_url).await {
                info!(url = %health_url, attempt, "Public endpoint is reachable");
                return true;
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.interval).await;
            }
        }

        warn!(url = %health_url, attempts, "Public endpoint is not reachable");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn quick_settings() -> ProbeSettings {
        ProbeSettings {
            attempts: 2,
            interval: Duration::from_millis(50),
            request_timeout: Duration::from_millis(500),
            health_path: "/health".to_string(),
        }
    }

    #[test]
    fn test_extract_host_port() {
        let hp = extract_host_port("http://node.example.com:8080/v1").unwrap();
        assert_eq!(hp, HostPort { host: "node.example.com".into(), port: 8080 });
        assert_eq!(hp.bind_host(), "0.0.0.0");

        let local = extract_host_port("http://localhost:8080").unwrap();
        assert_eq!(local.bind_host(), "127.0.0.1");

        assert_eq!(extract_host_port("https://node.example.com").unwrap().port, 443);
        assert!(extract_host_port("garbage").is_err());
    }

    #[test]
    fn test_localhost_detection() {
        assert!(is_localhost_url("http://localhost:8080"));
        assert!(is_localhost_url("http://127.0.0.1:8080"));
        assert!(is_localhost_url("http://[::1]:8080"));
        assert!(!is_localhost_url("http://203.0.113.7:8080"));
        assert!(!is_localhost_url("not a url"));

        assert!(warn_if_localhost("http://LOCALHOST:9000"));
        assert!(!warn_if_localhost("http://node.example.com:9000"));
    }

    #[test]
    fn test_hints_mention_port() {
        let hints = troubleshooting_hints("http://localhost:8080");
        assert!(hints.iter().any(|h| h.contains("8080")));
        assert!(hints.iter().any(|h| h.contains("localhost")));
    }

    #[tokio::test]
    async fn test_probe_fails_on_closed_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HttpProbe::new(quick_settings()).unwrap();
        assert!(!probe.verify_public_endpoint(&format!("http://127.0.0.1:{}", port)).await);
    }

    #[tokio::test]
    async fn test_probe_succeeds_against_health_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let response = if request.starts_with("GET /health ") {
                    "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok"
                } else {
                    "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                };
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        let probe = HttpProbe::new(quick_settings()).unwrap();
        assert!(probe.verify_public_endpoint(&format!("http://127.0.0.1:{}/", port)).await);
    }
}
