/// HTTP health probe: `GET http://host:port<path>` must answer with the expected status
use super::{HealthProbe, ProbeOutcome, ProbeTarget};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

pub struct HttpHealthProbe {
    path: String,
    expected_status: u16,
}

impl HttpHealthProbe {
    pub fn new(path: impl Into<String>, expected_status: u16) -> Self {
        Self {
            path: path.into(),
            expected_status,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn expected_status(&self) -> u16 {
        self.expected_status
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new("/health", 200)
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        let address = target.address();
        let uri = format!("http://{}{}", address, self.path);

        let stream = match TcpStream::connect(&address).await {
            Ok(stream) => stream,
            Err(e) => {
                return ProbeOutcome::Unhealthy {
                    reason: format!("Connection failed: {}", e),
                }
            }
        };

        let io = TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                return ProbeOutcome::Unhealthy {
                    reason: format!("Handshake failed: {}", e),
                }
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let request = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", &address)
            .header("user-agent", concat!("loadscale/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())
        {
            Ok(request) => request,
            Err(e) => {
                return ProbeOutcome::Unhealthy {
                    reason: format!("Invalid probe request: {}", e),
                }
            }
        };

        match sender.send_request(request).await {
            Ok(response) if response.status().as_u16() == self.expected_status => {
                ProbeOutcome::Healthy
            }
            Ok(response) => {
                debug!(
                    status = %response.status(),
                    %uri,
                    "health probe returned unexpected status"
                );
                ProbeOutcome::Unhealthy {
                    reason: format!("Unexpected status {}", response.status().as_u16()),
                }
            }
            Err(e) => ProbeOutcome::Unhealthy {
                reason: format!("Request failed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_server(status_line: &'static str) -> ProbeTarget {
        spawn_server_on("127.0.0.1:0", status_line).await
    }

    /// Serve a single canned HTTP response per connection
    async fn spawn_server_on(bind: &str, status_line: &'static str) -> ProbeTarget {
        let listener = TcpListener::bind(bind).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buffer = [0u8; 1024];
                let _ = stream.read(&mut buffer).await;
                let response = format!("{}\r\nContent-Length: 0\r\n\r\n", status_line);
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        ProbeTarget {
            backend_id: "b1".to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    #[test]
    fn test_default_probe() {
        let probe = HttpHealthProbe::default();
        assert_eq!(probe.path(), "/health");
        assert_eq!(probe.expected_status(), 200);
    }

    #[tokio::test]
    async fn test_probe_expected_status() {
        let target = spawn_server("HTTP/1.1 200 OK").await;
        let probe = HttpHealthProbe::default();
        assert_eq!(probe.probe(&target).await, ProbeOutcome::Healthy);
    }

    #[tokio::test]
    async fn test_probe_ipv6_backend() {
        let target = spawn_server_on("[::1]:0", "HTTP/1.1 200 OK").await;
        assert_eq!(target.host, "::1");
        assert_eq!(target.address(), format!("[::1]:{}", target.port));

        let probe = HttpHealthProbe::default();
        assert_eq!(probe.probe(&target).await, ProbeOutcome::Healthy);
    }

    #[tokio::test]
    async fn test_probe_unexpected_status() {
        let target = spawn_server("HTTP/1.1 503 Service Unavailable").await;
        let probe = HttpHealthProbe::default();

        match probe.probe(&target).await {
            ProbeOutcome::Unhealthy { reason } => assert!(reason.contains("503")),
            other => panic!("Expected unhealthy outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_custom_expected_status() {
        let target = spawn_server("HTTP/1.1 204 No Content").await;
        let probe = HttpHealthProbe::new("/ready", 204);
        assert!(probe.probe(&target).await.is_healthy());
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = ProbeTarget {
            backend_id: "b1".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        };
        let outcome = HttpHealthProbe::default().probe(&target).await;
        assert!(matches!(outcome, ProbeOutcome::Unhealthy { .. }));
    }
}
