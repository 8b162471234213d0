//! HTTP/2 push gateway client in the APNs style.

use std::path::Path;
use std::time::Duration;

use super::{PushError, PushNotifier};

/// Sends empty-payload pushes to `POST {gateway}/3/device/{token}` with the
/// pass type identifier as `apns-topic`.
pub struct ApnsNotifier {
    client: reqwest::blocking::Client,
    gateway_url: reqwest::Url,
    topic: String,
}

impl ApnsNotifier {
    /// Build a notifier for one pass type.
    ///
    /// `identity_path` is a PEM file holding the client certificate and
    /// private key the gateway authenticates us with.
    pub fn new(
        gateway_url: &str,
        topic: &str,
        identity_path: Option<&Path>,
        timeout: Duration,
    ) -> Result<Self, PushError> {
        if gateway_url.trim().is_empty() {
            return Err(PushError::Config("gateway_url must not be empty".to_string()));
        }
        let gateway_url = reqwest::Url::parse(gateway_url.trim())
            .map_err(|e| PushError::Config(format!("invalid gateway_url: {}", e)))?;
        if gateway_url.cannot_be_a_base() {
            return Err(PushError::Config(format!(
                "gateway_url {} cannot carry a path",
                gateway_url
            )));
        }

        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout);
        if let Some(path) = identity_path {
            let pem = std::fs::read(path).map_err(|e| {
                PushError::Config(format!("cannot read {}: {}", path.display(), e))
            })?;
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| PushError::Config(format!("invalid push identity: {}", e)))?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| PushError::Config(e.to_string()))?;

        Ok(Self {
            client,
            gateway_url,
            topic: topic.to_string(),
        })
    }

    /// `{gateway}/3/device/{token}` with the token as one escaped segment.
    fn device_url(&self, push_token: &str) -> Result<reqwest::Url, PushError> {
        let mut url = self.gateway_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                PushError::Config(format!("gateway_url {} cannot carry a path", self.gateway_url))
            })?
            .pop_if_empty()
            .extend(["3", "device"])
            .push(push_token);
        Ok(url)
    }
}

impl PushNotifier for ApnsNotifier {
    fn deliver(&self, push_token: &str) -> Result<(), PushError> {
        let url = self.device_url(push_token)?;
        let response = self
            .client
            .post(url)
            .header("apns-topic", &self.topic)
            .json(&serde_json::json!({}))
            .send()
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(topic = %self.topic, "Push delivered");
            return Ok(());
        }

        let reason = response
            .json::<serde_json::Value>()
            .ok()
            .and_then(|body| body.get("reason").and_then(|r| r.as_str()).map(str::to_string))
            .unwrap_or_else(|| status.to_string());
        Err(PushError::Rejected {
            status: status.as_u16(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// One-shot HTTP/1.1 responder that hands back the raw request head.
    fn gateway(status_line: &'static str, body: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let head_end = loop {
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
                if n == 0 {
                    break buf.len();
                }
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while buf.len() < head_end + content_length {
                let n = stream.read(&mut chunk).unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            tx.send(head).unwrap();
        });

        (url, rx)
    }

    #[test]
    fn posts_to_device_path_with_topic() {
        let (url, rx) = gateway("200 OK", "");
        let notifier =
            ApnsNotifier::new(&url, "pass.com.example", None, Duration::from_secs(5)).unwrap();
        notifier.deliver("abc123").unwrap();

        let head = rx.recv().unwrap();
        assert!(head.starts_with("POST /3/device/abc123 "));
        assert!(head.to_ascii_lowercase().contains("apns-topic: pass.com.example"));
    }

    #[test]
    fn token_cannot_escape_device_path() {
        let (url, rx) = gateway("200 OK", "");
        let notifier =
            ApnsNotifier::new(&url, "pass.com.example", None, Duration::from_secs(5)).unwrap();
        notifier.deliver("abc/../../admin/purge?all=1").unwrap();

        let head = rx.recv().unwrap();
        let request_line = head.lines().next().unwrap();
        assert!(request_line.starts_with("POST /3/device/abc%2F"), "{}", request_line);
        assert!(!request_line.contains("/admin/"));
        assert!(!request_line.contains('?'));
    }

    #[test]
    fn gateway_with_base_path_keeps_it() {
        let notifier = ApnsNotifier::new(
            "https://gateway.example/push/",
            "pass.com.example",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            notifier.device_url("abc123").unwrap().as_str(),
            "https://gateway.example/push/3/device/abc123"
        );
    }

    #[test]
    fn unparseable_gateway_is_config_error() {
        let result = ApnsNotifier::new("not a url", "t", None, Duration::from_secs(1));
        assert!(matches!(result, Err(PushError::Config(_))));
    }

    #[test]
    fn rejection_carries_gateway_reason() {
        let (url, _rx) = gateway("410 Gone", r#"{"reason":"Unregistered"}"#);
        let notifier =
            ApnsNotifier::new(&url, "pass.com.example", None, Duration::from_secs(5)).unwrap();
        match notifier.deliver("abc123") {
            Err(PushError::Rejected { status, reason }) => {
                assert_eq!(status, 410);
                assert_eq!(reason, "Unregistered");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unreachable_gateway_is_transport_error() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let notifier = ApnsNotifier::new(
            &format!("http://127.0.0.1:{}", port),
            "pass.com.example",
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(matches!(notifier.deliver("abc"), Err(PushError::Transport(_))));
    }

    #[test]
    fn missing_identity_file_is_config_error() {
        let result = ApnsNotifier::new(
            "https://gateway.example",
            "pass.com.example",
            Some(Path::new("/nonexistent/identity.pem")),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(PushError::Config(_))));
    }
}
