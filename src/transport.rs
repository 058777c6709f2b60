//! HTTP transport for the pre-flight probe and the direct image fetch

use crate::{Config, ConnectionFault, TransportFault};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Response};
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::debug;

/// Headers returned by a successful header-only request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// Performs the HTTP requests the pipeline needs
///
/// Implementations are shared across workers and must hold no per-request
/// state. Non-success statuses are reported as [`TransportFault`]s, never as
/// successful responses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn head(&self, url: &str) -> Result<HeadResponse, TransportFault>;

    /// Download the full body, failing with `TooLarge` past `limit` bytes
    async fn get(&self, url: &str, limit: u64) -> Result<Vec<u8>, TransportFault>;
}

pub struct ReqwestTransport {
    client: Client,
    preflight_timeout: Duration,
    fetch_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &Config) -> Result<Self, crate::CaptureError> {
        let mut builder = Client::builder();
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder
            .build()
            .map_err(|e| crate::CaptureError::ConfigurationError(e.to_string()))?;

        Ok(Self {
            client,
            preflight_timeout: config.preflight_timeout,
            fetch_timeout: config.fetch_timeout,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn head(&self, url: &str) -> Result<HeadResponse, TransportFault> {
        let response = self
            .client
            .head(url)
            .timeout(self.preflight_timeout)
            .send()
            .await
            .map_err(|e| fault_from_reqwest(&e))?;

        let response = check_status(response)?;
        let headers = response.headers();

        Ok(HeadResponse {
            status: response.status().as_u16(),
            content_type: headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string()),
            // HEAD bodies are empty, so only the declared header is meaningful
            content_length: headers
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok()),
        })
    }

    async fn get(&self, url: &str, limit: u64) -> Result<Vec<u8>, TransportFault> {
        let response = self
            .client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| fault_from_reqwest(&e))?;

        let mut response = check_status(response)?;
        let mut body = Vec::new();

        while let Some(chunk) = response.chunk().await.map_err(|e| fault_from_reqwest(&e))? {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(TransportFault::TooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

fn check_status(response: Response) -> Result<Response, TransportFault> {
    let status = response.status();
    if status.is_client_error() {
        Err(TransportFault::ClientError(status.as_u16()))
    } else if status.is_server_error() {
        Err(TransportFault::ServerError(status.as_u16()))
    } else {
        Ok(response)
    }
}

/// Translate a reqwest error into the transport's closed fault type.
///
/// reqwest exposes no stable error codes, so the connection fault kind is
/// read off the source chain (hyper, io and rustls/native-tls errors). The
/// top-level message embeds the request URL and is never inspected.
pub fn fault_from_reqwest(err: &reqwest::Error) -> TransportFault {
    if err.is_builder() {
        return TransportFault::Other(err.to_string());
    }

    if err.is_timeout() {
        return TransportFault::Connection(ConnectionFault::Other);
    }

    let kind = connection_fault_from_source(err.source());

    if kind != ConnectionFault::Other || err.is_connect() || err.is_request() {
        TransportFault::Connection(kind)
    } else {
        TransportFault::Other(err.to_string())
    }
}

pub(crate) fn connection_fault_from_source(
    source: Option<&(dyn StdError + 'static)>,
) -> ConnectionFault {
    let mut messages = Vec::new();
    let mut current = source;

    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            match io.kind() {
                ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted => return ConnectionFault::NetworkUnreachable,
                ErrorKind::UnexpectedEof => return ConnectionFault::EmptyResponse,
                _ => {}
            }
        }
        messages.push(e.to_string().to_ascii_lowercase());
        current = e.source();
    }

    connection_fault_from_messages(&messages)
}

pub(crate) fn connection_fault_from_messages(messages: &[String]) -> ConnectionFault {
    let any = |needles: &[&str]| {
        messages
            .iter()
            .any(|message| needles.iter().any(|needle| message.contains(needle)))
    };

    if any(&["dns error", "failed to lookup address", "name or service not known", "no such host"]) {
        ConnectionFault::HostResolution
    } else if any(&["certificate", "tls", "ssl", "handshake"]) {
        ConnectionFault::Tls
    } else if any(&["connection closed before message completed", "incompletemessage", "empty reply"]) {
        ConnectionFault::EmptyResponse
    } else if any(&[
        "connection refused",
        "connection reset",
        "network is unreachable",
        "no route to host",
    ]) {
        ConnectionFault::NetworkUnreachable
    } else {
        ConnectionFault::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(items: &[&str]) -> Vec<String> {
        items.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_dns_failures_map_to_host_resolution() {
        let chain = messages(&[
            "error sending request for url (http://nope.invalid/)",
            "error trying to connect: dns error: failed to lookup address information",
        ]);
        assert_eq!(connection_fault_from_messages(&chain), ConnectionFault::HostResolution);
    }

    #[test]
    fn test_tls_failures() {
        let chain = messages(&["error trying to connect: invalid peer certificate: unknownissuer"]);
        assert_eq!(connection_fault_from_messages(&chain), ConnectionFault::Tls);
    }

    #[test]
    fn test_empty_reply() {
        let chain = messages(&["connection closed before message completed"]);
        assert_eq!(connection_fault_from_messages(&chain), ConnectionFault::EmptyResponse);
    }

    #[test]
    fn test_refused_connections() {
        let chain = messages(&["tcp connect error: connection refused (os error 111)"]);
        assert_eq!(
            connection_fault_from_messages(&chain),
            ConnectionFault::NetworkUnreachable
        );
    }

    #[derive(Debug)]
    struct Wrapped {
        message: &'static str,
        source: std::io::Error,
    }

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message)
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.source)
        }
    }

    #[test]
    fn test_io_kind_wins_over_message_text() {
        let err = Wrapped {
            message: "error trying to connect: tls handshake",
            source: std::io::Error::new(ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(
            connection_fault_from_source(Some(&err)),
            ConnectionFault::NetworkUnreachable
        );

        let err = Wrapped {
            message: "connection error",
            source: std::io::Error::new(ErrorKind::UnexpectedEof, "eof"),
        };
        assert_eq!(
            connection_fault_from_source(Some(&err)),
            ConnectionFault::EmptyResponse
        );
        assert_eq!(connection_fault_from_source(None), ConnectionFault::Other);
    }

    #[tokio::test]
    async fn test_destination_text_does_not_pick_the_fault_kind() {
        let transport = ReqwestTransport::new(&Config::default()).unwrap();

        // Nothing listens on port 1, so both requests are refused.
        let plain = transport.head("http://127.0.0.1:1/plain").await.unwrap_err();
        let suspicious = transport
            .head("http://127.0.0.1:1/tls-ssl-certificate-handshake-dns-error")
            .await
            .unwrap_err();

        assert_eq!(plain, suspicious);
        assert_eq!(
            plain,
            TransportFault::Connection(ConnectionFault::NetworkUnreachable)
        );
    }

    #[test]
    fn test_unknown_messages() {
        let chain = messages(&["something odd happened"]);
        assert_eq!(connection_fault_from_messages(&chain), ConnectionFault::Other);
    }

    #[tokio::test]
    async fn test_invalid_url_is_unclassified() {
        let transport = ReqwestTransport::new(&Config::default()).unwrap();
        let fault = transport.head("not a url").await.unwrap_err();
        assert!(matches!(fault, TransportFault::Other(_)));
    }
}
