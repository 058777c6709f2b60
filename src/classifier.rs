//! Failure classification
//!
//! Maps transport faults observed while probing or fetching a destination to
//! the closed set of reason codes stored on a failed capture. The mapping is
//! total: anything unrecognised lands in an `*_OTHER` bucket.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reason code stored on a failed capture
///
/// The string form (`CLIENT_ERROR_404`, `PROCESS_ERROR_PHANTOMJS`, ...) is the
/// stable representation used for storage and user-facing diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FailReason {
    ClientError401,
    ClientError403,
    ClientError404,
    ClientErrorOther,
    ServerError500,
    ServerError503,
    ServerErrorOther,
    CurlErrorSsl,
    CurlErrorNetworkFailure,
    CurlErrorInvalidHost,
    CurlErrorEmptyResponse,
    CurlErrorOther,
    FilesizeTooBig,
    /// Every render backend failed; carries the upper-cased name of the last one
    ProcessError(String),
    Other,
}

const PROCESS_ERROR_PREFIX: &str = "PROCESS_ERROR_";

impl FailReason {
    pub fn process_error(backend: &str) -> Self {
        FailReason::ProcessError(backend.to_ascii_uppercase())
    }

    pub fn code(&self) -> String {
        match self {
            FailReason::ClientError401 => "CLIENT_ERROR_401".to_string(),
            FailReason::ClientError403 => "CLIENT_ERROR_403".to_string(),
            FailReason::ClientError404 => "CLIENT_ERROR_404".to_string(),
            FailReason::ClientErrorOther => "CLIENT_ERROR_OTHER".to_string(),
            FailReason::ServerError500 => "SERVER_ERROR_500".to_string(),
            FailReason::ServerError503 => "SERVER_ERROR_503".to_string(),
            FailReason::ServerErrorOther => "SERVER_ERROR_OTHER".to_string(),
            FailReason::CurlErrorSsl => "CURL_ERROR_SSL".to_string(),
            FailReason::CurlErrorNetworkFailure => "CURL_ERROR_NETWORK_FAILURE".to_string(),
            FailReason::CurlErrorInvalidHost => "CURL_ERROR_INVALID_HOST".to_string(),
            FailReason::CurlErrorEmptyResponse => "CURL_ERROR_EMPTY_RESPONSE".to_string(),
            FailReason::CurlErrorOther => "CURL_ERROR_OTHER".to_string(),
            FailReason::FilesizeTooBig => "FILESIZE_TOO_BIG".to_string(),
            FailReason::ProcessError(backend) => format!("{PROCESS_ERROR_PREFIX}{backend}"),
            FailReason::Other => "OTHER".to_string(),
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown fail reason: {0}")]
pub struct UnknownFailReason(pub String);

impl FromStr for FailReason {
    type Err = UnknownFailReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reason = match s {
            "CLIENT_ERROR_401" => FailReason::ClientError401,
            "CLIENT_ERROR_403" => FailReason::ClientError403,
            "CLIENT_ERROR_404" => FailReason::ClientError404,
            "CLIENT_ERROR_OTHER" => FailReason::ClientErrorOther,
            "SERVER_ERROR_500" => FailReason::ServerError500,
            "SERVER_ERROR_503" => FailReason::ServerError503,
            "SERVER_ERROR_OTHER" => FailReason::ServerErrorOther,
            "CURL_ERROR_SSL" => FailReason::CurlErrorSsl,
            "CURL_ERROR_NETWORK_FAILURE" => FailReason::CurlErrorNetworkFailure,
            "CURL_ERROR_INVALID_HOST" => FailReason::CurlErrorInvalidHost,
            "CURL_ERROR_EMPTY_RESPONSE" => FailReason::CurlErrorEmptyResponse,
            "CURL_ERROR_OTHER" => FailReason::CurlErrorOther,
            "FILESIZE_TOO_BIG" => FailReason::FilesizeTooBig,
            "OTHER" => FailReason::Other,
            other => match other.strip_prefix(PROCESS_ERROR_PREFIX) {
                Some(backend) if !backend.is_empty() => {
                    FailReason::ProcessError(backend.to_string())
                }
                _ => return Err(UnknownFailReason(other.to_string())),
            },
        };
        Ok(reason)
    }
}

impl From<FailReason> for String {
    fn from(reason: FailReason) -> Self {
        reason.code()
    }
}

impl TryFrom<String> for FailReason {
    type Error = UnknownFailReason;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Low-level connection failure, before any HTTP response was received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionFault {
    /// TLS handshake or certificate problem
    Tls,
    /// Connection refused, reset or network unreachable
    NetworkUnreachable,
    /// DNS lookup failed
    HostResolution,
    /// Peer closed the connection without sending a response
    EmptyResponse,
    /// Timeouts and anything else the transport could not pin down
    Other,
}

impl ConnectionFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionFault::Tls => "tls",
            ConnectionFault::NetworkUnreachable => "network_unreachable",
            ConnectionFault::HostResolution => "host_resolution",
            ConnectionFault::EmptyResponse => "empty_response",
            ConnectionFault::Other => "other",
        }
    }
}

/// Typed failure returned by a [`crate::Transport`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFault {
    #[error("Client error response: HTTP {0}")]
    ClientError(u16),

    #[error("Server error response: HTTP {0}")]
    ServerError(u16),

    #[error("Connection fault: {}", .0.as_str())]
    Connection(ConnectionFault),

    #[error("Body exceeded {0} bytes")]
    TooLarge(u64),

    #[error("Request failed: {0}")]
    Other(String),
}

impl TransportFault {
    /// Fault class name, used as the tally key for operational counters
    pub fn class_name(&self) -> &'static str {
        match self {
            TransportFault::ClientError(_) => "ClientErrorResponse",
            TransportFault::ServerError(_) => "ServerErrorResponse",
            TransportFault::Connection(_) => "ConnectionFault",
            TransportFault::TooLarge(_) => "BodyTooLarge",
            TransportFault::Other(_) => "RequestFailure",
        }
    }
}

/// What the pipeline should do about a transport fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The probe itself was rejected but the resource may still render
    PermitWithoutHeaders,
    Fail(FailReason),
}

/// Classify a fault observed on the pre-flight or direct-fetch request.
pub fn classify(fault: &TransportFault) -> Classification {
    match fault {
        TransportFault::ClientError(405 | 406) => Classification::PermitWithoutHeaders,
        TransportFault::ClientError(code) => Classification::Fail(classify_client_status(*code)),
        TransportFault::ServerError(code) => Classification::Fail(classify_server_status(*code)),
        TransportFault::Connection(kind) => Classification::Fail(classify_connection(*kind)),
        TransportFault::TooLarge(_) => Classification::Fail(FailReason::FilesizeTooBig),
        TransportFault::Other(_) => Classification::Fail(FailReason::Other),
    }
}

pub fn classify_client_status(code: u16) -> FailReason {
    match code {
        401 => FailReason::ClientError401,
        403 => FailReason::ClientError403,
        404 => FailReason::ClientError404,
        _ => FailReason::ClientErrorOther,
    }
}

pub fn classify_server_status(code: u16) -> FailReason {
    match code {
        500 => FailReason::ServerError500,
        503 => FailReason::ServerError503,
        _ => FailReason::ServerErrorOther,
    }
}

pub fn classify_connection(kind: ConnectionFault) -> FailReason {
    match kind {
        ConnectionFault::Tls => FailReason::CurlErrorSsl,
        ConnectionFault::NetworkUnreachable => FailReason::CurlErrorNetworkFailure,
        ConnectionFault::HostResolution => FailReason::CurlErrorInvalidHost,
        ConnectionFault::EmptyResponse => FailReason::CurlErrorEmptyResponse,
        ConnectionFault::Other => FailReason::CurlErrorOther,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        for (code, expected) in [
            (401, "CLIENT_ERROR_401"),
            (403, "CLIENT_ERROR_403"),
            (404, "CLIENT_ERROR_404"),
            (400, "CLIENT_ERROR_OTHER"),
            (410, "CLIENT_ERROR_OTHER"),
            (429, "CLIENT_ERROR_OTHER"),
        ] {
            match classify(&TransportFault::ClientError(code)) {
                Classification::Fail(reason) => assert_eq!(reason.code(), expected),
                other => panic!("unexpected classification for {code}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_probe_rejections_are_permitted() {
        assert_eq!(
            classify(&TransportFault::ClientError(405)),
            Classification::PermitWithoutHeaders
        );
        assert_eq!(
            classify(&TransportFault::ClientError(406)),
            Classification::PermitWithoutHeaders
        );
    }

    #[test]
    fn test_server_errors() {
        assert_eq!(classify_server_status(500), FailReason::ServerError500);
        assert_eq!(classify_server_status(503), FailReason::ServerError503);
        assert_eq!(classify_server_status(502), FailReason::ServerErrorOther);
        assert_eq!(classify_server_status(504), FailReason::ServerErrorOther);
    }

    #[test]
    fn test_connection_faults() {
        assert_eq!(classify_connection(ConnectionFault::Tls), FailReason::CurlErrorSsl);
        assert_eq!(
            classify_connection(ConnectionFault::NetworkUnreachable),
            FailReason::CurlErrorNetworkFailure
        );
        assert_eq!(
            classify_connection(ConnectionFault::HostResolution),
            FailReason::CurlErrorInvalidHost
        );
        assert_eq!(
            classify_connection(ConnectionFault::EmptyResponse),
            FailReason::CurlErrorEmptyResponse
        );
        assert_eq!(classify_connection(ConnectionFault::Other), FailReason::CurlErrorOther);
    }

    #[test]
    fn test_unclassified_faults_fall_back_to_other() {
        assert_eq!(
            classify(&TransportFault::Other("builder error".to_string())),
            Classification::Fail(FailReason::Other)
        );
        assert_eq!(
            classify(&TransportFault::TooLarge(4_000_000)),
            Classification::Fail(FailReason::FilesizeTooBig)
        );
    }

    #[test]
    fn test_reason_codes_parse_back() {
        for code in [
            "CLIENT_ERROR_401",
            "SERVER_ERROR_OTHER",
            "CURL_ERROR_EMPTY_RESPONSE",
            "FILESIZE_TOO_BIG",
            "PROCESS_ERROR_PHANTOMJS",
            "OTHER",
        ] {
            let reason: FailReason = code.parse().unwrap();
            assert_eq!(reason.to_string(), code);
        }
        assert!("PROCESS_ERROR_".parse::<FailReason>().is_err());
        assert!("TEAPOT".parse::<FailReason>().is_err());
    }

    #[test]
    fn test_process_error_uppercases_backend() {
        assert_eq!(
            FailReason::process_error("phantomjs").code(),
            "PROCESS_ERROR_PHANTOMJS"
        );
    }
}
