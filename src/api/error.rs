use std::error::Error as StdError;

use thiserror::Error;

/// Broad class of a transport-level failure, decided once when a
/// `reqwest::Error` enters the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// DNS lookup failed
    UnknownHost,
    /// TLS handshake rejected the server certificate
    UntrustedCertificate,
    /// TCP connection could not be established
    ConnectionRefused,
    /// Request or read exceeded the configured timeout
    Timeout,
    /// Any other I/O failure while talking to the server
    Io,
    Other,
}

/// Errors surfaced by the Nextcloud News API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {message}")]
    Transport { kind: TransportKind, message: String },
    /// HTTP response with non-2xx status code
    #[error("HTTP error {status}: {message}")]
    HttpStatus { status: u16, message: String },
    /// Operation not available at this API level
    #[error("Not implemented: {0}")]
    Unsupported(&'static str),
    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
    /// Local store failed while applying a response
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
    /// No username/password available for basic auth
    #[error("No credentials configured")]
    MissingCredentials,
    /// Stored API level is not one this client speaks
    #[error("Unsupported API level: {0}")]
    UnsupportedApiLevel(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

impl ApiError {
    /// Wrap a storage failure at the API boundary.
    pub(crate) fn database(err: anyhow::Error) -> Self {
        ApiError::Database(format!("{:#}", err))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        let kind = classify(&err);
        tracing::debug!(kind = ?kind, error = %err, "Transport failure");
        ApiError::Transport {
            kind,
            message: error_chain_message(&err),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}

fn classify(err: &reqwest::Error) -> TransportKind {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    let mut saw_io = false;

    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("no record found")
        {
            return TransportKind::UnknownHost;
        }
        if text.contains("certificate") || text.contains("unknownissuer") {
            return TransportKind::UntrustedCertificate;
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            saw_io = true;
        }
        source = cause.source();
    }

    if err.is_timeout() {
        TransportKind::Timeout
    } else if err.is_connect() {
        TransportKind::ConnectionRefused
    } else if saw_io || err.is_body() || err.is_decode() {
        TransportKind::Io
    } else {
        TransportKind::Other
    }
}

/// `reqwest` hides the interesting part of a failure in its source chain;
/// flatten it into one line.
fn error_chain_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_refused_classified() {
        // Bind then drop a listener so the port is closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::Client::new()
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();

        match ApiError::from(err) {
            ApiError::Transport { kind, message } => {
                assert_eq!(kind, TransportKind::ConnectionRefused);
                assert!(!message.is_empty());
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_from_json() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(ApiError::from(err), ApiError::Parse(_)));
    }

    #[test]
    fn test_display() {
        let err = ApiError::HttpStatus {
            status: 404,
            message: "Not Found".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 404: Not Found");
        assert_eq!(
            ApiError::Unsupported("load more").to_string(),
            "Not implemented: load more"
        );
    }
}
