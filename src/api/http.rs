use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use url::Url;

use super::error::{ApiError, TransportKind};
use super::{Credentials, HttpConfig};

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Authenticated HTTP access to one API base URL.
///
/// Every request carries basic auth; bodies are read with a size cap.
pub(crate) struct HttpClient {
    client: reqwest::Client,
    base: Url,
    credentials: Credentials,
}

impl HttpClient {
    pub(crate) fn new(
        base: Url,
        credentials: Credentials,
        config: &HttpConfig,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base,
            credentials,
        })
    }

    pub(crate) fn base(&self) -> &Url {
        &self.base
    }

    /// Start a request for `path`, relative to the API base.
    pub(crate) fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;

        Ok(self
            .client
            .request(method, url)
            .basic_auth(
                &self.credentials.username,
                Some(self.credentials.password.expose_secret()),
            )
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    /// Send a request. Non-2xx statuses become `ApiError::HttpStatus`, except
    /// `304 Not Modified` which is handed back to the caller.
    pub(crate) async fn execute(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await?;
        let status = response.status();

        tracing::debug!(
            url = %response.url(),
            status = status.as_u16(),
            "API response"
        );

        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            Ok(response)
        } else {
            Err(ApiError::HttpStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            })
        }
    }

    pub(crate) async fn read_json<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, ApiError> {
        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn read_limited_bytes(response: Response, limit: usize) -> Result<Vec<u8>, ApiError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(ApiError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(ApiError::Transport {
                kind: TransportKind::Io,
                message: format!(
                    "Incomplete response: expected {} bytes, received {}",
                    expected,
                    bytes.len()
                ),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpClient {
        let base = Url::parse(&format!("{}/api/", server.uri())).unwrap();
        let credentials = Credentials {
            root_url: base.clone(),
            username: "alice".to_string(),
            password: SecretString::from("secret".to_string()),
        };
        HttpClient::new(base, credentials, &HttpConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_basic_auth_sent() {
        let server = MockServer::start().await;
        // base64("alice:secret")
        Mock::given(method("GET"))
            .and(path("/api/ping"))
            .and(header("authorization", "Basic YWxpY2U6c2VjcmV0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let http = client_for(&server);
        let response = http
            .execute(http.request(Method::GET, "ping").unwrap())
            .await
            .unwrap();
        let value: serde_json::Value = http.read_json(response).await.unwrap();
        assert_eq!(value, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_error_status_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let http = client_for(&server);
        let err = http
            .execute(http.request(Method::GET, "ping").unwrap())
            .await
            .unwrap_err();
        match err {
            ApiError::HttpStatus { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Unauthorized");
            }
            other => panic!("expected HTTP status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_response_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b' '; MAX_RESPONSE_SIZE + 1]))
            .mount(&server)
            .await;

        let http = client_for(&server);
        let response = http
            .execute(http.request(Method::GET, "big").unwrap())
            .await
            .unwrap();
        let err = http
            .read_json::<serde_json::Value>(response)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ResponseTooLarge));
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let http = client_for(&server);
        let response = http
            .execute(http.request(Method::GET, "sync").unwrap())
            .await
            .unwrap();
        let err = http
            .read_json::<serde_json::Value>(response)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Parse(_)));
    }
}
