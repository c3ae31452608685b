use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a Nextcloud server URL.
#[derive(Error, Debug)]
pub enum ServerUrlError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Credentials must not be embedded in the URL itself.
    #[error("Server URL must not contain a username or password")]
    EmbeddedCredentials,
    /// Query strings and fragments have no meaning for a server root.
    #[error("Server URL must not contain a query or fragment")]
    QueryOrFragment,
}

/// Validate a Nextcloud root URL and normalise it for joining API paths.
///
/// - Only `http` and `https` are accepted
/// - The path always ends with `/`, so `Url::join` keeps sub-directory installs
/// - Plain `http` to a non-local host is allowed but logged, since basic auth
///   credentials travel with every request
///
/// # Examples
///
/// ```
/// use ocsync::util::normalize_server_url;
///
/// let url = normalize_server_url("https://example.com/nextcloud").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/nextcloud/");
///
/// assert!(normalize_server_url("ftp://example.com").is_err());
/// ```
pub fn normalize_server_url(url_str: &str) -> Result<Url, ServerUrlError> {
    let mut url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(ServerUrlError::UnsupportedScheme(scheme.to_owned())),
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(ServerUrlError::EmbeddedCredentials);
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(ServerUrlError::QueryOrFragment);
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    if url.scheme() == "http" && !is_local_host(&url) {
        tracing::warn!(
            url = %url,
            "Using plain HTTP, credentials are sent unencrypted"
        );
    }

    Ok(url)
}

fn is_local_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if host == "localhost" {
        return true;
    }

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_private() || ip.is_link_local(),
        Ok(IpAddr::V6(ip)) => {
            let segments = ip.segments();
            ip.is_loopback()
                || (segments[0] & 0xfe00) == 0xfc00
                || (segments[0] & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}
