//! Turn API failures into a message and the login form field it concerns.

use std::fmt;

use crate::api::{ApiError, TransportKind};

/// Part of the login form an error should be shown next to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Url,
    User,
    Password,
    None,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginError {
    pub section: Section,
    pub message: String,
    /// Text of the underlying failure when it could not be classified
    pub cause: Option<String>,
}

impl LoginError {
    pub fn new(section: Section, message: impl Into<String>) -> Self {
        Self {
            section,
            message: message.into(),
            cause: None,
        }
    }

    /// Map an HTTP status to a message.
    ///
    /// ```
    /// use ocsync::login_error::{LoginError, Section};
    ///
    /// let err = LoginError::from_status(401, "Unauthorized");
    /// assert_eq!(err.section, Section::User);
    ///
    /// let err = LoginError::from_status(500, "Internal Server Error");
    /// assert_eq!(err.message, "HTTP error 500: Internal Server Error");
    /// ```
    pub fn from_status(code: u16, default_message: &str) -> Self {
        match code {
            401 => Self::new(Section::User, "Incorrect username or password"),
            403 | 404 => Self::new(Section::Url, "Nextcloud News not found on the server"),
            405 => Self::new(Section::Url, "Nextcloud News version too old"),
            _ => Self::new(
                Section::None,
                format!("HTTP error {}: {}", code, default_message),
            ),
        }
    }

    pub fn from_api_error(err: &ApiError) -> Self {
        match err {
            ApiError::HttpStatus { status, message } => Self::from_status(*status, message),
            ApiError::Transport { kind, message } => match kind {
                TransportKind::UnknownHost => Self::new(Section::Url, "Unknown host"),
                TransportKind::UntrustedCertificate => {
                    Self::new(Section::Url, "Untrusted certificate")
                }
                TransportKind::ConnectionRefused => {
                    Self::new(Section::Url, "Could not connect to server")
                }
                TransportKind::Io | TransportKind::Timeout => {
                    Self::new(Section::None, "Nextcloud News version too old")
                }
                TransportKind::Other => Self::unknown(message.clone()),
            },
            ApiError::InvalidUrl(_) => Self {
                cause: Some(err.to_string()),
                ..Self::new(Section::Url, "Invalid server URL")
            },
            ApiError::MissingCredentials => {
                Self::new(Section::User, "Username and password required")
            }
            other => Self::unknown(other.to_string()),
        }
    }

    fn unknown(cause: String) -> Self {
        Self {
            section: Section::Unknown,
            message: cause.clone(),
            cause: Some(cause),
        }
    }
}

impl From<&ApiError> for LoginError {
    fn from(err: &ApiError) -> Self {
        Self::from_api_error(err)
    }
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for LoginError {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn transport(kind: TransportKind) -> ApiError {
        ApiError::Transport {
            kind,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (401, Section::User, "Incorrect username or password"),
            (403, Section::Url, "Nextcloud News not found on the server"),
            (404, Section::Url, "Nextcloud News not found on the server"),
            (405, Section::Url, "Nextcloud News version too old"),
            (500, Section::None, "HTTP error 500: Server Error"),
        ];
        for (code, section, message) in cases {
            let err = LoginError::from_status(code, "Server Error");
            assert_eq!(err.section, section, "code {}", code);
            assert_eq!(err.message, message);
            assert_eq!(err.cause, None);
        }
    }

    #[test]
    fn test_transport_kinds() {
        let cases = [
            (TransportKind::UnknownHost, Section::Url, "Unknown host"),
            (TransportKind::UntrustedCertificate, Section::Url, "Untrusted certificate"),
            (TransportKind::ConnectionRefused, Section::Url, "Could not connect to server"),
            (TransportKind::Io, Section::None, "Nextcloud News version too old"),
            (TransportKind::Timeout, Section::None, "Nextcloud News version too old"),
        ];
        for (kind, section, message) in cases {
            let err = LoginError::from_api_error(&transport(kind));
            assert_eq!(err.section, section, "kind {:?}", kind);
            assert_eq!(err.message, message);
        }
    }

    #[test]
    fn test_unclassified_keeps_cause() {
        let err = LoginError::from_api_error(&transport(TransportKind::Other));
        assert_eq!(err.section, Section::Unknown);
        assert_eq!(err.cause.as_deref(), Some("boom"));

        let err = LoginError::from_api_error(&ApiError::Parse("expected value".to_string()));
        assert_eq!(err.section, Section::Unknown);
        assert_eq!(err.cause.as_deref(), Some("Parse error: expected value"));
    }

    #[test]
    fn test_http_status_error_goes_through_status_mapping() {
        let err = LoginError::from(&ApiError::HttpStatus {
            status: 404,
            message: "Not Found".to_string(),
        });
        assert_eq!(err, LoginError::from_status(404, "Not Found"));
        assert_eq!(err.to_string(), "Nextcloud News not found on the server");
    }

    proptest! {
        #[test]
        fn prop_from_status_is_deterministic(code in 100u16..600, msg in "[a-zA-Z ]{0,20}") {
            prop_assert_eq!(
                LoginError::from_status(code, &msg),
                LoginError::from_status(code, &msg)
            );
        }

        #[test]
        fn prop_unlisted_codes_embed_code_and_message(code in 100u16..600, msg in "[a-zA-Z ]{0,20}") {
            prop_assume!(![401, 403, 404, 405].contains(&code));
            let err = LoginError::from_status(code, &msg);
            prop_assert_eq!(err.section, Section::None);
            prop_assert_eq!(err.message, format!("HTTP error {}: {}", code, msg));
        }
    }
}
