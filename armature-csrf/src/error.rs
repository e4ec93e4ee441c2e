//! Error types for CSRF protection

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Response, StatusCode, header};
use std::fmt;
use thiserror::Error;

/// Result type for CSRF operations
pub type Result<T> = std::result::Result<T, CsrfError>;

/// Why a request failed verification.
///
/// A malformed canonical token is reported as [`Rejection::MissingCanonical`],
/// since storage treats it as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No valid canonical token in storage
    MissingCanonical,
    /// The request did not carry a token
    MissingPresented,
    /// Both tokens exist but differ
    Mismatch,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::MissingCanonical => "missing canonical token",
            Rejection::MissingPresented => "missing request token",
            Rejection::Mismatch => "token mismatch",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum CsrfError {
    /// Invalid setup; raised while building, never per request
    #[error("CSRF configuration error: {0}")]
    Configuration(String),

    /// Verification failed and the error renderer raises
    #[error("CSRF verification failed: {rejection}")]
    Rejected {
        status: StatusCode,
        rejection: Rejection,
    },

    #[error("CSRF protection is not installed on this request context")]
    NotInstalled,

    #[error("A different CSRF protection is already installed on this request context")]
    ProtectionConflict,

    #[error("No session is attached to the request context")]
    SessionUnavailable,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// Error returned by an application handler.
    ///
    /// `headers` are sent with the rendered response; a protected handler's
    /// pending token cookies are added here.
    #[error("HTTP error {status}: {message}")]
    Http {
        status: StatusCode,
        message: String,
        headers: HeaderMap,
    },
}

impl CsrfError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a session backend error
    pub fn session<S: Into<String>>(msg: S) -> Self {
        Self::Session(msg.into())
    }

    /// Create a handler error with the given status
    pub fn http<S: Into<String>>(status: StatusCode, msg: S) -> Self {
        Self::Http {
            status,
            message: msg.into(),
            headers: HeaderMap::new(),
        }
    }

    /// The default raised failure: 403 Forbidden
    pub fn forbidden(rejection: Rejection) -> Self {
        Self::Rejected {
            status: StatusCode::FORBIDDEN,
            rejection,
        }
    }

    /// Check if this error is a failed verification
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Get the rejection reason if this is a failed verification
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Rejected { rejection, .. } => Some(*rejection),
            _ => None,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Rejected { status, .. } | Self::Http { status, .. } => *status,
            Self::Configuration(_)
            | Self::NotInstalled
            | Self::ProtectionConflict
            | Self::SessionUnavailable
            | Self::Session(_)
            | Self::InvalidHeader(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render this error as a plain-text response.
    ///
    /// Server-side failures are rendered without detail.
    pub fn into_response(mut self) -> Response<Bytes> {
        let status = self.status_code();
        let extra_headers = match &mut self {
            Self::Http { headers, .. } => std::mem::take(headers),
            _ => HeaderMap::new(),
        };
        let body = if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        } else {
            self.to_string()
        };

        let mut response = Response::new(Bytes::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        for (name, value) in &extra_headers {
            response.headers_mut().append(name, value.clone());
        }
        response
    }
}
