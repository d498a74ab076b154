use thiserror::Error;

/// Type alias for Result with TriageError
pub type Result<T> = std::result::Result<T, TriageError>;

/// Error types for the internship triage pipeline
#[derive(Error, Debug)]
pub enum TriageError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed or the credential was rejected (401)
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400) - validation-class failure on a mutating call
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Label-related errors
    #[error("Label error: {0}")]
    LabelError(String),

    /// Evaluation service failure (non-success status, transport error)
    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    /// Processed-record store errors
    #[error("Store error: {0}")]
    StoreError(#[from] rusqlite::Error),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl TriageError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TriageError::RateLimitExceeded { .. }
                | TriageError::ServerError { .. }
                | TriageError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Check if the remote rejected the credential (triggers a refresh attempt)
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TriageError::AuthError(_))
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns the number of seconds to wait. If the header is missing or invalid,
/// returns a default of 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            // Try to parse as integer (delay-seconds format)
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            // Try to parse as HTTP date format
            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for TriageError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            // HTTP response with status code (non-success responses)
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    // Rate limiting - transient
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        TriageError::RateLimitExceeded { retry_after }
                    }
                    // Expired or rejected credential
                    401 => TriageError::AuthError(message),
                    // Not found
                    404 => TriageError::MessageNotFound("Resource not found".to_string()),
                    // Bad request
                    400 => TriageError::BadRequest(message),
                    // Forbidden
                    403 => TriageError::Forbidden(message),
                    // Server errors - transient
                    500..=599 => TriageError::ServerError {
                        status: status_code,
                        message,
                    },
                    // Other non-success status codes
                    _ => TriageError::ApiError(message),
                }
            }
            // BadRequest variant (request not understood by server)
            google_gmail1::Error::BadRequest(ref err) => TriageError::BadRequest(format!("{}", err)),
            // Network/connection errors - transient
            google_gmail1::Error::HttpError(ref err) => {
                TriageError::NetworkError(format!("Connection error: {}", err))
            }
            // IO errors - transient
            google_gmail1::Error::Io(err) => TriageError::NetworkError(err.to_string()),
            // All other errors
            _ => TriageError::ApiError(error.to_string()),
        }
    }
}

impl From<reqwest::Error> for TriageError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            TriageError::NetworkError(error.to_string())
        } else {
            TriageError::EvaluationError(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let rate_limit = TriageError::RateLimitExceeded { retry_after: 5 };
        assert!(rate_limit.is_transient());
        assert!(!rate_limit.is_permanent());

        let server_error = TriageError::ServerError {
            status: 503,
            message: "Service unavailable".to_string(),
        };
        assert!(server_error.is_transient());

        let network_error = TriageError::NetworkError("Connection timeout".to_string());
        assert!(network_error.is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        let bad_request = TriageError::BadRequest("Invalid label id".to_string());
        assert!(bad_request.is_permanent());
        assert!(!bad_request.is_transient());

        let not_found = TriageError::MessageNotFound("msg123".to_string());
        assert!(not_found.is_permanent());

        let forbidden = TriageError::Forbidden("Access denied".to_string());
        assert!(forbidden.is_permanent());
    }

    #[test]
    fn test_unauthorized_detection() {
        let auth = TriageError::AuthError("HTTP 401: Unauthorized".to_string());
        assert!(auth.is_unauthorized());

        let forbidden = TriageError::Forbidden("HTTP 403".to_string());
        assert!(!forbidden.is_unauthorized());

        let bad_request = TriageError::BadRequest("HTTP 400".to_string());
        assert!(!bad_request.is_unauthorized());
    }

    #[test]
    fn test_error_display() {
        let error = TriageError::RateLimitExceeded { retry_after: 10 };
        let display = format!("{}", error);
        assert!(display.contains("Rate limit exceeded"));
        assert!(display.contains("10 seconds"));

        let auth_error = TriageError::AuthError("Invalid token".to_string());
        let display = format!("{}", auth_error);
        assert!(display.contains("Authentication failed"));
    }

    #[test]
    fn test_parse_retry_after_header_integer() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_static("120"),
        );

        let retry_after = parse_retry_after_header(&response);
        assert_eq!(retry_after, 120);
    }

    #[test]
    fn test_parse_retry_after_header_missing() {
        let response = hyper::Response::builder().status(429).body(()).unwrap();

        let retry_after = parse_retry_after_header(&response);
        assert_eq!(retry_after, 5); // Default value
    }

    #[test]
    fn test_parse_retry_after_header_invalid() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_static("invalid"),
        );

        let retry_after = parse_retry_after_header(&response);
        assert_eq!(retry_after, 5); // Default value
    }

    #[test]
    fn test_parse_retry_after_header_http_date() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();

        // Create a date 60 seconds in the future
        let future_time = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        let http_date = httpdate::fmt_http_date(future_time);

        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_str(&http_date).unwrap(),
        );

        let retry_after = parse_retry_after_header(&response);
        assert!(
            retry_after >= 59 && retry_after <= 61,
            "Expected ~60, got {}",
            retry_after
        );
    }
}
