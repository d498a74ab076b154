//! OAuth2 authentication and the credential-provider interface
//!
//! Token storage and refresh semantics are yup-oauth2's concern; the rest of
//! the pipeline only sees [`CredentialProvider`]: "give me a currently-valid
//! access credential, or refresh it on demand".

use async_trait::async_trait;
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::Path;
use tracing::warn;

use crate::error::{Result, TriageError};

/// Gmail API scopes required for triage: message read/modify and label
/// management. No settings or permanent-delete access.
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
];

/// HTTPS connector used by both the Gmail hub and the authenticator
pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<HttpsConnector>;

type GmailAuthenticator = yup_oauth2::authenticator::Authenticator<HttpsConnector>;

/// Supplies a valid access credential, transparently refreshing when expired
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns a currently-valid access token, or None when no credential is
    /// available (e.g. the OAuth flow has never been completed). A None here
    /// means "skip the poll cycle", not an error.
    async fn access_token(&self) -> Result<Option<String>>;

    /// Force a refresh after the remote rejected the credential
    async fn refresh(&self) -> Result<()>;
}

/// Production credential provider backed by the yup-oauth2 authenticator.
/// Shares the on-disk token cache with the Gmail hub.
pub struct GmailCredentialProvider {
    auth: GmailAuthenticator,
}

#[async_trait]
impl CredentialProvider for GmailCredentialProvider {
    async fn access_token(&self) -> Result<Option<String>> {
        match self.auth.token(REQUIRED_SCOPES).await {
            Ok(token) => Ok(token.token().map(str::to_string)),
            Err(e) => {
                warn!("No valid access token available: {}", e);
                Ok(None)
            }
        }
    }

    async fn refresh(&self) -> Result<()> {
        self.auth
            .force_refreshed_token(REQUIRED_SCOPES)
            .await
            .map_err(|e| TriageError::AuthError(format!("Failed to refresh token: {}", e)))?;
        Ok(())
    }
}

/// Initialize the Gmail hub and matching credential provider with OAuth2
///
/// Sets up:
/// - OAuth2 authentication using InstalledFlow (desktop app flow)
/// - Token persistence to disk for automatic refresh
/// - HTTP/1 client with TLS support
///
/// # Arguments
/// * `credentials_path` - Path to the OAuth2 credentials JSON file
/// * `token_cache_path` - Path where access tokens will be cached
pub async fn initialize(
    credentials_path: &Path,
    token_cache_path: &Path,
) -> Result<(GmailHub, GmailCredentialProvider)> {
    // Read OAuth2 credentials
    let secret = yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| TriageError::AuthError(format!("Failed to read credentials: {}", e)))?;

    // Build authenticator with token persistence
    // HTTPRedirect opens a browser for user authorization
    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| TriageError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Pre-authenticate so the token is cached with the correct scopes
    let _token = auth
        .token(REQUIRED_SCOPES)
        .await
        .map_err(|e| TriageError::AuthError(format!("Failed to obtain token: {}", e)))?;

    // Configure HTTP client with TLS
    // Use HTTP/1 for compatibility (HTTP/2 is default but HTTP/1 works better with google-gmail1)
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| TriageError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    // The authenticator is internally reference-counted; the hub and the
    // credential provider share the same token cache.
    let provider = GmailCredentialProvider { auth: auth.clone() };

    Ok((Gmail::new(client, auth), provider))
}

/// Secure token file permissions on Unix systems
///
/// Sets file permissions to 0600 (read/write for owner only)
/// to prevent unauthorized access to OAuth2 tokens
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600); // Read/write for owner only
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Secure token file on Windows (stub implementation)
///
/// Windows uses ACLs instead of Unix permissions
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_secure_token_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "test content")
            .await
            .unwrap();

        secure_token_file(temp_file.path()).await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = tokio::fs::metadata(temp_file.path()).await.unwrap();
            let perms = metadata.permissions();
            assert_eq!(perms.mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn test_scopes_constants() {
        assert_eq!(REQUIRED_SCOPES.len(), 2);
        assert!(REQUIRED_SCOPES.contains(&"https://www.googleapis.com/auth/gmail.modify"));
        assert!(REQUIRED_SCOPES.contains(&"https://www.googleapis.com/auth/gmail.labels"));
    }
}
