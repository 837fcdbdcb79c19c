//! Credentials and the credential provider trait.
//!
//! A [`CredentialProvider`] is asked for [`Credentials`] once per signed
//! request. Implementations that talk to a remote credential source are
//! expected to cache internally; the signer never holds on to credentials
//! between requests.

use std::fmt;

use async_trait::async_trait;

use crate::error::SigningError;

/// A resolved set of AWS credentials.
///
/// The secret key and session token are redacted from the `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    /// Create credentials from an access key pair and an optional session token.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// The access key ID.
    #[must_use]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// The secret access key.
    #[must_use]
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// The session token for temporary credentials, if any.
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "** redacted **"),
            )
            .finish()
    }
}

/// Trait for resolving the credentials used to sign a request.
///
/// Implementations may read static configuration, a shared credentials file,
/// or a remote identity service.
#[async_trait]
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// Resolve the credentials to sign the next request with.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::CredentialsUnavailable`] if no credentials can be produced.
    async fn credentials(&self) -> Result<Credentials, SigningError>;
}

/// A credential provider that always returns the same credentials.
///
/// # Examples
///
/// ```
/// use objstore_auth::credentials::{Credentials, StaticCredentialProvider};
///
/// let provider = StaticCredentialProvider::new(Credentials::new("AKID", "secret", None));
/// ```
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    /// Create a provider that always yields `credentials`.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credentials(&self) -> Result<Credentials, SigningError> {
        Ok(self.credentials.clone())
    }
}
