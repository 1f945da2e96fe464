use crate::config::Credentials;
use base64::{engine::general_purpose, Engine as _};

/// Decides whether a client presented the shared credential.
pub trait CredentialValidator: Send + Sync {
    /// Check a username/password pair.
    fn validate(&self, username: &str, password: &str) -> bool;

    /// Check an `Authorization: Basic ...` header value.
    fn validate_header(&self, header: &str) -> bool {
        match parse_basic_auth(header) {
            Some((username, password)) => self.validate(&username, &password),
            None => false,
        }
    }
}

/// Validator backed by the configured credential.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl CredentialValidator for StaticCredentials {
    fn validate(&self, username: &str, password: &str) -> bool {
        username == self.credentials.username && password == self.credentials.password
    }
}

/// Split a `Basic` authorization header into username and password.
///
/// The password may itself contain `:`.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.trim().strip_prefix("Basic ")?.trim();
    let decoded = general_purpose::STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Build a `Basic` authorization header value.
pub fn encode_basic_auth(username: &str, password: &str) -> String {
    let token = general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {token}")
}
