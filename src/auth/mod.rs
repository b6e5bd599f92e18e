//! Authentication mechanisms for SMTP.
//!
//! Supports the password-based methods relays offer for submission:
//! - PLAIN (RFC 4616)
//! - LOGIN (obsolete but widely used)
//! - CRAM-MD5 (RFC 2195)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::DeliveryConfig;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Authentication methods supported by the mailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication (obsolete).
    Login,
    /// CRAM-MD5 challenge-response.
    CramMd5,
}

impl AuthMethod {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
            AuthMethod::CramMd5 => "CRAM-MD5",
        }
    }

    /// Returns the priority for auto-selection (higher is better).
    pub fn priority(&self) -> u8 {
        match self {
            AuthMethod::CramMd5 => 3,
            AuthMethod::Plain => 2,
            AuthMethod::Login => 1,
        }
    }

    /// Parses from SMTP capability string.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            "CRAM-MD5" => Some(AuthMethod::CramMd5),
            _ => None,
        }
    }

    /// Returns true if this method sends the secret in a recoverable form.
    pub fn exposes_secret(&self) -> bool {
        matches!(self, AuthMethod::Plain | AuthMethod::Login)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Username and secret for SMTP AUTH.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password (protected).
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Takes the credentials from a delivery configuration.
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Encodings for each authentication exchange.
pub struct Authenticator;

impl Authenticator {
    /// Generates the initial response for PLAIN authentication.
    pub fn plain_initial_response(credentials: &Credentials) -> String {
        // \0username\0password
        let response = format!(
            "\0{}\0{}",
            credentials.username,
            credentials.password.expose_secret()
        );
        BASE64.encode(response)
    }

    /// Generates LOGIN username response.
    pub fn login_username(credentials: &Credentials) -> String {
        BASE64.encode(&credentials.username)
    }

    /// Generates LOGIN password response.
    pub fn login_password(credentials: &Credentials) -> String {
        BASE64.encode(credentials.password.expose_secret())
    }

    /// Generates CRAM-MD5 response to a base64 challenge.
    pub fn cram_md5_response(challenge: &str, credentials: &Credentials) -> SmtpResult<String> {
        let challenge_bytes = BASE64.decode(challenge.trim()).map_err(|e| {
            SmtpError::protocol(format!("Invalid CRAM-MD5 challenge: {}", e)).with_cause(e)
        })?;

        type HmacMd5 = Hmac<Md5>;
        let mut mac = HmacMd5::new_from_slice(credentials.password.expose_secret().as_bytes())
            .map_err(|e| SmtpError::new(SmtpErrorKind::Unknown, format!("HMAC error: {}", e)))?;
        mac.update(&challenge_bytes);
        let digest = mac.finalize().into_bytes();

        // username space hex-digest
        let hex_digest: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(BASE64.encode(format!("{} {}", credentials.username, hex_digest)))
    }

    /// Selects the highest-priority method the server advertises.
    pub fn select_best_method(available: &[AuthMethod]) -> SmtpResult<AuthMethod> {
        available
            .iter()
            .copied()
            .max_by_key(AuthMethod::priority)
            .ok_or_else(|| {
                SmtpError::new(
                    SmtpErrorKind::AuthMethodNotSupported,
                    "Server advertises no supported authentication method",
                )
            })
    }
}
