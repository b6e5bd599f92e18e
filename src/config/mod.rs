//! Delivery configuration.
//!
//! [`DeliveryConfig`] is resolved from the process environment (see [`env`]
//! for the variable names) or assembled with [`DeliveryConfigBuilder`]. Once
//! built it is immutable and validated: host, username and secret are present,
//! the port is non-zero and the TLS choice has been made.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::errors::{SmtpError, SmtpResult};

/// Default port (SMTPS with implicit TLS).
pub const DEFAULT_PORT: u16 = 465;

/// Port on which implicit TLS is assumed when no explicit flag is set.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Default timeout for TCP connect plus any TLS handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for each command/reply exchange after connecting.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default display name for the From header.
pub const DEFAULT_FROM_NAME: &str = "Sender";

/// Default EHLO identity.
pub const DEFAULT_HELO_NAME: &str = "localhost";

/// Environment variable names.
pub mod env {
    /// Relay hostname (required).
    pub const SMTP_HOST: &str = "SMTP_HOST";
    /// Relay port.
    pub const SMTP_PORT: &str = "SMTP_PORT";
    /// `true` for implicit TLS; anything else disables it.
    pub const SMTP_SECURE: &str = "SMTP_SECURE";
    /// Login username (required).
    pub const SMTP_USER: &str = "SMTP_USER";
    /// Login secret, usually an app password (required).
    pub const SMTP_PASS: &str = "SMTP_PASS";
    /// Display name for the From header.
    pub const DEFAULT_FROM_NAME: &str = "DEFAULT_FROM_NAME";
    /// Envelope sender and From address.
    pub const DEFAULT_FROM_EMAIL: &str = "DEFAULT_FROM_EMAIL";
    /// Connect timeout, humantime syntax (`10s`, `1m`).
    pub const SMTP_CONNECT_TIMEOUT: &str = "SMTP_CONNECT_TIMEOUT";
    /// Per-command timeout, humantime syntax.
    pub const SMTP_COMMAND_TIMEOUT: &str = "SMTP_COMMAND_TIMEOUT";
    /// EHLO identity.
    pub const SMTP_HELO_NAME: &str = "SMTP_HELO_NAME";
    /// PEM file with extra trust anchors.
    pub const SMTP_CA_CERT: &str = "SMTP_CA_CERT";
}

/// Parameters for one delivery.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Relay hostname.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Use implicit TLS; otherwise plaintext with opportunistic STARTTLS.
    pub secure: bool,
    /// Login username.
    pub username: String,
    /// Login secret.
    pub password: SecretString,
    /// Display name for the From header.
    pub from_name: String,
    /// Envelope sender and From address.
    pub from_address: String,
    /// Bound on TCP connect plus TLS handshake.
    pub connect_timeout: Duration,
    /// Bound on each command/reply exchange.
    pub command_timeout: Duration,
    /// EHLO identity.
    pub helo_name: String,
    /// Extra trust anchors for the relay's certificate.
    pub ca_cert_path: Option<PathBuf>,
}

impl DeliveryConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> DeliveryConfigBuilder {
        DeliveryConfigBuilder::default()
    }

    /// Resolves the configuration from the process environment.
    pub fn from_env() -> SmtpResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves the configuration through `lookup`, which maps a variable
    /// name to its value.
    ///
    /// Empty values are treated as unset, except `SMTP_SECURE`, which is an
    /// explicit flag whenever present. Missing host, username or secret
    /// yields a `MissingCredentials` error naming every absent variable.
    pub fn from_lookup<F>(lookup: F) -> SmtpResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let trimmed = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = trimmed(env::SMTP_HOST);
        let username = trimmed(env::SMTP_USER);
        let password = lookup(env::SMTP_PASS).filter(|v| !v.is_empty());

        let missing: Vec<&str> = [
            (env::SMTP_HOST, host.is_none()),
            (env::SMTP_USER, username.is_none()),
            (env::SMTP_PASS, password.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        let (Some(host), Some(username), Some(password)) = (host, username, password) else {
            return Err(SmtpError::missing_credentials(format!(
                "{} not set",
                missing.join(", ")
            )));
        };

        let mut builder = Self::builder()
            .host(host)
            .credentials(username, password);

        if let Some(port) = trimmed(env::SMTP_PORT) {
            let port = port.parse::<u16>().map_err(|e| {
                SmtpError::configuration(format!("{} is not a valid port: {}", env::SMTP_PORT, port))
                    .with_cause(e)
            })?;
            builder = builder.port(port);
        }

        // Set but empty still counts as an explicit flag.
        if let Some(secure) = lookup(env::SMTP_SECURE) {
            builder = builder.secure(secure.trim().eq_ignore_ascii_case("true"));
        }

        if let Some(name) = trimmed(env::DEFAULT_FROM_NAME) {
            builder = builder.from_name(name);
        }

        if let Some(address) = trimmed(env::DEFAULT_FROM_EMAIL) {
            builder = builder.from_address(address);
        }

        if let Some(value) = trimmed(env::SMTP_CONNECT_TIMEOUT) {
            builder = builder.connect_timeout(parse_duration(env::SMTP_CONNECT_TIMEOUT, &value)?);
        }

        if let Some(value) = trimmed(env::SMTP_COMMAND_TIMEOUT) {
            builder = builder.command_timeout(parse_duration(env::SMTP_COMMAND_TIMEOUT, &value)?);
        }

        if let Some(name) = trimmed(env::SMTP_HELO_NAME) {
            builder = builder.helo_name(name);
        }

        if let Some(path) = trimmed(env::SMTP_CA_CERT) {
            builder = builder.ca_cert_path(path);
        }

        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        let missing: Vec<&str> = [
            (env::SMTP_HOST, self.host.trim().is_empty()),
            (env::SMTP_USER, self.username.trim().is_empty()),
            (env::SMTP_PASS, self.password.expose_secret().is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(SmtpError::missing_credentials(format!(
                "{} not set",
                missing.join(", ")
            )));
        }

        if self.port == 0 {
            return Err(SmtpError::configuration("Port must be non-zero"));
        }

        if self.connect_timeout.is_zero() || self.command_timeout.is_zero() {
            return Err(SmtpError::configuration("Timeouts must be non-zero"));
        }

        for (name, value) in [
            ("host", &self.host),
            ("from name", &self.from_name),
            ("from address", &self.from_address),
            ("HELO name", &self.helo_name),
        ] {
            if value.chars().any(|c| c.is_control()) {
                return Err(SmtpError::configuration(format!(
                    "The {} contains control characters",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Returns the relay address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`DeliveryConfig`].
#[derive(Debug, Default)]
pub struct DeliveryConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    secure: Option<bool>,
    username: Option<String>,
    password: Option<SecretString>,
    from_name: Option<String>,
    from_address: Option<String>,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    helo_name: Option<String>,
    ca_cert_path: Option<PathBuf>,
}

impl DeliveryConfigBuilder {
    /// Sets the relay host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the relay port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Forces implicit TLS on or off instead of inferring it from the port.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Sets login credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the From display name.
    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    /// Sets the envelope sender and From address.
    pub fn from_address(mut self, address: impl Into<String>) -> Self {
        self.from_address = Some(address.into());
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the per-command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Sets the EHLO identity.
    pub fn helo_name(mut self, name: impl Into<String>) -> Self {
        self.helo_name = Some(name.into());
        self
    }

    /// Adds trust anchors from a PEM file.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> SmtpResult<DeliveryConfig> {
        let port = self.port.unwrap_or(DEFAULT_PORT);
        let username = self.username.unwrap_or_default();

        let config = DeliveryConfig {
            host: self.host.unwrap_or_default(),
            port,
            secure: self.secure.unwrap_or(port == IMPLICIT_TLS_PORT),
            from_address: self.from_address.unwrap_or_else(|| username.clone()),
            username,
            password: self.password.unwrap_or_else(|| SecretString::new(String::new())),
            from_name: self
                .from_name
                .unwrap_or_else(|| DEFAULT_FROM_NAME.to_string()),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            command_timeout: self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            helo_name: self
                .helo_name
                .unwrap_or_else(|| DEFAULT_HELO_NAME.to_string()),
            ca_cert_path: self.ca_cert_path,
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_duration(name: &str, value: &str) -> SmtpResult<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        SmtpError::configuration(format!("{} is not a valid duration: {}", name, value))
            .with_cause(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SmtpErrorKind;
    use rstest::rstest;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> SmtpResult<DeliveryConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DeliveryConfig::from_lookup(|name| map.get(name).cloned())
    }

    const BASE: [(&str, &str); 3] = [
        ("SMTP_HOST", "smtp.example.com"),
        ("SMTP_USER", "user@example.com"),
        ("SMTP_PASS", "app-password"),
    ];

    #[test]
    fn test_config_defaults() {
        let config = resolve(&BASE).unwrap();

        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.secure);
        assert_eq!(config.username, "user@example.com");
        assert_eq!(config.password.expose_secret(), "app-password");
        assert_eq!(config.from_name, "Sender");
        assert_eq!(config.from_address, "user@example.com");
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(config.helo_name, "localhost");
        assert!(config.ca_cert_path.is_none());
    }

    #[rstest]
    #[case(Some("465"), None, true)]
    #[case(Some("587"), None, false)]
    #[case(Some("25"), None, false)]
    #[case(None, None, true)]
    #[case(Some("587"), Some("true"), true)]
    #[case(Some("587"), Some("TRUE"), true)]
    #[case(Some("465"), Some("false"), false)]
    #[case(Some("465"), Some("yes"), false)]
    #[case(Some("465"), Some(""), false)]
    #[case(None, Some(" "), false)]
    fn test_secure_inference(
        #[case] port: Option<&str>,
        #[case] secure: Option<&str>,
        #[case] expected: bool,
    ) {
        let mut vars = BASE.to_vec();
        if let Some(port) = port {
            vars.push(("SMTP_PORT", port));
        }
        if let Some(secure) = secure {
            vars.push(("SMTP_SECURE", secure));
        }
        assert_eq!(resolve(&vars).unwrap().secure, expected);
    }

    #[test]
    fn test_missing_credentials_names_every_variable() {
        let err = resolve(&[("SMTP_HOST", "smtp.example.com")]).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::MissingCredentials);
        assert!(err.message().contains("SMTP_USER"));
        assert!(err.message().contains("SMTP_PASS"));
        assert!(!err.message().contains("SMTP_HOST"));

        let err = resolve(&[]).unwrap_err();
        assert!(err.message().contains("SMTP_HOST"));
    }

    #[test]
    fn test_empty_values_count_as_missing() {
        let err = resolve(&[
            ("SMTP_HOST", "  "),
            ("SMTP_USER", "user"),
            ("SMTP_PASS", ""),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::MissingCredentials);
        assert!(err.message().contains("SMTP_HOST"));
        assert!(err.message().contains("SMTP_PASS"));
    }

    #[test]
    fn test_sender_overrides() {
        let mut vars = BASE.to_vec();
        vars.push(("DEFAULT_FROM_NAME", "Reports Bot"));
        vars.push(("DEFAULT_FROM_EMAIL", "reports@example.com"));
        vars.push(("SMTP_HELO_NAME", "mailer.example.com"));
        let config = resolve(&vars).unwrap();

        assert_eq!(config.from_name, "Reports Bot");
        assert_eq!(config.from_address, "reports@example.com");
        assert_eq!(config.username, "user@example.com");
        assert_eq!(config.helo_name, "mailer.example.com");
    }

    #[test]
    fn test_empty_sender_falls_back() {
        let mut vars = BASE.to_vec();
        vars.push(("DEFAULT_FROM_NAME", ""));
        vars.push(("DEFAULT_FROM_EMAIL", ""));
        let config = resolve(&vars).unwrap();

        assert_eq!(config.from_name, "Sender");
        assert_eq!(config.from_address, "user@example.com");
    }

    #[rstest]
    #[case("SMTP_PORT", "not-a-port")]
    #[case("SMTP_PORT", "70000")]
    #[case("SMTP_PORT", "0")]
    #[case("SMTP_CONNECT_TIMEOUT", "soon")]
    #[case("SMTP_COMMAND_TIMEOUT", "0s")]
    fn test_invalid_values(#[case] name: &str, #[case] value: &str) {
        let mut vars = BASE.to_vec();
        vars.push((name, value));
        let err = resolve(&vars).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConfigurationInvalid);
    }

    #[test]
    fn test_timeouts_parse_humantime() {
        let mut vars = BASE.to_vec();
        vars.push(("SMTP_CONNECT_TIMEOUT", "3s"));
        vars.push(("SMTP_COMMAND_TIMEOUT", "2m"));
        let config = resolve(&vars).unwrap();

        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.command_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_builder_validation() {
        let err = DeliveryConfig::builder()
            .host("smtp.example.com")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::MissingCredentials);

        let err = DeliveryConfig::builder()
            .host("smtp.example.com")
            .credentials("user", "pass")
            .from_name("Evil\r\nBcc: victim@example.com")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConfigurationInvalid);

        let config = DeliveryConfig::builder()
            .host("smtp.example.com")
            .port(587)
            .credentials("user", "pass")
            .build()
            .unwrap();
        assert!(!config.secure);
        assert_eq!(config.address(), "smtp.example.com:587");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = resolve(&BASE).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("app-password"));
    }
}
