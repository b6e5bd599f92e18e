//! Error types for the mail tool.
//!
//! Every failure inside a send is an [`SmtpError`] tagged with an
//! [`SmtpErrorKind`]. Kinds collapse into the coarse [`SendFailure`]
//! classification that operators see in the log stream and that the tool
//! boundary turns into a boolean.

use std::fmt;
use thiserror::Error;

/// Result type for mail operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    // Configuration errors
    /// Host, username or secret is not configured.
    MissingCredentials,
    /// A configuration value could not be parsed or is out of range.
    ConfigurationInvalid,

    // Request errors
    /// The request names no recipients.
    EmptyRecipientList,
    /// A recipient address is malformed.
    InvalidRecipientAddress,

    // Connection errors
    /// DNS resolution failed.
    DnsResolution,
    /// Connection was refused.
    ConnectionRefused,
    /// Network is unreachable.
    NetworkUnreachable,
    /// Connect (or the TLS handshake that is part of it) timed out.
    ConnectTimeout,
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// Server greeting was not a 2xx reply.
    GreetingRejected,
    /// Connection was reset or closed by the server.
    ConnectionReset,

    // Authentication errors
    /// Credentials were rejected.
    CredentialsInvalid,
    /// Server offers no authentication mechanism we can use.
    AuthMethodNotSupported,

    // Protocol errors
    /// Malformed reply from server.
    InvalidResponse,
    /// Reply code did not match what the command expects.
    UnexpectedResponse,
    /// Server is shutting down (421).
    ServerShutdown,
    /// Envelope sender was refused.
    SenderRejected,
    /// Every envelope recipient was refused.
    RecipientsRejected,
    /// Message exceeds the server's size limit.
    MessageTooLarge,
    /// Read timed out.
    ReadTimeout,
    /// Write timed out.
    WriteTimeout,

    // Message errors
    /// Header could not be rendered.
    InvalidHeader,

    // Generic
    /// Unknown or internal error.
    Unknown,
}

impl SmtpErrorKind {
    /// Returns the send-level classification for this kind.
    pub fn failure(&self) -> SendFailure {
        match self {
            SmtpErrorKind::MissingCredentials => SendFailure::MissingCredentials,
            SmtpErrorKind::ConfigurationInvalid => SendFailure::InvalidConfiguration,

            SmtpErrorKind::EmptyRecipientList => SendFailure::EmptyRecipientList,
            SmtpErrorKind::InvalidRecipientAddress => SendFailure::InvalidRecipient,

            SmtpErrorKind::DnsResolution
            | SmtpErrorKind::ConnectionRefused
            | SmtpErrorKind::NetworkUnreachable
            | SmtpErrorKind::ConnectTimeout
            | SmtpErrorKind::TlsHandshakeFailed
            | SmtpErrorKind::GreetingRejected => SendFailure::TransportConnectFailed,

            SmtpErrorKind::CredentialsInvalid => SendFailure::AuthenticationFailed,

            SmtpErrorKind::ConnectionReset
            | SmtpErrorKind::AuthMethodNotSupported
            | SmtpErrorKind::InvalidResponse
            | SmtpErrorKind::UnexpectedResponse
            | SmtpErrorKind::ServerShutdown
            | SmtpErrorKind::SenderRejected
            | SmtpErrorKind::RecipientsRejected
            | SmtpErrorKind::MessageTooLarge
            | SmtpErrorKind::ReadTimeout
            | SmtpErrorKind::WriteTimeout => SendFailure::TransportProtocolError,

            SmtpErrorKind::InvalidHeader | SmtpErrorKind::Unknown => SendFailure::UnexpectedError,
        }
    }
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpErrorKind::MissingCredentials => write!(f, "Missing credentials"),
            SmtpErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
            SmtpErrorKind::EmptyRecipientList => write!(f, "Empty recipient list"),
            SmtpErrorKind::InvalidRecipientAddress => write!(f, "Invalid recipient address"),
            SmtpErrorKind::DnsResolution => write!(f, "DNS resolution failed"),
            SmtpErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            SmtpErrorKind::NetworkUnreachable => write!(f, "Network unreachable"),
            SmtpErrorKind::ConnectTimeout => write!(f, "Connect timeout"),
            SmtpErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            SmtpErrorKind::GreetingRejected => write!(f, "Greeting rejected"),
            SmtpErrorKind::ConnectionReset => write!(f, "Connection reset"),
            SmtpErrorKind::CredentialsInvalid => write!(f, "Invalid credentials"),
            SmtpErrorKind::AuthMethodNotSupported => write!(f, "Auth method not supported"),
            SmtpErrorKind::InvalidResponse => write!(f, "Invalid server response"),
            SmtpErrorKind::UnexpectedResponse => write!(f, "Unexpected response"),
            SmtpErrorKind::ServerShutdown => write!(f, "Server shutting down"),
            SmtpErrorKind::SenderRejected => write!(f, "Sender rejected"),
            SmtpErrorKind::RecipientsRejected => write!(f, "All recipients rejected"),
            SmtpErrorKind::MessageTooLarge => write!(f, "Message too large"),
            SmtpErrorKind::ReadTimeout => write!(f, "Read timeout"),
            SmtpErrorKind::WriteTimeout => write!(f, "Write timeout"),
            SmtpErrorKind::InvalidHeader => write!(f, "Invalid header"),
            SmtpErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Send-level failure classification.
///
/// This is the taxonomy operators reason about. Attachment problems are not
/// part of it; they degrade the message instead of failing the send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendFailure {
    /// Host, username or secret missing from configuration.
    MissingCredentials,
    /// A configuration value is malformed.
    InvalidConfiguration,
    /// No recipients were given.
    EmptyRecipientList,
    /// A recipient address is malformed.
    InvalidRecipient,
    /// The relay rejected the credentials.
    AuthenticationFailed,
    /// The relay could not be reached or the secure channel not established.
    TransportConnectFailed,
    /// A fault during the SMTP dialogue.
    TransportProtocolError,
    /// Anything else.
    UnexpectedError,
}

impl SendFailure {
    /// Returns true if this failure was detected before any network activity.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            SendFailure::MissingCredentials
                | SendFailure::InvalidConfiguration
                | SendFailure::EmptyRecipientList
                | SendFailure::InvalidRecipient
        )
    }

    /// Returns an operator-facing remediation hint.
    pub fn hint(&self) -> &'static str {
        match self {
            SendFailure::MissingCredentials => "set SMTP_HOST, SMTP_USER and SMTP_PASS",
            SendFailure::InvalidConfiguration => {
                "check SMTP_PORT and the SMTP_*_TIMEOUT values"
            }
            SendFailure::EmptyRecipientList => "pass at least one recipient in to_emails",
            SendFailure::InvalidRecipient => "check the addresses in to_emails",
            SendFailure::AuthenticationFailed => {
                "check SMTP_USER and SMTP_PASS (some providers require an app password)"
            }
            SendFailure::TransportConnectFailed => {
                "check SMTP_HOST, SMTP_PORT, SMTP_SECURE and any firewall in between"
            }
            SendFailure::TransportProtocolError => "the relay refused or aborted the transaction",
            SendFailure::UnexpectedError => "see the error details above",
        }
    }
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendFailure::MissingCredentials => "MissingCredentials",
            SendFailure::InvalidConfiguration => "InvalidConfiguration",
            SendFailure::EmptyRecipientList => "EmptyRecipientList",
            SendFailure::InvalidRecipient => "InvalidRecipient",
            SendFailure::AuthenticationFailed => "AuthenticationFailed",
            SendFailure::TransportConnectFailed => "TransportConnectFailed",
            SendFailure::TransportProtocolError => "TransportProtocolError",
            SendFailure::UnexpectedError => "UnexpectedError",
        };
        f.write_str(name)
    }
}

/// Enhanced SMTP status code (RFC 3463).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 7=security).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Creates a new enhanced status code.
    pub fn new(class: u8, subject: u16, detail: u16) -> Self {
        Self { class, subject, detail }
    }

    /// Parses an enhanced status code from a string (e.g., "5.7.8").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let class = parts.next()?.parse().ok()?;
        let subject = parts.next()?.parse().ok()?;
        let detail = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !matches!(class, 2 | 4 | 5) {
            return None;
        }
        Some(Self { class, subject, detail })
    }

    /// Returns true if this is a permanent failure.
    pub fn is_permanent(&self) -> bool {
        self.class == 5
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Mail error with detailed information.
#[derive(Error, Debug)]
pub struct SmtpError {
    kind: SmtpErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates a new error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the send-level classification.
    pub fn failure(&self) -> SendFailure {
        self.kind.failure()
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    // Convenience constructors

    /// Creates a missing-credentials error.
    pub fn missing_credentials(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::MissingCredentials, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigurationInvalid, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConnectionRefused, message)
    }

    /// Creates a timeout error.
    pub fn timeout(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::InvalidResponse, message)
    }

    /// Creates an error from an SMTP reply.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => SmtpErrorKind::ServerShutdown,
            500..=504 => SmtpErrorKind::InvalidResponse,
            530 | 534 | 535 => SmtpErrorKind::CredentialsInvalid,
            550 | 551 | 553 => SmtpErrorKind::RecipientsRejected,
            552 => SmtpErrorKind::MessageTooLarge,
            400..=599 => SmtpErrorKind::UnexpectedResponse,
            _ => SmtpErrorKind::Unknown,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}
