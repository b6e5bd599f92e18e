//! SMTP protocol implementation.
//!
//! Implements the RFC 5321 commands a single submission needs, reply
//! parsing, and the ESMTP capabilities advertised in the EHLO reply.

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::{EnhancedStatusCode, SmtpError, SmtpErrorKind, SmtpResult};

/// SMTP commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: String,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// MAIL FROM command.
    MailFrom {
        /// Sender address, in angle brackets.
        address: String,
        /// SIZE parameter (optional).
        size: Option<usize>,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient address, in angle brackets.
        address: String,
    },
    /// DATA command.
    Data,
    /// Reset transaction.
    Rset,
    /// No operation.
    Noop,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Returns the command verb.
    pub fn verb(&self) -> &'static str {
        match self {
            SmtpCommand::Ehlo(_) => "EHLO",
            SmtpCommand::Helo(_) => "HELO",
            SmtpCommand::StartTls => "STARTTLS",
            SmtpCommand::Auth { .. } => "AUTH",
            SmtpCommand::MailFrom { .. } => "MAIL",
            SmtpCommand::RcptTo { .. } => "RCPT",
            SmtpCommand::Data => "DATA",
            SmtpCommand::Rset => "RSET",
            SmtpCommand::Noop => "NOOP",
            SmtpCommand::Quit => "QUIT",
        }
    }

    /// Formats the command for sending.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => {
                if let Some(response) = initial_response {
                    format!("AUTH {} {}", mechanism, response)
                } else {
                    format!("AUTH {}", mechanism)
                }
            }
            SmtpCommand::MailFrom { address, size } => {
                let mut cmd = format!("MAIL FROM:{}", address);
                if let Some(s) = size {
                    cmd.push_str(&format!(" SIZE={}", s));
                }
                cmd
            }
            SmtpCommand::RcptTo { address } => format!("RCPT TO:{}", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Rset => "RSET".to_string(),
            SmtpCommand::Noop => "NOOP".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Formats the command for logs, hiding AUTH payloads.
    pub fn redacted(&self) -> String {
        match self {
            SmtpCommand::Auth { mechanism, .. } => format!("AUTH {} ****", mechanism),
            other => other.to_smtp_string(),
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// SMTP response from server.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Enhanced status code (optional).
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Response message lines.
    pub message: Vec<String>,
    /// Whether this is a multiline response.
    pub is_multiline: bool,
}

impl SmtpResponse {
    /// Creates a new response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code: None,
            message: vec![message.into()],
            is_multiline: false,
        }
    }

    /// Parses a response from raw lines.
    pub fn parse(lines: &[String]) -> SmtpResult<Self> {
        if lines.is_empty() {
            return Err(SmtpError::protocol("Empty response"));
        }

        let mut messages = Vec::new();
        let mut code = 0u16;
        let mut enhanced_code = None;

        for (i, line) in lines.iter().enumerate() {
            let parsed_code: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| SmtpError::protocol(format!("Invalid status code: {}", line)))?;

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(SmtpError::protocol(
                    "Inconsistent status codes in multiline response",
                ));
            }

            let msg = line.get(4..).unwrap_or("");
            let message = match Self::parse_enhanced_code(msg) {
                Some((esc, rest)) if i == 0 => {
                    enhanced_code = Some(esc);
                    rest.trim().to_string()
                }
                _ => msg.to_string(),
            };

            messages.push(message);
        }

        Ok(Self {
            code,
            enhanced_code,
            message: messages,
            is_multiline: lines.len() > 1,
        })
    }

    /// Parses enhanced status code from message start.
    fn parse_enhanced_code(msg: &str) -> Option<(EnhancedStatusCode, &str)> {
        let (first, rest) = msg.split_once(' ').unwrap_or((msg, ""));
        let code = EnhancedStatusCode::parse(first)?;
        Some((code, rest))
    }

    /// Returns true if this is a success response (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true if this is a positive intermediate response (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Returns all message lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts to an error, classifying by reply code.
    pub fn to_error(&self) -> SmtpError {
        let mut err = SmtpError::from_smtp_response(self.code, self.full_message());
        if let Some(enhanced) = &self.enhanced_code {
            err = err.with_enhanced_code(enhanced.clone());
        }
        err
    }

    /// Converts to an error of the given kind, keeping the reply codes.
    pub fn to_error_as(&self, kind: SmtpErrorKind) -> SmtpError {
        let mut err = SmtpError::new(kind, self.full_message()).with_smtp_code(self.code);
        if let Some(enhanced) = &self.enhanced_code {
            err = err.with_enhanced_code(enhanced.clone());
        }
        err
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// ESMTP server capabilities.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Maximum message size.
    pub size: Option<usize>,
    /// Supported authentication mechanisms.
    pub auth_mechanisms: HashSet<AuthMethod>,
    /// STARTTLS supported.
    pub starttls: bool,
}

impl EsmtpCapabilities {
    /// Parses capabilities from EHLO response. The first line is the server
    /// greeting and carries no capability.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in response.message.iter().skip(1) {
            let line = line.trim().to_uppercase();

            let (capability, params) = line.split_once([' ', '=']).unwrap_or((line.as_str(), ""));

            match capability {
                "SIZE" => {
                    caps.size = params.trim().parse().ok().filter(|s| *s > 0);
                }
                "AUTH" => {
                    for mech in params.split_whitespace() {
                        if let Some(method) = AuthMethod::from_capability(mech) {
                            caps.auth_mechanisms.insert(method);
                        }
                    }
                }
                "STARTTLS" => caps.starttls = true,
                _ => {}
            }
        }

        caps
    }
}

/// Response codes used during a submission.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Service closing.
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Service unavailable.
    pub const SERVICE_UNAVAILABLE: u16 = 421;
    /// Authentication failed.
    pub const AUTH_FAILED: u16 = 535;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_formatting() {
        assert_eq!(
            SmtpCommand::Ehlo("localhost".to_string()).to_smtp_string(),
            "EHLO localhost"
        );
        assert_eq!(SmtpCommand::StartTls.to_smtp_string(), "STARTTLS");
        assert_eq!(
            SmtpCommand::MailFrom {
                address: "<test@example.com>".to_string(),
                size: Some(1024),
            }
            .to_smtp_string(),
            "MAIL FROM:<test@example.com> SIZE=1024"
        );
        assert_eq!(
            SmtpCommand::RcptTo {
                address: "<a@example.com>".to_string()
            }
            .verb(),
            "RCPT"
        );
    }

    #[test]
    fn test_auth_redacted() {
        let cmd = SmtpCommand::Auth {
            mechanism: "PLAIN".to_string(),
            initial_response: Some("AHVzZXIAc2VjcmV0".to_string()),
        };
        assert_eq!(cmd.to_smtp_string(), "AUTH PLAIN AHVzZXIAc2VjcmV0");
        assert_eq!(cmd.to_string(), "AUTH PLAIN ****");
    }

    #[test]
    fn test_response_parse() {
        let lines = vec!["250 OK".to_string()];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_success());
        assert_eq!(response.first_message(), "OK");

        let lines = vec![
            "250-smtp.example.com Hello".to_string(),
            "250-SIZE 10485760".to_string(),
            "250 STARTTLS".to_string(),
        ];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_multiline);
        assert_eq!(response.message.len(), 3);
        assert!(response.enhanced_code.is_none());

        let lines = vec!["354".to_string()];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert!(response.is_intermediate());
        assert_eq!(response.first_message(), "");
    }

    #[test]
    fn test_response_parse_errors() {
        assert!(SmtpResponse::parse(&[]).is_err());
        assert!(SmtpResponse::parse(&["OK".to_string()]).is_err());
        assert!(SmtpResponse::parse(&["2é0 OK".to_string()]).is_err());
        assert!(SmtpResponse::parse(&["250-a".to_string(), "550 b".to_string()]).is_err());
    }

    #[test]
    fn test_response_with_enhanced_code() {
        let lines = vec!["550 5.1.1 User unknown".to_string()];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert_eq!(response.code, 550);
        assert_eq!(response.first_message(), "User unknown");
        let esc = response.enhanced_code.clone().unwrap();
        assert_eq!(esc.class, 5);
        assert_eq!(esc.subject, 1);
        assert_eq!(esc.detail, 1);

        let err = response.to_error_as(SmtpErrorKind::SenderRejected);
        assert_eq!(err.kind(), SmtpErrorKind::SenderRejected);
        assert_eq!(err.smtp_code(), Some(550));
        assert_eq!(err.enhanced_code(), Some(&esc));
    }

    #[test]
    fn test_capabilities_parse() {
        let response = SmtpResponse {
            code: 250,
            enhanced_code: None,
            message: vec![
                "smtp.example.com".to_string(),
                "SIZE 10485760".to_string(),
                "AUTH PLAIN LOGIN CRAM-MD5".to_string(),
                "AUTH=LOGIN".to_string(),
                "STARTTLS".to_string(),
                "8BITMIME".to_string(),
                "ENHANCEDSTATUSCODES".to_string(),
            ],
            is_multiline: true,
        };

        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert_eq!(caps.size, Some(10485760));
        assert!(caps.auth_mechanisms.contains(&AuthMethod::Plain));
        assert!(caps.auth_mechanisms.contains(&AuthMethod::Login));
        assert!(caps.auth_mechanisms.contains(&AuthMethod::CramMd5));
        assert!(caps.starttls);
    }

    #[test]
    fn test_greeting_line_is_not_a_capability() {
        let response = SmtpResponse::new(250, "STARTTLS.example.com");
        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert!(!caps.starttls);
        assert!(caps.auth_mechanisms.is_empty());
        assert!(caps.size.is_none());
    }
}
