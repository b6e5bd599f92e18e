//! Core types for the mail tool.
//!
//! This module provides:
//! - Address types with validation
//! - The caller-supplied [`EmailRequest`]
//! - Attachment loading with per-file warnings
//! - Send report types

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime;

/// Email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Display name (e.g., "John Doe").
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com").
    pub email: String,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> SmtpResult<Self> {
        let email = email.into();
        Self::validate_email(&email)?;
        Ok(Self { name: None, email })
    }

    /// Creates a new address with display name and email.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> SmtpResult<Self> {
        let email = email.into();
        Self::validate_email(&email)?;
        let name = name.into();
        Ok(Self {
            name: (!name.trim().is_empty()).then_some(name),
            email,
        })
    }

    /// Parses an address from a string (e.g., "John Doe <john@example.com>").
    pub fn parse(s: &str) -> SmtpResult<Self> {
        let s = s.trim();

        if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
            if start < end {
                let name = s[..start].trim().trim_matches('"');
                let email = s[start + 1..end].trim();
                return Self::with_name(name, email);
            }
        }

        Self::new(s)
    }

    /// Validates an email address according to RFC 5321 length and shape rules.
    fn validate_email(email: &str) -> SmtpResult<()> {
        let invalid = |reason: &str| {
            SmtpError::new(
                SmtpErrorKind::InvalidRecipientAddress,
                format!("Invalid address {:?}: {}", email, reason),
            )
        };

        if email.is_empty() {
            return Err(invalid("address cannot be empty"));
        }

        if email.len() > 254 {
            return Err(invalid("address too long (max 254 characters)"));
        }

        if email.chars().any(|c| c.is_control() || c.is_whitespace() || c == '<' || c == '>') {
            return Err(invalid("address contains whitespace, control characters or brackets"));
        }

        let Some((local, domain)) = email.split_once('@') else {
            return Err(invalid("address must contain exactly one @"));
        };

        if domain.contains('@') {
            return Err(invalid("address must contain exactly one @"));
        }

        if local.is_empty() || local.len() > 64 {
            return Err(invalid("local part must be 1-64 characters"));
        }

        if domain.is_empty() {
            return Err(invalid("domain cannot be empty"));
        }

        Ok(())
    }

    /// Returns the email part only.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the display name if present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Formats the address for SMTP MAIL FROM/RCPT TO commands.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }

    /// Formats the address for email headers.
    ///
    /// Non-ASCII display names become RFC 2047 encoded words; names with
    /// specials are quoted.
    pub fn to_header(&self) -> String {
        match &self.name {
            Some(name) if !name.is_ascii() => {
                format!("{} <{}>", mime::encode_word(name), self.email)
            }
            Some(name) => {
                if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') {
                    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                    format!("\"{}\" <{}>", escaped, self.email)
                } else {
                    format!("{} <{}>", name, self.email)
                }
            }
            None => self.email.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl TryFrom<&str> for Address {
    type Error = SmtpError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Address::parse(s)
    }
}

/// Body content type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    /// `text/plain`.
    #[default]
    Plain,
    /// `text/html`.
    Html,
}

impl BodyType {
    /// Returns the MIME subtype.
    pub fn subtype(&self) -> &'static str {
        match self {
            BodyType::Plain => "plain",
            BodyType::Html => "html",
        }
    }
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subtype())
    }
}

/// A caller's request to send one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRequest {
    /// Recipients, in order.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// Body content type.
    pub body_type: BodyType,
    /// Files to attach, in order.
    pub attachments: Vec<PathBuf>,
}

impl EmailRequest {
    /// Creates a plain-text request without attachments.
    pub fn new<I, S>(to: I, subject: impl Into<String>, body: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            to: to.into_iter().map(Into::into).collect(),
            subject: subject.into(),
            body: body.into(),
            body_type: BodyType::Plain,
            attachments: Vec::new(),
        }
    }

    /// Sets the body content type.
    pub fn with_body_type(mut self, body_type: BodyType) -> Self {
        self.body_type = body_type;
        self
    }

    /// Sets the attachment paths.
    pub fn with_attachments<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.attachments = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Validates the recipient list and returns the parsed recipients.
    pub fn recipients(&self) -> SmtpResult<Vec<Address>> {
        if self.to.is_empty() {
            return Err(SmtpError::new(
                SmtpErrorKind::EmptyRecipientList,
                "At least one recipient is required",
            ));
        }

        self.to.iter().map(|s| Address::parse(s)).collect()
    }

    /// Validates the request.
    pub fn validate(&self) -> SmtpResult<()> {
        self.recipients().map(|_| ())
    }
}

/// File attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename (basename of the source path).
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Binary content.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates a new attachment.
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Reads an attachment from disk, inferring its content type from the
    /// filename.
    pub async fn load(path: &Path) -> Result<Self, AttachmentWarning> {
        let warn = |issue, reason: String| AttachmentWarning {
            path: path.to_path_buf(),
            issue,
            reason,
        };

        if path.as_os_str().is_empty() {
            return Err(warn(AttachmentIssue::Unreadable, "empty path".to_string()));
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(warn(AttachmentIssue::NotFound, e.to_string()));
            }
            Err(e) => return Err(warn(AttachmentIssue::Unreadable, e.to_string())),
        };

        if !metadata.is_file() {
            return Err(warn(AttachmentIssue::Unreadable, "not a regular file".to_string()));
        }

        let Some(filename) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Err(warn(AttachmentIssue::Unreadable, "path has no filename".to_string()));
        };

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| warn(AttachmentIssue::Unreadable, e.to_string()))?;

        let (main, sub) = mime::infer_content_type(path);
        Ok(Self::new(filename, format!("{}/{}", main, sub), data))
    }
}

/// Why an attachment was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentIssue {
    /// Nothing exists at the path.
    NotFound,
    /// The path exists but could not be read as a file.
    Unreadable,
}

impl fmt::Display for AttachmentIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentIssue::NotFound => write!(f, "attachment not found"),
            AttachmentIssue::Unreadable => write!(f, "attachment unreadable"),
        }
    }
}

/// An attachment that was left out of the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentWarning {
    /// The path as given.
    pub path: PathBuf,
    /// Category.
    pub issue: AttachmentIssue,
    /// Underlying reason.
    pub reason: String,
}

impl fmt::Display for AttachmentWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.issue, self.path.display(), self.reason)
    }
}

/// A recipient that was rejected by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecipient {
    /// The rejected address.
    pub address: String,
    /// SMTP status code.
    pub code: u16,
    /// Error message from server.
    pub message: String,
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendReport {
    /// Message-ID header value, without angle brackets.
    pub message_id: String,
    /// Recipients the relay accepted.
    pub accepted: Vec<String>,
    /// Recipients the relay refused individually.
    pub rejected: Vec<RejectedRecipient>,
    /// Number of attachments included in the message.
    pub attachments: usize,
    /// Attachments that were skipped.
    pub warnings: Vec<AttachmentWarning>,
    /// Whether the session ran over TLS.
    pub encrypted: bool,
    /// Send duration.
    pub duration: Duration,
}

impl SendReport {
    /// Returns true if all recipients were accepted and all attachments
    /// included.
    pub fn is_complete_success(&self) -> bool {
        self.rejected.is_empty() && self.warnings.is_empty()
    }
}
