//! # SMTP Mail Tool
//!
//! Sends email with attachments through an SMTP relay and exposes that as an
//! MCP tool:
//! - Relay configuration resolved from the environment
//! - Implicit TLS, opportunistic STARTTLS or plaintext
//! - PLAIN, LOGIN and CRAM-MD5 authentication
//! - multipart/mixed messages with text or HTML bodies and file attachments
//! - Fail-soft tool boundary: every outcome is a boolean plus a log line
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_smtp_mcp::{DeliveryConfig, EmailRequest, Mailer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeliveryConfig::builder()
//!         .host("smtp.example.com")
//!         .port(465)
//!         .credentials("sender@example.com", "app-password")
//!         .build()?;
//!
//!     let request = EmailRequest::new(["recipient@example.com"], "Hello", "Sent from Rust.")
//!         .with_attachments(["report.pdf"]);
//!
//!     let report = Mailer::new().send(&request, &config).await?;
//!     println!("Message sent with ID: {}", report.message_id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// MIME encoding
pub mod mime;

// Observability
pub mod observability;

// Client
pub mod client;

// Tool server
pub mod server;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use client::Mailer;
pub use config::{DeliveryConfig, DeliveryConfigBuilder};
pub use errors::{SendFailure, SmtpError, SmtpErrorKind, SmtpResult};
pub use types::{
    Address, Attachment, AttachmentIssue, AttachmentWarning, BodyType, EmailRequest,
    RejectedRecipient, SendReport,
};
pub use auth::{AuthMethod, Credentials};
pub use protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};
pub use transport::{Connector, SmtpTransport, TcpConnector};
pub use mime::{infer_content_type, MimeEncoder, OutboundMessage};
pub use server::{MailToolServer, SendEmailParams};
