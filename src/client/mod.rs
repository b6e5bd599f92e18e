//! The mailer.
//!
//! [`Mailer::send`] runs one submission end to end:
//! - Pre-flight validation of the request and configuration
//! - Attachment loading, skipping files that cannot be read
//! - MIME assembly
//! - Connect, optional STARTTLS, AUTH, MAIL/RCPT/DATA
//! - Teardown on every path once connected
//!
//! [`Mailer::send_email`] wraps it for the tool boundary, turning every
//! outcome into a boolean and a log line.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthMethod, Authenticator, Credentials};
use crate::config::DeliveryConfig;
use crate::errors::{SendFailure, SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::{MimeEncoder, OutboundMessage};
use crate::observability::Timer;
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::transport::{Connector, SmtpTransport, TcpConnector};
use crate::types::{
    Address, Attachment, AttachmentWarning, EmailRequest, RejectedRecipient, SendReport,
};

/// Envelope outcome of a completed transaction.
struct Delivery {
    accepted: Vec<String>,
    rejected: Vec<RejectedRecipient>,
    encrypted: bool,
}

/// Sends messages over SMTP, one connection per send.
pub struct Mailer {
    connector: Arc<dyn Connector>,
    encoder: MimeEncoder,
}

impl Default for Mailer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailer {
    /// Creates a mailer that opens real TCP connections.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TcpConnector))
    }

    /// Creates a mailer that opens connections through `connector`.
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            encoder: MimeEncoder::new(),
        }
    }

    /// Sends `request` through the relay described by `config`.
    ///
    /// Validation failures return before any connection is attempted. Once a
    /// connection is open it is closed exactly once, whatever the outcome;
    /// a failed close is logged and does not change the result.
    pub async fn send(
        &self,
        request: &EmailRequest,
        config: &DeliveryConfig,
    ) -> SmtpResult<SendReport> {
        let timer = Timer::start("send_email");

        let recipients = request.recipients()?;
        config.validate()?;
        let from = Address::with_name(&config.from_name, &config.from_address).map_err(|e| {
            SmtpError::configuration(format!("Invalid sender address: {}", e.message()))
        })?;

        let (attachments, warnings) = load_attachments(&request.attachments).await;
        let attachment_count = attachments.len();

        let message = OutboundMessage::new(
            from.clone(),
            recipients.clone(),
            &request.subject,
            &request.body,
            request.body_type,
            attachments,
        );
        let message_id = message.message_id.clone();
        let encoded = self.encoder.encode(&message)?;
        let data = MimeEncoder::prepare_data_content(&encoded);

        info!(
            host = %config.host,
            port = config.port,
            secure = config.secure,
            "Connecting to SMTP relay"
        );
        let mut transport = self.connector.connect(config).await?;

        let outcome = self
            .transact(transport.as_mut(), config, &from, &recipients, &data)
            .await;

        if let Err(e) = transport.close().await {
            warn!(error = %e, "Failed to close SMTP connection");
        }

        let delivery = outcome?;
        let duration = timer.stop();

        info!(
            message_id = %message_id,
            accepted = delivery.accepted.len(),
            rejected = delivery.rejected.len(),
            attachments = attachment_count,
            duration_ms = duration.as_millis() as u64,
            "Email sent"
        );

        Ok(SendReport {
            message_id,
            accepted: delivery.accepted,
            rejected: delivery.rejected,
            attachments: attachment_count,
            warnings,
            encrypted: delivery.encrypted,
            duration,
        })
    }

    /// Sends `request` and reports only whether it was delivered.
    ///
    /// Never fails and never panics: errors, including a panic inside the
    /// send, are logged with their classification and become `false`.
    pub async fn send_email(&self, request: &EmailRequest, config: &DeliveryConfig) -> bool {
        match AssertUnwindSafe(self.send(request, config))
            .catch_unwind()
            .await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                log_failure(&e);
                false
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    failure = %SendFailure::UnexpectedError,
                    error = %detail,
                    "Email send failed"
                );
                false
            }
        }
    }

    /// Runs the dialogue from EHLO to the reply after the message body.
    async fn transact(
        &self,
        transport: &mut dyn SmtpTransport,
        config: &DeliveryConfig,
        from: &Address,
        recipients: &[Address],
        data: &[u8],
    ) -> SmtpResult<Delivery> {
        let mut capabilities = greet(transport, config).await?;

        if !transport.is_tls() {
            if capabilities.starttls {
                let response = transport.send_command(&SmtpCommand::StartTls).await?;
                if response.is_success() {
                    transport.upgrade_tls(config).await?;
                    debug!("Upgraded connection with STARTTLS");
                    capabilities = greet(transport, config).await?;
                } else {
                    return Err(response.to_error_as(SmtpErrorKind::TlsHandshakeFailed));
                }
            } else {
                warn!(
                    host = %config.host,
                    "Relay does not offer STARTTLS; continuing without encryption"
                );
            }
        }

        authenticate(transport, &capabilities, &Credentials::from_config(config)).await?;
        info!(username = %config.username, "Authenticated");

        if let Some(limit) = capabilities.size {
            if data.len() > limit {
                return Err(SmtpError::new(
                    SmtpErrorKind::MessageTooLarge,
                    format!("Message is {} bytes; relay accepts {}", data.len(), limit),
                ));
            }
        }

        let mail_from = SmtpCommand::MailFrom {
            address: from.to_smtp(),
            size: capabilities.size.map(|_| data.len()),
        };
        let response = transport.send_command(&mail_from).await?;
        if !response.is_success() {
            return Err(refusal(&response, SmtpErrorKind::SenderRejected));
        }

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for recipient in recipients {
            let rcpt_to = SmtpCommand::RcptTo {
                address: recipient.to_smtp(),
            };

            let response = transport.send_command(&rcpt_to).await?;
            if response.is_success() {
                accepted.push(recipient.email().to_string());
            } else if response.code == codes::SERVICE_UNAVAILABLE {
                return Err(response.to_error());
            } else {
                warn!(
                    recipient = %recipient.email(),
                    code = response.code,
                    reply = %response.first_message(),
                    "Recipient refused"
                );
                rejected.push(RejectedRecipient {
                    address: recipient.email().to_string(),
                    code: response.code,
                    message: response.full_message(),
                });
            }
        }

        if accepted.is_empty() {
            if let Err(e) = transport.send_command(&SmtpCommand::Rset).await {
                debug!(error = %e, "RSET failed");
            }
            let detail: Vec<String> = rejected
                .iter()
                .map(|r| format!("{} ({})", r.address, r.code))
                .collect();
            return Err(SmtpError::new(
                SmtpErrorKind::RecipientsRejected,
                format!("All recipients were rejected: {}", detail.join(", ")),
            ));
        }

        let response = transport.send_command(&SmtpCommand::Data).await?;
        if response.code != codes::START_MAIL_INPUT {
            return Err(response.to_error());
        }

        transport.send_data(data).await?;

        let response = transport.read_response().await?;
        if !response.is_success() {
            return Err(response.to_error());
        }
        debug!(reply = %response.first_message(), "Message accepted by relay");

        Ok(Delivery {
            accepted,
            rejected,
            encrypted: transport.is_tls(),
        })
    }
}

/// Reads every attachment, keeping the ones that load and a warning for each
/// one that does not.
async fn load_attachments(paths: &[PathBuf]) -> (Vec<Attachment>, Vec<AttachmentWarning>) {
    let mut attachments = Vec::with_capacity(paths.len());
    let mut warnings = Vec::new();

    for path in paths {
        match Attachment::load(path).await {
            Ok(attachment) => {
                debug!(
                    path = %path.display(),
                    content_type = %attachment.content_type,
                    bytes = attachment.data.len(),
                    "Attached file"
                );
                attachments.push(attachment);
            }
            Err(warning) => {
                warn!(
                    path = %warning.path.display(),
                    issue = %warning.issue,
                    reason = %warning.reason,
                    "Skipping attachment"
                );
                warnings.push(warning);
            }
        }
    }

    (attachments, warnings)
}

/// Sends EHLO, falling back to HELO, and returns the advertised capabilities.
async fn greet(
    transport: &mut dyn SmtpTransport,
    config: &DeliveryConfig,
) -> SmtpResult<EsmtpCapabilities> {
    let response = transport
        .send_command(&SmtpCommand::Ehlo(config.helo_name.clone()))
        .await?;
    if response.is_success() {
        return Ok(EsmtpCapabilities::from_ehlo_response(&response));
    }

    let response = transport
        .send_command(&SmtpCommand::Helo(config.helo_name.clone()))
        .await?;
    if !response.is_success() {
        return Err(response.to_error());
    }
    Ok(EsmtpCapabilities::default())
}

/// Authenticates once with the strongest advertised mechanism.
async fn authenticate(
    transport: &mut dyn SmtpTransport,
    capabilities: &EsmtpCapabilities,
    credentials: &Credentials,
) -> SmtpResult<()> {
    let available: Vec<AuthMethod> = capabilities.auth_mechanisms.iter().copied().collect();
    let method = Authenticator::select_best_method(&available)?;

    if method.exposes_secret() && !transport.is_tls() {
        warn!(method = %method, "Authenticating over an unencrypted connection");
    }
    debug!(method = %method, "Authenticating");

    let response = match method {
        AuthMethod::Plain => auth_plain(transport, credentials).await?,
        AuthMethod::Login => auth_login(transport, credentials).await?,
        AuthMethod::CramMd5 => auth_cram_md5(transport, credentials).await?,
    };

    if response.code == codes::AUTH_SUCCESS {
        Ok(())
    } else {
        Err(auth_rejected(&response))
    }
}

async fn auth_plain(
    transport: &mut dyn SmtpTransport,
    credentials: &Credentials,
) -> SmtpResult<SmtpResponse> {
    let command = SmtpCommand::Auth {
        mechanism: AuthMethod::Plain.mechanism_name().to_string(),
        initial_response: Some(Authenticator::plain_initial_response(credentials)),
    };
    transport.send_command(&command).await
}

async fn auth_login(
    transport: &mut dyn SmtpTransport,
    credentials: &Credentials,
) -> SmtpResult<SmtpResponse> {
    let command = SmtpCommand::Auth {
        mechanism: AuthMethod::Login.mechanism_name().to_string(),
        initial_response: None,
    };

    let response = transport.send_command(&command).await?;
    if response.code != codes::AUTH_CONTINUE {
        return Err(auth_rejected(&response));
    }

    let username = Authenticator::login_username(credentials);
    transport.send_data(format!("{}\r\n", username).as_bytes()).await?;

    let response = transport.read_response().await?;
    if response.code != codes::AUTH_CONTINUE {
        return Err(auth_rejected(&response));
    }

    let password = Authenticator::login_password(credentials);
    transport.send_data(format!("{}\r\n", password).as_bytes()).await?;

    transport.read_response().await
}

async fn auth_cram_md5(
    transport: &mut dyn SmtpTransport,
    credentials: &Credentials,
) -> SmtpResult<SmtpResponse> {
    let command = SmtpCommand::Auth {
        mechanism: AuthMethod::CramMd5.mechanism_name().to_string(),
        initial_response: None,
    };

    let response = transport.send_command(&command).await?;
    if response.code != codes::AUTH_CONTINUE {
        return Err(auth_rejected(&response));
    }

    let answer = Authenticator::cram_md5_response(response.first_message(), credentials)?;
    transport.send_data(format!("{}\r\n", answer).as_bytes()).await?;

    transport.read_response().await
}

fn auth_rejected(response: &SmtpResponse) -> SmtpError {
    refusal(response, SmtpErrorKind::CredentialsInvalid)
}

/// Classifies a refusal as `kind`, unless the relay is shutting down.
fn refusal(response: &SmtpResponse, kind: SmtpErrorKind) -> SmtpError {
    if response.code == codes::SERVICE_UNAVAILABLE {
        response.to_error()
    } else {
        response.to_error_as(kind)
    }
}

fn log_failure(e: &SmtpError) {
    let failure = e.failure();
    if failure.is_preflight() {
        error!(failure = %failure, error = %e, hint = failure.hint(), "Email not sent");
    } else {
        error!(
            failure = %failure,
            error = %e,
            smtp_code = ?e.smtp_code(),
            hint = failure.hint(),
            "Email send failed"
        );
    }
}
