//! MCP tool server.
//!
//! Exposes one tool, `send_email_with_attachment`, that hands the request to
//! the [`Mailer`] and answers `true` or `false`. Causes of failure go to the
//! log, never to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{error, info};

use crate::client::Mailer;
use crate::config::DeliveryConfig;
use crate::errors::SmtpResult;
use crate::types::{BodyType, EmailRequest};

/// Arguments of `send_email_with_attachment`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendEmailParams {
    /// Recipient addresses.
    pub to_emails: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Files to attach. Unreadable paths are skipped.
    #[serde(default)]
    pub attachment_paths: Option<Vec<String>>,
    /// `plain` or `html`.
    #[serde(default)]
    pub body_type: BodyType,
}

impl From<SendEmailParams> for EmailRequest {
    fn from(params: SendEmailParams) -> Self {
        EmailRequest::new(params.to_emails, params.subject, params.body)
            .with_body_type(params.body_type)
            .with_attachments(
                params
                    .attachment_paths
                    .unwrap_or_default()
                    .into_iter()
                    .map(PathBuf::from),
            )
    }
}

/// Email tool server.
///
/// Holds the configuration resolved at startup. A failed resolution is kept
/// and reported on every call.
#[derive(Clone)]
pub struct MailToolServer {
    config: Arc<SmtpResult<DeliveryConfig>>,
    mailer: Arc<Mailer>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MailToolServer {
    /// Creates a server around a resolved (or failed) configuration.
    pub fn new(config: SmtpResult<DeliveryConfig>, mailer: Mailer) -> Self {
        Self {
            config: Arc::new(config),
            mailer: Arc::new(mailer),
            tool_router: Self::tool_router(),
        }
    }

    /// Sends the message described by `params`.
    pub async fn deliver(&self, params: SendEmailParams) -> bool {
        info!(
            subject = %params.subject,
            recipients = ?params.to_emails,
            "Received send request"
        );

        let delivered = match self.config.as_ref() {
            Ok(config) => {
                let request = EmailRequest::from(params);
                self.mailer.send_email(&request, config).await
            }
            Err(e) => {
                let failure = e.failure();
                error!(
                    failure = %failure,
                    error = %e,
                    hint = failure.hint(),
                    "Email not sent: configuration unavailable"
                );
                false
            }
        };

        if delivered {
            info!("tool succeeded");
        } else {
            info!("tool failed");
        }
        delivered
    }

    #[tool(
        name = "send_email_with_attachment",
        description = "Send an email with optional file attachments. Returns true when the relay accepted the message, false otherwise."
    )]
    async fn send_email_with_attachment(
        &self,
        Parameters(params): Parameters<SendEmailParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let delivered = self.deliver(params).await;
        Ok(CallToolResult::success(vec![Content::text(
            delivered.to_string(),
        )]))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for MailToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Email sender over SMTP. Relay and credentials come from SMTP_* environment variables; failures are reported as false with details in the server log.".to_owned(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SmtpError;
    use crate::mocks::{auth_failed_response, test_config, StubConnector};

    fn params(to: &[&str]) -> SendEmailParams {
        SendEmailParams {
            to_emails: to.iter().map(|s| s.to_string()).collect(),
            subject: "S".to_string(),
            body: "B".to_string(),
            attachment_paths: None,
            body_type: BodyType::Plain,
        }
    }

    fn server_with(connector: Arc<StubConnector>, port: u16) -> MailToolServer {
        MailToolServer::new(test_config(port), Mailer::with_connector(connector))
    }

    #[test]
    fn test_params_defaults() {
        let params: SendEmailParams = serde_json::from_value(serde_json::json!({
            "to_emails": ["a@example.com"],
            "subject": "S",
            "body": "B"
        }))
        .unwrap();

        assert_eq!(params.body_type, BodyType::Plain);
        assert!(params.attachment_paths.is_none());

        let request = EmailRequest::from(params);
        assert_eq!(request.to, vec!["a@example.com"]);
        assert!(request.attachments.is_empty());
    }

    #[test]
    fn test_params_html_with_attachments() {
        let params: SendEmailParams = serde_json::from_value(serde_json::json!({
            "to_emails": ["a@example.com", "b@example.com"],
            "subject": "Report",
            "body": "<p>See attached</p>",
            "attachment_paths": ["report.pdf", "data.csv"],
            "body_type": "html"
        }))
        .unwrap();

        let request = EmailRequest::from(params);
        assert_eq!(request.body_type, BodyType::Html);
        assert_eq!(
            request.attachments,
            vec![PathBuf::from("report.pdf"), PathBuf::from("data.csv")]
        );

        let invalid = serde_json::from_value::<SendEmailParams>(serde_json::json!({
            "to_emails": ["a@example.com"],
            "subject": "S",
            "body": "B",
            "body_type": "markdown"
        }));
        assert!(invalid.is_err());
    }

    #[tokio::test]
    async fn test_tool_reports_true() {
        let connector = Arc::new(StubConnector::new());
        let server = server_with(connector.clone(), 465);

        let result = server
            .send_email_with_attachment(Parameters(params(&["a@example.com"])))
            .await
            .unwrap();

        let text = serde_json::to_value(&result.content).unwrap();
        assert_eq!(text[0]["text"], "true");
        assert_eq!(connector.handle().envelope_recipients(), vec!["a@example.com"]);
    }

    #[tokio::test]
    async fn test_tool_reports_false_on_auth_failure() {
        let connector = Arc::new(StubConnector::new());
        connector.handle().respond_to("AUTH", auth_failed_response());
        let server = server_with(connector.clone(), 465);

        let result = server
            .send_email_with_attachment(Parameters(params(&["a@example.com"])))
            .await
            .unwrap();

        let text = serde_json::to_value(&result.content).unwrap();
        assert_eq!(text[0]["text"], "false");
        assert_eq!(connector.handle().close_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_recipients_false_without_connecting() {
        let connector = Arc::new(StubConnector::new());
        let server = server_with(connector.clone(), 465);

        assert!(!server.deliver(params(&[])).await);
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_config_fails_every_call() {
        let connector = Arc::new(StubConnector::new());
        let server = MailToolServer::new(
            Err(SmtpError::missing_credentials("SMTP_HOST is not set")),
            Mailer::with_connector(connector.clone()),
        );

        assert!(!server.deliver(params(&["a@example.com"])).await);
        assert!(!server.deliver(params(&["a@example.com"])).await);
        assert_eq!(connector.connect_count(), 0);
    }

    #[test]
    fn test_server_info_enables_tools() {
        let server = server_with(Arc::new(StubConnector::new()), 465);
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap().contains("SMTP_"));
    }
}
