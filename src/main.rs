//! integrations-smtp-mcp: email tool server over stdio.
//!
//! Loads `.env`, installs logging on stderr, resolves the relay
//! configuration once and serves the `send_email_with_attachment` tool.
//!
//! # Example
//!
//! ```no_run
//! SMTP_HOST=smtp.example.com \
//! SMTP_USER=sender@example.com \
//! SMTP_PASS=app-password \
//! cargo run
//! ```

use std::io::{self, Write};
use std::path::Path;

use integrations_smtp_mcp::client::Mailer;
use integrations_smtp_mcp::config::{env, DeliveryConfig};
use integrations_smtp_mcp::observability::{init_tracing, LogFormat, LOG_FORMAT_ENV};
use integrations_smtp_mcp::server::MailToolServer;
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use tracing::{error, info, warn};

const SAMPLE_ATTACHMENT: &str = "test_attachment_1.txt";
const SAMPLE_ATTACHMENT_TEXT: &str = "This is a test text file (UTF-8).\n";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if should_print_help(&args) {
        print_help_output()?;
        return Ok(());
    }

    init_tracing(LogFormat::from_env());

    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => info!("No .env file found; using process environment"),
        Err(e) => warn!(error = %e, "Failed to load .env file"),
    }

    if args.iter().any(|a| a == "--sample-attachment") {
        write_sample_attachment(Path::new(SAMPLE_ATTACHMENT)).await;
    }

    let config = DeliveryConfig::from_env();
    match &config {
        Ok(c) => info!(
            host = %c.host,
            port = c.port,
            secure = c.secure,
            from = %c.from_address,
            "Resolved SMTP configuration"
        ),
        Err(e) => error!(
            error = %e,
            hint = e.failure().hint(),
            "SMTP configuration is incomplete; every send will fail"
        ),
    }

    info!("Mail tool server starting on stdio");
    let service = MailToolServer::new(config, Mailer::new())
        .serve(stdio())
        .await?;
    service.waiting().await?;
    Ok(())
}

fn should_print_help<I>(args: I) -> bool
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    args.into_iter().any(|arg| {
        let arg = arg.as_ref();
        arg == "--help" || arg == "-h"
    })
}

fn print_help_output() -> io::Result<()> {
    let output = build_help_output(|name| std::env::var(name).ok());
    let mut stdout = io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()
}

fn build_help_output<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let variables: [(&str, &str, bool); 13] = [
        (env::SMTP_HOST, "required", false),
        (env::SMTP_PORT, "default: 465", false),
        (env::SMTP_SECURE, "default: true on port 465", false),
        (env::SMTP_USER, "required", false),
        (env::SMTP_PASS, "required", true),
        (env::DEFAULT_FROM_NAME, "default: Sender", false),
        (env::DEFAULT_FROM_EMAIL, "default: SMTP_USER", false),
        (env::SMTP_CONNECT_TIMEOUT, "default: 10s", false),
        (env::SMTP_COMMAND_TIMEOUT, "default: 60s", false),
        (env::SMTP_HELO_NAME, "default: localhost", false),
        (env::SMTP_CA_CERT, "optional PEM file", false),
        (LOG_FORMAT_ENV, "text or json", false),
        ("RUST_LOG", "default: info", false),
    ];

    let mut out = String::new();
    out.push_str("integrations-smtp-mcp\n");
    out.push_str("Email tool server over stdio\n\n");

    out.push_str("Usage:\n");
    out.push_str("  integrations-smtp-mcp [--sample-attachment]\n");
    out.push_str("  integrations-smtp-mcp --help\n\n");

    out.push_str("Options:\n");
    out.push_str(&format!(
        "  --sample-attachment  create {} if it does not exist\n\n",
        SAMPLE_ATTACHMENT
    ));

    out.push_str("Environment (a .env file in the working directory is loaded first):\n");
    for (name, note, secret) in variables {
        let current = match lookup(name) {
            Some(_) if secret => "<set>".to_string(),
            Some(value) => value,
            None => "<unset>".to_string(),
        };
        out.push_str(&format!("  {:<22} {:<28} {}\n", name, note, current));
    }
    out
}

/// Creates the sample attachment unless something already exists at `path`.
async fn write_sample_attachment(path: &Path) {
    match tokio::fs::try_exists(path).await {
        Ok(true) => {
            info!(path = %path.display(), "Sample attachment already present");
        }
        Ok(false) => match tokio::fs::write(path, SAMPLE_ATTACHMENT_TEXT).await {
            Ok(()) => info!(path = %path.display(), "Created sample attachment"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to create sample attachment"),
        },
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to check sample attachment"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_flag_detected() {
        assert!(should_print_help(["--help"]));
        assert!(should_print_help(["--sample-attachment", "-h"]));
        assert!(!should_print_help(["--sample-attachment"]));
        assert!(!should_print_help(Vec::<String>::new()));
    }

    #[test]
    fn help_redacts_secret() {
        let output = build_help_output(|name| match name {
            "SMTP_HOST" => Some("smtp.example.com".to_string()),
            "SMTP_PASS" => Some("hunter2".to_string()),
            _ => None,
        });

        assert!(output.contains("smtp.example.com"));
        assert!(output.contains("<set>"));
        assert!(!output.contains("hunter2"));
        assert!(output.contains("SMTP_CA_CERT"));
        assert!(output.contains("--sample-attachment"));
    }

    #[tokio::test]
    async fn sample_attachment_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SAMPLE_ATTACHMENT);

        write_sample_attachment(&path).await;
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            SAMPLE_ATTACHMENT_TEXT
        );

        std::fs::write(&path, "custom").unwrap();
        write_sample_attachment(&path).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "custom");
    }
}
