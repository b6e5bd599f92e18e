//! Integration tests against a scripted relay on a loopback socket.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use integrations_smtp_mcp::{DeliveryConfig, EmailRequest, Mailer, SendFailure};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the relay saw during one session.
#[derive(Debug, Default)]
struct Transcript {
    commands: Vec<String>,
    auth_payload: Option<String>,
    message: Vec<String>,
}

/// Serves one SMTP session. Without STARTTLS, with AUTH PLAIN; accepts the
/// login only when `accept_login` is set.
async fn spawn_relay(accept_login: bool) -> (u16, JoinHandle<Transcript>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut transcript = Transcript::default();

        write_half.write_all(b"220 relay.test ESMTP\r\n").await.unwrap();

        while let Some(line) = lines.next_line().await.unwrap() {
            let verb = line
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            transcript.commands.push(line.clone());

            let reply: &[u8] = match verb.as_str() {
                "EHLO" => b"250-relay.test\r\n250-SIZE 1000000\r\n250 AUTH PLAIN\r\n",
                "AUTH" => {
                    transcript.auth_payload = line.split_whitespace().nth(2).map(String::from);
                    if accept_login {
                        b"235 2.7.0 Authentication successful\r\n"
                    } else {
                        b"535 5.7.8 Authentication credentials invalid\r\n"
                    }
                }
                "DATA" => {
                    write_half.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await.unwrap();
                    while let Some(data_line) = lines.next_line().await.unwrap() {
                        if data_line == "." {
                            break;
                        }
                        transcript.message.push(data_line);
                    }
                    b"250 2.0.0 Ok: queued\r\n"
                }
                "QUIT" => {
                    write_half.write_all(b"221 2.0.0 Bye\r\n").await.unwrap();
                    break;
                }
                _ => b"250 2.0.0 Ok\r\n",
            };
            write_half.write_all(reply).await.unwrap();
        }

        transcript
    });

    (port, handle)
}

fn relay_config(port: u16) -> DeliveryConfig {
    DeliveryConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .secure(false)
        .credentials("sender@example.com", "app-password")
        .from_name("Reports")
        .connect_timeout(Duration::from_secs(5))
        .command_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_send_over_loopback() {
    let (port, relay) = spawn_relay(true).await;
    let config = relay_config(port);
    let request = EmailRequest::new(["a@example.com", "b@example.com"], "Weekly report", "All green.\n.\nEnd.");

    let report = Mailer::new().send(&request, &config).await.unwrap();
    let transcript = relay.await.unwrap();

    assert_eq!(report.accepted, vec!["a@example.com", "b@example.com"]);
    assert!(!report.encrypted);

    let verbs: Vec<&str> = transcript
        .commands
        .iter()
        .map(|c| c.split_whitespace().next().unwrap_or_default())
        .collect();
    assert_eq!(verbs, vec!["EHLO", "AUTH", "MAIL", "RCPT", "RCPT", "DATA", "QUIT"]);
    assert!(transcript.commands[2].starts_with("MAIL FROM:<sender@example.com>"));
    assert_eq!(transcript.commands[3], "RCPT TO:<a@example.com>");
    assert_eq!(transcript.commands[4], "RCPT TO:<b@example.com>");

    let payload = transcript.auth_payload.unwrap();
    assert_eq!(BASE64.decode(payload).unwrap(), b"\0sender@example.com\0app-password");

    assert!(transcript.message.contains(&"From: Reports <sender@example.com>".to_string()));
    assert!(transcript.message.contains(&"To: a@example.com, b@example.com".to_string()));
    assert!(transcript.message.contains(&"Subject: Weekly report".to_string()));
    // A lone dot in the body arrives stuffed.
    assert!(transcript.message.contains(&"..".to_string()));
}

#[tokio::test]
async fn test_rejected_login_over_loopback() {
    let (port, relay) = spawn_relay(false).await;
    let config = relay_config(port);
    let request = EmailRequest::new(["a@example.com"], "S", "B");

    let err = Mailer::new().send(&request, &config).await.unwrap_err();
    let transcript = relay.await.unwrap();

    assert_eq!(err.failure(), SendFailure::AuthenticationFailed);
    assert_eq!(err.smtp_code(), Some(535));
    assert_eq!(transcript.commands.last().map(String::as_str), Some("QUIT"));
    assert!(!transcript.commands.iter().any(|c| c.starts_with("MAIL")));
}

#[tokio::test]
async fn test_send_email_reports_bool_over_loopback() {
    let (port, relay) = spawn_relay(false).await;
    let config = relay_config(port);
    let request = EmailRequest::new(["a@example.com"], "S", "B");

    assert!(!Mailer::new().send_email(&request, &config).await);
    relay.await.unwrap();

    let (port, relay) = spawn_relay(true).await;
    let config = relay_config(port);
    assert!(Mailer::new().send_email(&request, &config).await);
    let transcript = relay.await.unwrap();
    assert!(transcript.message.iter().any(|l| l == "B"));
}

#[tokio::test]
async fn test_nothing_listening() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = relay_config(port);
    let request = EmailRequest::new(["a@example.com"], "S", "B");

    let err = Mailer::new().send(&request, &config).await.unwrap_err();
    assert_eq!(err.failure(), SendFailure::TransportConnectFailed);
}
