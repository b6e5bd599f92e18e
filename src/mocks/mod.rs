//! Mock implementations for testing.
//!
//! [`MockTransport`] answers every command with a canned reply chosen by
//! verb and records what it was sent. Its [`MockHandle`] stays with the test
//! after the transport has been boxed and handed to the mailer.
//! [`StubConnector`] hands out such transports and counts connection
//! attempts.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::DeliveryConfig;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};
use crate::transport::{Connector, SmtpTransport};

#[derive(Debug, Default)]
struct MockState {
    scripted: HashMap<&'static str, VecDeque<SmtpResponse>>,
    responses: HashMap<&'static str, SmtpResponse>,
    failures: HashMap<&'static str, SmtpError>,
    reads: VecDeque<SmtpResponse>,
    commands: Vec<SmtpCommand>,
    data: Vec<Vec<u8>>,
    close_count: usize,
    tls_upgrades: usize,
}

/// Shared view of a [`MockTransport`]'s script and recording.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replies to every command with `verb` using `response`.
    pub fn respond_to(&self, verb: &'static str, response: SmtpResponse) -> &Self {
        self.lock().responses.insert(verb, response);
        self
    }

    /// Replies to the next command with `verb` using `response`. One-shot
    /// replies queue up and take precedence over [`respond_to`](Self::respond_to).
    pub fn respond_once(&self, verb: &'static str, response: SmtpResponse) -> &Self {
        self.lock()
            .scripted
            .entry(verb)
            .or_default()
            .push_back(response);
        self
    }

    /// Fails the next command with `verb`. `QUIT` also covers `close`.
    pub fn fail_on(&self, verb: &'static str, error: SmtpError) -> &Self {
        self.lock().failures.insert(verb, error);
        self
    }

    /// Queues a reply for the next bare `read_response`.
    pub fn queue_read(&self, response: SmtpResponse) -> &Self {
        self.lock().reads.push_back(response);
        self
    }

    /// Returns recorded commands.
    pub fn commands(&self) -> Vec<SmtpCommand> {
        self.lock().commands.clone()
    }

    /// Returns the verbs of recorded commands, in order.
    pub fn verbs(&self) -> Vec<&'static str> {
        self.lock().commands.iter().map(SmtpCommand::verb).collect()
    }

    /// Returns the envelope recipients sent with RCPT TO, without brackets.
    pub fn envelope_recipients(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter_map(|c| match c {
                SmtpCommand::RcptTo { address } => Some(
                    address
                        .trim_start_matches('<')
                        .trim_end_matches('>')
                        .to_string(),
                ),
                _ => None,
            })
            .collect()
    }

    /// Returns raw data writes.
    pub fn data(&self) -> Vec<Vec<u8>> {
        self.lock().data.clone()
    }

    /// Returns how many times the transport was closed.
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Returns how many STARTTLS upgrades were performed.
    pub fn tls_upgrades(&self) -> usize {
        self.lock().tls_upgrades
    }
}

/// Mock SMTP transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    handle: MockHandle,
    tls_enabled: bool,
}

impl MockTransport {
    /// Creates a mock that accepts every step of a submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock that starts in TLS mode, as after implicit TLS.
    pub fn secure() -> Self {
        Self {
            tls_enabled: true,
            ..Self::default()
        }
    }

    /// Returns the shared handle.
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    fn default_response(verb: &str) -> SmtpResponse {
        match verb {
            "EHLO" => ehlo_response(),
            "STARTTLS" => SmtpResponse::new(codes::SERVICE_READY, "Ready to start TLS"),
            "AUTH" => SmtpResponse::new(codes::AUTH_SUCCESS, "Authentication successful"),
            "DATA" => SmtpResponse::new(codes::START_MAIL_INPUT, "Start mail input"),
            "QUIT" => SmtpResponse::new(codes::SERVICE_CLOSING, "Bye"),
            _ => SmtpResponse::new(codes::OK, "OK"),
        }
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        let verb = command.verb();
        let mut state = self.handle.lock();

        if let Some(error) = state.failures.remove(verb) {
            return Err(error);
        }

        state.commands.push(command.clone());
        if let Some(response) = state.scripted.get_mut(verb).and_then(VecDeque::pop_front) {
            return Ok(response);
        }
        Ok(state
            .responses
            .get(verb)
            .cloned()
            .unwrap_or_else(|| Self::default_response(verb)))
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        self.handle.lock().data.push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        Ok(self
            .handle
            .lock()
            .reads
            .pop_front()
            .unwrap_or_else(|| SmtpResponse::new(codes::OK, "OK: queued")))
    }

    async fn upgrade_tls(&mut self, _config: &DeliveryConfig) -> SmtpResult<()> {
        self.handle.lock().tls_upgrades += 1;
        self.tls_enabled = true;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    async fn close(&mut self) -> SmtpResult<()> {
        let mut state = self.handle.lock();
        state.close_count += 1;
        match state.failures.remove("QUIT") {
            Some(error) => Err(error),
            None => {
                state.commands.push(SmtpCommand::Quit);
                Ok(())
            }
        }
    }
}

/// Connector that hands out [`MockTransport`]s sharing one handle.
#[derive(Debug, Default)]
pub struct StubConnector {
    handle: MockHandle,
    connects: AtomicUsize,
    failure: Option<(SmtpErrorKind, String)>,
    secure_requests: Mutex<Vec<bool>>,
}

impl StubConnector {
    /// Creates a connector whose transports accept everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector whose every attempt fails with `kind`.
    pub fn failing(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            failure: Some((kind, message.into())),
            ..Self::default()
        }
    }

    /// Returns the handle shared by every transport this connector creates.
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    /// Returns the number of connection attempts.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Returns the `secure` flag of each connection attempt.
    pub fn secure_requests(&self) -> Vec<bool> {
        self.secure_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(&self, config: &DeliveryConfig) -> SmtpResult<Box<dyn SmtpTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.secure_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(config.secure);

        if let Some((kind, message)) = &self.failure {
            return Err(SmtpError::new(*kind, message.clone()));
        }

        Ok(Box::new(MockTransport {
            handle: self.handle.clone(),
            tls_enabled: config.secure,
        }))
    }
}

/// Creates an EHLO response offering STARTTLS and AUTH PLAIN LOGIN.
pub fn ehlo_response() -> SmtpResponse {
    ehlo_response_with(&["SIZE 10485760", "AUTH PLAIN LOGIN", "STARTTLS", "8BITMIME"])
}

/// Creates an EHLO response with the given capability lines.
pub fn ehlo_response_with(capabilities: &[&str]) -> SmtpResponse {
    let mut message = vec!["smtp.example.com Hello".to_string()];
    message.extend(capabilities.iter().map(|c| c.to_string()));
    SmtpResponse {
        code: codes::OK,
        enhanced_code: None,
        is_multiline: message.len() > 1,
        message,
    }
}

/// Creates an authentication failure response.
pub fn auth_failed_response() -> SmtpResponse {
    SmtpResponse::parse(&["535 5.7.8 Authentication credentials invalid".to_string()])
        .unwrap_or_else(|_| SmtpResponse::new(codes::AUTH_FAILED, "Authentication failed"))
}

/// Creates a test configuration for a relay at `smtp.example.com`.
pub fn test_config(port: u16) -> SmtpResult<DeliveryConfig> {
    DeliveryConfig::builder()
        .host("smtp.example.com")
        .port(port)
        .credentials("sender@example.com", "app-password")
        .build()
}
