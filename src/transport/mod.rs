//! Transport layer for SMTP connections.
//!
//! Provides the [`SmtpTransport`] abstraction over a TCP connection with
//! optional TLS, and the [`Connector`] seam the mailer uses to open one
//! connection per send.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::DeliveryConfig;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{SmtpCommand, SmtpResponse};

/// Trait for SMTP transport abstraction.
#[async_trait]
pub trait SmtpTransport: Send + Sync + fmt::Debug {
    /// Sends a command and receives a response.
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse>;

    /// Sends raw data (DATA body, AUTH continuation lines).
    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()>;

    /// Reads a response from the server.
    async fn read_response(&mut self) -> SmtpResult<SmtpResponse>;

    /// Upgrades the connection to TLS after a successful STARTTLS.
    async fn upgrade_tls(&mut self, config: &DeliveryConfig) -> SmtpResult<()>;

    /// Returns true if TLS is enabled.
    fn is_tls(&self) -> bool;

    /// Sends QUIT and shuts the connection down. Later calls are no-ops.
    async fn close(&mut self) -> SmtpResult<()>;
}

/// Opens transports. One call per send.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to the relay named by `config` and reads its greeting.
    async fn connect(&self, config: &DeliveryConfig) -> SmtpResult<Box<dyn SmtpTransport>>;
}

/// Connector that opens real TCP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, config: &DeliveryConfig) -> SmtpResult<Box<dyn SmtpTransport>> {
        let transport = TcpTransport::connect(config).await?;
        Ok(Box::new(transport))
    }
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    /// Read/write stream.
    stream: TransportStream,
    /// Command timeout.
    command_timeout: Duration,
    /// TLS enabled flag.
    tls_enabled: bool,
    /// Set once QUIT has been attempted.
    closed: bool,
    /// Server host.
    host: String,
}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(BufReader<tokio_rustls::client::TlsStream<TcpStream>>),
    #[cfg(feature = "native-tls")]
    NativeTls(BufReader<tokio_native_tls::TlsStream<TcpStream>>),
    /// Placeholder while the socket is handed to the TLS handshake.
    Detached,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls_enabled", &self.tls_enabled)
            .field("closed", &self.closed)
            .finish()
    }
}

impl TcpTransport {
    /// Connects to an SMTP server and reads its greeting.
    ///
    /// With `config.secure` the TLS handshake happens before anything is
    /// read. DNS, TCP connect, the handshake and the greeting share
    /// `connect_timeout`.
    pub async fn connect(config: &DeliveryConfig) -> SmtpResult<Self> {
        let address = config.address();

        timeout(config.connect_timeout, Self::establish(config, &address))
            .await
            .map_err(|_| Self::connect_timed_out(config, &address))?
    }

    async fn establish(config: &DeliveryConfig, address: &str) -> SmtpResult<Self> {
        let stream = Self::open(config, address).await?;

        let mut transport = Self {
            stream,
            command_timeout: config.connect_timeout,
            tls_enabled: config.secure,
            closed: false,
            host: config.host.clone(),
        };

        let greeting = transport.read_response().await.map_err(|e| {
            if e.kind() == SmtpErrorKind::ReadTimeout {
                Self::connect_timed_out(config, address)
            } else {
                e
            }
        })?;
        if !greeting.is_success() {
            return Err(greeting.to_error_as(SmtpErrorKind::GreetingRejected));
        }

        transport.command_timeout = config.command_timeout;
        Ok(transport)
    }

    fn connect_timed_out(config: &DeliveryConfig, address: &str) -> SmtpError {
        SmtpError::timeout(
            SmtpErrorKind::ConnectTimeout,
            format!("Connect to {} timed out after {:?}", address, config.connect_timeout),
        )
    }

    /// Resolves, connects and, for implicit TLS, completes the handshake.
    async fn open(config: &DeliveryConfig, address: &str) -> SmtpResult<TransportStream> {
        let addrs = Self::resolve(address).await?;
        let tcp = TcpStream::connect(addrs.as_slice())
            .await
            .map_err(|e| Self::map_io_error(e, address))?;
        tcp.set_nodelay(true).ok();

        if config.secure {
            tls_handshake(tcp, config).await
        } else {
            Ok(TransportStream::Plain(BufReader::new(tcp)))
        }
    }

    async fn resolve(address: &str) -> SmtpResult<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(address)
            .await
            .map_err(|e| {
                SmtpError::new(
                    SmtpErrorKind::DnsResolution,
                    format!("Cannot resolve {}: {}", address, e),
                )
                .with_cause(e)
            })?
            .collect();

        if addrs.is_empty() {
            return Err(SmtpError::new(
                SmtpErrorKind::DnsResolution,
                format!("No addresses found for {}", address),
            ));
        }
        Ok(addrs)
    }

    /// Maps connect-phase IO errors to SMTP errors.
    fn map_io_error(error: io::Error, address: &str) -> SmtpError {
        let kind = match error.kind() {
            io::ErrorKind::ConnectionRefused => SmtpErrorKind::ConnectionRefused,
            io::ErrorKind::TimedOut => SmtpErrorKind::ConnectTimeout,
            io::ErrorKind::ConnectionReset => SmtpErrorKind::ConnectionReset,
            _ => SmtpErrorKind::NetworkUnreachable,
        };
        SmtpError::new(kind, format!("Cannot connect to {}: {}", address, error)).with_cause(error)
    }

    /// Maps session IO errors to SMTP errors.
    fn session_error(context: &str, error: io::Error) -> SmtpError {
        SmtpError::new(SmtpErrorKind::ConnectionReset, format!("{}: {}", context, error))
            .with_cause(error)
    }

    fn detached() -> SmtpError {
        SmtpError::new(SmtpErrorKind::ConnectionReset, "Connection is not open")
    }

    /// Reads lines until we have a complete response.
    async fn read_response_inner<R: AsyncBufReadExt + Unpin>(
        reader: &mut R,
        timeout_duration: Duration,
    ) -> SmtpResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();

            let read = timeout(timeout_duration, reader.read_line(&mut line))
                .await
                .map_err(|_| SmtpError::timeout(SmtpErrorKind::ReadTimeout, "Read timed out"))?
                .map_err(|e| Self::session_error("Read error", e))?;

            if read == 0 {
                return Err(SmtpError::new(
                    SmtpErrorKind::ConnectionReset,
                    "Server closed connection",
                ));
            }

            let line = line.trim_end().to_string();

            // code-hyphen marks a continuation line
            let is_continuation = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        SmtpResponse::parse(&lines)
    }

    /// Writes data to the stream.
    async fn write_all<W: AsyncWrite + Unpin>(
        writer: &mut W,
        data: &[u8],
        timeout_duration: Duration,
    ) -> SmtpResult<()> {
        timeout(timeout_duration, writer.write_all(data))
            .await
            .map_err(|_| SmtpError::timeout(SmtpErrorKind::WriteTimeout, "Write timed out"))?
            .map_err(|e| Self::session_error("Write error", e))?;

        timeout(timeout_duration, writer.flush())
            .await
            .map_err(|_| SmtpError::timeout(SmtpErrorKind::WriteTimeout, "Flush timed out"))?
            .map_err(|e| Self::session_error("Flush error", e))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> SmtpResult<()> {
        let result = match &mut self.stream {
            TransportStream::Plain(stream) => stream.get_mut().shutdown().await,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => stream.get_mut().shutdown().await,
            #[cfg(feature = "native-tls")]
            TransportStream::NativeTls(stream) => stream.get_mut().shutdown().await,
            TransportStream::Detached => Ok(()),
        };
        self.stream = TransportStream::Detached;
        result.map_err(|e| Self::session_error("Shutdown error", e))
    }
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        let cmd_str = format!("{}\r\n", command.to_smtp_string());

        tracing::debug!(command = %command, "Sending SMTP command");

        self.send_data(cmd_str.as_bytes()).await?;
        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        match &mut self.stream {
            TransportStream::Plain(stream) => {
                Self::write_all(stream.get_mut(), data, self.command_timeout).await
            }
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => {
                Self::write_all(stream.get_mut(), data, self.command_timeout).await
            }
            #[cfg(feature = "native-tls")]
            TransportStream::NativeTls(stream) => {
                Self::write_all(stream.get_mut(), data, self.command_timeout).await
            }
            TransportStream::Detached => Err(Self::detached()),
        }
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        let response = match &mut self.stream {
            TransportStream::Plain(stream) => {
                Self::read_response_inner(stream, self.command_timeout).await?
            }
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => {
                Self::read_response_inner(stream, self.command_timeout).await?
            }
            #[cfg(feature = "native-tls")]
            TransportStream::NativeTls(stream) => {
                Self::read_response_inner(stream, self.command_timeout).await?
            }
            TransportStream::Detached => return Err(Self::detached()),
        };

        tracing::debug!(code = response.code, message = %response.first_message(), "Received SMTP response");

        Ok(response)
    }

    async fn upgrade_tls(&mut self, config: &DeliveryConfig) -> SmtpResult<()> {
        if self.tls_enabled {
            return Ok(());
        }

        let tcp = match std::mem::replace(&mut self.stream, TransportStream::Detached) {
            TransportStream::Plain(reader) => reader.into_inner(),
            other => {
                self.stream = other;
                return Err(SmtpError::tls("Connection is not in plaintext mode"));
            }
        };

        self.stream = timeout(self.command_timeout, tls_handshake(tcp, config))
            .await
            .map_err(|_| {
                SmtpError::timeout(SmtpErrorKind::ConnectTimeout, "TLS handshake timed out")
            })??;
        self.tls_enabled = true;

        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    async fn close(&mut self) -> SmtpResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let quit = self.send_command(&SmtpCommand::Quit).await;
        let shutdown = self.shutdown().await;
        quit?;
        shutdown
    }
}

/// Loads extra trust anchors from a PEM file.
async fn read_ca_file(config: &DeliveryConfig) -> SmtpResult<Option<Vec<u8>>> {
    let Some(path) = &config.ca_cert_path else {
        return Ok(None);
    };
    tokio::fs::read(path).await.map(Some).map_err(|e| {
        SmtpError::configuration(format!("Cannot read CA file {}: {}", path.display(), e))
            .with_cause(e)
    })
}

#[cfg(feature = "rustls-tls")]
async fn tls_handshake(tcp: TcpStream, config: &DeliveryConfig) -> SmtpResult<TransportStream> {
    use rustls::pki_types::ServerName;
    use std::sync::Arc;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(pem) = read_ca_file(config).await? {
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| {
                SmtpError::configuration(format!("Invalid PEM in CA file: {}", e)).with_cause(e)
            })?;
            root_store.add(cert).map_err(|e| {
                SmtpError::configuration(format!("Invalid CA certificate: {}", e)).with_cause(e)
            })?;
        }
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|_| SmtpError::tls(format!("Invalid server name: {}", config.host)))?;

    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))?;

    Ok(TransportStream::Tls(BufReader::new(tls_stream)))
}

#[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
async fn tls_handshake(tcp: TcpStream, config: &DeliveryConfig) -> SmtpResult<TransportStream> {
    let mut builder = native_tls::TlsConnector::builder();

    if let Some(pem) = read_ca_file(config).await? {
        let cert = native_tls::Certificate::from_pem(&pem).map_err(|e| {
            SmtpError::configuration(format!("Invalid CA certificate: {}", e)).with_cause(e)
        })?;
        builder.add_root_certificate(cert);
    }

    let connector = builder
        .build()
        .map_err(|e| SmtpError::tls(format!("Failed to build TLS connector: {}", e)))?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let tls_stream = connector
        .connect(&config.host, tcp)
        .await
        .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))?;

    Ok(TransportStream::NativeTls(BufReader::new(tls_stream)))
}

#[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
async fn tls_handshake(_tcp: TcpStream, config: &DeliveryConfig) -> SmtpResult<TransportStream> {
    read_ca_file(config).await?;
    Err(SmtpError::tls("No TLS implementation available"))
}
