//! MIME encoding for outbound messages.
//!
//! Provides RFC 5322 message formatting with:
//! - Header encoding (RFC 2047) and folding
//! - Quoted-printable body and Base64 attachment encoding
//! - `multipart/mixed` construction
//! - Content-type inference for attachment files

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::types::{Address, Attachment, BodyType};

/// Extensions that denote a compression or archive encoding rather than a
/// content type. Files carrying them are sent as opaque bytes.
const ENCODING_SUFFIXES: &[&str] = &[
    "gz", "Z", "bz2", "xz", "br", "svgz", "tgz", "taz", "tz", "tbz2", "txz",
];

/// Longest encoded-word payload before splitting (RFC 2047 caps a word at 75).
const ENCODED_WORD_CHUNK: usize = 45;

/// Infers `(main type, subtype)` from a path's extension.
///
/// Unknown extensions and compression encodings fall back to
/// `application/octet-stream`.
pub fn infer_content_type(path: &Path) -> (String, String) {
    let fallback = || {
        (
            ::mime::APPLICATION.as_str().to_string(),
            ::mime::OCTET_STREAM.as_str().to_string(),
        )
    };

    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return fallback();
    };

    let encoded = ENCODING_SUFFIXES
        .iter()
        .any(|s| *s == ext || (*s != "Z" && s.eq_ignore_ascii_case(ext)));
    if encoded {
        return fallback();
    }

    match mime_guess::from_path(path).first() {
        Some(guess) => (
            guess.type_().as_str().to_string(),
            guess.subtype().as_str().to_string(),
        ),
        None => fallback(),
    }
}

/// Encodes a header value as RFC 2047 `B` encoded words when it is not plain
/// printable ASCII. Long values are split into several words separated by
/// spaces so the header can be folded.
pub fn encode_word(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in value.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_CHUNK {
            words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(chunk.as_bytes())));
    }
    words.join(" ")
}

/// A message ready to be serialized.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Sender.
    pub from: Address,
    /// Recipients, rendered into the To header in order.
    pub to: Vec<Address>,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// Body content type.
    pub body_type: BodyType,
    /// Attachments, in order.
    pub attachments: Vec<Attachment>,
    /// Message-ID without angle brackets.
    pub message_id: String,
}

impl OutboundMessage {
    /// Creates a message with a fresh Message-ID under the sender's domain.
    pub fn new(
        from: Address,
        to: Vec<Address>,
        subject: impl Into<String>,
        body: impl Into<String>,
        body_type: BodyType,
        attachments: Vec<Attachment>,
    ) -> Self {
        let domain = from
            .email()
            .rsplit_once('@')
            .map(|(_, d)| d.to_string())
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            from,
            to,
            subject: subject.into(),
            body: body.into(),
            body_type,
            attachments,
            message_id: generate_message_id(&domain),
        }
    }
}

/// MIME encoder for outbound messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeEncoder;

impl MimeEncoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self
    }

    /// Encodes a message to RFC 5322 format, dated now.
    pub fn encode(&self, message: &OutboundMessage) -> SmtpResult<Vec<u8>> {
        self.encode_at(message, Utc::now())
    }

    /// Encodes a message to RFC 5322 format with an explicit Date.
    pub fn encode_at(&self, message: &OutboundMessage, date: DateTime<Utc>) -> SmtpResult<Vec<u8>> {
        let mut output = Vec::new();

        self.write_header(&mut output, "Date", &format_date(date))?;
        self.write_header(&mut output, "From", &message.from.to_header())?;

        let to_list: Vec<String> = message.to.iter().map(|a| a.to_header()).collect();
        self.write_header(&mut output, "To", &to_list.join(", "))?;

        self.write_header(&mut output, "Subject", &encode_word(&message.subject))?;
        self.write_header(&mut output, "Message-ID", &format!("<{}>", message.message_id))?;
        self.write_header(&mut output, "MIME-Version", "1.0")?;

        let boundary = generate_boundary();
        self.write_header(
            &mut output,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{}\"", boundary),
        )?;
        output.extend_from_slice(b"\r\n");

        output.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        self.write_body_part(&mut output, message)?;

        for attachment in &message.attachments {
            output.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            self.write_attachment(&mut output, attachment)?;
        }

        output.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        Ok(output)
    }

    /// Writes a header line.
    fn write_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> SmtpResult<()> {
        if name.chars().any(|c| c.is_control() || c == ':') {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidHeader,
                format!("Invalid header name: {}", name),
            ));
        }

        // A bare CR or LF in a value would start a new header.
        if value.contains(['\r', '\n']) {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidHeader,
                format!("Line break in {} header", name),
            ));
        }

        let header = format!("{}: {}", name, value);
        output.extend_from_slice(fold_header(&header).as_bytes());
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    fn write_body_part(&self, output: &mut Vec<u8>, message: &OutboundMessage) -> SmtpResult<()> {
        self.write_header(
            output,
            "Content-Type",
            &format!("text/{}; charset=\"utf-8\"", message.body_type.subtype()),
        )?;
        self.write_header(output, "Content-Transfer-Encoding", "quoted-printable")?;
        output.extend_from_slice(b"\r\n");

        let normalized = normalize_line_endings(&message.body);
        output.extend_from_slice(&quoted_printable::encode(normalized.as_bytes()));
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    fn write_attachment(&self, output: &mut Vec<u8>, attachment: &Attachment) -> SmtpResult<()> {
        let (name_param, filename_param) = if attachment.filename.is_ascii() {
            let quoted = quote_param(&attachment.filename);
            (
                format!("name=\"{}\"", quoted),
                format!("filename=\"{}\"", quoted),
            )
        } else {
            (
                format!("name=\"{}\"", encode_word(&attachment.filename)),
                format!("filename*=utf-8''{}", percent_encode(&attachment.filename)),
            )
        };

        self.write_header(
            output,
            "Content-Type",
            &format!("{}; {}", attachment.content_type, name_param),
        )?;
        self.write_header(output, "Content-Transfer-Encoding", "base64")?;
        self.write_header(
            output,
            "Content-Disposition",
            &format!("attachment; {}", filename_param),
        )?;
        output.extend_from_slice(b"\r\n");

        let encoded = BASE64.encode(&attachment.data);
        for chunk in encoded.as_bytes().chunks(76) {
            output.extend_from_slice(chunk);
            output.extend_from_slice(b"\r\n");
        }

        Ok(())
    }

    /// Prepares the DATA content with dot-stuffing and the terminating
    /// `<CRLF>.<CRLF>`.
    pub fn prepare_data_content(encoded_email: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(encoded_email.len() + 100);
        let mut at_line_start = true;

        for &byte in encoded_email {
            if at_line_start && byte == b'.' {
                output.push(b'.');
            }

            output.push(byte);
            at_line_start = byte == b'\n';
        }

        if !output.ends_with(b"\r\n") {
            if output.ends_with(b"\n") {
                output.pop();
            }
            output.extend_from_slice(b"\r\n");
        }

        output.extend_from_slice(b".\r\n");
        output
    }
}

/// Folds a header line at 78 characters on spaces.
fn fold_header(header: &str) -> String {
    if header.len() <= 78 {
        return header.to_string();
    }

    let mut result = String::new();
    let mut current_line = String::new();

    for word in header.split(' ') {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= 76 {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            result.push_str(&current_line);
            result.push_str("\r\n ");
            current_line = word.to_string();
        }
    }

    result.push_str(&current_line);
    result
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\r\n")
}

fn quote_param(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// RFC 2231 percent-encoding of a UTF-8 parameter value.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn generate_message_id(domain: &str) -> String {
    format!("{}.{}@{}", Uuid::new_v4().simple(), Utc::now().timestamp(), domain)
}

fn generate_boundary() -> String {
    format!("----=_Part_{}", Uuid::new_v4().simple())
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn message(body_type: BodyType, attachments: Vec<Attachment>) -> OutboundMessage {
        OutboundMessage::new(
            Address::with_name("Sender", "sender@example.com").unwrap(),
            vec![
                Address::new("a@example.com").unwrap(),
                Address::new("b@example.com").unwrap(),
            ],
            "Test Subject",
            "Hello World!",
            body_type,
            attachments,
        )
    }

    fn encode(message: &OutboundMessage) -> String {
        let encoded = MimeEncoder::new().encode(message).unwrap();
        String::from_utf8(encoded).unwrap()
    }

    #[rstest]
    #[case("report.pdf", "application", "pdf")]
    #[case("notes.txt", "text", "plain")]
    #[case("page.html", "text", "html")]
    #[case("photo.JPG", "image", "jpeg")]
    #[case("dir/sub/data.csv", "text", "csv")]
    #[case("archive.tar.gz", "application", "octet-stream")]
    #[case("backup.tgz", "application", "octet-stream")]
    #[case("dump.sql.bz2", "application", "octet-stream")]
    #[case("old.Z", "application", "octet-stream")]
    #[case("logo.svgz", "application", "octet-stream")]
    #[case("logo.svg", "image", "svg+xml")]
    #[case("blob.unknownext", "application", "octet-stream")]
    #[case("README", "application", "octet-stream")]
    fn test_infer_content_type(#[case] path: &str, #[case] main: &str, #[case] sub: &str) {
        let (m, s) = infer_content_type(Path::new(path));
        assert_eq!((m.as_str(), s.as_str()), (main, sub));
    }

    #[test]
    fn test_encode_word() {
        assert_eq!(encode_word("Hello"), "Hello");

        let encoded = encode_word("Héllo");
        assert!(encoded.starts_with("=?UTF-8?B?"));
        assert!(encoded.ends_with("?="));

        let long = "ü".repeat(60);
        let encoded = encode_word(&long);
        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);
        assert!(words.iter().all(|w| w.len() <= 75));
    }

    #[test]
    fn test_headers() {
        let msg = message(BodyType::Plain, vec![]);
        let content = encode(&msg);
        let unfolded = content.replace("\r\n ", " ");

        assert!(content.contains("From: Sender <sender@example.com>\r\n"));
        assert!(content.contains("To: a@example.com, b@example.com\r\n"));
        assert!(content.contains("Subject: Test Subject\r\n"));
        assert!(content.contains("MIME-Version: 1.0\r\n"));
        assert!(content.contains(&format!("Message-ID: <{}>\r\n", msg.message_id)));
        assert!(msg.message_id.ends_with("@example.com"));
        assert!(unfolded.contains("Content-Type: multipart/mixed; boundary=\"----=_Part_"));
    }

    #[rstest]
    #[case(BodyType::Plain, "text/plain")]
    #[case(BodyType::Html, "text/html")]
    fn test_body_type_preserved(#[case] body_type: BodyType, #[case] expected: &str) {
        let mut msg = message(body_type, vec![]);
        msg.body = "<p>Hello</p>".to_string();
        let content = encode(&msg);

        assert!(content.contains(&format!("Content-Type: {}; charset=\"utf-8\"\r\n", expected)));
        assert!(content.contains("<p>Hello</p>"));
    }

    #[test]
    fn test_attachment_part() {
        let attachment = Attachment::new("report.pdf", "application/pdf", b"%PDF-1.4".to_vec());
        let content = encode(&message(BodyType::Plain, vec![attachment]));

        assert!(content.contains("Content-Type: application/pdf; name=\"report.pdf\"\r\n"));
        assert!(content.contains("Content-Transfer-Encoding: base64\r\n"));
        assert!(content.contains("Content-Disposition: attachment; filename=\"report.pdf\"\r\n"));
        assert!(content.contains(&BASE64.encode(b"%PDF-1.4")));
        assert_eq!(content.matches("--\r\n").count(), 1);
    }

    #[test]
    fn test_non_ascii_attachment_name() {
        let attachment = Attachment::new("résumé.txt", "text/plain", b"cv".to_vec());
        let content = encode(&message(BodyType::Plain, vec![attachment]));

        assert!(content.contains("filename*=utf-8''r%C3%A9sum%C3%A9.txt"));
        assert!(content.contains("name=\"=?UTF-8?B?"));
    }

    #[test]
    fn test_header_injection_rejected() {
        let mut msg = message(BodyType::Plain, vec![]);
        msg.subject = "Hi\r\nBcc: victim@example.com".to_string();
        let content = encode(&msg);
        assert!(!content.contains("\r\nBcc:"));

        let err = MimeEncoder::new()
            .write_header(&mut Vec::new(), "X-Test", "a\nb")
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidHeader);
    }

    #[test]
    fn test_body_line_endings_normalized() {
        let mut msg = message(BodyType::Plain, vec![]);
        msg.body = "line one\nline two".to_string();
        let content = encode(&msg);
        assert!(content.contains("line one\r\nline two\r\n"));
    }

    #[test]
    fn test_dot_stuffing() {
        let input = b"Hello\r\n.World\r\n..Test\r\n";
        let output = MimeEncoder::prepare_data_content(input);
        let output_str = String::from_utf8_lossy(&output);
        assert!(output_str.contains("\r\n..World"));
        assert!(output_str.contains("\r\n...Test"));
        assert!(output_str.ends_with("\r\n.\r\n"));

        let output = MimeEncoder::prepare_data_content(b"no newline");
        assert_eq!(output, b"no newline\r\n.\r\n");
    }
}
