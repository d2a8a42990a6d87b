//! Email channel: RFC 822 intake via mail-parser, SMTP replies via lettre.
//!
//! Inbound mail arrives over the webhook (`POST /api/inbound/email`) as the
//! raw message. Replies go out through the configured SMTP relay, threaded
//! onto the original with `In-Reply-To` and `References`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use uuid::Uuid;

use crate::channels::ReplySender;
use crate::error::ChannelError;
use crate::pipeline::types::{Channel, InboundMessage};

/// Implicit-TLS SMTP port; every other port uses STARTTLS.
const SMTPS_PORT: u16 = 465;

// ── Configuration ───────────────────────────────────────────────────

/// SMTP configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Display name on outgoing mail.
    pub from_name: Option<String>,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `SMTP_HOST` is not set (email replies disabled).
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;

        let smtp_port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("SMTP_FROM").unwrap_or_else(|_| username.clone());
        let from_name = std::env::var("SMTP_FROM_NAME").ok().filter(|s| !s.is_empty());

        Some(Self {
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            from_name,
        })
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

/// Parse a raw RFC 822 message into an `InboundMessage`.
///
/// The body is the text part with quoted history removed; HTML-only mail is
/// reduced to text. Mail without a usable `From` address is rejected.
pub fn parse_raw_email(raw: &[u8]) -> Result<InboundMessage, ChannelError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| ChannelError::InvalidMessage("not an RFC 822 message".into()))?;

    let from = parsed.from().and_then(|addr| addr.first());
    let sender = from
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .filter(|s| s.contains('@'))
        .ok_or_else(|| ChannelError::InvalidMessage("missing From address".into()))?;
    let sender_name = from
        .and_then(|a| a.name())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let reply_to = parsed
        .reply_to()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string());

    let subject = parsed.subject().unwrap_or_default().trim().to_string();

    let body = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };
    let content = strip_quoted_text(&body);

    if subject.is_empty() && content.trim().is_empty() {
        return Err(ChannelError::InvalidMessage(
            "message has neither subject nor body".into(),
        ));
    }

    // Messages without a Message-ID get a generated one; they cannot be
    // deduplicated across retries.
    let message_id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}@support-triage", Uuid::new_v4()));

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    Ok(InboundMessage {
        id: message_id.clone(),
        channel: Channel::Email,
        sender,
        sender_name,
        subject: subject.clone(),
        content,
        reply_metadata: serde_json::json!({
            "message_id": message_id,
            "subject": subject,
            "reply_to": reply_to,
        }),
        received_at,
    })
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip quoted history from an email body.
///
/// Removes `>`-prefixed lines and everything after an attribution line
/// ("On ... wrote:", "Em ... escreveu:") or an original-message separator.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        let is_attribution = (trimmed.starts_with("On ") && trimmed.ends_with("wrote:"))
            || (trimmed.starts_with("Em ") && trimmed.ends_with("escreveu:"));
        let is_separator = trimmed.starts_with("---")
            && (trimmed.contains("Original Message") || trimmed.contains("Mensagem original"));
        if is_attribution || is_separator {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// Subject for a reply: prefix `Re: ` unless already present.
pub fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.is_empty() {
        "Re: sua mensagem".to_string()
    } else if subject.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

// ── Outbound ────────────────────────────────────────────────────────

/// Delivers auto-replies over SMTP.
pub struct SmtpReplySender {
    config: EmailConfig,
}

impl SmtpReplySender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn send_failed(reason: String) -> ChannelError {
        ChannelError::SendFailed {
            name: "email".into(),
            reason,
        }
    }

    /// Build the reply message for `original`.
    pub fn build_reply(
        &self,
        original: &InboundMessage,
        reply: &str,
    ) -> Result<Message, ChannelError> {
        let meta = &original.reply_metadata;
        let to_address = meta["reply_to"]
            .as_str()
            .filter(|s| !s.is_empty())
            .unwrap_or(&original.sender);

        let from = Mailbox::new(
            self.config.from_name.clone(),
            self.config
                .from_address
                .parse()
                .map_err(|e| Self::send_failed(format!("Invalid from address: {e}")))?,
        );
        let to = Mailbox::new(
            original.sender_name.clone(),
            to_address
                .parse()
                .map_err(|e| Self::send_failed(format!("Invalid to address: {e}")))?,
        );

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(reply_subject(&original.subject))
            .header(ContentType::TEXT_PLAIN);

        if let Some(message_id) = meta["message_id"].as_str() {
            let id = format!("<{}>", message_id.trim_matches(['<', '>']));
            builder = builder.in_reply_to(id.clone()).references(id);
        }

        builder
            .body(reply.to_string())
            .map_err(|e| Self::send_failed(format!("Failed to build email: {e}")))
    }

    fn transport(config: &EmailConfig) -> Result<SmtpTransport, ChannelError> {
        let relay = if config.smtp_port == SMTPS_PORT {
            SmtpTransport::relay(&config.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&config.smtp_host)
        };
        let builder = relay
            .map_err(|e| Self::send_failed(format!("SMTP relay error: {e}")))?
            .port(config.smtp_port);

        let builder = if config.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            ))
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl ReplySender for SmtpReplySender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send_reply(&self, message: &InboundMessage, reply: &str) -> Result<(), ChannelError> {
        let email = self.build_reply(message, reply)?;
        let config = self.config.clone();

        // lettre's SmtpTransport is blocking
        tokio::task::spawn_blocking(move || {
            let transport = Self::transport(&config)?;
            transport
                .send(&email)
                .map_err(|e| Self::send_failed(format!("SMTP send failed: {e}")))
        })
        .await
        .map_err(|e| Self::send_failed(format!("SMTP task failed: {e}")))??;

        info!(to = %message.sender, "Auto-reply email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "From: Ana Souza <ana@example.com>\r\n\
        To: suporte@empresa.com\r\n\
        Subject: Segunda via do boleto\r\n\
        Message-ID: <abc123@example.com>\r\n\
        Date: Tue, 14 Jan 2025 10:00:00 +0000\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Preciso da segunda via do boleto de janeiro.\r\n\
        \r\n\
        On Mon, Jan 13, 2025 at 9:00 AM Suporte <suporte@empresa.com> wrote:\r\n\
        > Como podemos ajudar?\r\n";

    fn sender() -> SmtpReplySender {
        SmtpReplySender::new(EmailConfig {
            smtp_host: "smtp.test.com".into(),
            smtp_port: 587,
            username: "suporte".into(),
            password: SecretString::from("pass"),
            from_address: "suporte@empresa.com".into(),
            from_name: Some("Suporte".into()),
        })
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parses_headers_and_body() {
        let msg = parse_raw_email(SIMPLE.as_bytes()).unwrap();
        assert_eq!(msg.channel, Channel::Email);
        assert_eq!(msg.id, "abc123@example.com");
        assert_eq!(msg.sender, "ana@example.com");
        assert_eq!(msg.sender_name.as_deref(), Some("Ana Souza"));
        assert_eq!(msg.subject, "Segunda via do boleto");
        assert_eq!(msg.content, "Preciso da segunda via do boleto de janeiro.");
        assert_eq!(msg.received_at.timestamp(), 1_736_848_800);
        assert_eq!(msg.reply_metadata["message_id"], "abc123@example.com");
    }

    #[test]
    fn html_only_mail_is_reduced_to_text() {
        let raw = "From: bia@example.com\r\n\
            Subject: Acesso\r\n\
            Message-ID: <h1@example.com>\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <html><body><p>Nao consigo <b>acessar</b> minha conta</p></body></html>\r\n";
        let msg = parse_raw_email(raw.as_bytes()).unwrap();
        assert!(msg.content.contains("acessar"));
        assert!(!msg.content.contains("<p>"));
    }

    #[test]
    fn missing_message_id_gets_generated() {
        let raw = "From: bia@example.com\r\nSubject: Oi\r\n\r\nOla\r\n";
        let msg = parse_raw_email(raw.as_bytes()).unwrap();
        assert!(msg.id.ends_with("@support-triage"));
    }

    #[test]
    fn missing_from_is_rejected() {
        let raw = "Subject: Oi\r\n\r\nOla\r\n";
        assert!(matches!(
            parse_raw_email(raw.as_bytes()),
            Err(ChannelError::InvalidMessage(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_raw_email(b"").is_err());
    }

    #[test]
    fn reply_to_header_is_kept() {
        let raw = "From: sistema@example.com\r\n\
            Reply-To: cliente@example.com\r\n\
            Subject: Pedido\r\n\
            \r\n\
            Onde esta meu pedido?\r\n";
        let msg = parse_raw_email(raw.as_bytes()).unwrap();
        assert_eq!(msg.reply_metadata["reply_to"], "cliente@example.com");
    }

    // ── Text helpers ────────────────────────────────────────────────

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(
            strip_html("<div><b>Bold</b> and <i>italic</i></div>"),
            "Bold and italic"
        );
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn strip_html_separates_blocks() {
        assert_eq!(strip_html("<p>Um</p><p>Dois</p>"), "Um Dois");
    }

    #[test]
    fn strip_quoted_lines() {
        let body = "Hello!\n\n> This is quoted\n> Another quoted line\nThanks";
        assert_eq!(strip_quoted_text(body), "Hello!\n\nThanks");
    }

    #[test]
    fn strip_portuguese_attribution() {
        let body = "Obrigada!\n\nEm seg., 13 de jan. de 2025 às 09:00, Suporte escreveu:\nTexto antigo";
        assert_eq!(strip_quoted_text(body), "Obrigada!");
    }

    #[test]
    fn strip_original_message_separator() {
        let body = "Minha resposta\n\n--- Original Message ---\nOld stuff here";
        assert_eq!(strip_quoted_text(body), "Minha resposta");
    }

    #[test]
    fn reply_subject_prefixes_once() {
        assert_eq!(reply_subject("Fatura"), "Re: Fatura");
        assert_eq!(reply_subject("RE: Fatura"), "RE: Fatura");
        assert_eq!(reply_subject(""), "Re: sua mensagem");
    }

    // ── Outbound ────────────────────────────────────────────────────

    #[test]
    fn reply_is_threaded() {
        let original = parse_raw_email(SIMPLE.as_bytes()).unwrap();
        let email = sender().build_reply(&original, "Segue o boleto.").unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();

        assert!(raw.contains("In-Reply-To: <abc123@example.com>"));
        assert!(raw.contains("References: <abc123@example.com>"));
        assert!(raw.contains("Subject: Re: Segunda via do boleto"));
        assert!(raw.contains("ana@example.com"));
    }

    #[test]
    fn reply_goes_to_reply_to_address() {
        let raw = "From: sistema@example.com\r\n\
            Reply-To: cliente@example.com\r\n\
            Subject: Pedido\r\n\
            \r\n\
            Onde esta meu pedido?\r\n";
        let original = parse_raw_email(raw.as_bytes()).unwrap();
        let email = sender().build_reply(&original, "Já foi enviado.").unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("To: cliente@example.com"));
    }

    #[test]
    fn invalid_recipient_fails_to_build() {
        let mut original = parse_raw_email(SIMPLE.as_bytes()).unwrap();
        original.sender = "not an address".into();
        original.reply_metadata = serde_json::json!({});
        assert!(sender().build_reply(&original, "x").is_err());
    }

    #[test]
    fn config_from_env_returns_none_when_no_host() {
        // SAFETY: no other test reads SMTP_HOST.
        unsafe { std::env::remove_var("SMTP_HOST") };
        assert!(EmailConfig::from_env().is_none());
    }
}
