//! Turns a [`RawMessage`] into normalized newsletter content.
//!
//! Body parts are decoded independently: a part that fails to decode is
//! logged and skipped, and whatever the other parts produced is kept.

use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;

use super::message::{BodyPart, MessagePayload, PartNode, RawMessage};

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

static EMAIL_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s<>]+@[^@\s<>]+\.[^@\s<>]+$").expect("email shape regex is valid")
});

/// What ends up in the HTML-derived body field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderMode {
    /// HTML flattened to readable text
    #[default]
    PlainText,
    /// HTML markup stored untouched
    RawHtml,
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plaintext" | "plain_text" | "text" => Ok(RenderMode::PlainText),
            "raw_html" | "rawhtml" | "html" => Ok(RenderMode::RawHtml),
            other => Err(format!("unknown render mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub render_mode: RenderMode,
    /// Column width for flattened HTML
    pub wrap_width: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::PlainText,
            wrap_width: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub subject: String,
    /// The `From` header as received
    pub from_display: String,
    pub from_name: Option<String>,
    pub from_email: String,
    /// The `Date` header as received
    pub date: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub plain_text: Option<String>,
    pub html_content: Option<String>,
}

/// Parse a `From` value such as `"Jane Doe" <Jane@Example.com>`.
///
/// The last `<...>` pair holds the address and everything before it is the
/// display name, so commas or earlier brackets stay in the name. Without
/// brackets the whole value is the address. The address is lowercased and
/// trimmed but not validated; see [`is_valid_email`].
pub fn parse_from_header(value: &str) -> ParsedAddress {
    let value = value.trim();

    if let (Some(start), Some(end)) = (value.rfind('<'), value.rfind('>')) {
        if start < end {
            let email = value[start + 1..end].trim().to_lowercase();
            let name = value[..start].trim().trim_matches('"').trim();
            let name = if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            };
            return ParsedAddress { name, email };
        }
    }

    ParsedAddress {
        name: None,
        email: value.trim_matches('"').trim().to_lowercase(),
    }
}

/// Loose `local@domain.tld` shape check.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_SHAPE.is_match(email)
}

/// Lowercased part after the last `@`, or empty when there is none.
pub fn email_domain(email: &str) -> String {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_lowercase())
        .unwrap_or_default()
}

pub fn extract_content(message: &RawMessage, options: &ExtractOptions) -> ExtractedContent {
    let from_display = message.header("From").unwrap_or_default().trim().to_string();
    let address = parse_from_header(&from_display);
    let date = message.header("Date").unwrap_or_default().trim().to_string();
    let sent_at = parse_date(&date).or(message.internal_date);

    let mut bodies = Bodies::default();
    match &message.payload {
        MessagePayload::SinglePart(part) => {
            extract_single_part(&message.id, part, options, &mut bodies)
        }
        MessagePayload::Multipart(parts) => {
            for part in parts {
                collect_leaf(&message.id, part, &mut bodies);
            }
            bodies.render_html(&message.id, options);
        }
        MessagePayload::Nested(nodes) => {
            collect_nodes(&message.id, nodes, &mut bodies);
            bodies.render_html(&message.id, options);
        }
        MessagePayload::Empty => {}
    }

    ExtractedContent {
        subject: message.header("Subject").unwrap_or_default().trim().to_string(),
        from_display,
        from_name: address.name,
        from_email: address.email,
        date,
        sent_at,
        plain_text: bodies.plain,
        html_content: bodies.html,
    }
}

#[derive(Debug, Default)]
struct Bodies {
    plain: Option<String>,
    html: Option<String>,
}

impl Bodies {
    fn render_html(&mut self, message_id: &str, options: &ExtractOptions) {
        if let Some(html) = self.html.take() {
            self.html = render_html(message_id, &html, options);
        }
    }
}

fn extract_single_part(
    message_id: &str,
    part: &BodyPart,
    options: &ExtractOptions,
    bodies: &mut Bodies,
) {
    let Some(data) = part.data.as_deref() else {
        return;
    };

    let text = match decode_body(data) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Message {}: undecodable body: {:#}", message_id, e);
            return;
        }
    };

    if mime_essence(&part.mime_type) == "text/html" {
        bodies.plain = html_to_text(&text, options.wrap_width);
        bodies.html = render_html(message_id, &text, options);
    } else {
        bodies.plain = Some(text);
    }
}

fn collect_nodes(message_id: &str, nodes: &[PartNode], bodies: &mut Bodies) {
    for node in nodes {
        match node {
            PartNode::Leaf(part) => collect_leaf(message_id, part, bodies),
            PartNode::Container { parts, .. } => collect_nodes(message_id, parts, bodies),
        }
    }
}

/// First decodable `text/plain` and `text/html` parts win.
fn collect_leaf(message_id: &str, part: &BodyPart, bodies: &mut Bodies) {
    let slot = match mime_essence(&part.mime_type) {
        "text/plain" => &mut bodies.plain,
        "text/html" => &mut bodies.html,
        _ => return,
    };
    if slot.is_some() {
        return;
    }
    let Some(data) = part.data.as_deref() else {
        return;
    };

    match decode_body(data) {
        Ok(text) => *slot = Some(text),
        Err(e) => {
            tracing::warn!(
                "Message {}: skipping undecodable {} part: {:#}",
                message_id,
                part.mime_type,
                e
            );
        }
    }
}

fn mime_essence(mime_type: &str) -> &str {
    mime_type.split(';').next().unwrap_or_default().trim()
}

/// Base64url first (the provider's encoding), then standard base64.
/// Invalid UTF-8 sequences are replaced rather than rejected.
fn decode_body(data: &str) -> Result<String> {
    let data = data.trim();
    let bytes = URL_SAFE_LENIENT
        .decode(data)
        .or_else(|_| STANDARD_LENIENT.decode(data))
        .context("base64 decode message body")?;

    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

fn render_html(message_id: &str, html: &str, options: &ExtractOptions) -> Option<String> {
    match options.render_mode {
        RenderMode::RawHtml => Some(html.to_string()),
        RenderMode::PlainText => {
            let text = html_to_text(html, options.wrap_width);
            if text.is_none() {
                tracing::warn!("Message {}: HTML part could not be rendered", message_id);
            }
            text
        }
    }
}

fn html_to_text(html: &str, width: usize) -> Option<String> {
    let rendered = std::panic::catch_unwind(|| html2text::from_read(html.as_bytes(), width)).ok()?;
    let text = rendered
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// RFC 2822 date, tolerating a trailing comment such as `(UTC)`.
fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = match date_str.find(" (") {
        Some(idx) if date_str.trim_end().ends_with(')') => &date_str[..idx],
        _ => date_str,
    };

    DateTime::parse_from_rfc2822(trimmed.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
