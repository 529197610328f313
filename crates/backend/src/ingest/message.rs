//! Typed mail messages.
//!
//! Provider JSON is deserialized into the `Wire*` structs and immediately
//! converted into [`RawMessage`], whose [`MessagePayload`] distinguishes the
//! three body shapes the extractor understands.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// How much of a message the provider should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    /// Headers only
    Metadata,
    /// Headers and every body part
    Full,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Metadata => "metadata",
            MessageFormat::Full => "full",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A leaf MIME part. `data` is the provider's base64url text, still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    pub mime_type: String,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartNode {
    Leaf(BodyPart),
    Container { mime_type: String, parts: Vec<PartNode> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    /// Body data sits directly on the top-level payload
    SinglePart(BodyPart),
    /// A flat list of leaf parts
    Multipart(Vec<BodyPart>),
    /// At least one part is itself a multipart container
    Nested(Vec<PartNode>),
    /// No body at all, as returned by metadata fetches
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub headers: Vec<Header>,
    /// Provider receive time, used when the `Date` header cannot be parsed
    pub internal_date: Option<DateTime<Utc>>,
    pub payload: MessagePayload,
}

impl RawMessage {
    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

// ============================================================================
// Provider wire format
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: String,
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<WirePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Option<Vec<WireHeader>>,
    #[serde(default)]
    pub body: Option<WireBody>,
    #[serde(default)]
    pub parts: Option<Vec<WirePayload>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireHeader {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireBody {
    #[serde(default)]
    pub data: Option<String>,
}

impl WirePayload {
    fn children(&self) -> &[WirePayload] {
        self.parts.as_deref().unwrap_or_default()
    }

    fn mime(&self) -> String {
        self.mime_type
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    fn into_body_part(self) -> BodyPart {
        let mime_type = self.mime();
        BodyPart {
            mime_type,
            data: self.body.and_then(|b| b.data).filter(|d| !d.is_empty()),
        }
    }
}

impl From<WirePayload> for PartNode {
    fn from(wire: WirePayload) -> Self {
        if wire.children().is_empty() {
            PartNode::Leaf(wire.into_body_part())
        } else {
            let mime_type = wire.mime();
            PartNode::Container {
                mime_type,
                parts: wire
                    .parts
                    .unwrap_or_default()
                    .into_iter()
                    .map(PartNode::from)
                    .collect(),
            }
        }
    }
}

impl From<WirePayload> for MessagePayload {
    fn from(wire: WirePayload) -> Self {
        if wire.children().is_empty() {
            let part = wire.into_body_part();
            return if part.data.is_some() {
                MessagePayload::SinglePart(part)
            } else {
                MessagePayload::Empty
            };
        }

        let parts = wire.parts.unwrap_or_default();
        if parts.iter().all(|p| p.children().is_empty()) {
            MessagePayload::Multipart(parts.into_iter().map(WirePayload::into_body_part).collect())
        } else {
            MessagePayload::Nested(parts.into_iter().map(PartNode::from).collect())
        }
    }
}

impl From<WireMessage> for RawMessage {
    fn from(wire: WireMessage) -> Self {
        let internal_date = wire
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        let mut payload = wire.payload.unwrap_or_default();
        let headers = payload
            .headers
            .take()
            .unwrap_or_default()
            .into_iter()
            .map(|h| Header::new(h.name, h.value))
            .collect();

        RawMessage {
            id: wire.id,
            headers,
            internal_date,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> RawMessage {
        serde_json::from_str::<WireMessage>(json).unwrap().into()
    }

    #[test]
    fn test_single_part_payload() {
        let msg = parse(
            r#"{"id":"m1","internalDate":"1704067200000","payload":{
                "mimeType":"text/plain",
                "headers":[{"name":"Subject","value":"Hello"}],
                "body":{"size":5,"data":"aGVsbG8"}}}"#,
        );

        assert_eq!(msg.id, "m1");
        assert_eq!(msg.header("subject"), Some("Hello"));
        assert_eq!(
            msg.internal_date,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            msg.payload,
            MessagePayload::SinglePart(BodyPart {
                mime_type: "text/plain".to_string(),
                data: Some("aGVsbG8".to_string()),
            })
        );
    }

    #[test]
    fn test_flat_multipart_payload() {
        let msg = parse(
            r#"{"id":"m2","payload":{"mimeType":"multipart/alternative","body":{"size":0},
                "parts":[
                  {"mimeType":"text/plain","body":{"data":"YQ"}},
                  {"mimeType":"TEXT/HTML","body":{"data":"Yg"}}]}}"#,
        );

        match msg.payload {
            MessagePayload::Multipart(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[1].mime_type, "text/html");
            }
            other => panic!("expected multipart, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_multipart_payload() {
        let msg = parse(
            r#"{"id":"m3","payload":{"mimeType":"multipart/mixed","parts":[
                  {"mimeType":"multipart/alternative","parts":[
                     {"mimeType":"text/plain","body":{"data":"YQ"}},
                     {"mimeType":"text/html","body":{"data":"Yg"}}]},
                  {"mimeType":"application/pdf","filename":"a.pdf","body":{"attachmentId":"x"}}]}}"#,
        );

        match msg.payload {
            MessagePayload::Nested(nodes) => {
                assert!(matches!(&nodes[0], PartNode::Container { parts, .. } if parts.len() == 2));
                assert!(matches!(&nodes[1], PartNode::Leaf(BodyPart { data: None, .. })));
            }
            other => panic!("expected nested, got {:?}", other),
        }
    }

    #[test]
    fn test_metadata_payload_is_empty() {
        let msg = parse(
            r#"{"id":"m4","payload":{"headers":[{"name":"From","value":"a@b.com"}]}}"#,
        );

        assert_eq!(msg.payload, MessagePayload::Empty);
        assert_eq!(msg.header("From"), Some("a@b.com"));
    }
}
