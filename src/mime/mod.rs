//! MIME structure trees, as reported by the server's body-structure fetch.
//!
//! A [`MimeNode`] is either a leaf part or a container of ordered children.
//! Primary types and transfer encodings keep their numeric server codes so
//! that the fixed type table and the per-code decoding rules apply directly.

pub mod qp;
pub mod walker;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use walker::{ManifestEntry, MimeWalker};

// ── PrimaryType ─────────────────────────────────────────────────────────

/// The top-level content type, indexed by its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimaryType {
    Text,
    Multipart,
    Message,
    Application,
    Audio,
    Image,
    Video,
    Other,
}

impl PrimaryType {
    /// The fixed primary-type table, in code order.
    pub const TABLE: [PrimaryType; 8] = [
        PrimaryType::Text,
        PrimaryType::Multipart,
        PrimaryType::Message,
        PrimaryType::Application,
        PrimaryType::Audio,
        PrimaryType::Image,
        PrimaryType::Video,
        PrimaryType::Other,
    ];

    /// Look a code up in the table; codes past the end are `Other`.
    pub fn from_code(code: u8) -> Self {
        Self::TABLE
            .get(usize::from(code))
            .copied()
            .unwrap_or(PrimaryType::Other)
    }

    pub fn code(self) -> u8 {
        match self {
            PrimaryType::Text => 0,
            PrimaryType::Multipart => 1,
            PrimaryType::Message => 2,
            PrimaryType::Application => 3,
            PrimaryType::Audio => 4,
            PrimaryType::Image => 5,
            PrimaryType::Video => 6,
            PrimaryType::Other => 7,
        }
    }

    /// Upper-case type name.
    pub fn name(self) -> &'static str {
        match self {
            PrimaryType::Text => "TEXT",
            PrimaryType::Multipart => "MULTIPART",
            PrimaryType::Message => "MESSAGE",
            PrimaryType::Application => "APPLICATION",
            PrimaryType::Audio => "AUDIO",
            PrimaryType::Image => "IMAGE",
            PrimaryType::Video => "VIDEO",
            PrimaryType::Other => "OTHER",
        }
    }

    /// Parse a content-type name case-insensitively. Unknown names are `Other`.
    pub fn from_name(name: &str) -> Self {
        Self::TABLE
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
            .unwrap_or(PrimaryType::Other)
    }
}

impl fmt::Display for PrimaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── TransferEncoding ────────────────────────────────────────────────────

/// Content-transfer-encoding, by numeric code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferEncoding {
    #[default]
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
    Other,
    /// A code outside the known range.
    Unknown(u8),
}

impl TransferEncoding {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => TransferEncoding::SevenBit,
            1 => TransferEncoding::EightBit,
            2 => TransferEncoding::Binary,
            3 => TransferEncoding::Base64,
            4 => TransferEncoding::QuotedPrintable,
            5 => TransferEncoding::Other,
            n => TransferEncoding::Unknown(n),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            TransferEncoding::SevenBit => 0,
            TransferEncoding::EightBit => 1,
            TransferEncoding::Binary => 2,
            TransferEncoding::Base64 => 3,
            TransferEncoding::QuotedPrintable => 4,
            TransferEncoding::Other => 5,
            TransferEncoding::Unknown(n) => n,
        }
    }

    /// Parse a `Content-Transfer-Encoding` header value.
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "7bit" => TransferEncoding::SevenBit,
            "8bit" => TransferEncoding::EightBit,
            "binary" => TransferEncoding::Binary,
            "base64" => TransferEncoding::Base64,
            "quoted-printable" => TransferEncoding::QuotedPrintable,
            _ => TransferEncoding::Other,
        }
    }

    /// Label attached to extracted attachments.
    ///
    /// Quoted-printable payloads are decoded, so they carry no label;
    /// neither do unknown codes.
    pub fn label(self) -> Option<&'static str> {
        match self {
            TransferEncoding::SevenBit => Some("7BIT"),
            TransferEncoding::EightBit => Some("8BIT"),
            TransferEncoding::Binary => Some("BINARY"),
            TransferEncoding::Base64 => Some("base64"),
            TransferEncoding::Other => Some("OTHER"),
            TransferEncoding::QuotedPrintable | TransferEncoding::Unknown(_) => None,
        }
    }
}

// ── MimeNode ────────────────────────────────────────────────────────────

/// One `attribute=value` parameter of a content-type or disposition header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub attribute: String,
    pub value: String,
}

impl Param {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

/// Leaf or container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf,
    Container(Vec<MimeNode>),
}

/// A node of a message's structure tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimeNode {
    pub primary: PrimaryType,
    /// Upper-case subtype (e.g. `"HTML"`), if the server reported one.
    pub subtype: Option<String>,
    pub encoding: TransferEncoding,
    /// Disposition type (e.g. `"attachment"`, `"inline"`).
    pub disposition: Option<String>,
    /// Content-disposition parameters.
    pub dparameters: Vec<Param>,
    /// Content-type parameters.
    pub parameters: Vec<Param>,
    pub bytes: u64,
    pub kind: NodeKind,
}

impl MimeNode {
    /// A leaf part of the given type.
    pub fn leaf(primary: PrimaryType, subtype: &str) -> Self {
        Self {
            primary,
            subtype: Some(subtype.to_ascii_uppercase()).filter(|s| !s.is_empty()),
            encoding: TransferEncoding::default(),
            disposition: None,
            dparameters: Vec::new(),
            parameters: Vec::new(),
            bytes: 0,
            kind: NodeKind::Leaf,
        }
    }

    /// A multipart container with the given children.
    pub fn multipart(subtype: &str, children: Vec<MimeNode>) -> Self {
        Self {
            kind: NodeKind::Container(children),
            ..Self::leaf(PrimaryType::Multipart, subtype)
        }
    }

    pub fn with_encoding(mut self, encoding: TransferEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_disposition(mut self, disposition: &str) -> Self {
        self.disposition = Some(disposition.to_string());
        self
    }

    pub fn with_dparam(mut self, attribute: &str, value: &str) -> Self {
        self.dparameters.push(Param::new(attribute, value));
        self
    }

    pub fn with_param(mut self, attribute: &str, value: &str) -> Self {
        self.parameters.push(Param::new(attribute, value));
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }

    /// `TYPE/SUBTYPE`, defaulting to `TEXT/PLAIN` without a subtype.
    pub fn mime_type(&self) -> String {
        match &self.subtype {
            Some(sub) => format!("{}/{}", self.primary.name(), sub),
            None => "TEXT/PLAIN".to_string(),
        }
    }

    pub fn children(&self) -> &[MimeNode] {
        match &self.kind {
            NodeKind::Container(children) => children,
            NodeKind::Leaf => &[],
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container(_))
    }

    /// Whether the disposition is `attachment` (case-insensitive).
    pub fn is_attachment_disposition(&self) -> bool {
        self.disposition
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case("attachment"))
    }

    /// First content-disposition parameter named `attribute`, case-insensitive.
    pub fn dparam(&self, attribute: &str) -> Option<&str> {
        find_param(&self.dparameters, attribute)
    }

    /// First content-type parameter named `attribute`, case-insensitive.
    pub fn param(&self, attribute: &str) -> Option<&str> {
        find_param(&self.parameters, attribute)
    }
}

fn find_param<'a>(params: &'a [Param], attribute: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|p| p.attribute.eq_ignore_ascii_case(attribute))
        .map(|p| p.value.as_str())
}

// ── PartAddress ─────────────────────────────────────────────────────────

/// Dotted, 1-based position of a part within the structure tree.
///
/// The empty address names the message root; it is fetched as part `1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartAddress(Vec<u32>);

impl PartAddress {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<u32>) -> Self {
        Self(segments)
    }

    /// Address of the `index`-th (1-based) child of this part.
    pub fn child(&self, index: u32) -> Self {
        let mut segments = self.0.clone();
        segments.push(index);
        Self(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[u32] {
        &self.0
    }

    /// The section specifier sent to the server.
    pub fn section(&self) -> String {
        if self.0.is_empty() {
            "1".to_string()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for PartAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}
