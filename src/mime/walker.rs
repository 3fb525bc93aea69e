//! Structure-tree traversal: body part lookup, attachment extraction and
//! the lightweight attachment manifest.
//!
//! The three walks reach different depths:
//! - [`MimeWalker::find_part`] descends depth-first through multipart
//!   containers and stops at the first match.
//! - [`MimeWalker::extract_attachments`] only looks at the top-level parts.
//! - [`attachment_count`] / [`attachment_list`] recurse through every level.

use serde::Serialize;

use crate::config::ManifestMode;
use crate::ids::Uid;
use crate::record::AttachmentRecord;
use crate::transport::{MailStream, TransportResult};

use super::{MimeNode, PartAddress, PrimaryType, TransferEncoding, qp};

// ── MimeWalker ──────────────────────────────────────────────────────────

/// Walks a message's structure tree, fetching part bodies from `stream`.
pub struct MimeWalker<'s> {
    stream: &'s mut dyn MailStream,
}

impl<'s> MimeWalker<'s> {
    pub fn new(stream: &'s mut dyn MailStream) -> Self {
        Self { stream }
    }

    /// Body of the first part whose `TYPE/SUBTYPE` equals `mime_type`
    /// (case-insensitive), in depth-first part-address order.
    ///
    /// Quoted-printable parts are decoded. An empty body counts as no
    /// match, so the search moves on to the next sibling.
    pub fn find_part(
        &mut self,
        uid: Uid,
        mime_type: &str,
        node: &MimeNode,
    ) -> TransportResult<Option<Vec<u8>>> {
        self.find_at(uid, mime_type, node, &PartAddress::root())
    }

    fn find_at(
        &mut self,
        uid: Uid,
        mime_type: &str,
        node: &MimeNode,
        address: &PartAddress,
    ) -> TransportResult<Option<Vec<u8>>> {
        if node.mime_type().eq_ignore_ascii_case(mime_type) {
            let body = self.stream.fetch_body(uid, address)?;
            if body.is_empty() {
                return Ok(None);
            }
            tracing::trace!(uid = %uid, part = %address.section(), mime_type, "matched part");
            return Ok(Some(decode_body(node.encoding, body)));
        }

        if node.primary == PrimaryType::Multipart {
            for (index, child) in (1u32..).zip(node.children()) {
                let found = self.find_at(uid, mime_type, child, &address.child(index))?;
                if found.is_some() {
                    return Ok(found);
                }
            }
        }

        Ok(None)
    }

    /// Attachments among the top-level parts of `root`.
    ///
    /// A part is an attachment when it has a disposition `filename` or a
    /// content-type `name` parameter. Nested multiparts are not searched.
    /// A payload that cannot be fetched degrades to empty.
    pub fn extract_attachments(&mut self, uid: Uid, root: &MimeNode) -> Vec<AttachmentRecord> {
        let mut attachments = Vec::new();

        for (index, part) in (1u32..).zip(root.children()) {
            let filename = part.dparam("filename");
            let name = part.param("name");
            if filename.is_none() && name.is_none() {
                continue;
            }

            let address = PartAddress::root().child(index);
            let raw = match self.stream.fetch_body(uid, &address) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(uid = %uid, part = %address, error = %e, "attachment fetch failed");
                    Vec::new()
                }
            };

            attachments.push(AttachmentRecord {
                mail_id: uid,
                message_id: uid,
                is_attachment: true,
                filename: filename.unwrap_or_default().to_string(),
                mime_type: part.mime_type(),
                kind: part.subtype.as_deref().unwrap_or_default().to_lowercase(),
                name: name.unwrap_or_default().to_string(),
                size: part.bytes,
                attachment: decode_body(part.encoding, raw),
                format: part.encoding.label().map(str::to_string),
            });
        }

        tracing::debug!(uid = %uid, count = attachments.len(), "extracted attachments");
        attachments
    }
}

fn decode_body(encoding: TransferEncoding, body: Vec<u8>) -> Vec<u8> {
    match encoding {
        TransferEncoding::QuotedPrintable => qp::decode(&body),
        _ => body,
    }
}

// ── Manifest ────────────────────────────────────────────────────────────

/// One element of a listed attachment manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ManifestEntry {
    Attachment {
        /// Numeric primary-type code.
        #[serde(rename = "type")]
        primary: u8,
        subtype: Option<String>,
        /// Value of the first disposition parameter.
        file: Option<String>,
        size: u64,
    },
    /// The attachments found below one nested container.
    Group(Vec<ManifestEntry>),
}

/// Number of children of `node` that contain at least one attachment.
///
/// A leaf counts 1 when its disposition is `attachment`. A nested
/// container contributes at most 1, however many attachments it holds.
pub fn attachment_count(node: &MimeNode) -> usize {
    if node.is_container() {
        node.children()
            .iter()
            .filter(|child| attachment_count(child) > 0)
            .count()
    } else {
        usize::from(node.is_attachment_disposition())
    }
}

/// Attachment summaries below `node`, nested the way the tree is.
///
/// Returns `None` for a leaf that is not an attachment. Empty groups are
/// left out of their parent.
pub fn attachment_list(node: &MimeNode) -> Option<ManifestEntry> {
    if node.is_container() {
        let entries = node
            .children()
            .iter()
            .filter_map(attachment_list)
            .filter(|entry| !matches!(entry, ManifestEntry::Group(items) if items.is_empty()))
            .collect();
        return Some(ManifestEntry::Group(entries));
    }

    node.is_attachment_disposition()
        .then(|| ManifestEntry::Attachment {
            primary: node.primary.code(),
            subtype: node.subtype.clone(),
            file: node.dparameters.first().map(|p| p.value.clone()),
            size: node.bytes,
        })
}

/// JSON-encoded attachment manifest of a message.
pub fn manifest(root: &MimeNode, mode: ManifestMode) -> String {
    let encoded = match mode {
        ManifestMode::Count => serde_json::to_string(&attachment_count(root)),
        ManifestMode::List => serde_json::to_string(
            &attachment_list(root).unwrap_or(ManifestEntry::Group(Vec::new())),
        ),
    };
    encoded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "attachment manifest encoding failed");
        String::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockMessage, MockTransport};

    fn html_text_tree() -> MimeNode {
        MimeNode::multipart(
            "MIXED",
            vec![
                MimeNode::multipart(
                    "ALTERNATIVE",
                    vec![
                        MimeNode::leaf(PrimaryType::Text, "PLAIN"),
                        MimeNode::leaf(PrimaryType::Text, "HTML")
                            .with_encoding(TransferEncoding::QuotedPrintable),
                    ],
                ),
                MimeNode::leaf(PrimaryType::Text, "HTML"),
            ],
        )
    }

    #[test]
    fn find_part_returns_first_depth_first_match() {
        let tree = html_text_tree();
        let mock = MockTransport::new();
        mock.add(
            MockMessage::new(1)
                .structure(tree.clone())
                .body("1.1", "plain text")
                .body("1.2", "<p>caf=C3=A9</p>")
                .body("2", "<p>second</p>"),
        );
        let mut stream = mock.stream();
        let mut walker = MimeWalker::new(stream.as_mut());

        let html = walker.find_part(Uid(1), "TEXT/HTML", &tree).unwrap();
        assert_eq!(html.as_deref(), Some("<p>café</p>".as_bytes()));

        let plain = walker.find_part(Uid(1), "text/plain", &tree).unwrap();
        assert_eq!(plain.as_deref(), Some("plain text".as_bytes()));
    }

    #[test]
    fn find_part_skips_empty_match() {
        let tree = html_text_tree();
        let mock = MockTransport::new();
        mock.add(
            MockMessage::new(1)
                .structure(tree.clone())
                .body("2", "<p>second</p>"),
        );
        let mut stream = mock.stream();
        let mut walker = MimeWalker::new(stream.as_mut());

        let html = walker.find_part(Uid(1), "TEXT/HTML", &tree).unwrap();
        assert_eq!(html.as_deref(), Some("<p>second</p>".as_bytes()));
    }

    #[test]
    fn find_part_on_single_part_message_fetches_part_one() {
        let tree = MimeNode::leaf(PrimaryType::Text, "PLAIN");
        let mock = MockTransport::new();
        mock.add(MockMessage::new(4).structure(tree.clone()).body("1", "hi"));
        let mut stream = mock.stream();
        let mut walker = MimeWalker::new(stream.as_mut());

        assert_eq!(
            walker.find_part(Uid(4), "TEXT/PLAIN", &tree).unwrap(),
            Some(b"hi".to_vec())
        );
        assert_eq!(walker.find_part(Uid(4), "TEXT/HTML", &tree).unwrap(), None);
    }

    #[test]
    fn extract_classifies_by_filename_or_name() {
        let tree = MimeNode::multipart(
            "MIXED",
            vec![
                MimeNode::leaf(PrimaryType::Text, "PLAIN"),
                MimeNode::leaf(PrimaryType::Image, "PNG")
                    .with_encoding(TransferEncoding::Base64)
                    .with_disposition("attachment")
                    .with_dparam("filename", "x.png")
                    .with_bytes(12),
                MimeNode::leaf(PrimaryType::Application, "PDF")
                    .with_encoding(TransferEncoding::QuotedPrintable)
                    .with_param("NAME", "y.pdf")
                    .with_bytes(7),
            ],
        );
        let mock = MockTransport::new();
        mock.add(
            MockMessage::new(9)
                .structure(tree.clone())
                .body("1", "text")
                .body("2", "iVBORw0KGgo=")
                .body("3", "a=3Db"),
        );
        let mut stream = mock.stream();
        let mut walker = MimeWalker::new(stream.as_mut());

        let attachments = walker.extract_attachments(Uid(9), &tree);
        assert_eq!(attachments.len(), 2);

        let png = &attachments[0];
        assert!(png.is_attachment);
        assert_eq!(png.filename, "x.png");
        assert_eq!(png.name, "");
        assert_eq!(png.mime_type, "IMAGE/PNG");
        assert_eq!(png.kind, "png");
        assert_eq!(png.size, 12);
        assert_eq!(png.format.as_deref(), Some("base64"));
        assert_eq!(png.attachment, b"iVBORw0KGgo=");

        let pdf = &attachments[1];
        assert_eq!(pdf.filename, "");
        assert_eq!(pdf.name, "y.pdf");
        assert_eq!(pdf.format, None);
        assert_eq!(pdf.attachment, b"a=b");
    }

    #[test]
    fn extract_passes_through_labelled_encodings() {
        let part = |enc: u8, file: &str| {
            MimeNode::leaf(PrimaryType::Application, "OCTET-STREAM")
                .with_encoding(TransferEncoding::from_code(enc))
                .with_dparam("filename", file)
        };
        let tree = MimeNode::multipart(
            "MIXED",
            vec![part(0, "a"), part(1, "b"), part(2, "c"), part(5, "d")],
        );
        let mock = MockTransport::new();
        mock.add(
            MockMessage::new(2)
                .structure(tree.clone())
                .body("1", "=41")
                .body("2", "=41")
                .body("3", "=41")
                .body("4", "=41"),
        );
        let mut stream = mock.stream();
        let mut walker = MimeWalker::new(stream.as_mut());

        let attachments = walker.extract_attachments(Uid(2), &tree);
        let labels: Vec<_> = attachments.iter().map(|a| a.format.as_deref()).collect();
        assert_eq!(labels, vec![Some("7BIT"), Some("8BIT"), Some("BINARY"), Some("OTHER")]);
        assert!(attachments.iter().all(|a| a.attachment == b"=41"));
    }

    #[test]
    fn extract_ignores_nested_attachments() {
        let tree = MimeNode::multipart(
            "MIXED",
            vec![MimeNode::multipart(
                "MIXED",
                vec![MimeNode::leaf(PrimaryType::Image, "GIF").with_dparam("filename", "n.gif")],
            )],
        );
        let mock = MockTransport::new();
        mock.add(MockMessage::new(3).structure(tree.clone()));
        let mut stream = mock.stream();
        let mut walker = MimeWalker::new(stream.as_mut());
        assert!(walker.extract_attachments(Uid(3), &tree).is_empty());
    }

    fn attached(file: &str) -> MimeNode {
        MimeNode::leaf(PrimaryType::Image, "JPEG")
            .with_disposition("Attachment")
            .with_dparam("filename", file)
            .with_bytes(100)
    }

    #[test]
    fn count_recurses_but_caps_nested_containers() {
        let tree = MimeNode::multipart(
            "MIXED",
            vec![
                MimeNode::leaf(PrimaryType::Text, "PLAIN").with_disposition("inline"),
                attached("a.jpg"),
                MimeNode::multipart("MIXED", vec![attached("b.jpg"), attached("c.jpg")]),
            ],
        );
        assert_eq!(attachment_count(&tree), 2);
        assert_eq!(manifest(&tree, ManifestMode::Count), "2");
        assert_eq!(attachment_count(&MimeNode::leaf(PrimaryType::Text, "PLAIN")), 0);
    }

    #[test]
    fn list_mode_nests_groups() {
        let tree = MimeNode::multipart(
            "MIXED",
            vec![
                MimeNode::leaf(PrimaryType::Text, "PLAIN"),
                attached("a.jpg"),
                MimeNode::multipart("ALTERNATIVE", vec![MimeNode::leaf(PrimaryType::Text, "HTML")]),
                MimeNode::multipart("MIXED", vec![attached("b.jpg")]),
            ],
        );
        let json: serde_json::Value =
            serde_json::from_str(&manifest(&tree, ManifestMode::List)).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"type": 5, "subtype": "JPEG", "file": "a.jpg", "size": 100},
                [{"type": 5, "subtype": "JPEG", "file": "b.jpg", "size": 100}]
            ])
        );
    }

    #[test]
    fn list_mode_without_attachments_is_empty_array() {
        let tree = MimeNode::leaf(PrimaryType::Text, "PLAIN");
        assert_eq!(manifest(&tree, ManifestMode::List), "[]");
    }
}
