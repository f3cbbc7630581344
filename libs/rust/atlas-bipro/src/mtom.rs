//! MTOM/XOP response splitting
//!
//! `getShipment` responses arrive as `multipart/related` bodies: a root
//! `application/xop+xml` SOAP part plus one binary part per attachment,
//! referenced from the envelope via `xop:Include href="cid:..."`. The
//! splitter reassembles the XOP-inlined envelope and pulls the shipment
//! documents out of `transfer:Nachricht/Dokumente/Dokument`.
//!
//! Header parsing is case-insensitive; CID references are compared after
//! stripping angle brackets, URL-encoding and the `cid:` prefix. A
//! referenced-but-missing part does not abort the split: the affected
//! document is emitted with `missing_part = true` and the orchestrator
//! refuses to acknowledge the shipment.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;

use crate::error::TransferError;

/// One document extracted from the shipment envelope.
#[derive(Debug, Clone)]
pub struct MtomDocument {
    /// Original filename as the carrier named it, when present.
    pub filename: Option<String>,
    pub mime_type: String,
    pub content: Vec<u8>,
    /// Set when the envelope referenced a multipart part that was absent.
    pub missing_part: bool,
}

/// Result of splitting a `getShipment` response.
#[derive(Debug, Clone)]
pub struct MtomMessage {
    /// The XOP-inlined SOAP envelope (binary parts re-encoded as base64).
    pub envelope: String,
    pub documents: Vec<MtomDocument>,
}

impl MtomMessage {
    /// True when any referenced part was missing from the multipart body.
    pub fn has_missing_parts(&self) -> bool {
        self.documents.iter().any(|d| d.missing_part)
    }
}

/// Default MIME type for BiPRO attachments that do not declare one.
const DEFAULT_MIME: &str = "application/octet-stream";

/// Split an HTTP response body according to its `Content-Type`.
///
/// Plain `text/xml` responses (no attachments) pass through with inline
/// base64 documents decoded; `multipart/related` responses are split and
/// XOP references resolved.
pub fn split_response(content_type: &str, body: &[u8]) -> Result<MtomMessage, TransferError> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if media_type != "multipart/related" {
        let envelope = String::from_utf8_lossy(body).into_owned();
        return inline_envelope(&envelope, &HashMap::new());
    }

    let boundary = content_type_param(content_type, "boundary").ok_or_else(|| {
        TransferError::Fatal("multipart/related without boundary parameter".into())
    })?;
    let start_cid = content_type_param(content_type, "start").map(|s| normalize_cid(&s));

    let parts = split_multipart(body, &boundary)?;
    if parts.is_empty() {
        return Err(TransferError::Fatal("multipart body contains no parts".into()));
    }

    let mut by_cid: HashMap<String, usize> = HashMap::new();
    for (idx, part) in parts.iter().enumerate() {
        if let Some(cid) = &part.content_id {
            by_cid.insert(normalize_cid(cid), idx);
        }
    }

    let root_idx = start_cid
        .as_deref()
        .and_then(|cid| by_cid.get(cid).copied())
        .unwrap_or(0);
    let envelope = String::from_utf8_lossy(&parts[root_idx].content).into_owned();

    let binary_parts: HashMap<String, &[u8]> = by_cid
        .iter()
        .filter(|(_, idx)| **idx != root_idx)
        .map(|(cid, idx)| (cid.clone(), parts[*idx].content.as_slice()))
        .collect();

    inline_envelope(&envelope, &binary_parts)
}

#[derive(Debug)]
struct RawPart {
    content_id: Option<String>,
    content: Vec<u8>,
}

/// Walk the envelope once: rewrite `xop:Include` references to inline
/// base64 and capture the shipment documents.
fn inline_envelope(
    envelope: &str,
    parts: &HashMap<String, &[u8]>,
) -> Result<MtomMessage, TransferError> {
    #[derive(Default)]
    struct DocCapture {
        filename: Option<String>,
        mime_type: Option<String>,
        content: Option<Vec<u8>>,
        missing_part: bool,
    }

    let mut reader = Reader::from_str(envelope);
    let mut writer = Writer::new(Vec::new());
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<DocCapture> = None;
    let mut documents = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| TransferError::Fatal(format!("malformed envelope XML: {e}")))?;
        match event {
            Event::Eof => break,
            Event::Start(ref start) => {
                let local = local_name_lower(start.local_name().as_ref());
                if local == "dokument" {
                    current = Some(DocCapture::default());
                }
                stack.push(local);
                writer
                    .write_event(event.borrow())
                    .map_err(write_err)?;
            }
            Event::End(ref end) => {
                let local = local_name_lower(end.local_name().as_ref());
                stack.pop();
                if local == "dokument" {
                    if let Some(doc) = current.take() {
                        documents.push(MtomDocument {
                            filename: doc.filename,
                            mime_type: doc.mime_type.unwrap_or_else(|| DEFAULT_MIME.to_string()),
                            missing_part: doc.missing_part || doc.content.is_none(),
                            content: doc.content.unwrap_or_default(),
                        });
                    }
                }
                writer
                    .write_event(event.borrow())
                    .map_err(write_err)?;
            }
            Event::Empty(ref empty) => {
                let local = local_name_lower(empty.local_name().as_ref());
                if local == "include" {
                    let href = empty
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"href")
                        .and_then(|a| a.unescape_value().ok())
                        .map(|v| normalize_cid(&v))
                        .unwrap_or_default();

                    match parts.get(&href) {
                        Some(bytes) => {
                            // Replace the reference with the part content,
                            // base64-encoded as the schema type demands.
                            let b64 = BASE64.encode(bytes);
                            writer
                                .write_event(Event::Text(BytesText::new(&b64)))
                                .map_err(write_err)?;
                            if let Some(doc) = current.as_mut() {
                                if in_content_element(&stack) {
                                    doc.content = Some(bytes.to_vec());
                                }
                            }
                        }
                        None => {
                            // Keep the unresolved reference in the envelope
                            // and flag the document.
                            writer
                                .write_event(event.borrow())
                                .map_err(write_err)?;
                            if let Some(doc) = current.as_mut() {
                                doc.missing_part = true;
                            }
                        }
                    }
                } else {
                    writer
                        .write_event(event.borrow())
                        .map_err(write_err)?;
                }
            }
            Event::Text(ref text) => {
                if let Some(doc) = current.as_mut() {
                    if let Ok(value) = text.unescape() {
                        let value = value.trim();
                        if !value.is_empty() {
                            match stack.last().map(String::as_str) {
                                Some("dateiname") | Some("filename") => {
                                    doc.filename = Some(value.to_string());
                                }
                                Some("mimetype") | Some("mime-type") | Some("contenttype") => {
                                    doc.mime_type = Some(value.to_string());
                                }
                                Some("daten") | Some("inhalt") | Some("data") => {
                                    let cleaned: String =
                                        value.chars().filter(|c| !c.is_whitespace()).collect();
                                    match BASE64.decode(cleaned.as_bytes()) {
                                        Ok(bytes) => doc.content = Some(bytes),
                                        Err(_) => doc.missing_part = true,
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                }
                writer
                    .write_event(event.borrow())
                    .map_err(write_err)?;
            }
            other => {
                writer.write_event(other.borrow()).map_err(write_err)?;
            }
        }
    }

    let envelope = String::from_utf8(writer.into_inner())
        .map_err(|e| TransferError::Fatal(format!("inlined envelope is not UTF-8: {e}")))?;
    Ok(MtomMessage {
        envelope,
        documents,
    })
}

fn in_content_element(stack: &[String]) -> bool {
    matches!(
        stack.last().map(String::as_str),
        Some("daten") | Some("inhalt") | Some("data")
    )
}

fn write_err<E: std::fmt::Display>(e: E) -> TransferError {
    TransferError::Fatal(format!("envelope rewrite failed: {e}"))
}

fn local_name_lower(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_ascii_lowercase()
}

/// Split a multipart body at its boundary delimiters.
///
/// Inner delimiters are matched as `\n--boundary` so boundary-looking byte
/// runs inside binary part content cannot terminate a part early.
fn split_multipart(body: &[u8], boundary: &str) -> Result<Vec<RawPart>, TransferError> {
    let open = format!("--{boundary}");
    let inner = format!("\n--{boundary}");

    let mut parts = Vec::new();
    let mut pos = find_subsequence(body, open.as_bytes())
        .ok_or_else(|| TransferError::Fatal("multipart boundary not found in body".into()))?
        + open.len();

    loop {
        // Closing delimiter ends the message.
        if body[pos..].starts_with(b"--") {
            break;
        }
        // Skip transport padding up to and including the newline after the
        // delimiter line.
        let line_end = find_subsequence(&body[pos..], b"\n")
            .map(|i| pos + i + 1)
            .ok_or_else(|| TransferError::Fatal("truncated multipart part".into()))?;
        let next = find_subsequence(&body[line_end..], inner.as_bytes())
            .map(|i| line_end + i)
            .ok_or_else(|| TransferError::Fatal("unterminated multipart part".into()))?;

        let mut segment = &body[line_end..next];
        if segment.ends_with(b"\r") {
            segment = &segment[..segment.len() - 1];
        }
        parts.push(parse_part(segment)?);
        pos = next + inner.len();
    }

    Ok(parts)
}

fn parse_part(segment: &[u8]) -> Result<RawPart, TransferError> {
    let (head, content) = match find_subsequence(segment, b"\r\n\r\n") {
        Some(i) => (&segment[..i], &segment[i + 4..]),
        None => match find_subsequence(segment, b"\n\n") {
            Some(i) => (&segment[..i], &segment[i + 2..]),
            None => (segment, &segment[segment.len()..]),
        },
    };

    let mut content_id = None;
    let mut transfer_encoding = None;
    for line in String::from_utf8_lossy(head).lines() {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-id" => content_id = Some(value.trim().to_string()),
                "content-transfer-encoding" => {
                    transfer_encoding = Some(value.trim().to_ascii_lowercase())
                }
                _ => {}
            }
        }
    }

    let content = match transfer_encoding.as_deref() {
        Some("base64") => {
            let cleaned: Vec<u8> = content
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            BASE64
                .decode(&cleaned)
                .map_err(|e| TransferError::Fatal(format!("invalid base64 part: {e}")))?
        }
        _ => content.to_vec(),
    };

    Ok(RawPart {
        content_id,
        content,
    })
}

/// Extract a parameter from a `Content-Type` header, case-insensitively.
fn content_type_param(header: &str, name: &str) -> Option<String> {
    for piece in header.split(';').skip(1) {
        let (key, value) = piece.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(name) {
            return Some(value.trim().trim_matches('"').to_string());
        }
    }
    None
}

/// Strip angle brackets, URL-encoding and the `cid:` scheme from a CID.
fn normalize_cid(raw: &str) -> String {
    let decoded = percent_decode(raw.trim());
    let stripped = decoded.trim_start_matches('<').trim_end_matches('>');
    let stripped = stripped.strip_prefix("cid:").unwrap_or(stripped);
    stripped.trim_start_matches('<').trim_end_matches('>').to_string()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
