//! Envelope assembly
//!
//! Builds the multipart RFC 822 structure for a queued message and encodes it
//! the way the Gmail send endpoint expects: URL-safe base64 with trailing
//! padding stripped. Pure and deterministic: identical inputs always produce
//! byte-identical output.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;

use crate::error::EnvelopeError;
use crate::models::QueuedMessage;

/// Line width for base64-encoded attachment bodies (RFC 2045 limit)
const BASE64_LINE_WIDTH: usize = 76;

/// Build the encoded envelope for a message.
///
/// `attachment` carries the original filename and the blob bytes when the
/// message has one that could be read. The multipart boundary is derived from
/// the message id, so the whole envelope is a pure function of its inputs.
pub fn build_envelope(
    msg: &QueuedMessage,
    attachment: Option<(&str, &[u8])>,
) -> Result<String, EnvelopeError> {
    let from = header_value("From", &msg.from)?;
    let to = header_value("To", &msg.to)?;
    let subject = header_value("Subject", &msg.subject)?;

    // The boundary must not occur in the body or a parser would cut the
    // part short. Extending it until it is absent keeps the output a pure
    // function of the inputs.
    let mut boundary = format!("=_courier_{}", msg.id.as_str());
    while msg.body.contains(&boundary) {
        boundary.push('_');
    }

    let mut mime = String::new();
    mime.push_str(&format!("From: {}\r\n", from));
    mime.push_str(&format!("To: {}\r\n", to));
    mime.push_str(&format!("Subject: {}\r\n", subject));
    mime.push_str("MIME-Version: 1.0\r\n");
    mime.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
        boundary
    ));

    // Part 1: plain-text body
    mime.push_str(&format!("--{}\r\n", boundary));
    mime.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
    mime.push_str(&msg.body);
    mime.push_str("\r\n");

    // Part 2: attachment, only when bytes were supplied
    if let Some((filename, bytes)) = attachment {
        let filename = header_value("Content-Disposition", filename)?;
        // A quote would terminate the filename parameter early
        if filename.contains('"') {
            return Err(EnvelopeError::HeaderInjection("Content-Disposition"));
        }
        mime.push_str(&format!("--{}\r\n", boundary));
        mime.push_str(&format!(
            "Content-Type: {}\r\n",
            content_type_for(&filename)
        ));
        mime.push_str("Content-Transfer-Encoding: base64\r\n");
        mime.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
            filename
        ));
        mime.push_str(&wrap_base64(&STANDARD.encode(bytes)));
        mime.push_str("\r\n");
    }

    mime.push_str(&format!("--{}--", boundary));

    Ok(URL_SAFE_NO_PAD.encode(mime.as_bytes()))
}

/// Validate a header value: CR/LF would let the value inject extra headers
fn header_value<'a>(name: &'static str, value: &'a str) -> Result<&'a str, EnvelopeError> {
    if value.contains('\r') || value.contains('\n') {
        return Err(EnvelopeError::HeaderInjection(name));
    }
    Ok(value)
}

/// Best-effort content type from a filename extension
fn content_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

/// Fold a base64 string into 76-column CRLF-separated lines
fn wrap_base64(encoded: &str) -> String {
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_WIDTH * 2);
    let mut rest = encoded;
    while rest.len() > BASE64_LINE_WIDTH {
        let (line, tail) = rest.split_at(BASE64_LINE_WIDTH);
        wrapped.push_str(line);
        wrapped.push_str("\r\n");
        rest = tail;
    }
    wrapped.push_str(rest);
    wrapped
}
