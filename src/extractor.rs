//! Content extraction: normalizes a raw message plus its binary attachments
//! into evaluable plain text
//!
//! Everything here degrades instead of failing: a missing header is an empty
//! string, an undecodable body is empty content, a corrupt attachment yields
//! empty text. The pipeline continues with whatever input survives.

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::models::{Attachment, MimePart, RawMessage};

/// Mime types accepted as resume attachments
pub const RESUME_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

const PDF_MIME: &str = "application/pdf";
const DOC_MIME: &str = "application/msword";
const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Placeholder for legacy .doc files; reliable text extraction is not attempted
pub const DOC_PLACEHOLDER: &str = "[DOC file detected, text extraction not supported]";

/// Maximum characters of extracted attachment text included per attachment
pub const ATTACHMENT_TEXT_CAP: usize = 5000;

/// Case-insensitive header lookup. Returns an empty string if absent.
pub fn header_value(message: &RawMessage, name: &str) -> String {
    message
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}

/// Extract the message body as plain text.
///
/// Prefers the first `text/plain` part found by a depth-first walk of the
/// MIME tree, falls back to a single-part body, then to the server snippet.
pub fn extract_body(message: &RawMessage) -> String {
    let payload = match &message.payload {
        Some(p) => p,
        None => return message.snippet.clone(),
    };

    if !payload.parts.is_empty() {
        if let Some(text) = find_text_plain(&payload.parts) {
            return text;
        }
    }

    // Single-part message
    if let Some(data) = &payload.body_data {
        return decode_text(data);
    }

    message.snippet.clone()
}

/// Depth-first search for the first text/plain part carrying data
fn find_text_plain(parts: &[MimePart]) -> Option<String> {
    for part in parts {
        if part.mime_type == "text/plain" {
            if let Some(data) = &part.body_data {
                return Some(decode_text(data));
            }
        }
        if let Some(text) = find_text_plain(&part.parts) {
            return Some(text);
        }
    }
    None
}

/// Body bytes to text. Invalid UTF-8 degrades lossily rather than erroring.
fn decode_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

/// Collect every part that looks like a resume attachment: named, with a
/// remote attachment reference, and an accepted mime type. Other parts are
/// ignored regardless of depth.
pub fn collect_attachments(message: &RawMessage) -> Vec<Attachment> {
    let mut attachments = Vec::new();
    if let Some(payload) = &message.payload {
        collect_from_part(payload, &mut attachments);
    }
    attachments
}

fn collect_from_part(part: &MimePart, out: &mut Vec<Attachment>) {
    if !part.parts.is_empty() {
        for child in &part.parts {
            collect_from_part(child, out);
        }
        return;
    }

    if let (Some(filename), Some(attachment_id)) = (&part.filename, &part.attachment_id) {
        if RESUME_MIME_TYPES.contains(&part.mime_type.as_str()) {
            out.push(Attachment {
                filename: filename.clone(),
                mime_type: part.mime_type.clone(),
                attachment_id: attachment_id.clone(),
                text: String::new(),
            });
        }
    }
}

/// Extract text from attachment bytes, dispatching on mime type.
///
/// PDF and DOCX go through a scoped temporary-file round trip because the
/// parser libraries operate on file handles; the temp file is deleted on
/// every exit path. Failures degrade to empty text, never an error.
pub fn extract_attachment_text(mime_type: &str, filename: &str, bytes: &[u8]) -> String {
    let result = match mime_type {
        PDF_MIME => extract_pdf_text(bytes),
        DOCX_MIME => extract_docx_text(bytes),
        DOC_MIME => return DOC_PLACEHOLDER.to_string(),
        other => {
            debug!("No text extractor for mime type {}", other);
            return String::new();
        }
    };

    match result {
        Ok(text) => {
            debug!(
                "Extracted {} chars of text from attachment {}",
                text.len(),
                filename
            );
            text
        }
        Err(e) => {
            warn!("Failed to extract text from attachment {}: {}", filename, e);
            String::new()
        }
    }
}

fn extract_pdf_text(bytes: &[u8]) -> std::result::Result<String, String> {
    // NamedTempFile deletes itself on drop, covering every exit path
    let mut tmp = tempfile::Builder::new()
        .prefix("triage-att-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| e.to_string())?;
    tmp.write_all(bytes).map_err(|e| e.to_string())?;
    tmp.flush().map_err(|e| e.to_string())?;

    // pdf-extract can panic on malformed input; contain it
    let path = tmp.path().to_path_buf();
    let extracted = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(&path)));

    match extracted {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(format!("PDF parse error: {}", e)),
        Err(_) => Err("PDF parser panicked on malformed input".to_string()),
    }
}

static DOCX_PARAGRAPH_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"</w:p>").unwrap());
static XML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

fn extract_docx_text(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut tmp = tempfile::Builder::new()
        .prefix("triage-att-")
        .suffix(".docx")
        .tempfile()
        .map_err(|e| e.to_string())?;
    tmp.write_all(bytes).map_err(|e| e.to_string())?;
    tmp.flush().map_err(|e| e.to_string())?;

    let file = std::fs::File::open(tmp.path()).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut document = archive
        .by_name("word/document.xml")
        .map_err(|e| format!("No document.xml in archive: {}", e))?;

    let mut xml = String::new();
    document
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;

    // Paragraph boundaries become newlines, remaining markup is stripped
    let with_breaks = DOCX_PARAGRAPH_END.replace_all(&xml, "\n");
    let text = XML_TAG.replace_all(&with_breaks, "");

    Ok(text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .trim()
        .to_string())
}

/// Concatenate subject, sender, body and attachment text into the single
/// evaluation input. No other signal reaches the classifier.
pub fn assemble_evaluation_text(
    subject: &str,
    sender: &str,
    body: &str,
    attachments: &[Attachment],
) -> String {
    let mut content = String::new();
    content.push_str(&format!("Subject: {}\n\n", subject));
    content.push_str(&format!("From: {}\n\n", sender));
    content.push_str(&format!("Content: {}\n\n", body));

    if !attachments.is_empty() {
        content.push_str("\n\n=== RESUME/CV ATTACHMENTS ===\n");
        for (index, attachment) in attachments.iter().enumerate() {
            content.push_str(&format!(
                "\nAttachment {}: {}\n",
                index + 1,
                attachment.filename
            ));
            content.push_str(&format!("Type: {}\n", attachment.mime_type));
            if attachment.text.trim().is_empty() {
                content.push_str("Content: [No text extracted]\n");
            } else {
                let capped: String = attachment.text.chars().take(ATTACHMENT_TEXT_CAP).collect();
                content.push_str(&format!("Content: {}\n", capped));
            }
        }
    }

    content
}
