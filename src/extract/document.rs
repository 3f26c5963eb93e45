use std::io::Read;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

/// Closed set of document formats we parse. Everything that is not PDF or
/// DOCX is treated as UTF-8 plain text; adding a format means adding a
/// variant here and an arm in `extract_document_text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Plain,
}

impl DocumentKind {
    /// Dispatch on the file extension, case-insensitive.
    #[inline]
    pub fn from_file_name(file_name: &str) -> Self {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => DocumentKind::Pdf,
            "docx" => DocumentKind::Docx,
            _ => DocumentKind::Plain,
        }
    }
}

/// Extract plain text from an uploaded document.
///
/// Parse failure is an error, never an empty result: silently indexing
/// nothing would leave the tenant believing the file was trained on.
#[inline]
pub fn extract_document_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    let kind = DocumentKind::from_file_name(file_name);
    debug!("Extracting text from {} as {:?}", file_name, kind);

    let text = match kind {
        DocumentKind::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .with_context(|| format!("Failed to parse PDF: {file_name}"))?,
        DocumentKind::Docx => docx_to_text(bytes)
            .with_context(|| format!("Failed to parse DOCX: {file_name}"))?,
        DocumentKind::Plain => String::from_utf8_lossy(bytes).into_owned(),
    };

    if text.trim().is_empty() {
        warn!("No text extracted from {}", file_name);
    }

    Ok(text)
}

/// Pull the body text out of a DOCX container.
///
/// A DOCX is a zip holding `word/document.xml`; paragraph close tags become
/// newlines and the remaining markup is stripped.
fn docx_to_text(bytes: &[u8]) -> Result<String> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor).context("Not a valid DOCX (zip) container")?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("DOCX is missing word/document.xml")?
        .read_to_string(&mut xml)
        .context("Failed to read document.xml")?;

    let with_breaks = xml.replace("</w:p>", "\n").replace("<w:br/>", "\n");

    let tag_re = Regex::new(r"<[^>]+>").expect("static regex is valid");
    let stripped = tag_re.replace_all(&with_breaks, "");

    let decoded = stripped
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'");

    Ok(decoded.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_docx(document_xml: &str) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("word/document.xml", SimpleFileOptions::default())
                .expect("should start zip entry");
            writer
                .write_all(document_xml.as_bytes())
                .expect("should write zip entry");
            writer.finish().expect("should finish zip");
        }
        buffer.into_inner()
    }

    #[test]
    fn dispatch_by_extension() {
        assert_eq!(DocumentKind::from_file_name("manual.pdf"), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_file_name("Report.DOCX"), DocumentKind::Docx);
        assert_eq!(DocumentKind::from_file_name("notes.txt"), DocumentKind::Plain);
        assert_eq!(DocumentKind::from_file_name("README.md"), DocumentKind::Plain);
        assert_eq!(DocumentKind::from_file_name("no_extension"), DocumentKind::Plain);
    }

    #[test]
    fn plain_text_passes_through() {
        let text = extract_document_text("notes.txt", b"hello world").expect("should extract");
        assert_eq!(text, "hello world");
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0"?><w:document><w:body><w:p><w:r><w:t>First paragraph</w:t></w:r></w:p><w:p><w:r><w:t>Second &amp; third</w:t></w:r></w:p></w:body></w:document>"#;
        let bytes = build_docx(xml);

        let text = extract_document_text("report.docx", &bytes).expect("should extract");
        assert_eq!(text, "First paragraph\nSecond & third");
    }

    #[test]
    fn invalid_docx_fails() {
        let result = extract_document_text("broken.docx", b"this is not a zip");
        assert!(result.is_err());
    }

    #[test]
    fn docx_without_document_xml_fails() {
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("other.xml", SimpleFileOptions::default())
                .expect("should start zip entry");
            writer.write_all(b"<x/>").expect("should write");
            writer.finish().expect("should finish");
        }

        let result = extract_document_text("empty.docx", &buffer.into_inner());
        assert!(result.is_err());
    }

    #[test]
    fn invalid_pdf_fails() {
        let result = extract_document_text("broken.pdf", b"not a pdf at all");
        assert!(result.is_err());
    }
}
