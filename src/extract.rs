//! Text extraction for ingested files.
//!
//! | Extension | Handling |
//! |-----------|----------|
//! | `.txt`, `.md` | UTF-8, falling back to Latin-1 for legacy encodings |
//! | `.pdf` | `pdf-extract` |
//! | `.docx` | `word/document.xml` runs (`w:t`), one line per paragraph |
//!
//! Anything else is rejected with [`IngestionError::UnsupportedFormat`].
//! Extraction never panics on malformed input; the caller skips the file.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use ragdesk_core::error::IngestionError;
use thiserror::Error;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Markdown,
    Pdf,
    Docx,
}

impl Format {
    /// Detect the format from a file name's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Format> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "text" => Some(Format::Text),
            "md" | "markdown" => Some(Format::Markdown),
            "pdf" => Some(Format::Pdf),
            "docx" => Some(Format::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Markdown => "markdown",
            Format::Pdf => "pdf",
            Format::Docx => "docx",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Text pulled out of a file on disk.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    pub filename: String,
    pub text: String,
    pub format: Format,
    pub size: u64,
}

/// Read and extract a file, enforcing `max_bytes`.
pub fn extract_file(path: &Path, max_bytes: u64) -> Result<ExtractedFile, IngestionError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let format = Format::from_filename(&filename)
        .ok_or_else(|| IngestionError::UnsupportedFormat(filename.clone()))?;

    let unreadable = |e: std::io::Error| IngestionError::Unreadable {
        filename: filename.clone(),
        reason: e.to_string(),
    };
    let size = std::fs::metadata(path).map_err(unreadable)?.len();
    if size > max_bytes {
        return Err(IngestionError::TooLarge {
            filename,
            size,
            limit: max_bytes,
        });
    }
    let bytes = std::fs::read(path).map_err(unreadable)?;

    let text = extract_bytes(&bytes, format).map_err(|e| IngestionError::Unreadable {
        filename: filename.clone(),
        reason: e.to_string(),
    })?;

    Ok(ExtractedFile {
        filename,
        text,
        format,
        size,
    })
}

/// Extract plain text from in-memory content of a known format.
pub fn extract_bytes(bytes: &[u8], format: Format) -> Result<String, ExtractError> {
    match format {
        Format::Text | Format::Markdown => Ok(decode_text(bytes)),
        Format::Pdf => extract_pdf(bytes),
        Format::Docx => extract_docx(bytes),
    }
}

/// UTF-8 if valid, otherwise Latin-1 (every byte maps to one code point).
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraphs(&doc_xml)
}

/// Collect `w:t` runs, ending each `w:p` paragraph with a newline.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let line = paragraph.trim();
                    if !line.is_empty() {
                        out.push_str(line);
                        out.push('\n');
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" => paragraph.push(' '),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = paragraph.trim();
    if !tail.is_empty() {
        out.push_str(tail);
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options: zip::write::SimpleFileOptions = Default::default();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(Format::from_filename("a.TXT"), Some(Format::Text));
        assert_eq!(Format::from_filename("notes.md"), Some(Format::Markdown));
        assert_eq!(Format::from_filename("r.pdf"), Some(Format::Pdf));
        assert_eq!(Format::from_filename("r.docx"), Some(Format::Docx));
        assert_eq!(Format::from_filename("sheet.xlsx"), None);
        assert_eq!(Format::from_filename("README"), None);
    }

    #[test]
    fn test_latin1_fallback() {
        let bytes = b"caf\xe9 cr\xe8me";
        assert_eq!(decode_text(bytes), "café crème");
        assert_eq!(decode_text("naïve".as_bytes()), "naïve");
    }

    #[test]
    fn test_docx_paragraphs_and_spacing() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Scope 1</w:t></w:r><w:r><w:t xml:space="preserve"> emissions &amp; targets</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second paragraph.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = extract_bytes(&docx_bytes(xml), Format::Docx).unwrap();
        assert_eq!(text, "Scope 1 emissions & targets\nSecond paragraph.");
    }

    #[test]
    fn test_invalid_pdf_returns_error() {
        let err = extract_bytes(b"not a pdf", Format::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_invalid_zip_returns_error_for_docx() {
        let err = extract_bytes(b"not a zip", Format::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn test_extract_file_rules() {
        let dir = tempfile::tempdir().unwrap();

        let txt = dir.path().join("report.txt");
        std::fs::write(&txt, "Annual report.").unwrap();
        let extracted = extract_file(&txt, 1024).unwrap();
        assert_eq!(extracted.filename, "report.txt");
        assert_eq!(extracted.text, "Annual report.");
        assert_eq!(extracted.size, 14);

        assert!(matches!(
            extract_file(&txt, 4),
            Err(IngestionError::TooLarge { size: 14, limit: 4, .. })
        ));

        let csv = dir.path().join("data.csv");
        std::fs::write(&csv, "a,b").unwrap();
        assert!(matches!(
            extract_file(&csv, 1024),
            Err(IngestionError::UnsupportedFormat(_))
        ));

        assert!(matches!(
            extract_file(&dir.path().join("missing.txt"), 1024),
            Err(IngestionError::Unreadable { .. })
        ));
    }
}
