//! Plain-text extraction for uploaded documents.
//!
//! | Format | Media types | Extensions | Strategy |
//! |--------|-------------|------------|----------|
//! | PDF | `application/pdf` | `.pdf` | per-page text, blank pages dropped |
//! | DOCX | OOXML wordprocessing | `.docx` | `w:p` paragraphs of `word/document.xml` |
//! | Plain text | `text/plain`, `text/markdown` | `.txt`, `.md` | lossy UTF-8 |
//! | HTML | `text/html` | `.html`, `.htm` | chrome elements removed, rendered to text |
//!
//! The declared media type wins; the file extension is the fallback.
//! Extraction is read-only and never panics on malformed input.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use regex::Regex;
use thiserror::Error;

use docchat_core::error::RagError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_HTML: &str = "text/html";

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Elements whose content never reaches the extracted text.
const HTML_CHROME_TAGS: &[&str] = &["script", "style", "nav", "footer", "header"];

/// Render width for html2text; wide enough that it never re-wraps lines.
const HTML_RENDER_WIDTH: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    PlainText,
    Html,
}

impl DocumentFormat {
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let base = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match base.as_str() {
            MIME_PDF => Some(DocumentFormat::Pdf),
            MIME_DOCX => Some(DocumentFormat::Docx),
            MIME_TEXT | MIME_MARKDOWN | "text/x-markdown" => Some(DocumentFormat::PlainText),
            MIME_HTML => Some(DocumentFormat::Html),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "txt" | "md" => Some(DocumentFormat::PlainText),
            "html" | "htm" => Some(DocumentFormat::Html),
            _ => None,
        }
    }

    /// Declared media type first, then the extension.
    pub fn resolve(media_type: &str, path: &Path) -> Option<Self> {
        Self::from_media_type(media_type).or_else(|| Self::from_path(path))
    }

    /// Media type recorded when none was declared.
    pub fn media_type_for(path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(MIME_PDF),
            "docx" => Some(MIME_DOCX),
            "txt" => Some(MIME_TEXT),
            "md" => Some(MIME_MARKDOWN),
            "html" | "htm" => Some(MIME_HTML),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("HTML extraction failed: {0}")]
    Html(String),
}

impl From<ExtractError> for RagError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::Unsupported(what) => RagError::UnsupportedFormat(what),
            other => RagError::ExtractionFailure(other.to_string()),
        }
    }
}

/// Read `path` and extract its text according to `declared_type`.
pub fn extract(path: &Path, declared_type: &str) -> Result<String, ExtractError> {
    let format = DocumentFormat::resolve(declared_type, path).ok_or_else(|| {
        ExtractError::Unsupported(format!("{} ({})", path.display(), declared_type))
    })?;
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    extract_bytes(&bytes, format)
}

pub fn extract_bytes(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    match format {
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::PlainText => Ok(String::from_utf8_lossy(bytes).into_owned()),
        DocumentFormat::Html => extract_html(&String::from_utf8_lossy(bytes)),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(join_non_blank(pages.iter().map(String::as_str), "\n\n"))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(format!("word/document.xml: {e}")))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    let paragraphs = docx_paragraphs(&xml)?;
    Ok(join_non_blank(paragraphs.iter().map(String::as_str), "\n\n"))
}

/// Text of every `w:p`, with runs concatenated in order.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn extract_html(html: &str) -> Result<String, ExtractError> {
    let mut cleaned = html.to_string();
    for tag in HTML_CHROME_TAGS {
        let re = Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
            .map_err(|e| ExtractError::Html(e.to_string()))?;
        cleaned = re.replace_all(&cleaned, " ").into_owned();
    }

    let rendered = html2text::from_read(cleaned.as_bytes(), HTML_RENDER_WIDTH);
    Ok(join_non_blank(rendered.lines(), "\n"))
}

fn join_non_blank<'a>(parts: impl Iterator<Item = &'a str>, sep: &str) -> String {
    parts
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}
