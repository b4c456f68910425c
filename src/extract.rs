//! Turning uploaded files into document text.

use base64::Engine;
use std::collections::HashSet;
use std::path::Path;

const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("malformed data URI")]
    MalformedDataUri,

    #[error("invalid base64 data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("could not read PDF: {0}")]
    Pdf(String),

    #[error("file is neither a PDF nor UTF-8 text")]
    NotText,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extracts plain text from the bytes of one file.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(ExtractError::Pdf("missing PDF header".to_string()));
        }

        // pdf-extract panics on some malformed files
        let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
            .map_err(|_| ExtractError::Pdf("extractor panicked".to_string()))?;

        result.map_err(|e| {
            let msg = e.to_string();
            if msg.to_lowercase().contains("encrypt") {
                ExtractError::Pdf("document is password protected".to_string())
            } else {
                ExtractError::Pdf(msg)
            }
        })
    }
}

pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::NotText)?;
        Ok(text.trim_start_matches('\u{FEFF}').to_string())
    }
}

/// Picks the PDF extractor for anything with a PDF header, plain text
/// otherwise.
pub struct AutoExtractor;

impl TextExtractor for AutoExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        if bytes.starts_with(PDF_MAGIC) {
            PdfExtractor.extract_text(bytes)
        } else {
            PlainTextExtractor.extract_text(bytes)
        }
    }
}

/// Read a file from disk: `.pdf` files through the PDF extractor, the rest
/// as UTF-8 text.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    let is_pdf = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if is_pdf {
        PdfExtractor.extract_text(&bytes)
    } else {
        PlainTextExtractor.extract_text(&bytes)
    }
}

/// Decode base64 upload content, accepting an optional
/// `data:<mime>;base64,` prefix.
pub fn decode_upload(content: &str) -> Result<Vec<u8>, ExtractError> {
    let content = content.trim();
    let payload = if content.starts_with("data:") {
        content
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or(ExtractError::MalformedDataUri)?
    } else {
        content
    };

    // line-wrapped base64 is common in pasted uploads
    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

/// Gives every upload a distinct name: repeats of `cv.pdf` become
/// `cv (2).pdf`, `cv (3).pdf` and so on.
#[derive(Debug, Default)]
pub struct UniqueNames {
    seen: HashSet<String>,
}

impl UniqueNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, name: &str) -> String {
        let name = match name.trim() {
            "" => "unnamed",
            name => name,
        };
        if self.seen.insert(name.to_string()) {
            return name.to_string();
        }

        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
            _ => (name, String::new()),
        };
        let mut n = 2;
        loop {
            let candidate = format!("{stem} ({n}){ext}");
            if self.seen.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
