// Text extraction from uploaded file bytes


use std::panic;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

const PDF_MAGIC: &[u8] = b"%PDF";
const PAGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file format for {file_name}: {reason}")]
    UnsupportedFormat { file_name: String, reason: String },
}

/// Extract indexable text from raw file bytes.
///
/// PDF input, detected by extension or by its `%PDF` magic, yields the text
/// of every page joined by a blank line. Everything else is decoded as UTF-8
/// with invalid byte sequences dropped.
#[inline]
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let is_pdf = Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf || bytes.starts_with(PDF_MAGIC) {
        return extract_pdf_text(file_name, bytes);
    }

    debug!("Decoding {} ({} bytes) as text", file_name, bytes.len());
    Ok(decode_lossy(bytes))
}

fn extract_pdf_text(file_name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let unreadable = |reason: String| {
        warn!("Could not read PDF {}: {}", file_name, reason);
        ExtractError::UnsupportedFormat {
            file_name: file_name.to_string(),
            reason,
        }
    };

    // The parser panics on some malformed documents
    let pages = panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| unreadable("PDF parser failed on this document".to_string()))?
        .map_err(|e| unreadable(format!("failed to read PDF content: {}", e)))?;

    debug!("Extracted {} pages from {}", pages.len(), file_name);
    Ok(pages
        .iter()
        .map(|page| page.trim())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR))
}

/// UTF-8 decode that drops invalid byte sequences and keeps everything else
fn decode_lossy(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}
