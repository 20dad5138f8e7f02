//! Text extraction for corpus files.
//!
//! The corpus holds paged PDF statutes plus plain-text and markdown notes.
//! Extraction never panics: a failure is returned so the ingest pipeline can
//! skip the document and record it in the indexing summary.

use std::path::Path;

/// Extraction error. Document-level; the pipeline skips the file and
/// records the failure rather than aborting the pass.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    Pdf(String),
    Io(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(ext) => {
                write!(f, "unsupported file format: {}", ext)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Io(e) => write!(f, "read failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract plain UTF-8 text from a corpus file, dispatching on extension.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => extract_pdf(path),
        "txt" | "md" => std::fs::read_to_string(path).map_err(|e| ExtractError::Io(e.to_string())),
        other => Err(ExtractError::UnsupportedFormat(other.to_string())),
    }
}

fn extract_pdf(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
    pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_read() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "Section 420 IPC covers cheating.").unwrap();
        let text = extract_file(&path).unwrap();
        assert_eq!(text, "Section 420 IPC covers cheating.");
    }

    #[test]
    fn test_unsupported_format() {
        let err = extract_file(Path::new("statute.docx")).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = extract_file(Path::new("/nonexistent/statute.txt")).unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }
}
