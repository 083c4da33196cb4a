use super::{ExtractionError, PageExtractor};
use std::path::Path;

/// Page extractor backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfPageExtractor;

impl PageExtractor for PdfPageExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
        if !path.is_file() {
            return Err(ExtractionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a file", path.display()),
            )));
        }
        // pdf-extract panics on some malformed inputs; contain it to this file.
        match std::panic::catch_unwind(|| pdf_extract::extract_text_by_pages(path)) {
            Ok(result) => result.map_err(|error| ExtractionError::Pdf(error.to_string())),
            Err(_) => Err(ExtractionError::Pdf(format!(
                "extractor panicked while reading {}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_reported_as_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();

        let error = PdfPageExtractor.extract_pages(&path).unwrap_err();
        assert!(matches!(error, ExtractionError::Pdf(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let error = PdfPageExtractor
            .extract_pages(&dir.path().join("gone.pdf"))
            .unwrap_err();
        assert!(matches!(error, ExtractionError::Io(_)));
    }
}
