use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File-name fragments of a permit receipt, most specific first.
const RECEIPT_NAME_HINTS: [&str; 4] = [
    "temporary parking permit",
    "parking permit receipt",
    "permit",
    "receipt",
];

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("not a readable PDF: {0}")]
    Unreadable(String),
    #[error("document has no text layer")]
    Empty,
}

/// Text content of a downloaded permit receipt.
#[derive(Debug, Clone)]
pub struct PermitDocument {
    path: Option<PathBuf>,
    text: String,
}

impl PermitDocument {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut document = Self::from_bytes(&bytes)?;
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|err| DocumentError::Unreadable(err.to_string()))?;
        Self::from_text(pages.join("\n"))
    }

    /// Wraps text that was already pulled out of a receipt.
    pub fn from_text(text: impl Into<String>) -> Result<Self, DocumentError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(DocumentError::Empty);
        }
        Ok(Self { path: None, text })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Finds the newest receipt in `dir`, preferring file names that look like a
/// permit receipt and falling back to the newest PDF of any name.
pub fn locate_permit_document<P: AsRef<Path>>(dir: P) -> std::io::Result<Option<PathBuf>> {
    let mut pdfs: Vec<(PathBuf, String, SystemTime)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf || !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        let modified = entry.metadata()?.modified()?;
        pdfs.push((path, name, modified));
    }

    for hint in RECEIPT_NAME_HINTS {
        if let Some(found) = newest(pdfs.iter().filter(|(_, name, _)| name.contains(hint))) {
            return Ok(Some(found));
        }
    }

    Ok(newest(pdfs.iter()))
}

fn newest<'a, I>(candidates: I) -> Option<PathBuf>
where
    I: Iterator<Item = &'a (PathBuf, String, SystemTime)>,
{
    candidates
        .max_by_key(|(_, _, modified)| *modified)
        .map(|(path, _, _)| path.clone())
}
