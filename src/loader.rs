//! Document loading from local files.
//!
//! Turns files into [`Document`]s with `source`, `page` and
//! `content_type` metadata:
//!
//! | Extension | Content type | Documents |
//! |-----------|--------------|-----------|
//! | `.pdf` | `application/pdf` | one per non-blank page |
//! | `.txt`, `.md` | `text/plain` | one per file |
//!
//! PDF text comes from `pdf-extract`, which separates pages with form
//! feeds. When no form feed is present the whole text is one document
//! without a page number.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use docqa_core::models::Document;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";

const PAGE_BREAK: char = '\x0C';

/// Whether `path` has an extension [`load`] understands.
pub fn is_supported(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("pdf" | "txt" | "md"))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Load one file.
///
/// # Errors
///
/// Fails for unreadable files, unsupported extensions, invalid UTF-8 in
/// text files and PDFs `pdf-extract` cannot parse.
pub fn load(path: &Path) -> Result<Vec<Document>> {
    let source = source_name(path);
    match extension(path).as_deref() {
        Some("pdf") => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            pdf_documents(&bytes, &source)
        }
        Some("txt" | "md") => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {} as UTF-8 text", path.display()))?;
            Ok(vec![Document::new(text, source).with_content_type(MIME_TEXT)])
        }
        _ => bail!("Unsupported file type: {}", path.display()),
    }
}

/// Extract per-page documents from PDF bytes.
pub fn pdf_documents(bytes: &[u8], source: &str) -> Result<Vec<Document>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| anyhow::anyhow!("PDF extraction failed for {}: {}", source, e))?;
    Ok(split_pages(&text)
        .into_iter()
        .map(|(page, content)| {
            let doc = Document::new(content, source).with_content_type(MIME_PDF);
            match page {
                Some(n) => doc.with_page(n),
                None => doc,
            }
        })
        .collect())
}

/// Split extracted PDF text on form feeds into `(page, text)` pairs.
///
/// Page numbers are 1-based and keep counting across skipped blank pages.
pub fn split_pages(text: &str) -> Vec<(Option<u32>, String)> {
    if !text.contains(PAGE_BREAK) {
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![(None, text.trim().to_string())];
    }
    text.split(PAGE_BREAK)
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| (Some(i as u32 + 1), page.trim().to_string()))
        .collect()
}

/// Load every supported file under `paths`.
///
/// Directories are walked recursively in file-name order; unsupported
/// files inside directories are skipped with a warning, while an
/// explicitly named unsupported file is an error.
pub fn load_paths(paths: &[PathBuf]) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry
                    .with_context(|| format!("Failed to walk {}", path.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if !is_supported(entry.path()) {
                    warn!(path = %entry.path().display(), "skipping unsupported file");
                    continue;
                }
                documents.extend(load_logged(entry.path())?);
            }
        } else {
            documents.extend(load_logged(path)?);
        }
    }
    Ok(documents)
}

/// [`load_paths`] on the blocking thread pool.
///
/// PDF extraction is CPU-bound; async callers use this so the runtime's
/// worker threads stay free.
pub async fn load_paths_blocking(paths: Vec<PathBuf>) -> Result<Vec<Document>> {
    tokio::task::spawn_blocking(move || load_paths(&paths))
        .await
        .context("Document loading task failed")?
}

fn load_logged(path: &Path) -> Result<Vec<Document>> {
    let docs = load(path)?;
    debug!(path = %path.display(), documents = docs.len(), "loaded file");
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pages_with_form_feeds() {
        let pages = split_pages("first page\x0C\n \x0Cthird page\x0C");
        assert_eq!(
            pages,
            vec![
                (Some(1), "first page".to_string()),
                (Some(3), "third page".to_string())
            ]
        );
    }

    #[test]
    fn test_split_pages_without_breaks() {
        assert_eq!(split_pages("  only text \n"), vec![(None, "only text".to_string())]);
        assert!(split_pages(" \n ").is_empty());
    }

    #[tokio::test]
    async fn test_load_paths_blocking_matches_sync_load() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("b.md"), "beta").unwrap();

        let docs = load_paths_blocking(vec![dir.path().to_path_buf()])
            .await
            .unwrap();
        let contents: Vec<_> = docs.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["alpha", "beta"]);

        let err = load_paths_blocking(vec![dir.path().join("missing.txt")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported(Path::new("a/Report.PDF")));
        assert!(is_supported(Path::new("notes.md")));
        assert!(!is_supported(Path::new("image.png")));
        assert!(!is_supported(Path::new("Makefile")));
    }
}
