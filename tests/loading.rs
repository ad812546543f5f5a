//! Loader integration tests: PDF pages, text files and directory walks.

use std::fs;
use std::path::PathBuf;

use docqa::loader::{load, load_paths, MIME_PDF, MIME_TEXT};
use tempfile::TempDir;

/// Single-page PDF whose content stream draws "manual test phrase".
/// Body first, then an xref table with the real byte offsets.
fn single_page_pdf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::new();
    let objects: [&[u8]; 5] = [
        b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n",
        b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n",
        b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n",
        b"4 0 obj << /Length 50 >> stream\nBT /F1 12 Tf 100 700 Td (manual test phrase) Tj ET\nendstream endobj\n",
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    ];
    for object in objects {
        offsets.push(out.len());
        out.extend_from_slice(object);
    }
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[test]
fn test_load_pdf_extracts_text_with_metadata() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("controller-manual.pdf");
    fs::write(&path, single_page_pdf()).unwrap();

    let docs = load(&path).unwrap();

    assert!(!docs.is_empty());
    let text: String = docs.iter().map(|d| d.content.as_str()).collect();
    assert!(text.contains("manual test phrase"), "extracted: {:?}", text);
    for doc in &docs {
        assert_eq!(doc.metadata.source.as_deref(), Some("controller-manual.pdf"));
        assert_eq!(doc.metadata.content_type.as_deref(), Some(MIME_PDF));
    }
}

#[test]
fn test_load_corrupt_pdf_fails() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("broken.pdf");
    fs::write(&path, b"%PDF-1.4\nnot really a pdf").unwrap();
    assert!(load(&path).is_err());
}

#[test]
fn test_load_paths_walks_directories_in_name_order() {
    let tmp = TempDir::new().unwrap();
    let nested = tmp.path().join("nested");
    fs::create_dir(&nested).unwrap();
    fs::write(tmp.path().join("b.txt"), "bravo").unwrap();
    fs::write(tmp.path().join("a.md"), "# alpha").unwrap();
    fs::write(tmp.path().join("image.png"), [0u8, 1, 2]).unwrap();
    fs::write(nested.join("c.txt"), "charlie").unwrap();

    let docs = load_paths(&[tmp.path().to_path_buf()]).unwrap();

    let sources: Vec<_> = docs
        .iter()
        .map(|d| d.metadata.source.clone().unwrap())
        .collect();
    assert_eq!(sources, vec!["a.md", "b.txt", "c.txt"]);
    assert!(docs
        .iter()
        .all(|d| d.metadata.content_type.as_deref() == Some(MIME_TEXT)));
}

#[test]
fn test_explicit_unsupported_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("slides.pptx");
    fs::write(&path, b"PK").unwrap();
    assert!(load_paths(&[path]).is_err());
}

#[test]
fn test_missing_path_is_an_error() {
    let missing = PathBuf::from("/nonexistent/docqa/manual.txt");
    assert!(load_paths(&[missing]).is_err());
}
