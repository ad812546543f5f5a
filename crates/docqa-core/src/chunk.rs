//! Recursive character segmenter.
//!
//! Splits document text into overlapping [`Passage`]s of at most
//! `chunk_size` characters, preferring to cut at the coarsest available
//! boundary.
//!
//! # Algorithm
//!
//! 1. Open a window of `chunk_size` characters at the current start.
//! 2. If the rest of the text fits in the window, emit it and stop.
//! 3. Otherwise look for the last occurrence of each separator in the
//!    window, coarsest first: paragraph (`\n\n`), line (`\n`), sentence
//!    (`". "`), word (`" "`). The first separator whose cut fills at
//!    least half the window wins; the separator stays at the end of the
//!    passage. A cut must always leave more than `chunk_overlap`
//!    characters in the passage.
//! 4. If no separator fills half the window, take the latest usable cut
//!    of any separator. With no usable separator, hard-cut at the window
//!    end.
//! 5. The next window starts `chunk_overlap` characters before the cut.
//!
//! Passages are exact substrings of the input, so dropping the first
//! `chunk_overlap` characters of every passage but the first and
//! concatenating reconstructs the original text.
//!
//! Lengths are measured in Unicode scalar values, never bytes.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::chunk::{split_text, SplitterConfig};
//!
//! let config = SplitterConfig::new(10, 2).unwrap();
//! let parts = split_text("Hello world, again", &config);
//! assert_eq!(parts, vec!["Hello ", "o world, ", ", again"]);
//! ```

use crate::error::{Error, Result};
use crate::models::{Document, Passage};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Cut boundaries, coarsest first.
pub const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Validated segmenter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitterConfig {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl SplitterConfig {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be > 0".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Split every document into passages, in document order.
///
/// Each passage inherits its parent's metadata plus a 0-based
/// `chunk_index`. Documents whose content is empty or whitespace-only
/// produce no passages.
pub fn split_documents(documents: &[Document], config: &SplitterConfig) -> Vec<Passage> {
    let mut passages = Vec::new();
    for doc in documents {
        for (index, content) in split_text(&doc.content, config).into_iter().enumerate() {
            let mut metadata = doc.metadata.clone();
            metadata.chunk_index = Some(index);
            passages.push(Passage { content, metadata });
        }
    }
    passages
}

/// Split a single text into overlapping pieces.
pub fn split_text(text: &str, config: &SplitterConfig) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, including the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = bounds.len() - 1;

    let mut pieces = Vec::new();
    let mut start = 0;
    loop {
        let limit = start + config.chunk_size;
        if limit >= total_chars {
            pieces.push(text[bounds[start]..].to_string());
            break;
        }
        let end = find_cut(text, &bounds, start, limit, config.chunk_overlap);
        pieces.push(text[bounds[start]..bounds[end]].to_string());
        start = end - config.chunk_overlap;
    }
    pieces
}

/// Char index at which to end the passage starting at `start`.
///
/// Always returns a value in `(start + overlap, limit]`.
fn find_cut(text: &str, bounds: &[usize], start: usize, limit: usize, overlap: usize) -> usize {
    let window = &text[bounds[start]..bounds[limit]];
    let min_fill = start + (limit - start) / 2;
    let mut latest: Option<usize> = None;
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let cut_byte = bounds[start] + pos + sep.len();
            let cut = bounds.partition_point(|&b| b < cut_byte);
            if cut <= start + overlap {
                continue;
            }
            if cut >= min_fill {
                return cut;
            }
            latest = latest.max(Some(cut));
        }
    }
    latest.unwrap_or(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(pieces: &[String], overlap: usize) -> String {
        let mut out = String::new();
        for (i, p) in pieces.iter().enumerate() {
            if i == 0 {
                out.push_str(p);
            } else {
                out.extend(p.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_short_text_single_piece() {
        let pieces = split_text("Hello, world!", &SplitterConfig::default());
        assert_eq!(pieces, vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_and_whitespace_text() {
        let config = SplitterConfig::default();
        assert!(split_text("", &config).is_empty());
        assert!(split_text("  \n\n \t", &config).is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(SplitterConfig::new(0, 0).is_err());
        assert!(SplitterConfig::new(100, 100).is_err());
        assert!(SplitterConfig::new(100, 150).is_err());
        assert!(SplitterConfig::new(100, 99).is_ok());
    }

    #[test]
    fn test_hard_cut_without_separators() {
        let text = "x".repeat(300);
        let config = SplitterConfig::new(100, 20).unwrap();
        let pieces = split_text(&text, &config);
        assert_eq!(pieces.len(), 4);
        assert!(pieces[..3].iter().all(|p| p.chars().count() == 100));
        assert_eq!(pieces[3].chars().count(), 60);
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let para1 = "a".repeat(60);
        let para2 = "b ".repeat(30);
        let text = format!("{}\n\n{}", para1, para2);
        let config = SplitterConfig::new(80, 10).unwrap();
        let pieces = split_text(&text, &config);
        assert_eq!(pieces[0], format!("{}\n\n", para1));
    }

    #[test]
    fn test_early_paragraph_does_not_starve_passage() {
        let text = format!("{}\n\n{}", "a".repeat(20), "word ".repeat(40));
        let config = SplitterConfig::new(100, 10).unwrap();
        let pieces = split_text(&text, &config);
        assert_eq!(pieces[0].chars().count(), 97);
        assert!(pieces[0].starts_with(&format!("{}\n\n", "a".repeat(20))));
        assert!(pieces[0].ends_with("word "));
        assert_eq!(reconstruct(&pieces, 10), text);
    }

    #[test]
    fn test_short_coarse_cut_used_when_nothing_fills() {
        // One paragraph break, then an unbroken run: the paragraph cut beats a hard cut.
        let text = format!("{}\n\n{}", "a".repeat(20), "b".repeat(200));
        let config = SplitterConfig::new(100, 10).unwrap();
        let pieces = split_text(&text, &config);
        assert_eq!(pieces[0], format!("{}\n\n", "a".repeat(20)));
    }

    #[test]
    fn test_falls_back_to_word_boundary() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let config = SplitterConfig::new(20, 5).unwrap();
        let pieces = split_text(text, &config);
        assert_eq!(pieces[0], "alpha beta gamma ");
        assert!(pieces.iter().all(|p| p.chars().count() <= 20));
    }

    #[test]
    fn test_reconstruction_and_bounds_across_parameters() {
        let text = "The quick brown fox jumps over the lazy dog. \
                    Pack my box with five dozen liquor jugs.\n\
                    How vexingly quick daft zebras jump!\n\n\
                    Sphinx of black quartz, judge my vow. ü ñ 東京 ok";
        for (size, overlap) in [(10, 0), (10, 3), (25, 5), (40, 39), (64, 16), (500, 100)] {
            let config = SplitterConfig::new(size, overlap).unwrap();
            let pieces = split_text(text, &config);
            assert!(!pieces.is_empty());
            for p in &pieces {
                assert!(p.chars().count() <= size, "size={} piece={:?}", size, p);
            }
            for pair in pieces.windows(2) {
                let tail: String = {
                    let n = pair[0].chars().count();
                    pair[0].chars().skip(n - overlap).collect()
                };
                let head: String = pair[1].chars().take(overlap).collect();
                assert_eq!(tail, head);
            }
            assert_eq!(reconstruct(&pieces, overlap), text, "size={} overlap={}", size, overlap);
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "日本語のテキスト。".repeat(20);
        let config = SplitterConfig::new(16, 4).unwrap();
        let pieces = split_text(&text, &config);
        assert!(pieces.iter().all(|p| p.chars().count() <= 16));
        assert_eq!(reconstruct(&pieces, 4), text);
    }

    #[test]
    fn test_deterministic() {
        let text = "Some text.\n\nMore text here that goes on.\nAnd a line.".repeat(10);
        let config = SplitterConfig::new(50, 10).unwrap();
        assert_eq!(split_text(&text, &config), split_text(&text, &config));
    }

    #[test]
    fn test_split_documents_metadata() {
        let docs = vec![
            Document::new("x".repeat(300), "A").with_page(1),
            Document::new("y".repeat(300), "B"),
            Document::new("   ", "C"),
        ];
        let config = SplitterConfig::new(100, 20).unwrap();
        let passages = split_documents(&docs, &config);
        assert_eq!(passages.len(), 8);

        let a: Vec<_> = passages.iter().filter(|p| p.source() == "A").collect();
        let b: Vec<_> = passages.iter().filter(|p| p.source() == "B").collect();
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 4);
        assert!(a.iter().all(|p| p.content.starts_with('x') && p.metadata.page == Some(1)));
        assert!(b.iter().all(|p| p.content.starts_with('y')));
        let indices: Vec<_> = b.iter().map(|p| p.metadata.chunk_index).collect();
        assert_eq!(indices, vec![Some(0), Some(1), Some(2), Some(3)]);
    }
}
