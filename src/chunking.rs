//! Chunking utilities for splitting page text into overlapping segments.
//!
//! Each page of a loaded document is split independently, so every chunk
//! keeps the page it came from. Chunks may be prefixed with a title derived
//! from the file name, which pulls questions that name a document towards
//! that document's chunks during retrieval.

use std::path::{Path, PathBuf};

use crate::loader::LoadedDocument;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// How far back (in characters) to look for a word boundary.
const WORD_BOUNDARY_WINDOW: usize = 100;

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use ragchat::chunking::{ChunkingConfig, DEFAULT_CHUNK_SIZE};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
/// assert!(config.prefix_title);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
    /// Prefix each chunk with a title derived from the file name.
    pub prefix_title: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            prefix_title: true,
        }
    }
}

/// A window of text produced by [`chunk_text`].
#[derive(Debug, Clone)]
pub struct Segment {
    /// The segment text content.
    pub text: String,
    /// Zero-based segment index within the input text.
    pub index: usize,
    /// Byte offset where this segment starts in the input text.
    pub start_offset: usize,
}

/// A chunk of a document, ready to be embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    pub text: String,
    pub source_path: PathBuf,
    pub page_number: Option<u32>,
}

/// Split text into overlapping segments.
///
/// Uses character-based windows and tries to end each window at whitespace.
/// If the text is shorter than `chunk_size`, returns a single segment.
/// Properly handles UTF-8 multi-byte characters (emojis, etc.).
/// Whitespace-only windows are dropped.
///
/// # Examples
///
/// ```
/// use ragchat::chunking::chunk_text;
///
/// let segments = chunk_text("Hello, world!", 1000, 200);
/// assert_eq!(segments.len(), 1);
/// assert_eq!(segments[0].text, "Hello, world!");
///
/// let text = "word ".repeat(500);
/// let segments = chunk_text(&text, 1000, 200);
/// assert!(segments.len() >= 3);
/// ```
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Vec<Segment> {
    let chunk_size = chunk_size.max(1);
    let char_count = text.chars().count();

    if char_count <= chunk_size {
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![Segment {
            text: text.to_string(),
            index: 0,
            start_offset: 0,
        }];
    }

    // char index -> byte index, with a sentinel for the end of the text
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let overlap = overlap.min(chunk_size - 1);
    let mut segments = Vec::new();
    let mut start_char = 0;
    let mut index = 0;

    loop {
        let end_char = (start_char + chunk_size).min(char_count);
        let chunk_end_char = if end_char < char_count {
            find_word_boundary_char(text, &char_to_byte, start_char, end_char)
        } else {
            end_char
        };

        let start_byte = char_to_byte[start_char];
        let end_byte = char_to_byte[chunk_end_char];
        let slice = &text[start_byte..end_byte];
        if !slice.trim().is_empty() {
            segments.push(Segment {
                text: slice.to_string(),
                index,
                start_offset: start_byte,
            });
            index += 1;
        }

        if chunk_end_char >= char_count {
            break;
        }

        // Always move forward, even when the boundary search cut deep.
        start_char = chunk_end_char
            .saturating_sub(overlap)
            .max(start_char + 1);
    }

    segments
}

/// Find a word boundary before `pos_char`, preferring to break right after
/// whitespace. Never returns a position at or before `min_char`.
fn find_word_boundary_char(
    text: &str,
    char_to_byte: &[usize],
    min_char: usize,
    pos_char: usize,
) -> usize {
    let search_start_char =
        pos_char.saturating_sub(WORD_BOUNDARY_WINDOW).max(min_char + 1);
    if search_start_char >= pos_char {
        return pos_char;
    }

    let start_byte = char_to_byte[search_start_char];
    let end_byte = char_to_byte[pos_char];
    let region = &text[start_byte..end_byte];

    if let Some((ws_offset, ws)) = region
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
    {
        let boundary_byte = start_byte + ws_offset + ws.len_utf8();
        // char_to_byte is sorted, so a binary search maps back to chars.
        if let Ok(char_idx) = char_to_byte.binary_search(&boundary_byte) {
            return char_idx;
        }
    }

    pos_char
}

/// Derive a human-readable title from a file name.
///
/// `"laptop_set-up guide.pdf"` becomes `"laptop set up guide"`.
pub fn derive_title(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled");
    let title = stem
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        "untitled".to_string()
    } else {
        title
    }
}

/// Split every page of a loaded document into chunks.
pub fn chunk_document(
    doc: &LoadedDocument,
    config: &ChunkingConfig,
) -> Vec<DocumentChunk> {
    let title = config
        .prefix_title
        .then(|| derive_title(&doc.source_path));

    doc.pages
        .iter()
        .flat_map(|page| {
            chunk_text(&page.text, config.chunk_size, config.overlap)
                .into_iter()
                .map(|segment| {
                    let text = match &title {
                        Some(title) => format!("[{title}] {}", segment.text),
                        None => segment.text,
                    };
                    DocumentChunk {
                        text,
                        source_path: doc.source_path.clone(),
                        page_number: page.page_number,
                    }
                })
        })
        .collect()
}
