//! Document loading: turns PDF and DOCX files into page-tagged text blocks.
//!
//! PDFs yield one block per page with 1-based page numbers. DOCX files have
//! no reliable page model, so they yield a single block with no page number.

use std::{
    io::Read,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::{Error, Result};

/// Text of one page (or of a whole document when pages are unknown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub text: String,
    /// 1-based page number, `None` when the format has no pages.
    pub page_number: Option<u32>,
}

/// A document loaded from disk.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub source_path: PathBuf,
    pub pages: Vec<PageText>,
}

impl LoadedDocument {
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }
}

/// Load a PDF or DOCX file, dispatching on its extension.
pub fn load_document(path: &Path) -> Result<LoadedDocument> {
    let pages = match path.extension().and_then(|e| e.to_str()) {
        Some("pdf") => load_pdf(path)?,
        Some("docx") => load_docx(path)?,
        _ => {
            return Err(Error::UnsupportedFile(path.display().to_string()));
        }
    };

    debug!(path = %path.display(), pages = pages.len(), "loaded document");

    Ok(LoadedDocument {
        source_path: path.to_path_buf(),
        pages,
    })
}

fn loader_error(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::Loader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn load_pdf(path: &Path) -> Result<Vec<PageText>> {
    let doc = lopdf::Document::load(path).map_err(|e| loader_error(path, e))?;

    let mut pages = Vec::new();
    for page_number in doc.get_pages().keys().copied() {
        // A single unreadable page should not cost the rest of the file.
        let text = match doc.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                debug!(
                    path = %path.display(),
                    page = page_number,
                    "skipping page without extractable text: {e}"
                );
                continue;
            }
        };
        pages.push(PageText {
            text,
            page_number: Some(page_number),
        });
    }

    Ok(pages)
}

fn load_docx(path: &Path) -> Result<Vec<PageText>> {
    let file = std::fs::File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| loader_error(path, e))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| loader_error(path, e))?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| loader_error(path, e))?;

    Ok(vec![PageText {
        text: document_xml_to_text(&xml),
        page_number: None,
    }])
}

/// Flatten WordprocessingML body XML into plain text.
///
/// Keeps the contents of `<w:t>` runs, ends each paragraph with a newline
/// and maps tabs and breaks to their whitespace equivalents.
fn document_xml_to_text(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 4);
    let mut rest = xml;
    let mut in_text = false;

    while let Some(open) = rest.find('<') {
        if in_text {
            out.push_str(&unescape_xml(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            break;
        };
        let tag = &after[..close];
        rest = &after[close + 1..];

        let closing = tag.starts_with('/');
        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("");

        match (name, closing) {
            ("w:t", false) => in_text = !self_closing,
            ("w:t", true) => in_text = false,
            ("w:p", true) => out.push('\n'),
            ("w:tab", false) => out.push('\t'),
            ("w:br" | "w:cr", false) => out.push('\n'),
            _ => {}
        }
    }

    out
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
