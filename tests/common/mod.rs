#![allow(dead_code)]

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use lopdf::{
    Document,
    Object,
    Stream,
    content::{Content, Operation},
    dictionary,
};
use ragchat::{
    CompletionModel,
    Embedder,
    RagPipeline,
    Result,
    Settings,
    prompt::Message,
};

const DIMENSION: usize = 64;

/// Bag-of-words embedder: each lowercased word is hashed into one of
/// `DIMENSION` buckets. Deterministic and offline.
pub struct HashingEmbedder;

impl HashingEmbedder {
    fn embed(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIMENSION];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            // FNV-1a
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x100000001b3);
            }
            v[(hash % DIMENSION as u64) as usize] += 1.0;
        }
        v
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        "hashing"
    }

    fn embed_documents(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }

    fn embed_query(&mut self, query: &str) -> Result<Vec<f32>> {
        Ok(Self::embed(query))
    }
}

/// Completion model that records prompts and answers with a fixed reply.
#[derive(Clone, Default)]
pub struct CannedCompletion {
    pub prompts: Arc<Mutex<Vec<Vec<Message>>>>,
}

pub const CANNED_ANSWER: &str = "Plug in the laptop and press the power button. ✅";

impl CompletionModel for CannedCompletion {
    fn model_id(&self) -> &str {
        "canned"
    }

    fn complete(&self, messages: &[Message]) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        Ok(CANNED_ANSWER.to_string())
    }
}

pub fn pipeline(documents_dir: &Path) -> (RagPipeline, CannedCompletion) {
    let completion = CannedCompletion::default();
    let pipeline = RagPipeline::open(
        Settings::new(documents_dir.to_path_buf()),
        Box::new(HashingEmbedder),
        Box::new(completion.clone()),
    )
    .unwrap();
    (pipeline, completion)
}

/// Build a PDF with one line of text per page.
pub fn pdf_bytes(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let stream = Stream::new(dictionary! {}, content.encode().unwrap());
        let content_id = doc.add_object(stream);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// The three-page laptop guide used across tests.
pub fn laptop_guide() -> Vec<u8> {
    pdf_bytes(&[
        "Step 1: Plug in the laptop",
        "Step 2: Sign in with your company account",
        "Step 3: Connect to the office wifi",
    ])
}
