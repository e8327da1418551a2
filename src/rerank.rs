//! Heuristic reranking of retrieved chunks.
//!
//! Candidates from the vector index are scored by a declarative
//! [`RuleTable`]: each [`Rule`] pairs a [`Condition`] on the question, the
//! chunk's source file name and its page number with an integer delta. The
//! best-scoring chunks are kept and then put back into reading order, so a
//! procedure split across pages reaches the model as one piece.

use std::{cmp::Ordering, path::Path};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::Result,
    vector_index::{Chunk, ScoredChunk},
};

/// Candidates fetched from the vector index per question.
pub const DEFAULT_CANDIDATES: usize = 40;

/// Chunks kept for the prompt after reranking.
pub const DEFAULT_CONTEXT_CHUNKS: usize = 18;

/// When a rule applies.
///
/// Keyword lists match by substring against the lowercased question and the
/// lowercased source file name. An empty list matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// The question mentions one of `question_any` and the source file name
    /// contains one of `source_any`.
    Keywords {
        #[serde(default)]
        question_any: Vec<String>,
        #[serde(default)]
        source_any: Vec<String>,
    },
    /// The chunk comes from a page in `first..=last`.
    PageRange { first: u32, last: u32 },
    /// One of `topics` appears in both the question and the source name.
    SharedTopic { topics: Vec<String> },
}

impl Condition {
    fn matches(
        &self,
        question: &str,
        source: &str,
        page: Option<u32>,
    ) -> bool {
        match self {
            Condition::Keywords {
                question_any,
                source_any,
            } => {
                contains_any(question, question_any)
                    && contains_any(source, source_any)
            }
            Condition::PageRange { first, last } => {
                page.is_some_and(|p| (*first..=*last).contains(&p))
            }
            Condition::SharedTopic { topics } => topics.iter().any(|t| {
                question.contains(t.as_str()) && source.contains(t.as_str())
            }),
        }
    }

    /// Lowercase every keyword; matching runs on lowercased text.
    fn lowercase_keywords(&mut self) {
        let lists = match self {
            Condition::Keywords {
                question_any,
                source_any,
            } => vec![question_any, source_any],
            Condition::SharedTopic { topics } => vec![topics],
            Condition::PageRange { .. } => vec![],
        };
        for word in lists.into_iter().flatten() {
            *word = word.to_lowercase();
        }
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.is_empty() || needles.iter().any(|n| haystack.contains(n.as_str()))
}

/// A condition and the score adjustment it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub when: Condition,
    pub delta: i32,
}

impl Rule {
    pub fn new(name: &str, when: Condition, delta: i32) -> Self {
        Self {
            name: name.to_string(),
            when,
            delta,
        }
    }
}

/// Ordered set of additive scoring rules.
///
/// # Examples
///
/// ```
/// use ragchat::rerank::{Condition, RuleTable};
///
/// let table = RuleTable::from_json_str(r#"{
///     "rules": [
///         {
///             "name": "first page",
///             "when": {"kind": "page_range", "first": 1, "last": 1},
///             "delta": 5
///         }
///     ]
/// }"#).unwrap();
/// assert_eq!(table.rules.len(), 1);
/// assert_eq!(table.rules[0].when, Condition::PageRange { first: 1, last: 1 });
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    pub rules: Vec<Rule>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for RuleTable {
    /// Rules tuned for an IT help-desk corpus: setup guides, laptop and
    /// desktop procedures, and per-topic manuals.
    fn default() -> Self {
        let laptop = words(&["laptop", "notebook"]);
        let desktop = words(&["desktop", "workstation"]);

        Self {
            rules: vec![
                Rule::new(
                    "setup intent",
                    Condition::Keywords {
                        question_any: words(&[
                            "set up",
                            "setup",
                            "install",
                            "configure",
                            "configuration",
                        ]),
                        source_any: words(&["set-up", "setup", "set up"]),
                    },
                    10,
                ),
                Rule::new(
                    "laptop source",
                    Condition::Keywords {
                        question_any: laptop.clone(),
                        source_any: laptop.clone(),
                    },
                    100,
                ),
                Rule::new(
                    "desktop source for laptop question",
                    Condition::Keywords {
                        question_any: laptop.clone(),
                        source_any: desktop.clone(),
                    },
                    -50,
                ),
                Rule::new(
                    "desktop source",
                    Condition::Keywords {
                        question_any: desktop.clone(),
                        source_any: desktop.clone(),
                    },
                    100,
                ),
                Rule::new(
                    "laptop source for desktop question",
                    Condition::Keywords {
                        question_any: desktop,
                        source_any: laptop,
                    },
                    -50,
                ),
                Rule::new(
                    "opening pages",
                    Condition::PageRange { first: 1, last: 2 },
                    20,
                ),
                Rule::new(
                    "early pages",
                    Condition::PageRange { first: 3, last: 4 },
                    10,
                ),
                Rule::new(
                    "topic match",
                    Condition::SharedTopic {
                        topics: words(&[
                            "vpn", "printer", "email", "outlook", "password",
                            "wifi", "network", "teams", "monitor", "backup",
                        ]),
                    },
                    15,
                ),
            ],
        }
    }
}

impl RuleTable {
    /// Parse a rule table. Keywords are lowercased on load.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut table: Self = serde_json::from_str(json)?;
        for rule in &mut table.rules {
            rule.when.lowercase_keywords();
        }
        Ok(table)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Sum of the deltas of every rule matching `chunk`.
    ///
    /// `question` must already be lowercased.
    pub fn score(&self, question: &str, chunk: &Chunk) -> i32 {
        let source = chunk.file_name().to_lowercase();
        self.rules
            .iter()
            .filter(|rule| {
                rule.when.matches(question, &source, chunk.page_number)
            })
            .map(|rule| rule.delta)
            .sum()
    }
}

/// A retrieved chunk with its similarity and heuristic score.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub similarity: f32,
    pub score: i32,
}

/// Score every candidate, keeping retrieval order.
pub fn score_candidates(
    question: &str,
    candidates: Vec<ScoredChunk>,
    rules: &RuleTable,
) -> Vec<RankedChunk> {
    let question = question.to_lowercase();
    candidates
        .into_iter()
        .map(|c| RankedChunk {
            score: rules.score(&question, &c.chunk),
            similarity: c.similarity,
            chunk: c.chunk,
        })
        .collect()
}

/// Keep the `max_chunks` best-scoring chunks. Equal scores keep their
/// retrieval order.
pub fn truncate_by_score(
    mut ranked: Vec<RankedChunk>,
    max_chunks: usize,
) -> Vec<RankedChunk> {
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked.truncate(max_chunks);
    ranked
}

/// Reorder chunks by source file name, then full path (so same-named files
/// in different folders stay apart), then page. Unknown pages go last.
pub fn presentation_order(ranked: &mut [RankedChunk]) {
    ranked.sort_by(|a, b| {
        let (a, b) = (&a.chunk, &b.chunk);
        a.file_name()
            .cmp(&b.file_name())
            .then_with(|| a.source_path.cmp(&b.source_path))
            .then_with(|| compare_pages(a.page_number, b.page_number))
    });
}

fn compare_pages(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Score, truncate and reorder `candidates` for prompt assembly.
pub fn rerank(
    question: &str,
    candidates: Vec<ScoredChunk>,
    rules: &RuleTable,
    max_chunks: usize,
) -> Vec<RankedChunk> {
    let total = candidates.len();
    let scored = score_candidates(question, candidates, rules);
    let mut kept = truncate_by_score(scored, max_chunks);
    presentation_order(&mut kept);
    debug!(candidates = total, kept = kept.len(), "reranked");
    kept
}

/// `"guide.pdf (Page 3)"`, or `"(Page ?)"` when the page is unknown.
pub fn citation(chunk: &Chunk) -> String {
    let name = chunk.file_name();
    match chunk.page_number {
        Some(page) => format!("{name} (Page {page})"),
        None => format!("{name} (Page ?)"),
    }
}

/// Provenance line placed above each chunk in the context.
pub fn source_header(chunk: &Chunk) -> String {
    format!("--- Source: {} ---", citation(chunk))
}

/// Join chunks into one context string, each under its source header.
pub fn build_context(ranked: &[RankedChunk]) -> String {
    ranked
        .iter()
        .map(|r| format!("{}\n{}", source_header(&r.chunk), r.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
