//! Passage corpus: id -> text with structural citation lookup
//!
//! Ids follow `"<book> <chapter>:<verse>"`. Ids that do not parse are still
//! retrievable by exact id, they just cannot be reached through a citation.

use std::collections::HashMap;
use std::path::Path;

use verso_core::PassageLookup;

use crate::reference::normalize_book;
use crate::RagError;

/// In-memory passage store
#[derive(Debug, Default)]
pub struct PassageCorpus {
    texts: HashMap<String, String>,
    /// (normalized book, chapter) -> verses sorted by number
    chapters: HashMap<(String, u32), Vec<(u32, String)>>,
}

/// Split `"Room. 12:4"` into `("Room.", 12, 4)`
fn split_id(id: &str) -> Option<(&str, u32, u32)> {
    let (book, location) = id.trim().rsplit_once(' ')?;
    let (chapter, verse) = location.split_once(':')?;
    Some((book, chapter.parse().ok()?, verse.parse().ok()?))
}

impl PassageCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut corpus = Self::new();
        for (id, text) in pairs {
            corpus.insert(id, text);
        }
        corpus
    }

    /// Load a flat JSON object `{ "<id>": "<text>", ... }`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RagError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RagError::NotFound(format!("{}: {}", path.display(), e)))?;
        let map: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| RagError::Index(format!("{}: {}", path.display(), e)))?;

        let corpus = Self::from_pairs(map);
        tracing::info!(
            path = %path.display(),
            passages = corpus.len(),
            "Loaded passage corpus"
        );
        Ok(corpus)
    }

    pub fn insert(&mut self, id: impl Into<String>, text: impl Into<String>) {
        let id = id.into();
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return;
        }

        if let Some((book, chapter, verse)) = split_id(&id) {
            let verses = self
                .chapters
                .entry((normalize_book(book), chapter))
                .or_default();
            if !verses.iter().any(|(_, existing)| *existing == id) {
                let pos = verses.partition_point(|(v, _)| *v <= verse);
                verses.insert(pos, (verse, id.clone()));
            }
        }
        self.texts.insert(id, text);
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.texts.iter()
    }
}

impl PassageLookup for PassageCorpus {
    fn text(&self, id: &str) -> Option<&str> {
        self.texts.get(id).map(String::as_str)
    }

    fn resolve(&self, book: &str, chapter: u32, verses: (u32, u32)) -> Vec<String> {
        let (start, end) = verses;
        self.chapters
            .get(&(normalize_book(book), chapter))
            .map(|list| {
                list.iter()
                    .filter(|(v, _)| (start..=end).contains(v))
                    .map(|(_, id)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
