//! Explicit passage citations in free text
//!
//! A citation looks like `Room. 12:1-2`, `1. Piet. 4:10` or `Miika 6:8`: an
//! optional `1.`-`3.` prefix, a book name or abbreviation, a chapter and a
//! verse or inclusive verse range.

use once_cell::sync::Lazy;
use regex::Regex;
use verso_core::{Item, PassageLookup, SeenIdSet};

static CITATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((?:[1-3]\.\s)?\p{L}+\.?)\s(\d+):(\d+)(?:-(\d+))?")
        .expect("citation pattern is a valid regex")
});

/// A parsed citation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    /// Book as written (`"Room."`)
    pub book: String,
    pub chapter: u32,
    /// Inclusive verse range; `start == end` for a single verse
    pub start: u32,
    pub end: u32,
}

impl Citation {
    /// Canonical reference string, used as the mandatory item id
    pub fn canonical(&self) -> String {
        if self.start == self.end {
            format!("{} {}:{}", self.book, self.chapter, self.start)
        } else {
            format!("{} {}:{}-{}", self.book, self.chapter, self.start, self.end)
        }
    }

    /// Parse a single citation string
    pub fn parse(text: &str) -> Option<Self> {
        let caps = CITATION.captures(text.trim())?;
        let book = caps.get(1)?.as_str().trim().to_string();
        let chapter = caps.get(2)?.as_str().parse().ok()?;
        let start: u32 = caps.get(3)?.as_str().parse().ok()?;
        let end = match caps.get(4) {
            Some(m) => m.as_str().parse().ok()?,
            None => start,
        };
        if end < start {
            return None;
        }
        Some(Self {
            book,
            chapter,
            start,
            end,
        })
    }
}

/// Book key used for exact matching: lowercase, no dots, no whitespace
pub fn normalize_book(book: &str) -> String {
    book.chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// All citations in `text`, in order of appearance, without duplicates
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let mut out: Vec<Citation> = Vec::new();
    for caps in CITATION.captures_iter(text) {
        if let Some(c) = caps.get(0).and_then(|m| Citation::parse(m.as_str())) {
            let key = (normalize_book(&c.book), c.chapter, c.start, c.end);
            let duplicate = out
                .iter()
                .any(|o| (normalize_book(&o.book), o.chapter, o.start, o.end) == key);
            if !duplicate {
                out.push(c);
            }
        }
    }
    out
}

/// Mandatory items for every citation in `query`
///
/// Each citation becomes one item whose text joins its verses in order.
/// Every constituent verse id (and the canonical id itself) goes into
/// `seen`. Citations that resolve to nothing are logged and skipped.
pub fn resolve_mandatory(
    query: &str,
    lookup: &dyn PassageLookup,
    seen: &mut SeenIdSet,
) -> Vec<Item> {
    let mut items = Vec::new();

    for citation in extract_citations(query) {
        let ids = lookup.resolve(&citation.book, citation.chapter, (citation.start, citation.end));
        if ids.is_empty() {
            tracing::warn!(
                citation = %citation.canonical(),
                "Cited passage not found in corpus"
            );
            continue;
        }

        let text = ids
            .iter()
            .filter_map(|id| lookup.text(id))
            .collect::<Vec<_>>()
            .join(" ");

        let id = citation.canonical();
        seen.insert(id.clone());
        seen.extend(ids.iter().cloned());
        items.push(Item::mandatory(id, text));
    }

    if !items.is_empty() {
        tracing::debug!(count = items.len(), "Resolved mandatory citations");
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::PassageCorpus;

    fn corpus() -> PassageCorpus {
        PassageCorpus::from_pairs([
            ("Room. 12:1", "Present your bodies."),
            ("Room. 12:2", "Be transformed."),
            ("Room. 12:3", "Think soberly."),
            ("1. Piet. 4:10", "Serve one another."),
            ("Roomalaiskirje 12:1", "Decoy with a longer book name."),
        ])
    }

    #[test]
    fn test_extract_handles_prefix_and_range() {
        let found = extract_citations("See 1. Piet. 4:10 and Room. 12:1-2, also Miika 6:8.");
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].book, "1. Piet.");
        assert_eq!(found[0].canonical(), "1. Piet. 4:10");
        assert_eq!(found[1].canonical(), "Room. 12:1-2");
        assert_eq!((found[1].start, found[1].end), (1, 2));
        assert_eq!(found[2].book, "Miika");
    }

    #[test]
    fn test_extract_deduplicates_by_normalized_book() {
        let found = extract_citations("Room. 12:1 and again room 12:1");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_extract_ignores_plain_text() {
        assert!(extract_citations("Section 2: growth and service").is_empty());
    }

    #[test]
    fn test_normalize_book() {
        assert_eq!(normalize_book("1. Piet."), "1piet");
        assert_eq!(normalize_book("ROOM."), "room");
    }

    #[test]
    fn test_range_becomes_one_item_and_marks_verses_seen() {
        let corpus = corpus();
        let mut seen = SeenIdSet::new();
        let items = resolve_mandatory("Gifts (Room. 12:1-2)", &corpus, &mut seen);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "Room. 12:1-2");
        assert_eq!(items[0].text, "Present your bodies. Be transformed.");
        assert!(items[0].is_mandatory());
        assert!(seen.contains("Room. 12:1"));
        assert!(seen.contains("Room. 12:2"));
        assert!(!seen.contains("Room. 12:3"));
        // Exact book match: the longer book name is not pulled in
        assert!(!seen.contains("Roomalaiskirje 12:1"));
    }

    #[test]
    fn test_unresolvable_citation_is_skipped() {
        let corpus = corpus();
        let mut seen = SeenIdSet::new();
        let items = resolve_mandatory("Job 1:1", &corpus, &mut seen);
        assert!(items.is_empty());
        assert!(seen.is_empty());
    }
}
