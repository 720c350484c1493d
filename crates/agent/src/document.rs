//! Structured input documents
//!
//! A document is a title line, an optional table of contents and numbered
//! sections:
//!
//! ```text
//! Spiritual Gifts Study
//! Contents:
//! Overview of the themes below.
//! 1. Faith
//! Living sacrifice, Room. 12:1-2.
//! 1.1 Trust in hardship
//! Endurance under trial.
//! 2. Service
//! ```
//!
//! Each numbered line starts a section; the remaining lines up to the next
//! numbered line are its description. Blocks without a number are ignored.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SECTION_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+\.(?:\d+\.?)*)\s+\S").expect("section pattern is a valid regex")
});

const TOC_MARKERS: [&str; 3] = ["Table of contents:", "Contents:", "Sisällysluettelo:"];

/// One numbered section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Dotted number without a trailing dot (`"1"`, `"2.3"`)
    pub number: String,
    /// Full heading line, number included
    pub heading: String,
    /// Description lines joined with newlines
    pub description: String,
}

impl Section {
    /// Retrieval query: heading and description on one line
    pub fn query(&self) -> String {
        let folded = self
            .description
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        format!("{}: {}", self.heading, folded)
    }

    /// Numeric components of the section number
    pub fn sort_key(&self) -> Vec<u64> {
        self.number
            .split('.')
            .filter_map(|p| p.parse().ok())
            .collect()
    }
}

/// Compare dotted section numbers component-wise (`2 < 10`, `1.2 < 1.10`)
pub fn compare_numbers(a: &Section, b: &Section) -> Ordering {
    a.sort_key().cmp(&b.sort_key())
}

/// A parsed input document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// First non-empty line
    pub title: Option<String>,
    pub table_of_contents: Option<String>,
    /// Sections in numeric order, one per number
    pub sections: Vec<Section>,
}

impl Document {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Parse a document; never fails, unnumbered text is dropped
pub fn parse_document(text: &str) -> Document {
    let text = text.replace("\r\n", "\n");

    let title = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string);

    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<(String, String, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(caps) = SECTION_START.captures(line) {
            if let Some(done) = current.take() {
                push_section(&mut sections, done);
            }
            let number = caps[1].trim_end_matches('.').to_string();
            current = Some((number, line.trim().to_string(), Vec::new()));
        } else if let Some((_, _, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some(done) = current.take() {
        push_section(&mut sections, done);
    }

    sections.sort_by(compare_numbers);

    Document {
        title,
        table_of_contents: table_of_contents(&text),
        sections,
    }
}

/// A repeated number replaces the earlier block
fn push_section(sections: &mut Vec<Section>, (number, heading, body): (String, String, Vec<&str>)) {
    let section = Section {
        number,
        heading,
        description: body.join("\n").trim().to_string(),
    };
    match sections.iter_mut().find(|s| s.number == section.number) {
        Some(existing) => *existing = section,
        None => sections.push(section),
    }
}

/// Text after a contents marker, up to the first numbered line
fn table_of_contents(text: &str) -> Option<String> {
    let (pos, marker) = TOC_MARKERS
        .iter()
        .filter_map(|m| text.find(m).map(|p| (p, *m)))
        .min_by_key(|(p, _)| *p)?;

    let rest = &text[pos + marker.len()..];
    let mut lines = Vec::new();
    for (i, line) in rest.lines().enumerate() {
        // The marker line itself may carry text after the colon
        if i > 0 && SECTION_START.is_match(line) {
            break;
        }
        lines.push(line);
    }

    let toc = lines.join("\n").trim().to_string();
    (!toc.is_empty()).then_some(toc)
}
