//! Recovery of structured records from free-text generator replies.
//!
//! Replies nominally hold one JSON object but routinely arrive wrapped in a
//! Markdown fence, surrounded by prose, or truncated. Extraction never fails
//! loudly: the caller gets [`Extraction::Malformed`] and decides how to
//! recover.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::debug;

use crate::wire::{FileBundle, RequirementsRecord};

/// Width of the usual "```json" opener and "```" closer.
const FENCE_OPEN: usize = 7;
const FENCE_CLOSE: usize = 3;

/// Upper bound on brace positions tried by the balanced scan.
const MAX_SCAN_STARTS: usize = 512;

/// The two record shapes a reply may carry, in classification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Requirements,
    Bundle,
}

impl Shape {
    pub const PRIORITY: [Shape; 2] = [Shape::Requirements, Shape::Bundle];

    pub fn keys(self) -> &'static [&'static str] {
        match self {
            Shape::Requirements => &RequirementsRecord::KEYS,
            Shape::Bundle => &FileBundle::KEYS,
        }
    }

    fn matches(self, obj: &Map<String, Value>) -> bool {
        self.keys().iter().all(|k| obj.contains_key(*k))
    }
}

/// A parsed object tagged by the key set it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Structured {
    Requirements(Map<String, Value>),
    Bundle(Map<String, Value>),
}

impl Structured {
    pub fn shape(&self) -> Shape {
        match self {
            Structured::Requirements(_) => Shape::Requirements,
            Structured::Bundle(_) => Shape::Bundle,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Structured::Requirements(m) | Structured::Bundle(m) => Value::Object(m),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Found(Structured),
    Malformed,
}

impl Extraction {
    pub fn found(self) -> Option<Structured> {
        match self {
            Extraction::Found(s) => Some(s),
            Extraction::Malformed => None,
        }
    }
}

/// Tag a parsed value with the first shape (in priority order) whose keys it
/// carries.
pub fn classify(value: Value) -> Option<Structured> {
    let Value::Object(obj) = value else {
        return None;
    };
    match Shape::PRIORITY.into_iter().find(|s| s.matches(&obj))? {
        Shape::Requirements => Some(Structured::Requirements(obj)),
        Shape::Bundle => Some(Structured::Bundle(obj)),
    }
}

/// Recover a record of the `expected` shape from `raw`.
///
/// Tries the fixed-width fence slice first, then the whole trimmed text, then
/// scans for embedded objects.
pub fn extract(raw: &str, expected: Shape) -> Extraction {
    if let Some(found) = fast_path(raw, expected) {
        return Extraction::Found(found);
    }
    match scan(raw, expected) {
        Some(found) => Extraction::Found(found),
        None => {
            debug!(?expected, bytes = raw.len(), "no valid structure found in reply");
            Extraction::Malformed
        }
    }
}

/// `text[7..len-3]`: the generator's typical "```json ... ```" wrapping.
pub fn fence_slice(text: &str) -> Option<&str> {
    let end = text.len().checked_sub(FENCE_CLOSE)?;
    if end <= FENCE_OPEN {
        return None;
    }
    text.get(FENCE_OPEN..end)
}

fn fast_path(raw: &str, expected: Shape) -> Option<Structured> {
    let sliced = fence_slice(raw).into_iter();
    sliced
        .chain(std::iter::once(raw.trim()))
        .find_map(|candidate| strict(candidate, expected))
}

fn strict(candidate: &str, expected: Shape) -> Option<Structured> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    classify(value).filter(|s| s.shape() == expected)
}

fn brace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // One level of nesting, as in {"a": {...}, "b": {...}}.
    PATTERN.get_or_init(|| Regex::new(r"\{(?:[^{}]|\{[^{}]*\})*\}").expect("static pattern compiles"))
}

fn scan(raw: &str, expected: Shape) -> Option<Structured> {
    let by_pattern = brace_pattern()
        .find_iter(raw)
        .find_map(|m| strict(m.as_str(), expected));
    by_pattern.or_else(|| balanced_candidates(raw).find_map(|c| strict(c, expected)))
}

/// Complete JSON values starting at each `{`, for objects whose string
/// contents hold braces of their own (CSS rules, JS blocks).
fn balanced_candidates(raw: &str) -> impl Iterator<Item = &str> + '_ {
    raw.char_indices()
        .filter(|(_, ch)| *ch == '{')
        .take(MAX_SCAN_STARTS)
        .filter_map(move |(idx, _)| {
            let tail = &raw[idx..];
            let mut de = serde_json::Deserializer::from_str(tail).into_iter::<Value>();
            match de.next() {
                Some(Ok(Value::Object(_))) => tail.get(..de.byte_offset()),
                _ => None,
            }
        })
}
