// src/search.rs
use crate::table::{Corpus, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    Exact,
    #[default]
    Substring,
}

/// A key fragment plus how to compare it. The fragment is trimmed on
/// construction; nothing else is normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    fragment: String,
    mode: MatchMode,
}

impl Query {
    pub fn new(raw: &str, mode: MatchMode) -> Self {
        Self {
            fragment: raw.trim().to_string(),
            mode,
        }
    }

    pub fn exact(raw: &str) -> Self {
        Self::new(raw, MatchMode::Exact)
    }

    pub fn substring(raw: &str) -> Self {
        Self::new(raw, MatchMode::Substring)
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Compare against one key cell. An empty fragment is not special: in
    /// substring mode it matches every key.
    pub fn matches(&self, key: &str) -> bool {
        let key = key.trim();
        match self.mode {
            MatchMode::Exact => key == self.fragment,
            MatchMode::Substring => key.contains(self.fragment.as_str()),
        }
    }
}

/// Every record whose key matches, in corpus order. Null keys never match.
pub fn search<'a>(corpus: &'a Corpus, query: &Query) -> Vec<&'a Record> {
    corpus
        .records()
        .iter()
        .filter(|r| corpus.key(r).map(|k| query.matches(k)).unwrap_or(false))
        .collect()
}
