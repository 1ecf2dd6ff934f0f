//! Aho–Corasick multi-pattern matcher used to pre-filter user input before
//! any model call is made.
//!
//! Nodes live in a single arena (`Vec<AutomatonNode>`) and refer to each other
//! by index, so failure links are plain back-references into the same arena
//! with no ownership of their own. The automaton is mutated only while words
//! are added and links are built; after `build()` every method takes `&self`,
//! which makes a built matcher safe to share across concurrent runs.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::debug;

use crate::error::{DroverError, Result};

const ROOT: usize = 0;

#[derive(Debug, Clone, Default)]
struct AutomatonNode {
    children: HashMap<char, usize>,
    /// Failure link; index into the same arena. Root links to itself.
    fail: usize,
    /// The complete word when this node terminates one.
    word: Option<String>,
}

/// Trie of forbidden words plus failure links.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    nodes: Vec<AutomatonNode>,
    word_count: usize,
    built: bool,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self {
            nodes: vec![AutomatonNode::default()],
            word_count: 0,
            built: false,
        }
    }

    /// Add every word and build the failure links in one go.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::new();
        for word in words {
            matcher.add_word(word.as_ref());
        }
        matcher.build();
        matcher
    }

    /// Insert a word into the trie. Empty words are ignored.
    ///
    /// Adding a word after `build()` invalidates the failure links; `build()`
    /// must be called again before matching.
    pub fn add_word(&mut self, word: &str) {
        if word.is_empty() {
            return;
        }

        let mut current = ROOT;
        for ch in word.chars() {
            current = match self.nodes[current].children.get(&ch) {
                Some(&next) => next,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(AutomatonNode::default());
                    self.nodes[current].children.insert(ch, next);
                    next
                }
            };
        }

        if self.nodes[current].word.is_none() {
            self.word_count += 1;
        }
        self.nodes[current].word = Some(word.to_string());
        self.built = false;
    }

    /// Assign failure links with a breadth-first traversal of the trie.
    pub fn build(&mut self) {
        let mut queue = VecDeque::new();

        self.nodes[ROOT].fail = ROOT;
        let first_level: Vec<usize> = self.nodes[ROOT].children.values().copied().collect();
        for child in first_level {
            self.nodes[child].fail = ROOT;
            queue.push_back(child);
        }

        while let Some(current) = queue.pop_front() {
            let edges: Vec<(char, usize)> = self.nodes[current]
                .children
                .iter()
                .map(|(ch, idx)| (*ch, *idx))
                .collect();

            for (ch, child) in edges {
                // Follow the parent's failure chain until some node has an
                // edge for `ch`, or we are back at the root.
                let mut probe = self.nodes[current].fail;
                let target = loop {
                    if let Some(&next) = self.nodes[probe].children.get(&ch) {
                        break next;
                    }
                    if probe == ROOT {
                        break ROOT;
                    }
                    probe = self.nodes[probe].fail;
                };
                self.nodes[child].fail = target;
                queue.push_back(child);
            }
        }

        self.built = true;
        debug!(
            words = self.word_count,
            nodes = self.nodes.len(),
            "Pattern matcher built"
        );
    }

    /// Scan `text` once and return every added word occurring in it.
    ///
    /// Fails with `NotBuilt` if words were added but `build()` has not run
    /// since. A matcher with no words always returns an empty set.
    pub fn find_matches(&self, text: &str) -> Result<BTreeSet<String>> {
        let mut matched = BTreeSet::new();
        if self.word_count == 0 || text.is_empty() {
            return Ok(matched);
        }
        if !self.built {
            return Err(DroverError::NotBuilt);
        }

        let mut current = ROOT;
        for ch in text.chars() {
            while current != ROOT && !self.nodes[current].children.contains_key(&ch) {
                current = self.nodes[current].fail;
            }
            current = self.nodes[current]
                .children
                .get(&ch)
                .copied()
                .unwrap_or(ROOT);

            let mut probe = current;
            while probe != ROOT {
                if let Some(word) = &self.nodes[probe].word {
                    matched.insert(word.clone());
                }
                probe = self.nodes[probe].fail;
            }
        }

        Ok(matched)
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Number of distinct words in the automaton.
    pub fn len(&self) -> usize {
        self.word_count
    }

    pub fn is_empty(&self) -> bool {
        self.word_count == 0
    }
}
