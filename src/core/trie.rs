// --- File: src/core/trie.rs
use crate::core::options::DictionaryOptions;
use crate::core::types::{
    by_probability_desc, words_by_probability, ProbabilityInfo, WeightedString, Word, WordEntry,
};
use crate::error::{DictError, Result};

/// Index of a node array inside the dictionary's arena.
pub type ArrayId = usize;

/// The root node array always lives at index 0.
pub const ROOT: ArrayId = 0;

/// Default cap on the number of bigrams a single word may carry.
pub const MAX_BIGRAMS_PER_WORD: usize = 10_000;

/// A sibling group of nodes sharing a parent prefix, sorted by first code point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PtNodeArray {
    pub nodes: Vec<PtNode>,
}

/// One trie node: a non-empty label, an optional word payload and an optional child group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtNode {
    pub chars: Vec<char>,
    pub terminal: Option<WordEntry>,
    pub children: Option<ArrayId>,
}

/// How an insertion treats an already-present word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Keep the higher of the old and new probabilities.
    KeepMax,
    /// Replace the stored probability with the new one.
    Overwrite,
}

/// In-memory Patricia trie of words, addressed through an arena of node arrays.
///
/// Bigram and shortcut targets are stored as strings and resolved on demand,
/// so the node graph itself only ever points from parent to child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionDictionary {
    arrays: Vec<PtNodeArray>,
    pub options: DictionaryOptions,
    max_bigrams_per_word: usize,
}

impl FusionDictionary {
    pub fn new(options: DictionaryOptions) -> Self {
        Self {
            arrays: vec![PtNodeArray::default()],
            options,
            max_bigrams_per_word: MAX_BIGRAMS_PER_WORD,
        }
    }

    pub fn with_max_bigrams_per_word(mut self, max: usize) -> Self {
        self.max_bigrams_per_word = max.max(1);
        self
    }

    pub fn array(&self, id: ArrayId) -> &PtNodeArray {
        &self.arrays[id]
    }

    pub fn root(&self) -> &PtNodeArray {
        &self.arrays[ROOT]
    }

    /// Appends an empty node array and returns its handle.
    pub fn alloc_array(&mut self) -> ArrayId {
        self.arrays.push(PtNodeArray::default());
        self.arrays.len() - 1
    }

    /// Inserts or updates a word, keeping the higher probability on conflict.
    pub fn add(
        &mut self,
        word: &str,
        probability: ProbabilityInfo,
        shortcuts: Option<Vec<WeightedString>>,
        is_not_a_word: bool,
    ) -> Result<()> {
        let mut entry = WordEntry::new(probability);
        entry.shortcuts = shortcuts.unwrap_or_default();
        entry.is_not_a_word = is_not_a_word;
        self.insert(word, entry, UpdatePolicy::KeepMax)
    }

    /// Inserts `entry` under `word`.
    ///
    /// Walks one node array per step. A node whose label only partly matches
    /// is split at the divergence point; a missing first code point appends a
    /// new node to the current array.
    pub fn insert(&mut self, word: &str, entry: WordEntry, policy: UpdatePolicy) -> Result<()> {
        let chars: Vec<char> = word.chars().collect();
        if chars.is_empty() {
            return Err(DictError::EmptyWord);
        }
        let max_bigrams = self.max_bigrams_per_word;
        let mut array = ROOT;
        let mut pos = 0;
        loop {
            let first = chars[pos];
            let idx = match self.arrays[array]
                .nodes
                .binary_search_by(|n| n.chars[0].cmp(&first))
            {
                Ok(idx) => idx,
                Err(insert_at) => {
                    self.arrays[array].nodes.insert(
                        insert_at,
                        PtNode { chars: chars[pos..].to_vec(), terminal: Some(entry), children: None },
                    );
                    return Ok(());
                }
            };

            let common = common_prefix_len(&self.arrays[array].nodes[idx].chars, &chars[pos..]);
            if common < self.arrays[array].nodes[idx].chars.len() {
                self.split_node(array, idx, common);
            }
            pos += common;

            if pos == chars.len() {
                let node = &mut self.arrays[array].nodes[idx];
                match node.terminal.as_mut() {
                    Some(existing) => merge_entry(existing, entry, policy, max_bigrams),
                    None => node.terminal = Some(entry),
                }
                return Ok(());
            }

            array = match self.arrays[array].nodes[idx].children {
                Some(child) => child,
                None => {
                    let child = self.alloc_array();
                    self.arrays[array].nodes[idx].children = Some(child);
                    child
                }
            };
        }
    }

    /// Splits a node so its label keeps only the first `at` code points; the
    /// remainder moves, with the payload and children, into a fresh child array.
    fn split_node(&mut self, array: ArrayId, idx: usize, at: usize) {
        let new_array = self.arrays.len();
        let node = &mut self.arrays[array].nodes[idx];
        let tail = PtNode {
            chars: node.chars.split_off(at),
            terminal: node.terminal.take(),
            children: node.children.replace(new_array),
        };
        self.arrays.push(PtNodeArray { nodes: vec![tail] });
    }

    fn locate(&self, word: &str) -> Option<(ArrayId, usize)> {
        let chars: Vec<char> = word.chars().collect();
        if chars.is_empty() {
            return None;
        }
        let mut array = ROOT;
        let mut pos = 0;
        loop {
            let nodes = &self.arrays[array].nodes;
            let idx = nodes.binary_search_by(|n| n.chars[0].cmp(&chars[pos])).ok()?;
            let node = &nodes[idx];
            let rest = &chars[pos..];
            if rest.len() < node.chars.len() || rest[..node.chars.len()] != node.chars[..] {
                return None;
            }
            pos += node.chars.len();
            if pos == chars.len() {
                return node.terminal.is_some().then_some((array, idx));
            }
            array = node.children?;
        }
    }

    /// Returns the payload of `word` if it is stored as a terminal.
    pub fn find_word(&self, word: &str) -> Option<&WordEntry> {
        let (array, idx) = self.locate(word)?;
        self.arrays[array].nodes[idx].terminal.as_ref()
    }

    pub fn find_word_mut(&mut self, word: &str) -> Option<&mut WordEntry> {
        let (array, idx) = self.locate(word)?;
        self.arrays[array].nodes[idx].terminal.as_mut()
    }

    pub fn has_word(&self, word: &str) -> bool {
        self.locate(word).is_some()
    }

    /// Attaches `word2` as a bigram of `word1`, keeping the higher probability.
    ///
    /// `word1` must already be a word. A missing `word2` is added with
    /// probability 0 so the bigram target always resolves.
    pub fn set_bigram(&mut self, word1: &str, word2: &str, probability: ProbabilityInfo) -> Result<()> {
        self.set_bigram_with(word1, word2, probability, UpdatePolicy::KeepMax)
    }

    pub fn set_bigram_with(
        &mut self,
        word1: &str,
        word2: &str,
        probability: ProbabilityInfo,
        policy: UpdatePolicy,
    ) -> Result<()> {
        if !self.has_word(word1) {
            return Err(DictError::NoSuchWord(word1.to_string()));
        }
        if !self.has_word(word2) {
            self.add(word2, ProbabilityInfo::new(0), None, false)?;
        }
        let max = self.max_bigrams_per_word;
        let entry = self
            .find_word_mut(word1)
            .ok_or_else(|| DictError::NoSuchWord(word1.to_string()))?;
        upsert_bigram(&mut entry.bigrams, WeightedString::with_info(word2, probability), policy, max);
        Ok(())
    }

    /// Removes the bigram `word1 -> word2`. Returns false when it was not there.
    pub fn remove_bigram(&mut self, word1: &str, word2: &str) -> bool {
        let Some(entry) = self.find_word_mut(word1) else {
            return false;
        };
        let before = entry.bigrams.len();
        entry.bigrams.retain(|b| b.word != word2);
        entry.bigrams.len() != before
    }

    /// Drops the terminal payload of `word` and every bigram that targets it.
    /// Node arrays are left in place until [`FusionDictionary::compact`].
    pub fn remove_word(&mut self, word: &str) -> bool {
        let Some((array, idx)) = self.locate(word) else {
            return false;
        };
        self.arrays[array].nodes[idx].terminal = None;
        self.retain_bigrams(|_, bigram| bigram.word != word);
        true
    }

    /// Calls `f` on every word payload, depth first in prefix order.
    pub fn visit_words_mut(&mut self, mut f: impl FnMut(&str, &mut WordEntry)) {
        let mut prefix = String::new();
        visit_mut(&mut self.arrays, ROOT, &mut prefix, &mut f);
    }

    /// Keeps only the words for which `keep` returns true and cascades the
    /// removal to bigrams that pointed at them. Returns the removed words.
    pub fn retain_words(&mut self, mut keep: impl FnMut(&str, &WordEntry) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        let mut prefix = String::new();
        retain_mut(&mut self.arrays, ROOT, &mut prefix, &mut keep, &mut removed);
        if !removed.is_empty() {
            let gone: std::collections::HashSet<&str> = removed.iter().map(String::as_str).collect();
            self.retain_bigrams(|_, bigram| !gone.contains(bigram.word.as_str()));
        }
        removed
    }

    /// Keeps only the bigrams for which `keep(source, bigram)` returns true.
    /// Returns how many were dropped.
    pub fn retain_bigrams(&mut self, mut keep: impl FnMut(&str, &WeightedString) -> bool) -> usize {
        let mut dropped = 0;
        self.visit_words_mut(|source, entry| {
            let before = entry.bigrams.len();
            entry.bigrams.retain(|b| keep(source, b));
            dropped += before - entry.bigrams.len();
        });
        dropped
    }

    /// Depth-first enumeration in prefix order.
    pub fn words(&self) -> Words<'_> {
        Words { dict: self, stack: vec![(ROOT, 0)], bases: vec![0], prefix: Vec::new() }
    }

    /// All words ordered by probability descending, then lexicographically.
    pub fn words_by_probability(&self) -> Vec<Word> {
        let mut words: Vec<Word> = self.words().collect();
        words.sort_by(words_by_probability);
        words
    }

    /// Best `k` suggestable words starting with `prefix`.
    pub fn suggestions_for_prefix(&self, prefix: &str, k: usize) -> Vec<Word> {
        let chars: Vec<char> = prefix.chars().collect();
        let mut found = Vec::new();
        let mut array = ROOT;
        let mut pos = 0;
        let mut walked: Vec<char> = Vec::new();
        loop {
            if pos == chars.len() {
                for node in &self.arrays[array].nodes {
                    self.collect_subtree(node, &mut walked.clone(), &mut found);
                }
                break;
            }
            let nodes = &self.arrays[array].nodes;
            let Ok(idx) = nodes.binary_search_by(|n| n.chars[0].cmp(&chars[pos])) else {
                break;
            };
            let node = &nodes[idx];
            let common = common_prefix_len(&node.chars, &chars[pos..]);
            if pos + common == chars.len() {
                self.collect_subtree(node, &mut walked, &mut found);
                break;
            }
            if common < node.chars.len() {
                break;
            }
            walked.extend_from_slice(&node.chars);
            pos += common;
            match node.children {
                Some(child) => array = child,
                None => break,
            }
        }
        found.retain(|w| !w.entry.is_not_a_word);
        found.sort_by(words_by_probability);
        found.truncate(k);
        found
    }

    fn collect_subtree(&self, node: &PtNode, prefix: &mut Vec<char>, out: &mut Vec<Word>) {
        let base = prefix.len();
        prefix.extend_from_slice(&node.chars);
        if let Some(entry) = &node.terminal {
            out.push(Word { text: prefix.iter().collect(), entry: entry.clone() });
        }
        if let Some(child) = node.children {
            for n in &self.arrays[child].nodes {
                self.collect_subtree(n, prefix, out);
            }
        }
        prefix.truncate(base);
    }

    pub fn unigram_count(&self) -> usize {
        self.reachable_nodes().filter(|n| n.terminal.is_some()).count()
    }

    pub fn bigram_count(&self) -> usize {
        self.reachable_nodes()
            .filter_map(|n| n.terminal.as_ref())
            .map(|e| e.bigrams.len())
            .sum()
    }

    pub fn node_count(&self) -> usize {
        self.reachable_nodes().count()
    }

    fn reachable_nodes(&self) -> impl Iterator<Item = &PtNode> {
        let mut stack = vec![ROOT];
        let mut nodes = Vec::new();
        while let Some(array) = stack.pop() {
            for node in &self.arrays[array].nodes {
                if let Some(child) = node.children {
                    stack.push(child);
                }
                nodes.push(node);
            }
        }
        nodes.into_iter()
    }

    /// Rebuilds the arena: drops non-terminal leaves and empty arrays, and
    /// merges non-terminal nodes that have a single child into that child.
    pub fn compact(&mut self) {
        let mut old = std::mem::take(&mut self.arrays);
        let mut out = vec![PtNodeArray::default()];
        let root_nodes = std::mem::take(&mut old[ROOT].nodes);
        let nodes = root_nodes
            .into_iter()
            .filter_map(|n| compact_node(&mut old, n, &mut out))
            .collect();
        out[ROOT].nodes = nodes;
        self.arrays = out;
    }
}

/// Depth-first iterator over the words of a [`FusionDictionary`].
pub struct Words<'a> {
    dict: &'a FusionDictionary,
    // (array, next node index) per level, with the prefix length at entry.
    stack: Vec<(ArrayId, usize)>,
    bases: Vec<usize>,
    prefix: Vec<char>,
}

impl Iterator for Words<'_> {
    type Item = Word;

    fn next(&mut self) -> Option<Word> {
        while let Some(top) = self.stack.last_mut() {
            let (array, idx) = *top;
            let nodes = &self.dict.arrays[array].nodes;
            if idx >= nodes.len() {
                self.stack.pop();
                self.bases.pop();
                continue;
            }
            top.1 += 1;
            let base = self.bases.last().copied().unwrap_or(0);
            let node = &nodes[idx];
            self.prefix.truncate(base);
            self.prefix.extend_from_slice(&node.chars);
            if let Some(child) = node.children {
                self.stack.push((child, 0));
                self.bases.push(self.prefix.len());
            }
            if let Some(entry) = &node.terminal {
                return Some(Word { text: self.prefix.iter().collect(), entry: entry.clone() });
            }
        }
        None
    }
}

fn common_prefix_len(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn merge_entry(existing: &mut WordEntry, new: WordEntry, policy: UpdatePolicy, max_bigrams: usize) {
    // Flags follow the entry whose probability is kept. Equal probabilities
    // under `KeepMax` union the flags.
    let (old_p, new_p) = (existing.probability.probability, new.probability.probability);
    match policy {
        UpdatePolicy::KeepMax if new_p == old_p => {
            existing.probability = existing.probability.max(new.probability);
            existing.is_not_a_word |= new.is_not_a_word;
            existing.is_possibly_offensive |= new.is_possibly_offensive;
        }
        UpdatePolicy::KeepMax if new_p < old_p => {}
        UpdatePolicy::KeepMax | UpdatePolicy::Overwrite => {
            existing.probability = new.probability;
            existing.is_not_a_word = new.is_not_a_word;
            existing.is_possibly_offensive = new.is_possibly_offensive;
        }
    }
    for shortcut in new.shortcuts {
        match existing.shortcuts.iter_mut().find(|s| s.word == shortcut.word) {
            Some(s) => s.probability = s.probability.max(shortcut.probability),
            None => existing.shortcuts.push(shortcut),
        }
    }
    for bigram in new.bigrams {
        upsert_bigram(&mut existing.bigrams, bigram, policy, max_bigrams);
    }
}

/// Inserts or updates a bigram, keeps the list ordered and trims it to `max`
/// by dropping the weakest entries.
pub fn upsert_bigram(
    bigrams: &mut Vec<WeightedString>,
    bigram: WeightedString,
    policy: UpdatePolicy,
    max: usize,
) {
    match bigrams.iter_mut().find(|b| b.word == bigram.word) {
        Some(existing) => {
            existing.probability = match policy {
                UpdatePolicy::KeepMax => existing.probability.max(bigram.probability),
                UpdatePolicy::Overwrite => bigram.probability,
            }
        }
        None => bigrams.push(bigram),
    }
    bigrams.sort_by(by_probability_desc);
    bigrams.truncate(max);
}

fn visit_mut(
    arrays: &mut [PtNodeArray],
    array: ArrayId,
    prefix: &mut String,
    f: &mut impl FnMut(&str, &mut WordEntry),
) {
    for i in 0..arrays[array].nodes.len() {
        let base = prefix.len();
        prefix.extend(arrays[array].nodes[i].chars.iter());
        if let Some(entry) = arrays[array].nodes[i].terminal.as_mut() {
            f(prefix, entry);
        }
        if let Some(child) = arrays[array].nodes[i].children {
            visit_mut(arrays, child, prefix, f);
        }
        prefix.truncate(base);
    }
}

fn retain_mut(
    arrays: &mut [PtNodeArray],
    array: ArrayId,
    prefix: &mut String,
    keep: &mut impl FnMut(&str, &WordEntry) -> bool,
    removed: &mut Vec<String>,
) {
    for i in 0..arrays[array].nodes.len() {
        let base = prefix.len();
        prefix.extend(arrays[array].nodes[i].chars.iter());
        let drop = match &arrays[array].nodes[i].terminal {
            Some(entry) => !keep(prefix, entry),
            None => false,
        };
        if drop {
            arrays[array].nodes[i].terminal = None;
            removed.push(prefix.clone());
        }
        if let Some(child) = arrays[array].nodes[i].children {
            retain_mut(arrays, child, prefix, keep, removed);
        }
        prefix.truncate(base);
    }
}

fn compact_node(old: &mut [PtNodeArray], node: PtNode, out: &mut Vec<PtNodeArray>) -> Option<PtNode> {
    let mut children: Vec<PtNode> = match node.children {
        Some(child) => {
            let nodes = std::mem::take(&mut old[child].nodes);
            nodes.into_iter().filter_map(|n| compact_node(old, n, out)).collect()
        }
        None => Vec::new(),
    };
    match (node.terminal.is_some(), children.len()) {
        (false, 0) => None,
        (false, 1) => {
            let mut only = children.pop()?;
            let mut chars = node.chars;
            chars.append(&mut only.chars);
            only.chars = chars;
            Some(only)
        }
        _ => {
            let children = if children.is_empty() {
                None
            } else {
                out.push(PtNodeArray { nodes: children });
                Some(out.len() - 1)
            };
            Some(PtNode { chars: node.chars, terminal: node.terminal, children })
        }
    }
}
