// src/core/types.rs
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Highest storable probability for unigrams, bigrams and shortcuts.
pub const MAX_PROBABILITY: u8 = 255;

/// Probability carried by an allowlisted ("whitelist") shortcut.
pub const SHORTCUT_WHITELIST_PROBABILITY: u8 = 15;

/// Usage history of an entry in a decaying dictionary.
///
/// `level` is the reinforcement tier (0 = seen but not yet valid) and
/// `count` the number of reinforcements accumulated inside that tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoricalInfo {
    pub timestamp: u32,
    pub level: u8,
    pub count: u8,
}

impl HistoricalInfo {
    pub fn new(timestamp: u32, level: u8, count: u8) -> Self {
        Self { timestamp, level, count }
    }
}

/// Probability of a unigram or bigram, plus its history when the dictionary tracks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbabilityInfo {
    pub probability: u8,
    pub historical: Option<HistoricalInfo>,
}

impl ProbabilityInfo {
    pub fn new(probability: u8) -> Self {
        Self { probability, historical: None }
    }

    pub fn with_historical(probability: u8, historical: HistoricalInfo) -> Self {
        Self { probability, historical: Some(historical) }
    }

    /// Keeps whichever side has the higher probability; the left side wins ties.
    pub fn max(self, other: ProbabilityInfo) -> ProbabilityInfo {
        if other.probability > self.probability {
            other
        } else {
            self
        }
    }
}

/// An immutable (string, probability) pair used for bigram and shortcut targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeightedString {
    pub word: String,
    pub probability: ProbabilityInfo,
}

impl WeightedString {
    pub fn new(word: impl Into<String>, probability: u8) -> Self {
        Self { word: word.into(), probability: ProbabilityInfo::new(probability) }
    }

    pub fn with_info(word: impl Into<String>, probability: ProbabilityInfo) -> Self {
        Self { word: word.into(), probability }
    }

    pub fn probability(&self) -> u8 {
        self.probability.probability
    }
}

/// Orders weighted strings by descending probability, then lexicographically.
pub fn by_probability_desc(a: &WeightedString, b: &WeightedString) -> Ordering {
    b.probability
        .probability
        .cmp(&a.probability.probability)
        .then_with(|| a.word.cmp(&b.word))
}

/// Terminal payload stored on a trie node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WordEntry {
    pub probability: ProbabilityInfo,
    /// Kept sorted with [`by_probability_desc`].
    pub bigrams: Vec<WeightedString>,
    pub shortcuts: Vec<WeightedString>,
    /// Valid shortcut target, never offered as a suggestion.
    pub is_not_a_word: bool,
    pub is_possibly_offensive: bool,
}

impl Default for ProbabilityInfo {
    fn default() -> Self {
        ProbabilityInfo::new(0)
    }
}

impl WordEntry {
    pub fn new(probability: ProbabilityInfo) -> Self {
        Self { probability, ..Default::default() }
    }

    pub fn bigram(&self, target: &str) -> Option<&WeightedString> {
        self.bigrams.iter().find(|b| b.word == target)
    }
}

/// A word read out of a dictionary together with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub entry: WordEntry,
}

impl Word {
    pub fn probability(&self) -> u8 {
        self.entry.probability.probability
    }
}

/// Report ordering: probability descending, then lexicographic.
pub fn words_by_probability(a: &Word, b: &Word) -> Ordering {
    b.probability().cmp(&a.probability()).then_with(|| a.text.cmp(&b.text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_prefers_higher_probability() {
        let low = ProbabilityInfo::new(50);
        let high = ProbabilityInfo::new(100);
        assert_eq!(low.max(high), high);
        assert_eq!(high.max(low), high);
    }

    #[test]
    fn weighted_strings_sort_by_probability_then_text() {
        let mut v = vec![
            WeightedString::new("b", 10),
            WeightedString::new("a", 10),
            WeightedString::new("c", 20),
        ];
        v.sort_by(by_probability_desc);
        let order: Vec<&str> = v.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(order, ["c", "a", "b"]);
    }
}
