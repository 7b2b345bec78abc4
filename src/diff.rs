// File: src/diff.rs
//! Read-only comparison of two dictionaries.

use crate::core::options::DictionaryOptions;
use crate::core::trie::FusionDictionary;
use crate::core::types::{WeightedString, WordEntry};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeaderDiff {
    Added { key: String, value: String },
    Removed { key: String, value: String },
    Changed { key: String, from: String, to: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WordDiff {
    Added { word: String, probability: u8 },
    Removed { word: String, probability: u8 },
    ProbabilityChanged { word: String, from: u8, to: u8 },
}

/// Which list of a word an [`AttributeDiff`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Bigram,
    Shortcut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeDiff {
    Added { word: String, relation: Relation, target: String, probability: u8 },
    Removed { word: String, relation: Relation, target: String, probability: u8 },
    ProbabilityChanged { word: String, relation: Relation, target: String, from: u8, to: u8 },
    FlagChanged { word: String, flag: &'static str, from: bool, to: bool },
}

/// Complete edit script from `left` to `right`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DictionaryDiff {
    pub header: Vec<HeaderDiff>,
    /// Set when the locales' languages differ and words were not compared.
    pub body_skipped: bool,
    pub words: Vec<WordDiff>,
    pub attributes: Vec<AttributeDiff>,
}

impl DictionaryDiff {
    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.words.is_empty() && self.attributes.is_empty()
    }
}

/// Language part of a locale such as `en_US` or `pt-BR`.
fn language(locale: &str) -> &str {
    locale.split(|c: char| c == '_' || c == '-').next().unwrap_or(locale)
}

fn locales_comparable(left: &DictionaryOptions, right: &DictionaryOptions) -> bool {
    match (left.locale(), right.locale()) {
        (Some(a), Some(b)) => language(a).eq_ignore_ascii_case(language(b)),
        _ => true,
    }
}

pub fn diff_headers(left: &DictionaryOptions, right: &DictionaryOptions) -> Vec<HeaderDiff> {
    let keys: BTreeSet<&String> = left.attributes.keys().chain(right.attributes.keys()).collect();
    keys.into_iter()
        .filter_map(|key| match (left.attributes.get(key), right.attributes.get(key)) {
            (Some(a), Some(b)) if a != b => {
                Some(HeaderDiff::Changed { key: key.clone(), from: a.clone(), to: b.clone() })
            }
            (Some(a), None) => Some(HeaderDiff::Removed { key: key.clone(), value: a.clone() }),
            (None, Some(b)) => Some(HeaderDiff::Added { key: key.clone(), value: b.clone() }),
            _ => None,
        })
        .collect()
}

fn diff_list(
    word: &str,
    relation: Relation,
    left: &[WeightedString],
    right: &[WeightedString],
    out: &mut Vec<AttributeDiff>,
) {
    let left: BTreeMap<&str, u8> = left.iter().map(|w| (w.word.as_str(), w.probability())).collect();
    let right: BTreeMap<&str, u8> = right.iter().map(|w| (w.word.as_str(), w.probability())).collect();
    let targets: BTreeSet<&str> = left.keys().chain(right.keys()).copied().collect();
    for target in targets {
        let change = match (left.get(target), right.get(target)) {
            (Some(&from), Some(&to)) if from != to => AttributeDiff::ProbabilityChanged {
                word: word.to_string(),
                relation,
                target: target.to_string(),
                from,
                to,
            },
            (Some(&probability), None) => AttributeDiff::Removed {
                word: word.to_string(),
                relation,
                target: target.to_string(),
                probability,
            },
            (None, Some(&probability)) => AttributeDiff::Added {
                word: word.to_string(),
                relation,
                target: target.to_string(),
                probability,
            },
            _ => continue,
        };
        out.push(change);
    }
}

fn diff_entry(word: &str, left: &WordEntry, right: &WordEntry, out: &mut Vec<AttributeDiff>) {
    for (flag, from, to) in [
        ("not_a_word", left.is_not_a_word, right.is_not_a_word),
        ("possibly_offensive", left.is_possibly_offensive, right.is_possibly_offensive),
    ] {
        if from != to {
            out.push(AttributeDiff::FlagChanged { word: word.to_string(), flag, from, to });
        }
    }
    diff_list(word, Relation::Bigram, &left.bigrams, &right.bigrams, out);
    diff_list(word, Relation::Shortcut, &left.shortcuts, &right.shortcuts, out);
}

/// Compares headers, then (unless the languages differ) every word and its lists.
pub fn diff(left: &FusionDictionary, right: &FusionDictionary) -> DictionaryDiff {
    let mut result = DictionaryDiff { header: diff_headers(&left.options, &right.options), ..Default::default() };
    if !locales_comparable(&left.options, &right.options) {
        result.body_skipped = true;
        return result;
    }

    let left_words: BTreeMap<String, WordEntry> = left.words().map(|w| (w.text, w.entry)).collect();
    let right_words: BTreeMap<String, WordEntry> = right.words().map(|w| (w.text, w.entry)).collect();
    let all: BTreeSet<&String> = left_words.keys().chain(right_words.keys()).collect();
    for word in all {
        match (left_words.get(word), right_words.get(word)) {
            (Some(a), Some(b)) => {
                let (from, to) = (a.probability.probability, b.probability.probability);
                if from != to {
                    result.words.push(WordDiff::ProbabilityChanged { word: word.clone(), from, to });
                }
                diff_entry(word, a, b, &mut result.attributes);
            }
            (Some(a), None) => result
                .words
                .push(WordDiff::Removed { word: word.clone(), probability: a.probability.probability }),
            (None, Some(b)) => result
                .words
                .push(WordDiff::Added { word: word.clone(), probability: b.probability.probability }),
            (None, None) => {}
        }
    }
    result
}

/// Sign used in front of a change line: `+` added, `-` removed, `#` changed.
pub trait ChangeSign {
    fn sign(&self) -> char;
}

impl ChangeSign for HeaderDiff {
    fn sign(&self) -> char {
        match self {
            HeaderDiff::Added { .. } => '+',
            HeaderDiff::Removed { .. } => '-',
            HeaderDiff::Changed { .. } => '#',
        }
    }
}

impl ChangeSign for WordDiff {
    fn sign(&self) -> char {
        match self {
            WordDiff::Added { .. } => '+',
            WordDiff::Removed { .. } => '-',
            WordDiff::ProbabilityChanged { .. } => '#',
        }
    }
}

impl ChangeSign for AttributeDiff {
    fn sign(&self) -> char {
        match self {
            AttributeDiff::Added { .. } => '+',
            AttributeDiff::Removed { .. } => '-',
            AttributeDiff::ProbabilityChanged { .. } | AttributeDiff::FlagChanged { .. } => '#',
        }
    }
}

impl fmt::Display for HeaderDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderDiff::Added { key, value } => write!(f, "header {key} = {value}"),
            HeaderDiff::Removed { key, value } => write!(f, "header {key} = {value}"),
            HeaderDiff::Changed { key, from, to } => write!(f, "header {key}: {from} -> {to}"),
        }
    }
}

impl fmt::Display for WordDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WordDiff::Added { word, probability } | WordDiff::Removed { word, probability } => {
                write!(f, "{word} : {probability}")
            }
            WordDiff::ProbabilityChanged { word, from, to } => write!(f, "{word} : {from} -> {to}"),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Relation::Bigram => "bigram",
            Relation::Shortcut => "shortcut",
        })
    }
}

impl fmt::Display for AttributeDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeDiff::Added { word, relation, target, probability }
            | AttributeDiff::Removed { word, relation, target, probability } => {
                write!(f, "{word} {relation} {target} : {probability}")
            }
            AttributeDiff::ProbabilityChanged { word, relation, target, from, to } => {
                write!(f, "{word} {relation} {target} : {from} -> {to}")
            }
            AttributeDiff::FlagChanged { word, flag, from, to } => write!(f, "{word} {flag} : {from} -> {to}"),
        }
    }
}

impl DictionaryDiff {
    /// Every change as `(sign, description)`, header first, then words, then lists.
    pub fn lines(&self) -> Vec<(char, String)> {
        let header = self.header.iter().map(|d| (d.sign(), d.to_string()));
        let words = self.words.iter().map(|d| (d.sign(), d.to_string()));
        let attributes = self.attributes.iter().map(|d| (d.sign(), d.to_string()));
        header.chain(words).chain(attributes).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::LOCALE_KEY;
    use crate::core::types::ProbabilityInfo;

    fn dict(locale: &str, words: &[(&str, u8)]) -> FusionDictionary {
        let mut options = DictionaryOptions::new();
        options.set(LOCALE_KEY, locale);
        let mut d = FusionDictionary::new(options);
        for (w, p) in words {
            d.add(w, ProbabilityInfo::new(*p), None, false).unwrap();
        }
        d
    }

    #[test]
    fn reports_word_level_edit_script() {
        let a = dict("en_US", &[("cat", 10)]);
        let b = dict("en_US", &[("cat", 12), ("dog", 5)]);
        let d = diff(&a, &b);
        assert!(d.header.is_empty());
        assert_eq!(
            d.words,
            vec![
                WordDiff::ProbabilityChanged { word: "cat".into(), from: 10, to: 12 },
                WordDiff::Added { word: "dog".into(), probability: 5 },
            ]
        );
        assert!(d.attributes.is_empty());
        assert_eq!(diff(&b, &b), DictionaryDiff::default());
    }

    #[test]
    fn compares_bigram_sets() {
        let mut a = dict("en", &[("the", 100), ("cat", 50), ("dog", 40)]);
        let mut b = a.clone();
        a.set_bigram("the", "cat", ProbabilityInfo::new(30)).unwrap();
        a.set_bigram("the", "dog", ProbabilityInfo::new(20)).unwrap();
        b.set_bigram("the", "cat", ProbabilityInfo::new(35)).unwrap();
        b.set_bigram("cat", "dog", ProbabilityInfo::new(5)).unwrap();
        let d = diff(&a, &b);
        assert!(d.words.is_empty());
        let lines: Vec<String> = d.attributes.iter().map(|x| format!("{} {x}", x.sign())).collect();
        assert_eq!(
            lines,
            vec!["+ cat bigram dog : 5", "# the bigram cat : 30 -> 35", "- the bigram dog : 20"]
        );
    }

    #[test]
    fn header_changes_are_symmetric() {
        let mut a = dict("en_US", &[]);
        let mut b = dict("en_GB", &[]);
        a.options.set("description", "old");
        b.options.set("date", "2024");
        let d = diff(&a, &b);
        assert_eq!(
            d.header,
            vec![
                HeaderDiff::Added { key: "date".into(), value: "2024".into() },
                HeaderDiff::Removed { key: "description".into(), value: "old".into() },
                HeaderDiff::Changed { key: "locale".into(), from: "en_US".into(), to: "en_GB".into() },
            ]
        );
        assert!(!d.body_skipped);
    }

    #[test]
    fn different_languages_skip_the_body() {
        let a = dict("en_US", &[("cat", 10)]);
        let b = dict("fr_FR", &[("chat", 10)]);
        let d = diff(&a, &b);
        assert!(d.body_skipped);
        assert!(d.words.is_empty());
        assert_eq!(d.header.len(), 1);
    }
}
