// File: src/format/combined.rs
//! The line-oriented "combined" interchange format.
//!
//! ```text
//! dictionary=main:en_us,locale=en_US,version=12
//!  word=hello,f=120
//!   bigram=world,f=80
//!  word=thx,f=0,not_a_word=true
//!   shortcut=thanks,f=whitelist
//! ```

use crate::core::options::{DictionaryOptions, DICTIONARY_KEY};
use crate::core::trie::{FusionDictionary, UpdatePolicy};
use crate::core::types::{
    words_by_probability, HistoricalInfo, ProbabilityInfo, WeightedString, WordEntry,
    SHORTCUT_WHITELIST_PROBABILITY,
};
use crate::error::{DictError, Result};
use std::fmt::Write as _;
use tracing::debug;

const HEADER_PREFIX: &str = "dictionary=";
const WORD_TAG: &str = "word";
const SHORTCUT_TAG: &str = "shortcut";
const BIGRAM_TAG: &str = "bigram";
const PROBABILITY_TAG: &str = "f";
const NOT_A_WORD_TAG: &str = "not_a_word";
const OFFENSIVE_TAG: &str = "possibly_offensive";
const HISTORICAL_TAG: &str = "historicalInfo";
/// Legacy header flag list; accepted and ignored.
const OPTIONS_TAG: &str = "options";
const WHITELIST: &str = "whitelist";
const COMMENT: char = '#';

/// True when `line` is the header line of a combined file.
pub fn looks_like_combined(line: &str) -> bool {
    line.starts_with(HEADER_PREFIX)
}

struct PendingWord {
    text: String,
    entry: WordEntry,
    bigrams: Vec<WeightedString>,
}

fn parse_err(line: usize, message: impl Into<String>) -> DictError {
    DictError::Parse { line, message: message.into() }
}

/// Splits `k1=v1,k2=v2` into pairs. Values may not contain commas; the
/// writer refuses them through [`plain`].
fn fields(line_no: usize, text: &str) -> Result<Vec<(&str, &str)>> {
    text.split(',')
        .map(|field| {
            field
                .split_once('=')
                .ok_or_else(|| parse_err(line_no, format!("field {field:?} has no '='")))
        })
        .collect()
}

fn parse_probability(line_no: usize, value: &str) -> Result<u8> {
    value
        .parse::<u8>()
        .map_err(|_| parse_err(line_no, format!("bad probability {value:?}")))
}

fn parse_historical(line_no: usize, value: &str) -> Result<HistoricalInfo> {
    let parts: Vec<&str> = value.split(':').collect();
    let [timestamp, level, count] = parts.as_slice() else {
        return Err(parse_err(line_no, format!("bad historical info {value:?}")));
    };
    let bad = |_| parse_err(line_no, format!("bad historical info {value:?}"));
    Ok(HistoricalInfo::new(
        timestamp.parse().map_err(bad)?,
        level.parse().map_err(bad)?,
        count.parse().map_err(bad)?,
    ))
}

/// Probability plus optional history, read from one word or bigram line.
fn parse_probability_info(line_no: usize, pairs: &[(&str, &str)]) -> Result<ProbabilityInfo> {
    let mut probability = None;
    let mut historical = None;
    for &(key, value) in pairs {
        match key {
            PROBABILITY_TAG => probability = Some(parse_probability(line_no, value)?),
            HISTORICAL_TAG => historical = Some(parse_historical(line_no, value)?),
            _ => {}
        }
    }
    let probability = probability.ok_or_else(|| parse_err(line_no, "missing f="))?;
    Ok(ProbabilityInfo { probability, historical })
}

fn parse_header(line_no: usize, line: &str) -> Result<DictionaryOptions> {
    let mut options = DictionaryOptions::new();
    for (key, value) in fields(line_no, line)? {
        if key == OPTIONS_TAG {
            debug!(value, "ignoring legacy options attribute");
            continue;
        }
        if key == DICTIONARY_KEY && value.is_empty() {
            continue;
        }
        options.set(key, value);
    }
    Ok(options)
}

/// Parses a combined file into a dictionary.
///
/// Duplicate words keep the highest probability. Bigram targets that are
/// never declared as words are added with probability 0.
pub fn read_combined(text: &str) -> Result<FusionDictionary> {
    let mut options = None;
    let mut words: Vec<PendingWord> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with(COMMENT) {
            continue;
        }
        if options.is_none() {
            if !looks_like_combined(trimmed) {
                return Err(parse_err(line_no, "expected a dictionary= header line"));
            }
            options = Some(parse_header(line_no, trimmed)?);
            continue;
        }

        let pairs = fields(line_no, trimmed)?;
        let (tag, value) = pairs[0];
        match tag {
            WORD_TAG => {
                if value.is_empty() {
                    return Err(DictError::EmptyWord);
                }
                let mut entry = WordEntry::new(parse_probability_info(line_no, &pairs)?);
                for &(key, flag) in &pairs[1..] {
                    match key {
                        NOT_A_WORD_TAG => entry.is_not_a_word = flag == "true",
                        OFFENSIVE_TAG => entry.is_possibly_offensive = flag == "true",
                        PROBABILITY_TAG | HISTORICAL_TAG => {}
                        other => debug!(line = line_no, key = other, "ignoring unknown word attribute"),
                    }
                }
                words.push(PendingWord { text: value.to_string(), entry, bigrams: Vec::new() });
            }
            SHORTCUT_TAG | BIGRAM_TAG => {
                if !raw.starts_with("  ") {
                    return Err(parse_err(line_no, format!("{tag} line must be indented under a word")));
                }
                let current = words
                    .last_mut()
                    .ok_or_else(|| parse_err(line_no, format!("{tag} before any word")))?;
                if tag == SHORTCUT_TAG {
                    let f = pairs
                        .iter()
                        .find(|(k, _)| *k == PROBABILITY_TAG)
                        .map(|&(_, v)| v)
                        .ok_or_else(|| parse_err(line_no, "missing f="))?;
                    let probability = if f == WHITELIST {
                        SHORTCUT_WHITELIST_PROBABILITY
                    } else {
                        parse_probability(line_no, f)?
                    };
                    current.entry.shortcuts.push(WeightedString::new(value, probability));
                } else {
                    let info = parse_probability_info(line_no, &pairs)?;
                    current.bigrams.push(WeightedString::with_info(value, info));
                }
            }
            other => return Err(parse_err(line_no, format!("unknown line tag {other:?}"))),
        }
    }

    let options = options.ok_or_else(|| parse_err(1, "empty combined file"))?;
    let mut dict = FusionDictionary::new(options);
    for word in &words {
        dict.insert(&word.text, word.entry.clone(), UpdatePolicy::KeepMax)?;
    }
    for word in &words {
        for bigram in &word.bigrams {
            dict.set_bigram_with(&word.text, &bigram.word, bigram.probability, UpdatePolicy::KeepMax)?;
        }
    }
    debug!(words = words.len(), "parsed combined dictionary");
    Ok(dict)
}

fn push_historical(out: &mut String, probability: &ProbabilityInfo) {
    if let Some(h) = probability.historical {
        let _ = write!(out, ",{HISTORICAL_TAG}={}:{}:{}", h.timestamp, h.level, h.count);
    }
}

/// A field value as written: commas and line breaks cannot be escaped.
fn plain<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    if value.contains([',', '\n', '\r']) {
        return Err(DictError::Format(format!(
            "{what} {value:?} cannot be written to a combined file"
        )));
    }
    Ok(value)
}

/// Renders `dict` as a combined file, words ordered by probability then text.
pub fn write_combined(dict: &FusionDictionary) -> Result<String> {
    let mut out = String::new();
    out.push_str(HEADER_PREFIX);
    out.push_str(plain("dictionary id", dict.options.id().unwrap_or_default())?);
    for (key, value) in &dict.options.attributes {
        if key != DICTIONARY_KEY {
            let _ = write!(out, ",{}={}", plain("header key", key)?, plain("header value", value)?);
        }
    }
    out.push('\n');

    let mut words: Vec<_> = dict.words().collect();
    words.sort_by(words_by_probability);
    for word in &words {
        let entry = &word.entry;
        let text = plain("word", &word.text)?;
        let _ = write!(out, " {WORD_TAG}={text},{PROBABILITY_TAG}={}", entry.probability.probability);
        if entry.is_not_a_word {
            let _ = write!(out, ",{NOT_A_WORD_TAG}=true");
        }
        if entry.is_possibly_offensive {
            let _ = write!(out, ",{OFFENSIVE_TAG}=true");
        }
        push_historical(&mut out, &entry.probability);
        out.push('\n');
        for shortcut in &entry.shortcuts {
            let _ = write!(out, "  {SHORTCUT_TAG}={},{PROBABILITY_TAG}=", plain("shortcut", &shortcut.word)?);
            if shortcut.probability() == SHORTCUT_WHITELIST_PROBABILITY {
                out.push_str(WHITELIST);
            } else {
                let _ = write!(out, "{}", shortcut.probability());
            }
            out.push('\n');
        }
        for bigram in &entry.bigrams {
            let _ = write!(out, "  {BIGRAM_TAG}={},{PROBABILITY_TAG}={}", plain("bigram", &bigram.word)?, bigram.probability());
            push_historical(&mut out, &bigram.probability);
            out.push('\n');
        }
    }
    Ok(out)
}
