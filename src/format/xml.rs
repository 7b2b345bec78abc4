// File: src/format/xml.rs
//! XML word lists:
//!
//! ```xml
//! <wordlist format="2" locale="en_US">
//!   <w word="hello" f="120">
//!     <bigram f="80">world</bigram>
//!   </w>
//!   <w word="thx" f="0" not_a_word="true">
//!     <shortcut f="whitelist">thanks</shortcut>
//!   </w>
//! </wordlist>
//! ```

use crate::core::options::DictionaryOptions;
use crate::core::trie::{FusionDictionary, UpdatePolicy};
use crate::core::types::{
    words_by_probability, HistoricalInfo, ProbabilityInfo, WeightedString, WordEntry,
    SHORTCUT_WHITELIST_PROBABILITY,
};
use crate::error::{DictError, Result};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt::Write as _;
use tracing::debug;

const ROOT_TAG: &[u8] = b"wordlist";
const WORD_TAG: &[u8] = b"w";
const SHORTCUT_TAG: &[u8] = b"shortcut";
const BIGRAM_TAG: &[u8] = b"bigram";
const FORMAT_ATTR: &str = "format";
const OPTIONS_ATTR: &str = "options";
const WHITELIST: &str = "whitelist";
const WORDLIST_FORMAT: &str = "2";

/// True when `line` opens an XML document or word list.
pub fn looks_like_xml(line: &str) -> bool {
    line.starts_with('<')
}

fn xml_err(reader: &Reader<&[u8]>, message: impl std::fmt::Display) -> DictError {
    DictError::Xml(format!("at byte {}: {message}", reader.buffer_position()))
}

fn attributes(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_err(reader, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn parse_u8(reader: &Reader<&[u8]>, value: &str) -> Result<u8> {
    value
        .parse()
        .map_err(|_| xml_err(reader, format!("bad probability {value:?}")))
}

fn probability_info(reader: &Reader<&[u8]>, attrs: &[(String, String)]) -> Result<ProbabilityInfo> {
    let f = attr(attrs, "f").ok_or_else(|| xml_err(reader, "missing f attribute"))?;
    let probability = parse_u8(reader, f)?;
    let historical = match attr(attrs, "historicalInfo") {
        Some(raw) => {
            let parts: Vec<&str> = raw.split(':').collect();
            let parsed = match parts.as_slice() {
                [t, l, c] => t
                    .parse()
                    .ok()
                    .zip(l.parse().ok())
                    .zip(c.parse().ok())
                    .map(|((t, l), c)| HistoricalInfo::new(t, l, c)),
                _ => None,
            };
            Some(parsed.ok_or_else(|| xml_err(reader, format!("bad historicalInfo {raw:?}")))?)
        }
        None => None,
    };
    Ok(ProbabilityInfo { probability, historical })
}

/// Child element currently collecting text.
enum Pending {
    Shortcut(u8),
    Bigram(ProbabilityInfo),
}

struct XmlWord {
    text: String,
    entry: WordEntry,
    bigrams: Vec<WeightedString>,
}

/// Parses an XML word list into a dictionary.
pub fn read_xml(text: &str) -> Result<FusionDictionary> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut options: Option<DictionaryOptions> = None;
    let mut words: Vec<XmlWord> = Vec::new();
    let mut in_word = false;
    let mut pending: Option<Pending> = None;
    let mut child_text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == ROOT_TAG => {
                let mut root = DictionaryOptions::new();
                for (key, value) in attributes(&reader, &e)? {
                    match key.as_str() {
                        FORMAT_ATTR => {}
                        OPTIONS_ATTR => debug!(value, "ignoring legacy options attribute"),
                        _ => root.set(key, value),
                    }
                }
                options = Some(root);
            }
            Event::Start(e) if e.name().as_ref() == WORD_TAG => {
                words.push(read_word(&reader, &e)?);
                in_word = true;
            }
            Event::Empty(e) if e.name().as_ref() == WORD_TAG => {
                words.push(read_word(&reader, &e)?);
            }
            Event::Start(e) if in_word && e.name().as_ref() == SHORTCUT_TAG => {
                let attrs = attributes(&reader, &e)?;
                let f = attr(&attrs, "f").ok_or_else(|| xml_err(&reader, "missing f attribute"))?;
                let probability = if f == WHITELIST {
                    SHORTCUT_WHITELIST_PROBABILITY
                } else {
                    parse_u8(&reader, f)?
                };
                pending = Some(Pending::Shortcut(probability));
                child_text.clear();
            }
            Event::Start(e) if in_word && e.name().as_ref() == BIGRAM_TAG => {
                let attrs = attributes(&reader, &e)?;
                pending = Some(Pending::Bigram(probability_info(&reader, &attrs)?));
                child_text.clear();
            }
            Event::Text(t) if pending.is_some() => {
                child_text.push_str(&t.unescape()?);
            }
            Event::End(e) if e.name().as_ref() == SHORTCUT_TAG || e.name().as_ref() == BIGRAM_TAG => {
                let target = std::mem::take(&mut child_text);
                let current = words
                    .last_mut()
                    .ok_or_else(|| xml_err(&reader, "child element outside a word"))?;
                match pending.take() {
                    Some(Pending::Shortcut(p)) => current.entry.shortcuts.push(WeightedString::new(target, p)),
                    Some(Pending::Bigram(info)) => current.bigrams.push(WeightedString::with_info(target, info)),
                    None => return Err(xml_err(&reader, "unexpected closing tag")),
                }
            }
            Event::End(e) if e.name().as_ref() == WORD_TAG => in_word = false,
            Event::Eof => break,
            _ => {}
        }
    }

    let options = options.ok_or_else(|| DictError::Xml("missing <wordlist> root".to_string()))?;
    let mut dict = FusionDictionary::new(options);
    for word in &words {
        dict.insert(&word.text, word.entry.clone(), UpdatePolicy::KeepMax)?;
    }
    for word in &words {
        for bigram in &word.bigrams {
            dict.set_bigram_with(&word.text, &bigram.word, bigram.probability, UpdatePolicy::KeepMax)?;
        }
    }
    debug!(words = words.len(), "parsed xml dictionary");
    Ok(dict)
}

fn read_word(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<XmlWord> {
    let attrs = attributes(reader, e)?;
    let text = attr(&attrs, "word").ok_or_else(|| xml_err(reader, "missing word attribute"))?;
    if text.is_empty() {
        return Err(DictError::EmptyWord);
    }
    let mut entry = WordEntry::new(probability_info(reader, &attrs)?);
    entry.is_not_a_word = attr(&attrs, "not_a_word") == Some("true");
    entry.is_possibly_offensive = attr(&attrs, "possibly_offensive") == Some("true");
    Ok(XmlWord { text: text.to_string(), entry, bigrams: Vec::new() })
}

fn historical_attr(out: &mut String, probability: &ProbabilityInfo) {
    if let Some(h) = probability.historical {
        let _ = write!(out, " historicalInfo=\"{}:{}:{}\"", h.timestamp, h.level, h.count);
    }
}

/// Renders `dict` as an XML word list, words ordered by probability then text.
pub fn write_xml(dict: &FusionDictionary) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = write!(out, "<wordlist {FORMAT_ATTR}=\"{WORDLIST_FORMAT}\"");
    for (key, value) in &dict.options.attributes {
        let _ = write!(out, " {key}=\"{}\"", escape(value.as_str()));
    }
    out.push_str(">\n");

    let mut words: Vec<_> = dict.words().collect();
    words.sort_by(words_by_probability);
    for word in &words {
        let entry = &word.entry;
        let _ = write!(
            out,
            "  <w word=\"{}\" f=\"{}\"",
            escape(word.text.as_str()),
            entry.probability.probability
        );
        if entry.is_not_a_word {
            out.push_str(" not_a_word=\"true\"");
        }
        if entry.is_possibly_offensive {
            out.push_str(" possibly_offensive=\"true\"");
        }
        historical_attr(&mut out, &entry.probability);
        if entry.shortcuts.is_empty() && entry.bigrams.is_empty() {
            out.push_str("/>\n");
            continue;
        }
        out.push_str(">\n");
        for shortcut in &entry.shortcuts {
            let f = if shortcut.probability() == SHORTCUT_WHITELIST_PROBABILITY {
                WHITELIST.to_string()
            } else {
                shortcut.probability().to_string()
            };
            let _ = writeln!(out, "    <shortcut f=\"{f}\">{}</shortcut>", escape(shortcut.word.as_str()));
        }
        for bigram in &entry.bigrams {
            let _ = write!(out, "    <bigram f=\"{}\"", bigram.probability());
            historical_attr(&mut out, &bigram.probability);
            let _ = writeln!(out, ">{}</bigram>", escape(bigram.word.as_str()));
        }
        out.push_str("  </w>\n");
    }
    out.push_str("</wordlist>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- fixture -->
<wordlist format="2" locale="en_US" description="Tom &amp; Jerry" options="x">
  <w word="hello" f="120">
    <bigram f="80">world</bigram>
  </w>
  <w word="world" f="100" possibly_offensive="true"/>
  <w word="thx" f="0" not_a_word="true">
    <shortcut f="whitelist">thanks</shortcut>
    <shortcut f="4">thank you</shortcut>
  </w>
</wordlist>
"#;

    fn assert_same(a: &FusionDictionary, b: &FusionDictionary) {
        assert_eq!(a.options, b.options);
        assert_eq!(a.words().collect::<Vec<_>>(), b.words().collect::<Vec<_>>());
    }

    #[test]
    fn parses_words_shortcuts_and_bigrams() {
        let d = read_xml(SAMPLE).unwrap();
        assert_eq!(d.options.locale(), Some("en_US"));
        assert_eq!(d.options.get("description"), Some("Tom & Jerry"));
        assert_eq!(d.options.get("options"), None);
        assert_eq!(d.options.get("format"), None);
        assert_eq!(d.unigram_count(), 3);
        assert_eq!(d.find_word("hello").unwrap().bigram("world").unwrap().probability(), 80);
        assert!(d.find_word("world").unwrap().is_possibly_offensive);
        let thx = d.find_word("thx").unwrap();
        assert!(thx.is_not_a_word);
        assert_eq!(
            thx.shortcuts,
            vec![
                WeightedString::new("thanks", SHORTCUT_WHITELIST_PROBABILITY),
                WeightedString::new("thank you", 4)
            ]
        );
    }

    #[test]
    fn writer_round_trips_through_reader() {
        let d = read_xml(SAMPLE).unwrap();
        let text = write_xml(&d);
        assert!(text.contains("description=\"Tom &amp; Jerry\""));
        assert!(text.contains("<shortcut f=\"whitelist\">thanks</shortcut>"));
        assert_same(&read_xml(&text).unwrap(), &d);
    }

    #[test]
    fn historical_info_survives() {
        let mut d = FusionDictionary::new(DictionaryOptions::new());
        let info = ProbabilityInfo::with_historical(30, HistoricalInfo::new(77, 1, 2));
        d.add("a<b", info, None, false).unwrap();
        d.add("c", ProbabilityInfo::new(5), None, false).unwrap();
        d.set_bigram("a<b", "c", info).unwrap();
        assert_same(&read_xml(&write_xml(&d)).unwrap(), &d);
    }

    #[test]
    fn rejects_bad_probability_and_missing_root() {
        let bad = r#"<wordlist format="2"><w word="a" f="999"/></wordlist>"#;
        assert!(matches!(read_xml(bad), Err(DictError::Xml(_))));
        assert!(matches!(read_xml("<?xml version=\"1.0\"?>"), Err(DictError::Xml(_))));
    }
}
