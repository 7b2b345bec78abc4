// File: src/format/decoder.rs
use crate::core::options::FormatOptions;
use crate::core::trie::{FusionDictionary, UpdatePolicy};
use crate::core::types::{HistoricalInfo, ProbabilityInfo, WeightedString, WordEntry};
use crate::error::{DictError, Result};
use crate::format::header::{read_header, FileHeader};
use crate::format::layout::*;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Node layout selected from the header's version and capability flags.
///
/// Each variant knows how to read one node record; everything above the
/// node level is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFormat {
    /// Version 2: compact nodes, inline lists, no forward links.
    Static,
    /// Versions 3 and 4: fixed address fields, forward-linked arrays,
    /// out-of-line lists and optional historical info.
    Dynamic { historical: bool },
}

/// A bigram entry as stored on disk: its probability and the address of the target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigramRef {
    pub probability: ProbabilityInfo,
    pub target: usize,
}

/// One node as read from a buffer, with the positions of its patchable fields.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub pos: usize,
    pub state: u8,
    pub flags: u8,
    pub chars: Vec<char>,
    pub probability: ProbabilityInfo,
    pub probability_field: usize,
    pub children: Option<usize>,
    pub children_field: Option<usize>,
    pub bigram_list_field: Option<usize>,
    pub bigram_list: Option<usize>,
    pub shortcut_list_field: Option<usize>,
    pub shortcut_list: Option<usize>,
    pub bigrams: Vec<BigramRef>,
    pub shortcuts: Vec<WeightedString>,
    pub end: usize,
}

impl NodeRecord {
    pub fn is_live(&self) -> bool {
        self.state == STATE_LIVE
    }

    pub fn is_terminal(&self) -> bool {
        self.flags & FLAG_IS_TERMINAL != 0
    }

    fn entry(&self) -> WordEntry {
        WordEntry {
            probability: self.probability,
            bigrams: Vec::new(),
            shortcuts: self.shortcuts.clone(),
            is_not_a_word: self.flags & FLAG_IS_NOT_A_WORD != 0,
            is_possibly_offensive: self.flags & FLAG_IS_POSSIBLY_OFFENSIVE != 0,
        }
    }
}

/// The nodes of one sibling group, following forward links.
#[derive(Debug, Clone)]
pub struct ArrayChain {
    pub records: Vec<NodeRecord>,
    /// Forward-link field of the last array in the chain (dynamic layouts only).
    pub tail_link: Option<usize>,
}

impl NodeFormat {
    pub fn for_format(format: FormatOptions) -> Self {
        if format.version.supports_dynamic_update() {
            NodeFormat::Dynamic { historical: format.has_historical_info }
        } else {
            NodeFormat::Static
        }
    }

    pub fn for_header(header: &FileHeader) -> Self {
        Self::for_format(FormatOptions::from_header(header.version, &header.options))
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, NodeFormat::Dynamic { .. })
    }

    pub fn read_node(self, bytes: &[u8], pos: usize) -> Result<NodeRecord> {
        match self {
            NodeFormat::Static => read_static_node(bytes, pos),
            NodeFormat::Dynamic { historical } => read_dynamic_node(bytes, pos, historical),
        }
    }

    /// Reads every node of the array at `pos`, plus any arrays chained after it.
    pub fn read_array_chain(
        self,
        bytes: &[u8],
        pos: usize,
        visited: &mut HashSet<usize>,
    ) -> Result<ArrayChain> {
        let mut records = Vec::new();
        let mut tail_link = None;
        let mut next = Some(pos);
        while let Some(array_pos) = next {
            if !visited.insert(array_pos) {
                return Err(DictError::Format(format!("node array at {array_pos} reached twice")));
            }
            let mut r = Cursor::new(bytes, array_pos);
            let count = r.array_count()?;
            let mut node_pos = r.pos();
            for _ in 0..count {
                let record = self.read_node(bytes, node_pos)?;
                node_pos = record.end;
                records.push(record);
            }
            next = match self {
                NodeFormat::Static => None,
                NodeFormat::Dynamic { .. } => {
                    tail_link = Some(node_pos);
                    Cursor::new(bytes, node_pos).address()?
                }
            };
        }
        Ok(ArrayChain { records, tail_link })
    }

    /// Follows moved-node forwarding until a non-moved node is reached.
    pub fn resolve_moved(self, bytes: &[u8], mut pos: usize) -> Result<usize> {
        if !self.is_dynamic() {
            return Ok(pos);
        }
        let mut seen = HashSet::new();
        loop {
            let record = self.read_node(bytes, pos)?;
            if record.state != STATE_MOVED {
                return Ok(pos);
            }
            if !seen.insert(pos) {
                return Err(DictError::Format(format!("moved-node cycle at {pos}")));
            }
            pos = record
                .children
                .ok_or_else(|| DictError::Format(format!("moved node at {pos} has no forward address")))?;
        }
    }

    fn read_probability(self, r: &mut Cursor<'_>) -> Result<ProbabilityInfo> {
        let probability = r.u8()?;
        match self {
            NodeFormat::Dynamic { historical: true } => {
                let timestamp = r.u32()?;
                let level = r.u8()?;
                let count = r.u8()?;
                Ok(ProbabilityInfo::with_historical(
                    probability,
                    HistoricalInfo::new(timestamp, level, count),
                ))
            }
            _ => Ok(ProbabilityInfo::new(probability)),
        }
    }

    /// Reads an out-of-line bigram list (dynamic layouts).
    pub fn read_bigram_list(self, bytes: &[u8], pos: usize) -> Result<Vec<BigramRef>> {
        let mut r = Cursor::new(bytes, pos);
        let count = r.u16()?;
        let mut bigrams = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let probability = self.read_probability(&mut r)?;
            let field = r.pos();
            let target = r
                .address()?
                .ok_or_else(|| DictError::Format(format!("bigram at {field} has no target")))?;
            bigrams.push(BigramRef { probability, target });
        }
        Ok(bigrams)
    }
}

fn read_shortcut_list(r: &mut Cursor<'_>) -> Result<Vec<WeightedString>> {
    let count = r.u16()?;
    let mut shortcuts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let probability = r.u8()?;
        let word: String = r.terminated_chars()?.into_iter().collect();
        shortcuts.push(WeightedString::new(word, probability));
    }
    Ok(shortcuts)
}

fn read_static_node(bytes: &[u8], pos: usize) -> Result<NodeRecord> {
    let mut r = Cursor::new(bytes, pos);
    let flags = r.u8()?;
    let chars = r.label(flags & FLAG_HAS_MULTIPLE_CHARS != 0)?;
    let probability_field = r.pos();
    let probability = if flags & FLAG_IS_TERMINAL != 0 {
        ProbabilityInfo::new(r.u8()?)
    } else {
        ProbabilityInfo::default()
    };
    let (children, children_field) = if flags & FLAG_HAS_CHILDREN != 0 {
        let field = r.pos();
        let target = r
            .address()?
            .ok_or_else(|| DictError::Format(format!("node at {pos} flags children but has none")))?;
        (Some(target), Some(field))
    } else {
        (None, None)
    };
    let shortcuts = if flags & FLAG_HAS_SHORTCUTS != 0 {
        read_shortcut_list(&mut r)?
    } else {
        Vec::new()
    };
    let mut bigrams = Vec::new();
    if flags & FLAG_HAS_BIGRAMS != 0 {
        let count = r.u16()?;
        for _ in 0..count {
            let probability = ProbabilityInfo::new(r.u8()?);
            let field = r.pos();
            let target = r
                .address()?
                .ok_or_else(|| DictError::Format(format!("bigram at {field} has no target")))?;
            bigrams.push(BigramRef { probability, target });
        }
    }
    Ok(NodeRecord {
        pos,
        state: STATE_LIVE,
        flags,
        chars,
        probability,
        probability_field,
        children,
        children_field,
        bigram_list_field: None,
        bigram_list: None,
        shortcut_list_field: None,
        shortcut_list: None,
        bigrams,
        shortcuts,
        end: r.pos(),
    })
}

fn read_dynamic_node(bytes: &[u8], pos: usize, historical: bool) -> Result<NodeRecord> {
    let format = NodeFormat::Dynamic { historical };
    let mut r = Cursor::new(bytes, pos);
    let state = r.u8()?;
    if state > STATE_MOVED {
        return Err(DictError::Format(format!("unknown node state {state:#x} at {pos}")));
    }
    let flags = r.u8()?;
    let chars = r.label(flags & FLAG_HAS_MULTIPLE_CHARS != 0)?;
    let probability_field = r.pos();
    let probability = format.read_probability(&mut r)?;
    let children_field = r.pos();
    let children = r.address()?;
    let bigram_list_field = r.pos();
    let bigram_list = r.address()?;
    let shortcut_list_field = r.pos();
    let shortcut_list = r.address()?;
    let end = r.pos();

    let mut bigrams = Vec::new();
    let mut shortcuts = Vec::new();
    if state == STATE_LIVE && flags & FLAG_IS_TERMINAL != 0 {
        if let Some(list) = bigram_list {
            bigrams = format.read_bigram_list(bytes, list)?;
        }
        if let Some(list) = shortcut_list {
            shortcuts = read_shortcut_list(&mut Cursor::new(bytes, list))?;
        }
    }
    Ok(NodeRecord {
        pos,
        state,
        flags,
        chars,
        probability,
        probability_field,
        children,
        children_field: Some(children_field),
        bigram_list_field: Some(bigram_list_field),
        bigram_list,
        shortcut_list_field: Some(shortcut_list_field),
        shortcut_list,
        bigrams,
        shortcuts,
        end,
    })
}

/// Result of decoding: the header always, the trie unless only stats were asked for.
#[derive(Debug, Clone)]
pub struct DecodedDictionary {
    pub header: FileHeader,
    pub dictionary: Option<FusionDictionary>,
}

/// Decodes a binary dictionary; with `stats_only` the body is not walked.
pub fn decode(bytes: &[u8], stats_only: bool) -> Result<DecodedDictionary> {
    if stats_only {
        return Ok(DecodedDictionary { header: read_header(bytes)?, dictionary: None });
    }
    let (header, dictionary) = decode_body(bytes)?;
    Ok(DecodedDictionary { header, dictionary: Some(dictionary) })
}

/// Decodes a complete binary dictionary into a trie.
pub fn read_dictionary(bytes: &[u8]) -> Result<FusionDictionary> {
    decode_body(bytes).map(|(_, dict)| dict)
}

fn decode_body(bytes: &[u8]) -> Result<(FileHeader, FusionDictionary)> {
    let header = read_header(bytes)?;
    let layout = NodeFormat::for_header(&header);

    let mut words: Vec<(String, NodeRecord)> = Vec::new();
    let mut word_at: HashMap<usize, usize> = HashMap::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(header.header_size, String::new())];
    while let Some((array_pos, prefix)) = stack.pop() {
        let chain = layout.read_array_chain(bytes, array_pos, &mut visited)?;
        for record in chain.records {
            if !record.is_live() {
                continue;
            }
            let text: String = prefix.chars().chain(record.chars.iter().copied()).collect();
            if let Some(child) = record.children {
                stack.push((child, text.clone()));
            }
            if record.is_terminal() {
                word_at.insert(record.pos, words.len());
                words.push((text, record));
            }
        }
    }

    let mut dict = FusionDictionary::new(header.options.clone());
    for (text, record) in &words {
        dict.insert(text, record.entry(), UpdatePolicy::Overwrite)?;
    }
    for (text, record) in &words {
        for bigram in &record.bigrams {
            let target = layout.resolve_moved(bytes, bigram.target)?;
            match word_at.get(&target) {
                Some(&i) => {
                    dict.set_bigram_with(text, &words[i].0, bigram.probability, UpdatePolicy::Overwrite)?
                }
                None => debug!(source = %text, target, "dropping bigram to a non-word"),
            }
        }
    }
    debug!(
        version = header.version.as_u16(),
        words = words.len(),
        arrays = visited.len(),
        "decoded dictionary"
    );
    Ok((header, dict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::{DictionaryOptions, FormatVersion, LOCALE_KEY};
    use crate::format::encoder::write_dictionary;

    fn sample() -> FusionDictionary {
        let mut options = DictionaryOptions::new();
        options.set(LOCALE_KEY, "en_US");
        let mut d = FusionDictionary::new(options);
        for (w, p) in [("the", 200), ("there", 120), ("then", 90), ("cat", 60), ("café", 30)] {
            d.add(w, ProbabilityInfo::new(p), None, false).unwrap();
        }
        d.add("thx", ProbabilityInfo::new(5), Some(vec![WeightedString::new("thanks", 15)]), true)
            .unwrap();
        d.set_bigram("the", "cat", ProbabilityInfo::new(40)).unwrap();
        d.set_bigram("the", "café", ProbabilityInfo::new(20)).unwrap();
        d.set_bigram("cat", "the", ProbabilityInfo::new(10)).unwrap();
        d.find_word_mut("cat").unwrap().is_possibly_offensive = true;
        d
    }

    fn assert_same_words(a: &FusionDictionary, b: &FusionDictionary) {
        let left: Vec<_> = a.words().collect();
        let right: Vec<_> = b.words().collect();
        assert_eq!(left, right);
    }

    #[test]
    fn static_round_trip() {
        let d = sample();
        let bytes = write_dictionary(&d, FormatOptions::static_v2()).unwrap();
        let back = read_dictionary(&bytes).unwrap();
        assert_same_words(&d, &back);
        assert_eq!(back.options.locale(), Some("en_US"));
        assert!(!back.options.supports_dynamic_update());
    }

    #[test]
    fn dynamic_round_trip() {
        let d = sample();
        let bytes = write_dictionary(&d, FormatOptions::dynamic()).unwrap();
        let back = read_dictionary(&bytes).unwrap();
        assert_same_words(&d, &back);
        assert!(back.options.supports_dynamic_update());
    }

    #[test]
    fn historical_round_trip() {
        let mut d = FusionDictionary::new(DictionaryOptions::new());
        let info = ProbabilityInfo::with_historical(100, HistoricalInfo::new(1_000, 2, 1));
        d.add("hello", info, None, false).unwrap();
        d.add("world", info, None, false).unwrap();
        let bigram = ProbabilityInfo::with_historical(50, HistoricalInfo::new(2_000, 1, 2));
        d.set_bigram("hello", "world", bigram).unwrap();
        let bytes = write_dictionary(&d, FormatOptions::decaying()).unwrap();
        let back = read_dictionary(&bytes).unwrap();
        assert_eq!(back.find_word("hello").unwrap().probability, info);
        assert_eq!(back.find_word("hello").unwrap().bigrams[0].probability, bigram);
        assert!(back.options.uses_forgetting_curve());
    }

    #[test]
    fn stats_only_skips_the_body() {
        let bytes = write_dictionary(&sample(), FormatOptions::dynamic()).unwrap();
        let decoded = decode(&bytes, true).unwrap();
        assert!(decoded.dictionary.is_none());
        assert_eq!(decoded.header.version, FormatVersion::V3);
        assert!(decode(&bytes, false).unwrap().dictionary.is_some());
    }

    #[test]
    fn truncated_body_fails() {
        let bytes = write_dictionary(&sample(), FormatOptions::static_v2()).unwrap();
        let cut = &bytes[..bytes.len() - 4];
        assert!(read_dictionary(cut).unwrap_err().is_format_error());
    }

    #[test]
    fn empty_dictionary_round_trips() {
        let d = FusionDictionary::new(DictionaryOptions::new());
        for format in [FormatOptions::static_v2(), FormatOptions::dynamic(), FormatOptions::decaying()] {
            let bytes = write_dictionary(&d, format).unwrap();
            assert_eq!(read_dictionary(&bytes).unwrap().unigram_count(), 0);
        }
    }
}
