// File: src/format/updater.rs
//! In-place updates of dynamic (v3/v4) dictionary buffers.
//!
//! Nothing already written is moved: new nodes, arrays and lists are
//! appended to the end of the buffer and a single existing field (a forward
//! link, a children address, a list address, flags or the probability) is
//! patched to reach them.

use crate::core::types::{HistoricalInfo, ProbabilityInfo};
use crate::error::{DictError, Result};
use crate::format::decoder::{BigramRef, NodeFormat, NodeRecord};
use crate::format::encoder::{write_probability, write_raw_dynamic_node};
use crate::format::header::{read_header, FileHeader};
use crate::format::layout::*;
use std::collections::HashSet;
use tracing::debug;

/// Outcome of walking a word through the buffer.
enum Walk {
    /// The word ends exactly at this node (which may not be terminal yet).
    Found { node: NodeRecord, tail_link: usize },
    /// No sibling in the chain starts with the next code point.
    Missing { tail_link: usize, consumed: usize },
    /// The node matched fully but has no children to continue into.
    NoChildren { node: NodeRecord, consumed: usize },
    /// The node's label and the word diverge after `common` code points.
    Diverged { node: NodeRecord, tail_link: usize, consumed: usize, common: usize },
}

/// Log-structured updater over a dynamic dictionary buffer.
pub struct DynamicUpdater {
    w: ByteWriter,
    header: FileHeader,
    layout: NodeFormat,
}

impl DynamicUpdater {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        let header = read_header(&bytes)?;
        let layout = NodeFormat::for_header(&header);
        if !layout.is_dynamic() {
            return Err(DictError::StaticDictionary);
        }
        Ok(Self { w: ByteWriter::from_bytes(bytes), header, layout })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.w.as_bytes()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.w.into_bytes()
    }

    fn historical(&self) -> bool {
        matches!(self.layout, NodeFormat::Dynamic { historical: true })
    }

    fn walk(&self, chars: &[char]) -> Result<Walk> {
        let bytes = self.w.as_bytes();
        let mut array = self.header.header_size;
        let mut consumed = 0;
        loop {
            let chain = self.layout.read_array_chain(bytes, array, &mut HashSet::new())?;
            let tail_link = chain
                .tail_link
                .ok_or_else(|| DictError::Format(format!("array at {array} has no forward link")))?;
            let rest = &chars[consumed..];
            let Some(node) = chain
                .records
                .into_iter()
                .find(|r| r.is_live() && r.chars[0] == rest[0])
            else {
                return Ok(Walk::Missing { tail_link, consumed });
            };
            let common = node.chars.iter().zip(rest).take_while(|(a, b)| a == b).count();
            if common < node.chars.len() {
                return Ok(Walk::Diverged { node, tail_link, consumed, common });
            }
            consumed += common;
            if consumed == chars.len() {
                return Ok(Walk::Found { node, tail_link });
            }
            match node.children {
                Some(child) => array = child,
                None => return Ok(Walk::NoChildren { node, consumed }),
            }
        }
    }

    fn chars_of(word: &str) -> Result<Vec<char>> {
        let chars: Vec<char> = word.chars().collect();
        if chars.is_empty() {
            return Err(DictError::EmptyWord);
        }
        Ok(chars)
    }

    /// Position of the live terminal node for `word`, if any.
    pub fn find_terminal(&self, word: &str) -> Result<Option<NodeRecord>> {
        match self.walk(&Self::chars_of(word)?)? {
            Walk::Found { node, .. } if node.is_terminal() => Ok(Some(node)),
            _ => Ok(None),
        }
    }

    /// Adds `word`, or overwrites its probability and flags if it exists.
    pub fn insert_word(&mut self, word: &str, probability: ProbabilityInfo, is_not_a_word: bool) -> Result<()> {
        let chars = Self::chars_of(word)?;
        let mut flags = FLAG_IS_TERMINAL;
        if is_not_a_word {
            flags |= FLAG_IS_NOT_A_WORD;
        }
        match self.walk(&chars)? {
            Walk::Found { node, .. } => {
                let kept = node.flags & (FLAG_HAS_MULTIPLE_CHARS | FLAG_IS_POSSIBLY_OFFENSIVE);
                self.w.patch_u8(node.pos + 1, kept | flags);
                self.patch_probability(node.probability_field, probability);
            }
            Walk::Missing { tail_link, consumed } => {
                let array = self.append_leaf_array(&chars[consumed..], flags, probability)?;
                self.w.patch_address(tail_link, Some(array))?;
            }
            Walk::NoChildren { node, consumed } => {
                let array = self.append_leaf_array(&chars[consumed..], flags, probability)?;
                let field = node
                    .children_field
                    .ok_or_else(|| DictError::Format("dynamic node without children field".into()))?;
                self.w.patch_address(field, Some(array))?;
            }
            Walk::Diverged { node, tail_link, consumed, common } => {
                self.split(&node, tail_link, &chars[consumed..], common, flags, probability)?;
            }
        }
        debug!(word, end = self.w.pos(), "inserted word in place");
        Ok(())
    }

    /// Overwrites the probability of an existing word. Returns false when absent.
    pub fn update_probability(&mut self, word: &str, probability: ProbabilityInfo) -> Result<bool> {
        let Some(node) = self.find_terminal(word)? else {
            return Ok(false);
        };
        self.patch_probability(node.probability_field, probability);
        Ok(true)
    }

    /// Removes `word` by marking its node deleted, so bigrams pointing at it
    /// stop resolving. A node with children is first replaced by a bare
    /// non-terminal copy chained after its array, which keeps the children
    /// reachable.
    pub fn delete_word(&mut self, word: &str) -> Result<bool> {
        let (node, tail_link) = match self.walk(&Self::chars_of(word)?)? {
            Walk::Found { node, tail_link } if node.is_terminal() => (node, tail_link),
            _ => return Ok(false),
        };
        if node.children.is_some() {
            let array = self.w.pos();
            self.w.array_count(1)?;
            let flags = node.flags & !(FLAG_IS_TERMINAL | FLAG_IS_NOT_A_WORD | FLAG_IS_POSSIBLY_OFFENSIVE);
            self.write_node(flags, &node.chars, ProbabilityInfo::default(), node.children, None, None)?;
            self.w.address(None)?;
            self.w.patch_address(tail_link, Some(array))?;
        }
        self.w.patch_u8(node.pos, STATE_DELETED);
        Ok(true)
    }

    /// Adds or replaces the bigram `word1 -> word2`; both words must exist.
    pub fn set_bigram(&mut self, word1: &str, word2: &str, probability: ProbabilityInfo) -> Result<()> {
        let source = self
            .find_terminal(word1)?
            .ok_or_else(|| DictError::NoSuchWord(word1.to_string()))?;
        let target = self
            .find_terminal(word2)?
            .ok_or_else(|| DictError::NoSuchWord(word2.to_string()))?;
        let mut entries = self.resolved_bigrams(&source)?;
        entries.retain(|b| b.target != target.pos);
        entries.push(BigramRef { probability, target: target.pos });
        entries.sort_by(|a, b| b.probability.probability.cmp(&a.probability.probability));
        self.rewrite_bigram_list(&source, &entries)
    }

    /// Removes the bigram `word1 -> word2`. Returns false when it was not there.
    pub fn remove_bigram(&mut self, word1: &str, word2: &str) -> Result<bool> {
        let (Some(source), Some(target)) = (self.find_terminal(word1)?, self.find_terminal(word2)?) else {
            return Ok(false);
        };
        let mut entries = self.resolved_bigrams(&source)?;
        let before = entries.len();
        entries.retain(|b| b.target != target.pos);
        if entries.len() == before {
            return Ok(false);
        }
        self.rewrite_bigram_list(&source, &entries)?;
        Ok(true)
    }

    fn resolved_bigrams(&self, source: &NodeRecord) -> Result<Vec<BigramRef>> {
        source
            .bigrams
            .iter()
            .map(|b| {
                let target = self.layout.resolve_moved(self.w.as_bytes(), b.target)?;
                Ok(BigramRef { probability: b.probability, target })
            })
            .collect()
    }

    fn rewrite_bigram_list(&mut self, source: &NodeRecord, entries: &[BigramRef]) -> Result<()> {
        let field = source
            .bigram_list_field
            .ok_or_else(|| DictError::Format("dynamic node without bigram field".into()))?;
        if entries.is_empty() {
            return self.w.patch_address(field, None);
        }
        let historical = self.historical();
        let list = self.w.pos();
        self.w.list_count(entries.len())?;
        for entry in entries {
            write_probability(&mut self.w, entry.probability, historical);
            self.w.address(Some(entry.target))?;
        }
        self.w.patch_address(field, Some(list))
    }

    fn patch_probability(&mut self, field: usize, probability: ProbabilityInfo) {
        self.w.patch_u8(field, probability.probability);
        if self.historical() {
            let h = probability.historical.unwrap_or(HistoricalInfo::new(0, 0, 0));
            self.w.patch_u32(field + 1, h.timestamp);
            self.w.patch_u8(field + 5, h.level);
            self.w.patch_u8(field + 6, h.count);
        }
    }

    fn label_flags(chars: &[char]) -> u8 {
        if chars.len() > 1 {
            FLAG_HAS_MULTIPLE_CHARS
        } else {
            0
        }
    }

    /// Writes a complete dynamic node and returns its position.
    fn write_node(
        &mut self,
        flags: u8,
        chars: &[char],
        probability: ProbabilityInfo,
        children: Option<usize>,
        bigrams: Option<usize>,
        shortcuts: Option<usize>,
    ) -> Result<usize> {
        let pos = self.w.pos();
        let historical = self.historical();
        let flags = (flags & !FLAG_HAS_MULTIPLE_CHARS) | Self::label_flags(chars);
        write_raw_dynamic_node(&mut self.w, STATE_LIVE, flags, chars, probability, historical)?;
        self.w.address(children)?;
        self.w.address(bigrams)?;
        self.w.address(shortcuts)?;
        Ok(pos)
    }

    fn append_leaf_array(&mut self, chars: &[char], flags: u8, probability: ProbabilityInfo) -> Result<usize> {
        let array = self.w.pos();
        self.w.array_count(1)?;
        self.write_node(flags, chars, probability, None, None, None)?;
        self.w.address(None)?;
        Ok(array)
    }

    /// Replaces `node` by a head node holding the shared prefix, whose
    /// children are the old remainder and, if the word continues, a new leaf.
    /// The old node is marked moved and forwards to the remainder node.
    fn split(
        &mut self,
        node: &NodeRecord,
        tail_link: usize,
        rest: &[char],
        common: usize,
        flags: u8,
        probability: ProbabilityInfo,
    ) -> Result<()> {
        let head_chars = &node.chars[..common];
        let tail_chars = &node.chars[common..];
        let word_ends_here = rest.len() == common;

        let head_array = self.w.pos();
        self.w.array_count(1)?;
        let (head_flags, head_probability) = if word_ends_here {
            (flags, probability)
        } else {
            (0, ProbabilityInfo::default())
        };
        let head = self.write_node(head_flags, head_chars, head_probability, None, None, None)?;
        self.w.address(None)?;

        let children_array = self.w.pos();
        let leaf = (!word_ends_here).then(|| &rest[common..]);
        self.w.array_count(if leaf.is_some() { 2 } else { 1 })?;
        let leaf_first = leaf.is_some_and(|l| l[0] < tail_chars[0]);
        if let (true, Some(leaf)) = (leaf_first, leaf) {
            self.write_node(flags, leaf, probability, None, None, None)?;
        }
        let tail = self.write_node(
            node.flags,
            tail_chars,
            node.probability,
            node.children,
            node.bigram_list,
            node.shortcut_list,
        )?;
        if let (false, Some(leaf)) = (leaf_first, leaf) {
            self.write_node(flags, leaf, probability, None, None, None)?;
        }
        self.w.address(None)?;

        let head_record = self.layout.read_node(self.w.as_bytes(), head)?;
        let head_children = head_record
            .children_field
            .ok_or_else(|| DictError::Format("dynamic node without children field".into()))?;
        self.w.patch_address(head_children, Some(children_array))?;

        let forward = node
            .children_field
            .ok_or_else(|| DictError::Format("dynamic node without children field".into()))?;
        self.w.patch_u8(node.pos, STATE_MOVED);
        self.w.patch_address(forward, Some(tail))?;
        self.w.patch_address(tail_link, Some(head_array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::{DictionaryOptions, FormatOptions};
    use crate::core::trie::FusionDictionary;
    use crate::format::decoder::read_dictionary;
    use crate::format::encoder::write_dictionary;

    fn encoded(words: &[(&str, u8)], format: FormatOptions) -> Vec<u8> {
        let mut d = FusionDictionary::new(DictionaryOptions::new());
        for (w, p) in words {
            d.add(w, ProbabilityInfo::new(*p), None, false).unwrap();
        }
        write_dictionary(&d, format).unwrap()
    }

    fn probability(bytes: &[u8], word: &str) -> Option<u8> {
        read_dictionary(bytes).unwrap().find_word(word).map(|e| e.probability.probability)
    }

    #[test]
    fn static_buffers_are_refused() {
        let bytes = encoded(&[("a", 1)], FormatOptions::static_v2());
        assert!(matches!(DynamicUpdater::new(bytes), Err(DictError::StaticDictionary)));
    }

    #[test]
    fn inserts_into_empty_dictionary() {
        let mut u = DynamicUpdater::new(encoded(&[], FormatOptions::dynamic())).unwrap();
        u.insert_word("hello", ProbabilityInfo::new(90), false).unwrap();
        u.insert_word("world", ProbabilityInfo::new(80), false).unwrap();
        let bytes = u.into_bytes();
        assert_eq!(probability(&bytes, "hello"), Some(90));
        assert_eq!(probability(&bytes, "world"), Some(80));
    }

    #[test]
    fn insert_extends_and_splits_existing_nodes() {
        let original = encoded(&[("hello", 100), ("abc", 10)], FormatOptions::dynamic());
        let original_len = original.len();
        let mut u = DynamicUpdater::new(original).unwrap();
        u.insert_word("hellos", ProbabilityInfo::new(20), false).unwrap();
        u.insert_word("help", ProbabilityInfo::new(30), false).unwrap();
        u.insert_word("he", ProbabilityInfo::new(40), false).unwrap();
        u.insert_word("ab", ProbabilityInfo::new(50), false).unwrap();
        let bytes = u.into_bytes();
        assert!(bytes.len() > original_len);

        let d = read_dictionary(&bytes).unwrap();
        let words: Vec<(String, u8)> = d.words().map(|w| (w.text.clone(), w.probability())).collect();
        assert_eq!(
            words,
            vec![
                ("ab".to_string(), 50),
                ("abc".to_string(), 10),
                ("he".to_string(), 40),
                ("hello".to_string(), 100),
                ("hellos".to_string(), 20),
                ("help".to_string(), 30),
            ]
        );
    }

    #[test]
    fn existing_word_is_overwritten_in_place() {
        let original = encoded(&[("word", 100)], FormatOptions::dynamic());
        let len = original.len();
        let mut u = DynamicUpdater::new(original).unwrap();
        u.insert_word("word", ProbabilityInfo::new(7), false).unwrap();
        assert!(u.update_probability("word", ProbabilityInfo::new(9)).unwrap());
        assert!(!u.update_probability("missing", ProbabilityInfo::new(9)).unwrap());
        let bytes = u.into_bytes();
        assert_eq!(bytes.len(), len);
        assert_eq!(probability(&bytes, "word"), Some(9));
    }

    #[test]
    fn delete_word_handles_leaves_and_inner_nodes() {
        let mut u =
            DynamicUpdater::new(encoded(&[("car", 10), ("cart", 20)], FormatOptions::dynamic()))
                .unwrap();
        assert!(u.delete_word("car").unwrap());
        assert!(u.delete_word("cart").unwrap());
        assert!(!u.delete_word("cart").unwrap());
        let d = read_dictionary(u.as_bytes()).unwrap();
        assert_eq!(d.unigram_count(), 0);
    }

    #[test]
    fn reinserted_inner_word_starts_without_bigrams() {
        let mut d = FusionDictionary::new(DictionaryOptions::new());
        for (w, p) in [("car", 10), ("cart", 20), ("a", 30)] {
            d.add(w, ProbabilityInfo::new(p), None, false).unwrap();
        }
        d.set_bigram("a", "car", ProbabilityInfo::new(7)).unwrap();
        d.set_bigram("car", "a", ProbabilityInfo::new(9)).unwrap();
        let mut u = DynamicUpdater::new(write_dictionary(&d, FormatOptions::dynamic()).unwrap()).unwrap();

        assert!(u.delete_word("car").unwrap());
        let back = read_dictionary(u.as_bytes()).unwrap();
        assert!(!back.has_word("car"));
        assert!(back.has_word("cart"));
        assert!(back.find_word("a").unwrap().bigram("car").is_none());

        u.insert_word("car", ProbabilityInfo::new(50), false).unwrap();
        let back = read_dictionary(u.as_bytes()).unwrap();
        let car = back.find_word("car").unwrap();
        assert_eq!(car.probability.probability, 50);
        assert!(car.bigrams.is_empty());
        assert!(back.find_word("a").unwrap().bigram("car").is_none());
        assert_eq!(back.find_word("cart").map(|e| e.probability.probability), Some(20));

        assert!(u.delete_word("car").unwrap());
        assert!(u.delete_word("cart").unwrap());
        let back = read_dictionary(u.as_bytes()).unwrap();
        assert_eq!(back.words().map(|w| w.text).collect::<Vec<_>>(), vec!["a".to_string()]);
    }

    #[test]
    fn bigrams_survive_target_relocation() {
        let mut d = FusionDictionary::new(DictionaryOptions::new());
        d.add("hello", ProbabilityInfo::new(100), None, false).unwrap();
        d.add("world", ProbabilityInfo::new(100), None, false).unwrap();
        d.set_bigram("world", "hello", ProbabilityInfo::new(60)).unwrap();
        let mut u = DynamicUpdater::new(write_dictionary(&d, FormatOptions::decaying()).unwrap())
            .unwrap();
        // Splits "hello", which moves the bigram target.
        u.insert_word("hel", ProbabilityInfo::new(5), false).unwrap();
        let back = read_dictionary(u.as_bytes()).unwrap();
        let bigram = back.find_word("world").unwrap().bigram("hello").unwrap();
        assert_eq!(bigram.probability(), 60);
        assert!(back.has_word("hel"));
    }

    #[test]
    fn set_and_remove_bigrams() {
        let mut u = DynamicUpdater::new(encoded(&[("a", 1), ("b", 2), ("c", 3)], FormatOptions::dynamic()))
            .unwrap();
        u.set_bigram("a", "b", ProbabilityInfo::new(10)).unwrap();
        u.set_bigram("a", "c", ProbabilityInfo::new(30)).unwrap();
        u.set_bigram("a", "b", ProbabilityInfo::new(40)).unwrap();
        assert!(matches!(
            u.set_bigram("zz", "a", ProbabilityInfo::new(1)),
            Err(DictError::NoSuchWord(_))
        ));
        let d = read_dictionary(u.as_bytes()).unwrap();
        let order: Vec<(String, u8)> = d
            .find_word("a")
            .unwrap()
            .bigrams
            .iter()
            .map(|b| (b.word.clone(), b.probability()))
            .collect();
        assert_eq!(order, vec![("b".to_string(), 40), ("c".to_string(), 30)]);

        assert!(u.remove_bigram("a", "b").unwrap());
        assert!(!u.remove_bigram("a", "b").unwrap());
        assert!(u.remove_bigram("a", "c").unwrap());
        let d = read_dictionary(u.as_bytes()).unwrap();
        assert_eq!(d.bigram_count(), 0);
    }
}
