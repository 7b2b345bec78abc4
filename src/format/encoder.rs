// File: src/format/encoder.rs
use crate::core::options::FormatOptions;
use crate::core::trie::{ArrayId, FusionDictionary, PtNode, ROOT};
use crate::core::types::{HistoricalInfo, ProbabilityInfo, WeightedString, WordEntry};
use crate::error::{DictError, Result};
use crate::format::decoder::NodeFormat;
use crate::format::header::write_header;
use crate::format::layout::*;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Address fields that can only be filled once their target has been placed.
#[derive(Default)]
struct Fixups {
    /// (field, target word) for bigram entries.
    bigram_targets: Vec<(usize, String)>,
    /// Terminal node position per word.
    terminals: HashMap<String, usize>,
}

/// Serializes `dict` in the variant chosen by `format`.
///
/// Node arrays are laid out breadth first; child and bigram addresses are
/// written as placeholders and patched once their targets are known.
pub fn write_dictionary(dict: &FusionDictionary, format: FormatOptions) -> Result<Vec<u8>> {
    let mut options = dict.options.clone();
    options.apply_format(&format);
    let layout = NodeFormat::for_format(format);

    let mut w = ByteWriter::new();
    let header_size = write_header(&mut w, format.version, &options)?;
    let mut fixups = Fixups::default();
    let mut queue: VecDeque<(ArrayId, Option<usize>, String)> = VecDeque::new();
    queue.push_back((ROOT, None, String::new()));

    while let Some((array, parent_field, prefix)) = queue.pop_front() {
        let array_pos = w.pos();
        if let Some(field) = parent_field {
            w.patch_address(field, Some(array_pos))?;
        }
        let nodes = &dict.array(array).nodes;
        w.array_count(nodes.len())?;
        let mut deferred_lists = Vec::new();
        for node in nodes {
            let text: String = prefix.chars().chain(node.chars.iter().copied()).collect();
            let has_children = node.children.is_some_and(|c| !dict.array(c).nodes.is_empty());
            if node.terminal.is_some() {
                fixups.terminals.insert(text.clone(), w.pos());
            }
            let fields = match layout {
                NodeFormat::Static => write_static_node(&mut w, node, has_children, &mut fixups)?,
                NodeFormat::Dynamic { historical } => {
                    let fields = write_dynamic_node(&mut w, node, has_children, historical)?;
                    if let Some(entry) = &node.terminal {
                        deferred_lists.push((fields.bigrams, fields.shortcuts, entry));
                    }
                    fields
                }
            };
            if has_children {
                if let (Some(child), Some(field)) = (node.children, fields.children) {
                    queue.push_back((child, Some(field), text));
                }
            }
        }
        if let NodeFormat::Dynamic { historical } = layout {
            w.address(None)?;
            for (bigram_field, shortcut_field, entry) in deferred_lists {
                write_dynamic_lists(&mut w, entry, bigram_field, shortcut_field, historical, &mut fixups)?;
            }
        }
    }

    for (field, target) in &fixups.bigram_targets {
        let pos = fixups
            .terminals
            .get(target)
            .ok_or_else(|| DictError::NoSuchWord(target.clone()))?;
        w.patch_address(*field, Some(*pos))?;
    }

    debug!(
        version = format.version.as_u16(),
        header_size,
        bytes = w.pos(),
        words = fixups.terminals.len(),
        "encoded dictionary"
    );
    Ok(w.into_bytes())
}

/// Positions of the address fields a freshly written node carries.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct NodeFields {
    pub children: Option<usize>,
    pub bigrams: Option<usize>,
    pub shortcuts: Option<usize>,
}

fn base_flags(node: &PtNode) -> u8 {
    let mut flags = 0;
    if node.chars.len() > 1 {
        flags |= FLAG_HAS_MULTIPLE_CHARS;
    }
    if let Some(entry) = &node.terminal {
        flags |= entry_flags(entry);
    }
    flags
}

pub(crate) fn entry_flags(entry: &WordEntry) -> u8 {
    let mut flags = FLAG_IS_TERMINAL;
    if entry.is_not_a_word {
        flags |= FLAG_IS_NOT_A_WORD;
    }
    if entry.is_possibly_offensive {
        flags |= FLAG_IS_POSSIBLY_OFFENSIVE;
    }
    flags
}

fn write_static_node(
    w: &mut ByteWriter,
    node: &PtNode,
    has_children: bool,
    fixups: &mut Fixups,
) -> Result<NodeFields> {
    let entry = node.terminal.as_ref();
    let mut flags = base_flags(node);
    if has_children {
        flags |= FLAG_HAS_CHILDREN;
    }
    if entry.is_some_and(|e| !e.bigrams.is_empty()) {
        flags |= FLAG_HAS_BIGRAMS;
    }
    if entry.is_some_and(|e| !e.shortcuts.is_empty()) {
        flags |= FLAG_HAS_SHORTCUTS;
    }
    w.u8(flags);
    w.label(&node.chars);
    if let Some(entry) = entry {
        w.u8(entry.probability.probability);
    }
    let mut fields = NodeFields::default();
    if has_children {
        fields.children = Some(w.address(None)?);
    }
    if let Some(entry) = entry {
        if !entry.shortcuts.is_empty() {
            write_shortcut_list(w, &entry.shortcuts)?;
        }
        if !entry.bigrams.is_empty() {
            w.list_count(entry.bigrams.len())?;
            for bigram in &entry.bigrams {
                w.u8(bigram.probability());
                let field = w.address(None)?;
                fixups.bigram_targets.push((field, bigram.word.clone()));
            }
        }
    }
    Ok(fields)
}

fn write_dynamic_node(
    w: &mut ByteWriter,
    node: &PtNode,
    has_children: bool,
    historical: bool,
) -> Result<NodeFields> {
    let probability = node.terminal.as_ref().map(|e| e.probability).unwrap_or_default();
    write_raw_dynamic_node(w, STATE_LIVE, base_flags(node), &node.chars, probability, historical)?;
    let children = w.address(None)?;
    let bigrams = w.address(None)?;
    let shortcuts = w.address(None)?;
    Ok(NodeFields {
        children: has_children.then_some(children),
        bigrams: Some(bigrams),
        shortcuts: Some(shortcuts),
    })
}

/// Writes the fixed head of a dynamic node up to, not including, its address fields.
pub(crate) fn write_raw_dynamic_node(
    w: &mut ByteWriter,
    state: u8,
    flags: u8,
    chars: &[char],
    probability: ProbabilityInfo,
    historical: bool,
) -> Result<()> {
    if chars.is_empty() {
        return Err(DictError::EmptyWord);
    }
    w.u8(state);
    w.u8(flags);
    w.label(chars);
    write_probability(w, probability, historical);
    Ok(())
}

pub(crate) fn write_probability(w: &mut ByteWriter, probability: ProbabilityInfo, historical: bool) {
    w.u8(probability.probability);
    if historical {
        let h = probability.historical.unwrap_or(HistoricalInfo::new(0, 0, 0));
        w.historical(h.timestamp, h.level, h.count);
    }
}

fn write_dynamic_lists(
    w: &mut ByteWriter,
    entry: &WordEntry,
    bigram_field: Option<usize>,
    shortcut_field: Option<usize>,
    historical: bool,
    fixups: &mut Fixups,
) -> Result<()> {
    if let (Some(field), false) = (bigram_field, entry.bigrams.is_empty()) {
        let list_pos = w.pos();
        w.patch_address(field, Some(list_pos))?;
        w.list_count(entry.bigrams.len())?;
        for bigram in &entry.bigrams {
            write_probability(w, bigram.probability, historical);
            let target = w.address(None)?;
            fixups.bigram_targets.push((target, bigram.word.clone()));
        }
    }
    if let (Some(field), false) = (shortcut_field, entry.shortcuts.is_empty()) {
        let list_pos = w.pos();
        w.patch_address(field, Some(list_pos))?;
        write_shortcut_list(w, &entry.shortcuts)?;
    }
    Ok(())
}

pub(crate) fn write_shortcut_list(w: &mut ByteWriter, shortcuts: &[WeightedString]) -> Result<()> {
    w.list_count(shortcuts.len())?;
    for shortcut in shortcuts {
        w.u8(shortcut.probability());
        w.terminated_chars(shortcut.word.chars());
    }
    Ok(())
}
