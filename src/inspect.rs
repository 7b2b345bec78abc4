// File: src/inspect.rs
//! Summary statistics for `dicttool info` and `dicttool header`.

use crate::core::trie::FusionDictionary;
use crate::error::{DictError, Result};
use crate::format::{decode, read_dictionary_bytes, sniff, FileHeader, InputFormat};
use serde::Serialize;
use std::collections::BTreeMap;

/// Counts over the words of a dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DictionaryStats {
    pub unigrams: usize,
    pub bigrams: usize,
    pub shortcuts: usize,
    pub nodes: usize,
    pub not_a_words: usize,
    pub possibly_offensive: usize,
    pub with_historical_info: usize,
    pub max_probability: Option<u8>,
    pub min_probability: Option<u8>,
}

impl DictionaryStats {
    pub fn of(dict: &FusionDictionary) -> Self {
        let mut stats = DictionaryStats { nodes: dict.node_count(), ..Default::default() };
        for word in dict.words() {
            let entry = &word.entry;
            let p = entry.probability.probability;
            stats.unigrams += 1;
            stats.bigrams += entry.bigrams.len();
            stats.shortcuts += entry.shortcuts.len();
            stats.not_a_words += usize::from(entry.is_not_a_word);
            stats.possibly_offensive += usize::from(entry.is_possibly_offensive);
            stats.with_historical_info += usize::from(entry.probability.historical.is_some());
            stats.max_probability = Some(stats.max_probability.map_or(p, |m| m.max(p)));
            stats.min_probability = Some(stats.min_probability.map_or(p, |m| m.min(p)));
        }
        stats
    }
}

/// Everything `info` reports about one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub encoding: &'static str,
    pub file_size: usize,
    /// Only for binary files.
    pub header: Option<FileHeader>,
    pub attributes: BTreeMap<String, String>,
    pub stats: DictionaryStats,
}

fn encoding_name(format: InputFormat) -> &'static str {
    match format {
        InputFormat::Binary => "binary",
        InputFormat::Compressed => "zstd",
        InputFormat::Combined => "combined",
        InputFormat::Xml => "xml",
    }
}

/// Decodes `bytes` in whatever encoding they are and summarises them.
pub fn inspect_bytes(bytes: &[u8]) -> Result<FileInfo> {
    let format = sniff(bytes).ok_or_else(|| DictError::Format("unrecognised dictionary format".to_string()))?;
    let (header, dict) = match format {
        InputFormat::Binary => {
            let decoded = decode(bytes, false)?;
            let dict = decoded
                .dictionary
                .ok_or_else(|| DictError::Format("dictionary body missing".to_string()))?;
            (Some(decoded.header), dict)
        }
        _ => (None, read_dictionary_bytes(bytes)?),
    };
    Ok(FileInfo {
        encoding: encoding_name(format),
        file_size: bytes.len(),
        header,
        attributes: dict.options.attributes.clone(),
        stats: DictionaryStats::of(&dict),
    })
}

/// Header of a binary file without decoding the body.
pub fn inspect_header(bytes: &[u8]) -> Result<FileHeader> {
    Ok(decode(bytes, true)?.header)
}
