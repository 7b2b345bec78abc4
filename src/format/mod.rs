// File: src/format/mod.rs
//! Binary and text codecs, and sniffing between them.

pub mod combined;
pub mod decoder;
pub mod encoder;
pub mod header;
pub mod layout;
pub mod updater;
pub mod xml;

pub use combined::{read_combined, write_combined};
pub use decoder::{decode, read_dictionary, DecodedDictionary, NodeFormat};
pub use encoder::write_dictionary;
pub use header::{is_valid_dictionary, read_header, FileHeader};
pub use updater::DynamicUpdater;
pub use xml::{read_xml, write_xml};

use crate::core::options::FormatOptions;
use crate::core::trie::FusionDictionary;
use crate::error::{DictError, Result};
use crate::persistence::write_atomic;
use std::path::Path;
use tracing::debug;

/// zstd frame magic as it appears on disk.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Encodings a dictionary file may arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Binary,
    Compressed,
    Combined,
    Xml,
}

/// Target encoding for [`write_dictionary_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Binary(FormatOptions),
    Combined,
    Xml,
}

/// Identifies the encoding from the leading bytes, or for text from the
/// first line that is neither blank nor a comment.
pub fn sniff(bytes: &[u8]) -> Option<InputFormat> {
    if bytes.starts_with(&layout::MAGIC_NUMBER.to_be_bytes()) {
        return Some(InputFormat::Binary);
    }
    if bytes.starts_with(&ZSTD_MAGIC) {
        return Some(InputFormat::Compressed);
    }
    let text = std::str::from_utf8(bytes).ok()?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with("<?xml") || line.starts_with("<!--") {
            continue;
        }
        if combined::looks_like_combined(line) {
            return Some(InputFormat::Combined);
        }
        if xml::looks_like_xml(line) {
            return Some(InputFormat::Xml);
        }
        return None;
    }
    None
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| DictError::Format(format!("text dictionary is not UTF-8: {e}")))
}

/// Decodes a dictionary in any supported encoding.
pub fn read_dictionary_bytes(bytes: &[u8]) -> Result<FusionDictionary> {
    let format = sniff(bytes).ok_or_else(|| DictError::Format("unrecognised dictionary format".to_string()))?;
    debug!(?format, bytes = bytes.len(), "reading dictionary");
    match format {
        InputFormat::Binary => read_dictionary(bytes),
        InputFormat::Combined => read_combined(utf8(bytes)?),
        InputFormat::Xml => read_xml(utf8(bytes)?),
        InputFormat::Compressed => {
            let raw = zstd::stream::decode_all(bytes)?;
            if sniff(&raw) == Some(InputFormat::Compressed) {
                return Err(DictError::Format("nested compression".to_string()));
            }
            read_dictionary_bytes(&raw)
        }
    }
}

pub fn read_dictionary_file(path: &Path) -> Result<FusionDictionary> {
    read_dictionary_bytes(&std::fs::read(path)?)
}

pub fn encode_as(dict: &FusionDictionary, format: OutputFormat) -> Result<Vec<u8>> {
    Ok(match format {
        OutputFormat::Binary(options) => write_dictionary(dict, options)?,
        OutputFormat::Combined => write_combined(dict)?.into_bytes(),
        OutputFormat::Xml => write_xml(dict).into_bytes(),
    })
}

/// Encodes `dict` and atomically replaces `path` with the result.
pub fn write_dictionary_file(dict: &FusionDictionary, path: &Path, format: OutputFormat) -> Result<()> {
    write_atomic(path, &encode_as(dict, format)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::DictionaryOptions;
    use crate::core::types::ProbabilityInfo;

    fn sample() -> FusionDictionary {
        let mut d = FusionDictionary::new(DictionaryOptions::new());
        d.add("alpha", ProbabilityInfo::new(10), None, false).unwrap();
        d.add("beta", ProbabilityInfo::new(20), None, false).unwrap();
        d
    }

    #[test]
    fn sniffs_every_encoding() {
        let d = sample();
        let binary = write_dictionary(&d, FormatOptions::static_v2()).unwrap();
        assert_eq!(sniff(&binary), Some(InputFormat::Binary));
        let packed = zstd::stream::encode_all(binary.as_slice(), 3).unwrap();
        assert_eq!(sniff(&packed), Some(InputFormat::Compressed));
        assert_eq!(sniff(b"# c\n\ndictionary=x\n"), Some(InputFormat::Combined));
        assert_eq!(sniff(b"<?xml version=\"1.0\"?>\n<!-- c -->\n<wordlist>"), Some(InputFormat::Xml));
        assert_eq!(sniff(b"hello world"), None);
        assert_eq!(sniff(&[0xff, 0xfe, 0x00]), None);
    }

    #[test]
    fn reads_compressed_binary() {
        let d = sample();
        let binary = write_dictionary(&d, FormatOptions::dynamic()).unwrap();
        let packed = zstd::stream::encode_all(binary.as_slice(), 3).unwrap();
        let back = read_dictionary_bytes(&packed).unwrap();
        assert_eq!(back.words().collect::<Vec<_>>(), d.words().collect::<Vec<_>>());
    }

    #[test]
    fn file_round_trip_in_each_output_format() {
        let dir = tempfile::tempdir().unwrap();
        let d = sample();
        for (name, format) in [
            ("d.bin", OutputFormat::Binary(FormatOptions::dynamic())),
            ("d.combined", OutputFormat::Combined),
            ("d.xml", OutputFormat::Xml),
        ] {
            let path = dir.path().join(name);
            write_dictionary_file(&d, &path, format).unwrap();
            let back = read_dictionary_file(&path).unwrap();
            assert_eq!(back.words().collect::<Vec<_>>(), d.words().collect::<Vec<_>>(), "{name}");
        }
    }
}
