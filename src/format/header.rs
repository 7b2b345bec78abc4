// File: src/format/header.rs
use crate::core::options::{DictionaryOptions, FormatVersion};
use crate::error::{DictError, Result};
use crate::format::layout::{
    ByteWriter, Cursor, FLAG_SUPPORTS_DYNAMIC_UPDATE, HEADER_FIXED_SIZE, MAGIC_NUMBER,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Decoded file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    pub version: FormatVersion,
    pub flags: u16,
    /// Offset of the root node array.
    pub header_size: usize,
    pub options: DictionaryOptions,
}

impl FileHeader {
    pub fn supports_dynamic_update(&self) -> bool {
        self.flags & FLAG_SUPPORTS_DYNAMIC_UPDATE != 0
    }
}

/// Writes the header and returns its size.
pub fn write_header(w: &mut ByteWriter, version: FormatVersion, options: &DictionaryOptions) -> Result<usize> {
    options.validate_for(version)?;
    let start = w.pos();
    w.u32(MAGIC_NUMBER);
    w.u16(version.as_u16());
    w.u16(if version.supports_dynamic_update() { FLAG_SUPPORTS_DYNAMIC_UPDATE } else { 0 });
    let size_field = w.pos();
    w.u32(0);
    let count = u16::try_from(options.attributes.len())
        .map_err(|_| DictError::Format("too many header attributes".to_string()))?;
    w.u16(count);
    for (key, value) in &options.attributes {
        w.len_prefixed_str(key)?;
        w.len_prefixed_str(value)?;
    }
    let size = w.pos() - start;
    w.patch_u32(size_field, size as u32);
    Ok(size)
}

/// Parses and validates the header without touching the node body.
pub fn read_header(bytes: &[u8]) -> Result<FileHeader> {
    let mut r = Cursor::new(bytes, 0);
    let magic = r.u32()?;
    if magic != MAGIC_NUMBER {
        return Err(DictError::BadMagic(magic));
    }
    let version = FormatVersion::from_u16(r.u16()?)?;
    let flags = r.u16()?;
    let header_size = r.u32()? as usize;
    if header_size < HEADER_FIXED_SIZE || header_size > bytes.len() {
        return Err(DictError::Format(format!(
            "header size {header_size} does not fit a {}-byte file",
            bytes.len()
        )));
    }
    if flags & FLAG_SUPPORTS_DYNAMIC_UPDATE != 0 && !version.supports_dynamic_update() {
        return Err(DictError::Format(format!(
            "dynamic update flag on a version {} file",
            version.as_u16()
        )));
    }

    let mut r = Cursor::new(&bytes[..header_size], r.pos());
    let count = r.u16()?;
    let mut attributes = BTreeMap::new();
    for _ in 0..count {
        let key = r.len_prefixed_str()?;
        let value = r.len_prefixed_str()?;
        attributes.insert(key, value);
    }
    let options = DictionaryOptions::from_attributes(attributes);
    options.validate_for(version)?;
    if options.supports_dynamic_update() != (flags & FLAG_SUPPORTS_DYNAMIC_UPDATE != 0) {
        return Err(DictError::Format(
            "dynamic update attribute disagrees with header flags".to_string(),
        ));
    }
    Ok(FileHeader { version, flags, header_size, options })
}

/// Cheap structural check: magic, version and header parse only.
pub fn is_valid_dictionary(bytes: &[u8]) -> bool {
    read_header(bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::{FormatOptions, LOCALE_KEY};

    fn header_bytes(version: FormatVersion, format: FormatOptions) -> Vec<u8> {
        let mut options = DictionaryOptions::new();
        options.set(LOCALE_KEY, "en_US");
        options.apply_format(&format);
        let mut w = ByteWriter::new();
        write_header(&mut w, version, &options).unwrap();
        w.into_bytes()
    }

    #[test]
    fn header_round_trips() {
        let bytes = header_bytes(FormatVersion::V4, FormatOptions::decaying());
        let header = read_header(&bytes).unwrap();
        assert_eq!(header.version, FormatVersion::V4);
        assert_eq!(header.header_size, bytes.len());
        assert!(header.supports_dynamic_update());
        assert_eq!(header.options.locale(), Some("en_US"));
        assert!(header.options.uses_forgetting_curve());
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = header_bytes(FormatVersion::V2, FormatOptions::static_v2());
        assert!(is_valid_dictionary(&bytes));

        let mut bad_version = bytes.clone();
        bad_version[5] = 9;
        assert!(matches!(read_header(&bad_version), Err(DictError::UnsupportedVersion(9))));

        bytes[0] = 0;
        assert!(matches!(read_header(&bytes), Err(DictError::BadMagic(_))));
        assert!(!is_valid_dictionary(&[]));
    }

    #[test]
    fn rejects_truncated_attributes() {
        let bytes = header_bytes(FormatVersion::V3, FormatOptions::dynamic());
        let cut = &bytes[..bytes.len() - 2];
        assert!(read_header(cut).unwrap_err().is_format_error());
    }
}
