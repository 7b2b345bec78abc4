//! Byte-level layout of binary dictionaries and the primitive readers/writers.
//!
//! ```text
//! header   magic u32 | version u16 | flags u16 | header size u32 |
//!          attribute count u16 | (u16 len, key, u16 len, value)*
//! array    node count (1 or 2 bytes) | node* | [forward link (dynamic)]
//! static   flags | label | [probability] | [children] | [shortcuts] | [bigrams]
//! dynamic  state | flags | label | probability | [timestamp u32, level, count] |
//!          children | bigram list | shortcut list
//! ```
//!
//! Every address is a signed 24-bit distance from the field that holds it;
//! zero means "none". All integers are big-endian.

use crate::error::{DictError, Result};

pub const MAGIC_NUMBER: u32 = 0x9BC1_3AFE;

/// Header flag: the file may be patched in place.
pub const FLAG_SUPPORTS_DYNAMIC_UPDATE: u16 = 0x0002;

/// magic + version + flags + header size + attribute count.
pub const HEADER_FIXED_SIZE: usize = 4 + 2 + 2 + 4 + 2;

pub const FLAG_IS_TERMINAL: u8 = 0x01;
pub const FLAG_HAS_MULTIPLE_CHARS: u8 = 0x02;
// Presence flags below are only written by the static layout; dynamic nodes
// use their zero/non-zero address fields instead.
pub const FLAG_HAS_CHILDREN: u8 = 0x04;
pub const FLAG_HAS_BIGRAMS: u8 = 0x08;
pub const FLAG_HAS_SHORTCUTS: u8 = 0x10;
pub const FLAG_IS_NOT_A_WORD: u8 = 0x20;
pub const FLAG_IS_POSSIBLY_OFFENSIVE: u8 = 0x40;

pub const STATE_LIVE: u8 = 0x00;
pub const STATE_DELETED: u8 = 0x01;
/// The node was replaced; its children field forwards to the new location.
pub const STATE_MOVED: u8 = 0x02;

pub const CHARACTER_GROUP_TERMINATOR: u8 = 0x1F;
const MIN_ONE_BYTE_CHAR: u32 = 0x20;
const MAX_ONE_BYTE_CHAR: u32 = 0xFF;

pub const ADDRESS_SIZE: usize = 3;
const MAX_ADDRESS_DISTANCE: i64 = 0x7F_FFFF;

pub const MAX_NODES_FOR_ONE_BYTE_COUNT: usize = 0x7F;
pub const MAX_NODES_IN_ARRAY: usize = 0x7FFF;
pub const MAX_LIST_ENTRIES: usize = 0xFFFF;

/// timestamp u32 + level u8 + count u8.
pub const HISTORICAL_INFO_SIZE: usize = 6;

/// Append-only byte sink with in-place patching of fixed-size fields.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues writing at the end of an existing buffer.
    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn pos(&self) -> usize {
        self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn patch_u8(&mut self, pos: usize, v: u8) {
        self.buf[pos] = v;
    }

    pub fn patch_u32(&mut self, pos: usize, v: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
    }

    pub fn len_prefixed_str(&mut self, s: &str) -> Result<()> {
        let len = u16::try_from(s.len())
            .map_err(|_| DictError::Format(format!("header string too long: {} bytes", s.len())))?;
        self.u16(len);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    pub fn code_point(&mut self, c: char) {
        let cp = c as u32;
        if (MIN_ONE_BYTE_CHAR..=MAX_ONE_BYTE_CHAR).contains(&cp) {
            self.u8(cp as u8);
        } else {
            self.u8((cp >> 16) as u8);
            self.u8((cp >> 8) as u8);
            self.u8(cp as u8);
        }
    }

    /// Writes a string of code points followed by the group terminator.
    pub fn terminated_chars(&mut self, chars: impl IntoIterator<Item = char>) {
        for c in chars {
            self.code_point(c);
        }
        self.u8(CHARACTER_GROUP_TERMINATOR);
    }

    /// Writes a node label; single-char labels carry no terminator.
    pub fn label(&mut self, chars: &[char]) {
        if chars.len() == 1 {
            self.code_point(chars[0]);
        } else {
            self.terminated_chars(chars.iter().copied());
        }
    }

    pub fn array_count(&mut self, count: usize) -> Result<()> {
        if count > MAX_NODES_IN_ARRAY {
            return Err(DictError::Format(format!("too many nodes in one array: {count}")));
        }
        if count <= MAX_NODES_FOR_ONE_BYTE_COUNT {
            self.u8(count as u8);
        } else {
            self.u8(0x80 | (count >> 8) as u8);
            self.u8(count as u8);
        }
        Ok(())
    }

    pub fn list_count(&mut self, count: usize) -> Result<()> {
        let count = u16::try_from(count)
            .ok()
            .filter(|&c| (c as usize) <= MAX_LIST_ENTRIES)
            .ok_or_else(|| DictError::Format(format!("list too long: {count}")))?;
        self.u16(count);
        Ok(())
    }

    /// Writes an address field pointing at `target`, or "none".
    pub fn address(&mut self, target: Option<usize>) -> Result<usize> {
        let field = self.pos();
        self.buf.extend_from_slice(&[0; ADDRESS_SIZE]);
        if let Some(target) = target {
            self.patch_address(field, Some(target))?;
        }
        Ok(field)
    }

    pub fn patch_address(&mut self, field: usize, target: Option<usize>) -> Result<()> {
        let distance = match target {
            Some(t) => t as i64 - field as i64,
            None => 0,
        };
        if distance.abs() > MAX_ADDRESS_DISTANCE {
            return Err(DictError::Format(format!("address distance {distance} out of range")));
        }
        let raw = (distance as i32 as u32) & 0x00FF_FFFF;
        self.buf[field] = (raw >> 16) as u8;
        self.buf[field + 1] = (raw >> 8) as u8;
        self.buf[field + 2] = raw as u8;
        Ok(())
    }

    pub fn historical(&mut self, timestamp: u32, level: u8, count: u8) {
        self.u32(timestamp);
        self.u8(level);
        self.u8(count);
    }
}

/// Bounds-checked sequential reader over a dictionary buffer.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len());
        let Some(end) = end else {
            return Err(DictError::Truncated { pos: self.pos, needed: n });
        };
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn len_prefixed_str(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let at = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DictError::Format(format!("invalid UTF-8 in header at {at}")))
    }

    /// Reads one code point; `None` is the group terminator.
    pub fn code_point(&mut self) -> Result<Option<char>> {
        let at = self.pos;
        let first = self.u8()?;
        if first == CHARACTER_GROUP_TERMINATOR {
            return Ok(None);
        }
        let cp = if u32::from(first) >= MIN_ONE_BYTE_CHAR {
            u32::from(first)
        } else {
            let b = self.take(2)?;
            (u32::from(first) << 16) | (u32::from(b[0]) << 8) | u32::from(b[1])
        };
        char::from_u32(cp)
            .map(Some)
            .ok_or_else(|| DictError::Format(format!("invalid code point {cp:#x} at {at}")))
    }

    pub fn terminated_chars(&mut self) -> Result<Vec<char>> {
        let mut chars = Vec::new();
        while let Some(c) = self.code_point()? {
            chars.push(c);
        }
        Ok(chars)
    }

    pub fn label(&mut self, multiple: bool) -> Result<Vec<char>> {
        let at = self.pos;
        let chars = if multiple {
            self.terminated_chars()?
        } else {
            match self.code_point()? {
                Some(c) => vec![c],
                None => Vec::new(),
            }
        };
        if chars.is_empty() {
            return Err(DictError::Format(format!("empty node label at {at}")));
        }
        Ok(chars)
    }

    pub fn array_count(&mut self) -> Result<usize> {
        let first = self.u8()? as usize;
        if first & 0x80 == 0 {
            Ok(first)
        } else {
            let second = self.u8()? as usize;
            Ok(((first & 0x7F) << 8) | second)
        }
    }

    /// Reads an address field and resolves it to an absolute, in-range position.
    pub fn address(&mut self) -> Result<Option<usize>> {
        let field = self.pos;
        let b = self.take(ADDRESS_SIZE)?;
        let raw = (i32::from(b[0]) << 16) | (i32::from(b[1]) << 8) | i32::from(b[2]);
        let distance = if raw & 0x80_0000 != 0 { raw - 0x100_0000 } else { raw };
        if distance == 0 {
            return Ok(None);
        }
        let target = field as i64 + i64::from(distance);
        if target < 0 || target as usize >= self.buf.len() {
            return Err(DictError::Format(format!(
                "address at {field} points outside the buffer ({target})"
            )));
        }
        Ok(Some(target as usize))
    }
}
