// File: src/error.rs
//! Error taxonomy shared by the trie, the codecs and the runtime engine.

/// Errors surfaced by dictionary operations.
///
/// Capacity and decay conditions are not errors; they are reported through
/// `needs_to_run_gc` and the GC report instead.
#[derive(Debug, thiserror::Error)]
pub enum DictError {
    #[error("Bad magic number: {0:#010x}")]
    BadMagic(u32),

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u16),

    #[error("Truncated dictionary: needed {needed} bytes at position {pos}")]
    Truncated { pos: usize, needed: usize },

    #[error("Malformed dictionary: {0}")]
    Format(String),

    #[error("Cannot insert a zero-length word")]
    EmptyWord,

    #[error("No such word: {0:?}")]
    NoSuchWord(String),

    #[error("Dictionary lacks capability {0}")]
    CapabilityMismatch(&'static str),

    #[error("Static dictionaries cannot be updated in place")]
    StaticDictionary,

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("XML error: {0}")]
    Xml(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DictError {
    /// True for errors that mean the bytes themselves cannot be trusted.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            DictError::BadMagic(_)
                | DictError::UnsupportedVersion(_)
                | DictError::Truncated { .. }
                | DictError::Format(_)
        )
    }
}

impl From<quick_xml::Error> for DictError {
    fn from(e: quick_xml::Error) -> Self {
        DictError::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DictError>;
