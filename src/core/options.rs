// File: src/core/options.rs
//! Header attributes and on-disk format selection.

use crate::error::{DictError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DICTIONARY_KEY: &str = "dictionary";
pub const LOCALE_KEY: &str = "locale";
pub const VERSION_KEY: &str = "version";
pub const DESCRIPTION_KEY: &str = "description";
pub const DATE_KEY: &str = "date";
pub const SUPPORTS_DYNAMIC_UPDATE_KEY: &str = "SUPPORTS_DYNAMIC_UPDATE";
pub const USES_FORGETTING_CURVE_KEY: &str = "USES_FORGETTING_CURVE";
pub const HAS_HISTORICAL_INFO_KEY: &str = "HAS_HISTORICAL_INFO";
pub const MAX_UNIGRAM_COUNT_KEY: &str = "MAX_UNIGRAM_COUNT";
pub const MAX_BIGRAM_COUNT_KEY: &str = "MAX_BIGRAM_COUNT";

pub const DEFAULT_MAX_UNIGRAM_COUNT: usize = 10_000;
pub const DEFAULT_MAX_BIGRAM_COUNT: usize = 10_000;

/// Free-form key/value header of a dictionary.
///
/// Capability flags are stored as `"1"` / `"0"` and are fixed once the
/// dictionary has been created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryOptions {
    pub attributes: BTreeMap<String, String>,
}

impl DictionaryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_attributes(attributes: BTreeMap<String, String>) -> Self {
        Self { attributes }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn id(&self) -> Option<&str> {
        self.get(DICTIONARY_KEY)
    }

    pub fn locale(&self) -> Option<&str> {
        self.get(LOCALE_KEY)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("1")
    }

    pub fn supports_dynamic_update(&self) -> bool {
        self.flag(SUPPORTS_DYNAMIC_UPDATE_KEY)
    }

    pub fn uses_forgetting_curve(&self) -> bool {
        self.flag(USES_FORGETTING_CURVE_KEY)
    }

    pub fn has_historical_info(&self) -> bool {
        self.flag(HAS_HISTORICAL_INFO_KEY)
    }

    pub fn max_unigram_count(&self) -> usize {
        self.get(MAX_UNIGRAM_COUNT_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_UNIGRAM_COUNT)
    }

    pub fn max_bigram_count(&self) -> usize {
        self.get(MAX_BIGRAM_COUNT_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_BIGRAM_COUNT)
    }

    /// Writes the capability flags implied by `format`, replacing any stale ones.
    pub fn apply_format(&mut self, format: &FormatOptions) {
        let dynamic = format.version.supports_dynamic_update();
        self.set(SUPPORTS_DYNAMIC_UPDATE_KEY, flag_value(dynamic));
        self.set(HAS_HISTORICAL_INFO_KEY, flag_value(format.has_historical_info));
        self.set(USES_FORGETTING_CURVE_KEY, flag_value(format.has_historical_info));
    }

    /// Checks that the capability flags can be honoured by a file of `version`.
    pub fn validate_for(&self, version: FormatVersion) -> Result<()> {
        if self.supports_dynamic_update() && !version.supports_dynamic_update() {
            return Err(DictError::Format(format!(
                "{SUPPORTS_DYNAMIC_UPDATE_KEY} set on a version {} file",
                version.as_u16()
            )));
        }
        if self.has_historical_info() && !version.supports_historical_info() {
            return Err(DictError::Format(format!(
                "{HAS_HISTORICAL_INFO_KEY} set on a version {} file",
                version.as_u16()
            )));
        }
        if self.uses_forgetting_curve() && !self.has_historical_info() {
            return Err(DictError::Format(format!(
                "{USES_FORGETTING_CURVE_KEY} requires {HAS_HISTORICAL_INFO_KEY}"
            )));
        }
        Ok(())
    }
}

fn flag_value(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

/// Binary format generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    /// Legacy fixed-node format, written once and never patched.
    V2,
    /// Dynamic-update format.
    V3,
    /// Dynamic-update format that may carry historical info.
    V4,
}

impl FormatVersion {
    pub fn from_u16(v: u16) -> Result<Self> {
        match v {
            2 => Ok(FormatVersion::V2),
            3 => Ok(FormatVersion::V3),
            4 => Ok(FormatVersion::V4),
            other => Err(DictError::UnsupportedVersion(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            FormatVersion::V2 => 2,
            FormatVersion::V3 => 3,
            FormatVersion::V4 => 4,
        }
    }

    pub fn supports_dynamic_update(self) -> bool {
        self >= FormatVersion::V3
    }

    pub fn supports_historical_info(self) -> bool {
        self >= FormatVersion::V4
    }
}

/// Which on-disk variant the encoder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub version: FormatVersion,
    pub has_historical_info: bool,
}

impl FormatOptions {
    pub fn new(version: FormatVersion, has_historical_info: bool) -> Result<Self> {
        if has_historical_info && !version.supports_historical_info() {
            return Err(DictError::CapabilityMismatch(HAS_HISTORICAL_INFO_KEY));
        }
        Ok(Self { version, has_historical_info })
    }

    pub fn static_v2() -> Self {
        Self { version: FormatVersion::V2, has_historical_info: false }
    }

    pub fn dynamic() -> Self {
        Self { version: FormatVersion::V3, has_historical_info: false }
    }

    /// Dynamic-update format with historical info and the forgetting curve.
    pub fn decaying() -> Self {
        Self { version: FormatVersion::V4, has_historical_info: true }
    }

    /// The variant that matches what a header declares.
    pub fn from_header(version: FormatVersion, options: &DictionaryOptions) -> Self {
        Self {
            version,
            has_historical_info: options.has_historical_info() && version.supports_historical_info(),
        }
    }
}
