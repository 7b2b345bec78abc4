// src/lib.rs
//! Predictive-text dictionary storage: a Patricia trie with binary and text
//! codecs, in-place updates, a forgetting curve and offline tooling.

pub mod core;
pub mod diff;
pub mod error;
pub mod format;
pub mod inspect;
pub mod learning;
pub mod persistence;

pub use crate::core::engine::DictionaryEngine;
pub use crate::core::options::{DictionaryOptions, FormatOptions, FormatVersion};
pub use crate::core::trie::{FusionDictionary, UpdatePolicy};
pub use crate::core::types::{HistoricalInfo, ProbabilityInfo, WeightedString, Word, WordEntry};
pub use crate::error::{DictError, Result};
pub use crate::learning::{Clock, DecayConfig, GcReport, LearningEngine, ManualClock, SystemClock};
