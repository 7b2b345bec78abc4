// File: src/core/engine.rs
use crate::core::options::{
    DictionaryOptions, FormatOptions, HAS_HISTORICAL_INFO_KEY, SUPPORTS_DYNAMIC_UPDATE_KEY,
    USES_FORGETTING_CURVE_KEY,
};
use crate::core::trie::{FusionDictionary, UpdatePolicy};
use crate::core::types::{HistoricalInfo, ProbabilityInfo, WordEntry};
use crate::error::{DictError, Result};
use crate::format::{decode, write_dictionary_file, DynamicUpdater, OutputFormat};
use crate::learning::{Clock, DecayConfig, GcReport, LearningEngine, SystemClock};
use crate::persistence::{read_if_exists, write_atomic};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Something touched since the last flush; replayed against the file from
/// the dictionary's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Word(String),
    RemovedWord(String),
    Bigram(String, String),
}

/// Runtime view of one dictionary: lookups, live updates, decay and flushing.
///
/// Mutating calls take `&mut self`; share it across threads through
/// [`DictionaryEngine::into_shared`].
pub struct DictionaryEngine {
    dict: FusionDictionary,
    format: FormatOptions,
    learning_engine: LearningEngine,
    clock: Arc<dyn Clock>,
    dictionary_path: Option<PathBuf>,
    dirty: bool,
    /// The file at `dictionary_path` holds this dictionary minus `pending`.
    file_in_sync: bool,
    pending: Vec<Change>,
}

impl std::fmt::Debug for DictionaryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictionaryEngine")
            .field("format", &self.format)
            .field("unigrams", &self.dict.unigram_count())
            .field("path", &self.dictionary_path)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl DictionaryEngine {
    /// An empty in-memory dictionary whose header declares `format`'s capabilities.
    pub fn new(mut options: DictionaryOptions, format: FormatOptions) -> Self {
        options.apply_format(&format);
        Self::from_dictionary(FusionDictionary::new(options), format)
    }

    pub fn from_dictionary(dict: FusionDictionary, format: FormatOptions) -> Self {
        Self {
            dict,
            format,
            learning_engine: LearningEngine::default(),
            clock: Arc::new(SystemClock),
            dictionary_path: None,
            dirty: false,
            file_in_sync: false,
            pending: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_decay_config(mut self, config: DecayConfig) -> Self {
        self.learning_engine = LearningEngine::new(config);
        self
    }

    /// Where `flush` writes to.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dictionary_path = Some(path.into());
        self.file_in_sync = false;
        self
    }

    fn loaded_from(self, path: &Path) -> Self {
        let mut engine = self.with_path(path);
        engine.file_in_sync = true;
        engine
    }

    /// Loads a binary dictionary file.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let decoded = decode(&bytes, false)?;
        let format = FormatOptions::from_header(decoded.header.version, &decoded.header.options);
        let dict = decoded
            .dictionary
            .ok_or_else(|| DictError::Format("dictionary body missing".to_string()))?;
        info!(path = %path.display(), words = dict.unigram_count(), "opened dictionary");
        Ok(Self::from_dictionary(dict, format).loaded_from(path))
    }

    /// Loads a file that must carry the forgetting curve.
    pub fn open_decaying(path: &Path) -> Result<Self> {
        let engine = Self::open(path)?;
        if !engine.dict.options.uses_forgetting_curve() {
            return Err(DictError::CapabilityMismatch(USES_FORGETTING_CURVE_KEY));
        }
        Ok(engine)
    }

    /// Loads `path`, or starts empty when it is missing or cannot be trusted.
    ///
    /// A corrupt file is never patched; it is replaced on the next flush.
    pub fn from_file_or_new(path: &Path, options: DictionaryOptions, format: FormatOptions) -> Result<Self> {
        let fresh = |options, format| Ok(Self::new(options, format).with_path(path));
        let Some(bytes) = read_if_exists(path)? else {
            debug!(path = %path.display(), "no dictionary yet, starting empty");
            return fresh(options, format);
        };
        match decode(&bytes, false) {
            Ok(decoded) => {
                let format = FormatOptions::from_header(decoded.header.version, &decoded.header.options);
                let dict = decoded
                    .dictionary
                    .ok_or_else(|| DictError::Format("dictionary body missing".to_string()))?;
                Ok(Self::from_dictionary(dict, format).loaded_from(path))
            }
            Err(e) if e.is_format_error() => {
                warn!(path = %path.display(), error = %e, "discarding corrupt dictionary");
                fresh(options, format)
            }
            Err(e) => Err(e),
        }
    }

    /// Wraps the engine in the single coarse lock all callers share.
    pub fn into_shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    pub fn dictionary(&self) -> &FusionDictionary {
        &self.dict
    }

    pub fn format(&self) -> FormatOptions {
        self.format
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn now(&self) -> u32 {
        self.clock.now()
    }

    /// Decay applies only when the file both stores history and opts into the curve.
    pub fn is_decaying(&self) -> bool {
        self.format.has_historical_info && self.dict.options.uses_forgetting_curve()
    }

    fn require_dynamic(&self) -> Result<()> {
        if !self.format.version.supports_dynamic_update() {
            return Err(DictError::StaticDictionary);
        }
        if !self.dict.options.supports_dynamic_update() {
            return Err(DictError::CapabilityMismatch(SUPPORTS_DYNAMIC_UPDATE_KEY));
        }
        Ok(())
    }

    /// Probability of a suggestable word as seen now, `None` if it is not valid.
    fn effective(&self, info: ProbabilityInfo) -> Option<u8> {
        if !self.is_decaying() {
            return Some(info.probability);
        }
        let now = self.now();
        if !self.learning_engine.is_valid(info, now) {
            return None;
        }
        self.learning_engine.decayed(info, now).map(|p| p.probability)
    }

    fn valid_entry(&self, word: &str) -> Option<&WordEntry> {
        self.dict
            .find_word(word)
            .filter(|e| !e.is_not_a_word && self.effective(e.probability).is_some())
    }

    pub fn is_valid_word(&self, word: &str) -> bool {
        self.valid_entry(word).is_some()
    }

    pub fn get_frequency(&self, word: &str) -> Option<u8> {
        self.valid_entry(word).and_then(|e| self.effective(e.probability))
    }

    /// Valid only when both words are valid and the pair itself is.
    pub fn is_valid_bigram(&self, word1: &str, word2: &str) -> bool {
        self.get_bigram_probability(word1, word2).is_some()
    }

    pub fn get_bigram_probability(&self, word1: &str, word2: &str) -> Option<u8> {
        if !self.is_valid_word(word2) {
            return None;
        }
        let bigram = self.valid_entry(word1)?.bigram(word2)?;
        self.effective(bigram.probability)
    }

    /// Usage history of `word`; an error on dictionaries that keep none.
    pub fn historical_info(&self, word: &str) -> Result<Option<HistoricalInfo>> {
        if !self.format.has_historical_info {
            return Err(DictError::CapabilityMismatch(HAS_HISTORICAL_INFO_KEY));
        }
        Ok(self.dict.find_word(word).and_then(|e| e.probability.historical))
    }

    /// Best valid completions of `prefix`, strongest first.
    pub fn get_suggestions(&self, prefix: &str, count: usize) -> Vec<(String, u8)> {
        if prefix.is_empty() || count == 0 {
            return vec![];
        }
        let mut suggestions: Vec<(String, u8)> = self
            .dict
            .suggestions_for_prefix(prefix, usize::MAX)
            .into_iter()
            .filter_map(|w| self.effective(w.entry.probability).map(|p| (w.text, p)))
            .collect();
        suggestions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        suggestions.truncate(count);
        suggestions
    }

    /// Records a use of `word` now. `probability` is `None` for words the
    /// caller has never seen before; those need reinforcing to become valid.
    pub fn add_unigram_word(&mut self, word: &str, probability: Option<u8>, is_not_a_word: bool) -> Result<()> {
        let now = self.now();
        self.add_unigram_word_at(word, probability, is_not_a_word, now)
    }

    pub fn add_unigram_word_at(
        &mut self,
        word: &str,
        probability: Option<u8>,
        is_not_a_word: bool,
        timestamp: u32,
    ) -> Result<()> {
        self.require_dynamic()?;
        if word.is_empty() {
            return Err(DictError::EmptyWord);
        }
        if self.is_decaying() {
            self.learning_engine
                .learn_unigram(&mut self.dict, word, probability, is_not_a_word, timestamp)?;
        } else {
            let mut entry = WordEntry::new(ProbabilityInfo::new(probability.unwrap_or(0)));
            entry.is_not_a_word = is_not_a_word;
            self.dict.insert(word, entry, UpdatePolicy::KeepMax)?;
        }
        self.touch(Change::Word(word.to_string()));
        Ok(())
    }

    pub fn add_bigram_words(&mut self, word1: &str, word2: &str, probability: Option<u8>) -> Result<()> {
        let now = self.now();
        self.add_bigram_words_at(word1, word2, probability, now)
    }

    /// Records a use of the pair; both words must already be present.
    pub fn add_bigram_words_at(
        &mut self,
        word1: &str,
        word2: &str,
        probability: Option<u8>,
        timestamp: u32,
    ) -> Result<()> {
        self.require_dynamic()?;
        if self.is_decaying() {
            self.learning_engine
                .learn_bigram(&mut self.dict, word1, word2, probability, timestamp)?;
        } else {
            if !self.dict.has_word(word2) {
                return Err(DictError::NoSuchWord(word2.to_string()));
            }
            let p = ProbabilityInfo::new(probability.unwrap_or(0));
            self.dict.set_bigram_with(word1, word2, p, UpdatePolicy::KeepMax)?;
        }
        self.touch(Change::Bigram(word1.to_string(), word2.to_string()));
        Ok(())
    }

    /// Removing an absent pair is a no-op that returns false.
    pub fn remove_bigram_words(&mut self, word1: &str, word2: &str) -> Result<bool> {
        self.require_dynamic()?;
        let removed = self.dict.remove_bigram(word1, word2);
        if removed {
            self.touch(Change::Bigram(word1.to_string(), word2.to_string()));
        }
        Ok(removed)
    }

    /// Removes `word` and every bigram that targets it.
    pub fn remove_unigram_word(&mut self, word: &str) -> Result<bool> {
        self.require_dynamic()?;
        let removed = self.dict.remove_word(word);
        if removed {
            self.touch(Change::RemovedWord(word.to_string()));
        }
        Ok(removed)
    }

    pub fn needs_to_run_gc(&self, minds_block_by_gc: bool) -> bool {
        self.learning_engine.needs_to_run_gc(&self.dict, minds_block_by_gc)
    }

    fn touch(&mut self, change: Change) {
        self.dirty = true;
        if self.file_in_sync {
            self.pending.push(change);
        }
    }

    /// Writes the dictionary out. Without a path this does nothing.
    ///
    /// A dynamic file this engine loaded is patched with the pending changes
    /// through [`DynamicUpdater`]; anything else is encoded from scratch.
    pub fn flush(&mut self) -> Result<()> {
        let Some(path) = self.dictionary_path.clone() else {
            return Ok(());
        };
        let patched = if self.file_in_sync && self.format.version.supports_dynamic_update() {
            self.pending.is_empty()
                || self
                    .append_pending(&path)
                    .inspect_err(|e| warn!(path = %path.display(), error = %e, "in-place update failed, rewriting"))
                    .is_ok()
        } else {
            false
        };
        if !patched {
            write_dictionary_file(&self.dict, &path, OutputFormat::Binary(self.format))?;
            info!(path = %path.display(), words = self.dict.unigram_count(), "flushed dictionary");
        }
        self.pending.clear();
        self.file_in_sync = true;
        self.dirty = false;
        Ok(())
    }

    fn append_pending(&self, path: &Path) -> Result<()> {
        let mut updater = DynamicUpdater::new(std::fs::read(path)?)?;
        for change in &self.pending {
            match change {
                Change::Word(word) => match self.dict.find_word(word) {
                    Some(entry) => updater.insert_word(word, entry.probability, entry.is_not_a_word)?,
                    None => {
                        updater.delete_word(word)?;
                    }
                },
                Change::RemovedWord(word) => {
                    updater.delete_word(word)?;
                }
                Change::Bigram(word1, word2) => {
                    match self.dict.find_word(word1).and_then(|e| e.bigram(word2)) {
                        Some(bigram) => updater.set_bigram(word1, word2, bigram.probability)?,
                        None => {
                            updater.remove_bigram(word1, word2)?;
                        }
                    }
                }
            }
        }
        write_atomic(path, updater.as_bytes())?;
        info!(path = %path.display(), changes = self.pending.len(), "patched dictionary in place");
        Ok(())
    }

    /// Decays, evicts and compacts, then writes the result.
    pub fn flush_with_gc(&mut self) -> Result<GcReport> {
        let now = self.now();
        let decaying = self.is_decaying();
        let report = self.learning_engine.run_gc(&mut self.dict, decaying, now);
        self.dirty = true;
        self.file_in_sync = false;
        self.flush()?;
        Ok(report)
    }

    /// Flushes pending changes and releases the dictionary.
    pub fn close(mut self) -> Result<()> {
        if self.dirty {
            self.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::ManualClock;

    fn dynamic_engine() -> DictionaryEngine {
        DictionaryEngine::new(DictionaryOptions::new(), FormatOptions::dynamic())
    }

    #[test]
    fn non_decaying_updates_keep_the_maximum() {
        let mut e = dynamic_engine();
        e.add_unigram_word("aaa", Some(100), false).unwrap();
        e.add_unigram_word("aaa", Some(50), false).unwrap();
        assert_eq!(e.get_frequency("aaa"), Some(100));
        assert!(e.is_valid_word("aaa"));
        assert!(!e.is_valid_word("aa"));
        assert!(e.is_dirty());
    }

    #[test]
    fn not_a_word_is_never_valid() {
        let mut e = dynamic_engine();
        e.add_unigram_word("thx", Some(100), true).unwrap();
        assert!(!e.is_valid_word("thx"));
        assert_eq!(e.get_frequency("thx"), None);
    }

    #[test]
    fn bigram_requires_both_words() {
        let mut e = dynamic_engine();
        e.add_unigram_word("a", Some(10), false).unwrap();
        assert!(matches!(e.add_bigram_words("a", "b", Some(5)), Err(DictError::NoSuchWord(_))));
        assert!(matches!(e.add_bigram_words("b", "a", Some(5)), Err(DictError::NoSuchWord(_))));
        e.add_unigram_word("b", Some(10), false).unwrap();
        e.add_bigram_words("a", "b", Some(5)).unwrap();
        assert_eq!(e.get_bigram_probability("a", "b"), Some(5));
        assert!(e.remove_bigram_words("a", "b").unwrap());
        assert!(!e.remove_bigram_words("a", "b").unwrap());
    }

    #[test]
    fn static_dictionaries_reject_updates() {
        let mut e = DictionaryEngine::new(DictionaryOptions::new(), FormatOptions::static_v2());
        assert!(matches!(e.add_unigram_word("a", Some(1), false), Err(DictError::StaticDictionary)));
        assert!(matches!(e.historical_info("a"), Err(DictError::CapabilityMismatch(_))));
    }

    #[test]
    fn decaying_engine_follows_the_clock() {
        let clock = Arc::new(ManualClock::new(1_000));
        let mut e = DictionaryEngine::new(DictionaryOptions::new(), FormatOptions::decaying())
            .with_clock(clock.clone());
        assert!(e.is_decaying());
        e.add_unigram_word("hi", Some(100), false).unwrap();
        assert!(e.is_valid_word("hi"));
        assert_eq!(e.historical_info("hi").unwrap().unwrap().timestamp, 1_000);
        clock.advance(crate::learning::SECONDS_PER_DAY);
        assert!(!e.is_valid_word("hi"));
    }

    #[test]
    fn flush_patches_a_loaded_dynamic_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.dict");
        let mut e = dynamic_engine().with_path(&path);
        for (w, p) in [("car", 10), ("cart", 20), ("a", 30)] {
            e.add_unigram_word(w, Some(p), false).unwrap();
        }
        e.add_bigram_words("a", "car", Some(7)).unwrap();
        e.close().unwrap();
        let original = std::fs::read(&path).unwrap();

        let mut e = DictionaryEngine::open(&path).unwrap();
        e.add_unigram_word("cars", Some(40), false).unwrap();
        e.add_unigram_word("a", Some(90), false).unwrap();
        assert!(e.remove_unigram_word("car").unwrap());
        e.add_unigram_word("car", Some(5), false).unwrap();
        e.add_bigram_words("cars", "a", Some(3)).unwrap();
        e.flush().unwrap();
        assert!(!e.is_dirty());

        let patched = std::fs::read(&path).unwrap();
        assert!(patched.len() > original.len());
        let header_size = decode(&original, true).unwrap().header.header_size;
        assert_eq!(patched[..header_size], original[..header_size]);

        let back = DictionaryEngine::open(&path).unwrap();
        let words = |e: &DictionaryEngine| e.dictionary().words().collect::<Vec<_>>();
        assert_eq!(words(&back), words(&e));
        assert_eq!(back.get_bigram_probability("a", "car"), None);
        assert_eq!(back.get_bigram_probability("cars", "a"), Some(3));
        assert_eq!(back.get_frequency("a"), Some(90));
    }

    #[test]
    fn flush_rewrites_files_it_did_not_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.dict");
        std::fs::write(&path, b"not a dictionary").unwrap();
        let mut e = dynamic_engine().with_path(&path);
        e.add_unigram_word("fresh", Some(10), false).unwrap();
        e.flush().unwrap();
        let back = DictionaryEngine::open(&path).unwrap();
        assert_eq!(back.get_frequency("fresh"), Some(10));
    }

    #[test]
    fn suggestions_are_ranked() {
        let mut e = dynamic_engine();
        for (w, p) in [("car", 10), ("cart", 30), ("care", 20), ("dog", 50)] {
            e.add_unigram_word(w, Some(p), false).unwrap();
        }
        let s = e.get_suggestions("car", 2);
        assert_eq!(s, vec![("cart".to_string(), 30), ("care".to_string(), 20)]);
        assert!(e.get_suggestions("", 2).is_empty());
    }
}
