// File: src/learning.rs
//! Forgetting curve and capacity policy for user-history dictionaries.
//!
//! Every decaying entry carries a [`HistoricalInfo`]: a level (0 = seen but
//! not yet valid, up to `max_level`), a count of reinforcements inside that
//! level, and the time it was last touched. Each full `level_down_duration`
//! since the last touch costs one level. Queries see the decayed value
//! lazily; GC writes it back and drops what fell below level 0.

use crate::core::trie::{FusionDictionary, UpdatePolicy};
use crate::core::types::{by_probability_desc, HistoricalInfo, ProbabilityInfo, WordEntry, MAX_PROBABILITY};
use crate::error::{DictError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

pub const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Source of "now" in seconds, injectable so decay can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> u32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs().min(u64::from(u32::MAX)) as u32)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn new(start: u32) -> Self {
        Self { now: AtomicU32::new(start) }
    }

    pub fn set(&self, now: u32) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u32) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Tunables of the forgetting curve and of capacity GC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecayConfig {
    /// Seconds without reinforcement that cost one level.
    pub level_down_duration: u32,
    /// Reinforcements above this count inside a level promote to the next one.
    pub count_per_level: u8,
    pub max_level: u8,
    /// Fraction of a ceiling at which a caller that does not mind blocking
    /// is told to run GC.
    pub soft_limit_ratio: f32,
    /// Fraction of a ceiling that capacity eviction shrinks down to.
    pub eviction_target_ratio: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            level_down_duration: SECONDS_PER_DAY,
            count_per_level: 2,
            max_level: 3,
            soft_limit_ratio: 0.9,
            eviction_target_ratio: 0.9,
        }
    }
}

/// What one GC pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub expired_unigrams: usize,
    pub expired_bigrams: usize,
    pub evicted_unigrams: usize,
    pub evicted_bigrams: usize,
    /// Bigrams dropped because their target word went away.
    pub cascaded_bigrams: usize,
    pub unigrams_after: usize,
    pub bigrams_after: usize,
}

/// Applies the forgetting curve and the capacity ceilings to a dictionary.
#[derive(Debug, Clone, Default)]
pub struct LearningEngine {
    config: DecayConfig,
}

impl LearningEngine {
    pub fn new(config: DecayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    /// Probability shown for a history: a base per level plus a bonus per
    /// reinforcement inside the level.
    pub fn probability_of(&self, h: HistoricalInfo) -> u8 {
        let levels = u32::from(self.config.max_level) + 1;
        let step = u32::from(MAX_PROBABILITY) / levels;
        let bonus = step / (u32::from(self.config.count_per_level) + 1);
        let level = u32::from(h.level.min(self.config.max_level));
        let value = if level == 0 {
            u32::from(h.count).min(u32::from(self.config.count_per_level)) * (bonus / 2).max(1)
        } else {
            level * step + u32::from(h.count.saturating_sub(1)) * bonus
        };
        value.min(u32::from(MAX_PROBABILITY)) as u8
    }

    fn from_history(&self, h: HistoricalInfo) -> ProbabilityInfo {
        ProbabilityInfo::with_historical(self.probability_of(h), h)
    }

    /// History for a first sighting. A supplied probability makes the entry
    /// valid straight away; otherwise it must be reinforced first.
    pub fn initial(&self, valid: bool, now: u32) -> ProbabilityInfo {
        self.from_history(HistoricalInfo::new(now, u8::from(valid), 1))
    }

    /// Decays `current` to `now`, then counts one more use.
    pub fn reinforce(&self, current: ProbabilityInfo, valid: bool, now: u32) -> ProbabilityInfo {
        let Some(mut h) = self.decayed_history(current, now) else {
            return self.initial(valid, now);
        };
        if valid && h.level == 0 {
            h.level = 1;
            h.count = 1;
        } else {
            h.count = h.count.saturating_add(1);
            if h.count > self.config.count_per_level {
                if h.level < self.config.max_level {
                    h.level += 1;
                    h.count = 1;
                } else {
                    h.count = self.config.count_per_level;
                }
            }
        }
        h.timestamp = now;
        self.from_history(h)
    }

    /// History as seen at `now`, or `None` once it has decayed below level 0.
    ///
    /// Entries that never had a history (loaded from a plain word list) are
    /// treated as fresh valid entries touched at `now`.
    fn decayed_history(&self, info: ProbabilityInfo, now: u32) -> Option<HistoricalInfo> {
        let Some(h) = info.historical else {
            return Some(HistoricalInfo::new(now, u8::from(info.probability > 0), 1));
        };
        let duration = self.config.level_down_duration.max(1);
        let steps = now.saturating_sub(h.timestamp) / duration;
        if steps == 0 {
            return Some(h);
        }
        if steps > u32::from(h.level) {
            return None;
        }
        Some(HistoricalInfo::new(h.timestamp + steps * duration, h.level - steps as u8, h.count))
    }

    /// The decayed probability at `now`, `None` when expired.
    pub fn decayed(&self, info: ProbabilityInfo, now: u32) -> Option<ProbabilityInfo> {
        self.decayed_history(info, now).map(|h| self.from_history(h))
    }

    /// Valid means level 1 or above after decay.
    pub fn is_valid(&self, info: ProbabilityInfo, now: u32) -> bool {
        self.decayed_history(info, now).is_some_and(|h| h.level >= 1)
    }

    /// Learns one use of `word`. Returns the stored probability.
    pub fn learn_unigram(
        &self,
        dict: &mut FusionDictionary,
        word: &str,
        probability: Option<u8>,
        is_not_a_word: bool,
        now: u32,
    ) -> Result<ProbabilityInfo> {
        let valid = probability.is_some();
        if let Some(entry) = dict.find_word_mut(word) {
            entry.probability = self.reinforce(entry.probability, valid, now);
            entry.is_not_a_word = is_not_a_word;
            return Ok(entry.probability);
        }
        let mut entry = WordEntry::new(self.initial(valid, now));
        entry.is_not_a_word = is_not_a_word;
        let stored = entry.probability;
        dict.insert(word, entry, UpdatePolicy::Overwrite)?;
        Ok(stored)
    }

    /// Learns one use of the pair `word1 word2`; both words must exist.
    pub fn learn_bigram(
        &self,
        dict: &mut FusionDictionary,
        word1: &str,
        word2: &str,
        probability: Option<u8>,
        now: u32,
    ) -> Result<ProbabilityInfo> {
        if !dict.has_word(word2) {
            return Err(DictError::NoSuchWord(word2.to_string()));
        }
        let entry = dict
            .find_word_mut(word1)
            .ok_or_else(|| DictError::NoSuchWord(word1.to_string()))?;
        let valid = probability.is_some();
        let updated = match entry.bigram(word2) {
            Some(existing) => self.reinforce(existing.probability, valid, now),
            None => self.initial(valid, now),
        };
        dict.set_bigram_with(word1, word2, updated, UpdatePolicy::Overwrite)?;
        Ok(updated)
    }

    /// Stamps entries that have no history yet as fresh uses at `now`.
    pub fn attach_history(&self, dict: &mut FusionDictionary, now: u32) {
        dict.visit_words_mut(|_, entry| {
            if entry.probability.historical.is_none() {
                entry.probability = self.initial(entry.probability.probability > 0, now);
            }
            for bigram in &mut entry.bigrams {
                if bigram.probability.historical.is_none() {
                    bigram.probability = self.initial(bigram.probability.probability > 0, now);
                }
            }
        });
    }

    fn soft_limit(&self, max: usize) -> usize {
        (max as f32 * self.config.soft_limit_ratio) as usize
    }

    /// Whether counts crossed a ceiling. A caller that minds blocking is only
    /// told at the hard ceiling; others already at the soft limit.
    pub fn needs_to_run_gc(&self, dict: &FusionDictionary, minds_block_by_gc: bool) -> bool {
        let (max_unigrams, max_bigrams) = (dict.options.max_unigram_count(), dict.options.max_bigram_count());
        let (unigrams, bigrams) = (dict.unigram_count(), dict.bigram_count());
        if minds_block_by_gc {
            unigrams >= max_unigrams || bigrams >= max_bigrams
        } else {
            unigrams >= self.soft_limit(max_unigrams) || bigrams >= self.soft_limit(max_bigrams)
        }
    }

    /// Decays (when `decaying`), drops expired entries, evicts the weakest
    /// entries while over capacity and compacts the trie.
    pub fn run_gc(&self, dict: &mut FusionDictionary, decaying: bool, now: u32) -> GcReport {
        let mut report = GcReport::default();

        if decaying {
            let owned: usize = dict
                .words()
                .filter(|w| self.decayed_history(w.entry.probability, now).is_none())
                .map(|w| w.entry.bigrams.len())
                .sum();
            let bigrams_before = dict.bigram_count();
            let expired = dict.retain_words(|_, e| self.decayed_history(e.probability, now).is_some());
            report.expired_unigrams = expired.len();
            let bigrams_left = dict.bigram_count() + owned;
            report.expired_bigrams = dict.retain_bigrams(|_, b| self.decayed_history(b.probability, now).is_some());
            report.cascaded_bigrams = bigrams_before - bigrams_left;
            dict.visit_words_mut(|_, entry| {
                if let Some(p) = self.decayed(entry.probability, now) {
                    entry.probability = p;
                }
                for bigram in &mut entry.bigrams {
                    if let Some(p) = self.decayed(bigram.probability, now) {
                        bigram.probability = p;
                    }
                }
                entry.bigrams.sort_by(by_probability_desc);
            });
            debug!(?report, "decay pass done");
        }

        let (evicted, cascaded) = self.evict_unigrams(dict);
        report.evicted_unigrams = evicted;
        report.cascaded_bigrams += cascaded;
        report.evicted_bigrams = self.evict_bigrams(dict);

        dict.compact();
        report.unigrams_after = dict.unigram_count();
        report.bigrams_after = dict.bigram_count();
        info!(
            expired = report.expired_unigrams,
            evicted = report.evicted_unigrams,
            unigrams = report.unigrams_after,
            bigrams = report.bigrams_after,
            "gc finished"
        );
        report
    }

    fn eviction_target(&self, max: usize) -> usize {
        (max as f32 * self.config.eviction_target_ratio) as usize
    }

    /// Removes the weakest words (lowest probability, then oldest) until the
    /// unigram count is back under the target. Returns (evicted, cascaded bigrams).
    fn evict_unigrams(&self, dict: &mut FusionDictionary) -> (usize, usize) {
        let max = dict.options.max_unigram_count();
        let count = dict.unigram_count();
        if count < max {
            return (0, 0);
        }
        let target = self.eviction_target(max);
        let mut ranked: Vec<(u8, u32, String)> = dict
            .words()
            .map(|w| (w.probability(), timestamp_of(w.entry.probability), w.text))
            .collect();
        ranked.sort();
        let victims: HashSet<String> = ranked.into_iter().take(count - target).map(|(_, _, w)| w).collect();

        // Bigrams owned by the victims go with them; only count those that
        // pointed at a victim from a surviving word.
        let owned: usize = victims
            .iter()
            .filter_map(|w| dict.find_word(w))
            .map(|e| e.bigrams.len())
            .sum();
        let bigrams_before = dict.bigram_count();
        let removed = dict.retain_words(|w, _| !victims.contains(w));
        let cascaded = bigrams_before - dict.bigram_count() - owned;
        debug!(evicted = removed.len(), target, "evicted unigrams");
        (removed.len(), cascaded)
    }

    fn evict_bigrams(&self, dict: &mut FusionDictionary) -> usize {
        let max = dict.options.max_bigram_count();
        let count = dict.bigram_count();
        if count < max {
            return 0;
        }
        let target = self.eviction_target(max);
        let mut ranked: Vec<(u8, u32, String, String)> = Vec::with_capacity(count);
        for word in dict.words() {
            for b in &word.entry.bigrams {
                ranked.push((b.probability(), timestamp_of(b.probability), word.text.clone(), b.word.clone()));
            }
        }
        ranked.sort();
        let victims: HashSet<(String, String)> = ranked
            .into_iter()
            .take(count - target)
            .map(|(_, _, source, target)| (source, target))
            .collect();
        let evicted = dict.retain_bigrams(|source, b| !victims.contains(&(source.to_string(), b.word.clone())));
        debug!(evicted, target, "evicted bigrams");
        evicted
    }
}

fn timestamp_of(info: ProbabilityInfo) -> u32 {
    info.historical.map(|h| h.timestamp).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::DictionaryOptions;

    const DAY: u32 = SECONDS_PER_DAY;

    fn engine() -> LearningEngine {
        LearningEngine::default()
    }

    #[test]
    fn single_use_expires_after_a_day() {
        let e = engine();
        let p = e.initial(true, 0);
        assert!(e.is_valid(p, DAY - 1));
        assert!(!e.is_valid(p, DAY));
        assert!(e.decayed(p, DAY).is_some());
        assert!(e.decayed(p, 2 * DAY).is_none());
    }

    #[test]
    fn reinforcement_climbs_levels() {
        let e = engine();
        let mut p = e.initial(true, 0);
        for _ in 0..4 {
            p = e.reinforce(p, true, 0);
        }
        let h = p.historical.unwrap();
        assert_eq!((h.level, h.count), (3, 1));
        assert!(e.is_valid(p, DAY));
        assert!(e.is_valid(p, 2 * DAY + 1));
        assert!(!e.is_valid(p, 3 * DAY));
        assert!(e.decayed(p, 60 * DAY).is_none());
    }

    #[test]
    fn unknown_word_needs_three_uses() {
        let e = engine();
        let mut p = e.initial(false, 0);
        assert!(!e.is_valid(p, 0));
        p = e.reinforce(p, false, 0);
        assert!(!e.is_valid(p, 0));
        p = e.reinforce(p, false, 0);
        assert!(e.is_valid(p, 0));
    }

    #[test]
    fn probability_grows_with_level_and_count() {
        let e = engine();
        let mut last = 0;
        let mut p = e.initial(true, 0);
        for _ in 0..6 {
            assert!(p.probability >= last);
            last = p.probability;
            p = e.reinforce(p, true, 0);
        }
        assert!(e.probability_of(HistoricalInfo::new(0, 0, 2)) < e.probability_of(HistoricalInfo::new(0, 1, 1)));
    }

    #[test]
    fn capacity_gc_keeps_the_strongest() {
        let e = engine();
        let mut options = DictionaryOptions::new();
        options.set(crate::core::options::MAX_UNIGRAM_COUNT_KEY, "10");
        let mut dict = FusionDictionary::new(options);
        for i in 0..10u32 {
            e.learn_unigram(&mut dict, &format!("w{i}"), Some(1), false, i).unwrap();
        }
        for _ in 0..4 {
            e.learn_unigram(&mut dict, "w0", Some(1), false, 20).unwrap();
        }
        e.learn_bigram(&mut dict, "w0", "w1", Some(1), 20).unwrap();
        assert!(e.needs_to_run_gc(&dict, true));

        let report = e.run_gc(&mut dict, true, 30);
        assert_eq!(report.evicted_unigrams, 1);
        assert_eq!(report.unigrams_after, 9);
        assert!(dict.has_word("w0"));
        // Oldest of the equally weak words goes first, and its incoming bigram with it.
        assert!(!dict.has_word("w1"));
        assert_eq!(report.cascaded_bigrams, 1);
        assert_eq!(dict.bigram_count(), 0);
        assert!(!e.needs_to_run_gc(&dict, true));
        assert!(e.needs_to_run_gc(&dict, false));
    }

    #[test]
    fn gc_expires_old_entries_and_materialises_decay() {
        let e = engine();
        let mut dict = FusionDictionary::new(DictionaryOptions::new());
        e.learn_unigram(&mut dict, "old", Some(1), false, 0).unwrap();
        for _ in 0..5 {
            e.learn_unigram(&mut dict, "kept", Some(1), false, 0).unwrap();
        }
        let report = e.run_gc(&mut dict, true, 2 * DAY);
        assert_eq!(report.expired_unigrams, 1);
        let h = dict.find_word("kept").unwrap().probability.historical.unwrap();
        assert_eq!((h.level, h.timestamp), (1, 2 * DAY));
    }
}
