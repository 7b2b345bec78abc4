// File: tests/codec_roundtrip.rs
//! Trie semantics checked through every codec.

use dict_core::format::{
    read_dictionary, read_dictionary_file, write_dictionary, write_dictionary_file, DynamicUpdater, OutputFormat,
};
use dict_core::persistence::write_atomic;
use dict_core::{DictionaryOptions, FormatOptions, FusionDictionary, ProbabilityInfo};
use proptest::prelude::*;
use std::collections::HashMap;
use tempfile::tempdir;

fn build(pairs: &[(String, u8)]) -> FusionDictionary {
    let mut dict = FusionDictionary::new(DictionaryOptions::new());
    for (word, p) in pairs {
        dict.add(word, ProbabilityInfo::new(*p), None, false).unwrap();
    }
    dict
}

fn summary(dict: &FusionDictionary) -> Vec<(String, u8)> {
    dict.words().map(|w| (w.text.clone(), w.probability())).collect()
}

proptest! {
    #[test]
    fn insertion_order_does_not_matter(pairs in prop::collection::vec(("[a-d]{1,6}", any::<u8>()), 1..40)) {
        let forward = build(&pairs);
        let reversed: Vec<_> = pairs.iter().rev().cloned().collect();
        let backward = build(&reversed);

        let mut expected: HashMap<&str, u8> = HashMap::new();
        for (word, p) in &pairs {
            let slot = expected.entry(word.as_str()).or_insert(0);
            *slot = (*slot).max(*p);
        }
        for (word, p) in &expected {
            prop_assert_eq!(forward.find_word(word).map(|e| e.probability.probability), Some(*p));
        }
        prop_assert_eq!(forward.unigram_count(), expected.len());
        prop_assert_eq!(summary(&forward), summary(&backward));
    }

    #[test]
    fn binary_encodings_preserve_words(pairs in prop::collection::vec(("[a-e]{1,8}", any::<u8>()), 1..60)) {
        let dict = build(&pairs);
        for format in [FormatOptions::static_v2(), FormatOptions::dynamic()] {
            let bytes = write_dictionary(&dict, format).unwrap();
            let decoded = read_dictionary(&bytes).unwrap();
            prop_assert_eq!(summary(&decoded), summary(&dict));
        }
    }
}

#[test]
fn words_sharing_a_prefix_stay_distinct() {
    let dict = build(&[("abc".to_string(), 10), ("abcef".to_string(), 20), ("abcde".to_string(), 30)]);
    assert_eq!(dict.find_word("abc").map(|e| e.probability.probability), Some(10));
    assert_eq!(dict.find_word("abcef").map(|e| e.probability.probability), Some(20));
    assert_eq!(dict.find_word("abcde").map(|e| e.probability.probability), Some(30));
    assert!(dict.find_word("abcd").is_none());
    assert!(dict.find_word("ab").is_none());

    let decoded = read_dictionary(&write_dictionary(&dict, FormatOptions::static_v2()).unwrap()).unwrap();
    assert_eq!(summary(&decoded), vec![("abc".to_string(), 10), ("abcde".to_string(), 30), ("abcef".to_string(), 20)]);
}

#[test]
fn text_formats_carry_every_attribute() {
    let dir = tempdir().unwrap();
    let mut dict = build(&[("hello".to_string(), 120), ("world".to_string(), 90)]);
    dict.options.set("dictionary", "main:en_us");
    dict.options.set("locale", "en_US");
    dict.add("thx", ProbabilityInfo::new(0), Some(vec![dict_core::WeightedString::new("thanks", 15)]), true)
        .unwrap();
    dict.set_bigram("hello", "world", ProbabilityInfo::new(80)).unwrap();

    for (name, format) in [("d.combined", OutputFormat::Combined), ("d.xml", OutputFormat::Xml)] {
        let path = dir.path().join(name);
        write_dictionary_file(&dict, &path, format).unwrap();
        let back = read_dictionary_file(&path).unwrap();
        assert_eq!(back.options.locale(), Some("en_US"), "{name}");
        assert_eq!(back.words().collect::<Vec<_>>(), dict.words().collect::<Vec<_>>(), "{name}");
    }
}

#[test]
fn in_place_updates_survive_a_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("user.dict");
    let dict = build(&[("hello".to_string(), 100), ("help".to_string(), 30)]);
    write_atomic(&path, &write_dictionary(&dict, FormatOptions::dynamic()).unwrap()).unwrap();

    let mut updater = DynamicUpdater::new(std::fs::read(&path).unwrap()).unwrap();
    updater.insert_word("he", ProbabilityInfo::new(40), false).unwrap();
    updater.insert_word("helper", ProbabilityInfo::new(25), false).unwrap();
    updater.set_bigram("he", "hello", ProbabilityInfo::new(12)).unwrap();
    assert!(updater.delete_word("help").unwrap());
    write_atomic(&path, updater.as_bytes()).unwrap();

    let back = read_dictionary_file(&path).unwrap();
    assert_eq!(summary(&back), vec![("he".to_string(), 40), ("hello".to_string(), 100), ("helper".to_string(), 25)]);
    let he = back.find_word("he").unwrap();
    assert_eq!(he.bigram("hello").map(|b| b.probability()), Some(12));
}
