// File: tests/tool_diff.rs
//! Diff and inspection over dictionaries loaded from disk in mixed encodings.

use dict_core::diff::{diff, WordDiff};
use dict_core::format::{read_dictionary_file, write_dictionary, write_dictionary_file, OutputFormat};
use dict_core::inspect::inspect_bytes;
use dict_core::FormatOptions;
use tempfile::tempdir;

const LEFT: &str = "dictionary=main:en,locale=en_US,version=1\n word=cat,f=10\n";
const RIGHT: &str = "# user edits\ndictionary=main:en,locale=en_US,version=2\n word=cat,f=12\n word=dog,f=5\n  bigram=cat,f=3\n";

#[test]
fn diff_reports_the_exact_edit_script() {
    let dir = tempdir().unwrap();
    let left = dir.path().join("left.combined");
    let right = dir.path().join("right.combined");
    std::fs::write(&left, LEFT).unwrap();
    std::fs::write(&right, RIGHT).unwrap();

    let a = read_dictionary_file(&left).unwrap();
    let b = read_dictionary_file(&right).unwrap();
    let d = diff(&a, &b);
    assert_eq!(
        d.words,
        vec![
            WordDiff::ProbabilityChanged { word: "cat".to_string(), from: 10, to: 12 },
            WordDiff::Added { word: "dog".to_string(), probability: 5 },
        ]
    );
    let lines: Vec<String> = d.lines().into_iter().map(|(sign, line)| format!("{sign} {line}")).collect();
    assert!(lines.contains(&"# header version: 1 -> 2".to_string()), "{lines:?}");
    assert!(lines.contains(&"+ dog bigram cat : 3".to_string()), "{lines:?}");
}

#[test]
fn encoding_does_not_change_the_diff() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("right.combined");
    std::fs::write(&source, RIGHT).unwrap();
    let dict = read_dictionary_file(&source).unwrap();

    let xml = dir.path().join("right.xml");
    let binary = dir.path().join("right.dict");
    write_dictionary_file(&dict, &xml, OutputFormat::Xml).unwrap();
    write_dictionary_file(&dict, &binary, OutputFormat::Binary(FormatOptions::dynamic())).unwrap();

    let from_xml = read_dictionary_file(&xml).unwrap();
    assert!(diff(&dict, &from_xml).is_empty());
    let from_binary = read_dictionary_file(&binary).unwrap();
    assert!(diff(&dict, &from_binary).words.is_empty());
    assert!(diff(&dict, &from_binary).attributes.is_empty());
}

#[test]
fn compressed_files_are_inspected_transparently() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("right.combined");
    std::fs::write(&source, RIGHT).unwrap();
    let dict = read_dictionary_file(&source).unwrap();

    let raw = write_dictionary(&dict, FormatOptions::static_v2()).unwrap();
    let packed = zstd::stream::encode_all(raw.as_slice(), 3).unwrap();
    let info = inspect_bytes(&packed).unwrap();
    assert_eq!(info.encoding, "zstd");
    assert_eq!(info.stats.unigrams, 2);
    assert_eq!(info.stats.bigrams, 1);
}
