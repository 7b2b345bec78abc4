// src/core/mod.rs
pub mod engine;
pub mod options;
pub mod trie;
pub mod types;
