// File: src/bin/dicttool.rs
//! Offline tooling for dictionary files: inspect, compare, compress and convert.

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use crossterm::style::Stylize;
use dict_core::diff::{diff, DictionaryDiff};
use dict_core::format::{read_dictionary_file, sniff, write_dictionary_file, InputFormat, OutputFormat};
use dict_core::inspect::{inspect_bytes, inspect_header, FileInfo};
use dict_core::learning::{Clock, LearningEngine, SystemClock};
use dict_core::persistence::write_atomic;
use dict_core::{FormatOptions, FormatVersion};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const ZSTD_LEVEL: i32 = 19;

#[derive(Parser, Debug)]
#[command(name = "dicttool", version, about = "Inspect, compare and convert predictive-text dictionaries")]
struct Cli {
    /// Log codec and GC details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header and word statistics of a dictionary
    Info {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the header of a binary dictionary without reading its body
    Header { file: PathBuf },
    /// Compare two dictionaries
    Diff {
        /// Plumbing output: one uncoloured line per change
        #[arg(short = 'p')]
        plumbing: bool,
        #[arg(long)]
        json: bool,
        left: PathBuf,
        right: PathBuf,
    },
    /// zstd-compress a dictionary file
    Compress { src: PathBuf, dst: PathBuf },
    /// Undo `compress`
    Uncompress { src: PathBuf, dst: PathBuf },
    /// Convert between binary, combined and XML encodings
    #[command(group(ArgGroup::new("output").required(true).multiple(true).args(["binary", "combined", "xml"])))]
    Makedict {
        #[arg(short = 's', long = "source")]
        source: PathBuf,
        #[arg(short = 'd', long = "binary")]
        binary: Option<PathBuf>,
        #[arg(short = 'c', long = "combined")]
        combined: Option<PathBuf>,
        #[arg(short = 'x', long = "xml")]
        xml: Option<PathBuf>,
        /// Binary format version (2, 3 or 4)
        #[arg(long = "format-version", default_value_t = 2)]
        format_version: u16,
        /// Store historical info (version 4 only)
        #[arg(long)]
        historical: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "dicttool=debug,dict_core=debug" } else { "dicttool=info,dict_core=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}

fn print_info(path: &Path, info: &FileInfo) {
    println!("{}", path.display().to_string().bold());
    match &info.header {
        Some(h) => println!(
            "  encoding: {} v{} ({})",
            info.encoding,
            h.version.as_u16(),
            if h.supports_dynamic_update() { "dynamic" } else { "static" }
        ),
        None => println!("  encoding: {}", info.encoding),
    }
    println!("  size: {} bytes", info.file_size);
    for (key, value) in &info.attributes {
        println!("  {key} = {value}");
    }
    let s = &info.stats;
    println!("  words: {} ({} not-a-word, {} offensive)", s.unigrams, s.not_a_words, s.possibly_offensive);
    println!("  bigrams: {}  shortcuts: {}  nodes: {}", s.bigrams, s.shortcuts, s.nodes);
    if let (Some(min), Some(max)) = (s.min_probability, s.max_probability) {
        println!("  probability range: {min}..={max}");
    }
    if s.with_historical_info > 0 {
        println!("  with historical info: {}", s.with_historical_info);
    }
}

fn print_diff(result: &DictionaryDiff, plumbing: bool) {
    if plumbing {
        for (sign, line) in result.lines() {
            println!("{sign} {line}");
        }
        return;
    }
    if result.body_skipped {
        println!("{}", "Locales differ; only comparing headers".yellow());
    }
    if result.is_empty() {
        println!("{}", "No differences".green());
        return;
    }
    for (sign, line) in result.lines() {
        let text = format!("{sign} {line}");
        match sign {
            '+' => println!("{}", text.green()),
            '-' => println!("{}", text.red()),
            _ => println!("{}", text.yellow()),
        }
    }
}

fn makedict(
    source: &Path,
    outputs: [(Option<PathBuf>, OutputFormat); 3],
    historical: bool,
) -> Result<()> {
    let mut dict = read_dictionary_file(source).with_context(|| format!("cannot load {}", source.display()))?;
    if historical {
        LearningEngine::default().attach_history(&mut dict, SystemClock.now());
    }
    for (path, format) in outputs {
        let Some(path) = path else { continue };
        write_dictionary_file(&dict, &path, format)
            .with_context(|| format!("cannot write {}", path.display()))?;
        info!(path = %path.display(), ?format, words = dict.unigram_count(), "wrote dictionary");
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Info { file, json } => {
            let info = inspect_bytes(&read(&file)?).with_context(|| format!("cannot decode {}", file.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_info(&file, &info);
            }
        }
        Command::Header { file } => {
            let header = inspect_header(&read(&file)?).with_context(|| format!("cannot decode {}", file.display()))?;
            println!("version: {}", header.version.as_u16());
            println!("flags: {:#06x}", header.flags);
            println!("header size: {}", header.header_size);
            for (key, value) in &header.options.attributes {
                println!("{key} = {value}");
            }
        }
        Command::Diff { plumbing, json, left, right } => {
            let a = read_dictionary_file(&left).with_context(|| format!("cannot load {}", left.display()))?;
            let b = read_dictionary_file(&right).with_context(|| format!("cannot load {}", right.display()))?;
            let result = diff(&a, &b);
            debug!(changes = result.lines().len(), "diff computed");
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_diff(&result, plumbing);
            }
        }
        Command::Compress { src, dst } => {
            let bytes = read(&src)?;
            if sniff(&bytes) == Some(InputFormat::Compressed) {
                bail!("{} is already compressed", src.display());
            }
            let packed = zstd::stream::encode_all(bytes.as_slice(), ZSTD_LEVEL)?;
            write_atomic(&dst, &packed)?;
            info!(from = bytes.len(), to = packed.len(), "compressed");
        }
        Command::Uncompress { src, dst } => {
            let bytes = read(&src)?;
            if sniff(&bytes) != Some(InputFormat::Compressed) {
                bail!("{} is not zstd-compressed", src.display());
            }
            let raw = zstd::stream::decode_all(bytes.as_slice())
                .with_context(|| format!("cannot decompress {}", src.display()))?;
            write_atomic(&dst, &raw)?;
        }
        Command::Makedict { source, binary, combined, xml, format_version, historical } => {
            let version = FormatVersion::from_u16(format_version)?;
            let format = FormatOptions::new(version, historical)?;
            makedict(
                &source,
                [
                    (binary, OutputFormat::Binary(format)),
                    (combined, OutputFormat::Combined),
                    (xml, OutputFormat::Xml),
                ],
                historical,
            )?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
