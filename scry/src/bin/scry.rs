//! Command line front end for the suggestion engine.
//!
//! The corpus is a JSON array of cards, each an object mapping indexed field
//! names (`name_en`, `artist`, `cmc`, ...) to values.
//!
//! Usage:
//!     scry build --corpus cards.json
//!     scry suggest --corpus cards.json --query 'type:gob'
//!     scry classify --query 'name:"goblin gu' --caret 10

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scry::{
    BuildOutcome, CardCorpus, FieldCatalog, QueryTokenizer, SuggestConfig, SuggestionEngine,
    TokenClassifier,
};

#[derive(Parser)]
#[command(name = "scry", about = "Query-aware auto-complete for card searches")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the suggestion index directory of the configuration
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build (or open) the suggestion index for a corpus
    Build {
        #[arg(long)]
        corpus: PathBuf,
        /// Discard the persisted index first
        #[arg(long)]
        rebuild: bool,
    },
    /// Print completions for a query
    Suggest {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long)]
        query: String,
        /// Byte offset of the caret, defaults to the end of the query
        #[arg(long)]
        caret: Option<usize>,
        #[arg(long)]
        language: Option<String>,
    },
    /// Print the token under the caret
    Classify {
        #[arg(long)]
        query: String,
        #[arg(long)]
        caret: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SuggestConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => SuggestConfig::default(),
    };
    if let Some(index_dir) = cli.index_dir {
        config.index_dir = index_dir;
    }

    match cli.command {
        Command::Build { corpus, rebuild } => {
            let engine = open_engine(&config, &corpus, rebuild)?;
            println!(
                "{} tasks indexed into {}",
                engine.indexed_tasks(),
                engine.index_directory().display()
            );
        }
        Command::Suggest { corpus, query, caret, language } => {
            let engine = open_engine(&config, &corpus, false)?;
            let language = language.unwrap_or_else(|| config.default_language.clone());
            let caret = caret.unwrap_or(query.len());
            let result = engine.suggest(&language, &query, caret);
            for (value, token_type) in result.values().iter().zip(result.types()) {
                println!("{:?}\t{}", token_type, value);
            }
        }
        Command::Classify { query, caret } => {
            let caret = caret.unwrap_or(query.len());
            match QueryTokenizer.classify(&query, caret) {
                Some(token) => println!("{:#?}", token),
                None => println!("caret {} is outside the query", caret),
            }
        }
    }
    Ok(())
}

fn open_engine(config: &SuggestConfig, corpus_path: &Path, rebuild: bool) -> Result<SuggestionEngine> {
    let catalog = FieldCatalog::card_fields();
    let corpus = load_corpus(corpus_path, &catalog)?;
    let engine = SuggestionEngine::new(catalog, config);
    if rebuild {
        engine.invalidate_index()?;
    }

    engine.subscribe(|progress| {
        if !progress.complete {
            tracing::info!("indexed {}/{}", progress.indexed, progress.total);
        }
    });

    match engine.load(Arc::new(corpus))? {
        BuildOutcome::Opened => tracing::info!("opened existing suggestion index"),
        BuildOutcome::Built => tracing::info!("built suggestion index"),
        BuildOutcome::Aborted => anyhow::bail!("suggestion index build was aborted"),
    }
    Ok(engine)
}

fn load_corpus(path: &Path, catalog: &FieldCatalog) -> Result<CardCorpus> {
    let bytes = std::fs::read(path).with_context(|| format!("reading corpus {}", path.display()))?;
    let cards: Vec<BTreeMap<String, serde_json::Value>> =
        serde_json::from_slice(&bytes).context("corpus must be a JSON array of objects")?;

    let corpus = CardCorpus::new_in_memory(catalog)?;
    for card in &cards {
        let values: Vec<(String, String)> = card
            .iter()
            .filter_map(|(field, value)| match value {
                serde_json::Value::String(s) => Some((field.clone(), s.clone())),
                serde_json::Value::Number(n) => Some((field.clone(), n.to_string())),
                _ => None,
            })
            .collect();
        corpus.add_document(values.iter().map(|(f, v)| (f.as_str(), v.as_str())))?;
    }
    corpus.commit()?;
    tracing::info!(cards = cards.len(), "corpus loaded");
    Ok(corpus)
}
