use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docchat::config::{init_tracing, Cli};
use docchat::{
    loader, DocumentStore, FlatIndex, OpenAiEmbedder, SearchHit, TextSplitter, VectorIndex,
};

#[derive(Parser, Debug)]
#[command(
    name = "docchat",
    about = "Ingest, search and manage documents in the flat-file vector store"
)]
struct DocCli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: Cli,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk, embed and store one or more .txt/.md files
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Return the chunks most similar to a query
    Search {
        /// Query text
        query: String,

        /// Number of results
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Print results as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List stored documents with their chunk counts
    List {
        /// Print results as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Delete every chunk of a document
    Delete {
        /// Source name as shown by `list`
        source: String,
    },
    /// Remove every stored chunk and the store file
    Reset,
}

fn main() -> Result<()> {
    init_tracing("warn");
    let cli = DocCli::parse();
    match &cli.command {
        Command::Ingest { paths } => ingest(&cli.common, paths),
        Command::Search { query, top_k, json } => search(&cli.common, query, *top_k, *json),
        Command::List { json } => list(&cli.common, *json),
        Command::Delete { source } => {
            let mut index = FlatIndex::open(cli.common.store_path());
            if !index.delete_by_source(source) {
                bail!("document {source:?} not found in {:?}", index.path());
            }
            println!("deleted {source}");
            Ok(())
        }
        Command::Reset => {
            let mut index = FlatIndex::open(cli.common.store_path());
            if !index.reset() {
                bail!("failed to reset store at {:?}", index.path());
            }
            println!("store reset");
            Ok(())
        }
    }
}

fn open_store(common: &Cli) -> Result<DocumentStore<OpenAiEmbedder>> {
    let embedder = OpenAiEmbedder::new(&common.embedding_settings()?)?;
    Ok(DocumentStore::open(
        common.store_path(),
        TextSplitter::new(common.chunker_config()),
        embedder,
    ))
}

fn ingest(common: &Cli, paths: &[PathBuf]) -> Result<()> {
    let store = open_store(common)?;
    let mut failures = 0usize;
    for path in paths {
        let outcome = loader::load_path(path)
            .with_context(|| format!("failed to load {path:?}"))
            .and_then(|document| {
                store
                    .ingest(&document.text, &document.metadata)
                    .with_context(|| format!("failed to ingest {path:?}"))
            });
        match outcome {
            Ok(report) => println!(
                "{}: {} chunks added",
                report.document_name, report.chunks_added
            ),
            Err(err) => {
                eprintln!("{err:#}");
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} documents failed", paths.len());
    }
    Ok(())
}

fn search(common: &Cli, query: &str, top_k: usize, json: bool) -> Result<()> {
    let store = open_store(common)?;
    let hits = store.search(query, top_k);
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&hits).context("failed to serialize results")?
        );
        return Ok(());
    }
    if hits.is_empty() {
        println!("no results");
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!("{}", render_hit(rank + 1, hit));
    }
    Ok(())
}

fn list(common: &Cli, json: bool) -> Result<()> {
    let index = FlatIndex::open(common.store_path());
    let documents = index.list_sources();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&documents).context("failed to serialize documents")?
        );
        return Ok(());
    }
    for doc in &documents {
        println!(
            "{}\t{} chunks\t{}",
            doc.source,
            doc.chunks,
            doc.created_at.to_rfc3339()
        );
    }
    Ok(())
}

fn render_hit(rank: usize, hit: &SearchHit) -> String {
    format!(
        "#{rank} {source} [chunk {index}/{total}] score {score:.4}\n{text}\n---",
        source = hit.metadata.source,
        index = hit.metadata.chunk_index + 1,
        total = hit.metadata.total_chunks,
        score = hit.score,
        text = hit.content.trim()
    )
}
