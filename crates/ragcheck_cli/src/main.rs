mod cli;

use std::fs::{File, OpenOptions};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ragcheck_core::{
    builtin_test_cases, load_knowledge_base, load_test_cases, run_cases, CaseOutcome,
    EmbeddingProvider, EvalSummary, HashEmbeddingProvider, MiniLmEmbeddingProvider,
    OllamaChatClient, Reporter, Retriever, Scorer, DEFAULT_EMBEDDING_MODEL,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

fn init_tracing(log_file: File) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .with_target(false)
        .init();
}

fn make_embedder(cli: &Cli) -> Result<Box<dyn EmbeddingProvider>> {
    if cli.hash_embeddings {
        info!("using hashing embedder");
        return Ok(Box::new(HashEmbeddingProvider::default()));
    }

    eprintln!("Loading {DEFAULT_EMBEDDING_MODEL} from {} ...", cli.model_path.display());
    let provider = MiniLmEmbeddingProvider::load(&cli.model_path, &cli.tokenizer_path)?;
    eprintln!("Model loaded.");
    Ok(Box::new(provider))
}

fn print_summary(format: &str, summary: &EvalSummary) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!(
        "total={} passed={} failed={} errored={} pass_rate={:.4}",
        summary.total, summary.passed, summary.failed, summary.errored, summary.pass_rate
    );
    for outcome in &summary.outcomes {
        match outcome {
            CaseOutcome::Completed(r) => println!(
                "case={:?} passed={} similarity={:.4} response_time={:.2}s",
                r.name, r.passed, r.similarity, r.response_time_s
            ),
            CaseOutcome::Errored { name, error } => {
                println!("case={name:?} passed=false error={error:?}")
            }
        }
    }
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.validate().map_err(|e| anyhow!(e))?;
    let config = cli.harness_config();
    config.validate()?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cli.log_file)
        .with_context(|| format!("open log file {}", cli.log_file.display()))?;
    init_tracing(log_file.try_clone().context("clone log file handle")?);
    let mut reporter = Reporter::new(log_file);

    reporter.message("Starting chatbot testing with RAG...")?;

    let knowledge_base = load_knowledge_base(&cli.knowledge_base)?;
    if knowledge_base.is_empty() {
        warn!(
            path = %cli.knowledge_base.display(),
            "knowledge base has no entries; every case will fail retrieval"
        );
    }
    reporter.message("Knowledge base loaded.")?;

    let cases = match &cli.cases {
        Some(path) => load_test_cases(path)?,
        None => builtin_test_cases(),
    };

    let embedder = make_embedder(&cli)?;
    let retriever = Retriever::build(&embedder, knowledge_base, config.retrieval_threshold)?;
    let scorer = Scorer::new(&embedder, config.similarity_threshold);
    let chat = OllamaChatClient::new(
        cli.endpoint.as_str(),
        cli.chat_model.as_str(),
        cli.request_timeout(),
    )?;
    info!(
        endpoint = chat.endpoint(),
        entries = retriever.len(),
        cases = cases.len(),
        "running test cases"
    );

    let summary = run_cases(&retriever, &chat, &scorer, &cases, &mut reporter)?;
    reporter.summary(&summary)?;
    reporter.message("Chatbot testing completed.")?;

    print_summary(&cli.output, &summary)
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
