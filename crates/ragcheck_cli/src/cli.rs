use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ragcheck_core::{
    HarnessConfig, DEFAULT_CHAT_MODEL, DEFAULT_CHAT_URL, DEFAULT_KNOWLEDGE_BASE,
    DEFAULT_LOG_FILE, DEFAULT_MODEL_PATH, DEFAULT_RETRIEVAL_THRESHOLD,
    DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TOKENIZER_PATH,
};

#[derive(Parser, Debug)]
#[command(
    name = "ragcheck",
    version,
    about = "Score a local chat service's replies against expected answers, with knowledge base retrieval"
)]
pub struct Cli {
    /// Knowledge base file, one fact per line.
    #[arg(long, default_value = DEFAULT_KNOWLEDGE_BASE)]
    pub knowledge_base: PathBuf,

    /// Results are appended here.
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    #[arg(long, default_value = DEFAULT_CHAT_URL)]
    pub endpoint: String,

    #[arg(long, default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    /// all-MiniLM-L6-v2 weights (.safetensors).
    #[arg(long, default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    #[arg(long, default_value = DEFAULT_TOKENIZER_PATH)]
    pub tokenizer_path: PathBuf,

    /// Use the model-free hashing embedder instead of MiniLM.
    #[arg(long)]
    pub hash_embeddings: bool,

    #[arg(long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
    pub similarity_threshold: f32,

    #[arg(long, default_value_t = DEFAULT_RETRIEVAL_THRESHOLD)]
    pub retrieval_threshold: f32,

    /// JSON array of {name, query, expected}; replaces the built-in cases.
    #[arg(long)]
    pub cases: Option<PathBuf>,

    /// Chat request timeout. Requests wait indefinitely when unset.
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,

    /// Summary format on stdout: text or json.
    #[arg(long, default_value = "text")]
    pub output: String,
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(timeout) = &self.timeout {
            if timeout.as_ref().is_zero() {
                return Err("timeout must be > 0".to_string());
            }
        }

        if !matches!(self.output.as_str(), "text" | "json") {
            return Err(format!("Unknown output format: {}", self.output));
        }

        if self.endpoint.trim().is_empty() {
            return Err("endpoint is required".to_string());
        }

        Ok(())
    }

    pub fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            similarity_threshold: self.similarity_threshold,
            retrieval_threshold: self.retrieval_threshold,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.timeout.as_ref().map(|t| *t.as_ref())
    }
}
