use crate::error::{HarnessError, Result};
use crate::model::TestCase;

pub const DEFAULT_CHAT_URL: &str = "http://127.0.0.1:11434/api/chat";
pub const DEFAULT_CHAT_MODEL: &str = "llama2";
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.3;
pub const DEFAULT_RETRIEVAL_THRESHOLD: f32 = 0.4;
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_MODEL_PATH: &str = "models/all-MiniLM-L6-v2.safetensors";
pub const DEFAULT_TOKENIZER_PATH: &str = "models/all-MiniLM-L6-v2-tokenizer.json";
pub const DEFAULT_KNOWLEDGE_BASE: &str = "knowledge_base.txt";
pub const DEFAULT_LOG_FILE: &str = "results.log";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const SYSTEM_PROMPT_PREFIX: &str = "Use the following context to answer the query: ";

/// Thresholds applied by the driver. The two values are independent; neither
/// is derived from the other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarnessConfig {
    pub similarity_threshold: f32,
    pub retrieval_threshold: f32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            retrieval_threshold: DEFAULT_RETRIEVAL_THRESHOLD,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("similarity threshold", self.similarity_threshold),
            ("retrieval threshold", self.retrieval_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(HarnessError::InvalidConfig(format!(
                    "{name} must be within [-1, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

pub fn builtin_test_cases() -> Vec<TestCase> {
    [
        ("Simple Greeting", "Hello", "Hello there! How are you today?"),
        (
            "Return Policy",
            "What is the return policy?",
            "Items can be returned within 30 days.",
        ),
        (
            "Track Order",
            "Track order #12345.",
            "Please provide additional details to track your order.",
        ),
        (
            "Complex Query",
            "Summarize the history of the Roman Empire in 200 words.",
            "The Roman Empire was founded...",
        ),
        (
            "Edge Case: Empty Input",
            "",
            "I didn't catch that. Could you please rephrase?",
        ),
    ]
    .into_iter()
    .map(|(name, query, expected)| TestCase::new(name, query, expected))
    .collect()
}
