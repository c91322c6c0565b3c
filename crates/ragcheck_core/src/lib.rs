pub mod chat;
pub mod config;
pub mod embed;
pub mod error;
pub mod eval;
pub mod knowledge;
pub mod minilm_embed;
pub mod model;
pub mod report;
pub mod retrieval;
pub mod score;

pub use chat::{collect_reply, ChatModel, ChatRequest, ChunkEvent, ChunkStream, OllamaChatClient};
pub use config::{
    builtin_test_cases, HarnessConfig, DEFAULT_CHAT_MODEL, DEFAULT_CHAT_URL,
    DEFAULT_EMBEDDING_DIM, DEFAULT_EMBEDDING_MODEL, DEFAULT_KNOWLEDGE_BASE, DEFAULT_LOG_FILE,
    DEFAULT_MODEL_PATH, DEFAULT_RETRIEVAL_THRESHOLD, DEFAULT_SIMILARITY_THRESHOLD,
    DEFAULT_TOKENIZER_PATH, SYSTEM_PROMPT_PREFIX,
};
pub use embed::{EmbeddingProvider, HashEmbeddingProvider};
pub use error::{ChatError, HarnessError, Result};
pub use eval::{run_case, run_cases, EvalSummary};
pub use knowledge::{load_knowledge_base, load_test_cases};
pub use minilm_embed::MiniLmEmbeddingProvider;
pub use model::{CaseOutcome, ChatReply, Decision, RetrievalMatch, TestCase, TestResult};
pub use report::Reporter;
pub use retrieval::{cosine_similarity, top_match, Retriever};
pub use score::Scorer;
