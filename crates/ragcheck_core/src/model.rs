use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub query: String,
    pub expected: String,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            expected: expected.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Hit,
    Miss,
}

/// Best knowledge base entry for a query. `context` is only set on a hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalMatch {
    pub entry_index: usize,
    pub context: Option<String>,
    pub score: f32,
    pub decision: Decision,
}

impl RetrievalMatch {
    pub fn context_or_empty(&self) -> &str {
        self.context.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub elapsed: Duration,
    /// Stream lines that failed to decode and were skipped.
    pub skipped_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub similarity: f32,
    pub response_time_s: f64,
    pub expected: String,
    pub actual: String,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Completed(TestResult),
    Errored { name: String, error: String },
}

impl CaseOutcome {
    pub fn name(&self) -> &str {
        match self {
            CaseOutcome::Completed(result) => &result.name,
            CaseOutcome::Errored { name, .. } => name,
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, CaseOutcome::Completed(result) if result.passed)
    }
}
