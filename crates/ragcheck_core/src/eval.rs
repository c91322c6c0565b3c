use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::debug;

use crate::chat::ChatModel;
use crate::embed::EmbeddingProvider;
use crate::error::Result;
use crate::model::{CaseOutcome, TestCase, TestResult};
use crate::report::Reporter;
use crate::retrieval::Retriever;
use crate::score::Scorer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub total: usize,
    pub passed: usize,
    /// Cases that completed but scored below the threshold.
    pub failed: usize,
    /// Cases that raised an error before they could be scored.
    pub errored: usize,
    pub pass_rate: f32,
    pub outcomes: Vec<CaseOutcome>,
}

impl EvalSummary {
    pub fn from_outcomes(outcomes: Vec<CaseOutcome>) -> Self {
        let total = outcomes.len();
        let passed = outcomes.iter().filter(|o| o.passed()).count();
        let errored = outcomes
            .iter()
            .filter(|o| matches!(o, CaseOutcome::Errored { .. }))
            .count();
        let failed = total.saturating_sub(passed + errored);
        let pass_rate = if total == 0 {
            0.0
        } else {
            passed as f32 / total as f32
        };

        Self {
            total,
            passed,
            failed,
            errored,
            pass_rate,
            outcomes,
        }
    }
}

/// Retrieve, ask, score. Any step's error ends the case.
pub fn run_case<E, C>(
    retriever: &Retriever<'_, E>,
    chat: &C,
    scorer: &Scorer<'_, E>,
    case: &TestCase,
) -> Result<TestResult>
where
    E: EmbeddingProvider + ?Sized,
    C: ChatModel + ?Sized,
{
    let retrieval = retriever.retrieve(&case.query)?;
    let context = retrieval.context_or_empty();
    let reply = chat.send_query(&case.query, context)?;
    let similarity = scorer.similarity(&case.expected, &reply.text)?;

    Ok(TestResult {
        name: case.name.clone(),
        passed: scorer.passes(similarity),
        similarity,
        response_time_s: reply.elapsed.as_secs_f64(),
        expected: case.expected.clone(),
        actual: reply.text,
        context: context.to_string(),
    })
}

/// Runs every case in order. A failing case is reported and recorded as
/// [`CaseOutcome::Errored`]; only a failure to write the log stops the run.
pub fn run_cases<E, C, W>(
    retriever: &Retriever<'_, E>,
    chat: &C,
    scorer: &Scorer<'_, E>,
    cases: &[TestCase],
    reporter: &mut Reporter<W>,
) -> Result<EvalSummary>
where
    E: EmbeddingProvider + ?Sized,
    C: ChatModel + ?Sized,
    W: Write,
{
    let mut outcomes = Vec::with_capacity(cases.len());

    for case in cases {
        let outcome = match run_case(retriever, chat, scorer, case) {
            Ok(result) => {
                debug!(
                    test = %result.name,
                    passed = result.passed,
                    similarity = result.similarity,
                    "test case scored"
                );
                reporter.result(&result)?;
                CaseOutcome::Completed(result)
            }
            Err(err) => {
                let message = err.to_string();
                debug!(test = %case.name, error = %message, "test case errored");
                reporter.failure(&case.name, &message)?;
                CaseOutcome::Errored {
                    name: case.name.clone(),
                    error: message,
                }
            }
        };
        outcomes.push(outcome);
    }

    Ok(EvalSummary::from_outcomes(outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::OllamaChatClient;
    use crate::embed::HashEmbeddingProvider;
    use crate::error::ChatError;
    use crate::model::ChatReply;
    use std::cell::RefCell;
    use std::time::Duration;

    /// Replies from a fixed table and records the context it was given.
    struct ScriptedChat {
        replies: Vec<(&'static str, std::result::Result<&'static str, u16>)>,
        seen_context: RefCell<Vec<String>>,
    }

    impl ScriptedChat {
        fn new(replies: Vec<(&'static str, std::result::Result<&'static str, u16>)>) -> Self {
            Self {
                replies,
                seen_context: RefCell::new(Vec::new()),
            }
        }
    }

    impl ChatModel for ScriptedChat {
        fn send_query(
            &self,
            query: &str,
            context: &str,
        ) -> std::result::Result<ChatReply, ChatError> {
            self.seen_context.borrow_mut().push(context.to_string());
            match self.replies.iter().find(|(q, _)| *q == query) {
                Some((_, Ok(text))) => Ok(ChatReply {
                    text: text.to_string(),
                    elapsed: Duration::from_millis(250),
                    skipped_chunks: 0,
                }),
                Some((_, Err(status))) => Err(ChatError::Status {
                    status: *status,
                    body: "internal error".to_string(),
                }),
                None => Ok(ChatReply {
                    text: String::new(),
                    elapsed: Duration::ZERO,
                    skipped_chunks: 0,
                }),
            }
        }
    }

    fn knowledge_base() -> Vec<String> {
        vec![
            "Items can be returned within 30 days.".to_string(),
            "Orders ship within two business days.".to_string(),
        ]
    }

    fn cases() -> Vec<TestCase> {
        vec![
            TestCase::new("Simple Greeting", "Hello", "Hello there! How are you today?"),
            TestCase::new(
                "Return Policy",
                "What is the return policy? Can items be returned?",
                "Items can be returned within 30 days.",
            ),
            TestCase::new(
                "Track Order",
                "Track order #12345.",
                "Please provide additional details to track your order.",
            ),
        ]
    }

    #[test]
    fn errors_are_isolated_per_case() {
        let embedder = HashEmbeddingProvider::default();
        let retriever = Retriever::build(&embedder, knowledge_base(), 0.4).unwrap();
        let scorer = Scorer::new(&embedder, 0.3);
        let chat = ScriptedChat::new(vec![
            ("Hello", Ok("Hello there! How are you today?")),
            (
                "What is the return policy? Can items be returned?",
                Err(500),
            ),
            ("Track order #12345.", Ok("I don't know.")),
        ]);
        let mut reporter = Reporter::new(Vec::new());

        let summary = run_cases(&retriever, &chat, &scorer, &cases(), &mut reporter).unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errored, 1);
        assert!((summary.pass_rate - 1.0 / 3.0).abs() < 1e-6);
        assert!(summary.outcomes[0].passed());
        assert!(matches!(
            &summary.outcomes[1],
            CaseOutcome::Errored { name, error }
                if name == "Return Policy" && error.contains("500") && error.contains("internal error")
        ));
        assert_eq!(summary.outcomes[2].name(), "Track Order");
        assert!(!summary.outcomes[2].passed());

        let log = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(log.contains(
            "Test Case: Return Policy | Error: API call failed: Error 500: internal error"
        ));
        assert!(log.contains("Test: Track Order"));
        assert_eq!(log.matches("Result: ").count(), 2);
    }

    #[test]
    fn retrieved_context_is_passed_to_chat() {
        let embedder = HashEmbeddingProvider::default();
        let retriever = Retriever::build(&embedder, knowledge_base(), 0.4).unwrap();
        let scorer = Scorer::new(&embedder, 0.3);
        let chat = ScriptedChat::new(Vec::new());
        let case = TestCase::new(
            "Return Policy",
            "Can items be returned within 30 days?",
            "Items can be returned within 30 days.",
        );

        let result = run_case(&retriever, &chat, &scorer, &case).unwrap();

        assert_eq!(result.context, "Items can be returned within 30 days.");
        assert_eq!(
            chat.seen_context.borrow().as_slice(),
            ["Items can be returned within 30 days."]
        );
        assert!(!result.passed);
    }

    #[test]
    fn empty_knowledge_base_errors_every_case() {
        let embedder = HashEmbeddingProvider::default();
        let retriever = Retriever::build(&embedder, Vec::new(), 0.4).unwrap();
        let scorer = Scorer::new(&embedder, 0.3);
        let chat = ScriptedChat::new(Vec::new());
        let mut reporter = Reporter::new(Vec::new());

        let summary = run_cases(&retriever, &chat, &scorer, &cases(), &mut reporter).unwrap();

        assert_eq!(summary.errored, 3);
        assert!(chat.seen_context.borrow().is_empty());
    }

    #[test]
    fn http_500_is_logged_and_run_continues() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::Regex("Track order".to_string()))
            .with_status(500)
            .with_body("internal error")
            .create();
        server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::AnyOf(vec![
                mockito::Matcher::Regex(r#""content":"Hello""#.to_string()),
                mockito::Matcher::Regex("return policy".to_string()),
            ]))
            .with_status(200)
            .with_body("{\"message\":{\"content\":\"Hello there! How are you today?\"},\"done\":true}\n")
            .create();

        let embedder = HashEmbeddingProvider::default();
        let retriever = Retriever::build(&embedder, knowledge_base(), 0.4).unwrap();
        let scorer = Scorer::new(&embedder, 0.3);
        let chat =
            OllamaChatClient::new(format!("{}/api/chat", server.url()), "llama2", None).unwrap();
        let mut reporter = Reporter::new(Vec::new());

        let summary = run_cases(&retriever, &chat, &scorer, &cases(), &mut reporter).unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.outcomes[2].name(), "Track Order");
        assert!(matches!(summary.outcomes[2], CaseOutcome::Errored { .. }));
        assert!(summary.outcomes[0].passed());

        let log = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(log.contains("Test Case: Track Order | Error: API call failed: Error 500"));
    }
}
