use std::io::{self, BufRead, BufReader, Lines};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::SYSTEM_PROMPT_PREFIX;
use crate::error::ChatError;
use crate::model::ChatReply;

/// Anything that can answer a query given retrieved context.
pub trait ChatModel {
    fn send_query(&self, query: &str, context: &str) -> Result<ChatReply, ChatError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn with_context(model: &str, query: &str, context: &str) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: format!("{SYSTEM_PROMPT_PREFIX}{context}"),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: query.to_string(),
                },
            ],
            stream: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug)]
pub enum ChunkEvent {
    Chunk(ChatChunk),
    Malformed {
        line: String,
        error: serde_json::Error,
    },
}

/// Lazily decodes newline-delimited JSON chunks. Blank lines are skipped;
/// lines that fail to parse come back as [`ChunkEvent::Malformed`] so the
/// consumer can keep reading.
pub struct ChunkStream<R> {
    lines: Lines<R>,
}

impl<R: BufRead> ChunkStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for ChunkStream<R> {
    type Item = io::Result<ChunkEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err)),
            };
            if line.trim().is_empty() {
                continue;
            }
            let event = match serde_json::from_str::<ChatChunk>(&line) {
                Ok(chunk) => ChunkEvent::Chunk(chunk),
                Err(error) => ChunkEvent::Malformed { line, error },
            };
            return Some(Ok(event));
        }
    }
}

/// Concatenates chunk content until a chunk reports `done`. Returns the
/// trimmed text and the number of malformed lines skipped.
pub fn collect_reply<R: BufRead>(reader: R) -> io::Result<(String, usize)> {
    let mut collected = String::new();
    let mut skipped = 0;

    for event in ChunkStream::new(reader) {
        match event? {
            ChunkEvent::Malformed { line, error: err } => {
                skipped += 1;
                error!("Failed to parse chunk: {line}, Error: {err}");
            }
            ChunkEvent::Chunk(chunk) => {
                if let Some(content) = chunk.message.and_then(|m| m.content) {
                    collected.push_str(&content);
                }
                if chunk.done == Some(true) {
                    break;
                }
            }
        }
    }

    Ok((collected.trim().to_string(), skipped))
}

pub struct OllamaChatClient {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaChatClient {
    /// `timeout: None` leaves requests unbounded.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ChatError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ChatModel for OllamaChatClient {
    fn send_query(&self, query: &str, context: &str) -> Result<ChatReply, ChatError> {
        let request = ChatRequest::with_context(&self.model, query, context);
        let start = Instant::now();

        let response = self.client.post(&self.endpoint).json(&request).send()?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text()?;
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let (text, skipped_chunks) = collect_reply(BufReader::new(response))?;
        let elapsed = start.elapsed();
        debug!(
            model = %self.model,
            elapsed_ms = elapsed.as_millis() as u64,
            skipped_chunks,
            "chat reply complete"
        );

        Ok(ChatReply {
            text,
            elapsed,
            skipped_chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use std::io::Cursor;

    fn client(server: &mockito::ServerGuard) -> OllamaChatClient {
        OllamaChatClient::new(format!("{}/api/chat", server.url()), "llama2", None).unwrap()
    }

    #[test]
    fn stops_at_done_chunk() {
        let body = concat!(
            r#"{"message":{"content":"Hi"},"done":true}"#,
            "\n",
            r#"{"message":{"content":" again"},"done":false}"#,
            "\n",
        );
        let (text, skipped) = collect_reply(Cursor::new(body)).unwrap();

        assert_eq!(text, "Hi");
        assert_eq!(skipped, 0);
    }

    #[test]
    fn skips_malformed_line_and_keeps_reading() {
        let body = concat!(
            "{not json\n",
            r#"{"message":{"content":"OK"},"done":true}"#,
            "\n",
        );
        let (text, skipped) = collect_reply(Cursor::new(body)).unwrap();

        assert_eq!(text, "OK");
        assert_eq!(skipped, 1);
    }

    #[test]
    fn concatenates_fragments_and_trims() {
        let body = concat!(
            r#"{"message":{"role":"assistant","content":"  Items can "}}"#,
            "\n\n   \n",
            r#"{"message":{"content":"be returned."},"done":false}"#,
            "\n",
            r#"{"done":true,"total_duration":12}"#,
            "\n",
        );
        let (text, skipped) = collect_reply(Cursor::new(body)).unwrap();

        assert_eq!(text, "Items can be returned.");
        assert_eq!(skipped, 0);
    }

    #[test]
    fn stream_without_done_reads_to_end() {
        let body = r#"{"message":{"content":"partial"}}"#;
        let (text, _) = collect_reply(Cursor::new(body)).unwrap();
        assert_eq!(text, "partial");
    }

    #[test]
    fn null_fields_are_tolerated() {
        let body = concat!(
            r#"{"message":{"content":null},"done":null}"#,
            "\n",
            r#"{"message":null,"done":true}"#,
            "\n",
        );
        let (text, skipped) = collect_reply(Cursor::new(body)).unwrap();
        assert_eq!(text, "");
        assert_eq!(skipped, 0);
    }

    #[test]
    fn chunk_stream_yields_events_lazily() {
        let body = "\n{bad\n{\"done\":true}\n";
        let mut stream = ChunkStream::new(Cursor::new(body));

        assert!(matches!(
            stream.next(),
            Some(Ok(ChunkEvent::Malformed { ref line, .. })) if line == "{bad"
        ));
        assert!(matches!(
            stream.next(),
            Some(Ok(ChunkEvent::Chunk(ChatChunk { done: Some(true), .. })))
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn request_carries_context_in_system_message() {
        let request = ChatRequest::with_context("llama2", "Hello", "");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value,
            json!({
                "model": "llama2",
                "messages": [
                    {"role": "system", "content": "Use the following context to answer the query: "},
                    {"role": "user", "content": "Hello"}
                ],
                "stream": true
            })
        );
    }

    #[test]
    fn posts_query_and_reads_streamed_reply() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({
                "model": "llama2",
                "messages": [
                    {
                        "role": "system",
                        "content": "Use the following context to answer the query: Items can be returned within 30 days."
                    },
                    {"role": "user", "content": "What is the return policy?"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body(concat!(
                r#"{"message":{"content":"Within "},"done":false}"#,
                "\n",
                r#"{"message":{"content":"30 days."},"done":true}"#,
                "\n",
            ))
            .create();

        let reply = client(&server)
            .send_query(
                "What is the return policy?",
                "Items can be returned within 30 days.",
            )
            .unwrap();

        mock.assert();
        assert_eq!(reply.text, "Within 30 days.");
        assert_eq!(reply.skipped_chunks, 0);
    }

    #[test]
    fn ignores_chunks_after_done() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(concat!(
                r#"{"message":{"content":"Hi"},"done":true}"#,
                "\n",
                r#"{"message":{"content":"ignored"},"done":true}"#,
                "\n",
            ))
            .create();

        let reply = client(&server).send_query("Hello", "").unwrap();
        assert_eq!(reply.text, "Hi");
    }

    #[test]
    fn non_200_status_is_an_api_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("internal error")
            .create();

        let err = client(&server).send_query("Hello", "").unwrap_err();
        assert!(matches!(err, ChatError::Status { status: 500, .. }));
        let message = err.to_string();
        assert!(message.contains("500"));
        assert!(message.contains("internal error"));
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = OllamaChatClient::new(
            format!("http://127.0.0.1:{port}/api/chat"),
            "llama2",
            Some(Duration::from_secs(5)),
        )
        .unwrap();

        let err = client.send_query("Hello", "").unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
        assert!(err.to_string().starts_with("API call failed"));
    }
}
