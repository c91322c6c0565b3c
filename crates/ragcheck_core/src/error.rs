use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("API call failed: Error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API call failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API call failed: reading response stream: {0}")]
    Stream(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("cannot read knowledge base {}: {source}", .path.display())]
    KnowledgeBase {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read test cases {}: {reason}", .path.display())]
    TestCases { path: PathBuf, reason: String },

    #[error("knowledge base is empty")]
    EmptyKnowledgeBase,

    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Chat(#[from] ChatError),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
