use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{HarnessError, Result};
use crate::model::TestCase;

/// One fact per line. Blank lines are dropped and the rest trimmed, keeping
/// file order.
pub fn load_knowledge_base(path: &Path) -> Result<Vec<String>> {
    let io_err = |source: std::io::Error| HarnessError::KnowledgeBase {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(io_err)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        entries.push(line.to_string());
    }

    Ok(entries)
}

/// Reads a JSON array of `{name, query, expected}` objects.
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let fail = |reason: String| HarnessError::TestCases {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| fail(e.to_string()))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| fail(e.to_string()))
}
